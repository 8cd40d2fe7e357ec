use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::error::InternalError;
use actix_web::http::StatusCode;
use actix_web::FromRequest;
use actix_web_lab::middleware::Next;
use anyhow::Context;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use secrecy::{ExposeSecret, Secret};
use std::fmt::Debug;

use crate::session_state::AdminSession;
use crate::utils::{error_chain_fmt, error_json, spawn_blocking_task_with_tracing};

#[derive(thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials(#[source] anyhow::Error),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl Debug for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Argon2 PHC string of the single admin password, shared as app data.
#[derive(Clone)]
pub struct AdminPasswordHash(pub Secret<String>);

#[tracing::instrument(name = "Validate admin password", skip_all)]
pub async fn validate_admin_password(
    expected_password_hash: Secret<String>,
    password: Secret<String>,
) -> Result<(), AuthError> {
    spawn_blocking_task_with_tracing(move || {
        verify_password_hash(password, expected_password_hash)
    })
    .await
    .context("Failed to spawn blocking task")
    .map_err(AuthError::UnexpectedError)?
}

#[tracing::instrument(name = "Verify password hash", skip_all)]
pub fn verify_password_hash(
    password: Secret<String>,
    expected_password_hash: Secret<String>,
) -> Result<(), AuthError> {
    let parsed_hash = PasswordHash::new(expected_password_hash.expose_secret())
        .map_err(|e| AuthError::UnexpectedError(anyhow::anyhow!(e)))?;

    Argon2::default()
        .verify_password(password.expose_secret().as_bytes(), &parsed_hash)
        .context("Failed to verify password hash")
        .map_err(AuthError::InvalidCredentials)
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let params = Params::new(15000, 2, 1, None).expect("Failed to create Argon2 params");
    let hasher = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let password_hash = hasher
        .hash_password(password.as_bytes(), salt.as_salt())
        .context("Failed to hash password")
        .map_err(AuthError::UnexpectedError)?;

    Ok(password_hash.to_string())
}

/// Middleware for the `/api/admin` scope; requests without an authenticated
/// session get a 401 JSON envelope.
pub async fn reject_unauthenticated(
    mut req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let (raw_req, payload) = req.parts_mut();
    let session = AdminSession::from_request(raw_req, payload).await?;

    match session.is_logged_in() {
        Ok(true) => next.call(req).await,
        Ok(false) => {
            let response = error_json(StatusCode::UNAUTHORIZED, "Not authorized");
            let error = anyhow::anyhow!("The admin session is missing or invalid");
            Err(InternalError::from_response(error, response).into())
        }
        Err(e) => {
            let response = error_json(StatusCode::UNAUTHORIZED, "Not authorized");
            Err(InternalError::from_response(anyhow::anyhow!(e), response).into())
        }
    }
}
