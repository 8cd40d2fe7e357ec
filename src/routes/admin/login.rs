use actix_web::http::StatusCode;
use actix_web::web::{Data, Json};
use actix_web::HttpResponse;
use secrecy::Secret;

use crate::authentication::{validate_admin_password, AdminPasswordHash, AuthError};
use crate::session_state::AdminSession;
use crate::utils::{e500, error_json};

#[derive(serde::Deserialize)]
pub struct LoginBody {
    password: Secret<String>,
}

#[tracing::instrument(name = "Admin login", skip_all)]
pub async fn login(
    body: Json<LoginBody>,
    session: AdminSession,
    expected_hash: Data<AdminPasswordHash>,
) -> Result<HttpResponse, actix_web::Error> {
    match validate_admin_password(expected_hash.0.clone(), body.into_inner().password).await {
        Ok(()) => {
            // rotate the session id on privilege change
            session.renew();
            session.log_in().map_err(e500)?;
            Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })))
        }
        Err(AuthError::InvalidCredentials(e)) => {
            tracing::warn!(error = %e, "Failed admin login attempt");
            Ok(error_json(StatusCode::UNAUTHORIZED, "Invalid password"))
        }
        Err(AuthError::UnexpectedError(e)) => Err(e500(e)),
    }
}

#[tracing::instrument(name = "Admin logout", skip_all)]
pub async fn logout(session: AdminSession) -> HttpResponse {
    session.log_out();
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}
