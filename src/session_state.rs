use std::future::{ready, Ready};

use actix_session::{Session, SessionExt, SessionGetError, SessionInsertError};
use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest};

/// Wrapper around `actix_session::Session` so session keys are methods
/// instead of loose strings.
pub struct AdminSession(Session);

impl AdminSession {
    const ADMIN_KEY: &'static str = "admin";

    pub fn new(session: Session) -> Self {
        Self(session)
    }

    pub fn renew(&self) {
        self.0.renew();
    }

    pub fn log_in(&self) -> Result<(), SessionInsertError> {
        self.0.insert(Self::ADMIN_KEY, true)
    }

    pub fn is_logged_in(&self) -> Result<bool, SessionGetError> {
        Ok(self.0.get(Self::ADMIN_KEY)?.unwrap_or(false))
    }

    pub fn log_out(&self) {
        self.0.purge();
    }
}

impl FromRequest for AdminSession {
    type Error = <Session as FromRequest>::Error;
    // Session extraction needs no I/O, so wrap the result in a ready future
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(Ok(AdminSession::new(req.get_session())))
    }
}
