pub mod authentication;
pub mod configuration;
pub mod dispatch;
pub mod domain;
pub mod email_client;
pub mod routes;
pub mod session_state;
pub mod startup;
pub mod storage;
pub mod telemetry;
pub mod template;
pub mod utils;
