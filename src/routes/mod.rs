mod admin;
mod confirm;
mod cron;
mod health_check;
mod subscribe;
mod unsubscribe;
mod webhook;

pub use admin::*;
pub use confirm::*;
pub use cron::*;
pub use health_check::*;
pub use subscribe::*;
pub use unsubscribe::*;
pub use webhook::*;
