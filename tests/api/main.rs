mod health_check;
mod helpers;
mod newsletters;
mod subscriptions;
