mod issue;
mod subscriber;
mod subscriber_email;
mod token;

pub use issue::*;
pub use subscriber::*;
pub use subscriber_email::*;
pub use token::*;
