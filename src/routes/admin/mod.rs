mod issues;
mod login;
mod newsletter;
mod stats;
mod subscribers;

pub use issues::*;
pub use login::*;
pub use newsletter::*;
pub use stats::*;
pub use subscribers::*;
