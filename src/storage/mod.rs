mod issues;
mod sends;
mod subscribers;

pub use issues::IssueRepository;
pub use sends::SendRepository;
pub use subscribers::SubscriberRepository;
