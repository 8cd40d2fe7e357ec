use validator::ValidateEmail;

/// A validated, case-folded email address. The `subscribers.email` column is
/// unique, so folding has to happen before any lookup or insert.
#[derive(Debug, Clone)]
pub struct SubscriberEmail(String);

impl SubscriberEmail {
    pub fn parse(email: String) -> Result<Self, String> {
        let email = email.trim().to_lowercase();
        match ValidateEmail::validate_email(&email) {
            true => Ok(Self(email)),
            false => Err(format!("Invalid email address: {:?}", email)),
        }
    }
}

impl AsRef<str> for SubscriberEmail {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriberEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
