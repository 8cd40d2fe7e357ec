use std::time::Duration;

use secrecy::{ExposeSecret, Secret};
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::domain::SubscriberEmail;
use crate::email_client::EmailClient;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub email_client: EmailClientSettings,
    pub admin: AdminSettings,
    pub cron: CronSettings,
}

impl Settings {
    pub fn get_configuration() -> Result<Settings, config::ConfigError> {
        let base_path = std::env::current_dir().expect("Failed to determine the current directory");
        let config_dir = base_path.join("configuration");

        let env: Environment = std::env::var("APP_ENVIRONMENT")
            .unwrap_or(Environment::Local.as_str().into())
            .try_into()
            .expect("Failed to parse APP_ENVIRONMENT");

        // Layered sources: base file, environment file, then `APP_*__*` env
        // vars (e.g. APP_APPLICATION__PORT=5001 -> Settings.application.port)
        config::Config::builder()
            .add_source(config::File::from(config_dir.join("base")))
            .add_source(config::File::from(config_dir.join(env.as_str())))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub name: String,
    pub default_log_level: String,
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    /// Public base URL used when building confirmation/unsubscribe links
    pub base_url: String,
    pub hmac_secret: Secret<String>,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub database_name: String,
    pub require_ssl: bool,
}

impl DatabaseSettings {
    pub fn connect_options(&self) -> PgConnectOptions {
        self.connect_options_without_db()
            .database(&self.database_name)
    }

    /// Connection to the Postgres instance itself, with no database selected.
    /// Used by the test suite to create a throwaway database per test.
    pub fn connect_options_without_db(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .username(&self.username)
            .password(self.password.expose_secret())
            .host(&self.host)
            .port(self.port)
            .ssl_mode(match self.require_ssl {
                true => PgSslMode::Require,
                false => PgSslMode::Prefer,
            })
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct EmailClientSettings {
    pub base_url: String,
    pub api_key: Secret<String>,
    pub from_email: String,
    pub from_name: String,
    /// Persistent MailerLite group; a throwaway group is created per campaign
    /// when unset
    #[serde(default)]
    pub group_id: Option<String>,
    pub batch_size: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub batch_delay_millis: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_millis: u64,
}

impl EmailClientSettings {
    pub fn sender(&self) -> Result<SubscriberEmail, String> {
        SubscriberEmail::parse(self.from_email.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_millis)
    }

    pub fn client(self) -> EmailClient {
        let sender = self.sender().expect("Invalid sender email address");
        let timeout = self.timeout();
        let batch_delay = self.batch_delay();
        EmailClient::new(
            self.base_url,
            self.api_key,
            sender,
            self.from_name,
            self.group_id,
            self.batch_size,
            batch_delay,
            timeout,
        )
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct AdminSettings {
    /// Argon2 PHC string of the single admin password
    pub password_hash: Secret<String>,
}

#[derive(serde::Deserialize, Clone)]
pub struct CronSettings {
    pub secret: Secret<String>,
}

enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!("Invalid APP_ENVIRONMENT: {}", other)),
        }
    }
}
