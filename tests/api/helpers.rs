use once_cell::sync::Lazy;
use secrecy::{ExposeSecret, Secret};
use serde_json::json;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use uuid::Uuid;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use newsletter::authentication::hash_password;
use newsletter::configuration::{DatabaseSettings, Settings};
use newsletter::startup::{get_connection_pool, Application};
use newsletter::telemetry::{get_tracing_subscriber, init_tracing_subscriber};

// The tracing stack can only be initialised once per process; `TEST_LOG`
// switches the sink between stdout and the void.
static TRACING: Lazy<()> = Lazy::new(|| {
    let name = "test";
    let default_log_level = "info";
    if std::env::var("TEST_LOG").is_ok() {
        init_tracing_subscriber(get_tracing_subscriber(
            name,
            default_log_level,
            std::io::stdout,
        ));
    } else {
        init_tracing_subscriber(get_tracing_subscriber(
            name,
            default_log_level,
            std::io::sink,
        ));
    }
});

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub pg_pool: PgPool,
    pub provider_server: MockServer,
    pub api_client: reqwest::Client,
    pub admin_password: String,
    pub cron_secret: String,
}

pub async fn spawn_app() -> TestApp {
    Lazy::force(&TRACING);

    let provider_server = MockServer::start().await;
    let admin_password = Uuid::new_v4().to_string();

    let settings = {
        let mut settings = Settings::get_configuration().expect("Failed to read configuration");
        // one throwaway database per test
        settings.database.database_name = Uuid::new_v4().to_string();
        // a random OS port
        settings.application.port = 0;
        settings.email_client.base_url = provider_server.uri();
        settings.email_client.batch_delay_millis = 0;
        settings.email_client.group_id = Some("test-group".into());
        settings.admin.password_hash = Secret::new(
            hash_password(&admin_password).expect("Failed to hash the test admin password"),
        );
        settings
    };
    configure_database(&settings.database).await;

    let app = Application::build(settings.clone())
        .await
        .expect("Failed to build the application");
    let port = app.port();
    let address = format!("http://127.0.0.1:{}", port);
    tokio::spawn(app.run_until_terminated());

    let api_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .cookie_store(true)
        .build()
        .unwrap();

    TestApp {
        address,
        port,
        pg_pool: get_connection_pool(&settings.database),
        provider_server,
        api_client,
        admin_password,
        cron_secret: settings.cron.secret.expose_secret().clone(),
    }
}

async fn configure_database(settings: &DatabaseSettings) {
    let mut connection = PgConnection::connect_with(&settings.connect_options_without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(format!(r#"CREATE DATABASE "{}";"#, settings.database_name).as_str())
        .await
        .expect("Failed to create test database");

    let pool = PgPool::connect_with(settings.connect_options())
        .await
        .expect("Failed to connect to the test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
}

impl TestApp {
    pub async fn post_subscribe(&self, body: serde_json::Value) -> reqwest::Response {
        self.api_client
            .post(format!("{}/api/subscribe", self.address))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn login(&self) {
        let response = self
            .api_client
            .post(format!("{}/api/admin/login", self.address))
            .json(&json!({ "password": self.admin_password }))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(200, response.status().as_u16());
    }

    pub async fn post_admin(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.api_client
            .post(format!("{}/api/admin{}", self.address, path))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_admin(&self, path: &str) -> reqwest::Response {
        self.api_client
            .get(format!("{}/api/admin{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Creates a draft issue through the API and returns its id.
    pub async fn create_issue(&self, title: &str, content: &str) -> Uuid {
        let response = self
            .post_admin(
                "/issues",
                json!({ "title": title, "content_md": content }),
            )
            .await;
        assert_eq!(201, response.status().as_u16());
        let body: serde_json::Value = response.json().await.unwrap();
        Uuid::parse_str(body["id"].as_str().unwrap()).unwrap()
    }

    /// Seeds a confirmed subscriber directly, bypassing the email flow.
    pub async fn seed_active_subscriber(&self, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO subscribers \
             (id, email, status, subscribed_at, confirmed_at, unsubscribe_token) \
             VALUES ($1, $2, 'active', now(), now(), $3)",
        )
        .bind(id)
        .bind(email)
        .bind(Uuid::new_v4().simple().to_string())
        .execute(&self.pg_pool)
        .await
        .expect("Failed to seed subscriber");
        id
    }

    /// Stubs the whole provider surface with success responses.
    pub async fn mock_provider_success(&self) {
        Mock::given(method("POST"))
            .and(path("/api/groups"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"data": {"id": "tmp-group"}})),
            )
            .mount(&self.provider_server)
            .await;
        Mock::given(method("DELETE"))
            .and(path_regex(r"^/api/groups/.+$"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&self.provider_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/subscribers"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "sub-1"}})),
            )
            .mount(&self.provider_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/campaigns"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"data": {"id": "campaign-1"}})),
            )
            .mount(&self.provider_server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/api/campaigns/.+/actions/send$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .mount(&self.provider_server)
            .await;
    }

    /// Pulls the confirmation link out of the most recent campaign body the
    /// provider mock received.
    pub async fn confirmation_link(&self) -> reqwest::Url {
        let requests = self
            .provider_server
            .received_requests()
            .await
            .expect("Request recording is disabled");
        let campaign = requests
            .iter()
            .rev()
            .find(|request| request.url.path() == "/api/campaigns")
            .expect("No campaign request was received");
        let body: serde_json::Value = serde_json::from_slice(&campaign.body).unwrap();
        let html = body["content"]["html"].as_str().unwrap();

        let links: Vec<_> = linkify::LinkFinder::new()
            .links(html)
            .filter(|link| link.as_str().contains("/api/confirm"))
            .collect();
        assert_eq!(1, links.len());
        let mut link = reqwest::Url::parse(links[0].as_str()).unwrap();
        // the configured base URL carries no port; point it at this instance
        assert_eq!("127.0.0.1", link.host_str().unwrap());
        link.set_port(Some(self.port)).unwrap();
        link
    }
}
