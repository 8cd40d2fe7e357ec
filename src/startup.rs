use std::net::TcpListener;

use actix_session::storage::CookieSessionStore;
use actix_session::SessionMiddleware;
use actix_web::cookie::Key;
use actix_web::dev::Server;
use actix_web::web::{self, Data};
use actix_web::{App, HttpServer};
use actix_web_lab::middleware::from_fn;
use secrecy::{ExposeSecret, Secret};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_actix_web::TracingLogger;

use crate::authentication::{reject_unauthenticated, AdminPasswordHash};
use crate::configuration::{DatabaseSettings, Settings};
use crate::email_client::EmailClient;
use crate::routes::{
    create_issue, delete_issue, delete_subscriber, health_check, list_issues, list_subscribers,
    login, logout, preview_issue, schedule_issue, send_issue, send_newsletter, send_scheduled,
    sendgrid_webhook, set_subscriber_status, stats, subscribe, subscribe_confirm, test_newsletter,
    unsubscribe,
};

pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    pub async fn build(settings: Settings) -> Result<Self, anyhow::Error> {
        let pool = get_connection_pool(&settings.database);
        let email_client = settings.email_client.client();

        let address = format!(
            "{}:{}",
            settings.application.host, settings.application.port
        );
        let listener = TcpListener::bind(address)?;
        let port = listener.local_addr()?.port();
        let server = run(
            listener,
            pool,
            email_client,
            settings.application.base_url,
            settings.application.hmac_secret,
            AdminPasswordHash(settings.admin.password_hash),
            CronSecret(settings.cron.secret),
        )?;

        Ok(Self { port, server })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_terminated(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

pub fn get_connection_pool(settings: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(settings.connect_options())
}

/// Public base URL used when building confirmation and unsubscribe links.
pub struct ApplicationBaseUrl(pub String);

/// Shared secret expected as a bearer token on the cron endpoint.
#[derive(Clone)]
pub struct CronSecret(pub Secret<String>);

fn run(
    listener: TcpListener,
    pool: PgPool,
    email_client: EmailClient,
    base_url: String,
    hmac_secret: Secret<String>,
    admin_password_hash: AdminPasswordHash,
    cron_secret: CronSecret,
) -> Result<Server, anyhow::Error> {
    let pool = Data::new(pool);
    let email_client = Data::new(email_client);
    let base_url = Data::new(ApplicationBaseUrl(base_url));
    let admin_password_hash = Data::new(admin_password_hash);
    let cron_secret = Data::new(cron_secret);
    let secret_key = Key::from(hmac_secret.expose_secret().as_bytes());

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(SessionMiddleware::new(
                CookieSessionStore::default(),
                secret_key.clone(),
            ))
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/api")
                    .route("/subscribe", web::post().to(subscribe))
                    .route("/confirm", web::get().to(subscribe_confirm))
                    .route("/unsubscribe/{token}", web::get().to(unsubscribe))
                    .route("/webhook/sendgrid", web::post().to(sendgrid_webhook))
                    .route("/cron/send-scheduled", web::get().to(send_scheduled))
                    // login sits outside the guarded scope; registration order
                    // lets it win over the /admin scope below
                    .route("/admin/login", web::post().to(login))
                    .service(
                        web::scope("/admin")
                            .wrap(from_fn(reject_unauthenticated))
                            .route("/logout", web::post().to(logout))
                            .route("/issues", web::get().to(list_issues))
                            .route("/issues", web::post().to(create_issue))
                            .route("/issues/preview", web::post().to(preview_issue))
                            .route("/issues/{id}", web::delete().to(delete_issue))
                            .route("/issues/{id}/send", web::post().to(send_issue))
                            .route("/issues/{id}/schedule", web::post().to(schedule_issue))
                            .route("/newsletter/send", web::post().to(send_newsletter))
                            .route("/newsletter/test", web::post().to(test_newsletter))
                            .route("/subscribers", web::get().to(list_subscribers))
                            .route("/subscribers/{id}", web::delete().to(delete_subscriber))
                            .route(
                                "/subscribers/{id}/status",
                                web::patch().to(set_subscriber_status),
                            )
                            .route("/stats", web::get().to(stats)),
                    ),
            )
            .app_data(pool.clone())
            .app_data(email_client.clone())
            .app_data(base_url.clone())
            .app_data(admin_password_hash.clone())
            .app_data(cron_secret.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
