use newsletter::configuration::Settings;
use newsletter::startup::Application;
use newsletter::telemetry::config_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::get_configuration().expect("Failed to read configuration");

    config_tracing(&settings.application);

    let app = Application::build(settings).await?;
    app.run_until_terminated().await?;
    Ok(())
}
