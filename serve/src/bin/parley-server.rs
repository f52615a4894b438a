//! Server entry point: load settings, wire services, serve.

use parley::Services;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = env_config::load(None)?;
    let services = Services::init(settings).await?;
    serve::run_serve(services).await
}
