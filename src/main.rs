use logoify::config;
use logoify::http;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG_PATH_ENV: &str = "LOGOIFY_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialize tracing
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "logoify=debug,tower_http=debug".into()),
    )
    .with(
      tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact(),
    )
    .init();

  // Load config
  let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_owned());
  let cfg = config::load(&config_path)?;

  // Serve
  let router = http::bootstrap(&cfg)?;

  let (main_server, metrics_server) = tokio::join!(
    http::serve(router, &cfg.app.listen),
    http::serve_metrics(&cfg.app.metrics_listen),
  );

  if let Err(e) = &metrics_server {
    error!("metrics server stopped: {:#}", e);
  }

  main_server
}
