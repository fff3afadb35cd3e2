use anyhow::{anyhow, Context};
use axum::{
  extract::{MatchedPath, Request, State},
  http::StatusCode,
  middleware::{self, Next},
  response::{IntoResponse, Response},
  routing::get,
  Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::future::ready;
use std::{path::PathBuf, sync::Arc};
use tokio::signal;
use tokio::time::{Duration, Instant};
use tower_http::{
  catch_panic::CatchPanicLayer,
  timeout::TimeoutLayer,
  trace::{self, TraceLayer},
};
use tracing::{info, warn, Level};
use utoipa::OpenApi;
use utoipa_redoc::{Redoc, Servable};

use crate::background_removal::{self, BackgroundRemover};
use crate::config::{Config, StorageType};
use crate::image_processing::{ErrorResponse, LogoifyResponse, Pipeline};
use anyhow::Result;

mod error;
pub mod local_storage;
mod logoify;
pub mod s3;
pub mod storage;

#[derive(OpenApi)]
#[openapi(
  paths(logoify::logoify),
  components(schemas(LogoifyResponse, ErrorResponse)),
  modifiers(&SecurityAddon),
  info(
    title = "Logoify API",
    version = "0.1.0",
    description = "Removes the background of uploaded logos, trims them and stores them as WebP"
  )
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
  fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
    if let Some(components) = openapi.components.as_mut() {
      components.add_security_scheme(
        "api_key",
        utoipa::openapi::security::SecurityScheme::ApiKey(
          utoipa::openapi::security::ApiKey::Header(utoipa::openapi::security::ApiKeyValue::new(
            X_API_KEY,
          )),
        ),
      );
    }
  }
}

#[derive(Clone)]
struct AppState {
  pipeline: Arc<Pipeline>,
  api_key: Option<String>,
}

const X_API_KEY: &str = "X-API-Key";

async fn auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
  let expected = match state.api_key.as_deref() {
    Some(key) => key,
    None => return next.run(req).await,
  };

  let auth_header = req
    .headers()
    .get(X_API_KEY)
    .and_then(|header| header.to_str().ok());

  match auth_header {
    Some(header) if header == expected => next.run(req).await,
    _ => StatusCode::UNAUTHORIZED.into_response(),
  }
}

fn storage_client(cfg: &Config) -> Result<Arc<dyn storage::Storage>> {
  let client: Arc<dyn storage::Storage> = match cfg.storage.storage_type {
    StorageType::Local => {
      let local = cfg
        .storage
        .local
        .as_ref()
        .ok_or_else(|| anyhow!("local storage config is missing"))?;

      Arc::new(local_storage::Client::new(
        PathBuf::from(&local.path),
        &local.base_url,
      )?)
    }
    StorageType::S3 => {
      let storage_config = match &cfg.storage.s3 {
        Some(s3) => s3,
        None => return Err(anyhow!("S3 storage config is missing")),
      };

      let cred = aws_sdk_s3::config::Credentials::new(
        storage_config.access_key_id.clone(),
        storage_config.secret_access_key.clone(),
        None,
        None,
        "loaded-from-custom-env",
      );

      let mut s3_config = aws_sdk_s3::config::Builder::new()
        .credentials_provider(cred)
        .region(aws_sdk_s3::config::Region::new(
          storage_config.region.clone(),
        ))
        .force_path_style(storage_config.force_path_style)
        .behavior_version_latest();

      if let Some(endpoint) = &storage_config.endpoint {
        s3_config = s3_config.endpoint_url(endpoint.clone());
      }

      let client = aws_sdk_s3::Client::from_conf(s3_config.build());
      Arc::new(s3::Client::new(
        client,
        &storage_config.bucket,
        &storage_config.region,
        storage_config.base_url.as_deref(),
      )?)
    }
  };

  Ok(client)
}

pub fn bootstrap(cfg: &Config) -> Result<Router> {
  // Size the global pool used for decoding, trimming and encoding
  if let Some(threads) = cfg.app.image_concurrency {
    if let Err(e) = rayon::ThreadPoolBuilder::new()
      .num_threads(threads)
      .build_global()
    {
      warn!("image worker pool already initialised: {}", e);
    }
  }

  let storage_client = storage_client(cfg)?;
  let remover: Arc<dyn BackgroundRemover> =
    Arc::from(background_removal::from_config(&cfg.background_removal)?);

  let tmp_dir = cfg
    .app
    .tmp_dir
    .as_ref()
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir);

  let state = AppState {
    pipeline: Arc::new(Pipeline::new(storage_client, remover, tmp_dir)),
    api_key: cfg.app.api_key.clone().filter(|k| !k.is_empty()),
  };

  let mut app = Router::new()
    .route(
      "/logoify",
      get(logoify::logoify).post(logoify::logoify),
    )
    .layer(middleware::from_fn_with_state(state.clone(), auth))
    .with_state(state);

  if cfg.app.enable_openapi.unwrap_or(false) {
    app = app
      .merge(Redoc::with_url(
        "/redoc",
        serde_json::to_value(ApiDoc::openapi()).context("failed to render openapi document")?,
      ))
      .route(
        "/api-docs/openapi.json",
        get(|| async { axum::Json(ApiDoc::openapi()) }),
      );
  }

  let app = app.layer((
    middleware::from_fn(track_metrics),
    TraceLayer::new_for_http()
      .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
      .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
    TimeoutLayer::new(Duration::from_secs(cfg.app.request_timeout_secs)),
    CatchPanicLayer::new(),
  ));

  Ok(app)
}

pub async fn serve(router: Router, listen: &str) -> Result<()> {
  let listener = tokio::net::TcpListener::bind(listen)
    .await
    .with_context(|| format!("failed to bind to address {}", listen))?;
  info!("listening on {}", listen);

  axum::serve(listener, router)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("error running HTTP server")
}

async fn healthz() -> &'static str {
  "pong"
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = signal::ctrl_c().await {
      warn!("failed to install Ctrl+C handler: {}", e);
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
      }
      Err(e) => {
        warn!("failed to install signal handler: {}", e);
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
      _ = ctrl_c => {},
      _ = terminate => {},
  }
}

pub async fn serve_metrics(listen: &str) -> Result<()> {
  let app = metrics_app()?;

  let listener = tokio::net::TcpListener::bind(listen)
    .await
    .with_context(|| format!("failed to bind to address {}", listen))?;
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("error running metrics HTTP server")
}

fn metrics_app() -> Result<Router> {
  let recorder_handle = setup_metrics_recorder()?;
  Ok(
    Router::new()
      .route("/metrics", get(move || ready(recorder_handle.render())))
      .route("/healthz", get(healthz)),
  )
}

fn setup_metrics_recorder() -> Result<PrometheusHandle> {
  const EXPONENTIAL_SECONDS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
  ];

  let handle = PrometheusBuilder::new()
    .set_buckets_for_metric(
      Matcher::Full("http_requests_duration_seconds".to_string()),
      EXPONENTIAL_SECONDS,
    )?
    .install_recorder()?;

  Ok(handle)
}

async fn track_metrics(req: Request, next: Next) -> impl IntoResponse {
  let start = Instant::now();
  let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
    matched_path.as_str().to_owned()
  } else {
    req.uri().path().to_owned()
  };
  let method = req.method().clone();

  let response = next.run(req).await;

  let latency = start.elapsed().as_secs_f64();
  let status = response.status().as_u16().to_string();

  let labels = [
    ("method", method.to_string()),
    ("path", path),
    ("status", status),
  ];

  metrics::counter!("http_requests_total", &labels).increment(1);
  metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

  response
}
