use axum::{
  extract::{rejection::QueryRejection, Query, State},
  http::StatusCode,
  Json,
};
use serde::Deserialize;
use tracing::{error, info, warn};
use utoipa::IntoParams;

use crate::http::error::AppError;
use crate::http::AppState;
use crate::image_processing::{LogoifyError, LogoifyResponse, ObjectKey};

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LogoifyQuery {
  /// Object key of the uploaded image, `<id>/<name>/<type>`.
  pub key: Option<String>,
}

impl LogoifyQuery {
  fn object_key(&self) -> Result<ObjectKey, LogoifyError> {
    match self.key.as_deref() {
      Some(key) if !key.is_empty() => ObjectKey::parse(key),
      _ => Err(LogoifyError::BadRequest(
        "missing query parameter: key".to_owned(),
      )),
    }
  }
}

/// Remove the background of an uploaded image, trim it and store it as WebP.
#[utoipa::path(
  get,
  path = "/logoify",
  params(LogoifyQuery),
  responses(
    (status = 201, description = "Processed image uploaded", body = LogoifyResponse),
    (status = 400, description = "Missing or malformed key", body = crate::image_processing::ErrorResponse),
    (status = 404, description = "No object at key", body = crate::image_processing::ErrorResponse),
    (status = 422, description = "Object is not a decodable image", body = crate::image_processing::ErrorResponse),
    (status = 502, description = "Object store unavailable", body = crate::image_processing::ErrorResponse),
  ),
  security(("api_key" = []))
)]
pub async fn logoify(
  State(state): State<AppState>,
  query: Result<Query<LogoifyQuery>, QueryRejection>,
) -> Result<(StatusCode, Json<LogoifyResponse>), AppError> {
  let Query(query) = query.map_err(|e| {
    warn!("rejected query string: {}", e.body_text());
    AppError::BadRequest("invalid query string".to_owned())
  })?;
  let key = query.object_key()?;
  info!("processing {}", key.as_str());

  match state.pipeline.run(&key).await {
    Ok(response) => {
      metrics::counter!("logoify_images_total", "outcome" => "created").increment(1);
      Ok((StatusCode::CREATED, Json(response)))
    }
    Err(e) => {
      error!("failed to process {}: {}", key.as_str(), e);
      metrics::counter!("logoify_images_total", "outcome" => "failed").increment(1);
      Err(e.into())
    }
  }
}
