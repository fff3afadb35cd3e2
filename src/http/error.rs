use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use thiserror::Error;
use tracing::error;

use crate::image_processing::{ErrorResponse, LogoifyError};

#[derive(Error, Debug)]
pub enum AppError {
  #[error("bad request {0}")]
  BadRequest(String),
  #[error("not found {0}")]
  NotFound(String),
  #[error("unprocessable image {0}")]
  UnprocessableImage(String),
  #[error("bad gateway {0}")]
  BadGateway(String),
  #[error("internal server error {0}")]
  InternalServerError(String),
}

impl From<LogoifyError> for AppError {
  fn from(err: LogoifyError) -> Self {
    match err {
      LogoifyError::BadRequest(msg) => AppError::BadRequest(msg),
      LogoifyError::NotFound(key) => AppError::NotFound(key),
      LogoifyError::Decode(msg) => AppError::UnprocessableImage(msg),
      e @ (LogoifyError::Access(_) | LogoifyError::Transport(_)) => {
        AppError::BadGateway(e.to_string())
      }
      e @ LogoifyError::Processing(_) => AppError::InternalServerError(e.to_string()),
    }
  }
}

impl AppError {
  pub fn status(&self) -> StatusCode {
    match self {
      AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
      AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::UnprocessableImage(_) => StatusCode::UNPROCESSABLE_ENTITY,
      AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
      AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let status = self.status();
    let message = match self {
      AppError::BadRequest(msg) => msg,
      AppError::NotFound(key) => format!("object not found: {}", key),
      AppError::UnprocessableImage(msg) => {
        error!("invalid image data: {}", msg);
        "invalid image data".to_owned()
      }
      AppError::BadGateway(msg) => {
        error!("storage failure: {}", msg);
        "storage unavailable".to_owned()
      }
      AppError::InternalServerError(msg) => {
        error!("internal error: {}", msg);
        "Internal server error".to_owned()
      }
    };

    (
      status,
      Json(ErrorResponse {
        status_code: status.as_u16(),
        error: message,
      }),
    )
      .into_response()
  }
}
