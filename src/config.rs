use anyhow::{Context, Result};
use serde::Deserialize;
use std::{env, fs, io, path::Path};
use tracing::warn;

pub const ENV_ACCESS_KEY_ID: &str = "aws_access_key_id";
pub const ENV_SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
pub const ENV_BUCKET: &str = "aws_s3_bucket";
pub const ENV_REGION: &str = "aws_region";

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageType {
  #[default]
  Local,
  S3,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemovalProvider {
  #[default]
  Remote,
  /// Skips background removal. Only used when configured explicitly.
  #[serde(alias = "None")]
  Passthrough,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
  pub app: AppConfig,
  pub storage: StorageConfig,
  pub background_removal: BackgroundRemovalConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppConfig {
  pub listen: String,
  pub metrics_listen: String,
  pub api_key: Option<String>,
  pub enable_openapi: Option<bool>,
  pub image_concurrency: Option<usize>,
  pub request_timeout_secs: u64,
  /// Directory for the scoped download files, defaults to the system temp dir.
  pub tmp_dir: Option<String>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      listen: "0.0.0.0:8080".to_owned(),
      metrics_listen: "0.0.0.0:9090".to_owned(),
      api_key: None,
      enable_openapi: None,
      image_concurrency: None,
      request_timeout_secs: 60,
      tmp_dir: None,
    }
  }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
  pub storage_type: StorageType,
  pub s3: Option<StorageConfigS3>,
  pub local: Option<StorageConfigLocal>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct StorageConfigS3 {
  pub bucket: String,
  pub region: String,
  pub access_key_id: String,
  pub secret_access_key: String,
  pub endpoint: Option<String>,
  pub force_path_style: bool,
  pub base_url: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfigLocal {
  pub path: String,
  pub base_url: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BackgroundRemovalConfig {
  pub provider: RemovalProvider,
  pub endpoint: String,
  pub timeout_secs: Option<u64>,
}

impl Default for BackgroundRemovalConfig {
  fn default() -> Self {
    Self {
      provider: RemovalProvider::Remote,
      endpoint: "http://localhost:7000".to_owned(),
      timeout_secs: None,
    }
  }
}

/// Loads the configuration once at start up.
///
/// The TOML file is optional. The AWS variables (also read from `.env`) override the S3
/// section and switch storage to S3 when they are present.
pub fn load(config_path: &str) -> Result<Config> {
  if let Err(e) = dotenvy::dotenv() {
    if !is_missing_env_file(&e) {
      warn!("ignoring unreadable .env file: {}", e);
    }
  }

  let mut cfg = if Path::new(config_path).exists() {
    parse(config_path)?
  } else {
    Config::default()
  };

  apply_env(&mut cfg, |name| env::var(name).ok());

  Ok(cfg)
}

fn is_missing_env_file(err: &dotenvy::Error) -> bool {
  matches!(err, dotenvy::Error::Io(e) if e.kind() == io::ErrorKind::NotFound)
}

pub fn parse(config_path: &str) -> Result<Config> {
  let toml_str = fs::read_to_string(config_path)
    .with_context(|| format!("failed to read config file: {}", config_path))?;
  from_toml(&toml_str)
}

pub fn from_toml(toml_str: &str) -> Result<Config> {
  toml::from_str(toml_str).context("failed to deserialize config")
}

fn apply_env<F>(cfg: &mut Config, lookup: F)
where
  F: Fn(&str) -> Option<String>,
{
  let vars = [
    ENV_ACCESS_KEY_ID,
    ENV_SECRET_ACCESS_KEY,
    ENV_BUCKET,
    ENV_REGION,
  ]
  .map(|name| lookup(name));

  if vars.iter().all(Option::is_none) {
    return;
  }

  let [access_key_id, secret_access_key, bucket, region] = vars;
  let s3 = cfg.storage.s3.get_or_insert_with(StorageConfigS3::default);

  if let Some(v) = access_key_id {
    s3.access_key_id = v;
  }
  if let Some(v) = secret_access_key {
    s3.secret_access_key = v;
  }
  if let Some(v) = bucket {
    s3.bucket = v;
  }
  if let Some(v) = region {
    s3.region = v;
  }

  cfg.storage.storage_type = StorageType::S3;
}
