use crate::http::storage::{PutObjectOutput, Storage, StorageError, StorageResult, Visibility};
use crate::util::with_trailing_slash;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use tokio::io::AsyncReadExt;
use tracing::debug;
use url::Url;

pub struct Client {
  s3_client: aws_sdk_s3::Client,
  bucket: String,
  region: String,
  base_url: Option<Url>,
}

impl Client {
  pub fn new(
    s3_client: aws_sdk_s3::Client,
    bucket: &str,
    region: &str,
    base_url: Option<&str>,
  ) -> Result<Self> {
    let base_url = base_url
      .map(|u| Url::parse(&with_trailing_slash(u)))
      .transpose()
      .context("failed to parse base url")?;

    Ok(Self {
      s3_client,
      bucket: bucket.to_owned(),
      region: region.to_owned(),
      base_url,
    })
  }
}

#[async_trait]
impl Storage for Client {
  async fn download_object(&self, key: &str) -> StorageResult<Vec<u8>> {
    let trimmed = key.trim_start_matches('/');

    debug!(
      "downloading object: {} from bucket: {}",
      trimmed, self.bucket
    );

    let object = self
      .s3_client
      .get_object()
      .bucket(self.bucket.as_str())
      .key(trimmed)
      .send()
      .await
      .map_err(|e| classify(e, trimmed))?;

    let capacity = object.content_length.unwrap_or_default().max(0) as usize;
    let mut data = Vec::with_capacity(capacity);
    object
      .body
      .into_async_read()
      .read_to_end(&mut data)
      .await
      .map_err(|e| StorageError::transport(trimmed, e.to_string()))?;

    Ok(data)
  }

  async fn upload_object(
    &self,
    data: Vec<u8>,
    key: &str,
    mime: &str,
    visibility: Visibility,
  ) -> StorageResult<PutObjectOutput> {
    let size = data.len() as u64;
    let body = ByteStream::from(data);

    debug!(
      "uploading object: {} ({} bytes) to bucket: {}",
      key, size, self.bucket
    );

    let mut request = self
      .s3_client
      .put_object()
      .bucket(self.bucket.as_str())
      .key(key)
      .body(body)
      .content_type(mime);

    if visibility == Visibility::PublicRead {
      request = request.acl(ObjectCannedAcl::PublicRead);
    }

    let res = request.send().await.map_err(|e| classify(e, key))?;

    Ok(PutObjectOutput {
      etag: res.e_tag.unwrap_or_default().trim_matches('"').into(),
      url: self.public_url(key),
      size,
    })
  }

  fn public_url(&self, key: &str) -> String {
    public_url(&self.bucket, &self.region, self.base_url.as_ref(), key)
  }
}

fn public_url(bucket: &str, region: &str, base_url: Option<&Url>, key: &str) -> String {
  let key = key.trim_start_matches('/');
  match base_url.and_then(|base| base.join(key).ok()) {
    Some(url) => url.to_string(),
    None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key),
  }
}

fn classify<E>(err: SdkError<E, HttpResponse>, key: &str) -> StorageError
where
  E: ProvideErrorMetadata + std::error::Error + 'static,
{
  let status = err.raw_response().map(|r| r.status().as_u16());
  let code = err.code().map(str::to_owned);
  let message = DisplayErrorContext(&err).to_string();

  match err {
    SdkError::ServiceError(_) => classify_service_error(code.as_deref(), status, key, message),
    _ => StorageError::transport(key, message),
  }
}

fn classify_service_error(
  code: Option<&str>,
  status: Option<u16>,
  key: &str,
  message: String,
) -> StorageError {
  match (code, status) {
    (Some("NoSuchKey" | "NotFound" | "NoSuchBucket"), _) | (_, Some(404)) => {
      StorageError::NotFound(key.to_owned())
    }
    (
      Some(
        "AccessDenied"
        | "AllAccessDisabled"
        | "InvalidAccessKeyId"
        | "SignatureDoesNotMatch"
        | "ExpiredToken",
      ),
      _,
    )
    | (_, Some(401 | 403)) => StorageError::access(key, message),
    _ => StorageError::transport(key, message),
  }
}
