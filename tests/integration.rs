use std::io::Cursor;
use std::path::{Path, PathBuf};

use axum::{
  body::Body,
  extract::Multipart,
  http::{header, Request, StatusCode},
  response::IntoResponse,
  routing::post,
  Router,
};
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use logoify::config;
use logoify::image_processing::LogoifyResponse;
use tokio::net::TcpListener;
use tower::ServiceExt;

const BASE_URL: &str = "http://localhost:8080/files";

struct TestApp {
  _root: tempfile::TempDir,
  bucket: PathBuf,
  router: Router,
}

fn bootstrap(removal: Option<String>, api_key: Option<&str>) -> TestApp {
  bootstrap_with(removal, |app| app.api_key = api_key.map(str::to_owned))
}

fn bootstrap_with<F>(removal: Option<String>, configure: F) -> TestApp
where
  F: FnOnce(&mut config::AppConfig),
{
  let root = tempfile::tempdir().unwrap();
  let bucket = root.path().join("bucket");
  let tmp = root.path().join("tmp");
  std::fs::create_dir_all(&bucket).unwrap();
  std::fs::create_dir_all(&tmp).unwrap();

  let background_removal = match removal {
    Some(endpoint) => config::BackgroundRemovalConfig {
      provider: config::RemovalProvider::Remote,
      endpoint,
      timeout_secs: Some(10),
    },
    None => config::BackgroundRemovalConfig {
      provider: config::RemovalProvider::Passthrough,
      ..config::BackgroundRemovalConfig::default()
    },
  };

  let mut app = config::AppConfig {
    tmp_dir: Some(tmp.to_string_lossy().into_owned()),
    ..config::AppConfig::default()
  };
  configure(&mut app);

  let cfg = config::Config {
    app,
    storage: config::StorageConfig {
      storage_type: config::StorageType::Local,
      local: Some(config::StorageConfigLocal {
        path: bucket.to_string_lossy().into_owned(),
        base_url: BASE_URL.to_string(),
      }),
      s3: None,
    },
    background_removal,
  };

  let router = logoify::http::bootstrap(&cfg).expect("failed creating router");

  TestApp {
    _root: root,
    bucket,
    router,
  }
}

/// White canvas with a solid blue 15x15 square at (10, 5).
fn logo_png() -> Vec<u8> {
  let img = RgbaImage::from_fn(40, 30, |x, y| {
    if (10..25).contains(&x) && (5..20).contains(&y) {
      Rgba([30, 60, 200, 255])
    } else {
      Rgba([255, 255, 255, 255])
    }
  });

  let mut buf = Vec::new();
  DynamicImage::ImageRgba8(img)
    .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
    .unwrap();
  buf
}

fn put(bucket: &Path, key: &str, data: &[u8]) {
  let path = bucket.join(key);
  std::fs::create_dir_all(path.parent().unwrap()).unwrap();
  std::fs::write(path, data).unwrap();
}

fn read_output(bucket: &Path, key: &str) -> DynamicImage {
  let data = std::fs::read(bucket.join(key)).expect("output was not uploaded");
  image::load_from_memory_with_format(&data, ImageFormat::WebP).unwrap()
}

async fn call(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
  let response = router.oneshot(request).await.unwrap();
  let status = response.status();
  let body = response.into_body().collect().await.unwrap().to_bytes();
  let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
  (status, json)
}

fn get(uri: &str) -> Request<Body> {
  Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Stand-in for a rembg server: white pixels become transparent.
async fn fake_rembg(mut multipart: Multipart) -> Result<impl IntoResponse, StatusCode> {
  while let Some(field) = multipart
    .next_field()
    .await
    .map_err(|_| StatusCode::BAD_REQUEST)?
  {
    if field.name() != Some("file") {
      continue;
    }

    let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
    let mut rgba = image::load_from_memory(&data)
      .map_err(|_| StatusCode::BAD_REQUEST)?
      .to_rgba8();
    for p in rgba.pixels_mut() {
      if p.0[..3] == [255, 255, 255] {
        *p = Rgba([0, 0, 0, 0]);
      }
    }

    let mut out = Vec::new();
    DynamicImage::ImageRgba8(rgba)
      .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
      .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    return Ok(([(header::CONTENT_TYPE, "image/png")], out));
  }

  Err(StatusCode::BAD_REQUEST)
}

async fn spawn_fake_rembg() -> String {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();

  tokio::spawn(async move {
    let app = Router::new().route("/api/remove", post(fake_rembg));
    axum::serve(listener, app).await.unwrap();
  });

  format!("http://{}", addr)
}

#[tokio::test]
async fn logoify_uploads_trimmed_webp() {
  let app = bootstrap(None, None);
  put(&app.bucket, "abc123/logo/png", &logo_png());

  let (status, body) = call(app.router.clone(), get("/logoify?key=abc123/logo/png")).await;

  assert_eq!(status, StatusCode::CREATED);
  let response: LogoifyResponse = serde_json::from_value(body).unwrap();
  assert_eq!(response.status_code, 201);
  assert_eq!(
    response.url,
    format!("{}/abc123/logo_logoified.webp", BASE_URL)
  );

  let output = read_output(&app.bucket, "abc123/logo_logoified.webp");
  assert_eq!((output.width(), output.height()), (15, 15));
}

#[tokio::test]
async fn post_is_accepted_too() {
  let app = bootstrap(None, None);
  put(&app.bucket, "abc123/logo/png", &logo_png());

  let request = Request::builder()
    .method("POST")
    .uri("/logoify?key=abc123/logo/png")
    .body(Body::empty())
    .unwrap();
  let (status, _) = call(app.router.clone(), request).await;

  assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn remote_removal_then_trim() {
  let endpoint = spawn_fake_rembg().await;
  let app = bootstrap(Some(endpoint), None);
  put(&app.bucket, "abc123/logo/png", &logo_png());

  let (status, _) = call(app.router.clone(), get("/logoify?key=abc123/logo/png")).await;
  assert_eq!(status, StatusCode::CREATED);

  let output = read_output(&app.bucket, "abc123/logo_logoified.webp");
  assert_eq!((output.width(), output.height()), (15, 15));
  assert!(output
    .to_rgba8()
    .pixels()
    .all(|p| *p == Rgba([30, 60, 200, 255])));
}

#[tokio::test]
async fn unreachable_removal_service_is_an_internal_error() {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let endpoint = format!("http://{}", listener.local_addr().unwrap());
  drop(listener);

  let app = bootstrap(Some(endpoint), None);
  put(&app.bucket, "abc123/logo/png", &logo_png());

  let (status, body) = call(app.router.clone(), get("/logoify?key=abc123/logo/png")).await;

  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(body["error"], "Internal server error");
  assert!(!app.bucket.join("abc123/logo_logoified.webp").exists());
}

#[tokio::test]
async fn missing_key_is_a_bad_request() {
  let app = bootstrap(None, None);

  let (status, body) = call(app.router.clone(), get("/logoify")).await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["statusCode"], 400);
}

#[tokio::test]
async fn short_key_is_a_bad_request() {
  let app = bootstrap(None, None);

  let (status, body) = call(app.router.clone(), get("/logoify?key=abc123/logo")).await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["statusCode"], 400);
  assert!(body["error"].as_str().unwrap().contains("<id>/<name>/<type>"));
}

#[tokio::test]
async fn malformed_query_is_a_json_bad_request() {
  let app = bootstrap(None, None);
  put(&app.bucket, "abc123/logo/png", &logo_png());

  let (status, body) = call(
    app.router.clone(),
    get("/logoify?key=abc123/logo/png&key=abc123/other/png"),
  )
  .await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["statusCode"], 400);
  assert_eq!(body["error"], "invalid query string");
}

#[tokio::test]
async fn key_with_nul_byte_is_a_bad_request() {
  let app = bootstrap(None, None);

  let (status, body) = call(app.router.clone(), get("/logoify?key=abc123/lo%00go/png")).await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["statusCode"], 400);
}

#[tokio::test]
async fn overlong_name_is_a_bad_request() {
  let app = bootstrap(None, None);
  let uri = format!("/logoify?key=abc123/{}/png", "a".repeat(300));

  let (status, body) = call(app.router.clone(), get(&uri)).await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["statusCode"], 400);
}

#[tokio::test]
async fn openapi_document_describes_error_bodies() {
  let app = bootstrap_with(None, |app| app.enable_openapi = Some(true));

  let (status, doc) = call(app.router.clone(), get("/api-docs/openapi.json")).await;

  assert_eq!(status, StatusCode::OK);
  assert!(doc["components"]["schemas"]["ErrorResponse"].is_object());
  assert_eq!(
    doc["paths"]["/logoify"]["get"]["responses"]["400"]["content"]["application/json"]["schema"]
      ["$ref"],
    "#/components/schemas/ErrorResponse"
  );
}

#[tokio::test]
async fn unknown_object_is_not_found() {
  let app = bootstrap(None, None);

  let (status, body) = call(app.router.clone(), get("/logoify?key=abc123/nope/png")).await;

  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["error"], "object not found: abc123/nope/png");
}

#[tokio::test]
async fn garbage_bytes_are_unprocessable() {
  let app = bootstrap(None, None);
  put(&app.bucket, "abc123/junk/png", b"<html>not an image</html>");

  let (status, body) = call(app.router.clone(), get("/logoify?key=abc123/junk/png")).await;

  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(body["statusCode"], 422);
  assert!(!app.bucket.join("abc123/junk_logoified.webp").exists());
}

#[tokio::test]
async fn api_key_is_enforced_when_configured() {
  let app = bootstrap(None, Some("test"));
  put(&app.bucket, "abc123/logo/png", &logo_png());

  let (status, _) = call(app.router.clone(), get("/logoify?key=abc123/logo/png")).await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);

  let request = Request::builder()
    .uri("/logoify?key=abc123/logo/png")
    .header("X-API-Key", "test")
    .body(Body::empty())
    .unwrap();
  let (status, _) = call(app.router.clone(), request).await;
  assert_eq!(status, StatusCode::CREATED);
}
