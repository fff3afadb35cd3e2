/// Base URLs must end in `/` for `Url::join` to append rather than replace the last segment.
pub fn with_trailing_slash(url: &str) -> String {
  if url.ends_with('/') {
    url.to_owned()
  } else {
    format!("{}/", url)
  }
}
