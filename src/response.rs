use std::fmt;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::header::HeaderMap;
use scraper::{Html, Selector};
use tracing::debug;

/// What the spray reports about one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SprayResponse {
  pub status: u16,
  pub url: String,
  pub title: String,
  pub content_length: usize,
  pub vhost: Option<String>,
  pub proxy: Option<String>,
}

impl fmt::Display for SprayResponse {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{:<4} {:<30} {:<30} {:<30} {:<30}",
      self.status,
      self.title,
      self.url,
      self.vhost.as_deref().unwrap_or(""),
      self.proxy.as_deref().unwrap_or("")
    )
  }
}

/// Text of the first `<title>` element, trimmed. Empty when there is none.
pub fn extract_title(body: &str) -> String {
  let Ok(selector) = Selector::parse("title") else {
    return String::new();
  };
  Html::parse_document(body)
    .select(&selector)
    .next()
    .map(|el| el.text().collect::<String>().trim().to_string())
    .unwrap_or_default()
}

const MAX_FILE_NAME: usize = 100;
const FILE_NAME_KEEP: usize = 50;

fn keep_file_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn sanitise_location(location: &str) -> String {
  location
    .replace(['/', ':'], "_")
    .chars()
    .filter(|c| keep_file_char(*c))
    .collect::<String>()
    .replace("__", "_")
}

/// `<unix seconds>_<vhost>_<url>`, plus `_via_<proxy>` when one was used, with
/// everything but `[A-Za-z0-9_.-]` removed.
pub fn response_file_name(url: &str, vhost: Option<&str>, proxy: Option<&str>, timestamp: u64) -> String {
  let vhost: String = vhost.unwrap_or("").chars().filter(|c| keep_file_char(*c)).collect();
  let mut name = format!("{}_{}_{}", timestamp, vhost, sanitise_location(url));
  if let Some(proxy) = proxy {
    name.push_str("_via_");
    name.push_str(&sanitise_location(proxy));
  }

  if name.len() > MAX_FILE_NAME {
    // All characters are ASCII, so byte offsets are char boundaries.
    format!("{}...{}", &name[..FILE_NAME_KEEP], &name[name.len() - FILE_NAME_KEEP..])
  } else {
    name
  }
}

/// Writes the headers, a blank line and the body under `save_dir`.
pub async fn save_response(
  save_dir: &Path,
  response: &SprayResponse,
  headers: &HeaderMap,
  body: &str,
) -> std::io::Result<PathBuf> {
  tokio::fs::create_dir_all(save_dir).await?;
  let timestamp = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0);
  let path = save_dir.join(response_file_name(
    &response.url,
    response.vhost.as_deref(),
    response.proxy.as_deref(),
    timestamp,
  ));
  debug!(url = %response.url, path = %path.display(), "Saving response.");

  let mut contents = String::with_capacity(body.len() + 64 * headers.len() + 1);
  for (name, value) in headers {
    let _ = writeln!(contents, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
  }
  contents.push('\n');
  contents.push_str(body);
  tokio::fs::write(&path, contents).await?;
  Ok(path)
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::header::{HeaderValue, CONTENT_TYPE, SERVER};

  fn response() -> SprayResponse {
    SprayResponse {
      status: 200,
      url: "http://10.0.0.1/admin".to_string(),
      title: "Admin".to_string(),
      content_length: 42,
      vhost: Some("intranet.local".to_string()),
      proxy: None,
    }
  }

  #[test]
  fn test_display_pads_columns() {
    let line = response().to_string();
    assert!(line.starts_with("200  Admin"));
    assert_eq!(line.len(), 4 + 1 + 30 + 1 + 30 + 1 + 30 + 1 + 30);
    assert!(line.contains("intranet.local"));
  }

  #[test]
  fn test_extract_title() {
    assert_eq!(extract_title("<html><head><title>\n  Login Portal </title></head></html>"), "Login Portal");
    assert_eq!(extract_title("<p>no title here</p>"), "");
  }

  #[test]
  fn test_file_name_is_sanitised() {
    assert_eq!(
      response_file_name("http://10.0.0.1/admin?x=1", Some("intra net"), None, 1700000000),
      "1700000000_intranet_http__10.0.0.1_adminx1"
    );
  }

  #[test]
  fn test_long_file_name_is_shortened() {
    let url = format!("http://example.com/{}", "a".repeat(200));
    let name = response_file_name(&url, None, None, 1);
    assert_eq!(name.len(), FILE_NAME_KEEP * 2 + 3);
    assert!(name.starts_with("1__http__example.com_"));
    assert!(name.contains("..."));
  }

  #[test]
  fn test_file_name_tells_proxies_apart() {
    let direct = response_file_name("http://10.0.0.1/", Some("a.local"), None, 5);
    let first = response_file_name("http://10.0.0.1/", Some("a.local"), Some("http://127.0.0.1:8080"), 5);
    let second = response_file_name("http://10.0.0.1/", Some("a.local"), Some("socks5://127.0.0.1:1080"), 5);
    assert_eq!(first, "5_a.local_http__10.0.0.1__via_http__127.0.0.1_8080");
    assert_ne!(first, second);
    assert_ne!(first, direct);
  }

  #[tokio::test]
  async fn test_save_response_writes_headers_then_body() {
    let dir = tempfile::tempdir().unwrap();
    let mut headers = HeaderMap::new();
    headers.insert(SERVER, HeaderValue::from_static("nginx"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));

    let path = save_response(dir.path(), &response(), &headers, "<html></html>").await.unwrap();
    let contents = std::fs::read_to_string(path).unwrap();
    assert!(contents.contains("server: nginx\n"));
    assert!(contents.contains("content-type: text/html\n"));
    assert!(contents.ends_with("\n\n<html></html>"));
  }

  #[tokio::test]
  async fn test_same_second_saves_through_different_proxies_both_survive() {
    let dir = tempfile::tempdir().unwrap();
    let headers = HeaderMap::new();
    let mut through_first = response();
    through_first.proxy = Some("http://127.0.0.1:8080".to_string());
    let mut through_second = response();
    through_second.proxy = Some("http://127.0.0.1:8081".to_string());

    let first = save_response(dir.path(), &through_first, &headers, "one").await.unwrap();
    let second = save_response(dir.path(), &through_second, &headers, "two").await.unwrap();
    assert_ne!(first, second);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
  }
}
