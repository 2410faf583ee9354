use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, COOKIE, HOST, USER_AGENT};
use reqwest::{redirect, Client, Method, Proxy};
use thiserror::Error;
use tracing::{debug, warn};

use crate::plan::ProbeRequest;
use crate::response::{self, SprayResponse};

#[derive(Error, Debug)]
pub enum ProbeError {
  #[error("Failed to build HTTP client: {0}")]
  Client(#[from] reqwest::Error),

  #[error("Invalid header value for {name}: {value}")]
  InvalidHeader { name: &'static str, value: String },

  #[error("No HTTP client was prepared for proxy {0:?}")]
  UnknownProxy(Option<String>),

  #[error("Failed to save response: {0}")]
  Save(#[from] std::io::Error),
}

/// Request settings shared by every probe in a spray.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
  pub method: Method,
  pub timeout: Duration,
  pub user_agent: String,
  pub cookies: Vec<(String, String)>,
  pub ignore: HashSet<u16>,
  pub save: HashSet<u16>,
  pub save_dir: PathBuf,
}

impl ProbeOptions {
  fn cookie_header(&self) -> Option<String> {
    if self.cookies.is_empty() {
      return None;
    }
    Some(
      self
        .cookies
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("; "),
    )
  }

  /// Whether a response with this status is reported at debug level only.
  pub fn is_ignored(&self, status: u16) -> bool {
    self.ignore.contains(&status)
  }
}

/// Sends probes. One client per proxy, built up front and shared by every task.
#[derive(Debug, Clone)]
pub struct Prober {
  options: Arc<ProbeOptions>,
  clients: Arc<HashMap<Option<String>, Client>>,
  base_headers: Arc<HeaderMap>,
}

impl Prober {
  pub fn new<I>(options: ProbeOptions, proxies: I) -> Result<Self, ProbeError>
  where
    I: IntoIterator<Item = Option<String>>,
  {
    let mut clients = HashMap::new();
    for proxy in proxies {
      if clients.contains_key(&proxy) {
        continue;
      }
      let client = build_client(&options, proxy.as_deref())?;
      clients.insert(proxy, client);
    }

    let mut base_headers = HeaderMap::new();
    base_headers.insert(USER_AGENT, header_value("User-Agent", &options.user_agent)?);
    if let Some(cookies) = options.cookie_header() {
      base_headers.insert(COOKIE, header_value("Cookie", &cookies)?);
    }

    Ok(Self {
      options: Arc::new(options),
      clients: Arc::new(clients),
      base_headers: Arc::new(base_headers),
    })
  }

  pub fn options(&self) -> &ProbeOptions {
    &self.options
  }

  /// Sends one probe.
  ///
  /// Network-level failures are expected during a spray; they are logged at
  /// debug and yield `Ok(None)`. Responses whose status is in the save list
  /// are written to disk before returning.
  pub async fn visit(&self, request: &ProbeRequest) -> Result<Option<SprayResponse>, ProbeError> {
    let client = self
      .clients
      .get(&request.proxy)
      .ok_or_else(|| ProbeError::UnknownProxy(request.proxy.clone()))?;

    let mut headers = (*self.base_headers).clone();
    if let Some(vhost) = &request.vhost {
      headers.insert(HOST, header_value("Host", vhost)?);
    }

    let sent = client
      .request(self.options.method.clone(), &request.url)
      .headers(headers)
      .send()
      .await;
    let http_response = match sent {
      Ok(r) => r,
      Err(e) => {
        debug!(url = %request.url, "Error in request: {}", e);
        return Ok(None);
      }
    };

    let status = http_response.status().as_u16();
    let url = http_response.url().to_string();
    let response_headers = http_response.headers().clone();
    let body = match http_response.text().await {
      Ok(body) => body,
      Err(e) => {
        debug!(%url, "Error reading response body: {}", e);
        return Ok(None);
      }
    };

    let response = SprayResponse {
      status,
      url,
      title: response::extract_title(&body),
      content_length: body.len(),
      vhost: request.vhost.clone(),
      proxy: request.proxy.clone(),
    };

    if self.options.save.contains(&status) {
      response::save_response(&self.options.save_dir, &response, &response_headers, &body).await?;
    }
    Ok(Some(response))
  }
}

fn build_client(options: &ProbeOptions, proxy: Option<&str>) -> Result<Client, ProbeError> {
  let mut builder = Client::builder()
    .redirect(redirect::Policy::none())
    .danger_accept_invalid_certs(true)
    .timeout(options.timeout);
  builder = match proxy {
    Some(proxy) => builder.proxy(Proxy::all(proxy)?),
    None => builder.no_proxy(),
  };
  builder.build().map_err(|e| {
    warn!(?proxy, "Failed to build HTTP client: {}", e);
    ProbeError::Client(e)
  })
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue, ProbeError> {
  HeaderValue::from_str(value).map_err(|_| ProbeError::InvalidHeader {
    name,
    value: value.to_string(),
  })
}
