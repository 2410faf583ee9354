use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reqwest::Method;
use thiserror::Error;
use tracing::{info, warn};

use crate::plan::SprayPlan;
use crate::probe::ProbeOptions;
use crate::targets::{self, TargetError};

pub const DEFAULT_USER_AGENT: &str =
  "Mozilla/5.0 (Windows NT 10.0; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/45.0.2454.85 Safari/537.36";

#[derive(Parser, Debug, Clone)]
#[command(name = "webspray", version, about = "Fuzz for hidden proxies, vhosts, and URLs")]
pub struct Args {
  /// Target hosts or URLs (accepts CIDR notation and files of targets)
  #[arg(required = true, num_args = 1..)]
  pub targets: Vec<String>,

  /// Append these to the URLs (values or files)
  #[arg(short = 'a', long = "append", num_args = 1..)]
  pub append: Vec<String>,

  /// Try each of these virtual hosts (values or files)
  #[arg(short = 'v', long = "vhosts", num_args = 1..)]
  pub vhosts: Vec<String>,

  /// Try against each of these proxies, proto://proxy:port (values or files)
  #[arg(short = 'p', long = "proxies", num_args = 1..)]
  pub proxies: Vec<String>,

  /// Cookies, as "name=value; other=value"
  #[arg(short = 'c', long = "cookies", num_args = 1..)]
  pub cookies: Vec<String>,

  /// Number of probes in flight at once
  #[arg(short = 't', long = "threads", default_value_t = 10)]
  pub threads: usize,

  /// HTTP status codes to report at debug level only
  #[arg(short = 'i', long = "ignore", num_args = 1.., default_values_t = [301, 302, 400, 401, 403, 404, 500, 502, 503])]
  pub ignore: Vec<u16>,

  /// Save responses with these status codes
  #[arg(short = 's', long = "save", num_args = 1.., default_values_t = [200])]
  pub save: Vec<u16>,

  /// Directory saved responses are written to [default: ~/.webspray/responses]
  #[arg(long = "save-dir")]
  pub save_dir: Option<PathBuf>,

  /// Directory the run's log file is written to [default: ~/.webspray/logs]
  #[arg(long = "log-dir")]
  pub log_dir: Option<PathBuf>,

  /// Do not write a log file
  #[arg(long = "no-log-file", conflicts_with = "log_dir")]
  pub no_log_file: bool,

  /// HTTP method to use
  #[arg(short = 'm', long = "method", default_value = "GET")]
  pub method: String,

  /// HTTP timeout in seconds
  #[arg(short = 'T', long = "timeout", default_value_t = 10.0)]
  pub timeout: f64,

  /// User-Agent header
  #[arg(short = 'U', long = "user-agent", default_value = DEFAULT_USER_AGENT)]
  pub user_agent: String,

  /// Be more annoying
  #[arg(short = 'd', long = "debug")]
  pub debug: bool,
}

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Invalid HTTP method: {0}")]
  InvalidMethod(String),

  #[error("Timeout must be a positive number of seconds, got {0}")]
  InvalidTimeout(f64),

  #[error("Thread count must be positive")]
  InvalidThreads,

  #[error(transparent)]
  Target(#[from] TargetError),
}

/// Everything a run needs, resolved from `Args`.
#[derive(Debug, Clone)]
pub struct SprayConfig {
  pub plan: SprayPlan,
  pub proxies: Vec<Option<String>>,
  pub options: ProbeOptions,
  pub threads: usize,
}

impl Args {
  /// Where the log file goes, or `None` when it is turned off.
  pub fn log_file_dir(&self) -> Option<PathBuf> {
    if self.no_log_file {
      return None;
    }
    Some(self.log_dir.clone().unwrap_or_else(|| webspray_home().join("logs")))
  }

  pub fn resolve(&self) -> Result<SprayConfig, ConfigError> {
    if self.threads == 0 {
      return Err(ConfigError::InvalidThreads);
    }
    let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
      .map_err(|_| ConfigError::InvalidMethod(self.method.clone()))?;
    if !(self.timeout.is_finite() && self.timeout > 0.0) {
      return Err(ConfigError::InvalidTimeout(self.timeout));
    }

    let proxies: Vec<String> = targets::read_entries(&self.proxies).into_iter().collect();
    info!("Proxies: {}", proxies.len());
    info!("Threads: {}", self.threads);

    let save_dir = self.save_dir.clone().unwrap_or_else(default_save_dir);
    let save: HashSet<u16> = self.save.iter().copied().collect();
    let mut save_codes: Vec<u16> = save.iter().copied().collect();
    save_codes.sort_unstable();
    info!("Saving status codes {:?} in {}", save_codes, save_dir.display());

    let urls: Vec<String> = targets::expand_targets(&self.targets)?.into_iter().collect();
    info!("URLs: {}", urls.len());

    let vhosts: Vec<String> = targets::read_entries(&self.vhosts).into_iter().collect();
    info!("Virtual Hosts: {}", vhosts.len());

    let append: Vec<String> = targets::read_entries(&self.append).into_iter().collect();
    info!("Appending: {}", append.len());

    let cookies = parse_cookies(&self.cookies);
    if !cookies.is_empty() {
      info!("Using cookies:");
      for (name, _) in &cookies {
        info!("    {}", name);
      }
    }

    let proxy_axis: Vec<Option<String>> = if proxies.is_empty() {
      vec![None]
    } else {
      proxies.iter().cloned().map(Some).collect()
    };

    Ok(SprayConfig {
      plan: SprayPlan::new(urls, append, vhosts, proxies),
      proxies: proxy_axis,
      options: ProbeOptions {
        method,
        timeout: Duration::from_secs_f64(self.timeout),
        user_agent: self.user_agent.clone(),
        cookies,
        ignore: self.ignore.iter().copied().collect(),
        save,
        save_dir,
      },
      threads: self.threads,
    })
  }
}

/// Splits `name=value; other=value` strings into pairs. Malformed pieces are
/// logged and skipped.
pub fn parse_cookies(raw: &[String]) -> Vec<(String, String)> {
  let mut cookies: Vec<(String, String)> = Vec::new();
  for chunk in raw {
    for cookie in chunk.split(';').filter(|c| !c.trim().is_empty()) {
      match cookie.split_once('=') {
        Some((name, value)) => {
          let name = name.trim().to_string();
          let value = value.trim().to_string();
          match cookies.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => cookies.push((name, value)),
          }
        }
        None => warn!("Error setting cookie: no '=' in {:?}", cookie.trim()),
      }
    }
  }
  cookies
}

fn webspray_home() -> PathBuf {
  let home = std::env::var_os("HOME")
    .or_else(|| std::env::var_os("USERPROFILE"))
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."));
  home.join(".webspray")
}

fn default_save_dir() -> PathBuf {
  webspray_home().join("responses")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(argv: &[&str]) -> Args {
    Args::try_parse_from(std::iter::once("webspray").chain(argv.iter().copied())).unwrap()
  }

  #[test]
  fn test_defaults() {
    let args = parse(&["example.com"]);
    assert_eq!(args.threads, 10);
    assert_eq!(args.method, "GET");
    assert_eq!(args.save, vec![200]);
    assert!(args.ignore.contains(&404));
    assert_eq!(args.user_agent, DEFAULT_USER_AGENT);
    assert!(!args.debug);
  }

  #[test]
  fn test_targets_are_required() {
    assert!(Args::try_parse_from(["webspray"]).is_err());
  }

  #[test]
  fn test_resolve_builds_plan() {
    let args = parse(&[
      "example.com",
      "-a",
      "/admin",
      "/login",
      "-v",
      "intranet",
      "-t",
      "4",
      "--save-dir",
      "/tmp/webspray-test",
    ]);
    let config = args.resolve().unwrap();
    // two schemes x two suffixes x one vhost x no proxy
    assert_eq!(config.plan.len(), 4);
    assert_eq!(config.proxies, vec![None]);
    assert_eq!(config.threads, 4);
    assert_eq!(config.options.method, Method::GET);
    assert_eq!(config.options.save_dir, PathBuf::from("/tmp/webspray-test"));
  }

  #[test]
  fn test_resolve_rejects_zero_threads() {
    let args = parse(&["example.com", "-t", "0"]);
    assert!(matches!(args.resolve(), Err(ConfigError::InvalidThreads)));
  }

  #[test]
  fn test_resolve_rejects_bad_timeout() {
    let args = parse(&["example.com", "-T", "0"]);
    assert!(matches!(args.resolve(), Err(ConfigError::InvalidTimeout(_))));
  }

  #[test]
  fn test_log_file_dir() {
    let args = parse(&["example.com", "--log-dir", "/tmp/webspray-logs"]);
    assert_eq!(args.log_file_dir(), Some(PathBuf::from("/tmp/webspray-logs")));

    let args = parse(&["example.com"]);
    assert!(args.log_file_dir().unwrap().ends_with(".webspray/logs"));

    let args = parse(&["example.com", "--no-log-file"]);
    assert_eq!(args.log_file_dir(), None);
  }

  #[test]
  fn test_parse_cookies() {
    let cookies = parse_cookies(&["a=1; b = 2".to_string(), "broken; a=3".to_string()]);
    assert_eq!(
      cookies,
      vec![("a".to_string(), "3".to_string()), ("b".to_string(), "2".to_string())]
    );
  }
}
