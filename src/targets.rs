//! Turning command-line inputs into probe targets.
//!
//! Every input item is either a path to a file of entries, one per line, or
//! an entry on its own. Target entries can be URLs, bare hosts, or CIDR
//! networks.

use std::fs;
use std::path::Path;

use indexmap::IndexSet;
use ipnetwork::IpNetwork;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum TargetError {
  #[error("Network {network} expands to more than {limit} addresses")]
  NetworkTooLarge { network: String, limit: u128 },
}

/// Upper bound on the addresses a single CIDR entry may expand to.
pub const MAX_NETWORK_ADDRESSES: u128 = 1 << 24;

/// Reads each item as a file of entries if it names a readable file, and as a
/// literal entry otherwise. Lines are trimmed, blanks dropped, duplicates
/// removed with first-seen order kept.
pub fn read_entries<I, S>(items: I) -> IndexSet<String>
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  let mut entries = IndexSet::new();
  for item in items {
    let item = item.as_ref();
    let path = Path::new(item);
    match path.is_file().then(|| fs::read_to_string(path)) {
      Some(Ok(contents)) => {
        trace!(file = %item, "Reading entries from file.");
        entries.extend(
          contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string),
        );
      }
      _ => {
        entries.insert(item.to_string());
      }
    }
  }
  entries
}

/// Expands one target entry into the URLs to probe.
///
/// A CIDR network yields `http://ip/` and `https://ip/` for every address in
/// it. An entry without an `http://` or `https://` scheme yields both schemes.
/// A URL is kept as it is.
pub fn expand_target(entry: &str) -> Result<Vec<String>, TargetError> {
  if let Some(network) = parse_network(entry) {
    let count = match network_size(&network) {
      Some(count) if count <= MAX_NETWORK_ADDRESSES => count,
      _ => {
        return Err(TargetError::NetworkTooLarge {
          network: entry.to_string(),
          limit: MAX_NETWORK_ADDRESSES,
        })
      }
    };
    let mut urls = Vec::with_capacity(count as usize * 2);
    for ip in network.iter() {
      let host = match ip {
        std::net::IpAddr::V4(v4) => v4.to_string(),
        std::net::IpAddr::V6(v6) => format!("[{}]", v6),
      };
      urls.push(format!("http://{}/", host));
      urls.push(format!("https://{}/", host));
    }
    return Ok(urls);
  }

  let lower = entry.to_ascii_lowercase();
  if lower.starts_with("http://") || lower.starts_with("https://") {
    Ok(vec![entry.to_string()])
  } else {
    Ok(vec![format!("http://{}", entry), format!("https://{}", entry)])
  }
}

/// Reads target items and expands every entry, de-duplicating the result.
pub fn expand_targets<I, S>(items: I) -> Result<IndexSet<String>, TargetError>
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  let mut urls = IndexSet::new();
  for entry in read_entries(items) {
    urls.extend(expand_target(&entry)?);
  }
  Ok(urls)
}

/// Only strings that are clearly addresses or networks count; `example.com`
/// must not be mistaken for anything here. A network with host bits set,
/// such as `10.0.0.1/30`, is not a network either.
fn parse_network(entry: &str) -> Option<IpNetwork> {
  let first = entry.chars().next()?;
  if !(first.is_ascii_hexdigit() || first == ':') {
    return None;
  }
  let network = entry.parse::<IpNetwork>().ok()?;
  (network.ip() == network.network()).then_some(network)
}

/// Address count from the prefix length. `None` when it does not fit in a `u128` (`::/0`).
fn network_size(network: &IpNetwork) -> Option<u128> {
  let bits: u32 = match network {
    IpNetwork::V4(_) => 32,
    IpNetwork::V6(_) => 128,
  };
  1u128.checked_shl(bits - u32::from(network.prefix()))
}
