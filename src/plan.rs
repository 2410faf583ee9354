/// One probe: a full URL, optionally sent with a `Host` override and through a proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeRequest {
  pub url: String,
  pub vhost: Option<String>,
  pub proxy: Option<String>,
}

impl ProbeRequest {
  /// Short tag used to label the pool task that runs this probe.
  pub fn label(&self) -> String {
    match (&self.vhost, &self.proxy) {
      (None, None) => self.url.clone(),
      (Some(vhost), None) => format!("{} @{}", self.url, vhost),
      (None, Some(proxy)) => format!("{} via {}", self.url, proxy),
      (Some(vhost), Some(proxy)) => format!("{} @{} via {}", self.url, vhost, proxy),
    }
  }
}

/// The cross product of suffixes, targets, proxies and virtual hosts.
///
/// Iteration is lazy and nests in that order, suffix outermost, so every
/// target is visited once per suffix before the next suffix starts.
#[derive(Debug, Clone, Default)]
pub struct SprayPlan {
  targets: Vec<String>,
  suffixes: Vec<String>,
  vhosts: Vec<Option<String>>,
  proxies: Vec<Option<String>>,
}

impl SprayPlan {
  /// Empty `suffixes`, `vhosts` or `proxies` behave as a single "none" entry.
  pub fn new(targets: Vec<String>, suffixes: Vec<String>, vhosts: Vec<String>, proxies: Vec<String>) -> Self {
    let suffixes = if suffixes.is_empty() { vec![String::new()] } else { suffixes };
    Self {
      targets,
      suffixes,
      vhosts: optional_axis(vhosts),
      proxies: optional_axis(proxies),
    }
  }

  /// Number of probes the plan will produce.
  pub fn len(&self) -> usize {
    self.targets.len() * self.suffixes.len() * self.vhosts.len() * self.proxies.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn requests(&self) -> impl Iterator<Item = ProbeRequest> + '_ {
    self.suffixes.iter().flat_map(move |suffix| {
      self.targets.iter().flat_map(move |target| {
        self.proxies.iter().flat_map(move |proxy| {
          self.vhosts.iter().map(move |vhost| ProbeRequest {
            url: format!("{}{}", target, suffix),
            vhost: vhost.clone(),
            proxy: proxy.clone(),
          })
        })
      })
    })
  }
}

fn optional_axis(values: Vec<String>) -> Vec<Option<String>> {
  if values.is_empty() {
    vec![None]
  } else {
    values.into_iter().map(Some).collect()
  }
}
