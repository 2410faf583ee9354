use std::collections::HashSet;
use std::time::Duration;

use reqwest::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use webspray::{ProbeOptions, Prober, SprayPlan, SprayPool, SprayResponse, TaskError};

/// Serves every connection one HTML page whose title echoes the request's Host header.
async fn spawn_echo_server() -> String {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    loop {
      let Ok((mut socket, _)) = listener.accept().await else {
        return;
      };
      tokio::spawn(async move {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
          match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
          }
        }
        let request = String::from_utf8_lossy(&request);
        let host = request
          .lines()
          .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("host").then(|| value.trim().to_string())
          })
          .unwrap_or_default();
        let body = format!("<html><head><title>Host {}</title></head><body>hi</body></html>", host);
        let response = format!(
          "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
          body.len(),
          body
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
      });
    }
  });
  format!("http://{}", addr)
}

fn options(save_dir: &std::path::Path) -> ProbeOptions {
  ProbeOptions {
    method: Method::GET,
    timeout: Duration::from_secs(5),
    user_agent: "webspray-test".to_string(),
    cookies: Vec::new(),
    ignore: HashSet::new(),
    save: HashSet::from([200]),
    save_dir: save_dir.to_path_buf(),
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spray_reports_every_vhost_and_suffix() {
  let base = spawn_echo_server().await;
  let save_dir = tempfile::tempdir().unwrap();
  let prober = Prober::new(options(save_dir.path()), vec![None]).unwrap();

  let plan = SprayPlan::new(
    vec![base.clone()],
    vec!["/a".to_string(), "/b".to_string()],
    vec!["one.local".to_string(), "two.local".to_string()],
    vec![],
  );
  assert_eq!(plan.len(), 4);

  let mut pool = SprayPool::<SprayResponse>::new(2, Handle::current(), "test_pool_spray").unwrap();
  for request in plan.requests() {
    let task_prober = prober.clone();
    pool
      .submit(
        request.label(),
        Box::pin(async move { Ok::<_, TaskError>(task_prober.visit(&request).await?) }),
      )
      .await
      .unwrap();
  }
  let responses = pool.join_all().await;
  assert_eq!(responses.len(), 4);

  for response in &responses {
    assert_eq!(response.status, 200);
    let vhost = response.vhost.as_deref().unwrap();
    assert_eq!(response.title, format!("Host {}", vhost));
    assert!(response.url.starts_with(&base));
    assert!(response.proxy.is_none());
  }
  let urls: HashSet<&str> = responses.iter().map(|r| r.url.as_str()).collect();
  assert_eq!(urls.len(), 2);

  let saved = std::fs::read_dir(save_dir.path()).unwrap().count();
  assert_eq!(saved, 4);
}

#[tokio::test]
async fn test_unreachable_targets_produce_no_results() {
  let save_dir = tempfile::tempdir().unwrap();
  let prober = Prober::new(options(save_dir.path()), vec![None]).unwrap();
  let plan = SprayPlan::new(vec!["http://127.0.0.1:1".to_string()], vec![], vec![], vec![]);

  let mut pool = SprayPool::<SprayResponse>::new(1, Handle::current(), "test_pool_unreachable").unwrap();
  for request in plan.requests() {
    let task_prober = prober.clone();
    pool
      .submit(
        request.label(),
        Box::pin(async move { Ok::<_, TaskError>(task_prober.visit(&request).await?) }),
      )
      .await
      .unwrap();
  }
  assert!(pool.join_all().await.is_empty());
}
