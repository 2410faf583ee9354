use std::process::ExitCode;

use clap::Parser;
use futures::StreamExt;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use webspray::cli::Args;
use webspray::logging;
use webspray::{PoolError, ProbeOptions, Prober, SprayPlan, SprayPool, SprayResponse, TaskError};

const POOL_NAME: &str = "webspray";

fn report(options: &ProbeOptions, response: &SprayResponse) {
  if options.is_ignored(response.status) {
    debug!("{}", response);
  } else {
    info!("{}", response);
  }
}

/// Feeds every planned probe to the pool, reporting responses as they come in.
async fn spray(pool: &mut SprayPool<SprayResponse>, prober: &Prober, plan: &SprayPlan) -> Result<usize, PoolError> {
  let mut reported = 0;
  for request in plan.requests() {
    let task_prober = prober.clone();
    let label = request.label();
    pool
      .submit(
        label,
        Box::pin(async move { Ok::<_, TaskError>(task_prober.visit(&request).await?) }),
      )
      .await?;

    for response in pool.drain_available() {
      report(prober.options(), &response);
      reported += 1;
    }
  }

  let remaining = pool.join();
  tokio::pin!(remaining);
  while let Some(response) = remaining.next().await {
    report(prober.options(), &response);
    reported += 1;
  }
  Ok(reported)
}

#[tokio::main]
async fn main() -> ExitCode {
  let args = Args::parse();
  let log_dir = args.log_file_dir();
  let _logging = logging::init(args.debug, log_dir.as_deref());
  info!("Full command: {}", std::env::args().collect::<Vec<_>>().join(" "));

  let config = match args.resolve() {
    Ok(config) => config,
    Err(e) => {
      error!("{}", e);
      error!("Check your syntax");
      return ExitCode::from(2);
    }
  };
  info!("Probes planned: {}", config.plan.len());

  let prober = match Prober::new(config.options, config.proxies) {
    Ok(prober) => prober,
    Err(e) => {
      error!("{}", e);
      return ExitCode::from(2);
    }
  };

  let mut pool = match SprayPool::<SprayResponse>::new(config.threads, Handle::current(), POOL_NAME) {
    Ok(pool) => pool,
    Err(e) => {
      error!("{}", e);
      return ExitCode::from(2);
    }
  };

  let outcome = tokio::select! {
    result = spray(&mut pool, &prober, &config.plan) => Some(result),
    _ = tokio::signal::ctrl_c() => None,
  };

  let exit = match outcome {
    Some(Ok(reported)) => {
      info!("Finished. {} responses reported.", reported);
      ExitCode::SUCCESS
    }
    Some(Err(e)) => {
      error!("Spray aborted: {}", e);
      ExitCode::FAILURE
    }
    None => {
      error!("Interrupted");
      ExitCode::from(1)
    }
  };
  pool.close();
  exit
}
