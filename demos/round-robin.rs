//! Round-robin client example for kube-endpoints-lb.
//!
//! Keeps the endpoints of a Kubernetes service in sync and picks one backend
//! per second, probing it with a TCP connect.
//!
//! # Running
//!
//! Start `kubectl proxy` (serves the API on 127.0.0.1:8001), then:
//!
//! ```text
//! SERVICE_NAME=my-service cargo run --example round-robin
//! ```
//!
//! # Environment Variables
//!
//! - `SERVICE_NAME`: Kubernetes service name (required)
//! - `SERVICE_NAMESPACE`: Kubernetes namespace (default: default)
//! - `API_ADDR`: Kubernetes API address (default: 127.0.0.1:8001)
//! - `REQUEST_INTERVAL_MS`: Milliseconds between picks (default: 1000)

use std::env;
use std::time::Duration;

use kube_endpoints_lb::{Error, LoadBalancer, SyncConfig};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{Level, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let service_name = env::var("SERVICE_NAME").unwrap_or_default();
    let request_interval_ms: u64 = env::var("REQUEST_INTERVAL_MS")
        .ok()
        .and_then(|i| i.parse().ok())
        .unwrap_or(1000);

    let mut config = SyncConfig::new(&service_name);
    if let Ok(ns) = env::var("SERVICE_NAMESPACE") {
        config = config.namespace(ns);
    }
    if let Ok(addr) = env::var("API_ADDR") {
        config = config.api_addr(addr);
    }

    info!("Service: {}/{service_name}", config.namespace);
    info!("API address: {}", config.api_addr);

    let lb = LoadBalancer::new(config)?;

    // Populate the backend set before picking anything
    lb.sync_once().await?;
    info!("Initial endpoints: {}", lb.backends().len());

    lb.start_background_sync()?;

    let interval = Duration::from_millis(request_interval_ms);
    let picker = async {
        loop {
            let backend = match lb.next() {
                Ok(backend) => backend,
                Err(Error::NoBackends) => {
                    warn!("No endpoints available");
                    sleep(interval).await;
                    continue;
                }
                Err(e) => return Err::<(), Error>(e),
            };

            let authority = backend.authority();
            match timeout(Duration::from_secs(1), TcpStream::connect(authority.as_str())).await {
                Ok(Ok(_)) => info!("Endpoint {authority} reachable"),
                Ok(Err(e)) => warn!("Endpoint {authority}: {e}"),
                Err(_) => warn!("Endpoint {authority}: connect timed out"),
            }

            sleep(interval).await;
        }
    };

    tokio::select! {
        result = picker => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received, exiting..."),
    }

    lb.shutdown().await;

    Ok(())
}
