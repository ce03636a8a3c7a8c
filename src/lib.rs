#![deny(missing_docs)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Client-side round-robin load balancing over Kubernetes service endpoints.
//!
//! Instead of routing every call through a `ClusterIP` proxy, a process can pick
//! a backend itself. This crate keeps the ready addresses of one Kubernetes
//! service in memory by watching its `Endpoints` object through the API server,
//! with a periodic full refresh as a fallback, and hands them out in
//! round-robin order.
//!
//! # Features
//!
//! - **Initial sync**: populate the backend set before serving any requests
//! - **Streaming updates**: a long-lived watch applies every change as it happens
//!   and reconnects after failures
//! - **Reconciliation**: a periodic full refresh repairs missed watch events
//! - **Lock-protected snapshot**: every update replaces the set as a whole; readers
//!   never observe a mix of old and new backends
//!
//! # Usage
//!
//! ```ignore
//! use kube_endpoints_lb::{LoadBalancer, SyncConfig};
//!
//! // Talks to `kubectl proxy` on 127.0.0.1:8001 by default
//! let lb = LoadBalancer::new(SyncConfig::new("my-service"))?;
//!
//! // Populate the backend set, then keep it in sync
//! lb.sync_once().await?;
//! lb.start_background_sync()?;
//!
//! let backend = lb.next()?;
//! let url = format!("http://{}", backend.authority());
//!
//! // On exit
//! lb.shutdown().await;
//! ```

mod backend;
mod balancer;
mod client;
mod config;
mod error;
mod registry;

pub use backend::Backend;
pub use balancer::LoadBalancer;
pub use config::{
    DEFAULT_API_ADDR, DEFAULT_NAMESPACE, DEFAULT_RETRY_DELAY, DEFAULT_SYNC_INTERVAL, ErrorSink,
    SyncConfig,
};
pub use error::{Error, RemoteError, Result};
