//! Round-robin load balancer kept in sync with a Kubernetes `Endpoints` object.
//!
//! # How It Works
//!
//! 1. [`LoadBalancer::sync_once`] fetches the `Endpoints` object and replaces
//!    the backend set; call it once before serving traffic
//! 2. [`LoadBalancer::start_background_sync`] spawns two tasks:
//!    - a watch loop that streams `Endpoints` events and applies each one as a
//!      full replacement, reconnecting after failures
//!    - a reconcile loop that repeats the one-shot sync on a fixed interval in
//!      case a watch event was missed
//! 3. [`LoadBalancer::next`] hands out backends in round-robin order
//! 4. [`LoadBalancer::shutdown`] cancels both tasks and waits for them to exit

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use http_body_util::BodyExt;
use kube::client::Body;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, Snapshot};
use crate::client::DirectoryClient;
use crate::config::{ErrorSink, SyncConfig};
use crate::error::{Error, RemoteError, Result};
use crate::registry::{
    Endpoints, WatchAction, WatchEvent, endpoints_path, endpoints_watch_path, format_endpoints,
};

/// A round-robin load balancer over the endpoints of one Kubernetes service.
///
/// The backend set is populated by [`sync_once`](Self::sync_once) and kept up
/// to date by [`start_background_sync`](Self::start_background_sync).
/// Selection through [`next`](Self::next) is safe from any number of threads.
///
/// # Example
///
/// ```ignore
/// use kube_endpoints_lb::{LoadBalancer, SyncConfig};
///
/// let lb = LoadBalancer::new(SyncConfig::new("my-service").namespace("prod"))?;
/// lb.sync_once().await?;
/// lb.start_background_sync()?;
///
/// let backend = lb.next()?;
/// println!("calling http://{}", backend.authority());
///
/// lb.shutdown().await;
/// ```
pub struct LoadBalancer {
    shared: Arc<Shared>,
    background: Mutex<Option<Background>>,
}

/// State used by both the caller-facing API and the background tasks.
struct Shared {
    client: DirectoryClient,
    namespace: String,
    service_name: String,
    retry_delay: Duration,
    sync_interval: Duration,
    error_sink: Option<ErrorSink>,
    snapshot: Snapshot,
}

/// Handles of the running background tasks.
struct Background {
    quit: CancellationToken,
    watch: JoinHandle<()>,
    reconcile: JoinHandle<()>,
}

impl LoadBalancer {
    /// Creates a load balancer with an empty backend set.
    ///
    /// Unset configuration fields take their defaults. If no client is
    /// configured, a plain HTTP client for the API address is built, which
    /// requires a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the default client cannot be built
    /// (for example, an invalid API address).
    pub fn new(config: SyncConfig) -> Result<Self> {
        let config = config.with_defaults();
        let client = match config.client {
            Some(ref client) => DirectoryClient::new(client.clone()),
            None => DirectoryClient::for_addr(&config.api_addr)?,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                client,
                namespace: config.namespace,
                service_name: config.service_name,
                retry_delay: config.retry_delay,
                sync_interval: config.sync_interval,
                error_sink: config.error_sink,
                snapshot: Snapshot::default(),
            }),
            background: Mutex::new(None),
        })
    }

    /// Returns a copy of the current backend set.
    #[must_use]
    pub fn backends(&self) -> Vec<Backend> {
        self.shared.snapshot.current()
    }

    /// Returns the next backend in round-robin order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoBackends`] if the backend set is empty. This is an
    /// expected condition; callers typically retry after a short delay.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> Result<Backend> {
        self.shared.snapshot.select_next()
    }

    /// Fetches the service's endpoints once and replaces the backend set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingServiceName`] without making a request if no
    /// service is configured; otherwise any transport, remote or decode
    /// error from the request. Nothing is retried.
    pub async fn sync_once(&self) -> Result<()> {
        if !self.shared.has_service_name() {
            return Err(Error::MissingServiceName);
        }

        self.shared.sync(&CancellationToken::new()).await
    }

    /// Starts the watch and reconcile loops.
    ///
    /// Errors in the loops never stop them; they are passed to the error
    /// sink. Calling this while the loops are already running does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingServiceName`] if no service is configured.
    pub fn start_background_sync(&self) -> Result<()> {
        if !self.shared.has_service_name() {
            return Err(Error::MissingServiceName);
        }

        let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        if background.is_some() {
            tracing::debug!("Endpoint sync already running for {}", self.shared.key());
            return Ok(());
        }

        tracing::debug!("Starting endpoint sync for {}", self.shared.key());

        let quit = CancellationToken::new();
        let watch = tokio::spawn(Arc::clone(&self.shared).watch_endpoints(quit.clone()));
        let reconcile = tokio::spawn(Arc::clone(&self.shared).reconcile(quit.clone()));

        *background = Some(Background {
            quit,
            watch,
            reconcile,
        });

        Ok(())
    }

    /// Returns `true` while the background loops are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stops the background loops and waits until both have exited.
    ///
    /// Once this returns, the backend set is no longer modified. Calling it
    /// again, or without a prior [`start_background_sync`](Self::start_background_sync),
    /// returns immediately.
    pub async fn shutdown(&self) {
        let background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(background) = background else {
            return;
        };

        background.quit.cancel();

        for (name, task) in [("watch", background.watch), ("reconcile", background.reconcile)] {
            if let Err(e) = task.await {
                tracing::error!("Endpoints {name} loop failed: {e}");
            }
        }

        tracing::debug!("Stopped endpoint sync for {}", self.shared.key());
    }
}

impl Drop for LoadBalancer {
    fn drop(&mut self) {
        let background = self
            .background
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(background) = background {
            background.quit.cancel();
        }
    }
}

impl Shared {
    fn has_service_name(&self) -> bool {
        !self.service_name.trim().is_empty()
    }

    fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.service_name)
    }

    fn report(&self, err: &Error) {
        match &self.error_sink {
            Some(sink) => sink(err),
            None => tracing::error!("{err}"),
        }
    }

    /// Fetches the `Endpoints` object and replaces the backend set.
    async fn sync(&self, cancel: &CancellationToken) -> Result<()> {
        let path = endpoints_path(&self.namespace, &self.service_name);
        let body = self.client.get_bytes(&path, cancel).await?;

        let endpoints: Endpoints =
            serde_json::from_slice(&body).map_err(|e| Error::decode(&self.client.url(&path), e))?;

        let backends = format_endpoints(&endpoints);
        tracing::debug!("Synced {} endpoints for {}", backends.len(), self.key());
        self.snapshot.update(backends);

        Ok(())
    }

    /// Repeats the one-shot sync every `sync_interval` until `quit` fires.
    async fn reconcile(self: Arc<Self>, quit: CancellationToken) {
        loop {
            tokio::select! {
                () = quit.cancelled() => break,
                () = tokio::time::sleep(self.sync_interval) => {}
            }

            match self.sync(&quit).await {
                Ok(()) => {}
                Err(Error::Cancelled { .. }) => break,
                Err(e) => self.report(&e),
            }
        }

        tracing::debug!("Endpoints reconcile loop for {} stopped", self.key());
    }

    /// Runs the watch on its own task and cancels it once `quit` fires.
    async fn watch_endpoints(self: Arc<Self>, quit: CancellationToken) {
        let ctx = CancellationToken::new();
        let watch = tokio::spawn(Arc::clone(&self).watch(ctx.clone()));

        quit.cancelled().await;
        ctx.cancel();

        if let Err(e) = watch.await {
            tracing::error!("Endpoints watch for {} failed: {e}", self.key());
        }
    }

    /// Opens watch streams until cancelled, reconnecting after failures.
    async fn watch(self: Arc<Self>, cancel: CancellationToken) {
        let path = endpoints_watch_path(&self.namespace, &self.service_name);
        let url = self.client.url(&path);

        loop {
            let result = self.client.get(&path, &cancel).await;
            if cancel.is_cancelled() {
                break;
            }

            let body = match result {
                Ok(body) => body,
                Err(e) => {
                    self.report(&e);
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(self.retry_delay) => {}
                    }
                    continue;
                }
            };

            tracing::debug!("Starting Kubernetes endpoint watch for {}", self.key());

            if !self.apply_events(body, &url, &cancel).await {
                break;
            }
        }

        tracing::debug!("Endpoints watch for {} stopped", self.key());
    }

    /// Applies the events of one watch stream in order.
    ///
    /// Returns `false` if cancelled, `true` if the stream failed or ended and
    /// should be reopened.
    async fn apply_events(&self, body: Body, url: &str, cancel: &CancellationToken) -> bool {
        let reader = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
        let lines = FramedRead::new(reader, LinesCodec::new());
        tokio::pin!(lines);

        loop {
            let line = tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                line = lines.next() => line,
            };

            let line = match line {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    self.report(&Error::transport(url, e));
                    return true;
                }
                None => {
                    self.report(&Error::StreamClosed {
                        url: url.to_string(),
                    });
                    return true;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let action = serde_json::from_str::<WatchEvent>(&line).and_then(WatchEvent::into_action);
            match action {
                Ok(WatchAction::Replace(backends)) => {
                    tracing::debug!(
                        "Kubernetes watch: {} endpoints for {}",
                        backends.len(),
                        self.key()
                    );
                    self.snapshot.update(backends);
                }

                Ok(WatchAction::Skip) => {}

                Ok(WatchAction::Fail(message, code)) => {
                    let err = RemoteError {
                        url: url.to_string(),
                        message,
                        code: code.unwrap_or_default(),
                    };
                    self.report(&err.into());
                    return true;
                }

                Err(e) => {
                    self.report(&Error::decode(url, e));
                    return true;
                }
            }
        }
    }
}
