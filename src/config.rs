//! Load balancer configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;

/// Default Kubernetes API address, as served by `kubectl proxy`.
pub const DEFAULT_API_ADDR: &str = "127.0.0.1:8001";

/// Default Kubernetes namespace.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default delay between watch attempts after a failure.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default interval between full reconciliations.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Callback receiving errors from the background sync loops.
pub type ErrorSink = Arc<dyn Fn(&Error) + Send + Sync>;

/// Configuration for a [`LoadBalancer`](crate::LoadBalancer).
///
/// Empty strings and zero durations are replaced by the defaults when the
/// load balancer is created.
#[derive(Clone, Default)]
pub struct SyncConfig {
    /// The Kubernetes API `host:port` address. Defaults to [`DEFAULT_API_ADDR`].
    pub api_addr: String,

    /// The Kubernetes namespace of the service. Defaults to [`DEFAULT_NAMESPACE`].
    pub namespace: String,

    /// The Kubernetes service to track. Required.
    pub service_name: String,

    /// Client used for API requests.
    ///
    /// If `None`, a plain HTTP client for `api_addr` is built, which works
    /// against `kubectl proxy`. Supply your own client (for example from
    /// `kube::Client::try_default()`) for in-cluster authentication; requests
    /// are then routed to the client's cluster URL, `api_addr` is ignored and
    /// error messages carry only the request path.
    pub client: Option<kube::Client>,

    /// Receives errors from the background loops. If `None`, they are logged
    /// with `tracing::error!`.
    pub error_sink: Option<ErrorSink>,

    /// Delay between watch attempts after a failure. Defaults to [`DEFAULT_RETRY_DELAY`].
    pub retry_delay: Duration,

    /// Interval between full reconciliations. Defaults to [`DEFAULT_SYNC_INTERVAL`].
    pub sync_interval: Duration,
}

impl SyncConfig {
    /// Creates a configuration for the given service with every other field defaulted.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
        .with_defaults()
    }

    /// Sets the Kubernetes API `host:port` address.
    #[must_use]
    pub fn api_addr(mut self, api_addr: impl Into<String>) -> Self {
        self.api_addr = api_addr.into();
        self
    }

    /// Sets the namespace of the service.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the client used for API requests.
    #[must_use]
    pub fn client(mut self, client: kube::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Sets the callback receiving background errors.
    #[must_use]
    pub fn error_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.error_sink = Some(Arc::new(sink));
        self
    }

    /// Sets the delay between watch attempts after a failure.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the interval between full reconciliations.
    #[must_use]
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Fills every unset field with its default.
    pub(crate) fn with_defaults(mut self) -> Self {
        if self.api_addr.is_empty() {
            self.api_addr = DEFAULT_API_ADDR.to_string();
        }
        if self.namespace.is_empty() {
            self.namespace = DEFAULT_NAMESPACE.to_string();
        }
        if self.retry_delay.is_zero() {
            self.retry_delay = DEFAULT_RETRY_DELAY;
        }
        if self.sync_interval.is_zero() {
            self.sync_interval = DEFAULT_SYNC_INTERVAL;
        }
        self
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("api_addr", &self.api_addr)
            .field("namespace", &self.namespace)
            .field("service_name", &self.service_name)
            .field("client", &self.client.as_ref().map(|_| "kube::Client"))
            .field("error_sink", &self.error_sink.as_ref().map(|_| "Fn(&Error)"))
            .field("retry_delay", &self.retry_delay)
            .field("sync_interval", &self.sync_interval)
            .finish()
    }
}
