//! Backend descriptors and the shared round-robin snapshot.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::error::{Error, Result};

/// A single routable endpoint of the watched service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Backend {
    /// Host address, usually a pod IP.
    pub host: String,

    /// Primary port: the first port listed for the endpoint subset, or an
    /// empty string if the service exposes no ports.
    pub port: String,

    /// Named ports of the endpoint subset (`"http" -> "8080"`).
    pub ports: HashMap<String, String>,
}

impl Backend {
    /// Returns `host:port` suitable for dialing, with IPv6 hosts bracketed.
    ///
    /// If the backend has no primary port, only the host is returned.
    #[must_use]
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        if self.port.is_empty() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// Looks up a named port.
    #[must_use]
    pub fn named_port(&self, name: &str) -> Option<&str> {
        self.ports.get(name).map(String::as_str)
    }
}

#[derive(Debug, Default)]
struct State {
    backends: Vec<Backend>,
    cursor: usize,
}

/// The current backend set plus the round-robin cursor, behind one lock.
///
/// Writers replace the whole set; readers get copies. The set is therefore
/// never a mix of two updates.
#[derive(Debug, Default)]
pub(crate) struct Snapshot {
    state: RwLock<State>,
}

impl Snapshot {
    /// Replaces the backend set. The cursor is left alone and normalized on
    /// the next selection.
    pub(crate) fn update(&self, backends: Vec<Backend>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.backends = backends;
    }

    /// Returns a copy of the current backend set.
    pub(crate) fn current(&self) -> Vec<Backend> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .backends
            .clone()
    }

    /// Returns the backend under the cursor and advances it.
    pub(crate) fn select_next(&self) -> Result<Backend> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let len = state.backends.len();
        if len == 0 {
            return Err(Error::NoBackends);
        }

        if state.cursor >= len {
            state.cursor = 0;
        }

        let backend = state.backends[state.cursor].clone();
        state.cursor = (state.cursor + 1) % len;
        Ok(backend)
    }
}
