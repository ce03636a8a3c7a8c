//! Wire types of the Kubernetes `Endpoints` API and their conversion into backends.
//!
//! Only the fields the balancer needs are modelled; everything else in the
//! API objects is ignored during deserialization.

use std::collections::HashMap;

use serde::Deserialize;

use crate::backend::Backend;

/// Path of a single `Endpoints` object.
pub(crate) fn endpoints_path(namespace: &str, service: &str) -> String {
    format!("/api/v1/namespaces/{namespace}/endpoints/{service}")
}

/// Path of the watch stream for a single `Endpoints` object.
pub(crate) fn endpoints_watch_path(namespace: &str, service: &str) -> String {
    format!("/api/v1/watch/namespaces/{namespace}/endpoints/{service}")
}

/// A `core/v1` `Endpoints` object.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Endpoints {
    #[serde(default)]
    pub subsets: Option<Vec<EndpointSubset>>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EndpointSubset {
    #[serde(default)]
    pub addresses: Option<Vec<EndpointAddress>>,
    #[serde(default)]
    pub ports: Option<Vec<EndpointPort>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EndpointAddress {
    pub ip: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EndpointPort {
    #[serde(default)]
    pub name: Option<String>,
    pub port: i32,
}

/// A `meta/v1` `Status`, as returned with failed requests and `ERROR` watch events.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Status {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<u16>,
}

/// Watch event types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum EventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
    #[serde(other)]
    Unknown,
}

/// One line of a watch stream. The object is decoded once the type is known.
#[derive(Debug, Deserialize)]
pub(crate) struct WatchEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(default)]
    pub object: serde_json::Value,
}

/// What a decoded watch event asks the balancer to do.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WatchAction {
    /// Replace the backend set.
    Replace(Vec<Backend>),
    /// The API server reported an error; reconnect.
    Fail(String, Option<u16>),
    /// Nothing to apply.
    Skip,
}

impl WatchEvent {
    /// Decodes the embedded object according to the event type.
    pub(crate) fn into_action(self) -> serde_json::Result<WatchAction> {
        match self.kind {
            EventType::Error => {
                let status: Status = if self.object.is_null() {
                    Status::default()
                } else {
                    serde_json::from_value(self.object)?
                };
                Ok(WatchAction::Fail(status.message, status.code))
            }

            EventType::Bookmark => Ok(WatchAction::Skip),

            EventType::Added | EventType::Modified | EventType::Deleted | EventType::Unknown => {
                let endpoints: Endpoints = serde_json::from_value(self.object)?;
                Ok(WatchAction::Replace(format_endpoints(&endpoints)))
            }
        }
    }
}

/// Converts an `Endpoints` object into the backend set.
///
/// Only the first subset is used. Every address in it becomes one backend
/// sharing the subset's primary port and named ports.
pub(crate) fn format_endpoints(endpoints: &Endpoints) -> Vec<Backend> {
    let Some(subset) = endpoints.subsets.as_deref().and_then(<[_]>::first) else {
        return Vec::new();
    };

    let subset_ports = subset.ports.as_deref().unwrap_or_default();
    let port = subset_ports
        .first()
        .map(|p| p.port.to_string())
        .unwrap_or_default();

    let ports: HashMap<String, String> = subset_ports
        .iter()
        .filter_map(|p| match p.name.as_deref() {
            Some(name) if !name.is_empty() => Some((name.to_string(), p.port.to_string())),
            _ => None,
        })
        .collect();

    subset
        .addresses
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|address| Backend {
            host: address.ip.clone(),
            port: port.clone(),
            ports: ports.clone(),
        })
        .collect()
}
