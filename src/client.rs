//! Raw GET requests against the Kubernetes API.

use http::header::ACCEPT;
use http::{Method, Request, StatusCode, Uri};
use http_body_util::BodyExt;
use kube::client::Body;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, RemoteError, Result};
use crate::registry::Status;

const ACCEPT_JSON: &str = "application/json, */*";

/// Issues GET requests for API paths and classifies the responses.
#[derive(Clone)]
pub(crate) struct DirectoryClient {
    client: kube::Client,
    base: Option<String>,
}

impl DirectoryClient {
    /// Wraps an existing client. Its cluster URL is not known here, so
    /// error URLs carry only the request path.
    pub(crate) fn new(client: kube::Client) -> Self {
        Self { client, base: None }
    }

    /// Builds a plain HTTP client talking to `api_addr`, as exposed by `kubectl proxy`.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn for_addr(api_addr: &str) -> Result<Self> {
        let base = format!("http://{api_addr}");
        let uri: Uri = base
            .parse()
            .map_err(|e: http::uri::InvalidUri| Error::transport(&base, e))?;
        let client = kube::Client::try_from(kube::Config::new(uri))
            .map_err(|e| Error::transport(&base, e))?;

        Ok(Self {
            client,
            base: Some(base),
        })
    }

    /// URL of `path` for error reporting: absolute when the client was built
    /// for a known address, the bare path otherwise.
    pub(crate) fn url(&self, path: &str) -> String {
        match &self.base {
            Some(base) => format!("{base}{path}"),
            None => path.to_string(),
        }
    }

    /// Issues a GET for `path` and returns the body of a `200 OK` response.
    ///
    /// The caller owns the body; dropping it closes the connection. Any other
    /// status is turned into [`RemoteError`], decoding the API's `Status`
    /// payload when possible.
    pub(crate) async fn get(&self, path: &str, cancel: &CancellationToken) -> Result<Body> {
        let url = self.url(path);
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header(ACCEPT, ACCEPT_JSON)
            .body(Body::from(Vec::<u8>::new()))
            .map_err(|e| Error::transport(&url, e))?;

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled { url }),
            response = self.client.send(request) => response.map_err(|e| Error::transport(&url, e))?,
        };

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response.into_body());
        }

        let body = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled { url }),
            body = response.into_body().collect() => body,
        };

        Err(remote_error(url, status, body.map(|b| b.to_bytes())).into())
    }

    /// Issues a GET for `path` and returns the whole response body.
    pub(crate) async fn get_bytes(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let url = self.url(path);
        let body = self.get(path, cancel).await?;

        let collected = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled { url }),
            collected = body.collect() => collected.map_err(|e| Error::transport(&url, e))?,
        };

        Ok(collected.to_bytes().to_vec())
    }
}

/// Builds the error for a non-200 response from its (possibly unreadable) body.
fn remote_error<B, E>(url: String, status: StatusCode, body: std::result::Result<B, E>) -> RemoteError
where
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let code = status.as_u16();
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            return RemoteError {
                url,
                message: e.to_string(),
                code,
            };
        }
    };

    match serde_json::from_slice::<Status>(body.as_ref()) {
        Ok(s) => RemoteError {
            url,
            message: s.message,
            code: s.code.unwrap_or(code),
        },
        Err(e) => RemoteError {
            url,
            message: e.to_string(),
            code,
        },
    }
}
