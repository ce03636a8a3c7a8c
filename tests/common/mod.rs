//! A scripted fake Kubernetes API server speaking just enough HTTP/1.1.

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const ENDPOINTS_PATH: &str = "/api/v1/namespaces/default/endpoints/web";
pub const WATCH_PATH: &str = "/api/v1/watch/namespaces/default/endpoints/web";

/// A request as seen by the fake server.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub path: String,
    pub accept: Option<String>,
}

/// How to answer the next watch request.
enum WatchScript {
    Respond(u16, String),
    Stream(mpsc::UnboundedReceiver<String>),
}

#[derive(Default)]
struct State {
    endpoints: Mutex<(u16, String)>,
    watches: Mutex<VecDeque<WatchScript>>,
    requests: Mutex<Vec<Recorded>>,
}

/// Fake API server. Unscripted watch requests are held open without events.
pub struct FakeRegistry {
    addr: SocketAddr,
    state: Arc<State>,
}

impl FakeRegistry {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State::default());
        *state.endpoints.lock().unwrap() = (200, endpoints_json(&[]));

        let server_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, Arc::clone(&server_state)));
            }
        });

        Self { addr, state }
    }

    pub fn api_addr(&self) -> String {
        self.addr.to_string()
    }

    /// Sets the response for `GET` on the endpoints object.
    pub fn set_endpoints(&self, status: u16, body: impl Into<String>) {
        *self.state.endpoints.lock().unwrap() = (status, body.into());
    }

    /// Queues a fixed response for the next watch request.
    pub fn push_watch_response(&self, status: u16, body: impl Into<String>) {
        self.state
            .watches
            .lock()
            .unwrap()
            .push_back(WatchScript::Respond(status, body.into()));
    }

    /// Queues a streamed response for the next watch request. Each sent
    /// string becomes one line; dropping the sender ends the stream.
    pub fn push_watch_stream(&self) -> mpsc::UnboundedSender<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .watches
            .lock()
            .unwrap()
            .push_back(WatchScript::Stream(rx));
        tx
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }
}

async fn serve(mut socket: TcpStream, state: Arc<State>) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    state.requests.lock().unwrap().push(request.clone());

    if request.path == ENDPOINTS_PATH {
        let (status, body) = state.endpoints.lock().unwrap().clone();
        respond(&mut socket, status, &body).await;
        return;
    }

    if request.path != WATCH_PATH {
        respond(&mut socket, 404, r#"{"message":"unknown path","code":404}"#).await;
        return;
    }

    let script = state.watches.lock().unwrap().pop_front();
    match script {
        Some(WatchScript::Respond(status, body)) => respond(&mut socket, status, &body).await,
        Some(WatchScript::Stream(rx)) => stream(&mut socket, rx).await,
        None => hold_open(&mut socket).await,
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&buf);
    let mut lines = head.lines();
    let path = lines.next()?.split_whitespace().nth(1)?.to_string();
    let accept = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.eq_ignore_ascii_case("accept")
            .then(|| value.trim().to_string())
    });

    Some(Recorded { path, accept })
}

async fn respond(socket: &mut TcpStream, status: u16, body: &str) {
    let response = format!(
        "HTTP/1.1 {status} Fake\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

async fn stream(socket: &mut TcpStream, mut rx: mpsc::UnboundedReceiver<String>) {
    let head = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }

    let (mut reader, mut writer) = socket.split();
    let mut scratch = [0_u8; 64];
    loop {
        tokio::select! {
            line = rx.recv() => {
                let Some(line) = line else {
                    let _ = writer.write_all(b"0\r\n\r\n").await;
                    break;
                };
                let data = format!("{line}\n");
                let chunk = format!("{:x}\r\n{data}\r\n", data.len());
                if writer.write_all(chunk.as_bytes()).await.is_err() {
                    break;
                }
            }
            n = reader.read(&mut scratch) => {
                if matches!(n, Ok(0) | Err(_)) {
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}

async fn hold_open(socket: &mut TcpStream) {
    let head = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n";
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }

    let mut scratch = [0_u8; 64];
    while let Ok(n) = socket.read(&mut scratch).await {
        if n == 0 {
            break;
        }
    }
}

/// JSON of an `Endpoints` object with the given addresses on port 8080 ("http").
pub fn endpoints_json(ips: &[&str]) -> String {
    endpoints_value(ips).to_string()
}

/// One watch event line.
pub fn event_json(kind: &str, ips: &[&str]) -> String {
    serde_json::json!({ "type": kind, "object": endpoints_value(ips) }).to_string()
}

/// An `ERROR` watch event line.
pub fn error_event_json(message: &str, code: u16) -> String {
    serde_json::json!({
        "type": "ERROR",
        "object": { "kind": "Status", "status": "Failure", "message": message, "code": code }
    })
    .to_string()
}

fn endpoints_value(ips: &[&str]) -> serde_json::Value {
    if ips.is_empty() {
        return serde_json::json!({ "kind": "Endpoints", "apiVersion": "v1" });
    }

    let addresses: Vec<_> = ips.iter().map(|ip| serde_json::json!({ "ip": ip })).collect();
    serde_json::json!({
        "kind": "Endpoints",
        "apiVersion": "v1",
        "subsets": [{
            "addresses": addresses,
            "ports": [{ "name": "http", "port": 8080, "protocol": "TCP" }]
        }]
    })
}

/// Collects the errors passed to the error sink as strings.
#[derive(Clone, Default)]
pub struct ErrorLog(Arc<Mutex<Vec<String>>>);

impl ErrorLog {
    pub fn push(&self, message: String) {
        self.0.lock().unwrap().push(message);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries().iter().any(|e| e.contains(needle))
    }
}

/// Polls `condition` until it holds, panicking after five seconds.
pub async fn wait_for<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Runs `fut` with a five second timeout.
#[allow(dead_code)]
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("operation timed out")
}
