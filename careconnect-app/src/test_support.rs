//! Loopback HTTP backend for tests
//!
//! Serves canned JSON per `(method, path)` and records every request it sees.
//! Paths are registered without the `/api` prefix and matched without the
//! query string.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Full request target, including `/api` and any query string
    pub path: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn json(&self) -> Value {
        if self.body.trim().is_empty() {
            return Value::Null;
        }
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

#[derive(Clone)]
struct Canned {
    status: u16,
    body: Value,
    delay: Option<Duration>,
}

#[derive(Default)]
struct Shared {
    routes: Mutex<HashMap<(String, String), Canned>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

pub struct StubBackend {
    addr: SocketAddr,
    shared: Arc<Shared>,
}

impl StubBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared::default());

        let server_shared = shared.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let shared = server_shared.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, shared).await {
                        tracing::debug!("[stub] connection error: {}", e);
                    }
                });
            }
        });

        Self { addr, shared }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn respond(&self, method: &str, path: &str, status: u16, body: Value) {
        self.install(method, path, Canned { status, body, delay: None });
    }

    pub fn respond_after(
        &self,
        method: &str,
        path: &str,
        delay: Duration,
        status: u16,
        body: Value,
    ) {
        self.install(
            method,
            path,
            Canned {
                status,
                body,
                delay: Some(delay),
            },
        );
    }

    fn install(&self, method: &str, path: &str, canned: Canned) {
        self.shared
            .routes
            .lock()
            .insert((method.to_string(), path.to_string()), canned);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.shared.requests.lock().last().cloned()
    }
}

fn route_key(target: &str) -> String {
    let path = target.split('?').next().unwrap_or(target);
    path.strip_prefix("/api").unwrap_or(path).to_string()
}

async fn handle_connection(mut stream: TcpStream, shared: Arc<Shared>) -> Result<(), String> {
    let (reader, mut writer) = stream.split();
    let mut buf_reader = BufReader::new(reader);

    let mut request_line = String::new();
    buf_reader
        .read_line(&mut request_line)
        .await
        .map_err(|e| e.to_string())?;
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(format!("malformed request line: {request_line:?}"));
    }
    let method = parts[0].to_string();
    let target = parts[1].to_string();

    let mut content_length: usize = 0;
    let mut chunked = false;
    let mut authorization = None;
    let mut content_type = None;
    loop {
        let mut header_line = String::new();
        buf_reader
            .read_line(&mut header_line)
            .await
            .map_err(|e| e.to_string())?;
        if header_line.trim().is_empty() {
            break;
        }
        let Some((name, value)) = header_line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => content_length = value.parse().unwrap_or(0),
            "transfer-encoding" => chunked = value.eq_ignore_ascii_case("chunked"),
            "authorization" => authorization = Some(value),
            "content-type" => content_type = Some(value),
            _ => {}
        }
    }

    let body_buf = if chunked {
        read_chunked(&mut buf_reader).await?
    } else {
        let mut buf = vec![0u8; content_length];
        buf_reader
            .read_exact(&mut buf)
            .await
            .map_err(|e| e.to_string())?;
        buf
    };
    let body = String::from_utf8_lossy(&body_buf).into_owned();

    let key = (method.clone(), route_key(&target));
    shared.requests.lock().push(RecordedRequest {
        method,
        path: target,
        authorization,
        content_type,
        body,
    });

    let canned = shared.routes.lock().get(&key).cloned().unwrap_or(Canned {
        status: 404,
        body: json!({"message": "Not Found"}),
        delay: None,
    });
    if let Some(delay) = canned.delay {
        tokio::time::sleep(delay).await;
    }

    let body_str = if canned.body.is_null() {
        String::new()
    } else {
        canned.body.to_string()
    };
    let status_text = StatusCode::from_u16(canned.status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        canned.status,
        status_text,
        body_str.len(),
        body_str
    );

    writer
        .write_all(response.as_bytes())
        .await
        .map_err(|e| e.to_string())?;
    writer.flush().await.map_err(|e| e.to_string())?;
    Ok(())
}

async fn read_chunked<R>(reader: &mut BufReader<R>) -> Result<Vec<u8>, String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        reader
            .read_line(&mut size_line)
            .await
            .map_err(|e| e.to_string())?;
        let size_hex = size_line.trim().split(';').next().unwrap_or("0");
        let size = usize::from_str_radix(size_hex, 16).map_err(|e| e.to_string())?;

        let mut chunk = vec![0u8; size + 2];
        reader
            .read_exact(&mut chunk)
            .await
            .map_err(|e| e.to_string())?;
        if size == 0 {
            return Ok(body);
        }
        body.extend_from_slice(&chunk[..size]);
    }
}

/// Client pointed at `backend` with fresh in-memory storage
pub fn client_for(backend: &StubBackend) -> crate::api::ApiClient {
    let config = crate::config::ApiConfig::with_base_url(&backend.base_url()).unwrap();
    let storage = Arc::new(crate::auth::MemoryStorage::default());
    crate::api::ApiClient::new(config, storage).unwrap()
}

/// Handle already holding an authenticated senior with id `id`
pub fn signed_in(id: &str) -> crate::auth::SessionHandle {
    let user = serde_json::from_value(json!({
        "_id": id,
        "name": "Kwame Addo",
        "email": "kwame@example.com",
        "role": "senior"
    }))
    .unwrap();
    let handle = crate::auth::SessionHandle::new();
    handle.transition(crate::auth::AuthState::Authenticated {
        user,
        token: Arc::from("T"),
    });
    handle
}
