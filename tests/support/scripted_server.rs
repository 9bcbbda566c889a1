//! Minimal scripted HTTP/1.1 server for transfers wiremock cannot express:
//! bodies that stall or drop part-way through.
//!
//! Each accepted connection consumes the next [`Reply`] from the script (the
//! last one repeats) and is closed after the response.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::socket_guard::should_skip_socket_bound_test;

/// What happens after the headers are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEnd {
    /// Send the whole body, then close.
    Complete,
    /// Send this many body bytes, then keep the connection open until the
    /// client goes away.
    HoldAfter(usize),
    /// Send this many body bytes, then close without error.
    DropAfter(usize),
}

/// One scripted response.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub end: BodyEnd,
}

impl Reply {
    /// `200 OK` with the whole body and its `Content-Length`.
    pub fn ok(body: Vec<u8>) -> Self {
        let len = body.len();
        Self {
            status: 200,
            headers: vec![("Content-Length".to_string(), len.to_string())],
            body,
            end: BodyEnd::Complete,
        }
    }

    /// `206 Partial Content` carrying `full[offset..]`.
    pub fn partial(full: &[u8], offset: usize) -> Self {
        let total = full.len();
        let suffix = full[offset..].to_vec();
        Self {
            status: 206,
            headers: vec![
                ("Content-Length".to_string(), suffix.len().to_string()),
                (
                    "Content-Range".to_string(),
                    format!("bytes {offset}-{}/{total}", total - 1),
                ),
            ],
            body: suffix,
            end: BodyEnd::Complete,
        }
    }

    /// A bodyless response with the given status.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: vec![("Content-Length".to_string(), "0".to_string())],
            body: Vec::new(),
            end: BodyEnd::Complete,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn hold_after(mut self, bytes: usize) -> Self {
        self.end = BodyEnd::HoldAfter(bytes);
        self
    }

    pub fn drop_after(mut self, bytes: usize) -> Self {
        self.end = BodyEnd::DropAfter(bytes);
        self
    }
}

/// Request line and the headers the engine is expected to send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedRequest {
    pub path: String,
    pub range: Option<String>,
    pub if_range: Option<String>,
}

pub struct ScriptedServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl ScriptedServer {
    /// Starts the server, or returns `None` when sockets are unavailable.
    pub async fn start_or_skip(script: Vec<Reply>) -> Option<Self> {
        if should_skip_socket_bound_test() {
            return None;
        }
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind scripted server");
        let addr = listener.local_addr().expect("local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(VecDeque::from(script)));
        let task = tokio::spawn(accept_loop(listener, script, Arc::clone(&requests)));
        Some(Self {
            addr,
            requests,
            task,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    script: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) {
    while let Ok((socket, _)) = listener.accept().await {
        let reply = {
            let mut script = script.lock().expect("script lock");
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            }
        };
        let requests = Arc::clone(&requests);
        tokio::spawn(async move {
            let _ = serve(socket, reply, requests).await;
        });
    }
}

async fn serve(
    mut socket: TcpStream,
    reply: Option<Reply>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()> {
    let head = read_head(&mut socket).await?;
    requests
        .lock()
        .expect("requests lock")
        .push(parse_request(&head));

    let Some(reply) = reply else {
        return Ok(());
    };

    let mut response = format!("HTTP/1.1 {} {}\r\n", reply.status, reason(reply.status));
    for (name, value) in &reply.headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("Connection: close\r\n\r\n");
    socket.write_all(response.as_bytes()).await?;

    match reply.end {
        BodyEnd::Complete => {
            socket.write_all(&reply.body).await?;
            socket.shutdown().await?;
        }
        BodyEnd::DropAfter(bytes) => {
            socket
                .write_all(&reply.body[..bytes.min(reply.body.len())])
                .await?;
            socket.shutdown().await?;
        }
        BodyEnd::HoldAfter(bytes) => {
            socket
                .write_all(&reply.body[..bytes.min(reply.body.len())])
                .await?;
            socket.flush().await?;
            let mut buf = [0_u8; 64];
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        }
    }
    Ok(())
}

async fn read_head(socket: &mut TcpStream) -> std::io::Result<String> {
    let mut head = Vec::new();
    let mut buf = [0_u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let read = socket.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        head.extend_from_slice(&buf[..read]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn parse_request(head: &str) -> RecordedRequest {
    let mut lines = head.split("\r\n");
    let path = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or_default()
        .to_string();

    let mut request = RecordedRequest {
        path,
        ..RecordedRequest::default()
    };
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "range" => request.range = Some(value.trim().to_string()),
            "if-range" => request.if_range = Some(value.trim().to_string()),
            _ => {}
        }
    }
    request
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        206 => "Partial Content",
        404 => "Not Found",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
