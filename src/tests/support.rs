use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::SessionError;
use crate::events::{EventBus, SessionEvent};
use crate::monitor::{
    AdaptiveThresholds, CapabilityLevel, PerformanceMonitor, SharedMonitor,
};
use crate::render::RenderSurface;
use crate::session::{SessionCoordinator, StreamingStats};

/// One step of a scripted response body.
#[derive(Clone)]
pub enum Step {
    Line(String),
    Delay(Duration),
}

/// Scripted reply for one request.
#[derive(Clone)]
pub struct Reply {
    status: u16,
    content_type: &'static str,
    steps: Vec<Step>,
}

impl Reply {
    /// `data: <payload>` lines, newline-terminated.
    pub fn stream(events: &[&str]) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream",
            steps: events
                .iter()
                .map(|e| Step::Line(format!("data: {}\n", e)))
                .collect(),
        }
    }

    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            steps: vec![Step::Line(body.to_string())],
        }
    }

    /// Raw body lines with no `data:` prefix added.
    pub fn raw(lines: &[&str]) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream",
            steps: lines.iter().map(|l| Step::Line(format!("{}\n", l))).collect(),
        }
    }

    /// Headers are sent right away, the body only after `delay`.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.steps.insert(0, Step::Delay(delay));
        self
    }

    pub fn then_after(mut self, delay: Duration, event: &str) -> Self {
        self.steps.push(Step::Delay(delay));
        self.steps.push(Step::Line(format!("data: {}\n", event)));
        self
    }
}

/// Local chat backend that answers with scripted replies in order; the last
/// reply repeats once the script runs out.
pub struct MockBackend {
    pub url: String,
    hits: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<Value>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    pub async fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let replies = Arc::new(replies);

        let handle = {
            let hits = hits.clone();
            let bodies = bodies.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        return;
                    };
                    let index = hits.fetch_add(1, Ordering::SeqCst);
                    let reply = replies[index.min(replies.len() - 1)].clone();
                    let bodies = bodies.clone();
                    tokio::spawn(async move {
                        let mut socket = socket;
                        if let Some(body) = read_request(&mut socket).await {
                            bodies.lock().unwrap().push(body);
                        }
                        write_reply(socket, reply).await;
                    });
                }
            })
        };

        Self {
            url: format!("http://{}/api/chat", addr),
            hits,
            bodies,
            handle,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().unwrap().clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<Value> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    serde_json::from_slice(&buf[header_end..]).ok()
}

async fn write_reply(mut socket: TcpStream, reply: Reply) {
    let reason = match reply.status {
        200 => "OK",
        400 => "Bad Request",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
        reply.status, reason, reply.content_type
    );
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    let _ = socket.flush().await;

    for step in reply.steps {
        match step {
            Step::Line(line) => {
                if socket.write_all(line.as_bytes()).await.is_err() {
                    return;
                }
                let _ = socket.flush().await;
            }
            Step::Delay(delay) => tokio::time::sleep(delay).await,
        }
    }
    let _ = socket.shutdown().await;
}

/// Address nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/api/chat", addr)
}

/// High-host thresholds with a short timeout so deadline tests run fast.
pub fn fast_thresholds(timeout_ms: u64) -> AdaptiveThresholds {
    AdaptiveThresholds {
        timeout_ms,
        min_timeout_ms: timeout_ms / 2,
        max_timeout_ms: timeout_ms * 5,
        ..CapabilityLevel::High.starter_thresholds()
    }
}

pub fn coordinator(url: &str) -> SessionCoordinator {
    coordinator_with(url, CapabilityLevel::High.starter_thresholds())
}

pub fn coordinator_with(url: &str, thresholds: AdaptiveThresholds) -> SessionCoordinator {
    let monitor = PerformanceMonitor::with_thresholds(
        CapabilityLevel::High.starter_profile(),
        thresholds,
    );
    SessionCoordinator::new(
        reqwest::Client::new(),
        url.to_string(),
        SharedMonitor::new(monitor),
        EventBus::new(),
    )
}

pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn names(events: &[SessionEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

/// Surface that remembers everything drawn on it.
#[derive(Default)]
pub struct RecordingSurface {
    pub text: String,
    pub typing: Vec<bool>,
    pub discards: usize,
    pub finished: Vec<StreamingStats>,
    pub errors: Vec<SessionError>,
}

impl RenderSurface for RecordingSurface {
    fn set_typing(&mut self, typing: bool) {
        self.typing.push(typing);
    }

    fn append_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn discard_partial(&mut self) {
        self.discards += 1;
        self.text.clear();
    }

    fn finish(&mut self, stats: &StreamingStats) {
        self.finished.push(stats.clone());
    }

    fn show_error(&mut self, error: &SessionError) {
        self.errors.push(error.clone());
    }
}
