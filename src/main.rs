use std::sync::Arc;

use clap::Parser;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

mod chat;
mod config;
mod constants;
mod error;
mod events;
mod http;
mod logging;
mod monitor;
mod render;
mod session;
mod storage;
mod streaming;

use crate::chat::ChatClient;
use crate::constants::CONVERSATION_FILE;
use crate::events::{EventBus, SessionEvent};
use crate::logging::{LogConfig, setup_logging};
use crate::monitor::{CapabilityProfile, HostInfo, PerformanceMonitor, SharedMonitor};
use crate::render::TerminalSurface;
use crate::session::{RetryPolicy, SessionCoordinator, StreamMode};
use crate::storage::ConversationStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::Config::parse();

    config::validate_config(&cfg)?;

    setup_logging(&cfg.log_level)?;

    let debug_enabled =
        cfg.log_level.eq_ignore_ascii_case("debug") || cfg.log_level.eq_ignore_ascii_case("trace");
    LogConfig::init(debug_enabled);

    config::init_runtime_config(config::RuntimeConfig {
        max_buffer_size: cfg.max_buffer_size,
        enable_chunk_recovery: cfg.enable_chunk_recovery,
    });

    let host = HostInfo::detect(Some(&cfg.connection_type));
    let mut profile = CapabilityProfile::estimate(&host);
    if let Some(level) = cfg.capability {
        log::info!("capability forced to {}", level.as_str());
        profile = profile.with_level(level);
    }
    let monitor = SharedMonitor::new(PerformanceMonitor::new(profile));

    let shutdown = CancellationToken::new();
    let optimizer =
        crate::monitor::spawn_optimizer(monitor.clone(), cfg.optimize_interval, shutdown.clone());

    let bus = EventBus::new();
    let status_lines = spawn_status_lines(&bus, shutdown.clone());

    let state_dir = cfg
        .state_dir
        .clone()
        .unwrap_or_else(storage::default_state_directory);
    let store = ConversationStore::load(state_dir.join(CONVERSATION_FILE))?;

    let coordinator = Arc::new(SessionCoordinator::new(
        http::build_http_client()?,
        cfg.chat_url(),
        monitor,
        bus,
    ));
    let preferred_mode = if cfg.standard {
        StreamMode::Standard
    } else {
        StreamMode::Streaming
    };
    let client = ChatClient::new(
        coordinator,
        RetryPolicy::new(cfg.max_attempts, cfg.retry_delay),
        store,
        preferred_mode,
    );

    if LogConfig::get().debug_enabled {
        log::info!("synapse-stream {} (debug mode)", VERSION);
    } else {
        log::info!("synapse-stream {}", VERSION);
    }
    log::info!("Synapse backend: {}", cfg.chat_url());
    log::info!("conversation: {}", state_dir.join(CONVERSATION_FILE).display());

    let mut surface = TerminalSurface::new(true);
    let result = match cfg.prompt.as_deref() {
        Some(prompt) => {
            let interrupt = chat::InterruptGuard::arm();
            client
                .send_message(prompt, &mut surface, interrupt.token())
                .await
                .map(|_| ())
        }
        None => chat::run_interactive(&client, &mut surface).await,
    };

    shutdown.cancel();
    if let Err(e) = optimizer.await {
        log::debug!("threshold optimizer ended abnormally: {}", e);
    }
    if let Err(e) = status_lines.await {
        log::debug!("status line task ended abnormally: {}", e);
    }

    result?;
    Ok(())
}

/// Prints informational notifications as dim status lines on stderr.
fn spawn_status_lines(
    bus: &EventBus,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut events = BroadcastStream::new(bus.subscribe());
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.next() => event,
            };
            match event {
                Some(Ok(event)) => {
                    if let Some(line) = status_line(&event) {
                        eprintln!("\r\x1b[2K\x1b[2m{}\x1b[0m", line);
                    }
                }
                Some(Err(e)) => log::debug!("status lines lagged: {}", e),
                None => break,
            }
        }
    })
}

fn status_line(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::Progress { message, .. } => Some(message.clone()),
        SessionEvent::SlowChunk { latency_ms, .. } => {
            Some(format!(
                "(slow connection: {:.1}s since the last update)",
                *latency_ms as f64 / 1000.0
            ))
        }
        SessionEvent::SlowResponse { speed, .. } => Some(format!("(response was {:?})", speed)),
        SessionEvent::Retrying {
            attempt,
            max_attempts,
            delay_ms,
        } => Some(format!(
            "attempt {}/{} failed, retrying in {:.1}s",
            attempt,
            max_attempts,
            *delay_ms as f64 / 1000.0
        )),
        SessionEvent::FallingBack { reason } => Some(format!(
            "streaming unavailable ({}), switching to standard mode",
            reason.as_str()
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests;
