//! Resilient streaming session
//!
//! A [`StreamSession`] owns exactly one background task that keeps a price or
//! transaction subscription open. Any failure, including the venue closing the
//! stream, is logged and followed by a reconnect after the policy's delay.
//! [`StreamSession::stop`] waits for the task to exit, so no callback runs
//! after it returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::clients::StreamConnector;
use crate::core::reconnect::ReconnectPolicy;
use crate::core::types::{StreamMessage, StreamTarget};
use crate::error::{TradingError, TradingResult};

/// Side-effecting message handler run on the session's task
pub type MessageHandler = Box<dyn FnMut(StreamMessage) + Send + 'static>;

/// Default handler: log every message
pub fn log_message(message: StreamMessage) {
    match &message {
        StreamMessage::Heartbeat { .. } => tracing::debug!("💓 {:?}", message),
        _ => info!("📨 {:?}", message),
    }
}

pub struct StreamSession {
    connector: Arc<dyn StreamConnector>,
    target: StreamTarget,
    policy: ReconnectPolicy,
    running: Arc<AtomicBool>,
    shutdown: Option<watch::Sender<bool>>,
    worker: Option<JoinHandle<()>>,
}

impl StreamSession {
    pub fn new(connector: Arc<dyn StreamConnector>, target: StreamTarget, policy: ReconnectPolicy) -> Self {
        Self {
            connector,
            target,
            policy,
            running: Arc::new(AtomicBool::new(false)),
            shutdown: None,
            worker: None,
        }
    }

    pub fn target(&self) -> &StreamTarget {
        &self.target
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the background task. Fails if this session is already running.
    pub fn start<F>(&mut self, on_message: F) -> TradingResult<()>
    where
        F: FnMut(StreamMessage) + Send + 'static,
    {
        if self.worker.is_some() {
            return Err(TradingError::Stream(format!("{} stream already running", self.target)));
        }

        let (tx, rx) = watch::channel(false);
        self.running.store(true, Ordering::SeqCst);

        let worker = tokio::spawn(run_worker(
            Arc::clone(&self.connector),
            self.target.clone(),
            self.policy,
            Arc::clone(&self.running),
            rx,
            Box::new(on_message),
        ));

        self.shutdown = Some(tx);
        self.worker = Some(worker);
        info!("🚀 Stream started: {}", self.target);
        Ok(())
    }

    /// Clear the running flag and wait for the task to finish
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!("Stream worker for {} ended abnormally: {}", self.target, e);
            }
            info!("🛑 Stream stopped: {}", self.target);
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn run_worker(
    connector: Arc<dyn StreamConnector>,
    target: StreamTarget,
    policy: ReconnectPolicy,
    running: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
    mut on_message: MessageHandler,
) {
    let mut delay = policy.initial_delay();

    while running.load(Ordering::SeqCst) {
        let (delivered, err) = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            outcome = consume(connector.as_ref(), &target, &running, &mut on_message) => outcome,
        };

        if !running.load(Ordering::SeqCst) {
            break;
        }
        if delivered {
            delay = policy.initial_delay();
        }

        error!("❌ Stream error on {}: {}. Reconnecting in {:?}", target, err, delay);
        if sleep_or_shutdown(delay, &mut shutdown).await {
            break;
        }
        delay = policy.next_delay(delay);
    }
}

/// Open one subscription and feed it to the handler until it fails.
/// Returns whether anything was delivered and why the subscription ended.
async fn consume(
    connector: &dyn StreamConnector,
    target: &StreamTarget,
    running: &AtomicBool,
    on_message: &mut MessageHandler,
) -> (bool, TradingError) {
    let mut stream = match connector.open(target).await {
        Ok(stream) => stream,
        Err(e) => return (false, e),
    };

    let mut delivered = false;
    while let Some(item) = stream.next().await {
        if !running.load(Ordering::SeqCst) {
            return (delivered, TradingError::Stream("session stopped".to_string()));
        }
        match item {
            Ok(message) => {
                on_message(message);
                delivered = true;
            }
            Err(e) => return (delivered, e),
        }
    }

    (delivered, TradingError::Stream(format!("{} stream closed by venue", target)))
}

/// Sleep for `delay`; true if shutdown was signalled first
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
