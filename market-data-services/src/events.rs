//! Bounded notification channel.
//!
//! Producers never block: when the queue is full the event is dropped and a
//! warning is logged. A single worker drains the queue in order.

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Provider-side events raised by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    Fallback {
        from: String,
        reason: String,
    },
    RateLimited {
        provider: String,
    },
    CircuitOpened {
        provider: String,
    },
    CircuitSkipped {
        provider: String,
    },
    Exhausted {
        operation: &'static str,
        symbol: String,
    },
    CacheFailure {
        operation: &'static str,
        message: String,
    },
}

impl fmt::Display for ProviderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderEvent::Fallback { from, reason } => {
                write!(f, "falling back from {}: {}", from, reason)
            }
            ProviderEvent::RateLimited { provider } => write!(f, "{} rate limited", provider),
            ProviderEvent::CircuitOpened { provider } => write!(f, "{} circuit opened", provider),
            ProviderEvent::CircuitSkipped { provider } => {
                write!(f, "{} skipped, circuit open", provider)
            }
            ProviderEvent::Exhausted { operation, symbol } => {
                write!(f, "all providers exhausted for {} {}", operation, symbol)
            }
            ProviderEvent::CacheFailure { operation, message } => {
                write!(f, "cache {} failed: {}", operation, message)
            }
        }
    }
}

#[derive(Debug)]
pub struct EventSender<E> {
    tx: mpsc::Sender<E>,
}

impl<E> Clone for EventSender<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E: fmt::Display> EventSender<E> {
    pub fn emit(&self, event: E) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!("Event queue full, dropping: {}", event);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

pub fn event_channel<E>(capacity: usize) -> (EventSender<E>, mpsc::Receiver<E>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx }, rx)
}

/// Drain `rx` into the log until every sender is dropped.
pub fn spawn_event_logger<E>(mut rx: mpsc::Receiver<E>, channel: &'static str) -> JoinHandle<()>
where
    E: fmt::Display + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            tracing::info!(channel, "{}", event);
        }
        tracing::debug!("Event logger for {} stopped", channel);
    })
}
