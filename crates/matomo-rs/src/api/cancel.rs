//! Cooperative cancellation for outbound calls.
//!
//! A [`CancelToken`] is handed in by the caller. The client combines it with
//! its own request timer into a [`CancelScope`], which exposes a single
//! observation point: [`CancelScope::aborted`] resolves with whichever source
//! fired first.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Externally controlled cancellation signal. Cloning shares the signal.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Cancel with a reason. Only the first reason is kept.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
            true
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Resolve once the token is cancelled, yielding the reason.
    pub async fn cancelled(&self) -> String {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as `self`; unreachable in practice.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Why a [`CancelScope`] fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The scope's own timer elapsed.
    TimedOut(Duration),
    /// The caller's token was cancelled with this reason.
    External(String),
}

/// A timer and an optional external token, observed as one signal.
#[derive(Debug, Clone)]
pub struct CancelScope {
    timeout: Option<Duration>,
    external: Option<CancelToken>,
}

impl CancelScope {
    pub fn new(timeout: Option<Duration>, external: Option<CancelToken>) -> Self {
        Self { timeout, external }
    }

    /// Whether anything can ever fire this scope.
    pub fn is_armed(&self) -> bool {
        self.timeout.is_some() || self.external.is_some()
    }

    /// Resolve with the first abort source to fire. Never resolves for an
    /// unarmed scope.
    pub async fn aborted(&self) -> AbortReason {
        // Already-cancelled tokens win over the timer.
        if let Some(reason) = self.external.as_ref().and_then(CancelToken::reason) {
            return AbortReason::External(reason);
        }

        let timer = async {
            match self.timeout {
                Some(d) => {
                    tokio::time::sleep(d).await;
                    d
                }
                None => std::future::pending().await,
            }
        };
        let external = async {
            match &self.external {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            reason = external => AbortReason::External(reason),
            d = timer => AbortReason::TimedOut(d),
        }
    }

    /// Run `fut` until it completes or the scope fires.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, AbortReason> {
        if !self.is_armed() {
            return Ok(fut.await);
        }
        tokio::select! {
            biased;
            reason = self.aborted() => Err(reason),
            out = fut => Ok(out),
        }
    }
}
