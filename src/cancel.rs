//! Cooperative cancellation.
//!
//! A [`CancellationTokenSource`] owns the right to cancel; the
//! [`CancellationToken`] it hands out is a read-only view that anyone can
//! clone, poll, or register listeners on.
//!
//! ```text
//! source.cancel(reason)
//!        ↓  first call only: store reason
//! state lock released
//!        ↓  one drain worker per token: tokio::spawn (or a helper thread)
//! listener_0(&reason) → listener_1(&reason) → …   ← registration order
//! ```
//!
//! Listeners registered after cancellation join the same queue, so they
//! run after every listener registered before them, never concurrently.
//!
//! Cancellation never aborts anything by itself. Handlers poll
//! [`CancellationToken::is_cancelled`], register a listener, or await
//! [`CancellationToken::cancelled`] and unwind on their own.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error};

// ── CancelReason ──────────────────────────────────────────────────────────────

/// Why a token was cancelled. Delivered to every listener.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CancelReason {
    /// The owning context was disposed.
    Disposed,
    /// The transport peer went away.
    Disconnect,
    /// A timer paired with the source fired.
    Timeout,
    Custom(String),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disposed   => f.write_str("disposed"),
            Self::Disconnect => f.write_str("disconnect"),
            Self::Timeout    => f.write_str("timeout"),
            Self::Custom(s)  => f.write_str(s),
        }
    }
}

impl From<&str> for CancelReason {
    fn from(s: &str) -> Self {
        Self::Custom(s.to_owned())
    }
}

impl From<String> for CancelReason {
    fn from(s: String) -> Self {
        Self::Custom(s)
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

type Listener = Box<dyn FnOnce(&CancelReason) + Send + 'static>;

#[derive(Default)]
struct State {
    /// `Some` once cancelled. Never overwritten afterwards.
    reason: Option<CancelReason>,
    /// Pending listeners, in registration order.
    listeners: VecDeque<Listener>,
    /// `true` while a worker is draining `listeners`.
    delivering: bool,
}

impl State {
    /// Claims the drain worker slot if there is work and no worker yet.
    fn claim_delivery(&mut self) -> bool {
        if self.delivering || self.reason.is_none() || self.listeners.is_empty() {
            return false;
        }
        self.delivering = true;
        true
    }
}

// ── CancellationToken ─────────────────────────────────────────────────────────

/// Read-only view of a cancellation signal.
///
/// Clones share state with each other and with the issuing source.
#[derive(Clone, Default)]
pub struct CancellationToken {
    state: Arc<Mutex<State>>,
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().reason.is_some()
    }

    /// The reason passed to the first `cancel` call, if any.
    pub fn reason(&self) -> Option<CancelReason> {
        self.state.lock().reason.clone()
    }

    /// Registers `listener` to run once with the cancellation reason.
    ///
    /// If the token is already cancelled the listener is scheduled right
    /// away with the stored reason. Either way it runs asynchronously, never
    /// inline with this call.
    pub fn on_cancelled<F>(&self, listener: F)
    where
        F: FnOnce(&CancelReason) + Send + 'static,
    {
        let start = {
            let mut state = self.state.lock();
            state.listeners.push_back(Box::new(listener));
            state.claim_delivery()
        };
        if start {
            schedule(Arc::clone(&self.state));
        }
    }

    /// Resolves with the reason once the token is cancelled.
    pub async fn cancelled(&self) -> CancelReason {
        let (tx, rx) = oneshot::channel();
        self.on_cancelled(move |reason| {
            let _ = tx.send(reason.clone());
        });
        match rx.await {
            Ok(reason) => reason,
            // The listener was dropped unfired (runtime shutting down).
            Err(_) => std::future::pending().await,
        }
    }

    /// Returns `true` if both handles observe the same signal.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("reason", &self.reason())
            .finish()
    }
}

// ── CancellationTokenSource ───────────────────────────────────────────────────

/// The only handle allowed to trigger cancellation.
#[derive(Debug, Default)]
pub struct CancellationTokenSource {
    token: CancellationToken,
}

impl CancellationTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// The token tied to this source. Always the same underlying signal.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels the token and schedules every registered listener.
    ///
    /// Only the first call has any effect; later calls keep the original
    /// reason, notify nobody, and return `false`.
    pub fn cancel(&self, reason: impl Into<CancelReason>) -> bool {
        let reason = reason.into();
        let (pending, start) = {
            let mut state = self.token.state.lock();
            if state.reason.is_some() {
                return false;
            }
            state.reason = Some(reason.clone());
            (state.listeners.len(), state.claim_delivery())
        };

        debug!(%reason, listeners = pending, "cancelled");
        if start {
            schedule(Arc::clone(&self.token.state));
        }
        true
    }
}

// ── Listener delivery ─────────────────────────────────────────────────────────

/// Starts the drain worker. The caller must have claimed the worker slot.
fn schedule(state: Arc<Mutex<State>>) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move { drain(&state) });
        return;
    }

    let worker = Arc::clone(&state);
    let spawned = std::thread::Builder::new()
        .name("strand-cancel".into())
        .spawn(move || drain(&worker));
    if let Err(e) = spawned {
        error!("failed to spawn cancellation thread, delivering inline: {e}");
        drain(&state);
    }
}

/// Runs queued listeners one at a time until the queue is empty, then
/// releases the worker slot under the same lock that producers push under.
fn drain(state: &Mutex<State>) {
    loop {
        let (listener, reason) = {
            let mut guard = state.lock();
            match (guard.listeners.pop_front(), guard.reason.clone()) {
                (Some(listener), Some(reason)) => (listener, reason),
                (listener, _) => {
                    if let Some(listener) = listener {
                        guard.listeners.push_front(listener);
                    }
                    guard.delivering = false;
                    return;
                }
            }
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(&reason))) {
            error!(%reason, panic = panic_message(&*payload), "cancellation listener panicked");
        }
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[test]
    fn starts_uncancelled() {
        let source = CancellationTokenSource::new();
        assert!(!source.is_cancelled());
        assert!(!source.token().is_cancelled());
        assert_eq!(source.token().reason(), None);
    }

    #[test]
    fn token_identity_is_stable() {
        let source = CancellationTokenSource::new();
        let a = source.token().clone();
        assert!(a.ptr_eq(source.token()));
        assert!(source.token().ptr_eq(source.token()));
        assert!(!a.ptr_eq(CancellationTokenSource::new().token()));
    }

    #[tokio::test]
    async fn listener_receives_reason_once_after_cancel_returns() {
        let source = CancellationTokenSource::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        source.token().on_cancelled(move |reason| {
            tx.send(reason.clone()).unwrap();
        });

        assert!(source.cancel("X"));
        assert!(source.is_cancelled());
        assert!(source.token().is_cancelled());
        // Delivery is deferred to a spawned task.
        assert!(rx.try_recv().is_err());

        assert_eq!(rx.recv().await, Some(CancelReason::from("X")));
        // Sender was consumed with the listener.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn second_cancel_is_a_no_op() {
        let source = CancellationTokenSource::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        source.token().on_cancelled(move |reason| {
            tx.send(reason.clone()).unwrap();
        });

        assert!(source.cancel("X"));
        assert!(!source.cancel("Y"));
        assert_eq!(source.token().reason(), Some(CancelReason::from("X")));

        assert_eq!(rx.recv().await, Some(CancelReason::from("X")));
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_listener_still_fires_asynchronously() {
        let source = CancellationTokenSource::new();
        source.cancel(CancelReason::Disconnect);

        let (tx, mut rx) = mpsc::unbounded_channel();
        source.token().on_cancelled(move |reason| {
            tx.send(reason.clone()).unwrap();
        });
        assert!(rx.try_recv().is_err());
        assert_eq!(rx.recv().await, Some(CancelReason::Disconnect));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn listeners_run_in_registration_order() {
        let source = CancellationTokenSource::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            source.token().on_cancelled(move |_| seen.lock().push(i));
        }
        let token = source.token().clone();
        source.cancel(CancelReason::Timeout);
        assert_eq!(token.cancelled().await, CancelReason::Timeout);
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn panicking_listener_is_isolated() {
        let source = CancellationTokenSource::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        source.token().on_cancelled(|_| panic!("listener failure"));
        source.token().on_cancelled(move |reason| {
            tx.send(reason.clone()).unwrap();
        });

        assert!(source.cancel("X"));
        assert_eq!(rx.recv().await, Some(CancelReason::from("X")));
        assert!(source.is_cancelled());
        assert_eq!(source.token().reason(), Some(CancelReason::from("X")));
    }

    #[test]
    fn cancel_with_zero_listeners() {
        let source = CancellationTokenSource::new();
        assert!(source.cancel(CancelReason::Disposed));
        assert!(source.token().is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn late_listener_waits_for_earlier_ones() {
        for _ in 0..10 {
            let source = CancellationTokenSource::new();
            let seen = Arc::new(Mutex::new(Vec::new()));

            let s = Arc::clone(&seen);
            source.token().on_cancelled(move |_| {
                std::thread::sleep(Duration::from_millis(20));
                s.lock().push("early");
            });
            source.cancel("X");

            let (tx, rx) = oneshot::channel();
            let s = Arc::clone(&seen);
            source.token().on_cancelled(move |_| {
                s.lock().push("late");
                let _ = tx.send(());
            });

            rx.await.unwrap();
            assert_eq!(*seen.lock(), vec!["early", "late"]);
        }
    }

    #[test]
    fn late_listeners_keep_order_without_a_runtime() {
        let source = CancellationTokenSource::new();
        source.cancel("offline");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = std::sync::mpsc::channel();
        for i in 0..50 {
            let seen = Arc::clone(&seen);
            let tx = tx.clone();
            source.token().on_cancelled(move |_| {
                seen.lock().push(i);
                tx.send(()).unwrap();
            });
        }
        for _ in 0..50 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn delivers_without_a_runtime() {
        let source = CancellationTokenSource::new();
        let (tx, rx) = std::sync::mpsc::channel();
        source.token().on_cancelled(move |reason| {
            tx.send(reason.clone()).unwrap();
        });
        source.cancel("offline");
        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, CancelReason::from("offline"));
    }
}
