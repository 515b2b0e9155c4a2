//! Named-event emitter owned by every [`Context`](crate::Context).
//!
//! Listeners are plain synchronous callbacks keyed by event name. `emit`
//! snapshots the listener list before calling out, so a listener may
//! register further listeners without deadlocking.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::cancel::panic_message;
use crate::error::{Error, Result};

/// Emitted just before a context clears its request-scoped state.
pub const DISPOSE: &str = "context.dispose";

/// Emitted when the response body is ended. The detail is the body length.
pub const RESPONSE_FINISH: &str = "response.finish";

type Listener = Arc<dyn Fn(&str) + Send + Sync + 'static>;

/// `None` once closed.
type Table = Option<HashMap<String, Vec<Listener>>>;

pub struct Events {
    listeners: Mutex<Table>,
}

impl Default for Events {
    fn default() -> Self {
        Self { listeners: Mutex::new(Some(HashMap::new())) }
    }
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `listener` for `event`. Listeners receive the emitted detail.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] once the emitter has been closed, which happens
    /// when its context is disposed.
    pub fn on<F>(&self, event: &str, listener: F) -> Result<()>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let mut table = self.listeners.lock();
        let table = table.as_mut().ok_or(Error::Disposed)?;
        table.entry(event.to_owned()).or_default().push(Arc::new(listener));
        Ok(())
    }

    /// Calls every listener of `event` in registration order and returns how
    /// many ran. A panicking listener is logged and skipped.
    pub fn emit(&self, event: &str, detail: &str) -> usize {
        let snapshot = match self.listeners.lock().as_ref().and_then(|t| t.get(event)) {
            Some(list) => list.clone(),
            None => return 0,
        };

        for listener in &snapshot {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(detail))) {
                error!(event, panic = panic_message(&*payload), "event listener panicked");
            }
        }
        snapshot.len()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .lock()
            .as_ref()
            .and_then(|t| t.get(event))
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.listeners
            .lock()
            .as_ref()
            .is_none_or(|t| t.values().all(Vec::is_empty))
    }

    pub fn is_closed(&self) -> bool {
        self.listeners.lock().is_none()
    }

    /// Drops every listener and refuses new ones.
    pub fn close(&self) {
        *self.listeners.lock() = None;
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock();
        let Some(table) = listeners.as_ref() else {
            return f.write_str("Events(closed)");
        };
        f.debug_map()
            .entries(table.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_reaches_listeners_of_that_event_only() {
        let events = Events::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        events.on("a", move |detail| s.lock().push(format!("a:{detail}"))).unwrap();
        let s = Arc::clone(&seen);
        events.on("b", move |detail| s.lock().push(format!("b:{detail}"))).unwrap();

        assert_eq!(events.emit("a", "1"), 1);
        assert_eq!(events.emit("missing", "2"), 0);
        assert_eq!(*seen.lock(), vec!["a:1".to_owned()]);
    }

    #[test]
    fn panicking_listener_does_not_stop_the_rest() {
        let events = Events::new();
        let hits = Arc::new(Mutex::new(0));
        events.on("e", |_| panic!("boom")).unwrap();
        let h = Arc::clone(&hits);
        events.on("e", move |_| *h.lock() += 1).unwrap();

        assert_eq!(events.emit("e", ""), 2);
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn close_empties_the_emitter_and_refuses_listeners() {
        let events = Events::new();
        assert!(events.is_empty());
        events.on("e", |_| {}).unwrap();
        assert_eq!(events.listener_count("e"), 1);

        events.close();
        assert!(events.is_closed());
        assert!(events.is_empty());
        assert_eq!(events.emit("e", ""), 0);
        assert!(matches!(events.on("e", |_| {}), Err(Error::Disposed)));
        assert_eq!(events.listener_count("e"), 0);
    }
}
