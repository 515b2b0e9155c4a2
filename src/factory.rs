//! Context factory.
//!
//! The factory is the single authority on what a valid context looks like:
//! every context it hands out has all request-scoped fields populated, a
//! fresh cancellation source, an empty event emitter and a sequence number
//! no earlier context from the same factory has carried.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::context::{Context, Fields};

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Values a fresh context starts with.
///
/// ```rust
/// use strand::{Defaults, Factory};
///
/// let factory = Factory::with_defaults(
///     Defaults::default().scheme("https").host("api.internal"),
/// );
/// let ctx = factory.create_context();
/// assert_eq!(ctx.scheme().as_deref(), Some("https"));
/// ```
#[derive(Clone, Debug)]
pub struct Defaults {
    scheme: String,
    protocol: String,
    host: String,
    path_base: String,
}

impl Defaults {
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn path_base(mut self, path_base: impl Into<String>) -> Self {
        self.path_base = path_base.into();
        self
    }

    fn fields(&self) -> Fields {
        Fields {
            scheme: self.scheme.clone(),
            protocol: self.protocol.clone(),
            host: self.host.clone(),
            path_base: self.path_base.clone(),
            ..Fields::default()
        }
    }
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            scheme: "http".to_owned(),
            protocol: "HTTP/1.1".to_owned(),
            host: String::new(),
            path_base: String::new(),
        }
    }
}

// ── Factory ───────────────────────────────────────────────────────────────────

/// Issues contexts with strictly increasing sequence numbers.
///
/// The counter is per factory, so independent factories (one per server,
/// one per test) never interfere with each other.
#[derive(Debug)]
pub struct Factory {
    last_seq: AtomicU64,
    defaults: Defaults,
}

impl Factory {
    pub fn new() -> Self {
        Self::with_defaults(Defaults::default())
    }

    pub fn with_defaults(defaults: Defaults) -> Self {
        Self { last_seq: AtomicU64::new(0), defaults }
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    /// Creates a fully populated context.
    pub fn create_context(&self) -> Context {
        let seq = self.last_seq.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(seq, "context created");
        Context::new(seq, self.defaults.fields())
    }
}

impl Default for Factory {
    fn default() -> Self { Self::new() }
}
