//! Configuration types for nlrpc.

use std::time::Duration;

use crate::transport::NamespaceId;

/// Client configuration.
///
/// The timeout, retry, wait-label, and interruptibility knobs are only the
/// initial values; all four can be changed at runtime through the client's
/// control interface.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-attempt wait bound. `None` disables the bound entirely, which is
    /// an explicit opt-in: such a call can only be unblocked by a reply,
    /// `close()`, or an interrupt.
    /// Default: 30 seconds.
    pub timeout: Option<Duration>,
    /// Number of automatic retries after the first attempt times out.
    /// Default: 3
    pub retries: u32,
    /// Diagnostic label naming the wait channel in traces.
    /// Default: "nlrpc"
    pub wait_label: String,
    /// Whether a waiting call can be unblocked by [`Client::interrupt`].
    /// Default: false
    ///
    /// [`Client::interrupt`]: crate::client::Client::interrupt
    pub interruptible: bool,
    /// Network-namespace identity captured into every call issued on the
    /// client. Replies are matched against it so they never cross tenant
    /// boundaries even when group and xid collide numerically.
    /// Default: [`NamespaceId::GLOBAL`]
    pub namespace: NamespaceId,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            retries: 3,
            wait_label: "nlrpc".to_string(),
            interruptible: false,
            namespace: NamespaceId::GLOBAL,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-attempt timeout. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry count.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the diagnostic wait-channel label.
    pub fn with_wait_label(mut self, label: impl Into<String>) -> Self {
        self.wait_label = label.into();
        self
    }

    /// Enable or disable interruptible waits.
    pub fn with_interruptible(mut self, interruptible: bool) -> Self {
        self.interruptible = interruptible;
        self
    }

    /// Set the namespace identity.
    pub fn with_namespace(mut self, namespace: NamespaceId) -> Self {
        self.namespace = namespace;
        self
    }
}

/// Per-call overrides for [`Client::call_with`].
///
/// [`Client::call_with`]: crate::client::Client::call_with
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Caps the total elapsed time of this call across every attempt,
    /// retries included. The client's configured timeout still bounds each
    /// individual wait, so retransmission keeps its usual cadence up to the
    /// cap.
    pub deadline: Option<Duration>,
    /// Expected wire-buffer length supplied by an auxiliary per-call context.
    /// When absent, the buffer is sized from the precomputed header length,
    /// the authentication-probe length, and the argument length.
    pub size_hint: Option<usize>,
}

impl CallOptions {
    /// Create empty options (use the client's configured knobs).
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the total elapsed time of this call.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the expected wire-buffer length.
    pub fn with_size_hint(mut self, size_hint: usize) -> Self {
        self.size_hint = Some(size_hint);
        self
    }
}
