//! The RPC client instance and its synchronous call engine.
//!
//! One `Client` owns one transport group for its lifetime. Calls are
//! synchronous: the issuing thread builds the frame, publishes it, and blocks
//! on the pending record until the demultiplexer delivers a reply, the wait
//! times out, or the client is torn down. The instance lock is never held
//! across the wait or across a publish; the xid counter is an atomic updated
//! independently of the lock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use slab::Slab;
use tracing::{debug, trace};

use crate::auth::Auth;
use crate::config::{CallOptions, ClientConfig};
use crate::error::{Error, RecvCause, RejectCause, Result};
use crate::registry::Registry;
use crate::transport::{Bus, NamespaceId};
use crate::wire;
use crate::xdr::{self, AcceptedStat, CallHeader, ReplyBody, XdrEncoder};

/// Terminal state of one call attempt. Transitions away from `Pending`
/// exactly once, under the instance lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallOutcome {
    /// Still waiting; the sentinel a fresh record starts with.
    Pending,
    /// The demultiplexer attached a payload.
    Delivered,
    /// The client was closed under the waiter.
    Shutdown,
    /// The waiter was interrupted.
    Interrupted,
}

/// One in-flight call attempt. Linked into the owning client's pending set
/// right before transmission and unlinked by the waiter regardless of how
/// the wait ends; a retry creates a new record with a new xid.
pub(crate) struct PendingCall {
    pub(crate) xid: u32,
    pub(crate) namespace: NamespaceId,
    pub(crate) outcome: CallOutcome,
    /// Reply bytes; ownership moves to the awakened waiter.
    pub(crate) payload: Option<Vec<u8>>,
    pub(crate) cond: Arc<Condvar>,
}

/// Mutable per-client state, all guarded by the instance lock.
pub(crate) struct ClientState {
    pub(crate) pending: Slab<PendingCall>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retries: u32,
    pub(crate) wait_label: String,
    pub(crate) interruptible: bool,
    pub(crate) closed: bool,
}

/// The part of a client shared with the registry for reply dispatch.
pub(crate) struct ClientCore {
    pub(crate) group: u32,
    pub(crate) state: Mutex<ClientState>,
}

/// A synchronous RPC client bound to one transport group.
pub struct Client {
    core: Arc<ClientCore>,
    registry: Arc<Registry>,
    bus: Arc<dyn Bus>,
    auth: Arc<dyn Auth>,
    group: u32,
    namespace: NamespaceId,
    xid: AtomicU32,
    /// Pre-serialized call header (xid placeholder through version).
    call_header: Vec<u8>,
    /// Measured length of an empty-credential marshal, for buffer sizing.
    auth_probe_len: usize,
}

impl Client {
    /// Create a client for `service`, bound to a fresh transport group and
    /// registered for reply dispatch.
    pub fn new(
        registry: Arc<Registry>,
        bus: Arc<dyn Bus>,
        service: &str,
        prog: u32,
        vers: u32,
        auth: Arc<dyn Auth>,
        config: ClientConfig,
    ) -> Result<Self> {
        let group = bus.register_group(service).map_err(|err| {
            debug!(service, %err, "bus cannot allocate a group");
            Error::GroupExhausted
        })?;

        // Seed the xid counter from the clock so xids do not repeat across
        // client lifetimes within one boot.
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let seed = (now.as_secs() as u32) ^ now.subsec_nanos();

        let mut enc = XdrEncoder::with_capacity(xdr::CALL_HEADER_LEN);
        CallHeader { xid: 0, prog, vers }.encode(&mut enc);
        let call_header = enc.into_bytes();

        // Measure the empty-credential marshal once; every later buffer is
        // sized without re-deriving it.
        let mut probe = XdrEncoder::new();
        auth.marshal(0, &mut probe, &[]).map_err(|_| {
            bus.unregister_group(group);
            Error::CannotEncodeArgs
        })?;
        let auth_probe_len = probe.len();

        let core = Arc::new(ClientCore {
            group,
            state: Mutex::new(ClientState {
                pending: Slab::new(),
                timeout: config.timeout,
                retries: config.retries,
                wait_label: config.wait_label,
                interruptible: config.interruptible,
                closed: false,
            }),
        });
        registry.insert(group, core.clone());

        Ok(Self {
            core,
            registry,
            bus,
            auth,
            group,
            namespace: config.namespace,
            xid: AtomicU32::new(seed),
            call_header,
            auth_probe_len,
        })
    }

    /// The transport group this client owns.
    #[inline]
    pub fn group(&self) -> u32 {
        self.group
    }

    /// Number of calls currently in flight.
    pub fn pending_calls(&self) -> usize {
        self.core.state.lock().pending.len()
    }

    /// Issue one synchronous call with the configured knobs.
    pub fn call(&self, proc_id: u32, args: &[u8]) -> Result<Vec<u8>> {
        self.call_with(proc_id, args, CallOptions::default())
    }

    /// Issue one synchronous call with per-call overrides.
    pub fn call_with(&self, proc_id: u32, args: &[u8], opts: CallOptions) -> Result<Vec<u8>> {
        let (timeout, retries, label) = {
            let state = self.core.state.lock();
            if state.closed {
                return Err(Error::CannotReceive(RecvCause::Shutdown));
            }
            (state.timeout, state.retries, state.wait_label.clone())
        };
        // The per-call deadline caps total elapsed time across every attempt;
        // the configured timeout still bounds each individual wait.
        let overall = opts.deadline.map(|d| Instant::now() + d);

        let attempts = retries.saturating_add(1);
        for attempt in 0..attempts {
            let xid = self.next_xid();
            let body = self.encode_call(xid, proc_id, args, &opts)?;
            let frame = wire::build_request(self.group, xid, &body).map_err(|err| {
                debug!(%err, "call body exceeds frame bounds");
                Error::CannotEncodeArgs
            })?;

            // Link the record before transmission so a fast reply cannot
            // race the waiter.
            let cond = Arc::new(Condvar::new());
            let key = {
                let mut state = self.core.state.lock();
                if state.closed {
                    return Err(Error::CannotReceive(RecvCause::Shutdown));
                }
                debug_assert!(
                    state.pending.iter().all(|(_, call)| call.xid != xid),
                    "xid {} reused while pending",
                    xid
                );
                state.pending.insert(PendingCall {
                    xid,
                    namespace: self.namespace,
                    outcome: CallOutcome::Pending,
                    payload: None,
                    cond: cond.clone(),
                })
            };

            trace!(label = %label, group = self.group, xid, attempt, "publishing call");
            if let Err(err) = self.bus.publish(self.group, xid, &frame) {
                self.unlink(key);
                return Err(Error::CannotSend(err));
            }

            let deadline = {
                let attempt_deadline = timeout.map(|t| Instant::now() + t);
                match (attempt_deadline, overall) {
                    (Some(a), Some(o)) => Some(a.min(o)),
                    (a, o) => a.or(o),
                }
            };
            self.wait(key, &cond, deadline);
            let record = self.unlink(key);
            match record.outcome {
                CallOutcome::Delivered => {
                    let payload = record.payload.unwrap_or_default();
                    return self.decode_reply(xid, &payload);
                }
                CallOutcome::Shutdown => {
                    return Err(Error::CannotReceive(RecvCause::Shutdown));
                }
                CallOutcome::Interrupted => {
                    return Err(Error::CannotReceive(RecvCause::Interrupted));
                }
                // Timed out; the xid is retired and the next attempt gets a
                // fresh record.
                CallOutcome::Pending => {
                    trace!(label = %label, xid, attempt, "call attempt timed out");
                    if overall.map_or(false, |o| Instant::now() >= o) {
                        return Err(Error::CannotReceive(RecvCause::Timeout));
                    }
                }
            }
        }

        Err(Error::CannotReceive(RecvCause::Timeout))
    }

    /// Serialize one call body: precomputed header, procedure id, then the
    /// authentication capability marshals credentials and appends the args.
    /// The xid is patched over the header's placeholder afterwards.
    fn encode_call(
        &self,
        xid: u32,
        proc_id: u32,
        args: &[u8],
        opts: &CallOptions,
    ) -> Result<Vec<u8>> {
        let capacity = opts
            .size_hint
            .unwrap_or(self.call_header.len() + 4 + self.auth_probe_len + args.len());
        let mut enc = XdrEncoder::with_capacity(capacity);
        enc.put_raw(&self.call_header);
        enc.put_u32(proc_id);
        self.auth
            .marshal(xid, &mut enc, args)
            .map_err(|_| Error::CannotEncodeArgs)?;
        let mut body = enc.into_bytes();
        xdr::patch_xid(&mut body, xid);
        Ok(body)
    }

    /// Block on a pending record until it leaves `Pending` or the deadline
    /// passes. The instance lock is released for the duration of the sleep.
    fn wait(&self, key: usize, cond: &Arc<Condvar>, deadline: Option<Instant>) {
        let mut state = self.core.state.lock();
        loop {
            match state.pending.get(key) {
                Some(call) if call.outcome == CallOutcome::Pending => {}
                _ => break,
            }
            match deadline {
                Some(deadline) => {
                    if cond.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => cond.wait(&mut state),
            }
        }
    }

    /// Remove a record from the pending set, whatever its outcome.
    fn unlink(&self, key: usize) -> PendingCall {
        self.core.state.lock().pending.remove(key)
    }

    /// Decode a delivered reply body: header, rejection translation, then
    /// verifier validation over the remaining bytes.
    fn decode_reply(&self, xid: u32, payload: &[u8]) -> Result<Vec<u8>> {
        let reply = xdr::decode_reply(payload)?;
        if reply.xid != xid {
            debug!(expected = xid, got = reply.xid, "reply body xid mismatch");
            return Err(Error::CannotDecodeResult);
        }
        match reply.body {
            ReplyBody::Denied(cause) => Err(Error::Rejected(cause)),
            ReplyBody::Accepted { verf, stat } => match stat {
                AcceptedStat::Success { results } => {
                    let mut results = results.to_vec();
                    if self.auth.validate(xid, &verf, &mut results) {
                        Ok(results)
                    } else {
                        Err(Error::AuthInvalid)
                    }
                }
                AcceptedStat::ProgUnavail => Err(Error::Rejected(RejectCause::ProgUnavail)),
                AcceptedStat::ProgMismatch { low, high } => {
                    Err(Error::Rejected(RejectCause::ProgMismatch { low, high }))
                }
                AcceptedStat::ProcUnavail => Err(Error::Rejected(RejectCause::ProcUnavail)),
                AcceptedStat::GarbageArgs => Err(Error::Rejected(RejectCause::GarbageArgs)),
                AcceptedStat::SystemErr => Err(Error::Rejected(RejectCause::SystemErr)),
            },
        }
    }

    #[inline]
    fn next_xid(&self) -> u32 {
        self.xid.fetch_add(1, Ordering::Relaxed)
    }

    /// Wake every outstanding call with a shutdown outcome and refuse new
    /// calls. Idempotent; safe to race with in-flight calls, which unlink
    /// their own records when they observe the outcome.
    pub fn close(&self) {
        let mut state = self.core.state.lock();
        state.closed = true;
        for (_, call) in state.pending.iter_mut() {
            if call.outcome == CallOutcome::Pending {
                call.outcome = CallOutcome::Shutdown;
                call.cond.notify_one();
            }
        }
    }

    /// Deliver an interrupt to every waiting call. Honored only when the
    /// interruptible knob is set; a no-op otherwise.
    pub fn interrupt(&self) {
        let mut state = self.core.state.lock();
        if !state.interruptible {
            return;
        }
        for (_, call) in state.pending.iter_mut() {
            if call.outcome == CallOutcome::Pending {
                call.outcome = CallOutcome::Interrupted;
                call.cond.notify_one();
            }
        }
    }

    /// Tear the client down. Every call must already have observed its
    /// terminal state; destroying a client with calls still pending is a
    /// programming error, not a recoverable condition.
    pub fn destroy(self) {
        drop(self);
    }

    // Control knobs. All reads and writes take the instance lock.

    /// Per-attempt timeout; `None` waits indefinitely.
    pub fn timeout(&self) -> Option<Duration> {
        self.core.state.lock().timeout
    }

    /// Set the per-attempt timeout.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.core.state.lock().timeout = timeout;
    }

    /// Retry budget after the first attempt.
    pub fn retries(&self) -> u32 {
        self.core.state.lock().retries
    }

    /// Set the retry budget.
    pub fn set_retries(&self, retries: u32) {
        self.core.state.lock().retries = retries;
    }

    /// Diagnostic wait-channel label.
    pub fn wait_label(&self) -> String {
        self.core.state.lock().wait_label.clone()
    }

    /// Set the diagnostic wait-channel label.
    pub fn set_wait_label(&self, label: impl Into<String>) {
        self.core.state.lock().wait_label = label.into();
    }

    /// Whether waits can be interrupted.
    pub fn interruptible(&self) -> bool {
        self.core.state.lock().interruptible
    }

    /// Enable or disable interruptible waits.
    pub fn set_interruptible(&self, interruptible: bool) {
        self.core.state.lock().interruptible = interruptible;
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let pending = self.core.state.lock().pending.len();
        assert!(
            pending == 0,
            "client for group {} destroyed with {} pending calls",
            self.group,
            pending
        );
        self.registry.remove(self.group);
        self.bus.unregister_group(self.group);
    }
}
