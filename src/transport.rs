//! The bus seam: what the client requires from the messaging layer, plus an
//! in-process loopback implementation.
//!
//! The real transport is a kernel-wide publish/subscribe bus addressed by
//! family and group, with privilege enforcement on both directions. The
//! client only needs the three operations in [`Bus`]; [`LoopbackBus`] models
//! them in memory for tests and same-process embedders, including the
//! privilege gate (as a deny switch) and group exhaustion.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Identity of the network namespace a call was issued from. Part of the
/// reply match key, so replies never cross tenant boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceId(pub u32);

impl NamespaceId {
    /// The default, unpartitioned namespace.
    pub const GLOBAL: NamespaceId = NamespaceId(0);
}

/// Transport multiplexer operations consumed by the client.
///
/// Privilege checks happen behind this trait; the call engine never
/// re-checks them.
pub trait Bus: Send + Sync {
    /// Allocate a fresh multicast group for `service`. Fails when the bus
    /// cannot allocate one (resource exhaustion).
    fn register_group(&self, service: &str) -> io::Result<u32>;

    /// Tear down a group. Late frames for it become strays.
    fn unregister_group(&self, group: u32);

    /// Publish `frame` addressed to `group`, tagged with `seq` as the bus's
    /// own sequence number. The bus borrows the frame only for the duration
    /// of this call.
    fn publish(&self, group: u32, seq: u32, frame: &[u8]) -> io::Result<()>;
}

/// One transmission recorded by the loopback bus.
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub group: u32,
    pub seq: u32,
    pub frame: Vec<u8>,
}

type FrameHandler = Box<dyn Fn(&SentFrame) + Send + Sync>;

/// In-process bus: hands every published frame to an optional handler on the
/// publishing thread and keeps a transcript for assertions.
pub struct LoopbackBus {
    next_group: AtomicU32,
    groups: Mutex<BTreeMap<u32, String>>,
    handler: Mutex<Option<FrameHandler>>,
    sent: Mutex<Vec<SentFrame>>,
    deny_publish: AtomicBool,
    group_limit: AtomicU32,
}

impl LoopbackBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_group: AtomicU32::new(1),
            groups: Mutex::new(BTreeMap::new()),
            handler: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            deny_publish: AtomicBool::new(false),
            group_limit: AtomicU32::new(u32::MAX),
        })
    }

    /// Install the frame handler (the "peer"). Invoked synchronously from
    /// `publish`, with no client lock held.
    pub fn set_handler(&self, handler: impl Fn(&SentFrame) + Send + Sync + 'static) {
        *self.handler.lock() = Some(Box::new(handler));
    }

    /// Remove the frame handler.
    pub fn clear_handler(&self) {
        *self.handler.lock() = None;
    }

    /// Snapshot of everything published so far.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().clone()
    }

    /// Number of frames published so far.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Model the privilege gate: when set, every publish fails.
    pub fn deny_publish(&self, deny: bool) {
        self.deny_publish.store(deny, Ordering::Relaxed);
    }

    /// Cap the number of live groups, to model bus exhaustion.
    pub fn set_group_limit(&self, limit: u32) {
        self.group_limit.store(limit, Ordering::Relaxed);
    }

    /// Whether `group` is currently registered.
    pub fn has_group(&self, group: u32) -> bool {
        self.groups.lock().contains_key(&group)
    }
}

impl Bus for LoopbackBus {
    fn register_group(&self, service: &str) -> io::Result<u32> {
        let mut groups = self.groups.lock();
        if groups.len() as u32 >= self.group_limit.load(Ordering::Relaxed) {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "group table exhausted",
            ));
        }
        let group = self.next_group.fetch_add(1, Ordering::Relaxed);
        groups.insert(group, service.to_string());
        Ok(group)
    }

    fn unregister_group(&self, group: u32) {
        self.groups.lock().remove(&group);
    }

    fn publish(&self, group: u32, seq: u32, frame: &[u8]) -> io::Result<()> {
        if self.deny_publish.load(Ordering::Relaxed) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "publish denied",
            ));
        }
        if !self.groups.lock().contains_key(&group) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such group"));
        }
        let sent = SentFrame {
            group,
            seq,
            frame: frame.to_vec(),
        };
        self.sent.lock().push(sent.clone());
        let handler = self.handler.lock();
        if let Some(handler) = handler.as_ref() {
            handler(&sent);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_allocation_is_fresh() {
        let bus = LoopbackBus::new();
        let a = bus.register_group("svc.a").unwrap();
        let b = bus.register_group("svc.b").unwrap();
        assert_ne!(a, b);
        assert!(bus.has_group(a));

        bus.unregister_group(a);
        assert!(!bus.has_group(a));
        // Group ids are never recycled.
        let c = bus.register_group("svc.c").unwrap();
        assert_ne!(c, a);
    }

    #[test]
    fn test_group_exhaustion() {
        let bus = LoopbackBus::new();
        bus.set_group_limit(1);
        bus.register_group("svc.a").unwrap();
        assert!(bus.register_group("svc.b").is_err());
    }

    #[test]
    fn test_publish_records_and_dispatches() {
        let bus = LoopbackBus::new();
        let group = bus.register_group("svc").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_handler = seen.clone();
        bus.set_handler(move |frame| {
            seen_in_handler.lock().push(frame.seq);
        });

        bus.publish(group, 10, b"frame").unwrap();
        bus.publish(group, 11, b"frame").unwrap();

        assert_eq!(bus.sent_count(), 2);
        assert_eq!(*seen.lock(), vec![10, 11]);
    }

    #[test]
    fn test_publish_denied_and_unknown_group() {
        let bus = LoopbackBus::new();
        let group = bus.register_group("svc").unwrap();

        bus.deny_publish(true);
        let err = bus.publish(group, 1, b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);

        bus.deny_publish(false);
        let err = bus.publish(group + 100, 1, b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
