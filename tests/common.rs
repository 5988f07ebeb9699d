//! Common test utilities for nlrpc integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use nlrpc::wire;
use nlrpc::xdr::{self, OpaqueAuth};
use nlrpc::{
    AuthNone, Client, ClientConfig, DispatchContext, DispatchOutcome, LoopbackBus, NamespaceId,
    Registry,
};

/// Program and version used by every test client.
pub const PROG: u32 = 400100;
pub const VERS: u32 = 1;

/// Fresh registry plus loopback bus, one per test.
pub struct TestContext {
    pub registry: Arc<Registry>,
    pub bus: Arc<LoopbackBus>,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            bus: LoopbackBus::new(),
        }
    }

    /// Create a client bound to a fresh group on the shared bus.
    pub fn client(&self, config: ClientConfig) -> Client {
        Client::new(
            self.registry.clone(),
            self.bus.clone(),
            "test.svc",
            PROG,
            VERS,
            Arc::new(AuthNone),
            config,
        )
        .expect("client construction failed")
    }

    /// Install a peer that answers every request with an accepted success
    /// reply echoing the argument bytes.
    pub fn install_echo(&self) {
        let registry = self.registry.clone();
        self.bus.set_handler(move |sent| {
            let request = wire::parse_request(&sent.frame).expect("peer got malformed request");
            let call = xdr::decode_call(request.body).expect("peer got malformed call body");
            let reply = xdr::encode_accepted_reply(call.xid, &OpaqueAuth::none(), call.args);
            let frame =
                wire::build_reply(request.group, request.seq, &reply).expect("reply too large");
            registry.dispatch(&frame, &DispatchContext::new(NamespaceId::GLOBAL));
        });
    }

    /// Install a peer that answers every request with a fixed pre-encoded
    /// reply body (xid patched per request).
    pub fn install_replier(
        &self,
        make_body: impl Fn(u32) -> Vec<u8> + Send + Sync + 'static,
    ) {
        let registry = self.registry.clone();
        self.bus.set_handler(move |sent| {
            let request = wire::parse_request(&sent.frame).expect("peer got malformed request");
            let body = make_body(request.seq);
            let frame =
                wire::build_reply(request.group, request.seq, &body).expect("reply too large");
            registry.dispatch(&frame, &DispatchContext::new(NamespaceId::GLOBAL));
        });
    }

    /// Dispatch a hand-built success reply into the registry.
    pub fn inject_reply(
        &self,
        group: u32,
        xid: u32,
        results: &[u8],
        namespace: NamespaceId,
    ) -> DispatchOutcome {
        let body = xdr::encode_accepted_reply(xid, &OpaqueAuth::none(), results);
        let frame = wire::build_reply(group, xid, &body).expect("reply too large");
        self.registry
            .dispatch(&frame, &DispatchContext::new(namespace))
    }
}

/// Spin until `cond` holds, panicking after `timeout`.
pub fn wait_for(what: &str, timeout: Duration, cond: impl Fn() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(
            start.elapsed() < timeout,
            "timed out waiting for {}",
            what
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}
