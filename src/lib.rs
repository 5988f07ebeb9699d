//! # nlrpc - synchronous RPC client over a publish/subscribe message bus
//!
//! This crate implements the client half of an RPC protocol carried over a
//! generic family/group-addressed message bus: connectionless delivery,
//! transaction (xid) matching, bounded wait with timeout and retry,
//! pluggable authentication, and single-owner reply-buffer handoff.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Registry                              │
//! │  group → ClientCore  (RwLock; the reply-dispatch entry for   │
//! │                       the whole protocol family)             │
//! └──────────────────────────────────────────────────────────────┘
//!            │ dispatch(frame, ctx)            ▲ replies
//!            ▼                                 │
//!     ┌────────────┐     publish(group, xid)  ┌┴──────────┐
//!     │   Client   │ ────────────────────────▶│    Bus    │
//!     │ call engine│                          │ (family/  │
//!     │ pending set│                          │  group)   │
//!     └────────────┘                          └───────────┘
//! ```
//!
//! A calling thread serializes the call body (precomputed header, procedure
//! id, credentials, args), links a pending record keyed by a fresh xid,
//! publishes the frame, and sleeps on the record with a bounded wait. The
//! registry's demultiplexer matches inbound replies by (group, xid,
//! namespace) and hands the payload to exactly one sleeper; strays are
//! logged and counted, never surfaced. Timeouts burn the xid and retry with
//! a brand-new record.
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use nlrpc::{AuthNone, Client, ClientConfig, LoopbackBus, Registry};
//!
//! let registry = Registry::new();
//! let bus = LoopbackBus::new();
//!
//! let client = Client::new(
//!     registry.clone(),
//!     bus.clone(),
//!     "example.svc",
//!     400100, // program
//!     1,      // version
//!     Arc::new(AuthNone),
//!     ClientConfig::default(),
//! )
//! .unwrap();
//!
//! // With no peer installed on the bus this call would time out; see the
//! // integration tests for a loopback peer answering calls.
//! client.destroy();
//! ```
//!
//! ## Modules
//!
//! - [`config`]: client configuration and per-call options
//! - [`error`]: error taxonomy (`Error`, `Result`)
//! - [`xdr`]: XDR primitives and RPC call/reply headers
//! - [`wire`]: bus framing (envelope, sub-header, attributes)
//! - [`auth`]: authentication capability seam (`Auth`, `AuthNone`)
//! - [`transport`]: bus seam (`Bus`) and the in-process `LoopbackBus`
//! - [`registry`]: process-wide client table and reply demultiplexer
//! - [`client`]: the client instance and its synchronous call engine

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod transport;
pub mod wire;
pub mod xdr;

// Re-export main types
pub use auth::{Auth, AuthNone};
pub use client::Client;
pub use config::{CallOptions, ClientConfig};
pub use error::{Error, RecvCause, RejectCause, Result};
pub use registry::{DispatchContext, DispatchOutcome, Registry, StrayCounts};
pub use transport::{Bus, LoopbackBus, NamespaceId, SentFrame};
pub use xdr::OpaqueAuth;
