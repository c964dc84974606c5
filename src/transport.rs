//! Pluggable transport dispatch (spec §4.4).
//!
//! Santiago never hardcodes how a blob reaches a location — it dispatches
//! on the location's URL scheme to whichever [`Sender`] was registered for
//! it. [`Listener`]s are the inbound half: something external (an HTTP
//! server, a socket loop) that hands received blobs to
//! [`crate::engine::SantiagoEngine::incoming_request`]. Unlike `Sender`,
//! the engine never looks a listener up by scheme at runtime, so
//! `TransportRegistry` holds none — a listener is handed an `Arc` to the
//! engine once at startup and calls `incoming_request` on its own, per
//! spec §4.4: "listeners are started once". This crate ships no concrete
//! transport; wiring an actual HTTPS/TCP/etc. binding is left to the
//! embedder, same as the engine leaves `CryptoOracle` unimplemented.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::SantiagoEngine;
use crate::error::SantiagoError;
use crate::identity::Location;

/// Delivers an already-packed envelope to a single location.
pub trait Sender: Send + Sync {
    fn send(&self, location: &Location, envelope: &str) -> Result<(), SantiagoError>;
}

/// Accepts inbound envelopes on behalf of the engine (spec §6: "Listener
/// interface: `start()`, callback to `engine.incoming_request(blob)`").
/// An embedder implements this over a real socket or HTTP server; `start`
/// must not block, and every blob the transport receives is handed to
/// `engine.incoming_request` as it arrives.
pub trait Listener: Send + Sync {
    fn start(&self, engine: Arc<SantiagoEngine>) -> Result<(), SantiagoError>;
}

/// Scheme-keyed registry of senders.
///
/// A [`crate::engine::SantiagoEngine`] holds one of these behind its own
/// mutex (spec §5) and consults it once per outgoing envelope, in
/// `outgoing_request`, to resolve `scheme -> Sender`.
#[derive(Default)]
pub struct TransportRegistry {
    senders: HashMap<String, Arc<dyn Sender>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_sender(&mut self, scheme: impl Into<String>, sender: Arc<dyn Sender>) {
        self.senders.insert(scheme.into(), sender);
    }

    pub fn sender_for(&self, location: &Location) -> Option<Arc<dyn Sender>> {
        let scheme = location.scheme()?;
        self.senders.get(scheme).cloned()
    }
}
