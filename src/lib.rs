pub mod config;
pub mod crypto;
pub mod directory;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod transport;

pub use config::SantiagoConfig;
pub use crypto::CryptoOracle;
pub use engine::SantiagoEngine;
pub use envelope::{IncomingRequest, InnerRecord};
pub use error::SantiagoError;
pub use identity::{Identity, Location, ServiceName, SANTIAGO_SERVICE};
pub use transport::{Listener, Sender, TransportRegistry};
