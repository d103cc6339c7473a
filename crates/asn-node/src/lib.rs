//! ASN node: the secure segment transport and the server that pairs it
//! with the content-addressed repository.
//!
//! # Architecture
//!
//! - [`Transport`]: one full-duplex stream, one box, two background pumps
//!   feeding bounded PDU queues
//! - [`session`]: login exchange and post-login box renegotiation
//! - [`NodeSender`]: replication sink mapping keys and the mirror sentinel
//!   onto live transports
//! - [`Config`]: YAML node configuration (name, location, keys, nonce,
//!   peer servers)
//! - [`Node`]: accept loop and per-connection PDU dispatch

pub mod config;
mod error;
mod node;
mod sender;
pub mod session;
mod transport;

pub use config::{Config, ConfigError};
pub use error::{NodeError, TransportError};
pub use node::Node;
pub use sender::NodeSender;
pub use transport::{CONN_TIMEOUT, QUEUE_DEPTH, State, Transport, TransportBuilder};
