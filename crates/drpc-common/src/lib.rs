//! Common types and utilities shared by the drpc server and client.
//!
//! This crate provides:
//! - JSON wire messages and their validation ([`protocol`])
//! - Protocol type aliases and connection defaults ([`types`])
//! - Bidirectional value converters ([`iso`])
//! - Weighted set and map collections ([`collection`])
//! - Computation-graph interfaces and an in-process graph ([`graph`])
//! - Message transports over WebSocket and in-process ports ([`transport`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod collection;
pub mod graph;
pub mod iso;
pub mod protocol;
pub mod transport;
pub mod types;

pub use collection::{ZMap, ZSet};
pub use graph::{Graph, LocalGraph};
pub use protocol::{ClientMessage, MutationResult, ProtocolError, ServerMessage};
pub use transport::{Inbound, Transport, TransportError};
pub use types::{Args, RequestId};
