//! imgring node: a Chord-style DHT participant that doubles as an image
//! cache/proxy.
//!
//! # Architecture
//!
//! This crate is the I/O glue around [`imgring_core`]'s pure ring logic and
//! [`imgring_proto`]'s wire format:
//!
//! - [`net`]: read-exactly-one-packet transport helpers with an explicit
//!   premature-close variant
//! - [`mux`]: the event multiplexer - one readiness wait over the two
//!   receivers and the operator command channel
//! - [`node`]: the orchestrator owning all state; `ring` and `lookup` are
//!   its protocol engines (JOIN/WLCM/REID/REDRT and SRCH/RPLY/MISS plus the
//!   image-client state machine)
//! - [`tga`]: the image loader feeding the streaming path
//!
//! Everything runs on one thread: handlers are dispatched from the event
//! loop and run to completion, so no state is ever shared or locked.

pub mod error;
mod lookup;
pub mod mux;
pub mod net;
pub mod node;
mod ring;
pub mod tga;

pub use error::NodeError;
pub use mux::Command;
pub use node::{BootstrapTarget, DhtNode, NodeConfig, NodeHandle, NodeSnapshot};
