//! Ring logic for imgring nodes.
//!
//! This crate is pure state: identifier arithmetic over the 8-bit ring,
//! the finger table with its fix-up/fix-down maintenance, and the
//! bloom-filtered image store. No sockets - the `imgring-node` crate owns
//! all I/O and drives these types from its single event-loop thread, which
//! is why nothing here needs interior mutability or locks.

pub mod finger;
pub mod id;
pub mod store;

pub use finger::{FINGER_COUNT, Finger, FingerTable, PREDECESSOR_SLOT, Peer, RingSnapshot};
pub use store::{ImageStore, Query};
