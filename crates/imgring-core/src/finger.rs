//! Finger table: successor pointers, predecessor, and their maintenance.
//!
//! The table holds nine entries. Entries 0..7 are successor fingers whose
//! `finger_id` targets `(self.id + 2^i) mod 256`; `finger_id` is fixed at
//! construction and only the covering peer changes. Entry 8 is the
//! predecessor, a bare peer whose finger id is meaningless. A freshly built
//! table points every entry at the node itself: the lone node owns the
//! whole ring.
//!
//! There is no stabilization loop. Entries are corrected lazily by
//! [`FingerTable::update`] when traffic (WLCM, REDRT, accepted joins)
//! reveals a better peer, and each write is propagated to the neighboring
//! entries through fix-up and fix-down so the table stays consistent with
//! the one write.

use std::fmt;
use std::net::SocketAddrV4;

use imgring_proto::NodeDescr;

use crate::id::{fold, in_range};

/// Number of successor fingers (reaches half the ring with entry 7).
pub const FINGER_COUNT: usize = 8;

/// Index of the predecessor entry.
pub const PREDECESSOR_SLOT: usize = FINGER_COUNT;

/// A ring participant: identifier plus DHT receiver address.
///
/// Peers are plain values. Remote nodes are always referred to by copied
/// descriptors, never by shared ownership - the ring's cycles live in the
/// id space, not in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    /// Ring identifier.
    pub id: u8,
    /// DHT receiver address.
    pub addr: SocketAddrV4,
}

impl Peer {
    /// Peer from an id and receiver address.
    #[must_use]
    pub fn new(id: u8, addr: SocketAddrV4) -> Self {
        Self { id, addr }
    }
}

impl From<NodeDescr> for Peer {
    fn from(descr: NodeDescr) -> Self {
        Self { id: descr.id(), addr: descr.addr() }
    }
}

impl From<Peer> for NodeDescr {
    fn from(peer: Peer) -> Self {
        Self::new(peer.id, peer.addr)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

/// One successor finger: the fixed ring target and the peer covering it.
#[derive(Debug, Clone, Copy)]
pub struct Finger {
    finger_id: u8,
    peer: Peer,
}

impl Finger {
    /// Fixed point on the ring this finger targets.
    #[must_use]
    pub fn finger_id(&self) -> u8 {
        self.finger_id
    }

    /// Peer currently assigned to cover the target.
    #[must_use]
    pub fn peer(&self) -> Peer {
        self.peer
    }
}

/// Observable ring state, published after every handled event.
///
/// Snapshots exist so the operator report and the test harness can check
/// convergence without reaching into live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSnapshot {
    /// Own identifier.
    pub id: u8,
    /// Current predecessor.
    pub predecessor: Peer,
    /// Current successor (finger 0).
    pub successor: Peer,
    /// Covering node id of each successor finger.
    pub finger_ids: [u8; FINGER_COUNT],
}

/// The nine-entry routing table of one node.
#[derive(Debug, Clone)]
pub struct FingerTable {
    own: Peer,
    fingers: [Finger; FINGER_COUNT],
    predecessor: Peer,
}

impl FingerTable {
    /// Build a self-pointing table for `own`.
    #[must_use]
    pub fn new(own: Peer) -> Self {
        let fingers = std::array::from_fn(|i| Finger {
            finger_id: fold(u16::from(own.id) + (1 << i)),
            peer: own,
        });
        Self { own, fingers, predecessor: own }
    }

    /// This node's identity.
    #[must_use]
    pub fn own(&self) -> Peer {
        self.own
    }

    /// Own ring identifier.
    #[must_use]
    pub fn id(&self) -> u8 {
        self.own.id
    }

    /// Immediate successor (finger 0).
    #[must_use]
    pub fn successor(&self) -> Peer {
        self.fingers[0].peer
    }

    /// Current predecessor.
    #[must_use]
    pub fn predecessor(&self) -> Peer {
        self.predecessor
    }

    /// Successor finger at `slot` (0..8, exclusive of the predecessor).
    #[must_use]
    pub fn finger(&self, slot: usize) -> Finger {
        self.fingers[slot]
    }

    /// True while this node is the only ring member it knows of.
    #[must_use]
    pub fn is_alone(&self) -> bool {
        self.fingers[0].peer.id == self.own.id
    }

    /// Ownership test: keys in `(predecessor.id, self.id]` are ours.
    #[must_use]
    pub fn owns(&self, key: u8) -> bool {
        in_range(key, self.predecessor.id, self.own.id)
    }

    /// Does a joining id collide with us or our predecessor?
    #[must_use]
    pub fn collides(&self, id: u8) -> bool {
        id == self.own.id || id == self.predecessor.id
    }

    /// Pick the finger to forward a message for `target` to.
    ///
    /// Of the fingers whose targets precede the object, take the one with
    /// the greatest reach; a finger whose covering node *is* the target is
    /// taken directly. Falls back to the farthest finger. The predecessor is
    /// never a candidate.
    #[must_use]
    pub fn forward_slot(&self, target: u8) -> usize {
        if in_range(target, self.own.id, self.fingers[0].finger_id) {
            return 0;
        }

        for slot in 1..FINGER_COUNT {
            if in_range(target, self.own.id, self.fingers[slot].finger_id) {
                return if self.fingers[slot].peer.id == target { slot } else { slot - 1 };
            }
        }

        FINGER_COUNT - 1
    }

    /// Would we expect `target` to be owned by the peer at `slot`?
    ///
    /// True iff the target sits in `(finger_id, node_id]` or hits the finger
    /// point exactly. Decides whether a forwarded message carries the
    /// at-location flag.
    #[must_use]
    pub fn expect_at(&self, target: u8, slot: usize) -> bool {
        let finger = self.fingers[slot];
        in_range(target, finger.finger_id, finger.peer.id) || target == finger.finger_id
    }

    /// Install `peer` at `slot` (8 = predecessor) and repair the neighbors.
    ///
    /// No-op when the entry already holds exactly this peer (a fix pass may
    /// have installed it first). Returns whether anything changed.
    pub fn update(&mut self, slot: usize, peer: Peer) -> bool {
        debug_assert!(slot <= PREDECESSOR_SLOT, "slot out of bounds: {slot}");

        let current = self.peer_at(slot);
        if current == peer {
            return false;
        }

        if slot == PREDECESSOR_SLOT {
            self.predecessor = peer;
        } else {
            self.fingers[slot].peer = peer;
        }

        if slot > 0 {
            self.fix_down(slot);
        }
        if slot < PREDECESSOR_SLOT {
            self.fix_up(slot);
        }

        true
    }

    /// Replace the predecessor. Runs the fix-down pass over all fingers.
    pub fn set_predecessor(&mut self, peer: Peer) -> bool {
        self.update(PREDECESSOR_SLOT, peer)
    }

    /// Replace the successor (finger 0). Runs the fix-up pass.
    pub fn set_successor(&mut self, peer: Peer) -> bool {
        self.update(0, peer)
    }

    /// Reset to the self-pointing state under a new identity (REID path).
    pub fn reinit(&mut self, own: Peer) {
        *self = Self::new(own);
    }

    /// Current observable state.
    #[must_use]
    pub fn snapshot(&self) -> RingSnapshot {
        RingSnapshot {
            id: self.own.id,
            predecessor: self.predecessor,
            successor: self.successor(),
            finger_ids: std::array::from_fn(|i| self.fingers[i].peer.id),
        }
    }

    fn peer_at(&self, slot: usize) -> Peer {
        if slot == PREDECESSOR_SLOT { self.predecessor } else { self.fingers[slot].peer }
    }

    /// Propagate entry `j` upward: successive fingers whose targets fall in
    /// `(self.id, node_id[j]]` are covered by the same peer; stop at the
    /// first that is not.
    fn fix_up(&mut self, j: usize) {
        let anchor = self.peer_at(j);
        for k in (j + 1)..FINGER_COUNT {
            if in_range(self.fingers[k].finger_id, self.own.id, anchor.id) {
                self.fingers[k].peer = anchor;
            } else {
                break;
            }
        }
    }

    /// Propagate entry `j` downward: a lower finger whose interval
    /// `(finger_id, node_id]` contains the new peer is covered by it; a
    /// finger whose covering node sits exactly on its target stops the walk.
    fn fix_down(&mut self, j: usize) {
        let anchor = self.peer_at(j);
        for k in (0..j.min(FINGER_COUNT)).rev() {
            let finger = self.fingers[k];
            if finger.finger_id == finger.peer.id {
                break;
            }
            if in_range(anchor.id, finger.finger_id, finger.peer.id) {
                self.fingers[k].peer = anchor;
            }
        }
    }
}
