//! In-memory transport linking two sessions.
//!
//! The link plays the part of the messaging transport for both ends: it
//! assigns transfer ids, forwards offers, control signals and pushed chunks,
//! and pulls uploads along by requesting one chunk at a time from the sender
//! once the receiver has accepted. Each endpoint sees the other one as peer
//! [`LOOPBACK_PEER`].
//!
//! Everything runs on one thread; endpoints share the link through
//! `Rc<RefCell<_>>` and the driver pulls events with [`Loopback::next_event`].
//!
//! ```rust,ignore
//! let link = Loopback::new(1024);
//! let mut alice = TransferSession::new(link.endpoint(Side::A), config.clone());
//! let mut bob = TransferSession::new(link.endpoint(Side::B), config);
//!
//! alice.send_file(LOOPBACK_PEER, "notes.txt".as_ref())?;
//! while let Some((side, event)) = link.next_event() {
//!     match side {
//!         Side::A => event.dispatch(&mut alice)?,
//!         Side::B => event.dispatch(&mut bob)?,
//!     }
//! }
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use crate::error::Result;
use crate::session::TransferSession;
use crate::transfer::{ControlSignal, FileKind, PeerId, TransferId, TransferSize};

use super::{Transport, TransportError};

/// Peer id each endpoint uses for the other one.
pub const LOOPBACK_PEER: PeerId = 0;

/// Consecutive unanswered requests for the same chunk before the link gives up.
const MAX_ATTEMPTS: u32 = 3;

/// One end of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// First endpoint
    A,
    /// Second endpoint
    B,
}

impl Side {
    /// The other end.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Event the link delivers to one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The peer offers a file
    Offer {
        /// Offering peer
        peer: PeerId,
        /// Assigned transfer id
        transfer: TransferId,
        /// Offer kind
        kind: FileKind,
        /// Raw size (sentinel for streams)
        size: u64,
        /// Suggested file name
        name: String,
    },
    /// The peer sent a control signal
    Control {
        /// Sending peer
        peer: PeerId,
        /// Target transfer
        transfer: TransferId,
        /// Signal
        signal: ControlSignal,
    },
    /// The link wants upload bytes
    ChunkRequested {
        /// Receiving peer
        peer: PeerId,
        /// Target transfer
        transfer: TransferId,
        /// Offset of the first byte
        offset: u64,
        /// Bytes wanted; zero ends the transfer
        length: usize,
    },
    /// The link delivers download bytes
    ChunkDelivered {
        /// Sending peer
        peer: PeerId,
        /// Target transfer
        transfer: TransferId,
        /// Offset of the first byte
        offset: u64,
        /// Payload; empty ends the transfer
        data: Vec<u8>,
    },
}

impl LinkEvent {
    /// Hand the event to the session it was addressed to.
    ///
    /// # Errors
    ///
    /// Returns whatever the session's event handler returns.
    pub fn dispatch<T: Transport>(self, session: &mut TransferSession<T>) -> Result<()> {
        match self {
            Self::Offer {
                peer,
                transfer,
                kind,
                size,
                name,
            } => session.on_incoming_offer(peer, transfer, kind, size, &name),
            Self::Control {
                peer,
                transfer,
                signal,
            } => session.on_control_received(peer, transfer, signal),
            Self::ChunkRequested {
                peer,
                transfer,
                offset,
                length,
            } => session.on_chunk_requested(peer, transfer, offset, length),
            Self::ChunkDelivered {
                peer,
                transfer,
                offset,
                data,
            } => session.on_chunk_delivered(peer, transfer, offset, &data),
        }
    }
}

#[derive(Debug)]
struct LinkTransfer {
    sender: Side,
    size: u64,
    next_offset: u64,
    outstanding: Option<(u64, usize)>,
    attempts: u32,
    accepted: bool,
    sender_paused: bool,
    receiver_paused: bool,
}

impl LinkTransfer {
    const fn running(&self) -> bool {
        self.accepted && !self.sender_paused && !self.receiver_paused
    }
}

#[derive(Debug)]
struct Link {
    chunk_size: usize,
    next_id: TransferId,
    last_served: Option<TransferId>,
    queue: VecDeque<(Side, LinkEvent)>,
    transfers: BTreeMap<TransferId, LinkTransfer>,
}

impl Link {
    fn push(&mut self, to: Side, event: LinkEvent) {
        self.queue.push_back((to, event));
    }

    /// Queue the next chunk request, or the completion pair, for one running
    /// transfer. Transfers take turns.
    fn schedule(&mut self) {
        let pivot = self.last_served.unwrap_or(TransferId::MAX);
        let next = self
            .transfers
            .range(pivot.saturating_add(1)..)
            .chain(self.transfers.range(..=pivot))
            .find(|(_, t)| t.running())
            .map(|(&id, _)| id);

        let Some(id) = next else {
            return;
        };
        self.last_served = Some(id);

        let chunk_size = self.chunk_size;
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return;
        };
        let sender = transfer.sender;

        if let Some((offset, length)) = transfer.outstanding {
            transfer.attempts += 1;
            if transfer.attempts > MAX_ATTEMPTS {
                tracing::warn!("Loopback transfer #{} stalled at offset {}", id, offset);
                self.transfers.remove(&id);
                for side in [sender, sender.opposite()] {
                    self.push(
                        side,
                        LinkEvent::Control {
                            peer: LOOPBACK_PEER,
                            transfer: id,
                            signal: ControlSignal::Cancel,
                        },
                    );
                }
                return;
            }
            self.push(
                sender,
                LinkEvent::ChunkRequested {
                    peer: LOOPBACK_PEER,
                    transfer: id,
                    offset,
                    length,
                },
            );
            return;
        }

        if transfer.next_offset >= transfer.size {
            let end = transfer.size;
            self.transfers.remove(&id);
            self.push(
                sender,
                LinkEvent::ChunkRequested {
                    peer: LOOPBACK_PEER,
                    transfer: id,
                    offset: end,
                    length: 0,
                },
            );
            self.push(
                sender.opposite(),
                LinkEvent::ChunkDelivered {
                    peer: LOOPBACK_PEER,
                    transfer: id,
                    offset: end,
                    data: Vec::new(),
                },
            );
            return;
        }

        let remaining = transfer.size - transfer.next_offset;
        let length = usize::try_from(remaining).map_or(chunk_size, |r| r.min(chunk_size));
        let offset = transfer.next_offset;
        transfer.outstanding = Some((offset, length));
        transfer.attempts = 1;
        self.push(
            sender,
            LinkEvent::ChunkRequested {
                peer: LOOPBACK_PEER,
                transfer: id,
                offset,
                length,
            },
        );
    }
}

/// Shared in-memory link between two endpoints.
#[derive(Debug, Clone)]
pub struct Loopback {
    link: Rc<RefCell<Link>>,
}

impl Loopback {
    /// Create a link that requests at most `chunk_size` bytes at a time.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            link: Rc::new(RefCell::new(Link {
                chunk_size: chunk_size.max(1),
                next_id: 0,
                last_served: None,
                queue: VecDeque::new(),
                transfers: BTreeMap::new(),
            })),
        }
    }

    /// Create a link together with both of its endpoints.
    #[must_use]
    pub fn pair(chunk_size: usize) -> (Self, LoopbackEndpoint, LoopbackEndpoint) {
        let link = Self::new(chunk_size);
        let a = link.endpoint(Side::A);
        let b = link.endpoint(Side::B);
        (link, a, b)
    }

    /// Transport handle for one side.
    #[must_use]
    pub fn endpoint(&self, side: Side) -> LoopbackEndpoint {
        LoopbackEndpoint {
            side,
            link: Rc::clone(&self.link),
        }
    }

    /// Next event and the side it is addressed to.
    ///
    /// Returns `None` once nothing is queued and no transfer is running.
    pub fn next_event(&self) -> Option<(Side, LinkEvent)> {
        let mut link = self.link.borrow_mut();
        if link.queue.is_empty() {
            link.schedule();
        }
        link.queue.pop_front()
    }

    /// Number of transfers the link still tracks.
    #[must_use]
    pub fn active_transfers(&self) -> usize {
        self.link.borrow().transfers.len()
    }
}

/// [`Transport`] implementation for one side of a [`Loopback`].
#[derive(Debug, Clone)]
pub struct LoopbackEndpoint {
    side: Side,
    link: Rc<RefCell<Link>>,
}

fn check_peer(operation: &'static str, peer: PeerId) -> std::result::Result<(), TransportError> {
    if peer == LOOPBACK_PEER {
        Ok(())
    } else {
        Err(TransportError::new(operation, format!("unknown peer {peer}")))
    }
}

impl Transport for LoopbackEndpoint {
    fn begin_send(
        &mut self,
        peer: PeerId,
        size: TransferSize,
        suggested_name: &str,
    ) -> std::result::Result<TransferId, TransportError> {
        check_peer("begin_send", peer)?;
        let Some(size) = size.known() else {
            return Err(TransportError::new(
                "begin_send",
                "streams of unknown length are not supported",
            ));
        };

        let mut link = self.link.borrow_mut();
        let id = link.next_id;
        link.next_id = link
            .next_id
            .checked_add(1)
            .ok_or_else(|| TransportError::new("begin_send", "out of transfer ids"))?;

        link.transfers.insert(
            id,
            LinkTransfer {
                sender: self.side,
                size,
                next_offset: 0,
                outstanding: None,
                attempts: 0,
                accepted: false,
                sender_paused: false,
                receiver_paused: false,
            },
        );
        link.push(
            self.side.opposite(),
            LinkEvent::Offer {
                peer: LOOPBACK_PEER,
                transfer: id,
                kind: FileKind::Data,
                size,
                name: suggested_name.to_string(),
            },
        );

        tracing::debug!("Loopback offered #{} ({} bytes)", id, size);
        Ok(id)
    }

    fn send_control(
        &mut self,
        peer: PeerId,
        transfer: TransferId,
        signal: ControlSignal,
    ) -> std::result::Result<(), TransportError> {
        check_peer("send_control", peer)?;

        let mut link = self.link.borrow_mut();
        let Some(state) = link.transfers.get_mut(&transfer) else {
            return Err(TransportError::new(
                "send_control",
                format!("unknown transfer {transfer}"),
            ));
        };

        let from_sender = state.sender == self.side;
        match signal {
            ControlSignal::Cancel => {
                link.transfers.remove(&transfer);
            }
            ControlSignal::Pause if from_sender => state.sender_paused = true,
            ControlSignal::Pause => state.receiver_paused = true,
            ControlSignal::Resume if from_sender => state.sender_paused = false,
            ControlSignal::Resume => {
                state.accepted = true;
                state.receiver_paused = false;
            }
        }

        link.push(
            self.side.opposite(),
            LinkEvent::Control {
                peer: LOOPBACK_PEER,
                transfer,
                signal,
            },
        );
        Ok(())
    }

    fn push_chunk(
        &mut self,
        peer: PeerId,
        transfer: TransferId,
        offset: u64,
        data: &[u8],
    ) -> std::result::Result<(), TransportError> {
        check_peer("push_chunk", peer)?;

        let mut link = self.link.borrow_mut();
        let Some(state) = link.transfers.get_mut(&transfer) else {
            return Err(TransportError::new(
                "push_chunk",
                format!("unknown transfer {transfer}"),
            ));
        };
        if state.sender != self.side {
            return Err(TransportError::new(
                "push_chunk",
                format!("not the sender of transfer {transfer}"),
            ));
        }

        if state.outstanding.is_some_and(|(o, _)| o == offset) {
            state.outstanding = None;
            state.attempts = 0;
        }
        state.next_offset = state.next_offset.max(offset + data.len() as u64);

        link.push(
            self.side.opposite(),
            LinkEvent::ChunkDelivered {
                peer: LOOPBACK_PEER,
                transfer,
                offset,
                data: data.to_vec(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_reaches_other_side() {
        let link = Loopback::new(4);
        let mut a = link.endpoint(Side::A);

        let id = a
            .begin_send(LOOPBACK_PEER, TransferSize::Known(10), "x.bin")
            .unwrap();

        let (side, event) = link.next_event().unwrap();
        assert_eq!(side, Side::B);
        assert_eq!(
            event,
            LinkEvent::Offer {
                peer: LOOPBACK_PEER,
                transfer: id,
                kind: FileKind::Data,
                size: 10,
                name: "x.bin".into(),
            }
        );
        assert!(link.next_event().is_none(), "nothing runs before accept");
    }

    #[test]
    fn test_requests_follow_accept() {
        let link = Loopback::new(4);
        let mut a = link.endpoint(Side::A);
        let mut b = link.endpoint(Side::B);

        let id = a
            .begin_send(LOOPBACK_PEER, TransferSize::Known(6), "x.bin")
            .unwrap();
        link.next_event();
        b.send_control(LOOPBACK_PEER, id, ControlSignal::Resume)
            .unwrap();

        assert!(matches!(
            link.next_event(),
            Some((Side::A, LinkEvent::Control { signal: ControlSignal::Resume, .. }))
        ));
        assert_eq!(
            link.next_event(),
            Some((
                Side::A,
                LinkEvent::ChunkRequested {
                    peer: LOOPBACK_PEER,
                    transfer: id,
                    offset: 0,
                    length: 4
                }
            ))
        );

        a.push_chunk(LOOPBACK_PEER, id, 0, b"abcd").unwrap();
        assert!(matches!(
            link.next_event(),
            Some((Side::B, LinkEvent::ChunkDelivered { offset: 0, .. }))
        ));
        assert!(matches!(
            link.next_event(),
            Some((Side::A, LinkEvent::ChunkRequested { offset: 4, length: 2, .. }))
        ));

        a.push_chunk(LOOPBACK_PEER, id, 4, b"ef").unwrap();
        link.next_event();
        assert!(matches!(
            link.next_event(),
            Some((Side::A, LinkEvent::ChunkRequested { offset: 6, length: 0, .. }))
        ));
        assert!(matches!(
            link.next_event(),
            Some((Side::B, LinkEvent::ChunkDelivered { offset: 6, ref data, .. })) if data.is_empty()
        ));
        assert_eq!(link.active_transfers(), 0);
        assert!(link.next_event().is_none());
    }

    #[test]
    fn test_unanswered_request_is_retried_then_cancelled() {
        let link = Loopback::new(4);
        let mut a = link.endpoint(Side::A);
        let mut b = link.endpoint(Side::B);

        let id = a
            .begin_send(LOOPBACK_PEER, TransferSize::Known(6), "x.bin")
            .unwrap();
        link.next_event();
        b.send_control(LOOPBACK_PEER, id, ControlSignal::Resume)
            .unwrap();
        link.next_event();

        for _ in 0..MAX_ATTEMPTS {
            assert!(matches!(
                link.next_event(),
                Some((Side::A, LinkEvent::ChunkRequested { offset: 0, .. }))
            ));
        }
        let cancels: Vec<_> = std::iter::from_fn(|| link.next_event()).collect();
        assert_eq!(cancels.len(), 2);
        assert_eq!(link.active_transfers(), 0);
    }

    #[test]
    fn test_pause_stops_requests() {
        let link = Loopback::new(4);
        let mut a = link.endpoint(Side::A);
        let mut b = link.endpoint(Side::B);

        let id = a
            .begin_send(LOOPBACK_PEER, TransferSize::Known(6), "x.bin")
            .unwrap();
        link.next_event();
        b.send_control(LOOPBACK_PEER, id, ControlSignal::Resume)
            .unwrap();
        b.send_control(LOOPBACK_PEER, id, ControlSignal::Pause)
            .unwrap();
        link.next_event();
        link.next_event();

        assert!(link.next_event().is_none());
    }

    #[test]
    fn test_rejects_unknown_transfer_and_peer() {
        let link = Loopback::new(4);
        let mut a = link.endpoint(Side::A);

        assert!(a
            .send_control(LOOPBACK_PEER, 42, ControlSignal::Pause)
            .is_err());
        assert!(a.push_chunk(LOOPBACK_PEER, 42, 0, b"x").is_err());
        assert!(a.begin_send(7, TransferSize::Known(1), "x").is_err());
        assert!(a
            .begin_send(LOOPBACK_PEER, TransferSize::Unbounded, "x")
            .is_err());
    }
}
