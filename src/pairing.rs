//! Pairing coordinator: the one-way PAIRING -> OPERATION state machine
//! shared by both bracelet roles, plus the pairing-phase event pump the
//! role tasks drive it with.
//!
//! While pairing, a node broadcasts its shared key on every pairing tick.
//! A node that receives a broadcast matching its own key binds the sender
//! as its peer, acknowledges it by unicast and becomes operational; a node
//! that receives the acknowledgment while still pairing binds the sender
//! and becomes operational without replying. Both nodes may observe each
//! other's broadcast concurrently; duplicate matches and duplicate
//! acknowledgments after binding are safe no-ops. Pairing never reverts.

use log::{Level, log};

use crate::link_message::{self, LinkPayload};
use crate::{BraceletEvent, DeviceState, EventQueueSender, LinkAddress, LinkDestination, LinkRxEvent, LinkTxFrame, SharedKey, TxFrameQueueSender};

/// What a received payload did to the pairing state.
pub(crate) enum PairingAction {
    /// The payload did not advance pairing.
    None,
    /// Key matched: the sender is now the bound peer and must be sent the
    /// acknowledgment marker.
    Acknowledge(LinkAddress),
    /// The peer acknowledged our discovery: bound and operational, nothing
    /// to send back.
    Complete(LinkAddress),
}

pub(crate) struct PairingCoordinator {
    state: DeviceState,
    shared_key: SharedKey,
    own_address: LinkAddress,
    peer_address: LinkAddress,
    attempts: u32,
}

impl PairingCoordinator {
    pub(crate) fn new(shared_key: SharedKey, own_address: LinkAddress) -> Self {
        PairingCoordinator {
            state: DeviceState::Pairing,
            shared_key,
            own_address,
            peer_address: LinkAddress::NULL,
            attempts: 0,
        }
    }

    pub(crate) fn state(&self) -> DeviceState {
        self.state
    }

    pub(crate) fn is_paired(&self) -> bool {
        self.state() == DeviceState::Operation
    }

    /// The peer bound by the handshake; NULL while still pairing.
    pub(crate) fn peer(&self) -> LinkAddress {
        self.peer_address
    }

    pub(crate) fn own_address(&self) -> LinkAddress {
        self.own_address
    }

    /// Discovery broadcasts sent so far (diagnostic, unbounded).
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The next discovery broadcast: the shared key verbatim. Returns None
    /// once paired, which is what stops the broadcast loop.
    pub(crate) fn next_discovery(&mut self) -> Option<LinkPayload> {
        if self.is_paired() {
            return None;
        }
        self.attempts += 1;
        Some(link_message::encode_discovery(&self.shared_key))
    }

    /// A broadcast arrived: compare it byte-for-byte with the local key.
    pub(crate) fn handle_broadcast(&mut self, from: LinkAddress, payload: &[u8]) -> PairingAction {
        if payload != self.shared_key.as_bytes() {
            return PairingAction::None;
        }
        if self.is_paired() {
            // Duplicate discovery match: no rebind, no retransmission.
            return PairingAction::None;
        }
        self.bind(from);
        PairingAction::Acknowledge(from)
    }

    /// A unicast arrived while pairing: only the acknowledgment marker
    /// advances the state machine.
    pub(crate) fn handle_unicast(&mut self, from: LinkAddress, payload: &[u8]) -> PairingAction {
        if self.is_paired() || !link_message::is_acknowledgment(payload) {
            return PairingAction::None;
        }
        self.bind(from);
        PairingAction::Complete(from)
    }

    fn bind(&mut self, peer: LinkAddress) {
        self.peer_address = peer;
        self.state = DeviceState::Operation;
    }
}

/// Pairing-phase handling of one link event, shared by both role tasks.
pub(crate) fn process_pairing_event(
    coordinator: &mut PairingCoordinator,
    event: LinkRxEvent,
    tx_frame_queue_sender: &TxFrameQueueSender,
    event_queue_sender: &EventQueueSender,
) {
    match event {
        LinkRxEvent::Broadcast { payload, from } => {
            log!(
                Level::Debug,
                "[{}] broadcast received from {}: {}",
                coordinator.own_address(),
                from,
                payload.text()
            );
            let action = coordinator.handle_broadcast(from, payload.as_bytes());
            apply_pairing_action(coordinator, action, tx_frame_queue_sender, event_queue_sender);
        }
        LinkRxEvent::Unicast { payload, from } => {
            log!(
                Level::Debug,
                "[{}] unicast received from {}: {}",
                coordinator.own_address(),
                from,
                payload.text()
            );
            let action = coordinator.handle_unicast(from, payload.as_bytes());
            apply_pairing_action(coordinator, action, tx_frame_queue_sender, event_queue_sender);
        }
        LinkRxEvent::UnicastSent { dest, delivered } => crate::log_unicast_sent(dest, delivered),
    }
}

fn apply_pairing_action(
    coordinator: &PairingCoordinator,
    action: PairingAction,
    tx_frame_queue_sender: &TxFrameQueueSender,
    event_queue_sender: &EventQueueSender,
) {
    let own_address = coordinator.own_address();
    match action {
        PairingAction::None => {}
        PairingAction::Acknowledge(peer) => {
            log!(Level::Info, "[{}] peer bracelet found at {}", own_address, peer);
            if !peer.is_null() && peer != own_address {
                crate::send_frame(
                    tx_frame_queue_sender,
                    LinkTxFrame {
                        payload: link_message::encode_acknowledgment(),
                        dest: LinkDestination::Unicast(peer),
                    },
                );
            }
            crate::emit_event(event_queue_sender, BraceletEvent::Paired { peer });
            log!(Level::Info, "[{}] operation mode starts", own_address);
        }
        PairingAction::Complete(peer) => {
            log!(Level::Info, "[{}] found by peer bracelet at {}", own_address, peer);
            crate::emit_event(event_queue_sender, BraceletEvent::Paired { peer });
            log!(Level::Info, "[{}] operation mode starts", own_address);
        }
    }
}

/// Pairing tick: broadcast the shared key and report progress.
pub(crate) fn send_discovery(
    coordinator: &mut PairingCoordinator,
    tx_frame_queue_sender: &TxFrameQueueSender,
    event_queue_sender: &EventQueueSender,
) {
    if let Some(payload) = coordinator.next_discovery() {
        log!(
            Level::Info,
            "[{}] searching for peer bracelet (broadcast #{})",
            coordinator.own_address(),
            coordinator.attempts()
        );
        crate::send_frame(
            tx_frame_queue_sender,
            LinkTxFrame {
                payload,
                dest: LinkDestination::Broadcast,
            },
        );
        crate::emit_event(
            event_queue_sender,
            BraceletEvent::PairingAttempt {
                attempts: coordinator.attempts(),
            },
        );
    }
}
