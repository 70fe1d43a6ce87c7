#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(all(not(test), not(feature = "link-device-simulator")))]
compile_error!("At least one link device implementation feature must be enabled");

#[cfg(feature = "link-device-simulator")]
pub mod link_device_simulator;

#[cfg(feature = "link-device-simulator")]
use crate::link_device_simulator::LinkDevice;
#[cfg(feature = "link-device-simulator")]
use crate::link_device_simulator::link_device_task;

mod child;
mod link_message;
mod liveness;
mod pairing;
mod parent;
mod status_sampler;

use core::fmt;

use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use log::{Level, log};

// Re-export the wire types from the link_message module
pub use link_message::{DecodeError, EncodeError, LinkPayload, MovementStatus, Position, StatusRecord, decode_status, encode_status};

// Protocol constants that affect compatibility between paired units
pub const LINK_PAYLOAD_SIZE: usize = 40;
pub const SHARED_KEY_SIZE: usize = 8;

#[cfg(feature = "link-device-simulator")]
const MAX_NODE_COUNT: usize = 16;

#[cfg(not(feature = "link-device-simulator"))]
const MAX_NODE_COUNT: usize = 1;

/// 2-byte opaque transport address with a well-known null sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LinkAddress(pub [u8; 2]);

impl LinkAddress {
    pub const NULL: LinkAddress = LinkAddress([0, 0]);

    pub const fn new(bytes: [u8; 2]) -> Self {
        LinkAddress(bytes)
    }

    pub fn is_null(&self) -> bool {
        *self == LinkAddress::NULL
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0[0], self.0[1])
    }
}

/// Fixed-length discovery credential both units of a pair are provisioned
/// with; compared byte-for-byte during pairing. Plaintext on the air.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SharedKey([u8; SHARED_KEY_SIZE]);

impl SharedKey {
    pub const fn new(bytes: [u8; SHARED_KEY_SIZE]) -> Self {
        SharedKey(bytes)
    }

    /// Builds a key from raw bytes, zero-padded or truncated to the fixed
    /// key size.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut key = [0u8; SHARED_KEY_SIZE];
        let length = bytes.len().min(SHARED_KEY_SIZE);
        key[..length].copy_from_slice(&bytes[..length]);
        SharedKey(key)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Lifecycle of a bracelet: pairing until a peer is bound, operational
/// afterwards. The transition is one-way for the process lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DeviceState {
    Pairing,
    Operation,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BraceletRole {
    Child,
    Parent,
}

/// Configuration for a bracelet node
///
/// Timing of the pairing and reporting loops plus the shared discovery
/// credential. Supplied by the host process; nothing is persisted.
pub struct LinkConfiguration {
    pub role: BraceletRole,
    /// Seconds between discovery broadcasts while pairing
    pub pairing_interval_secs: u8,
    /// Seconds between status reports once paired (child role)
    pub status_report_interval_secs: u8,
    /// Seconds without an accepted report before MISSING fires (parent role)
    pub missing_timeout_secs: u16,
    pub shared_key: SharedKey,
}

/// Observable protocol events delivered to the application.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum BraceletEvent {
    /// A discovery broadcast went out; `attempts` counts them since boot.
    PairingAttempt { attempts: u32 },
    /// The handshake completed and `peer` is bound, permanently.
    Paired { peer: LinkAddress },
    /// The child transmitted a status report (fire-and-forget).
    StatusSent { record: StatusRecord },
    /// The parent accepted a status report from its bound peer.
    StatusReceived { record: StatusRecord },
    /// An accepted report carried FALLING; raised per report, repeats
    /// included.
    Fall { position: Position },
    /// No accepted report within the missing timeout; repeats every timeout
    /// until reports resume. Position is the last ever accepted, if any.
    Missing { position: Option<Position> },
}

/// Where an outbound frame is headed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum LinkDestination {
    Broadcast,
    Unicast(LinkAddress),
}

/// One outbound frame from a role task to the link device.
pub(crate) struct LinkTxFrame {
    pub(crate) payload: LinkPayload,
    pub(crate) dest: LinkDestination,
}

/// One inbound notification from the link device to a role task.
pub(crate) enum LinkRxEvent {
    Broadcast { payload: LinkPayload, from: LinkAddress },
    Unicast { payload: LinkPayload, from: LinkAddress },
    /// Sent-completion of a unicast; diagnostic only, never fed back into
    /// protocol state.
    UnicastSent { dest: LinkAddress, delivered: bool },
}

const TX_FRAME_QUEUE_SIZE: usize = 8;
pub(crate) type TxFrameQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, LinkTxFrame, TX_FRAME_QUEUE_SIZE>;
pub(crate) type TxFrameQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, LinkTxFrame, TX_FRAME_QUEUE_SIZE>;
pub(crate) type TxFrameQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, LinkTxFrame, TX_FRAME_QUEUE_SIZE>;

#[cfg(feature = "embedded")]
static TX_FRAME_QUEUE: TxFrameQueue = Channel::new();

const RX_EVENT_QUEUE_SIZE: usize = 16;
pub(crate) type RxEventQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, LinkRxEvent, RX_EVENT_QUEUE_SIZE>;
pub(crate) type RxEventQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, LinkRxEvent, RX_EVENT_QUEUE_SIZE>;
pub(crate) type RxEventQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, LinkRxEvent, RX_EVENT_QUEUE_SIZE>;

#[cfg(feature = "embedded")]
static RX_EVENT_QUEUE: RxEventQueue = Channel::new();

const EVENT_QUEUE_SIZE: usize = 16;
pub(crate) type EventQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, BraceletEvent, EVENT_QUEUE_SIZE>;
pub(crate) type EventQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, BraceletEvent, EVENT_QUEUE_SIZE>;
pub(crate) type EventQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, BraceletEvent, EVENT_QUEUE_SIZE>;

#[cfg(feature = "embedded")]
static EVENT_QUEUE: EventQueue = Channel::new();

/// Fire-and-forget enqueue of an outbound frame; a full queue drops the
/// frame with a warning, it is never retried.
pub(crate) fn send_frame(tx_frame_queue_sender: &TxFrameQueueSender, frame: LinkTxFrame) {
    if let Err(TrySendError::Full(_)) = tx_frame_queue_sender.try_send(frame) {
        log!(Level::Warn, "TX frame queue full, dropping outbound frame");
    }
}

/// Events are diagnostics for the application; a slow consumer loses them
/// rather than stalling the protocol loops.
pub(crate) fn emit_event(event_queue_sender: &EventQueueSender, event: BraceletEvent) {
    if let Err(TrySendError::Full(_)) = event_queue_sender.try_send(event) {
        log!(Level::Warn, "event queue full, dropping event");
    }
}

pub(crate) fn log_unicast_sent(dest: LinkAddress, delivered: bool) {
    if dest.is_null() {
        return;
    }
    log!(Level::Debug, "message sent to {} (delivered: {})", dest, delivered);
}

#[derive(Debug)]
pub enum ReceiveEventError {
    NotInited,
}

enum BraceletLinkManagerState {
    Uninitialized,
    Initialized { event_queue_receiver: EventQueueReceiver },
}

/// Owner of one bracelet node: spawns the link device task and the role
/// task, and hands protocol events to the application.
pub struct BraceletLinkManager {
    state: BraceletLinkManagerState,
}

impl BraceletLinkManager {
    pub const fn new() -> Self {
        BraceletLinkManager {
            state: BraceletLinkManagerState::Uninitialized,
        }
    }

    #[cfg(feature = "embedded")]
    pub fn initialize(
        &mut self,
        config: LinkConfiguration,
        spawner: Spawner,
        link_device: LinkDevice,
        own_address: LinkAddress,
        rng_seed: u64,
    ) -> Result<(), ()> {
        self.initialize_common(config, spawner, link_device, &TX_FRAME_QUEUE, &RX_EVENT_QUEUE, &EVENT_QUEUE, own_address, rng_seed)
    }

    #[cfg(feature = "std")]
    pub fn initialize(
        &mut self,
        config: LinkConfiguration,
        spawner: Spawner,
        link_device: LinkDevice,
        own_address: LinkAddress,
        rng_seed: u64,
    ) -> Result<(), ()> {
        let tx_frame_queue: &'static TxFrameQueue = Box::leak(Box::new(Channel::new()));
        let rx_event_queue: &'static RxEventQueue = Box::leak(Box::new(Channel::new()));
        let event_queue: &'static EventQueue = Box::leak(Box::new(Channel::new()));
        self.initialize_common(config, spawner, link_device, tx_frame_queue, rx_event_queue, event_queue, own_address, rng_seed)
    }

    #[allow(clippy::too_many_arguments)]
    fn initialize_common(
        &mut self,
        config: LinkConfiguration,
        spawner: Spawner,
        link_device: LinkDevice,
        tx_frame_queue: &'static TxFrameQueue,
        rx_event_queue: &'static RxEventQueue,
        event_queue: &'static EventQueue,
        own_address: LinkAddress,
        rng_seed: u64,
    ) -> Result<(), ()> {
        let link_device_task_result = spawner.spawn(link_device_task(link_device, tx_frame_queue.receiver(), rx_event_queue.sender()));
        if link_device_task_result.is_err() {
            return Err(());
        }
        log!(Level::Debug, "[{}] link device task spawned", own_address);

        let role_task_result = match config.role {
            BraceletRole::Child => spawner.spawn(child::child_task(
                tx_frame_queue.sender(),
                rx_event_queue.receiver(),
                event_queue.sender(),
                config.shared_key,
                own_address,
                config.pairing_interval_secs,
                config.status_report_interval_secs,
                rng_seed,
            )),
            BraceletRole::Parent => spawner.spawn(parent::parent_task(
                tx_frame_queue.sender(),
                rx_event_queue.receiver(),
                event_queue.sender(),
                config.shared_key,
                own_address,
                config.pairing_interval_secs,
                config.missing_timeout_secs,
            )),
        };
        if role_task_result.is_err() {
            return Err(());
        }
        log!(Level::Info, "[{}] bracelet link initialized as {:?}", own_address, config.role);

        self.state = BraceletLinkManagerState::Initialized {
            event_queue_receiver: event_queue.receiver(),
        };
        Ok(())
    }

    /// Next protocol event; pends until one is available.
    pub async fn receive_event(&self) -> Result<BraceletEvent, ReceiveEventError> {
        let event_queue_receiver = match &self.state {
            BraceletLinkManagerState::Uninitialized => {
                return Err(ReceiveEventError::NotInited);
            }
            BraceletLinkManagerState::Initialized { event_queue_receiver } => event_queue_receiver,
        };
        Ok(event_queue_receiver.receive().await)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::liveness::LivenessMonitor;
    use crate::pairing::{PairingCoordinator, process_pairing_event, send_discovery};
    use crate::status_sampler::StatusSampler;
    use futures::executor::block_on;

    #[test]
    fn link_configuration_constructs() {
        let _config = LinkConfiguration {
            role: BraceletRole::Child,
            pairing_interval_secs: 5,
            status_report_interval_secs: 10,
            missing_timeout_secs: 60,
            shared_key: SharedKey::from_bytes(b"WG-K1"),
        };
    }

    #[test]
    fn manager_receive_event_not_inited() {
        let manager = BraceletLinkManager::new();
        let result = block_on(async { manager.receive_event().await });
        match result {
            Err(ReceiveEventError::NotInited) => {}
            other => panic!("expected NotInited, got: {other:?}"),
        }
    }

    #[test]
    fn shared_key_pads_and_truncates_to_the_fixed_size() {
        let padded = SharedKey::from_bytes(b"K1");
        assert_eq!(padded.as_bytes(), b"K1\0\0\0\0\0\0");

        let truncated = SharedKey::from_bytes(b"0123456789");
        assert_eq!(truncated.as_bytes(), b"01234567");

        assert_eq!(SharedKey::new(*b"01234567"), truncated);
    }

    #[test]
    fn null_address_sentinel() {
        assert!(LinkAddress::NULL.is_null());
        assert!(!LinkAddress::new([1, 0]).is_null());
        assert_eq!(LinkAddress::new([1, 0]), LinkAddress([1, 0]));
    }

    fn queues() -> (&'static TxFrameQueue, &'static EventQueue) {
        (Box::leak(Box::new(Channel::new())), Box::leak(Box::new(Channel::new())))
    }

    /// The full handshake-and-report exchange of a bracelet pair, driven at
    /// the coordinator level: parent sees the child's broadcast first,
    /// acknowledges, and from then on every child report feeds the parent's
    /// watchdog.
    #[test]
    fn pair_handshake_and_report_exchange() {
        const CHILD: LinkAddress = LinkAddress::new([1, 0]);
        const PARENT: LinkAddress = LinkAddress::new([2, 0]);
        let key = SharedKey::from_bytes(b"K1");

        let (child_tx, child_events) = queues();
        let (parent_tx, parent_events) = queues();
        let mut child = PairingCoordinator::new(key, CHILD);
        let mut parent_coordinator = PairingCoordinator::new(key, PARENT);

        // Child's pairing tick broadcasts the key.
        send_discovery(&mut child, &child_tx.sender(), &child_events.sender());
        let discovery = child_tx.try_receive().unwrap();
        assert!(matches!(discovery.dest, LinkDestination::Broadcast));
        assert_eq!(
            child_events.try_receive().unwrap(),
            BraceletEvent::PairingAttempt { attempts: 1 }
        );

        // Parent receives it first: binds the child and acknowledges.
        process_pairing_event(
            &mut parent_coordinator,
            LinkRxEvent::Broadcast {
                payload: discovery.payload,
                from: CHILD,
            },
            &parent_tx.sender(),
            &parent_events.sender(),
        );
        assert!(parent_coordinator.is_paired());
        assert_eq!(parent_coordinator.peer(), CHILD);
        assert_eq!(parent_events.try_receive().unwrap(), BraceletEvent::Paired { peer: CHILD });

        // The acknowledgment brings the child into operation.
        let acknowledgment = parent_tx.try_receive().unwrap();
        assert!(matches!(acknowledgment.dest, LinkDestination::Unicast(dest) if dest == CHILD));
        process_pairing_event(
            &mut child,
            LinkRxEvent::Unicast {
                payload: acknowledgment.payload,
                from: PARENT,
            },
            &child_tx.sender(),
            &child_events.sender(),
        );
        assert!(child.is_paired());
        assert_eq!(child.peer(), PARENT);
        assert_eq!(child_events.try_receive().unwrap(), BraceletEvent::Paired { peer: PARENT });
        assert!(child_tx.try_receive().is_err());

        // Operation: each child report is accepted by the parent and rearms
        // the watchdog.
        let mut sampler = StatusSampler::new(42);
        let mut monitor = LivenessMonitor::new();
        for _ in 0..3 {
            child::send_status_report(&mut sampler, child.peer(), CHILD, &child_tx.sender(), &child_events.sender());
            let report = child_tx.try_receive().unwrap();
            assert!(matches!(report.dest, LinkDestination::Unicast(dest) if dest == PARENT));

            let rearm = parent::process_operation_event(
                PARENT,
                parent_coordinator.peer(),
                &mut monitor,
                LinkRxEvent::Unicast {
                    payload: report.payload,
                    from: CHILD,
                },
                &parent_events.sender(),
            );
            assert!(rearm);
        }
        assert!(monitor.last_known_position().is_some());

        // Late discovery chatter changes nothing on either side.
        let mut replay = PairingCoordinator::new(key, LinkAddress::new([7, 7]));
        let replayed = replay.next_discovery().unwrap();
        process_pairing_event(
            &mut parent_coordinator,
            LinkRxEvent::Broadcast {
                payload: replayed,
                from: LinkAddress::new([7, 7]),
            },
            &parent_tx.sender(),
            &parent_events.sender(),
        );
        assert_eq!(parent_coordinator.peer(), CHILD);
        assert!(parent_tx.try_receive().is_err());
    }
}
