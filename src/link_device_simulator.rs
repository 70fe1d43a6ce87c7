//! # Link Device Simulator - Testing and Development Transport
//!
//! A simulated link transport for running bracelet pairs without radio
//! hardware. It mimics the external transport's capability set: a broadcast
//! channel, a unicast channel with sent-completion notification, and 2-byte
//! addressing.
//!
//! ## Architecture
//!
//! Channel-based, mirroring how a hardware device would sit between the
//! node and the medium:
//! - **Output queue**: frames this device offers to the simulated medium
//! - **Input queue**: frames the simulated medium delivers to this device
//! - **TX/RX integration**: connects to the standard frame/event queues the
//!   library's role tasks use
//!
//! The medium itself is the [`LinkHub`]: every attached device hands it
//! outbound traffic, and it routes broadcasts to every other device and
//! unicasts to the addressed device. Unknown unicast destinations are
//! dropped with a warning, like frames sent into an empty channel.
//!
//! Sent-completions are diagnostic only: the simulated medium accepts every
//! frame, and nothing feeds back into protocol state.

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{Level, log};

use crate::link_message::LinkPayload;
use crate::{LinkAddress, LinkDestination, LinkRxEvent, MAX_NODE_COUNT, RxEventQueueSender, TxFrameQueueReceiver};

/// Frames offered by a device to the simulated medium
pub enum LinkOutputMessage {
    /// Broadcast `payload` to every other device attached to the hub
    SendBroadcast { from: LinkAddress, payload: LinkPayload },
    /// Deliver `payload` to the device bound to `to`
    SendUnicast {
        from: LinkAddress,
        to: LinkAddress,
        payload: LinkPayload,
    },
}

/// Frames the simulated medium delivers to a device
pub enum LinkInputMessage {
    DeliverBroadcast { from: LinkAddress, payload: LinkPayload },
    DeliverUnicast { from: LinkAddress, payload: LinkPayload },
}

const LINK_OUTPUT_QUEUE_SIZE: usize = 16;
pub type LinkOutputQueue = Channel<CriticalSectionRawMutex, LinkOutputMessage, LINK_OUTPUT_QUEUE_SIZE>;
pub type LinkOutputQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, LinkOutputMessage, LINK_OUTPUT_QUEUE_SIZE>;
pub type LinkOutputQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, LinkOutputMessage, LINK_OUTPUT_QUEUE_SIZE>;

const LINK_INPUT_QUEUE_SIZE: usize = 16;
pub type LinkInputQueue = Channel<CriticalSectionRawMutex, LinkInputMessage, LINK_INPUT_QUEUE_SIZE>;
pub type LinkInputQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, LinkInputMessage, LINK_INPUT_QUEUE_SIZE>;
pub type LinkInputQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, LinkInputMessage, LINK_INPUT_QUEUE_SIZE>;

/// Simulated link device: one endpoint of the hub's star topology
pub struct LinkDevice {
    own_address: LinkAddress,
    output_queue_sender: LinkOutputQueueSender,
    input_queue_receiver: LinkInputQueueReceiver,
}

impl LinkDevice {
    pub const fn with(own_address: LinkAddress, output_queue_sender: LinkOutputQueueSender, input_queue_receiver: LinkInputQueueReceiver) -> Self {
        LinkDevice {
            own_address,
            output_queue_sender,
            input_queue_receiver,
        }
    }
}

/// Bridges one device between the node's frame queues and the medium.
#[embassy_executor::task(pool_size = MAX_NODE_COUNT)]
pub(crate) async fn link_device_task(
    link_device: LinkDevice,
    tx_frame_queue_receiver: TxFrameQueueReceiver,
    rx_event_queue_sender: RxEventQueueSender,
) -> ! {
    let own_address = link_device.own_address;
    log!(Level::Info, "[{}] simulated link device task started", own_address);
    loop {
        match select(link_device.input_queue_receiver.receive(), tx_frame_queue_receiver.receive()).await {
            Either::First(message) => {
                let event = match message {
                    LinkInputMessage::DeliverBroadcast { from, payload } => LinkRxEvent::Broadcast { payload, from },
                    LinkInputMessage::DeliverUnicast { from, payload } => LinkRxEvent::Unicast { payload, from },
                };
                if rx_event_queue_sender.try_send(event).is_err() {
                    log!(Level::Warn, "[{}] RX event queue full, dropping received payload", own_address);
                }
            }
            Either::Second(frame) => match frame.dest {
                LinkDestination::Broadcast => {
                    link_device
                        .output_queue_sender
                        .send(LinkOutputMessage::SendBroadcast {
                            from: own_address,
                            payload: frame.payload,
                        })
                        .await;
                }
                LinkDestination::Unicast(dest) => {
                    link_device
                        .output_queue_sender
                        .send(LinkOutputMessage::SendUnicast {
                            from: own_address,
                            to: dest,
                            payload: frame.payload,
                        })
                        .await;
                    // Completion is diagnostic only; the simulated medium
                    // accepts every frame.
                    let _ = rx_event_queue_sender.try_send(LinkRxEvent::UnicastSent { dest, delivered: true });
                }
            },
        }
    }
}

/// The simulated medium: routes frames between attached devices.
#[cfg(feature = "std")]
pub struct LinkHub {
    output_queue: &'static LinkOutputQueue,
    attached: Vec<(LinkAddress, LinkInputQueueSender)>,
}

#[cfg(feature = "std")]
impl LinkHub {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        LinkHub {
            output_queue: Box::leak(Box::new(Channel::new())),
            attached: Vec::new(),
        }
    }

    /// Creates a device bound to `address` and registers it with the hub.
    pub fn attach(&mut self, address: LinkAddress) -> LinkDevice {
        let input_queue: &'static LinkInputQueue = Box::leak(Box::new(Channel::new()));
        self.attached.push((address, input_queue.sender()));
        LinkDevice::with(address, self.output_queue.sender(), input_queue.receiver())
    }
}

#[cfg(feature = "std")]
fn route(attached: &[(LinkAddress, LinkInputQueueSender)], message: LinkOutputMessage) {
    match message {
        LinkOutputMessage::SendBroadcast { from, payload } => {
            for (address, input_queue_sender) in attached {
                if *address == from {
                    continue;
                }
                let delivery = LinkInputMessage::DeliverBroadcast {
                    from,
                    payload: payload.clone(),
                };
                if input_queue_sender.try_send(delivery).is_err() {
                    log!(Level::Warn, "[{}] input queue full, dropping broadcast from {}", address, from);
                }
            }
        }
        LinkOutputMessage::SendUnicast { from, to, payload } => match attached.iter().find(|(address, _)| *address == to) {
            Some((_, input_queue_sender)) => {
                if input_queue_sender.try_send(LinkInputMessage::DeliverUnicast { from, payload }).is_err() {
                    log!(Level::Warn, "[{}] input queue full, dropping unicast from {}", to, from);
                }
            }
            None => {
                log!(Level::Warn, "dropping unicast from {} to unknown address {}", from, to);
            }
        },
    }
}

/// Routing loop of the simulated medium; spawn one per hub.
#[cfg(feature = "std")]
#[embassy_executor::task]
pub async fn link_hub_task(hub: LinkHub) -> ! {
    log!(Level::Info, "link hub task started with {} attached devices", hub.attached.len());
    loop {
        let message = hub.output_queue.receive().await;
        route(&hub.attached, message);
    }
}
