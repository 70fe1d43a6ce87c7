//! Parent role task: broadcast discovery until paired, then watch the
//! child's status reports. Every accepted report rearms the missing
//! deadline for the full timeout from the moment it arrives; an expired
//! deadline raises MISSING and rearms again, so the alert repeats until
//! reports resume. FALLING reports raise FALL immediately.

use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Instant, Timer};
use log::{Level, log};

use crate::link_message;
use crate::liveness::LivenessMonitor;
use crate::pairing::{PairingCoordinator, process_pairing_event, send_discovery};
use crate::{EventQueueSender, LinkAddress, LinkRxEvent, MAX_NODE_COUNT, RxEventQueueReceiver, SharedKey, TxFrameQueueSender};

#[embassy_executor::task(pool_size = MAX_NODE_COUNT)]
pub(crate) async fn parent_task(
    tx_frame_queue_sender: TxFrameQueueSender,
    rx_event_queue_receiver: RxEventQueueReceiver,
    event_queue_sender: EventQueueSender,
    shared_key: SharedKey,
    own_address: LinkAddress,
    pairing_interval_secs: u8,
    missing_timeout_secs: u16,
) -> ! {
    log!(Level::Info, "[{}] parent bracelet task started, pairing mode starts", own_address);
    let mut coordinator = PairingCoordinator::new(shared_key, own_address);

    let pairing_interval = Duration::from_secs(pairing_interval_secs as u64);
    let mut next_tick = Instant::now() + pairing_interval;
    while !coordinator.is_paired() {
        match select(rx_event_queue_receiver.receive(), Timer::at(next_tick)).await {
            Either::First(event) => process_pairing_event(&mut coordinator, event, &tx_frame_queue_sender, &event_queue_sender),
            Either::Second(()) => {
                send_discovery(&mut coordinator, &tx_frame_queue_sender, &event_queue_sender);
                next_tick = Instant::now() + pairing_interval;
            }
        }
    }

    let peer = coordinator.peer();
    let mut monitor = LivenessMonitor::new();
    let missing_timeout = Duration::from_secs(missing_timeout_secs as u64);
    // The watchdog arms as soon as the pair is bound: a child that never
    // reports must still produce MISSING.
    let mut missing_deadline = Instant::now() + missing_timeout;
    loop {
        match select(rx_event_queue_receiver.receive(), Timer::at(missing_deadline)).await {
            Either::First(event) => {
                if process_operation_event(own_address, peer, &mut monitor, event, &event_queue_sender) {
                    // Cancel-and-restart: the full timeout from now, not an
                    // extension of the original deadline.
                    missing_deadline = Instant::now() + missing_timeout;
                }
            }
            Either::Second(()) => {
                log!(
                    Level::Warn,
                    "[{}] MISSING: no status report from {} within {}s, last known position: {:?}",
                    own_address,
                    peer,
                    missing_timeout_secs,
                    monitor.last_known_position()
                );
                crate::emit_event(&event_queue_sender, monitor.missing_event());
                missing_deadline = Instant::now() + missing_timeout;
            }
        }
    }
}

/// Handles one link event in operation mode. Returns true when a status
/// report was accepted and the missing deadline must be rearmed.
pub(crate) fn process_operation_event(
    own_address: LinkAddress,
    peer: LinkAddress,
    monitor: &mut LivenessMonitor,
    event: LinkRxEvent,
    event_queue_sender: &EventQueueSender,
) -> bool {
    match event {
        LinkRxEvent::Unicast { payload, from } if from == peer => {
            if link_message::is_acknowledgment(payload.as_bytes()) {
                log!(Level::Debug, "[{}] duplicate pairing acknowledgment from {}, ignoring", own_address, from);
                return false;
            }
            match link_message::decode_status(payload.as_bytes()) {
                Ok(record) => {
                    log!(Level::Info, "[{}] {}", own_address, payload.text());
                    crate::emit_event(event_queue_sender, crate::BraceletEvent::StatusReceived { record });
                    if let Some(fall) = monitor.record_report(&record) {
                        log!(Level::Warn, "[{}] FALL,X:{},Y:{}", own_address, record.position.x, record.position.y);
                        crate::emit_event(event_queue_sender, fall);
                    }
                    true
                }
                Err(error) => {
                    // Recoverable: drop this message, keep the deadline and
                    // the cached position untouched.
                    log!(Level::Warn, "[{}] discarding malformed status report from {}: {:?}", own_address, from, error);
                    false
                }
            }
        }
        LinkRxEvent::Unicast { from, .. } => {
            log!(Level::Debug, "[{}] ignoring unicast from unpaired address {}", own_address, from);
            false
        }
        LinkRxEvent::Broadcast { from, .. } => {
            log!(Level::Trace, "[{}] ignoring broadcast from {} while operational", own_address, from);
            false
        }
        LinkRxEvent::UnicastSent { dest, delivered } => {
            crate::log_unicast_sent(dest, delivered);
            false
        }
    }
}
