//! Child role task: broadcast discovery until paired, then sample and
//! unicast one status report to the bound parent per report interval.

use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Instant, Timer};
use log::{Level, log};

use crate::link_message;
use crate::pairing::{PairingCoordinator, process_pairing_event, send_discovery};
use crate::status_sampler::StatusSampler;
use crate::{
    BraceletEvent, EventQueueSender, LinkAddress, LinkDestination, LinkRxEvent, LinkTxFrame, MAX_NODE_COUNT, RxEventQueueReceiver, SharedKey,
    TxFrameQueueSender,
};

#[embassy_executor::task(pool_size = MAX_NODE_COUNT)]
pub(crate) async fn child_task(
    tx_frame_queue_sender: TxFrameQueueSender,
    rx_event_queue_receiver: RxEventQueueReceiver,
    event_queue_sender: EventQueueSender,
    shared_key: SharedKey,
    own_address: LinkAddress,
    pairing_interval_secs: u8,
    status_report_interval_secs: u8,
    rng_seed: u64,
) -> ! {
    log!(Level::Info, "[{}] child bracelet task started, pairing mode starts", own_address);
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
    let mut sampler = StatusSampler::new(rng_seed);
    let report_interval = Duration::from_secs(status_report_interval_secs as u64);
    let mut next_report = Instant::now() + report_interval;
    loop {
        match select(rx_event_queue_receiver.receive(), Timer::at(next_report)).await {
            Either::First(event) => process_operation_event(own_address, peer, event),
            Either::Second(()) => {
                send_status_report(&mut sampler, peer, own_address, &tx_frame_queue_sender, &event_queue_sender);
                next_report = Instant::now() + report_interval;
            }
        }
    }
}

/// Link traffic arriving after pairing is permanent state; nothing rebinds.
fn process_operation_event(own_address: LinkAddress, peer: LinkAddress, event: LinkRxEvent) {
    match event {
        LinkRxEvent::Broadcast { from, .. } => {
            log!(Level::Trace, "[{}] ignoring broadcast from {} while operational", own_address, from);
        }
        LinkRxEvent::Unicast { payload, from } if from == peer => {
            if link_message::is_acknowledgment(payload.as_bytes()) {
                log!(Level::Debug, "[{}] duplicate pairing acknowledgment from {}, ignoring", own_address, from);
            } else {
                log!(Level::Debug, "[{}] unicast from {}: {}", own_address, from, payload.text());
            }
        }
        LinkRxEvent::Unicast { from, .. } => {
            log!(Level::Debug, "[{}] ignoring unicast from unpaired address {}", own_address, from);
        }
        LinkRxEvent::UnicastSent { dest, delivered } => crate::log_unicast_sent(dest, delivered),
    }
}

/// Report tick: sample one status record, encode and fire it at the peer.
/// Delivery is best effort; nothing retries.
pub(crate) fn send_status_report(
    sampler: &mut StatusSampler,
    peer: LinkAddress,
    own_address: LinkAddress,
    tx_frame_queue_sender: &TxFrameQueueSender,
    event_queue_sender: &EventQueueSender,
) {
    if peer.is_null() || peer == own_address {
        // Self-pairing guard: never produce a self-delivery loop.
        log!(Level::Warn, "[{}] suppressing status report to {}", own_address, peer);
        return;
    }

    let record = sampler.sample();
    match link_message::encode_status(&record) {
        Ok(payload) => {
            log!(Level::Debug, "[{}] sending status report: {}", own_address, payload.text());
            crate::send_frame(
                tx_frame_queue_sender,
                LinkTxFrame {
                    payload,
                    dest: LinkDestination::Unicast(peer),
                },
            );
            crate::emit_event(event_queue_sender, BraceletEvent::StatusSent { record });
        }
        Err(error) => {
            log!(Level::Error, "[{}] failed to encode status report: {:?}", own_address, error);
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::{EventQueue, TxFrameQueue};
    use embassy_sync::channel::Channel;

    const CHILD: LinkAddress = LinkAddress::new([1, 0]);
    const PARENT: LinkAddress = LinkAddress::new([2, 0]);

    fn queues() -> (&'static TxFrameQueue, &'static EventQueue) {
        (Box::leak(Box::new(Channel::new())), Box::leak(Box::new(Channel::new())))
    }

    #[test]
    fn report_tick_unicasts_an_encoded_record_to_the_peer() {
        let (tx_queue, event_queue) = queues();
        let mut sampler = StatusSampler::new(42);

        send_status_report(&mut sampler, PARENT, CHILD, &tx_queue.sender(), &event_queue.sender());

        let frame = tx_queue.try_receive().unwrap();
        assert!(matches!(frame.dest, LinkDestination::Unicast(dest) if dest == PARENT));
        let record = link_message::decode_status(frame.payload.as_bytes()).unwrap();
        match event_queue.try_receive().unwrap() {
            BraceletEvent::StatusSent { record: sent } => assert_eq!(sent, record),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn self_pairing_guard_suppresses_the_report() {
        let (tx_queue, event_queue) = queues();
        let mut sampler = StatusSampler::new(42);

        send_status_report(&mut sampler, CHILD, CHILD, &tx_queue.sender(), &event_queue.sender());
        send_status_report(&mut sampler, LinkAddress::NULL, CHILD, &tx_queue.sender(), &event_queue.sender());

        assert!(tx_queue.try_receive().is_err());
        assert!(event_queue.try_receive().is_err());
    }
}
