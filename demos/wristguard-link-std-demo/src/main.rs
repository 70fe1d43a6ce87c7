use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use env_logger::Builder;
use log::LevelFilter;
use log::{Level, log};
use wristguard_link_lib::link_device_simulator::{LinkHub, link_hub_task};
use wristguard_link_lib::{BraceletEvent, BraceletLinkManager, BraceletRole, LinkAddress, LinkConfiguration, SharedKey};

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    Builder::new().filter_level(LevelFilter::Debug).init();

    log!(Level::Debug, "starting up");

    let child_address = LinkAddress::new([1, 0]);
    let parent_address = LinkAddress::new([2, 0]);
    let shared_key = SharedKey::from_bytes(b"WG-K1");

    let mut hub = LinkHub::new();
    let child_device = hub.attach(child_address);
    let parent_device = hub.attach(parent_address);
    spawner.spawn(link_hub_task(hub)).unwrap();

    // Short intervals so the demo shows a full pairing-and-reporting run in
    // seconds; reference deployments use 5s/10s/60s.
    let mut child_manager_temp = BraceletLinkManager::new();
    let child_config = LinkConfiguration {
        role: BraceletRole::Child,
        pairing_interval_secs: 2,
        status_report_interval_secs: 3,
        missing_timeout_secs: 10,
        shared_key,
    };
    let result = child_manager_temp.initialize(child_config, spawner, child_device, child_address, 0x5747_0001);
    if result.is_err() {
        log!(Level::Error, "error initializing the child bracelet");
    }
    let child_manager: &'static BraceletLinkManager = Box::leak(Box::new(child_manager_temp));

    let mut parent_manager_temp = BraceletLinkManager::new();
    let parent_config = LinkConfiguration {
        role: BraceletRole::Parent,
        pairing_interval_secs: 2,
        status_report_interval_secs: 3,
        missing_timeout_secs: 10,
        shared_key,
    };
    let result = parent_manager_temp.initialize(parent_config, spawner, parent_device, parent_address, 0x5747_0002);
    if result.is_err() {
        log!(Level::Error, "error initializing the parent bracelet");
    }
    let parent_manager: &'static BraceletLinkManager = Box::leak(Box::new(parent_manager_temp));

    log!(Level::Debug, "bracelets started, watching events");
    loop {
        match select(child_manager.receive_event(), parent_manager.receive_event()).await {
            Either::First(Ok(event)) => {
                log!(Level::Info, "[child app] {:?}", event);
            }
            Either::Second(Ok(event)) => match event {
                BraceletEvent::Fall { position } => {
                    log!(Level::Warn, "[parent app] FALL alert at X:{},Y:{}", position.x, position.y);
                }
                BraceletEvent::Missing { position } => {
                    log!(Level::Warn, "[parent app] MISSING, last known position: {:?}", position);
                }
                other => {
                    log!(Level::Info, "[parent app] {:?}", other);
                }
            },
            _ => {
                log!(Level::Error, "error receiving event");
            }
        }
    }
}
