//! Commands sent through the queue reach the bridge and are acknowledged.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use milight_protocol::bulb::{category, BulbCommand, BulbType, CommandKind};
use milight_protocol::checksum;
use milight_session::{
    BridgeSessionManager, DatagramSink, QueueItem, QueuedSend, SessionState,
};

fn valid_manager(bridge: &FakeBridge) -> BridgeSessionManager {
    let (observer, states) = channel_observer();
    let manager = BridgeSessionManager::new(&bridge.config(), observer).unwrap();
    manager.start().unwrap();
    wait_for_state(&states, SessionState::Valid, Duration::from_secs(3))
        .expect("session should become valid");
    assert!(manager.is_valid());
    manager
}

fn next_command(bridge: &FakeBridge) -> Vec<u8> {
    loop {
        let frame = bridge
            .wait_for_frame(0x80, Duration::from_secs(2))
            .expect("command frame");
        if frame[10] == 0x31 {
            return frame;
        }
    }
}

#[test]
fn test_queued_command_reaches_bridge() {
    init_logging();
    let bridge = FakeBridge::spawn();
    let manager = valid_manager(&bridge);
    let config = bridge.config();
    let sink: Arc<dyn DatagramSink> = manager.socket();
    let queue = QueuedSend::from_config(sink, &config);
    queue.start().unwrap();

    let frame = manager
        .make_bulb_command(BulbType::RgbCw, 1, BulbCommand::Brightness(40))
        .unwrap();
    let kind = BulbCommand::Brightness(40).kind();
    queue
        .enqueue(QueueItem::repeatable(
            manager.bridge_addr(),
            category(BulbType::RgbCw, 1, kind),
            frame.clone(),
        ))
        .unwrap();

    let received = next_command(&bridge);
    assert_eq!(received, frame);
    assert_eq!(&received[5..7], &SESSION_ID);
    assert_eq!(received[13], 0x08);
    assert_eq!(&received[14..16], &[0x03, 40]);
    assert_eq!(received[19], 1);
    assert_eq!(received[21], checksum(&received, 1));

    // The acknowledgement clears the in-flight entry
    let deadline = Instant::now() + Duration::from_secs(1);
    while manager.in_flight() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(manager.in_flight(), 0);
    assert!(manager.is_valid());

    queue.close();
    manager.close();
}

#[test]
fn test_chained_power_and_color() {
    init_logging();
    let bridge = FakeBridge::spawn();
    let manager = valid_manager(&bridge);
    let sink: Arc<dyn DatagramSink> = manager.socket();
    let queue = QueuedSend::new(sink, 1, Duration::ZERO);

    let on = manager
        .make_bulb_command(BulbType::Rgbw, 2, BulbCommand::On)
        .unwrap();
    let hue = manager
        .make_bulb_command(BulbType::Rgbw, 2, BulbCommand::Hue(0x7F))
        .unwrap();
    let item = QueueItem::repeatable(
        manager.bridge_addr(),
        category(BulbType::Rgbw, 2, CommandKind::Power),
        on.clone(),
    )
    .add_repeatable(hue.clone());
    queue.enqueue(item).unwrap();
    queue.start().unwrap();

    assert_eq!(next_command(&bridge), on);
    assert_eq!(next_command(&bridge), hue);
}
