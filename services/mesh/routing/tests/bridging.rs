//! Bridging between browsers, mesh peers, the radio and the cloud.

mod common;

use common::{connect_browser, NodeBuilder};
use mesh_routing::{data_message, RouterError, TelemetrySnapshot};
use mesh_session::ConnectionId;
use mesh_storage::{Peer, TakeMode};
use mesh_wire::{
    frame, packet_from_json, QueryPacket, RadioPacket, LORA_MAX_PACKET_LEN, QUERY_STILL_THERE,
};
use serde_json::Value;
use std::sync::atomic::Ordering;

fn data_text(esp_id: u8) -> String {
    let snapshot = TelemetrySnapshot {
        v: 3650,
        ..Default::default()
    };
    data_message(esp_id, &snapshot).unwrap().to_string()
}

fn framed(packet: &RadioPacket) -> Vec<u8> {
    frame::encode(&packet.encode(), LORA_MAX_PACKET_LEN)
        .unwrap()
        .to_vec()
}

fn transmitted(node: &common::Node) -> Vec<RadioPacket> {
    node.radio
        .transmitted
        .lock()
        .unwrap()
        .iter()
        .map(|f| RadioPacket::decode(&frame::decode(f).unwrap()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_receiver_ignores_cloud_ack() {
    let node = NodeBuilder::new(0).receiver().build();

    node.router
        .on_cloud_message(r#"{"type":"response","content":"OK"}"#)
        .await
        .unwrap();
    assert_eq!(node.router.forward_slot().take().await, None);

    node.router
        .on_cloud_message(r#"{"type":"request","esp_id":3,"content":{"summary":"reset-bms"}}"#)
        .await
        .unwrap();
    node.router.lora_transmit().await.unwrap();

    let sent = transmitted(&node);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].esp_id(), 3);
    assert!(matches!(sent[0], RadioPacket::Request(_)));
    // slot emptied by the transmit
    node.router.lora_transmit().await.unwrap();
    assert_eq!(transmitted(&node).len(), 1);
}

#[tokio::test]
async fn test_receiver_rejects_oversize_cloud_message() {
    let node = NodeBuilder::new(0).receiver().build();
    let ssid = "x".repeat(300);
    let text = format!(
        r#"{{"type":"request","esp_id":3,"content":{{"summary":"connect-wifi","data":{{"ssid":"{}"}}}}}}"#,
        ssid
    );

    let staged = node.router.on_cloud_message(&text).await;
    assert!(matches!(staged, Err(RouterError::CapacityExceeded)));
    assert_eq!(node.router.forward_slot().take().await, None);
    node.router.lora_transmit().await.unwrap();
    assert!(transmitted(&node).is_empty());
}

#[tokio::test]
async fn test_receiver_forwards_radio_data_to_cloud() {
    let node = NodeBuilder::new(0).receiver().build();
    node.router.topology().set_home_wifi(true);

    let message: Value = serde_json::from_str(&data_text(4)).unwrap();
    let packet = packet_from_json(&message).unwrap();
    node.router.on_radio_bytes(&framed(&packet)).await.unwrap();

    let sent = node.cloud.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    let batch: Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(batch[0]["esp_id"], 4);
    assert_eq!(batch[0]["type"], "data");
}

#[tokio::test]
async fn test_receiver_without_home_wifi_drops_radio_data() {
    let node = NodeBuilder::new(0).receiver().build();
    let message: Value = serde_json::from_str(&data_text(4)).unwrap();
    let packet = packet_from_json(&message).unwrap();
    node.router.on_radio_bytes(&framed(&packet)).await.unwrap();
    assert!(node.cloud.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_mesh_peer_text_lands_in_mailbox() {
    let node = NodeBuilder::new(1).build();
    let token = node.router.issue_token().await;
    let peer = ConnectionId(5);
    node.router
        .on_handshake(peer, &format!("/mesh_ws?auth_token={}&esp_id=4", token))
        .await
        .unwrap();

    node.router.on_websocket_text(peer, &data_text(4)).await.unwrap();
    node.router.on_websocket_text(peer, &data_text(4)).await.unwrap();
    assert_eq!(node.router.mailbox().len().await, 1);

    let missing_id = node
        .router
        .on_websocket_text(peer, r#"{"type":"data","content":{}}"#)
        .await;
    assert!(matches!(missing_id, Err(RouterError::Malformed(_))));

    let entries = node.router.mailbox().take_all(TakeMode::Drain).await;
    assert_eq!(entries[0].peer, Peer::new(4).unwrap());
    // nothing was sent back to the peer
    assert!(node.sink.texts(peer).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failing_browser_evicted_after_retries() {
    let node = NodeBuilder::new(1).build();
    node.router.manager().boot(1, 80).await.unwrap();
    let healthy = connect_browser(&node, 1).await;
    let broken = connect_browser(&node, 2).await;
    node.sink.broken.lock().unwrap().push(broken);
    node.bms.snapshot.lock().unwrap().v = 3700;

    node.router.broadcast_telemetry().await.unwrap();

    assert!(node.router.clients().get(broken).await.is_none());
    assert!(node.router.clients().get(healthy).await.is_some());
    assert_eq!(node.sink.attempts.load(Ordering::SeqCst), 6);

    let texts = node.sink.texts(healthy);
    assert_eq!(texts.len(), 1);
    let message: Value = serde_json::from_str(&texts[0]).unwrap();
    assert_eq!(message["content"]["V"], 370.0);
    // cloud only on home wifi
    assert!(node.cloud.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_root_uplinks_raw_telemetry_on_home_wifi() {
    let node = NodeBuilder::new(1).build();
    node.router.manager().boot(1, 80).await.unwrap();
    let browser = connect_browser(&node, 1).await;
    node.wifi.connected.store(true, Ordering::SeqCst);
    node.router.topology().set_home_wifi(true);
    node.bms.snapshot.lock().unwrap().v = 3700;

    node.router.broadcast_telemetry().await.unwrap();

    let sent = node.cloud.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    let batch: Value = serde_json::from_str(&sent[0]).unwrap();
    let batch = batch.as_array().unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0]["type"], "data");
    assert_eq!(batch[0]["esp_id"], 1);
    assert_eq!(batch[0]["content"]["V"], 3700);
    assert_eq!(batch[0]["content"]["wifi"], true);

    // browsers still get the scaled copy
    let texts = node.sink.texts(browser);
    assert_eq!(texts.len(), 1);
    let message: Value = serde_json::from_str(&texts[0]).unwrap();
    assert_eq!(message["content"]["V"], 370.0);
    assert!(node.router.topology().status().connected_to_home_wifi);
}

#[tokio::test]
async fn test_root_drains_mailbox_over_the_radio() {
    let node = NodeBuilder::new(1).build();
    node.router.manager().boot(1, 80).await.unwrap();
    for id in [2, 3] {
        node.router
            .mailbox()
            .put(Peer::new(id).unwrap(), data_text(id))
            .await
            .unwrap();
    }

    for _ in 0..3 {
        node.router.lora_transmit().await.unwrap();
    }
    let ids: Vec<u8> = transmitted(&node).iter().map(RadioPacket::esp_id).collect();
    assert_eq!(ids, vec![2, 3, 1]);
    assert!(node.router.mailbox().is_empty().await);

    // empty backlog refills with our own telemetry
    node.router.lora_transmit().await.unwrap();
    assert_eq!(transmitted(&node).len(), 4);
}

#[tokio::test]
async fn test_radio_query_answered_first() {
    let node = NodeBuilder::new(1).build();
    node.router.manager().boot(1, 80).await.unwrap();
    node.router
        .mailbox()
        .put(Peer::new(2).unwrap(), data_text(2))
        .await
        .unwrap();

    let query = RadioPacket::Query(QueryPacket {
        esp_id: 1,
        query: QUERY_STILL_THERE,
    });
    node.router.on_radio_bytes(&framed(&query)).await.unwrap();
    node.router.lora_transmit().await.unwrap();

    let sent = transmitted(&node);
    assert_eq!(sent.len(), 1);
    assert!(matches!(&sent[0], RadioPacket::Response(p) if p.success && p.esp_id == 1));
}

#[tokio::test]
async fn test_child_stays_off_the_radio() {
    let node = NodeBuilder::new(2)
        .seeing(vec![common::root_record("ROOT 1 (80%)", [0, 0, 0, 0, 0, 1])])
        .build();
    node.router.manager().boot(2, 50).await.unwrap();
    node.router.lora_transmit().await.unwrap();
    assert!(transmitted(&node).is_empty());
}
