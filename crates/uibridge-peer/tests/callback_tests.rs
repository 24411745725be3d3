//! Reverse path through a named host callback, routed into a second bridge.

use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use uibridge_peer::{Bridge, BufferTransport, CallbackTransport, PeerResult};
use uibridge_protocol::{Message, MessageType};

#[test]
fn test_events_reach_host_through_callback() {
    let host = Bridge::new(BufferTransport::new());
    let received = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&received);
    host.register_handler("clicked", move |_, message| {
        log.lock().push(message.payload.clone());
        Ok(())
    });

    let calls = Arc::new(Mutex::new(Vec::new()));
    let call_log = Arc::clone(&calls);
    let host_side = host.clone();
    let peer = Bridge::new(CallbackTransport::new(
        "uibridge_receive",
        move |function: &str, argument: &str| -> PeerResult<()> {
            call_log.lock().push(function.to_string());
            let raw = CallbackTransport::<fn(&str, &str) -> PeerResult<()>>::unescape(argument);
            host_side.receive_message(&raw);
            Ok(())
        },
    ));

    peer.emit("clicked", json!({"label": "it's \"ok\""})).unwrap();

    assert_eq!(*calls.lock(), ["uibridge_receive"]);
    assert_eq!(*received.lock(), [json!({"label": "it's \"ok\""})]);
}

#[test]
fn test_request_and_reply_across_bridges() {
    let peer_out = Arc::new(BufferTransport::new());
    let peer = Bridge::new(Arc::clone(&peer_out));
    peer.register_handler("double", |bridge, message| {
        let n = message.payload["n"].as_i64().unwrap_or_default();
        bridge.respond(message, json!({"success": true, "result": n * 2}))?;
        Ok(())
    });

    let request = Message::request("double", json!({"n": 21}));
    assert!(peer.receive_message(&request.to_json().unwrap()).is_accepted());

    let replies = peer_out.take();
    let reply = Message::from_json(&replies[0]).unwrap();
    assert_eq!(reply.kind, MessageType::Response);
    assert_eq!(reply.reply_key(), request.id);
    assert_eq!(reply.payload["result"], json!(42));
}
