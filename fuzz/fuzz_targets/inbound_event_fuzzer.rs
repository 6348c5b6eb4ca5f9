//! Fuzz target for inbound channel event decoding
//!
//! Every feature decodes untrusted channel payloads. Decoding must reject
//! bad input with an error, never a panic.
//!
//! # Strategy
//!
//! - Arbitrary JSON payloads (fuzzed bytes parsed as JSON, or raw strings)
//! - Arbitrary event names, serials, versions, actions and client ids
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - Decoded messages keep the inbound serial
//! - Decoded reactions flag `is_self` only for the local client id
//! - Typing changes always name a client

#![no_main]

use arbitrary::Arbitrary;
use chrono::{DateTime, Utc};
use chatroom_core::{
    messages::decode_message_event, occupancy::decode_occupancy, reactions::decode_reaction,
    typing::decode_typing_event, InboundMessage,
};
use libfuzzer_sys::fuzz_target;
use serde_json::Value;

const LOCAL_CLIENT: &str = "fuzzer";

#[derive(Debug, Arbitrary)]
struct FuzzedEvent {
    name: String,
    payload: Vec<u8>,
    client_id: Option<String>,
    serial: Option<String>,
    version: Option<String>,
    action: Option<String>,
    timestamp_millis: Option<i64>,
}

impl FuzzedEvent {
    fn into_inbound(self) -> InboundMessage {
        let data = serde_json::from_slice(&self.payload).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&self.payload).into_owned())
        });
        InboundMessage {
            name: self.name,
            data,
            client_id: self.client_id,
            serial: self.serial,
            version: self.version,
            action: self.action,
            timestamp: self.timestamp_millis.and_then(DateTime::<Utc>::from_timestamp_millis),
            ..InboundMessage::default()
        }
    }
}

fuzz_target!(|event: FuzzedEvent| {
    let inbound = event.into_inbound();

    if let Ok(decoded) = decode_message_event(&inbound) {
        assert_eq!(Some(&decoded.message.serial), inbound.serial.as_ref());
    }

    if let Ok(reaction) = decode_reaction(&inbound, LOCAL_CLIENT) {
        assert_eq!(reaction.is_self, reaction.client_id == LOCAL_CLIENT);
    }

    if let Ok(change) = decode_typing_event(&inbound) {
        assert_eq!(Some(&change.client_id), inbound.client_id.as_ref());
    }

    let _ = decode_occupancy(&inbound);
});
