//! In-memory chat REST backend.
//!
//! Implements the chat endpoints [`ChatApi`](chatroom_core::ChatApi) calls
//! over a [`Requester`]. Serials are zero-padded counters so they order
//! lexicographically, and versions extend their serial so every new version
//! sorts after the previous one. When wired to a [`MockRealtime`], writes are
//! also delivered on the room's channel the way the service fans them out.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use chatroom_core::{
    ApiRequest, ApiResponse, ErrorInfo, InboundMessage, Message, MessageAction, Method,
    OccupancyData, Requester, messages::MESSAGE_EVENT, room::channel_name,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value, json};

use crate::mock_realtime::MockRealtime;

const BASE_MILLIS: i64 = 1_700_000_000_000;
const DEFAULT_LIMIT: usize = 100;

struct ServiceState {
    next_serial: u64,
    clock_millis: i64,
    rooms: HashMap<String, Vec<Message>>,
    occupancy: HashMap<String, OccupancyData>,
    fail_next: Option<ErrorInfo>,
    requests: Vec<ApiRequest>,
}

/// In-memory chat service.
pub struct MockChatService {
    client_id: String,
    realtime: Option<Arc<MockRealtime>>,
    state: Mutex<ServiceState>,
}

enum Route {
    Messages(String),
    Message(String, String),
    DeleteMessage(String, String),
    Occupancy(String),
}

fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

fn route(path: &str) -> Option<Route> {
    let rest = path.strip_prefix("/chat/v4/rooms/")?;
    let segments: Vec<&str> = rest.split('/').collect();
    match segments.as_slice() {
        [room, "messages"] => Some(Route::Messages(decode_segment(room))),
        [room, "messages", serial] => {
            Some(Route::Message(decode_segment(room), decode_segment(serial)))
        },
        [room, "messages", serial, "delete"] => {
            Some(Route::DeleteMessage(decode_segment(room), decode_segment(serial)))
        },
        [room, "occupancy"] => Some(Route::Occupancy(decode_segment(room))),
        _ => None,
    }
}

fn not_found(what: &str) -> ErrorInfo {
    ErrorInfo::new(40_400, 404, format!("{what} not found"))
}

fn bad_request(reason: impl Into<String>) -> ErrorInfo {
    ErrorInfo::new(40_000, 400, reason)
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn wire(message: &Message) -> Value {
    json!({
        "serial": message.serial,
        "clientId": message.client_id,
        "text": message.text,
        "metadata": message.metadata,
        "headers": message.headers,
        "action": message.action.as_str(),
        "version": message.version,
        "timestamp": to_millis(message.timestamp),
        "createdAt": to_millis(message.created_at),
    })
}

fn object_field(body: &Value, key: &str) -> Map<String, Value> {
    body.get(key).and_then(Value::as_object).cloned().unwrap_or_default()
}

fn param<'a>(request: &'a ApiRequest, key: &str) -> Option<&'a str> {
    request.params.get(key).map(String::as_str)
}

impl ServiceState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock_millis += 1_000;
        DateTime::from_timestamp_millis(self.clock_millis).unwrap_or_default()
    }

    fn latest(&self, room: &str, serial: &str) -> Option<Message> {
        self.rooms.get(room)?.iter().find(|m| m.serial == serial).cloned()
    }

    fn replace(&mut self, room: &str, message: Message) {
        let stored = self
            .rooms
            .get_mut(room)
            .and_then(|ms| ms.iter_mut().find(|m| m.serial == message.serial));
        if let Some(stored) = stored {
            *stored = message;
        }
    }
}

impl MockChatService {
    /// Service answering on behalf of `client_id`.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            realtime: None,
            state: Mutex::new(ServiceState {
                next_serial: 1,
                clock_millis: BASE_MILLIS,
                rooms: HashMap::new(),
                occupancy: HashMap::new(),
                fail_next: None,
                requests: Vec::new(),
            }),
        }
    }

    /// Deliver writes on the rooms' channels of `realtime`.
    #[must_use]
    pub fn with_realtime(mut self, realtime: Arc<MockRealtime>) -> Self {
        self.realtime = Some(realtime);
        self
    }

    /// Fail the next request with `error`.
    pub fn fail_next(&self, error: ErrorInfo) {
        self.state.lock().fail_next = Some(error);
    }

    /// Set the occupancy reported for `room`.
    pub fn set_occupancy(&self, room: &str, data: OccupancyData) {
        self.state.lock().occupancy.insert(room.to_string(), data);
    }

    /// Store a message from another client and deliver it like any other
    /// write.
    pub fn seed_message(&self, room: &str, client_id: &str, text: &str) -> Message {
        let message = self.store(room, client_id, text.to_string(), Map::new(), Map::new());
        self.fan_out(room, &message);
        message
    }

    fn store(
        &self,
        room: &str,
        client_id: &str,
        text: String,
        metadata: Map<String, Value>,
        headers: Map<String, Value>,
    ) -> Message {
        let mut state = self.state.lock();
        let at = state.tick();
        let serial = format!("{:020}", state.next_serial);
        state.next_serial += 1;
        let message = Message {
            version: serial.clone(),
            serial,
            client_id: client_id.to_string(),
            text,
            metadata,
            headers,
            action: MessageAction::Create,
            timestamp: at,
            created_at: at,
        };
        state.rooms.entry(room.to_string()).or_default().push(message.clone());
        message
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.state.lock().requests.clone()
    }

    /// Stored messages of `room` at their latest version, oldest first.
    pub fn messages(&self, room: &str) -> Vec<Message> {
        self.state.lock().rooms.get(room).cloned().unwrap_or_default()
    }

    fn fan_out(&self, room: &str, message: &Message) {
        let Some(channel) = self.realtime.as_ref().and_then(|r| r.mock_channel(&channel_name(room)))
        else {
            return;
        };
        channel.deliver(InboundMessage {
            name: MESSAGE_EVENT.to_string(),
            data: json!({"text": message.text, "metadata": message.metadata}),
            client_id: Some(message.client_id.clone()),
            serial: Some(message.serial.clone()),
            version: Some(message.version.clone()),
            action: Some(message.action.as_str().to_string()),
            timestamp: Some(message.timestamp),
            created_at: Some(message.created_at),
            headers: message.headers.clone(),
        });
    }

    fn list(&self, room: &str, request: &ApiRequest) -> Result<ApiResponse, ErrorInfo> {
        let state = self.state.lock();
        let mut messages: Vec<Message> = state.rooms.get(room).cloned().unwrap_or_default();
        drop(state);

        let parse = |key: &str| -> Result<Option<i64>, ErrorInfo> {
            param(request, key)
                .map(|v| v.parse::<i64>().map_err(|_| bad_request(format!("bad {key}"))))
                .transpose()
        };
        let start = parse("start")?;
        let end = parse("end")?;
        let from_serial = param(request, "fromSerial");

        messages.retain(|m| {
            let created = to_millis(m.created_at);
            start.is_none_or(|s| created >= s)
                && end.is_none_or(|e| created <= e)
                && from_serial.is_none_or(|f| m.serial.as_str() <= f)
        });

        if param(request, "direction") == Some("backwards") {
            messages.reverse();
        }

        let limit = param(request, "limit").and_then(|l| l.parse().ok()).unwrap_or(DEFAULT_LIMIT);
        let offset: usize = param(request, "cursor").and_then(|c| c.parse().ok()).unwrap_or(0);

        let page: Vec<Value> = messages.iter().skip(offset).take(limit).map(wire).collect();
        let next = (offset + limit < messages.len()).then(|| {
            let mut next = request.clone();
            next.params.insert("cursor".to_string(), (offset + limit).to_string());
            next
        });

        Ok(ApiResponse { items: page, next })
    }

    fn create(&self, room: &str, body: &Value) -> Result<ApiResponse, ErrorInfo> {
        let text = body
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_request("text is required"))?
            .to_string();

        let message = self.store(
            room,
            &self.client_id,
            text,
            object_field(body, "metadata"),
            object_field(body, "headers"),
        );

        self.fan_out(room, &message);
        Ok(ApiResponse::single(
            json!({"serial": message.serial, "createdAt": to_millis(message.created_at)}),
        ))
    }

    fn new_version(
        &self,
        room: &str,
        serial: &str,
        build: impl FnOnce(Message, String, DateTime<Utc>) -> Message,
    ) -> Result<ApiResponse, ErrorInfo> {
        let message = {
            let mut state = self.state.lock();
            let current = state.latest(room, serial).ok_or_else(|| not_found("message"))?;
            let at = state.tick();
            let version = format!("{serial}:{:020}", state.next_serial);
            state.next_serial += 1;
            let message = build(current, version, at);
            state.replace(room, message.clone());
            message
        };

        self.fan_out(room, &message);
        Ok(ApiResponse::single(
            json!({"version": message.version, "timestamp": to_millis(message.timestamp)}),
        ))
    }

    fn update(&self, room: &str, serial: &str, body: &Value) -> Result<ApiResponse, ErrorInfo> {
        let replacement = body.get("message").cloned().unwrap_or(Value::Null);
        let text = replacement
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_request("message.text is required"))?
            .to_string();

        self.new_version(room, serial, |current, version, at| Message {
            text,
            metadata: object_field(&replacement, "metadata"),
            headers: object_field(&replacement, "headers"),
            action: MessageAction::Update,
            version,
            timestamp: at,
            ..current
        })
    }

    fn delete(&self, room: &str, serial: &str) -> Result<ApiResponse, ErrorInfo> {
        self.new_version(room, serial, |current, version, at| Message {
            action: MessageAction::Delete,
            version,
            timestamp: at,
            ..current
        })
    }

    fn handle(&self, request: &ApiRequest) -> Result<ApiResponse, ErrorInfo> {
        let body = request.body.clone().unwrap_or(Value::Null);
        match (request.method, route(&request.path)) {
            (Method::Get, Some(Route::Messages(room))) => self.list(&room, request),
            (Method::Post, Some(Route::Messages(room))) => self.create(&room, &body),
            (Method::Get, Some(Route::Message(room, serial))) => {
                let message = self.state.lock().latest(&room, &serial);
                message.map(|m| ApiResponse::single(wire(&m))).ok_or_else(|| not_found("message"))
            },
            (Method::Put, Some(Route::Message(room, serial))) => self.update(&room, &serial, &body),
            (Method::Post, Some(Route::DeleteMessage(room, serial))) => self.delete(&room, &serial),
            (Method::Get, Some(Route::Occupancy(room))) => {
                let data = self.state.lock().occupancy.get(&room).copied().unwrap_or_default();
                Ok(ApiResponse::single(json!({
                    "connections": data.connections,
                    "presenceMembers": data.presence_members,
                })))
            },
            _ => Err(not_found("route")),
        }
    }
}

#[async_trait]
impl Requester for MockChatService {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, ErrorInfo> {
        let injected = {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            state.fail_next.take()
        };
        if let Some(error) = injected {
            return Err(error);
        }
        self.handle(&request)
    }
}

impl fmt::Debug for MockChatService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockChatService")
            .field("client_id", &self.client_id)
            .field("rooms", &state.rooms.len())
            .field("requests", &state.requests.len())
            .finish_non_exhaustive()
    }
}
