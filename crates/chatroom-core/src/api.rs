//! REST wrapper over the chat service.
//!
//! The transport is abstracted by [`Requester`]: one call per request, JSON
//! items back plus an optional request for the next page. [`ChatApi`] builds
//! the chat endpoints on top of it and decodes the camelCase wire JSON into
//! the SDK's types.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{ChatError, ErrorInfo},
    message::{Message, MessageAction},
};

/// Characters escaped in path segments.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        })
    }
}

/// One REST request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// Method.
    pub method: Method,
    /// Path, already escaped.
    pub path: String,
    /// Query parameters.
    pub params: BTreeMap<String, String>,
    /// JSON body.
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Request with no params and no body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), params: BTreeMap::new(), body: None }
    }

    /// Add a query parameter.
    #[must_use]
    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Set the JSON body.
    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApiResponse {
    /// Items on this page. Single-object endpoints return one item.
    pub items: Vec<Value>,
    /// Request for the following page.
    pub next: Option<ApiRequest>,
}

impl ApiResponse {
    /// Response carrying one object.
    pub fn single(item: Value) -> Self {
        Self { items: vec![item], next: None }
    }

    fn into_single(self, what: &'static str) -> Result<Value, ChatError> {
        self.items.into_iter().next().ok_or_else(|| ChatError::Decode {
            what,
            reason: "empty response".to_string(),
        })
    }
}

/// REST transport.
#[async_trait]
pub trait Requester: Send + Sync + 'static {
    /// Perform `request`.
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, ErrorInfo>;
}

type Decoder<T> = fn(Value) -> Result<T, ChatError>;

/// A page of decoded results with a cursor to the next one.
pub struct PaginatedResult<T> {
    items: Vec<T>,
    next: Option<ApiRequest>,
    requester: Arc<dyn Requester>,
    decode: Decoder<T>,
}

impl<T> PaginatedResult<T> {
    async fn fetch(
        requester: Arc<dyn Requester>,
        request: ApiRequest,
        decode: Decoder<T>,
        context: &str,
    ) -> Result<Self, ChatError> {
        let response =
            requester.request(request).await.map_err(|e| ChatError::api(context, e))?;
        let items = response.items.into_iter().map(decode).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { items, next: response.next, requester, decode })
    }

    /// Items on this page.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Take the items.
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Whether another page exists.
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    /// Fetch the following page, or `None` on the last page.
    pub async fn next(&self) -> Result<Option<Self>, ChatError> {
        let Some(request) = self.next.clone() else {
            return Ok(None);
        };
        Self::fetch(Arc::clone(&self.requester), request, self.decode, "failed to fetch next page")
            .await
            .map(Some)
    }
}

impl<T: fmt::Debug> fmt::Debug for PaginatedResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginatedResult")
            .field("items", &self.items)
            .field("has_next", &self.next.is_some())
            .finish_non_exhaustive()
    }
}

/// History ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    /// Oldest message first.
    #[default]
    OldestFirst,
    /// Newest message first.
    NewestFirst,
}

/// Message history query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryOptions {
    /// Only messages at or after this time.
    pub start: Option<DateTime<Utc>>,
    /// Only messages at or before this time.
    pub end: Option<DateTime<Utc>>,
    /// Page size.
    pub limit: Option<u32>,
    /// Ordering.
    pub order_by: OrderBy,
}

/// Parameters for sending a message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SendMessageParams {
    /// Body text.
    pub text: String,
    /// Application metadata.
    pub metadata: Map<String, Value>,
    /// Application headers.
    pub headers: Map<String, Value>,
}

/// Parameters for updating a message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateMessageParams {
    /// New body.
    pub message: SendMessageParams,
    /// Why the message was edited.
    pub description: Option<String>,
    /// Metadata of the edit operation itself.
    pub operation_metadata: BTreeMap<String, String>,
}

/// Parameters for deleting a message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeleteMessageParams {
    /// Why the message was deleted.
    pub description: Option<String>,
    /// Metadata of the delete operation itself.
    pub operation_metadata: BTreeMap<String, String>,
}

/// Occupancy counters for a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancyData {
    /// Connections attached to the room.
    pub connections: u64,
    /// Members present in the room.
    pub presence_members: u64,
}

// serde hands `skip_serializing_if` a reference to the (borrowed) field.
#[allow(clippy::trivially_copy_pass_by_ref)]
fn no_values(map: &&Map<String, Value>) -> bool {
    map.is_empty()
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn no_strings(map: &&BTreeMap<String, String>) -> bool {
    map.is_empty()
}

#[derive(Debug, Serialize)]
struct SendBody<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "no_values")]
    metadata: &'a Map<String, Value>,
    #[serde(skip_serializing_if = "no_values")]
    headers: &'a Map<String, Value>,
}

impl<'a> From<&'a SendMessageParams> for SendBody<'a> {
    fn from(params: &'a SendMessageParams) -> Self {
        Self { text: &params.text, metadata: &params.metadata, headers: &params.headers }
    }
}

#[derive(Debug, Serialize)]
struct UpdateBody<'a> {
    message: SendBody<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "no_strings")]
    metadata: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct DeleteBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "no_strings")]
    metadata: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    serial: String,
    created_at: i64,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestMessage {
    serial: String,
    client_id: String,
    text: String,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    headers: Map<String, Value>,
    action: String,
    version: String,
    timestamp: i64,
    created_at: i64,
}

fn decode_err(what: &'static str) -> impl FnOnce(serde_json::Error) -> ChatError {
    move |e| ChatError::Decode { what, reason: e.to_string() }
}

pub(crate) fn millis_to_datetime(
    what: &'static str,
    millis: i64,
) -> Result<DateTime<Utc>, ChatError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| ChatError::Decode {
        what,
        reason: format!("timestamp {millis} out of range"),
    })
}

fn decode_message(value: Value) -> Result<Message, ChatError> {
    let raw: RestMessage = serde_json::from_value(value).map_err(decode_err("message"))?;
    let action = MessageAction::parse(&raw.action).ok_or_else(|| ChatError::Decode {
        what: "message",
        reason: format!("unknown action {:?}", raw.action),
    })?;

    Ok(Message {
        serial: raw.serial,
        client_id: raw.client_id,
        text: raw.text,
        metadata: raw.metadata,
        headers: raw.headers,
        action,
        version: raw.version,
        timestamp: millis_to_datetime("message", raw.timestamp)?,
        created_at: millis_to_datetime("message", raw.created_at)?,
    })
}

fn encode<T: Serialize>(body: &T) -> Result<Value, ChatError> {
    serde_json::to_value(body).map_err(|e| ChatError::InvalidArgument(e.to_string()))
}

fn room_path(room: &str) -> String {
    format!("/chat/v4/rooms/{}", utf8_percent_encode(room, SEGMENT))
}

fn message_path(room: &str, serial: &str) -> String {
    format!("{}/messages/{}", room_path(room), utf8_percent_encode(serial, SEGMENT))
}

/// Chat REST endpoints.
#[derive(Clone)]
pub struct ChatApi {
    requester: Arc<dyn Requester>,
    client_id: String,
}

impl ChatApi {
    /// Wrap `requester`; `client_id` stamps locally built messages.
    pub fn new(requester: Arc<dyn Requester>, client_id: impl Into<String>) -> Self {
        Self { requester, client_id: client_id.into() }
    }

    async fn call(&self, request: ApiRequest, context: String) -> Result<ApiResponse, ChatError> {
        tracing::trace!(method = %request.method, path = %request.path, "chat api request");
        self.requester.request(request).await.map_err(|e| ChatError::api(context, e))
    }

    /// Message history.
    ///
    /// `from_serial` bounds the query to messages before that channel
    /// position; it forces newest-first ordering.
    pub async fn get_messages(
        &self,
        room: &str,
        options: &QueryOptions,
        from_serial: Option<&str>,
    ) -> Result<PaginatedResult<Message>, ChatError> {
        let mut request = ApiRequest::new(Method::Get, format!("{}/messages", room_path(room)));

        if let Some(start) = options.start {
            request = request.param("start", start.timestamp_millis().to_string());
        }
        if let Some(end) = options.end {
            request = request.param("end", end.timestamp_millis().to_string());
        }
        if let Some(limit) = options.limit {
            request = request.param("limit", limit.to_string());
        }

        let order_by = if from_serial.is_some() { OrderBy::NewestFirst } else { options.order_by };
        let direction = match order_by {
            OrderBy::OldestFirst => "forwards",
            OrderBy::NewestFirst => "backwards",
        };
        request = request.param("direction", direction);

        if let Some(serial) = from_serial {
            request = request.param("fromSerial", serial);
        }

        PaginatedResult::fetch(
            Arc::clone(&self.requester),
            request,
            decode_message,
            &format!("failed to get messages for room {room}"),
        )
        .await
    }

    /// Fetch one message by serial.
    pub async fn get_message(&self, room: &str, serial: &str) -> Result<Message, ChatError> {
        let request = ApiRequest::new(Method::Get, message_path(room, serial));
        let item = self
            .call(request, format!("failed to get message {serial}"))
            .await?
            .into_single("message")?;
        decode_message(item)
    }

    /// Send a message; returns it as created.
    pub async fn send_message(
        &self,
        room: &str,
        params: &SendMessageParams,
    ) -> Result<Message, ChatError> {
        let request = ApiRequest::new(Method::Post, format!("{}/messages", room_path(room)))
            .body(encode(&SendBody::from(params))?);
        let item = self
            .call(request, format!("failed to send message to room {room}"))
            .await?
            .into_single("send response")?;
        let response: SendResponse =
            serde_json::from_value(item).map_err(decode_err("send response"))?;
        let created_at = millis_to_datetime("send response", response.created_at)?;

        Ok(Message {
            version: response.serial.clone(),
            serial: response.serial,
            client_id: self.client_id.clone(),
            text: params.text.clone(),
            metadata: params.metadata.clone(),
            headers: params.headers.clone(),
            action: MessageAction::Create,
            timestamp: created_at,
            created_at,
        })
    }

    /// Update a message; returns the new version.
    pub async fn update_message(
        &self,
        room: &str,
        original: &Message,
        params: &UpdateMessageParams,
    ) -> Result<Message, ChatError> {
        let body = UpdateBody {
            message: SendBody::from(&params.message),
            description: params.description.as_deref(),
            metadata: &params.operation_metadata,
        };
        let request = ApiRequest::new(Method::Put, message_path(room, &original.serial))
            .body(encode(&body)?);
        let item = self
            .call(request, format!("failed to update message {}", original.serial))
            .await?
            .into_single("update response")?;
        let response: VersionResponse =
            serde_json::from_value(item).map_err(decode_err("update response"))?;

        Ok(Message {
            serial: original.serial.clone(),
            client_id: original.client_id.clone(),
            text: params.message.text.clone(),
            metadata: params.message.metadata.clone(),
            headers: params.message.headers.clone(),
            action: MessageAction::Update,
            version: response.version,
            timestamp: millis_to_datetime("update response", response.timestamp)?,
            created_at: original.created_at,
        })
    }

    /// Delete a message; returns the deleted version.
    pub async fn delete_message(
        &self,
        room: &str,
        original: &Message,
        params: &DeleteMessageParams,
    ) -> Result<Message, ChatError> {
        let body = DeleteBody {
            description: params.description.as_deref(),
            metadata: &params.operation_metadata,
        };
        let path = format!("{}/delete", message_path(room, &original.serial));
        let request = ApiRequest::new(Method::Post, path).body(encode(&body)?);
        let item = self
            .call(request, format!("failed to delete message {}", original.serial))
            .await?
            .into_single("delete response")?;
        let response: VersionResponse =
            serde_json::from_value(item).map_err(decode_err("delete response"))?;

        Ok(Message {
            action: MessageAction::Delete,
            version: response.version,
            timestamp: millis_to_datetime("delete response", response.timestamp)?,
            ..original.clone()
        })
    }

    /// Current occupancy of a room.
    pub async fn get_occupancy(&self, room: &str) -> Result<OccupancyData, ChatError> {
        let request = ApiRequest::new(Method::Get, format!("{}/occupancy", room_path(room)));
        let item = self
            .call(request, format!("failed to get occupancy for room {room}"))
            .await?
            .into_single("occupancy")?;
        serde_json::from_value(item).map_err(decode_err("occupancy"))
    }
}

impl fmt::Debug for ChatApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatApi").field("client_id", &self.client_id).finish_non_exhaustive()
    }
}
