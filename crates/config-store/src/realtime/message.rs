//! Phoenix channel frames used by the realtime change feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::{Result, StoreError};
use crate::row::ChangeEvent;

pub const PHOENIX_TOPIC: &str = "phoenix";
pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";
pub const EVENT_SYSTEM: &str = "system";

/// A single Phoenix frame in the JSON v1 serializer format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    /// Join a channel that listens for `UPDATE`s on one table.
    pub fn join(topic: &str, schema: &str, table: &str, access_token: &str, msg_ref: u64) -> Self {
        let msg_ref = msg_ref.to_string();
        Self {
            topic: topic.to_string(),
            event: EVENT_JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [
                        { "event": "UPDATE", "schema": schema, "table": table }
                    ],
                },
                "access_token": access_token,
            }),
            join_ref: Some(msg_ref.clone()),
            msg_ref: Some(msg_ref),
        }
    }

    pub fn heartbeat(msg_ref: u64) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: None,
        }
    }

    pub fn leave(topic: &str, msg_ref: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: None,
        }
    }

    /// Encode as a WebSocket text frame.
    pub fn to_ws(&self) -> Result<Message> {
        Ok(Message::text(serde_json::to_string(self)?))
    }

    /// Decode a WebSocket frame.
    ///
    /// Returns `Ok(None)` for frames that carry no channel message (ping, pong, etc.).
    pub fn from_ws(message: &Message) -> Result<Option<Self>> {
        match message {
            Message::Text(text) => Ok(Some(serde_json::from_str(text.as_str())?)),
            Message::Binary(data) => Ok(Some(serde_json::from_slice(data)?)),
            _ => Ok(None),
        }
    }
}

/// What an inbound frame means for the feed.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to a message we sent, identified by its ref.
    Reply {
        msg_ref: Option<String>,
        ok: bool,
        reason: Option<String>,
    },
    /// A matching table update.
    Change(ChangeEvent),
    /// The server closed or errored the channel.
    ChannelClosed { reason: String },
    /// Server status notice for the channel.
    System { ok: bool, message: String },
    /// Anything else (presence, other tables, other event types).
    Ignored,
}

impl Inbound {
    /// Interpret a frame received on `topic` for updates to `table`.
    pub fn classify(message: &PhoenixMessage, topic: &str, table: &str) -> Inbound {
        if message.topic != topic {
            return Inbound::Ignored;
        }

        match message.event.as_str() {
            EVENT_REPLY => {
                let status = message.payload.get("status").and_then(Value::as_str);
                let reason = message
                    .payload
                    .pointer("/response/reason")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Inbound::Reply {
                    msg_ref: message.msg_ref.clone(),
                    ok: status == Some("ok"),
                    reason,
                }
            }
            EVENT_POSTGRES_CHANGES => parse_change(&message.payload, table)
                .map(Inbound::Change)
                .unwrap_or(Inbound::Ignored),
            EVENT_ERROR | EVENT_CLOSE => Inbound::ChannelClosed {
                reason: message.event.clone(),
            },
            EVENT_SYSTEM => Inbound::System {
                ok: message.payload.get("status").and_then(Value::as_str) == Some("ok"),
                message: message
                    .payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            _ => Inbound::Ignored,
        }
    }
}

/// Pull an update event for `table` out of a `postgres_changes` payload.
fn parse_change(payload: &Value, table: &str) -> Option<ChangeEvent> {
    let data = payload.get("data")?;

    if data.get("type").and_then(Value::as_str) != Some("UPDATE") {
        return None;
    }
    if data.get("table").and_then(Value::as_str) != Some(table) {
        return None;
    }

    let config_key = data
        .pointer("/record/config_key")
        .and_then(Value::as_str)
        .map(str::to_string);
    let commit_timestamp = data
        .get("commit_timestamp")
        .and_then(Value::as_str)
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc));

    Some(ChangeEvent {
        table: table.to_string(),
        config_key,
        commit_timestamp,
    })
}

/// Turn a join reply into the subscription outcome.
pub(crate) fn join_outcome(ok: bool, reason: Option<String>) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(StoreError::subscription(format!(
            "channel join rejected: {}",
            reason.unwrap_or_else(|| "no reason given".to_string())
        )))
    }
}
