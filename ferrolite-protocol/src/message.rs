//! The Jupyter-shaped message envelope.
//!
//! A [`Message`] is `{header, parent_header, metadata, content, channel, buffers}`.
//! The runtime reads only a handful of fields (`channel`, `header.msg_type`,
//! `header.session`, `parent_header.session`, `parent_header.msg_id`, and
//! `content.status` of execute replies); everything else passes through
//! untouched.

use crate::id::ClientId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Messaging protocol version stamped on headers built by ferrolite.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Well-known `header.msg_type` values.
pub mod msg_type {
    /// Run code.
    pub const EXECUTE_REQUEST: &str = "execute_request";
    /// Outcome of an `execute_request`.
    pub const EXECUTE_REPLY: &str = "execute_reply";
    /// Re-broadcast of the code being executed.
    pub const EXECUTE_INPUT: &str = "execute_input";
    /// Result value of an execution.
    pub const EXECUTE_RESULT: &str = "execute_result";
    /// Kernel asks a client for input.
    pub const INPUT_REQUEST: &str = "input_request";
    /// Client answers an `input_request`.
    pub const INPUT_REPLY: &str = "input_reply";
    /// Kernel information request.
    pub const KERNEL_INFO_REQUEST: &str = "kernel_info_request";
    /// Kernel information reply.
    pub const KERNEL_INFO_REPLY: &str = "kernel_info_reply";
    /// Interrupt request (control channel).
    pub const INTERRUPT_REQUEST: &str = "interrupt_request";
    /// Stdout/stderr text.
    pub const STREAM: &str = "stream";
    /// Error output.
    pub const ERROR: &str = "error";
    /// Kernel execution state.
    pub const STATUS: &str = "status";
}

/// The four Jupyter channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Request/reply for execute, complete, inspect, ...
    Shell,
    /// Request/reply for administrative requests. Not queued.
    Control,
    /// Broadcast of outputs and status.
    Iopub,
    /// `input_request` / `input_reply` round-trips.
    Stdin,
}

/// Kernel execution state carried by `status` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    /// The kernel is starting up.
    Starting,
    /// The kernel is handling a request.
    Busy,
    /// The kernel finished handling a request.
    Idle,
}

/// Message header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Unique id of this message.
    pub msg_id: String,
    /// Message type, e.g. `execute_request`.
    pub msg_type: String,
    /// Session of the originating client.
    pub session: String,
    /// Originating user name.
    #[serde(default)]
    pub username: String,
    /// RFC 3339 creation timestamp.
    #[serde(default)]
    pub date: String,
    /// Messaging protocol version.
    #[serde(default)]
    pub version: String,
}

impl Header {
    /// Build a header with a fresh `msg_id` and the current time.
    pub fn new(msg_type: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            msg_id: uuid::Uuid::new_v4().to_string(),
            msg_type: msg_type.into(),
            session: session.into(),
            username: String::new(),
            date: chrono::Utc::now().to_rfc3339(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Set the user name.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Set the protocol version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// A protocol message travelling between clients and a kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Header of this message.
    pub header: Header,
    /// Header of the message this one responds to. `{}` on the wire when absent.
    #[serde(default, with = "parent_header")]
    pub parent_header: Option<Header>,
    /// Free-form metadata.
    #[serde(default = "empty_object")]
    pub metadata: Value,
    /// Message-type specific content.
    #[serde(default = "empty_object")]
    pub content: Value,
    /// Channel this message travels on.
    pub channel: Channel,
    /// Binary buffers attached to the message.
    #[serde(default)]
    pub buffers: Vec<Vec<u8>>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Message {
    /// Build a message with no parent.
    pub fn new(channel: Channel, header: Header, content: Value) -> Self {
        Self {
            header,
            parent_header: None,
            metadata: empty_object(),
            content,
            channel,
            buffers: Vec::new(),
        }
    }

    /// Build a client request stamped with the client's session.
    pub fn request(
        channel: Channel,
        msg_type: impl Into<String>,
        client: &ClientId,
        content: Value,
    ) -> Self {
        Self::new(channel, Header::new(msg_type, client.as_str()), content)
    }

    /// Shorthand for a shell `execute_request` running `code`.
    pub fn execute_request(client: &ClientId, code: impl Into<String>) -> Self {
        Self::request(
            Channel::Shell,
            msg_type::EXECUTE_REQUEST,
            client,
            json!({
                "code": code.into(),
                "silent": false,
                "store_history": true,
                "user_expressions": {},
                "allow_stdin": true,
                "stop_on_error": true,
            }),
        )
    }

    /// Build a message responding to `parent`.
    ///
    /// The new header inherits `session`, `username` and `version` from the
    /// parent, and `parent.header` becomes `parent_header`.
    pub fn reply(
        parent: &Message,
        channel: Channel,
        msg_type: impl Into<String>,
        content: Value,
    ) -> Self {
        let header = Header::new(msg_type, parent.header.session.clone())
            .with_username(parent.header.username.clone())
            .with_version(parent.header.version.clone());
        Self {
            header,
            parent_header: Some(parent.header.clone()),
            metadata: empty_object(),
            content,
            channel,
            buffers: Vec::new(),
        }
    }

    /// Build an iopub `status` message for `parent`.
    pub fn status(parent: &Message, state: ExecutionState) -> Self {
        Self::reply(
            parent,
            Channel::Iopub,
            msg_type::STATUS,
            json!({ "execution_state": state }),
        )
    }

    /// The `header.msg_type`.
    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    /// The `header.msg_id`.
    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    /// The `parent_header.msg_id`, if there is a parent.
    pub fn parent_msg_id(&self) -> Option<&str> {
        self.parent_header.as_ref().map(|h| h.msg_id.as_str())
    }

    /// The client session this message is addressed to.
    ///
    /// Stdin messages are addressed by `parent_header.session` (the client
    /// whose request caused the input prompt); everything else by
    /// `header.session`. Empty sessions address nobody.
    pub fn route_session(&self) -> Option<&str> {
        let session = match self.channel {
            Channel::Stdin => self.parent_header.as_ref()?.session.as_str(),
            _ => self.header.session.as_str(),
        };
        (!session.is_empty()).then_some(session)
    }

    /// True for an `execute_reply` whose `content.status` is `"error"`.
    pub fn is_execute_error(&self) -> bool {
        self.msg_type() == msg_type::EXECUTE_REPLY
            && self.content.get("status").and_then(Value::as_str) == Some("error")
    }

    /// The `content.execution_state` of a `status` message.
    pub fn execution_state(&self) -> Option<ExecutionState> {
        if self.msg_type() != msg_type::STATUS {
            return None;
        }
        serde_json::from_value(self.content.get("execution_state")?.clone()).ok()
    }
}

/// `parent_header` is `{}` on the wire when there is no parent.
mod parent_header {
    use super::Header;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::{Map, Value};

    pub fn serialize<S: Serializer>(value: &Option<Header>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(header) => header.serialize(s),
            None => Map::new().serialize(s),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Header>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) if map.is_empty() => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(D::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_parent_serializes_as_empty_object() {
        let msg = Message::execute_request(&ClientId::new("c1"), "1 + 1");
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["parent_header"], json!({}));
        assert_eq!(wire["channel"], json!("shell"));

        let back: Message = serde_json::from_value(wire).unwrap();
        assert!(back.parent_header.is_none());
    }

    #[test]
    fn stdin_routes_by_parent_session() {
        let request = Message::execute_request(&ClientId::new("c1"), "input()");
        let mut prompt = Message::reply(
            &request,
            Channel::Stdin,
            msg_type::INPUT_REQUEST,
            json!({"prompt": "", "password": false}),
        );
        prompt.header.session = "kernel-side".into();
        assert_eq!(prompt.route_session(), Some("c1"));
    }

    #[test]
    fn shell_routes_by_header_session() {
        let msg = Message::execute_request(&ClientId::new("c7"), "x");
        assert_eq!(msg.route_session(), Some("c7"));

        let anonymous = Message::request(Channel::Shell, "x", &ClientId::new(""), json!({}));
        assert_eq!(anonymous.route_session(), None);
    }
}
