//! Messages the runtime fabricates on behalf of a backend.

use crate::config::RuntimeConfig;
use ferrolite_protocol::message::{Channel, ExecutionState, Header, Message, msg_type};
use serde_json::{Value, json};

pub(crate) const INTERRUPT_ENAME: &str = "Kernel Interrupt";
pub(crate) const INTERRUPT_EVALUE: &str = "Interrupted";

fn reply(
    config: &RuntimeConfig,
    parent: &Message,
    channel: Channel,
    msg_type: &str,
    content: Value,
) -> Message {
    let header = Header::new(msg_type, parent.header.session.clone())
        .with_username(config.username.clone())
        .with_version(config.protocol_version.clone());
    let mut msg = Message::new(channel, header, content);
    msg.parent_header = Some(parent.header.clone());
    msg
}

/// The single iopub error shown for an interrupt burst.
pub(crate) fn interrupt_error(config: &RuntimeConfig, parent: &Message) -> Message {
    reply(
        config,
        parent,
        Channel::Iopub,
        msg_type::ERROR,
        json!({
            "ename": INTERRUPT_ENAME,
            "evalue": INTERRUPT_EVALUE,
            "traceback": [],
        }),
    )
}

/// The `execute_reply` standing in for a request that never ran.
pub(crate) fn interrupt_reply(config: &RuntimeConfig, parent: &Message) -> Message {
    reply(
        config,
        parent,
        Channel::Shell,
        msg_type::EXECUTE_REPLY,
        json!({
            "status": "error",
            "cause": "interrupt",
            "execution_count": 0,
            "ename": INTERRUPT_ENAME,
            "evalue": INTERRUPT_EVALUE,
            "traceback": [],
        }),
    )
}

pub(crate) fn idle(config: &RuntimeConfig, parent: &Message) -> Message {
    reply(
        config,
        parent,
        Channel::Iopub,
        msg_type::STATUS,
        json!({ "execution_state": ExecutionState::Idle }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrolite_protocol::id::ClientId;

    #[test]
    fn interrupt_reply_is_parented_and_stamped() {
        let config = RuntimeConfig {
            username: "tester".into(),
            protocol_version: "5.4".into(),
        };
        let request = Message::execute_request(&ClientId::new("c1"), "1");
        let reply = interrupt_reply(&config, &request);

        assert_eq!(reply.parent_msg_id(), Some(request.msg_id()));
        assert_eq!(reply.route_session(), Some("c1"));
        assert_eq!(reply.header.username, "tester");
        assert_eq!(reply.header.version, "5.4");
        assert_eq!(reply.content["cause"], json!("interrupt"));
        assert_eq!(reply.content["execution_count"], json!(0));
        assert!(reply.is_execute_error());
    }

    #[test]
    fn idle_is_a_status_broadcast() {
        let request = Message::execute_request(&ClientId::new("c1"), "1");
        let idle = idle(&RuntimeConfig::default(), &request);
        assert_eq!(idle.channel, Channel::Iopub);
        assert_eq!(idle.execution_state(), Some(ExecutionState::Idle));
    }

    #[test]
    fn interrupt_error_has_empty_traceback() {
        let request = Message::execute_request(&ClientId::new("c1"), "1");
        let error = interrupt_error(&RuntimeConfig::default(), &request);
        assert_eq!(
            error.content,
            json!({"ename": "Kernel Interrupt", "evalue": "Interrupted", "traceback": []})
        );
    }
}
