//! Acceptance tests for the protocol vocabulary.
//!
//! Tests cover:
//! - Trait object safety (Arc<dyn Trait> is Send + Sync)
//! - Message wire shape
//! - Typed ID conversions
//! - Kernel spec and lifecycle event serialization

use ferrolite_protocol::*;
use serde_json::json;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Object Safety: Arc<dyn Trait> compiles and is Send + Sync
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn _assert_send_sync<T: Send + Sync>() {}

#[test]
fn kernel_backend_is_object_safe_send_sync() {
    _assert_send_sync::<std::sync::Arc<dyn KernelBackend>>();
}

#[test]
fn kernel_factory_is_object_safe_send_sync() {
    _assert_send_sync::<std::sync::Arc<dyn KernelFactory>>();
}

#[test]
fn kernel_channel_is_object_safe_send_sync() {
    _assert_send_sync::<std::sync::Arc<dyn KernelChannel>>();
}

#[test]
fn kernel_observer_is_object_safe_send_sync() {
    _assert_send_sync::<std::sync::Arc<dyn KernelObserver>>();
}

#[test]
fn kernel_context_is_send_sync() {
    _assert_send_sync::<KernelContext>();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message wire shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn message_parses_jupyter_envelope() {
    let wire = json!({
        "header": {
            "msg_id": "m1",
            "msg_type": "execute_request",
            "session": "c1",
            "username": "u",
            "date": "2024-01-01T00:00:00Z",
            "version": "5.3"
        },
        "parent_header": {},
        "metadata": {},
        "content": { "code": "print(1)" },
        "channel": "shell",
        "buffers": []
    });

    let msg: Message = serde_json::from_value(wire).unwrap();
    assert_eq!(msg.msg_type(), msg_type::EXECUTE_REQUEST);
    assert_eq!(msg.channel, Channel::Shell);
    assert!(msg.parent_header.is_none());
    assert_eq!(msg.route_session(), Some("c1"));
}

#[test]
fn message_tolerates_missing_optional_fields() {
    let wire = json!({
        "header": { "msg_id": "m2", "msg_type": "stream", "session": "" },
        "channel": "iopub"
    });

    let msg: Message = serde_json::from_value(wire).unwrap();
    assert_eq!(msg.content, json!({}));
    assert_eq!(msg.metadata, json!({}));
    assert!(msg.buffers.is_empty());
    assert_eq!(msg.header.version, "");
}

#[test]
fn reply_links_parent_and_inherits_session() {
    let request = Message::execute_request(&ClientId::new("c1"), "1");
    let reply = Message::reply(
        &request,
        Channel::Shell,
        msg_type::EXECUTE_REPLY,
        json!({"status": "ok"}),
    );

    assert_eq!(reply.parent_msg_id(), Some(request.msg_id()));
    assert_eq!(reply.header.session, "c1");
    assert_ne!(reply.msg_id(), request.msg_id());
    assert!(!reply.is_execute_error());
}

#[test]
fn execute_error_detection_reads_status() {
    let request = Message::execute_request(&ClientId::new("c1"), "raise x");
    let failed = Message::reply(
        &request,
        Channel::Shell,
        msg_type::EXECUTE_REPLY,
        json!({"status": "error", "ename": "E", "evalue": "x", "traceback": []}),
    );
    assert!(failed.is_execute_error());

    let not_a_reply = Message::reply(
        &request,
        Channel::Iopub,
        msg_type::ERROR,
        json!({"status": "error"}),
    );
    assert!(!not_a_reply.is_execute_error());
}

#[test]
fn status_message_carries_execution_state() {
    let request = Message::execute_request(&ClientId::new("c1"), "1");
    let idle = Message::status(&request, ExecutionState::Idle);

    assert_eq!(idle.channel, Channel::Iopub);
    assert_eq!(idle.content, json!({"execution_state": "idle"}));
    assert_eq!(idle.execution_state(), Some(ExecutionState::Idle));
    assert_eq!(request.execution_state(), None);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Typed IDs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn typed_ids_convert_and_display() {
    let id = KernelId::from("k1");
    assert_eq!(id.as_str(), "k1");
    assert_eq!(id.to_string(), "k1");
    assert_eq!(id, "k1");
    assert_eq!(serde_json::to_value(&id).unwrap(), json!("k1"));
}

#[test]
fn generated_ids_are_distinct() {
    let a = SessionId::generate();
    let b = SessionId::generate();
    assert_ne!(a, b);
    assert_eq!(a.as_str().len(), 36);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Specs and lifecycle events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn kernel_spec_defaults_argv_and_resources() {
    let spec: KernelSpec = serde_json::from_value(json!({
        "name": "python",
        "display_name": "Python",
        "language": "python"
    }))
    .unwrap();
    assert!(spec.argv.is_empty());
    assert!(spec.resources.is_empty());

    let spec = spec.with_resource("logo-32x32", "/logo.png");
    assert_eq!(spec.resources["logo-32x32"], "/logo.png");
}

#[test]
fn kernel_event_is_tagged() {
    let event = KernelEvent::Removed {
        id: KernelId::new("k1"),
    };
    assert_eq!(
        serde_json::to_value(&event).unwrap(),
        json!({"type": "removed", "id": "k1"})
    );
}

#[test]
fn duration_ms_is_a_bare_integer() {
    let d: DurationMs = serde_json::from_value(json!(250)).unwrap();
    assert_eq!(d.to_std(), std::time::Duration::from_millis(250));
    assert_eq!(d.to_string(), "250ms");
}

#[test]
fn errors_render_their_context() {
    let err = KernelError::NoSuchKernelSpec("julia".into());
    assert_eq!(err.to_string(), "no such kernel spec: julia");

    let err: SessionError = KernelError::NotFound("k9".into()).into();
    assert!(err.to_string().contains("kernel not found: k9"));
}
