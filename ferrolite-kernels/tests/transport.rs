//! Queueing, routing, interrupt and stdin behaviour of a kernel's transport.

use async_trait::async_trait;
use ferrolite_kernels::{ClientConnection, KernelRuntime, StartKernel};
use ferrolite_protocol::test_utils::echo_spec;
use ferrolite_protocol::*;
use ferrolite_registry::KernelRegistry;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// A backend whose behaviour is picked by the code it is asked to run.
///
/// | Code | Behaviour |
/// |------|-----------|
/// | `block` | wait for a gate permit, then reply ok |
/// | `block fail` | wait for a gate permit, then reply error |
/// | `fail` | reply error |
/// | `cell` | reply error if an interrupt hint arrived first, else ok |
/// | `stream <text>` | broadcast `<text>` on iopub, reply ok |
/// | `input` | ask the client for input, reply ok with the value |
/// | anything else | reply ok |
///
/// No status messages are emitted so tests see only what they provoke.
struct GateKernel {
    ctx: KernelContext,
    gate: Arc<Semaphore>,
    handled: Mutex<Vec<Message>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    interrupted: AtomicBool,
}

impl GateKernel {
    fn handled(&self) -> Vec<Message> {
        self.handled.lock().unwrap().clone()
    }

    fn reply(&self, request: &Message, status: &str, extra: serde_json::Value) {
        let mut content = json!({ "status": status, "execution_count": 1 });
        if let (Some(content), Some(extra)) = (content.as_object_mut(), extra.as_object()) {
            content.extend(extra.clone());
        }
        self.ctx.send(Message::reply(
            request,
            Channel::Shell,
            msg_type::EXECUTE_REPLY,
            content,
        ));
    }

    async fn execute(&self, request: &Message) -> Result<(), KernelError> {
        let code = request.content["code"].as_str().unwrap_or_default().to_string();
        match code.as_str() {
            "block" | "block fail" => {
                self.gate
                    .acquire()
                    .await
                    .map_err(|e| KernelError::Backend(e.to_string()))?
                    .forget();
                let status = if code == "block" { "ok" } else { "error" };
                self.reply(request, status, json!({}));
            }
            "fail" => self.reply(request, "error", json!({ "ename": "Boom" })),
            "cell" => {
                if self.interrupted.swap(false, Ordering::SeqCst) {
                    self.reply(request, "error", json!({ "ename": "KeyboardInterrupt" }));
                } else {
                    self.reply(request, "ok", json!({}));
                }
            }
            "input" => {
                let prompt = Message::reply(
                    request,
                    Channel::Stdin,
                    msg_type::INPUT_REQUEST,
                    json!({ "prompt": "? ", "password": false }),
                );
                let answer = self.ctx.input(prompt).await?;
                self.reply(request, "ok", json!({ "value": answer.content["value"] }));
            }
            other => {
                if let Some(text) = other.strip_prefix("stream ") {
                    self.ctx.send(Message::reply(
                        request,
                        Channel::Iopub,
                        msg_type::STREAM,
                        json!({ "name": "stdout", "text": text }),
                    ));
                }
                tokio::task::yield_now().await;
                self.reply(request, "ok", json!({}));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KernelBackend for GateKernel {
    async fn handle_message(&self, msg: Message) -> Result<(), KernelError> {
        self.handled.lock().unwrap().push(msg.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let outcome = match msg.msg_type() {
            msg_type::EXECUTE_REQUEST => self.execute(&msg).await,
            msg_type::KERNEL_INFO_REQUEST => {
                self.ctx.send(Message::reply(
                    &msg,
                    msg.channel,
                    msg_type::KERNEL_INFO_REPLY,
                    json!({ "status": "ok" }),
                ));
                Ok(())
            }
            _ => Ok(()),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }
}

struct GateFactory {
    gate: Arc<Semaphore>,
    kernels: Mutex<Vec<Arc<GateKernel>>>,
}

#[async_trait]
impl KernelFactory for GateFactory {
    async fn create(&self, ctx: KernelContext) -> Result<Arc<dyn KernelBackend>, KernelError> {
        let kernel = Arc::new(GateKernel {
            ctx,
            gate: Arc::clone(&self.gate),
            handled: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            interrupted: AtomicBool::new(false),
        });
        self.kernels.lock().unwrap().push(kernel.clone());
        Ok(kernel)
    }
}

struct Fixture {
    runtime: Arc<KernelRuntime>,
    gate: Arc<Semaphore>,
    factory: Arc<GateFactory>,
    id: KernelId,
}

impl Fixture {
    async fn new() -> Self {
        let registry = Arc::new(KernelRegistry::new());
        let gate = Arc::new(Semaphore::new(0));
        let factory = Arc::new(GateFactory {
            gate: Arc::clone(&gate),
            kernels: Mutex::new(Vec::new()),
        });
        registry.register(echo_spec("gate"), factory.clone());
        let runtime = KernelRuntime::new(registry);
        let model = runtime
            .start_new(StartKernel::new("gate").with_id("k1"))
            .await
            .unwrap();
        Self {
            runtime,
            gate,
            factory,
            id: model.id,
        }
    }

    fn connect(&self, client: &str) -> ClientConnection {
        self.runtime.connect(&self.id, client).unwrap()
    }

    fn kernel(&self) -> Arc<GateKernel> {
        self.factory.kernels.lock().unwrap()[0].clone()
    }

    fn execute(&self, client: &ClientConnection, code: &str) -> Message {
        let request = Message::execute_request(client.client_id(), code);
        client.send(request.clone()).unwrap();
        request
    }

    async fn until_busy(&self) {
        let runtime = Arc::clone(&self.runtime);
        let id = self.id.clone();
        eventually(move || runtime.get_model(&id).unwrap().status == KernelStatus::Busy).await;
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition never became true");
}

async fn next(client: &mut ClientConnection) -> Message {
    tokio::time::timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("connection closed")
}

/// `(msg_type, parent msg_id)` of the next `n` messages.
async fn take(client: &mut ClientConnection, n: usize) -> Vec<(String, String)> {
    let mut seen = Vec::with_capacity(n);
    for _ in 0..n {
        let msg = next(client).await;
        seen.push((
            msg.msg_type().to_string(),
            msg.parent_msg_id().unwrap_or_default().to_string(),
        ));
    }
    seen
}

fn entry(msg_type: &str, parent: &Message) -> (String, String) {
    (msg_type.to_string(), parent.msg_id().to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_requests_never_overlap_and_keep_order() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");
    let c2 = fx.connect("c2");

    let mut sent = Vec::new();
    for i in 0..20 {
        let client = if i % 2 == 0 { &c1 } else { &c2 };
        sent.push(fx.execute(client, &format!("step {i}")).msg_id().to_string());
    }

    // c1 sees its ten replies.
    for _ in 0..10 {
        assert_eq!(next(&mut c1).await.msg_type(), msg_type::EXECUTE_REPLY);
    }
    let kernel = fx.kernel();
    eventually(|| kernel.handled().len() == 20).await;

    let handled: Vec<_> = kernel
        .handled()
        .iter()
        .map(|m| m.msg_id().to_string())
        .collect();
    assert_eq!(handled, sent);
    assert_eq!(kernel.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn status_tracks_the_in_flight_request() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");
    assert_eq!(fx.runtime.get_model(&fx.id).unwrap().status, KernelStatus::Idle);

    fx.execute(&c1, "block");
    fx.until_busy().await;
    fx.gate.add_permits(1);
    next(&mut c1).await;

    let runtime = Arc::clone(&fx.runtime);
    let id = fx.id.clone();
    eventually(move || runtime.get_model(&id).unwrap().status == KernelStatus::Idle).await;
}

#[tokio::test]
async fn control_messages_skip_the_queue() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");

    let blocked = fx.execute(&c1, "block");
    fx.until_busy().await;

    let info = Message::request(
        Channel::Control,
        msg_type::KERNEL_INFO_REQUEST,
        c1.client_id(),
        json!({}),
    );
    c1.send(info.clone()).unwrap();

    let reply = next(&mut c1).await;
    assert_eq!(reply.msg_type(), msg_type::KERNEL_INFO_REPLY);
    assert_eq!(reply.channel, Channel::Control);
    assert_eq!(reply.parent_msg_id(), Some(info.msg_id()));

    fx.gate.add_permits(1);
    let done = next(&mut c1).await;
    assert_eq!(done.parent_msg_id(), Some(blocked.msg_id()));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interrupt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn interrupt_burst_reports_one_error_and_one_reply_each() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");
    let mut c2 = fx.connect("c2");

    let running = fx.execute(&c1, "block");
    fx.until_busy().await;
    let a = fx.execute(&c1, "a");
    let b = fx.execute(&c1, "b");
    let c = fx.execute(&c2, "c");

    fx.runtime.interrupt(&fx.id).await.unwrap();
    fx.gate.add_permits(1);

    assert_eq!(
        take(&mut c1, 7).await,
        vec![
            entry("execute_reply", &running),
            entry("error", &a),
            entry("execute_reply", &a),
            entry("status", &a),
            entry("execute_reply", &b),
            entry("status", &b),
            entry("status", &c),
        ]
    );
    assert_eq!(
        take(&mut c2, 5).await,
        vec![
            entry("error", &a),
            entry("status", &a),
            entry("status", &b),
            entry("execute_reply", &c),
            entry("status", &c),
        ]
    );

    // None of the cancelled requests reached the backend.
    let handled = fx.kernel().handled();
    assert_eq!(handled.len(), 1);
    assert_eq!(handled[0].msg_id(), running.msg_id());
}

#[tokio::test]
async fn synthetic_messages_carry_interrupt_payloads() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");

    fx.execute(&c1, "block");
    fx.until_busy().await;
    let queued = fx.execute(&c1, "x");
    fx.runtime.interrupt(&fx.id).await.unwrap();
    fx.gate.add_permits(1);

    next(&mut c1).await;
    let error = next(&mut c1).await;
    assert_eq!(error.channel, Channel::Iopub);
    assert_eq!(
        error.content,
        json!({"ename": "Kernel Interrupt", "evalue": "Interrupted", "traceback": []})
    );

    let reply = next(&mut c1).await;
    assert_eq!(reply.parent_msg_id(), Some(queued.msg_id()));
    assert_eq!(reply.content["status"], json!("error"));
    assert_eq!(reply.content["cause"], json!("interrupt"));
    assert_eq!(reply.content["execution_count"], json!(0));
    assert_eq!(reply.header.username, "ferrolite");

    let idle = next(&mut c1).await;
    assert_eq!(idle.execution_state(), Some(ExecutionState::Idle));
}

#[tokio::test]
async fn interrupted_request_failing_does_not_swallow_the_burst_error() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");

    let running = fx.execute(&c1, "block fail");
    fx.until_busy().await;
    let a = fx.execute(&c1, "a");
    let b = fx.execute(&c1, "b");
    fx.runtime.interrupt(&fx.id).await.unwrap();
    fx.gate.add_permits(1);

    assert_eq!(
        take(&mut c1, 6).await,
        vec![
            entry("execute_reply", &running),
            entry("error", &a),
            entry("execute_reply", &a),
            entry("status", &a),
            entry("execute_reply", &b),
            entry("status", &b),
        ]
    );
}

#[tokio::test]
async fn requests_after_an_interrupt_run_normally() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");

    fx.execute(&c1, "block");
    fx.until_busy().await;
    fx.execute(&c1, "a");
    fx.runtime.interrupt(&fx.id).await.unwrap();
    fx.gate.add_permits(1);
    take(&mut c1, 4).await;

    let later = fx.execute(&c1, "later");
    let reply = next(&mut c1).await;
    assert_eq!(reply.parent_msg_id(), Some(later.msg_id()));
    assert_eq!(reply.content["status"], json!("ok"));

    // A second burst again gets exactly one error.
    fx.execute(&c1, "block");
    fx.until_busy().await;
    let d = fx.execute(&c1, "d");
    let e = fx.execute(&c1, "e");
    fx.runtime.interrupt(&fx.id).await.unwrap();
    fx.gate.add_permits(1);
    let seen = take(&mut c1, 6).await;
    assert_eq!(
        seen[1..],
        [
            entry("error", &d),
            entry("execute_reply", &d),
            entry("status", &d),
            entry("execute_reply", &e),
            entry("status", &e),
        ]
    );
}

#[tokio::test]
async fn interrupt_before_the_worker_starts_reports_one_error() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");

    // No await between queueing and interrupting: `a` owns the lock but
    // has not reached the backend yet.
    let a = fx.execute(&c1, "cell");
    let b = fx.execute(&c1, "b");
    let c = fx.execute(&c1, "c");
    fx.runtime.interrupt(&fx.id).await.unwrap();

    let reply = next(&mut c1).await;
    assert_eq!(reply.parent_msg_id(), Some(a.msg_id()));
    assert!(reply.is_execute_error());
    assert_eq!(
        take(&mut c1, 5).await,
        vec![
            entry("error", &b),
            entry("execute_reply", &b),
            entry("status", &b),
            entry("execute_reply", &c),
            entry("status", &c),
        ]
    );

    let handled = fx.kernel().handled();
    assert_eq!(handled.len(), 1);
    assert_eq!(handled[0].msg_id(), a.msg_id());
}

#[tokio::test]
async fn repeated_interrupt_does_not_repeat_the_error() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");

    let running = fx.execute(&c1, "block");
    fx.until_busy().await;
    let a = fx.execute(&c1, "a");
    let b = fx.execute(&c1, "b");
    fx.runtime.interrupt(&fx.id).await.unwrap();
    fx.runtime.interrupt(&fx.id).await.unwrap();
    fx.gate.add_permits(1);

    assert_eq!(
        take(&mut c1, 6).await,
        vec![
            entry("execute_reply", &running),
            entry("error", &a),
            entry("execute_reply", &a),
            entry("status", &a),
            entry("execute_reply", &b),
            entry("status", &b),
        ]
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(c1.try_recv().is_none());
}

#[tokio::test]
async fn each_interrupt_that_cancels_work_reports_once() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");

    let running = fx.execute(&c1, "block");
    fx.until_busy().await;
    let a = fx.execute(&c1, "a");
    fx.runtime.interrupt(&fx.id).await.unwrap();
    let b = fx.execute(&c1, "b");
    fx.runtime.interrupt(&fx.id).await.unwrap();
    fx.gate.add_permits(1);

    assert_eq!(
        take(&mut c1, 7).await,
        vec![
            entry("execute_reply", &running),
            entry("error", &a),
            entry("execute_reply", &a),
            entry("status", &a),
            entry("error", &b),
            entry("execute_reply", &b),
            entry("status", &b),
        ]
    );
}

#[tokio::test]
async fn interrupt_with_empty_queue_emits_nothing() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");

    let running = fx.execute(&c1, "block");
    fx.until_busy().await;
    fx.runtime.interrupt(&fx.id).await.unwrap();
    fx.gate.add_permits(1);

    let reply = next(&mut c1).await;
    assert_eq!(reply.parent_msg_id(), Some(running.msg_id()));
    assert_eq!(reply.content["status"], json!("ok"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(c1.try_recv().is_none());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn failing_request_silently_drops_the_rest_of_the_batch() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");

    let failing = fx.execute(&c1, "block fail");
    fx.until_busy().await;
    fx.execute(&c1, "b");
    fx.execute(&c1, "c");
    fx.gate.add_permits(1);

    let reply = next(&mut c1).await;
    assert_eq!(reply.parent_msg_id(), Some(failing.msg_id()));
    assert!(reply.is_execute_error());

    let after = fx.execute(&c1, "after");
    let reply = next(&mut c1).await;
    assert_eq!(reply.parent_msg_id(), Some(after.msg_id()));
    assert!(!reply.is_execute_error());

    let handled: Vec<_> = fx
        .kernel()
        .handled()
        .iter()
        .map(|m| m.msg_id().to_string())
        .collect();
    assert_eq!(handled, vec![failing.msg_id(), after.msg_id()]);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn iopub_reaches_every_client_identically() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");
    let mut c2 = fx.connect("c2");

    fx.execute(&c1, "stream hi");
    let seen_by_c1 = next(&mut c1).await;
    let seen_by_c2 = next(&mut c2).await;
    assert_eq!(seen_by_c1.msg_type(), msg_type::STREAM);
    assert_eq!(seen_by_c1, seen_by_c2);
    assert_eq!(
        serde_json::to_vec(&seen_by_c1).unwrap(),
        serde_json::to_vec(&seen_by_c2).unwrap()
    );

    // The shell reply goes to c1 only.
    assert_eq!(next(&mut c1).await.msg_type(), msg_type::EXECUTE_REPLY);
    assert!(c2.try_recv().is_none());

    c2.detach();
    fx.execute(&c1, "stream again");
    assert_eq!(next(&mut c1).await.content["text"], json!("again"));
    assert_eq!(fx.runtime.clients(&fx.id).unwrap(), vec!["c1"]);
}

#[tokio::test]
async fn reply_for_a_vanished_client_is_dropped() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");
    let c2 = fx.connect("c2");

    fx.execute(&c2, "block");
    fx.until_busy().await;
    drop(c2);
    fx.gate.add_permits(1);

    // The kernel keeps serving the remaining client.
    let request = fx.execute(&c1, "still here");
    let reply = next(&mut c1).await;
    assert_eq!(reply.parent_msg_id(), Some(request.msg_id()));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stdin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn input_reply_bypasses_the_held_lock() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");

    let request = fx.execute(&c1, "input");
    let prompt = next(&mut c1).await;
    assert_eq!(prompt.msg_type(), msg_type::INPUT_REQUEST);
    assert_eq!(prompt.channel, Channel::Stdin);
    assert_eq!(fx.runtime.get_model(&fx.id).unwrap().status, KernelStatus::Busy);

    c1.send(Message::reply(
        &prompt,
        Channel::Stdin,
        msg_type::INPUT_REPLY,
        json!({ "value": "42" }),
    ))
    .unwrap();

    let reply = next(&mut c1).await;
    assert_eq!(reply.parent_msg_id(), Some(request.msg_id()));
    assert_eq!(reply.content["value"], json!("42"));
}

#[tokio::test]
async fn handle_stdin_waits_for_the_client() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");
    let parent = Message::execute_request(c1.client_id(), "x");
    let prompt = Message::reply(
        &parent,
        Channel::Stdin,
        msg_type::INPUT_REQUEST,
        json!({ "prompt": "name: ", "password": false }),
    );

    let pending = {
        let runtime = Arc::clone(&fx.runtime);
        let id = fx.id.clone();
        let prompt = prompt.clone();
        tokio::spawn(async move { runtime.handle_stdin(&id, prompt).await })
    };

    let received = next(&mut c1).await;
    assert_eq!(received, prompt);
    c1.send(Message::reply(
        &received,
        Channel::Stdin,
        msg_type::INPUT_REPLY,
        json!({ "value": "ada" }),
    ))
    .unwrap();

    let answer = pending.await.unwrap().unwrap();
    assert_eq!(answer.content["value"], json!("ada"));
    assert_eq!(answer.parent_msg_id(), Some(prompt.msg_id()));
}

#[tokio::test]
async fn input_reply_for_another_prompt_leaves_the_wait_pending() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");
    let parent = Message::execute_request(c1.client_id(), "x");
    let prompt = Message::reply(
        &parent,
        Channel::Stdin,
        msg_type::INPUT_REQUEST,
        json!({ "prompt": "name: ", "password": false }),
    );
    let earlier = Message::reply(
        &parent,
        Channel::Stdin,
        msg_type::INPUT_REQUEST,
        json!({ "prompt": "age: ", "password": false }),
    );

    let pending = {
        let runtime = Arc::clone(&fx.runtime);
        let id = fx.id.clone();
        let prompt = prompt.clone();
        tokio::spawn(async move { runtime.handle_stdin(&id, prompt).await })
    };
    let received = next(&mut c1).await;
    assert_eq!(received, prompt);

    let stale = Message::reply(
        &earlier,
        Channel::Stdin,
        msg_type::INPUT_REPLY,
        json!({ "value": "stale" }),
    );
    c1.send(stale.clone()).unwrap();
    let kernel = fx.kernel();
    eventually(|| kernel.handled().iter().any(|m| m.msg_id() == stale.msg_id())).await;
    assert!(!pending.is_finished());

    c1.send(Message::reply(
        &received,
        Channel::Stdin,
        msg_type::INPUT_REPLY,
        json!({ "value": "ada" }),
    ))
    .unwrap();
    let answer = pending.await.unwrap().unwrap();
    assert_eq!(answer.content["value"], json!("ada"));
    assert_eq!(answer.parent_msg_id(), Some(prompt.msg_id()));
}

#[tokio::test]
async fn handle_stdin_without_a_client_fails() {
    let fx = Fixture::new().await;
    let parent = Message::execute_request(&ClientId::new("ghost"), "x");
    let prompt = Message::reply(&parent, Channel::Stdin, msg_type::INPUT_REQUEST, json!({}));

    let err = fx.runtime.handle_stdin(&fx.id, prompt).await.unwrap_err();
    assert!(matches!(
        err,
        KernelError::Transport(TransportError::NoClient(session)) if session == "ghost"
    ));
}

#[tokio::test]
async fn handle_stdin_is_abandoned_on_shutdown() {
    let fx = Fixture::new().await;
    let mut c1 = fx.connect("c1");
    let parent = Message::execute_request(c1.client_id(), "x");
    let prompt = Message::reply(&parent, Channel::Stdin, msg_type::INPUT_REQUEST, json!({}));

    let pending = {
        let runtime = Arc::clone(&fx.runtime);
        let id = fx.id.clone();
        tokio::spawn(async move { runtime.handle_stdin(&id, prompt).await })
    };
    next(&mut c1).await;
    fx.runtime.shutdown(&fx.id).await.unwrap();

    assert!(matches!(
        pending.await.unwrap(),
        Err(KernelError::StdinClosed)
    ));
}

#[tokio::test]
async fn unsolicited_input_reply_goes_to_the_backend() {
    let fx = Fixture::new().await;
    let c1 = fx.connect("c1");

    let stray = Message::request(
        Channel::Stdin,
        msg_type::INPUT_REPLY,
        c1.client_id(),
        json!({ "value": "late" }),
    );
    c1.send(stray.clone()).unwrap();

    let kernel = fx.kernel();
    eventually(|| kernel.handled().iter().any(|m| m.msg_id() == stray.msg_id())).await;
}
