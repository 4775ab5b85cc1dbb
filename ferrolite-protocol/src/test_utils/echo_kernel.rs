//! EchoKernel: a backend that echoes code back as stdout.
//!
//! `execute_request` behaviour depends on `content.code`:
//!
//! | Code | Outputs |
//! |------|---------|
//! | `raise <text>` | iopub `error` with `evalue = <text>`, `execute_reply{status: error}` |
//! | `input()` | `input_request` round-trip, then the reply's `value` as stdout |
//! | anything else | the code itself as stdout, `execute_reply{status: ok}` |
//!
//! Every execution is bracketed by `busy` and `idle` status messages.

use crate::error::KernelError;
use crate::kernel::{KernelBackend, KernelContext, KernelFactory, KernelSpec};
use crate::message::{Channel, ExecutionState, Message, msg_type};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A spec describing an echo kernel registered under `name`.
pub fn echo_spec(name: &str) -> KernelSpec {
    KernelSpec::new(name, format!("Echo ({name})"), "text")
}

/// A backend that echoes execute requests back to the client.
pub struct EchoKernel {
    ctx: KernelContext,
    execution_count: AtomicU64,
    handled: Mutex<Vec<Message>>,
}

impl EchoKernel {
    /// Create a kernel bound to `ctx`.
    pub fn new(ctx: KernelContext) -> Self {
        Self {
            ctx,
            execution_count: AtomicU64::new(0),
            handled: Mutex::new(Vec::new()),
        }
    }

    /// The context this kernel was built with.
    pub fn context(&self) -> &KernelContext {
        &self.ctx
    }

    /// Every message handed to this kernel, in order.
    pub fn handled(&self) -> Vec<Message> {
        self.handled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn execute(&self, request: &Message) -> Result<(), KernelError> {
        let count = self.execution_count.fetch_add(1, Ordering::SeqCst) + 1;
        let code = request
            .content
            .get("code")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();

        self.ctx.send(Message::status(request, ExecutionState::Busy));
        self.ctx.send(Message::reply(
            request,
            Channel::Iopub,
            msg_type::EXECUTE_INPUT,
            json!({ "code": code, "execution_count": count }),
        ));

        let outcome = self.run(request, &code, count).await;
        self.ctx.send(Message::status(request, ExecutionState::Idle));
        outcome
    }

    async fn run(&self, request: &Message, code: &str, count: u64) -> Result<(), KernelError> {
        if let Some(evalue) = code.strip_prefix("raise ") {
            self.ctx.send(Message::reply(
                request,
                Channel::Iopub,
                msg_type::ERROR,
                json!({ "ename": "EchoError", "evalue": evalue, "traceback": [] }),
            ));
            self.ctx.send(Message::reply(
                request,
                Channel::Shell,
                msg_type::EXECUTE_REPLY,
                json!({
                    "status": "error",
                    "execution_count": count,
                    "ename": "EchoError",
                    "evalue": evalue,
                    "traceback": [],
                }),
            ));
            return Ok(());
        }

        let text = if code == "input()" {
            let prompt = Message::reply(
                request,
                Channel::Stdin,
                msg_type::INPUT_REQUEST,
                json!({ "prompt": "", "password": false }),
            );
            let answer = self.ctx.input(prompt).await?;
            answer
                .content
                .get("value")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        } else {
            code.to_string()
        };

        self.ctx.send(Message::reply(
            request,
            Channel::Iopub,
            msg_type::STREAM,
            json!({ "name": "stdout", "text": text }),
        ));
        self.ctx.send(Message::reply(
            request,
            Channel::Shell,
            msg_type::EXECUTE_REPLY,
            json!({ "status": "ok", "execution_count": count, "user_expressions": {} }),
        ));
        Ok(())
    }
}

#[async_trait]
impl KernelBackend for EchoKernel {
    async fn handle_message(&self, msg: Message) -> Result<(), KernelError> {
        self.handled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(msg.clone());

        match msg.msg_type() {
            msg_type::EXECUTE_REQUEST => self.execute(&msg).await,
            msg_type::KERNEL_INFO_REQUEST => {
                self.ctx.send(Message::reply(
                    &msg,
                    msg.channel,
                    msg_type::KERNEL_INFO_REPLY,
                    json!({
                        "status": "ok",
                        "implementation": "echo",
                        "language_info": { "name": "text" },
                    }),
                ));
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Factory producing [`EchoKernel`]s and remembering each one it built.
#[derive(Default)]
pub struct EchoKernelFactory {
    created: Mutex<Vec<Arc<EchoKernel>>>,
}

impl EchoKernelFactory {
    /// Create a factory that has built nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every kernel built so far, oldest first.
    pub fn kernels(&self) -> Vec<Arc<EchoKernel>> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of kernels built so far.
    pub fn created(&self) -> usize {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl KernelFactory for EchoKernelFactory {
    async fn create(&self, ctx: KernelContext) -> Result<Arc<dyn KernelBackend>, KernelError> {
        let kernel = Arc::new(EchoKernel::new(ctx));
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&kernel));
        Ok(kernel)
    }
}
