//! A notebook session driving a toy kernel that shouts its input back.
//!
//! Run with: cargo run -p ferrolite --example notebook

use async_trait::async_trait;
use ferrolite::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

struct ShoutKernel {
    ctx: KernelContext,
    count: AtomicU64,
}

#[async_trait]
impl KernelBackend for ShoutKernel {
    async fn handle_message(&self, msg: Message) -> Result<(), KernelError> {
        if msg.msg_type() != msg_type::EXECUTE_REQUEST {
            return Ok(());
        }
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        let code = msg.content["code"].as_str().unwrap_or_default();

        self.ctx.send(Message::status(&msg, ExecutionState::Busy));
        self.ctx.send(Message::reply(
            &msg,
            Channel::Iopub,
            msg_type::STREAM,
            json!({ "name": "stdout", "text": code.to_uppercase() }),
        ));
        self.ctx.send(Message::reply(
            &msg,
            Channel::Shell,
            msg_type::EXECUTE_REPLY,
            json!({ "status": "ok", "execution_count": count }),
        ));
        self.ctx.send(Message::status(&msg, ExecutionState::Idle));
        Ok(())
    }
}

struct ShoutFactory;

#[async_trait]
impl KernelFactory for ShoutFactory {
    async fn create(&self, ctx: KernelContext) -> Result<Arc<dyn KernelBackend>, KernelError> {
        Ok(Arc::new(ShoutKernel {
            ctx,
            count: AtomicU64::new(0),
        }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let registry = Arc::new(KernelRegistry::new());
    registry.register(
        KernelSpec::new("shout", "Shout", "text"),
        Arc::new(ShoutFactory),
    );
    let runtime = KernelRuntime::new(Arc::clone(&registry));
    let sessions = SessionStore::new(Arc::clone(&runtime));

    let session = sessions
        .start_new(StartSession::new("Drive:notes/hello.ipynb"))
        .await?;
    let kernel = session.kernel.clone().ok_or("session has no kernel")?;
    println!("session {} on kernel {} ({})", session.id, kernel.id, kernel.name);

    let mut client = runtime.connect(&kernel.id, "notebook-ui")?;
    for code in ["hello", "ferrolite"] {
        client.send(Message::execute_request(client.client_id(), code))?;
        while let Some(msg) = client.recv().await {
            match msg.msg_type() {
                msg_type::STREAM => println!("  out: {}", msg.content["text"]),
                msg_type::EXECUTE_REPLY => println!("  reply: {}", msg.content["status"]),
                _ => {}
            }
            if msg.execution_state() == Some(ExecutionState::Idle) {
                break;
            }
        }
    }

    runtime.restart(&kernel.id).await?;
    println!("after restart: {:?}", sessions.list());

    sessions.shutdown_all().await;
    Ok(())
}
