//! # Example: order_timeout
//!
//! Tracks order confirmations with a persistent tracker.
//!
//! Shows how to:
//! - Deploy a tracker through the [`Registry`] with an on-disk [`FsStore`].
//! - Acknowledge an order through an [`AckClear`] linked to the tracker.
//! - Survive a restart: a pending order comes back on `restored` with its remaining deadline.
//! - Watch lifecycle events through the built-in [`LogWriter`].
//!
//! ## Flow
//! ```text
//! submit(A), submit(B) ──► tracker "orders" ──► accepted ×2
//! AckClear "confirmed" ──► clears A
//! registry #1 shut down (B still on disk)
//! registry #2 deploys "orders" ──► restored(B) ──► timed-out(B)
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=ackvisor=debug cargo run --example order_timeout
//! ```

use std::{sync::Arc, time::Duration};

use ackvisor::{
    FsStore, LogWriter, Message, Outputs, Registry, RuntimeConfig, Subscribe, TrackerConfig, Units,
};
use tracing_subscriber::EnvFilter;

fn orders_config() -> TrackerConfig {
    TrackerConfig::new("orders")
        .with_ttl(800, Units::Milliseconds)
        .with_key("orderId")
        .with_link("confirmed")
        .persistent(true)
}

fn registry(runtime: &RuntimeConfig) -> Arc<Registry> {
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    Registry::builder()
        .with_runtime(runtime.clone())
        .with_store(Arc::new(FsStore::from_config(runtime)))
        .with_subscribers(subs)
        .build()
}

async fn drain(label: &str, outputs: &mut Outputs, window: Duration) {
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            out = outputs.recv() => match out {
                Some(out) => println!(
                    "[{label}] {:<9} orderId={}",
                    out.port.as_str(),
                    out.message.get("orderId").map(|v| v.to_string()).unwrap_or_default()
                ),
                None => break,
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ackvisor=info")),
        )
        .init();

    let dir = tempfile::tempdir()?;
    let runtime = RuntimeConfig {
        working_dir: Some(dir.path().to_path_buf()),
        ..RuntimeConfig::default()
    };

    // First run: two orders, one confirmed in time.
    let first = registry(&runtime);
    let mut outputs = first.deploy_tracker(orders_config()).await;
    first.flows_started().await?;

    let orders = first
        .tracker("orders")
        .await
        .ok_or_else(|| anyhow::anyhow!("tracker not deployed"))?;
    orders.submit(Message::new().with("orderId", "A-100")).await?;
    orders.submit(Message::new().with("orderId", "B-200")).await?;
    first
        .ack_clear("confirmed")
        .send(Message::new().with("orderId", "A-100"));

    drain("run 1", &mut outputs, Duration::from_millis(200)).await;
    first.shutdown_all().await;
    println!("[run 1] stopped with B-200 pending on disk");

    // Second run: B-200 is restored and times out with its remaining deadline.
    let second = registry(&runtime);
    let mut outputs = second.deploy_tracker(orders_config()).await;
    second.flows_started().await?;
    drain("run 2", &mut outputs, Duration::from_secs(1)).await;

    second.shutdown_all().await;
    Ok(())
}
