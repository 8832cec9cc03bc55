//! Drive the loopback worker through a multiplexer.
//!
//! Run with:
//!   cargo build --features cli
//!   cargo run --example loopback -- target/debug/voxmux

use std::time::Duration;

use serde_json::json;
use voxmux::session::BoxError;
use voxmux::{Multiplexer, MuxConfig, WorkerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let program = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "target/debug/voxmux".to_string());
    let worker = WorkerConfig::new(program).with_args(["echo-worker"]);
    let mux = Multiplexer::new(MuxConfig::new(worker).with_request_timeout(Duration::from_secs(5)));

    let sid = mux.init("demo").await?;
    mux.on(&sid, "stream_changed", |event| async move {
        eprintln!("event {} for {}: {:?}", event.name, event.sid, event.payload);
        Ok::<(), BoxError>(())
    })?;

    for command in [
        json!({"action": "join_call", "chat_id": 1, "file_path": "a.raw"}),
        json!({"action": "pause", "chat_id": 1}),
        json!({"action": "change_stream", "chat_id": 1, "file_path": "b.raw"}),
        json!({"action": "leave_call", "chat_id": 1, "type": "requested"}),
    ] {
        let ack = mux.send(&sid, command).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        eprintln!("ack {:?} -> state {}", ack, mux.state(&sid));
    }

    if let Some(report) = mux.clear(&sid).await? {
        eprintln!("worker stopped: {:?} in {:?}", report.path, report.elapsed);
    }
    Ok(())
}
