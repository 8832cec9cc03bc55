//! Join, pause and leave a voice chat against the loopback worker.
//!
//! Run with:
//!   cargo build --features cli
//!   cargo run --example group-call -- target/debug/voxmux path/to/audio.raw

use std::sync::Arc;

use voxmux::session::{BoxError, Signaling, SignalingParams, DEFAULT_LEAVE_REASON};
use voxmux::{GroupCall, Multiplexer, MuxConfig, WorkerConfig};

/// Prints what a real telephony client would be asked to do.
struct PrintSignaling;

impl Signaling for PrintSignaling {
    type Call = i64;
    type Peer = String;

    async fn self_peer(&self) -> Result<String, BoxError> {
        Ok("self".to_string())
    }

    async fn fetch_call(&self, chat_id: i64) -> Result<i64, BoxError> {
        eprintln!("fetch call for chat {chat_id}");
        Ok(chat_id)
    }

    async fn join_call(
        &self,
        call: &i64,
        params: &SignalingParams,
        join_as: &String,
        _invite_hash: Option<&str>,
    ) -> Result<(), BoxError> {
        eprintln!("join call {call} as {join_as} with ufrag {}", params.ufrag);
        Ok(())
    }

    async fn leave_call(&self, call: &i64) -> Result<(), BoxError> {
        eprintln!("leave call {call}");
        Ok(())
    }

    async fn set_volume(&self, call: &i64, peer: &String, volume: u16) -> Result<(), BoxError> {
        eprintln!("set volume of {peer} in {call} to {volume}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let program = args.next().unwrap_or_else(|| "target/debug/voxmux".to_string());
    let media = args.next().ok_or("usage: group-call <worker> <audio file>")?;

    let worker = WorkerConfig::new(program).with_args(["echo-worker"]);
    let mux = Arc::new(Multiplexer::new(MuxConfig::new(worker)));
    let call = GroupCall::new(mux, Arc::new(PrintSignaling), -1001);

    call.join(&media, 48_000, None, None).await?;
    eprintln!("{} is {}", call.sid(), call.state());
    call.pause().await?;
    call.set_volume(150).await?;
    call.leave(DEFAULT_LEAVE_REASON).await?;
    Ok(())
}
