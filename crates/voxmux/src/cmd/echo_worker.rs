use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};
use voxmux_frame::{FrameError, Line, LineReader, LineWriter, Packet, Request};
use voxmux_session::{JoinParams, SessionStatus};

use crate::cmd::EchoWorkerArgs;
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};

const ACTION: &str = "action";
const STREAM_CHANGED: &str = "stream_changed";
const LOOPBACK_FINGERPRINT: &str =
    "00:11:22:33:44:55:66:77:88:99:AA:BB:CC:DD:EE:FF:00:11:22:33:44:55:66:77:88:99:AA:BB:CC:DD:EE:FF";

/// `key=value` settings a worker is launched with.
#[derive(Debug, Default, PartialEq, Eq)]
struct Settings {
    port: Option<u16>,
    log_mode: Option<String>,
}

fn parse_settings(raw: &[String]) -> Settings {
    let mut settings = Settings::default();
    for item in raw {
        match item.split_once('=') {
            Some(("port", value)) => match value.parse() {
                Ok(port) => settings.port = Some(port),
                Err(_) => warn!(value, "ignoring invalid port"),
            },
            Some(("log_mode", value)) => settings.log_mode = Some(value.to_string()),
            _ => warn!(setting = %item, "ignoring unknown setting"),
        }
    }
    settings
}

pub async fn run(args: EchoWorkerArgs) -> CliResult<i32> {
    let settings = parse_settings(&args.settings);
    info!(port = ?settings.port, log_mode = ?settings.log_mode, "echo worker started");

    tokio::select! {
        served = serve(tokio::io::stdin(), tokio::io::stdout()) => {
            let handled = served.map_err(|err| frame_error("echo worker failed", err))?;
            info!(handled, "input closed, exiting");
        }
        interrupted = tokio::signal::ctrl_c() => {
            interrupted.map_err(|err| io_error("failed to listen for interrupt", err))?;
            info!("interrupted, exiting");
        }
    }
    Ok(SUCCESS)
}

/// Answer requests from `input` on `output` until `input` closes.
///
/// Returns the number of requests answered.
pub async fn serve<R, W>(input: R, output: W) -> voxmux_frame::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = LineReader::new(input);
    let mut writer = LineWriter::new(output);
    let mut handled = 0;

    loop {
        let line = match reader.read_line().await {
            Ok(Line::Data(line)) => line,
            Ok(Line::Oversized(len)) => {
                warn!(len, "skipping oversized request");
                continue;
            }
            Err(FrameError::ConnectionClosed) => break,
            Err(err) => return Err(err),
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let request = match Request::parse(&line) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "skipping malformed request");
                continue;
            }
        };
        debug!(sid = %request.sid, pid = request.pid, "request received");
        for packet in respond(&request) {
            writer.send_json(&packet).await?;
        }
        handled += 1;
    }

    Ok(handled)
}

/// Packets the loopback worker emits for one request, in order.
fn respond(request: &Request) -> Vec<Packet> {
    let sid = request.sid.as_str();
    let action = request
        .body
        .get(ACTION)
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut ack = request.body.clone();
    ack.insert("ok".to_string(), Value::Bool(true));
    if action == "join_call" {
        ack.extend(join_params(request.pid));
    }

    let mut packets = vec![Packet::ack(sid, request.pid, ack)];
    if let Some(status) = status_after(action) {
        packets.push(Packet::status(sid, request.pid, status.as_str()));
    }
    if action == "change_stream" {
        let mut payload = Map::new();
        if let Some(path) = request.body.get("file_path") {
            payload.insert("file_path".to_string(), path.clone());
        }
        packets.push(Packet::event(sid, request.pid, STREAM_CHANGED, payload));
    }
    packets
}

fn status_after(action: &str) -> Option<SessionStatus> {
    match action {
        "join_call" | "resume" => Some(SessionStatus::ActivePlaying),
        "pause" => Some(SessionStatus::ActivePaused),
        "leave_call" => Some(SessionStatus::Closed),
        _ => None,
    }
}

fn join_params(pid: u64) -> Map<String, Value> {
    let params = JoinParams {
        ufrag: format!("vx{pid:04x}"),
        pwd: format!("loopback-{pid}"),
        hash: "sha-256".to_string(),
        setup: "active".to_string(),
        fingerprint: LOOPBACK_FINGERPRINT.to_string(),
        source: 1000 + pid as i64,
    };
    match serde_json::to_value(params) {
        Ok(Value::Object(fields)) => fields,
        _ => Map::new(),
    }
}
