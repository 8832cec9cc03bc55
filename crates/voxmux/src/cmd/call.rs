use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use voxmux_session::{BoxError, Event, Multiplexer, MuxConfig};

use crate::cmd::{parse_duration, CallArgs};
use crate::exit::{mux_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_record, OutputFormat, Record, RecordKind};

pub async fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = parse_payload(&args.payload)?;
    let request_timeout = parse_duration(&args.timeout)?;
    let stop_timeout = parse_duration(&args.stop_timeout)?;
    let listen = args.listen.as_deref().map(parse_duration).transpose()?;

    let mut worker = args.worker.to_config().with_port(args.port);
    if let Some(mode) = &args.log_mode {
        worker = worker.with_log_mode(mode.clone());
    }
    let mux = Multiplexer::new(
        MuxConfig::new(worker)
            .with_shutdown_timeout(stop_timeout)
            .with_request_timeout(request_timeout),
    );

    let sid = mux
        .init(args.sid.clone())
        .await
        .map_err(|err| mux_error("failed to start worker", err))?;
    let result = exchange(&mux, &sid, &args.events, payload, listen, format).await;

    match mux.clear(&sid).await {
        Ok(Some(report)) => {
            debug!(path = ?report.path, elapsed = ?report.elapsed, "worker stopped");
        }
        Ok(None) => {}
        Err(err) => warn!(error = %err, "failed to stop worker"),
    }
    result
}

fn parse_payload(input: &str) -> CliResult<Value> {
    let payload: Value = serde_json::from_str(input)
        .map_err(|err| CliError::new(USAGE, format!("payload is not valid JSON: {err}")))?;
    if !payload.is_object() {
        return Err(CliError::new(USAGE, "payload must be a JSON object"));
    }
    Ok(payload)
}

async fn exchange(
    mux: &Multiplexer,
    sid: &str,
    events: &[String],
    payload: Value,
    listen: Option<Duration>,
    format: OutputFormat,
) -> CliResult<i32> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    for name in events {
        let tx = tx.clone();
        mux.on(sid, name, move |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event);
                Ok::<(), BoxError>(())
            }
        })
        .map_err(|err| mux_error("failed to register callback", err))?;
    }
    drop(tx);
    let mut statuses = mux.subscribe_status();

    let ack = mux
        .send(sid, payload)
        .await
        .map_err(|err| mux_error("request failed", err))?;
    print_record(&Record::ack(sid, ack), format);

    let Some(window) = listen else {
        return Ok(SUCCESS);
    };

    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Some(event) = rx.recv() => {
                let record = Record::new(RecordKind::Event, &event.sid, Value::Object(event.payload));
                print_record(&record, format);
            }
            change = statuses.recv() => match change {
                Ok(change) if change.sid == sid => {
                    print_record(&Record::status(sid, change.status.as_str()), format);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "status updates dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(SUCCESS)
}
