//! The single reader task that routes worker output.
//!
//! The loop only ends when the worker's output closes. Every per-line
//! failure is logged and the line is dropped.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tracing::{debug, error, trace, warn};
use voxmux_frame::{FrameError, Line, LineReader, Packet, PacketKind};

use crate::correlator::Correlator;
use crate::registry::{Event, Registry, SessionStatus, Snapshot};

/// Longest prefix of an offending line included in logs.
const LOG_PREVIEW_BYTES: usize = 120;

/// Read and route lines until EOF, then fail everything still pending.
pub(crate) async fn run<R>(
    mut reader: LineReader<R>,
    correlator: Arc<Correlator>,
    registry: Arc<Registry>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let line = match reader.read_line().await {
            Ok(Line::Data(line)) => line,
            Ok(Line::Oversized(len)) => {
                warn!(
                    len,
                    max = reader.config().max_line_length,
                    "discarding oversized line from worker"
                );
                continue;
            }
            Err(FrameError::ConnectionClosed) => {
                debug!("worker output closed");
                break;
            }
            Err(err) => {
                warn!(error = %err, "worker output failed");
                break;
            }
        };
        handle_line(&line, &correlator, &registry);
    }

    let failed = correlator.fail_all();
    if failed > 0 {
        warn!(failed, "worker exited with requests in flight");
    }
}

/// Decode and route one line.
pub(crate) fn handle_line(line: &[u8], correlator: &Correlator, registry: &Arc<Registry>) {
    if line.iter().all(u8::is_ascii_whitespace) {
        return;
    }

    let packet = match Packet::parse(line) {
        Ok(packet) => packet,
        Err(err) => {
            warn!(error = %err, line = %preview(line), "discarding unusable line from worker");
            return;
        }
    };
    trace!(sid = %packet.sid, pid = packet.pid, kind = %packet.kind, "packet received");

    match packet.kind {
        PacketKind::Ack => {
            correlator.resolve(packet.pid, packet.body);
        }
        PacketKind::Status => apply_status(registry, &packet),
        PacketKind::Event => fan_out(registry, packet),
        PacketKind::Other(ref kind) => {
            warn!(sid = %packet.sid, pid = packet.pid, kind = %kind, "unexpected packet type");
        }
    }
}

fn apply_status(registry: &Registry, packet: &Packet) {
    let Some(value) = packet.status_value() else {
        warn!(sid = %packet.sid, pid = packet.pid, "status packet without status");
        return;
    };
    let status = match value.parse::<SessionStatus>() {
        Ok(status) => status,
        Err(err) => {
            warn!(sid = %packet.sid, error = %err, "ignoring status update");
            return;
        }
    };
    if registry.set_status(&packet.sid, status) {
        debug!(sid = %packet.sid, %status, "session status updated");
    } else {
        debug!(sid = %packet.sid, %status, "status for unregistered session");
    }
}

/// Start every callback for the event, in registration order, without
/// waiting for any of them.
fn fan_out(registry: &Arc<Registry>, packet: Packet) {
    let Some(name) = packet.event_name().map(str::to_string) else {
        warn!(sid = %packet.sid, pid = packet.pid, "event packet without event name");
        return;
    };

    let Some(Snapshot {
        generation,
        callbacks,
    }) = registry.snapshot(&packet.sid, &name)
    else {
        debug!(sid = %packet.sid, event = %name, "event for unregistered session");
        return;
    };
    if callbacks.is_empty() {
        debug!(sid = %packet.sid, event = %name, "no callbacks for event");
        return;
    }

    let event = Event {
        sid: packet.sid,
        pid: packet.pid,
        name,
        payload: packet.body,
    };
    let registry = Arc::clone(registry);

    tokio::spawn(async move {
        let mut running = Vec::with_capacity(callbacks.len());
        for (index, callback) in callbacks.into_iter().enumerate() {
            if registry.generation(&event.sid) != Some(generation) {
                debug!(sid = %event.sid, event = %event.name, "session cleared, skipping callbacks");
                break;
            }
            let event = event.clone();
            running.push((index, tokio::spawn(async move { callback(event).await })));
        }

        for (index, task) in running {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(sid = %event.sid, event = %event.name, index, error = %err, "event callback failed");
                }
                Err(err) if err.is_panic() => {
                    error!(sid = %event.sid, event = %event.name, index, "event callback panicked");
                }
                Err(err) => {
                    debug!(sid = %event.sid, event = %event.name, index, error = %err, "event callback cancelled");
                }
            }
        }
    });
}

fn preview(line: &[u8]) -> String {
    let end = line.len().min(LOG_PREVIEW_BYTES);
    let mut text = String::from_utf8_lossy(&line[..end]).into_owned();
    if end < line.len() {
        text.push_str("...");
    }
    text
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    use super::*;
    use crate::correlator::{AckBody, Pending};
    use crate::error::{BoxError, Result};
    use crate::registry::{callback, Callback, CallbackFuture};

    fn explode(_event: Event) -> CallbackFuture {
        panic!("callback panic")
    }

    fn setup() -> (Arc<Correlator>, Arc<Registry>) {
        (Arc::new(Correlator::new()), Arc::new(Registry::new()))
    }

    #[tokio::test]
    async fn ack_resolves_pending_request() {
        let (correlator, registry) = setup();
        let pending = correlator.register().unwrap();

        handle_line(br#"{"sid":"s1","pid":0,"_":"ack","ok":true}"#, &correlator, &registry);

        assert_eq!(Value::Object(pending.wait().await.unwrap()), json!({"ok": true}));
    }

    #[tokio::test]
    async fn malformed_line_does_not_affect_next_packet() {
        let (correlator, registry) = setup();
        registry.insert("s1");

        handle_line(b"not-json", &correlator, &registry);
        handle_line(br#"{"pid":0,"_":"status","status":"closed"}"#, &correlator, &registry);
        handle_line(
            br#"{"sid":"s1","pid":0,"_":"status","status":"active-playing"}"#,
            &correlator,
            &registry,
        );

        assert_eq!(registry.state("s1"), "active-playing");
    }

    #[tokio::test]
    async fn unknown_status_and_kind_are_ignored() {
        let (correlator, registry) = setup();
        registry.insert("s1");

        handle_line(br#"{"sid":"s1","pid":0,"_":"status","status":"dancing"}"#, &correlator, &registry);
        handle_line(br#"{"sid":"s1","pid":0,"_":"status"}"#, &correlator, &registry);
        handle_line(br#"{"sid":"s1","pid":0,"_":"pong"}"#, &correlator, &registry);

        assert_eq!(registry.state("s1"), "new");
    }

    #[tokio::test]
    async fn events_reach_callbacks_in_registration_order() {
        let (correlator, registry) = setup();
        registry.insert("s1");
        let (tx, mut rx) = mpsc::unbounded_channel();

        for tag in ["first", "second"] {
            let tx = tx.clone();
            registry
                .on(
                    "s1",
                    "stream_changed",
                    callback(move |event| {
                        let tx = tx.clone();
                        async move {
                            tx.send((tag, event)).ok();
                            Ok::<(), BoxError>(())
                        }
                    }),
                )
                .unwrap();
        }

        handle_line(
            br#"{"sid":"s1","pid":7,"_":"event","event":"stream_changed","file":"b.raw"}"#,
            &correlator,
            &registry,
        );

        let mut seen = Vec::new();
        for _ in 0..2 {
            let (tag, event) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.sid, "s1");
            assert_eq!(event.pid, 7);
            assert_eq!(event.name, "stream_changed");
            assert_eq!(event.payload.get("file"), Some(&json!("b.raw")));
            seen.push(tag);
        }
        assert_eq!(seen, vec!["first", "second"]);
    }

    fn forward<T>(tx: &mpsc::UnboundedSender<T>, value: T) -> Callback
    where
        T: Clone + Send + Sync + 'static,
    {
        let tx = tx.clone();
        callback(move |_event| {
            let tx = tx.clone();
            let value = value.clone();
            async move {
                tx.send(value).ok();
                Ok::<(), BoxError>(())
            }
        })
    }

    #[tokio::test]
    async fn events_only_reach_their_own_session() {
        let (correlator, registry) = setup();
        registry.insert("s1");
        registry.insert("s2");
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.on("s1", "stream_changed", forward(&tx, "s1")).unwrap();
        registry.on("s2", "stream_changed", forward(&tx, "s2")).unwrap();

        handle_line(
            br#"{"sid":"s2","pid":3,"_":"event","event":"stream_changed"}"#,
            &correlator,
            &registry,
        );

        let owner = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner, "s2");
        let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(extra.is_err(), "event leaked to another session: {extra:?}");
    }

    #[tokio::test]
    async fn events_captured_before_reinit_do_not_fire() {
        let (correlator, registry) = setup();
        registry.insert("s1");
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.on("s1", "ended", forward(&tx, "old")).unwrap();

        // The supervisor task cannot run before the session is replaced.
        handle_line(br#"{"sid":"s1","pid":1,"_":"event","event":"ended"}"#, &correlator, &registry);
        registry.remove("s1");
        registry.insert("s1");
        registry.on("s1", "ended", forward(&tx, "new")).unwrap();

        let stale = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(stale.is_err(), "old session callback fired: {stale:?}");

        handle_line(br#"{"sid":"s1","pid":2,"_":"event","event":"ended"}"#, &correlator, &registry);
        let fired = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired, "new");
    }

    #[tokio::test]
    async fn failing_callback_does_not_stop_others() {
        let (correlator, registry) = setup();
        registry.insert("s1");
        let (tx, mut rx) = mpsc::unbounded_channel();

        registry
            .on(
                "s1",
                "ended",
                callback(|_| async { Err::<(), BoxError>("boom".into()) }),
            )
            .unwrap();
        registry.on("s1", "ended", Arc::new(explode)).unwrap();
        registry
            .on(
                "s1",
                "ended",
                callback(move |event| {
                    let tx = tx.clone();
                    async move {
                        tx.send(event.name).ok();
                        Ok::<(), BoxError>(())
                    }
                }),
            )
            .unwrap();

        handle_line(br#"{"sid":"s1","pid":1,"_":"event","event":"ended"}"#, &correlator, &registry);

        let name = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(name, "ended");
    }

    #[tokio::test]
    async fn events_for_cleared_sessions_are_dropped() {
        let (correlator, registry) = setup();
        registry.insert("s1");
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        registry
            .on(
                "s1",
                "ended",
                callback(move |_| {
                    let tx = tx.clone();
                    async move {
                        tx.send(()).ok();
                        Ok::<(), BoxError>(())
                    }
                }),
            )
            .unwrap();
        registry.remove("s1");

        handle_line(br#"{"sid":"s1","pid":1,"_":"event","event":"ended"}"#, &correlator, &registry);

        let received = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(!matches!(received, Ok(Some(()))));
    }

    #[tokio::test]
    async fn eof_fails_all_pending_requests() {
        let (correlator, registry) = setup();
        let (mut worker, host) = tokio::io::duplex(1024);
        let task = tokio::spawn(run(
            LineReader::new(host),
            Arc::clone(&correlator),
            Arc::clone(&registry),
        ));

        let waiters: Vec<_> = (0..3).map(|_| correlator.register().unwrap()).collect();
        worker
            .write_all(b"{\"sid\":\"s1\",\"pid\":1,\"_\":\"ack\",\"n\":1}\n")
            .await
            .unwrap();
        drop(worker);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        let results = wait_all(waiters).await;
        assert!(results[0].as_ref().unwrap_err().is_worker_died());
        assert_eq!(
            results[1].as_ref().unwrap().get("n"),
            Some(&json!(1))
        );
        assert!(results[2].as_ref().unwrap_err().is_worker_died());
        assert!(correlator.is_closed());
    }

    async fn wait_all(waiters: Vec<Pending<'_>>) -> Vec<Result<AckBody>> {
        let mut results = Vec::new();
        for pending in waiters {
            results.push(pending.wait().await);
        }
        results
    }

    #[test]
    fn preview_truncates_long_lines() {
        let line = vec![b'x'; LOG_PREVIEW_BYTES + 10];
        let text = preview(&line);
        assert!(text.ends_with("..."));
        assert_eq!(text.len(), LOG_PREVIEW_BYTES + 3);
    }
}
