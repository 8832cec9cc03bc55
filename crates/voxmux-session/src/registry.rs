use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::error::{BoxError, MuxError, Result};

/// Reported by `state` for sessions that are not registered.
pub const UNKNOWN_STATE: &str = "unknown";

/// Status changes buffered per subscriber before it starts lagging.
pub const STATUS_CHANGE_CAPACITY: usize = 256;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    New,
    Joining,
    ActivePlaying,
    ActivePaused,
    Leaving,
    Closed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Joining => "joining",
            Self::ActivePlaying => "active-playing",
            Self::ActivePaused => "active-paused",
            Self::Leaving => "leaving",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status string not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown session status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for SessionStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "new" => Ok(Self::New),
            "joining" => Ok(Self::Joining),
            "active-playing" => Ok(Self::ActivePlaying),
            "active-paused" => Ok(Self::ActivePaused),
            "leaving" => Ok(Self::Leaving),
            "closed" => Ok(Self::Closed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// An `event` packet delivered to session callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub sid: String,
    pub pid: u64,
    /// Value of the packet's `event` field.
    pub name: String,
    /// Packet body, including the `event` field.
    pub payload: Map<String, Value>,
}

pub type CallbackResult = std::result::Result<(), BoxError>;
pub type CallbackFuture = Pin<Box<dyn Future<Output = CallbackResult> + Send>>;

/// Event handler registered with `on`.
pub type Callback = Arc<dyn Fn(Event) -> CallbackFuture + Send + Sync>;

/// Wrap an async closure as a [`Callback`].
pub fn callback<F, Fut>(f: F) -> Callback
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallbackResult> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Handle returned by `on`, accepted by `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// One applied status update, as seen by [`Registry::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub sid: String,
    pub status: SessionStatus,
}

/// Callbacks captured for one event, tagged with the session generation
/// they were taken from.
pub(crate) struct Snapshot {
    pub(crate) generation: u64,
    pub(crate) callbacks: Vec<Callback>,
}

struct SessionState {
    status: SessionStatus,
    /// Distinguishes a re-created session from an earlier one with the same id.
    generation: u64,
    callbacks: HashMap<String, Vec<(CallbackId, Callback)>>,
}

impl SessionState {
    fn new(generation: u64) -> Self {
        Self {
            status: SessionStatus::New,
            generation,
            callbacks: HashMap::new(),
        }
    }
}

/// Registered sessions, their status and their event callbacks.
///
/// Status is written only by the dispatch loop and the call-control layer
/// inside this crate; everyone else observes it through `state`, `status`
/// or `subscribe`.
pub struct Registry {
    sessions: Mutex<HashMap<String, SessionState>>,
    next_callback_id: AtomicU64,
    next_generation: AtomicU64,
    changes: broadcast::Sender<StatusChange>,
}

impl Default for Registry {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(STATUS_CHANGE_CAPACITY);
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_callback_id: AtomicU64::new(0),
            next_generation: AtomicU64::new(0),
            changes,
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionState>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create `sid` with status `new`. Returns false if it already exists.
    pub fn insert(&self, sid: &str) -> bool {
        let mut sessions = self.lock();
        if sessions.contains_key(sid) {
            return false;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        sessions.insert(sid.to_string(), SessionState::new(generation));
        true
    }

    /// Remove `sid` and its callbacks. Returns false if it was absent.
    pub fn remove(&self, sid: &str) -> bool {
        self.lock().remove(sid).is_some()
    }

    pub fn contains(&self, sid: &str) -> bool {
        self.lock().contains_key(sid)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Registered session ids, sorted.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn status(&self, sid: &str) -> Option<SessionStatus> {
        self.lock().get(sid).map(|session| session.status)
    }

    /// Status string of `sid`, or `"unknown"`.
    pub fn state(&self, sid: &str) -> &'static str {
        self.status(sid)
            .map(SessionStatus::as_str)
            .unwrap_or(UNKNOWN_STATE)
    }

    /// Generation of the live session named `sid`.
    pub fn generation(&self, sid: &str) -> Option<u64> {
        self.lock().get(sid).map(|session| session.generation)
    }

    /// Overwrite the status of `sid` and notify subscribers. Returns false
    /// if it is not registered.
    pub(crate) fn set_status(&self, sid: &str, status: SessionStatus) -> bool {
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(sid) else {
            return false;
        };
        session.status = status;
        // Fails only when nobody is subscribed.
        self.changes
            .send(StatusChange {
                sid: sid.to_string(),
                status,
            })
            .ok();
        true
    }

    /// Receive every status update applied from now on, for all sessions.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }

    /// Append `callback` to the list for `event` on `sid`.
    pub fn on(&self, sid: &str, event: &str, callback: Callback) -> Result<CallbackId> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(sid)
            .ok_or_else(|| MuxError::UnknownSession(sid.to_string()))?;
        let id = CallbackId(self.next_callback_id.fetch_add(1, Ordering::Relaxed));
        session
            .callbacks
            .entry(event.to_string())
            .or_default()
            .push((id, callback));
        Ok(id)
    }

    /// Remove one callback. Returns false if it was not registered.
    pub fn off(&self, sid: &str, event: &str, id: CallbackId) -> bool {
        let mut sessions = self.lock();
        let Some(list) = sessions
            .get_mut(sid)
            .and_then(|session| session.callbacks.get_mut(event))
        else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        before != list.len()
    }

    /// Snapshot of the callbacks for `event` on `sid`, in registration order.
    pub fn callbacks(&self, sid: &str, event: &str) -> Vec<Callback> {
        self.snapshot(sid, event)
            .map(|snapshot| snapshot.callbacks)
            .unwrap_or_default()
    }

    pub(crate) fn snapshot(&self, sid: &str, event: &str) -> Option<Snapshot> {
        let sessions = self.lock();
        let session = sessions.get(sid)?;
        let callbacks = session
            .callbacks
            .get(event)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        Some(Snapshot {
            generation: session.generation,
            callbacks,
        })
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("sessions", &self.session_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Callback {
        callback(|_event| async { Ok::<(), BoxError>(()) })
    }

    #[test]
    fn new_session_starts_in_new_status() {
        let registry = Registry::new();
        assert!(registry.insert("s1"));
        assert!(!registry.insert("s1"));
        assert_eq!(registry.state("s1"), "new");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_session_reports_unknown() {
        let registry = Registry::new();
        assert_eq!(registry.state("nope"), UNKNOWN_STATE);
        assert!(!registry.set_status("nope", SessionStatus::Closed));
    }

    #[test]
    fn status_strings_roundtrip() {
        for status in [
            SessionStatus::New,
            SessionStatus::Joining,
            SessionStatus::ActivePlaying,
            SessionStatus::ActivePaused,
            SessionStatus::Leaving,
            SessionStatus::Closed,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                Value::from(status.as_str())
            );
        }
        assert!("playing".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn callbacks_snapshot_in_registration_order() {
        let registry = Registry::new();
        registry.insert("s1");
        let first = noop();
        let second = noop();
        registry.on("s1", "ended", Arc::clone(&first)).unwrap();
        registry.on("s1", "ended", Arc::clone(&second)).unwrap();

        let snapshot = registry.callbacks("s1", "ended");
        assert_eq!(snapshot.len(), 2);
        assert!(Arc::ptr_eq(&snapshot[0], &first));
        assert!(Arc::ptr_eq(&snapshot[1], &second));
        assert!(registry.callbacks("s1", "other").is_empty());
    }

    #[test]
    fn off_removes_only_the_given_callback() {
        let registry = Registry::new();
        registry.insert("s1");
        let keep = noop();
        let id = registry.on("s1", "ended", noop()).unwrap();
        registry.on("s1", "ended", Arc::clone(&keep)).unwrap();

        assert!(registry.off("s1", "ended", id));
        assert!(!registry.off("s1", "ended", id));

        let snapshot = registry.callbacks("s1", "ended");
        assert_eq!(snapshot.len(), 1);
        assert!(Arc::ptr_eq(&snapshot[0], &keep));
    }

    #[test]
    fn on_requires_registered_session() {
        let registry = Registry::new();
        let err = registry.on("ghost", "ended", noop()).unwrap_err();
        assert!(matches!(err, MuxError::UnknownSession(sid) if sid == "ghost"));
    }

    #[test]
    fn reinserted_session_gets_a_new_generation() {
        let registry = Registry::new();
        registry.insert("s1");
        let first = registry.generation("s1").unwrap();
        assert!(!registry.insert("s1"));
        assert_eq!(registry.generation("s1"), Some(first));

        registry.remove("s1");
        assert_eq!(registry.generation("s1"), None);
        registry.insert("s1");
        assert_ne!(registry.generation("s1"), Some(first));
    }

    #[test]
    fn subscribers_see_every_status_change_in_order() {
        let registry = Registry::new();
        registry.insert("s1");
        let mut changes = registry.subscribe();

        registry.set_status("s1", SessionStatus::ActivePlaying);
        registry.set_status("s1", SessionStatus::Closed);
        assert!(!registry.set_status("ghost", SessionStatus::Closed));

        for expected in [SessionStatus::ActivePlaying, SessionStatus::Closed] {
            let change = changes.try_recv().unwrap();
            assert_eq!(change.sid, "s1");
            assert_eq!(change.status, expected);
        }
        assert!(matches!(
            changes.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn remove_drops_callbacks() {
        let registry = Registry::new();
        registry.insert("s1");
        registry.on("s1", "ended", noop()).unwrap();

        assert!(registry.remove("s1"));
        assert!(!registry.remove("s1"));
        assert!(registry.callbacks("s1", "ended").is_empty());
        assert!(registry.is_empty());
    }
}
