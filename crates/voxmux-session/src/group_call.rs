//! One voice chat driven through the multiplexer.
//!
//! The worker handles media; the [`Signaling`] collaborator talks to the
//! telephony service. `GroupCall` sequences the two.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::TimedCache;
use crate::control::{CallCommand, JoinParams, SignalingParams, MAX_BITRATE, MAX_VOLUME};
use crate::correlator::AckBody;
use crate::error::{BoxError, MuxError, Result};
use crate::multiplexer::Multiplexer;
use crate::registry::{CallbackId, CallbackResult, Event, SessionStatus};

/// How long a fetched call descriptor is reused. Default: 60 s.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Why the service ended our participation without us asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEnded {
    /// We lost access to the chat.
    Kicked,
    /// The voice chat itself was discarded.
    Closed,
}

impl CallEnded {
    /// Leave reason reported to the worker.
    pub fn reason(self) -> &'static str {
        match self {
            Self::Kicked => "kicked_from_group",
            Self::Closed => "closed_voice_chat",
        }
    }
}

/// The telephony side of a call.
pub trait Signaling: Send + Sync + 'static {
    /// Call descriptor returned by `fetch_call`.
    type Call: Clone + Send + Sync + 'static;
    /// Identity a participant joins as.
    type Peer: Clone + Send + Sync + 'static;

    /// The identity used when the caller does not pick one.
    fn self_peer(&self) -> impl Future<Output = std::result::Result<Self::Peer, BoxError>> + Send;

    fn fetch_call(
        &self,
        chat_id: i64,
    ) -> impl Future<Output = std::result::Result<Self::Call, BoxError>> + Send;

    fn join_call(
        &self,
        call: &Self::Call,
        params: &SignalingParams,
        join_as: &Self::Peer,
        invite_hash: Option<&str>,
    ) -> impl Future<Output = std::result::Result<(), BoxError>> + Send;

    fn leave_call(
        &self,
        call: &Self::Call,
    ) -> impl Future<Output = std::result::Result<(), BoxError>> + Send;

    fn set_volume(
        &self,
        call: &Self::Call,
        peer: &Self::Peer,
        volume: u16,
    ) -> impl Future<Output = std::result::Result<(), BoxError>> + Send;
}

#[derive(Debug, Clone)]
pub struct GroupCallConfig {
    /// Freshness window for cached call descriptors.
    pub cache_ttl: Duration,
}

impl GroupCallConfig {
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

impl Default for GroupCallConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

/// A single chat's call, mapped to one multiplexer session.
pub struct GroupCall<S: Signaling> {
    mux: Arc<Multiplexer>,
    signaling: Arc<S>,
    chat_id: i64,
    sid: String,
    config: GroupCallConfig,
    calls: TimedCache<i64, S::Call>,
    peers: TimedCache<i64, S::Peer>,
}

impl<S: Signaling> GroupCall<S> {
    pub fn new(mux: Arc<Multiplexer>, signaling: Arc<S>, chat_id: i64) -> Self {
        Self::with_config(mux, signaling, chat_id, GroupCallConfig::default())
    }

    pub fn with_config(
        mux: Arc<Multiplexer>,
        signaling: Arc<S>,
        chat_id: i64,
        config: GroupCallConfig,
    ) -> Self {
        let n = NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            mux,
            signaling,
            chat_id,
            sid: format!("call-{chat_id}-{n}"),
            config,
            calls: TimedCache::new(),
            peers: TimedCache::new(),
        }
    }

    /// Session id used on the worker channel.
    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    pub fn state(&self) -> &'static str {
        self.mux.state(&self.sid)
    }

    /// Register an event callback. The call must have been joined.
    pub fn on<F, Fut>(&self, event: &str, f: F) -> Result<CallbackId>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.mux.on(&self.sid, event, f)
    }

    /// The call descriptor, from cache when fresh enough.
    pub async fn fetch_call(&self) -> Result<S::Call> {
        if let Some(call) = self.calls.get_fresh(&self.chat_id, self.config.cache_ttl) {
            debug!(sid = %self.sid, chat_id = self.chat_id, "call cache hit");
            return Ok(call);
        }
        debug!(sid = %self.sid, chat_id = self.chat_id, "call cache miss");
        let call = self
            .signaling
            .fetch_call(self.chat_id)
            .await
            .map_err(MuxError::Signaling)?;
        self.calls.put(self.chat_id, call.clone());
        Ok(call)
    }

    /// Replace the cached call descriptor with one pushed by the service.
    pub fn on_call_updated(&self, call: S::Call) {
        debug!(sid = %self.sid, chat_id = self.chat_id, "call descriptor updated");
        self.calls.put(self.chat_id, call);
    }

    /// Tear down after the service ended the call on its side.
    ///
    /// Runs the leave flow if the session is live. The call and peer caches
    /// are dropped either way; leave errors are logged and returned.
    pub async fn on_call_ended(&self, ended: CallEnded) -> Result<()> {
        let reason = ended.reason();
        info!(sid = %self.sid, chat_id = self.chat_id, reason, "voice chat ended remotely");
        let left = if self.mux.status(&self.sid).is_some() {
            self.leave(reason).await
        } else {
            Ok(())
        };
        if let Err(err) = &left {
            warn!(sid = %self.sid, reason, error = %err, "leave after remote end failed");
        }
        self.peers.pop(&self.chat_id);
        self.calls.pop(&self.chat_id);
        left
    }

    /// Start streaming `file_path` into the chat's voice call.
    ///
    /// A join that fails after the session was created clears it again.
    pub async fn join(
        &self,
        file_path: impl AsRef<Path>,
        bitrate: u32,
        invite_hash: Option<&str>,
        join_as: Option<S::Peer>,
    ) -> Result<SignalingParams> {
        let file_path = file_path.as_ref();
        check_stream(file_path).await?;
        let bitrate = bitrate.min(MAX_BITRATE);
        let join_as = match join_as {
            Some(peer) => peer,
            None => self
                .signaling
                .self_peer()
                .await
                .map_err(MuxError::Signaling)?,
        };

        self.mux.init(self.sid.clone()).await?;
        let params = match self
            .negotiate(file_path, bitrate, invite_hash, &join_as)
            .await
        {
            Ok(params) => params,
            Err(err) => {
                warn!(sid = %self.sid, error = %err, "join failed, dropping session");
                if let Err(clear) = self.mux.clear(&self.sid).await {
                    warn!(sid = %self.sid, error = %clear, "failed to drop session");
                }
                return Err(err);
            }
        };
        self.peers.put(self.chat_id, join_as);

        info!(sid = %self.sid, chat_id = self.chat_id, bitrate, "joined voice chat");
        Ok(params)
    }

    async fn negotiate(
        &self,
        file_path: &Path,
        bitrate: u32,
        invite_hash: Option<&str>,
        join_as: &S::Peer,
    ) -> Result<SignalingParams> {
        self.mux.set_status(&self.sid, SessionStatus::Joining)?;

        let ack = self
            .command(CallCommand::JoinCall {
                chat_id: self.chat_id,
                file_path: file_path.display().to_string(),
                invite_hash: invite_hash.map(str::to_string),
                bitrate,
            })
            .await?;
        let params = JoinParams::from_ack(&ack)?.to_signaling();

        let call = self.fetch_call().await?;
        self.signaling
            .join_call(&call, &params, join_as, invite_hash)
            .await
            .map_err(MuxError::Signaling)?;
        Ok(params)
    }

    pub async fn pause(&self) -> Result<()> {
        self.command(CallCommand::Pause {
            chat_id: self.chat_id,
        })
        .await
        .map(drop)
    }

    pub async fn resume(&self) -> Result<()> {
        self.command(CallCommand::Resume {
            chat_id: self.chat_id,
        })
        .await
        .map(drop)
    }

    /// Switch the stream to another file.
    pub async fn change_stream(&self, file_path: impl AsRef<Path>) -> Result<()> {
        let file_path = file_path.as_ref();
        check_stream(file_path).await?;
        self.command(CallCommand::ChangeStream {
            chat_id: self.chat_id,
            file_path: file_path.display().to_string(),
        })
        .await
        .map(drop)
    }

    /// Set our participant volume, clamped to `0..=200`.
    pub async fn set_volume(&self, volume: i32) -> Result<u16> {
        let volume = clamp_volume(volume);
        let call = self.fetch_call().await?;
        let peer = match self.peers.get(&self.chat_id) {
            Some(entry) => entry.value,
            None => self
                .signaling
                .self_peer()
                .await
                .map_err(MuxError::Signaling)?,
        };
        self.signaling
            .set_volume(&call, &peer, volume)
            .await
            .map_err(MuxError::Signaling)?;
        Ok(volume)
    }

    /// Leave the call and drop the session.
    ///
    /// The session is cleared even when the worker is already gone.
    pub async fn leave(&self, reason: &str) -> Result<()> {
        self.mux.set_status(&self.sid, SessionStatus::Leaving)?;

        let sent = self
            .command(CallCommand::LeaveCall {
                chat_id: self.chat_id,
                reason: reason.to_string(),
            })
            .await;
        if let Err(err) = &sent {
            warn!(sid = %self.sid, error = %err, "worker did not confirm leave");
        }

        let left = match self.fetch_call().await {
            Ok(call) => self
                .signaling
                .leave_call(&call)
                .await
                .map_err(MuxError::Signaling),
            Err(err) => Err(err),
        };
        self.peers.pop(&self.chat_id);
        self.mux.clear(&self.sid).await?;
        left?;

        info!(sid = %self.sid, chat_id = self.chat_id, reason, "left voice chat");
        match sent {
            Err(err) if !(err.is_worker_died() || matches!(err, MuxError::InvalidState(_))) => {
                Err(err)
            }
            _ => Ok(()),
        }
    }

    async fn command(&self, command: CallCommand) -> Result<AckBody> {
        debug!(sid = %self.sid, action = command.action(), "sending call command");
        self.mux.send(&self.sid, command.to_payload()?).await
    }
}

impl<S: Signaling> std::fmt::Debug for GroupCall<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupCall")
            .field("sid", &self.sid)
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

fn clamp_volume(volume: i32) -> u16 {
    volume.clamp(0, i32::from(MAX_VOLUME)) as u16
}

/// A stream source must be an existing, non-empty regular file.
async fn check_stream(path: &Path) -> Result<()> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|err| MuxError::InvalidStream(format!("{}: {err}", path.display())))?;
    if !meta.is_file() {
        return Err(MuxError::InvalidStream(format!(
            "{}: not a regular file",
            path.display()
        )));
    }
    if meta.len() == 0 {
        return Err(MuxError::InvalidStream(format!("{}: empty file", path.display())));
    }
    Ok(())
}
