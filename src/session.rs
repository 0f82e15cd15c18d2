//! One launch of a stored game.
//!
//! States: `Idle -> Loading -> Running -> (Restarting -> Loading) | Closed`.
//! A session owns at most one [`ResourceHandle`] at a time. `close` is safe
//! from any state; a handle that finishes materializing after `close` is
//! released on arrival instead of being installed.

use std::borrow::Cow;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use anyhow::{anyhow, Context, Result};

use crate::error_codes::{
    CodedError, RESOURCE_MATERIALIZATION_FAILED, SESSION_CLOSED, SESSION_NOT_RUNNING,
};
use crate::isolation::IsolationPolicy;
use crate::normalize::{is_standalone_document, wrap_component_source};
use crate::platform::Platform;
use crate::records::{GameRecord, GameUpdate, RecordUpdater};
use crate::resource::{ResourceHandle, ResourceHost, ResourceRef};

pub const RESTART_PROMPT: &str = "Restart game?";

pub type SessionHandle = Arc<PlaybackSession>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Running,
    Restarting,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub confirm_restart: bool,
    pub policy: IsolationPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            confirm_restart: true,
            policy: IsolationPolicy::default(),
        }
    }
}

/// Collaborators shared by every session a host launches.
#[derive(Clone)]
pub struct PlaybackEnvironment {
    pub host: Arc<dyn ResourceHost>,
    pub platform: Arc<dyn Platform>,
    pub updater: Arc<dyn RecordUpdater>,
    pub options: SessionOptions,
}

impl PlaybackEnvironment {
    pub fn new(
        host: Arc<dyn ResourceHost>,
        platform: Arc<dyn Platform>,
        updater: Arc<dyn RecordUpdater>,
    ) -> Self {
        Self {
            host,
            platform,
            updater,
            options: SessionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }
}

/// Document the player loads for `record`: the stored content when it is
/// already standalone, otherwise the content wrapped as a component.
pub fn prepare_content(record: &GameRecord) -> Cow<'_, str> {
    if is_standalone_document(&record.content) {
        Cow::Borrowed(&record.content)
    } else {
        Cow::Owned(wrap_component_source(&record.content, &record.name))
    }
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    handle: Option<ResourceHandle>,
    generation: u64,
    fullscreen: bool,
}

pub struct PlaybackSession {
    record: GameRecord,
    env: PlaybackEnvironment,
    prepared: OnceLock<String>,
    inner: Mutex<SessionInner>,
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("record", &self.record.id)
            .field("inner", &self.inner)
            .finish()
    }
}

impl PlaybackSession {
    pub fn new(record: GameRecord, env: PlaybackEnvironment) -> Self {
        Self {
            record,
            env,
            prepared: OnceLock::new(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                handle: None,
                generation: 0,
                fullscreen: false,
            }),
        }
    }

    /// Creates and starts a session in one step.
    pub async fn launch(record: GameRecord, env: PlaybackEnvironment) -> Result<SessionHandle> {
        let session = Arc::new(Self::new(record, env));
        session.start().await?;
        Ok(session)
    }

    pub fn record(&self) -> &GameRecord {
        &self.record
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_fullscreen(&self) -> bool {
        self.lock().fullscreen
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn current_resource(&self) -> Option<ResourceRef> {
        self.lock()
            .handle
            .as_ref()
            .map(|handle| handle.resource().clone())
    }

    pub fn load_target(&self) -> Option<String> {
        self.current_resource().map(|resource| resource.load_target())
    }

    /// Frame markup for the current resource, if one is assigned.
    pub fn frame_markup(&self) -> Option<Result<String>> {
        self.load_target().map(|target| {
            self.env
                .options
                .policy
                .frame_markup(&target, &self.record.name)
        })
    }

    /// The launched document. Normalization runs at most once per session.
    pub fn document(&self) -> &str {
        self.prepared
            .get_or_init(|| prepare_content(&self.record).into_owned())
    }

    /// `Idle -> Loading -> Running`.
    pub async fn start(&self) -> Result<ResourceRef> {
        let generation = {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Idle => {}
                SessionState::Closed => return Err(closed_error(&self.record.id)),
                other => {
                    return Err(anyhow!(CodedError::usage(
                        SESSION_NOT_RUNNING,
                        format!("session already started (state: {})", other.as_str())
                    )))
                }
            }
            inner.state = SessionState::Loading;
            inner.generation += 1;
            inner.generation
        };
        tracing::debug!(id = %self.record.id, generation, "starting playback session");

        self.touch_last_played();
        self.load(generation).await
    }

    /// Asks for confirmation, then restarts. `Ok(None)` when declined. Sessions
    /// that are not running fail without prompting.
    pub async fn restart(&self) -> Result<Option<ResourceRef>> {
        self.ensure_restartable(self.lock().state)?;
        if self.env.options.confirm_restart && !self.env.platform.confirm(RESTART_PROMPT) {
            tracing::debug!(id = %self.record.id, "restart declined");
            return Ok(None);
        }
        self.restart_now().await.map(Some)
    }

    /// `Running -> Restarting -> Loading -> Running` without asking.
    pub async fn restart_now(&self) -> Result<ResourceRef> {
        let generation = {
            let mut inner = self.lock();
            self.ensure_restartable(inner.state)?;
            inner.state = SessionState::Restarting;
            if let Some(mut old) = inner.handle.take() {
                old.release();
            }
            inner.generation += 1;
            inner.generation
        };
        tracing::debug!(id = %self.record.id, generation, "restarting playback session");

        // Let the frame observe the empty target before the new one arrives.
        tokio::task::yield_now().await;

        {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed {
                return Err(closed_error(&self.record.id));
            }
            inner.state = SessionState::Loading;
        }
        self.load(generation).await
    }

    /// Enters or leaves fullscreen. Platform refusals, and entry under a policy
    /// without fullscreen, are logged and leave the session as it was. Returns
    /// the resulting fullscreen flag.
    pub fn toggle_fullscreen(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == SessionState::Closed {
            return false;
        }
        let entering = !self.env.platform.is_fullscreen();
        if entering && !self.env.options.policy.allows_fullscreen() {
            tracing::warn!(id = %self.record.id, "isolation policy does not allow fullscreen");
            return inner.fullscreen;
        }
        let result = if entering {
            self.env.platform.request_fullscreen()
        } else {
            self.env.platform.exit_fullscreen()
        };
        match result {
            Ok(()) => inner.fullscreen = entering,
            Err(error) => {
                tracing::warn!(id = %self.record.id, entering, "fullscreen request failed: {error:#}");
            }
        }
        inner.fullscreen
    }

    /// Releases the active resource. Safe to call repeatedly and from any state.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.state == SessionState::Closed {
            return;
        }
        inner.state = SessionState::Closed;
        if let Some(mut handle) = inner.handle.take() {
            handle.release();
        }
        if inner.fullscreen {
            inner.fullscreen = false;
            if let Err(error) = self.env.platform.exit_fullscreen() {
                tracing::warn!(id = %self.record.id, "failed to leave fullscreen on close: {error:#}");
            }
        }
        tracing::debug!(id = %self.record.id, "closed playback session");
    }

    async fn load(&self, generation: u64) -> Result<ResourceRef> {
        let acquired =
            ResourceHandle::acquire(self.env.host.clone(), self.document(), generation).await;

        let mut inner = self.lock();
        let mut handle = match acquired {
            Ok(handle) => handle,
            Err(error) => {
                inner.state = SessionState::Closed;
                tracing::warn!(id = %self.record.id, "failed to materialize game document: {error:#}");
                let coded = CodedError::platform(
                    RESOURCE_MATERIALIZATION_FAILED,
                    format!("could not load '{}'", self.record.name),
                );
                return Err(error.context(coded));
            }
        };

        if inner.state == SessionState::Closed {
            handle.release();
            return Err(closed_error(&self.record.id))
                .context("session closed while its document was loading");
        }

        let resource = handle.resource().clone();
        inner.handle = Some(handle);
        inner.state = SessionState::Running;
        tracing::debug!(id = %self.record.id, url = %resource.url, generation, "session running");
        Ok(resource)
    }

    fn ensure_restartable(&self, state: SessionState) -> Result<()> {
        match state {
            SessionState::Running => Ok(()),
            SessionState::Closed => Err(closed_error(&self.record.id)),
            other => Err(anyhow!(CodedError::usage(
                SESSION_NOT_RUNNING,
                format!("cannot restart while {}", other.as_str())
            ))),
        }
    }

    fn touch_last_played(&self) {
        let now = self.env.platform.now_millis();
        if let Err(error) = self
            .env
            .updater
            .update_record(&self.record.id, GameUpdate::last_played(now))
        {
            tracing::warn!(id = %self.record.id, "failed to record last played time: {error:#}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn closed_error(id: &str) -> anyhow::Error {
    anyhow!(CodedError::usage(
        SESSION_CLOSED,
        format!("playback session for '{id}' is closed")
    ))
}
