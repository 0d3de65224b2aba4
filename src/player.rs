//! Playback session state machine.
//!
//! [`PlaybackSession`] sits between the vendor playback engine and the
//! provider's transport endpoints. The engine owns the audio; this
//! session owns the interpretation of its events and the commands sent
//! back. Every engine event maps to exactly one transition:
//!
//! ```text
//! Uninitialized -> Connecting -> AwaitingReady <-> Ready
//!                      |               |            |
//!                      |               +-- account error --> Disabled
//!                      +------- init/auth error ----------> Failed
//! ```
//!
//! `Disabled` and `Failed` are terminal; engine events that arrive
//! afterwards, including a late ready, are dropped.
//!
//! # Free accounts
//!
//! The account tier is assumed capable until the engine reports
//! otherwise. An account error disables playback for the rest of the
//! session but resolves [`initialize`](PlaybackSession::initialize)
//! successfully, so catalog browsing keeps working without playback
//! controls.
//!
//! # Progress sampling
//!
//! While playback runs, a 1-second loop samples the engine for the
//! current position. The loop runs if and only if
//! [`PlaybackState::playing`] is true; every transition that stops
//! playback cancels it rather than letting it lapse. State events win
//! over the loop: a tick's position write is advisory and skipped
//! when the loop was cancelled while its query was in flight.
//!
//! # Token handoff
//!
//! The session takes the access token once at
//! [`initialize`](PlaybackSession::initialize) and keeps using it for
//! transport commands. A token refreshed later is not propagated into
//! a running session; reconnect to pick it up.

use std::{sync::Arc, time::Duration};

use reqwest::{
    header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    StatusCode,
};
use thiserror::Error;
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver},
        Mutex,
    },
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::Config,
    engine::{Engine, EngineEvent},
    events::Event,
    http::Client as HttpClient,
    protocol::{
        self, catalog,
        player::{PlayBody, State},
        ApiErrorBody,
    },
};

/// Errors that can occur driving playback.
#[derive(Error, Debug)]
pub enum Error {
    /// The account's tier cannot use playback. Not fatal; browsing
    /// continues.
    #[error("playback requires a premium account")]
    TierRestricted,

    /// No registered playback device; transient until the engine
    /// reports ready again.
    #[error("no playback device is ready")]
    DeviceNotReady,

    /// The engine failed to initialize. Fatal for this session.
    #[error("engine initialization failed: {message}")]
    EngineInit { message: String },

    /// The engine rejected the access token. Fatal for this session.
    #[error("engine authentication failed: {message}")]
    EngineAuth { message: String },

    /// The engine did not report ready in time. Fatal for this
    /// session.
    #[error("engine did not become ready in time")]
    EngineTimeout,

    /// The engine dropped its event stream. Fatal for this session.
    #[error("engine event stream closed")]
    EngineClosed,

    /// An initialization attempt is already in flight, or an earlier
    /// one failed and the session was not reset with a disconnect.
    #[error("playback session already in use; disconnect to reset")]
    AlreadyConnected,

    /// The transport rejected a command.
    #[error("transport error {status}: {message}")]
    Transport { status: StatusCode, message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("HTTP header error: {0}")]
    HttpHeader(String),

    #[error("parsing JSON error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("parsing URL failed: {0}")]
    UrlParse(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Phases of the playback session.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Phase {
    /// No engine connection.
    #[default]
    Uninitialized,

    /// Engine connection in flight.
    Connecting,

    /// Engine connected; no playback device registered.
    AwaitingReady,

    /// Playback device registered, idle or playing.
    Ready,

    /// The account's tier cannot use playback. Terminal.
    Disabled,

    /// Initialization or authentication failed. Terminal.
    Failed,
}

impl Phase {
    /// Whether engine events are still acted upon in this phase.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disabled | Self::Failed)
    }
}

/// Successful outcomes of [`PlaybackSession::initialize`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Initialized {
    /// A playback device is registered.
    Ready,

    /// The account's tier cannot use playback; the session is usable
    /// for everything else.
    TierRestricted,
}

/// The track as shown to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    pub uri: String,
    pub name: String,
    pub artists: Vec<String>,
    pub album_art: Option<Url>,
    pub duration: Duration,
}

impl From<&catalog::Track> for Track {
    fn from(track: &catalog::Track) -> Self {
        Self {
            uri: track.uri.clone(),
            name: track.name.clone(),
            artists: track
                .artists
                .iter()
                .map(|artist| artist.name.clone())
                .collect(),
            album_art: track
                .album
                .as_ref()
                .and_then(|album| album.images.first())
                .map(|image| image.url.clone()),
            duration: track.duration,
        }
    }
}

/// Snapshot of what is playing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackState {
    pub track: Option<Track>,

    /// Position within the current track. Advanced by the progress
    /// loop between engine state events.
    pub position: Duration,

    pub playing: bool,

    /// Whether the account tier allows playback. Optimistic until the
    /// engine reports otherwise; never flips back within a session.
    pub premium: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            track: None,
            position: Duration::ZERO,
            playing: false,
            premium: true,
        }
    }
}

#[derive(Default)]
struct Shared {
    phase: Phase,
    access_token: Option<String>,
    device_id: Option<String>,
    playback: PlaybackState,

    /// Cancels the progress loop. `Some` if and only if a loop is
    /// running.
    progress: Option<CancellationToken>,

    /// Cancels the engine event pump on disconnect.
    teardown: Option<CancellationToken>,
}

/// Cloneable handle on the playback session.
///
/// All clones share one state machine; the engine event pump and the
/// progress loop hold clones internally.
#[derive(Clone)]
pub struct PlaybackSession {
    engine: Arc<dyn Engine>,
    http_client: Arc<HttpClient>,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<Event>,
    api_url: Url,
}

impl PlaybackSession {
    /// Deadline for the whole engine bring-up, connection included,
    /// before initialization fails.
    const READY_TIMEOUT: Duration = Duration::from_secs(10);

    /// Interval of the progress sampling loop.
    const PROGRESS_INTERVAL: Duration = Duration::from_millis(1000);

    /// The `Content-Type` header value for transport commands.
    const JSON_CONTENT: HeaderValue = HeaderValue::from_static("application/json");

    #[must_use]
    pub fn new(
        config: &Config,
        http_client: Arc<HttpClient>,
        engine: Arc<dyn Engine>,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            engine,
            http_client,
            shared: Arc::new(Mutex::new(Shared::default())),
            events,
            api_url: config.api_url.clone(),
        }
    }

    /// Connects the engine and waits for it to settle.
    ///
    /// Resolves when the engine registers a device
    /// ([`Initialized::Ready`]), when it reports the account tier
    /// cannot play ([`Initialized::TierRestricted`]), or with an error
    /// when it fails or the ready timeout runs out. One deadline spans
    /// the whole bring-up, from connecting the engine to the event
    /// that settles the call; a ready event arriving after it has
    /// fired is ignored.
    ///
    /// The session holds on to `access_token` for transport commands.
    /// Calling again on a settled session returns the earlier outcome
    /// without reconnecting.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the engine fails to connect, initialize or authenticate
    /// - no device is ready within the timeout
    /// - an attempt is already in flight, or an earlier one failed and
    ///   the session was not reset with a disconnect
    pub async fn initialize(&self, access_token: &str) -> Result<Initialized> {
        let teardown = CancellationToken::new();
        {
            let mut shared = self.shared.lock().await;
            match shared.phase {
                Phase::Uninitialized => {}
                Phase::Ready => return Ok(Initialized::Ready),
                Phase::Disabled => return Ok(Initialized::TierRestricted),
                Phase::Connecting | Phase::AwaitingReady | Phase::Failed => {
                    return Err(Error::AlreadyConnected)
                }
            }

            shared.phase = Phase::Connecting;
            shared.access_token = Some(access_token.to_owned());
            shared.teardown = Some(teardown.clone());
        }

        let bring_up = async {
            let mut events = match self.engine.connect(access_token).await {
                Ok(events) => events,
                Err(e) => {
                    error!("engine connection failed: {e}");
                    return Err(Error::EngineInit {
                        message: e.to_string(),
                    });
                }
            };

            self.shared.lock().await.phase = Phase::AwaitingReady;

            loop {
                let Some(event) = events.recv().await else {
                    return Err(Error::EngineClosed);
                };

                // These settle the call with an error; everything else
                // settles through the phase the handler leaves behind.
                let failure = match &event {
                    EngineEvent::InitializationError { message } => Some(Error::EngineInit {
                        message: message.clone(),
                    }),
                    EngineEvent::AuthenticationError { message } => Some(Error::EngineAuth {
                        message: message.clone(),
                    }),
                    _ => None,
                };

                self.handle_event(event).await;

                if let Some(e) = failure {
                    return Err(e);
                }

                match self.shared.lock().await.phase {
                    Phase::Ready => return Ok((Initialized::Ready, events)),
                    Phase::Disabled => return Ok((Initialized::TierRestricted, events)),
                    _ => {}
                }
            }
        };

        match tokio::time::timeout(Self::READY_TIMEOUT, bring_up).await {
            Ok(Ok((initialized, events))) => {
                self.spawn_event_pump(events, teardown);
                Ok(initialized)
            }
            Ok(Err(e)) => {
                let mut shared = self.shared.lock().await;
                if !shared.phase.is_terminal() {
                    shared.phase = Phase::Failed;
                }
                Err(e)
            }
            Err(_) => {
                warn!(
                    "engine not ready within {}s",
                    Self::READY_TIMEOUT.as_secs()
                );
                self.shared.lock().await.phase = Phase::Failed;
                Err(Error::EngineTimeout)
            }
        }
    }

    /// Starts playback of a single track on the registered device.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the account tier cannot play
    /// - no device is registered
    /// - the transport rejects the command
    pub async fn play(&self, track_uri: &str) -> Result<()> {
        let (device_id, access_token) = self.command_target(true).await?;
        let body = serde_json::to_string(&PlayBody::uri(track_uri))?;

        self.transport("me/player/play", &device_id, &access_token, &[], Some(body))
            .await
    }

    /// Starts playback of a context, e.g. a playlist, optionally at a
    /// track offset within it.
    ///
    /// # Errors
    ///
    /// Same as [`play`](PlaybackSession::play).
    pub async fn play_context(&self, context_uri: &str, offset: Option<u32>) -> Result<()> {
        let (device_id, access_token) = self.command_target(true).await?;
        let body = serde_json::to_string(&PlayBody::context(context_uri, offset))?;

        self.transport("me/player/play", &device_id, &access_token, &[], Some(body))
            .await
    }

    /// Pauses playback on the registered device.
    ///
    /// # Errors
    ///
    /// Will return `Err` if no device is registered or the transport
    /// rejects the command.
    pub async fn pause(&self) -> Result<()> {
        let (device_id, access_token) = self.command_target(false).await?;

        self.transport("me/player/pause", &device_id, &access_token, &[], None)
            .await
    }

    /// Resumes playback on the registered device.
    ///
    /// # Errors
    ///
    /// Same as [`pause`](PlaybackSession::pause).
    pub async fn resume(&self) -> Result<()> {
        let (device_id, access_token) = self.command_target(false).await?;

        self.transport("me/player/play", &device_id, &access_token, &[], None)
            .await
    }

    /// Seeks within the current track.
    ///
    /// # Errors
    ///
    /// Same as [`play`](PlaybackSession::play).
    pub async fn seek(&self, position: Duration) -> Result<()> {
        let (device_id, access_token) = self.command_target(true).await?;
        let position_ms = position.as_millis().to_string();

        self.transport(
            "me/player/seek",
            &device_id,
            &access_token,
            &[("position_ms", &position_ms)],
            None,
        )
        .await
    }

    /// Pauses or resumes based on the current playing flag.
    ///
    /// # Errors
    ///
    /// Same as [`pause`](PlaybackSession::pause).
    pub async fn toggle_play_pause(&self) -> Result<()> {
        let playing = self.shared.lock().await.playback.playing;
        if playing {
            self.pause().await
        } else {
            self.resume().await
        }
    }

    /// Tears the session down.
    ///
    /// Cancels the event pump and progress loop, releases the device
    /// and returns to [`Phase::Uninitialized`] so a new
    /// [`initialize`](PlaybackSession::initialize) starts fresh.
    pub async fn disconnect(&self) {
        {
            let mut shared = self.shared.lock().await;

            if let Some(teardown) = shared.teardown.take() {
                teardown.cancel();
            }
            Self::stop_progress(&mut shared);

            if shared.device_id.take().is_some() {
                self.emit(Event::Disconnected);
            }
            shared.playback = PlaybackState::default();
            shared.phase = Phase::Uninitialized;
            shared.access_token = None;
        }

        self.engine.disconnect().await;
        info!("playback session disconnected");
    }

    /// Current phase of the session.
    pub async fn phase(&self) -> Phase {
        self.shared.lock().await.phase
    }

    /// The registered playback device, if any.
    pub async fn device_id(&self) -> Option<String> {
        self.shared.lock().await.device_id.clone()
    }

    /// Snapshot of the current playback state.
    pub async fn playback_state(&self) -> PlaybackState {
        self.shared.lock().await.playback.clone()
    }

    /// Applies one engine event to the state machine.
    ///
    /// Events are processed to completion in arrival order; in a
    /// terminal phase they are logged and dropped.
    async fn handle_event(&self, event: EngineEvent) {
        let mut shared = self.shared.lock().await;

        if shared.phase.is_terminal() {
            trace!("dropping engine event in {:?} phase: {event:?}", shared.phase);
            return;
        }

        match event {
            EngineEvent::Ready { device_id } => {
                info!("playback device ready: {device_id}");
                shared.device_id = Some(device_id);
                shared.phase = Phase::Ready;
                self.emit(Event::Connected);
            }

            EngineEvent::NotReady { device_id } => {
                info!("playback device offline: {device_id}");
                shared.device_id = None;
                shared.phase = Phase::AwaitingReady;
                Self::stop_progress(&mut shared);
                shared.playback.playing = false;
                self.emit(Event::Disconnected);
            }

            EngineEvent::StateChanged(None) => {
                debug!("playback moved away from this device");
            }

            EngineEvent::StateChanged(Some(state)) => {
                self.apply_state(&mut shared, &state);
            }

            EngineEvent::AccountError { message } => {
                warn!("account cannot use playback: {message}");
                shared.playback.premium = false;
                shared.phase = Phase::Disabled;
                Self::stop_progress(&mut shared);
                shared.playback.playing = false;
                self.emit(Event::PlaybackDisabled);
            }

            EngineEvent::InitializationError { message } => {
                error!("engine initialization failed: {message}");
                shared.phase = Phase::Failed;
                Self::stop_progress(&mut shared);
                shared.playback.playing = false;
            }

            EngineEvent::AuthenticationError { message } => {
                error!("engine authentication failed: {message}");
                shared.phase = Phase::Failed;
                Self::stop_progress(&mut shared);
                shared.playback.playing = false;
            }

            EngineEvent::PlaybackError { message } => {
                warn!("playback error: {message}");
            }
        }
    }

    /// Applies a state snapshot and reconciles the progress loop.
    fn apply_state(&self, shared: &mut Shared, state: &State) {
        let track = Track::from(&state.track_window.current_track);
        let playing = !state.paused;

        let track_changed = shared
            .playback
            .track
            .as_ref()
            .map_or(true, |current| current.uri != track.uri);
        let was_playing = shared.playback.playing;

        if track_changed {
            debug!("track changed: {}", track.name);
            self.emit(Event::TrackChanged);
        }
        if playing != was_playing {
            self.emit(if playing { Event::Play } else { Event::Pause });
        }

        shared.playback.track = Some(track);
        shared.playback.position = state.position;
        shared.playback.playing = playing;

        // State events own the loop: restart it fresh or stop it so
        // its activity always matches the playing flag.
        if playing {
            self.start_progress(shared);
        } else {
            Self::stop_progress(shared);
        }
    }

    /// Starts a fresh progress loop, replacing any running one.
    fn start_progress(&self, shared: &mut Shared) {
        Self::stop_progress(shared);

        let cancel = CancellationToken::new();
        shared.progress = Some(cancel.clone());

        let session = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Self::PROGRESS_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; the state event that
            // started this loop already carried a fresh position.
            interval.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(state) = session.engine.current_state().await else {
                            continue;
                        };

                        let mut shared = session.shared.lock().await;
                        // A state event may have stopped or replaced
                        // this loop while the query was in flight; its
                        // position wins over this advisory update.
                        if cancel.is_cancelled() || !shared.playback.playing {
                            break;
                        }
                        shared.playback.position = state.position;
                    }
                }
            }

            trace!("progress loop stopped");
        });
    }

    fn stop_progress(shared: &mut Shared) {
        if let Some(cancel) = shared.progress.take() {
            cancel.cancel();
        }
    }

    /// Consumes engine events for the rest of the session.
    fn spawn_event_pump(
        &self,
        mut events: UnboundedReceiver<EngineEvent>,
        teardown: CancellationToken,
    ) {
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = teardown.cancelled() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        session.handle_event(event).await;
                    }
                }
            }

            trace!("engine event pump stopped");
        });
    }

    /// Checks command preconditions and returns the transport target.
    ///
    /// The tier gate comes first so a disabled session answers with
    /// the restriction notice rather than a device complaint.
    async fn command_target(&self, premium_required: bool) -> Result<(String, String)> {
        let shared = self.shared.lock().await;

        if premium_required && !shared.playback.premium {
            return Err(Error::TierRestricted);
        }

        let device_id = shared.device_id.clone().ok_or(Error::DeviceNotReady)?;
        let access_token = shared.access_token.clone().ok_or(Error::DeviceNotReady)?;

        Ok((device_id, access_token))
    }

    /// Issues a transport command addressed to the registered device.
    async fn transport(
        &self,
        endpoint: &str,
        device_id: &str,
        access_token: &str,
        query: &[(&str, &str)],
        body: Option<String>,
    ) -> Result<()> {
        let mut url = self.api_url.join(endpoint)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("device_id", device_id);
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        let mut request = self.http_client.put(url, body.unwrap_or_default());
        let headers = request.headers_mut();
        headers.try_insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}"))?,
        )?;
        headers.try_insert(CONTENT_TYPE, Self::JSON_CONTENT)?;

        let response = self.http_client.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let envelope = serde_json::from_str::<ApiErrorBody>(&body).ok();

        if status == StatusCode::FORBIDDEN
            && envelope.as_ref().is_some_and(|envelope| {
                envelope.error.reason.as_deref() == Some(protocol::PREMIUM_REQUIRED)
            })
        {
            warn!("transport rejected {endpoint}: premium required");
            return Err(Error::TierRestricted);
        }

        let message = envelope
            .and_then(|envelope| envelope.error.message)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            });

        warn!("transport error on {endpoint}: {status} {message}");
        Err(Error::Transport { status, message })
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("event receiver closed");
        }
    }
}

impl From<http::header::MaxSizeReached> for Error {
    fn from(e: http::header::MaxSizeReached) -> Self {
        Self::HttpHeader(e.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::HttpHeader(e.to_string())
    }
}
