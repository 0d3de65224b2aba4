//! Playback engine abstraction.
//!
//! Audio decoding and output live in the provider's playback engine,
//! which this crate drives but does not implement. The engine is
//! modeled as a connect/disconnect pair plus an ordered stream of
//! [`EngineEvent`]s; [`PlaybackSession`] owns all interpretation of
//! those events.
//!
//! Events must be delivered in the order the engine raised them. In
//! particular a ready event after a terminal failure is a protocol
//! violation the session guards against, not something an [`Engine`]
//! implementation may rely on.
//!
//! [`PlaybackSession`]: crate::player::PlaybackSession

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::protocol::player::State;

/// Errors that can occur bringing an engine up.
#[derive(Error, Debug)]
pub enum Error {
    #[error("engine connection failed: {0}")]
    Connect(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Events the playback engine reports, in the order they occurred.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    /// The engine registered a playback device under `device_id`.
    Ready { device_id: String },

    /// The device dropped out without a terminal error. The engine
    /// may recover and report [`EngineEvent::Ready`] again later.
    NotReady { device_id: String },

    /// A new playback state snapshot. `None` means playback moved
    /// away from this device.
    StateChanged(Option<State>),

    /// The engine failed to initialize. Terminal for this session.
    InitializationError { message: String },

    /// The engine rejected the access token. Terminal for this
    /// session.
    AuthenticationError { message: String },

    /// The account's tier cannot use this engine. Terminal, but
    /// expected for free accounts; the session degrades instead of
    /// failing.
    AccountError { message: String },

    /// A transient playback failure, e.g. one track that would not
    /// play. Not terminal.
    PlaybackError { message: String },
}

/// Contract to the vendor playback engine.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Connects the engine with the given access token and returns
    /// its event stream.
    ///
    /// Dropping the receiver, or calling [`disconnect`], ends the
    /// stream.
    ///
    /// [`disconnect`]: Engine::disconnect
    ///
    /// # Errors
    ///
    /// Will return `Err` if the engine cannot be brought up at all.
    /// Failures the engine reports asynchronously arrive as events
    /// instead.
    async fn connect(&self, access_token: &str) -> Result<UnboundedReceiver<EngineEvent>>;

    /// Snapshot of the engine's current playback state.
    ///
    /// `None` when the engine has no device or playback is elsewhere.
    async fn current_state(&self) -> Option<State>;

    /// Tears the engine down and releases its device.
    async fn disconnect(&self);
}
