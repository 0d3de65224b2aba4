//! Events emitted during authentication and playback.
//!
//! This module defines the signals the library sends to its embedder over
//! an event channel. They replace the direct UI side effects of a
//! graphical client: instead of redirecting a view or toggling a control,
//! the session emits an event and the embedder decides what to show.
//!
//! # Example
//!
//! ```rust
//! use tonearm::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::LoginSucceeded => println!("Authenticated"),
//!         Event::LoggedOut => println!("Back to the entry view"),
//!         Event::TrackChanged => println!("New track playing"),
//!         _ => {}
//!     }
//! }
//! ```

/// Events that can be emitted by the authentication or playback session.
///
/// # Events
///
/// Authentication events:
/// * [`LoginSucceeded`](Self::LoginSucceeded) - Token exchange completed
/// * [`LoggedOut`](Self::LoggedOut) - Session cleared
///
/// Playback events:
/// * [`Connected`](Self::Connected) - Playback device registered
/// * [`Disconnected`](Self::Disconnected) - Playback device went offline
/// * [`Play`](Self::Play) - Playback starts
/// * [`Pause`](Self::Pause) - Playback pauses
/// * [`TrackChanged`](Self::TrackChanged) - Current track changes
/// * [`PlaybackDisabled`](Self::PlaybackDisabled) - Account tier forbids playback
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// A login attempt completed and the session holds a valid token.
    LoginSucceeded,

    /// The session was cleared, either by an explicit logout or because
    /// an authentication failure forced one.
    ///
    /// Emitted every time logout runs, even when the session was already
    /// anonymous, so the embedder can always return to its entry view.
    LoggedOut,

    /// The playback engine registered a device for this session.
    Connected,

    /// The registered playback device went offline.
    Disconnected,

    /// Playback has started.
    Play,

    /// Playback has paused.
    Pause,

    /// Current track has changed.
    TrackChanged,

    /// The engine reported that the account lacks the tier required for
    /// playback. Browsing keeps working; playback controls should be
    /// disabled for the rest of the session.
    PlaybackDisabled,
}
