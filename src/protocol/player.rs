//! Playback engine state payloads and transport command bodies.
//!
//! The playback engine reports its state as JSON snapshots; the
//! transport endpoints take small JSON command bodies. Both live here
//! so the session logic stays free of wire concerns.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{formats::Flexible, serde_as, DurationMilliSeconds};

use super::catalog::Track;

/// Playback state snapshot as the engine reports it.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct State {
    /// Whether playback is paused.
    pub paused: bool,

    /// Position within the current track.
    #[serde_as(as = "DurationMilliSeconds<u64, Flexible>")]
    #[serde(default)]
    pub position: Duration,

    /// The tracks around the playhead.
    pub track_window: TrackWindow,
}

/// Window of tracks centered on the playhead.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TrackWindow {
    pub current_track: Track,
}

/// Body of a transport `play` command.
///
/// Exactly one of `uris` and `context_uri` is set; the constructors
/// keep that invariant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlayBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uris: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_uri: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<Offset>,
}

/// Starting position within a playback context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Offset {
    pub position: u32,
}

impl PlayBody {
    /// Body for playing a single track.
    #[must_use]
    pub fn uri(track_uri: &str) -> Self {
        Self {
            uris: Some(vec![track_uri.to_owned()]),
            context_uri: None,
            offset: None,
        }
    }

    /// Body for playing a context, optionally starting at a track
    /// offset within it.
    #[must_use]
    pub fn context(context_uri: &str, offset: Option<u32>) -> Self {
        Self {
            uris: None,
            context_uri: Some(context_uri.to_owned()),
            offset: offset.map(|position| Offset { position }),
        }
    }
}
