//! Catalog and library response types.
//!
//! These map the provider's Web API responses for the endpoints this
//! client consumes: the user profile, saved tracks, playlists and
//! search. Fields the client does not use are left out; `serde`
//! ignores them on deserialization.
//!
//! # Pagination
//!
//! Listing endpoints return their items wrapped in a [`Page`]. The
//! `next` field holds an absolute URL that can be passed back to the
//! gateway unchanged to fetch the following page.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{formats::Flexible, serde_as, DurationMilliSeconds};
use url::Url;

/// The authenticated user's profile.
///
/// Serializable so the client can cache it next to the stored
/// credential and show it before the first API round-trip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Provider user ID.
    pub id: String,

    /// Display name; not every account has one.
    #[serde(default)]
    pub display_name: Option<String>,

    /// Email address; requires the `user-read-email` scope.
    #[serde(default)]
    pub email: Option<String>,

    /// Profile images in the sizes the provider offers.
    #[serde(default)]
    pub images: Vec<Image>,
}

/// An image in one of the provider's standard sizes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: Url,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,
}

/// One page of a listing endpoint.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Page<T> {
    /// The items on this page.
    pub items: Vec<T>,

    /// Total number of items across all pages.
    #[serde(default)]
    pub total: u64,

    #[serde(default)]
    pub limit: Option<u32>,

    #[serde(default)]
    pub offset: Option<u32>,

    /// Absolute URL of the next page, if there is one.
    #[serde(default)]
    pub next: Option<Url>,
}

/// A track from the user's library, wrapped with its save timestamp.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SavedTrack {
    /// When the user saved the track, as an ISO 8601 timestamp.
    #[serde(default)]
    pub added_at: String,

    pub track: Track,
}

/// A track as the catalog and the playback engine report it.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Track {
    /// Catalog ID; local files have none.
    #[serde(default)]
    pub id: Option<String>,

    /// Provider URI, e.g. `spotify:track:4iV5W9uYEdYUVa79Axb7Rh`.
    pub uri: String,

    pub name: String,

    #[serde(default)]
    pub artists: Vec<Artist>,

    #[serde(default)]
    pub album: Option<Album>,

    /// Track length.
    #[serde_as(as = "DurationMilliSeconds<u64, Flexible>")]
    #[serde(rename = "duration_ms", default)]
    pub duration: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Artist {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Album {
    pub name: String,

    /// Cover art, largest first.
    #[serde(default)]
    pub images: Vec<Image>,
}

/// A playlist summary as listings and search return it.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Playlist {
    pub id: String,

    /// Provider URI usable as a playback context.
    pub uri: String,

    pub name: String,

    #[serde(default)]
    pub images: Vec<Image>,

    #[serde(default)]
    pub tracks: Option<PlaylistTracksSummary>,
}

/// Track count summary embedded in playlist listings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PlaylistTracksSummary {
    #[serde(default)]
    pub total: u64,
}

/// An entry of a playlist's track listing.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PlaylistTrack {
    #[serde(default)]
    pub added_at: Option<String>,

    /// The track itself; `None` for entries the catalog no longer
    /// resolves.
    #[serde(default)]
    pub track: Option<Track>,
}

/// Result sets of a search, one page per requested type.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub tracks: Option<Page<Track>>,

    #[serde(default)]
    pub playlists: Option<Page<Playlist>>,
}
