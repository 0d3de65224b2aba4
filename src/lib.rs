//! Core of a streaming music player client.
//!
//! The crate covers the session lifecycle from login to playback:
//!
//! * [`auth`] drives the OAuth authorization code flow with PKCE
//! * [`gateway`] performs authenticated Web API calls
//! * [`player`] runs the playback session over the vendor engine
//!
//! The `tonearm` binary wires these into a small terminal client.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod auth;
pub mod config;
pub mod engine;
pub mod events;
pub mod exchange;
pub mod gateway;
pub mod http;
pub mod pkce;
pub mod player;
pub mod protocol;
pub mod store;
