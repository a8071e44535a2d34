//! Mirrors the system "now playing" media session of one chosen player into
//! a snapshot that tray and popup consumers can render: track text, decoded
//! cover art, accent colors sampled from the cover and transport controls.

pub mod artwork;
pub mod color;
pub mod config;
pub mod controller;
pub mod debounce;
pub mod error;
pub mod fingerprint;
pub mod source;
pub mod tooltip;

pub use crate::{
    artwork::{Artwork, ArtworkCache},
    color::{AccentColors, Rgb},
    config::Config,
    controller::{ControllerOptions, MediaChanged, MediaController, NowPlayingSnapshot},
    debounce::ChangeDebouncer,
    error::{ArtworkError, SourceError},
    fingerprint::TrackFingerprint,
    source::{MediaSource, TargetPlayer},
};
