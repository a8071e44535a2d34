//! Adapter over the platform's media-session registry.
//!
//! A [`MediaSource`] reports what the currently attached session is playing,
//! hands out a lazily readable artwork stream, forwards transport commands
//! and publishes a stream of [`SourceEvent`]s whenever something changes.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;

use crate::error::SourceError;

#[cfg(windows)]
pub mod smtc;
#[cfg(not(windows))]
pub mod unsupported;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PlaybackStatus {
    Closed,
    Opened,
    Changing,
    Stopped,
    Playing,
    Paused,
    #[default]
    Unknown,
}

impl PlaybackStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackStatus::Closed => "Closed",
            PlaybackStatus::Opened => "Opened",
            PlaybackStatus::Changing => "Changing",
            PlaybackStatus::Stopped => "Stopped",
            PlaybackStatus::Playing => "Playing",
            PlaybackStatus::Paused => "Paused",
            PlaybackStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronous view of the attached session.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    /// Identifier of the player that owns the session, `None` when no
    /// session is attached.
    pub active_player_id: Option<String>,
}

impl PlaybackState {
    /// Returned when no session is attached.
    pub const NO_SESSION: PlaybackState = PlaybackState {
        status: PlaybackStatus::Unknown,
        active_player_id: None,
    };

    pub fn new(status: PlaybackStatus, player_id: impl Into<String>) -> Self {
        Self {
            status,
            active_player_id: Some(player_id.into()),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn has_session(&self) -> bool {
        self.active_player_id.is_some()
    }
}

/// Opaque artwork byte source. Nothing is read until [`read_all`] is
/// awaited; decoding is up to the caller.
///
/// [`read_all`]: ArtworkStream::read_all
#[async_trait]
pub trait ArtworkStream: Send {
    async fn read_all(&mut self) -> Result<Vec<u8>, SourceError>;
}

/// Artwork that is already in memory.
#[derive(Debug, Clone)]
pub struct InMemoryArtwork(pub Vec<u8>);

#[async_trait]
impl ArtworkStream for InMemoryArtwork {
    async fn read_all(&mut self) -> Result<Vec<u8>, SourceError> {
        Ok(std::mem::take(&mut self.0))
    }
}

pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub artwork: Option<Box<dyn ArtworkStream>>,
}

impl fmt::Debug for TrackMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackMetadata")
            .field("title", &self.title)
            .field("artist", &self.artist)
            .field("album", &self.album)
            .field("has_artwork", &self.artwork.is_some())
            .finish()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SourceEvent {
    MetadataChanged,
    PlaybackInfoChanged,
    /// The platform switched to a different current session (or dropped it).
    SessionReplaced,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TransportCommand {
    PlayPause,
    Next,
    Previous,
}

/// The player a tray instance follows, matched as a case-insensitive
/// substring of the session's player identifier. An empty target follows
/// any player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetPlayer(String);

impl TargetPlayer {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, player_id: &str) -> bool {
        player_id.to_lowercase().contains(&self.0)
    }
}

impl Default for TargetPlayer {
    fn default() -> Self {
        Self::new("Spotify")
    }
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Connects to the platform registry and subscribes to session changes.
    async fn initialize(&self) -> Result<(), SourceError>;

    /// Re-binds to whatever session the platform currently reports, moving
    /// the change listeners from the old session to the new one. Returns the
    /// new session's player id.
    fn attach_session(&self) -> Result<Option<String>, SourceError>;

    /// [`PlaybackState::NO_SESSION`] when nothing is attached.
    fn current_playback_state(&self) -> PlaybackState;

    fn active_player_id(&self) -> Result<Option<String>, SourceError>;

    async fn fetch_metadata(&self) -> Result<TrackMetadata, SourceError>;

    /// Resolves to whether the player accepted the command.
    async fn send_command(&self, command: TransportCommand) -> Result<bool, SourceError>;

    /// Never-ending stream of change notifications; ends only when the
    /// source itself is dropped.
    fn changes(&self) -> BoxStream<'static, SourceEvent>;

    fn is_target_player_active(&self, target: &TargetPlayer) -> bool {
        match self.active_player_id() {
            Ok(Some(id)) => target.matches(&id),
            Ok(None) => false,
            Err(err) => {
                log::debug!("player lookup failed: {err}");
                false
            }
        }
    }
}

const EVENT_CAPACITY: usize = 64;

/// Fan-out point for [`SourceEvent`]s. Backends call [`emit`] from their
/// platform callbacks; every [`stream`] gets its own copy of each event.
///
/// [`emit`]: EventHub::emit
/// [`stream`]: EventHub::stream
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<SourceEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }
}

impl EventHub {
    pub fn emit(&self, event: SourceEvent) {
        // No listeners yet is fine; the event has nobody to inform.
        let _ = self.tx.send(event);
    }

    /// Subscribes immediately, so events emitted after this call are seen
    /// even if the stream is first polled later.
    pub fn stream(&self) -> BoxStream<'static, SourceEvent> {
        let rx = self.tx.subscribe();
        stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((event, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("event listener lagged, {skipped} events coalesced");
                    // A session switch may be among the skipped events.
                    // Re-attaching is harmless and its refresh covers the rest.
                    Some((SourceEvent::SessionReplaced, rx))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        })
        .boxed()
    }
}

/// The backend for the current platform.
#[cfg(windows)]
pub fn platform_source() -> Arc<dyn MediaSource> {
    Arc::new(smtc::SmtcSource::new())
}

/// The backend for the current platform.
#[cfg(not(windows))]
pub fn platform_source() -> Arc<dyn MediaSource> {
    Arc::new(unsupported::UnsupportedSource::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn target_matches_case_insensitive_substring() {
        let target = TargetPlayer::new("Spotify");
        assert!(target.matches("Spotify.exe"));
        assert!(target.matches("SpotifyAB.SpotifyMusic_zpdnekdrzrea0!Spotify"));
        assert!(target.matches("SPOTIFY"));
        assert!(!target.matches("Microsoft.ZuneMusic"));
        assert!(!target.matches(""));
    }

    #[test]
    fn empty_target_follows_any_player() {
        assert!(TargetPlayer::new("  ").matches("anything"));
    }

    #[test]
    fn no_session_sentinel_is_not_playing() {
        let state = PlaybackState::NO_SESSION;
        assert!(!state.is_playing());
        assert!(!state.has_session());
        assert!(PlaybackState::new(PlaybackStatus::Playing, "x").is_playing());
        assert!(!PlaybackState::new(PlaybackStatus::Paused, "x").is_playing());
    }

    #[tokio::test]
    async fn in_memory_artwork_yields_bytes_once() {
        let mut artwork = InMemoryArtwork(vec![1, 2, 3]);
        assert_eq!(artwork.read_all().await.unwrap(), vec![1, 2, 3]);
        assert!(artwork.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hub_stream_sees_events_emitted_before_first_poll() {
        let hub = EventHub::default();
        let mut events = hub.stream();
        hub.emit(SourceEvent::PlaybackInfoChanged);
        hub.emit(SourceEvent::SessionReplaced);
        assert_eq!(events.next().await, Some(SourceEvent::PlaybackInfoChanged));
        assert_eq!(events.next().await, Some(SourceEvent::SessionReplaced));
    }

    #[tokio::test]
    async fn lagged_stream_reports_session_replaced() {
        let hub = EventHub::default();
        let mut events = hub.stream();
        hub.emit(SourceEvent::SessionReplaced);
        for _ in 0..EVENT_CAPACITY + 6 {
            hub.emit(SourceEvent::PlaybackInfoChanged);
        }
        assert_eq!(events.next().await, Some(SourceEvent::SessionReplaced));
        assert_eq!(events.next().await, Some(SourceEvent::PlaybackInfoChanged));
    }

    #[tokio::test]
    async fn hub_stream_ends_when_hub_is_dropped() {
        let hub = EventHub::default();
        let mut events = hub.stream();
        drop(hub);
        assert_eq!(events.next().await, None);
    }
}
