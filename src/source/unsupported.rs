use async_trait::async_trait;
use futures::stream::BoxStream;

use super::{
    EventHub, MediaSource, PlaybackState, SourceEvent, TrackMetadata, TransportCommand,
};
use crate::error::SourceError;

/// Stand-in for platforms without a system media-session registry. It never
/// initializes, so the controller stays in its "no media" state.
#[derive(Default)]
pub struct UnsupportedSource {
    events: EventHub,
}

#[async_trait]
impl MediaSource for UnsupportedSource {
    async fn initialize(&self) -> Result<(), SourceError> {
        Err(SourceError::Unavailable(format!(
            "system media sessions are not supported on {}",
            std::env::consts::OS
        )))
    }

    fn attach_session(&self) -> Result<Option<String>, SourceError> {
        Ok(None)
    }

    fn current_playback_state(&self) -> PlaybackState {
        PlaybackState::NO_SESSION
    }

    fn active_player_id(&self) -> Result<Option<String>, SourceError> {
        Ok(None)
    }

    async fn fetch_metadata(&self) -> Result<TrackMetadata, SourceError> {
        Err(SourceError::NoActiveSession)
    }

    async fn send_command(&self, _command: TransportCommand) -> Result<bool, SourceError> {
        Err(SourceError::NoActiveSession)
    }

    fn changes(&self) -> BoxStream<'static, SourceEvent> {
        self.events.stream()
    }
}
