//! Windows System Media Transport Controls (SMTC) backend.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream::BoxStream;
use log::{debug, info, warn};
use windows::{
    core::Result as WinResult,
    Foundation::TypedEventHandler,
    Media::Control::{
        GlobalSystemMediaTransportControlsSession as Session,
        GlobalSystemMediaTransportControlsSessionManager as SessionManager,
        GlobalSystemMediaTransportControlsSessionPlaybackStatus as SmtcStatus,
    },
    Storage::Streams::{
        DataReader, IRandomAccessStreamReference, IRandomAccessStreamWithContentType,
        InputStreamOptions,
    },
    Win32::{
        Foundation::RPC_E_CHANGED_MODE,
        System::Com::{CoInitializeEx, COINIT_MULTITHREADED},
    },
};

use super::{
    ArtworkStream, EventHub, MediaSource, PlaybackState, PlaybackStatus, SourceEvent,
    TrackMetadata, TransportCommand,
};
use crate::error::SourceError;

const THUMBNAIL_CHUNK: u32 = 64 * 1024;

struct AttachedSession {
    session: Session,
    media_token: i64,
    playback_token: i64,
}

impl AttachedSession {
    fn detach(self) {
        if let Err(err) = self.session.RemoveMediaPropertiesChanged(self.media_token) {
            debug!("failed to remove media listener: {err:?}");
        }
        if let Err(err) = self.session.RemovePlaybackInfoChanged(self.playback_token) {
            debug!("failed to remove playback listener: {err:?}");
        }
    }
}

struct Registry {
    manager: SessionManager,
    session_changed_token: i64,
}

impl Registry {
    fn detach(self) {
        if let Err(err) = self
            .manager
            .RemoveCurrentSessionChanged(self.session_changed_token)
        {
            debug!("failed to remove session listener: {err:?}");
        }
    }
}

#[derive(Default)]
pub struct SmtcSource {
    registry: Mutex<Option<Registry>>,
    attached: Mutex<Option<AttachedSession>>,
    events: EventHub,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// WinRT calls need an apartment. Joining the MTA once is enough for every
/// runtime worker thread, and a thread already in an STA is left alone.
fn ensure_com_initialized() -> Result<(), SourceError> {
    let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
    if hr.is_ok() || hr == RPC_E_CHANGED_MODE {
        Ok(())
    } else {
        Err(SourceError::Unavailable(format!("COM init failed: {hr:?}")))
    }
}

fn map_status(status: SmtcStatus) -> PlaybackStatus {
    match status {
        SmtcStatus::Closed => PlaybackStatus::Closed,
        SmtcStatus::Opened => PlaybackStatus::Opened,
        SmtcStatus::Changing => PlaybackStatus::Changing,
        SmtcStatus::Stopped => PlaybackStatus::Stopped,
        SmtcStatus::Playing => PlaybackStatus::Playing,
        SmtcStatus::Paused => PlaybackStatus::Paused,
        _ => PlaybackStatus::Unknown,
    }
}

impl SmtcSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self) -> Option<Session> {
        lock(&self.attached).as_ref().map(|a| a.session.clone())
    }

    fn subscribe(&self, session: &Session) -> WinResult<AttachedSession> {
        let events = self.events.clone();
        let media_token =
            session.MediaPropertiesChanged(&TypedEventHandler::new(move |_, _| {
                events.emit(SourceEvent::MetadataChanged);
                Ok(())
            }))?;

        let events = self.events.clone();
        let playback_token = session.PlaybackInfoChanged(&TypedEventHandler::new(move |_, _| {
            events.emit(SourceEvent::PlaybackInfoChanged);
            Ok(())
        }))?;

        Ok(AttachedSession {
            session: session.clone(),
            media_token,
            playback_token,
        })
    }
}

#[async_trait]
impl MediaSource for SmtcSource {
    async fn initialize(&self) -> Result<(), SourceError> {
        ensure_com_initialized()?;

        let manager = SessionManager::RequestAsync()
            .map_err(|e| SourceError::Unavailable(format!("{e:?}")))?
            .await
            .map_err(|e| SourceError::Unavailable(format!("{e:?}")))?;

        let events = self.events.clone();
        let session_changed_token =
            manager.CurrentSessionChanged(&TypedEventHandler::new(move |_, _| {
                events.emit(SourceEvent::SessionReplaced);
                Ok(())
            }))?;

        let previous = lock(&self.registry).replace(Registry {
            manager,
            session_changed_token,
        });
        if let Some(previous) = previous {
            previous.detach();
        }

        info!("connected to the system media session manager");
        Ok(())
    }

    fn attach_session(&self) -> Result<Option<String>, SourceError> {
        let manager = lock(&self.registry)
            .as_ref()
            .map(|r| r.manager.clone())
            .ok_or_else(|| SourceError::Unavailable("session manager not initialized".into()))?;

        let mut attached = lock(&self.attached);
        if let Some(old) = attached.take() {
            old.detach();
        }

        // A null current session surfaces as an error from the projection.
        let Ok(session) = manager.GetCurrentSession() else {
            return Ok(None);
        };

        let player_id = session
            .SourceAppUserModelId()
            .map(|id| id.to_string_lossy())
            .ok();
        *attached = Some(self.subscribe(&session)?);
        Ok(player_id)
    }

    fn current_playback_state(&self) -> PlaybackState {
        let Some(session) = self.session() else {
            return PlaybackState::NO_SESSION;
        };

        let status = session
            .GetPlaybackInfo()
            .and_then(|info| info.PlaybackStatus())
            .map(map_status)
            .unwrap_or_else(|err| {
                warn!("failed to read playback info: {err:?}");
                PlaybackStatus::Unknown
            });

        PlaybackState {
            status,
            active_player_id: session
                .SourceAppUserModelId()
                .map(|id| id.to_string_lossy())
                .ok(),
        }
    }

    fn active_player_id(&self) -> Result<Option<String>, SourceError> {
        let Some(session) = self.session() else {
            return Ok(None);
        };
        let id = session
            .SourceAppUserModelId()
            .map_err(|e| SourceError::Lookup(format!("{e:?}")))?;
        Ok(Some(id.to_string_lossy()))
    }

    async fn fetch_metadata(&self) -> Result<TrackMetadata, SourceError> {
        let session = self.session().ok_or(SourceError::NoActiveSession)?;
        let props = session.TryGetMediaPropertiesAsync()?.await?;

        let artwork = props
            .Thumbnail()
            .ok()
            .map(|reference| Box::new(SmtcThumbnail { reference }) as Box<dyn ArtworkStream>);

        Ok(TrackMetadata {
            title: props.Title()?.to_string_lossy(),
            artist: props.Artist()?.to_string_lossy(),
            album: props.AlbumTitle()?.to_string_lossy(),
            artwork,
        })
    }

    async fn send_command(&self, command: TransportCommand) -> Result<bool, SourceError> {
        let session = self.session().ok_or(SourceError::NoActiveSession)?;
        let accepted = match command {
            TransportCommand::PlayPause => session.TryTogglePlayPauseAsync()?.await?,
            TransportCommand::Next => session.TrySkipNextAsync()?.await?,
            TransportCommand::Previous => session.TrySkipPreviousAsync()?.await?,
        };
        Ok(accepted)
    }

    fn changes(&self) -> BoxStream<'static, SourceEvent> {
        self.events.stream()
    }
}

impl Drop for SmtcSource {
    fn drop(&mut self) {
        if let Some(attached) = lock(&self.attached).take() {
            attached.detach();
        }
        if let Some(registry) = lock(&self.registry).take() {
            registry.detach();
        }
    }
}

/// Thumbnail reference that is only opened when read.
struct SmtcThumbnail {
    reference: IRandomAccessStreamReference,
}

#[async_trait]
impl ArtworkStream for SmtcThumbnail {
    async fn read_all(&mut self) -> Result<Vec<u8>, SourceError> {
        let stream: IRandomAccessStreamWithContentType = self.reference.OpenReadAsync()?.await?;
        let input_stream = stream.GetInputStreamAt(0)?;
        let reader = DataReader::CreateDataReader(&input_stream)?;
        reader.SetInputStreamOptions(InputStreamOptions::Partial)?;

        let mut buffer = Vec::new();
        loop {
            let loaded = reader.LoadAsync(THUMBNAIL_CHUNK)?.await?;
            if loaded == 0 {
                break;
            }
            let mut chunk = vec![0u8; loaded as usize];
            reader.ReadBytes(&mut chunk)?;
            buffer.extend_from_slice(&chunk);
            if loaded < THUMBNAIL_CHUNK {
                break;
            }
        }

        Ok(buffer)
    }
}
