#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io::Cursor,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::stream::BoxStream;
use image::{ImageFormat, Rgba, RgbaImage};
use now_playing_tray::{
    error::SourceError,
    source::{
        ArtworkStream, EventHub, MediaSource, PlaybackState, PlaybackStatus, SourceEvent,
        TrackMetadata, TransportCommand,
    },
};

pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([color[0], color[1], color[2], 255]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

#[derive(Clone)]
pub struct Script {
    pub init_error: Option<SourceError>,
    pub init_delay: Option<Duration>,
    pub player_id: Option<String>,
    pub status: PlaybackStatus,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub artwork: Option<Vec<u8>>,
    pub metadata_error: Option<SourceError>,
    pub lookup_error: bool,
    pub command_result: Result<bool, SourceError>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            init_error: None,
            init_delay: None,
            player_id: Some("Spotify.exe".to_owned()),
            status: PlaybackStatus::Playing,
            title: "A".to_owned(),
            artist: "B".to_owned(),
            album: "C".to_owned(),
            artwork: Some(png_bytes(16, 16, [200, 40, 10])),
            metadata_error: None,
            lookup_error: false,
            command_result: Ok(true),
        }
    }
}

/// In-memory media source whose answers are driven by a [`Script`].
#[derive(Default)]
pub struct ScriptedSource {
    pub script: Mutex<Script>,
    pub metadata_delays: Mutex<VecDeque<Duration>>,
    pub artwork_reads: Arc<AtomicUsize>,
    pub metadata_fetches: AtomicUsize,
    pub attach_calls: AtomicUsize,
    pub commands: Mutex<Vec<TransportCommand>>,
    pub events: EventHub,
}

impl ScriptedSource {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            ..Self::default()
        })
    }

    pub fn update(&self, edit: impl FnOnce(&mut Script)) {
        edit(&mut self.script.lock().unwrap());
    }

    pub fn emit(&self, event: SourceEvent) {
        self.events.emit(event);
    }

    pub fn delay_next_fetch(&self, delay: Duration) {
        self.metadata_delays.lock().unwrap().push_back(delay);
    }

    pub fn artwork_reads(&self) -> usize {
        self.artwork_reads.load(Ordering::SeqCst)
    }

    pub fn attach_calls(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }
}

struct CountingArtwork {
    bytes: Vec<u8>,
    reads: Arc<AtomicUsize>,
}

#[async_trait]
impl ArtworkStream for CountingArtwork {
    async fn read_all(&mut self) -> Result<Vec<u8>, SourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(std::mem::take(&mut self.bytes))
    }
}

#[async_trait]
impl MediaSource for ScriptedSource {
    async fn initialize(&self) -> Result<(), SourceError> {
        let script = self.script.lock().unwrap().clone();
        if let Some(delay) = script.init_delay {
            tokio::time::sleep(delay).await;
        }
        match script.init_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn attach_session(&self) -> Result<Option<String>, SourceError> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.lock().unwrap().player_id.clone())
    }

    fn current_playback_state(&self) -> PlaybackState {
        let script = self.script.lock().unwrap();
        match &script.player_id {
            Some(id) => PlaybackState::new(script.status, id.clone()),
            None => PlaybackState::NO_SESSION,
        }
    }

    fn active_player_id(&self) -> Result<Option<String>, SourceError> {
        let script = self.script.lock().unwrap();
        if script.lookup_error {
            return Err(SourceError::Lookup("scripted lookup failure".into()));
        }
        Ok(script.player_id.clone())
    }

    async fn fetch_metadata(&self) -> Result<TrackMetadata, SourceError> {
        self.metadata_fetches.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap().clone();
        let delay = self.metadata_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if script.player_id.is_none() {
            return Err(SourceError::NoActiveSession);
        }
        if let Some(err) = script.metadata_error {
            return Err(err);
        }

        Ok(TrackMetadata {
            title: script.title,
            artist: script.artist,
            album: script.album,
            artwork: script.artwork.map(|bytes| {
                Box::new(CountingArtwork {
                    bytes,
                    reads: Arc::clone(&self.artwork_reads),
                }) as Box<dyn ArtworkStream>
            }),
        })
    }

    async fn send_command(&self, command: TransportCommand) -> Result<bool, SourceError> {
        let script = self.script.lock().unwrap().clone();
        if script.player_id.is_none() {
            return Err(SourceError::NoActiveSession);
        }
        self.commands.lock().unwrap().push(command);
        script.command_result
    }

    fn changes(&self) -> BoxStream<'static, SourceEvent> {
        self.events.stream()
    }
}
