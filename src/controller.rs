//! The "now playing" state machine.
//!
//! [`MediaController`] listens to a [`MediaSource`], coalesces its change
//! notifications through a [`ChangeDebouncer`], re-queries the source,
//! resolves cover art through the [`ArtworkCache`] and publishes each new
//! [`NowPlayingSnapshot`] to subscribers as a [`MediaChanged`] event.
//!
//! Consumers subscribe with [`MediaController::subscribe`] and unsubscribe
//! by dropping the receiver. Events reach every subscriber in the order the
//! snapshots were applied, and nothing is published after
//! [`MediaController::shutdown`].

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, RwLock, Weak,
    },
    time::Duration,
};

use futures::stream::{BoxStream, StreamExt};
use image::RgbaImage;
use log::{debug, error, info, warn};
use tokio::{
    runtime::Handle,
    sync::{broadcast, watch, Mutex as AsyncMutex},
    task::JoinHandle,
};

use crate::{
    artwork::{decode_artwork_off_thread, Artwork, ArtworkCache, DEFAULT_CACHE_CAPACITY},
    color::AccentColors,
    debounce::{ChangeDebouncer, DEFAULT_QUIET_INTERVAL},
    error::{ArtworkError, SourceError},
    fingerprint::TrackFingerprint,
    source::{
        ArtworkStream, MediaSource, PlaybackState, PlaybackStatus, SourceEvent, TargetPlayer,
        TransportCommand,
    },
};

const EVENT_BUFFER: usize = 16;

/// Immutable point-in-time view of what the target player is playing.
#[derive(Clone, Debug, Default)]
pub struct NowPlayingSnapshot {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub cover: Option<Artwork>,
    pub accents: AccentColors,
    pub status: PlaybackStatus,
    pub is_playing: bool,
    pub player_id: Option<String>,
}

impl NowPlayingSnapshot {
    /// Nothing playing: empty strings, no cover, neutral accents.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.artist.is_empty()
            && self.album.is_empty()
            && self.cover.is_none()
    }
}

/// Published after every applied refresh.
#[derive(Clone, Debug)]
pub struct MediaChanged {
    /// Monotonic refresh number; later events always carry larger numbers.
    pub sequence: u64,
    pub snapshot: Arc<NowPlayingSnapshot>,
    /// Whether the target player owns the current session. Consumers use it
    /// to show or hide the tray icon.
    pub target_active: bool,
}

#[derive(Clone, Debug)]
pub struct ControllerOptions {
    pub target_player: TargetPlayer,
    pub debounce: Duration,
    pub cache_capacity: usize,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            target_player: TargetPlayer::default(),
            debounce: DEFAULT_QUIET_INTERVAL,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Outcome of one query round against the source.
struct Refresh {
    snapshot: NowPlayingSnapshot,
    target_active: bool,
}

impl Refresh {
    fn inactive() -> Self {
        Self {
            snapshot: NowPlayingSnapshot::empty(),
            target_active: false,
        }
    }
}

struct Applied {
    sequence: u64,
    snapshot: Arc<NowPlayingSnapshot>,
}

#[derive(Default)]
struct Background {
    debouncer: Option<ChangeDebouncer>,
    listener: Option<JoinHandle<()>>,
}

struct Inner {
    source: Arc<dyn MediaSource>,
    cache: ArtworkCache,
    target: RwLock<TargetPlayer>,
    debounce: Duration,
    events: broadcast::Sender<MediaChanged>,
    applied: Mutex<Applied>,
    next_sequence: AtomicU64,
    available: AtomicBool,
    /// Held across the whole of `initialize` so concurrent callers connect
    /// the source once.
    init_lock: AsyncMutex<()>,
    shutdown: watch::Sender<bool>,
    background: Mutex<Background>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MediaController {
    inner: Arc<Inner>,
}

impl MediaController {
    pub fn new(source: Arc<dyn MediaSource>, options: ControllerOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                source,
                cache: ArtworkCache::new(options.cache_capacity),
                target: RwLock::new(options.target_player),
                debounce: options.debounce,
                events,
                applied: Mutex::new(Applied {
                    sequence: 0,
                    snapshot: Arc::new(NowPlayingSnapshot::empty()),
                }),
                next_sequence: AtomicU64::new(0),
                available: AtomicBool::new(false),
                init_lock: AsyncMutex::new(()),
                shutdown,
                background: Mutex::new(Background::default()),
            }),
        }
    }

    /// Connects the source, attaches to the current session, starts
    /// listening for changes and publishes an initial snapshot.
    ///
    /// On failure the controller keeps working in a "no media" state: every
    /// snapshot is empty and commands are no-ops.
    pub async fn initialize(&self) -> Result<(), SourceError> {
        let inner = &self.inner;
        if inner.is_shut_down() {
            return Err(SourceError::Unavailable("controller was shut down".into()));
        }
        let _init = inner.init_lock.lock().await;
        if inner.available.load(Ordering::SeqCst) {
            return Ok(());
        }

        let runtime = Handle::try_current()
            .map_err(|e| SourceError::Unavailable(format!("no async runtime: {e}")))?;

        let mut shutdown = inner.shutdown.subscribe();
        let connected = tokio::select! {
            res = inner.source.initialize() => res,
            _ = shutdown.wait_for(|stopped| *stopped) => {
                Err(SourceError::Unavailable("shut down during initialization".into()))
            }
        };
        if let Err(err) = connected {
            error!("media source unavailable, running without media: {err}");
            return Err(err);
        }

        inner.available.store(true, Ordering::SeqCst);
        inner.attach_session();

        let weak = Arc::downgrade(inner);
        let debouncer = ChangeDebouncer::new(runtime.clone(), inner.debounce, move || {
            if let Some(inner) = weak.upgrade() {
                Inner::spawn_refresh(inner);
            }
        });

        let listener = runtime.spawn(listen(Arc::downgrade(inner), inner.source.changes()));

        {
            let mut background = lock(&inner.background);
            if inner.is_shut_down() {
                debouncer.dispose();
                listener.abort();
                return Err(SourceError::Unavailable(
                    "shut down during initialization".into(),
                ));
            }
            background.debouncer = Some(debouncer);
            background.listener = Some(listener);
        }

        inner.refresh_and_apply().await;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MediaChanged> {
        self.inner.events.subscribe()
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Whether the attached session belongs to the target player. Lookup
    /// failures count as "not active".
    pub fn is_target_active(&self) -> bool {
        if !self.is_available() {
            return false;
        }
        let target = self.inner.target();
        self.inner.source.is_target_player_active(&target)
    }

    pub fn target_player(&self) -> TargetPlayer {
        self.inner.target()
    }

    /// Switches the followed player and schedules a refresh.
    pub fn set_target_player(&self, target: TargetPlayer) {
        {
            let mut current = self
                .inner
                .target
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *current == target {
                return;
            }
            info!("now following '{}'", target.as_str());
            *current = target;
        }
        self.inner.request_refresh();
    }

    /// Cover of the last published snapshot.
    pub fn current_cover(&self) -> Option<Artwork> {
        lock(&self.inner.applied).snapshot.cover.clone()
    }

    pub fn current_snapshot(&self) -> Arc<NowPlayingSnapshot> {
        Arc::clone(&lock(&self.inner.applied).snapshot)
    }

    /// Queries the source and composes a snapshot without publishing it.
    /// Never fails: every error degrades to the empty value of the field it
    /// affects.
    pub async fn refresh_snapshot(&self) -> NowPlayingSnapshot {
        self.inner.compose().await.snapshot
    }

    /// Queries the source, publishes the result and returns whatever
    /// snapshot is current afterwards. A slower refresh that started earlier
    /// never overwrites a newer one.
    pub async fn refresh(&self) -> Arc<NowPlayingSnapshot> {
        self.inner.refresh_and_apply().await;
        self.current_snapshot()
    }

    pub fn cache(&self) -> &ArtworkCache {
        &self.inner.cache
    }

    pub async fn play_pause(&self) -> Result<bool, SourceError> {
        self.send(TransportCommand::PlayPause).await
    }

    pub async fn next(&self) -> Result<bool, SourceError> {
        self.send(TransportCommand::Next).await
    }

    pub async fn previous(&self) -> Result<bool, SourceError> {
        self.send(TransportCommand::Previous).await
    }

    async fn send(&self, command: TransportCommand) -> Result<bool, SourceError> {
        if !self.is_available() || self.inner.is_shut_down() {
            return Ok(false);
        }
        match self.inner.source.send_command(command).await {
            Ok(accepted) => {
                debug!("{command:?} accepted: {accepted}");
                Ok(accepted)
            }
            Err(SourceError::NoActiveSession) => Ok(false),
            Err(err) => {
                warn!("{command:?} failed: {err}");
                Err(err)
            }
        }
    }

    /// Stops the listener and the debounce timer and cancels in-flight
    /// refreshes. No [`MediaChanged`] is published once this returns.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shutdown.send_replace(true) {
            return;
        }
        let mut background = lock(&inner.background);
        if let Some(debouncer) = background.debouncer.take() {
            debouncer.dispose();
        }
        if let Some(listener) = background.listener.take() {
            listener.abort();
        }
        // Taking the apply lock waits out a publish that is already running.
        drop(lock(&inner.applied));
        debug!("media controller shut down");
    }
}

impl Drop for MediaController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn listen(weak: Weak<Inner>, mut changes: BoxStream<'static, SourceEvent>) {
    let mut shutdown = match weak.upgrade() {
        Some(inner) => inner.shutdown.subscribe(),
        None => return,
    };

    loop {
        let event = tokio::select! {
            event = changes.next() => event,
            _ = shutdown.wait_for(|stopped| *stopped) => break,
        };
        let Some(event) = event else {
            debug!("media source change stream ended");
            break;
        };
        let Some(inner) = weak.upgrade() else {
            break;
        };
        if event == SourceEvent::SessionReplaced {
            inner.attach_session();
        }
        inner.request_refresh();
    }
}

impl Inner {
    fn target(&self) -> TargetPlayer {
        self.target
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn attach_session(&self) {
        match self.source.attach_session() {
            Ok(Some(player)) => info!("attached to media session of '{player}'"),
            Ok(None) => info!("no media session to attach to"),
            Err(err) => warn!("failed to attach media session: {err}"),
        }
    }

    fn request_refresh(&self) {
        if let Some(debouncer) = lock(&self.background).debouncer.as_ref() {
            debouncer.notify();
        }
    }

    fn spawn_refresh(inner: Arc<Inner>) {
        if inner.is_shut_down() {
            return;
        }
        tokio::spawn(async move { inner.refresh_and_apply().await });
    }

    async fn refresh_and_apply(&self) {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return;
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::select! {
            refresh = self.compose() => self.apply(sequence, refresh),
            _ = shutdown.wait_for(|stopped| *stopped) => {
                debug!("refresh #{sequence} cancelled by shutdown");
            }
        }
    }

    fn apply(&self, sequence: u64, refresh: Refresh) {
        let mut applied = lock(&self.applied);
        if self.is_shut_down() {
            return;
        }
        if sequence <= applied.sequence {
            debug!(
                "dropping stale refresh #{sequence}, #{} already applied",
                applied.sequence
            );
            return;
        }

        let snapshot = Arc::new(refresh.snapshot);
        *applied = Applied {
            sequence,
            snapshot: Arc::clone(&snapshot),
        };

        // Sent under the lock so subscribers observe sequence order.
        let _ = self.events.send(MediaChanged {
            sequence,
            snapshot,
            target_active: refresh.target_active,
        });
    }

    async fn compose(&self) -> Refresh {
        if !self.available.load(Ordering::SeqCst) {
            return Refresh::inactive();
        }

        let playback: PlaybackState = self.source.current_playback_state();
        if !playback.has_session() {
            return Refresh::inactive();
        }
        let target = self.target();
        if !self.source.is_target_player_active(&target) {
            debug!(
                "session of {:?} is not '{}'",
                playback.active_player_id,
                target.as_str()
            );
            return Refresh::inactive();
        }

        let metadata = match self.source.fetch_metadata().await {
            Ok(metadata) => metadata,
            Err(SourceError::NoActiveSession) => return Refresh::inactive(),
            Err(err) => {
                warn!("failed to fetch media properties: {err}");
                return Refresh {
                    snapshot: NowPlayingSnapshot::empty(),
                    target_active: true,
                };
            }
        };

        let fingerprint = TrackFingerprint::new(&metadata.title, &metadata.artist, &metadata.album);
        let cacheable =
            !(metadata.title.is_empty() && metadata.artist.is_empty() && metadata.album.is_empty());
        let cover = self
            .resolve_cover(fingerprint, cacheable, metadata.artwork)
            .await;
        let accents = AccentColors::for_cover(cover.as_deref());

        Refresh {
            snapshot: NowPlayingSnapshot {
                title: metadata.title,
                artist: metadata.artist,
                album: metadata.album,
                cover,
                accents,
                status: playback.status,
                is_playing: playback.is_playing(),
                player_id: playback.active_player_id,
            },
            target_active: true,
        }
    }

    async fn resolve_cover(
        &self,
        fingerprint: TrackFingerprint,
        cacheable: bool,
        artwork: Option<Box<dyn ArtworkStream>>,
    ) -> Option<Artwork> {
        if cacheable {
            if let Some(hit) = self.cache.get(&fingerprint) {
                debug!("artwork cache hit for {fingerprint}");
                return Some(hit);
            }
        }

        let Some(mut artwork) = artwork else {
            debug!("no artwork for {fingerprint}");
            return None;
        };

        match load_artwork(artwork.as_mut()).await {
            Ok(image) if cacheable => {
                debug!("artwork cache miss for {fingerprint}, decoded and stored");
                Some(self.cache.put(fingerprint, image))
            }
            Ok(image) => Some(Arc::new(image)),
            Err(err) => {
                warn!("artwork for {fingerprint} unusable: {err}");
                None
            }
        }
    }
}

async fn load_artwork(artwork: &mut dyn ArtworkStream) -> Result<RgbaImage, ArtworkError> {
    let bytes = artwork.read_all().await?;
    decode_artwork_off_thread(bytes).await
}
