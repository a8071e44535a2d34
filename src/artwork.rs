//! Decoded cover artwork and the bounded cache that keeps it around for
//! repeated tracks.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use image::RgbaImage;
use log::debug;

use crate::{error::ArtworkError, fingerprint::TrackFingerprint};

pub const DEFAULT_CACHE_CAPACITY: usize = 50;

/// Shared, immutable decoded cover. Clones are cheap and unaffected by
/// cache eviction.
pub type Artwork = Arc<RgbaImage>;

pub fn decode_artwork(bytes: &[u8]) -> Result<RgbaImage, ArtworkError> {
    if bytes.is_empty() {
        return Err(ArtworkError::Empty);
    }
    let image = image::load_from_memory(bytes)?;
    Ok(image.to_rgba8())
}

/// Decodes on the blocking pool so large covers don't stall the caller's
/// executor thread.
pub async fn decode_artwork_off_thread(bytes: Vec<u8>) -> Result<RgbaImage, ArtworkError> {
    tokio::task::spawn_blocking(move || decode_artwork(&bytes))
        .await
        .map_err(|e| ArtworkError::Join(e.to_string()))?
}

struct CacheInner {
    entries: HashMap<TrackFingerprint, Artwork>,
    order: VecDeque<TrackFingerprint>,
}

/// Fingerprint-keyed artwork store with FIFO eviction.
///
/// Eviction follows insertion order, not access order. Re-inserting an
/// existing fingerprint replaces the image but keeps its original position
/// in the eviction queue.
pub struct ArtworkCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl Default for ArtworkCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl ArtworkCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(CacheInner {
                entries: HashMap::with_capacity(capacity + 1),
                order: VecDeque::with_capacity(capacity + 1),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // A panic while holding the lock cannot leave the map and queue out
        // of step: every mutation below completes before the guard drops.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, fingerprint: &TrackFingerprint) -> bool {
        self.lock().entries.contains_key(fingerprint)
    }

    pub fn get(&self, fingerprint: &TrackFingerprint) -> Option<Artwork> {
        self.lock().entries.get(fingerprint).cloned()
    }

    /// Stores `image` under `fingerprint` and returns the handle that was
    /// stored. Evicts the oldest insertion once the capacity is exceeded.
    pub fn put(&self, fingerprint: TrackFingerprint, image: impl Into<Artwork>) -> Artwork {
        let image = image.into();
        let mut inner = self.lock();

        if inner
            .entries
            .insert(fingerprint, Arc::clone(&image))
            .is_none()
        {
            inner.order.push_back(fingerprint);
        }

        while inner.entries.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
            debug!("artwork cache evicted {oldest}");
        }

        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba};
    use std::io::Cursor;

    fn fp(n: usize) -> TrackFingerprint {
        TrackFingerprint::new(&format!("title {n}"), "artist", "album")
    }

    fn tiny(shade: u8) -> RgbaImage {
        RgbaImage::from_pixel(2, 2, Rgba([shade, shade, shade, 255]))
    }

    #[test]
    fn decode_fails_on_garbage_input() {
        let result = decode_artwork(&[0u8, 1u8, 2u8, 3u8]);
        assert!(matches!(result, Err(ArtworkError::Decode(_))));
    }

    #[test]
    fn decode_rejects_empty_stream() {
        assert!(matches!(decode_artwork(&[]), Err(ArtworkError::Empty)));
    }

    #[test]
    fn decode_reads_png() {
        let mut bytes = Vec::new();
        tiny(77)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        let decoded = decode_artwork(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (2, 2));
        assert_eq!(decoded.get_pixel(1, 1), &Rgba([77, 77, 77, 255]));
    }

    #[test]
    fn never_exceeds_capacity() {
        for capacity in [1, 3, 50] {
            let cache = ArtworkCache::new(capacity);
            for n in 0..capacity * 3 {
                cache.put(fp(n), tiny(n as u8));
                assert!(cache.len() <= capacity);
            }
            assert_eq!(cache.len(), capacity);
        }
    }

    #[test]
    fn evicts_oldest_insertion_first() {
        let cache = ArtworkCache::new(3);
        for n in 0..5 {
            cache.put(fp(n), tiny(n as u8));
        }
        assert!(!cache.contains(&fp(0)));
        assert!(!cache.contains(&fp(1)));
        for n in 2..5 {
            assert!(cache.contains(&fp(n)));
        }
    }

    #[test]
    fn reads_do_not_refresh_eviction_order() {
        let cache = ArtworkCache::new(2);
        cache.put(fp(0), tiny(0));
        cache.put(fp(1), tiny(1));
        assert!(cache.get(&fp(0)).is_some());
        cache.put(fp(2), tiny(2));
        assert!(!cache.contains(&fp(0)));
        assert!(cache.contains(&fp(1)));
    }

    #[test]
    fn overwrite_replaces_image_but_keeps_position() {
        let cache = ArtworkCache::new(2);
        cache.put(fp(0), tiny(0));
        cache.put(fp(1), tiny(1));
        cache.put(fp(0), tiny(200));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&fp(0)).unwrap().get_pixel(0, 0)[0], 200);

        cache.put(fp(2), tiny(2));
        assert!(!cache.contains(&fp(0)));
        assert!(cache.contains(&fp(1)));
        assert!(cache.contains(&fp(2)));
    }

    #[test]
    fn evicted_handles_stay_valid() {
        let cache = ArtworkCache::new(1);
        cache.put(fp(0), tiny(9));
        let held = cache.get(&fp(0)).unwrap();
        cache.put(fp(1), tiny(1));
        assert!(cache.get(&fp(0)).is_none());
        assert_eq!(held.get_pixel(0, 0), &Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let cache = ArtworkCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.put(fp(0), tiny(0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_puts_respect_capacity() {
        let cache = Arc::new(ArtworkCache::new(8));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for n in 0..100 {
                        cache.put(fp(t * 1000 + n), tiny(n as u8));
                        assert!(cache.len() <= 8);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 8);
    }
}
