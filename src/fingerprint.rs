use std::fmt;

use blake3::{Hash, Hasher};

/// Cache key for a track, derived from its (title, artist, album) triple.
///
/// Fields are lowercased before hashing, so casing differences map to the
/// same fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackFingerprint(Hash);

impl TrackFingerprint {
    pub fn new(title: &str, artist: &str, album: &str) -> Self {
        let mut hasher = Hasher::new();
        for field in [title, artist, album] {
            let normalized = field.to_lowercase();
            // Length prefix keeps ("ab", "c") apart from ("a", "bc").
            hasher.update(&(normalized.len() as u64).to_le_bytes());
            hasher.update(normalized.as_bytes());
        }
        Self(hasher.finalize())
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }
}

impl fmt::Display for TrackFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex()[..12])
    }
}
