use anyhow::Context;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::{
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver},
    time::Duration,
};

use crate::{
    artwork::DEFAULT_CACHE_CAPACITY,
    controller::ControllerOptions,
    debounce::DEFAULT_QUIET_INTERVAL,
    source::TargetPlayer,
};

const CONFIG_FILE_NAME: &str = "now_playing_tray.toml";

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub media: MediaConfig,
    pub artwork: ArtworkConfig,
    pub tray: TrayConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// First config file that exists: the working directory is searched
    /// before the executable's directory.
    pub fn locate() -> Option<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = env::current_dir() {
            candidates.push(current_dir.join("config.toml"));
            candidates.push(current_dir.join("config").join("config.toml"));
            candidates.push(current_dir.join("config").join(CONFIG_FILE_NAME));
        }

        if let Ok(exe) = env::current_exe() {
            if let Some(dir) = exe.parent() {
                candidates.push(dir.join("config.toml"));
                candidates.push(dir.join("config").join("config.toml"));
                candidates.push(dir.join("config").join(CONFIG_FILE_NAME));
            }
        }

        candidates.into_iter().find(|path| path.exists())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn parse(data: &str) -> anyhow::Result<Self> {
        let doc: ConfigDocument = toml::from_str(data)?;
        Ok(doc.into())
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            target_player: self.media.target(),
            debounce: self.media.debounce(),
            cache_capacity: self.artwork.cache_capacity(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub target_player: String,
    pub debounce_ms: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            target_player: "Spotify".to_owned(),
            debounce_ms: DEFAULT_QUIET_INTERVAL.as_millis() as u64,
        }
    }
}

impl MediaConfig {
    pub fn target(&self) -> TargetPlayer {
        TargetPlayer::new(&self.target_player)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.clamp(10, 5_000))
    }
}

#[derive(Debug, Clone)]
pub struct ArtworkConfig {
    pub cache_capacity: usize,
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl ArtworkConfig {
    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity.max(1)
    }
}

#[derive(Debug, Clone)]
pub struct TrayConfig {
    pub app_name: String,
    pub tooltip_max_len: usize,
    pub tooltip_truncate_len: usize,
}

impl Default for TrayConfig {
    fn default() -> Self {
        Self {
            app_name: "Spotify Tray".to_owned(),
            tooltip_max_len: 63,
            tooltip_truncate_len: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    media: MediaSection,
    #[serde(default)]
    artwork: ArtworkSection,
    #[serde(default)]
    tray: TraySection,
    #[serde(default)]
    logging: LoggingSection,
}

impl From<ConfigDocument> for Config {
    fn from(value: ConfigDocument) -> Self {
        let defaults = Config::default();

        let media = MediaConfig {
            target_player: value
                .media
                .target_player
                .unwrap_or(defaults.media.target_player),
            debounce_ms: value.media.debounce_ms.unwrap_or(defaults.media.debounce_ms),
        };

        let artwork = ArtworkConfig {
            cache_capacity: value
                .artwork
                .cache_capacity
                .unwrap_or(defaults.artwork.cache_capacity),
        };

        let tooltip_max_len = value
            .tray
            .tooltip_max_len
            .unwrap_or(defaults.tray.tooltip_max_len)
            .max(4);
        let tray = TrayConfig {
            app_name: value.tray.app_name.unwrap_or(defaults.tray.app_name),
            tooltip_max_len,
            tooltip_truncate_len: value
                .tray
                .tooltip_truncate_len
                .unwrap_or(defaults.tray.tooltip_truncate_len)
                .min(tooltip_max_len - 3),
        };

        let logging = LoggingConfig {
            level: value.logging.level.unwrap_or(defaults.logging.level),
        };

        Config {
            media,
            artwork,
            tray,
            logging,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct MediaSection {
    target_player: Option<String>,
    debounce_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ArtworkSection {
    cache_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct TraySection {
    app_name: Option<String>,
    tooltip_max_len: Option<usize>,
    tooltip_truncate_len: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingSection {
    level: Option<String>,
}

/// Reloads the config file when it changes on disk.
///
/// The parent directory is watched rather than the file itself because
/// editors often save by replacing the file.
pub struct ConfigWatcher {
    path: PathBuf,
    file_name: OsString,
    _watcher: RecommendedWatcher,
    changes_rx: Receiver<notify::Result<notify::Event>>,
}

impl ConfigWatcher {
    pub fn watch(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .with_context(|| format!("Config path has no file name: {}", path.display()))?;
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory: {}", dir.display()))?;

        Ok(Self {
            path,
            file_name,
            _watcher: watcher,
            changes_rx: rx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drains pending file events and returns the reloaded config if the
    /// watched file was touched and still parses.
    pub fn poll(&self) -> Option<Config> {
        let mut touched = false;
        while let Ok(event) = self.changes_rx.try_recv() {
            match event {
                Ok(evt) => touched |= touches_file(&evt, &self.file_name),
                Err(err) => log::warn!("config watcher error: {err}"),
            }
        }
        if !touched {
            return None;
        }

        match Config::load_from(&self.path) {
            Ok(config) => Some(config),
            Err(err) => {
                log::warn!("ignoring config change: {err:#}");
                None
            }
        }
    }
}

fn touches_file(event: &notify::Event, file_name: &OsString) -> bool {
    !event.kind.is_access()
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() -> anyhow::Result<()> {
        let cfg = Config::parse("")?;
        assert_eq!(cfg.media.target_player, "Spotify");
        assert_eq!(cfg.media.debounce(), Duration::from_millis(300));
        assert_eq!(cfg.artwork.cache_capacity(), 50);
        assert_eq!(cfg.tray.app_name, "Spotify Tray");
        assert_eq!(cfg.tray.tooltip_max_len, 63);
        assert_eq!(cfg.tray.tooltip_truncate_len, 60);
        assert_eq!(cfg.logging.level, "info");
        Ok(())
    }

    #[test]
    fn test_parse_config_toml() -> anyhow::Result<()> {
        let toml_str = r#"
[media]
target_player = "foobar2000"
debounce_ms = 150

[artwork]
cache_capacity = 8

[tray]
app_name = "Now Playing"
tooltip_max_len = 40
tooltip_truncate_len = 38

[logging]
level = "debug"
"#;

        let cfg = Config::parse(toml_str)?;
        assert!(cfg.media.target().matches("C:\\Program Files\\Foobar2000\\foobar2000.exe"));
        assert_eq!(cfg.media.debounce(), Duration::from_millis(150));
        assert_eq!(cfg.artwork.cache_capacity(), 8);
        assert_eq!(cfg.tray.app_name, "Now Playing");
        assert_eq!(cfg.tray.tooltip_max_len, 40);
        // The ellipsis must still fit under the maximum.
        assert_eq!(cfg.tray.tooltip_truncate_len, 37);
        assert_eq!(cfg.logging.level, "debug");

        let options = cfg.controller_options();
        assert_eq!(options.cache_capacity, 8);
        assert_eq!(options.debounce, Duration::from_millis(150));
        Ok(())
    }

    #[test]
    fn out_of_range_values_are_clamped() -> anyhow::Result<()> {
        let cfg = Config::parse(
            r#"
[media]
debounce_ms = 0
[artwork]
cache_capacity = 0
"#,
        )?;
        assert_eq!(cfg.media.debounce(), Duration::from_millis(10));
        assert_eq!(cfg.artwork.cache_capacity(), 1);
        Ok(())
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(Config::parse("[media\ntarget_player = ").is_err());
        assert!(Config::parse("[media]\ndebounce_ms = \"soon\"").is_err());
    }

    #[test]
    fn load_from_reads_file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "[media]\ntarget_player = \"VLC\"")?;
        let cfg = Config::load_from(file.path())?;
        assert_eq!(cfg.media.target_player, "VLC");
        Ok(())
    }

    #[test]
    fn load_from_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = Config::load_from(&missing).unwrap_err();
        assert!(format!("{err:#}").contains("nope.toml"));
    }

    #[test]
    fn watcher_ignores_unrelated_files() {
        let event = notify::Event::new(notify::EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(PathBuf::from("/tmp/other.toml"));
        assert!(!touches_file(&event, &OsString::from("config.toml")));

        let event = notify::Event::new(notify::EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(PathBuf::from("/tmp/config.toml"));
        assert!(touches_file(&event, &OsString::from("config.toml")));
    }

    #[test]
    fn watcher_starts_on_existing_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(&path, "")?;
        let watcher = ConfigWatcher::watch(&path)?;
        assert_eq!(watcher.path(), path.as_path());
        Ok(())
    }
}
