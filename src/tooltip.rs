use crate::{config::TrayConfig, controller::NowPlayingSnapshot};

/// Tray tooltip for a snapshot: `"{title} - {artist}"`, shortened with an
/// ellipsis when it would not fit the tray's limit. Falls back to the app
/// name when either field is missing.
pub fn tooltip_text(snapshot: &NowPlayingSnapshot, tray: &TrayConfig) -> String {
    if snapshot.title.is_empty() || snapshot.artist.is_empty() {
        return tray.app_name.clone();
    }

    let text = format!("{} - {}", snapshot.title, snapshot.artist);
    if text.chars().count() <= tray.tooltip_max_len {
        return text;
    }

    let mut short: String = text.chars().take(tray.tooltip_truncate_len).collect();
    short.push_str("...");
    short
}
