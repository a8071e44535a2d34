use std::time::Duration;

use log::{debug, info, warn};
use now_playing_tray::{
    config::{Config, ConfigWatcher, TrayConfig},
    controller::{MediaChanged, MediaController},
    source::platform_source,
    tooltip::tooltip_text,
};
use tokio::sync::broadcast::error::RecvError;

const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(2);

fn init_logging(config: &Config) {
    let env = env_logger::Env::default().default_filter_or(config.logging.level.as_str());
    env_logger::Builder::from_env(env).init();
}

fn render(event: &MediaChanged, tray: &TrayConfig) {
    if !event.target_active {
        info!("target player not active, tray icon hidden");
        return;
    }

    let snapshot = &event.snapshot;
    let accents = &snapshot.accents;
    info!(
        "{} [{}] cover: {} accent {} edges {}/{}/{}/{}",
        tooltip_text(snapshot, tray),
        snapshot.status,
        snapshot
            .cover
            .as_ref()
            .map(|c| format!("{}x{}", c.width(), c.height()))
            .unwrap_or_else(|| "none".to_owned()),
        accents.median,
        accents.top,
        accents.right,
        accents.bottom,
        accents.left,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = Config::locate();
    let config = match &config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::default(),
    };
    init_logging(&config);
    match &config_path {
        Some(path) => info!("loaded config from {}", path.display()),
        None => info!("no config file found, using defaults"),
    }

    let controller = MediaController::new(platform_source(), config.controller_options());
    let mut events = controller.subscribe();

    if let Err(err) = controller.initialize().await {
        warn!("continuing without media: {err}");
    }

    let watcher = config_path.as_ref().and_then(|path| {
        ConfigWatcher::watch(path)
            .map_err(|err| warn!("config hot reload disabled: {err:#}"))
            .ok()
    });
    let mut config_tick = tokio::time::interval(CONFIG_POLL_INTERVAL);
    let mut tray = config.tray.clone();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => render(&event, &tray),
                Err(RecvError::Lagged(skipped)) => debug!("skipped {skipped} stale media events"),
                Err(RecvError::Closed) => break,
            },
            _ = config_tick.tick(), if watcher.is_some() => {
                if let Some(reloaded) = watcher.as_ref().and_then(ConfigWatcher::poll) {
                    info!("config changed, applying");
                    controller.set_target_player(reloaded.media.target());
                    tray = reloaded.tray;
                }
            }
        }
    }

    controller.shutdown();
    Ok(())
}
