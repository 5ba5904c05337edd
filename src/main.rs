use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

use village_guide_lib::commands;
use village_guide_lib::narration::models::LoadStatus;
use village_guide_lib::settings::NarrationSettings;

#[tokio::main]
async fn main() -> Result<()> {
    village_guide_lib::init_tracing();

    let mut args = std::env::args().skip(1);
    let Some(location) = args.next() else {
        eprintln!("usage: village-guide <location> [narration-dir]");
        std::process::exit(2);
    };
    let narration_dir = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("narrations"));

    let state = village_guide_lib::build_state(village_guide_lib::app_data_dir()?, narration_dir)?;
    if !NarrationSettings::get_settings_path(&state.app_dir).exists() {
        // Leave an editable settings file behind on first run
        if let Err(e) = commands::save_settings(&state) {
            tracing::warn!("[Settings] {}", e);
        }
    }

    let view = commands::load_narration(location, &state)
        .await
        .map_err(anyhow::Error::msg)?;
    if view.status == LoadStatus::Error {
        bail!(view.notice.unwrap_or_else(|| "narration failed to load".to_string()));
    }

    if let Some(text) = &view.text {
        println!("{}", text);
    }
    if let Some(notice) = &view.notice {
        println!("({})", notice);
    }
    if !view.audio_available {
        state.shutdown();
        return Ok(());
    }

    let frames = state.start_frame_loop();
    let view = commands::toggle_playback(&state).map_err(anyhow::Error::msg)?;
    if view.is_playing {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut poll = tokio::time::interval(Duration::from_millis(100));
        loop {
            tokio::select! {
                _ = &mut ctrl_c => break,
                _ = poll.tick() => {
                    let current = commands::get_narration_state(&state).map_err(anyhow::Error::msg)?;
                    if !current.is_playing {
                        break;
                    }
                }
            }
        }
    } else {
        println!("({})", view.notice.as_deref().unwrap_or("cannot play audio"));
    }

    frames.abort();
    state.shutdown();
    Ok(())
}
