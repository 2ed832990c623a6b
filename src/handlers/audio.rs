//! Audio service copies: one AAC `.m4a` per `*_m.{mp3,wav}` master.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::execution::{CommandExecutor, CommandOutcome};
use crate::models::Job;
use crate::registry::{DispatchError, HandlerContext, JobHandler};

const DEFAULT_CHANNELS: u32 = 2;

pub struct Audio {
    job: Job,
}

impl Audio {
    pub fn create(job: Job, _ctx: HandlerContext) -> Box<dyn JobHandler> {
        Box::new(Self { job })
    }

    async fn transcode(&self) -> CommandOutcome {
        let Some(rstar_dir) = self.job.rstar_path() else {
            return CommandOutcome::failure("Audio: rstar_dir is required");
        };

        let mut commands = Vec::new();
        for id in &self.job.identifiers {
            let object_dir = rstar_dir.join("wip").join("se").join(id);
            let aux_dir = object_dir.join("aux");
            for master in masters(&object_dir.join("data")) {
                let channels = probe_channels(&master).await;
                debug!(id = %id, input = %master.display(), channels, "Audio master");
                commands.push(ffmpeg_command(&master, &aux_dir, channels));
            }
        }
        CommandExecutor::new().run(commands).await
    }
}

/// `*_m.mp3` and `*_m.wav` files in `data_dir`, sorted
fn masters(data_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(data_dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| {
                    path.file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.ends_with("_m.mp3") || name.ends_with("_m.wav"))
                })
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

async fn probe_channels(input: &Path) -> u32 {
    let outcome = CommandExecutor::new()
        .run([format!(
            "ffprobe -v error -select_streams a:0 -show_entries stream=channels -of csv=p=0 {}",
            input.display()
        )])
        .await;
    if !outcome.success {
        return DEFAULT_CHANNELS;
    }
    outcome
        .output
        .trim()
        .parse()
        .ok()
        .filter(|channels| *channels > 0)
        .unwrap_or(DEFAULT_CHANNELS)
}

fn channel_layout(channels: u32) -> Option<&'static str> {
    match channels {
        2 => Some("stereo"),
        6 => Some("5.1"),
        _ => None,
    }
}

fn ffmpeg_command(input: &Path, aux_dir: &Path, channels: u32) -> String {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    let base = stem.strip_suffix("_m").unwrap_or(stem);
    let output = aux_dir.join(format!("{base}_s.m4a"));

    let is_wav = input.extension().is_some_and(|ext| ext == "wav");
    let layout = match channel_layout(channels) {
        Some(layout) if is_wav => format!("-channel_layout {layout} "),
        _ => String::new(),
    };

    format!(
        "ffmpeg -y -nostats -loglevel warning {layout}-i {} -c:a libfdk_aac -b:a {}k -ac {channels} -ar 44.1k -movflags +faststart {}",
        input.display(),
        channels * 64,
        output.display()
    )
}

#[async_trait]
impl JobHandler for Audio {
    fn class_name(&self) -> &'static str {
        "Audio"
    }

    fn operations(&self) -> &'static [&'static str] {
        &["transcode"]
    }

    async fn call(&self, method: &str) -> Result<CommandOutcome, DispatchError> {
        match method {
            "transcode" => Ok(self.transcode().await),
            other => Err(DispatchError::unknown_operation(self.class_name(), other)),
        }
    }
}
