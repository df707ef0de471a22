//! Audible alert on a confirmed brand match.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::SentryError;

#[cfg(target_os = "macos")]
pub const DEFAULT_PLAYER: &str = "afplay";
#[cfg(not(target_os = "macos"))]
pub const DEFAULT_PLAYER: &str = "aplay";

/// Alert output capability.
pub trait AlarmSink: Send + Sync {
    /// Start the alert. Must not block until playback finishes.
    fn trigger(&self) -> Result<(), SentryError>;
}

/// Plays a fixed local WAV asset through an external command-line player.
#[derive(Clone, Debug)]
pub struct AudioFileAlarm {
    asset: PathBuf,
    player: String,
}

impl AudioFileAlarm {
    /// Validates that the asset is a readable WAV file before accepting it.
    pub fn new(asset: impl AsRef<Path>, player: impl Into<String>) -> Result<Self, SentryError> {
        let asset = asset.as_ref().to_path_buf();
        let reader = hound::WavReader::open(&asset).map_err(|e| {
            SentryError::Alarm(format!("cannot open alarm asset {}: {}", asset.display(), e))
        })?;
        let spec = reader.spec();
        log::debug!(
            "alarm asset {}: {} ch, {} Hz, {} samples",
            asset.display(),
            spec.channels,
            spec.sample_rate,
            reader.duration()
        );
        let player = player.into();
        if player.trim().is_empty() {
            return Err(SentryError::Alarm("alarm player command is empty".to_string()));
        }
        Ok(Self { asset, player })
    }

    pub fn asset(&self) -> &Path {
        &self.asset
    }
}

impl AlarmSink for AudioFileAlarm {
    fn trigger(&self) -> Result<(), SentryError> {
        Command::new(&self.player)
            .arg(&self.asset)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|mut child| {
                // reap without blocking the caller
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            })
            .map_err(|e| SentryError::Alarm(format!("failed to start {}: {}", self.player, e)))
    }
}

/// Alarm that only logs. Used when no audio asset is configured.
#[derive(Clone, Debug, Default)]
pub struct LogAlarm;

impl AlarmSink for LogAlarm {
    fn trigger(&self) -> Result<(), SentryError> {
        log::warn!("ALARM: target brand detected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..800 {
            writer.write_sample(((i % 40) as i16 - 20) * 500).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn accepts_valid_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alarm.wav");
        write_wav(&path);
        let alarm = AudioFileAlarm::new(&path, DEFAULT_PLAYER).unwrap();
        assert_eq!(alarm.asset(), path.as_path());
    }

    #[test]
    fn rejects_missing_or_invalid_asset() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.wav");
        assert!(matches!(
            AudioFileAlarm::new(&missing, DEFAULT_PLAYER),
            Err(SentryError::Alarm(_))
        ));

        let bogus = dir.path().join("bogus.wav");
        std::fs::write(&bogus, b"not a wav file").unwrap();
        assert!(AudioFileAlarm::new(&bogus, DEFAULT_PLAYER).is_err());
    }

    #[test]
    fn missing_player_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alarm.wav");
        write_wav(&path);
        let alarm = AudioFileAlarm::new(&path, "definitely-not-a-player-binary").unwrap();
        assert!(matches!(alarm.trigger(), Err(SentryError::Alarm(_))));
    }
}
