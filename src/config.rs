use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::alarm::DEFAULT_PLAYER;
use crate::detect::{ModelBackendKind, ModelSettings};
use crate::filter::{DetectionFilter, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_VEHICLE_CLASSES};
use crate::frame_loop::{LoopSettings, DEFAULT_REFRESH_HZ};
use crate::gate::{GateSettings, DEFAULT_COOLDOWN, DEFAULT_TARGET_BRAND};
use crate::ingest::SourceSettings;
use crate::mask::Point;
use crate::session::DEFAULT_JPEG_QUALITY;
use crate::verify::HttpVerifierConfig;

const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 30;
const DEFAULT_STROKE_WIDTH: f32 = 50.0;
const DEFAULT_ENDPOINT: &str = "http://localhost:8010/proxy/v2/mmg/detect";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ALARM_ASSET: &str = "alarm.wav";
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
struct SentryConfigFile {
    source: Option<SourceConfigFile>,
    display: Option<DisplayConfigFile>,
    model: Option<ModelConfigFile>,
    filter: Option<FilterConfigFile>,
    mask: Option<MaskConfigFile>,
    verification: Option<VerificationConfigFile>,
    alarm: Option<AlarmConfigFile>,
    refresh_hz: Option<u32>,
    status_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    max_consecutive_errors: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<ModelBackendKind>,
    path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct FilterConfigFile {
    confidence_threshold: Option<f32>,
    classes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct MaskConfigFile {
    stroke_width: Option<f32>,
    strokes: Option<Vec<Vec<[f32; 2]>>>,
}

#[derive(Debug, Deserialize, Default)]
struct VerificationConfigFile {
    endpoint: Option<String>,
    api_key: Option<String>,
    target_brand: Option<String>,
    cooldown_ms: Option<u64>,
    timeout_secs: Option<u64>,
    jpeg_quality: Option<u8>,
    debug_snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct AlarmConfigFile {
    asset: Option<PathBuf>,
    player: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SentryConfig {
    pub source: SourceSettings,
    pub max_consecutive_errors: u32,
    /// Size of the pointer surface the mask is painted on.
    pub display: (u32, u32),
    pub model: ModelSettings,
    pub filter: FilterSettings,
    pub mask: MaskSettings,
    pub verification: VerificationSettings,
    pub alarm: AlarmSettings,
    pub refresh_hz: u32,
    pub status_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterSettings {
    pub confidence_threshold: f32,
    pub classes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaskSettings {
    pub stroke_width: f32,
    /// Pre-painted polylines, in video pixels.
    pub strokes: Vec<Vec<Point>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub target_brand: String,
    pub cooldown: Duration,
    pub timeout: Duration,
    pub jpeg_quality: u8,
    pub debug_snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlarmSettings {
    pub asset: PathBuf,
    pub player: String,
}

impl SentryConfig {
    /// Load from `SENTRY_CONFIG` (if set), then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTRY_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SentryConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentryConfigFile) -> Self {
        let source_file = file.source.unwrap_or_default();
        let source_defaults = SourceSettings::default();
        let source = SourceSettings {
            url: source_file.url.unwrap_or(source_defaults.url),
            width: source_file.width.unwrap_or(source_defaults.width),
            height: source_file.height.unwrap_or(source_defaults.height),
            target_fps: source_file.target_fps.unwrap_or(source_defaults.target_fps),
        };
        let display_file = file.display.unwrap_or_default();
        let display = (
            display_file.width.unwrap_or(source.width),
            display_file.height.unwrap_or(source.height),
        );

        let model_file = file.model.unwrap_or_default();
        let model_defaults = ModelSettings::default();
        let model = ModelSettings {
            backend: model_file.backend.unwrap_or(model_defaults.backend),
            path: model_file.path,
            labels_path: model_file.labels_path,
            input_width: model_file.input_width.unwrap_or(model_defaults.input_width),
            input_height: model_file.input_height.unwrap_or(model_defaults.input_height),
        };

        let filter_file = file.filter.unwrap_or_default();
        let filter = FilterSettings {
            confidence_threshold: filter_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            classes: filter_file.classes.unwrap_or_else(|| {
                DEFAULT_VEHICLE_CLASSES.iter().map(|c| c.to_string()).collect()
            }),
        };

        let mask_file = file.mask.unwrap_or_default();
        let mask = MaskSettings {
            stroke_width: mask_file.stroke_width.unwrap_or(DEFAULT_STROKE_WIDTH),
            strokes: mask_file
                .strokes
                .unwrap_or_default()
                .into_iter()
                .map(|stroke| stroke.into_iter().map(Point::from).collect())
                .collect(),
        };

        let verification_file = file.verification.unwrap_or_default();
        let verification = VerificationSettings {
            endpoint: verification_file
                .endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            api_key: verification_file.api_key.filter(|k| !k.trim().is_empty()),
            target_brand: verification_file
                .target_brand
                .unwrap_or_else(|| DEFAULT_TARGET_BRAND.to_string()),
            cooldown: verification_file
                .cooldown_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_COOLDOWN),
            timeout: Duration::from_secs(
                verification_file
                    .timeout_secs
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            jpeg_quality: verification_file
                .jpeg_quality
                .unwrap_or(DEFAULT_JPEG_QUALITY),
            debug_snapshot_path: verification_file.debug_snapshot_path,
        };

        let alarm_file = file.alarm.unwrap_or_default();
        let alarm = AlarmSettings {
            asset: alarm_file
                .asset
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ALARM_ASSET)),
            player: alarm_file
                .player
                .unwrap_or_else(|| DEFAULT_PLAYER.to_string()),
        };

        Self {
            source,
            max_consecutive_errors: source_file
                .max_consecutive_errors
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_ERRORS),
            display,
            model,
            filter,
            mask,
            verification,
            alarm,
            refresh_hz: file.refresh_hz.unwrap_or(DEFAULT_REFRESH_HZ),
            status_interval: Duration::from_secs(
                file.status_interval_secs
                    .unwrap_or(DEFAULT_STATUS_INTERVAL_SECS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_value("SENTRY_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(backend) = env_value("SENTRY_MODEL_BACKEND") {
            self.model.backend = backend
                .parse()
                .map_err(|e| anyhow!("SENTRY_MODEL_BACKEND: {}", e))?;
        }
        if let Some(path) = env_value("SENTRY_MODEL_PATH") {
            self.model.path = Some(PathBuf::from(path));
        }
        if let Some(classes) = env_value("SENTRY_VEHICLE_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.filter.classes = parsed;
            }
        }
        if let Some(endpoint) = env_value("SENTRY_VERIFY_ENDPOINT") {
            self.verification.endpoint = endpoint;
        }
        if let Some(key) = env_value("SENTRY_API_KEY") {
            self.verification.api_key = Some(key);
        }
        if let Some(brand) = env_value("SENTRY_TARGET_BRAND") {
            self.verification.target_brand = brand;
        }
        if let Some(cooldown) = env_value("SENTRY_COOLDOWN_MS") {
            let millis: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("SENTRY_COOLDOWN_MS must be an integer number of milliseconds")
            })?;
            self.verification.cooldown = Duration::from_millis(millis);
        }
        if let Some(path) = env_value("SENTRY_DEBUG_SNAPSHOT") {
            self.verification.debug_snapshot_path = Some(PathBuf::from(path));
        }
        if let Some(asset) = env_value("SENTRY_ALARM_ASSET") {
            self.alarm.asset = PathBuf::from(asset);
        }
        if let Some(player) = env_value("SENTRY_ALARM_PLAYER") {
            self.alarm.player = player;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let threshold = self.filter.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "filter.confidence_threshold must be within [0, 1], got {}",
                threshold
            ));
        }
        self.filter.classes = self
            .filter
            .classes
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        if self.filter.classes.is_empty() {
            return Err(anyhow!("filter.classes must name at least one class"));
        }
        if !(self.mask.stroke_width.is_finite() && self.mask.stroke_width > 0.0) {
            return Err(anyhow!("mask.stroke_width must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source size must be greater than zero"));
        }
        if self.display.0 == 0 || self.display.1 == 0 {
            return Err(anyhow!("display size must be greater than zero"));
        }
        if self.refresh_hz == 0 {
            return Err(anyhow!("refresh_hz must be greater than zero"));
        }
        if self.max_consecutive_errors == 0 {
            return Err(anyhow!("source.max_consecutive_errors must be greater than zero"));
        }

        let endpoint = Url::parse(&self.verification.endpoint)
            .with_context(|| format!("invalid verification endpoint '{}'", self.verification.endpoint))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(anyhow!(
                "verification endpoint must be http(s), got '{}'",
                endpoint.scheme()
            ));
        }
        self.verification.target_brand = self.verification.target_brand.trim().to_string();
        if self.verification.target_brand.is_empty() {
            return Err(anyhow!("verification.target_brand must not be empty"));
        }
        if !(1..=100).contains(&self.verification.jpeg_quality) {
            return Err(anyhow!("verification.jpeg_quality must be within 1..=100"));
        }
        Ok(())
    }

    pub fn detection_filter(&self) -> DetectionFilter {
        DetectionFilter::new(self.filter.confidence_threshold, &self.filter.classes)
    }

    pub fn gate_settings(&self) -> GateSettings {
        GateSettings {
            cooldown: self.verification.cooldown,
            target_brand: self.verification.target_brand.clone(),
            debug_snapshot_path: self.verification.debug_snapshot_path.clone(),
        }
    }

    pub fn verifier_config(&self) -> HttpVerifierConfig {
        HttpVerifierConfig {
            endpoint: self.verification.endpoint.clone(),
            api_key: self.verification.api_key.clone(),
            timeout: self.verification.timeout,
        }
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            max_consecutive_errors: self.max_consecutive_errors,
            status_interval: self.status_interval,
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

fn read_config_file(path: &Path) -> Result<SentryConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<SentryConfig> {
        let mut cfg = SentryConfig::from_file(serde_json::from_str(json)?);
        cfg.validate()?;
        Ok(cfg)
    }

    #[test]
    fn defaults_match_documented_constants() {
        let cfg = parse("{}").unwrap();
        assert_eq!(cfg.source.url, "stub://driveway");
        assert_eq!(cfg.display, (640, 480));
        assert_eq!(cfg.filter.confidence_threshold, 0.66);
        assert_eq!(cfg.filter.classes, vec!["car", "vehicle"]);
        assert_eq!(cfg.mask.stroke_width, 50.0);
        assert_eq!(cfg.verification.cooldown, Duration::from_millis(2000));
        assert_eq!(cfg.verification.target_brand, "jaguar");
        assert_eq!(cfg.verification.endpoint, DEFAULT_ENDPOINT);
        assert!(cfg.verification.api_key.is_none());
        assert_eq!(cfg.refresh_hz, 60);
        assert_eq!(cfg.model.backend, ModelBackendKind::Scripted);
    }

    #[test]
    fn display_defaults_to_source_size() {
        let cfg = parse(r#"{"source":{"width":1280,"height":720},"display":{"width":640}}"#).unwrap();
        assert_eq!(cfg.display, (640, 720));
    }

    #[test]
    fn strokes_become_points() {
        let cfg = parse(r#"{"mask":{"strokes":[[[0,0],[10,5]],[[3,3]]]}}"#).unwrap();
        assert_eq!(cfg.mask.strokes.len(), 2);
        assert_eq!(cfg.mask.strokes[0][1], Point::new(10.0, 5.0));
    }

    #[test]
    fn rejects_invalid_values() {
        for json in [
            r#"{"filter":{"confidence_threshold":1.5}}"#,
            r#"{"filter":{"classes":[" "]}}"#,
            r#"{"mask":{"stroke_width":0}}"#,
            r#"{"verification":{"endpoint":"ftp://host/detect"}}"#,
            r#"{"verification":{"endpoint":"not a url"}}"#,
            r#"{"verification":{"target_brand":"  "}}"#,
            r#"{"verification":{"jpeg_quality":0}}"#,
            r#"{"refresh_hz":0}"#,
            r#"{"source":{"width":0}}"#,
        ] {
            assert!(parse(json).is_err(), "{json}");
        }
    }

    #[test]
    fn unknown_backend_is_rejected_at_parse() {
        assert!(serde_json::from_str::<SentryConfigFile>(r#"{"model":{"backend":"coco"}}"#).is_err());
    }
}
