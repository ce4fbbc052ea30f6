//! Configuration types for track-fetch

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::error::{Error, Result};
use crate::media::RECOGNIZED_EXTENSIONS;
use crate::types::TrackId;

/// Media storage locations
///
/// Groups settings related to where artifacts, intermediate files and the
/// pipeline activity log live. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding finished artifacts and the status ledger (default: "./music")
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,

    /// Directory for in-progress fetch/transcode files (default: "./music/.partial")
    ///
    /// Kept separate from `media_dir` so retention sweeps never see partial files.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Directory for the pipeline activity log (default: "./logs")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Extension of produced artifacts (default: "opus")
    #[serde(default = "default_artifact_extension")]
    pub artifact_extension: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_dir: default_media_dir(),
            temp_dir: default_temp_dir(),
            log_dir: default_log_dir(),
            artifact_extension: default_artifact_extension(),
        }
    }
}

impl StorageConfig {
    /// Path of the durable status ledger
    pub fn ledger_path(&self) -> PathBuf {
        self.media_dir.join(LEDGER_FILE_NAME)
    }

    /// Canonical artifact path for a track
    pub fn artifact_path(&self, id: TrackId) -> PathBuf {
        self.media_dir
            .join(format!("{}.{}", id, self.artifact_extension))
    }
}

/// File name of the status ledger inside the media directory
pub const LEDGER_FILE_NAME: &str = ".download-state.json";

/// External tool locations (yt-dlp, ffmpeg)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Local binary directory, prepended to PATH for spawned tools (default: "./bin")
    #[serde(default = "default_bin_dir")]
    pub bin_dir: PathBuf,

    /// Path to the yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub yt_dlp_path: Option<PathBuf>,

    /// Path to the ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Whether to search PATH for binaries not found in `bin_dir` (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            bin_dir: default_bin_dir(),
            yt_dlp_path: None,
            ffmpeg_path: None,
            search_path: true,
        }
    }
}

/// Transcode target format
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranscodeConfig {
    /// ffmpeg audio codec (default: "libopus")
    #[serde(default = "default_codec")]
    pub codec: String,

    /// ffmpeg output container (default: "ogg")
    #[serde(default = "default_container")]
    pub container: String,

    /// Output sample rate in Hz (default: 48000)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Output channel count (default: 2)
    #[serde(default = "default_channels")]
    pub channels: u8,

    /// Output bitrate as understood by ffmpeg (default: "128k")
    #[serde(default = "default_bitrate")]
    pub bitrate: String,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            codec: default_codec(),
            container: default_container(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            bitrate: default_bitrate(),
        }
    }
}

/// Download queue retry policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Retries after the first failure before a job is abandoned (default: 10)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay after a failed attempt (default: 5000 ms)
    #[serde(default = "default_retry_delay", with = "duration_millis_serde")]
    pub retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
        }
    }
}

/// Token bucket gating external work
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket capacity (default: 3)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Time to regain one token, also the acquire polling interval (default: 1000 ms)
    #[serde(default = "default_refill_interval", with = "duration_millis_serde")]
    pub refill_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            refill_interval: default_refill_interval(),
        }
    }
}

/// Retention sweep settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Run the periodic sweep (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Artifacts older than this are evicted (default: 7 days)
    #[serde(default = "default_max_age", with = "duration_serde")]
    pub max_age: Duration,

    /// Interval between periodic sweeps (default: 24 hours)
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age: default_max_age(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// Free-space monitoring settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskGuardConfig {
    /// Run the periodic probe (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sweep early when available/total drops below this fraction (default: 0.1)
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Interval between probes (default: 1 hour)
    #[serde(default = "default_check_interval", with = "duration_serde")]
    pub check_interval: Duration,
}

impl Default for DiskGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            check_interval: default_check_interval(),
        }
    }
}

/// Catalog record store location and schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordStoreConfig {
    /// SQLite database holding catalog records (default: "songs.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Table of records (default: "songs")
    #[serde(default = "default_table")]
    pub table: String,

    /// Integer primary key column (default: "id")
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Nullable source reference column (default: "youtube_url")
    #[serde(default = "default_source_column")]
    pub source_column: String,
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            table: default_table(),
            id_column: default_id_column(),
            source_column: default_source_column(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

/// Main configuration for the audio pipeline
///
/// Every section has working defaults, so `Config::default()` describes the
/// conventional layout: artifacts in `./music`, tools in `./bin`, logs in
/// `./logs`, records in `./songs.db`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Artifact, temp and log locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// External tool locations
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Transcode target format
    #[serde(default)]
    pub transcode: TranscodeConfig,

    /// Retry policy
    #[serde(default)]
    pub queue: QueueConfig,

    /// Token bucket
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retention sweeps
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Free-space monitoring
    #[serde(default)]
    pub disk_guard: DiskGuardConfig,

    /// Catalog record store
    #[serde(default)]
    pub records: RecordStoreConfig,

    /// REST API
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Reject values the pipeline cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_tokens == 0 {
            return Err(Error::config(
                "rate_limit.max_tokens",
                "bucket capacity must be at least 1",
            ));
        }
        if self.rate_limit.refill_interval.is_zero() {
            return Err(Error::config(
                "rate_limit.refill_interval",
                "refill interval must be non-zero",
            ));
        }
        if !(self.disk_guard.threshold > 0.0 && self.disk_guard.threshold <= 1.0) {
            return Err(Error::config(
                "disk_guard.threshold",
                format!(
                    "threshold must be in (0, 1], got {}",
                    self.disk_guard.threshold
                ),
            ));
        }
        if self.retention.sweep_interval.is_zero() {
            return Err(Error::config(
                "retention.sweep_interval",
                "sweep interval must be non-zero",
            ));
        }
        if self.disk_guard.check_interval.is_zero() {
            return Err(Error::config(
                "disk_guard.check_interval",
                "check interval must be non-zero",
            ));
        }
        let extension = &self.storage.artifact_extension;
        if !RECOGNIZED_EXTENSIONS
            .iter()
            .any(|known| extension.eq_ignore_ascii_case(known))
        {
            return Err(Error::config(
                "storage.artifact_extension",
                format!(
                    "artifact extension {extension:?} is not one of {}",
                    RECOGNIZED_EXTENSIONS.join(", ")
                ),
            ));
        }
        // Startup and per-job cleanup empty the temp directory
        let storage = &self.storage;
        if storage.media_dir.starts_with(&storage.temp_dir) {
            return Err(Error::config(
                "storage.temp_dir",
                format!(
                    "temp directory {} must not be or contain the media directory {}",
                    storage.temp_dir.display(),
                    storage.media_dir.display()
                ),
            ));
        }
        for (key, ident) in [
            ("records.table", &self.records.table),
            ("records.id_column", &self.records.id_column),
            ("records.source_column", &self.records.source_column),
        ] {
            if !is_sql_identifier(ident) {
                return Err(Error::config(
                    key,
                    format!("{ident:?} is not a plain SQL identifier"),
                ));
            }
        }
        Ok(())
    }
}

/// Identifiers are interpolated into record queries, so only `[A-Za-z_][A-Za-z0-9_]*` is allowed
fn is_sql_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// Default value functions
fn default_media_dir() -> PathBuf {
    PathBuf::from("music")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("music").join(".partial")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_artifact_extension() -> String {
    "opus".into()
}

fn default_bin_dir() -> PathBuf {
    PathBuf::from("bin")
}

fn default_true() -> bool {
    true
}

fn default_codec() -> String {
    "libopus".into()
}

fn default_container() -> String {
    "ogg".into()
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_channels() -> u8 {
    2
}

fn default_bitrate() -> String {
    "128k".into()
}

fn default_max_retries() -> u32 {
    10
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_tokens() -> u32 {
    3
}

fn default_refill_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_age() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_threshold() -> f64 {
    0.1
}

fn default_check_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("songs.db")
}

fn default_table() -> String {
    "songs".into()
}

fn default_id_column() -> String {
    "id".into()
}

fn default_source_column() -> String {
    "youtube_url".into()
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.queue.max_retries, 10);
        assert_eq!(config.queue.retry_delay, Duration::from_secs(5));
        assert_eq!(config.rate_limit.max_tokens, 3);
        assert_eq!(config.rate_limit.refill_interval, Duration::from_millis(1000));
        assert_eq!(config.retention.max_age, Duration::from_secs(604_800));
        assert_eq!(config.retention.sweep_interval, Duration::from_secs(86_400));
        assert_eq!(config.disk_guard.threshold, 0.1);
        assert_eq!(config.disk_guard.check_interval, Duration::from_secs(3_600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_json_deserializes_to_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.storage.media_dir, PathBuf::from("music"));
        assert_eq!(config.records.table, "songs");
        assert_eq!(config.transcode.sample_rate, 48_000);
    }

    #[test]
    fn durations_deserialize_in_their_units() {
        let config: Config = serde_json::from_str(
            r#"{
                "queue": { "retry_delay": 250 },
                "rate_limit": { "refill_interval": 50 },
                "retention": { "max_age": 60 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.queue.retry_delay, Duration::from_millis(250));
        assert_eq!(config.rate_limit.refill_interval, Duration::from_millis(50));
        assert_eq!(config.retention.max_age, Duration::from_secs(60));
    }

    #[test]
    fn artifact_and_ledger_paths_live_in_media_dir() {
        let storage = StorageConfig {
            media_dir: PathBuf::from("/srv/music"),
            ..Default::default()
        };
        assert_eq!(
            storage.artifact_path(TrackId(42)),
            PathBuf::from("/srv/music/42.opus")
        );
        assert_eq!(
            storage.ledger_path(),
            PathBuf::from("/srv/music/.download-state.json")
        );
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.disk_guard.threshold = 1.5;
        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("disk_guard.threshold"))
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_empty_bucket() {
        let mut config = Config::default();
        config.rate_limit.max_tokens = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_temp_dir_overlapping_media_dir() {
        let mut config = Config::default();
        config.storage.media_dir = PathBuf::from("/srv/music");

        config.storage.temp_dir = PathBuf::from("/srv/music");
        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("storage.temp_dir")),
            other => panic!("expected config error, got {other:?}"),
        }

        config.storage.temp_dir = PathBuf::from("/srv");
        assert!(config.validate().is_err());

        config.storage.temp_dir = PathBuf::from("/srv/music/.partial");
        assert!(config.validate().is_ok());

        config.storage.temp_dir = PathBuf::from("/tmp/track-fetch");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unrecognized_artifact_extension() {
        let mut config = Config::default();
        for extension in ["wma", "txt", "", "op/us"] {
            config.storage.artifact_extension = extension.into();
            match config.validate() {
                Err(Error::Config { key, .. }) => {
                    assert_eq!(key.as_deref(), Some("storage.artifact_extension"))
                }
                other => panic!("{extension:?}: expected config error, got {other:?}"),
            }
        }

        for extension in ["opus", "MP3", "flac", "ogg"] {
            config.storage.artifact_extension = extension.into();
            assert!(config.validate().is_ok(), "{extension:?} rejected");
        }
    }

    #[test]
    fn validate_rejects_injected_identifiers() {
        let mut config = Config::default();
        config.records.table = "songs; DROP TABLE songs".into();
        assert!(config.validate().is_err());

        config.records.table = "_songs2".into();
        assert!(config.validate().is_ok());
    }
}
