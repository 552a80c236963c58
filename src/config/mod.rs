// src/config/mod.rs
//! Service configuration: one TOML (or JSON) file with the feed, storage, tracker and voice
//! settings, the declared notification channels and the alert sources.
//!
//! Lookup order for `load_default`:
//! 1) `$NWS_ALERTS_CONFIG`
//! 2) `config/nws_alerts.toml`
//! 3) `config/nws_alerts.json`

pub mod source;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::feed::nws::{DEFAULT_ENDPOINT, DEFAULT_USER_AGENT};
use crate::window::{parse_clock, TimeWindow};

pub use source::{
    slugify, NotifyPolicy, Selector, SourceConfig, DEFAULT_INTERVAL_MINUTES,
    DEFAULT_TIMEOUT_SECONDS,
};

pub const ENV_CONFIG_PATH: &str = "NWS_ALERTS_CONFIG";
pub const DEFAULT_TOML_PATH: &str = "config/nws_alerts.toml";
pub const DEFAULT_JSON_PATH: &str = "config/nws_alerts.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {}: {err}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("parsing {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("NWS_ALERTS_CONFIG points to non-existent path {}", .0.display())]
    MissingEnvPath(PathBuf),
    #[error("source {0:?}: one of zone_id, gps_loc or tracker is required")]
    NoSelector(String),
    #[error("source {0:?}: only one of zone_id, gps_loc or tracker may be set")]
    MultipleSelectors(String),
    #[error("source {id:?}: invalid coordinates {value:?}")]
    BadCoordinates { id: String, value: String },
    #[error("source {id:?}: invalid {field} {value:?}, expected HH:MM[:SS]")]
    BadWindow {
        id: String,
        field: &'static str,
        value: String,
    },
    #[error("source {id:?}: {field} must be greater than zero")]
    ZeroDuration { id: String, field: &'static str },
    #[error("source needs an id or a name that yields a non-empty slug")]
    EmptyId,
    #[error("duplicate source id {0:?}")]
    DuplicateSource(String),
    #[error("duplicate channel name {0:?}")]
    DuplicateChannel(String),
    #[error("source {id:?}: unknown channel {channel:?}")]
    UnknownChannel { id: String, channel: String },
    #[error("source {id:?}: channel {channel:?} is a {kind} channel, {route} needs {expected}")]
    WrongChannelKind {
        id: String,
        channel: String,
        kind: &'static str,
        route: &'static str,
        expected: &'static str,
    },
    #[error("source {0:?} uses a device tracker but [tracker] is not configured")]
    TrackerNotConfigured(String),
    #[error("configuration version {0} is newer than this build understands")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            history_dir: default_history_dir(),
        }
    }
}

fn default_history_dir() -> PathBuf {
    PathBuf::from("state/alert_history")
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrackerSettings {
    pub base_url: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_token_env() -> String {
    "HA_TOKEN".to_string()
}

/// Pauses of the critical announcement and the tone payload played between narrations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VoiceSettings {
    #[serde(default = "default_first_pause")]
    pub first_pause_secs: u64,
    #[serde(default = "default_tone_pause")]
    pub tone_pause_secs: u64,
    #[serde(default = "default_first_pause")]
    pub final_pause_secs: u64,
    #[serde(default = "default_tone_message")]
    pub tone_message: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            first_pause_secs: default_first_pause(),
            tone_pause_secs: default_tone_pause(),
            final_pause_secs: default_first_pause(),
            tone_message: default_tone_message(),
        }
    }
}

impl VoiceSettings {
    pub fn pauses(&self) -> [Duration; 3] {
        [
            Duration::from_secs(self.first_pause_secs),
            Duration::from_secs(self.tone_pause_secs),
            Duration::from_secs(self.final_pause_secs),
        ]
    }
}

fn default_first_pause() -> u64 {
    15
}

fn default_tone_pause() -> u64 {
    25
}

fn default_tone_message() -> String {
    "<audio src='/local/mp3/nws_alert_tone.mp3'/>".to_string()
}

/// A notification channel declared once and referenced by name from source routes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: ChannelKind,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelKind {
    /// HTTP notify service (mobile push).
    Push {
        url: String,
        #[serde(default)]
        token_env: Option<String>,
    },
    /// HTTP text-to-speech notify service.
    Voice {
        url: String,
        #[serde(default)]
        token_env: Option<String>,
        #[serde(default)]
        target: Option<String>,
    },
    Email {
        smtp_host: String,
        #[serde(default)]
        smtp_port: Option<u16>,
        #[serde(default)]
        smtp_user_env: Option<String>,
        #[serde(default)]
        smtp_pass_env: Option<String>,
        from: String,
        to: Vec<String>,
    },
}

impl ChannelKind {
    pub fn label(&self) -> &'static str {
        match self {
            ChannelKind::Push { .. } => "push",
            ChannelKind::Voice { .. } => "voice",
            ChannelKind::Email { .. } => "email",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AppConfig {
    pub feed: FeedSettings,
    pub storage: StorageSettings,
    pub tracker: Option<TrackerSettings>,
    pub voice: VoiceSettings,
    pub channels: Vec<ChannelSpec>,
    pub sources: Vec<SourceConfig>,
}

impl AppConfig {
    pub fn channel(&self, name: &str) -> Option<&ChannelSpec> {
        self.channels.iter().find(|c| c.name == name)
    }
}

// ---- file shape ----

/// Newest `version` this build reads.
pub const CONFIG_VERSION: u32 = 2;

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    feed: FeedSettings,
    #[serde(default)]
    storage: StorageSettings,
    #[serde(default)]
    tracker: Option<TrackerSettings>,
    #[serde(default)]
    voice: VoiceSettings,
    #[serde(default, rename = "channel")]
    channels: Vec<ChannelSpec>,
    #[serde(default, rename = "source")]
    sources: Vec<RawSource>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    fn into_items(self) -> Vec<String> {
        let items = match self {
            StringOrList::One(s) => s.split(',').map(str::to_string).collect(),
            StringOrList::Many(v) => v,
        };
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSource {
    id: Option<String>,
    name: Option<String>,
    zone_id: Option<StringOrList>,
    gps_loc: Option<String>,
    tracker: Option<String>,
    /// Minutes.
    interval: Option<u64>,
    /// Seconds.
    timeout: Option<u64>,
    persistent_notifications: bool,
    announce_critical_types: Vec<String>,
    announce_critical_targets: Vec<String>,
    announce_types: Vec<String>,
    announce_targets: Vec<String>,
    announce_start: Option<String>,
    announce_end: Option<String>,
    send_critical_types: Vec<String>,
    send_critical_targets: Vec<String>,
    send_types: Vec<String>,
    send_targets: Vec<String>,
    send_start: Option<String>,
    send_end: Option<String>,
    severities: Vec<String>,
    utc_offset_minutes: Option<i32>,
}

/// Load configuration from an explicit path. `.json` is parsed as JSON, anything else as TOML.
pub fn load_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|err| ConfigError::Io {
        path: path.to_path_buf(),
        err,
    })?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, &ext).map_err(|e| match e {
        ConfigError::Parse { message, .. } => ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    })
}

/// Load configuration using the env var, then the default paths. With none present the
/// service starts with no sources.
pub fn load_default() -> Result<AppConfig, ConfigError> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        }
        return Err(ConfigError::MissingEnvPath(pb));
    }
    for candidate in [DEFAULT_TOML_PATH, DEFAULT_JSON_PATH] {
        let pb = PathBuf::from(candidate);
        if pb.exists() {
            return load_from(&pb);
        }
    }
    tracing::warn!("no configuration file found, starting without alert sources");
    Ok(AppConfig::default())
}

/// Parse and validate configuration text. `hint_ext` selects JSON for `"json"`.
pub fn parse_config(s: &str, hint_ext: &str) -> Result<AppConfig, ConfigError> {
    let raw: RawConfig = if hint_ext == "json" {
        serde_json::from_str(s).map_err(|e| parse_error(e.to_string()))?
    } else {
        toml::from_str(s).map_err(|e| parse_error(e.to_string()))?
    };
    validate(raw)
}

fn parse_error(message: String) -> ConfigError {
    ConfigError::Parse {
        path: PathBuf::new(),
        message,
    }
}

fn validate(raw: RawConfig) -> Result<AppConfig, ConfigError> {
    let mut channel_names = HashSet::new();
    for ch in &raw.channels {
        if !channel_names.insert(ch.name.as_str()) {
            return Err(ConfigError::DuplicateChannel(ch.name.clone()));
        }
    }

    // Version 1 files predate interval/timeout; their defaults apply to every version.
    if let Some(v) = raw.version.filter(|v| *v > CONFIG_VERSION) {
        return Err(ConfigError::UnsupportedVersion(v));
    }

    let mut sources = Vec::with_capacity(raw.sources.len());
    let mut ids = HashSet::new();
    for rs in raw.sources {
        let src = validate_source(rs)?;
        if !ids.insert(src.id.clone()) {
            return Err(ConfigError::DuplicateSource(src.id));
        }
        if matches!(src.selector, Selector::Tracker { .. }) && raw.tracker.is_none() {
            return Err(ConfigError::TrackerNotConfigured(src.id));
        }
        check_routes(&src, &raw.channels)?;
        sources.push(src);
    }

    Ok(AppConfig {
        feed: raw.feed,
        storage: raw.storage,
        tracker: raw.tracker,
        voice: raw.voice,
        channels: raw.channels,
        sources,
    })
}

fn validate_source(rs: RawSource) -> Result<SourceConfig, ConfigError> {
    let zones = rs.zone_id.map(StringOrList::into_items).filter(|z| !z.is_empty());
    let gps = rs
        .gps_loc
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let tracker = rs
        .tracker
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let label = rs
        .id
        .clone()
        .or_else(|| rs.name.clone())
        .unwrap_or_default();

    let selector = match (zones, gps, tracker) {
        (Some(zones), None, None) => Selector::Zones {
            zones: zones.into_iter().map(|z| z.to_ascii_uppercase()).collect(),
        },
        (None, Some(gps), None) => {
            let (lat, lon) = parse_coordinates(&gps).ok_or_else(|| ConfigError::BadCoordinates {
                id: label.clone(),
                value: gps.clone(),
            })?;
            Selector::Point { lat, lon }
        }
        (None, None, Some(entity_id)) => Selector::Tracker { entity_id },
        (None, None, None) => return Err(ConfigError::NoSelector(label)),
        _ => return Err(ConfigError::MultipleSelectors(label)),
    };

    let name = rs
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| selector.device_label());
    let id = slugify(rs.id.as_deref().unwrap_or(&name));
    if id.is_empty() {
        return Err(ConfigError::EmptyId);
    }

    let interval = rs.interval.unwrap_or(DEFAULT_INTERVAL_MINUTES);
    if interval == 0 {
        return Err(ConfigError::ZeroDuration {
            id,
            field: "interval",
        });
    }
    let timeout = rs.timeout.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
    if timeout == 0 {
        return Err(ConfigError::ZeroDuration {
            id,
            field: "timeout",
        });
    }

    let announce_window = window(&id, "announce", rs.announce_start, rs.announce_end)?;
    let send_window = window(&id, "send", rs.send_start, rs.send_end)?;

    Ok(SourceConfig {
        id,
        name,
        selector,
        interval: Duration::from_secs(interval * 60),
        timeout: Duration::from_secs(timeout),
        notify: NotifyPolicy {
            persistent_notifications: rs.persistent_notifications,
            announce_critical_types: rs.announce_critical_types,
            announce_critical_targets: rs.announce_critical_targets,
            announce_types: rs.announce_types,
            announce_targets: rs.announce_targets,
            announce_window,
            send_critical_types: rs.send_critical_types,
            send_critical_targets: rs.send_critical_targets,
            send_types: rs.send_types,
            send_targets: rs.send_targets,
            send_window,
            severities: rs.severities,
            utc_offset_minutes: rs.utc_offset_minutes,
        },
    })
}

fn window(
    id: &str,
    route: &'static str,
    start: Option<String>,
    end: Option<String>,
) -> Result<TimeWindow, ConfigError> {
    let defaults = TimeWindow::default();
    let (start_field, end_field) = match route {
        "announce" => ("announce_start", "announce_end"),
        _ => ("send_start", "send_end"),
    };
    let parse = |field: &'static str, value: Option<String>, fallback| match value {
        None => Ok(fallback),
        Some(v) => parse_clock(&v).ok_or(ConfigError::BadWindow {
            id: id.to_string(),
            field,
            value: v,
        }),
    };
    Ok(TimeWindow::new(
        parse(start_field, start, defaults.start)?,
        parse(end_field, end, defaults.end)?,
    ))
}

/// `"lat,lon"` with both values in range.
pub fn parse_coordinates(s: &str) -> Option<(f64, f64)> {
    let (lat, lon) = s.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lon: f64 = lon.trim().parse().ok()?;
    let ok = lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon);
    ok.then_some((lat, lon))
}

fn check_routes(src: &SourceConfig, channels: &[ChannelSpec]) -> Result<(), ConfigError> {
    let p = &src.notify;
    let routes: [(&'static str, &Vec<String>, bool); 4] = [
        ("announce_critical_targets", &p.announce_critical_targets, true),
        ("announce_targets", &p.announce_targets, true),
        ("send_critical_targets", &p.send_critical_targets, false),
        ("send_targets", &p.send_targets, false),
    ];
    for (route, targets, wants_voice) in routes {
        for name in targets {
            let spec = channels
                .iter()
                .find(|c| &c.name == name)
                .ok_or_else(|| ConfigError::UnknownChannel {
                    id: src.id.clone(),
                    channel: name.clone(),
                })?;
            let is_voice = matches!(spec.kind, ChannelKind::Voice { .. });
            if is_voice != wants_voice {
                return Err(ConfigError::WrongChannelKind {
                    id: src.id.clone(),
                    channel: name.clone(),
                    kind: spec.kind.label(),
                    route,
                    expected: if wants_voice {
                        "a voice channel"
                    } else {
                        "a push or email channel"
                    },
                });
            }
        }
    }
    Ok(())
}
