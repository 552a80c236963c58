// src/normalize.rs
//! Raw feed record → canonical [`Alert`].
//!
//! Pure functions, no I/O. Upstream text is often shouted in all caps and carries hard
//! line wraps, so every free-text field goes through [`clean_text`] before it reaches a
//! banner or a voice channel.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use metrics::counter;
use once_cell::sync::OnceCell;
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::alert::Alert;
use crate::feed::RawRecord;

/// Tokens that stay upper-case when shouted text is title-cased.
const KEEP_UPPER: &[&str] = &[
    "AM", "PM", "NWS", "UTC", "EDT", "EST", "CDT", "CST", "MDT", "MST", "PDT", "PST", "AKDT",
    "AKST", "HST", "HDT",
];

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("record has no upstream id")]
    MissingId,
    #[error("record {upstream_id} is malformed: {reason}")]
    Malformed { upstream_id: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct RawFeature {
    id: String,
    properties: RawProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProperties {
    event: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    instruction: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    certainty: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    area_desc: Option<String>,
    #[serde(default)]
    sent: Option<String>,
    #[serde(default)]
    onset: Option<String>,
    #[serde(default)]
    expires: Option<String>,
    #[serde(default)]
    ends: Option<String>,
    #[serde(default)]
    parameters: Option<HashMap<String, Value>>,
}

impl RawProperties {
    /// Short `NWSheadline` parameter when present, else the event name.
    fn short_headline(&self) -> String {
        self.parameters
            .as_ref()
            .and_then(|p| p.get("NWSheadline"))
            .and_then(|v| match v {
                Value::Array(items) => items.first().and_then(Value::as_str),
                Value::String(s) => Some(s.as_str()),
                _ => None,
            })
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.event.as_str())
            .to_string()
    }
}

/// Stable alert id: SHA-256 of the upstream identifier, first 16 bytes as a UUID.
pub fn stable_id(upstream_id: &str) -> String {
    let digest = Sha256::digest(upstream_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Uuid::from_bytes(bytes).to_string()
}

/// Normalize one feature. Requires a top-level `id` and `properties.event`.
pub fn normalize(raw: &RawRecord) -> Result<Alert, NormalizeError> {
    let upstream_id = raw
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(NormalizeError::MissingId)?
        .to_string();

    let feature: RawFeature =
        RawFeature::deserialize(raw).map_err(|e| NormalizeError::Malformed {
            upstream_id: upstream_id.clone(),
            reason: e.to_string(),
        })?;
    let props = feature.properties;

    let event = props.event.trim().to_string();
    if event.is_empty() {
        return Err(NormalizeError::Malformed {
            upstream_id,
            reason: "empty `properties.event`".into(),
        });
    }

    let headline = clean_text(&props.short_headline());
    let description = clean_text(props.description.as_deref().unwrap_or_default());
    let instruction = clean_text(props.instruction.as_deref().unwrap_or_default());
    let areas_affected = clean_text(props.area_desc.as_deref().unwrap_or_default());

    let status = field(&props.status);
    let message_type = field(&props.message_type);
    let severity = field(&props.severity);
    let certainty = field(&props.certainty);
    let expires_raw = field(&props.expires);

    let display_text = render_display_text(&DisplayFields {
        headline: &headline,
        status: &status,
        message_type: &message_type,
        severity: &severity,
        certainty: &certainty,
        expires: &expires_raw,
        description: &description,
        instruction: &instruction,
    });

    Ok(Alert {
        id: stable_id(&feature.id),
        url: feature.id,
        event,
        spoken_text: headline.clone(),
        headline,
        description,
        instruction,
        severity,
        certainty,
        status,
        message_type,
        areas_affected,
        sent: parse_ts(&props.sent),
        onset: parse_ts(&props.onset),
        expires: parse_ts(&props.expires),
        ends: parse_ts(&props.ends),
        display_text,
    })
}

/// Normalize a whole feed page. Malformed records are logged and skipped; order is kept.
pub fn normalize_batch(records: &[RawRecord]) -> Vec<Alert> {
    let mut out = Vec::with_capacity(records.len());
    for (index, raw) in records.iter().enumerate() {
        match normalize(raw) {
            Ok(alert) => out.push(alert),
            Err(e) => {
                tracing::warn!(index, error = %e, "skipping malformed alert record");
                counter!("nws_alerts_skipped_total").increment(1);
            }
        }
    }
    out
}

struct DisplayFields<'a> {
    headline: &'a str,
    status: &'a str,
    message_type: &'a str,
    severity: &'a str,
    certainty: &'a str,
    expires: &'a str,
    description: &'a str,
    instruction: &'a str,
}

// Label order is relied on by consumers that re-parse this block.
fn render_display_text(f: &DisplayFields<'_>) -> String {
    format!(
        "Headline: {}\nStatus: {}\nMessage Type: {}\nSeverity: {}\nCertainty: {}\nExpires: {}\nDescription: {}\nInstruction: {}",
        f.headline,
        f.status,
        f.message_type,
        f.severity,
        f.certainty,
        f.expires,
        f.description,
        f.instruction
    )
}

fn field(v: &Option<String>) -> String {
    v.as_deref().map(str::trim).unwrap_or_default().to_string()
}

fn parse_ts(v: &Option<String>) -> Option<DateTime<FixedOffset>> {
    v.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
}

/// Humanize upstream text: decode entities, drop stray quotes, title-case shouted text,
/// collapse runs of blank lines into one paragraph break.
pub fn clean_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s).to_string();

    let unquoted: String = decoded
        .replace(['\u{2018}', '\u{2019}'], "'")
        .chars()
        .filter(|c| !matches!(c, '"' | '\u{201C}' | '\u{201D}'))
        .collect();

    let cased = if is_shouting(&unquoted) {
        title_case(&unquoted)
    } else {
        unquoted
    };

    collapse_blank_lines(&cased)
}

/// Letters present and none of them lower-case.
pub fn is_shouting(s: &str) -> bool {
    s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_lowercase)
}

/// Title-case word by word. Letters after an apostrophe belong to the same word and stay
/// lower-case; `KEEP_UPPER` tokens and clock suffixes (`5PM`) are left alone.
pub fn title_case(s: &str) -> String {
    static RE_WORD: OnceCell<Regex> = OnceCell::new();
    let re = RE_WORD.get_or_init(|| Regex::new(r"(?u)[\w']+").expect("word regex"));
    re.replace_all(s, |caps: &Captures<'_>| case_word(&caps[0]))
        .into_owned()
}

fn case_word(word: &str) -> String {
    let upper = word.to_uppercase();
    if KEEP_UPPER.contains(&upper.as_str()) {
        return upper;
    }
    if let Some(digits) = upper
        .strip_suffix("AM")
        .or_else(|| upper.strip_suffix("PM"))
    {
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            return upper;
        }
    }

    let mut chars = word.chars();
    let mut out = String::with_capacity(word.len());
    if let Some(first) = chars.next() {
        out.extend(first.to_uppercase());
    }
    for c in chars {
        out.extend(c.to_lowercase());
    }
    out
}

fn collapse_blank_lines(s: &str) -> String {
    static RE_TRAILING_WS: OnceCell<Regex> = OnceCell::new();
    static RE_BLANK_RUNS: OnceCell<Regex> = OnceCell::new();
    let re_trailing = RE_TRAILING_WS
        .get_or_init(|| Regex::new(r"(?m)[ \t]+$").expect("trailing whitespace regex"));
    let re_blank =
        RE_BLANK_RUNS.get_or_init(|| Regex::new(r"\n(?:[ \t]*\n)+").expect("blank line regex"));

    let unix = s.replace("\r\n", "\n");
    let trimmed = re_trailing.replace_all(&unix, "");
    re_blank.replace_all(&trimmed, "\n\n").trim().to_string()
}
