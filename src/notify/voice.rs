// src/notify/voice.rs
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::push::post_with_retry;
use super::{Channel, Notice};
use crate::alert::Alert;
use crate::config::VoiceSettings;

/// Text-to-speech announcements through an HTTP notify service. Spoken messages cannot
/// be taken back, so there is no retract.
#[derive(Clone)]
pub struct VoiceChannel {
    name: String,
    url: String,
    target: Option<String>,
    token: Option<String>,
    client: Client,
    timeout: Duration,
}

impl VoiceChannel {
    pub fn new(
        name: &str,
        url: &str,
        target: Option<String>,
        token: Option<String>,
        client: Client,
    ) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            target,
            token,
            client,
            timeout: Duration::from_secs(10),
        }
    }
}

pub fn tts_payload(message: &str, target: Option<&str>) -> Value {
    let mut body = json!({
        "message": message,
        "data": { "type": "tts" },
    });
    if let Some(t) = target {
        body["target"] = json!([t]);
    }
    body
}

#[async_trait]
impl Channel for VoiceChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notice: &Notice) -> Result<()> {
        let payload = tts_payload(&notice.body, self.target.as_deref());
        post_with_retry(
            &self.client,
            &self.url,
            self.token.as_deref(),
            &payload,
            self.timeout,
            1,
        )
        .await
        .map_err(|e| anyhow!("voice channel {}: {e}", self.name))
    }
}

/// Spoken announcement for an alert: the attention preamble, then the short headline.
/// Falls back to naming the event when the headline is empty.
pub fn narration(alert: &Alert) -> String {
    let preamble = "Attention!,,,Attention!,,,";
    let spoken = alert.spoken_text.trim();
    if spoken.is_empty() {
        format!(
            "{preamble}The National Weather Service has issued a {} for our area",
            alert.event
        )
    } else {
        format!("{preamble}{spoken}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Narrate,
    Tone,
}

/// Escalated announcement: narrate, pause, tone, pause, narrate, pause.
#[derive(Debug, Clone, PartialEq)]
pub struct CriticalSequence {
    pub first_pause: Duration,
    pub tone_pause: Duration,
    pub final_pause: Duration,
    pub tone_message: String,
}

impl CriticalSequence {
    pub fn from_settings(v: &VoiceSettings) -> Self {
        let [first_pause, tone_pause, final_pause] = v.pauses();
        Self {
            first_pause,
            tone_pause,
            final_pause,
            tone_message: v.tone_message.clone(),
        }
    }

    /// Same steps without waiting; used by tests and one-shot runs.
    pub fn immediate(mut self) -> Self {
        self.first_pause = Duration::ZERO;
        self.tone_pause = Duration::ZERO;
        self.final_pause = Duration::ZERO;
        self
    }

    pub fn steps(&self) -> [(Step, Duration); 3] {
        [
            (Step::Narrate, self.first_pause),
            (Step::Tone, self.tone_pause),
            (Step::Narrate, self.final_pause),
        ]
    }
}

impl Default for CriticalSequence {
    fn default() -> Self {
        Self::from_settings(&VoiceSettings::default())
    }
}
