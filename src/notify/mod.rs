//! Notification channels and the per-source dispatcher that routes alerts to them.
//!
//! Channels are declared once (`[[channel]]`) and shared by every source that names them.
//! Banners are the exception: each source gets its own view of the shared `BannerBoard`.

pub mod banner;
pub mod dispatch;
pub mod email;
pub mod push;
pub mod voice;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::config::{ChannelKind, ChannelSpec};

pub use banner::{Banner, BannerBoard};
pub use dispatch::{DispatchReport, Dispatcher, Route};

/// One message as handed to a channel. `tag` is the alert id and identifies the
/// notification for later retraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub critical: bool,
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `retract` removes anything. Only such channels see cleared alerts.
    fn supports_retract(&self) -> bool {
        false
    }

    async fn send(&self, notice: &Notice) -> Result<()>;

    async fn retract(&self, _tag: &str) -> Result<()> {
        Ok(())
    }
}

pub type ChannelHandle = Arc<dyn Channel>;

/// Channel handles per route for one source.
#[derive(Clone, Default)]
pub struct ChannelSet {
    pub banner: Option<ChannelHandle>,
    pub critical_voice: Vec<ChannelHandle>,
    pub voice: Vec<ChannelHandle>,
    pub critical_push: Vec<ChannelHandle>,
    pub push: Vec<ChannelHandle>,
}

/// Every declared channel, by name.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, ChannelHandle>,
}

impl ChannelRegistry {
    /// Build adapters for every `[[channel]]`. Missing secrets and bad addresses fail here,
    /// not on the first alert.
    pub fn from_specs(specs: &[ChannelSpec]) -> Result<Self> {
        let client = reqwest::Client::new();
        let mut reg = Self::default();
        for spec in specs {
            let handle: ChannelHandle = match &spec.kind {
                ChannelKind::Push { url, token_env } => Arc::new(push::PushChannel::new(
                    &spec.name,
                    url,
                    read_secret(token_env.as_deref())?,
                    client.clone(),
                )),
                ChannelKind::Voice {
                    url,
                    token_env,
                    target,
                } => Arc::new(voice::VoiceChannel::new(
                    &spec.name,
                    url,
                    target.clone(),
                    read_secret(token_env.as_deref())?,
                    client.clone(),
                )),
                ChannelKind::Email {
                    smtp_host,
                    smtp_port,
                    smtp_user_env,
                    smtp_pass_env,
                    from,
                    to,
                } => {
                    let credentials = match (smtp_user_env, smtp_pass_env) {
                        (Some(u), Some(p)) => Some((
                            read_secret(Some(u))?.unwrap_or_default(),
                            read_secret(Some(p))?.unwrap_or_default(),
                        )),
                        _ => None,
                    };
                    Arc::new(
                        email::EmailChannel::new(
                            &spec.name,
                            smtp_host,
                            *smtp_port,
                            credentials,
                            from,
                            to,
                        )
                        .with_context(|| format!("channel {:?}", spec.name))?,
                    )
                }
            };
            reg.insert(handle);
        }
        Ok(reg)
    }

    pub fn insert(&mut self, channel: ChannelHandle) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    pub fn get(&self, name: &str) -> Option<ChannelHandle> {
        self.channels.get(name).cloned()
    }

    /// Handles for `names`, in order. Unknown names are skipped with a warning; config
    /// validation rejects them before this point.
    pub fn resolve(&self, names: &[String]) -> Vec<ChannelHandle> {
        names
            .iter()
            .filter_map(|n| {
                let found = self.get(n);
                if found.is_none() {
                    tracing::warn!(channel = %n, "unknown channel name");
                }
                found
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

fn read_secret(var: Option<&str>) -> Result<Option<String>> {
    match var {
        None => Ok(None),
        Some(name) => std::env::var(name)
            .map(Some)
            .with_context(|| format!("env var {name} is not set")),
    }
}
