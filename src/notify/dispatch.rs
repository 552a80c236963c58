// src/notify/dispatch.rs
//! Routes one source's new alerts to its channels and retracts cleared ones.
//!
//! Route order per alert: banner, critical voice, voice, critical push, push. Voice and
//! push routes need the event type listed for the route and the severity allowed by the
//! policy; non-critical routes also need the local time inside their window. Every
//! channel call is isolated: a failure is logged and counted, never propagated.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;

use super::voice::{narration, CriticalSequence, Step};
use super::{ChannelHandle, ChannelSet, Notice};
use crate::alert::Alert;
use crate::config::NotifyPolicy;
use crate::window::local_time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Banner,
    CriticalVoice,
    Voice,
    CriticalPush,
    Push,
    Retract,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Banner => "banner",
            Route::CriticalVoice => "critical_voice",
            Route::Voice => "voice",
            Route::CriticalPush => "critical_push",
            Route::Push => "push",
            Route::Retract => "retract",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub route: Route,
    pub channel: String,
    pub ok: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub deliveries: Vec<Delivery>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.deliveries.iter().filter(|d| d.ok).count()
    }

    pub fn failed(&self) -> usize {
        self.deliveries.iter().filter(|d| !d.ok).count()
    }

    pub fn routes(&self) -> Vec<Route> {
        let mut out: Vec<Route> = Vec::new();
        for d in &self.deliveries {
            if out.last() != Some(&d.route) {
                out.push(d.route);
            }
        }
        out
    }
}

pub struct Dispatcher {
    source_id: String,
    policy: NotifyPolicy,
    channels: ChannelSet,
    sequence: CriticalSequence,
}

impl Dispatcher {
    pub fn new(
        source_id: impl Into<String>,
        policy: NotifyPolicy,
        channels: ChannelSet,
        sequence: CriticalSequence,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            policy,
            channels,
            sequence,
        }
    }

    /// Deliver a new alert on every route it qualifies for.
    pub async fn dispatch(&self, alert: &Alert, now: DateTime<Utc>) -> DispatchReport {
        let mut report = DispatchReport::default();
        let p = &self.policy;
        let local = local_time(now, p.utc_offset_minutes);
        let severity_ok = alert.severity_allowed(&p.severities);

        // 1) banner
        if p.persistent_notifications {
            if let Some(banner) = &self.channels.banner {
                let notice = Notice {
                    title: alert.spoken_text.clone(),
                    body: alert.display_text.clone(),
                    tag: alert.id.clone(),
                    critical: false,
                };
                self.deliver(&mut report, Route::Banner, banner, &notice)
                    .await;
            }
        }

        if !severity_ok {
            tracing::debug!(source = %self.source_id, alert_id = %alert.id, severity = %alert.severity, "severity not in allow-list, skipping voice and push");
            return report;
        }

        let spoken = Notice {
            title: alert.event.clone(),
            body: narration(alert),
            tag: alert.id.clone(),
            critical: false,
        };

        // 2) critical voice
        if alert.event_in(&p.announce_critical_types) && !self.channels.critical_voice.is_empty()
        {
            self.run_critical_sequence(&mut report, &spoken).await;
        }

        // 3) voice
        if alert.event_in(&p.announce_types) && !self.channels.voice.is_empty() {
            if p.announce_window.contains(local) {
                for ch in &self.channels.voice {
                    self.deliver(&mut report, Route::Voice, ch, &spoken).await;
                }
            } else {
                tracing::debug!(source = %self.source_id, alert_id = %alert.id, %local, "outside announce window");
            }
        }

        let push = |critical| Notice {
            title: alert.event.clone(),
            body: alert.headline.clone(),
            tag: alert.id.clone(),
            critical,
        };

        // 4) critical push
        if alert.event_in(&p.send_critical_types) && !self.channels.critical_push.is_empty() {
            let notice = push(true);
            for ch in &self.channels.critical_push {
                self.deliver(&mut report, Route::CriticalPush, ch, &notice)
                    .await;
            }
        }

        // 5) push
        if alert.event_in(&p.send_types) && !self.channels.push.is_empty() {
            if p.send_window.contains(local) {
                let notice = push(false);
                for ch in &self.channels.push {
                    self.deliver(&mut report, Route::Push, ch, &notice).await;
                }
            } else {
                tracing::debug!(source = %self.source_id, alert_id = %alert.id, %local, "outside send window");
            }
        }

        report
    }

    /// Retract `tag` once from every retraction-capable channel a cleared alert may have
    /// reached.
    pub async fn retract(&self, tag: &str) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut seen = HashSet::new();
        for ch in self.retract_targets() {
            if !ch.supports_retract() || !seen.insert(ch.name().to_string()) {
                continue;
            }
            let ok = match ch.retract(tag).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(source = %self.source_id, channel = %ch.name(), tag, error = ?e, "retract failed");
                    false
                }
            };
            record(&mut report, Route::Retract, ch.name(), ok);
        }
        report
    }

    fn retract_targets(&self) -> Vec<&ChannelHandle> {
        let p = &self.policy;
        let mut out = Vec::new();
        if p.persistent_notifications {
            out.extend(self.channels.banner.iter());
        }
        if !p.send_critical_types.is_empty() {
            out.extend(self.channels.critical_push.iter());
        }
        if !p.send_types.is_empty() {
            out.extend(self.channels.push.iter());
        }
        out
    }

    async fn run_critical_sequence(&self, report: &mut DispatchReport, spoken: &Notice) {
        let tone = Notice {
            title: spoken.title.clone(),
            body: self.sequence.tone_message.clone(),
            tag: spoken.tag.clone(),
            critical: true,
        };
        let narrate = Notice {
            critical: true,
            ..spoken.clone()
        };
        for (step, pause) in self.sequence.steps() {
            let notice = match step {
                Step::Narrate => &narrate,
                Step::Tone => &tone,
            };
            for ch in &self.channels.critical_voice {
                self.deliver(report, Route::CriticalVoice, ch, notice).await;
            }
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
    }

    async fn deliver(
        &self,
        report: &mut DispatchReport,
        route: Route,
        ch: &ChannelHandle,
        notice: &Notice,
    ) {
        let ok = match ch.send(notice).await {
            Ok(()) => {
                tracing::info!(source = %self.source_id, channel = %ch.name(), %route, alert_id = %notice.tag, "notification sent");
                true
            }
            Err(e) => {
                tracing::warn!(source = %self.source_id, channel = %ch.name(), %route, alert_id = %notice.tag, error = ?e, "notification failed");
                false
            }
        };
        record(report, route, ch.name(), ok);
    }
}

fn record(report: &mut DispatchReport, route: Route, channel: &str, ok: bool) {
    let name = if ok {
        "nws_notifications_sent_total"
    } else {
        "nws_notifications_failed_total"
    };
    counter!(name, "channel" => channel.to_string(), "route" => route.as_str()).increment(1);
    report.deliveries.push(Delivery {
        route,
        channel: channel.to_string(),
        ok,
    });
}
