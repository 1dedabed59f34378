//! Escalation configuration and campaign timeline derivation.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Escalation campaign tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Seconds until the audible escalation step.
    pub escalation_delay_s: u64,
    /// Seconds until auto-calling and maximum-priority broadcast.
    pub auto_call_delay_s: u64,
    /// Seconds between reminder re-announcements.
    pub repeat_interval_s: u64,
    /// Seconds after which an unacknowledged campaign is finalized.
    pub ceiling_s: u64,
    /// Whether the auto-call step runs at all. Some deployments must not
    /// dial anyone automatically.
    pub auto_call_enabled: bool,
    /// Directories that receive emergency breadcrumb files at the
    /// auto-call step.
    pub breadcrumb_dirs: Vec<PathBuf>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            escalation_delay_s: 15,
            auto_call_delay_s: 30,
            repeat_interval_s: 60,
            ceiling_s: 300,
            auto_call_enabled: true,
            breadcrumb_dirs: Vec::new(),
        }
    }
}

/// One action in a campaign timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignStep {
    /// Audible alerting plus an escalated re-dispatch.
    Escalate,
    /// Direct calling, maximum-priority broadcast, breadcrumbs.
    AutoCall,
    /// Reduced-intensity periodic re-announcement.
    Remind,
    /// Give up waiting and close the campaign.
    Finalize,
}

/// A step and its deadline relative to campaign start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledStep {
    pub at: Duration,
    pub step: CampaignStep,
}

impl EscalationConfig {
    /// Derive the full per-alert timeline from the configured delays.
    ///
    /// Steps are strictly ordered and each appears at most once per
    /// deadline; reminders start after the last distinct escalation step
    /// and stop before the ceiling. The final entry is always `Finalize`
    /// at the ceiling.
    pub fn timeline(&self) -> Vec<ScheduledStep> {
        let ceiling = Duration::from_secs(self.ceiling_s);
        let mut steps = Vec::new();

        let escalate_at = Duration::from_secs(self.escalation_delay_s);
        if escalate_at < ceiling {
            steps.push(ScheduledStep {
                at: escalate_at,
                step: CampaignStep::Escalate,
            });
        }

        let mut reminder_floor = escalate_at;
        if self.auto_call_enabled {
            let call_at = Duration::from_secs(self.auto_call_delay_s);
            if call_at < ceiling {
                steps.push(ScheduledStep {
                    at: call_at,
                    step: CampaignStep::AutoCall,
                });
            }
            reminder_floor = reminder_floor.max(call_at);
        }

        if self.repeat_interval_s > 0 {
            let interval = Duration::from_secs(self.repeat_interval_s);
            let mut at = interval;
            while at < ceiling {
                if at > reminder_floor {
                    steps.push(ScheduledStep {
                        at,
                        step: CampaignStep::Remind,
                    });
                }
                at += interval;
            }
        }

        steps.push(ScheduledStep {
            at: ceiling,
            step: CampaignStep::Finalize,
        });
        steps.sort_by_key(|s| s.at);
        steps
    }
}
