//! Built-in dispatch channels.
//!
//! Three concrete channels cover the offline-first baseline: a console
//! banner that always works, an HTTP webhook for anything networked
//! (chat bridges, SMS gateways, call triggers), and an external command
//! for local sirens, speech synthesis, or site-specific scripts. Real
//! deployments add their own behind [`AlertChannel`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::alert::{Alert, DispatchSeverity};
use crate::dispatch::{render_message, AlertChannel, ChannelClass, ChannelError, ChannelResult};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Prints the alert to stdout. The channel of last resort: it cannot
/// fail and works with no network, which keeps acknowledgment possible
/// even when every real channel is down.
pub struct ConsoleChannel {
    class: ChannelClass,
}

impl ConsoleChannel {
    pub fn new(class: ChannelClass) -> Self {
        Self { class }
    }
}

#[async_trait]
impl AlertChannel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    fn class(&self) -> ChannelClass {
        self.class
    }

    async fn deliver(&self, alert: &Alert, severity: DispatchSeverity) -> ChannelResult<()> {
        println!("{}", render_message(alert, severity));
        Ok(())
    }
}

/// Webhook channel configuration, one entry per endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookChannelConfig {
    pub name: String,
    pub url: String,
    pub class: ChannelClass,
}

/// POSTs the alert as JSON to a configured endpoint.
pub struct WebhookChannel {
    name: String,
    url: String,
    class: ChannelClass,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookChannelConfig) -> Self {
        Self {
            name: config.name,
            url: config.url,
            class: config.class,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> ChannelClass {
        self.class
    }

    async fn deliver(&self, alert: &Alert, severity: DispatchSeverity) -> ChannelResult<()> {
        let payload = serde_json::json!({
            "alert_id": alert.id,
            "kind": alert.kind,
            "severity": severity,
            "headline": severity.headline(),
            "message": alert.message,
            "location": alert.location,
            "location_text": alert.location_text(),
            "created_at": alert.created_at.to_rfc3339(),
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .timeout(DELIVERY_TIMEOUT)
            .send()
            .await
            .map_err(|e| ChannelError::Unreachable(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::Rejected(format!(
                "endpoint returned {}",
                response.status()
            )))
        }
    }
}

/// Command channel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandChannelConfig {
    pub name: String,
    /// Program plus fixed arguments as one line, split without a shell.
    pub command: String,
    pub class: ChannelClass,
}

/// Runs a local program with the rendered message appended as the last
/// argument. No shell is involved: the configured line is split into
/// argv and executed directly, so alert text can never inject commands.
pub struct CommandChannel {
    name: String,
    command: String,
    class: ChannelClass,
}

impl CommandChannel {
    pub fn new(config: CommandChannelConfig) -> Self {
        Self {
            name: config.name,
            command: config.command,
            class: config.class,
        }
    }
}

#[async_trait]
impl AlertChannel for CommandChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> ChannelClass {
        self.class
    }

    async fn deliver(&self, alert: &Alert, severity: DispatchSeverity) -> ChannelResult<()> {
        let argv = shlex::split(&self.command)
            .ok_or_else(|| ChannelError::Rejected("unparseable command line".into()))?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ChannelError::Rejected("empty command line".into()))?;

        let run = tokio::process::Command::new(program)
            .args(args)
            .arg(render_message(alert, severity))
            .env("VIGIL_ALERT_ID", alert.id.to_string())
            .env("VIGIL_SEVERITY", severity.to_string())
            .output();

        let output = tokio::time::timeout(DELIVERY_TIMEOUT, run)
            .await
            .map_err(|_| ChannelError::Unreachable("command timed out".into()))?
            .map_err(|e| ChannelError::Unreachable(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ChannelError::CommandFailed(format!(
                "exit {:?}: {}",
                output.status.code(),
                stderr.trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertKind;

    fn alert() -> Alert {
        Alert::new(AlertKind::Manual, "help")
    }

    #[tokio::test]
    async fn test_console_channel_always_delivers() {
        let channel = ConsoleChannel::new(ChannelClass::Messaging);
        assert!(channel
            .deliver(&alert(), DispatchSeverity::Initial)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_command_channel_runs_program() {
        let channel = CommandChannel::new(CommandChannelConfig {
            name: "echo".into(),
            command: "echo -n".into(),
            class: ChannelClass::Audible,
        });
        assert!(channel
            .deliver(&alert(), DispatchSeverity::Escalated)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_command_channel_reports_nonzero_exit() {
        let channel = CommandChannel::new(CommandChannelConfig {
            name: "false".into(),
            command: "false".into(),
            class: ChannelClass::Audible,
        });
        assert!(matches!(
            channel.deliver(&alert(), DispatchSeverity::Initial).await,
            Err(ChannelError::CommandFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_command_channel_missing_binary_is_unreachable() {
        let channel = CommandChannel::new(CommandChannelConfig {
            name: "ghost".into(),
            command: "/nonexistent/vigil-test-binary".into(),
            class: ChannelClass::Call,
        });
        assert!(matches!(
            channel.deliver(&alert(), DispatchSeverity::Critical).await,
            Err(ChannelError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_webhook_channel_unreachable_endpoint() {
        let channel = WebhookChannel::new(WebhookChannelConfig {
            name: "hook".into(),
            url: "http://127.0.0.1:9/unreachable".into(),
            class: ChannelClass::Messaging,
        });
        assert!(matches!(
            channel.deliver(&alert(), DispatchSeverity::Initial).await,
            Err(ChannelError::Unreachable(_))
        ));
    }
}
