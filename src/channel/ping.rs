//! Ping channel backed by the system `ping` command.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;

use super::{Channel, ChannelError};

/// Sends a single ICMP echo per measurement and reports its RTT.
pub struct PingChannel {
    timeout: Duration,
}

impl PingChannel {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Channel for PingChannel {
    async fn measure_round_trip(&self, target: &str) -> Result<f64, ChannelError> {
        // A leading dash would be read by ping as an option
        if target.is_empty() || target.starts_with('-') || target.contains(char::is_whitespace) {
            return Err(ChannelError::Config(format!("invalid ping target: {:?}", target)));
        }

        let timeout_secs = self.timeout.as_secs().max(1);
        let output = Command::new("ping")
            .args(["-c", "1", "-W", &timeout_secs.to_string(), target])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ChannelError::Command(format!("failed to execute ping: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("timeout") || is_total_loss(&stdout) {
                return Err(ChannelError::Timeout(self.timeout));
            }
            return Err(ChannelError::Command(format!("ping failed: {}", stdout.trim())));
        }

        parse_ping_output(&stdout)
    }
}

fn is_total_loss(output: &str) -> bool {
    output.contains("100% packet loss") || output.contains("100.0% packet loss")
}

/// Extract the RTT in milliseconds from ping output.
///
/// Prefers the per-reply `time=` field, then falls back to the average of the
/// summary line (`rtt` on Linux, `round-trip` on BSD/macOS).
fn parse_ping_output(output: &str) -> Result<f64, ChannelError> {
    static REPLY: OnceLock<Regex> = OnceLock::new();
    static SUMMARY: OnceLock<Regex> = OnceLock::new();

    let reply = REPLY.get_or_init(|| Regex::new(r"time[=<](?P<ms>[0-9.]+)\s*ms").unwrap());
    if let Some(ms) = reply
        .captures(output)
        .and_then(|caps| caps.name("ms"))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        return Ok(ms);
    }

    let summary = SUMMARY.get_or_init(|| {
        Regex::new(r"(?:rtt|round-trip)\s+min/avg/max/(?:mdev|stddev)\s*=\s*[0-9.]+/(?P<avg>[0-9.]+)/")
            .unwrap()
    });
    if let Some(ms) = summary
        .captures(output)
        .and_then(|caps| caps.name("avg"))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        return Ok(ms);
    }

    Err(ChannelError::Command(format!(
        "failed to parse ping output: {}",
        output.trim()
    )))
}
