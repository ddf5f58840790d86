use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A user project as stored by the remote project service. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(alias = "project_name")]
    pub name: String,
    #[serde(alias = "email")]
    pub owner: String,
    #[serde(default)]
    pub github_url: Option<String>,
    #[serde(alias = "url")]
    pub public_url: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Observed lifecycle state of a project's container.
///
/// `Inactive` means paused. A container that exists but was never started
/// is `Created`. `Removing` and `Error` are transient signals, never stored
/// by the runtime itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    #[default]
    Unknown,
    Created,
    Running,
    Exited,
    Inactive,
    Removing,
    Error,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Created => "created",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Inactive => "inactive",
            Self::Removing => "removing",
            Self::Error => "error",
        }
    }

    /// Map a runtime state string (`docker inspect .State.Status`).
    pub fn from_runtime_state(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" | "restarting" => Self::Running,
            "paused" => Self::Inactive,
            "exited" | "dead" => Self::Exited,
            "removing" => Self::Removing,
            _ => Self::Unknown,
        }
    }

    /// Map a runtime event action. Returns `None` for actions that do not
    /// describe a lifecycle transition.
    pub fn from_event_action(action: &str) -> Option<Self> {
        match action {
            "start" | "unpause" => Some(Self::Running),
            "die" | "stop" | "kill" => Some(Self::Exited),
            "create" => Some(Self::Created),
            "pause" => Some(Self::Inactive),
            "destroy" => Some(Self::Removing),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "exited" => Ok(Self::Exited),
            "inactive" => Ok(Self::Inactive),
            "removing" => Ok(Self::Removing),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid container status: {}", s)),
        }
    }
}

/// Point-in-time resource figures for one container, without the emission
/// timestamp. Two samples are "the same" when these values match.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricsSample {
    /// CPU usage in percent, rounded to two decimals.
    pub cpu: f64,
    /// Memory usage in MiB.
    pub memory: u64,
    /// Cumulative received packets, used as a request count proxy.
    pub requests: u64,
    /// `"<h>h <m>m"` since the container started.
    pub uptime: String,
}

impl MetricsSample {
    pub fn idle() -> Self {
        Self {
            uptime: "0h 0m".to_string(),
            ..Self::default()
        }
    }

    pub fn into_payload(self, last_activity: String) -> ContainerMetrics {
        ContainerMetrics {
            cpu: self.cpu,
            memory: self.memory,
            requests: self.requests,
            uptime: self.uptime,
            last_activity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerMetrics {
    pub cpu: f64,
    pub memory: u64,
    pub requests: u64,
    pub uptime: String,
    pub last_activity: String,
}

// ── Stream events ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub project_id: String,
    pub status: ContainerStatus,
    pub previous_status: ContainerStatus,
    pub name: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsUpdate {
    pub project_id: String,
    pub metrics: ContainerMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamError {
    pub message: String,
    pub error_code: String,
}

/// One fact pushed to a live client: an event type plus a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Connected { message: String, owner: String },
    ContainerStatusChanged(StatusChange),
    MetricsUpdated(MetricsUpdate),
    ContainerError(StreamError),
}

impl StreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::ContainerStatusChanged(_) => "container_status_changed",
            Self::MetricsUpdated(_) => "metrics_updated",
            Self::ContainerError(_) => "container_error",
        }
    }

    /// The `data:` part of the event, serialized on its own.
    pub fn data(&self) -> serde_json::Value {
        match self {
            Self::Connected { message, owner } => {
                serde_json::json!({ "message": message, "owner": owner })
            }
            Self::ContainerStatusChanged(change) => {
                serde_json::to_value(change).unwrap_or_default()
            }
            Self::MetricsUpdated(update) => serde_json::to_value(update).unwrap_or_default(),
            Self::ContainerError(err) => serde_json::to_value(err).unwrap_or_default(),
        }
    }

    pub fn error(message: impl Into<String>, error_code: &str) -> Self {
        Self::ContainerError(StreamError {
            message: message.into(),
            error_code: error_code.to_string(),
        })
    }
}

/// Current UTC time in the `2025-01-01T00:00:00.000000Z` form used on the wire.
pub fn utc_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}
