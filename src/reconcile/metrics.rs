//! Status and resource figures for one container, derived from inspect and
//! a single stats read.

use chrono::{DateTime, Utc};

use crate::models::{ContainerStatus, MetricsSample};
use crate::runtime::{ContainerRuntime, StatsSample};

const MIB: u64 = 1024 * 1024;

/// Turn cumulative counters into a metrics sample.
pub fn compute(stats: &StatsSample, started_at: Option<&str>, now: DateTime<Utc>) -> MetricsSample {
    let cpu_delta = stats.cpu_total.saturating_sub(stats.precpu_total);
    let system_delta = stats.system_cpu.saturating_sub(stats.presystem_cpu);
    let cpus = stats.online_cpus.max(1) as f64;
    let cpu = if cpu_delta > 0 && system_delta > 0 {
        (cpu_delta as f64 / system_delta as f64) * cpus * 100.0
    } else {
        0.0
    };

    MetricsSample {
        cpu: (cpu * 100.0).round() / 100.0,
        memory: stats.memory_usage / MIB,
        requests: stats.rx_packets,
        uptime: uptime(started_at, now),
    }
}

/// `"<hours>h <minutes>m"` since `started_at`; `"0h 0m"` when unknown.
pub fn uptime(started_at: Option<&str>, now: DateTime<Utc>) -> String {
    let Some(started) = started_at.and_then(|s| DateTime::parse_from_rfc3339(s).ok()) else {
        return "0h 0m".to_string();
    };
    let secs = (now - started.with_timezone(&Utc)).num_seconds().max(0);
    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
}

/// Observe one container: its status and, if running, its metrics.
///
/// Never fails. An absent container is `unknown`, an inspect failure is
/// `error`, and anything not running reports idle metrics.
pub async fn observe(runtime: &dyn ContainerRuntime, name: &str) -> (ContainerStatus, MetricsSample) {
    let info = match runtime.inspect_container(name).await {
        Ok(Some(info)) => info,
        Ok(None) => return (ContainerStatus::Unknown, MetricsSample::idle()),
        Err(e) => {
            tracing::debug!(container = %name, error = %e, "Inspect failed");
            return (ContainerStatus::Error, MetricsSample::idle());
        }
    };
    if !info.is_running() {
        return (info.status, MetricsSample::idle());
    }
    match runtime.stats(name).await {
        Ok(stats) => (
            info.status,
            compute(&stats, info.started_at.as_deref(), Utc::now()),
        ),
        Err(e) => {
            tracing::debug!(container = %name, error = %e, "Stats read failed");
            (info.status, MetricsSample::idle())
        }
    }
}
