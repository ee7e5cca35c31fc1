//! Host resource metrics read from procfs
//!
//! CPU usage is the busy share of jiffies between two `/proc/stat` reads taken
//! `cpu_sample` apart. Disk usage comes from `df -P /`.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::{CollectionError, MetricBatch, SystemMetricSource};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Collects host metrics from `/proc` and `df`
#[derive(Debug, Clone)]
pub struct HostCollector {
    proc_root: PathBuf,
    disk_mount: String,
    cpu_sample: Duration,
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl HostCollector {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            disk_mount: "/".to_string(),
            cpu_sample: Duration::from_secs(1),
        }
    }

    /// Read procfs from a different root
    #[must_use]
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    /// Interval between the two CPU reads
    #[must_use]
    pub fn with_cpu_sample(mut self, sample: Duration) -> Self {
        self.cpu_sample = sample;
        self
    }

    async fn read(&self, rel: &str) -> Result<String, CollectionError> {
        let path = self.proc_root.join(rel);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CollectionError::read(path.display().to_string(), e))
    }

    async fn cpu_percentage(&self) -> Result<f64, CollectionError> {
        let first = parse_cpu_times(&self.read("stat").await?)?;
        tokio::time::sleep(self.cpu_sample).await;
        let second = parse_cpu_times(&self.read("stat").await?)?;

        let total = second.total.saturating_sub(first.total);
        if total == 0 {
            return Err(CollectionError::parse("cpu_percentage", "no CPU time elapsed"));
        }
        let idle = second.idle.saturating_sub(first.idle);

        Ok((total - idle.min(total)) as f64 / total as f64 * 100.0)
    }

    async fn memory_percentage(&self) -> Result<f64, CollectionError> {
        parse_meminfo(&self.read("meminfo").await?)
    }

    async fn load_1min(&self) -> Result<f64, CollectionError> {
        parse_loadavg(&self.read("loadavg").await?)
    }

    async fn process_count(&self) -> Result<f64, CollectionError> {
        let mut entries = tokio::fs::read_dir(&self.proc_root)
            .await
            .map_err(|e| CollectionError::read(self.proc_root.display().to_string(), e))?;

        let mut count = 0u64;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()))
            {
                count += 1;
            }
        }
        Ok(count as f64)
    }

    async fn connection_count(&self) -> Result<f64, CollectionError> {
        let mut total = 0usize;
        let mut any = false;
        for table in ["net/tcp", "net/tcp6", "net/udp", "net/udp6"] {
            if let Ok(content) = self.read(table).await {
                any = true;
                total += content.lines().skip(1).filter(|l| !l.trim().is_empty()).count();
            }
        }

        if any {
            Ok(total as f64)
        } else {
            Err(CollectionError::read(
                self.proc_root.join("net").display().to_string(),
                "no socket tables available",
            ))
        }
    }

    async fn disk_percentage(&self) -> Result<f64, CollectionError> {
        let output = Command::new("df")
            .arg("-P")
            .arg(&self.disk_mount)
            .output()
            .await
            .map_err(|e| CollectionError::read("df", e))?;

        if !output.status.success() {
            return Err(CollectionError::read(
                "df",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        parse_df(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl SystemMetricSource for HostCollector {
    async fn collect(&self) -> MetricBatch {
        let (cpu, memory, disk, load, processes, connections, net) = tokio::join!(
            self.cpu_percentage(),
            self.memory_percentage(),
            self.disk_percentage(),
            self.load_1min(),
            self.process_count(),
            self.connection_count(),
            self.read("net/dev"),
        );

        let mut batch = MetricBatch::default();
        batch.record("cpu_percentage", cpu);
        batch.record("memory_percentage", memory);
        batch.record("disk_percentage", disk);
        batch.record("system_load_1min", load);
        batch.record("active_processes", processes);
        batch.record("network_connections", connections);

        match net.and_then(|content| parse_net_dev(&content)) {
            Ok(NetTotals { rx_bytes, tx_bytes }) => {
                batch.record("bytes_sent_mb", Ok(tx_bytes as f64 / BYTES_PER_MB));
                batch.record("bytes_received_mb", Ok(rx_bytes as f64 / BYTES_PER_MB));
            }
            Err(e) => batch.errors.push(e),
        }

        debug!(
            samples = batch.samples.len(),
            errors = batch.errors.len(),
            "Collected host metrics"
        );
        batch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    total: u64,
    idle: u64,
}

/// Aggregate `cpu` line of `/proc/stat`; idle includes iowait
fn parse_cpu_times(stat: &str) -> Result<CpuTimes, CollectionError> {
    let line = stat
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| CollectionError::parse("cpu_percentage", "missing aggregate cpu line"))?;

    let fields = line
        .split_whitespace()
        .skip(1)
        .map(str::parse::<u64>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CollectionError::parse("cpu_percentage", e))?;

    if fields.len() < 4 {
        return Err(CollectionError::parse("cpu_percentage", "too few cpu fields"));
    }

    // user nice system idle iowait irq softirq steal; guest time is already in user
    let total: u64 = fields.iter().take(8).sum();
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);

    Ok(CpuTimes { total, idle })
}

fn meminfo_kb(meminfo: &str, key: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix(key)?.strip_prefix(':'))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|v| v.parse().ok())
}

fn parse_meminfo(meminfo: &str) -> Result<f64, CollectionError> {
    let total = meminfo_kb(meminfo, "MemTotal")
        .filter(|t| *t > 0)
        .ok_or_else(|| CollectionError::parse("memory_percentage", "missing MemTotal"))?;
    let available = meminfo_kb(meminfo, "MemAvailable")
        .ok_or_else(|| CollectionError::parse("memory_percentage", "missing MemAvailable"))?;

    Ok(total.saturating_sub(available) as f64 / total as f64 * 100.0)
}

fn parse_loadavg(loadavg: &str) -> Result<f64, CollectionError> {
    loadavg
        .split_whitespace()
        .next()
        .ok_or_else(|| CollectionError::parse("system_load_1min", "empty loadavg"))?
        .parse()
        .map_err(|e| CollectionError::parse("system_load_1min", e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NetTotals {
    rx_bytes: u64,
    tx_bytes: u64,
}

fn parse_net_dev(net_dev: &str) -> Result<NetTotals, CollectionError> {
    let mut totals = NetTotals { rx_bytes: 0, tx_bytes: 0 };

    for line in net_dev.lines().skip(2) {
        let Some((_, counters)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<&str> = counters.split_whitespace().collect();
        if fields.len() < 9 {
            return Err(CollectionError::parse("bytes_sent_mb", "short net/dev line"));
        }
        let parse = |s: &str| {
            s.parse::<u64>()
                .map_err(|e| CollectionError::parse("bytes_sent_mb", e))
        };
        totals.rx_bytes += parse(fields[0])?;
        totals.tx_bytes += parse(fields[8])?;
    }

    Ok(totals)
}

/// Capacity column of `df -P` output
fn parse_df(output: &str) -> Result<f64, CollectionError> {
    let line = output
        .lines()
        .nth(1)
        .ok_or_else(|| CollectionError::parse("disk_percentage", "no filesystem line"))?;

    line.split_whitespace()
        .nth(4)
        .and_then(|capacity| capacity.strip_suffix('%'))
        .ok_or_else(|| CollectionError::parse("disk_percentage", "missing capacity column"))?
        .parse()
        .map_err(|e| CollectionError::parse("disk_percentage", e))
}
