//! Advisory memory-pressure checks for long batch runs.

use crate::config::ResourceConfig;
use std::sync::Arc;

/// A source of current memory utilization.
pub trait MemoryProbe: Send + Sync {
    /// Utilization in percent, or `None` when it cannot be determined.
    fn utilization_percent(&self) -> Option<f64>;
}

/// Reads system-wide utilization from `/proc/meminfo` (Linux only).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMemoryProbe;

impl MemoryProbe for SystemMemoryProbe {
    fn utilization_percent(&self) -> Option<f64> {
        if !cfg!(target_os = "linux") {
            return None;
        }
        let content = std::fs::read_to_string("/proc/meminfo").ok()?;
        parse_meminfo(&content)
    }
}

/// Compute utilization from `/proc/meminfo` contents.
pub fn parse_meminfo(content: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        content
            .lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total <= 0.0 {
        return None;
    }
    Some(((total - available) / total * 100.0).clamp(0.0, 100.0))
}

/// Result of a pressure check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemoryPressure {
    Normal(f64),
    High(f64),
    Unknown,
}

impl MemoryPressure {
    pub fn is_high(&self) -> bool {
        matches!(self, MemoryPressure::High(_))
    }
}

/// Memory threshold plus the probe used to check it.
#[derive(Clone)]
pub struct ResourceGuard {
    pub max_memory_percent: f64,
    probe: Arc<dyn MemoryProbe>,
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("max_memory_percent", &self.max_memory_percent)
            .finish_non_exhaustive()
    }
}

impl Default for ResourceGuard {
    fn default() -> Self {
        Self::new(85.0, Arc::new(SystemMemoryProbe))
    }
}

impl ResourceGuard {
    pub fn new(max_memory_percent: f64, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            max_memory_percent,
            probe,
        }
    }

    pub fn from_config(config: &ResourceConfig) -> Self {
        Self::new(config.memory_threshold_percent, Arc::new(SystemMemoryProbe))
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Check if a memory utilization figure is within limits.
    pub fn check_memory_usage(&self, percent: f64) -> Result<(), String> {
        if self.max_memory_percent > 0.0 && percent > self.max_memory_percent {
            Err(format!(
                "Memory utilization {percent:.1}% exceeds limit of {:.1}%",
                self.max_memory_percent
            ))
        } else {
            Ok(())
        }
    }

    /// Probe current utilization and compare it with the threshold.
    pub fn check(&self) -> MemoryPressure {
        match self.probe.utilization_percent() {
            Some(pct) if self.check_memory_usage(pct).is_err() => MemoryPressure::High(pct),
            Some(pct) => MemoryPressure::Normal(pct),
            None => MemoryPressure::Unknown,
        }
    }
}
