//! Host description for the report.

use serde::Serialize;
use sysinfo::{CpuRefreshKind, RefreshKind, System, SystemExt};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentInfo {
    pub os: String,
    pub os_version: Option<String>,
    pub arch: String,
    pub hostname: Option<String>,
    pub cpu_count: usize,
    pub physical_cores: Option<usize>,
    pub total_memory_gb: f64,
}

impl EnvironmentInfo {
    /// Probe the machine the harness runs on.
    pub fn detect() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_memory()
                .with_cpu(CpuRefreshKind::new()),
        );
        Self {
            os: system.name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            os_version: system.os_version(),
            arch: std::env::consts::ARCH.to_string(),
            hostname: system.host_name(),
            cpu_count: system.cpus().len(),
            physical_cores: system.physical_core_count(),
            total_memory_gb: system.total_memory() as f64 / BYTES_PER_GB,
        }
    }

    /// Fixed description used when the report must not depend on the host.
    pub fn unknown() -> Self {
        Self {
            os: "unknown".to_string(),
            os_version: None,
            arch: std::env::consts::ARCH.to_string(),
            hostname: None,
            cpu_count: 0,
            physical_cores: None,
            total_memory_gb: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_reports_cpus() {
        let env = EnvironmentInfo::detect();
        assert!(env.cpu_count > 0);
        assert!(env.total_memory_gb > 0.0);
        assert_eq!(env.arch, std::env::consts::ARCH);
    }
}
