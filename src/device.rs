//! Compute devices for transcription instances
//!
//! Accelerators are discovered by asking `nvidia-smi`, the same way the GPU
//! tooling shells out to vendor utilities rather than linking a driver API.
//! Memory utilisation for the status snapshot comes from the same tool.

use serde::Serialize;
use std::process::Command;

/// Where a model instance runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// Backend's default placement (the first accelerator when one exists)
    Auto,
    Cpu,
    /// Accelerator by index
    Cuda(u32),
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Auto => write!(f, "auto"),
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}

impl Serialize for Device {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parse an explicit device list such as `["0", "1"]` or `["cpu"]`
///
/// Accelerator indexes degrade to `cpu` when the host has no accelerator.
/// Unparseable entries are skipped with a warning.
pub fn parse_devices<S: AsRef<str>>(entries: &[S], accelerators: usize) -> Vec<Device> {
    let mut devices = Vec::new();
    for entry in entries {
        let raw = entry.as_ref().trim();
        if raw.is_empty() {
            continue;
        }

        let lower = raw.to_lowercase();
        if lower == "cpu" || accelerators == 0 {
            devices.push(Device::Cpu);
            continue;
        }

        let index = lower.strip_prefix("cuda:").unwrap_or(&lower);
        match index.parse::<u32>() {
            Ok(i) => devices.push(Device::Cuda(i)),
            Err(_) => tracing::warn!("Ignoring unrecognised device '{}'", raw),
        }
    }
    devices
}

/// Devices to build pool instances on
///
/// An explicit list wins; otherwise every detected accelerator is used, and a
/// host without accelerators gets a single `cpu` entry.
pub fn resolve_devices(explicit: &[String], accelerators: usize) -> Vec<Device> {
    if !explicit.is_empty() {
        return parse_devices(explicit, accelerators);
    }
    if accelerators == 0 {
        return vec![Device::Cpu];
    }
    (0..accelerators as u32).map(Device::Cuda).collect()
}

/// Number of CUDA accelerators visible to this process (0 if none or unknown)
pub fn accelerator_count() -> usize {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=index", "--format=csv,noheader"])
        .output();

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .count(),
        Ok(_) => 0,
        Err(e) => {
            tracing::debug!("nvidia-smi not available: {}", e);
            0
        }
    }
}

/// Approximate accelerator memory utilisation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryInfo {
    pub gpu_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_total_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_used_gb: Option<f64>,
}

/// Memory of the first accelerator, or `gpu_available = false`
pub fn memory_info() -> MemoryInfo {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=memory.total,memory.used",
            "--format=csv,noheader,nounits",
            "--id=0",
        ])
        .output();

    match output {
        Ok(out) if out.status.success() => {
            let stdout = String::from_utf8_lossy(&out.stdout);
            stdout
                .lines()
                .next()
                .and_then(parse_memory_line)
                .unwrap_or_default()
        }
        _ => MemoryInfo::default(),
    }
}

/// Parse an `nvidia-smi` "total, used" line in MiB
fn parse_memory_line(line: &str) -> Option<MemoryInfo> {
    let mut fields = line.split(',').map(|f| f.trim().parse::<f64>());
    let total = fields.next()?.ok()?;
    let used = fields.next()?.ok()?;
    Some(MemoryInfo {
        gpu_available: true,
        gpu_total_gb: Some(total / 1024.0),
        gpu_used_gb: Some(used / 1024.0),
    })
}

/// Log accelerator memory usage (after loading models)
pub fn log_memory_usage() {
    let info = memory_info();
    match (info.gpu_total_gb, info.gpu_used_gb) {
        (Some(total), Some(used)) => {
            tracing::info!("GPU memory - total: {:.2}GB, used: {:.2}GB", total, used)
        }
        _ => tracing::debug!("No GPU memory information available"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_display() {
        assert_eq!(Device::Auto.to_string(), "auto");
        assert_eq!(Device::Cpu.to_string(), "cpu");
        assert_eq!(Device::Cuda(1).to_string(), "cuda:1");
        assert_eq!(serde_json::to_string(&Device::Cuda(0)).unwrap(), "\"cuda:0\"");
    }

    #[test]
    fn test_parse_devices_with_accelerators() {
        let devices = parse_devices(&["0", " 1 ", "cuda:2", "cpu", "", "gpu-x"], 2);
        assert_eq!(
            devices,
            vec![Device::Cuda(0), Device::Cuda(1), Device::Cuda(2), Device::Cpu]
        );
    }

    #[test]
    fn test_parse_devices_without_accelerators_falls_back_to_cpu() {
        let devices = parse_devices(&["0", "1"], 0);
        assert_eq!(devices, vec![Device::Cpu, Device::Cpu]);
    }

    #[test]
    fn test_resolve_devices_autodetect() {
        assert_eq!(
            resolve_devices(&[], 2),
            vec![Device::Cuda(0), Device::Cuda(1)]
        );
        assert_eq!(resolve_devices(&[], 0), vec![Device::Cpu]);
        assert_eq!(resolve_devices(&["1".to_string()], 2), vec![Device::Cuda(1)]);
    }

    #[test]
    fn test_parse_memory_line() {
        let info = parse_memory_line("24564, 2048").unwrap();
        assert!(info.gpu_available);
        assert!((info.gpu_total_gb.unwrap() - 23.98828125).abs() < 1e-9);
        assert_eq!(info.gpu_used_gb, Some(2.0));

        assert!(parse_memory_line("N/A, N/A").is_none());
        assert!(parse_memory_line("").is_none());
    }

    #[test]
    fn test_memory_info_default_reports_no_gpu() {
        let json = serde_json::to_value(MemoryInfo::default()).unwrap();
        assert_eq!(json, serde_json::json!({ "gpu_available": false }));
    }
}
