//! NVIDIA GPU access
//!
//! Readings via `nvidia-smi`, fan and clock control via `nvidia-settings`.
//! Requires X11 and `nvidia-settings` with Coolbits enabled for fan control;
//! power limit changes require root.

use crate::{gpu_const, ClockKind, Device, Result};
use gf_error::GpufanError;
use std::process::{Command, Output};
use std::sync::OnceLock;
use tracing::{debug, info, trace, warn};

pub struct NvidiaDevice {
    gpu_index: u32,
    name: String,
    display: String,
    fans: OnceLock<Vec<u32>>,
}

impl NvidiaDevice {
    /// Bind to GPU `gpu_index` as numbered by nvidia-smi
    pub fn open(gpu_index: u32) -> Result<Self> {
        let name = query_gpu(gpu_index, "name")?;
        if name.is_empty() {
            return Err(GpufanError::HardwareNotFound(format!(
                "NVIDIA GPU {} not found",
                gpu_index
            )));
        }
        info!("Opened NVIDIA GPU {} ({})", gpu_index, name);

        Ok(Self {
            gpu_index,
            name,
            // Ensure DISPLAY is set for nvidia-settings
            display: std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string()),
            fans: OnceLock::new(),
        })
    }

    fn fans(&self) -> &[u32] {
        self.fans.get_or_init(|| {
            let fans = self.query_fans();
            info!("GPU {} controls fan(s) {:?}", self.gpu_index, fans);
            fans
        })
    }

    fn query_fans(&self) -> Vec<u32> {
        match self.settings(&["-q", "fans", "-V"]) {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                parse_gpu_fans(&stdout, self.gpu_index)
            }
            Ok(output) => {
                warn!(
                    "nvidia-settings fans query failed with status {:?}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                default_fans(self.gpu_index)
            }
            Err(e) => {
                warn!("Failed to execute nvidia-settings: {}", e);
                default_fans(self.gpu_index)
            }
        }
    }

    fn settings(&self, args: &[&str]) -> Result<Output> {
        Command::new("nvidia-settings")
            .env("DISPLAY", &self.display)
            .args(args)
            .output()
            .map_err(|e| GpufanError::command("nvidia-settings", e.to_string()))
    }

    /// Run one `-a` assignment and require nvidia-settings to confirm it
    fn assign(&self, assignment: &str) -> Result<()> {
        let output = self.settings(&["-a", assignment])?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        trace!("nvidia-settings -a {} -> {}", assignment, stdout.trim());

        if !output.status.success() || !assignment_accepted(&stdout) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GpufanError::command(
                format!("nvidia-settings -a {}", assignment),
                if stderr.trim().is_empty() {
                    "assignment not confirmed".to_string()
                } else {
                    stderr.trim().to_string()
                },
            ));
        }
        Ok(())
    }

    fn smi_field(&self, field: &str) -> Result<String> {
        query_gpu(self.gpu_index, field)
    }
}

impl Device for NvidiaDevice {
    fn name(&self) -> String {
        format!("NVIDIA {} (gpu {})", self.name, self.gpu_index)
    }

    fn read_temperature(&self) -> Result<i32> {
        let raw = self.smi_field("temperature.gpu")?;
        parse_nvidia_value::<i32>(&raw)
            .ok_or_else(|| GpufanError::sensor(format!("temperature.gpu unavailable: '{}'", raw)))
    }

    fn read_fan_speed(&self) -> Result<u8> {
        let raw = self.smi_field("fan.speed")?;
        parse_nvidia_value::<u32>(&raw)
            .map(|v| v.min(100) as u8)
            .ok_or_else(|| GpufanError::Parse(format!("fan.speed unavailable: '{}'", raw)))
    }

    fn enable_fan_control(&self) -> Result<()> {
        self.assign(&format!("[gpu:{}]/GPUFanControlState=1", self.gpu_index))
            .map_err(|e| GpufanError::ControlUnavailable(e.to_string()))?;
        debug!("Enabled manual fan control on GPU {}", self.gpu_index);
        Ok(())
    }

    fn write_fan_speed(&self, percent: u8) -> Result<()> {
        let percent = percent.min(100);
        let fans = self.fans();
        if fans.is_empty() {
            return Err(GpufanError::NotSupported(format!(
                "no fans associated with GPU {}",
                self.gpu_index
            )));
        }

        let mut failures = Vec::new();
        for &fan in fans {
            if let Err(e) = self.assign(&format!("[fan:{}]/GPUTargetFanSpeed={}", fan, percent)) {
                warn!("Fan {} rejected {}%: {}", fan, percent, e);
                failures.push(fan);
            }
        }

        if !failures.is_empty() {
            return Err(GpufanError::actuator(format!(
                "fan(s) {:?} on GPU {} rejected {}%",
                failures, self.gpu_index, percent
            )));
        }
        debug!("Set NVIDIA GPU {} fans to {}%", self.gpu_index, percent);
        Ok(())
    }

    fn read_clock(&self, kind: ClockKind) -> Result<i32> {
        let field = match kind {
            ClockKind::Core => "clocks.gr",
            ClockKind::Memory => "clocks.mem",
        };
        let raw = self.smi_field(field)?;
        parse_nvidia_value::<i32>(&raw)
            .ok_or_else(|| GpufanError::Parse(format!("{} unavailable: '{}'", field, raw)))
    }

    fn write_clock_offset(&self, kind: ClockKind, offset_mhz: i32) -> Result<()> {
        let attribute = match kind {
            ClockKind::Core => "GPUGraphicsClockOffset",
            ClockKind::Memory => "GPUMemoryTransferRateOffset",
        };
        self.assign(&format!(
            "[gpu:{}]/{}[{}]={}",
            self.gpu_index,
            attribute,
            gpu_const::nvidia::PERF_LEVEL,
            offset_mhz
        ))?;
        info!("Set {} offset on GPU {} to {} MHz", kind, self.gpu_index, offset_mhz);
        Ok(())
    }

    fn read_power_limit(&self) -> Result<u32> {
        let raw = self.smi_field("power.limit")?;
        parse_nvidia_value::<f32>(&raw)
            .map(|w| w.round() as u32)
            .ok_or_else(|| GpufanError::Parse(format!("power.limit unavailable: '{}'", raw)))
    }

    fn write_power_limit(&self, watts: u32) -> Result<()> {
        let output = Command::new("nvidia-smi")
            .args(["-i", &self.gpu_index.to_string(), "-pl", &watts.to_string()])
            .output()
            .map_err(|e| GpufanError::command("nvidia-smi -pl", e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(GpufanError::command(
                "nvidia-smi -pl",
                format!("{} {}", stdout.trim(), stderr.trim()).trim().to_string(),
            ));
        }
        info!("Set power limit on GPU {} to {} W", self.gpu_index, watts);
        Ok(())
    }
}

/// Number of GPUs nvidia-smi can see
pub fn probe() -> Result<usize> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=index", "--format=csv,noheader,nounits"])
        .output()
        .map_err(|e| GpufanError::GpuError(format!("nvidia-smi not found: {}", e)))?;

    if !output.status.success() {
        return Err(GpufanError::GpuError("nvidia-smi failed".to_string()));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .count())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn query_gpu(gpu_index: u32, field: &str) -> Result<String> {
    let output = Command::new("nvidia-smi")
        .args([
            "-i",
            &gpu_index.to_string(),
            &format!("--query-gpu={}", field),
            "--format=csv,noheader,nounits",
        ])
        .output()
        .map_err(|e| GpufanError::command("nvidia-smi", e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GpufanError::command(
            format!("nvidia-smi --query-gpu={}", field),
            stderr.trim().to_string(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .to_string())
}

/// Parse one nvidia-smi CSV cell, treating the "not available" spellings as absent
pub fn parse_nvidia_value<T: std::str::FromStr>(s: &str) -> Option<T> {
    let s = s.trim();
    if s.is_empty() || gpu_const::nvidia::UNAVAILABLE.contains(&s) {
        None
    } else {
        s.parse().ok()
    }
}

pub fn assignment_accepted(stdout: &str) -> bool {
    stdout.contains(gpu_const::nvidia::ASSIGNED_MARKER)
}

/// Fan targets owned by `gpu_index` in `nvidia-settings -q fans -V` output.
///
/// `[fan:M]` indices are global across GPUs. Each fan block lists its related
/// targets either as `host:0[gpu:N]` or by the `GPU-N` name; fans related to a
/// different GPU are skipped. When the output carries no relations at all,
/// only GPU 0 claims the listed fans.
pub fn parse_gpu_fans(stdout: &str, gpu_index: u32) -> Vec<u32> {
    let mut all = Vec::new();
    let mut owned = Vec::new();
    let mut any_relation = false;
    let mut current = None;

    for line in stdout.lines() {
        let trimmed = line.trim();
        if let Some(fan) = target_index(trimmed, "[fan:") {
            if trimmed.starts_with('[') {
                if !all.contains(&fan) {
                    all.push(fan);
                }
                current = Some(fan);
                continue;
            }
        }

        let Some(fan) = current else { continue };
        let gpu = target_index(trimmed, "[gpu:").or_else(|| {
            trimmed
                .strip_prefix("GPU-")
                .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
                .and_then(|n| n.parse().ok())
        });
        if let Some(gpu) = gpu {
            any_relation = true;
            if gpu == gpu_index && !owned.contains(&fan) {
                owned.push(fan);
            }
        }
    }

    let mut fans = if any_relation {
        owned
    } else if gpu_index == 0 {
        all
    } else {
        Vec::new()
    };
    fans.truncate(gpu_const::MAX_FANS_PER_GPU as usize);
    fans
}

/// Fans assumed when nvidia-settings cannot be queried
fn default_fans(gpu_index: u32) -> Vec<u32> {
    if gpu_index == 0 {
        vec![0]
    } else {
        Vec::new()
    }
}

/// Number inside a `[kind:N]` target tag
fn target_index(line: &str, tag: &str) -> Option<u32> {
    let start = line.find(tag)? + tag.len();
    let end = line[start..].find(']')? + start;
    line[start..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nvidia_value() {
        assert_eq!(parse_nvidia_value::<i32>(" 67 "), Some(67));
        assert_eq!(parse_nvidia_value::<f32>("250.00"), Some(250.0));
        assert_eq!(parse_nvidia_value::<u32>("[Not Supported]"), None);
        assert_eq!(parse_nvidia_value::<u32>("N/A"), None);
        assert_eq!(parse_nvidia_value::<u32>(""), None);
        assert_eq!(parse_nvidia_value::<u32>("abc"), None);
    }

    #[test]
    fn test_assignment_accepted() {
        let ok = "  Attribute 'GPUTargetFanSpeed' (host:0[fan:0]) assigned value 60.\n";
        assert!(assignment_accepted(ok));
        assert!(!assignment_accepted("ERROR: Error assigning value 60"));
    }

    const TWO_GPUS: &str = "\
  2 Fans on host:0

    [0] host:0[fan:0] (Fan 0)

      Has the following name:
        FAN-0

      Is connected to the following target:
        GPU-0 (host:0[gpu:0])

    [1] host:0[fan:1] (Fan 1)

      Has the following name:
        FAN-1

      Is connected to the following target:
        GPU-1 (host:0[gpu:1])
";

    #[test]
    fn test_parse_gpu_fans_two_gpus_on_one_display() {
        assert_eq!(parse_gpu_fans(TWO_GPUS, 0), vec![0]);
        assert_eq!(parse_gpu_fans(TWO_GPUS, 1), vec![1]);
        assert!(parse_gpu_fans(TWO_GPUS, 2).is_empty());
    }

    #[test]
    fn test_parse_gpu_fans_by_gpu_name() {
        let out = "    [0] host:0[fan:0] (Fan 0)\n      GPU-1\n    [1] host:0[fan:1] (Fan 1)\n      GPU-1\n";
        assert_eq!(parse_gpu_fans(out, 1), vec![0, 1]);
        assert!(parse_gpu_fans(out, 0).is_empty());
    }

    #[test]
    fn test_parse_gpu_fans_without_relations() {
        let out = "2 Fans on host:0\n\n    [0] host:0[fan:0] (Fan 0)\n    [1] host:0[fan:1] (Fan 1)\n";
        assert_eq!(parse_gpu_fans(out, 0), vec![0, 1]);
        assert!(parse_gpu_fans(out, 1).is_empty());
        assert!(parse_gpu_fans("", 0).is_empty());

        let many: String = (0..8)
            .map(|i| format!("    [{i}] host:0[fan:{i}] (Fan {i})\n"))
            .collect();
        assert_eq!(parse_gpu_fans(&many, 0).len(), gpu_const::MAX_FANS_PER_GPU as usize);
    }

    #[test]
    fn test_default_fans() {
        assert_eq!(default_fans(0), vec![0]);
        assert!(default_fans(1).is_empty());
    }
}
