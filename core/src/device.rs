/// Execution context: where sub-modules place their parameters and run.
///
/// Resolved once at startup and injected into every sub-module. The crate
/// ships the Rust reference kernels only, so a request for an accelerator
/// degrades to CPU with a warning instead of failing. Persisted state records
/// the device it was saved from; loading always remaps onto the resolved context.

use serde::{Deserialize, Serialize};

/// What the caller asks for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DevicePreference {
    #[default]
    Cpu,
    Accelerator,
}

/// Where a tensor actually lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    #[default]
    Cpu,
    Accelerator { ordinal: usize },
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator { ordinal } => write!(f, "accelerator:{ordinal}"),
        }
    }
}

/// Number of accelerator devices usable by this build.
/// Only the CPU reference kernels are compiled in.
pub fn accelerator_count() -> usize {
    0
}

/// Resolved execution capability shared by every sub-module of a model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionContext {
    device: Device,
}

impl ExecutionContext {
    pub fn cpu() -> Self {
        ExecutionContext { device: Device::Cpu }
    }

    /// Resolve a preference against what this build can run.
    pub fn resolve(pref: DevicePreference) -> Self {
        match pref {
            DevicePreference::Cpu => Self::cpu(),
            DevicePreference::Accelerator => {
                if accelerator_count() > 0 {
                    ExecutionContext { device: Device::Accelerator { ordinal: 0 } }
                } else {
                    tracing::warn!("accelerator requested but none available, falling back to cpu");
                    Self::cpu()
                }
            }
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Map a device recorded in persisted state onto this context.
    pub fn remap(&self, stored: Device) -> Device {
        if stored != self.device {
            tracing::debug!(from = %stored, to = %self.device, "remapping persisted state");
        }
        self.device
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::cpu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accelerator_degrades_to_cpu() {
        let ctx = ExecutionContext::resolve(DevicePreference::Accelerator);
        assert_eq!(ctx.device(), Device::Cpu);
    }

    #[test]
    fn test_remap_accelerator_state_onto_cpu() {
        let ctx = ExecutionContext::cpu();
        assert_eq!(ctx.remap(Device::Accelerator { ordinal: 3 }), Device::Cpu);
    }

    #[test]
    fn test_device_display() {
        assert_eq!(Device::Cpu.to_string(), "cpu");
        assert_eq!(Device::Accelerator { ordinal: 1 }.to_string(), "accelerator:1");
    }
}
