use anyhow::Result;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::Device;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceMap {
    ForceCpu,
    Ordinal(usize),
}

impl Default for DeviceMap {
    fn default() -> Self {
        Self::Ordinal(0)
    }
}

pub fn select_best_device(device_map: DeviceMap) -> Result<Device> {
    match device_map {
        DeviceMap::ForceCpu => Ok(Device::Cpu),
        DeviceMap::Ordinal(ordinal) if cuda_is_available() => Ok(Device::new_cuda(ordinal)?),
        DeviceMap::Ordinal(ordinal) if metal_is_available() => Ok(Device::new_metal(ordinal)?),
        DeviceMap::Ordinal(_) => {
            info!("no accelerator available, running on CPU");
            Ok(Device::Cpu)
        }
    }
}

/// Owns the accelerator for the lifetime of one request.
///
/// The reclaim runs on every exit path: explicitly via [`release`] on the
/// normal path, and from `Drop` when the request unwinds early. Calling
/// [`release`] more than once is a no-op.
///
/// [`release`]: AcceleratorGuard::release
pub struct AcceleratorGuard {
    device: Device,
    released: bool,
}

impl AcceleratorGuard {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            released: false,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Waits out any in-flight accelerator work so its allocations can be
    /// returned before the process exits.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.device.synchronize() {
            warn!("failed to synchronize device during reclaim: {err}");
        }
    }
}

impl Drop for AcceleratorGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_cpu_selects_cpu() {
        let device = select_best_device(DeviceMap::ForceCpu).unwrap();
        assert!(device.is_cpu());
    }

    #[test]
    fn release_is_idempotent() {
        let mut guard = AcceleratorGuard::new(Device::Cpu);
        guard.release();
        guard.release();
        assert!(guard.released);
    }
}
