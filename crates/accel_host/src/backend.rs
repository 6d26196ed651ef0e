//! Where commands go: the behavioural model, nowhere, or the real unit.

use accel_common::rocc::{RoccCommand, SocProfile};
use accel_core::{CommandPort, NullPort, PollPolicy};
use accel_sim::{SimConfig, SimPort, SimulatedAccelerator};
use anyhow::Result;
use clap::ValueEnum;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Behavioural model, requests complete before the start command returns.
    Sim,
    /// Behavioural model with a device worker thread and latency injection.
    SimThreaded,
    /// Drops every command. Outputs stay empty.
    Null,
    /// RoCC custom instructions on the current hart.
    Rocc,
}

/// Port handed to the pipeline facades.
#[derive(Clone)]
pub enum HostPort {
    Sim(SimPort),
    Null(NullPort),
    #[cfg(target_arch = "riscv64")]
    Rocc(accel_core::port::RoccPort),
}

impl CommandPort for HostPort {
    unsafe fn issue(&mut self, cmd: RoccCommand) -> u64 {
        // SAFETY: forwarded contract.
        unsafe {
            match self {
                HostPort::Sim(port) => port.issue(cmd),
                HostPort::Null(port) => port.issue(cmd),
                #[cfg(target_arch = "riscv64")]
                HostPort::Rocc(port) => port.issue(cmd),
            }
        }
    }

    fn poll_policy(&self) -> PollPolicy {
        match self {
            HostPort::Sim(port) => port.poll_policy(),
            HostPort::Null(port) => port.poll_policy(),
            #[cfg(target_arch = "riscv64")]
            HostPort::Rocc(port) => port.poll_policy(),
        }
    }
}

/// An opened accelerator of one SoC build.
pub struct Device {
    profile: SocProfile,
    port: HostPort,
    sim: Option<SimulatedAccelerator>,
}

impl Device {
    pub fn open(backend: Backend, profile: SocProfile) -> Result<Self> {
        let (port, sim) = match backend {
            Backend::Sim | Backend::SimThreaded => {
                let mut config = SimConfig::new(profile);
                if backend == Backend::SimThreaded {
                    config = config.threaded();
                }
                let sim = SimulatedAccelerator::new(config)?;
                (HostPort::Sim(sim.port()), Some(sim))
            }
            Backend::Null => (HostPort::Null(NullPort), None),
            #[cfg(target_arch = "riscv64")]
            Backend::Rocc => (HostPort::Rocc(accel_core::port::RoccPort), None),
            #[cfg(not(target_arch = "riscv64"))]
            Backend::Rocc => anyhow::bail!("the rocc backend needs a riscv64 build"),
        };
        info!(profile = profile.name(), ?backend, "device opened");
        Ok(Self { profile, port, sim })
    }

    pub fn profile(&self) -> SocProfile {
        self.profile
    }

    /// New port on this device.
    pub fn port(&self) -> HostPort {
        self.port.clone()
    }

    /// Logs the model's request counters, if this is a model.
    pub fn log_counters(&self) {
        if let Some(sim) = &self.sim {
            info!(
                profile = self.profile.name(),
                completed = sim.jobs_completed(),
                stalled = sim.jobs_stalled(),
                "device counters"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_backend_skips_polling() {
        let device = Device::open(Backend::Null, SocProfile::CompressorSoc).expect("device");
        assert_eq!(device.port().poll_policy(), PollPolicy::Skip);
    }

    #[test]
    fn test_sim_ports_share_one_device() {
        let device = Device::open(Backend::Sim, SocProfile::SnappyStandalone).expect("device");
        assert!(matches!(device.port(), HostPort::Sim(_)));
        assert_eq!(device.port().poll_policy(), PollPolicy::Spin);
    }
}
