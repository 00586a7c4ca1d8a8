//! Host Sampler
//!
//! `SystemSampler` backed by the `sysinfo` crate.

use std::time::Instant;

use parking_lot::Mutex;
use sysinfo::{Networks, System};

use crate::domain::SystemSampler;
use crate::error::Result;
use crate::monitoring::{CpuMetrics, MemoryMetrics, NetworkMetrics, SystemMetrics};

struct SamplerState {
    system: System,
    networks: Networks,
    prev_rx: u64,
    prev_tx: u64,
    prev_at: Option<Instant>,
}

/// Samples CPU, memory and network throughput of the local host.
///
/// Network rates are deltas since the previous sample, so the first sample
/// reports zero throughput.
pub struct SysinfoSampler {
    state: Mutex<SamplerState>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();

        Self {
            state: Mutex::new(SamplerState {
                system,
                networks: Networks::new_with_refreshed_list(),
                prev_rx: 0,
                prev_tx: 0,
                prev_at: None,
            }),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler for SysinfoSampler {
    fn sample(&self) -> Result<SystemMetrics> {
        let mut state = self.state.lock();
        state.system.refresh_cpu_usage();
        state.system.refresh_memory();
        state.networks.refresh();

        let cpu = CpuMetrics {
            usage: state.system.global_cpu_usage() as f64,
            load_average: System::load_average().one,
            cores: state.system.cpus().len(),
        };
        let memory = MemoryMetrics::new(state.system.used_memory(), state.system.total_memory());

        let (rx, tx) = state
            .networks
            .iter()
            .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (rx + data.total_received(), tx + data.total_transmitted())
            });

        let now = Instant::now();
        let network = match state.prev_at {
            Some(prev) => {
                let secs = now.duration_since(prev).as_secs_f64().max(f64::EPSILON);
                NetworkMetrics {
                    bytes_in_per_sec: rx.saturating_sub(state.prev_rx) as f64 / secs,
                    bytes_out_per_sec: tx.saturating_sub(state.prev_tx) as f64 / secs,
                }
            }
            None => NetworkMetrics::default(),
        };
        state.prev_rx = rx;
        state.prev_tx = tx;
        state.prev_at = Some(now);

        Ok(SystemMetrics {
            cpu,
            memory,
            network,
        })
    }
}

impl std::fmt::Debug for SysinfoSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoSampler").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_is_plausible() {
        let sampler = SysinfoSampler::new();
        let first = sampler.sample().unwrap();
        assert!(first.cpu.usage >= 0.0);
        assert!(first.memory.usage >= 0.0 && first.memory.usage <= 100.0);
        assert_eq!(first.network, NetworkMetrics::default());

        let second = sampler.sample().unwrap();
        assert!(second.network.bytes_in_per_sec >= 0.0);
    }
}
