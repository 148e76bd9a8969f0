use std::time::Duration;

use crate::config::ExecutorConfig;

/// Absolute ceiling on worker threads, whatever the host or the knobs say.
pub const HARD_CAP: usize = 32;

/// Worker count for a host with `cpu_count` CPUs.
///
/// `ceil(cpu_count * scaling_factor)` clamped to `[1, hard_cap]`. Zero, negative
/// or non-numeric inputs still yield one worker; a `hard_cap` of zero counts
/// as one.
pub fn compute_worker_count(cpu_count: usize, scaling_factor: f64, hard_cap: usize) -> usize {
    let cap = hard_cap.max(1);
    let target = (cpu_count as f64 * scaling_factor).ceil();

    if target.is_nan() || target < 1.0 {
        return 1;
    }
    if target >= cap as f64 {
        return cap;
    }
    target as usize
}

/// Resolved pool parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    pub workers: usize,
    pub drain_timeout: Duration,
}

impl PoolSettings {
    pub fn new(workers: usize, drain_timeout: Duration) -> Self {
        Self {
            workers: workers.clamp(1, HARD_CAP),
            drain_timeout,
        }
    }

    /// Resolve settings from config, falling back to the detected CPU count.
    ///
    /// A fractional `EXECUTOR_CPU_LIMIT` is rounded up to whole CPUs.
    pub fn from_config(cfg: &ExecutorConfig) -> Self {
        let detected = num_cpus::get();
        let cpu_count = cfg
            .cpu_limit
            .map(|limit| limit.ceil() as usize)
            .unwrap_or(detected);

        let workers = compute_worker_count(cpu_count, cfg.scaling_factor, cfg.hard_cap);
        tracing::debug!(
            detected,
            cpu_count,
            scaling_factor = cfg.scaling_factor,
            hard_cap = cfg.hard_cap,
            workers,
            "resolved worker pool size"
        );

        Self::new(workers, cfg.drain_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_and_rounds_up() {
        assert_eq!(compute_worker_count(4, 1.5, 8), 6);
        assert_eq!(compute_worker_count(3, 1.1, 8), 4);
        assert_eq!(compute_worker_count(2, 1.0, 8), 2);
    }

    #[test]
    fn clamps_to_hard_cap() {
        assert_eq!(compute_worker_count(64, 2.0, 8), 8);
        assert_eq!(compute_worker_count(4, f64::INFINITY, 8), 8);
    }

    #[test]
    fn never_returns_zero() {
        assert_eq!(compute_worker_count(0, 1.0, 8), 1);
        assert_eq!(compute_worker_count(4, 0.0, 8), 1);
        assert_eq!(compute_worker_count(4, -3.0, 8), 1);
        assert_eq!(compute_worker_count(4, f64::NAN, 8), 1);
        assert_eq!(compute_worker_count(4, 1.0, 0), 1);
    }

    #[test]
    fn output_stays_in_bounds() {
        for cpus in 1..=96 {
            for factor in [0.1, 0.5, 1.0, 1.5, 2.0, 3.75, 10.0] {
                for cap in [1, 2, 7, 8, 32] {
                    let n = compute_worker_count(cpus, factor, cap);
                    assert!((1..=cap).contains(&n), "{cpus} x {factor} cap {cap} -> {n}");
                }
            }
        }
    }

    #[test]
    fn settings_prefer_the_cpu_override() {
        let cfg = ExecutorConfig {
            cpu_limit: Some(2.5),
            scaling_factor: 2.0,
            hard_cap: 16,
            drain_timeout: Duration::from_secs(1),
        };
        assert_eq!(PoolSettings::from_config(&cfg).workers, 6);
    }

    #[test]
    fn settings_respect_the_global_ceiling() {
        let settings = PoolSettings::new(1000, Duration::from_secs(1));
        assert_eq!(settings.workers, HARD_CAP);
    }
}
