/// Adapter and device selection.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    /// Only accept a software adapter.
    pub force_fallback_adapter: bool,
    pub label: Option<String>,
}

impl DeviceConfig {
    /// Software adapter on the backends from `WGPU_BACKEND`, for machines without a GPU.
    pub fn fallback() -> Self {
        Self {
            force_fallback_adapter: true,
            power_preference: wgpu::PowerPreference::LowPower,
            ..Self::from_env()
        }
    }

    /// Picks the backend and power profile from `WGPU_BACKEND` and
    /// `WGPU_POWER_PREF`, falling back to the primary backends and high performance.
    pub fn from_env() -> Self {
        let backends = wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::PRIMARY);
        let power_preference = wgpu::util::power_preference_from_env()
            .unwrap_or(wgpu::PowerPreference::HighPerformance);
        Self {
            backends,
            power_preference,
            force_fallback_adapter: false,
            label: None,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Tuning of a [`StagingPool`](crate::StagingPool).
///
/// Affects pooling only, never the result of an individual transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPoolConfig {
    /// Soft cap on live staging slots.
    pub max_pool_size: usize,
    /// Serialize concurrent callers. When false the pool assumes a single
    /// owner and reports contention instead of waiting.
    pub thread_safe: bool,
    pub label_prefix: String,
}

impl Default for StagingPoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 4,
            thread_safe: true,
            label_prefix: "staging".into(),
        }
    }
}

impl StagingPoolConfig {
    pub(crate) fn sanitized(mut self) -> Self {
        if self.max_pool_size == 0 {
            log::warn!("staging pool `{}`: max_pool_size 0 raised to 1", self.label_prefix);
            self.max_pool_size = 1;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_forces_software_adapter() {
        let cfg = DeviceConfig::fallback();
        assert!(cfg.force_fallback_adapter);
        assert!(!DeviceConfig::from_env().force_fallback_adapter);
    }

    #[test]
    fn pool_defaults() {
        let cfg = StagingPoolConfig::default();
        assert_eq!(cfg.max_pool_size, 4);
        assert!(cfg.thread_safe);
        assert_eq!(cfg.label_prefix, "staging");
    }

    #[test]
    fn zero_pool_size_is_raised() {
        let cfg = StagingPoolConfig {
            max_pool_size: 0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(cfg.max_pool_size, 1);
    }
}
