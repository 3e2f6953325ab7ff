//! Execution backend selection.
//!
//! Every model load walks an ordered backend list and commits to the first
//! backend that initializes.
//!
//! # Backend Priority
//! 1. **CUDA** - vendor GPU, when built with the `cuda` feature
//! 2. **DirectML** (Windows) / **CoreML** (macOS) - cross-platform GPU
//! 3. **CPU** - always present, always last

use std::fmt;
use std::time::Instant;

use tracing::{debug, info};

/// Hardware execution backend a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExecutionBackend {
    Cuda,
    DirectMl,
    CoreMl,
    Cpu,
}

/// Broad class of a backend, used for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackendClass {
    VendorGpu,
    CrossPlatformGpu,
    Cpu,
}

impl ExecutionBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionBackend::Cuda => "cuda",
            ExecutionBackend::DirectMl => "directml",
            ExecutionBackend::CoreMl => "coreml",
            ExecutionBackend::Cpu => "cpu",
        }
    }

    pub fn class(&self) -> BackendClass {
        match self {
            ExecutionBackend::Cuda => BackendClass::VendorGpu,
            ExecutionBackend::DirectMl | ExecutionBackend::CoreMl => BackendClass::CrossPlatformGpu,
            ExecutionBackend::Cpu => BackendClass::Cpu,
        }
    }

    pub fn is_gpu(&self) -> bool {
        self.class() != BackendClass::Cpu
    }
}

impl fmt::Display for ExecutionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of probing the host for execution backends.
#[derive(Debug, Clone)]
pub struct BackendProbe {
    /// Backends in the order loads try them. Ends with `Cpu`.
    pub order: Vec<ExecutionBackend>,
    pub probe_time_ms: u64,
}

impl BackendProbe {
    /// Log the probe outcome.
    pub fn log(&self) {
        let order: Vec<&str> = self.order.iter().map(|b| b.as_str()).collect();
        info!(
            backends = ?order,
            gpu_available = self.order.first().is_some_and(|b| b.is_gpu()),
            probe_time_ms = self.probe_time_ms,
            "Execution backends probed"
        );
    }
}

/// Builds the backend priority list.
pub struct BackendSelector;

impl BackendSelector {
    /// Order `available` by class and make sure CPU closes the list.
    pub fn prioritize(available: impl IntoIterator<Item = ExecutionBackend>) -> Vec<ExecutionBackend> {
        let mut order: Vec<ExecutionBackend> = available
            .into_iter()
            .filter(|b| *b != ExecutionBackend::Cpu)
            .collect();
        order.sort_by_key(|b| (b.class(), *b));
        order.dedup();
        order.push(ExecutionBackend::Cpu);
        order
    }

    /// Run `is_available` against each candidate backend for this platform.
    pub fn probe(is_available: impl Fn(ExecutionBackend) -> bool) -> BackendProbe {
        let start = Instant::now();
        let available: Vec<ExecutionBackend> = Self::platform_candidates()
            .into_iter()
            .filter(|&backend| {
                let ok = is_available(backend);
                debug!(backend = %backend, available = ok, "Probed execution backend");
                ok
            })
            .collect();

        BackendProbe {
            order: Self::prioritize(available),
            probe_time_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Accelerated backends compiled in for this target.
    fn platform_candidates() -> Vec<ExecutionBackend> {
        #[allow(unused_mut)]
        let mut candidates = Vec::new();

        #[cfg(feature = "cuda")]
        candidates.push(ExecutionBackend::Cuda);

        #[cfg(target_os = "windows")]
        candidates.push(ExecutionBackend::DirectMl);

        #[cfg(target_os = "macos")]
        candidates.push(ExecutionBackend::CoreMl);

        candidates
    }
}
