//! Allocator configuration.

use crate::util::size::{gb, kb, mb, parse_size};

/// Configuration for the allocation facade and its default topology.
#[derive(Debug, Clone)]
pub struct AllocConfig {
    /// Alignment of every block handed out (power of two, default: 256)
    pub alignment: usize,

    /// Size classes for the host pool; larger requests use the page list
    pub host_size_classes: Vec<usize>,

    /// Rounding granularity for large host requests (default: 4 KB)
    pub host_page_size: usize,

    /// Host memory limit (0 = unlimited)
    pub host_memory_limit: usize,

    /// Pinned host memory limit (0 = unlimited)
    pub pinned_memory_limit: usize,

    /// Number of simulated accelerators served by the default topology
    pub accelerator_count: usize,

    /// Capacity of each simulated accelerator or custom device
    pub device_capacity: usize,

    /// Custom device types and how many devices of each exist
    pub custom_devices: Vec<(&'static str, usize)>,

    /// Smallest block the caching allocator hands out
    pub min_block_size: usize,

    /// Requests up to this size round to a power of two (default: 1 MB)
    pub small_bucket_limit: usize,

    /// Larger requests round to a multiple of this (default: 2 MB)
    pub large_bucket_granularity: usize,

    /// Release cached memory and retry once when an allocation fails
    pub retry_on_oom: bool,

    /// During that retry also release sibling strategies of the same place
    pub release_siblings_on_oom: bool,

    /// Enable debug features (memory poisoning on free)
    pub debug_mode: bool,
}

impl Default for AllocConfig {
    fn default() -> Self {
        Self {
            alignment: 256,
            host_size_classes: vec![16, 32, 64, 128, 256, 512, 1024, 2048, 4096],
            host_page_size: kb(4),
            host_memory_limit: 0,
            pinned_memory_limit: 0,
            accelerator_count: 1,
            device_capacity: gb(1),
            custom_devices: Vec::new(),
            min_block_size: 256,
            small_bucket_limit: mb(1),
            large_bucket_granularity: mb(2),
            retry_on_oom: true,
            release_siblings_on_oom: true,
            debug_mode: cfg!(feature = "debug"),
        }
    }
}

impl AllocConfig {
    /// Create a minimal config for testing or constrained environments.
    pub fn minimal() -> Self {
        Self {
            alignment: 64,
            host_size_classes: vec![32, 128, 512, 2048],
            host_page_size: kb(4),
            host_memory_limit: 0,
            pinned_memory_limit: mb(16),
            accelerator_count: 1,
            device_capacity: mb(16),
            custom_devices: Vec::new(),
            min_block_size: 64,
            small_bucket_limit: kb(256),
            large_bucket_granularity: kb(512),
            retry_on_oom: true,
            release_siblings_on_oom: true,
            debug_mode: false,
        }
    }

    /// Create a config optimized for large multi-device workloads.
    pub fn high_performance() -> Self {
        Self {
            alignment: 256,
            host_size_classes: vec![16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192],
            host_page_size: kb(64),
            host_memory_limit: 0,
            pinned_memory_limit: 0,
            accelerator_count: 8,
            device_capacity: gb(16),
            custom_devices: Vec::new(),
            min_block_size: 512,
            small_bucket_limit: mb(1),
            large_bucket_granularity: mb(2),
            retry_on_oom: true,
            release_siblings_on_oom: true,
            debug_mode: false,
        }
    }

    /// Apply `PLACEALLOC_*` environment overrides on top of `self`.
    ///
    /// Recognized variables: `PLACEALLOC_ACCELERATORS`,
    /// `PLACEALLOC_DEVICE_CAPACITY`, `PLACEALLOC_HOST_LIMIT`,
    /// `PLACEALLOC_PINNED_LIMIT` (sizes accept `K`/`M`/`G` suffixes) and
    /// `PLACEALLOC_RETRY` (`0`/`false` disables the retry pass).
    /// Unparsable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        let var = |name: &str| std::env::var(name).ok();

        if let Some(count) = var("PLACEALLOC_ACCELERATORS").and_then(|v| v.trim().parse().ok()) {
            self.accelerator_count = count;
        }
        if let Some(size) = var("PLACEALLOC_DEVICE_CAPACITY").and_then(|v| parse_size(&v)) {
            self.device_capacity = size;
        }
        if let Some(size) = var("PLACEALLOC_HOST_LIMIT").and_then(|v| parse_size(&v)) {
            self.host_memory_limit = size;
        }
        if let Some(size) = var("PLACEALLOC_PINNED_LIMIT").and_then(|v| parse_size(&v)) {
            self.pinned_memory_limit = size;
        }
        if let Some(flag) = var("PLACEALLOC_RETRY") {
            self.retry_on_oom = !matches!(flag.trim().to_lowercase().as_str(), "0" | "false" | "off");
        }
        self
    }

    /// Default config with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Builder pattern: set block alignment.
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Builder pattern: set the number of simulated accelerators.
    pub fn with_accelerators(mut self, count: usize) -> Self {
        self.accelerator_count = count;
        self
    }

    /// Builder pattern: set the per-device capacity.
    pub fn with_device_capacity(mut self, capacity: usize) -> Self {
        self.device_capacity = capacity;
        self
    }

    /// Builder pattern: add a custom device type.
    pub fn with_custom_device(mut self, kind: &'static str, count: usize) -> Self {
        self.custom_devices.push((kind, count));
        self
    }

    /// Builder pattern: set the host memory limit.
    pub fn with_host_limit(mut self, limit: usize) -> Self {
        self.host_memory_limit = limit;
        self
    }

    /// Builder pattern: set the pinned memory limit.
    pub fn with_pinned_limit(mut self, limit: usize) -> Self {
        self.pinned_memory_limit = limit;
        self
    }

    /// Builder pattern: enable or disable the out-of-memory retry pass.
    pub fn with_retry(mut self, enable: bool) -> Self {
        self.retry_on_oom = enable;
        self
    }

    /// Builder pattern: include sibling strategies in the retry pass.
    pub fn with_sibling_release(mut self, enable: bool) -> Self {
        self.release_siblings_on_oom = enable;
        self
    }

    /// Builder pattern: enable debug mode.
    pub fn with_debug(mut self, enable: bool) -> Self {
        self.debug_mode = enable;
        self
    }

    /// Check internal consistency, returning a description of the first
    /// problem found.
    pub fn validate(&self) -> Result<(), String> {
        if !self.alignment.is_power_of_two() {
            return Err(format!("alignment {} is not a power of two", self.alignment));
        }
        if !self.host_page_size.is_power_of_two() {
            return Err(format!("host page size {} is not a power of two", self.host_page_size));
        }
        if self.host_size_classes.is_empty() {
            return Err("host size classes must not be empty".to_string());
        }
        if self.host_size_classes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(format!(
                "host size classes must be strictly ascending: {:?}",
                self.host_size_classes
            ));
        }
        if self.min_block_size == 0 || self.large_bucket_granularity == 0 {
            return Err("bucket sizes must be non-zero".to_string());
        }
        if !self.large_bucket_granularity.is_power_of_two() {
            return Err(format!(
                "large bucket granularity {} is not a power of two",
                self.large_bucket_granularity
            ));
        }
        Ok(())
    }
}
