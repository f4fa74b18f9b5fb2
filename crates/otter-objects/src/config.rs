//! Runtime configuration

use otter_heap::HeapConfig;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Collector configuration
    pub heap: HeapConfig,
    /// Memory limit in bytes (default: 512MB)
    pub memory_limit: usize,
    /// Property count above which an object is converted to dictionary mode
    /// (default: 32)
    pub dictionary_threshold: u32,
    /// Chain length above which a layout builds a lookup table instead of
    /// walking its ancestors (default: 8)
    pub linear_search_limit: u32,
    /// Minimum element buffer capacity after growth (default: 8)
    pub min_element_capacity: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heap: HeapConfig::default(),
            memory_limit: 512 * 1024 * 1024, // 512MB
            dictionary_threshold: 32,
            linear_search_limit: 8,
            min_element_capacity: 8,
        }
    }
}

impl RuntimeConfig {
    /// Set the collector configuration
    pub fn with_heap(mut self, heap: HeapConfig) -> Self {
        self.heap = heap;
        self
    }

    /// Set the memory limit
    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Set the dictionary-mode property threshold
    pub fn with_dictionary_threshold(mut self, threshold: u32) -> Self {
        self.dictionary_threshold = threshold.max(1);
        self
    }

    /// Set the linear lookup limit
    pub fn with_linear_search_limit(mut self, limit: u32) -> Self {
        self.linear_search_limit = limit;
        self
    }

    /// Set the minimum element capacity
    pub fn with_min_element_capacity(mut self, capacity: u32) -> Self {
        self.min_element_capacity = capacity.max(1);
        self
    }
}
