//! Construction-time tuning for `ChainedHashDict`.

use crate::error::ConfigError;

/// Capacity a dictionary starts with unless configured otherwise.
pub const DEFAULT_INITIAL_CAPACITY: usize = 1;

/// `len / capacity` ratio at which the next `put` doubles the slot array.
pub const DEFAULT_MAX_LOAD_FACTOR: f64 = 1.0;

/// Growth parameters for a dictionary.
///
/// ```
/// use chain_dict::DictConfig;
///
/// let cfg = DictConfig::new()
///     .initial_capacity(16)
///     .max_load_factor(0.75)
///     .validate()
///     .unwrap();
/// assert_eq!(cfg.get_initial_capacity(), 16);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DictConfig {
    initial_capacity: usize,
    max_load_factor: f64,
}

impl DictConfig {
    pub const fn new() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
        }
    }

    /// Number of slots allocated up front. Must be at least 1.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Load factor threshold. Must be finite and strictly positive.
    pub fn max_load_factor(mut self, ratio: f64) -> Self {
        self.max_load_factor = ratio;
        self
    }

    pub fn get_initial_capacity(&self) -> usize {
        self.initial_capacity
    }

    pub fn get_max_load_factor(&self) -> f64 {
        self.max_load_factor
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.initial_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if !self.max_load_factor.is_finite() || self.max_load_factor <= 0.0 {
            return Err(ConfigError::InvalidLoadFactor(self.max_load_factor));
        }
        Ok(self)
    }

    /// True once `len` entries in `capacity` slots have reached the threshold.
    pub(crate) fn should_grow(&self, len: usize, capacity: usize) -> bool {
        len as f64 >= capacity as f64 * self.max_load_factor
    }
}

impl Default for DictConfig {
    fn default() -> Self {
        Self::new()
    }
}
