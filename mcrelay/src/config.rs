use crate::error::Error;

/// Per-connection parser and read-buffer tuning.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Initial and steady-state read buffer capacity per connection.
    pub min_buffer_size: usize,
    /// Capacity threshold above which the shrink-to-steady-state pass runs.
    pub max_buffer_size: usize,
    /// Route large partially-received frames through the do-not-dump
    /// allocator so frame bodies stay out of core dumps.
    pub use_nodump_allocator: bool,
    /// Number of parsed messages between shrink evaluations.
    pub adjust_interval: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            min_buffer_size: 256,
            max_buffer_size: 4096,
            use_nodump_allocator: false,
            adjust_interval: 10_000,
        }
    }
}

impl ParserConfig {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), Error> {
        if self.min_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "min_buffer_size must be > 0".into(),
            ));
        }
        if self.max_buffer_size < self.min_buffer_size {
            return Err(Error::InvalidConfig(
                "max_buffer_size must be >= min_buffer_size".into(),
            ));
        }
        if self.adjust_interval == 0 {
            return Err(Error::InvalidConfig(
                "adjust_interval must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ParserConfig`] with discoverable methods and `build()` validation.
///
/// # Example
///
/// ```rust
/// use mcrelay::ParserConfigBuilder;
///
/// let config = ParserConfigBuilder::default()
///     .min_buffer_size(512)
///     .max_buffer_size(16384)
///     .use_nodump_allocator(true)
///     .build()
///     .expect("invalid config");
/// ```
#[derive(Default)]
pub struct ParserConfigBuilder {
    config: ParserConfig,
}

impl ParserConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial and steady-state buffer capacity.
    pub fn min_buffer_size(mut self, n: usize) -> Self {
        self.config.min_buffer_size = n;
        self
    }

    /// Set the capacity threshold above which the buffer is shrunk back.
    pub fn max_buffer_size(mut self, n: usize) -> Self {
        self.config.max_buffer_size = n;
        self
    }

    /// Enable or disable the do-not-dump allocator for large frames.
    pub fn use_nodump_allocator(mut self, enable: bool) -> Self {
        self.config.use_nodump_allocator = enable;
        self
    }

    /// Set the number of parsed messages between shrink evaluations.
    pub fn adjust_interval(mut self, n: u64) -> Self {
        self.config.adjust_interval = n;
        self
    }

    /// Validate and build the final [`ParserConfig`].
    pub fn build(self) -> Result<ParserConfig, Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ParserConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_sets_fields() {
        let config = ParserConfigBuilder::new()
            .min_buffer_size(64)
            .max_buffer_size(128)
            .use_nodump_allocator(true)
            .adjust_interval(100)
            .build()
            .unwrap();
        assert_eq!(config.min_buffer_size, 64);
        assert_eq!(config.max_buffer_size, 128);
        assert!(config.use_nodump_allocator);
        assert_eq!(config.adjust_interval, 100);
    }

    #[test]
    fn rejects_zero_min_buffer() {
        assert!(ParserConfigBuilder::new()
            .min_buffer_size(0)
            .build()
            .is_err());
    }

    #[test]
    fn rejects_max_below_min() {
        assert!(ParserConfigBuilder::new()
            .min_buffer_size(1024)
            .max_buffer_size(512)
            .build()
            .is_err());
    }

    #[test]
    fn rejects_zero_interval() {
        assert!(ParserConfigBuilder::new().adjust_interval(0).build().is_err());
    }
}
