//! Endpoint configuration.

use std::time::Duration;

use crate::error::{ProcwireError, Result};
use crate::protocol::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FRAME_SIZE, MIN_CHUNK_SIZE};

/// Default capacity of the queue between the receive loop and the executor.
pub const DEFAULT_EXECUTOR_QUEUE: usize = 64;

/// Default time a disposed endpoint lets the running operation finish.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration shared by both directions of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Read chunk size. Both peers must agree on it.
    pub chunk_size: usize,
    /// Largest frame accepted before the connection faults.
    pub max_frame_size: usize,
    /// Requests queued for the executor before the receive loop waits.
    pub executor_queue: usize,
    /// How long `dispose` waits for the running operation before aborting it
    /// and closing the write side.
    pub drain_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            executor_queue: DEFAULT_EXECUTOR_QUEUE,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl EndpointConfig {
    /// Check the configuration for values the protocol cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(ProcwireError::InvalidConfig(format!(
                "chunk_size must be at least {MIN_CHUNK_SIZE}, got {}",
                self.chunk_size
            )));
        }
        if self.max_frame_size < self.chunk_size {
            return Err(ProcwireError::InvalidConfig(format!(
                "max_frame_size {} is smaller than chunk_size {}",
                self.max_frame_size, self.chunk_size
            )));
        }
        if self.executor_queue == 0 {
            return Err(ProcwireError::InvalidConfig(
                "executor_queue must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = EndpointConfig::default();
        assert_eq!(config.chunk_size, 2048);
        assert_eq!(config.max_frame_size, 1_073_741_824);
        assert_eq!(config.drain_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_chunk_size_too_small() {
        let config = EndpointConfig {
            chunk_size: 1,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ProcwireError::InvalidConfig(_)));
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn test_smallest_chunk_size_accepted() {
        let config = EndpointConfig {
            chunk_size: 2,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_frame_below_chunk() {
        let config = EndpointConfig {
            chunk_size: 64,
            max_frame_size: 32,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_executor_queue() {
        let config = EndpointConfig {
            executor_queue: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
