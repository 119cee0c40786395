//! Transport options and their loading from files and environment.
//!
//! Sources are layered, later ones overriding earlier ones:
//!  1. Built-in defaults
//!  2. An optional options file (TOML, YAML or JSON, chosen by extension)
//!  3. Environment variables prefixed `STORAGE_QUEUE__`,
//!     e.g. `STORAGE_QUEUE__PREFETCH_COUNT=16`
//!
//! Durations are expressed in (fractional) seconds in every source.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Prefix of environment variables read by [`TransportOptions::load`]
pub const ENVIRONMENT_PREFIX: &str = "STORAGE_QUEUE";

/// Largest prefetch batch the queue service hands out per call
pub const MAX_PREFETCH_COUNT: u32 = 32;

/// Longest visibility timeout the queue service accepts
pub const MAX_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Behaviour switches of the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Create the input queue at start-up and destinations on demand
    pub automatically_create_queues: bool,

    /// Validate queue names; when false they are only lowercased
    pub validate_queue_names: bool,

    /// Messages fetched per receive call and buffered locally
    pub prefetch_count: Option<u32>,

    /// Keep extending leases of messages that are still being processed
    pub automatic_lease_renewal: bool,

    /// Lease length of fetched messages and extension applied per renewal
    #[serde(with = "duration_secs")]
    pub visibility_timeout: Duration,

    /// Renewer tick, also the time between renewals of one message
    #[serde(with = "duration_secs")]
    pub lease_renewal_interval: Duration,

    /// Turn the deferred-until header into an initial visibility delay
    pub use_native_deferred_messages: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            automatically_create_queues: true,
            validate_queue_names: true,
            prefetch_count: None,
            automatic_lease_renewal: false,
            visibility_timeout: Duration::from_secs(30),
            lease_renewal_interval: Duration::from_secs(10),
            use_native_deferred_messages: true,
        }
    }
}

impl TransportOptions {
    /// Load options from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        Self::load_with_environment(path, environment())
    }

    fn load_with_environment(
        path: Option<&Path>,
        environment: config::Environment,
    ) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let options: Self = builder
            .add_source(environment)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        options.validate()?;
        Ok(options)
    }

    /// Check option values against the queue service limits
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(prefetch) = self.prefetch_count {
            if prefetch == 0 || prefetch > MAX_PREFETCH_COUNT {
                return Err(ConfigurationError::Invalid {
                    message: format!(
                        "prefetch_count must be between 1 and {}, got {}",
                        MAX_PREFETCH_COUNT, prefetch
                    ),
                });
            }
        }

        if self.visibility_timeout.is_zero() || self.visibility_timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "visibility_timeout must be greater than zero and at most 7 days, got {:?}",
                    self.visibility_timeout
                ),
            });
        }

        if self.automatic_lease_renewal {
            if self.lease_renewal_interval.is_zero() {
                return Err(ConfigurationError::Invalid {
                    message: "lease_renewal_interval must be greater than zero".to_string(),
                });
            }

            // A lease may become due just after a tick and is renewed one tick later.
            if self.lease_renewal_interval * 2 >= self.visibility_timeout {
                return Err(ConfigurationError::Invalid {
                    message: format!(
                        "lease_renewal_interval ({:?}) must be less than half of visibility_timeout ({:?})",
                        self.lease_renewal_interval, self.visibility_timeout
                    ),
                });
            }
        }

        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENVIRONMENT_PREFIX)
        .separator("__")
        .try_parsing(true)
}

/// Serialization for `Duration` as fractional seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}
