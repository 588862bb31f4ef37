use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Exponential backoff policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum number of retries (0 means unlimited retries)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single operation timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_op_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    pub(crate) fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "retry.{name}.timeout_ms must be > 0"
            ))));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "retry.{name}.base_delay_ms {} exceeds max_delay_ms {}",
                self.base_delay_ms, self.max_delay_ms
            ))));
        }
        Ok(())
    }
}

/// Fixed connect-time schedule. Attempt `n` waits `delays_ms[n]`; once the
/// list is exhausted the last delay repeats.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConnectSchedule {
    #[serde(default = "default_connect_delays_ms")]
    pub delays_ms: Vec<u64>,

    /// Maximum number of attempts (0 means unlimited)
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for ConnectSchedule {
    fn default() -> Self {
        Self {
            delays_ms: default_connect_delays_ms(),
            max_attempts: 0,
        }
    }
}

/// Retry policies by operation
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryPolicies {
    /// Opening the duplex channel
    #[serde(default)]
    pub connect: ConnectSchedule,

    /// Sending a subscribe over the duplex channel
    #[serde(default = "default_subscribe_policy")]
    pub subscribe: BackoffPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            connect: ConnectSchedule::default(),
            subscribe: default_subscribe_policy(),
        }
    }
}

impl RetryPolicies {
    pub fn validate(&self) -> Result<()> {
        if self.connect.delays_ms.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "retry.connect.delays_ms cannot be empty".to_string(),
            )));
        }
        self.subscribe.validate("subscribe")?;
        Ok(())
    }
}

fn default_subscribe_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        timeout_ms: 1000,
        base_delay_ms: 50,
        max_delay_ms: 5000,
    }
}
fn default_connect_delays_ms() -> Vec<u64> {
    vec![100, 150, 200]
}
fn default_max_retries() -> usize {
    3
}
fn default_op_timeout_ms() -> u64 {
    100
}
fn default_base_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    1000
}
