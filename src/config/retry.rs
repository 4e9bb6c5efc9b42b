use std::time::Duration;

use config::ConfigError;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Basic retry policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Extra rounds over the candidate list after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

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
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    pub fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "retry.{name} base delay {}ms exceeds max delay {}ms",
                self.base_delay_ms, self.max_delay_ms
            ))));
        }
        Ok(())
    }

    /// Delay before round `retry + 1`: exponential, capped, with up to 10%
    /// jitter so a restarted cluster does not reconnect in lockstep.
    pub fn delay_for(
        &self,
        retry: usize,
    ) -> Duration {
        let exp = self.base_delay_ms.saturating_mul(1u64 << retry.min(16));
        let capped = exp.min(self.max_delay_ms);
        let jitter = if capped >= 10 {
            rand::thread_rng().gen_range(0..=capped / 10)
        } else {
            0
        };
        Duration::from_millis(capped.saturating_sub(jitter))
    }
}

/// Divide strategies by purpose
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryPolicies {
    /// Client connects through gateway candidates
    #[serde(default = "default_gateway_policy")]
    pub gateway: BackoffPolicy,

    /// Joining node walks its seed list
    #[serde(default = "default_join_policy")]
    pub join: BackoffPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            gateway: default_gateway_policy(),
            join: default_join_policy(),
        }
    }
}

impl RetryPolicies {
    pub fn validate(&self) -> Result<()> {
        self.gateway.validate("gateway")?;
        self.join.validate("join")?;
        Ok(())
    }
}

fn default_gateway_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 3,
        base_delay_ms: 100,
        max_delay_ms: 2_000,
    }
}
fn default_join_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 10,
        base_delay_ms: 500,
        max_delay_ms: 5_000,
    }
}
fn default_max_retries() -> usize {
    3
}
fn default_base_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    1000
}
