use std::{fmt, time::Duration};

use hub_common::{env_opt, env_or};

/// What happens when a device id connects while already registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// The newer connection wins and the older one is closed.
    Replace,
    /// The newer connection is refused while the older one is open.
    Reject,
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            DuplicatePolicy::Replace => "replace",
            DuplicatePolicy::Reject => "reject",
        };
        write!(f, "{value}")
    }
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(DuplicatePolicy::Replace),
            "reject" => Ok(DuplicatePolicy::Reject),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct HeartbeatConfig {
    pub url: Option<String>,
    pub interval: Duration,
}

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub port: u16,
    pub duplicate_policy: DuplicatePolicy,
    pub send_buffer: usize,
    /// `None` keeps offline device state forever.
    pub state_ttl: Option<Duration>,
    pub reap_interval: Duration,
    pub heartbeat: HeartbeatConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: 10000,
            duplicate_policy: DuplicatePolicy::Replace,
            send_buffer: 64,
            state_ttl: None,
            reap_interval: Duration::from_secs(60),
            heartbeat: HeartbeatConfig {
                url: None,
                interval: Duration::from_secs(600),
            },
        }
    }
}

impl HubConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let duplicate_policy = env_or("DUPLICATE_DEVICE_POLICY", defaults.duplicate_policy);
        let state_ttl_secs = env_or("DEVICE_STATE_TTL_SECS", 0u64);
        let reap_interval_secs = env_or("DEVICE_REAP_INTERVAL_SECS", 60u64).max(1);
        let heartbeat_interval_secs = env_or("HEARTBEAT_INTERVAL_SECS", 600u64).max(1);

        Self {
            port: env_or("PORT", defaults.port),
            duplicate_policy,
            send_buffer: env_or("DEVICE_SEND_BUFFER", defaults.send_buffer).max(1),
            state_ttl: (state_ttl_secs > 0).then(|| Duration::from_secs(state_ttl_secs)),
            reap_interval: Duration::from_secs(reap_interval_secs),
            heartbeat: HeartbeatConfig {
                url: env_opt("HEARTBEAT_URL"),
                interval: Duration::from_secs(heartbeat_interval_secs),
            },
        }
    }
}
