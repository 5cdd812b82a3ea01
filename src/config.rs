//! Configuration types for the pooling coordinator.

use crate::error::{Error, Result};
use crate::types::Host;
use std::collections::HashMap;
use std::time::Duration;

/// Prefix shared by all pooling property keys.
pub const PROPERTY_PREFIX: &str = "pooling";

/// Property key for the number of buckets.
pub const MAX_BUCKETS_KEY: &str = "max.buckets";
/// Property key for how long Start waits for its own heartbeat.
pub const START_HEARTBEAT_KEY: &str = "start.heartbeat.milliseconds";
/// Property key for how long a node stays inactive before restarting.
pub const REACTIVATE_KEY: &str = "reactivate.milliseconds";
/// Property key for how long Query collects identifications.
pub const IDENTIFICATION_KEY: &str = "identification.milliseconds";
/// Property key for how long Query waits for a leader.
pub const LEADER_KEY: &str = "leader.milliseconds";
/// Property key for the heartbeat generation period.
pub const ACTIVE_HEARTBEAT_KEY: &str = "active.heartbeat.milliseconds";
/// Property key for the heartbeat check period.
pub const INTER_HEARTBEAT_KEY: &str = "inter.heartbeat.milliseconds";
/// Property key for the age after which forwarded work is discarded.
pub const FORWARD_EXPIRATION_KEY: &str = "forward.expiration.milliseconds";
/// Property key for the maximum number of forwarding hops.
pub const MAX_HOPS_KEY: &str = "max.hops";

/// Main configuration for a pooling node.
#[derive(Debug, Clone)]
pub struct PoolingConfig {
    /// This node's host identifier.
    pub host: Host,

    /// Internal topic shared by all members of the pool.
    pub topic: String,

    /// Timing and partitioning properties.
    pub properties: PoolingProperties,
}

impl PoolingConfig {
    /// Create a new configuration for the given host and topic.
    pub fn new(host: impl Into<Host>, topic: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            topic: topic.into(),
            properties: PoolingProperties::default(),
        }
    }

    /// Set the pooling properties.
    pub fn with_properties(mut self, properties: PoolingProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Check that the configuration can drive a node.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if self.topic.is_empty() {
            return Err(Error::Config("topic must not be empty".to_string()));
        }
        self.properties.validate()
    }
}

/// Timing constants and limits used by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolingProperties {
    /// Number of buckets in a freshly built assignment.
    pub max_buckets: usize,

    /// How long Start waits for its own heartbeat to come back.
    pub start_heartbeat: Duration,

    /// How long a node stays inactive before restarting the election cycle.
    pub reactivate: Duration,

    /// How long Query collects identifications.
    pub identification: Duration,

    /// How long Query waits for a leader after identification.
    pub leader: Duration,

    /// Period between heartbeats sent by an active node.
    pub active_heartbeat: Duration,

    /// Period between heartbeat checks. Must exceed `active_heartbeat`.
    pub inter_heartbeat: Duration,

    /// Forwarded work older than this is discarded.
    pub forward_expiration: Duration,

    /// Forwarded work that has already travelled this many hops is discarded.
    pub max_hops: u32,
}

impl Default for PoolingProperties {
    fn default() -> Self {
        Self {
            max_buckets: 1024,
            start_heartbeat: Duration::from_secs(10),
            reactivate: Duration::from_secs(50),
            identification: Duration::from_secs(10),
            leader: Duration::from_secs(15),
            active_heartbeat: Duration::from_secs(5),
            inter_heartbeat: Duration::from_secs(15),
            forward_expiration: Duration::from_secs(30),
            max_hops: 3,
        }
    }
}

impl PoolingProperties {
    /// Set the number of buckets.
    pub fn with_max_buckets(mut self, max_buckets: usize) -> Self {
        self.max_buckets = max_buckets;
        self
    }

    /// Set the start heartbeat timeout.
    pub fn with_start_heartbeat(mut self, timeout: Duration) -> Self {
        self.start_heartbeat = timeout;
        self
    }

    /// Set the reactivation delay.
    pub fn with_reactivate(mut self, delay: Duration) -> Self {
        self.reactivate = delay;
        self
    }

    /// Set the identification window.
    pub fn with_identification(mut self, window: Duration) -> Self {
        self.identification = window;
        self
    }

    /// Set the leader wait window.
    pub fn with_leader(mut self, window: Duration) -> Self {
        self.leader = window;
        self
    }

    /// Set the heartbeat generation period.
    pub fn with_active_heartbeat(mut self, period: Duration) -> Self {
        self.active_heartbeat = period;
        self
    }

    /// Set the heartbeat check period.
    pub fn with_inter_heartbeat(mut self, period: Duration) -> Self {
        self.inter_heartbeat = period;
        self
    }

    /// Set the forwarded work expiration.
    pub fn with_forward_expiration(mut self, expiration: Duration) -> Self {
        self.forward_expiration = expiration;
        self
    }

    /// Set the maximum number of forwarding hops.
    pub fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Check that the properties are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_buckets == 0 {
            return Err(Error::Config("max_buckets must be positive".to_string()));
        }

        let timers = [
            ("start_heartbeat", self.start_heartbeat),
            ("reactivate", self.reactivate),
            ("identification", self.identification),
            ("leader", self.leader),
            ("active_heartbeat", self.active_heartbeat),
            ("inter_heartbeat", self.inter_heartbeat),
        ];
        for (name, value) in timers {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be positive", name)));
            }
        }

        // A checker that runs faster than the generator reports healthy
        // nodes as dead.
        if self.inter_heartbeat <= self.active_heartbeat {
            return Err(Error::Config(format!(
                "inter_heartbeat ({:?}) must exceed active_heartbeat ({:?})",
                self.inter_heartbeat, self.active_heartbeat
            )));
        }

        Ok(())
    }

    /// Build properties from flat `pooling.*` key/value pairs.
    ///
    /// A key under `pooling.<controller>.` takes precedence over the same key
    /// under `pooling.`. Missing keys keep their defaults.
    pub fn from_map(props: &HashMap<String, String>, controller: Option<&str>) -> Result<Self> {
        let lookup = |key: &str| -> Option<&String> {
            controller
                .and_then(|c| props.get(&format!("{}.{}.{}", PROPERTY_PREFIX, c, key)))
                .or_else(|| props.get(&format!("{}.{}", PROPERTY_PREFIX, key)))
        };

        let number = |key: &str| -> Result<Option<u64>> {
            match lookup(key) {
                None => Ok(None),
                Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|e| {
                    Error::Config(format!("{}.{}: invalid value {:?}: {}", PROPERTY_PREFIX, key, raw, e))
                }),
            }
        };

        let millis = |key: &str, default: Duration| -> Result<Duration> {
            Ok(number(key)?.map(Duration::from_millis).unwrap_or(default))
        };

        let defaults = Self::default();
        let properties = Self {
            max_buckets: match number(MAX_BUCKETS_KEY)? {
                Some(n) => usize::try_from(n).map_err(|e| {
                    Error::Config(format!("{}.{}: invalid value {}: {}", PROPERTY_PREFIX, MAX_BUCKETS_KEY, n, e))
                })?,
                None => defaults.max_buckets,
            },
            start_heartbeat: millis(START_HEARTBEAT_KEY, defaults.start_heartbeat)?,
            reactivate: millis(REACTIVATE_KEY, defaults.reactivate)?,
            identification: millis(IDENTIFICATION_KEY, defaults.identification)?,
            leader: millis(LEADER_KEY, defaults.leader)?,
            active_heartbeat: millis(ACTIVE_HEARTBEAT_KEY, defaults.active_heartbeat)?,
            inter_heartbeat: millis(INTER_HEARTBEAT_KEY, defaults.inter_heartbeat)?,
            forward_expiration: millis(FORWARD_EXPIRATION_KEY, defaults.forward_expiration)?,
            max_hops: match number(MAX_HOPS_KEY)? {
                Some(n) => u32::try_from(n).map_err(|e| {
                    Error::Config(format!("{}.{}: invalid value {}: {}", PROPERTY_PREFIX, MAX_HOPS_KEY, n, e))
                })?,
                None => defaults.max_hops,
            },
        };

        properties.validate()?;
        Ok(properties)
    }
}
