use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::capabilities;
use super::ids::EntityId;
use crate::error::AvdeccError;

/// Configuration for a local AVDECC entity and its protocol engines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvdeccConfig {
    /// Local entity id (default: 0, meaning derive from the transport MAC)
    pub entity_id: EntityId,

    /// Entity model id advertised in ADP
    pub entity_model_id: u64,

    /// `entity_capabilities` advertised in ADP (default: AEM supported)
    pub entity_capabilities: u32,

    /// Number of stream sources offered as a talker (default: 0)
    pub talker_stream_sources: u16,

    /// `talker_capabilities` advertised in ADP
    pub talker_capabilities: u16,

    /// Number of stream sinks offered as a listener (default: 0)
    pub listener_stream_sinks: u16,

    /// `listener_capabilities` advertised in ADP
    pub listener_capabilities: u16,

    /// `controller_capabilities` advertised in ADP (default: implemented)
    pub controller_capabilities: u32,

    /// gPTP domain number advertised in ADP
    pub gptp_domain_number: u8,

    /// Interval between periodic ENTITY_AVAILABLE messages (default: 2 seconds)
    #[serde(with = "duration_ms")]
    pub advertisement_interval: Duration,

    /// ADP `valid_time` in 2-second units, 1..=31 (default: 31)
    pub valid_time: u8,

    /// Per-attempt AECP command timeout (default: 250ms)
    #[serde(with = "duration_ms")]
    pub aecp_timeout: Duration,

    /// Per-attempt ACMP command timeout (default: 2000ms)
    #[serde(with = "duration_ms")]
    pub acmp_timeout: Duration,

    /// Retransmissions before a command fails with a timeout (default: 2)
    pub max_retries: u8,

    /// Period of the timer task driving advertisements and timeout sweeps (default: 100ms)
    #[serde(with = "duration_ms")]
    pub tick_interval: Duration,

    /// Maximum number of in-flight commands per engine (default: 4096, at most 65535)
    pub max_in_flight: usize,

    /// Listener sinks refuse a second connection while connected (default: true)
    pub listener_exclusive: bool,

    /// Talker sources accept at most one listener (default: false)
    pub talker_exclusive: bool,

    /// LOCK_ENTITY expiry (default: 60 seconds)
    #[serde(with = "duration_ms")]
    pub lock_timeout: Duration,

    /// Capacity of the event broadcast channel (default: 100)
    pub event_capacity: usize,
}

impl Default for AvdeccConfig {
    fn default() -> Self {
        Self {
            entity_id: EntityId::NONE,
            entity_model_id: 0,
            entity_capabilities: capabilities::entity::AEM_SUPPORTED,
            talker_stream_sources: 0,
            talker_capabilities: 0,
            listener_stream_sinks: 0,
            listener_capabilities: 0,
            controller_capabilities: capabilities::controller::IMPLEMENTED,
            gptp_domain_number: 0,
            advertisement_interval: Duration::from_secs(2),
            valid_time: 31,
            aecp_timeout: Duration::from_millis(250),
            acmp_timeout: Duration::from_millis(2000),
            max_retries: 2,
            tick_interval: Duration::from_millis(100),
            max_in_flight: 4096,
            listener_exclusive: true,
            talker_exclusive: false,
            lock_timeout: Duration::from_secs(60),
            event_capacity: 100,
        }
    }
}

impl AvdeccConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> AvdeccConfigBuilder {
        AvdeccConfigBuilder::default()
    }

    /// Parse a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `AvdeccError::Config` if the JSON is malformed or the result is invalid.
    pub fn from_json_str(json: &str) -> Result<Self, AvdeccError> {
        let config: Self = serde_json::from_str(json).map_err(|e| AvdeccError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `AvdeccError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<(), AvdeccError> {
        let fail = |message: &str| {
            Err(AvdeccError::Config {
                message: message.to_string(),
            })
        };
        if self.valid_time == 0 || self.valid_time > 31 {
            return fail("valid_time must be within 1..=31");
        }
        if self.advertisement_interval.is_zero() {
            return fail("advertisement_interval must be non-zero");
        }
        if self.tick_interval.is_zero() {
            return fail("tick_interval must be non-zero");
        }
        if self.aecp_timeout.is_zero() || self.acmp_timeout.is_zero() {
            return fail("command timeouts must be non-zero");
        }
        if self.max_in_flight == 0 || self.max_in_flight > usize::from(u16::MAX) {
            return fail("max_in_flight must be within 1..=65535");
        }
        if self.event_capacity == 0 {
            return fail("event_capacity must be non-zero");
        }
        Ok(())
    }

    /// LOCK_ENTITY expiry in nanoseconds.
    #[must_use]
    pub(crate) fn lock_timeout_ns(&self) -> u64 {
        duration_ns(self.lock_timeout)
    }
}

/// Saturating conversion used for all clock arithmetic.
#[must_use]
pub(crate) fn duration_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Builder for `AvdeccConfig`
#[derive(Debug, Clone, Default)]
pub struct AvdeccConfigBuilder {
    config: AvdeccConfig,
}

impl AvdeccConfigBuilder {
    /// Set the local entity id
    #[must_use]
    pub fn entity_id(mut self, id: impl Into<EntityId>) -> Self {
        self.config.entity_id = id.into();
        self
    }

    /// Set the entity model id
    #[must_use]
    pub fn entity_model_id(mut self, id: u64) -> Self {
        self.config.entity_model_id = id;
        self
    }

    /// Set `entity_capabilities`
    #[must_use]
    pub fn entity_capabilities(mut self, caps: u32) -> Self {
        self.config.entity_capabilities = caps;
        self
    }

    /// Offer `count` stream sources, marking the talker capability implemented
    #[must_use]
    pub fn talker_stream_sources(mut self, count: u16) -> Self {
        self.config.talker_stream_sources = count;
        if count > 0 {
            self.config.talker_capabilities |=
                capabilities::talker::IMPLEMENTED | capabilities::talker::AUDIO_SOURCE;
        }
        self
    }

    /// Offer `count` stream sinks, marking the listener capability implemented
    #[must_use]
    pub fn listener_stream_sinks(mut self, count: u16) -> Self {
        self.config.listener_stream_sinks = count;
        if count > 0 {
            self.config.listener_capabilities |=
                capabilities::listener::IMPLEMENTED | capabilities::listener::AUDIO_SINK;
        }
        self
    }

    /// Set `controller_capabilities`
    #[must_use]
    pub fn controller_capabilities(mut self, caps: u32) -> Self {
        self.config.controller_capabilities = caps;
        self
    }

    /// Set the advertisement interval
    #[must_use]
    pub fn advertisement_interval(mut self, interval: Duration) -> Self {
        self.config.advertisement_interval = interval;
        self
    }

    /// Set ADP `valid_time` (2-second units)
    #[must_use]
    pub fn valid_time(mut self, units: u8) -> Self {
        self.config.valid_time = units;
        self
    }

    /// Set the AECP per-attempt timeout
    #[must_use]
    pub fn aecp_timeout(mut self, timeout: Duration) -> Self {
        self.config.aecp_timeout = timeout;
        self
    }

    /// Set the ACMP per-attempt timeout
    #[must_use]
    pub fn acmp_timeout(mut self, timeout: Duration) -> Self {
        self.config.acmp_timeout = timeout;
        self
    }

    /// Set the retransmission budget
    #[must_use]
    pub fn max_retries(mut self, retries: u8) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set the ticker period
    #[must_use]
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    /// Set the in-flight command capacity
    #[must_use]
    pub fn max_in_flight(mut self, capacity: usize) -> Self {
        self.config.max_in_flight = capacity;
        self
    }

    /// Enforce listener exclusivity
    #[must_use]
    pub fn listener_exclusive(mut self, exclusive: bool) -> Self {
        self.config.listener_exclusive = exclusive;
        self
    }

    /// Enforce talker exclusivity
    #[must_use]
    pub fn talker_exclusive(mut self, exclusive: bool) -> Self {
        self.config.talker_exclusive = exclusive;
        self
    }

    /// Set the lock expiry
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    /// Set the event channel capacity
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Build the config
    #[must_use]
    pub fn build(self) -> AvdeccConfig {
        self.config
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
