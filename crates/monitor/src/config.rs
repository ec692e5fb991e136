//! Monitor configuration

use serde::{Deserialize, Serialize};

use crate::event::EventKind;

/// Environment variable selecting the [`PersistPolicy`]
pub const PERSIST_POLICY_ENV: &str = "RUNTRACE_PERSIST_POLICY";
/// Environment variable for the per-subscriber channel capacity
pub const CHANNEL_CAPACITY_ENV: &str = "RUNTRACE_CHANNEL_CAPACITY";

const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// When a monitor writes its record to the repository on its own
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistPolicy {
    /// Only on explicit `persist()`
    Manual,
    /// After every event except stream fragments
    #[default]
    Boundaries,
    /// After every event, fragments included
    EveryEvent,
}

impl PersistPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" | "off" => Some(Self::Manual),
            "boundaries" | "boundary" => Some(Self::Boundaries),
            "every_event" | "every-event" | "always" => Some(Self::EveryEvent),
            _ => None,
        }
    }

    /// Whether an event of this kind triggers a write
    pub fn persists(&self, kind: EventKind) -> bool {
        match self {
            Self::Manual => false,
            Self::Boundaries => kind != EventKind::Stream,
            Self::EveryEvent => true,
        }
    }
}

/// Configuration shared by monitors and their manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub persist_policy: PersistPolicy,
    /// Buffer size of channels handed out by `subscribe_channel`
    pub channel_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            persist_policy: PersistPolicy::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl MonitorConfig {
    /// Defaults overridden by `RUNTRACE_PERSIST_POLICY` and
    /// `RUNTRACE_CHANNEL_CAPACITY`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let persist_policy = std::env::var(PERSIST_POLICY_ENV)
            .ok()
            .and_then(|raw| PersistPolicy::parse(&raw))
            .unwrap_or(defaults.persist_policy);
        let channel_capacity = std::env::var(CHANNEL_CAPACITY_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|capacity| *capacity > 0)
            .unwrap_or(defaults.channel_capacity);

        Self {
            persist_policy,
            channel_capacity,
        }
    }

    pub fn with_persist_policy(mut self, persist_policy: PersistPolicy) -> Self {
        self.persist_policy = persist_policy;
        self
    }

    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity.max(1);
        self
    }
}
