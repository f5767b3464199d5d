//! Preconditions that gate when a job may run.
//!
//! A [`RequirementKind`] is a pure predicate over a [`SystemSnapshot`]. The
//! snapshot is published through [`SystemState`], a cheap cloneable handle
//! backed by a `watch` channel, so the scheduler can sleep until the ambient
//! state actually changes instead of polling.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Ambient flags that requirements are evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// A data network is reachable.
    pub network_available: bool,
    /// The decrypted master key is cached in memory.
    pub master_key_cached: bool,
    /// The carrier/radio service is bound and able to send.
    pub service_bound: bool,
}

/// The built-in requirement kinds.
///
/// This is a closed set so that requirement lists can be persisted alongside
/// the job and re-evaluated after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequirementKind {
    NetworkAvailable,
    MasterKeyCached,
    ServiceBound,
    NetworkOrServiceAvailable,
}

impl RequirementKind {
    /// Human-readable tag, used in logs and job status output.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::NetworkAvailable => "network",
            Self::MasterKeyCached => "master-key",
            Self::ServiceBound => "service",
            Self::NetworkOrServiceAvailable => "network-or-service",
        }
    }

    /// Evaluate the predicate. Side-effect free.
    #[must_use]
    pub const fn is_satisfied(self, state: &SystemSnapshot) -> bool {
        match self {
            Self::NetworkAvailable => state.network_available,
            Self::MasterKeyCached => state.master_key_cached,
            Self::ServiceBound => state.service_bound,
            Self::NetworkOrServiceAvailable => state.network_available || state.service_bound,
        }
    }
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Logical AND over a requirement set. An empty set is always satisfied.
#[must_use]
pub fn all_satisfied(requirements: &[RequirementKind], state: &SystemSnapshot) -> bool {
    requirements.iter().all(|r| r.is_satisfied(state))
}

/// Shared, observable ambient state.
#[derive(Debug, Clone)]
pub struct SystemState {
    sender: Arc<watch::Sender<SystemSnapshot>>,
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new(SystemSnapshot::default())
    }
}

impl SystemState {
    #[must_use]
    pub fn new(initial: SystemSnapshot) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Current value of every flag.
    #[must_use]
    pub fn snapshot(&self) -> SystemSnapshot {
        *self.sender.borrow()
    }

    /// Receiver that is marked changed whenever any flag flips.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SystemSnapshot> {
        self.sender.subscribe()
    }

    pub fn set_network_available(&self, available: bool) {
        self.update(|s| &mut s.network_available, available);
    }

    pub fn set_master_key_cached(&self, cached: bool) {
        self.update(|s| &mut s.master_key_cached, cached);
    }

    pub fn set_service_bound(&self, bound: bool) {
        self.update(|s| &mut s.service_bound, bound);
    }

    fn update(&self, field: impl FnOnce(&mut SystemSnapshot) -> &mut bool, value: bool) {
        self.sender.send_if_modified(|snapshot| {
            let flag = field(snapshot);
            let changed = *flag != value;
            *flag = value;
            changed
        });
    }
}
