//! Behaviour version stamps.
//!
//! A stamp is recorded once per checkpoint execution and persisted with its
//! checkpoint record. An execution resumed from a record keeps the behaviour it
//! started with; a fresh checkpoint adopts the current stamp. A gate absent from
//! a stamp runs the old behaviour.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorGate {
    /// Stop before doing anything when the connection's workspace is deleted.
    WorkspaceTombstoneCheck,
    /// Honour the system-wide load-shed backoff before starting work.
    LoadShedBackoff,
    /// Fetch feature flags before acquiring a job.
    FeatureFlagFetch,
    /// Allow the command-style connection check.
    CommandApiCheck,
}

impl BehaviorGate {
    pub const ALL: [BehaviorGate; 4] = [
        BehaviorGate::WorkspaceTombstoneCheck,
        BehaviorGate::LoadShedBackoff,
        BehaviorGate::FeatureFlagFetch,
        BehaviorGate::CommandApiCheck,
    ];

    /// First version that enables the gate.
    pub const fn introduced_in(&self) -> u32 {
        1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStamp {
    gates: BTreeMap<BehaviorGate, u32>,
}

impl VersionStamp {
    /// Every gate at its current version.
    pub fn current() -> Self {
        Self {
            gates: BehaviorGate::ALL
                .iter()
                .map(|gate| (*gate, gate.introduced_in()))
                .collect(),
        }
    }

    /// No gates recorded: every gated decision takes the old path.
    pub fn legacy() -> Self {
        Self::default()
    }

    pub fn with_gate(mut self, gate: BehaviorGate, version: u32) -> Self {
        self.gates.insert(gate, version);
        self
    }

    pub fn without_gate(mut self, gate: BehaviorGate) -> Self {
        self.gates.remove(&gate);
        self
    }

    pub fn version(&self, gate: BehaviorGate) -> Option<u32> {
        self.gates.get(&gate).copied()
    }

    pub fn is_enabled(&self, gate: BehaviorGate) -> bool {
        self.version(gate)
            .is_some_and(|version| version >= gate.introduced_in())
    }
}
