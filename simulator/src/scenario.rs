//! Simulation scenarios.

use serde::{Deserialize, Serialize};

/// A contention scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// What happens to the queue.
    pub kind: ScenarioKind,
    /// Fewest clients the scenario makes sense with.
    pub min_clients: usize,
}

/// Kinds of scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// Every client blocks, holds briefly and releases.
    Fifo,
    /// The first holder crashes without releasing.
    Crash,
    /// Waiters use a bounded wait shorter than the hold.
    Timeout,
    /// The first queued token is deleted from outside.
    ExternalDelete,
}

impl Scenario {
    /// Load a scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "fifo" => Ok(Self::fifo()),
            "crash" => Ok(Self::crash()),
            "timeout" => Ok(Self::timeout()),
            "external-delete" => Ok(Self::external_delete()),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    fn fifo() -> Self {
        Self {
            name: "fifo".to_string(),
            description: "All clients acquire one at a time in queue order".to_string(),
            kind: ScenarioKind::Fifo,
            min_clients: 1,
        }
    }

    fn crash() -> Self {
        Self {
            name: "crash".to_string(),
            description: "Holder crashes; queue resumes after session expiry".to_string(),
            kind: ScenarioKind::Crash,
            min_clients: 2,
        }
    }

    fn timeout() -> Self {
        Self {
            name: "timeout".to_string(),
            description: "Bounded waiters give up and withdraw their tokens".to_string(),
            kind: ScenarioKind::Timeout,
            min_clients: 2,
        }
    }

    fn external_delete() -> Self {
        Self {
            name: "external-delete".to_string(),
            description: "A queued token vanishes out of order".to_string(),
            kind: ScenarioKind::ExternalDelete,
            min_clients: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_known_scenarios() {
        assert_eq!(Scenario::load("fifo").unwrap().kind, ScenarioKind::Fifo);
        assert_eq!(
            Scenario::load("external-delete").unwrap().kind,
            ScenarioKind::ExternalDelete
        );
        assert!(Scenario::load("settle").is_err());
    }
}
