use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GridxError;

/// Typed reputation events. An event is pure input: only its effect on a
/// node's score is ever persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationEventKind {
    TaskSuccess,
    TaskFailure,
    TaskTimeout,
    Malicious,
    HealthMilestone,
    UptimeMilestone,
    CommunityContribution,
}

impl ReputationEventKind {
    pub const ALL: [ReputationEventKind; 7] = [
        ReputationEventKind::TaskSuccess,
        ReputationEventKind::TaskFailure,
        ReputationEventKind::TaskTimeout,
        ReputationEventKind::Malicious,
        ReputationEventKind::HealthMilestone,
        ReputationEventKind::UptimeMilestone,
        ReputationEventKind::CommunityContribution,
    ];

    /// Default score delta, overridable per-call or via the rule table.
    pub fn default_delta(&self) -> f64 {
        match self {
            ReputationEventKind::TaskSuccess => 10.0,
            ReputationEventKind::TaskFailure => -5.0,
            ReputationEventKind::TaskTimeout => -10.0,
            ReputationEventKind::Malicious => -50.0,
            ReputationEventKind::HealthMilestone => 2.0,
            ReputationEventKind::UptimeMilestone => 5.0,
            ReputationEventKind::CommunityContribution => 15.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReputationEventKind::TaskSuccess => "task_success",
            ReputationEventKind::TaskFailure => "task_failure",
            ReputationEventKind::TaskTimeout => "task_timeout",
            ReputationEventKind::Malicious => "malicious",
            ReputationEventKind::HealthMilestone => "health_milestone",
            ReputationEventKind::UptimeMilestone => "uptime_milestone",
            ReputationEventKind::CommunityContribution => "community_contribution",
        }
    }
}

impl fmt::Display for ReputationEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReputationEventKind {
    type Err = GridxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task_success" => Ok(ReputationEventKind::TaskSuccess),
            "task_failure" => Ok(ReputationEventKind::TaskFailure),
            "task_timeout" => Ok(ReputationEventKind::TaskTimeout),
            "malicious" => Ok(ReputationEventKind::Malicious),
            "health_milestone" => Ok(ReputationEventKind::HealthMilestone),
            "uptime_milestone" => Ok(ReputationEventKind::UptimeMilestone),
            "community_contribution" => Ok(ReputationEventKind::CommunityContribution),
            other => Err(GridxError::UnknownReputationEvent(other.to_string())),
        }
    }
}
