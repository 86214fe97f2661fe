//! Sealing task types

use serde::{Deserialize, Serialize};

/// Kind of sealing operation a request performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "seal/v0/addpiece")]
    AddPiece,
    #[serde(rename = "seal/v0/precommit/1")]
    PreCommit1,
    #[serde(rename = "seal/v0/precommit/2")]
    PreCommit2,
    #[serde(rename = "seal/v0/commit/1")]
    Commit1,
    #[serde(rename = "seal/v0/commit/2")]
    Commit2,
    #[serde(rename = "seal/v0/finalize")]
    Finalize,
    #[serde(rename = "seal/v0/fetch")]
    Fetch,
    #[serde(rename = "seal/v0/unseal")]
    Unseal,
    #[serde(rename = "seal/v0/replicaupdate")]
    ReplicaUpdate,
    #[serde(rename = "seal/v0/provereplicaupdate/1")]
    ProveReplicaUpdate1,
    #[serde(rename = "seal/v0/provereplicaupdate/2")]
    ProveReplicaUpdate2,
    #[serde(rename = "seal/v0/regensectorkey")]
    RegenSectorKey,
    #[serde(rename = "seal/v0/finalize/replicaupdate")]
    FinalizeReplicaUpdate,
}

impl TaskType {
    /// Every task type, in pipeline order
    pub const ALL: [TaskType; 13] = [
        TaskType::AddPiece,
        TaskType::PreCommit1,
        TaskType::PreCommit2,
        TaskType::Commit1,
        TaskType::Commit2,
        TaskType::Finalize,
        TaskType::Fetch,
        TaskType::Unseal,
        TaskType::ReplicaUpdate,
        TaskType::ProveReplicaUpdate1,
        TaskType::ProveReplicaUpdate2,
        TaskType::RegenSectorKey,
        TaskType::FinalizeReplicaUpdate,
    ];

    /// Wire name, e.g. `seal/v0/precommit/1`
    pub fn name(self) -> &'static str {
        match self {
            Self::AddPiece => "seal/v0/addpiece",
            Self::PreCommit1 => "seal/v0/precommit/1",
            Self::PreCommit2 => "seal/v0/precommit/2",
            Self::Commit1 => "seal/v0/commit/1",
            Self::Commit2 => "seal/v0/commit/2",
            Self::Finalize => "seal/v0/finalize",
            Self::Fetch => "seal/v0/fetch",
            Self::Unseal => "seal/v0/unseal",
            Self::ReplicaUpdate => "seal/v0/replicaupdate",
            Self::ProveReplicaUpdate1 => "seal/v0/provereplicaupdate/1",
            Self::ProveReplicaUpdate2 => "seal/v0/provereplicaupdate/2",
            Self::RegenSectorKey => "seal/v0/regensectorkey",
            Self::FinalizeReplicaUpdate => "seal/v0/finalize/replicaupdate",
        }
    }

    /// Short label for logs and tables
    pub fn short(self) -> &'static str {
        match self {
            Self::AddPiece => "AP",
            Self::PreCommit1 => "PC1",
            Self::PreCommit2 => "PC2",
            Self::Commit1 => "C1",
            Self::Commit2 => "C2",
            Self::Finalize => "FIN",
            Self::Fetch => "GET",
            Self::Unseal => "UNS",
            Self::ReplicaUpdate => "RU",
            Self::ProveReplicaUpdate1 => "PR1",
            Self::ProveReplicaUpdate2 => "PR2",
            Self::RegenSectorKey => "GSK",
            Self::FinalizeReplicaUpdate => "FRU",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == s || t.short().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown task type: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_matches_serde() {
        for task in TaskType::ALL {
            let json = serde_json::to_string(&task).unwrap();
            assert_eq!(json, format!("\"{}\"", task.name()));
        }
    }

    #[test]
    fn test_parse_by_name_and_short() {
        assert_eq!("seal/v0/commit/2".parse::<TaskType>().unwrap(), TaskType::Commit2);
        assert_eq!("pc1".parse::<TaskType>().unwrap(), TaskType::PreCommit1);
        assert!("seal/v0/bogus".parse::<TaskType>().is_err());
    }
}
