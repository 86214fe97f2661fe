//! Sector identification

use serde::{Deserialize, Serialize};

/// Sector number within one miner
pub type SectorNumber = u64;

/// Miner actor id owning a sector
pub type MinerId = u64;

/// Seal proof variant a sector was created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegisteredSealProof {
    StackedDrg2KiBV1_1,
    StackedDrg8MiBV1_1,
    StackedDrg512MiBV1_1,
    #[default]
    StackedDrg32GiBV1_1,
    StackedDrg64GiBV1_1,
}

impl RegisteredSealProof {
    /// Sector size in bytes
    pub fn sector_size(self) -> u64 {
        const KIB: u64 = 1 << 10;
        const MIB: u64 = 1 << 20;
        const GIB: u64 = 1 << 30;
        match self {
            Self::StackedDrg2KiBV1_1 => 2 * KIB,
            Self::StackedDrg8MiBV1_1 => 8 * MIB,
            Self::StackedDrg512MiBV1_1 => 512 * MIB,
            Self::StackedDrg32GiBV1_1 => 32 * GIB,
            Self::StackedDrg64GiBV1_1 => 64 * GIB,
        }
    }
}

/// Globally unique sector identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectorId {
    pub miner: MinerId,
    pub number: SectorNumber,
}

impl std::fmt::Display for SectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s-t0{}-{}", self.miner, self.number)
    }
}

/// Reference to the physical sector a task operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorRef {
    pub id: SectorId,
    pub proof_type: RegisteredSealProof,
}

impl SectorRef {
    /// Create a reference with the given proof type
    pub fn new(miner: MinerId, number: SectorNumber, proof_type: RegisteredSealProof) -> Self {
        Self {
            id: SectorId { miner, number },
            proof_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_id_display() {
        let sector = SectorRef::new(1000, 42, RegisteredSealProof::StackedDrg2KiBV1_1);
        assert_eq!(sector.id.to_string(), "s-t01000-42");
        assert_eq!(sector.proof_type.sector_size(), 2048);
    }
}
