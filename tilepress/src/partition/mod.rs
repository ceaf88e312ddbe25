//! Static round-robin partition of tiles across ranks.
//!
//! Rank 0 is the collector. With `P = total - 1` producers, producer `r`
//! owns tiles `r-1, r-1+P, r-1+2P, ...`, so tile `t` belongs to rank
//! `t % P + 1`. A single-process run has no producers: the one rank plays
//! both roles and owns every tile.

use thiserror::Error;

/// Invalid rank configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("Total process count must be at least 1")]
    NoProcesses,

    #[error("Rank {rank} out of range for {total} processes")]
    RankOutOfRange { rank: u32, total: u32 },
}

/// What a rank does in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Aggregates tiles and writes the output stream.
    Collector,
    /// Compresses owned tiles and sends them to the collector.
    Producer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Collector => write!(f, "collector"),
            Role::Producer => write!(f, "producer"),
        }
    }
}

/// One rank's place in the partition. Fixed for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankAssignment {
    rank: u32,
    total: u32,
}

impl RankAssignment {
    pub fn new(rank: u32, total: u32) -> Result<Self, PartitionError> {
        if total == 0 {
            return Err(PartitionError::NoProcesses);
        }
        if rank >= total {
            return Err(PartitionError::RankOutOfRange { rank, total });
        }
        Ok(Self { rank, total })
    }

    /// The one rank of a single-process run.
    pub fn standalone() -> Self {
        Self { rank: 0, total: 1 }
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn role(&self) -> Role {
        if self.rank == 0 {
            Role::Collector
        } else {
            Role::Producer
        }
    }

    /// True when one process does everything without a transport.
    pub fn is_standalone(&self) -> bool {
        self.total == 1
    }

    /// Number of producer ranks; 0 for a standalone run.
    pub fn producers(&self) -> u32 {
        self.total - 1
    }

    /// Rank that produces tile `t`. Rank 0 in a standalone run.
    pub fn owner_of(&self, tile: u32) -> u32 {
        owner_of(tile, self.total)
    }

    /// First tile this rank produces.
    pub fn start_index(&self) -> u32 {
        match self.role() {
            Role::Collector => 0,
            Role::Producer => self.rank - 1,
        }
    }

    /// Distance between consecutive tiles this rank produces.
    pub fn stride(&self) -> u32 {
        self.producers().max(1)
    }

    /// Does this rank run image fetch, resample and compress at all?
    pub fn produces_tiles(&self) -> bool {
        self.is_standalone() || self.role() == Role::Producer
    }

    /// Tiles this rank produces out of `num_tiles`.
    pub fn owned_tiles(&self, num_tiles: u32) -> impl Iterator<Item = u32> {
        let start = if self.produces_tiles() {
            self.start_index()
        } else {
            num_tiles
        };
        (start..num_tiles).step_by(self.stride() as usize)
    }
}

/// Rank owning tile `t` among `total` processes.
///
/// # Example
///
/// ```
/// use tilepress::partition::owner_of;
///
/// // Three producers: tiles go round-robin over ranks 1, 2, 3.
/// let owners: Vec<u32> = (0..6).map(|t| owner_of(t, 4)).collect();
/// assert_eq!(owners, vec![1, 2, 3, 1, 2, 3]);
/// ```
pub fn owner_of(tile: u32, total: u32) -> u32 {
    if total <= 1 {
        0
    } else {
        tile % (total - 1) + 1
    }
}
