// how the permutated index space is cut into per-worker shards.
//
// the top log2(W) permutated qubits select the rank and the low
// L = N - log2(W) qubits address the local buffer. simple and general keep a
// single data block per worker, so their page qubits are the top local
// qubits. unit splits the buffer into 2^K / n_u data blocks of 2^B amplitudes
// and pages each block on its own: page qubits sit at the top of the low B
// bits and the bits above them pick the data block.

use crate::config::{PolicyConfig, SimulatorConfig};
use crate::error::{ConfigError, Result};
use crate::permutation::PermutatedQubit;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyKind {
    Simple,
    // workers grouped into units of `processes_per_unit` ranks sharing
    // 2^unit_qubits data blocks
    Unit {
        unit_qubits: usize,
        processes_per_unit: usize,
    },
    General,
}

impl PolicyKind {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyKind::Simple => "simple",
            PolicyKind::Unit { .. } => "unit",
            PolicyKind::General => "general",
        }
    }
}

impl From<&PolicyConfig> for PolicyKind {
    fn from(config: &PolicyConfig) -> Self {
        match *config {
            PolicyConfig::Simple => PolicyKind::Simple,
            PolicyConfig::Unit {
                unit_qubits,
                processes_per_unit,
            } => PolicyKind::Unit {
                unit_qubits,
                processes_per_unit,
            },
            PolicyConfig::General => PolicyKind::General,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDistributionPolicy {
    kind: PolicyKind,
    total_qubits: usize,
    page_qubits: usize,
    nonlocal_qubits: usize,
    num_workers: usize,
}

// general and unit page layouts exist for 1, 2 and 3 page qubits
pub const MAX_PAGE_QUBITS: usize = 3;

fn log2_exact(n: usize) -> Option<usize> {
    if n.is_power_of_two() {
        Some(n.trailing_zeros() as usize)
    } else {
        None
    }
}

impl DataDistributionPolicy {
    pub fn new(
        kind: PolicyKind,
        total_qubits: usize,
        page_qubits: usize,
        num_workers: usize,
    ) -> Result<Self> {
        if total_qubits == 0 {
            return Err(ConfigError::InvalidDistribution("a state needs at least one qubit".into()).into());
        }
        let nonlocal_qubits = log2_exact(num_workers).ok_or_else(|| {
            ConfigError::InvalidDistribution(format!(
                "{} workers is not a power of two",
                num_workers
            ))
        })?;
        if nonlocal_qubits >= total_qubits {
            return Err(ConfigError::InvalidDistribution(format!(
                "{} workers leave no local qubit in a {}-qubit state",
                num_workers, total_qubits
            ))
            .into());
        }
        let local_qubits = total_qubits - nonlocal_qubits;

        let supported = match kind {
            PolicyKind::Simple => local_qubits,
            PolicyKind::General => local_qubits.min(MAX_PAGE_QUBITS),
            PolicyKind::Unit {
                unit_qubits,
                processes_per_unit,
            } => Self::unit_block_qubits(total_qubits, num_workers, unit_qubits, processes_per_unit)?
                .min(MAX_PAGE_QUBITS),
        };
        if page_qubits > supported {
            return Err(ConfigError::UnsupportedPageCount {
                policy: kind.name(),
                requested: page_qubits,
                supported,
            }
            .into());
        }

        Ok(Self {
            kind,
            total_qubits,
            page_qubits,
            nonlocal_qubits,
            num_workers,
        })
    }

    pub fn from_config(config: &SimulatorConfig, num_workers: usize) -> Result<Self> {
        Self::new(
            PolicyKind::from(&config.policy),
            config.total_qubits,
            config.page_qubits,
            num_workers,
        )
    }

    // checks the unit parameters and returns the data block width B
    fn unit_block_qubits(
        total_qubits: usize,
        num_workers: usize,
        unit_qubits: usize,
        processes_per_unit: usize,
    ) -> Result<usize> {
        let rank_qubits_in_unit = log2_exact(processes_per_unit).ok_or_else(|| {
            ConfigError::InvalidDistribution(format!(
                "{} processes per unit is not a power of two",
                processes_per_unit
            ))
        })?;
        if rank_qubits_in_unit > unit_qubits {
            return Err(ConfigError::InvalidDistribution(format!(
                "{} processes cannot share {} unit qubits",
                processes_per_unit, unit_qubits
            ))
            .into());
        }
        if num_workers % processes_per_unit != 0 {
            return Err(ConfigError::InvalidDistribution(format!(
                "{} workers do not split into units of {}",
                num_workers, processes_per_unit
            ))
            .into());
        }
        let global_qubits = log2_exact(num_workers / processes_per_unit).ok_or_else(|| {
            ConfigError::InvalidDistribution(format!(
                "{} units is not a power of two",
                num_workers / processes_per_unit
            ))
        })?;
        if unit_qubits + global_qubits > total_qubits {
            return Err(ConfigError::InvalidDistribution(format!(
                "{} unit qubits and {} global qubits exceed {} qubits",
                unit_qubits, global_qubits, total_qubits
            ))
            .into());
        }
        Ok(total_qubits - unit_qubits - global_qubits)
    }

    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn num_qubits(&self) -> usize {
        self.total_qubits
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn num_local_qubits(&self) -> usize {
        self.total_qubits - self.nonlocal_qubits
    }

    pub fn num_page_qubits(&self) -> usize {
        self.page_qubits
    }

    // local qubits that do not select a page, data block selectors included
    pub fn num_nonpage_local_qubits(&self) -> usize {
        self.num_local_qubits() - self.page_qubits
    }

    // qubits addressing an amplitude inside one page
    pub fn num_in_page_qubits(&self) -> usize {
        self.data_block_qubits() - self.page_qubits
    }

    pub fn num_nonlocal_qubits(&self) -> usize {
        self.nonlocal_qubits
    }

    pub fn global_size(&self) -> usize {
        1 << self.total_qubits
    }

    pub fn local_size(&self) -> usize {
        1 << self.num_local_qubits()
    }

    // pages per data block
    pub fn page_count(&self) -> usize {
        1 << self.page_qubits
    }

    pub fn page_size(&self) -> usize {
        1 << self.num_in_page_qubits()
    }

    // rank owning a permutated global index
    pub fn owner(&self, global_index: usize) -> usize {
        match self.kind {
            PolicyKind::Unit { .. } => {
                let (global, unit, _) = self.split_unit(global_index);
                global * self.processes_per_unit() + self.rank_in_unit_of_value(unit)
            }
            _ => global_index >> self.num_local_qubits(),
        }
    }

    pub fn local_index(&self, global_index: usize) -> usize {
        match self.kind {
            PolicyKind::Unit { .. } => {
                let (_, unit, offset) = self.split_unit(global_index);
                self.data_block_index(unit) * self.data_block_size() + offset
            }
            _ => global_index & (self.local_size() - 1),
        }
    }

    pub fn global_index(&self, rank: usize, local_index: usize) -> usize {
        match self.kind {
            PolicyKind::Unit { .. } => {
                let block = local_index / self.data_block_size();
                let unit = self.rank_in_unit(rank) * self.num_data_blocks() + block;
                let b = self.data_block_qubits();
                (self.unit_of(rank) << (self.num_unit_qubits() + b))
                    | (unit << b)
                    | (local_index % self.data_block_size())
            }
            _ => (rank << self.num_local_qubits()) | local_index,
        }
    }

    pub fn is_page_bit(&self, qubit: PermutatedQubit) -> bool {
        let q = qubit.index();
        q >= self.num_in_page_qubits() && q < self.data_block_qubits()
    }

    pub fn is_local(&self, qubit: PermutatedQubit) -> bool {
        qubit.index() < self.num_local_qubits()
    }

    // qubits selecting a data block within a unit, zero outside the unit policy
    pub fn num_unit_qubits(&self) -> usize {
        match self.kind {
            PolicyKind::Unit { unit_qubits, .. } => unit_qubits,
            _ => 0,
        }
    }

    pub fn processes_per_unit(&self) -> usize {
        match self.kind {
            PolicyKind::Unit {
                processes_per_unit, ..
            } => processes_per_unit,
            _ => 1,
        }
    }

    // data blocks held by one worker
    pub fn num_data_blocks(&self) -> usize {
        match self.kind {
            PolicyKind::Unit {
                unit_qubits,
                processes_per_unit,
            } => (1 << unit_qubits) / processes_per_unit,
            _ => 1,
        }
    }

    // local qubits that pick the data block, above the pages
    pub fn num_block_index_qubits(&self) -> usize {
        self.num_data_blocks().trailing_zeros() as usize
    }

    // B, the width of one data block
    pub fn data_block_qubits(&self) -> usize {
        self.num_local_qubits() - self.num_block_index_qubits()
    }

    pub fn data_block_size(&self) -> usize {
        1 << self.data_block_qubits()
    }

    // value of the global qubits on this rank
    pub fn unit_of(&self, rank: usize) -> usize {
        rank / self.processes_per_unit()
    }

    pub fn rank_in_unit(&self, rank: usize) -> usize {
        rank % self.processes_per_unit()
    }

    // which process of a unit holds a given unit qubit value
    pub fn rank_in_unit_of_value(&self, unit_value: usize) -> usize {
        unit_value / self.num_data_blocks()
    }

    pub fn data_block_index(&self, unit_value: usize) -> usize {
        unit_value % self.num_data_blocks()
    }

    // (global qubit value, unit qubit value, offset inside the block)
    fn split_unit(&self, global_index: usize) -> (usize, usize, usize) {
        let b = self.data_block_qubits();
        let k = self.num_unit_qubits();
        (
            global_index >> (b + k),
            (global_index >> b) & ((1 << k) - 1),
            global_index & (self.data_block_size() - 1),
        )
    }

    pub fn is_consistent(&self) -> bool {
        self.num_page_qubits() + self.num_nonpage_local_qubits() + self.num_nonlocal_qubits()
            == self.total_qubits
            && self.page_count() * self.page_size() == self.data_block_size()
            && self.data_block_size() * self.num_data_blocks() == self.local_size()
            && self.local_size() * self.num_workers == self.global_size()
    }
}

impl fmt::Display for DataDistributionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} policy: {} qubits over {} workers ({} page, {} in-page, {} block, {} nonlocal)",
            self.name(),
            self.total_qubits,
            self.num_workers,
            self.num_page_qubits(),
            self.num_in_page_qubits(),
            self.num_block_index_qubits(),
            self.num_nonlocal_qubits()
        )
    }
}
