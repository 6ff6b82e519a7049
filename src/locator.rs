// classifies permutated qubits relative to one worker's shard

use crate::permutation::PermutatedQubit;
use crate::policy::DataDistributionPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QubitLocation {
    // addresses elements inside a page
    NonPageLocal,
    // selects a page of the local buffer
    PageLocal,
    // selects a data block of the local buffer, unit policy only
    DataBlock,
    // selects the rank
    Nonlocal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageLocator {
    rank: usize,
    local_qubits: usize,
    page_qubits: usize,
    block_qubits: usize,
}

impl PageLocator {
    pub fn new(policy: &DataDistributionPolicy, rank: usize) -> Self {
        Self {
            rank,
            local_qubits: policy.num_local_qubits(),
            page_qubits: policy.num_page_qubits(),
            block_qubits: policy.num_block_index_qubits(),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn local_qubits(&self) -> usize {
        self.local_qubits
    }

    // qubits addressing an amplitude inside one page
    pub fn in_page_qubits(&self) -> usize {
        self.local_qubits - self.block_qubits - self.page_qubits
    }

    pub fn locate(&self, qubit: PermutatedQubit) -> QubitLocation {
        let q = qubit.index();
        if q >= self.local_qubits {
            QubitLocation::Nonlocal
        } else if q >= self.local_qubits - self.block_qubits {
            QubitLocation::DataBlock
        } else if q >= self.in_page_qubits() {
            QubitLocation::PageLocal
        } else {
            QubitLocation::NonPageLocal
        }
    }

    pub fn is_local(&self, qubit: PermutatedQubit) -> bool {
        qubit.index() < self.local_qubits
    }

    // bit of the rank a nonlocal qubit maps to
    pub fn rank_mask(&self, qubit: PermutatedQubit) -> usize {
        debug_assert!(!self.is_local(qubit));
        1 << (qubit.index() - self.local_qubits)
    }

    // value of a nonlocal qubit on this worker
    pub fn rank_bit(&self, qubit: PermutatedQubit) -> bool {
        self.rank & self.rank_mask(qubit) != 0
    }

    // worker holding the other half of a nonlocal qubit
    pub fn partner_rank(&self, qubit: PermutatedQubit) -> usize {
        self.rank ^ self.rank_mask(qubit)
    }

    // bit of the flat page buffer number (data block, then page) a page or
    // data block qubit maps to
    pub fn page_mask(&self, qubit: PermutatedQubit) -> usize {
        debug_assert!(matches!(
            self.locate(qubit),
            QubitLocation::PageLocal | QubitLocation::DataBlock
        ));
        1 << (qubit.index() - self.in_page_qubits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyKind;

    #[test]
    fn test_locate_and_partners() {
        // 6 qubits on 4 workers with 2 page qubits: bits 0-1 in-page, 2-3 page, 4-5 rank
        let policy = DataDistributionPolicy::new(PolicyKind::Simple, 6, 2, 4).unwrap();
        let locator = PageLocator::new(&policy, 2);
        assert_eq!(locator.locate(PermutatedQubit(1)), QubitLocation::NonPageLocal);
        assert_eq!(locator.locate(PermutatedQubit(2)), QubitLocation::PageLocal);
        assert_eq!(locator.locate(PermutatedQubit(3)), QubitLocation::PageLocal);
        assert_eq!(locator.locate(PermutatedQubit(4)), QubitLocation::Nonlocal);
        assert_eq!(locator.page_mask(PermutatedQubit(3)), 0b10);

        assert!(!locator.rank_bit(PermutatedQubit(4)));
        assert!(locator.rank_bit(PermutatedQubit(5)));
        assert_eq!(locator.partner_rank(PermutatedQubit(4)), 3);
        assert_eq!(locator.partner_rank(PermutatedQubit(5)), 0);
    }

    #[test]
    fn test_unit_blocks_sit_above_pages() {
        // N=6, W=4, K=2, n_u=2, P=2: bit 0 in-page, 1-2 page, 3 block, 4-5 rank
        let kind = PolicyKind::Unit {
            unit_qubits: 2,
            processes_per_unit: 2,
        };
        let policy = DataDistributionPolicy::new(kind, 6, 2, 4).unwrap();
        let locator = PageLocator::new(&policy, 1);
        assert_eq!(locator.in_page_qubits(), 1);
        assert_eq!(locator.locate(PermutatedQubit(0)), QubitLocation::NonPageLocal);
        assert_eq!(locator.locate(PermutatedQubit(2)), QubitLocation::PageLocal);
        assert_eq!(locator.locate(PermutatedQubit(3)), QubitLocation::DataBlock);
        assert_eq!(locator.locate(PermutatedQubit(4)), QubitLocation::Nonlocal);
        assert_eq!(locator.page_mask(PermutatedQubit(1)), 0b01);
        assert_eq!(locator.page_mask(PermutatedQubit(3)), 0b100);
        assert!(locator.rank_bit(PermutatedQubit(4)));
    }

    #[test]
    fn test_single_worker_has_no_nonlocal_qubits() {
        let policy = DataDistributionPolicy::new(PolicyKind::Simple, 3, 0, 1).unwrap();
        let locator = PageLocator::new(&policy, 0);
        for q in 0..3 {
            assert_eq!(locator.locate(PermutatedQubit(q)), QubitLocation::NonPageLocal);
        }
    }
}
