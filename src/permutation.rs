// logical <-> permutated qubit bookkeeping.
//
// every worker holds an identical copy of the table and must apply the same
// swaps in the same order. a diverging table is never detected, it only shows
// up as corrupted amplitudes.

use serde::{Deserialize, Serialize};
use std::fmt;

// qubit index as named by the gate layer
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalQubit(pub usize);

// qubit index used for storage addressing
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermutatedQubit(pub usize);

impl LogicalQubit {
    pub fn index(self) -> usize {
        self.0
    }
}

impl PermutatedQubit {
    pub fn index(self) -> usize {
        self.0
    }

    pub fn mask(self) -> usize {
        1 << self.0
    }
}

impl From<usize> for LogicalQubit {
    fn from(q: usize) -> Self {
        LogicalQubit(q)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermutationTable {
    forward: Vec<PermutatedQubit>,
    inverse: Vec<LogicalQubit>,
}

impl PermutationTable {
    pub fn identity(num_qubits: usize) -> Self {
        Self {
            forward: (0..num_qubits).map(PermutatedQubit).collect(),
            inverse: (0..num_qubits).map(LogicalQubit).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.forward.iter().enumerate().all(|(q, p)| p.0 == q)
    }

    // panics on an out-of-range qubit, callers validate first
    pub fn logical_to_physical(&self, q: LogicalQubit) -> PermutatedQubit {
        self.forward[q.0]
    }

    pub fn physical_to_logical(&self, p: PermutatedQubit) -> LogicalQubit {
        self.inverse[p.0]
    }

    // exchanges the meaning of two permutated positions. O(1).
    pub fn swap(&mut self, p1: PermutatedQubit, p2: PermutatedQubit) {
        if p1 == p2 {
            return;
        }
        let q1 = self.inverse[p1.0];
        let q2 = self.inverse[p2.0];
        self.inverse.swap(p1.0, p2.0);
        self.forward[q1.0] = p2;
        self.forward[q2.0] = p1;
        debug_assert!(self.is_consistent());
    }

    // logical basis index -> permutated basis index
    pub fn permutate_bits(&self, logical_index: usize) -> usize {
        self.forward
            .iter()
            .enumerate()
            .filter(|(q, _)| logical_index & (1 << q) != 0)
            .fold(0, |acc, (_, p)| acc | p.mask())
    }

    // permutated basis index -> logical basis index
    pub fn inverse_permutate_bits(&self, permutated_index: usize) -> usize {
        self.inverse
            .iter()
            .enumerate()
            .filter(|(p, _)| permutated_index & (1 << p) != 0)
            .fold(0, |acc, (_, q)| acc | (1 << q.0))
    }

    pub fn is_consistent(&self) -> bool {
        self.forward.len() == self.inverse.len()
            && (0..self.inverse.len()).all(|p| {
                let q = self.inverse[p];
                q.0 < self.forward.len() && self.forward[q.0].0 == p
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (LogicalQubit, PermutatedQubit)> + '_ {
        self.forward
            .iter()
            .enumerate()
            .map(|(q, p)| (LogicalQubit(q), *p))
    }
}

impl fmt::Display for PermutationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (q, p) in self.forward.iter().enumerate() {
            if q > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}:{}", q, p.0)?;
        }
        write!(f, "]")
    }
}
