// gate fusion over a fixed set of local qubits.
//
// gates captured between begin and end are replayed group by group: every
// group is the 2^k amplitudes whose indices differ only in the fused bits, so
// the whole captured sequence runs on a small array that stays in cache.

use crate::error::{ConfigError, Result, StateError};
use crate::gate::GateOp;
use crate::kernel::{self, PauliMasks};
use crate::permutation::PermutatedQubit;
use crate::Amplitude;
use num_complex::Complex;
use rayon::prelude::*;

// compile-time ceiling, sizes the inline group array
pub const MAX_FUSED_QUBITS: usize = 10;

const GROUP_CAPACITY: usize = 1 << MAX_FUSED_QUBITS;

#[derive(Clone, Debug, PartialEq)]
pub struct FusedGateDescriptor {
    op: GateOp,
    // positions inside the fused set, in target order
    targets: Vec<usize>,
    // Pauli strings placed on group bits
    pauli: PauliMasks,
    // controls inside the fused set, as group bits
    inner_control_mask: usize,
    // local controls outside the set, checked against the group base index
    outer_control_mask: usize,
}

impl FusedGateDescriptor {
    pub fn op(&self) -> &GateOp {
        &self.op
    }

    fn apply(&self, group: &mut [Amplitude], base: usize) {
        if base & self.outer_control_mask != self.outer_control_mask {
            return;
        }
        let t = &self.targets;
        let mask = self.inner_control_mask;
        match &self.op {
            GateOp::Matrix(m) => kernel::apply_matrix(group, 0, t[0], mask, m),
            GateOp::Diagonal(d) => kernel::apply_diagonal(group, 0, t[0], mask, d),
            GateOp::Swap => kernel::swap_bits(group, 0, t[0], t[1], mask),
            GateOp::Pauli(_) => kernel::apply_pauli_string(group, 0, mask, &self.pauli),
            GateOp::PauliRotation(_, rotation) => {
                kernel::apply_pauli_rotation(group, 0, mask, &self.pauli, *rotation)
            }
            GateOp::ExponentialSwap(rotation) => {
                kernel::apply_exponential_swap(group, 0, t[0], t[1], mask, *rotation)
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FusionBatcher {
    open: bool,
    // ascending
    qubits: Vec<PermutatedQubit>,
    descriptors: Vec<FusedGateDescriptor>,
}

// spreads the bits of `value` over the given ascending positions
fn deposit_bits(value: usize, positions: &[usize]) -> usize {
    positions
        .iter()
        .enumerate()
        .filter(|(j, _)| value & (1 << j) != 0)
        .fold(0, |acc, (_, &p)| acc | (1 << p))
}

// opens a zero bit at every given ascending position
fn insert_zero_bits(value: usize, positions: &[usize]) -> usize {
    positions.iter().fold(value, |v, &p| {
        let low = v & ((1 << p) - 1);
        ((v >> p) << (p + 1)) | low
    })
}

impl FusionBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn qubits(&self) -> &[PermutatedQubit] {
        &self.qubits
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn begin(&mut self, mut qubits: Vec<PermutatedQubit>, limit: usize) -> Result<()> {
        if self.open {
            return Err(StateError::FusionAlreadyOpen);
        }
        let limit = limit.min(MAX_FUSED_QUBITS);
        if qubits.len() > limit {
            return Err(ConfigError::FusionLimitExceeded {
                requested: qubits.len(),
                limit,
            }
            .into());
        }
        qubits.sort_unstable();
        if let Some(w) = qubits.windows(2).find(|w| w[0] == w[1]) {
            return Err(StateError::DuplicateQubit(w[0].index()));
        }
        self.qubits = qubits;
        self.descriptors.clear();
        self.open = true;
        Ok(())
    }

    pub fn position(&self, qubit: PermutatedQubit) -> Option<usize> {
        self.qubits.binary_search(&qubit).ok()
    }

    pub fn covers(&self, qubits: &[PermutatedQubit]) -> bool {
        self.open && qubits.iter().all(|&q| self.position(q).is_some())
    }

    // records a gate on targets inside the set. `controls` must all be local,
    // nonlocal controls are settled by the caller.
    pub fn capture(&mut self, op: GateOp, targets: &[PermutatedQubit], controls: &[PermutatedQubit]) -> Result<()> {
        let positions = targets
            .iter()
            .map(|&target| {
                self.position(target)
                    .ok_or(StateError::QubitOutsideFusion(target.index()))
            })
            .collect::<Result<Vec<_>>>()?;
        let pauli = match &op {
            GateOp::Pauli(p) | GateOp::PauliRotation(p, _) => p.place(&positions),
            _ => PauliMasks::default(),
        };
        let mut inner_control_mask = 0;
        let mut outer_control_mask = 0;
        for &control in controls {
            match self.position(control) {
                Some(j) => inner_control_mask |= 1 << j,
                None => outer_control_mask |= control.mask(),
            }
        }
        self.descriptors.push(FusedGateDescriptor {
            op,
            targets: positions,
            pauli,
            inner_control_mask,
            outer_control_mask,
        });
        Ok(())
    }

    // replays the captured gates over the whole local array and closes the
    // batch. returns the number of gates that were fused.
    pub fn end(&mut self, amps: &mut [Amplitude]) -> usize {
        if !self.open {
            return 0;
        }
        self.open = false;
        let descriptors = std::mem::take(&mut self.descriptors);
        if !descriptors.is_empty() {
            let bits: Vec<usize> = self.qubits.iter().map(|q| q.index()).collect();
            Self::run(amps, &bits, &descriptors);
        }
        log::trace!("fused {} gates over qubits {:?}", descriptors.len(), self.qubits);
        self.qubits.clear();
        descriptors.len()
    }

    fn run(amps: &mut [Amplitude], bits: &[usize], descriptors: &[FusedGateDescriptor]) {
        let group_len = 1 << bits.len();
        let offsets: Vec<usize> = (0..group_len).map(|j| deposit_bits(j, bits)).collect();
        let size = kernel::chunk_len(amps.len(), bits.last().copied().unwrap_or(0));

        amps.par_chunks_mut(size).enumerate().for_each(|(c, chunk)| {
            let mut storage = [Complex::new(0.0, 0.0); GROUP_CAPACITY];
            let group = &mut storage[..group_len];
            for r in 0..chunk.len() >> bits.len() {
                let base = insert_zero_bits(r, bits);
                for (g, &o) in group.iter_mut().zip(&offsets) {
                    *g = chunk[base | o];
                }
                for descriptor in descriptors {
                    descriptor.apply(group, c * size + base);
                }
                for (g, &o) in group.iter().zip(&offsets) {
                    chunk[base | o] = *g;
                }
            }
        });
    }
}
