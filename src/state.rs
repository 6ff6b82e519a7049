// distributed state vector: one shard per worker, every worker runs the same
// sequence of calls. collectives close an open fusion batch before they read
// the amplitudes.

use crate::buffer::LocalBuffer;
use crate::config::SimulatorConfig;
use crate::error::{ConfigError, Result, StateError};
use crate::fusion::FusionBatcher;
use crate::gate::{Gate, GateKind, GateOp, Pauli, PauliString, Phase, SymbolTable};
use crate::kernel;
use crate::locator::PageLocator;
use crate::permutation::{LogicalQubit, PermutatedQubit, PermutationTable};
use crate::policy::DataDistributionPolicy;
use crate::swap::{SwapEngine, SwapPath};
use crate::transport::{Transport, TransportStats};
use crate::{Amplitude, Real};
use log::{debug, info, trace, warn};
use num_complex::Complex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

// outcome probabilities below this are treated as zero
const ZERO_PROBABILITY: f64 = 1e-12;

pub struct DistributedState<T: Transport> {
    config: SimulatorConfig,
    policy: DataDistributionPolicy,
    table: PermutationTable,
    buffer: LocalBuffer,
    swapper: SwapEngine,
    fusion: FusionBatcher,
    transport: T,
    // only rank 0 draws, results are broadcast
    rng: ChaCha8Rng,
}

impl<T: Transport> DistributedState<T> {
    // every worker constructs with the same configuration. the state starts
    // as |0...0>.
    pub fn new(config: SimulatorConfig, transport: T) -> Result<Self> {
        config.validate()?;
        let policy = DataDistributionPolicy::from_config(&config, transport.size())?;
        let buffer = LocalBuffer::new(
            policy.num_local_qubits(),
            policy.num_page_qubits(),
            policy.num_block_index_qubits(),
        )?;
        let swapper = SwapEngine::new(PageLocator::new(&policy, transport.rank()));
        let rng = ChaCha8Rng::seed_from_u64(config.seed);

        if transport.is_root() {
            info!("{}", policy);
        }
        debug!(
            "worker {} holds {} amplitudes in {} data blocks of {} pages",
            transport.rank(),
            buffer.size(),
            buffer.num_data_blocks(),
            buffer.pages_per_block()
        );

        let mut state = Self {
            table: PermutationTable::identity(config.total_qubits),
            config,
            policy,
            buffer,
            swapper,
            fusion: FusionBatcher::new(),
            transport,
            rng,
        };
        state.reset();
        Ok(state)
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn policy(&self) -> &DataDistributionPolicy {
        &self.policy
    }

    pub fn permutation(&self) -> &PermutationTable {
        &self.table
    }

    pub fn local_amplitudes(&self) -> &[Amplitude] {
        self.buffer.as_slice()
    }

    pub fn buffer(&self) -> &LocalBuffer {
        &self.buffer
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_stats(&self) -> TransportStats {
        self.transport.stats()
    }

    pub fn rank(&self) -> usize {
        self.transport.rank()
    }

    pub fn num_workers(&self) -> usize {
        self.transport.size()
    }

    pub fn num_qubits(&self) -> usize {
        self.config.total_qubits
    }

    pub fn is_fusing(&self) -> bool {
        self.fusion.is_open()
    }

    fn check_qubit(&self, qubit: usize) -> Result<LogicalQubit> {
        if qubit >= self.num_qubits() {
            return Err(StateError::QubitOutOfRange {
                qubit,
                num_qubits: self.num_qubits(),
            });
        }
        Ok(LogicalQubit(qubit))
    }

    fn physical(&self, qubit: LogicalQubit) -> PermutatedQubit {
        self.table.logical_to_physical(qubit)
    }

    // back to |0...0> with the identity permutation. local, drops an open batch.
    pub fn reset(&mut self) {
        self.table = PermutationTable::identity(self.num_qubits());
        self.fusion = FusionBatcher::new();
        self.buffer.fill_zero();
        if self.transport.is_root() {
            self.buffer[0] = Complex::new(1.0, 0.0);
        }
    }

    // takes the full state in logical order, each worker keeps its own shard
    pub fn load_amplitudes(&mut self, amplitudes: &[Amplitude]) -> Result<&mut Self> {
        self.end_fusion()?;
        if amplitudes.len() != self.policy.global_size() {
            return Err(StateError::DimensionMismatch {
                expected: self.policy.global_size(),
                actual: amplitudes.len(),
            });
        }
        let rank = self.rank();
        for i in 0..self.buffer.size() {
            let global = self.policy.global_index(rank, i);
            self.buffer[i] = amplitudes[self.table.inverse_permutate_bits(global)];
        }
        Ok(self)
    }

    pub fn apply(&mut self, gate: &Gate, symbols: &SymbolTable) -> Result<&mut Self> {
        gate.validate(self.num_qubits())?;
        let op = gate.resolve(symbols)?;
        if self.fusion.is_open() {
            if self.try_fuse(gate, op)? {
                return Ok(self);
            }
            self.end_fusion()?;
        }
        self.apply_direct(gate, op)?;
        Ok(self)
    }

    fn try_fuse(&mut self, gate: &Gate, op: GateOp) -> Result<bool> {
        let targets: Vec<_> = gate.targets.iter().map(|&q| self.physical(q)).collect();
        if !self.fusion.covers(&targets) {
            return Ok(false);
        }
        let locator = self.swapper.locator();
        let mut local_controls = Vec::with_capacity(gate.controls.len());
        for &control in &gate.controls {
            let p = self.physical(control);
            if locator.is_local(p) {
                local_controls.push(p);
            } else if !locator.rank_bit(p) {
                // the control is 0 on every amplitude this worker holds
                return Ok(true);
            }
        }
        self.fusion.capture(op, &targets, &local_controls)?;
        Ok(true)
    }

    fn apply_direct(&mut self, gate: &Gate, op: GateOp) -> Result<()> {
        if op == GateOp::Swap && gate.controls.is_empty() {
            self.swapper.swap_qubits(
                &mut self.table,
                &mut self.buffer,
                &self.transport,
                gate.targets[0],
                gate.targets[1],
                self.config.swap_via_permutation,
            )?;
            return Ok(());
        }

        self.swapper.make_local(
            &mut self.table,
            &mut self.buffer,
            &self.transport,
            &gate.targets,
            &gate.controls,
        )?;

        let locator = self.swapper.locator();
        let mut control_mask = 0;
        for &control in &gate.controls {
            let p = self.table.logical_to_physical(control);
            if locator.is_local(p) {
                control_mask |= p.mask();
            } else if !locator.rank_bit(p) {
                return Ok(());
            }
        }

        let positions: Vec<usize> = gate.targets.iter().map(|&q| self.physical(q).index()).collect();
        let target = positions[0];
        let amps = self.buffer.as_mut_slice();
        match op {
            GateOp::Matrix(m) => kernel::par_apply_matrix(amps, target, control_mask, &m),
            GateOp::Diagonal(d) => kernel::par_apply_diagonal(amps, target, control_mask, &d),
            GateOp::Swap => kernel::par_swap_bits(amps, target, positions[1], control_mask),
            GateOp::Pauli(p) => kernel::par_apply_pauli_string(amps, control_mask, &p.place(&positions)),
            GateOp::PauliRotation(p, rotation) => {
                kernel::par_apply_pauli_rotation(amps, control_mask, &p.place(&positions), rotation)
            }
            GateOp::ExponentialSwap(rotation) => {
                kernel::par_apply_exponential_swap(amps, target, positions[1], control_mask, rotation)
            }
        }
        Ok(())
    }

    fn gate(&mut self, gate: Gate) -> Result<&mut Self> {
        self.apply(&gate, &SymbolTable::new())
    }

    pub fn apply_adjoint(&mut self, gate: &Gate, symbols: &SymbolTable) -> Result<&mut Self> {
        self.apply(&gate.clone().adjoint(), symbols)
    }

    pub fn identity(&mut self, qubit: usize) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::Identity, qubit))
    }

    pub fn pauli_x(&mut self, qubit: usize) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::PauliX, qubit))
    }

    pub fn pauli_y(&mut self, qubit: usize) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::PauliY, qubit))
    }

    pub fn pauli_z(&mut self, qubit: usize) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::PauliZ, qubit))
    }

    pub fn hadamard(&mut self, qubit: usize) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::Hadamard, qubit))
    }

    pub fn s_gate(&mut self, qubit: usize) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::S, qubit))
    }

    pub fn t_gate(&mut self, qubit: usize) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::T, qubit))
    }

    pub fn sqrt_pauli_x(&mut self, qubit: usize) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::SqrtX, qubit))
    }

    pub fn phase_shift(&mut self, qubit: usize, phase: f64) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::PhaseShift(Phase::Constant(phase)), qubit))
    }

    pub fn rotation_x(&mut self, qubit: usize, theta: f64) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::RotationX(Phase::Constant(theta)), qubit))
    }

    pub fn rotation_y(&mut self, qubit: usize, theta: f64) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::RotationY(Phase::Constant(theta)), qubit))
    }

    pub fn rotation_z(&mut self, qubit: usize, theta: f64) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::RotationZ(Phase::Constant(theta)), qubit))
    }

    pub fn u2(&mut self, qubit: usize, phi: f64, lambda: f64) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::U2(phi.into(), lambda.into()), qubit))
    }

    pub fn u3(&mut self, qubit: usize, theta: f64, phi: f64, lambda: f64) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::U3(theta.into(), phi.into(), lambda.into()), qubit))
    }

    pub fn controlled_not(&mut self, target: usize, control: usize) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::PauliX, target).with_controls(&[control]))
    }

    pub fn controlled_phase_shift(&mut self, target: usize, control: usize, phase: f64) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::PhaseShift(Phase::Constant(phase)), target).with_controls(&[control]))
    }

    pub fn multi_controlled(&mut self, kind: GateKind, target: usize, controls: &[usize]) -> Result<&mut Self> {
        self.gate(Gate::single(kind, target).with_controls(controls))
    }

    pub fn sqrt_pauli_y(&mut self, qubit: usize) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::SqrtY, qubit))
    }

    pub fn sqrt_pauli_z(&mut self, qubit: usize) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::SqrtZ, qubit))
    }

    pub fn x_rotation_half_pi(&mut self, qubit: usize) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::XRotationHalfPi, qubit))
    }

    pub fn y_rotation_half_pi(&mut self, qubit: usize) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::YRotationHalfPi, qubit))
    }

    pub fn controlled_v(&mut self, target: usize, control: usize, phase: f64) -> Result<&mut Self> {
        self.gate(Gate::single(GateKind::V(phase.into()), target).with_controls(&[control]))
    }

    pub fn pauli_xn(&mut self, qubits: &[usize]) -> Result<&mut Self> {
        self.gate(Gate::new(GateKind::PauliXn, qubits))
    }

    pub fn pauli_yn(&mut self, qubits: &[usize]) -> Result<&mut Self> {
        self.gate(Gate::new(GateKind::PauliYn, qubits))
    }

    pub fn pauli_zn(&mut self, qubits: &[usize]) -> Result<&mut Self> {
        self.gate(Gate::new(GateKind::PauliZn, qubits))
    }

    // exp(i theta X) on one qubit, exponential_pauli_xn for X..X
    pub fn exponential_pauli_x(&mut self, qubit: usize, theta: f64) -> Result<&mut Self> {
        self.exponential_pauli_xn(&[qubit], theta)
    }

    pub fn exponential_pauli_y(&mut self, qubit: usize, theta: f64) -> Result<&mut Self> {
        self.exponential_pauli_yn(&[qubit], theta)
    }

    pub fn exponential_pauli_z(&mut self, qubit: usize, theta: f64) -> Result<&mut Self> {
        self.exponential_pauli_zn(&[qubit], theta)
    }

    pub fn exponential_pauli_xn(&mut self, qubits: &[usize], theta: f64) -> Result<&mut Self> {
        self.gate(Gate::new(GateKind::ExponentialPauliX(theta.into()), qubits))
    }

    pub fn exponential_pauli_yn(&mut self, qubits: &[usize], theta: f64) -> Result<&mut Self> {
        self.gate(Gate::new(GateKind::ExponentialPauliY(theta.into()), qubits))
    }

    pub fn exponential_pauli_zn(&mut self, qubits: &[usize], theta: f64) -> Result<&mut Self> {
        self.gate(Gate::new(GateKind::ExponentialPauliZ(theta.into()), qubits))
    }

    pub fn exponential_swap(&mut self, a: usize, b: usize, theta: f64) -> Result<&mut Self> {
        self.gate(Gate::new(GateKind::ExponentialSwap(theta.into()), &[a, b]))
    }

    // a random Pauli on every qubit, X with weight px, Y with py, Z with pz.
    // rank 0 draws the choices and broadcasts them.
    pub fn depolarizing_channel(&mut self, px: f64, py: f64, pz: f64) -> Result<&mut Self> {
        let total = px + py + pz;
        if !(px >= 0.0 && py >= 0.0 && pz >= 0.0 && total > 0.0) {
            return Err(StateError::InvalidProbabilities { px, py, pz });
        }
        let n = self.num_qubits();
        let draws = if self.transport.is_root() {
            (0..n)
                .map(|_| {
                    let r = self.rng.gen::<f64>() * total;
                    if r < px {
                        0
                    } else if r < px + py {
                        1
                    } else {
                        2
                    }
                })
                .collect()
        } else {
            Vec::new()
        };
        let draws = self.transport.broadcast(draws)?;
        if draws.len() != n {
            return Err(StateError::DimensionMismatch {
                expected: n,
                actual: draws.len(),
            });
        }
        for (qubit, &draw) in draws.iter().enumerate() {
            let kind = match draw {
                0 => GateKind::PauliX,
                1 => GateKind::PauliY,
                _ => GateKind::PauliZ,
            };
            self.gate(Gate::single(kind, qubit))?;
        }
        trace!("depolarizing draws {:?}", draws);
        Ok(self)
    }

    // SWAP gate, realised as configured
    pub fn swap(&mut self, a: usize, b: usize) -> Result<&mut Self> {
        self.gate(Gate::new(GateKind::Swap, &[a, b]))
    }

    // SWAP gate with the realisation chosen by the caller
    pub fn swap_qubits(&mut self, a: usize, b: usize, via_permutation: bool) -> Result<SwapPath> {
        let (a, b) = (self.check_qubit(a)?, self.check_qubit(b)?);
        if a == b {
            return Err(StateError::DuplicateQubit(a.index()));
        }
        self.end_fusion()?;
        self.swapper.swap_qubits(
            &mut self.table,
            &mut self.buffer,
            &self.transport,
            a,
            b,
            via_permutation,
        )
    }

    pub fn begin_fusion(&mut self, qubits: &[usize]) -> Result<&mut Self> {
        if self.fusion.is_open() {
            return Err(StateError::FusionAlreadyOpen);
        }
        let mut logical = Vec::with_capacity(qubits.len());
        for &q in qubits {
            let q = self.check_qubit(q)?;
            if logical.contains(&q) {
                return Err(StateError::DuplicateQubit(q.index()));
            }
            logical.push(q);
        }
        let limit = self.config.fusion_qubit_limit.min(self.policy.num_local_qubits());
        if logical.len() > limit {
            return Err(ConfigError::FusionLimitExceeded {
                requested: logical.len(),
                limit,
            }
            .into());
        }
        self.swapper
            .make_local(&mut self.table, &mut self.buffer, &self.transport, &logical, &[])?;
        let permutated = logical.iter().map(|&q| self.physical(q)).collect();
        self.fusion.begin(permutated, limit)?;
        trace!("worker {} fusing {:?}", self.rank(), self.fusion.qubits());
        Ok(self)
    }

    // no-op without an open batch
    pub fn end_fusion(&mut self) -> Result<&mut Self> {
        if self.fusion.is_open() {
            let fused = self.fusion.end(self.buffer.as_mut_slice());
            trace!("worker {} applied {} fused gates", self.rank(), fused);
        }
        Ok(self)
    }

    // local sums of |amp|^2 with the qubit at 0 and at 1
    fn local_probabilities(&self, qubit: PermutatedQubit) -> [f64; 2] {
        let locator = self.swapper.locator();
        if locator.is_local(qubit) {
            let mask = qubit.mask();
            self.buffer
                .as_slice()
                .par_iter()
                .enumerate()
                .fold(
                    || [0.0f64; 2],
                    |mut acc, (i, a)| {
                        acc[(i & mask != 0) as usize] += a.norm_sqr() as f64;
                        acc
                    },
                )
                .reduce(|| [0.0; 2], |a, b| [a[0] + b[0], a[1] + b[1]])
        } else {
            let total = self.local_norm_squared();
            if locator.rank_bit(qubit) {
                [0.0, total]
            } else {
                [total, 0.0]
            }
        }
    }

    fn local_norm_squared(&self) -> f64 {
        self.buffer.as_slice().par_iter().map(|a| a.norm_sqr() as f64).sum()
    }

    fn qubit_probabilities(&mut self, qubit: LogicalQubit) -> Result<[f64; 2]> {
        self.end_fusion()?;
        let local = self.local_probabilities(self.physical(qubit));
        let total = self.transport.all_reduce_sum(&local)?;
        Ok([total[0], total[1]])
    }

    // keeps the half where the qubit equals `value` and renormalises it
    fn collapse(&mut self, qubit: PermutatedQubit, value: bool, probability: f64) {
        let scale = if probability > ZERO_PROBABILITY {
            (1.0 / probability.sqrt()) as Real
        } else {
            warn!(
                "collapsing permutated qubit {} onto an outcome of probability {:e}",
                qubit.index(),
                probability
            );
            1.0
        };
        let zero = Complex::new(0.0, 0.0);
        let locator = *self.swapper.locator();
        let amps = self.buffer.as_mut_slice();
        if locator.is_local(qubit) {
            let mask = qubit.mask();
            amps.par_iter_mut().enumerate().for_each(|(i, a)| {
                if (i & mask != 0) == value {
                    *a *= scale;
                } else {
                    *a = zero;
                }
            });
        } else if locator.rank_bit(qubit) == value {
            amps.par_iter_mut().for_each(|a| *a *= scale);
        } else {
            amps.par_iter_mut().for_each(|a| *a = zero);
        }
    }

    pub fn projective_measurement(&mut self, qubit: usize) -> Result<u8> {
        let q = self.check_qubit(qubit)?;
        let [p0, p1] = self.qubit_probabilities(q)?;
        let draw = if self.transport.is_root() {
            let r: f64 = self.rng.gen();
            vec![(r * (p0 + p1) < p1) as u64]
        } else {
            Vec::new()
        };
        let outcome = self.transport.broadcast(draw)?.first().copied().unwrap_or(0) as u8;
        let probability = if outcome == 1 { p1 } else { p0 };
        self.collapse(self.physical(q), outcome == 1, probability);
        debug!("qubit {} measured {} (p = {:.6})", qubit, outcome, probability);
        Ok(outcome)
    }

    // projects onto |0>
    pub fn clear(&mut self, qubit: usize) -> Result<&mut Self> {
        let q = self.check_qubit(qubit)?;
        let [p0, _] = self.qubit_probabilities(q)?;
        self.collapse(self.physical(q), false, p0);
        Ok(self)
    }

    // projects onto |1>
    pub fn set(&mut self, qubit: usize) -> Result<&mut Self> {
        let q = self.check_qubit(qubit)?;
        let [_, p1] = self.qubit_probabilities(q)?;
        self.collapse(self.physical(q), true, p1);
        Ok(self)
    }

    pub fn probability_one(&mut self, qubit: usize) -> Result<Real> {
        let q = self.check_qubit(qubit)?;
        let [p0, p1] = self.qubit_probabilities(q)?;
        if p0 + p1 <= 0.0 {
            // a zero-norm state left behind by clear or set
            return Ok(0.0);
        }
        Ok((p1 / (p0 + p1)) as Real)
    }

    pub fn expectation_value_z(&mut self, qubit: usize) -> Result<Real> {
        let q = self.check_qubit(qubit)?;
        let [p0, p1] = self.qubit_probabilities(q)?;
        Ok((p0 - p1) as Real)
    }

    pub fn norm_squared(&mut self) -> Result<Real> {
        self.end_fusion()?;
        let local = self.local_norm_squared();
        Ok(self.transport.all_reduce_scalar(local)? as Real)
    }

    // <S_x>, <S_y>, <S_z> of one qubit, i.e. half the Pauli expectation values
    pub fn spin_expectation_value(&mut self, qubit: usize) -> Result<[Real; 3]> {
        let q = self.check_qubit(qubit)?;
        self.end_fusion()?;
        self.swapper
            .make_local(&mut self.table, &mut self.buffer, &self.transport, &[q], &[])?;
        let t = self.physical(q).mask();
        let amps = self.buffer.as_slice();
        let local = (0..amps.len())
            .into_par_iter()
            .filter(|i| i & t == 0)
            .fold(
                || [0.0f64; 3],
                |mut acc, i| {
                    let (a0, a1) = (amps[i], amps[i | t]);
                    let product = a0.conj() * a1;
                    acc[0] += product.re as f64;
                    acc[1] += product.im as f64;
                    acc[2] += (a0.norm_sqr() - a1.norm_sqr()) as f64;
                    acc
                },
            )
            .reduce(|| [0.0; 3], |a, b| [a[0] + b[0], a[1] + b[1], a[2] + b[2]]);
        let total = self.transport.all_reduce_sum(&local)?;
        Ok([total[0] as Real, total[1] as Real, (total[2] * 0.5) as Real])
    }

    // <psi|P|psi> for a Pauli operator on the given qubits
    pub fn expectation_value_pauli(&mut self, operator: &[(usize, Pauli)]) -> Result<Real> {
        let mut qubits = Vec::with_capacity(operator.len());
        for &(q, _) in operator {
            let q = self.check_qubit(q)?;
            if qubits.contains(&q) {
                return Err(StateError::DuplicateQubit(q.index()));
            }
            qubits.push(q);
        }
        self.end_fusion()?;
        let paulis: Vec<Pauli> = operator.iter().map(|&(_, p)| p).collect();
        self.swapper
            .make_local(&mut self.table, &mut self.buffer, &self.transport, &qubits, &[])?;
        let positions: Vec<usize> = qubits.iter().map(|&q| self.physical(q).index()).collect();
        let masks = PauliString::from_paulis(&paulis).place(&positions);
        let amps = self.buffer.as_slice();
        let local: f64 = amps
            .par_iter()
            .enumerate()
            .map(|(i, a)| {
                // <i ^ x| P |i> amplitude pairs
                let term = amps[i ^ masks.x].conj() * masks.phase(i) * a;
                term.re as f64
            })
            .sum();
        Ok(self.transport.all_reduce_scalar(local)? as Real)
    }

    // brings `other` onto this state's permutation without changing its
    // logical content
    fn align(&self, other: &mut Self) -> Result<()> {
        if other.num_qubits() != self.num_qubits() || other.num_workers() != self.num_workers() {
            return Err(StateError::DimensionMismatch {
                expected: self.policy.global_size(),
                actual: other.policy.global_size(),
            });
        }
        for q in (0..self.num_qubits()).map(LogicalQubit) {
            let want = self.table.logical_to_physical(q);
            let have = other.table.logical_to_physical(q);
            if want != have {
                other
                    .swapper
                    .swap_data(&mut other.buffer, &other.transport, have, want)?;
                other.table.swap(have, want);
            }
        }
        debug_assert_eq!(self.table, other.table);
        Ok(())
    }

    // <self|other>
    pub fn inner_product(&mut self, other: &mut Self) -> Result<Amplitude> {
        self.end_fusion()?;
        other.end_fusion()?;
        self.align(other)?;
        let local = self
            .buffer
            .as_slice()
            .par_iter()
            .zip(other.buffer.as_slice().par_iter())
            .map(|(a, b)| {
                let p = a.conj() * b;
                Complex::new(p.re as f64, p.im as f64)
            })
            .reduce(|| Complex::new(0.0, 0.0), |x, y| x + y);
        let total = self.transport.all_reduce_complex(local)?;
        Ok(Complex::new(total.re as Real, total.im as Real))
    }

    pub fn fidelity(&mut self, other: &mut Self) -> Result<Real> {
        Ok(self.inner_product(other)?.norm_sqr())
    }

    // one amplitude by logical basis index, on every worker
    pub fn amplitude(&mut self, logical_index: usize) -> Result<Amplitude> {
        self.end_fusion()?;
        if logical_index >= self.policy.global_size() {
            return Err(StateError::IndexOutOfRange {
                index: logical_index,
                dimension: self.policy.global_size(),
            });
        }
        let global = self.table.permutate_bits(logical_index);
        let local = if self.policy.owner(global) == self.rank() {
            let a = self.buffer[self.policy.local_index(global)];
            Complex::new(a.re as f64, a.im as f64)
        } else {
            Complex::new(0.0, 0.0)
        };
        let value = self.transport.all_reduce_complex(local)?;
        Ok(Complex::new(value.re as Real, value.im as Real))
    }

    // the full state in logical order on rank 0, None elsewhere
    pub fn gather_amplitudes(&mut self) -> Result<Option<Vec<Amplitude>>> {
        self.end_fusion()?;
        let parts = match self.transport.gather(self.buffer.as_slice().to_vec())? {
            Some(parts) => parts,
            None => return Ok(None),
        };
        let mut amplitudes = vec![Complex::new(0.0, 0.0); self.policy.global_size()];
        for (rank, part) in parts.iter().enumerate() {
            if part.len() != self.buffer.size() {
                return Err(StateError::DimensionMismatch {
                    expected: self.buffer.size(),
                    actual: part.len(),
                });
            }
            for (i, &a) in part.iter().enumerate() {
                let global = self.policy.global_index(rank, i);
                amplitudes[self.table.inverse_permutate_bits(global)] = a;
            }
        }
        Ok(Some(amplitudes))
    }

    // draws `count` permutated global indices with probability |amp|^2. every
    // worker returns the same indices.
    fn sample_permutated(&mut self, count: usize) -> Result<Vec<usize>> {
        self.end_fusion()?;
        let rank = self.rank();
        let mut totals = vec![0.0; self.num_workers()];
        totals[rank] = self.local_norm_squared();
        let totals = self.transport.all_reduce_sum(&totals)?;
        let grand: f64 = totals.iter().sum();

        let draws = if self.transport.is_root() {
            (0..count).map(|_| (self.rng.gen::<f64>() * grand).to_bits()).collect()
        } else {
            Vec::new()
        };
        let draws = self.transport.broadcast(draws)?;

        let cumulative: Vec<f64> = self
            .buffer
            .as_slice()
            .iter()
            .scan(0.0f64, |acc, a| {
                *acc += a.norm_sqr() as f64;
                Some(*acc)
            })
            .collect();
        let end = cumulative.last().copied().unwrap_or(0.0);
        let mut found = vec![0.0; draws.len()];
        for (slot, &bits) in found.iter_mut().zip(&draws) {
            let (owner, residual) = pick_owner(&totals, f64::from_bits(bits));
            if owner == rank {
                let mut i = cumulative.partition_point(|&c| c <= residual);
                if i == cumulative.len() {
                    // rounding ran past the end, take the last nonzero amplitude
                    i = cumulative.partition_point(|&c| c < end);
                }
                *slot = self.policy.global_index(rank, i) as f64;
            }
        }
        let found = self.transport.all_reduce_sum(&found)?;
        Ok(found.into_iter().map(|g| g as usize).collect())
    }

    // samples basis states without collapsing, logical indices
    pub fn generate_events(&mut self, count: usize) -> Result<Vec<usize>> {
        let samples = self.sample_permutated(count)?;
        Ok(samples
            .into_iter()
            .map(|g| self.table.inverse_permutate_bits(g))
            .collect())
    }

    // measures every qubit, collapses onto the outcome and returns its logical index
    pub fn measure(&mut self) -> Result<usize> {
        let global = self.sample_permutated(1)?.first().copied().unwrap_or(0);
        let owner = self.policy.owner(global);
        let kept = if owner == self.rank() {
            let a = self.buffer[self.policy.local_index(global)];
            let norm = a.norm();
            if norm > 0.0 {
                a / norm
            } else {
                Complex::new(1.0, 0.0)
            }
        } else {
            Complex::new(0.0, 0.0)
        };
        self.buffer.fill_zero();
        if owner == self.rank() {
            self.buffer[self.policy.local_index(global)] = kept;
        }
        let logical = self.table.inverse_permutate_bits(global);
        debug!("register measured {}", logical);
        Ok(logical)
    }
}

// worker whose slice of [0, sum(totals)) contains `r`, and r's offset in it
fn pick_owner(totals: &[f64], r: f64) -> (usize, f64) {
    let mut start = 0.0;
    let mut last = (0, 0.0);
    for (rank, &total) in totals.iter().enumerate() {
        if total <= 0.0 {
            continue;
        }
        if r < start + total {
            return (rank, r - start);
        }
        last = (rank, total);
        start += total;
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use std::f64::consts::FRAC_1_SQRT_2;

    const EPS: Real = 1e-5;

    fn solo(n: usize) -> DistributedState<ChannelTransport> {
        DistributedState::new(SimulatorConfig::new(n), ChannelTransport::solo()).unwrap()
    }

    #[test]
    fn test_new_state_is_ground_state() {
        let state = solo(3);
        assert!(state.permutation().is_identity());
        assert_eq!(state.local_amplitudes()[0], Complex::new(1.0, 0.0));
        assert_eq!(state.local_amplitudes().len(), 8);
    }

    #[test]
    fn test_chained_gates() {
        let mut state = solo(2);
        state.hadamard(0).unwrap().controlled_not(1, 0).unwrap();
        let amps = state.gather_amplitudes().unwrap().unwrap();
        let r = FRAC_1_SQRT_2 as Real;
        assert!((amps[0].re - r).abs() < EPS);
        assert!((amps[3].re - r).abs() < EPS);
        assert!(amps[1].norm() < EPS && amps[2].norm() < EPS);
    }

    #[test]
    fn test_bounds_are_checked() {
        let mut state = solo(2);
        assert!(matches!(state.pauli_x(2), Err(StateError::QubitOutOfRange { qubit: 2, .. })));
        assert!(matches!(state.amplitude(4), Err(StateError::IndexOutOfRange { .. })));
        assert!(matches!(state.load_amplitudes(&[]), Err(StateError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_fusion_protocol() {
        let mut state = solo(4);
        state.begin_fusion(&[0, 1]).unwrap();
        assert!(matches!(state.begin_fusion(&[2]), Err(StateError::FusionAlreadyOpen)));
        state.hadamard(0).unwrap();
        assert!(state.is_fusing());
        // outside the set, closes the batch
        state.hadamard(3).unwrap();
        assert!(!state.is_fusing());
        state.end_fusion().unwrap();
        assert!((state.probability_one(0).unwrap() - 0.5).abs() < EPS);
        assert!((state.probability_one(3).unwrap() - 0.5).abs() < EPS);

        let err = state.begin_fusion(&[0, 1, 2, 3, 3]).err();
        assert_eq!(err, Some(StateError::DuplicateQubit(3)));
        let mut small = DistributedState::new(
            SimulatorConfig::new(4).with_fusion_limit(2),
            ChannelTransport::solo(),
        )
        .unwrap();
        let err = small.begin_fusion(&[0, 1, 2]).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_clear_and_set() {
        let mut state = solo(2);
        state.hadamard(1).unwrap().set(1).unwrap();
        assert!((state.probability_one(1).unwrap() - 1.0).abs() < EPS);
        assert!((state.norm_squared().unwrap() - 1.0).abs() < EPS);
        state.clear(1).unwrap();
        // probability zero: nothing left to renormalise
        assert!(state.norm_squared().unwrap() < EPS);
        let p = state.probability_one(1).unwrap();
        assert!(!p.is_nan());
        assert_eq!(p, 0.0);
    }

    #[test]
    fn test_spin_expectation_of_plus_state() {
        let mut state = solo(1);
        state.hadamard(0).unwrap();
        let spin = state.spin_expectation_value(0).unwrap();
        assert!((spin[0] - 0.5).abs() < EPS);
        assert!(spin[1].abs() < EPS);
        assert!(spin[2].abs() < EPS);
        state.s_gate(0).unwrap();
        let spin = state.spin_expectation_value(0).unwrap();
        assert!((spin[1] - 0.5).abs() < EPS);
    }

    #[test]
    fn test_reset_restores_ground_state() {
        let mut state = solo(3);
        state.hadamard(0).unwrap().swap_qubits(0, 2, true).unwrap();
        state.begin_fusion(&[1]).unwrap();
        state.reset();
        assert!(!state.is_fusing());
        assert!(state.permutation().is_identity());
        assert!((state.amplitude(0).unwrap().re - 1.0).abs() < EPS);
    }

    #[test]
    fn test_exponential_gates_on_basis_states() {
        let theta = 0.4;
        let mut state = solo(2);
        state.exponential_pauli_x(0, theta).unwrap();
        let a = state.amplitude(1).unwrap();
        assert!((a - Complex::new(0.0, theta.sin() as Real)).norm() < EPS);
        assert!((state.probability_one(0).unwrap() - (theta.sin().powi(2)) as Real).abs() < EPS);

        // |01> -> cos|01> + i sin|10>
        let mut state = solo(2);
        state.pauli_x(0).unwrap().exponential_swap(0, 1, theta).unwrap();
        assert!((state.amplitude(1).unwrap() - Complex::new(theta.cos() as Real, 0.0)).norm() < EPS);
        assert!((state.amplitude(2).unwrap() - Complex::new(0.0, theta.sin() as Real)).norm() < EPS);

        // Y|0> Y|0> = i i |11>
        let mut state = solo(3);
        state.pauli_yn(&[0, 2]).unwrap();
        assert!((state.amplitude(0b101).unwrap() - Complex::new(-1.0, 0.0)).norm() < EPS);
    }

    #[test]
    fn test_pauli_expectations_of_bell_state() {
        let mut state = solo(3);
        state.hadamard(0).unwrap().controlled_not(2, 0).unwrap();
        let xx = state.expectation_value_pauli(&[(0, Pauli::X), (2, Pauli::X)]).unwrap();
        let yy = state.expectation_value_pauli(&[(0, Pauli::Y), (2, Pauli::Y)]).unwrap();
        let zz = state.expectation_value_pauli(&[(2, Pauli::Z), (0, Pauli::Z)]).unwrap();
        let z = state.expectation_value_pauli(&[(0, Pauli::Z)]).unwrap();
        assert!((xx - 1.0).abs() < EPS);
        assert!((yy + 1.0).abs() < EPS);
        assert!((zz - 1.0).abs() < EPS);
        assert!(z.abs() < EPS);
        assert!(matches!(
            state.expectation_value_pauli(&[(1, Pauli::X), (1, Pauli::Z)]),
            Err(StateError::DuplicateQubit(1))
        ));
    }

    #[test]
    fn test_depolarizing_channel() {
        let mut state = solo(3);
        state.depolarizing_channel(1.0, 0.0, 0.0).unwrap();
        assert!((state.amplitude(0b111).unwrap().re - 1.0).abs() < EPS);
        state.depolarizing_channel(0.0, 0.0, 1.0).unwrap();
        assert!((state.amplitude(0b111).unwrap().re + 1.0).abs() < EPS);
        assert!(matches!(
            state.depolarizing_channel(0.0, 0.0, 0.0),
            Err(StateError::InvalidProbabilities { .. })
        ));
        assert!(matches!(
            state.depolarizing_channel(-0.5, 1.0, 0.0),
            Err(StateError::InvalidProbabilities { .. })
        ));
    }

    #[test]
    fn test_pick_owner() {
        assert_eq!(pick_owner(&[0.25, 0.0, 0.75], 0.5), (2, 0.25));
        assert_eq!(pick_owner(&[0.25, 0.75], 0.1), (0, 0.1));
        // rounding past the end lands on the last non-empty worker
        assert_eq!(pick_owner(&[0.5, 0.5, 0.0], 1.0).0, 1);
    }

    #[test]
    fn test_variable_phase_through_apply() {
        let mut state = solo(1);
        let gate = Gate::single(GateKind::RotationY("theta".into()), 0);
        assert!(matches!(
            state.apply(&gate, &SymbolTable::new()),
            Err(StateError::UnresolvedParameter(_))
        ));
        let mut symbols = SymbolTable::new();
        symbols.insert("theta".into(), std::f64::consts::PI);
        state.apply(&gate, &symbols).unwrap();
        assert!((state.probability_one(0).unwrap() - 1.0).abs() < EPS);
    }
}
