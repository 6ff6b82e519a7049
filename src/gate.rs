// gate descriptions and their resolution to kernel operations

use crate::error::{Result, StateError};
use crate::kernel::{conjugate_transpose, Matrix2, PauliMasks};
use crate::permutation::LogicalQubit;
use crate::{Amplitude, Real};
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_4};

// named angles bound by the caller
pub type SymbolTable = HashMap<String, f64>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Phase {
    Constant(f64),
    Variable(String),
}

impl Phase {
    pub fn resolve(&self, symbols: &SymbolTable) -> Result<f64> {
        match self {
            Phase::Constant(value) => Ok(*value),
            Phase::Variable(name) => symbols
                .get(name)
                .copied()
                .ok_or_else(|| StateError::UnresolvedParameter(name.clone())),
        }
    }
}

impl From<f64> for Phase {
    fn from(value: f64) -> Self {
        Phase::Constant(value)
    }
}

impl From<&str> for Phase {
    fn from(name: &str) -> Self {
        Phase::Variable(name.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pauli {
    X,
    Y,
    Z,
}

// Pauli operators over an ordered target list, bit j belongs to target j.
// Y sets both bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PauliString {
    x: usize,
    z: usize,
}

impl PauliString {
    pub fn from_paulis(paulis: &[Pauli]) -> Self {
        paulis.iter().enumerate().fold(Self::default(), |mut acc, (j, pauli)| {
            if *pauli != Pauli::Z {
                acc.x |= 1 << j;
            }
            if *pauli != Pauli::X {
                acc.z |= 1 << j;
            }
            acc
        })
    }

    pub fn uniform(pauli: Pauli, len: usize) -> Self {
        Self::from_paulis(&vec![pauli; len])
    }

    // moves bit j onto index bit positions[j]
    pub fn place(&self, positions: &[usize]) -> PauliMasks {
        let spread = |mask: usize| {
            positions
                .iter()
                .enumerate()
                .filter(|(j, _)| mask & (1 << j) != 0)
                .fold(0, |acc, (_, &p)| acc | (1 << p))
        };
        PauliMasks {
            x: spread(self.x),
            z: spread(self.z),
            y_count: (self.x & self.z).count_ones(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GateKind {
    Identity,
    PauliX,
    PauliY,
    PauliZ,
    Hadamard,
    S,
    T,
    SqrtX,
    PhaseShift(Phase),
    RotationX(Phase),
    RotationY(Phase),
    RotationZ(Phase),
    // u2(phi, lambda)
    U2(Phase, Phase),
    // u3(theta, phi, lambda)
    U3(Phase, Phase, Phase),
    Swap,
    SqrtY,
    SqrtZ,
    // ½[[1 + e, 1 - e], [1 - e, 1 + e]] with e = e^{i phase}
    V(Phase),
    // exp(i pi/4 X) and exp(i pi/4 Y)
    XRotationHalfPi,
    YRotationHalfPi,
    // the same Pauli on every target
    PauliXn,
    PauliYn,
    PauliZn,
    // exp(i theta P) with P the same Pauli on every target
    ExponentialPauliX(Phase),
    ExponentialPauliY(Phase),
    ExponentialPauliZ(Phase),
    // exp(i theta SWAP)
    ExponentialSwap(Phase),
}

impl GateKind {
    // None for gates taking any nonzero number of targets
    pub fn num_targets(&self) -> Option<usize> {
        match self {
            GateKind::Swap | GateKind::ExponentialSwap(_) => Some(2),
            GateKind::PauliXn
            | GateKind::PauliYn
            | GateKind::PauliZn
            | GateKind::ExponentialPauliX(_)
            | GateKind::ExponentialPauliY(_)
            | GateKind::ExponentialPauliZ(_) => None,
            _ => Some(1),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GateKind::Identity => "id",
            GateKind::PauliX => "x",
            GateKind::PauliY => "y",
            GateKind::PauliZ => "z",
            GateKind::Hadamard => "h",
            GateKind::S => "s",
            GateKind::T => "t",
            GateKind::SqrtX => "sx",
            GateKind::PhaseShift(_) => "p",
            GateKind::RotationX(_) => "rx",
            GateKind::RotationY(_) => "ry",
            GateKind::RotationZ(_) => "rz",
            GateKind::U2(..) => "u2",
            GateKind::U3(..) => "u3",
            GateKind::Swap => "swap",
            GateKind::SqrtY => "sy",
            GateKind::SqrtZ => "sz",
            GateKind::V(_) => "v",
            GateKind::XRotationHalfPi => "rx90",
            GateKind::YRotationHalfPi => "ry90",
            GateKind::PauliXn => "xn",
            GateKind::PauliYn => "yn",
            GateKind::PauliZn => "zn",
            GateKind::ExponentialPauliX(_) => "expx",
            GateKind::ExponentialPauliY(_) => "expy",
            GateKind::ExponentialPauliZ(_) => "expz",
            GateKind::ExponentialSwap(_) => "expswap",
        }
    }
}

// what a gate does to the amplitudes once its parameters are known
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GateOp {
    Matrix(Matrix2),
    Diagonal([Amplitude; 2]),
    Swap,
    Pauli(PauliString),
    // the amplitude is e^{i theta}
    PauliRotation(PauliString, Amplitude),
    ExponentialSwap(Amplitude),
}

impl GateOp {
    pub fn adjoint(&self) -> GateOp {
        match self {
            GateOp::Matrix(m) => GateOp::Matrix(conjugate_transpose(m)),
            GateOp::Diagonal(d) => GateOp::Diagonal([d[0].conj(), d[1].conj()]),
            GateOp::Swap => GateOp::Swap,
            GateOp::Pauli(p) => GateOp::Pauli(*p),
            GateOp::PauliRotation(p, rotation) => GateOp::PauliRotation(*p, rotation.conj()),
            GateOp::ExponentialSwap(rotation) => GateOp::ExponentialSwap(rotation.conj()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub kind: GateKind,
    pub targets: Vec<LogicalQubit>,
    pub controls: Vec<LogicalQubit>,
    pub adjoint: bool,
}

fn amp(re: f64, im: f64) -> Amplitude {
    Complex::new(re as Real, im as Real)
}

fn cis(theta: f64) -> Amplitude {
    amp(theta.cos(), theta.sin())
}

impl Gate {
    pub fn new(kind: GateKind, targets: &[usize]) -> Self {
        Self {
            kind,
            targets: targets.iter().map(|&q| LogicalQubit(q)).collect(),
            controls: Vec::new(),
            adjoint: false,
        }
    }

    pub fn single(kind: GateKind, target: usize) -> Self {
        Self::new(kind, &[target])
    }

    pub fn with_controls(mut self, controls: &[usize]) -> Self {
        self.controls.extend(controls.iter().map(|&q| LogicalQubit(q)));
        self
    }

    // toggles, so applying adjoint twice gives the gate back
    pub fn adjoint(mut self) -> Self {
        self.adjoint = !self.adjoint;
        self
    }

    pub fn qubits(&self) -> impl Iterator<Item = LogicalQubit> + '_ {
        self.targets.iter().chain(self.controls.iter()).copied()
    }

    pub fn validate(&self, num_qubits: usize) -> Result<()> {
        let expected = self.kind.num_targets().unwrap_or(self.targets.len().max(1));
        if self.targets.len() != expected {
            return Err(StateError::DimensionMismatch {
                expected,
                actual: self.targets.len(),
            });
        }
        let mut seen = HashSet::new();
        for q in self.qubits() {
            if q.index() >= num_qubits {
                return Err(StateError::QubitOutOfRange {
                    qubit: q.index(),
                    num_qubits,
                });
            }
            if !seen.insert(q) {
                return Err(StateError::DuplicateQubit(q.index()));
            }
        }
        Ok(())
    }

    fn uniform(&self, pauli: Pauli) -> PauliString {
        PauliString::uniform(pauli, self.targets.len())
    }

    pub fn resolve(&self, symbols: &SymbolTable) -> Result<GateOp> {
        let op = match &self.kind {
            GateKind::Identity => GateOp::Diagonal([amp(1.0, 0.0), amp(1.0, 0.0)]),
            GateKind::PauliX => GateOp::Matrix([
                [amp(0.0, 0.0), amp(1.0, 0.0)],
                [amp(1.0, 0.0), amp(0.0, 0.0)],
            ]),
            GateKind::PauliY => GateOp::Matrix([
                [amp(0.0, 0.0), amp(0.0, -1.0)],
                [amp(0.0, 1.0), amp(0.0, 0.0)],
            ]),
            GateKind::PauliZ => GateOp::Diagonal([amp(1.0, 0.0), amp(-1.0, 0.0)]),
            GateKind::Hadamard => {
                let h = amp(FRAC_1_SQRT_2, 0.0);
                GateOp::Matrix([[h, h], [h, -h]])
            }
            GateKind::S => GateOp::Diagonal([amp(1.0, 0.0), amp(0.0, 1.0)]),
            GateKind::T => GateOp::Diagonal([amp(1.0, 0.0), cis(FRAC_PI_4)]),
            GateKind::SqrtX => GateOp::Matrix([
                [amp(0.5, 0.5), amp(0.5, -0.5)],
                [amp(0.5, -0.5), amp(0.5, 0.5)],
            ]),
            GateKind::PhaseShift(phi) => GateOp::Diagonal([amp(1.0, 0.0), cis(phi.resolve(symbols)?)]),
            GateKind::RotationX(theta) => {
                let half = theta.resolve(symbols)? / 2.0;
                let (c, s) = (half.cos(), half.sin());
                GateOp::Matrix([[amp(c, 0.0), amp(0.0, -s)], [amp(0.0, -s), amp(c, 0.0)]])
            }
            GateKind::RotationY(theta) => {
                let half = theta.resolve(symbols)? / 2.0;
                let (c, s) = (half.cos(), half.sin());
                GateOp::Matrix([[amp(c, 0.0), amp(-s, 0.0)], [amp(s, 0.0), amp(c, 0.0)]])
            }
            GateKind::RotationZ(theta) => {
                let half = theta.resolve(symbols)? / 2.0;
                GateOp::Diagonal([cis(-half), cis(half)])
            }
            GateKind::U2(phi, lambda) => {
                let (phi, lambda) = (phi.resolve(symbols)?, lambda.resolve(symbols)?);
                let r = FRAC_1_SQRT_2 as Real;
                GateOp::Matrix([
                    [amp(r as f64, 0.0), -cis(lambda) * r],
                    [cis(phi) * r, cis(phi + lambda) * r],
                ])
            }
            GateKind::U3(theta, phi, lambda) => {
                let half = theta.resolve(symbols)? / 2.0;
                let (phi, lambda) = (phi.resolve(symbols)?, lambda.resolve(symbols)?);
                let (c, s) = (half.cos() as Real, half.sin() as Real);
                GateOp::Matrix([
                    [amp(c as f64, 0.0), -cis(lambda) * s],
                    [cis(phi) * s, cis(phi + lambda) * c],
                ])
            }
            GateKind::Swap => GateOp::Swap,
            GateKind::SqrtY => {
                let h = amp(0.5, 0.5);
                GateOp::Matrix([[h, -h], [h, h]])
            }
            GateKind::SqrtZ => GateOp::Diagonal([amp(1.0, 0.0), amp(0.0, 1.0)]),
            GateKind::V(phi) => {
                let e = cis(phi.resolve(symbols)?);
                let one = amp(1.0, 0.0);
                let (sum, difference) = ((one + e) * 0.5, (one - e) * 0.5);
                GateOp::Matrix([[sum, difference], [difference, sum]])
            }
            GateKind::XRotationHalfPi => {
                let (r, ir) = (amp(FRAC_1_SQRT_2, 0.0), amp(0.0, FRAC_1_SQRT_2));
                GateOp::Matrix([[r, ir], [ir, r]])
            }
            GateKind::YRotationHalfPi => {
                let r = amp(FRAC_1_SQRT_2, 0.0);
                GateOp::Matrix([[r, r], [-r, r]])
            }
            GateKind::PauliXn => GateOp::Pauli(self.uniform(Pauli::X)),
            GateKind::PauliYn => GateOp::Pauli(self.uniform(Pauli::Y)),
            GateKind::PauliZn => GateOp::Pauli(self.uniform(Pauli::Z)),
            GateKind::ExponentialPauliX(theta) => {
                GateOp::PauliRotation(self.uniform(Pauli::X), cis(theta.resolve(symbols)?))
            }
            GateKind::ExponentialPauliY(theta) => {
                GateOp::PauliRotation(self.uniform(Pauli::Y), cis(theta.resolve(symbols)?))
            }
            GateKind::ExponentialPauliZ(theta) => {
                GateOp::PauliRotation(self.uniform(Pauli::Z), cis(theta.resolve(symbols)?))
            }
            GateKind::ExponentialSwap(theta) => GateOp::ExponentialSwap(cis(theta.resolve(symbols)?)),
        };
        Ok(if self.adjoint { op.adjoint() } else { op })
    }
}
