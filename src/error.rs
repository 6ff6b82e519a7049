// error types for the storage engine.
//
// configuration errors are raised before any amplitude is touched, transport
// errors are fatal, everything else is a caller programming error.

use thiserror::Error;

// crate-wide result alias
pub type Result<T> = std::result::Result<T, StateError>;

// raised at setup, the run cannot start
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{policy} policy cannot page {requested} qubits (at most {supported})")]
    UnsupportedPageCount {
        policy: &'static str,
        requested: usize,
        supported: usize,
    },

    #[error("invalid data distribution: {0}")]
    InvalidDistribution(String),

    #[error("cannot fuse {requested} qubits, the limit is {limit}")]
    FusionLimitExceeded { requested: usize, limit: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

// an exchange or collective failed. amplitude consistency across workers can
// no longer be guaranteed after one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("worker {peer} disconnected")]
    Disconnected { peer: usize },

    #[error("timed out after {millis} ms waiting for worker {peer}")]
    Timeout { peer: usize, millis: u64 },

    #[error("expected a {expected} message from worker {peer}, got {actual}")]
    UnexpectedMessage {
        peer: usize,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("worker {peer} sent {actual} values, expected {expected}")]
    LengthMismatch {
        peer: usize,
        expected: usize,
        actual: usize,
    },

    #[error("worker {peer} does not exist in a group of {size}")]
    InvalidPeer { peer: usize, size: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("qubit {qubit} out of range for a {num_qubits}-qubit state")]
    QubitOutOfRange { qubit: usize, num_qubits: usize },

    #[error("basis index {index} out of range for a state of dimension {dimension}")]
    IndexOutOfRange { index: usize, dimension: usize },

    #[error("qubit {0} appears more than once in one operation")]
    DuplicateQubit(usize),

    #[error("a fusion batch is already open")]
    FusionAlreadyOpen,

    #[error("qubit {0} is outside the open fusion batch")]
    QubitOutsideFusion(usize),

    #[error("operation needs {requested} local qubits but each worker only has {local}")]
    TooManyOperatedQubits { requested: usize, local: usize },

    #[error("page count mismatch: expected {expected}, found {actual}")]
    PageCountMismatch { expected: usize, actual: usize },

    #[error("parameter `{0}` is not bound in the symbol table")]
    UnresolvedParameter(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid channel probabilities px = {px}, py = {py}, pz = {pz}")]
    InvalidProbabilities { px: f64, py: f64, pz: f64 },
}

impl StateError {
    // transport failures leave the shards inconsistent, the run has to stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, StateError::Transport(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, StateError::Config(_))
    }
}
