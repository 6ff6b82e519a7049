// distributed paged state-vector storage for quantum circuit simulation

pub mod buffer; // per-worker amplitude pages
pub mod config; // run configuration
pub mod error; // error types
pub mod fusion; // gate fusion batches
pub mod gate; // gate kinds and matrices
pub mod kernel; // slice kernels
pub mod locator; // qubit classification
pub mod permutation; // logical <-> permutated qubits
pub mod policy; // data distribution policies
pub mod state; // distributed state facade
pub mod swap; // qubit swap data movement
pub mod transport; // worker messaging


#[cfg(not(feature = "single-precision"))]
pub type Real = f64;
#[cfg(feature = "single-precision")]
pub type Real = f32;

pub type Amplitude = num_complex::Complex<Real>;

pub use config::{PolicyConfig, SimulatorConfig};
pub use error::{ConfigError, Result, StateError, TransportError};
pub use gate::{Gate, GateKind, Pauli, PauliString, Phase, SymbolTable};
pub use permutation::{LogicalQubit, PermutatedQubit, PermutationTable};
pub use state::DistributedState;
pub use transport::{ChannelTransport, Transport};
