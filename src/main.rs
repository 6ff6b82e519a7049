use clap::{Parser, ValueEnum};
use crossbeam_utils::thread;
use qshard::config::{PolicyConfig, SimulatorConfig};
use qshard::transport::{ChannelTransport, Transport, TransportStats};
use qshard::{DistributedState, GateKind, Real};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::f64::consts::PI;
use std::time::{Duration, Instant};

const QSHARD_VERSION: &str = env!("CARGO_PKG_VERSION");
const QSHARD_AUTHOR: &str = "Rayan (@planetryan on GitHub)";

#[derive(Parser, Debug)]
#[command(name = "qshard", author = QSHARD_AUTHOR, version = QSHARD_VERSION,
    about = "qshard - distributed paged state-vector simulator.\n\
             Runs every worker as a thread on an in-process channel mesh.",
    long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Runs a built-in circuit and prints a json summary.
    Run {
        /// Total number of qubits.
        #[arg(long, default_value_t = 12)]
        qubits: usize,
        /// Number of workers, a power of two (defaults to the cpu count rounded down).
        #[arg(long)]
        workers: Option<usize>,
        /// Page qubits per worker.
        #[arg(long, default_value_t = 0)]
        page_qubits: usize,
        /// Data distribution policy.
        #[arg(long, value_enum, default_value_t = PolicyArg::Simple)]
        policy: PolicyArg,
        /// Unit qubits for the unit policy.
        #[arg(long, default_value_t = 1)]
        unit_qubits: usize,
        /// Processes per unit for the unit policy.
        #[arg(long, default_value_t = 1)]
        processes_per_unit: usize,
        /// Circuit to run.
        #[arg(long, value_enum, default_value_t = CircuitArg::Ghz)]
        circuit: CircuitArg,
        /// Seed for the random circuit and for sampling.
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Fuse gates over this many qubits at a time (0 disables fusion).
        #[arg(long, default_value_t = 0)]
        fuse: usize,
        /// Number of basis states to sample at the end.
        #[arg(long, default_value_t = 8)]
        shots: usize,
        /// Load the configuration from a json file instead of the flags above.
        #[arg(long)]
        config: Option<String>,
    },
    /// Prints the default configuration as json.
    Config,
}

#[derive(Clone, Copy, Debug, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum PolicyArg {
    Simple,
    Unit,
    General,
}

#[derive(Clone, Copy, Debug, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum CircuitArg {
    Ghz,
    Qft,
    Random,
}

#[derive(Debug, Serialize)]
struct Summary {
    circuit: CircuitArg,
    qubits: usize,
    workers: usize,
    page_qubits: usize,
    policy: String,
    fused: bool,
    elapsed_ms: u128,
    norm_squared: Real,
    z_expectations: Vec<Real>,
    samples: Vec<usize>,
    traffic: Vec<TransportStats>,
}

// workers worth spawning: cpu count rounded down to a power of two, leaving
// at least one local qubit
fn default_workers(qubits: usize) -> usize {
    let cpus = num_cpus::get().max(1);
    let workers = 1usize << (usize::BITS - 1 - cpus.leading_zeros());
    workers.min(1 << qubits.saturating_sub(1))
}

// widest batch the state accepts, capped by the shard and the configured limit
fn fusion_width<T: Transport>(state: &DistributedState<T>, fuse: usize) -> usize {
    fuse.min(state.policy().num_local_qubits())
        .min(state.config().fusion_qubit_limit)
}

fn run_circuit<T: Transport>(
    state: &mut DistributedState<T>,
    circuit: CircuitArg,
    seed: u64,
    fuse: usize,
) -> qshard::Result<()> {
    let n = state.num_qubits();
    let width = fusion_width(state, fuse);
    match circuit {
        CircuitArg::Ghz => {
            state.hadamard(0)?;
            for q in 1..n {
                state.controlled_not(q, q - 1)?;
            }
        }
        CircuitArg::Qft => {
            for j in (0..n).rev() {
                // the hadamard and the phases onto qubit j share one batch
                if width >= 2 {
                    let low = j.saturating_sub(width - 1);
                    state.begin_fusion(&(low..=j).collect::<Vec<_>>())?;
                }
                state.hadamard(j)?;
                for k in (0..j).rev() {
                    state.controlled_phase_shift(j, k, PI / (1u64 << (j - k)) as f64)?;
                }
                state.end_fusion()?;
            }
            for q in 0..n / 2 {
                state.swap(q, n - 1 - q)?;
            }
        }
        CircuitArg::Random => {
            // the gate stream depends only on the seed, so every worker draws the same one
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let block = width.max(2).min(n);
            for _ in 0..4 * n {
                let low = rng.gen_range(0..=n - block);
                let qubits: Vec<usize> = (low..low + block).collect();
                if width >= 2 {
                    state.begin_fusion(&qubits)?;
                }
                for _ in 0..8 {
                    let target = qubits[rng.gen_range(0..block)];
                    let control = qubits[rng.gen_range(0..block)];
                    let angle = rng.gen_range(-PI..PI);
                    match rng.gen_range(0..5) {
                        0 => state.hadamard(target)?,
                        1 => state.rotation_x(target, angle)?,
                        2 => state.u3(target, angle, angle / 2.0, -angle)?,
                        3 if control != target => state.controlled_not(target, control)?,
                        _ => state.multi_controlled(GateKind::PauliZ, target, &[])?,
                    };
                }
                state.end_fusion()?;
            }
        }
    }
    Ok(())
}

fn build_config(
    qubits: usize,
    page_qubits: usize,
    policy: PolicyArg,
    unit_qubits: usize,
    processes_per_unit: usize,
    seed: u64,
    config: Option<String>,
) -> Result<SimulatorConfig, String> {
    if let Some(path) = config {
        return SimulatorConfig::from_path(&path).map_err(|e| e.to_string());
    }
    let policy = match policy {
        PolicyArg::Simple => PolicyConfig::Simple,
        PolicyArg::Unit => PolicyConfig::Unit {
            unit_qubits,
            processes_per_unit,
        },
        PolicyArg::General => PolicyConfig::General,
    };
    let config = SimulatorConfig::new(qubits)
        .with_page_qubits(page_qubits)
        .with_policy(policy)
        .with_seed(seed);
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn main() -> Result<(), String> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            qubits,
            workers,
            page_qubits,
            policy,
            unit_qubits,
            processes_per_unit,
            circuit,
            seed,
            fuse,
            shots,
            config,
        } => {
            let config = build_config(qubits, page_qubits, policy, unit_qubits, processes_per_unit, seed, config)?;
            let workers = workers.unwrap_or_else(|| default_workers(config.total_qubits));
            let mesh = ChannelTransport::mesh(workers, Duration::from_millis(config.exchange_timeout_ms));
            log::info!("running {:?} on {} qubits with {} workers", circuit, config.total_qubits, workers);

            let start = Instant::now();
            let results = thread::scope(|s| {
                let handles: Vec<_> = mesh
                    .into_iter()
                    .map(|transport| {
                        let config = config.clone();
                        s.spawn(move |_| -> qshard::Result<_> {
                            let mut state = DistributedState::new(config, transport)?;
                            run_circuit(&mut state, circuit, seed, fuse)?;
                            let norm_squared = state.norm_squared()?;
                            let z_expectations = (0..state.num_qubits().min(8))
                                .map(|q| state.expectation_value_z(q))
                                .collect::<qshard::Result<Vec<_>>>()?;
                            let samples = state.generate_events(shots)?;
                            Ok((state.rank(), norm_squared, z_expectations, samples, state.transport_stats()))
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().map_err(|_| "worker thread panicked".to_string()))
                    .collect::<Result<Vec<_>, String>>()
            })
            .map_err(|_| "worker scope panicked".to_string())??;
            let elapsed = start.elapsed();

            let mut traffic = Vec::with_capacity(workers);
            let mut root = None;
            for result in results {
                let (rank, norm_squared, z, samples, stats) = result.map_err(|e| e.to_string())?;
                traffic.push(stats);
                if rank == 0 {
                    root = Some((norm_squared, z, samples));
                }
            }
            let (norm_squared, z_expectations, samples) = root.ok_or("no root worker")?;

            let summary = Summary {
                circuit,
                qubits: config.total_qubits,
                workers,
                page_qubits: config.page_qubits,
                policy: config.policy.name().to_string(),
                fused: fuse >= 2,
                elapsed_ms: elapsed.as_millis(),
                norm_squared,
                z_expectations,
                samples,
                traffic,
            };
            let text = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
            println!("{}", text);
        }
        Commands::Config => {
            let text = SimulatorConfig::default().to_json_pretty().map_err(|e| e.to_string())?;
            println!("{}", text);
        }
    }
    Ok(())
}
