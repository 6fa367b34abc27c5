use clap::{Parser, Subcommand};
use engine::address::Address;
use engine::block::BlockTrailer;
use engine::chain_state::ChainState;
use engine::collab::{PowVerifier, SignatureVerifier};
use engine::config::Config;
use engine::engine::Engine;
use engine::ledger::Ledger;
use engine::validator;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Parser)]
#[command(name = "ledgerd")]
#[command(about = "Block-and-ledger engine node", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstraps a node directory from a neo-genesis ledger snapshot.
    Init {
        #[arg(long)]
        state_dir: PathBuf,
        #[arg(long)]
        work_dir: PathBuf,
        #[arg(long)]
        ledger: PathBuf,
    },
    /// Validates one candidate block against the node's current tip and
    /// ledger, applying the resulting delta on success.
    Validate {
        #[arg(long)]
        state_dir: PathBuf,
        #[arg(long)]
        work_dir: PathBuf,
        rblock: PathBuf,
    },
    /// Prints a read-only summary of the chain tip and ledger size (the
    /// library equivalent of the original interactive monitor).
    Status {
        #[arg(long)]
        state_dir: PathBuf,
        #[arg(long)]
        work_dir: PathBuf,
    },
    /// Applies the Sanctuary protocol if due.
    Renew {
        #[arg(long)]
        state_dir: PathBuf,
        #[arg(long)]
        work_dir: PathBuf,
    },
    /// Subprocess-compatible entry point: validates `rblock` directly to
    /// `vblock`/`ltran` without touching a node's persistent state, and
    /// exits with a process-surface exit-code taxonomy (0 valid, 1 local
    /// failure, >= 2 protocol failure).
    /// Exists so external tooling built against that original contract
    /// still works against this engine.
    Bval {
        rblock: PathBuf,
        vblock: PathBuf,
        ltran: PathBuf,
        #[arg(long)]
        state_dir: PathBuf,
    },
}

/// Placeholder proof-of-work and signature backend. The real PoW algorithm
/// and signature scheme are kept out of this engine's scope; a production
/// deployment links in real implementations of
/// `engine::collab::{PowVerifier, SignatureVerifier}` here instead.
struct UnverifiedCollaborators;

impl PowVerifier for UnverifiedCollaborators {
    fn verify_legacy(&self, _trailer: &BlockTrailer) -> bool {
        true
    }
    fn verify_memory_hard(&self, _trailer: &BlockTrailer) -> bool {
        true
    }
}

impl SignatureVerifier for UnverifiedCollaborators {
    fn verify(&self, _message: &[u8; 32], _sig: &[u8], _pub_seed: &[u8], _rand_suffix: &[u8]) -> bool {
        true
    }
    fn derive_address(&self, pub_seed: &[u8], _rand_suffix: &[u8]) -> Address {
        let mut bytes = [0u8; engine::config::ADDR_LEN];
        let n = pub_seed.len().min(bytes.len());
        bytes[..n].copy_from_slice(&pub_seed[..n]);
        Address(bytes)
    }
}

fn now_unix() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("time went backwards").as_secs() as u32
}

fn main() -> ExitCode {
    engine::logging::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { state_dir, work_dir, ledger } => {
            match Engine::bootstrap(&state_dir, &work_dir, Config::default(), ChainState::genesis(), &ledger) {
                Ok(_) => {
                    println!("initialized node at {}", state_dir.display());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("init failed: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Validate { state_dir, work_dir, rblock } => {
            let mut eng = match Engine::open(&state_dir, &work_dir, Config::default()) {
                Ok(e) => e,
                Err(e) => {
                    eprintln!("failed to open node: {e}");
                    return ExitCode::FAILURE;
                }
            };
            match eng.validate_block(&rblock, now_unix(), &UnverifiedCollaborators, &UnverifiedCollaborators) {
                Ok(outcome) => {
                    println!("accepted block {} (hash {})", outcome.bnum, hex::encode(outcome.bhash));
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("rejected: {e}");
                    ExitCode::from(e.exit_code() as u8)
                }
            }
        }
        Commands::Status { state_dir, work_dir } => {
            match Engine::open(&state_dir, &work_dir, Config::default()) {
                Ok(eng) => {
                    let tip = eng.describe_tip();
                    println!(
                        "bnum={} bhash={} mfee={} difficulty={} ledger_entries={}",
                        tip.bnum,
                        hex::encode(tip.bhash),
                        tip.mfee.0,
                        tip.difficulty,
                        tip.ledger_entries
                    );
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("failed to open node: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Renew { state_dir, work_dir } => match Engine::open(&state_dir, &work_dir, Config::default()) {
            Ok(mut eng) => match eng.renew() {
                Ok(()) => {
                    println!("renew applied (or already a no-op)");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("renew failed: {e}");
                    ExitCode::FAILURE
                }
            },
            Err(e) => {
                eprintln!("failed to open node: {e}");
                ExitCode::FAILURE
            }
        },
        Commands::Bval { rblock, vblock, ltran, state_dir } => run_bval(&rblock, &vblock, &ltran, &state_dir),
    }
}

fn run_bval(rblock: &Path, vblock: &Path, ltran: &Path, state_dir: &Path) -> ExitCode {
    let chain_bytes = match std::fs::read(state_dir.join("global.dat")) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("bval: cannot read global.dat: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut cursor = &chain_bytes[..];
    let chain = match ChainState::read_from(&mut cursor) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("bval: malformed global.dat: {e}");
            return ExitCode::FAILURE;
        }
    };
    let ledger = match Ledger::open(state_dir.join("ledger.dat")) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("bval: cannot open ledger: {e}");
            return ExitCode::FAILURE;
        }
    };
    let cfg = Config::default();
    match validator::validate_block(
        rblock,
        vblock,
        ltran,
        &chain,
        &ledger,
        &cfg,
        now_unix(),
        &UnverifiedCollaborators,
        &UnverifiedCollaborators,
    ) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("bval: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
