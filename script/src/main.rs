//! Operator and wallet CLI for a local shielded pool.
//!
//! Subcommands:
//!   init      - Create an empty pool state file
//!   note      - Create or inspect a note file
//!   deposit   - Deposit a note into the pool
//!   withdraw  - Prove and submit a withdrawal
//!   transfer  - Prove and submit a 2-in-2-out private transfer
//!   status    - Print tree and nullifier-set summary
//!   spent     - Check whether a nullifier is spent
//!
//! Proofs come from the in-process mock prover and are checked by the binding
//! mock oracle, so every subcommand runs offline.

use std::fs;
use std::path::{Path, PathBuf};

use alloy_primitives::{Address, U256};
use anyhow::{bail, ensure, Context, Result};
use cashio_pool::store::write_json_atomic;
use cashio_pool::{
    ChainId, MockOracle, MockProver, Note, NoteFile, Nullifier, PoolConfig, PoolState, PoolStore,
    ProofRequest, Prover, RootValidity, ShieldedPool, TransferRequest, TransferWitness,
    WithdrawRequest, WithdrawWitness,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

#[derive(Parser)]
#[command(name = "cashio-pool")]
#[command(about = "Local shielded pool: notes, deposits, private transfers and withdrawals")]
struct Cli {
    /// Pool state file
    #[arg(long, env = "CASHIO_STATE", default_value = "cashio-pool.json", global = true)]
    state: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Validity {
    /// Every root ever produced stays spendable
    All,
    /// Only the recent-root window is spendable
    Recent,
}

impl From<Validity> for RootValidity {
    fn from(v: Validity) -> Self {
        match v {
            Validity::All => RootValidity::AllHistorical,
            Validity::Recent => RootValidity::RecentWindow,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty pool
    Init {
        /// Merkle tree depth
        #[arg(long, env = "TREE_LEVELS", default_value_t = 20)]
        depth: usize,
        /// Fixed deposit amount in base units
        #[arg(long, env = "DENOMINATION", value_parser = parse_u256)]
        denomination: U256,
        /// Size of the recent-root window
        #[arg(long, env = "ROOT_HISTORY", default_value_t = 100)]
        root_history: usize,
        #[arg(long, value_enum, default_value = "all")]
        validity: Validity,
        /// Overwrite an existing state file
        #[arg(long)]
        force: bool,
    },
    /// Note file operations
    #[command(subcommand)]
    Note(NoteCommands),
    /// Deposit a note (its amount must equal the denomination)
    Deposit {
        #[arg(long)]
        note: PathBuf,
    },
    /// Withdraw a deposited note to a public address
    Withdraw {
        #[arg(long)]
        note: PathBuf,
        #[arg(long, value_parser = parse_address)]
        recipient: Address,
        #[arg(long, value_parser = parse_address)]
        relayer: Option<Address>,
        /// Relayer fee in base units
        #[arg(long, value_parser = parse_u256, default_value = "0")]
        fee: U256,
    },
    /// Spend two notes into two new ones
    Transfer {
        /// Input note files (exactly two)
        #[arg(long = "input", num_args = 2, required = true)]
        inputs: Vec<PathBuf>,
        /// Output amounts (exactly two, must sum to the inputs)
        #[arg(long = "amount", num_args = 2, required = true, value_parser = parse_u256)]
        amounts: Vec<U256>,
        /// Where to write the output note files
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Print pool summary
    Status,
    /// Check a nullifier
    Spent { nullifier: Nullifier },
}

#[derive(Subcommand)]
enum NoteCommands {
    /// Create a fresh note
    New {
        #[arg(long, value_parser = parse_u256)]
        amount: U256,
        /// Chain name or id the note belongs to
        #[arg(long, default_value = "hub")]
        chain: ChainId,
        #[arg(long)]
        out: PathBuf,
    },
    /// Import and print a note file or note string
    Show { note: String },
}

fn parse_u256(s: &str) -> Result<U256, String> {
    match s.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str_radix(s, 10),
    }
    .map_err(|e| format!("invalid amount {s}: {e}"))
}

fn parse_address(s: &str) -> Result<Address, String> {
    s.parse().map_err(|e| format!("invalid address {s}: {e}"))
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cashio_pool=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let store = PoolStore::new(&cli.state);

    match cli.command {
        Commands::Init {
            depth,
            denomination,
            root_history,
            validity,
            force,
        } => {
            ensure!(
                force || !store.exists(),
                "{} already exists (use --force to overwrite)",
                cli.state.display()
            );
            let config = PoolConfig::default()
                .with_depth(depth)
                .with_denomination(denomination)
                .with_root_history(root_history)
                .with_root_validity(validity.into());
            let state = PoolState::new(config)?;
            store.save(&state)?;
            println!("Pool created at {}", cli.state.display());
            println!("  depth:        {depth} ({} leaves)", state.tree().capacity());
            println!("  denomination: {denomination}");
            println!("  root:         {}", state.current_root());
        }
        Commands::Note(NoteCommands::New { amount, chain, out }) => {
            let note = cashio_pool::create_note(amount, chain)?;
            save_note(&out, &note)?;
            println!("Note written to {}", out.display());
            println!("  commitment: {}", note.commitment);
            println!("  string:     {}", note.to_note_string());
        }
        Commands::Note(NoteCommands::Show { note }) => {
            let note = if Path::new(&note).exists() {
                load_note(Path::new(&note))?
            } else {
                Note::from_note_string(&note)?
            };
            print_note(&note);
        }
        Commands::Deposit { note: path } => {
            let mut state = load_state(&store)?;
            let mut note = load_note(&path)?;
            let leaf_index = state.deposit_note(&mut note)?;
            store.save(&state)?;
            save_note(&path, &note)?;
            println!("Deposited at leaf {leaf_index}");
            println!("  root: {}", state.current_root());
        }
        Commands::Withdraw {
            note: path,
            recipient,
            relayer,
            fee,
        } => {
            let state = load_state(&store)?;
            let note = load_note(&path)?;
            let leaf_index = note
                .leaf_index
                .context("note has no leaf index; deposit it first")?;
            let witness = WithdrawWitness {
                path: state.tree().path(leaf_index)?,
                root: state.current_root(),
                note,
                recipient,
                relayer,
                fee,
            };
            let denomination = state.config().denomination;

            info!(leaf_index, "generating withdraw proof");
            let generated = MockProver::new().prove_blocking(ProofRequest::Withdraw {
                witness,
                denomination,
            })?;
            let request = WithdrawRequest::from_proof(generated)?;

            let mut pool = ShieldedPool::from_state(state, MockOracle::binding());
            let receipt = pool.withdraw(&request)?;
            store.save(pool.state())?;
            println!("Withdrawn {} to {}", receipt.amount, receipt.recipient);
            if let Some(relayer) = receipt.relayer {
                println!("  fee {} to relayer {relayer}", receipt.fee);
            }
            println!("  nullifier: {}", receipt.nullifier);
        }
        Commands::Transfer {
            inputs,
            amounts,
            out_dir,
        } => {
            let [in0, in1] = <[PathBuf; 2]>::try_from(inputs)
                .map_err(|_| anyhow::anyhow!("exactly two --input notes are required"))?;
            let [a0, a1] = <[U256; 2]>::try_from(amounts)
                .map_err(|_| anyhow::anyhow!("exactly two --amount values are required"))?;

            let state = load_state(&store)?;
            let hub = state.config().hub_chain;
            let input_notes = [load_note(&in0)?, load_note(&in1)?];
            let mut paths = Vec::with_capacity(2);
            for note in &input_notes {
                let idx = note
                    .leaf_index
                    .context("input note has no leaf index; deposit it first")?;
                paths.push(state.tree().path(idx)?);
            }
            let paths = <[_; 2]>::try_from(paths)
                .map_err(|_| anyhow::anyhow!("expected two merkle paths"))?;
            let mut outputs = [
                cashio_pool::create_note(a0, hub)?,
                cashio_pool::create_note(a1, hub)?,
            ];

            let witness = TransferWitness {
                inputs: input_notes,
                paths,
                outputs: outputs.clone(),
                root: state.current_root(),
            };
            info!("generating transfer proof");
            let generated = MockProver::new().prove_blocking(ProofRequest::Transfer(witness))?;
            let request = TransferRequest::from_proof(generated)?;

            let mut pool = ShieldedPool::from_state(state, MockOracle::binding());
            let receipt = pool.private_transfer(&request)?;
            store.save(pool.state())?;

            fs::create_dir_all(&out_dir)
                .with_context(|| format!("creating {}", out_dir.display()))?;
            for (i, note) in outputs.iter_mut().enumerate() {
                note.mark_inserted(receipt.leaf_indices[i], receipt.root);
                let out = out_dir.join(format!("note-{}.json", receipt.leaf_indices[i]));
                save_note(&out, note)?;
                println!(
                    "Output {i}: {} at leaf {} -> {}",
                    note.amount,
                    receipt.leaf_indices[i],
                    out.display()
                );
            }
            println!("  root: {}", receipt.root);
        }
        Commands::Status => {
            let state = load_state(&store)?;
            let tree = state.tree();
            let cfg = state.config();
            println!("Pool {}", cli.state.display());
            println!("  chain:          {}", cfg.hub_chain);
            println!("  denomination:   {}", cfg.denomination);
            println!("  root validity:  {:?}", cfg.root_validity);
            println!("  leaves:         {} / {}", tree.next_index(), tree.capacity());
            println!("  current root:   {}", state.current_root());
            println!("  recent roots:   {}", tree.recent_roots().len());
            println!("  known roots:    {}", tree.known_root_count());
            println!("  spent:          {}", state.spent_count());
        }
        Commands::Spent { nullifier } => {
            let state = load_state(&store)?;
            if state.is_spent(&nullifier) {
                println!("{nullifier} is spent");
            } else {
                println!("{nullifier} is unspent");
            }
        }
    }

    Ok(())
}

fn load_state(store: &PoolStore) -> Result<PoolState> {
    if !store.exists() {
        bail!("no pool at {}; run `init` first", store.path().display());
    }
    store
        .load()
        .with_context(|| format!("loading {}", store.path().display()))
}

fn load_note(path: &Path) -> Result<Note> {
    let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let file: NoteFile = serde_json::from_str(&json).context("parsing note file")?;
    Ok(Note::from_file(file)?)
}

fn save_note(path: &Path, note: &Note) -> Result<()> {
    write_json_atomic(path, &note.to_file())
        .with_context(|| format!("writing {}", path.display()))
}

fn print_note(note: &Note) {
    println!("amount:     {}", note.amount);
    println!("chain:      {}", note.chain_tag);
    println!("commitment: {}", note.commitment);
    println!("created:    {}", note.created_at);
    match (note.leaf_index, note.merkle_root_at_insertion) {
        (Some(idx), Some(root)) => {
            println!("leaf:       {idx}");
            println!("root:       {root}");
            println!("nullifier:  {}", note.nullifier(Some(idx)));
        }
        _ => println!("not deposited yet"),
    }
}
