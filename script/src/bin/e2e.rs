//! End-to-end run: deposit → transfer → withdraw against a local pool.
//!
//! Runs the full shielded pool lifecycle through the async pool service:
//!   1. Deposits two notes of the pool denomination
//!   2. Private transfer of both into a recipient note and a change note
//!   3. Recipient withdraws to a public address through a relayer
//!   4. Verifies pool state (nullifiers, leaf count, replay rejection)
//!   5. Walks a bridged note through Pending → Deposited → Claimed
//!
//! Usage:
//!   cargo run --release -p cashio-pool-cli --bin e2e
//!
//! Optional env vars (from .env):
//!   TREE_LEVELS       - Merkle tree depth (default: 20)
//!   DENOMINATION      - Deposit amount in base units (default: 10^18)
//!   RELAYER_FEE       - Fee paid to the relayer on withdraw (default: 0)
//!   CASHIO_STATE      - Persist the pool to this file (default: in memory)

use std::path::PathBuf;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use anyhow::{ensure, Context, Result};
use cashio_pool::config::DEFAULT_DENOMINATION;
use cashio_pool::store::write_json_atomic;
use cashio_pool::{
    bridged_note, Bridge, BridgeConfig, BridgeStatus, ChainId, GeneratedProof, MockOracle,
    MockProver, Note, NoteFile, PoolConfig, PoolError, PoolService, PoolState, PoolStore,
    ProofRequest, ProofStatus, Prover, TransferRequest, TransferWitness, WithdrawRequest,
    WithdrawWitness,
};
use rand::rngs::OsRng;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Wallet state, saved to disk so the notes can be spent later with the CLI
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct WalletNote {
    /// Human label (e.g. "deposit_a", "transfer_change")
    label: String,
    note: NoteFile,
    spent: bool,
}

#[derive(Serialize, Default)]
struct WalletState {
    notes: Vec<WalletNote>,
}

impl WalletState {
    fn track(&mut self, label: &str, note: &Note) {
        self.notes.push(WalletNote {
            label: label.to_string(),
            note: note.to_file(),
            spent: false,
        });
    }

    fn mark_spent(&mut self, label: &str) {
        if let Some(n) = self.notes.iter_mut().find(|n| n.label == label) {
            n.spent = true;
        }
    }
}

fn save_wallet(state: &WalletState) -> Result<()> {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let dir = root.parent().unwrap_or(root.as_path()).join("fixtures");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("wallet.json");
    write_json_atomic(&path, state)?;
    println!("    Wallet state saved to {}", path.display());
    Ok(())
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} is invalid: {e}")),
        Err(_) => Ok(default),
    }
}

/// Drive a proof job to completion without blocking the runtime.
async fn await_proof(prover: &MockProver, request: ProofRequest) -> Result<GeneratedProof> {
    let handle = prover.begin_proof(request)?;
    let mut polls = 0u32;
    loop {
        match prover.poll_proof(&handle)? {
            ProofStatus::Pending => {
                polls += 1;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            ProofStatus::Ready(proof) => {
                println!("    Proof ready after {polls} polls ({} bytes)", proof.proof.len());
                return Ok(proof);
            }
            ProofStatus::Failed(reason) => anyhow::bail!("proof failed: {reason}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cashio_pool=info".into()),
        )
        .init();

    // ── Step 0: Load config ────────────────────────────────────────────
    println!("\n=== Shielded Pool E2E Run ===\n");

    let tree_levels: usize = env_or("TREE_LEVELS", 20)?;
    let denomination: U256 = match std::env::var("DENOMINATION") {
        Ok(v) => U256::from_str_radix(&v, 10).context("DENOMINATION must be decimal")?,
        Err(_) => U256::from(DEFAULT_DENOMINATION),
    };
    let fee = U256::from(env_or::<u64>("RELAYER_FEE", 0)?);
    ensure!(fee <= denomination, "RELAYER_FEE ({fee}) > DENOMINATION ({denomination})");

    let config = PoolConfig::default()
        .with_depth(tree_levels)
        .with_denomination(denomination);
    println!("Tree:          {tree_levels} levels");
    println!("Denomination:  {denomination}");
    println!("Relayer fee:   {fee}\n");

    let fresh = PoolState::new(config)?;
    let pool = match std::env::var("CASHIO_STATE") {
        Ok(path) => {
            println!("[0] Persisting pool to {path}");
            PoolService::open(PoolStore::new(path), fresh, MockOracle::binding())?
        }
        Err(_) => PoolService::new(fresh, MockOracle::binding()),
    };
    let prover = MockProver::with_delay(Duration::from_millis(50));
    let mut wallet = WalletState::default();
    let hub = ChainId::Hub;

    // ── Step 1: Create and deposit notes ───────────────────────────────
    let mut note_a = Note::random(&mut OsRng, denomination, hub)?;
    let mut note_b = Note::random(&mut OsRng, denomination, hub)?;
    println!("[1] Depositing two notes of {denomination}");
    for (label, note) in [("deposit_a", &mut note_a), ("deposit_b", &mut note_b)] {
        let leaf = pool.deposit(note.commitment, note.amount).await?;
        note.mark_inserted(leaf, pool.current_root().await);
        println!("    {label}: leaf {leaf}, commitment {}", note.commitment);
        wallet.track(label, note);
    }

    // ── Step 2: Private transfer ───────────────────────────────────────
    println!("[2] Building transfer: {denomination} → recipient, {denomination} → change");
    let mut recipient_note = Note::random(&mut OsRng, denomination, hub)?;
    let mut change_note = Note::random(&mut OsRng, denomination, hub)?;

    let leaf_a = note_a.leaf_index.context("note a was not inserted")?;
    let leaf_b = note_b.leaf_index.context("note b was not inserted")?;
    let (root, path_a, path_b) = pool
        .read(|s| -> cashio_pool::Result<_> {
            Ok((
                s.current_root(),
                s.tree().path(leaf_a)?,
                s.tree().path(leaf_b)?,
            ))
        })
        .await?;
    let witness = TransferWitness {
        inputs: [note_a.clone(), note_b.clone()],
        paths: [path_a, path_b],
        outputs: [recipient_note.clone(), change_note.clone()],
        root,
    };
    let proof = await_proof(&prover, ProofRequest::Transfer(witness)).await?;
    let receipt = pool
        .private_transfer(TransferRequest::from_proof(proof)?)
        .await?;
    println!("    Output leaves: {:?}", receipt.leaf_indices);

    recipient_note.mark_inserted(receipt.leaf_indices[0], receipt.root);
    change_note.mark_inserted(receipt.leaf_indices[1], receipt.root);
    wallet.mark_spent("deposit_a");
    wallet.mark_spent("deposit_b");
    wallet.track("transfer_to_recipient", &recipient_note);
    wallet.track("transfer_change", &change_note);

    // ── Step 3: Withdraw ───────────────────────────────────────────────
    let recipient = Address::repeat_byte(0xDE);
    let relayer = (!fee.is_zero()).then(|| Address::repeat_byte(0x4E));
    println!("[3] Withdrawing recipient note to {recipient}");
    let leaf = recipient_note
        .leaf_index
        .context("recipient note was not inserted")?;
    let (root, path) = pool
        .read(|s| -> cashio_pool::Result<_> { Ok((s.current_root(), s.tree().path(leaf)?)) })
        .await?;
    let witness = WithdrawWitness {
        note: recipient_note.clone(),
        path,
        root,
        recipient,
        relayer,
        fee,
    };
    let proof = await_proof(
        &prover,
        ProofRequest::Withdraw {
            witness,
            denomination,
        },
    )
    .await?;
    let request = WithdrawRequest::from_proof(proof)?;
    let withdrawal = pool.withdraw(request.clone()).await?;
    println!("    Released {} to {}", withdrawal.amount, withdrawal.recipient);
    if let Some(relayer) = withdrawal.relayer {
        println!("    Fee {} to relayer {relayer}", withdrawal.fee);
    }
    wallet.mark_spent("transfer_to_recipient");

    save_wallet(&wallet)?;

    // ── Step 4: Verify final state ─────────────────────────────────────
    println!("\n[4] Verifying final state...");
    for (label, note) in [("A", &note_a), ("B", &note_b), ("withdraw", &recipient_note)] {
        let nf = note
            .spend_nullifier()
            .with_context(|| format!("note {label} has no leaf index"))?;
        ensure!(pool.is_spent(&nf).await, "Nullifier {label} not spent!");
    }
    println!("    Nullifiers spent: OK");

    let change_nf = change_note
        .spend_nullifier()
        .context("change note has no leaf index")?;
    ensure!(!pool.is_spent(&change_nf).await, "Change note spent unexpectedly!");
    println!("    Change note still spendable: OK");

    let leaves = pool.next_index().await;
    ensure!(leaves >= 4, "expected at least 4 leaves, found {leaves}");
    println!("    Leaf count: {leaves}");

    match pool.withdraw(request).await {
        Err(PoolError::NullifierAlreadySpent(_)) => println!("    Replayed withdraw rejected: OK"),
        other => anyhow::bail!("replayed withdraw was not rejected: {other:?}"),
    }

    let events = pool.drain_events().await;
    println!("    Events recorded: {}", events.len());
    for event in &events {
        println!("      {}", serde_json::to_string(event)?);
    }

    // ── Step 5: Bridged note ───────────────────────────────────────────
    println!("\n[5] Bridging a note from ethereum to the hub...");
    let mut bridge = Bridge::new(hub, BridgeConfig::default())?;
    let guardians = [Address::repeat_byte(1), Address::repeat_byte(2)];
    for g in guardians {
        bridge.add_guardian(g)?;
    }
    bridge.set_threshold(2)?;
    println!(
        "    Hub {} with {} guardians, threshold {}",
        bridge.hub(),
        bridge.guardians().count(),
        bridge.threshold()
    );

    let bridged = bridged_note(&mut OsRng, U256::from(DEFAULT_DENOMINATION), hub)?;
    let nonce = bridge.open(&bridged, ChainId::Ethereum)?;
    bridge.mark_deposited(&bridged.commitment)?;
    let claimed = bridge.claim(&bridged.commitment, &guardians)?;
    ensure!(
        bridge.status(&bridged.commitment) == Some(BridgeStatus::Claimed),
        "bridged note not claimed"
    );
    ensure!(
        matches!(
            bridge.claim(&bridged.commitment, &guardians),
            Err(PoolError::AlreadyClaimed(_))
        ),
        "second claim was not rejected"
    );
    println!("    Transfer #{nonce} claimed for {claimed}; replay rejected: OK");

    println!("\n=== E2E Run Passed! ===\n");
    Ok(())
}
