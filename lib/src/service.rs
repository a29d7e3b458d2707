//! Shared, async access to one pool.
//!
//! Queries take the read lock. Spends check under the read lock, release it,
//! ask the oracle on the blocking pool, then take the write lock to re-check
//! and commit. Dropping a spend future before the commit leaves the pool
//! untouched.
//!
//! With a store attached, each commit snapshots the pool under the write lock
//! and writes it on the blocking pool after the lock is released. Snapshots
//! carry a sequence number so a slow write never replaces a newer one.
//!
//! Pool events accumulate until [`PoolService::drain_events`] is called, so a
//! long-running service has to drain them. Past [`crate::pool::EVENT_BUFFER`]
//! undrained events the oldest are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::U256;
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::error::{PoolError, Result};
use crate::oracle::{ProofOracle, PublicInputs};
use crate::pool::{
    check_proof, PoolEvent, PoolSnapshot, PoolState, TransferReceipt, TransferRequest,
    WithdrawReceipt, WithdrawRequest,
};
use crate::store::PoolStore;
use crate::types::{Commitment, Nullifier, Root};

/// Orders snapshot writes for one store.
struct Persister {
    store: PoolStore,
    next_seq: AtomicU64,
    /// Sequence number of the snapshot currently on disk.
    written: Mutex<u64>,
}

impl Persister {
    fn new(store: PoolStore) -> Self {
        Self {
            store,
            next_seq: AtomicU64::new(0),
            written: Mutex::new(0),
        }
    }

    /// Called under the pool write lock, so sequence order is commit order.
    fn stage(&self, state: &PoolState) -> (u64, PoolSnapshot) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        (seq, state.snapshot())
    }

    fn write(&self, seq: u64, snapshot: &PoolSnapshot) -> Result<bool> {
        let mut written = self.written.lock().unwrap_or_else(|p| p.into_inner());
        if seq <= *written {
            return Ok(false);
        }
        self.store.save_snapshot(snapshot)?;
        *written = seq;
        Ok(true)
    }
}

pub struct PoolService<O> {
    state: Arc<RwLock<PoolState>>,
    oracle: Arc<O>,
    persister: Option<Arc<Persister>>,
}

impl<O> Clone for PoolService<O> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            oracle: Arc::clone(&self.oracle),
            persister: self.persister.clone(),
        }
    }
}

impl<O: ProofOracle + 'static> PoolService<O> {
    pub fn new(state: PoolState, oracle: O) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            oracle: Arc::new(oracle),
            persister: None,
        }
    }

    /// Save the pool after every accepted mutation.
    pub fn with_store(mut self, store: PoolStore) -> Self {
        self.persister = Some(Arc::new(Persister::new(store)));
        self
    }

    /// Open the pool saved in `store`, or start `fresh` if nothing is saved.
    pub fn open(store: PoolStore, fresh: PoolState, oracle: O) -> Result<Self> {
        let state = if store.exists() { store.load()? } else { fresh };
        Ok(Self::new(state, oracle).with_store(store))
    }

    pub async fn current_root(&self) -> Root {
        self.state.read().await.current_root()
    }

    pub async fn is_known_root(&self, root: &Root) -> bool {
        self.state.read().await.is_known_root(root)
    }

    pub async fn is_spent(&self, nullifier: &Nullifier) -> bool {
        self.state.read().await.is_spent(nullifier)
    }

    pub async fn next_index(&self) -> u64 {
        self.state.read().await.next_index()
    }

    pub async fn drain_events(&self) -> Vec<PoolEvent> {
        self.state.write().await.drain_events()
    }

    /// Run `f` against a consistent view of the pool.
    pub async fn read<R>(&self, f: impl FnOnce(&PoolState) -> R) -> R {
        f(&*self.state.read().await)
    }

    pub async fn deposit(&self, commitment: Commitment, value: U256) -> Result<u64> {
        let (leaf_index, staged) = {
            let mut state = self.state.write().await;
            let leaf_index = state.deposit(commitment, value)?;
            (leaf_index, self.stage(&state))
        };
        self.persist(staged).await;
        Ok(leaf_index)
    }

    pub async fn withdraw(&self, req: WithdrawRequest) -> Result<WithdrawReceipt> {
        let inputs = self.state.read().await.check_withdraw(&req)?;
        self.verify(inputs, req.proof.clone()).await?;

        let (receipt, staged) = {
            let mut state = self.state.write().await;
            let receipt = state.apply_withdraw(&req)?;
            (receipt, self.stage(&state))
        };
        self.persist(staged).await;
        Ok(receipt)
    }

    pub async fn private_transfer(&self, req: TransferRequest) -> Result<TransferReceipt> {
        let inputs = self.state.read().await.check_transfer(&req)?;
        self.verify(inputs, req.proof.clone()).await?;

        let (receipt, staged) = {
            let mut state = self.state.write().await;
            let receipt = state.apply_transfer(&req)?;
            (receipt, self.stage(&state))
        };
        self.persist(staged).await;
        Ok(receipt)
    }

    async fn verify(&self, inputs: PublicInputs, proof: Vec<u8>) -> Result<()> {
        let oracle = Arc::clone(&self.oracle);
        tokio::task::spawn_blocking(move || check_proof(&*oracle, &inputs, &proof))
            .await
            .map_err(|e| PoolError::Oracle(format!("verifier task failed: {e}")))?
    }

    fn stage(&self, state: &PoolState) -> Option<(u64, PoolSnapshot)> {
        self.persister.as_ref().map(|p| p.stage(state))
    }

    /// The in-memory state is authoritative once applied; a failed save is
    /// logged and retried on the next mutation.
    async fn persist(&self, staged: Option<(u64, PoolSnapshot)>) {
        let (Some(persister), Some((seq, snapshot))) = (&self.persister, staged) else {
            return;
        };
        let persister = Arc::clone(persister);
        let path = persister.store.path().display().to_string();
        match tokio::task::spawn_blocking(move || persister.write(seq, &snapshot)).await {
            Ok(Ok(true)) => debug!(%path, seq, "pool persisted"),
            Ok(Ok(false)) => debug!(%path, seq, "newer snapshot already on disk"),
            Ok(Err(e)) => error!(%path, error = %e, "failed to persist pool state"),
            Err(e) => error!(%path, error = %e, "persist task failed"),
        }
    }
}
