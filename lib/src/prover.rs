//! Two-phase proof generation.
//!
//! `begin_proof` hands a witness to the prover and returns immediately with a
//! handle; `poll_proof` reports progress. Callers pick their own scheduling:
//! spin on a thread, poll from an async task, or drive it from an actor.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::circuit::{TransferWitness, WithdrawWitness};
use crate::error::{PoolError, Result};
use crate::oracle::{mock_proof, CircuitId, PublicInputs};

/// What to prove.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ProofRequest {
    Withdraw {
        witness: WithdrawWitness,
        denomination: U256,
    },
    Transfer(TransferWitness),
}

impl ProofRequest {
    /// Runs the statement natively. A real prover would fail the same way.
    pub fn execute(&self) -> Result<PublicInputs> {
        let statement = match self {
            ProofRequest::Withdraw {
                witness,
                denomination,
            } => witness.statement(*denomination),
            ProofRequest::Transfer(witness) => witness.statement(),
        };
        statement.map_err(|e| PoolError::Prover(e.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedProof {
    pub circuit: CircuitId,
    pub proof: Vec<u8>,
    pub public_inputs: PublicInputs,
}

impl GeneratedProof {
    pub fn encoded_inputs(&self) -> Vec<u8> {
        self.public_inputs.encode()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProofHandle(pub u64);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProofStatus {
    Pending,
    Ready(GeneratedProof),
    Failed(String),
}

pub trait Prover: Send + Sync {
    fn begin_proof(&self, request: ProofRequest) -> Result<ProofHandle>;

    /// A terminal status (`Ready`/`Failed`) is returned once; the handle is
    /// forgotten afterwards and further polls fail with `PoolError::Prover`.
    fn poll_proof(&self, handle: &ProofHandle) -> Result<ProofStatus>;

    /// Blocks the calling thread until the job finishes.
    fn prove_blocking(&self, request: ProofRequest) -> Result<GeneratedProof> {
        let handle = self.begin_proof(request)?;
        loop {
            match self.poll_proof(&handle)? {
                ProofStatus::Pending => thread::sleep(Duration::from_millis(5)),
                ProofStatus::Ready(proof) => return Ok(proof),
                ProofStatus::Failed(reason) => return Err(PoolError::Prover(reason)),
            }
        }
    }
}

type Jobs = Arc<Mutex<HashMap<u64, ProofStatus>>>;

/// Runs the native statement on a worker thread and emits a proof the
/// binding [`crate::oracle::MockOracle`] accepts.
#[derive(Clone, Default)]
pub struct MockProver {
    next_id: Arc<AtomicU64>,
    jobs: Jobs,
    delay: Duration,
}

impl MockProver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated proving time per job.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn pending_jobs(&self) -> usize {
        lock(&self.jobs)
            .values()
            .filter(|s| matches!(s, ProofStatus::Pending))
            .count()
    }
}

/// A panicking statement still ends the job, so pollers never wait forever.
fn run_job(id: u64, prove: impl FnOnce() -> Result<PublicInputs>) -> ProofStatus {
    match panic::catch_unwind(AssertUnwindSafe(prove)) {
        Ok(Ok(public_inputs)) => {
            let circuit = public_inputs.circuit();
            let proof = mock_proof(circuit, &public_inputs.encode());
            ProofStatus::Ready(GeneratedProof {
                circuit,
                proof,
                public_inputs,
            })
        }
        Ok(Err(e)) => {
            warn!(job = id, error = %e, "statement does not hold");
            ProofStatus::Failed(e.to_string())
        }
        Err(_) => {
            error!(job = id, "prover worker panicked");
            ProofStatus::Failed("prover worker panicked".into())
        }
    }
}

fn lock(jobs: &Jobs) -> MutexGuard<'_, HashMap<u64, ProofStatus>> {
    jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Prover for MockProver {
    fn begin_proof(&self, request: ProofRequest) -> Result<ProofHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.jobs).insert(id, ProofStatus::Pending);

        let jobs = Arc::clone(&self.jobs);
        let delay = self.delay;
        thread::Builder::new()
            .name(format!("mock-prover-{id}"))
            .spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                let status = run_job(id, || request.execute());
                lock(&jobs).insert(id, status);
            })
            .map_err(|e| {
                lock(&self.jobs).remove(&id);
                PoolError::Prover(format!("cannot spawn prover thread: {e}"))
            })?;

        debug!(job = id, "proof job started");
        Ok(ProofHandle(id))
    }

    fn poll_proof(&self, handle: &ProofHandle) -> Result<ProofStatus> {
        let mut jobs = lock(&self.jobs);
        match jobs.get(&handle.0) {
            None => Err(PoolError::Prover(format!("unknown proof job {}", handle.0))),
            Some(ProofStatus::Pending) => Ok(ProofStatus::Pending),
            Some(_) => Ok(jobs.remove(&handle.0).unwrap_or(ProofStatus::Pending)),
        }
    }
}
