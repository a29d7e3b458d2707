#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, U256};
    use cashio_pool::store::write_json_atomic;
    use cashio_pool::*;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    const DENOM: u64 = 1_000_000;

    fn leaf(rng: &mut StdRng) -> Commitment {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Commitment(bytes)
    }

    fn config(depth: usize) -> PoolConfig {
        PoolConfig::default()
            .with_depth(depth)
            .with_denomination(U256::from(DENOM))
    }

    fn deposit_notes(
        pool: &mut ShieldedPool<MockOracle>,
        rng: &mut StdRng,
        n: usize,
    ) -> Vec<Note> {
        (0..n)
            .map(|_| {
                let mut note = Note::random(rng, U256::from(DENOM), ChainId::Hub).unwrap();
                pool.state_mut().deposit_note(&mut note).unwrap();
                note
            })
            .collect()
    }

    /// Transfer witness spending `inputs` into fresh notes of `amounts`.
    fn transfer_witness(
        state: &PoolState,
        rng: &mut StdRng,
        inputs: [&Note; 2],
        amounts: [u64; 2],
    ) -> TransferWitness {
        let path = |n: &Note| state.tree().path(n.leaf_index.unwrap()).unwrap();
        TransferWitness {
            paths: [path(inputs[0]), path(inputs[1])],
            inputs: [inputs[0].clone(), inputs[1].clone()],
            outputs: [
                Note::random(rng, U256::from(amounts[0]), ChainId::Hub).unwrap(),
                Note::random(rng, U256::from(amounts[1]), ChainId::Hub).unwrap(),
            ],
            root: state.current_root(),
        }
    }

    fn withdraw_witness(state: &PoolState, note: &Note, recipient: Address) -> WithdrawWitness {
        WithdrawWitness {
            path: state.tree().path(note.leaf_index.unwrap()).unwrap(),
            root: state.current_root(),
            note: note.clone(),
            recipient,
            relayer: None,
            fee: U256::ZERO,
        }
    }

    fn prove_withdraw(witness: WithdrawWitness) -> WithdrawRequest {
        let proof = MockProver::new()
            .prove_blocking(ProofRequest::Withdraw {
                witness,
                denomination: U256::from(DENOM),
            })
            .unwrap();
        WithdrawRequest::from_proof(proof).unwrap()
    }

    #[test]
    fn test_stale_path_after_insert_depth_3() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut tree = CommitmentTree::new(3, 100).unwrap();
        let leaves: Vec<Commitment> = (0..6).map(|_| leaf(&mut rng)).collect();

        for l in &leaves[..5] {
            tree.insert(*l).unwrap();
        }
        let r4 = tree.current_root();
        let old_path = tree.path(2).unwrap();
        assert!(verify_path(&leaves[2], &old_path.siblings, &old_path.indices, &r4));

        tree.insert(leaves[5]).unwrap();
        let r5 = tree.current_root();
        assert_ne!(r4, r5);
        assert!(!verify_path(&leaves[2], &old_path.siblings, &old_path.indices, &r5));

        let new_path = tree.path(2).unwrap();
        assert_eq!(new_path.indices, old_path.indices);
        assert!(verify_path(&leaves[2], &new_path.siblings, &new_path.indices, &r5));
        // The old root is still a root the tree produced.
        assert!(tree.is_known_root(&r4));
    }

    #[test]
    fn test_root_determinism() {
        let mut rng = StdRng::seed_from_u64(11);
        let leaves: Vec<Commitment> = (0..37).map(|_| leaf(&mut rng)).collect();

        let mut a = CommitmentTree::new(8, 100).unwrap();
        let mut b = CommitmentTree::new(8, 10).unwrap();
        assert_eq!(a.current_root(), b.current_root());
        for l in &leaves {
            let (ia, ra) = a.insert(*l).unwrap();
            let (ib, rb) = b.insert(*l).unwrap();
            assert_eq!((ia, ra), (ib, rb));
        }
        assert_eq!(a.current_root(), b.current_root());
    }

    #[test]
    fn test_every_path_verifies_and_flips_fail() {
        let mut rng = StdRng::seed_from_u64(12);
        let mut tree = CommitmentTree::new(5, 100).unwrap();
        let leaves: Vec<Commitment> = (0..13).map(|_| leaf(&mut rng)).collect();
        for l in &leaves {
            tree.insert(*l).unwrap();
        }
        let root = tree.current_root();
        for (i, l) in leaves.iter().enumerate() {
            let path = tree.path(i as u64).unwrap();
            assert!(tree.verify_path(l, &path, &root));
            for level in 0..path.depth() {
                let mut bad = path.clone();
                bad.siblings[level].0[31] ^= 0x01;
                assert!(!tree.verify_path(l, &bad, &root), "leaf {i} level {level}");
            }
        }
    }

    #[test]
    fn test_capacity_boundary() {
        let mut rng = StdRng::seed_from_u64(13);
        let mut pool = ShieldedPool::new(config(3), MockOracle::binding()).unwrap();
        for i in 0..8u64 {
            assert_eq!(pool.deposit(leaf(&mut rng), U256::from(DENOM)).unwrap(), i);
        }
        let root = pool.current_root();
        let known = pool.state().tree().known_root_count();

        let err = pool.deposit(leaf(&mut rng), U256::from(DENOM)).unwrap_err();
        assert!(matches!(err, PoolError::TreeFull { capacity: 8 }));
        assert_eq!(pool.current_root(), root);
        assert_eq!(pool.state().next_index(), 8);
        assert_eq!(pool.state().tree().known_root_count(), known);
    }

    #[test]
    fn test_deposit_transfer_withdraw() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut pool = ShieldedPool::new(config(10), MockOracle::binding()).unwrap();
        let notes = deposit_notes(&mut pool, &mut rng, 2);

        let witness = transfer_witness(
            pool.state(),
            &mut rng,
            [&notes[0], &notes[1]],
            [DENOM, DENOM],
        );
        let mut outputs = witness.outputs.clone();
        let proof = MockProver::new()
            .prove_blocking(ProofRequest::Transfer(witness))
            .unwrap();
        let receipt = pool
            .private_transfer(&TransferRequest::from_proof(proof).unwrap())
            .unwrap();
        assert_eq!(receipt.leaf_indices, [2, 3]);
        for n in &notes {
            assert!(pool.is_spent(&n.spend_nullifier().unwrap()));
        }
        for (i, out) in outputs.iter_mut().enumerate() {
            out.mark_inserted(receipt.leaf_indices[i], receipt.root);
        }

        let recipient = Address::repeat_byte(0xDE);
        let req = prove_withdraw(withdraw_witness(pool.state(), &outputs[0], recipient));
        let withdrawal = pool.withdraw(&req).unwrap();
        assert_eq!(withdrawal.amount, U256::from(DENOM));
        assert_eq!(withdrawal.recipient, recipient);
        assert!(!pool.is_spent(&outputs[1].spend_nullifier().unwrap()));

        let events = pool.state_mut().drain_events();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[2], PoolEvent::PrivateTransfer { .. }));
        assert!(matches!(events[3], PoolEvent::Withdrawn { .. }));
    }

    #[test]
    fn test_no_double_spend_with_changed_fields() {
        let mut rng = StdRng::seed_from_u64(22);
        let mut pool = ShieldedPool::new(config(10), MockOracle::binding()).unwrap();
        let notes = deposit_notes(&mut pool, &mut rng, 3);

        let first = prove_withdraw(withdraw_witness(
            pool.state(),
            &notes[0],
            Address::repeat_byte(1),
        ));
        pool.withdraw(&first).unwrap();

        // New root, new recipient, valid proof: still the same nullifier.
        pool.deposit(leaf(&mut rng), U256::from(DENOM)).unwrap();
        let replay = prove_withdraw(withdraw_witness(
            pool.state(),
            &notes[0],
            Address::repeat_byte(2),
        ));
        assert_ne!(replay.root, first.root);
        assert!(matches!(
            pool.withdraw(&replay),
            Err(PoolError::NullifierAlreadySpent(_))
        ));

        // Spent note as one of two transfer inputs.
        let witness = transfer_witness(
            pool.state(),
            &mut rng,
            [&notes[1], &notes[0]],
            [DENOM, DENOM],
        );
        let proof = MockProver::new()
            .prove_blocking(ProofRequest::Transfer(witness))
            .unwrap();
        let before = pool.current_root();
        assert!(matches!(
            pool.private_transfer(&TransferRequest::from_proof(proof).unwrap()),
            Err(PoolError::NullifierAlreadySpent(_))
        ));
        assert!(!pool.is_spent(&notes[1].spend_nullifier().unwrap()));
        assert_eq!(pool.current_root(), before);
    }

    #[test]
    fn test_conservation_rejected_before_mutation() {
        let mut rng = StdRng::seed_from_u64(23);
        let mut pool = ShieldedPool::new(config(10), MockOracle::binding()).unwrap();
        let notes = deposit_notes(&mut pool, &mut rng, 2);
        let root = pool.current_root();

        // In-circuit check: the prover refuses.
        let witness = transfer_witness(
            pool.state(),
            &mut rng,
            [&notes[0], &notes[1]],
            [DENOM, DENOM + 1],
        );
        let err = MockProver::new()
            .prove_blocking(ProofRequest::Transfer(witness))
            .unwrap_err();
        assert!(matches!(err, PoolError::Prover(_)));

        // Plaintext check: a valid proof but declared amounts that don't balance.
        let witness = transfer_witness(
            pool.state(),
            &mut rng,
            [&notes[0], &notes[1]],
            [DENOM / 2, DENOM + DENOM / 2],
        );
        let proof = MockProver::new()
            .prove_blocking(ProofRequest::Transfer(witness))
            .unwrap();
        let mut req = TransferRequest::from_proof(proof).unwrap();
        req.amounts = Some(TransferAmounts {
            inputs: [U256::from(DENOM), U256::from(DENOM)],
            outputs: [U256::from(DENOM / 2), U256::from(DENOM)],
        });
        assert!(matches!(
            pool.private_transfer(&req),
            Err(PoolError::ValueMismatch { .. })
        ));
        assert_eq!(pool.current_root(), root);
        assert_eq!(pool.state().spent_count(), 0);
        assert_eq!(pool.state().next_index(), 2);

        req.amounts = Some(TransferAmounts {
            inputs: [U256::from(DENOM), U256::from(DENOM)],
            outputs: [U256::from(DENOM / 2), U256::from(DENOM + DENOM / 2)],
        });
        pool.private_transfer(&req).unwrap();
    }

    #[test]
    fn test_forged_proof_rejected_without_mutation() {
        let mut rng = StdRng::seed_from_u64(24);
        let mut pool = ShieldedPool::new(config(10), MockOracle::binding()).unwrap();
        let notes = deposit_notes(&mut pool, &mut rng, 1);
        let mut req = prove_withdraw(withdraw_witness(
            pool.state(),
            &notes[0],
            Address::repeat_byte(1),
        ));
        // Redirect the funds after proving.
        req.recipient = Address::repeat_byte(0x66);
        assert!(matches!(pool.withdraw(&req), Err(PoolError::InvalidProof)));
        assert_eq!(pool.state().spent_count(), 0);
    }

    #[test]
    fn test_imported_note_commitment_rederived() {
        let mut rng = StdRng::seed_from_u64(31);
        let note = Note::random(&mut rng, U256::from(DENOM), ChainId::Hub).unwrap();

        let mut file = note.to_file();
        file.amount = (DENOM * 10).to_string();
        let json = serde_json::to_string(&file).unwrap();
        assert!(matches!(
            Note::from_json(&json),
            Err(PoolError::CommitmentMismatch { .. })
        ));

        let mut bytes = note.to_bytes();
        // Flip a bit in the secret.
        bytes[40] ^= 0x80;
        let s = format!("cashio-note-v1-{}", hex::encode(&bytes));
        assert!(matches!(
            Note::from_note_string(&s),
            Err(PoolError::CommitmentMismatch { .. })
        ));

        let back = Note::from_note_string(&note.to_note_string()).unwrap();
        assert_eq!(back, note);
    }

    #[test]
    fn test_restart_continues_identically() {
        let dir = tempfile::tempdir().unwrap();
        let store = PoolStore::new(dir.path().join("pool.json"));
        let mut rng = StdRng::seed_from_u64(41);
        let leaves: Vec<Commitment> = (0..10).map(|_| leaf(&mut rng)).collect();

        let mut reference = PoolState::new(config(6)).unwrap();
        let mut restarted = PoolState::new(config(6)).unwrap();
        for (i, l) in leaves.iter().enumerate() {
            reference.deposit(*l, U256::from(DENOM)).unwrap();
            restarted.deposit(*l, U256::from(DENOM)).unwrap();
            if i % 3 == 0 {
                store.save(&restarted).unwrap();
                restarted = store.load().unwrap();
            }
        }
        assert_eq!(restarted.current_root(), reference.current_root());
        assert_eq!(
            restarted.tree().recent_roots(),
            reference.tree().recent_roots()
        );
        assert_eq!(
            restarted.tree().known_root_count(),
            reference.tree().known_root_count()
        );
        assert!(matches!(
            restarted.deposit(leaves[0], U256::from(DENOM)),
            Err(PoolError::DuplicateCommitment(_))
        ));
    }

    #[test]
    fn test_truncated_state_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        let mut state = PoolState::new(config(4)).unwrap();
        state
            .deposit(Commitment([7; 32]), U256::from(DENOM))
            .unwrap();
        let mut snapshot = state.snapshot();
        snapshot.tree.leaves.clear();
        std::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();
        assert!(matches!(
            PoolStore::new(&path).load(),
            Err(PoolError::CorruptState(_))
        ));
    }

    #[test]
    fn test_state_file_with_foreign_root_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        let mut state = PoolState::new(config(4)).unwrap();
        state
            .deposit(Commitment([7; 32]), U256::from(DENOM))
            .unwrap();
        let mut snapshot = state.snapshot();
        snapshot.tree.known_roots.push(Root([0x42; 32]));
        write_json_atomic(&path, &snapshot).unwrap();
        assert!(matches!(
            PoolStore::new(&path).load(),
            Err(PoolError::CorruptState(_))
        ));
    }

    #[tokio::test]
    async fn test_service_spends_race_once() {
        let mut rng = StdRng::seed_from_u64(51);
        let mut seed = ShieldedPool::new(config(8), MockOracle::binding()).unwrap();
        let notes = deposit_notes(&mut seed, &mut rng, 2);
        let witness = transfer_witness(
            seed.state(),
            &mut rng,
            [&notes[0], &notes[1]],
            [DENOM, DENOM],
        );
        let proof = MockProver::new()
            .prove_blocking(ProofRequest::Transfer(witness))
            .unwrap();
        let req = TransferRequest::from_proof(proof).unwrap();

        let service = PoolService::new(seed.into_state(), MockOracle::binding());
        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let service = service.clone();
                let req = req.clone();
                tokio::spawn(async move { service.private_transfer(req).await })
            })
            .collect();

        let mut ok = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(receipt) => {
                    ok += 1;
                    assert_eq!(receipt.leaf_indices, [2, 3]);
                }
                Err(PoolError::NullifierAlreadySpent(_)) => {}
                Err(e) => panic!("unexpected {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(service.next_index().await, 4);
    }

    #[tokio::test]
    async fn test_service_root_validity_window() {
        let mut rng = StdRng::seed_from_u64(52);
        let cfg = config(8)
            .with_root_history(3)
            .with_root_validity(RootValidity::RecentWindow);
        let mut seed = ShieldedPool::new(cfg, MockOracle::binding()).unwrap();
        let notes = deposit_notes(&mut seed, &mut rng, 1);
        let req = prove_withdraw(withdraw_witness(
            seed.state(),
            &notes[0],
            Address::repeat_byte(1),
        ));

        let service = PoolService::new(seed.into_state(), MockOracle::binding());
        for _ in 0..3 {
            service
                .deposit(leaf(&mut rng), U256::from(DENOM))
                .await
                .unwrap();
        }
        assert!(!service.is_known_root(&req.root).await);
        assert!(matches!(
            service.withdraw(req).await,
            Err(PoolError::InvalidRoot(_))
        ));
    }

    #[test]
    fn test_bridge_note_claimed_once() {
        let mut rng = StdRng::seed_from_u64(61);
        let mut bridge = Bridge::new(ChainId::Hub, BridgeConfig::default()).unwrap();
        let g = Address::repeat_byte(0x11);
        bridge.add_guardian(g).unwrap();

        let amount = U256::from(10u64).pow(U256::from(18u64));
        let note = bridged_note(&mut rng, amount, ChainId::Polygon).unwrap();
        assert_eq!(note.chain_tag, ChainId::Polygon);
        bridge.open(&note, ChainId::Hub).unwrap();
        bridge.mark_deposited(&note.commitment).unwrap();
        assert_eq!(bridge.claim(&note.commitment, &[g]).unwrap(), amount);
        assert!(matches!(
            bridge.claim(&note.commitment, &[g]),
            Err(PoolError::AlreadyClaimed(_))
        ));
        assert_eq!(bridge.stats().total_claimed, amount);
    }

    #[test]
    fn test_public_inputs_match_request_encoding() {
        let mut rng = StdRng::seed_from_u64(71);
        let mut pool = ShieldedPool::new(config(6), MockOracle::binding()).unwrap();
        let notes = deposit_notes(&mut pool, &mut rng, 2);
        let witness = transfer_witness(
            pool.state(),
            &mut rng,
            [&notes[0], &notes[1]],
            [DENOM, DENOM],
        );
        let proof = MockProver::new()
            .prove_blocking(ProofRequest::Transfer(witness.clone()))
            .unwrap();
        let pv = proof.encoded_inputs();
        assert_eq!(pv.len(), 160);
        assert_eq!(&pv[0..32], witness.root.as_bytes());
        assert_eq!(&pv[96..128], witness.outputs[0].commitment.as_bytes());
        let req = TransferRequest::from_proof(proof).unwrap();
        assert_eq!(req.public_inputs().encode(), pv);
    }
}
