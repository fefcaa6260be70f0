//! End-to-end tests for the Caligo node core.
//!
//! These exercise the public API across modules to verify complete flows:
//! address round-trips, mempool admission with the per-sender uniqueness
//! predicates, the delegated-stake lifecycle from staking through a
//! confidential claim and transfer, and apply/rewind equivalence.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use caligo::accounts::plain::PlainAccount;
use caligo::accounts::{PlainAccountsCollection, PlainAccountsReader};
use caligo::address::{Address, AddressError};
use caligo::block::BlockComplete;
use caligo::config::{CaligoConfig, Network};
use caligo::constants::{NATIVE_ASSET, NETWORK_PREFIX_LENGTH, UNSTAKE_WINDOW};
use caligo::crypto::dlp::DlpTable;
use caligo::crypto::keys::{Keypair, PublicKey};
use caligo::mempool::MempoolError;
use caligo::node::Node;
use caligo::store::SledStore;
use caligo::transaction::simple::{SimplePayload, SimpleTx};
use caligo::transaction::Transaction;
use caligo::wallet::Wallet;

// ── Helpers ─────────────────────────────────────────────────────────────

const NETWORK: Network = Network::Devnet;

fn test_node() -> Node {
    let store = Arc::new(SledStore::open_temporary().unwrap());
    Node::with_store(CaligoConfig::default(), store, 1_000).unwrap()
}

/// Seed a plain account directly in the store (pre-chain balances).
fn seed_plain_account<F: FnOnce(&mut PlainAccount)>(node: &Node, pk: &PublicKey, setup: F) {
    let mut account = PlainAccount::new();
    setup(&mut account);
    let mut txn = node.chain().store().begin_write();
    PlainAccountsCollection::new(&mut txn)
        .create_or_update(pk, &account)
        .unwrap();
    txn.commit().unwrap();
}

fn plain_account(node: &Node, pk: &PublicKey) -> Option<PlainAccount> {
    let head = node.chain().head();
    PlainAccountsReader::new(node.chain().store().as_ref())
        .get(pk, head.height)
        .unwrap()
}

/// Propose and apply a block over the given transactions.
async fn forge_block(node: &Node, transactions: Vec<Transaction>, forger: &PublicKey) {
    let head = node.chain().head();
    let block = node.propose_block(transactions, *forger, head.timestamp + 1);
    node.apply_block(block).await.unwrap();
}

fn simple_tx(kp: &Keypair, payload: SimplePayload, nonce: u64, fee: u64) -> Transaction {
    Transaction::Simple(SimpleTx::sign(payload, nonce, fee, kp, NETWORK))
}

// ── Scenario 1 & 2: address round-trip and tamper detection ─────────────

#[test]
fn address_roundtrip_integrated() {
    let addr = Address {
        network: Network::Devnet,
        version: caligo::address::AddressVersion::SimplePublicKey,
        public_key: PublicKey([1u8; 32]),
        registration: None,
        payment_id: Some([1, 2, 3, 4, 5, 6, 7, 8]),
        payment_amount: Some(1000),
        payment_asset: None,
    };
    let encoded = addr.encode();
    assert!(encoded.starts_with("PDN"));
    let decoded = Address::decode(&encoded, Network::Devnet).unwrap();
    assert_eq!(decoded, addr);
}

#[test]
fn address_tampering_always_detected() {
    let addr = Address {
        network: Network::Devnet,
        version: caligo::address::AddressVersion::SimplePublicKey,
        public_key: PublicKey([1u8; 32]),
        registration: None,
        payment_id: Some([1, 2, 3, 4, 5, 6, 7, 8]),
        payment_amount: Some(1000),
        payment_asset: None,
    };
    let encoded = addr.encode();
    for i in NETWORK_PREFIX_LENGTH..encoded.len() {
        let mut chars: Vec<char> = encoded.chars().collect();
        chars[i] = if chars[i] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();
        if tampered == encoded {
            continue;
        }
        match Address::decode(&tampered, Network::Devnet) {
            Err(AddressError::InvalidChecksum)
            | Err(AddressError::Truncated)
            | Err(AddressError::InvalidLength)
            | Err(AddressError::InvalidVersion) => {}
            Err(other) => panic!("unexpected error class at {i}: {other:?}"),
            Ok(decoded) => panic!("tampered address decoded at {i}: {decoded:?}"),
        }
    }
}

// ── Scenario 3: unstake admission and conflict ──────────────────────────

#[tokio::test]
async fn unstake_admission_conflict() {
    let node = test_node();
    let kp = Keypair::generate();
    seed_plain_account(&node, &kp.public, |a| a.credit_stake(100_000));

    let first = simple_tx(&kp, SimplePayload::Unstake { amount: 60_000 }, 0, 2_000);
    node.mempool_insert(first, None, None).unwrap();

    // a second pending unstake from the same sender is rejected
    let second = simple_tx(&kp, SimplePayload::Unstake { amount: 10_000 }, 0, 2_000);
    assert!(matches!(
        node.mempool_insert(second, None, None),
        Err(MempoolError::ConflictingPending)
    ));

    // another sender is unaffected
    let other = Keypair::generate();
    seed_plain_account(&node, &other.public, |a| a.credit_stake(100_000));
    let third = simple_tx(&other, SimplePayload::Unstake { amount: 10_000 }, 0, 2_000);
    node.mempool_insert(third, None, None).unwrap();
}

// ── Scenario 4: claim uniqueness ────────────────────────────────────────

#[tokio::test]
async fn claim_uniqueness() {
    let node = test_node();
    let wallet = Wallet::new([41u8; 32]);
    let delegate = Keypair::from_seed(b"claim-uniq-delegate");

    let claimer = Keypair::generate();
    seed_plain_account(&node, &claimer.public, |a| {
        a.unclaimed_rewards = 110_000;
        a.set_delegate(delegate.public);
    });

    // four recipients of 20k each within one zether claim
    let recipients: Vec<Keypair> = (0..4)
        .map(|i| Keypair::from_seed(format!("claim-recipient-{i}").as_bytes()))
        .collect();
    let ring: Vec<PublicKey> = recipients.iter().map(|kp| kp.public).collect();
    let registrations: Vec<_> = recipients
        .iter()
        .map(|kp| Some(kp.sign_registration()))
        .collect();

    let head = node.chain().head();
    let claim = wallet
        .build_claim(
            NETWORK,
            NATIVE_ASSET,
            (head.height, head.hash),
            &ring,
            &[(0, 20_000), (1, 20_000), (2, 20_000), (3, 20_000)],
            30_000,
            claimer.public,
            0,
            110_000,
            &delegate,
            &registrations,
        )
        .unwrap();
    node.mempool_insert(claim, None, None).unwrap();

    // a second pending claim from the same claimer conflicts
    let second = wallet
        .build_claim(
            NETWORK,
            NATIVE_ASSET,
            (head.height, head.hash),
            &ring,
            &[(0, 80_000)],
            30_000,
            claimer.public,
            0,
            110_000,
            &delegate,
            &registrations,
        )
        .unwrap();
    assert!(matches!(
        node.mempool_insert(second, None, None),
        Err(MempoolError::ConflictingPending)
    ));
}

// ── Scenario 5: rewind correctness ──────────────────────────────────────

#[tokio::test]
async fn rewind_equals_straight_application() {
    // Two nodes over the same genesis; blocks are built once and shared so
    // both nodes see byte-identical history.
    let node_a = test_node();
    let node_b = test_node();

    let alice = Keypair::from_seed(b"rewind-alice");
    let bob = Keypair::from_seed(b"rewind-bob");
    for node in [&node_a, &node_b] {
        seed_plain_account(node, &alice.public, |a| a.credit_stake(500_000));
        seed_plain_account(node, &bob.public, |a| a.credit_stake(500_000));
    }
    let forger = Keypair::from_seed(b"rewind-forger").public;

    let build = |node: &Node, txs: Vec<Transaction>, ts: u64| -> BlockComplete {
        let head = node.chain().head();
        node.propose_block(txs, forger, head.timestamp + ts)
    };

    // B1: alice unstakes; B2/B3 and B2'/B3' move nonces and stake around.
    let b1 = build(
        &node_a,
        vec![simple_tx(
            &alice,
            SimplePayload::Unstake { amount: 100_000 },
            0,
            2_000,
        )],
        1,
    );
    node_a.apply_block(b1.clone()).await.unwrap();

    let b2 = build(
        &node_a,
        vec![simple_tx(&bob, SimplePayload::Normal, 0, 2_000)],
        1,
    );
    node_a.apply_block(b2.clone()).await.unwrap();
    let b3 = build(
        &node_a,
        vec![simple_tx(&alice, SimplePayload::Normal, 1, 2_000)],
        1,
    );
    node_a.apply_block(b3.clone()).await.unwrap();

    // Rewind A to height 1, then apply the alternative b2'/b3'.
    node_a.rewind_to(1).await.unwrap();
    let b2_alt = build(
        &node_a,
        vec![simple_tx(
            &bob,
            SimplePayload::Unstake { amount: 50_000 },
            0,
            2_000,
        )],
        2,
    );
    node_a.apply_block(b2_alt.clone()).await.unwrap();
    let b3_alt = build(
        &node_a,
        vec![simple_tx(
            &alice,
            SimplePayload::UpdateDelegate {
                delegate: forger,
            },
            1,
            2_000,
        )],
        1,
    );
    node_a.apply_block(b3_alt.clone()).await.unwrap();

    // Node B applies only the net history.
    node_b.apply_block(b1).await.unwrap();
    node_b.apply_block(b2_alt).await.unwrap();
    node_b.apply_block(b3_alt).await.unwrap();

    assert_eq!(node_a.chain().head(), node_b.chain().head());
    for pk in [&alice.public, &bob.public, &forger] {
        assert_eq!(plain_account(&node_a, pk), plain_account(&node_b, pk));
    }
}

// ── Scenario 6 + lifecycle: stake → unstake → claim → transfer ──────────

#[tokio::test]
async fn full_confidential_lifecycle() {
    let node = test_node();
    let forger = Keypair::from_seed(b"lifecycle-forger").public;

    let mut wallet = Wallet::new([99u8; 32]);
    let sender = wallet.derive_next("sender").keypair.clone();
    let recipient = wallet.derive_next("recipient").keypair.clone();
    let delegate = Keypair::from_seed(b"lifecycle-delegate");

    seed_plain_account(&node, &sender.public, |a| a.credit_stake(500_000));

    // Register the delegate, then unstake.
    let tx = simple_tx(
        &sender,
        SimplePayload::UpdateDelegate {
            delegate: delegate.public,
        },
        0,
        2_000,
    );
    node.mempool_insert(tx, None, None).unwrap();
    forge_block(&node, node.select_transactions(usize::MAX), &forger).await;

    let tx = simple_tx(&sender, SimplePayload::Unstake { amount: 200_000 }, 1, 2_000);
    node.mempool_insert(tx, None, None).unwrap();
    forge_block(&node, node.select_transactions(usize::MAX), &forger).await;

    // Nothing claimable until the unstake window passes.
    let account = plain_account(&node, &sender.public).unwrap();
    assert_eq!(account.unclaimed_rewards, 0);
    assert_eq!(account.delegated_stake.pending_unstakes.len(), 1);

    for _ in 0..UNSTAKE_WINDOW {
        forge_block(&node, vec![], &forger).await;
    }
    let account = plain_account(&node, &sender.public).unwrap();
    assert_eq!(account.unclaimed_rewards, 200_000);

    // Claim: mint 170k confidentially to the sender's own account.
    let decoys: Vec<Keypair> = (0..3)
        .map(|i| Keypair::from_seed(format!("lifecycle-decoy-{i}").as_bytes()))
        .collect();
    let mut claim_ring = vec![sender.public];
    claim_ring.extend(decoys.iter().map(|kp| kp.public));
    let mut claim_regs = vec![Some(sender.sign_registration())];
    claim_regs.extend(decoys.iter().map(|kp| Some(kp.sign_registration())));

    let head = node.chain().head();
    let claim = wallet
        .build_claim(
            NETWORK,
            NATIVE_ASSET,
            (head.height, head.hash),
            &claim_ring,
            &[(0, 170_000)],
            30_000,
            sender.public,
            2,
            200_000,
            &delegate,
            &claim_regs,
        )
        .unwrap();
    node.mempool_insert(claim, None, None).unwrap();
    forge_block(&node, node.select_transactions(usize::MAX), &forger).await;

    let account = plain_account(&node, &sender.public).unwrap();
    assert_eq!(account.unclaimed_rewards, 0);
    assert_eq!(account.nonce, 3);

    // The confidential balance decrypts to the minted amount.
    let table = DlpTable::new(18);
    let ctx = CancellationToken::new();
    let balance_ct = node
        .get_account(&NATIVE_ASSET, &sender.public)
        .unwrap()
        .unwrap()
        .balance;
    assert_eq!(
        wallet
            .decrypt_balance(&sender.public, &balance_ct, &table, &ctx)
            .unwrap(),
        170_000
    );

    // Confidential transfer of 5k to the recipient inside a ring of 8.
    // The recipient hands out an address carrying its registration; the
    // sender decodes it and the embedded signature covers the fresh
    // account in the ring.
    let encoded = wallet
        .get(&recipient.public)
        .unwrap()
        .registration_address(NETWORK)
        .encode();
    let recipient_address = Address::decode(&encoded, NETWORK).unwrap();
    assert_eq!(recipient_address.public_key, recipient.public);

    let transfer_decoys: Vec<Keypair> = (0..6)
        .map(|i| Keypair::from_seed(format!("transfer-decoy-{i}").as_bytes()))
        .collect();
    let mut ring = vec![sender.public, recipient_address.public_key];
    ring.extend(transfer_decoys.iter().map(|kp| kp.public));
    let mut registrations = vec![None, recipient_address.registration];
    registrations.extend(transfer_decoys.iter().map(|kp| Some(kp.sign_registration())));

    let head = node.chain().head();
    let transfer = wallet
        .build_transfer(
            NETWORK,
            NATIVE_ASSET,
            (head.height, head.hash),
            &ring,
            0,
            &[(1, 5_000)],
            30_000,
            &registrations,
        )
        .unwrap();
    node.mempool_insert(transfer, None, None).unwrap();
    forge_block(&node, node.select_transactions(usize::MAX), &forger).await;

    // Decrypt every ring member's balance: amounts moved, conservation
    // holds (total changed only by the fee), decoys still hold zero.
    let decrypt = |kp: &Keypair| -> u64 {
        let ct = node
            .get_account(&NATIVE_ASSET, &kp.public)
            .unwrap()
            .unwrap()
            .balance;
        let point = ct.decrypt_point(&kp.secret);
        table.solve(&point, &ctx).unwrap()
    };
    assert_eq!(decrypt(&sender), 135_000); // 170k − 5k − 30k fee
    assert_eq!(decrypt(&recipient), 5_000);
    let mut total = decrypt(&sender) + decrypt(&recipient);
    for decoy in &transfer_decoys {
        let balance = decrypt(decoy);
        assert_eq!(balance, 0);
        total += balance;
    }
    assert_eq!(total, 170_000 - 30_000);
}

// ── Mempool eviction on chain advance ───────────────────────────────────

#[tokio::test]
async fn stale_mempool_entries_evicted_on_advance() {
    let node = test_node();
    let forger = Keypair::from_seed(b"evict-forger").public;
    let kp = Keypair::generate();
    seed_plain_account(&node, &kp.public, |a| a.credit_stake(100_000));

    // Two competing transactions with the same nonce; only one can land.
    let tx_a = simple_tx(&kp, SimplePayload::Normal, 0, 2_000);
    let tx_b = simple_tx(&kp, SimplePayload::Unstake { amount: 10_000 }, 0, 2_500);
    node.mempool_insert(tx_a.clone(), None, None).unwrap();
    node.mempool_insert(tx_b, None, None).unwrap();
    assert_eq!(node.get_mempool().len(), 2);

    // Include only tx_a; the nonce advance invalidates the other entry.
    forge_block(&node, vec![tx_a], &forger).await;
    assert!(node.get_mempool().is_empty());
}

// ── Rewound transactions return to the pool ─────────────────────────────

#[tokio::test]
async fn rewind_readmits_transactions() {
    let node = test_node();
    let forger = Keypair::from_seed(b"readmit-forger").public;
    let kp = Keypair::generate();
    seed_plain_account(&node, &kp.public, |a| a.credit_stake(100_000));

    let tx = simple_tx(&kp, SimplePayload::Unstake { amount: 10_000 }, 0, 2_000);
    node.mempool_insert(tx.clone(), None, None).unwrap();
    forge_block(&node, node.select_transactions(usize::MAX), &forger).await;
    assert!(node.get_mempool().is_empty());

    node.rewind_to(0).await.unwrap();
    let pending = node.get_mempool();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0], tx);
}
