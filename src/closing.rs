// Per-channel commitment state machine for a bidirectional off-chain
// payment protocol.
//
// Written in 2024 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! The closing engine: once the funding output is spent, classifies
//! the spending transaction against every commitment this node still
//! recognizes and emits the deterministic set of claim/penalty
//! transactions and watches each branch requires.

use std::collections::BTreeMap;

use bitcoin::{OutPoint, Script, Transaction, Txid};

use crate::channel::Event;
use crate::primitives::HtlcId;
use crate::tx::claim::{
    claim_htlc_success, claim_htlc_timeout, claim_local_anchor,
    claim_local_delayed, claim_remote_main, penalty_htlc, penalty_main,
};
use crate::tx::commitment::{
    build_htlc_second_stage_tx, BuiltCommitment, CommitmentKeys,
};
use crate::tx::format::CommitmentFormat;
use crate::tx::scripts::{to_local_scriptpubkey, to_remote_scriptpubkey, ToRemoteFormat};
use crate::wire::PaymentPreimage;

/// Which commitment (if any) a spend of the funding output matches.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SpendBranch {
    LocalCommit,
    RemoteCommit,
    NextRemoteCommit,
    RevokedRemoteCommit { commitment_number: u64 },
    MutualClose,
    /// Spent by something this node has no record of: a future
    /// commitment this node lost state for, e.g. after a restore from
    /// stale backup.
    Future,
}

/// Every txid this node can still recognize a funding-output spend
/// against. Built from whatever the channel's storage layer retained;
/// the closing engine itself is stateless.
#[derive(Clone, Debug, Default)]
pub struct KnownCommitments {
    pub local: Option<Txid>,
    pub remote_latest: Option<Txid>,
    pub remote_next: Option<Txid>,
    pub remote_revoked: BTreeMap<Txid, u64>,
    pub mutual_close: Vec<Txid>,
}

impl KnownCommitments {
    pub fn classify(&self, spending_txid: Txid) -> SpendBranch {
        if self.local == Some(spending_txid) {
            return SpendBranch::LocalCommit;
        }
        if self.remote_latest == Some(spending_txid) {
            return SpendBranch::RemoteCommit;
        }
        if self.remote_next == Some(spending_txid) {
            return SpendBranch::NextRemoteCommit;
        }
        if let Some(&commitment_number) = self.remote_revoked.get(&spending_txid) {
            return SpendBranch::RevokedRemoteCommit { commitment_number };
        }
        if self.mutual_close.contains(&spending_txid) {
            return SpendBranch::MutualClose;
        }
        SpendBranch::Future
    }
}

/// Static parameters the engine needs to build claim transactions;
/// these don't change once the channel is in the closing flow.
#[derive(Clone, Debug)]
pub struct ClosingParams {
    pub commitment_format: CommitmentFormat,
    pub to_remote_format: ToRemoteFormat,
    pub to_self_delay: u16,
    pub destination: Script,
    pub confirmation_depth: u32,
}

/// First reaction to a `funding_output_spent` notification, before any
/// branch-specific claim is built: the spending transaction itself is
/// unconfirmed, so it must be watched to the depth the node considers
/// final.
pub fn watch_spending_tx(spending_txid: Txid, params: &ClosingParams) -> Event {
    Event::WatchConfirmed {
        txid: spending_txid,
        depth: params.confirmation_depth,
    }
}

fn locate_output(tx: &Transaction, script: &Script) -> Option<usize> {
    tx.output.iter().position(|out| &out.script_pubkey == script)
}

/// Resolves a confirmed (or just-published) local commitment: claims
/// the delayed main output, settles HTLCs this node can already
/// settle unilaterally, and watches the rest.
pub fn resolve_local_commit(
    built: &BuiltCommitment,
    keys: &CommitmentKeys,
    params: &ClosingParams,
    preimages: &BTreeMap<HtlcId, PaymentPreimage>,
) -> Vec<Event> {
    let txid = built.tx.txid();
    let mut events = Vec::new();

    let to_local_script = to_local_scriptpubkey(
        keys.revocation_pubkey,
        keys.local_delayed_pubkey,
        params.to_self_delay,
    );
    if let Some(index) = locate_output(&built.tx, &to_local_script) {
        let outpoint = OutPoint { txid, vout: index as u32 };
        let amount = built.tx.output[index].value;
        let tx = claim_local_delayed(
            outpoint,
            amount,
            params.destination.clone(),
            params.to_self_delay,
        );
        events.push(Event::Publish(tx));
        events.push(Event::WatchConfirmed {
            txid,
            depth: params.to_self_delay as u32,
        });
    }

    if params.commitment_format.is_anchors() {
        let anchor_script = crate::tx::scripts::anchor_scriptpubkey(
            keys.local_delayed_pubkey,
        );
        if let Some(index) = locate_output(&built.tx, &anchor_script) {
            let outpoint = OutPoint { txid, vout: index as u32 };
            let amount = built.tx.output[index].value;
            events.push(Event::Publish(claim_local_anchor(
                outpoint,
                amount,
                params.destination.clone(),
            )));
        }
    }

    for placed in &built.htlc_outputs {
        let amount = built.tx.output[placed.output_index].value;
        if placed.htlc.offered {
            let tx = build_htlc_second_stage_tx(
                params.commitment_format,
                txid,
                placed.output_index as u32,
                amount,
                &placed.htlc,
                keys.revocation_pubkey,
                keys.local_delayed_pubkey,
                params.to_self_delay,
            );
            events.push(Event::Publish(tx));
        } else if preimages.contains_key(&placed.htlc.htlc_id) {
            let tx = build_htlc_second_stage_tx(
                params.commitment_format,
                txid,
                placed.output_index as u32,
                amount,
                &placed.htlc,
                keys.revocation_pubkey,
                keys.local_delayed_pubkey,
                params.to_self_delay,
            );
            events.push(Event::Publish(tx));
        }
        events.push(Event::WatchSpent {
            txid,
            vout: placed.output_index as u32,
        });
    }

    events
}

/// Once a second-stage HTLC-timeout/-success transaction this node
/// published off its own commitment confirms, its output matures the
/// same way `to_local` does.
pub fn resolve_htlc_second_stage_confirmed(
    second_stage: &Transaction,
    params: &ClosingParams,
) -> Vec<Event> {
    let txid = second_stage.txid();
    let amount = second_stage.output[0].value;
    let outpoint = OutPoint { txid, vout: 0 };
    vec![Event::Publish(crate::tx::claim::claim_htlc_delayed(
        outpoint,
        amount,
        params.destination.clone(),
        params.to_self_delay,
    ))]
}

/// Resolves a unilateral close published by the counterparty: claims
/// our own main output (unless `option_static_remotekey` makes it
/// wallet-native and there's nothing to do), pulls any HTLC this node
/// holds a preimage for, and watches the rest for their timeout.
pub fn resolve_remote_commit(
    commit_tx: &Transaction,
    commit_htlcs: &[(usize, crate::tx::commitment::HtlcView)],
    keys: &CommitmentKeys,
    params: &ClosingParams,
    preimages: &BTreeMap<HtlcId, PaymentPreimage>,
) -> Vec<Event> {
    let txid = commit_tx.txid();
    let mut events = Vec::new();

    let to_remote_script = to_remote_scriptpubkey(
        keys.remote_payment_pubkey,
        params.to_remote_format,
    );
    if let Some(index) = locate_output(commit_tx, &to_remote_script) {
        let outpoint = OutPoint { txid, vout: index as u32 };
        let amount = commit_tx.output[index].value;
        events.push(Event::Publish(claim_remote_main(
            outpoint,
            amount,
            params.destination.clone(),
            params.to_remote_format,
        )));
    }

    for (output_index, htlc) in commit_htlcs {
        let amount = commit_tx.output[*output_index].value;
        let outpoint = OutPoint { txid, vout: *output_index as u32 };
        if !htlc.offered && preimages.contains_key(&htlc.htlc_id) {
            events.push(Event::Publish(claim_htlc_success(
                outpoint,
                amount,
                params.destination.clone(),
            )));
        } else if htlc.offered {
            events.push(Event::Publish(claim_htlc_timeout(
                outpoint,
                amount,
                params.destination.clone(),
                htlc.cltv_expiry,
            )));
        }
        events.push(Event::WatchSpent { txid, vout: *output_index as u32 });
    }

    events
}

/// Resolves a breach: the counterparty published a commitment this
/// node already holds the revocation secret for. Takes their entire
/// main output and every HTLC output with the revocation key.
pub fn resolve_revoked_commit(
    commit_tx: &Transaction,
    htlc_output_indices: &[usize],
    to_local_script: &Script,
    params: &ClosingParams,
) -> Vec<Event> {
    let txid = commit_tx.txid();
    let mut events = Vec::new();

    if let Some(index) = locate_output(commit_tx, to_local_script) {
        let outpoint = OutPoint { txid, vout: index as u32 };
        let amount = commit_tx.output[index].value;
        events.push(Event::Publish(penalty_main(
            outpoint,
            amount,
            params.destination.clone(),
        )));
    }

    for &index in htlc_output_indices {
        let outpoint = OutPoint { txid, vout: index as u32 };
        let amount = commit_tx.output[index].value;
        events.push(Event::Publish(penalty_htlc(
            outpoint,
            amount,
            params.destination.clone(),
        )));
        events.push(Event::WatchSpent { txid, vout: index as u32 });
    }

    events
}

/// If the counterparty races a penalty by spending an HTLC output
/// with their own second-stage transaction, that transaction's single
/// output is still spendable with the revocation key, same shape as
/// [`resolve_revoked_commit`]'s main-output penalty.
pub fn resolve_htlc_delayed_penalty(
    second_stage: &Transaction,
    destination: Script,
) -> Vec<Event> {
    let txid = second_stage.txid();
    let amount = second_stage.output[0].value;
    vec![Event::Publish(penalty_main(
        OutPoint { txid, vout: 0 },
        amount,
        destination,
    ))]
}

#[cfg(test)]
mod test {
    use super::*;

    fn txid(byte: u8) -> Txid {
        Txid::from_slice(&[byte; 32]).unwrap()
    }

    #[test]
    fn classifies_each_known_branch() {
        let mut known = KnownCommitments {
            local: Some(txid(1)),
            remote_latest: Some(txid(2)),
            remote_next: Some(txid(3)),
            ..KnownCommitments::default()
        };
        known.remote_revoked.insert(txid(4), 7);
        known.mutual_close.push(txid(5));

        assert_eq!(known.classify(txid(1)), SpendBranch::LocalCommit);
        assert_eq!(known.classify(txid(2)), SpendBranch::RemoteCommit);
        assert_eq!(known.classify(txid(3)), SpendBranch::NextRemoteCommit);
        assert_eq!(
            known.classify(txid(4)),
            SpendBranch::RevokedRemoteCommit { commitment_number: 7 }
        );
        assert_eq!(known.classify(txid(5)), SpendBranch::MutualClose);
        assert_eq!(known.classify(txid(9)), SpendBranch::Future);
    }

    #[test]
    fn watch_spending_tx_uses_confirmation_depth() {
        let params = ClosingParams {
            commitment_format: CommitmentFormat::Legacy,
            to_remote_format: ToRemoteFormat::V1Plain,
            to_self_delay: 144,
            destination: Script::new(),
            confirmation_depth: 3,
        };
        let event = watch_spending_tx(txid(1), &params);
        assert!(matches!(
            event,
            Event::WatchConfirmed { depth: 3, .. }
        ));
    }

    #[test]
    fn revoked_commit_penalizes_main_and_htlc_outputs() {
        let to_local_script = Script::new();
        let tx = Transaction {
            version: 2,
            lock_time: bitcoin::PackedLockTime(0),
            input: vec![],
            output: vec![
                bitcoin::TxOut {
                    value: 100_000,
                    script_pubkey: to_local_script.clone(),
                },
                bitcoin::TxOut {
                    value: 5_000,
                    script_pubkey: Script::from(vec![0x51]),
                },
            ],
        };
        let params = ClosingParams {
            commitment_format: CommitmentFormat::Legacy,
            to_remote_format: ToRemoteFormat::V1Plain,
            to_self_delay: 144,
            destination: Script::new(),
            confirmation_depth: 6,
        };
        let events =
            resolve_revoked_commit(&tx, &[1], &to_local_script, &params);
        let publishes = events
            .iter()
            .filter(|e| matches!(e, Event::Publish(_)))
            .count();
        assert_eq!(publishes, 2);
    }
}
