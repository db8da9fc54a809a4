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

//! Tracks a channel's commitment pair -- the commitment we could
//! broadcast (`local_commit`) and the one we've signed for our peer
//! (`remote_commit`), plus at most one `next_remote_commit` awaiting
//! their `revoke_and_ack` -- across the propose/sign/revoke cycle, and
//! answers how much either side may currently add to the channel.
//!
//! The two pipelines advance independently: [`Self::sign_next_remote_commitment`]
//! and [`Self::receive_revoke_and_ack`] move changes into and out of
//! `next_remote_commit`; [`Self::receive_commitment_signed`] and
//! [`Self::commit_local`] fold changes straight into `local_commit`,
//! since this ledger always responds to a valid `commitment_signed`
//! with an immediate `revoke_and_ack` rather than staging one of its
//! own. [`Self::cross_sign`] drives both in lockstep for callers that
//! don't need the two pipelines to diverge.

use crate::ledger::changes::{ChangeCategory, ChangeKind, ChangeLog, PendingChange};
use crate::ledger::origin::Origin;
use crate::ledger::spec::{CommitmentSpec, HtlcDirection, HtlcInSpec};
use crate::policy::BOLT3_MAX_ACCEPTED_HTLC_LIMIT;
use crate::primitives::HtlcId;
use crate::tx::format::{
    commit_fee, offered_htlc_dust_threshold, received_htlc_dust_threshold,
    CommitmentFormat,
};
use crate::wire::{PaymentHash, PaymentPreimage};

#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum LedgerError {
    /// proposed HTLC amount {0} msat is below the minimum of 1 msat
    ZeroAmount(u64),
    /// proposing side cannot afford an HTLC of {0} msat after reserve and fees
    InsufficientBalance(u64),
    /// number of live HTLCs already at the negotiated or protocol maximum
    TooManyHtlcs,
    /// no such HTLC id {0} in the pending view
    UnknownHtlc(HtlcId),
    /// HTLC {0} was not offered by the side now trying to resolve it
    NotResolvable(HtlcId),
    /// provided preimage does not hash to the stored payment_hash for HTLC {0}
    PreimageMismatch(HtlcId),
    /// a commitment signature is already outstanding, awaiting revoke_and_ack
    SignatureAlreadyPending,
    /// received a revoke_and_ack but no commitment signature is outstanding
    NoPendingSignature,
}

/// Holds the channel's commitment pair and the log of changes still
/// settling into one or both of them.
#[derive(Clone, Debug)]
pub struct CommitmentLedger {
    capacity_msat: u64,
    funder: Origin,
    local_reserve_sat: u64,
    remote_reserve_sat: u64,
    dust_limit_sat: u64,
    format: CommitmentFormat,
    max_accepted_htlcs: u16,

    local_commit: CommitmentSpec,
    remote_commit: CommitmentSpec,
    next_remote_commit: Option<CommitmentSpec>,

    changes: ChangeLog,
    local_commitment_number: u64,
    remote_commitment_number: u64,
    next_htlc_id: HtlcId,
}

impl CommitmentLedger {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        capacity_msat: u64,
        funder: Origin,
        to_local_msat: u64,
        to_remote_msat: u64,
        feerate_per_kw: u32,
        local_reserve_sat: u64,
        remote_reserve_sat: u64,
        dust_limit_sat: u64,
        format: CommitmentFormat,
        max_accepted_htlcs: u16,
    ) -> Self {
        let opening = CommitmentSpec {
            to_local_msat,
            to_remote_msat,
            feerate_per_kw,
            htlcs: Vec::new(),
        };
        CommitmentLedger {
            capacity_msat,
            funder,
            local_reserve_sat,
            remote_reserve_sat,
            dust_limit_sat,
            format,
            max_accepted_htlcs,
            local_commit: opening.clone(),
            remote_commit: opening,
            next_remote_commit: None,
            changes: ChangeLog::new(),
            local_commitment_number: 0,
            remote_commitment_number: 0,
            next_htlc_id: 0,
        }
    }

    pub fn local_commitment_number(&self) -> u64 {
        self.local_commitment_number
    }

    pub fn remote_commitment_number(&self) -> u64 {
        self.remote_commitment_number
    }

    pub fn local_commit(&self) -> &CommitmentSpec {
        &self.local_commit
    }

    pub fn remote_commit(&self) -> &CommitmentSpec {
        &self.remote_commit
    }

    pub fn next_remote_commit(&self) -> Option<&CommitmentSpec> {
        self.next_remote_commit.as_ref()
    }

    fn fold_changes<'a>(
        base: &CommitmentSpec,
        entries: impl Iterator<Item = &'a PendingChange>,
    ) -> CommitmentSpec {
        let mut to_local_msat = base.to_local_msat;
        let mut to_remote_msat = base.to_remote_msat;
        let mut feerate_per_kw = base.feerate_per_kw;
        let mut htlcs = base.htlcs.clone();

        for change in entries {
            match &change.kind {
                ChangeKind::AddHtlc {
                    htlc_id,
                    amount_msat,
                    payment_hash,
                    cltv_expiry,
                } => {
                    let direction = match change.origin {
                        Origin::Local => HtlcDirection::Offered,
                        Origin::Remote => HtlcDirection::Received,
                    };
                    htlcs.push(HtlcInSpec {
                        htlc_id: *htlc_id,
                        direction,
                        amount_msat: *amount_msat,
                        payment_hash: *payment_hash,
                        cltv_expiry: *cltv_expiry,
                    });
                }
                ChangeKind::FulfillHtlc { htlc_id, .. } => {
                    if let Some(pos) =
                        htlcs.iter().position(|h| h.htlc_id == *htlc_id)
                    {
                        let htlc = htlcs.remove(pos);
                        match htlc.direction {
                            HtlcDirection::Offered => {
                                to_remote_msat += htlc.amount_msat
                            }
                            HtlcDirection::Received => {
                                to_local_msat += htlc.amount_msat
                            }
                        }
                    }
                }
                ChangeKind::FailHtlc { htlc_id }
                | ChangeKind::FailMalformedHtlc { htlc_id } => {
                    if let Some(pos) =
                        htlcs.iter().position(|h| h.htlc_id == *htlc_id)
                    {
                        let htlc = htlcs.remove(pos);
                        match htlc.direction {
                            HtlcDirection::Offered => {
                                to_local_msat += htlc.amount_msat
                            }
                            HtlcDirection::Received => {
                                to_remote_msat += htlc.amount_msat
                            }
                        }
                    }
                }
                ChangeKind::UpdateFee { feerate_per_kw: new_rate } => {
                    feerate_per_kw = *new_rate;
                }
            }
        }

        CommitmentSpec { to_local_msat, to_remote_msat, feerate_per_kw, htlcs }
    }

    /// The balances and HTLC set that would result if every currently
    /// outstanding change settled into both commitments. Used to
    /// validate new proposals and compute availability; not itself a
    /// signable commitment.
    pub fn pending_view(&self) -> CommitmentSpec {
        Self::fold_changes(&self.remote_commit, self.changes.iter())
    }

    /// How many millisatoshi `origin` could still add as a new
    /// outgoing HTLC, after reserve and (if `origin` is the funder)
    /// the commitment fee its addition would itself cause.
    pub fn available_to_offer_msat(&self, origin: Origin) -> u64 {
        let view = self.pending_view();
        let (own_msat, reserve_sat) = match origin {
            Origin::Local => (view.to_local_msat, self.local_reserve_sat),
            Origin::Remote => (view.to_remote_msat, self.remote_reserve_sat),
        };
        let reserve_msat = reserve_sat * 1000;

        let surviving = view
            .htlcs
            .iter()
            .filter(|h| {
                let amount_sat = h.amount_msat / 1000;
                let offered_by_origin = match (origin, h.direction) {
                    (Origin::Local, HtlcDirection::Offered) => true,
                    (Origin::Remote, HtlcDirection::Received) => true,
                    _ => false,
                };
                let threshold = if offered_by_origin {
                    offered_htlc_dust_threshold(
                        self.format,
                        self.dust_limit_sat,
                        view.feerate_per_kw,
                    )
                } else {
                    received_htlc_dust_threshold(
                        self.format,
                        self.dust_limit_sat,
                        view.feerate_per_kw,
                    )
                };
                amount_sat >= threshold
            })
            .count();

        let fee_msat = if origin == self.funder {
            let fee_sat = commit_fee(
                self.format,
                view.feerate_per_kw,
                surviving + 1, // the HTLC about to be added
            ) + self.format.anchor_count() * self.format.anchor_amount_sat();
            fee_sat * 1000
        } else {
            0
        };

        own_msat.saturating_sub(reserve_msat).saturating_sub(fee_msat)
    }

    fn validate_add(
        &self,
        origin: Origin,
        amount_msat: u64,
    ) -> Result<(), LedgerError> {
        if amount_msat == 0 {
            return Err(LedgerError::ZeroAmount(amount_msat));
        }
        if amount_msat > self.available_to_offer_msat(origin) {
            return Err(LedgerError::InsufficientBalance(amount_msat));
        }
        let view = self.pending_view();
        let live = view
            .htlcs
            .iter()
            .filter(|h| match (origin, h.direction) {
                (Origin::Local, HtlcDirection::Offered) => true,
                (Origin::Remote, HtlcDirection::Received) => true,
                _ => false,
            })
            .count();
        if live as u16 >= self.max_accepted_htlcs
            || live >= BOLT3_MAX_ACCEPTED_HTLC_LIMIT as usize
        {
            return Err(LedgerError::TooManyHtlcs);
        }
        Ok(())
    }

    /// Proposes adding a new outgoing HTLC on behalf of `origin`,
    /// returning its freshly-assigned id.
    pub fn propose_add_htlc(
        &mut self,
        origin: Origin,
        amount_msat: u64,
        payment_hash: PaymentHash,
        cltv_expiry: u32,
    ) -> Result<HtlcId, LedgerError> {
        self.validate_add(origin, amount_msat)?;
        let htlc_id = self.next_htlc_id;
        self.next_htlc_id += 1;
        self.changes.push(
            origin,
            ChangeKind::AddHtlc { htlc_id, amount_msat, payment_hash, cltv_expiry },
        );
        Ok(htlc_id)
    }

    fn offered_by(&self, htlc: &HtlcInSpec, resolver: Origin) -> bool {
        match (resolver, htlc.direction) {
            (Origin::Local, HtlcDirection::Received) => true,
            (Origin::Remote, HtlcDirection::Offered) => true,
            _ => false,
        }
    }

    /// Proposes fulfilling an HTLC that `resolver` received, with the
    /// preimage that unlocks its payment hash.
    pub fn propose_fulfill_htlc(
        &mut self,
        resolver: Origin,
        htlc_id: HtlcId,
        payment_preimage: PaymentPreimage,
    ) -> Result<(), LedgerError> {
        let view = self.pending_view();
        let htlc = view
            .htlc(htlc_id)
            .ok_or(LedgerError::UnknownHtlc(htlc_id))?;
        if !self.offered_by(htlc, resolver) {
            return Err(LedgerError::NotResolvable(htlc_id));
        }
        if !hash_matches(&htlc.payment_hash, &payment_preimage) {
            return Err(LedgerError::PreimageMismatch(htlc_id));
        }
        self.changes.push(
            resolver,
            ChangeKind::FulfillHtlc { htlc_id, payment_preimage },
        );
        Ok(())
    }

    /// Proposes failing an HTLC that `resolver` received.
    pub fn propose_fail_htlc(
        &mut self,
        resolver: Origin,
        htlc_id: HtlcId,
    ) -> Result<(), LedgerError> {
        let view = self.pending_view();
        let htlc = view
            .htlc(htlc_id)
            .ok_or(LedgerError::UnknownHtlc(htlc_id))?;
        if !self.offered_by(htlc, resolver) {
            return Err(LedgerError::NotResolvable(htlc_id));
        }
        self.changes.push(resolver, ChangeKind::FailHtlc { htlc_id });
        Ok(())
    }

    pub fn propose_update_fee(
        &mut self,
        origin: Origin,
        feerate_per_kw: u32,
    ) {
        self.changes.push(origin, ChangeKind::UpdateFee { feerate_per_kw });
    }

    /// Anything proposed and not yet folded into the remote pipeline.
    pub fn has_pending_changes(&self) -> bool {
        self.changes.has_proposed()
    }

    /// Whether a new `commitment_signed` may be sent right now: a
    /// change is actually outstanding, and the previous one we sent
    /// (if any) has already been revoked by the peer. Enforces that a
    /// commitment signature is never sent while a prior one from the
    /// current batch remains unacked.
    pub fn can_sign_next_remote_commitment(&self) -> bool {
        self.next_remote_commit.is_none() && self.changes.has_proposed()
    }

    /// Folds every currently-`Proposed` change into a new candidate
    /// remote commitment and holds it as `next_remote_commit` until
    /// the peer's `revoke_and_ack` arrives. The caller is responsible
    /// for building and signing the transaction from the returned
    /// spec and sending it as `commitment_signed`.
    pub fn sign_next_remote_commitment(
        &mut self,
    ) -> Result<CommitmentSpec, LedgerError> {
        if self.next_remote_commit.is_some() {
            return Err(LedgerError::SignatureAlreadyPending);
        }
        let next = Self::fold_changes(&self.remote_commit, self.changes.proposed());
        self.changes.mark_signed_to_remote();
        self.next_remote_commit = Some(next.clone());
        Ok(next)
    }

    /// Applies the peer's `revoke_and_ack` for our most recently sent
    /// `commitment_signed`: the pending remote commitment becomes
    /// durable and its commitment number advances.
    pub fn receive_revoke_and_ack(&mut self) -> Result<(), LedgerError> {
        let next = self
            .next_remote_commit
            .take()
            .ok_or(LedgerError::NoPendingSignature)?;
        self.remote_commit = next;
        self.remote_commitment_number += 1;
        self.changes.prune_acked();
        Ok(())
    }

    /// Computes the candidate local commitment a freshly received
    /// `commitment_signed` must cover: every change not yet folded
    /// into `local_commit`. The caller builds the commitment
    /// transaction from the returned spec and verifies the peer's
    /// signature against it before calling [`Self::commit_local`].
    pub fn receive_commitment_signed(&self) -> CommitmentSpec {
        Self::fold_changes(&self.local_commit, self.changes.not_yet_local())
    }

    /// Accepts a verified local commitment built from
    /// [`Self::receive_commitment_signed`]'s output: it becomes our
    /// broadcastable commitment, and every change it covers is marked
    /// settled on the local side. Call only after signature
    /// verification succeeds, immediately before sending
    /// `revoke_and_ack`.
    pub fn commit_local(&mut self, spec: CommitmentSpec) {
        self.local_commit = spec;
        self.local_commitment_number += 1;
        self.changes.mark_committed_local_and_prune();
    }

    /// Drives both pipelines through one full cross-signing round in
    /// lockstep: equivalent to our `commitment_signed`, the peer's
    /// `commitment_signed`, and both sides' `revoke_and_ack` all
    /// succeeding. Convenient when a test or scenario has no need for
    /// the two pipelines to diverge.
    pub fn cross_sign(&mut self) -> Result<(), LedgerError> {
        if !self.changes.has_proposed() {
            return Ok(());
        }
        self.sign_next_remote_commitment()?;
        let local_next = self.receive_commitment_signed();
        self.commit_local(local_next);
        self.receive_revoke_and_ack()?;
        Ok(())
    }

    /// The committed state a fresh `Channel` reports to callers:
    /// our own latest broadcastable commitment.
    pub fn committed_view(&self) -> CommitmentSpec {
        self.local_commit.clone()
    }
}

fn hash_matches(
    payment_hash: &PaymentHash,
    preimage: &PaymentPreimage,
) -> bool {
    use bitcoin::hashes::{sha256, Hash};
    let digest = sha256::Hash::hash(preimage.as_inner());
    digest.as_inner() == payment_hash.as_inner()
}

#[cfg(test)]
mod test {
    use bitcoin::hashes::{sha256, Hash};

    use super::*;

    fn preimage(byte: u8) -> (PaymentPreimage, PaymentHash) {
        let preimage = PaymentPreimage::from([byte; 32]);
        let hash = sha256::Hash::hash(&[byte; 32]);
        (preimage, PaymentHash::from(*hash.as_inner()))
    }

    fn ledger() -> CommitmentLedger {
        CommitmentLedger::new(
            758_640_000 + 190_000_000,
            Origin::Local,
            758_640_000,
            190_000_000,
            10_000,
            1_100,
            1_100,
            1_100,
            CommitmentFormat::Legacy,
            483,
        )
    }

    #[test]
    fn balance_conserved_across_add_fulfill_cross_sign() {
        let mut ledger = ledger();
        let (preimage, hash) = preimage(0x01);
        let id = ledger
            .propose_add_htlc(Origin::Local, 42_000_000, hash, 600_000)
            .unwrap();
        ledger.cross_sign().unwrap();
        assert_eq!(ledger.committed_view().total_msat(), ledger.capacity_msat);

        ledger.propose_fulfill_htlc(Origin::Remote, id, preimage).unwrap();
        ledger.cross_sign().unwrap();

        let view = ledger.committed_view();
        assert_eq!(view.total_msat(), ledger.capacity_msat);
        assert!(view.htlcs.is_empty());
        assert_eq!(view.to_remote_msat, 190_000_000 + 42_000_000);
        assert_eq!(view.to_local_msat, 758_640_000 - 42_000_000);
        assert_eq!(ledger.local_commit(), ledger.remote_commit());
    }

    #[test]
    fn insufficient_balance_rejected() {
        let mut ledger = ledger();
        let (_, hash) = preimage(0x02);
        let err = ledger
            .propose_add_htlc(Origin::Local, 2_000_000_000, hash, 600_000)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance(_)));
    }

    #[test]
    fn wrong_preimage_rejected() {
        let mut ledger = ledger();
        let (_, hash) = preimage(0x03);
        let id = ledger
            .propose_add_htlc(Origin::Local, 1_000_000, hash, 600_000)
            .unwrap();
        ledger.cross_sign().unwrap();
        let (wrong_preimage, _) = preimage(0x04);
        let err = ledger
            .propose_fulfill_htlc(Origin::Remote, id, wrong_preimage)
            .unwrap_err();
        assert!(matches!(err, LedgerError::PreimageMismatch(_)));
    }

    #[test]
    fn fail_returns_value_to_offerer() {
        let mut ledger = ledger();
        let (_, hash) = preimage(0x05);
        let id = ledger
            .propose_add_htlc(Origin::Local, 5_000_000, hash, 600_000)
            .unwrap();
        ledger.cross_sign().unwrap();
        ledger.propose_fail_htlc(Origin::Remote, id).unwrap();
        ledger.cross_sign().unwrap();
        let view = ledger.committed_view();
        assert_eq!(view.to_local_msat, 758_640_000);
        assert_eq!(view.to_remote_msat, 190_000_000);
    }

    #[test]
    fn availability_shrinks_for_funder_with_pending_htlc() {
        let ledger = ledger();
        let before = ledger.available_to_offer_msat(Origin::Local);
        let mut ledger = ledger;
        let (_, hash) = preimage(0x06);
        ledger
            .propose_add_htlc(Origin::Local, 10_000_000, hash, 600_000)
            .unwrap();
        let after = ledger.available_to_offer_msat(Origin::Local);
        assert!(after < before);
    }

    #[test]
    fn cannot_sign_again_while_previous_signature_unacked() {
        let mut ledger = ledger();
        let (_, hash) = preimage(0x07);
        ledger.propose_add_htlc(Origin::Local, 1_000_000, hash, 600_000).unwrap();
        ledger.sign_next_remote_commitment().unwrap();
        assert!(!ledger.can_sign_next_remote_commitment());

        let (_, hash2) = preimage(0x08);
        ledger.propose_add_htlc(Origin::Local, 1_000_000, hash2, 600_000).unwrap();
        let err = ledger.sign_next_remote_commitment().unwrap_err();
        assert!(matches!(err, LedgerError::SignatureAlreadyPending));

        ledger.receive_revoke_and_ack().unwrap();
        assert!(ledger.can_sign_next_remote_commitment());
    }

    #[test]
    fn local_and_remote_pipelines_diverge_until_both_settle() {
        let mut ledger = ledger();
        let (_, hash) = preimage(0x09);
        ledger.propose_add_htlc(Origin::Local, 1_000_000, hash, 600_000).unwrap();

        ledger.sign_next_remote_commitment().unwrap();
        // Remote pipeline has moved; local pipeline hasn't yet.
        assert_ne!(ledger.remote_commitment_number(), 0);
        assert_eq!(
            ledger.next_remote_commit().unwrap().htlcs.len(),
            1
        );
        assert!(ledger.local_commit().htlcs.is_empty());

        let local_next = ledger.receive_commitment_signed();
        ledger.commit_local(local_next);
        assert_eq!(ledger.local_commit().htlcs.len(), 1);

        ledger.receive_revoke_and_ack().unwrap();
        assert_eq!(ledger.local_commit().total_msat(), ledger.remote_commit().total_msat());
    }
}
