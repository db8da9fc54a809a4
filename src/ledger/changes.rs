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

//! The log of changes proposed to a channel's committed state: added,
//! fulfilled or failed HTLCs, and fee updates.
//!
//! Every change proposed by either side is tracked against the two
//! independent commitment pipelines it must eventually settle into:
//! ours (the commitment we can broadcast) and the remote's (the one
//! we sign for our peer). A change starts out `Proposed` in neither.
//! Calling [`CommitmentLedger::sign_next_remote_commitment`] folds it
//! into the remote pipeline (`Signed`); calling
//! [`CommitmentLedger::receive_commitment_signed`] folds it into the
//! local pipeline. Once both have happened it is `Acked` and can be
//! dropped from the log, since from then on it's simply part of both
//! commitments' baseline.

use crate::ledger::origin::Origin;
use crate::primitives::HtlcId;
use crate::wire::{PaymentHash, PaymentPreimage};

/// One BOLT-2 `update_*` message, stripped to the fields the ledger
/// needs to fold it into the committed balances.
#[derive(Clone, Debug)]
pub enum ChangeKind {
    AddHtlc { htlc_id: HtlcId, amount_msat: u64, payment_hash: PaymentHash, cltv_expiry: u32 },
    FulfillHtlc { htlc_id: HtlcId, payment_preimage: PaymentPreimage },
    FailHtlc { htlc_id: HtlcId },
    FailMalformedHtlc { htlc_id: HtlcId },
    UpdateFee { feerate_per_kw: u32 },
}

impl ChangeKind {
    pub fn htlc_id(&self) -> Option<HtlcId> {
        match self {
            ChangeKind::AddHtlc { htlc_id, .. }
            | ChangeKind::FulfillHtlc { htlc_id, .. }
            | ChangeKind::FailHtlc { htlc_id }
            | ChangeKind::FailMalformedHtlc { htlc_id } => Some(*htlc_id),
            ChangeKind::UpdateFee { .. } => None,
        }
    }
}

/// Which of the three ordered lists a change currently belongs to:
/// not yet in any signature, in the latest remote commitment but not
/// in ours, or present in both.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ChangeCategory {
    Proposed,
    Signed,
    Acked,
}

#[derive(Clone, Debug)]
pub struct PendingChange {
    pub origin: Origin,
    pub kind: ChangeKind,
    in_remote_commit: bool,
    in_local_commit: bool,
}

impl PendingChange {
    pub fn category(&self) -> ChangeCategory {
        match (self.in_remote_commit, self.in_local_commit) {
            (false, false) => ChangeCategory::Proposed,
            (true, true) => ChangeCategory::Acked,
            _ => ChangeCategory::Signed,
        }
    }
}

/// Log of changes proposed since either commitment pipeline last
/// settled. Unlike a single FIFO queue, entries linger here until both
/// pipelines have folded them in, so the log doubles as the record of
/// what a freshly reconnected peer's retransmit must still cover.
#[derive(Clone, Debug, Default)]
pub struct ChangeLog {
    entries: Vec<PendingChange>,
}

impl ChangeLog {
    pub fn new() -> Self {
        ChangeLog { entries: Vec::new() }
    }

    pub fn push(&mut self, origin: Origin, kind: ChangeKind) {
        self.entries.push(PendingChange {
            origin,
            kind,
            in_remote_commit: false,
            in_local_commit: false,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingChange> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_proposed(&self) -> bool {
        self.entries.iter().any(|c| c.category() == ChangeCategory::Proposed)
    }

    /// Everything not yet folded into the remote pipeline: what a new
    /// `sign_next_remote_commitment` call would fold in.
    pub fn proposed(&self) -> impl Iterator<Item = &PendingChange> {
        self.entries.iter().filter(|c| !c.in_remote_commit)
    }

    /// Everything not yet folded into the local pipeline: what a
    /// freshly received `commitment_signed` would fold in.
    pub fn not_yet_local(&self) -> impl Iterator<Item = &PendingChange> {
        self.entries.iter().filter(|c| !c.in_local_commit)
    }

    /// Marks every currently-`Proposed` entry as folded into the
    /// remote pipeline (our outgoing `commitment_signed` covers it).
    pub fn mark_signed_to_remote(&mut self) {
        for change in &mut self.entries {
            if !change.in_remote_commit {
                change.in_remote_commit = true;
            }
        }
    }

    /// Marks every entry not yet in the local pipeline as folded into
    /// it (the peer's `commitment_signed` we just verified covers it),
    /// then drops anything now `Acked` in both pipelines.
    pub fn mark_committed_local_and_prune(&mut self) {
        for change in &mut self.entries {
            change.in_local_commit = true;
        }
        self.entries.retain(|c| c.category() != ChangeCategory::Acked);
    }

    /// Drops anything that became `Acked` once the remote pipeline
    /// caught up (the peer's `revoke_and_ack` for our prior signature).
    pub fn prune_acked(&mut self) {
        self.entries.retain(|c| c.category() != ChangeCategory::Acked);
    }
}
