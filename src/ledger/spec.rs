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

//! The balances and live HTLC set a single commitment transaction
//! would encode, independent of which side's signature it carries.

use crate::primitives::HtlcId;
use crate::wire::PaymentHash;

/// Whether an HTLC counts against the offering side's balance
/// (`Offered`) or the receiving side's (`Received`), from the
/// perspective of whichever commitment the [`CommitmentSpec`]
/// describes.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum HtlcDirection {
    Offered,
    Received,
}

#[derive(Copy, Clone, Debug)]
pub struct HtlcInSpec {
    pub htlc_id: HtlcId,
    pub direction: HtlcDirection,
    pub amount_msat: u64,
    pub payment_hash: PaymentHash,
    pub cltv_expiry: u32,
}

/// Balances and in-flight HTLCs of one commitment transaction, before
/// dust trimming or fee subtraction are applied by the transaction
/// builder.
#[derive(Clone, Debug)]
pub struct CommitmentSpec {
    pub to_local_msat: u64,
    pub to_remote_msat: u64,
    pub feerate_per_kw: u32,
    pub htlcs: Vec<HtlcInSpec>,
}

impl CommitmentSpec {
    pub fn offered_msat(&self) -> u64 {
        self.htlcs
            .iter()
            .filter(|h| h.direction == HtlcDirection::Offered)
            .map(|h| h.amount_msat)
            .sum()
    }

    pub fn received_msat(&self) -> u64 {
        self.htlcs
            .iter()
            .filter(|h| h.direction == HtlcDirection::Received)
            .map(|h| h.amount_msat)
            .sum()
    }

    /// Sum of everything this commitment accounts for: both balances
    /// plus every in-flight HTLC's value. Constant across the life of
    /// a channel of fixed capacity.
    pub fn total_msat(&self) -> u64 {
        self.to_local_msat
            + self.to_remote_msat
            + self.htlcs.iter().map(|h| h.amount_msat).sum::<u64>()
    }

    pub fn htlc(&self, htlc_id: HtlcId) -> Option<&HtlcInSpec> {
        self.htlcs.iter().find(|h| h.htlc_id == htlc_id)
    }
}
