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

//! Local commands: requests the node's own user or upstream forwarding
//! logic issues to a channel, as opposed to messages arriving from the
//! peer (see [`crate::wire::Messages`]).

use bitcoin::Script;

use crate::primitives::HtlcId;
use crate::wire::{PaymentHash, PaymentPreimage};

#[derive(Clone, Debug)]
pub enum Command {
    /// Open a channel as funder.
    Open { funding_satoshis: u64, push_msat: u64, feerate_per_kw: u32 },

    /// Accept an incoming `open_channel` as fundee.
    Accept,

    /// The funding transaction has been constructed and signed
    /// locally; proceed to `funding_created`.
    FundingSigned,

    /// The funding transaction reached the configured confirmation
    /// depth.
    FundingConfirmed,

    /// Offer a new outgoing HTLC.
    OfferHtlc { amount_msat: u64, payment_hash: PaymentHash, cltv_expiry: u32 },

    /// Fulfill a previously received HTLC with its preimage.
    FulfillHtlc { htlc_id: HtlcId, payment_preimage: PaymentPreimage },

    /// Fail a previously received HTLC.
    FailHtlc { htlc_id: HtlcId },

    /// Sign a new commitment covering all changes proposed since the
    /// last one.
    SignCommitment,

    /// Update the commitment feerate (funder only).
    UpdateFee { feerate_per_kw: u32 },

    /// Begin a cooperative shutdown.
    InitiateShutdown { destination: Script },

    /// Accept a counterparty-initiated shutdown.
    AcceptShutdown { destination: Script },

    /// Propose a closing fee during the `closing_signed` negotiation.
    ProposeClosingFee { fee_satoshis: u64 },

    /// A TCP/transport reconnection occurred; re-synchronize with
    /// `channel_reestablish`.
    Reconnected,

    /// The transport disconnected.
    Disconnected,

    /// Force-close unilaterally by broadcasting the latest commitment.
    ForceClose,

    /// The peer breached the channel by broadcasting a revoked
    /// commitment; the given index is the breached commitment number.
    HandleBreach { revoked_commitment_number: u64 },
}
