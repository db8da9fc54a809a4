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

//! Outbound effects a channel produces while processing a command or
//! peer message: messages to send, transactions to watch for or
//! publish, and notifications for the owning node.

use bitcoin::Transaction;

use crate::channel::lifecycle::Lifecycle;
use crate::primitives::HtlcId;
use crate::wire::{Messages, PaymentPreimage};

#[derive(Clone, Debug)]
pub enum Event {
    /// Send a wire message to the channel's peer.
    Send(Messages),

    /// Ask the chain oracle to publish a transaction as soon as
    /// possible.
    Publish(Transaction),

    /// Ask the chain oracle to notify once `txid:vout` is spent.
    WatchSpent { txid: bitcoin::Txid, vout: u32 },

    /// Ask the chain oracle to notify once `txid` reaches the given
    /// confirmation depth.
    WatchConfirmed { txid: bitcoin::Txid, depth: u32 },

    /// The channel transitioned to a new lifecycle stage.
    StageChanged(Lifecycle),

    /// An HTLC this node was the final or forwarding recipient of was
    /// fulfilled; upstream settlement (if any) is the caller's
    /// responsibility.
    HtlcSettled { htlc_id: HtlcId, payment_preimage: PaymentPreimage },

    /// An HTLC was failed; upstream failure propagation (if any) is
    /// the caller's responsibility.
    HtlcFailed { htlc_id: HtlcId },

    /// The channel reached the `CLOSED` stage.
    ChannelClosed,
}
