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

//! The chain oracle boundary: everything the channel state machine
//! needs to know about the blockchain, expressed as a trait so the
//! actual block-fetching/mempool-watching machinery (out of scope
//! here) can be swapped in by the embedding node.

use bitcoin::{OutPoint, Transaction, Txid};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ChainError {
    /// chain oracle is not currently reachable
    Unavailable,
    /// requested transaction {0} is unknown to the oracle
    UnknownTx(Txid),
}

/// Confirmation status of a transaction the channel cares about.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TxStatus {
    Unknown,
    Mempool,
    Confirmed { height: u32, depth: u32 },
}

/// Everything the channel state machine needs from the chain: spend
/// notification for outputs it watches (commitment/HTLC outputs),
/// confirmation depth for transactions it is waiting to mature
/// (funding, second-stage HTLC), and best-effort broadcast for
/// transactions it needs published now.
pub trait ChainOracle {
    /// Registers interest in `outpoint` being spent; the embedding node
    /// is expected to surface this asynchronously once observed, by
    /// whatever mechanism it uses to drive [`crate::channel::Channel`]
    /// commands.
    fn watch_spent(&mut self, outpoint: OutPoint) -> Result<(), ChainError>;

    /// Registers interest in `txid` reaching `depth` confirmations.
    fn watch_confirmed(
        &mut self,
        txid: Txid,
        depth: u32,
    ) -> Result<(), ChainError>;

    /// Submits `tx` for immediate broadcast, best-effort.
    fn publish_asap(&mut self, tx: Transaction) -> Result<(), ChainError>;

    /// Current confirmation status of a previously-watched
    /// transaction.
    fn status(&self, txid: Txid) -> Result<TxStatus, ChainError>;
}
