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

//! `channeld`: the per-channel commitment state machine at the core of
//! a Lightning-style bidirectional off-chain payment node.
//!
//! This crate covers a single channel's lifecycle from `open_channel`
//! through cooperative or unilateral closing: BOLT-3 transaction
//! construction ([`tx`]), the commitment ledger that folds proposed
//! balance/HTLC changes into signed commitments ([`ledger`]), the
//! lifecycle/command/event state machine that drives a channel
//! ([`channel`]), the closing engine ([`closing`]), and the storage and
//! chain-oracle contracts the embedding node must satisfy
//! ([`persistence`], [`chain`]). Wallet-level concerns -- coin
//! selection, peer transport, gossip, multi-channel routing -- are out
//! of scope; see the crate's specification document for the exact
//! boundary.

#![recursion_limit = "256"]
// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code
)]

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate strict_encoding;

macro_rules! dumb_pubkey {
    () => {
        secp256k1::PublicKey::from_secret_key(
            secp256k1::SECP256K1,
            &secp256k1::key::ONE_KEY,
        )
    };
}

pub mod primitives;
pub mod keys;
pub mod wire;
pub mod policy;
pub mod revocation;
pub mod tx;
pub mod ledger;
pub mod channel;
pub mod closing;
pub mod chain;
pub mod persistence;
pub mod funding;

pub use chain::{ChainError, ChainOracle, TxStatus};
pub use channel::{Channel, ChannelError, ChannelState, Command, Direction, Event, Lifecycle};
pub use funding::Funding;
pub use ledger::{CommitmentLedger, LedgerError};
pub use persistence::{ChannelStorage, MemoryStorage, PendingRelay, StorageError};
pub use policy::{CommonParams, PeerParams, Policy, PolicyError};
pub use primitives::{ActiveChannelId, ChannelId, HtlcId, ShortChannelId, TempChannelId};
pub use wire::Messages;
