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

//! Channel and HTLC identifiers.

use std::fmt::{self, Display, Formatter};

use amplify::{DumbDefault, Slice32, Wrapper};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::{OutPoint, Txid};

/// Channel id used before the funding outpoint is known.
///
/// Generated locally at random by the funder at the start of the open
/// handshake; both peers use it to correlate messages until
/// `funding_created` reveals the real [`ChannelId`].
#[derive(
    Wrapper, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, From
)]
#[derive(StrictEncode, StrictDecode)]
pub struct TempChannelId(Slice32);

impl DumbDefault for TempChannelId {
    fn dumb_default() -> Self {
        TempChannelId(Slice32::dumb_default())
    }
}

impl Display for TempChannelId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Stable channel id, derived from the funding outpoint.
///
/// Computed as `funding_txid XOR funding_output_index` on the last two
/// bytes, per BOLT-2. Never changes once the funding transaction is known,
/// even across a chain reorg that keeps the same outpoint.
#[derive(
    Wrapper, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, From
)]
#[derive(StrictEncode, StrictDecode)]
pub struct ChannelId(Slice32);

impl ChannelId {
    /// Derives the channel id from the funding transaction outpoint.
    pub fn with(funding_txid: Txid, funding_output_index: u16) -> Self {
        let mut id: [u8; 32] = *Hash::as_inner(&funding_txid);
        id[30] ^= (funding_output_index >> 8) as u8;
        id[31] ^= (funding_output_index & 0xff) as u8;
        ChannelId(Slice32::from(id))
    }

    /// Derives the channel id from a full [`OutPoint`].
    pub fn with_outpoint(outpoint: OutPoint) -> Self {
        Self::with(outpoint.txid, outpoint.vout as u16)
    }
}

impl DumbDefault for ChannelId {
    fn dumb_default() -> Self {
        ChannelId(Slice32::dumb_default())
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Either a temporary or a final channel id, depending on the current
/// stage of the funding handshake.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display, From)]
#[derive(StrictEncode, StrictDecode)]
pub enum ActiveChannelId {
    /// Funding outpoint is not yet known.
    #[display(inner)]
    Temporary(TempChannelId),

    /// Funding outpoint is known; this is the permanent channel id.
    #[display(inner)]
    Final(ChannelId),
}

impl ActiveChannelId {
    /// Returns the stable [`ChannelId`] once known, `None` while still
    /// temporary.
    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            ActiveChannelId::Temporary(_) => None,
            ActiveChannelId::Final(id) => Some(*id),
        }
    }

    /// Replaces a temporary id with the final one derived from the
    /// funding transaction. No-op if already final.
    pub fn finalize(&mut self, funding_txid: Txid, funding_vout: u16) {
        if let ActiveChannelId::Temporary(_) = self {
            *self = ActiveChannelId::Final(ChannelId::with(
                funding_txid,
                funding_vout,
            ));
        }
    }
}

impl DumbDefault for ActiveChannelId {
    fn dumb_default() -> Self {
        ActiveChannelId::Temporary(TempChannelId::dumb_default())
    }
}

/// `(block_height, tx_index, output_index)` triple identifying the
/// confirmation location of the funding output, assigned once funding
/// reaches the configured confirmation depth. Used by the gossip layer
/// (out of scope for this crate) to reference the channel publicly.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display("{block_height}x{tx_index}x{output_index}")]
pub struct ShortChannelId {
    pub block_height: u32,
    pub tx_index: u32,
    pub output_index: u16,
}

impl ShortChannelId {
    pub fn new(block_height: u32, tx_index: u32, output_index: u16) -> Self {
        ShortChannelId { block_height, tx_index, output_index }
    }
}

impl From<ShortChannelId> for u64 {
    fn from(scid: ShortChannelId) -> Self {
        (u64::from(scid.block_height) << 40)
            | (u64::from(scid.tx_index) << 16)
            | u64::from(scid.output_index)
    }
}

impl From<u64> for ShortChannelId {
    fn from(v: u64) -> Self {
        ShortChannelId {
            block_height: (v >> 40) as u32 & 0x00ff_ffff,
            tx_index: (v >> 16) as u32 & 0x00ff_ffff,
            output_index: v as u16,
        }
    }
}

/// Monotonically-increasing per-side HTLC identifier, assigned by the
/// offering party and echoed back by the receiver in every subsequent
/// message about that HTLC.
pub type HtlcId = u64;
