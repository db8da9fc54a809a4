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

//! Wire messages consumed and emitted by the channel state machine.
//!
//! Field sets mirror BOLT-2/BOLT-3 exactly; the onion-Sphinx packet and
//! the generic unknown-TLV passthrough are out of scope here (they
//! belong to the onion-routing crypto and transport layers respectively)
//! so `update_add_htlc` carries a plain opaque `onion_routing_packet`
//! byte vector instead of a decoded Sphinx type.

use std::str::FromStr;

use amplify::{DumbDefault, Slice32};
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{PublicKey, SecretKey};
use bitcoin::Txid;

use crate::primitives::{ActiveChannelId, ChannelId, TempChannelId};

/// Length of the onion routing packet attached to `update_add_htlc`.
pub const PAYMENT_SPHINX_LEN: usize = 1300;

/// Explicit enumeration of channel types. Reuses the even feature bits
/// from BOLT-9 for documentation purposes only; the set itself is a
/// closed enum rather than an arbitrary bit combination, since only
/// these combinations are persistently meaningful to channel operation.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
pub enum ChannelType {
    /// no features (no bits set)
    #[display("basic")]
    Basic,

    /// option_static_remotekey (bit 12)
    #[display("static_remotekey")]
    StaticRemotekey,

    /// option_anchor_outputs and option_static_remotekey (bits 20 and 12)
    #[display("anchored")]
    AnchorOutputsStaticRemotekey,
}

impl ChannelType {
    #[inline]
    pub fn has_static_remotekey(self) -> bool {
        self != ChannelType::Basic
    }

    #[inline]
    pub fn has_anchor_outputs(self) -> bool {
        self == ChannelType::AnchorOutputsStaticRemotekey
    }
}

impl Default for ChannelType {
    #[inline]
    fn default() -> Self {
        ChannelType::Basic
    }
}

/// Error parsing [`ChannelType`] from a string.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display("unknown channel type name `{0}`")]
pub struct ChannelTypeParseError(String);

impl FromStr for ChannelType {
    type Err = ChannelTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "basic" => ChannelType::Basic,
            "static_remotekey" => ChannelType::StaticRemotekey,
            "anchored" => ChannelType::AnchorOutputsStaticRemotekey,
            _ => return Err(ChannelTypeParseError(s.to_owned())),
        })
    }
}

/// Opaque destination script a peer wants used for its side of a
/// cooperative close or `to_remote` output, represented as a raw
/// scriptPubkey.
pub type PubkeyScript = bitcoin::Script;

/// First message of the funding handshake: the funder's proposal.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display("open_channel({temporary_channel_id}, {funding_satoshis}, ...)")]
pub struct OpenChannel {
    pub chain_hash: Slice32,
    pub temporary_channel_id: TempChannelId,
    pub funding_satoshis: u64,
    pub push_msat: u64,
    pub dust_limit_satoshis: u64,
    pub max_htlc_value_in_flight_msat: u64,
    pub channel_reserve_satoshis: u64,
    pub htlc_minimum_msat: u64,
    pub feerate_per_kw: u32,
    pub to_self_delay: u16,
    pub max_accepted_htlcs: u16,
    pub funding_pubkey: PublicKey,
    pub revocation_basepoint: PublicKey,
    pub payment_point: PublicKey,
    pub delayed_payment_basepoint: PublicKey,
    pub htlc_basepoint: PublicKey,
    pub first_per_commitment_point: PublicKey,
    pub channel_flags: u8,
    pub shutdown_scriptpubkey: Option<PubkeyScript>,
    pub channel_type: Option<ChannelType>,
}

impl OpenChannel {
    #[inline]
    pub fn should_announce_channel(&self) -> bool {
        self.channel_flags & 0x01 == 0x01
    }
}

impl DumbDefault for OpenChannel {
    fn dumb_default() -> Self {
        OpenChannel {
            chain_hash: none!(),
            temporary_channel_id: TempChannelId::dumb_default(),
            funding_satoshis: 0,
            push_msat: 0,
            dust_limit_satoshis: 0,
            max_htlc_value_in_flight_msat: 0,
            channel_reserve_satoshis: 0,
            htlc_minimum_msat: 0,
            feerate_per_kw: 0,
            to_self_delay: 0,
            max_accepted_htlcs: 0,
            funding_pubkey: dumb_pubkey!(),
            revocation_basepoint: dumb_pubkey!(),
            payment_point: dumb_pubkey!(),
            delayed_payment_basepoint: dumb_pubkey!(),
            htlc_basepoint: dumb_pubkey!(),
            first_per_commitment_point: dumb_pubkey!(),
            channel_flags: 0,
            shutdown_scriptpubkey: None,
            channel_type: None,
        }
    }
}

/// Second message of the funding handshake: the fundee's acceptance.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display("accept_channel({temporary_channel_id}, ...)")]
pub struct AcceptChannel {
    pub temporary_channel_id: TempChannelId,
    pub dust_limit_satoshis: u64,
    pub max_htlc_value_in_flight_msat: u64,
    pub channel_reserve_satoshis: u64,
    pub htlc_minimum_msat: u64,
    pub minimum_depth: u32,
    pub to_self_delay: u16,
    pub max_accepted_htlcs: u16,
    pub funding_pubkey: PublicKey,
    pub revocation_basepoint: PublicKey,
    pub payment_point: PublicKey,
    pub delayed_payment_basepoint: PublicKey,
    pub htlc_basepoint: PublicKey,
    pub first_per_commitment_point: PublicKey,
    pub shutdown_scriptpubkey: Option<PubkeyScript>,
    pub channel_type: Option<ChannelType>,
}

impl DumbDefault for AcceptChannel {
    fn dumb_default() -> Self {
        AcceptChannel {
            temporary_channel_id: TempChannelId::dumb_default(),
            dust_limit_satoshis: 0,
            max_htlc_value_in_flight_msat: 0,
            channel_reserve_satoshis: 0,
            htlc_minimum_msat: 0,
            minimum_depth: 0,
            to_self_delay: 0,
            max_accepted_htlcs: 0,
            funding_pubkey: dumb_pubkey!(),
            revocation_basepoint: dumb_pubkey!(),
            payment_point: dumb_pubkey!(),
            delayed_payment_basepoint: dumb_pubkey!(),
            htlc_basepoint: dumb_pubkey!(),
            first_per_commitment_point: dumb_pubkey!(),
            shutdown_scriptpubkey: None,
            channel_type: None,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display(
    "funding_created({temporary_channel_id}, \
     {funding_txid}:{funding_output_index}, ...signature)"
)]
pub struct FundingCreated {
    pub temporary_channel_id: TempChannelId,
    pub funding_txid: Txid,
    pub funding_output_index: u16,
    pub signature: Signature,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display("funding_signed({channel_id}, ...signature)")]
pub struct FundingSigned {
    pub channel_id: ChannelId,
    pub signature: Signature,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display("funding_locked({channel_id}, {next_per_commitment_point})")]
pub struct FundingLocked {
    pub channel_id: ChannelId,
    pub next_per_commitment_point: PublicKey,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display("shutdown({channel_id}, ...)")]
pub struct Shutdown {
    pub channel_id: ChannelId,
    pub scriptpubkey: PubkeyScript,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display("closing_signed({channel_id}, {fee_satoshis}, ...)")]
pub struct ClosingSigned {
    pub channel_id: ChannelId,
    pub fee_satoshis: u64,
    pub signature: Signature,
}

/// 32-byte SHA256 of a yet-unknown preimage locking an HTLC.
pub type PaymentHash = Slice32;
/// 32-byte preimage unlocking an HTLC whose hash matches.
pub type PaymentPreimage = Slice32;

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display(
    "update_add_htlc({channel_id}, {htlc_id}, {amount_msat}, \
     {payment_hash}, ...)"
)]
pub struct UpdateAddHtlc {
    pub channel_id: ChannelId,
    pub htlc_id: u64,
    pub amount_msat: u64,
    pub payment_hash: PaymentHash,
    pub cltv_expiry: u32,
    pub onion_routing_packet: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display("update_fulfill_htlc({channel_id}, {htlc_id}, ...preimage)")]
pub struct UpdateFulfillHtlc {
    pub channel_id: ChannelId,
    pub htlc_id: u64,
    pub payment_preimage: PaymentPreimage,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display("update_fail_htlc({channel_id}, {htlc_id}, ...reason)")]
pub struct UpdateFailHtlc {
    pub channel_id: ChannelId,
    pub htlc_id: u64,
    pub reason: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display("update_fail_malformed_htlc({channel_id}, {htlc_id}, ...)")]
pub struct UpdateFailMalformedHtlc {
    pub channel_id: ChannelId,
    pub htlc_id: u64,
    pub sha256_of_onion: Slice32,
    pub failure_code: u16,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display("commitment_signed({channel_id}, ...signatures)")]
pub struct CommitmentSigned {
    pub channel_id: ChannelId,
    pub signature: Signature,
    pub htlc_signatures: Vec<Signature>,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display(
    "revoke_and_ack({channel_id}, {next_per_commitment_point}, \
     ...per_commitment_secret)"
)]
pub struct RevokeAndAck {
    pub channel_id: ChannelId,
    pub per_commitment_secret: SecretKey,
    pub next_per_commitment_point: PublicKey,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display("update_fee({channel_id}, {feerate_per_kw})")]
pub struct UpdateFee {
    pub channel_id: ChannelId,
    pub feerate_per_kw: u32,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display("channel_reestablish({channel_id}, {next_commitment_number}, ...)")]
pub struct ChannelReestablish {
    pub channel_id: ChannelId,
    pub next_commitment_number: u64,
    pub next_revocation_number: u64,
    pub your_last_per_commitment_secret: Slice32,
    pub my_current_per_commitment_point: PublicKey,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display("error({channel_id}, {data:#x?})")]
pub struct ErrorMessage {
    pub channel_id: ActiveChannelId,
    pub data: Vec<u8>,
}

/// All wire messages the channel state machine consumes or emits.
///
/// `Init`/`Ping`/`Pong` are transport-session messages; they are folded
/// into the driver's connection handling rather than being routed
/// through the per-channel state machine, and so are not represented
/// here (the machine only ever sees `INPUT_RECONNECTED`/
/// `INPUT_DISCONNECTED` local events derived from them).
#[derive(Clone, PartialEq, Eq, Debug, Display, From)]
pub enum Messages {
    #[display(inner)]
    OpenChannel(OpenChannel),
    #[display(inner)]
    AcceptChannel(AcceptChannel),
    #[display(inner)]
    FundingCreated(FundingCreated),
    #[display(inner)]
    FundingSigned(FundingSigned),
    #[display(inner)]
    FundingLocked(FundingLocked),
    #[display(inner)]
    Shutdown(Shutdown),
    #[display(inner)]
    ClosingSigned(ClosingSigned),
    #[display(inner)]
    UpdateAddHtlc(UpdateAddHtlc),
    #[display(inner)]
    UpdateFulfillHtlc(UpdateFulfillHtlc),
    #[display(inner)]
    UpdateFailHtlc(UpdateFailHtlc),
    #[display(inner)]
    UpdateFailMalformedHtlc(UpdateFailMalformedHtlc),
    #[display(inner)]
    CommitmentSigned(CommitmentSigned),
    #[display(inner)]
    RevokeAndAck(RevokeAndAck),
    #[display(inner)]
    UpdateFee(UpdateFee),
    #[display(inner)]
    ChannelReestablish(ChannelReestablish),
    #[display(inner)]
    Error(ErrorMessage),
}
