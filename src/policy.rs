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

//! BOLT-2 channel-parameter policy validation.
//!
//! The ratios and absolute limits below are local-node defaults, not
//! part of the protocol; per-vendor presets are provided because they
//! vary between deployments (see the "feerate tolerance" open question
//! in DESIGN.md).

use std::ops::Range;

use crate::wire::{AcceptChannel, ChannelType, OpenChannel};

/// Limit for the maximum number of the accepted HTLCs towards some node.
pub const BOLT3_MAX_ACCEPTED_HTLC_LIMIT: u16 = 483;

/// BOLT-3 dust limit floor.
pub const BOLT3_DUST_LIMIT: u64 = 354;

/// Legacy (non-wumbo) funding amount cap, in satoshis.
pub const LEGACY_MAX_FUNDING_SATOSHIS: u64 = 16_777_215;

/// Errors from BOLT-2 policy validation of `open_channel` and
/// `accept_channel` messages.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Debug, Display, Error
)]
#[derive(StrictEncode, StrictDecode)]
#[display(doc_comments)]
pub enum PolicyError {
    /// proposed `to_self_delay` value {proposed} is unreasonably large and
    /// exceeds node policy limit of {allowed_maximum}; rejecting the channel
    /// according to BOLT-2
    ToSelfDelayUnreasonablyLarge { proposed: u16, allowed_maximum: u16 },

    /// proposed limit for maximum accepted number of HTLCs {0} exceeds
    /// BOLT-3 requirement to be below 483; rejecting the channel according
    /// to BOLT-2
    MaxAcceptedHtlcLimitExceeded(u16),

    /// proposed fee rate {proposed} sat/kw is outside of the fee rate
    /// policy of the local node ({lowest_accepted}..{highest_accepted}
    /// sat/kw); rejecting the channel according to BOLT-2
    FeeRateUnreasonable {
        proposed: u32,
        lowest_accepted: u32,
        highest_accepted: u32,
    },

    /// proposed channel reserve limit {reserve} sat is less than dust
    /// limit {dust_limit} sat; rejecting the channel according to BOLT-2
    ChannelReserveLessDust { reserve: u64, dust_limit: u64 },

    /// dust limit {0} sat is less than protocol minimum requirement of 354
    /// sat; rejecting the channel according to BOLT-2
    DustLimitTooSmall(u64),

    /// offered channel funding of {proposed} sat is too small and less
    /// than {required_minimum} required by the node policy; rejecting the
    /// channel according to BOLT-2
    ChannelFundingTooSmall { proposed: u64, required_minimum: u64 },

    /// offered channel funding of {proposed} sat exceeds the legacy
    /// (non-wumbo) limit and neither side advertised the wumbo feature
    FundingExceedsLegacyLimitWithoutWumbo { proposed: u64 },

    /// HTLC minimum {proposed} is too large and exceeds node policy
    /// requirements ({allowed_maximum}); rejecting the channel according to
    /// BOLT-2
    HtlcMinimumTooLarge { proposed: u64, allowed_maximum: u64 },

    /// HTLC-in-flight maximum requirement of {proposed} is too small and
    /// does not match the node policy; the smallest requirement is
    /// {required_minimum}; rejecting the channel according to BOLT-2
    HtlcInFlightMaximumTooSmall { proposed: u64, required_minimum: u64 },

    /// requested {proposed} channel reserve is too large and exceeds local
    /// policy requirement of {allowed_maximum}; rejecting the channel
    /// according to BOLT-2
    ChannelReserveTooLarge { proposed: u64, allowed_maximum: u64 },

    /// maximum number of HTLCs {proposed} that can be accepted by the
    /// remote node is too small and does not match node policy requirement
    /// of {required_minimum}; rejecting the channel according to BOLT-2
    MaxAcceptedHtlcsTooSmall { proposed: u16, required_minimum: u16 },

    /// dust limit {proposed} sats exceeds node policy requirement of
    /// {allowed_maximum}; rejecting the channel according to BOLT-2
    DustLimitTooLarge { proposed: u64, allowed_maximum: u64 },

    /// minimum depth of {proposed} requested by the remote peer exceeds
    /// local policy limit of {allowed_maximum}; rejecting the channel
    /// according to BOLT-2
    UnreasonableMinDepth { proposed: u32, allowed_maximum: u32 },

    /// `channel_reserve_satoshis` ({channel_reserve}) is less than
    /// `dust_limit_satoshis` ({dust_limit}) within the `open_channel`
    /// message; rejecting the channel according to BOLT-2
    LocalDustExceedsRemoteReserve { channel_reserve: u64, dust_limit: u64 },

    /// `channel_reserve_satoshis` from the `open_channel` message
    /// ({channel_reserve}) is less than `dust_limit_satoshis`
    /// ({dust_limit}); rejecting the channel according to BOLT-2
    RemoteDustExceedsLocalReserve { channel_reserve: u64, dust_limit: u64 },
}

/// Policy used to validate channel parameters proposed by a remote peer.
///
/// By default, a new channel uses the reasonable defaults of
/// [`Policy::default`]; callers may instead supply a vendor-matched
/// preset or a fully custom policy.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[derive(StrictEncode, StrictDecode)]
pub struct Policy {
    /// Reasonable limit to check the value of `to_self_delay` required by
    /// a remote node, in blocks.
    pub to_self_delay_max: u16,

    /// Range of acceptable channel feerates.
    pub feerate_per_kw_range: Range<u32>,

    /// Minimum funding transaction mining depth required from the remote
    /// node for a channel proposed by it.
    pub minimum_depth: u32,

    /// Maximum funding transaction mining depth which may be required by
    /// a remote node for a channel opened by a local node.
    pub maximum_depth: Option<u32>,

    /// Minimum funding for a channel opened by this node.
    pub funding_satoshis_min: Option<u64>,

    /// Whether this node advertises and accepts wumbo (>16_777_215 sat)
    /// channels.
    pub allow_wumbo: bool,

    /// The maximum acceptable limit on the value stored in a single HTLC.
    pub htlc_minimum_msat_max: Option<u64>,

    /// Minimum boundary for the upper limit of in-flight HTLC funds.
    pub max_htlc_value_in_flight_msat_min: Option<u64>,

    /// Maximum reserve for a channel from a local node required by the
    /// remote node, in absolute value.
    pub channel_reserve_satoshis_max_abs: Option<u64>,

    /// Maximum reserve for a channel from a local node required by the
    /// remote node, in percent of the channel funding.
    pub channel_reserve_satoshis_max_percent: Option<u8>,

    /// Minimum boundary to the limit of HTLCs offered to a remote peer.
    pub max_accepted_htlcs_min: Option<u16>,

    /// Maximum value for the dust limit required by a remote node.
    pub dust_limit_satoshis_max: Option<u64>,

    /// Tolerance band (as a ratio of our own feerate estimate) within
    /// which an incoming `update_fee` is accepted without a force-close.
    /// Open question in the distilled spec: these ratios are local-node
    /// defaults, never protocol-contractual (see DESIGN.md).
    pub feerate_tolerance: Range<f32>,
}

impl Default for Policy {
    /// Reasonable values for the local node's own policy.
    fn default() -> Policy {
        Policy {
            to_self_delay_max: 250,
            // normal operational range for fees on the bitcoin network -
            // it rarely goes above 100 sat/kw to get a tx mined within an
            // hour or two
            feerate_per_kw_range: 1..500,
            minimum_depth: 3,
            maximum_depth: Some(6),
            funding_satoshis_min: Some(10_000),
            allow_wumbo: false,
            htlc_minimum_msat_max: None,
            max_htlc_value_in_flight_msat_min: Some(10_000),
            max_accepted_htlcs_min: Some(10),
            channel_reserve_satoshis_max_abs: None,
            // do not over-collateralize a channel beyond 10% of its funds
            channel_reserve_satoshis_max_percent: Some(10),
            dust_limit_satoshis_max: Some(1000),
            feerate_tolerance: 0.5..2.0,
        }
    }
}

impl Policy {
    /// Policy matching the default used by c-lightning.
    pub fn with_clightning_defaults() -> Policy {
        Policy {
            to_self_delay_max: 14 * 24 * 6,
            feerate_per_kw_range: 1..1000,
            minimum_depth: 3,
            maximum_depth: Some(6),
            funding_satoshis_min: Some(10_000),
            allow_wumbo: false,
            htlc_minimum_msat_max: None,
            max_htlc_value_in_flight_msat_min: Some(10_000),
            max_accepted_htlcs_min: Some(10),
            channel_reserve_satoshis_max_abs: None,
            channel_reserve_satoshis_max_percent: Some(10),
            dust_limit_satoshis_max: Some(546),
            feerate_tolerance: 0.5..2.0,
        }
    }

    /// Policy matching the default used by LND.
    pub fn with_lnd_defaults() -> Policy {
        Policy {
            to_self_delay_max: 14 * 24 * 6,
            feerate_per_kw_range: 1..1000,
            minimum_depth: 3,
            maximum_depth: Some(6),
            funding_satoshis_min: Some(20_000),
            allow_wumbo: true,
            htlc_minimum_msat_max: None,
            max_htlc_value_in_flight_msat_min: Some(10_000),
            max_accepted_htlcs_min: Some(10),
            channel_reserve_satoshis_max_abs: None,
            // LND uses 1% of the channel funding as a reserve
            channel_reserve_satoshis_max_percent: Some(1),
            dust_limit_satoshis_max: Some(546),
            feerate_tolerance: 0.5..10.0,
        }
    }

    /// Policy matching the default used by Eclair.
    pub fn with_eclair_defaults() -> Policy {
        Policy {
            to_self_delay_max: 14 * 24 * 6,
            feerate_per_kw_range: 1..1000,
            minimum_depth: 3,
            maximum_depth: Some(6),
            funding_satoshis_min: Some(100_000),
            allow_wumbo: false,
            htlc_minimum_msat_max: None,
            max_htlc_value_in_flight_msat_min: Some(10_000),
            max_accepted_htlcs_min: Some(10),
            channel_reserve_satoshis_max_abs: None,
            // Eclair uses 5% of the channel funding as a reserve
            channel_reserve_satoshis_max_percent: Some(5),
            dust_limit_satoshis_max: Some(546),
            feerate_tolerance: 0.5..4.0,
        }
    }

    fn validate_peer_params(
        &self,
        params: PeerParams,
    ) -> Result<(), PolicyError> {
        if params.to_self_delay > self.to_self_delay_max {
            return Err(PolicyError::ToSelfDelayUnreasonablyLarge {
                proposed: params.to_self_delay,
                allowed_maximum: self.to_self_delay_max,
            });
        }

        if params.max_accepted_htlcs > BOLT3_MAX_ACCEPTED_HTLC_LIMIT {
            return Err(PolicyError::MaxAcceptedHtlcLimitExceeded(
                params.max_accepted_htlcs,
            ));
        }

        if params.dust_limit_satoshis > params.channel_reserve_satoshis {
            return Err(PolicyError::ChannelReserveLessDust {
                reserve: params.channel_reserve_satoshis,
                dust_limit: params.dust_limit_satoshis,
            });
        }

        if params.dust_limit_satoshis < BOLT3_DUST_LIMIT {
            return Err(PolicyError::DustLimitTooSmall(
                params.dust_limit_satoshis,
            ));
        }

        if let Some(limit) = self.htlc_minimum_msat_max {
            if params.htlc_minimum_msat > limit {
                return Err(PolicyError::HtlcMinimumTooLarge {
                    proposed: params.htlc_minimum_msat,
                    allowed_maximum: limit,
                });
            }
        }

        if let Some(limit) = self.max_htlc_value_in_flight_msat_min {
            if params.max_htlc_value_in_flight_msat < limit {
                return Err(PolicyError::HtlcInFlightMaximumTooSmall {
                    proposed: params.max_htlc_value_in_flight_msat,
                    required_minimum: limit,
                });
            }
        }

        if let Some(limit) = self.channel_reserve_satoshis_max_abs {
            if params.channel_reserve_satoshis > limit {
                return Err(PolicyError::ChannelReserveTooLarge {
                    proposed: params.channel_reserve_satoshis,
                    allowed_maximum: limit,
                });
            }
        }

        if let Some(limit) = self.max_accepted_htlcs_min {
            if params.max_accepted_htlcs < limit {
                return Err(PolicyError::MaxAcceptedHtlcsTooSmall {
                    proposed: params.max_accepted_htlcs,
                    required_minimum: limit,
                });
            }
        }

        if let Some(limit) = self.dust_limit_satoshis_max {
            if params.dust_limit_satoshis > limit {
                return Err(PolicyError::DustLimitTooLarge {
                    proposed: params.dust_limit_satoshis,
                    allowed_maximum: limit,
                });
            }
        }

        Ok(())
    }

    /// Validates parameters proposed by a remote peer in `open_channel`
    /// against this policy, returning the [`PeerParams`] to use when
    /// constructing transactions the local node must sign.
    pub fn validate_inbound(
        &self,
        open_channel: &OpenChannel,
    ) -> Result<PeerParams, PolicyError> {
        if !self
            .feerate_per_kw_range
            .contains(&open_channel.feerate_per_kw)
        {
            return Err(PolicyError::FeeRateUnreasonable {
                proposed: open_channel.feerate_per_kw,
                lowest_accepted: self.feerate_per_kw_range.start,
                highest_accepted: self.feerate_per_kw_range.end,
            });
        }

        if let Some(limit) = self.funding_satoshis_min {
            if open_channel.funding_satoshis < limit {
                return Err(PolicyError::ChannelFundingTooSmall {
                    proposed: open_channel.funding_satoshis,
                    required_minimum: limit,
                });
            }
        }

        if !self.allow_wumbo
            && open_channel.funding_satoshis > LEGACY_MAX_FUNDING_SATOSHIS
        {
            return Err(
                PolicyError::FundingExceedsLegacyLimitWithoutWumbo {
                    proposed: open_channel.funding_satoshis,
                },
            );
        }

        if let Some(percents) = self.channel_reserve_satoshis_max_percent {
            let limit = open_channel.funding_satoshis as f32
                * (percents as f32 / 100.);
            let limit = limit as u64;
            if open_channel.channel_reserve_satoshis > limit {
                return Err(PolicyError::ChannelReserveTooLarge {
                    proposed: open_channel.channel_reserve_satoshis,
                    allowed_maximum: limit,
                });
            }
        }

        let peer_params = PeerParams::from(open_channel);
        self.validate_peer_params(peer_params)?;
        Ok(peer_params)
    }

    /// Confirms that the parameters requested by a remote node in
    /// `accept_channel` conform to this policy, returning the
    /// [`PeerParams`] to use when constructing transactions the local
    /// node must sign.
    pub fn confirm_outbound(
        &self,
        our_params: PeerParams,
        accept_channel: &AcceptChannel,
    ) -> Result<PeerParams, PolicyError> {
        if let Some(limit) = self.maximum_depth {
            if accept_channel.minimum_depth > limit {
                return Err(PolicyError::UnreasonableMinDepth {
                    proposed: accept_channel.minimum_depth,
                    allowed_maximum: limit,
                });
            }
        }

        if accept_channel.channel_reserve_satoshis
            < our_params.dust_limit_satoshis
        {
            return Err(PolicyError::LocalDustExceedsRemoteReserve {
                channel_reserve: accept_channel.channel_reserve_satoshis,
                dust_limit: our_params.dust_limit_satoshis,
            });
        }

        if our_params.channel_reserve_satoshis
            < accept_channel.dust_limit_satoshis
        {
            return Err(PolicyError::RemoteDustExceedsLocalReserve {
                channel_reserve: our_params.channel_reserve_satoshis,
                dust_limit: accept_channel.dust_limit_satoshis,
            });
        }

        let peer_params = PeerParams::from(accept_channel);
        self.validate_peer_params(peer_params)?;
        Ok(peer_params)
    }

    /// Whether an incoming `update_fee` proposing `new_feerate` is within
    /// tolerance of `our_estimate`. See the open question on feerate
    /// tolerance in DESIGN.md: these ratios are defaults, not contractual.
    pub fn feerate_in_tolerance(
        &self,
        our_estimate: u32,
        new_feerate: u32,
    ) -> bool {
        let lo = our_estimate as f32 * self.feerate_tolerance.start;
        let hi = our_estimate as f32 * self.feerate_tolerance.end;
        (new_feerate as f32) >= lo && (new_feerate as f32) <= hi
    }
}

/// Parameters applying to both peers, set by the funder and echoed by
/// the fundee; used to construct both sides of the asymmetric
/// transactions.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[derive(StrictEncode, StrictDecode)]
pub struct CommonParams {
    pub minimum_depth: u32,
    pub feerate_per_kw: u32,
    pub announce_channel: bool,
    pub channel_type: ChannelType,
}

impl Default for CommonParams {
    fn default() -> Self {
        CommonParams {
            minimum_depth: 3,
            feerate_per_kw: 256,
            announce_channel: true,
            channel_type: ChannelType::default(),
        }
    }
}

impl CommonParams {
    pub fn with(open_channel: &OpenChannel, minimum_depth: u32) -> Self {
        CommonParams {
            minimum_depth,
            feerate_per_kw: open_channel.feerate_per_kw,
            announce_channel: open_channel.should_announce_channel(),
            channel_type: open_channel.channel_type.unwrap_or_default(),
        }
    }
}

/// Parameters requested by one peer from the other; two instances exist
/// per channel (what we require of them, what they require of us), used
/// when constructing the transaction side the demanding node must sign.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[derive(StrictEncode, StrictDecode)]
pub struct PeerParams {
    pub dust_limit_satoshis: u64,
    pub to_self_delay: u16,
    pub htlc_minimum_msat: u64,
    pub max_htlc_value_in_flight_msat: u64,
    pub channel_reserve_satoshis: u64,
    pub max_accepted_htlcs: u16,
}

impl Default for PeerParams {
    fn default() -> Self {
        PeerParams {
            dust_limit_satoshis: BOLT3_DUST_LIMIT,
            to_self_delay: 144,
            htlc_minimum_msat: 1,
            max_htlc_value_in_flight_msat: 1_000_000_000,
            channel_reserve_satoshis: 10_000,
            max_accepted_htlcs: BOLT3_MAX_ACCEPTED_HTLC_LIMIT,
        }
    }
}

impl From<&OpenChannel> for PeerParams {
    #[inline]
    fn from(open_channel: &OpenChannel) -> Self {
        PeerParams {
            dust_limit_satoshis: open_channel.dust_limit_satoshis,
            to_self_delay: open_channel.to_self_delay,
            htlc_minimum_msat: open_channel.htlc_minimum_msat,
            max_htlc_value_in_flight_msat: open_channel
                .max_htlc_value_in_flight_msat,
            channel_reserve_satoshis: open_channel.channel_reserve_satoshis,
            max_accepted_htlcs: open_channel.max_accepted_htlcs,
        }
    }
}

impl From<&AcceptChannel> for PeerParams {
    #[inline]
    fn from(accept_channel: &AcceptChannel) -> Self {
        PeerParams {
            dust_limit_satoshis: accept_channel.dust_limit_satoshis,
            to_self_delay: accept_channel.to_self_delay,
            htlc_minimum_msat: accept_channel.htlc_minimum_msat,
            max_htlc_value_in_flight_msat: accept_channel
                .max_htlc_value_in_flight_msat,
            channel_reserve_satoshis: accept_channel
                .channel_reserve_satoshis,
            max_accepted_htlcs: accept_channel.max_accepted_htlcs,
        }
    }
}
