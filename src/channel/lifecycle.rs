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

//! Channel lifecycle: the coarse-grained stages a channel passes
//! through from first contact to final closure.

/// Stages of the channel state machine.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
pub enum Lifecycle {
    /// Channel is initialized, communication with the remote peer has
    /// not started yet.
    #[display("INIT")]
    Initial,

    /// Sent or received `open_channel`.
    #[display("PROPOSED")]
    Proposed,

    /// Sent or received `accept_channel`.
    #[display("ACCEPTED")]
    Accepted,

    /// Producing the signature for the funding transaction internally.
    #[display("SIGNING")]
    Signing,

    /// Local party signed the funding transaction.
    #[display("FUNDING")]
    Funding,

    /// Both parties exchanged funding signatures.
    #[display("SIGNED")]
    Signed,

    /// Funding transaction is published but not yet mined.
    #[display("FUNDED")]
    Funded,

    /// Funding transaction mining confirmed locally, awaiting the
    /// peer's `funding_locked`.
    #[display("LOCKED")]
    Locked,

    /// Both peers confirmed lock; the channel can carry payments.
    #[display("ACTIVE")]
    Active,

    /// Transport-level disconnect; no `channel_reestablish` exchanged
    /// yet. Distinct from [`Lifecycle::Reestablishing`], which is
    /// entered only once the peer is back and the reestablish
    /// handshake is actually underway.
    #[display("OFFLINE")]
    Offline,

    /// Peer reconnected; exchanging and comparing `channel_reestablish`
    /// commitment numbers and secrets before resuming normal operation.
    #[display("REESTABLISHING")]
    Reestablishing,

    /// The peer's `channel_reestablish` claims a commitment number we
    /// cannot prove we ever signed for: our own state was lost or
    /// rolled back. We hold nothing to retransmit; the only safe move
    /// is to wait for the peer to unilaterally publish its current
    /// commitment and claim our `to_remote` output from it.
    #[display("AWAITING-REMOTE-PUBLISH")]
    AwaitingRemotePublish,

    /// Cooperative shutdown proposed but not yet accepted by the peer.
    #[display("SHUTDOWN")]
    Shutdown,

    /// Shutdown agreed by both sides; exchanging `closing_signed`.
    #[display("CLOSING-{round}")]
    Closing { round: usize },

    /// Non-cooperative unilateral closing initiated from the local
    /// side.
    #[display("ABORTING")]
    Aborting,

    /// Reacting to an uncooperative close published by the remote
    /// side.
    #[display("PENALIZE")]
    Penalize,

    /// Channel is non-operational and fully closed.
    #[display("CLOSED")]
    Closed,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Lifecycle::Initial
    }
}

impl Lifecycle {
    /// Whether HTLCs and cooperative shutdown may be initiated in this
    /// stage.
    pub fn is_operational(self) -> bool {
        matches!(self, Lifecycle::Active)
    }

    /// Whether the channel has left the funding pipeline and moved
    /// into the operational-or-later part of its life.
    pub fn is_post_funding(self) -> bool {
        !matches!(
            self,
            Lifecycle::Initial
                | Lifecycle::Proposed
                | Lifecycle::Accepted
                | Lifecycle::Signing
                | Lifecycle::Funding
                | Lifecycle::Signed
        )
    }

    /// Whether the peer is currently known to be unreachable: either
    /// plainly offline, or reconnected but still mid-reestablish.
    pub fn is_disconnected(self) -> bool {
        matches!(self, Lifecycle::Offline | Lifecycle::Reestablishing)
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Lifecycle::Closed)
    }
}
