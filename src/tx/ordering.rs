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

//! BIP-69 lexicographic output ordering, with the BOLT-3 tie-break for
//! identical offered HTLCs.

use bitcoin::TxOut;

/// Extra ordering key carried alongside a [`TxOut`] for outputs that
/// need the CLTV tie-break (offered HTLCs); `None` for every other
/// output kind.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct OrderingHint {
    /// `Some(cltv_expiry)` for an offered-HTLC output, `None` otherwise.
    pub offered_htlc_cltv: Option<u32>,
}

impl OrderingHint {
    pub fn none() -> Self {
        OrderingHint { offered_htlc_cltv: None }
    }

    pub fn offered_htlc(cltv_expiry: u32) -> Self {
        OrderingHint { offered_htlc_cltv: Some(cltv_expiry) }
    }
}

/// Sorts `(TxOut, OrderingHint)` pairs by BIP-69 (ascending amount,
/// then ascending scriptPubkey bytes), breaking ties between two
/// identical offered-HTLC outputs by ascending CLTV expiry.
///
/// Stable: outputs that compare equal under both rules keep their
/// relative input order.
pub fn bip69_with_cltv_tiebreak(outputs: &mut [(TxOut, OrderingHint)]) {
    outputs.sort_by(|(a, ah), (b, bh)| {
        a.value
            .cmp(&b.value)
            .then_with(|| {
                a.script_pubkey.as_bytes().cmp(b.script_pubkey.as_bytes())
            })
            .then_with(|| {
                match (ah.offered_htlc_cltv, bh.offered_htlc_cltv) {
                    (Some(ac), Some(bc)) => ac.cmp(&bc),
                    _ => std::cmp::Ordering::Equal,
                }
            })
    });
}
