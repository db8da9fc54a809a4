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

//! The channel's funding output: the 2-of-2 multisig outpoint every
//! commitment transaction spends.
//!
//! A full node additionally carries the PSBT that constructs this
//! output (coin selection, change, fee bumping of the funding
//! transaction itself); that belongs to the wallet layer and is out of
//! scope here, so `Funding` is reduced to the descriptor the
//! commitment builder actually needs.

use amplify::DumbDefault;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{OutPoint, Script, Txid};

use crate::tx::scripts::funding_scriptpubkey;

/// Descriptor of a channel's funding output: where it lives on chain,
/// what it pays, and the two keys that unlock it.
#[derive(Clone, PartialEq, Eq, Debug)]
#[derive(StrictEncode, StrictDecode)]
pub struct Funding {
    pub txid: Txid,
    pub output_index: u16,
    pub amount_sat: u64,
    pub local_funding_pubkey: PublicKey,
    pub remote_funding_pubkey: PublicKey,
}

impl Funding {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint { txid: self.txid, vout: self.output_index as u32 }
    }

    pub fn script_pubkey(&self) -> Script {
        funding_scriptpubkey(
            self.local_funding_pubkey,
            self.remote_funding_pubkey,
        )
    }
}

impl DumbDefault for Funding {
    fn dumb_default() -> Self {
        Funding {
            txid: Txid::from_inner([0u8; 32]),
            output_index: 0,
            amount_sat: 0,
            local_funding_pubkey: dumb_pubkey!(),
            remote_funding_pubkey: dumb_pubkey!(),
        }
    }
}

#[cfg(test)]
mod test {
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    use super::*;

    #[test]
    fn script_pubkey_is_p2wsh() {
        let secp = Secp256k1::new();
        let a = PublicKey::from_secret_key(
            &secp,
            &SecretKey::from_slice(&[1u8; 32]).unwrap(),
        );
        let b = PublicKey::from_secret_key(
            &secp,
            &SecretKey::from_slice(&[2u8; 32]).unwrap(),
        );
        let funding = Funding {
            txid: Txid::from_inner([3u8; 32]),
            output_index: 0,
            amount_sat: 1_000_000,
            local_funding_pubkey: a,
            remote_funding_pubkey: b,
        };
        assert!(funding.script_pubkey().is_v0_p2wsh());
    }
}
