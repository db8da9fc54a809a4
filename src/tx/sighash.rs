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

//! BIP143 sighashing, signing and verification for the commitment
//! transaction's single funding input. HTLC second-stage signing is
//! out of scope here: `commitment_signed.htlc_signatures` is populated
//! once second-stage transactions are built at publish time, not at
//! cross-sign time.

use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey, Signing, Verification};
use bitcoin::util::sighash::SighashCache;
use bitcoin::{EcdsaSighashType, Script, Transaction};

/// BIP143 sighash of a commitment transaction's sole input, spending
/// the 2-of-2 funding output under `SIGHASH_ALL`.
pub fn commitment_sighash(
    tx: &Transaction,
    funding_witness_script: &Script,
    funding_value_sat: u64,
) -> Message {
    let mut cache = SighashCache::new(tx);
    let hash = cache
        .segwit_signature_hash(
            0,
            funding_witness_script,
            funding_value_sat,
            EcdsaSighashType::All,
        )
        .expect("commitment tx has exactly one input spending the funding outpoint");
    Message::from_slice(&hash[..]).expect("sighash is always 32 bytes")
}

/// Produces our half of the 2-of-2 signature over `tx`, to be sent as
/// `commitment_signed.signature` (when `tx` is the peer's commitment)
/// or checked against their reply (when `tx` is ours).
pub fn sign_commitment<C: Signing>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    funding_witness_script: &Script,
    funding_value_sat: u64,
    privkey: &SecretKey,
) -> Signature {
    let msg = commitment_sighash(tx, funding_witness_script, funding_value_sat);
    secp.sign_ecdsa(&msg, privkey)
}

/// Verifies a peer-supplied signature against the commitment `tx` we
/// would broadcast, using the peer's funding pubkey.
pub fn verify_commitment<C: Verification>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    funding_witness_script: &Script,
    funding_value_sat: u64,
    pubkey: &PublicKey,
    signature: &Signature,
) -> Result<(), bitcoin::secp256k1::Error> {
    let msg = commitment_sighash(tx, funding_witness_script, funding_value_sat);
    secp.verify_ecdsa(&msg, signature, pubkey)
}
