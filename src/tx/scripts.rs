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

//! BOLT-3 output scripts: funding multisig, `to_local`, `to_remote`
//! (v1/v2), and the offered/received/delayed HTLC scripts.

use bitcoin::blockdata::opcodes::all::*;
use bitcoin::blockdata::script::Builder;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{PackedLockTime, Script, Sequence};

use crate::keys::compressed;
use crate::wire::PaymentHash;

/// `to_remote` output format: plain P2WPKH (pre-anchors), or the
/// `remotepubkey OP_CHECKSIGVERIFY 1 OP_CSV` script that enforces a
/// single block of delay (so it cannot be spent in the same block as a
/// unilateral close, which matters for anchor-format fee-bumping).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[derive(StrictEncode, StrictDecode)]
pub enum ToRemoteFormat {
    V1Plain,
    V2AnchorDelayed,
}

/// 2-of-2 multisig witness script locking the funding output, with
/// pubkeys in BIP69 lexicographic order.
pub fn funding_witness_script(
    pubkey_a: PublicKey,
    pubkey_b: PublicKey,
) -> Script {
    let (first, second) = lex_order_pubkeys(pubkey_a, pubkey_b);
    Builder::new()
        .push_int(2)
        .push_key(&compressed(&first))
        .push_key(&compressed(&second))
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

pub fn funding_scriptpubkey(
    pubkey_a: PublicKey,
    pubkey_b: PublicKey,
) -> Script {
    funding_witness_script(pubkey_a, pubkey_b).to_v0_p2wsh()
}

fn lex_order_pubkeys(
    a: PublicKey,
    b: PublicKey,
) -> (PublicKey, PublicKey) {
    if compressed(&a).to_bytes() <= compressed(&b).to_bytes() {
        (a, b)
    } else {
        (b, a)
    }
}

/// `to_local` witness script: immediate spend with the revocation key,
/// or spend with the delayed key after `to_self_delay` blocks.
pub fn to_local_witness_script(
    revocation_pubkey: PublicKey,
    local_delayed_pubkey: PublicKey,
    to_self_delay: u16,
) -> Script {
    Builder::new()
        .push_opcode(OP_IF)
        .push_key(&compressed(&revocation_pubkey))
        .push_opcode(OP_ELSE)
        .push_int(to_self_delay as i64)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_key(&compressed(&local_delayed_pubkey))
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

pub fn to_local_scriptpubkey(
    revocation_pubkey: PublicKey,
    local_delayed_pubkey: PublicKey,
    to_self_delay: u16,
) -> Script {
    to_local_witness_script(
        revocation_pubkey,
        local_delayed_pubkey,
        to_self_delay,
    )
    .to_v0_p2wsh()
}

/// `to_remote` scriptPubkey; format depends on whether
/// `option_static_remotekey`/anchors were negotiated.
pub fn to_remote_scriptpubkey(
    remote_pubkey: PublicKey,
    format: ToRemoteFormat,
) -> Script {
    match format {
        ToRemoteFormat::V1Plain => {
            let pk = compressed(&remote_pubkey);
            Script::new_v0_p2wpkh(
                &pk.wpubkey_hash()
                    .expect("commitment pubkeys are always compressed"),
            )
        }
        ToRemoteFormat::V2AnchorDelayed => {
            to_remote_v2_witness_script(remote_pubkey).to_v0_p2wsh()
        }
    }
}

fn to_remote_v2_witness_script(remote_pubkey: PublicKey) -> Script {
    Builder::new()
        .push_key(&compressed(&remote_pubkey))
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_int(1)
        .push_opcode(OP_CSV)
        .into_script()
}

/// Anchor output script: either party's funding key, spendable
/// immediately, or anyone after 16 blocks (so it cannot be left
/// permanently unspendable dust once the channel is gone).
pub fn anchor_witness_script(funding_pubkey: PublicKey) -> Script {
    Builder::new()
        .push_key(&compressed(&funding_pubkey))
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_IFDUP)
        .push_opcode(OP_NOTIF)
        .push_int(16)
        .push_opcode(OP_CSV)
        .push_opcode(OP_ENDIF)
        .into_script()
}

pub fn anchor_scriptpubkey(funding_pubkey: PublicKey) -> Script {
    anchor_witness_script(funding_pubkey).to_v0_p2wsh()
}

/// Witness script for an HTLC offered by the local (script-owning)
/// side: spendable by the remote node with the preimage, by either
/// side with the revocation key, or by the local side after
/// `cltv_expiry` via the second-stage HTLC-timeout transaction.
pub fn offered_htlc_witness_script(
    revocation_pubkey: PublicKey,
    local_htlc_pubkey: PublicKey,
    remote_htlc_pubkey: PublicKey,
    payment_hash: PaymentHash,
) -> Script {
    Builder::new()
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(&pubkey_hash160(&revocation_pubkey))
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_key(&compressed(&remote_htlc_pubkey))
        .push_opcode(OP_SWAP)
        .push_opcode(OP_SIZE)
        .push_int(32)
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_NOTIF)
        .push_opcode(OP_DROP)
        .push_int(2)
        .push_opcode(OP_SWAP)
        .push_key(&compressed(&local_htlc_pubkey))
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .push_opcode(OP_ELSE)
        .push_opcode(OP_HASH160)
        .push_slice(payment_hash.as_inner())
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_ENDIF)
        .into_script()
}

pub fn offered_htlc_scriptpubkey(
    revocation_pubkey: PublicKey,
    local_htlc_pubkey: PublicKey,
    remote_htlc_pubkey: PublicKey,
    payment_hash: PaymentHash,
) -> Script {
    offered_htlc_witness_script(
        revocation_pubkey,
        local_htlc_pubkey,
        remote_htlc_pubkey,
        payment_hash,
    )
    .to_v0_p2wsh()
}

/// Witness script for an HTLC received by the local (script-owning)
/// side: spendable by the remote node with the preimage before
/// expiry, by either side with the revocation key, or by the local
/// side after `cltv_expiry` via the second-stage HTLC-timeout path.
pub fn received_htlc_witness_script(
    revocation_pubkey: PublicKey,
    local_htlc_pubkey: PublicKey,
    remote_htlc_pubkey: PublicKey,
    cltv_expiry: u32,
    payment_hash: PaymentHash,
) -> Script {
    Builder::new()
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(&pubkey_hash160(&revocation_pubkey))
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_key(&compressed(&remote_htlc_pubkey))
        .push_opcode(OP_SWAP)
        .push_opcode(OP_SIZE)
        .push_int(32)
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_opcode(OP_HASH160)
        .push_slice(payment_hash.as_inner())
        .push_opcode(OP_EQUALVERIFY)
        .push_int(2)
        .push_opcode(OP_SWAP)
        .push_key(&compressed(&local_htlc_pubkey))
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .push_opcode(OP_ELSE)
        .push_opcode(OP_DROP)
        .push_int(cltv_expiry as i64)
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_ENDIF)
        .into_script()
}

pub fn received_htlc_scriptpubkey(
    revocation_pubkey: PublicKey,
    local_htlc_pubkey: PublicKey,
    remote_htlc_pubkey: PublicKey,
    cltv_expiry: u32,
    payment_hash: PaymentHash,
) -> Script {
    received_htlc_witness_script(
        revocation_pubkey,
        local_htlc_pubkey,
        remote_htlc_pubkey,
        cltv_expiry,
        payment_hash,
    )
    .to_v0_p2wsh()
}

/// Output script of the second-stage HTLC-timeout/HTLC-success
/// transaction: same shape as `to_local`, since it pays into the
/// same revocable/delayed structure.
pub fn htlc_output_witness_script(
    revocation_pubkey: PublicKey,
    local_delayed_pubkey: PublicKey,
    to_self_delay: u16,
) -> Script {
    to_local_witness_script(
        revocation_pubkey,
        local_delayed_pubkey,
        to_self_delay,
    )
}

pub fn htlc_output_scriptpubkey(
    revocation_pubkey: PublicKey,
    local_delayed_pubkey: PublicKey,
    to_self_delay: u16,
) -> Script {
    htlc_output_witness_script(
        revocation_pubkey,
        local_delayed_pubkey,
        to_self_delay,
    )
    .to_v0_p2wsh()
}

fn pubkey_hash160(pk: &PublicKey) -> [u8; 20] {
    use bitcoin::hashes::hash160;
    *hash160::Hash::hash(&compressed(pk).to_bytes()).as_inner()
}

/// Input sequence for a second-stage HTLC transaction: `0` in legacy
/// format, `1` in anchor format (the CPFP carve-out delay).
pub fn htlc_input_sequence(anchors: bool) -> Sequence {
    if anchors {
        Sequence(1)
    } else {
        Sequence(0)
    }
}

/// Locktime for an HTLC-timeout transaction (`cltv_expiry`) versus an
/// HTLC-success transaction (always `0`).
pub fn htlc_tx_locktime(cltv_expiry: Option<u32>) -> PackedLockTime {
    PackedLockTime(cltv_expiry.unwrap_or(0))
}
