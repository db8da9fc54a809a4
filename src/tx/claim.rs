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

//! Third-stage transactions: sweeping one's own outputs once they
//! mature, claiming a counterparty's unrevoked outputs with a
//! preimage, and taking a breached channel's entire balance with the
//! revocation key. Each builder fixes only the `nSequence`/`nLockTime`
//! the spent script demands; witness data is attached by the signer.

use bitcoin::{OutPoint, PackedLockTime, Script, Sequence, Transaction, TxIn, TxOut};

use crate::tx::scripts::ToRemoteFormat;

fn sweep_tx(
    outpoint: OutPoint,
    amount_sat: u64,
    destination: Script,
    sequence: Sequence,
    lock_time: PackedLockTime,
) -> Transaction {
    Transaction {
        version: 2,
        lock_time,
        input: vec![TxIn {
            previous_output: outpoint,
            script_sig: Script::new(),
            sequence,
            witness: bitcoin::Witness::new(),
        }],
        output: vec![TxOut { value: amount_sat, script_pubkey: destination }],
    }
}

/// Spends a matured `to_local` (or second-stage HTLC) output with the
/// local delayed key, after `to_self_delay` blocks of relative
/// maturity.
pub fn claim_local_delayed(
    outpoint: OutPoint,
    amount_sat: u64,
    destination: Script,
    to_self_delay: u16,
) -> Transaction {
    sweep_tx(
        outpoint,
        amount_sat,
        destination,
        Sequence(to_self_delay as u32),
        PackedLockTime(0),
    )
}

/// Spends the counterparty's second-stage HTLC output once the
/// same-shaped delay has matured. Identical shape to
/// [`claim_local_delayed`]; kept distinct so callers don't conflate
/// the two maturity events.
pub fn claim_htlc_delayed(
    outpoint: OutPoint,
    amount_sat: u64,
    destination: Script,
    to_self_delay: u16,
) -> Transaction {
    claim_local_delayed(outpoint, amount_sat, destination, to_self_delay)
}

/// Spends a `to_remote` output: immediately in the legacy (plain
/// P2WPKH) format, or after the single-block CSV delay anchor format
/// imposes.
pub fn claim_remote_main(
    outpoint: OutPoint,
    amount_sat: u64,
    destination: Script,
    format: ToRemoteFormat,
) -> Transaction {
    let sequence = match format {
        ToRemoteFormat::V1Plain => Sequence::MAX,
        ToRemoteFormat::V2AnchorDelayed => Sequence(1),
    };
    sweep_tx(outpoint, amount_sat, destination, sequence, PackedLockTime(0))
}

/// Spends an offered-HTLC output with the payment preimage, before
/// the offerer's timeout path matures. Used by the receiver of the
/// HTLC to claim it off a unilaterally published commitment.
pub fn claim_htlc_success(
    outpoint: OutPoint,
    amount_sat: u64,
    destination: Script,
) -> Transaction {
    sweep_tx(outpoint, amount_sat, destination, Sequence::MAX, PackedLockTime(0))
}

/// Spends a received-HTLC output via the CLTV timeout branch, once
/// `cltv_expiry` is reached and no preimage ever surfaced. Requires a
/// non-final sequence so the transaction's `nLockTime` is honored.
pub fn claim_htlc_timeout(
    outpoint: OutPoint,
    amount_sat: u64,
    destination: Script,
    cltv_expiry: u32,
) -> Transaction {
    sweep_tx(
        outpoint,
        amount_sat,
        destination,
        Sequence(0xffff_fffe),
        PackedLockTime(cltv_expiry),
    )
}

/// Takes an entire `to_local` (or unrevealed second-stage HTLC)
/// output using a leaked revocation secret, after the counterparty
/// breached the channel by publishing a revoked commitment.
pub fn penalty_main(
    outpoint: OutPoint,
    amount_sat: u64,
    destination: Script,
) -> Transaction {
    sweep_tx(outpoint, amount_sat, destination, Sequence::MAX, PackedLockTime(0))
}

/// Takes an offered or received HTLC output directly off a revoked
/// commitment using the revocation key, pre-empting both the
/// preimage and timeout spend paths.
pub fn penalty_htlc(
    outpoint: OutPoint,
    amount_sat: u64,
    destination: Script,
) -> Transaction {
    sweep_tx(outpoint, amount_sat, destination, Sequence::MAX, PackedLockTime(0))
}

/// Takes a second-stage HTLC output using the revocation key, when
/// the counterparty published the matching HTLC-timeout/-success
/// transaction off a commitment that has since been revoked.
pub fn penalty_htlc_delayed(
    outpoint: OutPoint,
    amount_sat: u64,
    destination: Script,
) -> Transaction {
    sweep_tx(outpoint, amount_sat, destination, Sequence::MAX, PackedLockTime(0))
}

/// Spends an anchor output with the funding key, immediately, to
/// attach a CPFP child and bump a stuck commitment's effective
/// feerate.
pub fn claim_local_anchor(
    outpoint: OutPoint,
    amount_sat: u64,
    destination: Script,
) -> Transaction {
    sweep_tx(outpoint, amount_sat, destination, Sequence::MAX, PackedLockTime(0))
}
