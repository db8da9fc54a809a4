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

//! Construction of commitment, second-stage HTLC, and third-stage
//! claim/penalty transactions, plus the scripts and output ordering
//! they build on.

pub mod claim;
pub mod commitment;
pub mod format;
pub mod ordering;
pub mod scripts;
pub mod sighash;

pub use commitment::{
    build_commitment_tx, build_htlc_second_stage_tx, decode_commitment_number,
    obscure_commitment_number, obscuring_factor, BuildCommitmentParams,
    BuiltCommitment, CommitmentKeys, HtlcView, PlacedHtlc,
};
pub use format::CommitmentFormat;
pub use scripts::ToRemoteFormat;
pub use sighash::{commitment_sighash, sign_commitment, verify_commitment};
