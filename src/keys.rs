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

//! BOLT-3 key derivation: per-commitment point/secret tweaking of the
//! static basepoints into the keys actually used in a given commitment
//! transaction, plus the local/remote keyset containers.

use amplify::DumbDefault;
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::PublicKey as LegacyPublicKey;
use secp256k1::{PublicKey, Secp256k1, SecretKey, Signing, Verification};

/// The six basepoints that together define a side's contribution to a
/// channel's keys, plus the current per-commitment point.
#[derive(Clone, PartialEq, Eq, Debug)]
#[derive(StrictEncode, StrictDecode)]
pub struct RemoteKeyset {
    pub funding_pubkey: PublicKey,
    pub revocation_basepoint: PublicKey,
    pub payment_basepoint: PublicKey,
    pub delayed_payment_basepoint: PublicKey,
    pub htlc_basepoint: PublicKey,
    pub first_per_commitment_point: PublicKey,
    pub static_remotekey: bool,
}

impl DumbDefault for RemoteKeyset {
    fn dumb_default() -> Self {
        RemoteKeyset {
            funding_pubkey: dumb_pubkey!(),
            revocation_basepoint: dumb_pubkey!(),
            payment_basepoint: dumb_pubkey!(),
            delayed_payment_basepoint: dumb_pubkey!(),
            htlc_basepoint: dumb_pubkey!(),
            first_per_commitment_point: dumb_pubkey!(),
            static_remotekey: false,
        }
    }
}

/// Local counterpart of [`RemoteKeyset`]; additionally holds the
/// secrets we (not the peer) must have on hand: the funding private
/// key, needed to produce our half of the 2-of-2 commitment signature,
/// and the first per-commitment secret, since we are the ones who
/// must produce per-commitment secrets on request.
#[derive(Clone, PartialEq, Eq, Debug)]
#[derive(StrictEncode, StrictDecode)]
pub struct LocalKeyset {
    pub funding_pubkey: PublicKey,
    pub funding_privkey: SecretKey,
    pub revocation_basepoint: PublicKey,
    pub payment_basepoint: PublicKey,
    pub delayed_payment_basepoint: PublicKey,
    pub htlc_basepoint: PublicKey,
    pub first_per_commitment_point: PublicKey,
    pub first_per_commitment_secret: SecretKey,
    pub static_remotekey: bool,
}

impl DumbDefault for LocalKeyset {
    fn dumb_default() -> Self {
        LocalKeyset {
            funding_pubkey: dumb_pubkey!(),
            funding_privkey: secp256k1::constants::ONE,
            revocation_basepoint: dumb_pubkey!(),
            payment_basepoint: dumb_pubkey!(),
            delayed_payment_basepoint: dumb_pubkey!(),
            htlc_basepoint: dumb_pubkey!(),
            first_per_commitment_point: dumb_pubkey!(),
            first_per_commitment_secret: secp256k1::constants::ONE,
            static_remotekey: false,
        }
        .fixup()
    }
}

impl LocalKeyset {
    // `secp256k1::constants::ONE` is not a valid `SecretKey` encoding
    // fix-up only needed because `dumb_default` must not panic.
    fn fixup(mut self) -> Self {
        self.funding_privkey =
            SecretKey::from_slice(&[1u8; 32]).expect("non-zero 32 bytes");
        self.first_per_commitment_secret =
            SecretKey::from_slice(&[1u8; 32]).expect("non-zero 32 bytes");
        self
    }
}

/// `SHA256(per_commitment_point ‖ basepoint)`, the tweak BOLT-3 applies
/// to a basepoint to get the key actually used in one specific
/// commitment.
pub fn tweak_hash(
    per_commitment_point: &PublicKey,
    basepoint: &PublicKey,
) -> sha256::Hash {
    let mut engine = sha256::Hash::engine();
    engine.input(&per_commitment_point.serialize());
    engine.input(&basepoint.serialize());
    sha256::Hash::from_engine(engine)
}

/// `basepoint + SHA256(per_commitment_point ‖ basepoint) * G`
///
/// Used to derive `localkey`/`remotekey` (payment pubkeys) and the
/// `local_delayedkey` from their respective basepoints.
pub fn derive_pubkey<C: Verification>(
    secp: &Secp256k1<C>,
    basepoint: &PublicKey,
    per_commitment_point: &PublicKey,
) -> PublicKey {
    let hash = tweak_hash(per_commitment_point, basepoint);
    let tweak = SecretKey::from_slice(&hash[..]).expect("hash is 32 bytes");
    basepoint
        .combine(&PublicKey::from_secret_key(secp, &tweak))
        .expect("negligible probability of a degenerate tweak")
}

/// Private counterpart of [`derive_pubkey`], used by the side that owns
/// `base_secret` to produce a signing key for a specific commitment.
pub fn derive_privkey<C: Signing>(
    secp: &Secp256k1<C>,
    base_secret: &SecretKey,
    per_commitment_point: &PublicKey,
) -> SecretKey {
    let basepoint = PublicKey::from_secret_key(secp, base_secret);
    let hash = tweak_hash(per_commitment_point, &basepoint);
    let tweak = SecretKey::from_slice(&hash[..]).expect("hash is 32 bytes");
    let mut key = *base_secret;
    key.add_assign(&tweak[..]).expect("negligible probability of a degenerate tweak");
    key
}

/// Derives the `revocationpubkey` used in `to_local_delayed`:
///
///     revocation_basepoint * SHA256(revocation_basepoint ‖ per_commitment_point)
///   + per_commitment_point * SHA256(per_commitment_point ‖ revocation_basepoint)
///
/// Either side can compute this; only the side that eventually learns
/// `per_commitment_secret` (the revoking side) can derive the matching
/// private key, via [`derive_revocation_privkey`].
pub fn derive_revocation_pubkey<C: Verification>(
    secp: &Secp256k1<C>,
    revocation_basepoint: &PublicKey,
    per_commitment_point: &PublicKey,
) -> PublicKey {
    let hash_rev = tweak_hash(revocation_basepoint, per_commitment_point);
    let hash_pcp = tweak_hash(per_commitment_point, revocation_basepoint);

    let tweak_rev =
        SecretKey::from_slice(&hash_rev[..]).expect("hash is 32 bytes");
    let tweak_pcp =
        SecretKey::from_slice(&hash_pcp[..]).expect("hash is 32 bytes");

    let part_a = revocation_basepoint
        .mul_tweak(secp, &tweak_rev)
        .expect("negligible probability of a degenerate tweak");
    let part_b = per_commitment_point
        .mul_tweak(secp, &tweak_pcp)
        .expect("negligible probability of a degenerate tweak");

    part_a
        .combine(&part_b)
        .expect("negligible probability of a degenerate combination")
}

/// Private counterpart of [`derive_revocation_pubkey`]; computable only
/// once the per-commitment secret for the now-revoked state is known.
pub fn derive_revocation_privkey<C: Signing>(
    secp: &Secp256k1<C>,
    revocation_base_secret: &SecretKey,
    per_commitment_secret: &SecretKey,
) -> SecretKey {
    let revocation_basepoint =
        PublicKey::from_secret_key(secp, revocation_base_secret);
    let per_commitment_point =
        PublicKey::from_secret_key(secp, per_commitment_secret);

    let hash_rev = tweak_hash(&revocation_basepoint, &per_commitment_point);
    let hash_pcp = tweak_hash(&per_commitment_point, &revocation_basepoint);

    let mut part_a = *revocation_base_secret;
    part_a
        .mul_assign(&hash_rev[..])
        .expect("negligible probability of a degenerate tweak");
    let mut part_b = *per_commitment_secret;
    part_b
        .mul_assign(&hash_pcp[..])
        .expect("negligible probability of a degenerate tweak");

    part_a
        .add_assign(&part_b[..])
        .expect("negligible probability of a degenerate combination");
    part_a
}

/// Converts a secp256k1 public key into the legacy `bitcoin::PublicKey`
/// wrapper (always compressed) used by script-building code.
pub fn compressed(pk: &PublicKey) -> LegacyPublicKey {
    LegacyPublicKey::new(*pk)
}
