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

//! Compact storage of revealed per-commitment secrets ("shachain").
//!
//! Each per-commitment secret is generated from a channel's root seed by
//! flipping and re-hashing one bit per set bit of the 48-bit commitment
//! index, from the high bit down. A secret known at index `I` can
//! therefore re-derive the secret at any index `J` that agrees with `I`
//! on every bit above `I`'s lowest set bit. Keeping only the stored
//! secrets that are not derivable from one another bounds storage to at
//! most 49 entries regardless of how many commitments have been
//! revoked.

use bitcoin::hashes::{sha256, Hash};
use secp256k1::SecretKey;

/// Commitment indices are 48 bits wide (BOLT-3 commitment number range).
const INDEX_BITS: u8 = 48;

/// Number of trailing zero bits in a 48-bit index; `48` for `index == 0`.
fn trailing_zeros_48(index: u64) -> u8 {
    for bit in 0..INDEX_BITS {
        if index & (1u64 << bit) != 0 {
            return bit;
        }
    }
    INDEX_BITS
}

/// True if the secret known at `from_index` can re-derive the secret at
/// `index`: every bit of `index` at or above `from_index`'s own
/// trailing-zero count must match `from_index`.
fn can_derive(from_index: u64, index: u64) -> bool {
    let pos = trailing_zeros_48(from_index);
    let mask: u64 = if pos >= INDEX_BITS { 0 } else { !((1u64 << pos) - 1) };
    (from_index & mask) == (index & mask)
}

/// Derives the secret for `index` from a secret known to be valid at
/// `from_index`. Only meaningful when [`can_derive`] holds.
fn derive_secret(
    from_secret: &SecretKey,
    from_index: u64,
    index: u64,
) -> SecretKey {
    let mut secret = *from_secret;
    let start = trailing_zeros_48(from_index);
    for bit in (0..start).rev() {
        if index & (1u64 << bit) != 0 {
            let mut data = secret.secret_bytes();
            data[bit as usize / 8] ^= 1 << (bit % 8);
            secret = SecretKey::from_slice(&sha256::Hash::hash(&data)[..])
                .expect(
                    "hash output is a valid scalar with overwhelming probability",
                );
        }
    }
    secret
}

/// Generates the secret for `index` from the channel's root seed.
pub fn generate_from_seed(seed: &SecretKey, index: u64) -> SecretKey {
    derive_secret(seed, 0, index)
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[derive(StrictEncode, StrictDecode)]
struct Entry {
    index: u64,
    secret: SecretKey,
}

/// Compact store of revealed per-commitment secrets.
///
/// Mirrors the `shachain` structure used by c-lightning and described
/// in BOLT-3 appendix D: at most 49 secrets are ever held regardless of
/// how many commitments have been revoked.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
#[derive(StrictEncode, StrictDecode)]
pub struct RevocationStore {
    entries: Vec<Entry>,
}

/// Error inserting an out-of-order or inconsistent secret into a
/// [`RevocationStore`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum RevocationStoreError {
    /// provided secret for commitment index {index} does not match the
    /// value derivable from a previously stored secret
    SecretMismatch { index: u64 },
}

impl RevocationStore {
    pub fn new() -> Self {
        RevocationStore { entries: Vec::new() }
    }

    /// Inserts a freshly-revealed per-commitment secret. Fails if it is
    /// inconsistent with a secret already stored that should re-derive
    /// it, or that it should re-derive.
    pub fn insert(
        &mut self,
        index: u64,
        secret: SecretKey,
    ) -> Result<(), RevocationStoreError> {
        for old in &self.entries {
            if can_derive(index, old.index)
                && derive_secret(&secret, index, old.index) != old.secret
            {
                return Err(RevocationStoreError::SecretMismatch { index });
            }
            if can_derive(old.index, index)
                && derive_secret(&old.secret, old.index, index) != secret
            {
                return Err(RevocationStoreError::SecretMismatch { index });
            }
        }

        // Entries the new one can re-derive become redundant.
        self.entries.retain(|old| !can_derive(index, old.index));
        self.entries.push(Entry { index, secret });
        Ok(())
    }

    /// Retrieves (deriving if necessary) the secret for `index`, if it
    /// is reachable from a secret currently stored.
    pub fn get_secret(&self, index: u64) -> Option<SecretKey> {
        self.entries.iter().find_map(|entry| {
            if entry.index == index {
                Some(entry.secret)
            } else if can_derive(entry.index, index) {
                Some(derive_secret(&entry.secret, entry.index, index))
            } else {
                None
            }
        })
    }

    /// Number of independent secrets currently retained. Bounded by
    /// [`INDEX_BITS`] `+ 1` regardless of how many secrets were ever
    /// inserted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn secret(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).unwrap()
    }

    #[test]
    fn single_insert_roundtrip() {
        let mut store = RevocationStore::new();
        let seed = secret(0xAB);
        let index = (1u64 << 48) - 1;
        let s = generate_from_seed(&seed, index);
        store.insert(index, s).unwrap();
        assert_eq!(store.get_secret(index), Some(s));
    }

    #[test]
    fn derives_descendant_from_root() {
        let mut store = RevocationStore::new();
        let seed = secret(0x01);
        store.insert(0, seed).unwrap();
        for index in [1u64, 2, 3, 0xffff, (1 << 48) - 1] {
            assert_eq!(
                store.get_secret(index),
                Some(generate_from_seed(&seed, index))
            );
        }
    }

    #[test]
    fn bounded_storage_over_full_descent() {
        let mut store = RevocationStore::new();
        let seed = secret(0x42);
        let top = (1u64 << 48) - 1;
        for i in 0u64..500 {
            let index = top - i;
            let s = generate_from_seed(&seed, index);
            store.insert(index, s).unwrap();
            assert!(store.len() <= INDEX_BITS as usize + 1);
        }
        let last = top - 499;
        assert_eq!(store.get_secret(last), Some(generate_from_seed(&seed, last)));
    }

    #[test]
    fn unreachable_index_returns_none() {
        let mut store = RevocationStore::new();
        store.insert(1, secret(0x11)).unwrap();
        assert_eq!(store.get_secret(2), None);
    }

    #[test]
    fn inconsistent_secret_rejected() {
        let mut store = RevocationStore::new();
        store.insert(0, secret(0x11)).unwrap();
        assert!(store.insert(1, secret(0x22)).is_err());
    }
}
