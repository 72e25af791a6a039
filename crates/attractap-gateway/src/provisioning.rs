//! Card key derivation.
//!
//! Every card key is derived from the owner's key seed, the key slot and
//! the card UID:
//!
//! ```text
//! password = "<seed>:<slot>:<uid>"
//! salt     = SHA-256("<uid>:<slot>")
//! key      = PBKDF2-HMAC-SHA256(password, salt, iterations)[..16]
//! ```
//!
//! The same user enrolling the same card always ends up with the same key,
//! while no two users (or cards, or slots) share one.

use attractap_core::constants::{KEY_SEED_LENGTH, NTAG424_KEY_LENGTH};
use attractap_core::{CardUid, Key128, KeySeed, KeySlot};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::GatewayResult;

/// Derive the key for `slot` of the card `uid` owned by the holder of `seed`.
///
/// # Example
///
/// ```
/// use attractap_core::{CardUid, KeySeed, KeySlot};
/// use attractap_gateway::provisioning::derive_card_key;
///
/// let seed = KeySeed::from_bytes(&[7; 32]);
/// let uid = CardUid::new("04A1B2C3D4E5F6").unwrap();
///
/// let key = derive_card_key(&seed, KeySlot::MASTER, &uid, 1_000);
/// assert_eq!(key, derive_card_key(&seed, KeySlot::MASTER, &uid, 1_000));
/// assert!(!key.is_factory_default());
/// ```
pub fn derive_card_key(seed: &KeySeed, slot: KeySlot, uid: &CardUid, iterations: u32) -> Key128 {
    let password = format!("{}:{}:{}", seed.expose(), slot, uid.as_str());
    let salt = Sha256::digest(format!("{}:{}", uid.as_str(), slot).as_bytes());

    let mut key = [0u8; NTAG424_KEY_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut key);
    Key128::from_bytes(key)
}

/// [`derive_card_key`] on the blocking pool, keeping PBKDF2 off the
/// connection tasks.
pub async fn derive_card_key_blocking(
    seed: KeySeed,
    slot: KeySlot,
    uid: CardUid,
    iterations: u32,
) -> GatewayResult<Key128> {
    let key = tokio::task::spawn_blocking(move || derive_card_key(&seed, slot, &uid, iterations)).await?;
    Ok(key)
}

/// Fresh random key seed for a user that has none yet.
pub fn generate_key_seed() -> KeySeed {
    let mut bytes = [0u8; KEY_SEED_LENGTH];
    rand::thread_rng().fill_bytes(&mut bytes);
    KeySeed::from_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ITERATIONS: u32 = 64;

    fn uid(s: &str) -> CardUid {
        CardUid::new(s).unwrap()
    }

    #[test]
    fn test_known_inputs_are_stable() {
        let seed = KeySeed::from_bytes(&[0xAB; 32]);
        let a = derive_card_key(&seed, KeySlot::MASTER, &uid("04A1B2C3D4E5F6"), ITERATIONS);
        let b = derive_card_key(&seed, KeySlot::MASTER, &uid("04A1B2C3D4E5F6"), ITERATIONS);

        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 32);
    }

    #[test]
    fn test_iteration_count_changes_key() {
        let seed = KeySeed::from_bytes(&[1; 32]);
        let card = uid("04AA");
        assert_ne!(
            derive_card_key(&seed, KeySlot::MASTER, &card, 1),
            derive_card_key(&seed, KeySlot::MASTER, &card, 2)
        );
    }

    #[test]
    fn test_generated_seeds_differ() {
        assert_ne!(generate_key_seed(), generate_key_seed());
        assert_eq!(generate_key_seed().expose().len(), KEY_SEED_LENGTH * 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_each_input_changes_the_key(
            seed_a in any::<[u8; 32]>(),
            seed_b in any::<[u8; 32]>(),
            uid_a in "[0-9A-F]{14}",
            uid_b in "[0-9A-F]{14}",
            slot_a in 0u8..=4,
            slot_b in 0u8..=4,
        ) {
            let (seed_a, seed_b) = (KeySeed::from_bytes(&seed_a), KeySeed::from_bytes(&seed_b));
            let (uid_a, uid_b) = (uid(&uid_a), uid(&uid_b));
            let (slot_a, slot_b) = (KeySlot::new(slot_a).unwrap(), KeySlot::new(slot_b).unwrap());

            let base = derive_card_key(&seed_a, slot_a, &uid_a, ITERATIONS);

            if seed_a != seed_b {
                prop_assert_ne!(base, derive_card_key(&seed_b, slot_a, &uid_a, ITERATIONS));
            }
            if uid_a != uid_b {
                prop_assert_ne!(base, derive_card_key(&seed_a, slot_a, &uid_b, ITERATIONS));
            }
            if slot_a != slot_b {
                prop_assert_ne!(base, derive_card_key(&seed_a, slot_b, &uid_a, ITERATIONS));
            }
        }
    }
}
