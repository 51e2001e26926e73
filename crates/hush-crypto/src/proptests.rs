#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::conversation::{decrypt, derive_key, encrypt};
    use crate::identity::{Identity, IdentitySecret};
    use crate::resource_key::ResourceKey;
    use crate::transcript::Transcript;
    use crate::wrap::{unwrap, wrap_for};

    fn identity_from_seeds(kex: [u8; 32], sign: [u8; 32]) -> Identity {
        Identity::from_secret(&IdentitySecret { kex, sign })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_transcript_determinism(
            tag in any::<u32>(),
            data in any::<Vec<u8>>(),
        ) {
            let mut t1 = Transcript::new("prop");
            t1.append_bytes(tag, &data);
            let mut t2 = Transcript::new("prop");
            t2.append_bytes(tag, &data);
            prop_assert_eq!(t1.finalize(), t2.finalize());
        }

        #[test]
        fn test_conversation_key_symmetric(
            a_kex in any::<[u8; 32]>(),
            a_sign in any::<[u8; 32]>(),
            b_kex in any::<[u8; 32]>(),
            b_sign in any::<[u8; 32]>(),
        ) {
            let a = identity_from_seeds(a_kex, a_sign);
            let b = identity_from_seeds(b_kex, b_sign);
            let ab = derive_key(&a, &b.public_id());
            let ba = derive_key(&b, &a.public_id());
            prop_assert!(ab.same_secret(&ba));
        }

        #[test]
        fn test_encrypt_decrypt_round_trip(plaintext in any::<Vec<u8>>()) {
            let a = Identity::generate();
            let b = Identity::generate();
            let ct = encrypt(&plaintext, &derive_key(&a, &b.public_id())).unwrap();
            let out = decrypt(&ct, &derive_key(&b, &a.public_id()));
            prop_assert!(out.authenticated);
            prop_assert_eq!(out.plaintext, plaintext);
        }

        #[test]
        fn test_decrypt_garbage_never_authenticates(garbage in ".*") {
            let a = Identity::generate();
            let key = derive_key(&a, &Identity::generate().public_id());
            let out = decrypt(&garbage, &key);
            prop_assert!(!out.authenticated);
            prop_assert!(out.failure.is_some());
        }

        #[test]
        fn test_decrypt_random_bytes_never_authenticates(bytes in any::<Vec<u8>>()) {
            use base64::{engine::general_purpose::STANDARD, Engine};
            let a = Identity::generate();
            let key = derive_key(&a, &Identity::generate().public_id());
            let out = decrypt(&STANDARD.encode(&bytes), &key);
            prop_assert!(!out.authenticated);
        }

        #[test]
        fn test_wrap_unwrap_bit_for_bit(
            key_bytes in any::<[u8; 32]>(),
            version in 1u32..1_000,
            resource in "[a-z0-9-]{1,24}",
        ) {
            let wrapper = Identity::generate();
            let recipient = Identity::generate();
            let key = ResourceKey::from_bytes(resource, version, key_bytes);

            let wrapped = wrap_for(&key, &recipient.public_id(), &wrapper, 0).unwrap();
            let recovered = unwrap(&wrapped, &recipient).unwrap();
            prop_assert_eq!(recovered.as_bytes(), &key_bytes);
            prop_assert_eq!(recovered.version(), version);
        }

        #[test]
        fn test_message_round_trip(plaintext in any::<Vec<u8>>(), version in any::<u32>()) {
            let key = ResourceKey::generate("prop-channel", version);
            let ct = key.seal_message(&plaintext).unwrap();
            prop_assert_eq!(key.open_message(&ct).unwrap(), plaintext);
        }
    }
}
