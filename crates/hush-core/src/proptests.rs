//! Property-based tests for hush-core

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use hush_crypto::PublicId;

    use crate::descriptor::{ConnectionDescriptor, SignerMetadata};
    use crate::protocol::{SignerMessage, UnsignedEvent};
    use crate::types::KeyRequest;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        // Free-text metadata and secrets survive query encoding.
        #[test]
        fn test_descriptor_metadata_survives_encoding(
            id in any::<[u8; 32]>(),
            secret in "[ -~]{1,40}",
            name in proptest::option::of("\\PC{0,30}"),
            relay_count in 1usize..4,
        ) {
            let descriptor = ConnectionDescriptor {
                public_id: PublicId::from_bytes(id),
                relays: (0..relay_count).map(|i| format!("wss://relay{i}.example/?a=b&c")).collect(),
                secret,
                metadata: SignerMetadata { name, url: None, image: None },
            };
            prop_assert_eq!(ConnectionDescriptor::parse(&descriptor.to_uri()).unwrap(), descriptor);
        }

        // Untrusted relay payloads never panic the parser.
        #[test]
        fn test_signer_message_parse_total(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = SignerMessage::from_json(&bytes);
        }

        // Any change to signed content changes the signed bytes.
        #[test]
        fn test_signing_bytes_bind_content(
            content in "\\PC{0,64}",
            other in "\\PC{0,64}",
            created_at in any::<u64>(),
        ) {
            prop_assume!(content != other);
            let a = UnsignedEvent { kind: 1, created_at, tags: vec![], content };
            let b = UnsignedEvent { content: other, ..a.clone() };
            prop_assert_ne!(a.signing_bytes(), b.signing_bytes());
        }

        #[test]
        fn test_key_request_json_shape(resource in "[a-z0-9-]{1,24}", name in proptest::option::of("[A-Za-z ]{1,16}")) {
            let request = KeyRequest::new_pending(resource.clone(), PublicId::from_bytes([4; 32]), name.clone(), 1);
            let json = serde_json::to_value(&request).unwrap();
            prop_assert_eq!(json["resourceId"].as_str(), Some(resource.as_str()));
            prop_assert_eq!(json.get("requesterDisplayName").is_some(), name.is_some());
            prop_assert!(json.get("fulfilledAt").is_none());
        }
    }
}
