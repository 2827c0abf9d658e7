use super::*;

fn key() -> ObfuscationKey {
    ObfuscationKey::default()
}

mod decode {
    use super::*;

    #[test]
    fn plaintext_splits_on_first_colon() {
        let credential = decode("admin:pa:ss:word", &key()).unwrap();
        assert_eq!("admin", credential.username());
        assert_eq!("pa:ss:word", credential.secret());
    }

    #[test]
    fn rejects_missing_colon() {
        assert_eq!(
            Err(CredentialError::MalformedCredential(
                "expected username:password"
            )),
            decode("admin", &key()),
        );
    }

    #[test]
    fn rejects_empty_fields() {
        for raw in [":secret", "admin:", ":", ""] {
            let error = decode(raw, &key()).unwrap_err();
            assert_eq!(ErrorKind::MalformedCredential, error.kind(), "input: {raw:?}");
        }
    }

    #[test]
    fn rejects_invalid_base64() {
        let error = decode("xor:not base64!!", &key()).unwrap_err();
        assert_eq!(
            CredentialError::MalformedCredential("obfuscated credential is not valid Base64"),
            error,
        );
    }

    #[test]
    fn rejects_blob_without_colon() {
        let blob = STANDARD.encode(key().apply(b"nocolonhere"));
        assert!(decode(&format!("xor:{blob}"), &key()).is_err());
    }

    #[test]
    fn errors_never_echo_input() {
        let error = decode("hunter2", &key()).unwrap_err();
        assert!(!error.to_string().contains("hunter2"));
    }
}

mod encode_obfuscated {
    use super::*;

    #[test]
    fn round_trips_through_decode() {
        for (username, secret) in [
            ("admin", "admin"),
            ("dp-ops", "p@ss:with:colons"),
            ("üser", "šecret ✓"),
            ("xor", "xor:looks-tagged"),
        ] {
            let credential = Credential::new(username, secret);
            let encoded = encode_obfuscated(&credential, &key());
            assert!(encoded.starts_with(OBFUSCATED_PREFIX));
            assert_eq!(credential, decode(&encoded, &key()).unwrap());
        }
    }

    #[test]
    fn hides_the_secret() {
        let credential = Credential::new("admin", "hunter2");
        let encoded = encode_obfuscated(&credential, &key());
        assert!(!encoded.contains("hunter2"));
        assert!(!encoded.contains("admin"));
    }

    #[test]
    fn depends_on_key() {
        let credential = Credential::new("admin", "hunter2");
        let other = ObfuscationKey::new(b"rotated".to_vec()).unwrap();
        let encoded = encode_obfuscated(&credential, &other);

        assert_eq!(credential, decode(&encoded, &other).unwrap());
        assert_ne!(Ok(credential), decode(&encoded, &key()));
    }
}

mod obfuscation_key {
    use super::*;

    #[test]
    fn rejects_empty_key() {
        assert!(ObfuscationKey::new(Vec::new()).is_none());
    }

    #[test]
    fn apply_is_its_own_inverse() {
        let key = ObfuscationKey::new(b"abc".to_vec()).unwrap();
        let input = b"the quick brown fox";
        assert_eq!(input.to_vec(), key.apply(&key.apply(input)));
    }
}

mod credential {
    use super::*;

    #[test]
    fn debug_redacts_secret() {
        let debug = format!("{:?}", Credential::new("admin", "hunter2"));
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn redact_scrubs_output() {
        let credential = Credential::new("admin", "hunter2");
        assert_eq!(
            "Password: ********\nWelcome",
            credential.redact("Password: hunter2\nWelcome"),
        );
    }
}

mod credentials {
    use super::*;

    #[test]
    fn one_credential_is_shared() {
        let credentials =
            Credentials::for_targets(vec![Credential::new("admin", "a")], 3).unwrap();
        assert_eq!("admin", credentials.for_index(2).unwrap().username());
    }

    #[test]
    fn pairs_one_per_target() {
        let credentials = Credentials::for_targets(
            vec![Credential::new("one", "a"), Credential::new("two", "b")],
            2,
        )
        .unwrap();
        assert_eq!("one", credentials.for_index(0).unwrap().username());
        assert_eq!("two", credentials.for_index(1).unwrap().username());
    }

    #[test]
    fn rejects_mismatched_count() {
        let failure = Credentials::for_targets(
            vec![Credential::new("one", "a"), Credential::new("two", "b")],
            3,
        )
        .unwrap_err();
        assert_eq!(ErrorKind::CredentialCount, failure.kind);

        assert!(Credentials::for_targets(vec![], 1).is_err());
    }
}
