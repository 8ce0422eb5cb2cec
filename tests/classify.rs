//! Format detection over hand-built and generated inputs.

use std::sync::Arc;

use strataseal::legacy::encrypt_legacy;
use strataseal::{classify, CodecConfig, Envelope, Format, KeyManager, MemoryKeyStore, Vault};

#[test]
fn test_hand_constructed_envelopes() {
    assert_eq!(
        classify(r#"{"ciphertext":"abc","iv":"def","hmac":"ghi"}"#),
        Format::SingleLayer
    );
    assert_eq!(
        classify(r#"{"ciphertext":"c","layers":2,"iv1":"a","iv2":"b","hmac1":"x","hmac2":"y"}"#),
        Format::Layered
    );
    assert_eq!(
        classify(
            r#"{"ciphertext":"c","layers":3,"iv1":"a","iv2":"b","hmac1":"x","hmac2":"y","salt":"s","iv3":"z","hmac3":"w"}"#
        ),
        Format::Layered
    );
    assert_eq!(classify("U2FsdGVkX19vbGQgZm9ybWF0"), Format::Legacy);
}

#[test]
fn test_malformed_json_is_legacy_not_panic() {
    for raw in [
        "{\"ciphertext\": ",
        "{'iv': 'single quotes'}",
        "{\"layers\": 2}",
        "{\"ciphertext\":\"x\",\"iv\":\"y\"}",
        "\u{0}\u{1}binary",
    ] {
        assert_eq!(classify(raw), Format::Legacy, "input {raw:?}");
    }
}

#[test]
fn test_generated_values() {
    let manager = KeyManager::new(Arc::new(MemoryKeyStore::new()), "master-key");
    let vault = Vault::new(Arc::new(manager), CodecConfig { pbkdf2_iterations: 1_000 });

    assert_eq!(classify(&vault.encrypt_data("x").unwrap()), Format::SingleLayer);
    assert_eq!(classify(&vault.encrypt_with_layers("x", None).unwrap()), Format::Layered);
    assert_eq!(
        classify(&vault.encrypt_with_layers("x", Some("p")).unwrap()),
        Format::Layered
    );
    assert_eq!(classify(&encrypt_legacy("old", "x").unwrap()), Format::Legacy);
}

#[test]
fn test_parse_matches_classify() {
    let raw = r#"{"ciphertext":"abc","iv":"def","hmac":"ghi"}"#;
    let envelope = Envelope::parse(raw).unwrap();
    assert_eq!(envelope.format(), classify(raw));
    assert!(matches!(Envelope::parse("anything").unwrap(), Envelope::Legacy(_)));
}
