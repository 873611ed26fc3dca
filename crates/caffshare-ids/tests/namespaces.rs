// Namespace isolation and stability tests
//
// These tests exercise the codec the way the server does: one codec built at
// startup, identifiers issued in one namespace, then presented back (possibly
// to the wrong endpoint) after the process "restarts".

use caffshare_ids::{IdCodec, IdConfig, IdError, Namespace};

fn build(salt: &str) -> IdCodec {
    IdCodec::new(IdConfig::new(salt, 8)).expect("valid config")
}

#[test]
fn test_identifiers_survive_restart() {
    let before = build("production-salt");
    let issued: Vec<(Namespace, u64, String)> = Namespace::ALL
        .iter()
        .flat_map(|ns| (1..50u64).map(move |id| (*ns, id)))
        .map(|(ns, id)| (ns, id, before.encode(ns, id)))
        .collect();

    // A fresh codec from the same configuration decodes everything.
    let after = build("production-salt");
    for (ns, id, public_id) in issued {
        assert_eq!(after.decode(ns, &public_id), Ok(id));
    }
}

#[test]
fn test_salt_change_invalidates_identifiers() {
    let old = build("old-salt");
    let new = build("new-salt");

    let mut rejected = 0;
    for id in 1..100u64 {
        let public_id = old.encode(Namespace::User, id);
        if new.decode(Namespace::User, &public_id) == Err(IdError::InvalidIdentifier) {
            rejected += 1;
        }
    }
    assert_eq!(rejected, 99);
}

#[test]
fn test_no_cross_namespace_decoding() {
    let codec = build("cross-namespace");
    for id in 0..500u64 {
        for issued_in in Namespace::ALL {
            let public_id = codec.encode(issued_in, id);
            for presented_to in Namespace::ALL {
                let result = codec.decode(presented_to, &public_id);
                if issued_in == presented_to {
                    assert_eq!(result, Ok(id));
                } else {
                    assert_eq!(
                        result,
                        Err(IdError::InvalidIdentifier),
                        "{} id {} decoded as {}",
                        issued_in,
                        id,
                        presented_to
                    );
                }
            }
        }
    }
}

#[test]
fn test_identifiers_are_unique_within_namespace() {
    let codec = build("uniqueness");
    let mut seen = std::collections::HashSet::new();
    for id in 0..5_000u64 {
        assert!(seen.insert(codec.encode(Namespace::Caff, id)));
    }
}

#[test]
fn test_config_from_json() {
    let config: IdConfig =
        serde_json::from_str(r#"{"salt": "from-json"}"#).expect("config should parse");
    assert_eq!(config.min_length, 8);

    let codec = IdCodec::new(config).expect("valid config");
    let public_id = codec.encode(Namespace::Comment, 3);
    assert!(public_id.len() >= 8);
}
