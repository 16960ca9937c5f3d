//! Property tests for recipient-set matching and the wire codec.
//!
//! Uses proptest to verify:
//! 1. Every permutation of a recipient list produces the same key.
//! 2. Lists that differ in membership or multiplicity never match.
//! 3. Random bytes never cause a panic in decode (returns `Err` gracefully).

#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use setchat_proto::codec;
use setchat_proto::event::ClientEvent;
use setchat_proto::identity::{Identity, RecipientKey};

/// Strategy for short identities drawn from a small alphabet, so lists
/// overlap often enough to exercise the interesting cases.
fn arb_identity() -> impl Strategy<Value = Identity> {
    "[a-e]{1,2}".prop_map(Identity::new)
}

/// Strategy for a non-empty recipient list.
fn arb_recipients() -> impl Strategy<Value = Vec<Identity>> {
    prop::collection::vec(arb_identity(), 1..8)
}

/// Multiset comparison done the slow way, as an oracle.
fn same_multiset(a: &[Identity], b: &[Identity]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut remaining: Vec<&Identity> = b.iter().collect();
    for id in a {
        match remaining.iter().position(|r| *r == id) {
            Some(pos) => {
                remaining.swap_remove(pos);
            }
            None => return false,
        }
    }
    remaining.is_empty()
}

proptest! {
    #[test]
    fn permutations_share_a_key(
        (original, shuffled) in arb_recipients()
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        prop_assert_eq!(RecipientKey::new(&original), RecipientKey::new(&shuffled));
        prop_assert!(RecipientKey::matches(&original, &shuffled));
    }

    #[test]
    fn key_equality_is_multiset_equality(a in arb_recipients(), b in arb_recipients()) {
        prop_assert_eq!(RecipientKey::matches(&a, &b), same_multiset(&a, &b));
    }

    #[test]
    fn adding_a_duplicate_breaks_the_match(list in arb_recipients(), pick in any::<prop::sample::Index>()) {
        let mut longer = list.clone();
        longer.push(pick.get(&list).clone());
        prop_assert!(!RecipientKey::matches(&list, &longer));
    }

    #[test]
    fn random_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = codec::decode_client(&bytes);
        let _ = codec::decode_server(&bytes);
    }

    #[test]
    fn send_message_survives_encoding(recipients in arb_recipients(), text in "[^\x00]{0,256}") {
        let event = ClientEvent::SendMessage { recipients, text };
        let bytes = codec::encode_client(&event).unwrap();
        prop_assert_eq!(codec::decode_client(&bytes).unwrap(), event);
    }
}
