#![allow(clippy::unwrap_used)]

//! Property tests for the JSON wire codec.
//!
//! 1. Arbitrary text never panics `decode`.
//! 2. Zero and absent numeric fields decode identically.
//! 3. A frame the server could send decodes to what was encoded.
//! 4. Authoritative identity depends on the id alone.

use proptest::prelude::*;
use wirechat_proto::codec;
use wirechat_proto::message::{IdentityKey, Message, MessageId, MessageKind, UserId};

fn arb_user() -> impl Strategy<Value = UserId> {
    (1..u64::MAX).prop_map(UserId::new)
}

fn arb_body() -> impl Strategy<Value = String> {
    "\\PC{0,256}"
}

fn arb_message() -> impl Strategy<Value = Message> {
    (
        prop_oneof![
            Just(MessageKind::Message),
            Just(MessageKind::Ack),
            Just(MessageKind::Join),
            Just(MessageKind::Leave),
        ],
        proptest::option::of(arb_user()),
        proptest::option::of(arb_user()),
        proptest::option::of((1..u64::MAX).prop_map(MessageId::new)),
        proptest::option::of("[a-z0-9-]{1,16}"),
        arb_body(),
    )
        .prop_map(|(kind, from, to, id, room_id, body)| Message {
            kind,
            from,
            to,
            id,
            room_id,
            body,
        })
}

proptest! {
    #[test]
    fn decode_never_panics(frame in "\\PC*") {
        let _ = codec::decode(&frame);
    }

    #[test]
    fn decode_never_panics_on_json_like_input(frame in r#"\{("[a-z_]{1,8}":(-?[0-9]{1,20}|"[^"]{0,8}"|null|true),?){0,6}\}"#) {
        let _ = codec::decode(&frame);
    }

    #[test]
    fn encoded_frames_decode_to_the_same_message(message in arb_message()) {
        let frame = codec::encode(&message).unwrap();
        prop_assert_eq!(codec::decode(&frame).unwrap(), message);
    }

    #[test]
    fn zero_fields_mean_absent(to in arb_user(), body in arb_body()) {
        let frame = serde_json::json!({
            "type": "message",
            "from": 0,
            "to": to.get(),
            "id": 0,
            "body": body,
        })
        .to_string();
        let decoded = codec::decode(&frame).unwrap();
        prop_assert_eq!(decoded, Message::outbound(to, body));
    }

    #[test]
    fn authoritative_identity_ignores_content(
        id in 1..u64::MAX,
        a in arb_user(),
        b in arb_user(),
        body_a in arb_body(),
        body_b in arb_body(),
    ) {
        let id = MessageId::new(id);
        let first = Message::authoritative(id, a, b, body_a);
        let second = Message::authoritative(id, b, a, body_b);
        prop_assert_eq!(first.identity_key(), IdentityKey::Id(id));
        prop_assert_eq!(first.identity_key(), second.identity_key());
    }

    #[test]
    fn provisional_identity_follows_content(a in arb_user(), b in arb_user(), body in arb_body()) {
        let first = Message::provisional(a, b, body.clone());
        let second = Message::provisional(a, b, body);
        prop_assert_eq!(first.identity_key(), second.identity_key());
        let composite = matches!(first.identity_key(), IdentityKey::Composite { .. });
        prop_assert!(composite);
    }
}
