//! Property-based tests for frame and payload decoding
//!
//! Decoding must never panic on untrusted input, and a concatenation of
//! encoded frames must split back into the same frames.

use bytes::Bytes;
use parley_proto::{
    Frame, FrameHeader, Opcode, Payload, ProtocolError, UserId,
    requests::{Register, SendMessage},
};
use proptest::prelude::*;

fn arbitrary_opcode() -> impl Strategy<Value = Opcode> {
    prop::sample::select(Opcode::ALL.to_vec())
}

fn arbitrary_frame() -> impl Strategy<Value = Frame> {
    (arbitrary_opcode(), any::<u32>(), prop::collection::vec(any::<u8>(), 0..256)).prop_map(
        |(opcode, request_id, payload)| {
            let mut header = FrameHeader::new(opcode);
            header.set_request_id(request_id);
            Frame::new(header, Bytes::from(payload))
        },
    )
}

fn arbitrary_send() -> impl Strategy<Value = Payload> {
    (any::<[u8; 16]>(), "[A-Za-z0-9+/]{0,64}={0,2}", "[A-Za-z0-9+/]{16}").prop_map(
        |(receiver, cipher_text, iv)| {
            Payload::Send(SendMessage {
                receiver_id: UserId::from_random_bytes(receiver),
                cipher_text,
                iv,
            })
        },
    )
}

proptest! {
    #[test]
    fn prop_frame_stream_splits(frames in prop::collection::vec(arbitrary_frame(), 1..8)) {
        let mut wire = Vec::new();
        for frame in &frames {
            frame.encode(&mut wire).unwrap();
        }

        let mut offset = 0;
        for expected in &frames {
            let decoded = Frame::decode(&wire[offset..]).unwrap();
            offset += decoded.encoded_len();
            prop_assert_eq!(&decoded, expected);
        }
        prop_assert_eq!(offset, wire.len());
    }

    #[test]
    fn prop_decode_arbitrary_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        if let Ok(frame) = Frame::decode(&bytes) {
            let _ = Payload::from_frame(&frame);
        }
    }

    #[test]
    fn prop_payload_decode_arbitrary_bytes_never_panics(
        opcode in arbitrary_opcode(),
        bytes in prop::collection::vec(any::<u8>(), 0..128),
    ) {
        let _ = Payload::decode(opcode, &bytes);
    }

    #[test]
    fn prop_send_payload_round_trip(payload in arbitrary_send(), request_id in any::<u32>()) {
        let frame = payload.clone().into_frame(request_id).unwrap();
        let wire = frame.to_vec().unwrap();

        let decoded = Frame::decode(&wire).unwrap();
        prop_assert_eq!(decoded.request_id(), request_id);
        prop_assert_eq!(Payload::from_frame(&decoded).unwrap(), payload);
    }

    #[test]
    fn prop_truncation_detected(payload_len in 1usize..256, cut in any::<prop::sample::Index>()) {
        let frame = Frame::new(FrameHeader::new(Opcode::Send), vec![0xAB; payload_len]);
        let wire = frame.to_vec().unwrap();
        let keep = FrameHeader::SIZE + cut.index(payload_len);

        let is_truncated = matches!(
            Frame::decode(&wire[..keep]),
            Err(ProtocolError::FrameTruncated { .. })
        );
        prop_assert!(is_truncated);
    }
}

#[test]
fn register_payload_uses_camel_case_field() {
    let frame = Payload::Register(Register { user_id: UserId::from_random_bytes([1; 16]) })
        .into_frame(7)
        .unwrap();

    let value: ciborium::Value = ciborium::de::from_reader(frame.payload.as_ref()).unwrap();
    let keys: Vec<&str> =
        value.as_map().unwrap().iter().filter_map(|(k, _)| k.as_text()).collect();
    assert_eq!(keys, ["userId"]);
}
