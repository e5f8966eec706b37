//! Fuzz target for CBOR deserialization attacks
//!
//! # Strategy
//!
//! - Deeply nested: Arrays/maps nested to arbitrary depth (stack overflow)
//! - Huge lengths: CBOR claiming massive byte/string/array lengths (memory)
//! - Random bytes: Completely arbitrary CBOR data (general malformation)
//! - Type confusion: Payload bytes that don't match frame opcode
//! - Duplicate keys: CBOR maps with repeated key names
//! - Bad ids: well-formed requests whose UUID fields are not UUIDs
//!
//! # Invariants
//!
//! - Deserialization completes quickly (no infinite loops)
//! - Huge claimed lengths rejected (not allocated)
//! - NEVER panic on malformed CBOR

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_proto::{Frame, FrameHeader, Opcode, Payload};

#[derive(Debug, Clone, Arbitrary)]
enum CborAttack {
    DeeplyNested { depth: u8, payload_type: PayloadType },
    HugeLength { claimed_len_exponent: u8 },
    RandomBytes { bytes: Vec<u8> },
    TypeConfusion { opcode: u16, wrong_payload_bytes: Vec<u8> },
    DuplicateKeys { count: u8 },
    BadUserId { id: String },
}

#[derive(Debug, Clone, Arbitrary)]
enum PayloadType {
    Array,
    Map,
    Bytes,
    String,
}

const REQUESTS: [Opcode; 5] = [
    Opcode::Register,
    Opcode::Send,
    Opcode::RegisterUser,
    Opcode::LookupPublicKey,
    Opcode::FetchHistory,
];

fn decode(opcode: Opcode, bytes: Vec<u8>) {
    let frame = Frame::new(FrameHeader::new(opcode), bytes);
    let _ = Payload::from_frame(&frame);
}

fuzz_target!(|attack: CborAttack| {
    match attack {
        CborAttack::DeeplyNested { depth, payload_type } => {
            let cbor_bytes = create_nested_cbor(usize::from(depth % 50), &payload_type);
            for opcode in REQUESTS {
                decode(opcode, cbor_bytes.clone());
            }
        }

        CborAttack::HugeLength { claimed_len_exponent } => {
            let exponent = u32::from(claimed_len_exponent % 21);
            let claimed_length = if exponent < 20 { 1u32 << exponent } else { u32::MAX };

            let attacks = [
                create_huge_byte_string(claimed_length),
                create_huge_text_string(claimed_length),
                create_huge_array(claimed_length),
            ];

            for cbor_bytes in attacks {
                for opcode in [Opcode::Send, Opcode::History, Opcode::UserList, Opcode::Deliver] {
                    decode(opcode, cbor_bytes.clone());
                }
            }
        }

        CborAttack::RandomBytes { bytes } => {
            for opcode in Opcode::ALL {
                decode(opcode, bytes.clone());
            }
        }

        CborAttack::TypeConfusion { opcode, wrong_payload_bytes } => {
            let opcode = Opcode::from_u16(opcode).unwrap_or(Opcode::Send);
            decode(opcode, wrong_payload_bytes);
        }

        CborAttack::DuplicateKeys { count } => {
            let actual_count = (count % 10).max(2);
            let mut cbor_bytes = vec![0xA0 | actual_count];

            for _ in 0..actual_count {
                cbor_bytes.push(0x66);
                cbor_bytes.extend_from_slice(b"userId");
                cbor_bytes.push(0x01);
            }

            decode(Opcode::Register, cbor_bytes);
        }

        CborAttack::BadUserId { id } => {
            let len = id.len().min(23) as u8;
            let mut cbor_bytes = vec![0xA1, 0x66];
            cbor_bytes.extend_from_slice(b"userId");
            cbor_bytes.push(0x60 | len);
            cbor_bytes.extend_from_slice(&id.as_bytes()[..usize::from(len)]);

            decode(Opcode::Register, cbor_bytes.clone());
            decode(Opcode::LookupPublicKey, cbor_bytes);
        }
    }
});

fn create_nested_cbor(depth: usize, payload_type: &PayloadType) -> Vec<u8> {
    let mut bytes = Vec::new();

    match payload_type {
        PayloadType::Array => {
            bytes.extend(std::iter::repeat(0x81).take(depth));
            bytes.push(0x01);
        }
        PayloadType::Map => {
            for _ in 0..depth {
                bytes.extend_from_slice(&[0xA1, 0x61, b'a']);
            }
            bytes.push(0x01);
        }
        PayloadType::Bytes => {
            bytes.extend(std::iter::repeat(0x81).take(depth));
            bytes.extend_from_slice(&[0x41, 0x00]);
        }
        PayloadType::String => {
            bytes.extend(std::iter::repeat(0x81).take(depth));
            bytes.extend_from_slice(&[0x61, b'x']);
        }
    }

    bytes
}

fn create_huge_byte_string(claimed_length: u32) -> Vec<u8> {
    let mut bytes = vec![0x5A];
    bytes.extend_from_slice(&claimed_length.to_be_bytes());
    bytes.extend(vec![0xAA; (claimed_length as usize).min(10)]);
    bytes
}

fn create_huge_text_string(claimed_length: u32) -> Vec<u8> {
    let mut bytes = vec![0x7A];
    bytes.extend_from_slice(&claimed_length.to_be_bytes());
    bytes.extend(vec![b'x'; (claimed_length as usize).min(10)]);
    bytes
}

fn create_huge_array(claimed_length: u32) -> Vec<u8> {
    let mut bytes = vec![0x9A];
    bytes.extend_from_slice(&claimed_length.to_be_bytes());
    bytes.extend(std::iter::repeat(0x01).take((claimed_length as usize).min(5)));
    bytes
}
