//! Fuzz target for Payload::from_frame
//!
//! Every opcode is tried against the same arbitrary CBOR so malformed data,
//! type confusion and oversized collections all hit each payload type.
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use parley_proto::{Frame, FrameHeader, Opcode, Payload};

fuzz_target!(|data: &[u8]| {
    for opcode in Opcode::ALL {
        let mut header = FrameHeader::new(opcode);
        header.set_request_id(1);

        let frame = Frame::new(header, Bytes::copy_from_slice(data));

        if let Ok(payload) = Payload::from_frame(&frame) {
            assert_eq!(payload.opcode(), opcode);
        }
    }
});
