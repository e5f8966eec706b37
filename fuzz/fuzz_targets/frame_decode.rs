//! Fuzz target for Frame::decode
//!
//! Arbitrary bytes from the network must never panic the parser: no size
//! overflow, no over-read, no header that slips past validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_proto::{Frame, FrameHeader};

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        assert!(frame.payload.len() <= FrameHeader::MAX_PAYLOAD_SIZE as usize);
        assert!(data.len() >= FrameHeader::SIZE + frame.payload.len());
    }
});
