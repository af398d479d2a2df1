#![no_main]

use bytes::{Bytes, BytesMut};
use libfuzzer_sys::fuzz_target;
use rtgp_protocol::{HEADER_LEN, Header, WireDecode, WireEncode};

fuzz_target!(|data: [u8; HEADER_LEN]| {
    let mut buf = Bytes::copy_from_slice(&data);
    let Ok(header) = Header::decode(&mut buf) else {
        return;
    };
    let mut out = BytesMut::with_capacity(HEADER_LEN);
    header.encode(&mut out);
    assert_eq!(&out[..], &data[..]);
});
