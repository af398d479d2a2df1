#![no_main]

use libfuzzer_sys::fuzz_target;
use rtgp_protocol::validate;

fuzz_target!(|data: &[u8]| {
    let _ = validate(data, false);
    let _ = validate(data, true);
});
