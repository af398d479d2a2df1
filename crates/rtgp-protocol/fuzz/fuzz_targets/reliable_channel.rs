#![no_main]

use libfuzzer_sys::fuzz_target;
use rtgp_protocol::Seq;
use rtgp_protocol::reliable::AntiReplayWindow;

// Feeds an arbitrary sequence of 16-bit sequence ids through the anti-replay
// window, checking only that it never panics - `record_received` is
// expected to return an error for plenty of these, never to crash.
fuzz_target!(|seqs: Vec<u16>| {
    let mut window = AntiReplayWindow::new(1000);
    for raw in seqs {
        let _ = window.record_received(Seq(raw));
    }
});
