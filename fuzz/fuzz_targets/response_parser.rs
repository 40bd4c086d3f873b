#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&control, payload)) = data.split_first() else {
        return;
    };
    let split = usize::from(control & 0x3f).saturating_add(1);
    let correlation = control & 0x40 != 0;
    if let Ok(responses) = volley::fuzzing::parse_responses_input(payload, split, correlation) {
        let total: u64 = responses.iter().map(|response| response.bytes).sum();
        debug_assert!(total <= payload.len() as u64);
    }
});
