#![no_main]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use libfuzzer_sys::fuzz_target;

const MAX_LEN: usize = 4096;

fuzz_target!(|data: &[u8]| {
    let Some((&mode, payload)) = data.split_first() else {
        return;
    };
    let capped = payload.get(..MAX_LEN).unwrap_or(payload);
    let input = if mode % 2 == 0 {
        STANDARD.encode(capped)
    } else {
        String::from_utf8_lossy(capped).into_owned()
    };

    if let Ok(histogram) = volley::metrics::LatencyHistogram::decode_base64(&input) {
        if let Ok(encoded) = histogram.encode_base64() {
            debug_assert!(!encoded.is_empty());
        }
    }
});
