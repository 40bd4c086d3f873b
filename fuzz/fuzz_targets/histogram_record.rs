#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(mut histogram) = volley::metrics::LatencyHistogram::new() else {
        return;
    };
    let mut recorded = 0u64;
    for chunk in data.chunks_exact(8) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        if histogram.record(u64::from_le_bytes(bytes)).is_ok() {
            recorded = recorded.saturating_add(1);
        }
    }
    debug_assert_eq!(histogram.count(), recorded);
    if recorded > 0 {
        let (p50, p90, p99) = histogram.percentiles();
        debug_assert!(p50 <= p90 && p90 <= p99);
        debug_assert!(histogram.min() <= histogram.max());
    }
});
