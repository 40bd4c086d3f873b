#![no_main]

use libfuzzer_sys::fuzz_target;
use volley::config::types::ConfigFile;

fuzz_target!(|data: &[u8]| {
    let parsed: Option<ConfigFile> = serde_json::from_slice(data).ok();
    if volley::fuzzing::apply_config_from_json(data).is_ok() {
        if let Some(config) = parsed {
            debug_assert!(config.connections != Some(0));
            debug_assert!(config.pipelining != Some(0));
            debug_assert!(config.amount != Some(0));
        }
    }
});
