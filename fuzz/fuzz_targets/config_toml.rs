#![no_main]

use libfuzzer_sys::fuzz_target;
use volley::config::types::ConfigFile;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let parsed: Option<ConfigFile> = toml::from_str(input).ok();
        if volley::fuzzing::apply_config_from_toml(input).is_ok() {
            if let Some(config) = parsed {
                debug_assert!(config.connections != Some(0));
                debug_assert!(config.pipelining != Some(0));
                debug_assert!(!(config.body.is_some() && config.body_file.is_some()));
            }
        }
    }
});
