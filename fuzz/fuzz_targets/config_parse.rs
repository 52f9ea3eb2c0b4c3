#![no_main]

use std::fs;

use libfuzzer_sys::fuzz_target;
use rtx_config::load_config_from_file;
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let td = match tempdir() {
        Ok(v) => v,
        Err(_) => return,
    };

    let path = td.path().join("rtx.toml");
    if fs::write(&path, data).is_ok() {
        // Arbitrary bytes must never panic: either a config or an error.
        if let Ok(config) = load_config_from_file(&path) {
            let _ = config.validate();
        }
    }
});
