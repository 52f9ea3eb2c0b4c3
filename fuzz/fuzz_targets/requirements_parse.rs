#![no_main]

use std::fs;

use libfuzzer_sys::fuzz_target;
use rtx_scanners::{PipRequirementsScanner, Scanner};
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let td = match tempdir() {
        Ok(v) => v,
        Err(_) => return,
    };

    if fs::write(td.path().join("requirements.txt"), data).is_ok() {
        if let Ok(deps) = PipRequirementsScanner.scan(td.path()) {
            // Every reported pin carries a non-empty name and version.
            for dep in deps {
                assert!(!dep.name.is_empty());
                assert!(!dep.version.is_empty());
            }
        }
    }
});
