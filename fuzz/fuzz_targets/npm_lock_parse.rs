#![no_main]

use std::fs;

use libfuzzer_sys::fuzz_target;
use rtx::depset::build_working_set;
use rtx_scanners::{NpmLockScanner, Scanner};
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let td = match tempdir() {
        Ok(v) => v,
        Err(_) => return,
    };

    if fs::write(td.path().join("package-lock.json"), data).is_ok() {
        if let Ok(deps) = NpmLockScanner.scan(td.path()) {
            // Whatever parses must survive working-set construction with
            // unique keys.
            let set = build_working_set(deps);
            let mut keys: Vec<String> = set.iter().map(|d| d.key().to_string()).collect();
            let before = keys.len();
            keys.dedup();
            assert_eq!(before, keys.len());
        }
    }
});
