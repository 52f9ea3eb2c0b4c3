#![no_main]

use std::cmp::Ordering;

use libfuzzer_sys::fuzz_target;
use rtx_types::{VersionRange, compare_versions};

fuzz_target!(|data: (&str, &str)| {
    let (a, b) = data;

    // Invariants:
    // 1. Reflexive and total.
    assert_eq!(compare_versions(a, a), Ordering::Equal);

    // 2. Antisymmetric.
    match compare_versions(a, b) {
        Ordering::Less => assert_eq!(compare_versions(b, a), Ordering::Greater),
        Ordering::Greater => assert_eq!(compare_versions(b, a), Ordering::Less),
        Ordering::Equal => assert_eq!(compare_versions(b, a), Ordering::Equal),
    }

    // 3. Range matching never panics on arbitrary endpoints.
    let range = VersionRange {
        introduced: Some(a.to_string()),
        fixed: Some(b.to_string()),
        last_affected: None,
    };
    let _ = range.contains(a);
    let _ = range.contains(b);
});
