//! Working-set construction: deduplicate and order scanner output.

use std::collections::BTreeMap;

use rtx_types::{DepKey, Dependency};

/// Build the working set from raw scanner output.
///
/// Observations are deduplicated on `(ecosystem, normalized name, version)`.
/// A collision keeps the first observation's manifest path and becomes
/// direct if any observation was direct. The result is sorted by key, which
/// fixes the evaluation order for the whole run.
pub fn build_working_set(deps: impl IntoIterator<Item = Dependency>) -> Vec<Dependency> {
    let mut set: BTreeMap<DepKey, Dependency> = BTreeMap::new();
    for dep in deps {
        let key = dep.key();
        match set.get_mut(&key) {
            Some(existing) => existing.direct |= dep.direct,
            None => {
                set.insert(key, dep);
            }
        }
    }
    set.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtx_types::Ecosystem;
    use std::path::PathBuf;

    fn dep(eco: Ecosystem, name: &str, version: &str, manifest: &str, direct: bool) -> Dependency {
        Dependency {
            ecosystem: eco,
            name: name.to_string(),
            version: version.to_string(),
            manifest_path: PathBuf::from(manifest),
            direct,
        }
    }

    #[test]
    fn duplicates_collapse_to_one_entry() {
        let set = build_working_set([
            dep(Ecosystem::Npm, "lodash", "4.17.20", "a/package-lock.json", false),
            dep(Ecosystem::Npm, "lodash", "4.17.20", "b/package-lock.json", false),
        ]);
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].manifest_path, PathBuf::from("a/package-lock.json"));
    }

    #[test]
    fn direct_wins_over_transitive_on_merge() {
        let set = build_working_set([
            dep(Ecosystem::Npm, "lodash", "4.17.20", "a", false),
            dep(Ecosystem::Npm, "lodash", "4.17.20", "b", true),
        ]);
        assert!(set[0].direct);

        let set = build_working_set([
            dep(Ecosystem::Npm, "lodash", "4.17.20", "a", true),
            dep(Ecosystem::Npm, "lodash", "4.17.20", "b", false),
        ]);
        assert!(set[0].direct);
    }

    #[test]
    fn case_variants_collapse_for_case_insensitive_registries() {
        let set = build_working_set([
            dep(Ecosystem::Pypi, "Django", "4.2.0", "a", true),
            dep(Ecosystem::Pypi, "django", "4.2.0", "b", false),
        ]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn different_versions_stay_distinct() {
        let set = build_working_set([
            dep(Ecosystem::Npm, "lodash", "4.17.20", "a", true),
            dep(Ecosystem::Npm, "lodash", "4.17.21", "a", true),
        ]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn output_is_sorted_by_key() {
        let set = build_working_set([
            dep(Ecosystem::Pypi, "zebra", "1.0.0", "a", true),
            dep(Ecosystem::Npm, "apple", "1.0.0", "a", true),
            dep(Ecosystem::Npm, "banana", "1.0.0", "a", true),
        ]);
        let keys: Vec<String> = set.iter().map(|d| d.key().to_string()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn empty_input_builds_empty_set() {
        assert!(build_working_set([]).is_empty());
    }
}
