//! Popular-name corpora and close-name matching for typosquat detection.

use rtx_types::{CloseName, Ecosystem};

/// A popularity-ranked list of package names for one ecosystem.
///
/// The bundled corpora cover the registries' perennial top downloads; tests
/// and embedders inject their own via [`PopularCorpus::from_entries`]. The
/// matching rule is the part that is fixed: Levenshtein distance over
/// lowercased names, ties broken by the shorter candidate.
#[derive(Debug, Clone)]
pub struct PopularCorpus {
    entries: Vec<(String, u64)>,
}

/// Perennial top downloads per registry. Counts are order-of-magnitude
/// monthly figures; only their relative size matters for the tiebreaker.
const NPM_POPULAR: &[(&str, u64)] = &[
    ("lodash", 180_000_000),
    ("react", 160_000_000),
    ("chalk", 150_000_000),
    ("express", 120_000_000),
    ("axios", 110_000_000),
    ("commander", 100_000_000),
    ("tslib", 95_000_000),
    ("debug", 90_000_000),
    ("semver", 85_000_000),
    ("glob", 80_000_000),
    ("uuid", 75_000_000),
    ("minimist", 70_000_000),
    ("yargs", 60_000_000),
    ("webpack", 50_000_000),
    ("typescript", 45_000_000),
    ("prettier", 40_000_000),
    ("eslint", 38_000_000),
    ("moment", 30_000_000),
];

const PYPI_POPULAR: &[(&str, u64)] = &[
    ("boto3", 500_000_000),
    ("requests", 400_000_000),
    ("urllib3", 380_000_000),
    ("certifi", 350_000_000),
    ("numpy", 250_000_000),
    ("setuptools", 240_000_000),
    ("idna", 230_000_000),
    ("charset-normalizer", 220_000_000),
    ("packaging", 210_000_000),
    ("pandas", 180_000_000),
    ("six", 150_000_000),
    ("pyyaml", 140_000_000),
    ("cryptography", 130_000_000),
    ("click", 120_000_000),
    ("pydantic", 110_000_000),
    ("pip", 100_000_000),
    ("flask", 60_000_000),
    ("django", 30_000_000),
];

const CARGO_POPULAR: &[(&str, u64)] = &[
    ("serde", 300_000_000),
    ("syn", 280_000_000),
    ("quote", 270_000_000),
    ("proc-macro2", 260_000_000),
    ("rand", 200_000_000),
    ("libc", 190_000_000),
    ("serde-json", 180_000_000),
    ("cfg-if", 170_000_000),
    ("itoa", 150_000_000),
    ("hashbrown", 140_000_000),
    ("tokio", 130_000_000),
    ("regex", 120_000_000),
    ("clap", 100_000_000),
    ("anyhow", 95_000_000),
    ("thiserror", 90_000_000),
    ("log", 85_000_000),
    ("bytes", 80_000_000),
    ("chrono", 70_000_000),
];

impl PopularCorpus {
    /// The bundled corpus for one ecosystem; empty where we bundle none.
    pub fn bundled(ecosystem: Ecosystem) -> Self {
        let entries = match ecosystem {
            Ecosystem::Npm => NPM_POPULAR,
            Ecosystem::Pypi => PYPI_POPULAR,
            Ecosystem::Cargo => CARGO_POPULAR,
            _ => &[],
        };
        Self {
            entries: entries
                .iter()
                .map(|(name, downloads)| ((*name).to_string(), *downloads))
                .collect(),
        }
    }

    /// A corpus from explicit `(name, downloads)` entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, u64)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// True when the corpus has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Candidates within `max_distance` of `normalized_name`.
    ///
    /// The name itself is never a candidate. Results are sorted by distance,
    /// then candidate length (shorter wins a distance tie), then name.
    pub fn close_names(&self, normalized_name: &str, max_distance: u32) -> Vec<CloseName> {
        let needle = normalized_name.to_lowercase();
        let mut candidates: Vec<CloseName> = self
            .entries
            .iter()
            .filter(|(name, _)| name.as_str() != needle)
            .filter_map(|(name, downloads)| {
                let distance = strsim::levenshtein(&needle, &name.to_lowercase());
                u32::try_from(distance)
                    .ok()
                    .filter(|d| *d <= max_distance)
                    .map(|distance| CloseName {
                        name: name.clone(),
                        downloads: *downloads,
                        distance,
                    })
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.distance
                .cmp(&b.distance)
                .then_with(|| a.name.len().cmp(&b.name.len()))
                .then_with(|| a.name.cmp(&b.name))
        });
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_name_is_not_a_candidate() {
        let corpus = PopularCorpus::bundled(Ecosystem::Npm);
        let close = corpus.close_names("lodash", 2);
        assert!(close.iter().all(|c| c.name != "lodash"));
    }

    #[test]
    fn misspelling_finds_the_popular_target() {
        let corpus = PopularCorpus::bundled(Ecosystem::Pypi);
        let close = corpus.close_names("reqursts", 2);
        assert_eq!(close.first().map(|c| c.name.as_str()), Some("requests"));
        assert_eq!(close[0].distance, 1);
    }

    #[test]
    fn distance_bound_is_respected() {
        let corpus = PopularCorpus::from_entries([("alpha".to_string(), 100)]);
        assert!(corpus.close_names("alphazz", 1).is_empty());
        assert_eq!(corpus.close_names("alphazz", 2).len(), 1);
    }

    #[test]
    fn ties_prefer_shorter_candidate() {
        let corpus = PopularCorpus::from_entries([
            ("abcd".to_string(), 100),
            ("abc".to_string(), 50),
        ]);
        // "abx" is distance 1 from "abc" and distance 2 from "abcd".
        let close = corpus.close_names("abx", 2);
        assert_eq!(close[0].name, "abc");

        // Equal distance: shorter candidate sorts first regardless of count.
        let corpus = PopularCorpus::from_entries([
            ("abce".to_string(), 900),
            ("abf".to_string(), 10),
        ]);
        let close = corpus.close_names("abcf", 2);
        assert_eq!(close.len(), 2);
        assert_eq!(close[0].distance, close[1].distance);
        assert_eq!(close[0].name, "abf");
    }
}
