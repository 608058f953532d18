//! Merge configuration.
//!
//! [`MergeConfig`] is an immutable value: build it with struct update syntax over
//! [`MergeConfig::default`] or read it from JSON, then hand it to the
//! [`MergeCoordinator`](crate::MergeCoordinator), which validates it against the
//! provider registry before any work starts.
//!
//! # Example
//!
//! ```
//! use bibmerge::{MergeConfig, MergePolicy};
//!
//! let config = MergeConfig::from_json_str(r#"{
//!     "datasources": ["anystyle", "crossref", "openalex"],
//!     "policies": ["add_missing_free", "remove_duplicates"],
//!     "ref_year_end": 2020,
//!     "authors_ignore_list": ["/^anonymous/", "no author"]
//! }"#).unwrap();
//!
//! assert!(config.has_policy(MergePolicy::RemoveDuplicates));
//! assert!(!config.has_policy(MergePolicy::AddUnvalidated));
//! assert_eq!(config.author_distance_threshold, 3);
//! assert!(config.authors_ignore_list[0].matches("Anonymous Reviewer"));
//! ```

use crate::dedupe::DedupeKey;
use crate::provider::ProviderRegistry;
use crate::regex::Regex;
use crate::{MergeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// How vendor references are combined with the anchor's references.
///
/// Several policies are usually active at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Add every vendor reference that matches no anchor reference
    AddMissingAll,
    /// Like `AddMissingAll`, but not for the restricted-access source
    #[serde(alias = "add_missing_open")]
    AddMissingFree,
    /// Add anchor references no provider validated
    AddUnvalidated,
    /// Add all vendor references without matching. Produces duplicates.
    DumpAll,
    /// Remove references with a repeated match key, keeping the first
    RemoveDuplicates,
    /// Copy author affiliations of the citing work from vendor records
    AddAffiliations,
}

#[derive(Debug, Clone)]
enum PatternKind {
    Literal(String),
    Regex(Regex),
}

/// An ignore-list entry: a literal compared case-insensitively, or a regular expression.
///
/// In configuration text, an entry written as `/expr/` is a regular expression and
/// anything else a literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern(PatternKind);

impl Pattern {
    pub fn literal(text: &str) -> Self {
        Pattern(PatternKind::Literal(text.to_string()))
    }

    pub fn regex(expr: &str) -> Result<Self> {
        Regex::new(expr)
            .map(|re| Pattern(PatternKind::Regex(re)))
            .map_err(|e| MergeError::ConfigError(format!("invalid pattern '{expr}': {e}")))
    }

    /// Parses the configuration text form.
    pub fn parse(text: &str) -> Result<Self> {
        match text
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            Some(expr) if !expr.is_empty() => Self::regex(expr),
            _ => Ok(Self::literal(text)),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        match &self.0 {
            PatternKind::Literal(literal) => literal.to_lowercase() == text.to_lowercase(),
            PatternKind::Regex(re) => re.is_match(text),
        }
    }

    /// Whether any of `patterns` matches `text`.
    pub fn any_matches(patterns: &[Pattern], text: &str) -> bool {
        patterns.iter().any(|p| p.matches(text))
    }
}

impl TryFrom<String> for Pattern {
    type Error = MergeError;

    fn try_from(value: String) -> Result<Self> {
        Pattern::parse(&value)
    }
}

impl From<Pattern> for String {
    fn from(value: Pattern) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            PatternKind::Literal(literal) => f.write_str(literal),
            PatternKind::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// Configuration of a merge run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Citation-data providers in priority order. The first one returning data becomes the anchor.
    pub datasources: Vec<String>,
    /// Metadata providers consulted for reconciliation, in priority order.
    /// Empty means every enabled metadata provider of the registry, ordered by id.
    pub metadata_sources: Vec<String>,
    pub policies: BTreeSet<MergePolicy>,
    /// Earliest reference year kept (inclusive)
    pub ref_year_start: Option<i32>,
    /// Latest reference year kept (inclusive)
    pub ref_year_end: Option<i32>,
    pub authors_ignore_list: Vec<Pattern>,
    pub affiliation_ignore_list: Vec<Pattern>,
    /// Source excluded by [`MergePolicy::AddMissingFree`]
    pub restricted_source: String,
    /// Maximum edit distance between author names in reconciliation
    pub author_distance_threshold: usize,
    /// Maximum edit distance between titles when author names differ
    pub title_distance_threshold: usize,
    /// Memoize merged items and provider responses
    pub use_cache: bool,
    /// Route references without DOI or ISBN through metadata lookups
    pub reconcile_references: bool,
    /// Merge citing works in parallel
    pub run_in_parallel: bool,
    /// Key deciding which references [`MergePolicy::RemoveDuplicates`] treats as duplicates
    pub dedupe_key: DedupeKey,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            datasources: ["anystyle", "crossref", "openalex", "grobid", "dimensions", "wos"]
                .into_iter()
                .map(String::from)
                .collect(),
            metadata_sources: Vec::new(),
            policies: BTreeSet::from([
                MergePolicy::AddMissingAll,
                MergePolicy::AddUnvalidated,
                MergePolicy::RemoveDuplicates,
                MergePolicy::AddAffiliations,
            ]),
            ref_year_start: None,
            ref_year_end: None,
            authors_ignore_list: Vec::new(),
            affiliation_ignore_list: Vec::new(),
            restricted_source: "wos".to_string(),
            author_distance_threshold: 3,
            title_distance_threshold: 5,
            use_cache: true,
            reconcile_references: true,
            run_in_parallel: true,
            dedupe_key: DedupeKey::default(),
        }
    }
}

impl MergeConfig {
    /// Reads a configuration from JSON. Missing keys take their default values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Replaces the active policies.
    #[must_use]
    pub fn with_policies<I: IntoIterator<Item = MergePolicy>>(mut self, policies: I) -> Self {
        self.policies = policies.into_iter().collect();
        self
    }

    pub fn has_policy(&self, policy: MergePolicy) -> bool {
        self.policies.contains(&policy)
    }

    /// Whether a reference year passes the configured bounds. References without a year pass.
    pub fn year_in_range(&self, year: Option<i32>) -> bool {
        let Some(year) = year else {
            return true;
        };
        self.ref_year_start.is_none_or(|start| year >= start)
            && self.ref_year_end.is_none_or(|end| year <= end)
    }

    /// Checks the configuration against the available providers.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::ConfigError`] for an empty or repetitive datasource list or
    /// an inverted year range, and [`MergeError::UnknownProvider`] for ids the registry
    /// does not know.
    pub fn validate(&self, registry: &ProviderRegistry) -> Result<()> {
        if self.datasources.is_empty() {
            return Err(MergeError::ConfigError("No datasources given".to_string()));
        }

        let mut seen = HashSet::new();
        for id in &self.datasources {
            if !seen.insert(id) {
                return Err(MergeError::ConfigError(format!(
                    "Datasource '{id}' is listed more than once"
                )));
            }
        }

        for id in self.datasources.iter().chain(&self.metadata_sources) {
            registry.get(id)?;
        }

        if let (Some(start), Some(end)) = (self.ref_year_start, self.ref_year_end) {
            if start > end {
                return Err(MergeError::ConfigError(format!(
                    "ref_year_start ({start}) is after ref_year_end ({end})"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StaticProvider;
    use rstest::*;
    use std::sync::Arc;

    fn registry(ids: &[&str]) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for id in ids {
            registry.register(Arc::new(StaticProvider::new(id)));
        }
        registry
    }

    #[rstest]
    #[case("Smith", "smith", true)]
    #[case("Smith", "Smithson", false)]
    #[case("/^anon/", "anonymous", true)]
    #[case("/^anon/", "the anonymous", false)]
    #[case("/", "/", true)]
    fn test_pattern_matches(#[case] pattern: &str, #[case] text: &str, #[case] expected: bool) {
        assert_eq!(Pattern::parse(pattern).unwrap().matches(text), expected);
    }

    #[test]
    fn test_invalid_regex_is_config_error() {
        assert!(matches!(
            Pattern::parse("/(unclosed/"),
            Err(MergeError::ConfigError(_))
        ));
        assert!(MergeConfig::from_json_str(r#"{"authors_ignore_list": ["/(/"]}"#).is_err());
    }

    #[test]
    fn test_pattern_round_trip() {
        let config = MergeConfig {
            affiliation_ignore_list: vec![Pattern::literal("n/a"), Pattern::parse("/^x$/").unwrap()],
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed = MergeConfig::from_json_str(&json).unwrap();
        let texts: Vec<String> = parsed
            .affiliation_ignore_list
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(texts, vec!["n/a".to_string(), "/^x$/".to_string()]);
    }

    #[test]
    fn test_defaults() {
        let config = MergeConfig::from_json_str("{}").unwrap();
        assert_eq!(config.policies, MergeConfig::default().policies);
        assert_eq!(config.title_distance_threshold, 5);
        assert_eq!(config.restricted_source, "wos");
        assert!(config.use_cache);
        assert_eq!(config.dedupe_key, DedupeKey::CreatorYearTitle);
    }

    #[test]
    fn test_dedupe_key_from_json() {
        let config = MergeConfig::from_json_str(r#"{"dedupe_key": "creator_year"}"#).unwrap();
        assert_eq!(config.dedupe_key, DedupeKey::CreatorYear);
    }

    #[test]
    fn test_policy_alias() {
        let config = MergeConfig::from_json_str(r#"{"policies": ["add_missing_open"]}"#).unwrap();
        assert!(config.has_policy(MergePolicy::AddMissingFree));
    }

    #[rstest]
    #[case(None, None, Some(1850), true)]
    #[case(Some(1990), Some(2000), Some(1990), true)]
    #[case(Some(1990), Some(2000), Some(2000), true)]
    #[case(Some(1990), Some(2000), Some(1989), false)]
    #[case(Some(1990), Some(2000), Some(2001), false)]
    #[case(Some(1990), Some(2000), None, true)]
    fn test_year_in_range(
        #[case] start: Option<i32>,
        #[case] end: Option<i32>,
        #[case] year: Option<i32>,
        #[case] expected: bool,
    ) {
        let config = MergeConfig {
            ref_year_start: start,
            ref_year_end: end,
            ..Default::default()
        };
        assert_eq!(config.year_in_range(year), expected);
    }

    #[test]
    fn test_validate() {
        let registry = registry(&["anystyle", "crossref"]);
        let config = MergeConfig {
            datasources: vec!["anystyle".to_string(), "crossref".to_string()],
            ..Default::default()
        };
        assert!(config.validate(&registry).is_ok());

        let empty = MergeConfig {
            datasources: Vec::new(),
            ..config.clone()
        };
        assert!(matches!(empty.validate(&registry), Err(MergeError::ConfigError(_))));

        let unknown = MergeConfig {
            datasources: vec!["anystyle".to_string(), "scopus".to_string()],
            ..config.clone()
        };
        assert!(matches!(
            unknown.validate(&registry),
            Err(MergeError::UnknownProvider(id)) if id == "scopus"
        ));

        let repeated = MergeConfig {
            datasources: vec!["crossref".to_string(), "crossref".to_string()],
            ..config.clone()
        };
        assert!(repeated.validate(&registry).is_err());

        let inverted = MergeConfig {
            ref_year_start: Some(2001),
            ref_year_end: Some(2000),
            ..config
        };
        assert!(matches!(inverted.validate(&registry), Err(MergeError::ConfigError(_))));
    }
}
