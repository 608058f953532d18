//! Corpus of merged citing works.
//!
//! A [`Dataset`] collects the merged records of many citing works. After all works
//! are merged, [`Dataset::backfill`] makes a second pass over the whole corpus:
//! references without an identifier receive the DOI or ISBN of a record with the
//! same creator, year and title found elsewhere in the corpus, and creators without
//! affiliation receive the first affiliation seen for the same family name and
//! initials. Existing data is never overwritten.
//!
//! # Example
//!
//! ```
//! use bibmerge::Dataset;
//!
//! let mut dataset = Dataset::from_json(r#"[
//!     {"DOI": "10.1/a", "author": [{"family": "Smith", "given": "John"}],
//!      "issued": "2000", "title": "A Study",
//!      "x-references": [{"author": [{"family": "Jones"}], "issued": "1999", "title": "Other"}]},
//!     {"DOI": "10.1/b",
//!      "x-references": [{"author": [{"family": "Smith"}], "issued": "2000", "title": "A study"}]}
//! ]"#).unwrap();
//!
//! let report = dataset.backfill();
//! assert_eq!(report.identifiers, 1);
//! assert_eq!(dataset.get("10.1/b").unwrap().x_references[0].doi.as_deref(), Some("10.1/a"));
//! ```

use crate::merge::{MergeCoordinator, MergeStats};
use crate::model::{Affiliation, BibliographicItem, Creator};
use crate::utils::normalize_title;
use crate::{MergeError, Result};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Outcome of [`Dataset::import`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub imported: usize,
    /// Works served from the merge cache
    pub cached: usize,
    /// Works merged without any creator
    pub skipped: usize,
    /// Ids that could not be merged, with the reason
    pub failed: Vec<(String, String)>,
    /// Counters summed over all merged works
    pub stats: MergeStats,
}

/// Outcome of [`Dataset::backfill`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// References that received an identifier
    pub identifiers: usize,
    /// Creators that received an affiliation
    pub affiliations: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Identifier {
    Doi(String),
    Isbn(String),
}

impl Identifier {
    fn of(record: &BibliographicItem) -> Option<Self> {
        let non_empty = |s: &Option<String>| s.clone().filter(|s| !s.is_empty());
        non_empty(&record.doi)
            .map(Identifier::Doi)
            .or_else(|| non_empty(&record.isbn).map(Identifier::Isbn))
    }

    fn assign_to(&self, record: &mut BibliographicItem) {
        match self {
            Identifier::Doi(doi) => record.doi = Some(doi.clone()),
            Identifier::Isbn(isbn) => record.isbn = Some(isbn.clone()),
        }
    }
}

#[derive(Debug)]
struct YearEntry {
    first: Identifier,
    titles: HashMap<String, Identifier>,
}

/// Identity and affiliation indexes over a corpus. Earlier records win.
#[derive(Debug, Default)]
struct CorpusIndex {
    identities: HashMap<String, HashMap<String, YearEntry>>,
    affiliations: HashMap<String, Affiliation>,
}

fn identity_parts(record: &BibliographicItem) -> Option<(String, String, Option<String>)> {
    let (creator, year, title) = record.creator_year_title();
    Some((
        creator?.to_lowercase(),
        year.map(|y| y.to_string()).unwrap_or_default(),
        title.and_then(normalize_title),
    ))
}

impl CorpusIndex {
    fn build(items: &[BibliographicItem]) -> Self {
        let mut index = CorpusIndex::default();
        for item in items {
            for record in std::iter::once(item).chain(&item.x_references) {
                index.add_identity(record);
                for creator in record.author.iter().chain(&record.editor) {
                    index.add_affiliation(creator);
                }
            }
        }
        index
    }

    fn add_identity(&mut self, record: &BibliographicItem) {
        let (Some(identifier), Some((family, year, title))) =
            (Identifier::of(record), identity_parts(record))
        else {
            return;
        };
        let entry = self
            .identities
            .entry(family)
            .or_default()
            .entry(year)
            .or_insert_with(|| YearEntry {
                first: identifier.clone(),
                titles: HashMap::new(),
            });
        if let Some(title) = title {
            entry.titles.entry(title).or_insert(identifier);
        }
    }

    fn add_affiliation(&mut self, creator: &Creator) {
        let Some(key) = creator.affiliation_key() else {
            return;
        };
        let affiliation = creator.affiliations.first().cloned().or_else(|| {
            creator
                .raw_affiliation
                .as_deref()
                .filter(|raw| !raw.trim().is_empty())
                .map(Affiliation::from_literal)
        });
        if let Some(affiliation) = affiliation {
            self.affiliations.entry(key).or_insert(affiliation);
        }
    }

    /// Identifier for the record's creator, year and title, or any identifier under
    /// the same creator and year.
    fn identifier_for(&self, record: &BibliographicItem) -> Option<&Identifier> {
        let (family, year, title) = identity_parts(record)?;
        let entry = self.identities.get(&family)?.get(&year)?;
        title
            .and_then(|title| entry.titles.get(&title))
            .or(Some(&entry.first))
    }
}

/// An ordered collection of merged citing works with unique ids.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    items: Vec<BibliographicItem>,
    ids: HashMap<String, usize>,
}

impl Dataset {
    /// Creates a dataset. Items without an id receive their derived id.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::DuplicateItem`] if two items share an id.
    pub fn new(items: Vec<BibliographicItem>) -> Result<Self> {
        let mut dataset = Self::default();
        for item in items {
            dataset.add(item)?;
        }
        Ok(dataset)
    }

    /// Appends an item.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::DuplicateItem`] if an item with the same id exists.
    pub fn add(&mut self, mut item: BibliographicItem) -> Result<()> {
        let id = item.ensure_id().to_string();
        if self.ids.contains_key(&id) {
            return Err(MergeError::DuplicateItem(id));
        }
        self.ids.insert(id, self.items.len());
        self.items.push(item);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&BibliographicItem> {
        self.ids.get(id).map(|&idx| &self.items[idx])
    }

    pub fn items(&self) -> &[BibliographicItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<BibliographicItem> {
        self.items
    }

    /// Reads a dataset from a CSL-JSON array.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::new(BibliographicItem::list_from_json_str(json)?)
    }

    /// Writes the dataset as a CSL-JSON array.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.items)?)
    }

    /// Merges the works `ids` with `coordinator` and adds the results.
    ///
    /// At most `limit` ids are processed. Works run in parallel if the coordinator's
    /// configuration asks for it. Failing works are reported, not returned as errors,
    /// and works without any creator are left out.
    pub fn import(
        &mut self,
        ids: &[String],
        coordinator: &MergeCoordinator,
        limit: Option<usize>,
    ) -> ImportReport {
        let ids = &ids[..limit.unwrap_or(ids.len()).min(ids.len())];

        #[cfg(feature = "parallel")]
        let results: Vec<_> = if coordinator.config().run_in_parallel {
            ids.par_iter().map(|id| (id, coordinator.merge(id))).collect()
        } else {
            ids.iter().map(|id| (id, coordinator.merge(id))).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let results: Vec<_> = ids.iter().map(|id| (id, coordinator.merge(id))).collect();

        let mut report = ImportReport::default();
        for (id, result) in results {
            match result {
                Ok((item, stats)) => {
                    if item.creators().is_empty() {
                        debug!(id = %id, "ignoring item without creators");
                        report.skipped += 1;
                        continue;
                    }
                    if let Err(e) = self.add(item) {
                        warn!(id = %id, error = %e, "not importing item");
                        report.failed.push((id.clone(), e.to_string()));
                        continue;
                    }
                    report.imported += 1;
                    report.cached += usize::from(stats.from_cache);
                    report.stats.accumulate(&stats);
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "merge failed");
                    report.failed.push((id.clone(), e.to_string()));
                }
            }
        }

        info!(
            imported = report.imported,
            cached = report.cached,
            skipped = report.skipped,
            failed = report.failed.len(),
            validated = report.stats.validated,
            deduplicated = report.stats.deduplicated,
            reconciled = report.stats.reconciled,
            "import finished"
        );
        report
    }

    /// Fills missing reference identifiers and creator affiliations from the rest of the corpus.
    pub fn backfill(&mut self) -> BackfillReport {
        let index = CorpusIndex::build(&self.items);
        let mut report = BackfillReport::default();

        for item in &mut self.items {
            for reference in &mut item.x_references {
                if reference.has_identifier() {
                    continue;
                }
                if let Some(identifier) = index.identifier_for(reference) {
                    identifier.assign_to(reference);
                    report.identifiers += 1;
                }
            }

            let references = item.x_references.iter_mut();
            let records = std::iter::once(&mut item.author)
                .chain(std::iter::once(&mut item.editor))
                .chain(references.flat_map(|r| [&mut r.author, &mut r.editor]));
            for creators in records {
                for creator in creators.iter_mut() {
                    if creator.has_affiliation_data() {
                        continue;
                    }
                    let found = creator
                        .affiliation_key()
                        .and_then(|key| index.affiliations.get(&key));
                    if let Some(affiliation) = found {
                        creator.affiliations.push(affiliation.clone());
                        report.affiliations += 1;
                    }
                }
            }
        }

        info!(
            identifiers = report.identifiers,
            affiliations = report.affiliations,
            "backfill finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MergeConfig, MergePolicy};
    use crate::model::DateValue;
    use crate::provider::{ProviderRegistry, StaticProvider};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn record(family: &str, given: &str, year: i32, title: &str, doi: Option<&str>) -> BibliographicItem {
        BibliographicItem {
            title: Some(title.to_string()),
            author: vec![Creator::new(family, given)],
            issued: Some(DateValue::Parts(vec![year])),
            doi: doi.map(str::to_string),
            ..Default::default()
        }
    }

    fn with_references(mut item: BibliographicItem, references: Vec<BibliographicItem>) -> BibliographicItem {
        item.x_references = references;
        item
    }

    #[test]
    fn test_add_rejects_duplicate_ids() {
        let mut dataset = Dataset::default();
        dataset.add(record("Smith", "J", 2000, "A", Some("10.1/a"))).unwrap();
        assert!(matches!(
            dataset.add(record("Jones", "A", 2001, "B", Some("10.1/a"))),
            Err(MergeError::DuplicateItem(id)) if id == "10.1/a"
        ));
        assert_eq!(dataset.len(), 1);
        assert!(dataset.get("10.1/a").is_some());
    }

    #[test]
    fn test_json_round_trip() {
        let dataset = Dataset::new(vec![
            record("Smith", "J", 2000, "A", Some("10.1/a")),
            record("Jones", "A", 2001, "B", None),
        ])
        .unwrap();
        let restored = Dataset::from_json(&dataset.to_json().unwrap()).unwrap();
        assert_eq!(restored.items(), dataset.items());
        assert!(restored.get("jones_2001_b").is_some());
    }

    #[test]
    fn test_backfill_identifiers() {
        let mut dataset = Dataset::new(vec![
            with_references(
                record("Smith", "J", 2000, "A Study", Some("10.1/a")),
                vec![record("Jones", "", 1999, "Other Work", None)],
            ),
            with_references(
                record("Miller", "K", 2005, "Later", Some("10.1/b")),
                vec![
                    record("Jones", "", 1999, "Other Work", Some("10.1/jones")),
                    record("Smith", "", 2000, "A study.", None),
                    record("Smith", "", 2000, "Untitled draft", None),
                    record("Smith", "", 2000, "Has one", Some("10.1/kept")),
                    record("Nobody", "", 2000, "A Study", None),
                ],
            ),
        ])
        .unwrap();

        let report = dataset.backfill();
        let first = dataset.get("10.1/a").unwrap();
        let second = dataset.get("10.1/b").unwrap();
        assert_eq!(first.x_references[0].doi.as_deref(), Some("10.1/jones"));
        assert_eq!(second.x_references[1].doi.as_deref(), Some("10.1/a"));
        // same creator and year, unknown title: first record seen under that key
        assert_eq!(second.x_references[2].doi.as_deref(), Some("10.1/a"));
        assert_eq!(second.x_references[3].doi.as_deref(), Some("10.1/kept"));
        assert_eq!(second.x_references[4].doi, None);
        assert_eq!(report.identifiers, 3);
    }

    #[test]
    fn test_backfill_affiliations() {
        let mut affiliated = Creator::new("Smith", "John");
        affiliated.affiliations = vec![Affiliation::from_literal("University of Cambridge")];
        let mut later = Creator::new("Smith", "J.");
        later.affiliations = vec![Affiliation::from_literal("University of Oxford")];

        let mut dataset = Dataset::new(vec![
            BibliographicItem {
                doi: Some("10.1/a".to_string()),
                author: vec![affiliated, Creator::new("Jones", "A")],
                ..Default::default()
            },
            BibliographicItem {
                doi: Some("10.1/b".to_string()),
                author: vec![later],
                x_references: vec![record("Smith", "J", 1990, "Old", None)],
                ..Default::default()
            },
        ])
        .unwrap();

        let report = dataset.backfill();
        let second = dataset.get("10.1/b").unwrap();
        assert_eq!(
            second.author[0].affiliations[0].literal.as_deref(),
            Some("University of Oxford")
        );
        assert_eq!(
            second.x_references[0].author[0].affiliations[0].literal.as_deref(),
            Some("University of Cambridge")
        );
        assert!(dataset.get("10.1/a").unwrap().author[1].affiliations.is_empty());
        assert_eq!(report.affiliations, 1);
    }

    fn coordinator(parallel: bool) -> (MergeCoordinator, Arc<StaticProvider>) {
        let works = vec![
            with_references(
                record("Smith", "J", 2000, "A Study", Some("10.1/a")),
                vec![record("Jones", "", 1999, "Other", None)],
            ),
            BibliographicItem {
                doi: Some("10.1/no-authors".to_string()),
                ..Default::default()
            },
            with_references(record("Miller", "K", 2005, "Later", Some("10.1/b")), Vec::new()),
        ];
        let provider = Arc::new(StaticProvider::new("anystyle").with_items(works));
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::clone(&provider) as Arc<dyn crate::Provider>);
        let config = MergeConfig {
            datasources: vec!["anystyle".to_string()],
            run_in_parallel: parallel,
            reconcile_references: false,
            ..Default::default()
        }
        .with_policies([MergePolicy::AddUnvalidated]);
        (
            MergeCoordinator::new(Arc::new(registry), config).unwrap(),
            provider,
        )
    }

    #[test]
    fn test_import() {
        for parallel in [false, true] {
            let (coordinator, provider) = coordinator(parallel);
            let ids: Vec<String> = ["10.1/a", "10.1/missing", "10.1/no-authors", "10.1/b", "10.1/c"]
                .into_iter()
                .map(String::from)
                .collect();

            let mut dataset = Dataset::default();
            let report = dataset.import(&ids, &coordinator, Some(4));

            assert_eq!(report.imported, 2);
            assert_eq!(report.skipped, 1);
            assert_eq!(report.failed.len(), 1);
            assert_eq!(report.failed[0].0, "10.1/missing");
            assert_eq!(report.stats.unvalidated_added, 1);
            assert_eq!(provider.import_calls(), 4);
            let ids: Vec<&str> = dataset.items().iter().map(|i| i.id.as_str()).collect();
            assert_eq!(ids, vec!["10.1/a", "10.1/b"]);
        }
    }

    #[test]
    fn test_import_reports_duplicates() {
        let (coordinator, _) = coordinator(false);
        let ids = vec!["10.1/a".to_string(), "https://doi.org/10.1/a".to_string()];
        let mut dataset = Dataset::default();
        let report = dataset.import(&ids, &coordinator, None);
        assert_eq!(report.imported, 1);
        assert_eq!(report.failed.len(), 1);
    }
}
