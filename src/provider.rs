//! Datasources of citing works, references and metadata.
//!
//! Every source implements [`Provider`]. Sources declare what they can deliver
//! through capability flags and are looked up by id in a [`ProviderRegistry`].
//!
//! Two decorators add behavior around any provider:
//!
//! - [`RetryingProvider`] retries transport failures with exponential backoff under
//!   a hard deadline and turns exhaustion into "no data".
//! - [`CachedProvider`] memoizes found records in a [`Cache`].
//!
//! [`StaticProvider`] serves records held in memory, for example vendor dumps
//! loaded from CSL-JSON files.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use bibmerge::provider::{ImportOptions, Provider, ProviderRegistry, RetryPolicy, RetryingProvider, StaticProvider};
//!
//! let crossref = StaticProvider::from_json_str("crossref", r#"[{"DOI": "10.1/X", "title": "A Study"}]"#)
//!     .unwrap()
//!     .with_metadata(false);
//! let policy = RetryPolicy { initial_delay: Duration::from_millis(10), ..Default::default() };
//!
//! let mut registry = ProviderRegistry::new();
//! registry.register(Arc::new(RetryingProvider::new(crossref, policy)));
//!
//! let provider = registry.get("crossref").unwrap();
//! let items = provider.import_items(&["10.1/x".to_string()], ImportOptions::default()).unwrap();
//! assert_eq!(items[0].as_ref().unwrap().title.as_deref(), Some("A Study"));
//! assert!(registry.metadata_providers(&[]).is_empty());
//! ```

use crate::cache::Cache;
use crate::model::{BibliographicItem, ItemType};
use crate::utils::{format_doi, simplify_text};
use crate::{MergeError, Result};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use strsim::levenshtein;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure of a single provider call.
///
/// These never abort a merge: the caller logs them and continues without the
/// provider's contribution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{provider} timed out after {elapsed:?}")]
    Timeout { provider: String, elapsed: Duration },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl ProviderError {
    /// Whether repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transport(_))
    }
}

/// What to include in imported records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    pub include_references: bool,
    pub include_abstract: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            include_references: true,
            include_abstract: true,
        }
    }
}

/// A source of bibliographic records.
pub trait Provider: Send + Sync {
    /// Unique source identifier, such as "crossref".
    fn id(&self) -> &str;

    /// Whether the source is usable, for example because credentials are present.
    fn enabled(&self) -> bool {
        true
    }

    fn provides_metadata(&self) -> bool {
        false
    }

    fn provides_citation_data(&self) -> bool {
        false
    }

    fn provides_affiliation_data(&self) -> bool {
        false
    }

    /// Item types the source has metadata for. Empty means all.
    fn metadata_types(&self) -> HashSet<ItemType> {
        HashSet::new()
    }

    /// ISO 639-1 codes of the languages the source covers. Empty means all.
    fn languages(&self) -> HashSet<String> {
        HashSet::new()
    }

    /// Fetches records by identifier.
    ///
    /// The result has one entry per requested id, in request order, `None` where
    /// the source has no record.
    fn import_items(
        &self,
        ids: &[String],
        options: ImportOptions,
    ) -> std::result::Result<Vec<Option<BibliographicItem>>, ProviderError>;

    /// Searches for the record best matching the partial data of `item`.
    fn lookup(
        &self,
        _item: &BibliographicItem,
    ) -> std::result::Result<Option<BibliographicItem>, ProviderError> {
        Err(ProviderError::Unsupported(format!(
            "{} does not support lookups",
            self.id()
        )))
    }

    fn supports_type(&self, item_type: &ItemType) -> bool {
        let types = self.metadata_types();
        types.is_empty() || types.contains(item_type)
    }

    /// An undetected language does not exclude a source.
    fn supports_language(&self, language: Option<&str>) -> bool {
        let languages = self.languages();
        languages.is_empty() || language.is_none_or(|lang| languages.contains(lang))
    }
}

/// Maps source ids to providers.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a provider under its id, returning the provider it replaces.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Option<Arc<dyn Provider>> {
        self.providers.insert(provider.id().to_string(), provider)
    }

    /// # Errors
    ///
    /// Returns [`MergeError::UnknownProvider`] if no provider has this id.
    pub fn get(&self, id: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| MergeError::UnknownProvider(id.to_string()))
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    fn select<F>(&self, priority: &[String], capable: F) -> Vec<Arc<dyn Provider>>
    where
        F: Fn(&dyn Provider) -> bool,
    {
        let ordered: Vec<&str> = if priority.is_empty() {
            self.ids()
        } else {
            priority.iter().map(String::as_str).collect()
        };
        ordered
            .into_iter()
            .filter_map(|id| self.providers.get(id))
            .filter(|p| p.enabled() && capable(p.as_ref()))
            .cloned()
            .collect()
    }

    /// Enabled providers of citing works with reference lists, in `priority` order.
    /// An empty priority list selects all of them ordered by id.
    pub fn citation_data_providers(&self, priority: &[String]) -> Vec<Arc<dyn Provider>> {
        self.select(priority, |p| p.provides_citation_data())
    }

    /// Enabled metadata providers, in `priority` order.
    pub fn metadata_providers(&self, priority: &[String]) -> Vec<Arc<dyn Provider>> {
        self.select(priority, |p| p.provides_metadata())
    }

    /// Enabled providers of author affiliations, in `priority` order.
    pub fn affiliation_data_providers(&self, priority: &[String]) -> Vec<Arc<dyn Provider>> {
        self.select(priority, |p| p.provides_affiliation_data())
    }
}

/// A provider serving records held in memory.
///
/// Records are found by DOI, id or derived id. [`Provider::lookup`] returns the
/// record whose first creator and title are closest to the query. All capabilities
/// are on by default.
#[derive(Debug)]
pub struct StaticProvider {
    id: String,
    items: Vec<BibliographicItem>,
    index: HashMap<String, usize>,
    enabled: bool,
    metadata: bool,
    citation_data: bool,
    affiliation_data: bool,
    types: HashSet<ItemType>,
    languages: HashSet<String>,
    failure: Option<ProviderError>,
    failures_left: AtomicUsize,
    import_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
}

impl StaticProvider {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            items: Vec::new(),
            index: HashMap::new(),
            enabled: true,
            metadata: true,
            citation_data: true,
            affiliation_data: true,
            types: HashSet::new(),
            languages: HashSet::new(),
            failure: None,
            failures_left: AtomicUsize::new(0),
            import_calls: AtomicUsize::new(0),
            lookup_calls: AtomicUsize::new(0),
        }
    }

    /// Creates a provider from a CSL-JSON array.
    pub fn from_json_str(id: &str, json: &str) -> Result<Self> {
        Ok(Self::new(id).with_items(BibliographicItem::list_from_json_str(json)?))
    }

    #[must_use]
    pub fn with_items(mut self, items: Vec<BibliographicItem>) -> Self {
        for item in items {
            self.insert(item);
        }
        self
    }

    fn insert(&mut self, item: BibliographicItem) {
        let idx = self.items.len();
        let keys = [
            item.doi.as_deref().and_then(format_doi),
            (!item.id.is_empty()).then(|| item.id.clone()),
            Some(item.derived_id()),
        ];
        for key in keys.into_iter().flatten() {
            self.index.entry(key).or_insert(idx);
        }
        self.items.push(item);
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, provides: bool) -> Self {
        self.metadata = provides;
        self
    }

    #[must_use]
    pub fn with_citation_data(mut self, provides: bool) -> Self {
        self.citation_data = provides;
        self
    }

    #[must_use]
    pub fn with_affiliation_data(mut self, provides: bool) -> Self {
        self.affiliation_data = provides;
        self
    }

    #[must_use]
    pub fn with_types<I: IntoIterator<Item = ItemType>>(mut self, types: I) -> Self {
        self.types = types.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_languages<I: IntoIterator<Item = &'static str>>(mut self, languages: I) -> Self {
        self.languages = languages.into_iter().map(String::from).collect();
        self
    }

    /// Makes every call fail with `error`.
    #[must_use]
    pub fn with_failure(self, error: ProviderError) -> Self {
        self.with_failures(usize::MAX, error)
    }

    /// Makes the next `count` calls fail with `error`.
    #[must_use]
    pub fn with_failures(mut self, count: usize, error: ProviderError) -> Self {
        self.failure = Some(error);
        self.failures_left = AtomicUsize::new(count);
        self
    }

    /// Number of `import_items` calls so far.
    pub fn import_calls(&self) -> usize {
        self.import_calls.load(Ordering::SeqCst)
    }

    /// Number of `lookup` calls so far.
    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.import_calls() + self.lookup_calls()
    }

    fn check_failure(&self) -> std::result::Result<(), ProviderError> {
        let Some(error) = &self.failure else {
            return Ok(());
        };
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing { Err(error.clone()) } else { Ok(()) }
    }

    fn find(&self, id: &str) -> Option<&BibliographicItem> {
        let key = format_doi(id).unwrap_or_else(|| id.to_string());
        self.index
            .get(&key)
            .or_else(|| self.index.get(id))
            .map(|&idx| &self.items[idx])
    }
}

impl Provider for StaticProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn provides_metadata(&self) -> bool {
        self.metadata
    }

    fn provides_citation_data(&self) -> bool {
        self.citation_data
    }

    fn provides_affiliation_data(&self) -> bool {
        self.affiliation_data
    }

    fn metadata_types(&self) -> HashSet<ItemType> {
        self.types.clone()
    }

    fn languages(&self) -> HashSet<String> {
        self.languages.clone()
    }

    fn import_items(
        &self,
        ids: &[String],
        options: ImportOptions,
    ) -> std::result::Result<Vec<Option<BibliographicItem>>, ProviderError> {
        self.import_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;

        Ok(ids
            .iter()
            .map(|id| {
                self.find(id).map(|item| {
                    let mut item = item.clone();
                    if !options.include_references {
                        item.x_references.clear();
                    }
                    if !options.include_abstract {
                        item.abstract_text = None;
                    }
                    item.custom
                        .metadata_source
                        .get_or_insert_with(|| self.id.clone());
                    item
                })
            })
            .collect())
    }

    fn lookup(
        &self,
        item: &BibliographicItem,
    ) -> std::result::Result<Option<BibliographicItem>, ProviderError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;

        let creator = item.primary_creator().map(|c| c.to_lowercase()).unwrap_or_default();
        let title = item.usable_title().map(simplify_text).unwrap_or_default();

        let best = self.items.iter().min_by_key(|candidate| {
            let candidate_creator = candidate
                .primary_creator()
                .map(|c| c.to_lowercase())
                .unwrap_or_default();
            let candidate_title = candidate.usable_title().map(simplify_text).unwrap_or_default();
            levenshtein(&creator, &candidate_creator) + levenshtein(&title, &candidate_title)
        });

        Ok(best.cloned().map(|mut found| {
            found
                .custom
                .metadata_source
                .get_or_insert_with(|| self.id.clone());
            found
        }))
    }
}

/// Backoff and deadline for [`RetryingProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before the first retry. Doubles with every further retry.
    pub initial_delay: Duration,
    pub max_retries: u32,
    /// Hard limit on the total time spent on one call, retries included
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_retries: 3,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Retries transport failures of the wrapped provider.
///
/// When retries or time run out the call yields no data instead of an error.
/// Other errors pass through unchanged.
pub struct RetryingProvider<P> {
    inner: Arc<P>,
    policy: RetryPolicy,
}

impl<P> RetryingProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(inner),
            policy,
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: Provider + 'static> RetryingProvider<P> {
    /// Runs `op` on a worker thread and waits until the deadline `start + policy.timeout`.
    ///
    /// Blocking provider calls cannot be cancelled. On timeout the worker is detached:
    /// it runs to completion in the background and its result is dropped.
    fn attempt<T, F>(&self, op: F, start: Instant) -> std::result::Result<T, ProviderError>
    where
        T: Send + 'static,
        F: FnOnce(&P) -> std::result::Result<T, ProviderError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            // the receiver is gone if the deadline passed
            let _ = tx.send(op(inner.as_ref()));
        });
        let remaining = self.policy.timeout.saturating_sub(start.elapsed());
        match rx.recv_timeout(remaining) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ProviderError::Timeout {
                provider: self.inner.id().to_string(),
                elapsed: start.elapsed(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ProviderError::Transport(format!(
                "{} call aborted",
                self.inner.id()
            ))),
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or retries are exhausted (`Ok(None)`).
    fn call<T, F>(&self, op: F) -> std::result::Result<Option<T>, ProviderError>
    where
        T: Send + 'static,
        F: Fn(&P) -> std::result::Result<T, ProviderError> + Clone + Send + 'static,
    {
        let provider = self.inner.id();
        let start = Instant::now();
        let mut delay = self.policy.initial_delay;
        let mut retries = 0;

        loop {
            match self.attempt(op.clone(), start) {
                Ok(value) => return Ok(Some(value)),
                Err(e @ ProviderError::Timeout { .. }) => {
                    warn!(provider, error = %e, "giving up");
                    return Ok(None);
                }
                Err(e) if e.is_retryable() => {
                    if retries >= self.policy.max_retries
                        || start.elapsed() + delay >= self.policy.timeout
                    {
                        warn!(provider, retries, error = %e, "retries exhausted");
                        return Ok(None);
                    }
                    debug!(provider, ?delay, error = %e, "retrying");
                    thread::sleep(delay);
                    delay *= 2;
                    retries += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<P: Provider + 'static> Provider for RetryingProvider<P> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn enabled(&self) -> bool {
        self.inner.enabled()
    }

    fn provides_metadata(&self) -> bool {
        self.inner.provides_metadata()
    }

    fn provides_citation_data(&self) -> bool {
        self.inner.provides_citation_data()
    }

    fn provides_affiliation_data(&self) -> bool {
        self.inner.provides_affiliation_data()
    }

    fn metadata_types(&self) -> HashSet<ItemType> {
        self.inner.metadata_types()
    }

    fn languages(&self) -> HashSet<String> {
        self.inner.languages()
    }

    fn import_items(
        &self,
        ids: &[String],
        options: ImportOptions,
    ) -> std::result::Result<Vec<Option<BibliographicItem>>, ProviderError> {
        let request = ids.to_vec();
        let found = self.call(move |p| p.import_items(&request, options))?;
        Ok(found.unwrap_or_else(|| vec![None; ids.len()]))
    }

    fn lookup(
        &self,
        item: &BibliographicItem,
    ) -> std::result::Result<Option<BibliographicItem>, ProviderError> {
        let query = item.clone();
        Ok(self.call(move |p| p.lookup(&query))?.flatten())
    }
}

/// Memoizes found records of the wrapped provider.
///
/// Cache failures are logged and treated as misses.
pub struct CachedProvider<P> {
    inner: P,
    cache: Arc<dyn Cache>,
}

impl<P: Provider> CachedProvider<P> {
    pub fn new(inner: P, cache: Arc<dyn Cache>) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn load(&self, request: &str) -> Option<BibliographicItem> {
        match self.cache.load(request) {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(provider = self.inner.id(), request, error = %e, "ignoring unreadable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(provider = self.inner.id(), request, error = %e, "cache read failed");
                None
            }
        }
    }

    fn save(&self, request: &str, item: &BibliographicItem) {
        let result = serde_json::to_value(item)
            .map_err(MergeError::from)
            .and_then(|value| self.cache.save(request, &value));
        if let Err(e) = result {
            warn!(provider = self.inner.id(), request, error = %e, "cache write failed");
        }
    }

    fn import_request(&self, id: &str, options: ImportOptions) -> String {
        format!(
            "{}:import:{}:{}:{}",
            self.inner.id(),
            id,
            u8::from(options.include_references),
            u8::from(options.include_abstract)
        )
    }

    fn lookup_request(&self, item: &BibliographicItem) -> String {
        let (creator, year, title) = item.creator_year_title();
        format!(
            "{}:lookup:{}:{}:{}",
            self.inner.id(),
            creator.unwrap_or_default().to_lowercase(),
            year.map(|y| y.to_string()).unwrap_or_default(),
            title.map(simplify_text).unwrap_or_default()
        )
    }
}

impl<P: Provider> Provider for CachedProvider<P> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn enabled(&self) -> bool {
        self.inner.enabled()
    }

    fn provides_metadata(&self) -> bool {
        self.inner.provides_metadata()
    }

    fn provides_citation_data(&self) -> bool {
        self.inner.provides_citation_data()
    }

    fn provides_affiliation_data(&self) -> bool {
        self.inner.provides_affiliation_data()
    }

    fn metadata_types(&self) -> HashSet<ItemType> {
        self.inner.metadata_types()
    }

    fn languages(&self) -> HashSet<String> {
        self.inner.languages()
    }

    fn import_items(
        &self,
        ids: &[String],
        options: ImportOptions,
    ) -> std::result::Result<Vec<Option<BibliographicItem>>, ProviderError> {
        let mut results: Vec<Option<BibliographicItem>> = ids
            .iter()
            .map(|id| self.load(&self.import_request(id, options)))
            .collect();

        let missing: Vec<usize> = (0..ids.len()).filter(|&i| results[i].is_none()).collect();
        if missing.is_empty() {
            return Ok(results);
        }

        let request: Vec<String> = missing.iter().map(|&i| ids[i].clone()).collect();
        let fetched = self.inner.import_items(&request, options)?;
        for (idx, item) in missing.into_iter().zip(fetched) {
            if let Some(item) = &item {
                self.save(&self.import_request(&ids[idx], options), item);
            }
            results[idx] = item;
        }
        Ok(results)
    }

    fn lookup(
        &self,
        item: &BibliographicItem,
    ) -> std::result::Result<Option<BibliographicItem>, ProviderError> {
        let request = self.lookup_request(item);
        if let Some(found) = self.load(&request) {
            return Ok(Some(found));
        }
        let found = self.inner.lookup(item)?;
        if let Some(found) = &found {
            self.save(&request, found);
        }
        Ok(found)
    }
}
