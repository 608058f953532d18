//! Bibliographic record model.
//!
//! The types in this module mirror the CSL-JSON schema used at the boundary with
//! reference extractors and exporters. Field names follow CSL (`container-title`,
//! `DOI`, `issued`, ...); extensions introduced by this crate are prefixed with `x-`.
//! Every struct keeps the keys it does not interpret in an `extra` map, so a record
//! survives a deserialize/serialize round trip without losing data.
//!
//! # Example
//!
//! ```
//! use bibmerge::model::BibliographicItem;
//!
//! let json = r#"{
//!     "type": "article-journal",
//!     "title": "A Study",
//!     "author": [{"family": "Smith", "given": "John"}],
//!     "issued": {"date-parts": [[2000, 5]]},
//!     "DOI": "10.9/y",
//!     "publisher": "kept as is"
//! }"#;
//!
//! let item = BibliographicItem::from_json_str(json).unwrap();
//! assert_eq!(item.year(), Some(2000));
//! assert_eq!(item.match_key().unwrap().to_string(), "smith|2000");
//! ```

use crate::utils::{initials, normalize_title, parse_author_name, year_from_str};
use crate::{MergeError, Result};
use compact_str::{CompactString, ToCompactString};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Placeholder some extractors emit when no creator could be recognized.
pub const NO_AUTHOR: &str = "no_author";
/// Placeholder some extractors emit when no title could be recognized.
pub const NO_TITLE: &str = "no_title";

/// The kind of work a record describes.
///
/// Unknown CSL types are kept verbatim in [`ItemType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemType {
    ArticleJournal,
    Book,
    Chapter,
    Collection,
    Document,
    PaperConference,
    Report,
    Thesis,
    Webpage,
    Other(String),
}

impl ItemType {
    /// The CSL name of the type.
    pub fn as_str(&self) -> &str {
        match self {
            ItemType::ArticleJournal => "article-journal",
            ItemType::Book => "book",
            ItemType::Chapter => "chapter",
            ItemType::Collection => "collection",
            ItemType::Document => "document",
            ItemType::PaperConference => "paper-conference",
            ItemType::Report => "report",
            ItemType::Thesis => "thesis",
            ItemType::Webpage => "webpage",
            ItemType::Other(name) => name,
        }
    }
}

impl From<&str> for ItemType {
    fn from(value: &str) -> Self {
        match value {
            "article-journal" | "journal-article" => ItemType::ArticleJournal,
            "book" | "monograph" => ItemType::Book,
            "chapter" | "book-chapter" => ItemType::Chapter,
            "collection" | "edited-book" => ItemType::Collection,
            "document" => ItemType::Document,
            "paper-conference" | "proceedings-article" => ItemType::PaperConference,
            "report" => ItemType::Report,
            "thesis" | "dissertation" => ItemType::Thesis,
            "webpage" => ItemType::Webpage,
            other => ItemType::Other(other.to_string()),
        }
    }
}

impl From<String> for ItemType {
    fn from(value: String) -> Self {
        ItemType::from(value.as_str())
    }
}

impl From<ItemType> for String {
    fn from(value: ItemType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A publication date.
///
/// Sources deliver dates either as structured `date-parts` or as free text. Only the
/// first date of a `date-parts` range is kept; its first element (the year) is
/// authoritative.
#[derive(Debug, Clone, PartialEq)]
pub enum DateValue {
    /// Unparsed date text such as "Spring 1998".
    Raw(String),
    /// `[year, month, day]`, month and day optional.
    Parts(Vec<i32>),
}

impl DateValue {
    /// The canonical year of this date, if one can be determined.
    pub fn year(&self) -> Option<i32> {
        match self {
            DateValue::Parts(parts) => parts.first().copied(),
            DateValue::Raw(raw) => year_from_str(raw),
        }
    }

    fn from_text(text: &str) -> Self {
        let text = text.trim();
        let parts: Option<Vec<i32>> = text.split('-').map(|p| p.parse().ok()).collect();
        match parts {
            Some(parts) if !parts.is_empty() && parts.len() <= 3 && text.len() >= 4 => {
                DateValue::Parts(parts)
            }
            _ => DateValue::Raw(text.to_string()),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(|y| DateValue::Parts(vec![y as i32])),
            Value::String(s) => Some(DateValue::from_text(s)),
            Value::Object(obj) => {
                if let Some(Value::Array(ranges)) = obj.get("date-parts") {
                    let first = ranges.first()?;
                    let parts = match first {
                        Value::Array(parts) => parts
                            .iter()
                            .map(|p| match p {
                                Value::Number(n) => n.as_i64().map(|n| n as i32),
                                Value::String(s) => s.trim().parse().ok(),
                                _ => None,
                            })
                            .collect::<Option<Vec<i32>>>()?,
                        Value::String(s) => match DateValue::from_text(s) {
                            DateValue::Parts(parts) => parts,
                            raw => return Some(raw),
                        },
                        Value::Number(n) => vec![n.as_i64()? as i32],
                        _ => return None,
                    };
                    if parts.is_empty() {
                        return None;
                    }
                    return Some(DateValue::Parts(parts));
                }
                obj.get("raw")
                    .or_else(|| obj.get("literal"))
                    .and_then(Value::as_str)
                    .map(|s| DateValue::Raw(s.to_string()))
            }
            _ => None,
        }
    }
}

impl Serialize for DateValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            DateValue::Raw(raw) => map.serialize_entry("raw", raw)?,
            DateValue::Parts(parts) => map.serialize_entry("date-parts", &[parts])?,
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DateValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        DateValue::from_value(&value)
            .ok_or_else(|| D::Error::custom(format!("invalid date value: {value}")))
    }
}

/// An institutional affiliation of a creator.
///
/// Field names are a mix of what OpenAlex and GROBID deliver; `literal` holds the
/// unsegmented affiliation text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Affiliation {
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    /// Id of the provider this affiliation came from
    #[serde(
        default,
        rename = "x-affiliation-source",
        alias = "source",
        skip_serializing_if = "Option::is_none"
    )]
    pub source: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Affiliation {
    /// Creates an affiliation from free text.
    pub fn from_literal(literal: &str) -> Self {
        Self {
            literal: Some(literal.to_string()),
            ..Default::default()
        }
    }

    fn descriptive_fields(&self) -> [&Option<String>; 7] {
        [
            &self.literal,
            &self.institution,
            &self.department,
            &self.center,
            &self.address,
            &self.country,
            &self.country_code,
        ]
    }

    /// Number of descriptive fields holding a non-empty value. The source tag is not counted.
    pub fn populated_field_count(&self) -> usize {
        self.descriptive_fields()
            .iter()
            .filter(|f| f.as_deref().is_some_and(|v| !v.trim().is_empty()))
            .count()
    }

    /// Two affiliations describe the same institution if all descriptive fields agree.
    pub fn describes_same(&self, other: &Affiliation) -> bool {
        self.descriptive_fields() == other.descriptive_fields()
    }

    /// Every non-empty text this affiliation carries, for matching against ignore lists.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.descriptive_fields()
            .into_iter()
            .filter_map(|f| f.as_deref())
            .filter(|v| !v.is_empty())
    }
}

impl fmt::Display for Affiliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.literal {
            Some(literal) => f.write_str(literal),
            None => {
                let parts: Vec<&str> = [&self.center, &self.department, &self.institution]
                    .into_iter()
                    .filter_map(|p| p.as_deref())
                    .collect();
                f.write_str(&parts.join(", "))
            }
        }
    }
}

/// An author or editor.
///
/// Either `family`/`given` or `literal` is authoritative; when only `literal` is
/// present the name is parsed on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,
    #[serde(
        default,
        rename = "x-orcid",
        alias = "ORCID",
        skip_serializing_if = "Option::is_none"
    )]
    pub orcid: Option<String>,
    /// Author order as delivered by the source ("first", "additional", or a number)
    #[serde(
        default,
        deserialize_with = "de_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub sequence: Option<String>,
    /// Unparsed affiliation text as delivered by the source
    #[serde(
        default,
        rename = "x-raw-affiliation-string",
        skip_serializing_if = "Option::is_none"
    )]
    pub raw_affiliation: Option<String>,
    #[serde(
        default,
        rename = "x-affiliations",
        alias = "affiliation",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub affiliations: Vec<Affiliation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Creator {
    /// Creates a creator from structured family and given names.
    pub fn new(family: &str, given: &str) -> Self {
        Self {
            family: Some(family.to_string()),
            given: (!given.is_empty()).then(|| given.to_string()),
            ..Default::default()
        }
    }

    /// Creates a creator from an unparsed name.
    pub fn from_literal(literal: &str) -> Self {
        Self {
            literal: Some(literal.to_string()),
            ..Default::default()
        }
    }

    /// Returns `(family, given)`, parsing `literal` if no structured name exists.
    ///
    /// Returns `None` if the creator carries no usable name, including the
    /// [`NO_AUTHOR`] placeholder.
    pub fn family_and_given(&self) -> Option<(String, String)> {
        let (family, given) = match (&self.family, &self.given, &self.literal) {
            (Some(family), given, _) if !family.trim().is_empty() => {
                (family.trim().to_string(), given.clone().unwrap_or_default())
            }
            // only a given name: treat it as the family name
            (_, Some(given), None) if !given.trim().is_empty() => {
                (given.trim().to_string(), String::new())
            }
            (_, _, Some(literal)) => parse_author_name(literal),
            _ => return None,
        };
        if family.is_empty() || family.eq_ignore_ascii_case(NO_AUTHOR) {
            None
        } else {
            Some((family, given))
        }
    }

    /// The family name, or the family part of the literal name.
    pub fn family_name(&self) -> Option<String> {
        self.family_and_given().map(|(family, _)| family)
    }

    /// Initials of the given name.
    pub fn initials(&self) -> String {
        self.family_and_given()
            .map(|(_, given)| initials(&given))
            .unwrap_or_default()
    }

    /// Key used to look up affiliations across a corpus: lowercased family name and initials.
    pub fn affiliation_key(&self) -> Option<String> {
        let (family, given) = self.family_and_given()?;
        let initials = initials(&given);
        Some(format!("{} {}", family.to_lowercase(), initials).trim_end().to_string())
    }

    /// Whether a raw affiliation string or structured affiliations are present.
    pub fn has_affiliation_data(&self) -> bool {
        self.raw_affiliation
            .as_deref()
            .is_some_and(|raw| !raw.trim().is_empty())
            || !self.affiliations.is_empty()
    }
}

impl fmt::Display for Creator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family_and_given() {
            Some((family, given)) if given.is_empty() => f.write_str(&family),
            Some((family, given)) => write!(f, "{family}, {given}"),
            None => f.write_str(NO_AUTHOR),
        }
    }
}

/// Provenance and bookkeeping data attached to an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Custom {
    /// Name of the provider that produced this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_source: Option<String>,
    /// Highest citation count seen across sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times_cited: Option<u64>,
    /// Providers that corroborated this record. Entries are only ever added.
    #[serde(
        default,
        deserialize_with = "de_validated_by",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub validated_by: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generated_keywords: Vec<String>,
    /// The record as it was before a reconciled record replaced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_data: Option<Box<BibliographicItem>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Custom {
    fn is_empty(&self) -> bool {
        *self == Custom::default()
    }
}

/// One work: a citing work, or a reference cited by one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BibliographicItem {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub item_type: Option<ItemType>,
    #[serde(
        default,
        deserialize_with = "de_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub title: Option<String>,
    #[serde(
        default,
        rename = "container-title",
        alias = "journal-title",
        deserialize_with = "de_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub container_title: Option<String>,
    /// Abbreviated journal or container title
    #[serde(
        default,
        rename = "container-title-short",
        alias = "journalAbbreviation",
        deserialize_with = "de_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub container_title_short: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued: Option<DateValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub author: Vec<Creator>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub editor: Vec<Creator>,
    #[serde(
        default,
        rename = "DOI",
        deserialize_with = "de_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub doi: Option<String>,
    #[serde(
        default,
        rename = "ISBN",
        deserialize_with = "de_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub isbn: Option<String>,
    #[serde(
        default,
        rename = "ISSN",
        deserialize_with = "de_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub issn: Option<String>,
    #[serde(
        default,
        deserialize_with = "de_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub volume: Option<String>,
    #[serde(
        default,
        deserialize_with = "de_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub issue: Option<String>,
    #[serde(
        default,
        deserialize_with = "de_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub page: Option<String>,
    #[serde(
        default,
        rename = "abstract",
        deserialize_with = "de_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub abstract_text: Option<String>,
    #[serde(
        default,
        rename = "keyword",
        deserialize_with = "de_keywords",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(
        default,
        rename = "citation-key",
        alias = "key",
        skip_serializing_if = "Option::is_none"
    )]
    pub citation_key: Option<String>,
    /// References cited by this work
    #[serde(
        default,
        rename = "x-references",
        alias = "reference",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub x_references: Vec<BibliographicItem>,
    #[serde(default, skip_serializing_if = "Custom::is_empty")]
    pub custom: Custom,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BibliographicItem {
    /// Parses a single CSL-JSON object.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parses a CSL-JSON array of items.
    pub fn list_from_json_str(json: &str) -> Result<Vec<Self>> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the item to CSL-JSON.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self).map_err(MergeError::from)
    }

    /// The authors, or the editors for edited works without authors.
    pub fn creators(&self) -> &[Creator] {
        if self.author.is_empty() {
            &self.editor
        } else {
            &self.author
        }
    }

    /// Mutable access to the list returned by [`BibliographicItem::creators`].
    pub fn creators_mut(&mut self) -> &mut Vec<Creator> {
        if self.author.is_empty() {
            &mut self.editor
        } else {
            &mut self.author
        }
    }

    pub fn year(&self) -> Option<i32> {
        self.issued.as_ref().and_then(DateValue::year)
    }

    /// Family name of the first creator.
    pub fn primary_creator(&self) -> Option<String> {
        self.creators().first().and_then(Creator::family_name)
    }

    /// Usable title, ignoring blanks and the [`NO_TITLE`] placeholder.
    pub fn usable_title(&self) -> Option<&str> {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case(NO_TITLE))
    }

    /// Returns primary creator, year and title.
    pub fn creator_year_title(&self) -> (Option<String>, Option<i32>, Option<&str>) {
        (self.primary_creator(), self.year(), self.usable_title())
    }

    /// Creator/year key used to align references from different sources.
    pub fn match_key(&self) -> Option<MatchKey> {
        MatchKey::creator_year(self)
    }

    /// A stable id: the DOI, the ISBN, the citation key, or a creator/year/title slug.
    pub fn derived_id(&self) -> String {
        if let Some(id) = self
            .doi
            .as_ref()
            .or(self.isbn.as_ref())
            .or(self.citation_key.as_ref())
            .filter(|id| !id.is_empty())
        {
            return id.clone();
        }
        let (creator, year, title) = self.creator_year_title();
        let slug = [
            creator.map(|c| c.to_lowercase()),
            year.map(|y| y.to_string()),
            title.map(str::to_lowercase),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("_");
        slug.chars()
            .filter(|c| *c == '_' || c.is_alphanumeric())
            .take(31)
            .collect()
    }

    /// Assigns [`BibliographicItem::derived_id`] if the item has no id yet.
    pub fn ensure_id(&mut self) -> &str {
        if self.id.is_empty() {
            self.id = self.derived_id();
        }
        &self.id
    }

    /// Whether a persistent identifier (DOI or ISBN) is present.
    pub fn has_identifier(&self) -> bool {
        self.doi.as_deref().is_some_and(|d| !d.is_empty())
            || self.isbn.as_deref().is_some_and(|i| !i.is_empty())
    }

    /// Records that `provider_id` corroborated this item. Returns `true` if the provider is new.
    pub fn validate_by(&mut self, provider_id: &str) -> bool {
        self.custom
            .validated_by
            .insert(provider_id.to_string(), true)
            .is_none()
    }

    pub fn is_validated(&self) -> bool {
        !self.custom.validated_by.is_empty()
    }

    pub fn validator_count(&self) -> usize {
        self.custom.validated_by.len()
    }

    /// Number of populated descriptive fields, used to compare how complete two records are.
    pub fn populated_field_count(&self) -> usize {
        let texts = [
            &self.title,
            &self.container_title,
            &self.container_title_short,
            &self.doi,
            &self.isbn,
            &self.issn,
            &self.volume,
            &self.issue,
            &self.page,
            &self.abstract_text,
            &self.language,
        ]
        .iter()
        .filter(|f| f.as_deref().is_some_and(|v| !v.trim().is_empty()))
        .count();

        texts
            + usize::from(self.item_type.is_some())
            + usize::from(self.issued.is_some())
            + usize::from(!self.author.is_empty())
            + usize::from(!self.editor.is_empty())
            + usize::from(!self.keywords.is_empty())
    }

    /// Guesses the type of a work from its container and creator roles.
    pub fn guess_type(&self) -> ItemType {
        let has_container = self.container_title.is_some();
        match (self.author.is_empty(), self.editor.is_empty()) {
            (_, true) if has_container => ItemType::ArticleJournal,
            (false, false) if has_container => ItemType::Chapter,
            (_, false) => ItemType::Collection,
            _ => ItemType::Book,
        }
    }

    /// The declared type, or the guessed one.
    pub fn effective_type(&self) -> ItemType {
        self.item_type.clone().unwrap_or_else(|| self.guess_type())
    }
}

/// The comparison key deciding whether two records denote the same work.
///
/// The creator is the lowercased family name of the first creator and the year is
/// kept as a string. The title is only part of the key when built with
/// [`MatchKey::with_title`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchKey {
    pub creator: CompactString,
    pub year: Option<CompactString>,
    pub title: Option<CompactString>,
}

impl MatchKey {
    /// Creator and year. Returns `None` if the item has no usable creator name.
    pub fn creator_year(item: &BibliographicItem) -> Option<Self> {
        let creator = item.primary_creator()?.to_lowercase();
        Some(Self {
            creator: creator.to_compact_string(),
            year: item.year().map(|y| y.to_compact_string()),
            title: None,
        })
    }

    /// Creator, year and normalized title.
    pub fn with_title(item: &BibliographicItem) -> Option<Self> {
        let mut key = Self::creator_year(item)?;
        key.title = item
            .usable_title()
            .and_then(normalize_title)
            .map(CompactString::from);
        Some(key)
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.creator, self.year.as_deref().unwrap_or(""))?;
        if let Some(title) = &self.title {
            write!(f, "|{title}")?;
        }
        Ok(())
    }
}

/// Accepts a string, a number, or an array (first element) and yields trimmed non-empty text.
fn de_opt_text<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    fn text(value: Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Array(values) => values.into_iter().find_map(text),
            _ => None,
        }
    }
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .and_then(text)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

/// Accepts an array of keywords or a comma/semicolon separated string.
fn de_keywords<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    let raw: Vec<String> = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s.split([',', ';']).map(str::to_string).collect(),
        Some(Value::Array(values)) => values
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(other) => return Err(D::Error::custom(format!("invalid keywords: {other}"))),
        None => Vec::new(),
    };
    let mut keywords: Vec<String> = Vec::with_capacity(raw.len());
    for keyword in raw.iter().map(|k| k.trim()).filter(|k| !k.is_empty()) {
        if !keywords.iter().any(|k| k == keyword) {
            keywords.push(keyword.to_string());
        }
    }
    Ok(keywords)
}

/// Older records store the id of the validating record instead of `true`.
fn de_validated_by<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, bool>, D::Error> {
    let raw = Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter(|(_, v)| !matches!(v, Value::Null | Value::Bool(false)))
        .map(|(k, _)| (k, true))
        .collect())
}
