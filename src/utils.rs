use crate::regex::{Captures, Regex};
use std::sync::LazyLock;

static DOI_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://(?:dx\.)?doi\.org/(.+)$").unwrap());

static YEAR_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4}").unwrap());

static UNICODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<U\+([0-9A-Fa-f]+)>").unwrap());

const HTML_REPLACEMENTS: [(&str, &str); 10] = [
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&amp;", "&"),
    ("<sup>", ""),
    ("</sup>", ""),
    ("<sub>", ""),
    ("</sub>", ""),
    ("<i>", ""),
    ("</i>", ""),
    ("&quot;", "\""),
];

/// Stopwords used to guess the language of a title, as ISO 639-1 code and word list.
const LANGUAGE_STOPWORDS: [(&str, &[&str]); 6] = [
    (
        "en",
        &[
            "the", "of", "and", "in", "on", "for", "to", "a", "an", "with", "from", "is", "are",
            "towards", "between", "its",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "und", "im", "zur", "zum", "von", "mit", "ein", "eine", "des",
            "den", "über", "für", "ist", "dem",
        ],
    ),
    (
        "fr",
        &[
            "le", "la", "les", "et", "des", "du", "un", "une", "pour", "dans", "sur", "au", "aux",
            "est",
        ],
    ),
    (
        "es",
        &[
            "el", "los", "las", "y", "del", "en", "una", "por", "para", "con", "sobre", "como",
        ],
    ),
    (
        "it",
        &[
            "il", "lo", "gli", "della", "delle", "dei", "e", "di", "per", "nel", "nella", "una",
            "sul",
        ],
    ),
    (
        "nl",
        &[
            "de", "het", "een", "en", "van", "voor", "met", "op", "naar", "over", "bij",
        ],
    ),
];

/// Formats a DOI string by removing URL prefixes and [doi] suffixes
///
/// # Arguments
///
/// * `doi_str` - The DOI string to format
pub fn format_doi(doi_str: &str) -> Option<String> {
    if doi_str.is_empty() {
        return None;
    }
    let doi = doi_str
        .trim()
        .trim_end_matches("[doi]")
        .trim()
        .replace(|c: char| c.is_whitespace(), "")
        .to_lowercase();

    // Find the first occurrence of "10." which typically starts a DOI
    let pos = doi.find("10.")?;
    let doi = &doi[pos..];
    match DOI_URL_REGEX.captures(doi) {
        Some(captures) => Some(captures[1].to_string()),
        None => Some(doi.to_string()),
    }
}

/// Converts a work id in file name form ("10.1234_abc") into DOI form ("10.1234/abc").
///
/// Ids that already contain a slash are returned unchanged.
pub fn work_id_to_doi(id: &str) -> String {
    if id.contains('/') {
        id.to_string()
    } else {
        id.replacen('_', "/", 1)
    }
}

/// Parses an unsegmented personal name into `(family, given)`.
///
/// Handles "Lastname, Firstname", the all-caps "LASTNAME FN" form used by some
/// citation indexes, "Lastname FN" with trailing initials, and the plain
/// "Firstname Lastname" order.
pub fn parse_author_name(name: &str) -> (String, String) {
    let name = name.trim();
    if name.is_empty() {
        return (String::new(), String::new());
    }

    if let Some((family, given)) = name.split_once(',') {
        return (family.trim().to_string(), given.trim().to_string());
    }

    let parts: Vec<&str> = name.split_whitespace().collect();
    match parts.len() {
        0 => (String::new(), String::new()),
        1 => (capitalize_if_uppercase(parts[0]), String::new()),
        _ => {
            let last = parts[parts.len() - 1];
            let trailing_initials = last.chars().filter(|c| c.is_alphabetic()).count() <= 3
                && last.chars().all(|c| c.is_uppercase() || c == '.');
            if trailing_initials {
                let family = parts[..parts.len() - 1].join(" ");
                (capitalize_if_uppercase(&family), last.to_string())
            } else {
                (last.to_string(), parts[..parts.len() - 1].join(" "))
            }
        }
    }
}

fn capitalize_if_uppercase(word: &str) -> String {
    if word.chars().any(|c| c.is_lowercase()) {
        return word.to_string();
    }
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_string() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// Returns the initials of a given name ("Jean-Paul Anton" -> "JPA").
pub fn initials(given: &str) -> String {
    given
        .split(|c: char| !c.is_alphabetic())
        .filter_map(|part| part.chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Extracts the first four-digit group of a free-form date string.
pub fn year_from_str(raw: &str) -> Option<i32> {
    YEAR_REGEX.find(raw).and_then(|m| m.as_str().parse().ok())
}

fn convert_unicode_string(input: &str) -> String {
    UNICODE_REGEX
        .replace_all(input, |caps: &Captures| {
            u32::from_str_radix(&caps[1], 16)
                .ok()
                .and_then(char::from_u32)
                .map(|c| c.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}

/// Lowercases a title, strips markup and keeps only alphanumeric characters.
///
/// Returns `None` for titles that are empty after normalization.
pub fn normalize_title(title: &str) -> Option<String> {
    let mut s = convert_unicode_string(title.trim()).to_lowercase();
    for (from, to) in HTML_REPLACEMENTS.iter() {
        s = s.replace(from, to);
    }
    let normalized: String = s.chars().filter(|c| c.is_alphanumeric()).collect();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Lowercases and collapses whitespace, keeping punctuation. Used for edit distance comparisons.
pub fn simplify_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Guesses the language of a short text from stopword frequencies.
///
/// Returns an ISO 639-1 code, or `None` if no language scores at least one hit.
pub fn guess_language(text: &str) -> Option<&'static str> {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();

    LANGUAGE_STOPWORDS
        .iter()
        .map(|(lang, stopwords)| {
            let hits = words
                .iter()
                .filter(|w| stopwords.contains(&w.as_str()))
                .count();
            (*lang, hits)
        })
        .filter(|(_, hits)| *hits > 0)
        // first language wins ties
        .fold(None, |best: Option<(&str, usize)>, (lang, hits)| match best {
            Some((_, best_hits)) if best_hits >= hits => best,
            _ => Some((lang, hits)),
        })
        .map(|(lang, _)| lang)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[test]
    fn test_format_doi() {
        let test_cases = vec![
            ("10.1000/test", Some("10.1000/test".to_string())),
            ("10.1000/test [doi]", Some("10.1000/test".to_string())),
            ("https://doi.org/10.1000/test", Some("10.1000/test".to_string())),
            ("http://dx.doi.org/10.1000/test", Some("10.1000/test".to_string())),
            ("doi:10.1000/test", Some("10.1000/test".to_string())),
            ("DOI: 10.1000/TEST", Some("10.1000/test".to_string())),
            ("", None),
            ("invalid", None),
        ];

        for (input, expected) in test_cases {
            assert_eq!(format_doi(input), expected);
        }
    }

    #[rstest]
    #[case("10.1234_abc", "10.1234/abc")]
    #[case("10.1234/abc_def", "10.1234/abc_def")]
    #[case("10.1234_abc_def", "10.1234/abc_def")]
    fn test_work_id_to_doi(#[case] id: &str, #[case] expected: &str) {
        assert_eq!(work_id_to_doi(id), expected);
    }

    #[rstest]
    #[case("Smith, John", "Smith", "John")]
    #[case("Duan, J.J.", "Duan", "J.J.")]
    #[case("Duan JJ", "Duan", "JJ")]
    #[case("SMITH JA", "Smith", "JA")]
    #[case("SMITH", "Smith", "")]
    #[case("John Smith", "Smith", "John")]
    #[case("Smith-Jones, John-Paul", "Smith-Jones", "John-Paul")]
    #[case("Smith", "Smith", "")]
    #[case("", "", "")]
    fn test_parse_author_name(#[case] name: &str, #[case] family: &str, #[case] given: &str) {
        assert_eq!(
            parse_author_name(name),
            (family.to_string(), given.to_string())
        );
    }

    #[rstest]
    #[case("John", "J")]
    #[case("Jean-Paul Anton", "JPA")]
    #[case("j. r. r.", "JRR")]
    #[case("", "")]
    fn test_initials(#[case] given: &str, #[case] expected: &str) {
        assert_eq!(initials(given), expected);
    }

    #[test]
    fn test_year_from_str() {
        assert_eq!(year_from_str("2000"), Some(2000));
        assert_eq!(year_from_str("Spring 1998, reprinted 2004"), Some(1998));
        assert_eq!(year_from_str("n.d."), None);
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(
            normalize_title("Machine Learning! (2<sup>nd</sup> Edition)"),
            Some("machinelearning2ndedition".to_string())
        );
        assert_eq!(
            normalize_title("<U+0391>lpha &amp; Omega"),
            Some("αlphaomega".to_string())
        );
        assert_eq!(normalize_title(" .. "), None);
    }

    #[test]
    fn test_simplify_text() {
        assert_eq!(simplify_text("  A   Study\nof Things "), "a study of things");
    }

    #[rstest]
    #[case("The Sociology of Law and the Courts", Some("en"))]
    #[case("Die Soziologie des Rechts und der Gerichte", Some("de"))]
    #[case("La sociologie du droit et les tribunaux", Some("fr"))]
    #[case("Rechtssoziologie", None)]
    fn test_guess_language(#[case] text: &str, #[case] expected: Option<&str>) {
        assert_eq!(guess_language(text), expected);
    }
}
