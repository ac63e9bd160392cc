use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("Duration must be greater than zero to derive an identity bucket")]
    ZeroDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    Strict,
    Fuzzy,
}

fn feat_suffix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)[\(\[][^\)\]]*feat\.?[^\)\]]*[\)\]]|\bfeat\.?\s.*$").unwrap()
    })
}

fn non_alnum_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^a-z0-9]+").unwrap())
}

fn whitespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Canonicalises a display string for identity and matching purposes: NFKD
/// decompose, drop everything outside ASCII, lowercase, strip "feat." suffixes,
/// replace non-alphanumerics with spaces, then collapse whitespace.
pub fn normalize(input: &str) -> String {
    let decomposed: String = input.nfkd().filter(char::is_ascii).collect();
    let lowered = decomposed.to_lowercase();
    let without_feat = feat_suffix_pattern().replace_all(&lowered, " ");
    let spaced = non_alnum_pattern().replace_all(&without_feat, " ");
    whitespace_pattern().replace_all(spaced.trim(), " ").trim().to_string()
}

/// `normalise(artist) | normalise(title) | (duration / 5)`.
pub fn identity_key(artist: &str, title: &str, duration: u32) -> String {
    let bucket = duration / 5;
    format!("{}|{}|{}", normalize(artist), normalize(title), bucket)
}

pub fn duration_within_tolerance(a: u32, b: u32, tolerance: u32) -> bool {
    a.abs_diff(b) <= tolerance
}

/// Normalised Levenshtein similarity in [0,1]; the empty/empty pair is defined as 1.0.
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }

    let distance = strsim::levenshtein(a, b);
    1.0 - (distance as f64 / max_len as f64)
}

pub struct MatchTarget<'a> {
    pub artist: &'a str,
    pub title: &'a str,
    pub duration: u32,
}

pub struct MatchCandidate<'a> {
    pub artist: &'a str,
    pub title: &'a str,
    pub duration: u32,
}

/// Strict: normalised artist and title equal; duration within 5s.
/// Fuzzy: title similarity >= 0.80, artist similarity >= 0.70, duration within 10s.
pub fn is_match(mode: MatchMode, target: &MatchTarget, candidate: &MatchCandidate) -> bool {
    let target_artist = normalize(target.artist);
    let target_title = normalize(target.title);
    let candidate_artist = normalize(candidate.artist);
    let candidate_title = normalize(candidate.title);

    match mode {
        MatchMode::Strict => {
            target_artist == candidate_artist
                && target_title == candidate_title
                && duration_within_tolerance(target.duration, candidate.duration, 5)
        }
        MatchMode::Fuzzy => {
            edit_similarity(&target_title, &candidate_title) >= 0.80
                && edit_similarity(&target_artist, &candidate_artist) >= 0.70
                && duration_within_tolerance(target.duration, candidate.duration, 10)
        }
    }
}

/// Picks the first candidate (in the order the search client returned them) that
/// passes the configured match mode.
pub fn select_first_match<'a, C>(
    mode: MatchMode,
    target: &MatchTarget,
    candidates: &'a [C],
) -> Option<&'a C>
where
    C: AsMatchCandidate,
{
    candidates
        .iter()
        .find(|candidate| is_match(mode, target, &candidate.as_match_candidate()))
}

pub trait AsMatchCandidate {
    fn as_match_candidate(&self) -> MatchCandidate<'_>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_feat_and_punctuation() {
        assert_eq!(normalize("Beyoncé"), "beyonce");
        assert_eq!(
            normalize("Blinding Lights (feat. Someone)"),
            "blinding lights"
        );
        assert_eq!(normalize("  Multi   Space  "), "multi space");
    }

    #[test]
    fn normalize_is_case_and_accent_insensitive() {
        assert_eq!(normalize("QUEEN"), normalize("queen"));
    }

    #[test]
    fn identity_key_buckets_duration_to_five_seconds() {
        let a = identity_key("Queen", "Bohemian Rhapsody", 354);
        let b = identity_key("queen", "Bohemian  Rhapsody", 352);
        assert_eq!(a, b);
    }

    #[test]
    fn edit_similarity_of_identical_strings_is_one() {
        assert_eq!(edit_similarity("abc", "abc"), 1.0);
    }

    #[test]
    fn edit_similarity_of_empty_pair_is_one() {
        assert_eq!(edit_similarity("", ""), 1.0);
    }

    #[test]
    fn strict_mode_requires_exact_normalized_equality() {
        let target = MatchTarget { artist: "Queen", title: "Bohemian Rhapsody", duration: 354 };
        let exact = MatchCandidate { artist: "queen", title: "bohemian rhapsody", duration: 356 };
        let off_by_title = MatchCandidate { artist: "queen", title: "bohemian rhapsody (live)", duration: 354 };

        assert!(is_match(MatchMode::Strict, &target, &exact));
        assert!(!is_match(MatchMode::Strict, &target, &off_by_title));
    }

    #[test]
    fn fuzzy_mode_tolerates_minor_title_drift() {
        let target = MatchTarget { artist: "Daft Punk", title: "One More Time", duration: 320 };
        let close = MatchCandidate { artist: "daft punk", title: "one more tim", duration: 328 };

        assert!(is_match(MatchMode::Fuzzy, &target, &close));
    }

    #[test]
    fn fuzzy_mode_rejects_large_duration_drift() {
        let target = MatchTarget { artist: "Daft Punk", title: "One More Time", duration: 320 };
        let too_long = MatchCandidate { artist: "daft punk", title: "one more time", duration: 400 };

        assert!(!is_match(MatchMode::Fuzzy, &target, &too_long));
    }
}
