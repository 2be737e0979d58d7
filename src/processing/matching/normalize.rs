//! Pure, deterministic normalization of prospect identity fields.
//!
//! Every comparison in the matcher happens on normalized values, so the
//! functions here define what "equal" means for names, schools and
//! positions across sources.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Generational suffixes stripped from the end of a name
const NAME_SUFFIXES: [&str; 6] = ["jr", "sr", "ii", "iii", "iv", "v"];

/// Bounded so a pathological name like "Jr Jr Jr Jr Jr" cannot loop forever
const MAX_SUFFIX_PASSES: usize = 4;

/// Whole-token school abbreviation expansions. Expansion never happens
/// inside a word, only on token boundaries after trailing periods are
/// trimmed.
static SCHOOL_ABBREVIATIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("st", "state"),
        ("univ", "university"),
        ("fla", "florida"),
        ("tenn", "tennessee"),
        ("miss", "mississippi"),
        ("wash", "washington"),
        ("okla", "oklahoma"),
        ("ala", "alabama"),
    ])
});

/// Source position spelling -> canonical position code
static POSITION_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("QUARTERBACK", "QB"),
        ("RUNNING BACK", "RB"),
        ("HB", "RB"),
        ("TAILBACK", "RB"),
        ("WIDE RECEIVER", "WR"),
        ("TIGHT END", "TE"),
        ("OFFENSIVE TACKLE", "OT"),
        ("OFFENSIVE GUARD", "OG"),
        ("CENTER", "OC"),
        ("C", "OC"),
        ("DEFENSIVE END", "EDGE"),
        ("DE", "EDGE"),
        ("DEFENSIVE TACKLE", "DT"),
        ("LINEBACKER", "LB"),
        ("ILB", "LB"),
        ("OLB", "LB"),
        ("CORNERBACK", "CB"),
        ("SAFETY", "S"),
        ("FS", "S"),
        ("SS", "S"),
        ("KICKER", "K"),
        ("PUNTER", "P"),
        ("ATHLETE", "ATH"),
    ])
});

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE_RE.replace_all(s.trim(), " ").to_string()
}

/// Strip generational suffixes from the end of a name segment, one token
/// per pass, bounded by `MAX_SUFFIX_PASSES`.
fn strip_suffixes(segment: &str) -> String {
    let mut tokens: Vec<&str> = segment.split_whitespace().collect();
    for _ in 0..MAX_SUFFIX_PASSES {
        match tokens.last() {
            Some(last) if NAME_SUFFIXES.contains(&last.trim_end_matches('.')) && tokens.len() > 1 => {
                tokens.pop();
            }
            _ => break,
        }
    }
    tokens.join(" ")
}

/// Normalize a prospect name: lowercase, collapse whitespace, convert
/// "Last, First" ordering, strip generational suffixes.
pub fn normalize_name(name: &str) -> String {
    let lowered = collapse_whitespace(&name.to_lowercase());

    // "Last, First [suffix]" -> "First Last"; suffixes are stripped per
    // segment so they never end up in the middle of the swapped name.
    if let Some((last, first)) = lowered.split_once(',') {
        let first = strip_suffixes(first.trim());
        let last = strip_suffixes(last.trim());
        return collapse_whitespace(&format!("{} {}", first, last));
    }

    strip_suffixes(&lowered)
}

/// Normalize a college/school name: lowercase, collapse whitespace,
/// expand known abbreviations on whole-token boundaries only.
pub fn normalize_school(school: &str) -> String {
    let lowered = collapse_whitespace(&school.to_lowercase());
    lowered
        .split_whitespace()
        .map(|token| {
            let bare = token.trim_end_matches('.');
            SCHOOL_ABBREVIATIONS.get(bare).copied().unwrap_or(bare)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map a source's position spelling to the canonical position code.
/// Unknown spellings pass through uppercased so they still compare
/// consistently.
pub fn map_position(position: &str) -> String {
    let upper = collapse_whitespace(&position.to_uppercase());
    POSITION_ALIASES
        .get(upper.as_str())
        .map(|p| p.to_string())
        .unwrap_or(upper)
}
