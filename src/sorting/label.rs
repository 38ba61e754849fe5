//! Natural label / catalogue-number ordering.
//!
//! Catalogue numbers mix numeric and alphabetic runs ("IM 2", "IM 12",
//! "WARP CD 100"), so they are compared token by token with numeric tokens
//! compared by value.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::RecordOrdering;
use crate::cache::{BY_LABEL, CacheEntry, SortingCache};
use crate::db::models::{Label, LabelExtractor, LabelId, Record};

static GENERIC_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+|[a-z]+|[A-Z]+").unwrap());

/// Compiled per-label catalogue extractors.
#[derive(Debug, Default)]
pub struct ExtractorSet {
    patterns: HashMap<LabelId, Regex>,
}

impl ExtractorSet {
    /// Patterns that fail to compile are logged and skipped.
    pub fn compile(extractors: &[LabelExtractor]) -> Self {
        let mut patterns = HashMap::new();
        for ex in extractors {
            match Regex::new(&ex.extractor) {
                Ok(re) => {
                    patterns.insert(ex.label_id, re);
                }
                Err(e) => log::warn!("Ignoring extractor for label {}: {e}", ex.label_id),
            }
        }
        Self { patterns }
    }

    /// Tokens pulled out by the label's extractor: the first capture group of
    /// every match, or the whole match when the pattern has no groups.
    pub fn extract(&self, label: &Label) -> Vec<String> {
        let Some(re) = self.patterns.get(&label.id) else {
            return Vec::new();
        };
        re.captures_iter(&label.catno)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
            .map(|m| m.as_str().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Split a catalogue number into alphanumeric runs, lower-cased.
pub fn tokenize(catno: &str) -> Vec<String> {
    let lower = catno.to_lowercase();
    GENERIC_TOKEN
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn leading_digits(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}

/// Compare two digit strings by value, for any length.
fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn cmp_token(a: &str, b: &str) -> Ordering {
    let a_numeric = a.starts_with(|c: char| c.is_ascii_digit());
    let b_numeric = b.starts_with(|c: char| c.is_ascii_digit());
    if a_numeric && b_numeric {
        let (a_num, a_rest) = leading_digits(a);
        let (b_num, b_rest) = leading_digits(b);
        cmp_digits(a_num, b_num).then_with(|| a_rest.cmp(b_rest))
    } else {
        a.cmp(b)
    }
}

/// Pairwise token comparison up to the shorter list.
pub fn compare_tokens(a: &[String], b: &[String]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| cmp_token(x, y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// String order where embedded digit runs compare by value.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    loop {
        match (a.chars().next(), b.chars().next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let (a_num, a_rest) = leading_digits(a);
                let (b_num, b_rest) = leading_digits(b);
                match cmp_digits(a_num, b_num) {
                    Ordering::Equal => {
                        a = a_rest;
                        b = b_rest;
                    }
                    o => return o,
                }
            }
            (Some(x), Some(y)) => match x.cmp(&y) {
                Ordering::Equal => {
                    a = &a[x.len_utf8()..];
                    b = &b[y.len_utf8()..];
                }
                o => return o,
            },
        }
    }
}

/// Label name, then catalogue tokens, then title.
pub struct LabelCatalogue<'a> {
    extractors: &'a ExtractorSet,
}

impl<'a> LabelCatalogue<'a> {
    pub fn new(extractors: &'a ExtractorSet) -> Self {
        Self { extractors }
    }

    fn tokens(&self, a: &Label, b: &Label) -> (Vec<String>, Vec<String>) {
        let ea = self.extractors.extract(a);
        let eb = self.extractors.extract(b);
        if !ea.is_empty() && ea.len() == eb.len() {
            (ea, eb)
        } else {
            (tokenize(&a.catno), tokenize(&b.catno))
        }
    }
}

impl RecordOrdering for LabelCatalogue<'_> {
    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        match (a.main_label(), b.main_label()) {
            (None, None) => a.title().cmp(b.title()),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(la), Some(lb)) => la
                .name
                .to_lowercase()
                .cmp(&lb.name.to_lowercase())
                .then_with(|| {
                    let (ta, tb) = self.tokens(la, lb);
                    compare_tokens(&ta, &tb)
                })
                .then_with(|| a.title().cmp(b.title())),
        }
    }
}

/// Compare two `label|catalogue|title` keys.
pub fn compare_label_keys(a: &str, b: &str) -> Ordering {
    let mut pa = a.splitn(3, '|');
    let mut pb = b.splitn(3, '|');
    let (la, ca, ta) = (pa.next().unwrap_or(""), pa.next().unwrap_or(""), pa.next().unwrap_or(""));
    let (lb, cb, tb) = (pb.next().unwrap_or(""), pb.next().unwrap_or(""), pb.next().unwrap_or(""));
    la.cmp(lb)
        .then_with(|| natural_cmp(ca, cb))
        .then_with(|| ta.cmp(tb))
}

/// Same ordering as [`LabelCatalogue`], over precomputed cache keys.
pub struct CachedLabelCatalogue<'a> {
    cache: &'a SortingCache,
}

impl<'a> CachedLabelCatalogue<'a> {
    pub fn new(cache: &'a SortingCache) -> Self {
        Self { cache }
    }

    fn key(&self, r: &Record) -> String {
        match self.cache.get(r.instance_id()) {
            Some(entry) => entry.key(BY_LABEL).to_string(),
            None => CacheEntry::build(r).key(BY_LABEL).to_string(),
        }
    }
}

impl RecordOrdering for CachedLabelCatalogue<'_> {
    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        compare_label_keys(&self.key(a), &self.key(b))
    }
}

/// Positions at which `sorted` disagrees with the order `other` produces.
pub fn misalignments(sorted: &[Record], other: &dyn RecordOrdering) -> usize {
    let mut resorted: Vec<&Record> = sorted.iter().collect();
    resorted.sort_by(|a, b| other.compare(a, b));
    sorted
        .iter()
        .zip(resorted)
        .filter(|(x, y)| x.instance_id() != y.instance_id())
        .count()
}
