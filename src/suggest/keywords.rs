//! Keyword extraction and phrase cleanup for generated suggestions.
//!
//! Raw LM samples are noisy sentence fragments. They are segmented with jieba, filtered by
//! part of speech and stopwords, recombined into short bigram phrases and finally stripped
//! of the query so only the associated content remains.

use std::collections::{HashMap, HashSet};

use jieba_rs::Jieba;
use tracing::debug;

use crate::text::is_cjk;

/// Characters trimmed from both ends of words and phrases.
pub const PUNCTUATION: &str = " ，。,.、/|;；:：-—()（）[]【】~!@#$%^&*_+<>?:\"'\\";

/// Filler words that never make a useful suggestion.
pub const STOPWORDS: [&str; 21] = [
    "这款", "采用", "具有", "无论是", "可以", "就是", "整体", "如果", "以及", "能够", "支持",
    "非常", "比较", "还是", "的话", "更加", "进行", "关于", "一种", "一款", "款式",
];

/// Accepted jieba POS tags: nouns, proper names, English, adjectives, verbal nouns.
pub const POS_WHITELIST: [&str; 11] = ["n", "nr", "ns", "nz", "nt", "eng", "x", "a", "an", "vn", "vnf"];

pub const DEFAULT_KEYWORDS_PER_TEXT: usize = 20;
pub const DEFAULT_MAX_CHARS: usize = 12;
pub const DEFAULT_WANT_N: usize = 8;

const MAX_BIGRAM_PART_CHARS: usize = 8;
const MIN_BIGRAM_CHARS: usize = 2;
const MAX_BIGRAM_CHARS: usize = 10;
const MIN_SHARED_PREFIX: usize = 2;

#[inline]
fn is_punctuation(c: char) -> bool {
    PUNCTUATION.contains(c)
}

#[inline]
fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

#[inline]
fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Trims punctuation, then whitespace, from both ends.
pub fn strip_punctuation(s: &str) -> &str {
    s.trim_matches(is_punctuation).trim()
}

/// Keeps content words: not a stopword, at least one CJK or ASCII alphanumeric char, and a
/// whitelisted POS tag unless the word is purely ASCII alphanumeric.
pub fn is_good_token(word: &str, pos: &str) -> bool {
    if word.is_empty() || is_stopword(word) {
        return false;
    }
    if !word.chars().any(|c| is_cjk(c) || c.is_ascii_alphanumeric()) {
        return false;
    }
    if POS_WHITELIST.contains(&pos) {
        return true;
    }
    word.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Adjacent keyword pairs joined into short phrases, those containing `query` first.
///
/// Ranking is by (contains query, 4..=8 chars, length) descending; ties keep first-seen
/// order.
pub fn compose_bigrams<S: AsRef<str>>(words: &[S], query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut bigrams = Vec::new();
    for pair in words.windows(2) {
        let (a, b) = (pair[0].as_ref(), pair[1].as_ref());
        if is_stopword(a) || is_stopword(b) {
            continue;
        }
        if char_len(a) > MAX_BIGRAM_PART_CHARS || char_len(b) > MAX_BIGRAM_PART_CHARS {
            continue;
        }
        let phrase = format!("{a}{b}");
        let len = char_len(&phrase);
        if (MIN_BIGRAM_CHARS..=MAX_BIGRAM_CHARS).contains(&len) && seen.insert(phrase.clone()) {
            bigrams.push(phrase);
        }
    }

    let q = query.trim();
    let rank = |s: &str| {
        let len = char_len(s);
        (!q.is_empty() && s.contains(q), (4..=8).contains(&len), len)
    };
    bigrams.sort_by(|a, b| rank(b).cmp(&rank(a)));
    bigrams
}

/// Strips the query out of a candidate phrase, leaving only the associated part.
///
/// Besides exact occurrences this drops a shared prefix of two or more characters and a
/// leading copy of the query's trailing one or two characters (`手机` + `手机壳` → `壳`).
pub fn remove_query_from_phrase(phrase: &str, query: &str) -> String {
    let mut s = strip_punctuation(phrase).to_string();
    let q = query.trim();
    if q.is_empty() {
        return s;
    }

    s = s.replace(q, "");

    let shared = s
        .chars()
        .zip(q.chars())
        .take_while(|(a, b)| a == b)
        .count();
    if shared >= MIN_SHARED_PREFIX {
        s = s.chars().skip(shared).collect();
    }

    let q_chars: Vec<char> = q.chars().collect();
    let tail_two: String = q_chars[q_chars.len().saturating_sub(2)..].iter().collect();
    let tail_one: String = q_chars[q_chars.len() - 1..].iter().collect();
    for tail in [tail_two, tail_one] {
        if let Some(rest) = s.strip_prefix(tail.as_str()) {
            s = rest.to_string();
        }
    }

    strip_punctuation(&s).to_string()
}

/// Options for [`KeywordExtractor::postprocess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostprocessOptions {
    pub max_chars: usize,
    pub want_n: usize,
    /// Remove the query from every candidate.
    pub association_only: bool,
}

impl Default for PostprocessOptions {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            want_n: DEFAULT_WANT_N,
            association_only: true,
        }
    }
}

impl PostprocessOptions {
    pub fn with_want_n(mut self, want_n: usize) -> Self {
        self.want_n = want_n;
        self
    }
}

/// jieba segmenter plus the keyword pipeline built on it.
///
/// Loading the dictionary takes a noticeable moment; build one extractor and share it.
pub struct KeywordExtractor {
    jieba: Jieba,
}

impl std::fmt::Debug for KeywordExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordExtractor").finish_non_exhaustive()
    }
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordExtractor {
    pub fn new() -> Self {
        Self {
            jieba: Jieba::new(),
        }
    }

    /// Most frequent content words of `text`, ranked by (count, length ≥ 2, length).
    pub fn extract_keywords(&self, text: &str, top_k: usize) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        let mut counts: HashMap<String, usize> = HashMap::new();

        for tag in self.jieba.tag(text, true) {
            let word = strip_punctuation(tag.word);
            if !is_good_token(word, tag.tag) {
                continue;
            }
            let count = counts.entry(word.to_string()).or_insert(0);
            if *count == 0 {
                order.push(word.to_string());
            }
            *count += 1;
        }

        let rank = |w: &String| {
            let len = char_len(w);
            (counts.get(w).copied().unwrap_or(0), len >= 2, len)
        };
        order.sort_by(|a, b| rank(b).cmp(&rank(a)));
        order.truncate(top_k);
        order
    }

    /// Turns raw generated texts into at most `want_n` short, de-duplicated suggestions.
    pub fn postprocess<S: AsRef<str>>(
        &self,
        raw_texts: &[S],
        query: &str,
        options: PostprocessOptions,
    ) -> Vec<String> {
        let mut words = Vec::new();
        for raw in raw_texts {
            let text = strip_punctuation(raw.as_ref().trim());
            if text.is_empty() {
                continue;
            }
            words.extend(self.extract_keywords(text, DEFAULT_KEYWORDS_PER_TEXT));
        }

        let q = query.trim();
        let bigrams = compose_bigrams(&words, query);
        let mut seen_single = HashSet::new();
        let singles = words
            .iter()
            .filter(|w| q.is_empty() || w.contains(q) || q.contains(w.as_str()))
            .filter(|w| seen_single.insert(w.as_str()))
            .cloned();

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for candidate in bigrams.into_iter().chain(singles) {
            let mut s = strip_punctuation(&candidate).to_string();
            if s.is_empty() {
                continue;
            }
            if options.association_only {
                s = remove_query_from_phrase(&s, q);
            }
            if s.is_empty() || s == q {
                continue;
            }
            if char_len(&s) > options.max_chars {
                s = s.chars().take(options.max_chars).collect();
            }
            if s.chars().all(is_punctuation) {
                continue;
            }
            if seen.insert(s.clone()) {
                out.push(s);
                if out.len() >= options.want_n {
                    break;
                }
            }
        }

        debug!(
            raw = raw_texts.len(),
            keywords = words.len(),
            suggestions = out.len(),
            "Post-processed suggestions"
        );
        out
    }
}
