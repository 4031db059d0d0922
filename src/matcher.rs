//! Best-effort block → section matching.
//!
//! Used when the rendered document carries no block identifiers. Three
//! passes run in order and each claims the sections it matches, so later
//! passes only see what is left:
//!
//! 1. exact: normalized text similarity at or above `exact_threshold`
//! 2. fuzzy: weighted blend of word-set Jaccard, edit-distance similarity
//!    and word overlap, best pairs first, at or above `fuzzy_threshold`
//! 3. position: leftover blocks in reading order take leftover sections in
//!    document order, with a fixed low confidence
//!
//! Blocks with blank content are skipped. Everything is recomputed from
//! scratch on every call.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::config::MatcherConfig;
use crate::document_model::{Block, BlockIndex, MatchResult, MatchType};
use crate::error::SyncResult;
use crate::logging::PerformanceTimer;

/// Strips markup and folds text into a comparable form.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    html_tag: Regex,
    html_entity: Regex,
    md_image: Regex,
    md_link: Regex,
    latex_command: Regex,
}

impl TextNormalizer {
    pub fn new() -> SyncResult<Self> {
        Ok(Self {
            html_tag: Regex::new(r"<[^>]*>")?,
            html_entity: Regex::new(r"&(?:[a-zA-Z]+|#[0-9]+|#x[0-9a-fA-F]+);")?,
            md_image: Regex::new(r"!\[([^\]]*)\]\(([^)\s]*)[^)]*\)")?,
            md_link: Regex::new(r"\[([^\]]*)\]\([^)]*\)")?,
            latex_command: Regex::new(r"\\[a-zA-Z]+")?,
        })
    }

    /// Remove markup, keep letters and digits of every script, lowercase,
    /// collapse whitespace.
    pub fn normalize(&self, text: &str) -> String {
        let text = self.html_tag.replace_all(text, " ");
        let text = self.html_entity.replace_all(&text, " ");
        let text = self.md_image.replace_all(&text, " $1 $2 ");
        let text = self.md_link.replace_all(&text, " $1 ");
        let text = self.latex_command.replace_all(&text, " ");

        let folded: String = text
            .chars()
            .flat_map(char::to_lowercase)
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        folded.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Text prepared once per matching run.
#[derive(Debug, Clone)]
struct Prepared {
    text: String,
    chars: usize,
    words: HashSet<String>,
}

impl Prepared {
    fn new(text: String) -> Self {
        let words = text.split_whitespace().map(str::to_string).collect();
        let chars = text.chars().count();
        Self { text, chars, words }
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// `|A ∩ B| / |A ∪ B|`
pub fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// `|A ∩ B| / min(|A|, |B|)`, so a block fully contained in a longer
/// section still scores 1.
pub fn word_overlap(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / smaller as f64
}

fn split_chars(s: &str, at: usize) -> (&str, &str) {
    match s.char_indices().nth(at) {
        Some((byte, _)) => s.split_at(byte),
        None => (s, ""),
    }
}

/// Normalized Levenshtein similarity. Only the first `max_chars` characters
/// of each side go through the distance table; past that, differing tails
/// count as entirely different, so the result never overstates the real
/// similarity of two long strings.
pub fn edit_similarity(a: &str, b: &str, max_chars: usize) -> f64 {
    if a == b {
        return 1.0;
    }
    let longer = a.chars().count().max(b.chars().count());
    let (a_head, a_tail) = split_chars(a, max_chars);
    let (b_head, b_tail) = split_chars(b, max_chars);

    let mut distance = strsim::levenshtein(a_head, b_head);
    if a_tail != b_tail {
        distance += a_tail.chars().count().max(b_tail.chars().count());
    }
    (1.0 - distance as f64 / longer as f64).max(0.0)
}

/// Upper bound of the edit similarity implied by the length difference.
fn length_ratio(a: usize, b: usize) -> f64 {
    let longer = a.max(b);
    if longer == 0 {
        return 1.0;
    }
    a.min(b) as f64 / longer as f64
}

/// Hash of everything that influences a matching run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputFingerprint([u8; 32]);

impl InputFingerprint {
    pub fn of(blocks: &[Block], sections: &[String]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(blocks.len() as u64).to_le_bytes());
        for block in blocks {
            hasher.update(&(block.index as u64).to_le_bytes());
            hasher.update(&(block.page_num as u64).to_le_bytes());
            for value in block.bbox.to_array() {
                hasher.update(&value.to_le_bytes());
            }
            hasher.update(&(block.content.len() as u64).to_le_bytes());
            hasher.update(block.content.as_bytes());
        }
        hasher.update(&(sections.len() as u64).to_le_bytes());
        for section in sections {
            hasher.update(&(section.len() as u64).to_le_bytes());
            hasher.update(section.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Summary of one matching run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    pub total_blocks: usize,
    pub skipped_empty: usize,
    pub exact: usize,
    pub fuzzy: usize,
    pub position: usize,
    /// Position results that found no section left to claim
    pub without_section: usize,
    pub mean_confidence: f64,
}

impl MatchReport {
    pub fn from_results(blocks: &[Block], results: &[MatchResult]) -> Self {
        let mut report = MatchReport {
            total_blocks: blocks.len(),
            skipped_empty: blocks.iter().filter(|b| !b.has_content()).count(),
            ..Default::default()
        };
        for result in results {
            match result.match_type {
                MatchType::Exact => report.exact += 1,
                MatchType::Fuzzy => report.fuzzy += 1,
                MatchType::Position => report.position += 1,
            }
            if result.section_index.is_none() {
                report.without_section += 1;
            }
        }
        if !results.is_empty() {
            report.mean_confidence =
                results.iter().map(|r| r.confidence).sum::<f64>() / results.len() as f64;
        }
        report
    }
}

pub struct ContentMatcher {
    config: MatcherConfig,
    normalizer: TextNormalizer,
}

impl ContentMatcher {
    pub fn new(config: MatcherConfig) -> SyncResult<Self> {
        Ok(Self {
            config,
            normalizer: TextNormalizer::new()?,
        })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &TextNormalizer {
        &self.normalizer
    }

    /// Plain similarity used by the exact pass.
    pub fn string_similarity(&self, a: &str, b: &str) -> f64 {
        edit_similarity(a, b, self.config.max_edit_chars)
    }

    /// Blended score used by the fuzzy pass.
    pub fn fuzzy_score(&self, a: &str, b: &str) -> f64 {
        let a = Prepared::new(self.normalizer.normalize(a));
        let b = Prepared::new(self.normalizer.normalize(b));
        self.blend(&a, &b)
    }

    fn blend(&self, a: &Prepared, b: &Prepared) -> f64 {
        let c = &self.config;
        let score = c.jaccard_weight * jaccard_similarity(&a.words, &b.words)
            + c.edit_weight * edit_similarity(&a.text, &b.text, c.max_edit_chars)
            + c.overlap_weight * word_overlap(&a.words, &b.words);
        score.clamp(0.0, 1.0)
    }

    /// Map blocks onto sections. Blocks are expected in reading order (as the
    /// registry stores them). Returns at most one result per block, sorted by
    /// block index.
    pub fn match_blocks(&self, blocks: &[Block], sections: &[String]) -> Vec<MatchResult> {
        let timer = PerformanceTimer::start("content matching");
        let config = &self.config;

        let candidates: Vec<(usize, Prepared)> = blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.has_content())
            .map(|(pos, block)| (pos, Prepared::new(self.normalizer.normalize(&block.content))))
            .collect();
        let prepared_sections: Vec<Prepared> = sections
            .iter()
            .map(|s| Prepared::new(self.normalizer.normalize(s)))
            .collect();

        let mut claimed = vec![false; sections.len()];
        let mut matched: HashMap<usize, MatchResult> = HashMap::new();

        // Pass 1: exact
        let mut by_text: HashMap<&str, Vec<usize>> = HashMap::new();
        for (section_index, section) in prepared_sections.iter().enumerate() {
            if !section.is_empty() {
                by_text.entry(section.text.as_str()).or_default().push(section_index);
            }
        }

        for (pos, block_text) in &candidates {
            if block_text.is_empty() {
                continue;
            }

            let identical = by_text
                .get(block_text.text.as_str())
                .and_then(|indices| indices.iter().copied().find(|&i| !claimed[i]));

            let best = identical.map(|i| (i, 1.0)).or_else(|| {
                let mut best: Option<(usize, f64)> = None;
                for (section_index, section) in prepared_sections.iter().enumerate() {
                    if claimed[section_index] || section.is_empty() {
                        continue;
                    }
                    let bound = length_ratio(block_text.chars, section.chars);
                    if bound < config.exact_threshold {
                        continue;
                    }
                    let similarity = self.string_similarity(&block_text.text, &section.text);
                    if similarity >= config.exact_threshold
                        && best.map_or(true, |(_, score)| similarity > score)
                    {
                        best = Some((section_index, similarity));
                    }
                }
                best
            });

            if let Some((section_index, similarity)) = best {
                claimed[section_index] = true;
                matched.insert(
                    *pos,
                    MatchResult {
                        block_index: blocks[*pos].index,
                        section_index: Some(section_index),
                        confidence: similarity,
                        match_type: MatchType::Exact,
                    },
                );
            }
        }
        timer.checkpoint("exact pass");

        // Pass 2: fuzzy, best pairs first
        let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
        for (pos, block_text) in &candidates {
            if matched.contains_key(pos) || block_text.is_empty() {
                continue;
            }
            for (section_index, section) in prepared_sections.iter().enumerate() {
                if claimed[section_index] || section.is_empty() {
                    continue;
                }
                let jaccard = jaccard_similarity(&block_text.words, &section.words);
                let overlap = word_overlap(&block_text.words, &section.words);
                let edit_bound = length_ratio(block_text.chars, section.chars);
                let upper = config.jaccard_weight * jaccard
                    + config.edit_weight * edit_bound
                    + config.overlap_weight * overlap;
                if upper < config.fuzzy_threshold {
                    continue;
                }
                let score = self.blend(block_text, section);
                if score >= config.fuzzy_threshold {
                    pairs.push((score, *pos, section_index));
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });
        for (score, pos, section_index) in pairs {
            if claimed[section_index] || matched.contains_key(&pos) {
                continue;
            }
            claimed[section_index] = true;
            matched.insert(
                pos,
                MatchResult {
                    block_index: blocks[pos].index,
                    section_index: Some(section_index),
                    confidence: score,
                    match_type: MatchType::Fuzzy,
                },
            );
        }
        timer.checkpoint("fuzzy pass");

        // Pass 3: position
        let mut leftovers: Vec<usize> = candidates
            .iter()
            .map(|(pos, _)| *pos)
            .filter(|pos| !matched.contains_key(pos))
            .collect();
        leftovers.sort_by(|&a, &b| reading_order(&blocks[a], &blocks[b]));
        let free_sections: Vec<usize> = (0..sections.len()).filter(|&i| !claimed[i]).collect();
        let mut free_sections = free_sections.into_iter();
        for pos in leftovers {
            let section_index = free_sections.next();
            matched.insert(
                pos,
                MatchResult {
                    block_index: blocks[pos].index,
                    section_index,
                    confidence: config.position_confidence,
                    match_type: MatchType::Position,
                },
            );
        }

        let mut results: Vec<MatchResult> = matched.into_values().collect();
        results.sort_by_key(|r| r.block_index);

        let report = MatchReport::from_results(blocks, &results);
        info!(
            "Matched {} blocks to {} sections (exact {}, fuzzy {}, position {}) in {:.2}ms",
            results.len(),
            sections.len(),
            report.exact,
            report.fuzzy,
            report.position,
            timer.elapsed_ms()
        );
        if report.without_section > 0 {
            debug!("{} blocks found no section left to claim", report.without_section);
        }
        results
    }
}

/// Page first, then top edge, then left edge, then index.
pub fn reading_order(a: &Block, b: &Block) -> Ordering {
    a.page_num
        .cmp(&b.page_num)
        .then(a.bbox.y1.partial_cmp(&b.bbox.y1).unwrap_or(Ordering::Equal))
        .then(a.bbox.x1.partial_cmp(&b.bbox.x1).unwrap_or(Ordering::Equal))
        .then(a.index.cmp(&b.index))
}

/// Lookup table from block index to its match.
pub fn index_matches(results: &[MatchResult]) -> HashMap<BlockIndex, MatchResult> {
    results.iter().map(|r| (r.block_index, *r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_model::{BBox, BlockType, PageSize};

    fn block(index: usize, page: usize, y: f64, content: &str) -> Block {
        Block {
            index,
            block_type: BlockType::Text,
            bbox: BBox::new(0.0, y, 100.0, y + 20.0),
            page_num: page,
            page_size: PageSize::new(200.0, 800.0),
            content: content.to_string(),
        }
    }

    fn sections(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn matcher() -> ContentMatcher {
        ContentMatcher::new(MatcherConfig::default()).unwrap()
    }

    #[test]
    fn test_normalize_strips_markup() {
        let n = TextNormalizer::new().unwrap();
        assert_eq!(n.normalize("**Hello**,   _World_!"), "hello world");
        assert_eq!(n.normalize("<p>Tom &amp; Jerry</p>"), "tom jerry");
        assert_eq!(n.normalize("see [the docs](http://x.y/z)"), "see the docs");
        assert_eq!(n.normalize("![](images/a.jpg)"), "images a jpg");
        assert_eq!(n.normalize("$\\alpha + b$"), "b");
        assert_eq!(n.normalize("第一章 概述"), "第一章 概述");
    }

    #[test]
    fn test_similarity_helpers() {
        let a: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let b: HashSet<String> = ["b", "c", "d", "e"].iter().map(|s| s.to_string()).collect();
        assert!((jaccard_similarity(&a, &b) - 0.4).abs() < 1e-12);
        assert!((word_overlap(&a, &b) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(edit_similarity("abc", "abc", 10), 1.0);
        assert_eq!(edit_similarity("abcdef", "abcxyz", 3), 0.5);
        assert_eq!(edit_similarity("abcdef", "abxdef", 3), 1.0 - 1.0 / 6.0);
    }

    #[test]
    fn test_long_sections_differing_late_are_not_exact() {
        let shared = "lorem ipsum dolor sit amet ".repeat(40);
        let a = format!("{}first ending with extra words", shared);
        let b = format!("{}second closing that differs", shared);
        assert!(shared.chars().count() > 1000);

        let similarity = edit_similarity(&a, &b, 1000);
        assert!(similarity < 1.0);
        assert!(similarity <= strsim::normalized_levenshtein(&a, &b) + 1e-12);

        let results = matcher().match_blocks(&[block(0, 1, 0.0, &a)], &sections(&[b.as_str(), a.as_str()]));
        assert_eq!(results[0].section_index, Some(1));
        assert_eq!(results[0].confidence, 1.0);
    }

    #[test]
    fn test_low_fuzzy_threshold_still_scores_weak_pairs() {
        let config = MatcherConfig {
            fuzzy_threshold: 0.3,
            ..MatcherConfig::default()
        };
        let sync = crate::config::SyncConfig {
            matcher: config.clone(),
            ..crate::config::SyncConfig::default()
        };
        sync.validate().unwrap();

        let results = ContentMatcher::new(config).unwrap().match_blocks(
            &[block(0, 1, 0.0, "colour organisation behaviour analyse centre the")],
            &sections(&["zzz", "color organization behavior analyze center the"]),
        );
        assert_eq!(results[0].section_index, Some(1));
        assert_eq!(results[0].match_type, MatchType::Fuzzy);
    }

    #[test]
    fn test_hello_world_scenario() {
        let results = matcher().match_blocks(
            &[block(0, 1, 0.0, "Hello world")],
            &sections(&["Hello world.", "Goodbye"]),
        );
        assert_eq!(results.len(), 1);
        let result = results[0];
        assert_eq!(result.section_index, Some(0));
        assert!(matches!(result.match_type, MatchType::Exact | MatchType::Fuzzy));
        assert!(result.confidence >= 0.6);
    }

    #[test]
    fn test_fuzzy_pass_tolerates_rewording() {
        let results = matcher().match_blocks(
            &[block(0, 1, 0.0, "The quick brown fox jumps over the lazy dog")],
            &sections(&["Unrelated intro", "The quick brown fox jumped over a lazy dog today"]),
        );
        assert_eq!(results[0].section_index, Some(1));
        assert_eq!(results[0].match_type, MatchType::Fuzzy);
        assert!(results[0].confidence >= 0.6 && results[0].confidence < 1.0);
    }

    #[test]
    fn test_duplicate_text_claims_distinct_sections() {
        let results = matcher().match_blocks(
            &[block(0, 1, 0.0, "Note"), block(1, 1, 100.0, "Note")],
            &sections(&["Note", "Note"]),
        );
        assert_eq!(results[0].section_index, Some(0));
        assert_eq!(results[1].section_index, Some(1));
        assert!(results.iter().all(|r| r.match_type == MatchType::Exact));
    }

    #[test]
    fn test_position_pass_follows_reading_order() {
        // index order differs from vertical order on purpose
        let blocks = vec![
            block(0, 2, 0.0, "zzz"),
            block(1, 1, 300.0, "yyy"),
            block(2, 1, 10.0, "xxx"),
        ];
        let results = matcher().match_blocks(&blocks, &sections(&["aaa", "bbb", "ccc"]));
        let by_block = index_matches(&results);
        assert_eq!(by_block[&2].section_index, Some(0));
        assert_eq!(by_block[&1].section_index, Some(1));
        assert_eq!(by_block[&0].section_index, Some(2));
        assert!(results
            .iter()
            .all(|r| r.match_type == MatchType::Position && r.confidence == 0.5));
    }

    #[test]
    fn test_empty_content_is_skipped() {
        let results = matcher().match_blocks(
            &[block(0, 1, 0.0, "   "), block(1, 1, 50.0, "Body text")],
            &sections(&["Body text"]),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].block_index, 1);
    }

    #[test]
    fn test_more_blocks_than_sections() {
        let blocks = vec![
            block(0, 1, 0.0, "alpha"),
            block(1, 1, 50.0, "beta"),
            block(2, 1, 100.0, "gamma"),
        ];
        let results = matcher().match_blocks(&blocks, &sections(&["alpha"]));
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].section_index, Some(0));
        assert_eq!(results[1].section_index, None);
        assert_eq!(results[2].section_index, None);

        let report = MatchReport::from_results(&blocks, &results);
        assert_eq!(report.exact, 1);
        assert_eq!(report.position, 2);
        assert_eq!(report.without_section, 2);
    }

    #[test]
    fn test_claims_are_unique_and_complete() {
        let blocks = vec![
            block(0, 1, 0.0, "Introduction"),
            block(1, 1, 40.0, "Deep learning has changed OCR."),
            block(2, 1, 80.0, "Deep learning has changed OCR"),
            block(3, 1, 120.0, "Tables are hard"),
            block(4, 1, 160.0, ""),
            block(5, 2, 0.0, "Figure 1: results"),
        ];
        let secs = sections(&[
            "# Introduction",
            "Deep learning has changed OCR.",
            "Deep learning has changed **OCR**!",
            "Figure 1 - results",
            "Closing remarks",
        ]);
        let results = matcher().match_blocks(&blocks, &secs);

        let with_content = blocks.iter().filter(|b| b.has_content()).count();
        assert_eq!(results.len(), with_content);

        let claimed: Vec<usize> = results.iter().filter_map(|r| r.section_index).collect();
        let unique: HashSet<usize> = claimed.iter().copied().collect();
        assert_eq!(claimed.len(), unique.len());
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.confidence)));
    }

    #[test]
    fn test_rerun_is_identical() {
        let blocks = vec![block(0, 1, 0.0, "One fish"), block(1, 1, 30.0, "Two fish")];
        let secs = sections(&["Two fish", "One fish"]);
        let m = matcher();
        assert_eq!(m.match_blocks(&blocks, &secs), m.match_blocks(&blocks, &secs));
    }

    #[test]
    fn test_fingerprint_tracks_inputs() {
        let blocks = vec![block(0, 1, 0.0, "One fish")];
        let a = InputFingerprint::of(&blocks, &sections(&["One fish"]));
        let b = InputFingerprint::of(&blocks, &sections(&["One fish"]));
        let c = InputFingerprint::of(&blocks, &sections(&["Two fish"]));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_hex().len(), 64);
    }
}
