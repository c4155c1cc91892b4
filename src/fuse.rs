//! Deduplication and diversification: merge multi-variant retrieval results
//! into a bounded, citation-ready fact list.
//!
//! Stages, in order:
//!
//! 1. canonicalize — derive each candidate's identity key; candidates with
//!    no derivable key are dropped.
//! 2. merge duplicates — fold left over fusion order (variant index
//!    ascending, rank within variant). The later duplicate wins display
//!    fields; the best score seen wins ranking.
//! 3. near-duplicate collapse — same title (case-insensitive) plus the same
//!    hash of the first 200 snippet characters; the later one is dropped.
//! 4. cap enforcement — greedy accept over the score-sorted pool under the
//!    per-source and per-URL caps, stopping at the fact bound.
//! 5. snippet truncation — word-boundary cut with an ellipsis.
//!
//! Given identical input batches, the output is byte-identical across runs:
//! every sort carries an explicit tie-break and nothing reads the clock.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

use crate::config::RetrievalConfig;
use crate::models::{Candidate, Fact};

/// Canonical identity: `lowercase(coalesce(normalized_url, source_id, doc_id))`.
pub fn canonical_key(candidate: &Candidate) -> Option<String> {
    if let Some(url) = candidate.url.as_deref() {
        let normalized = normalize_url(url);
        if !normalized.is_empty() {
            return Some(normalized);
        }
    }
    if let Some(source_id) = candidate.source_id.as_deref() {
        if !source_id.is_empty() {
            return Some(source_id.to_lowercase());
        }
    }
    if let Some(doc_id) = candidate.doc_id.as_deref() {
        if !doc_id.is_empty() {
            return Some(doc_id.to_lowercase());
        }
    }
    None
}

/// Tracking query parameters that never distinguish documents.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "ref"];

/// Lowercase the URL, drop the fragment and tracking parameters, and strip
/// any trailing slash, so `?utm=a` and `?utm=b` copies collapse.
pub fn normalize_url(url: &str) -> String {
    let lowered = url.trim().to_lowercase();
    let without_fragment = lowered.split('#').next().unwrap_or("");

    let (path, query) = match without_fragment.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (without_fragment, None),
    };

    let mut out = path.trim_end_matches('/').to_string();

    if let Some(query) = query {
        let kept: Vec<&str> = query
            .split('&')
            .filter(|pair| {
                let name = pair.split('=').next().unwrap_or("");
                !name.starts_with("utm") && !TRACKING_PARAMS.contains(&name)
            })
            .collect();
        if !kept.is_empty() {
            out.push('?');
            out.push_str(&kept.join("&"));
        }
    }

    out
}

/// Hash of the first 200 snippet characters, used for near-dup detection.
fn snippet_hash(snippet: &str) -> [u8; 32] {
    let prefix: String = snippet.chars().take(200).collect();
    Sha256::digest(prefix.as_bytes()).into()
}

struct Merged {
    display: Candidate,
    best_score: f64,
    first_seen: usize,
    key: String,
}

/// Fuse candidate batches into the final bounded fact list.
///
/// `batches` pairs each variant index with that variant's ranked candidates;
/// fusion order is variant index ascending regardless of the order the
/// concurrent searches completed in.
pub fn fuse(batches: &[(usize, Vec<Candidate>)], config: &RetrievalConfig) -> Vec<Fact> {
    let mut ordered: Vec<&(usize, Vec<Candidate>)> = batches.iter().collect();
    ordered.sort_by_key(|entry| entry.0);

    // Stages 1–2: canonicalize and fold left, last write wins for display,
    // best score wins for ranking.
    let mut merged: HashMap<String, Merged> = HashMap::new();
    let mut position = 0usize;
    for (_, candidates) in ordered {
        for candidate in candidates {
            let Some(key) = canonical_key(candidate) else {
                continue;
            };
            match merged.get_mut(&key) {
                Some(entry) => {
                    entry.best_score = entry.best_score.max(candidate.score);
                    entry.display = candidate.clone();
                }
                None => {
                    merged.insert(
                        key.clone(),
                        Merged {
                            display: candidate.clone(),
                            best_score: candidate.score,
                            first_seen: position,
                            key,
                        },
                    );
                }
            }
            position += 1;
        }
    }

    // Stage 3: near-duplicate collapse in first-seen order, later dropped.
    let mut survivors: Vec<Merged> = merged.into_values().collect();
    survivors.sort_by_key(|m| m.first_seen);

    let mut seen_content: HashSet<(String, [u8; 32])> = HashSet::new();
    survivors.retain(|m| {
        let title = m
            .display
            .title
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();
        seen_content.insert((title, snippet_hash(&m.display.snippet)))
    });

    // Rank the pool: score desc, canonical key asc.
    survivors.sort_by(|a, b| {
        b.best_score
            .partial_cmp(&a.best_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
    survivors.truncate(config.fact_cap);

    // Stage 4: greedy cap enforcement.
    let mut per_source: HashMap<String, usize> = HashMap::new();
    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut used_citation_ids: HashSet<String> = HashSet::new();
    let mut facts = Vec::new();

    for m in &survivors {
        if facts.len() >= config.max_facts {
            break;
        }

        let source_count = per_source.entry(m.display.source_name.clone()).or_insert(0);
        if *source_count >= config.per_source_cap {
            continue;
        }

        if let Some(url) = m.display.url.as_deref() {
            let normalized = normalize_url(url);
            if !normalized.is_empty() && !seen_urls.insert(normalized) {
                continue;
            }
        }

        *source_count += 1;

        let title = m
            .display
            .title
            .clone()
            .unwrap_or_else(|| "(untitled)".to_string());
        let mut citation_id =
            Fact::derive_citation_id(&m.display.source_name, m.display.date.as_deref(), &title);
        let mut suffix = 2;
        while !used_citation_ids.insert(citation_id.clone()) {
            citation_id = format!(
                "{}-{}",
                Fact::derive_citation_id(&m.display.source_name, m.display.date.as_deref(), &title),
                suffix
            );
            suffix += 1;
        }

        facts.push(Fact {
            citation_id,
            title,
            source_name: m.display.source_name.clone(),
            url: m.display.url.clone(),
            date: m.display.date.clone(),
            snippet: truncate_snippet(&m.display.snippet, config.snippet_display_chars),
            score: m.best_score,
        });
    }

    facts
}

/// Truncate at the last whitespace boundary before `limit` characters and
/// append an ellipsis. Never cuts mid-word; a single over-long word is kept
/// whole.
pub fn truncate_snippet(snippet: &str, limit: usize) -> String {
    let trimmed = snippet.trim();
    if trimmed.chars().count() <= limit {
        return trimmed.to_string();
    }

    let mut cut_byte = None;
    for (count, (byte_index, c)) in trimmed.char_indices().enumerate() {
        if count >= limit {
            break;
        }
        if c.is_whitespace() {
            cut_byte = Some(byte_index);
        }
    }

    match cut_byte {
        Some(byte_index) => format!("{}…", trimmed[..byte_index].trim_end()),
        None => {
            // No boundary inside the limit: keep the first word whole.
            let first_word: &str = trimmed.split_whitespace().next().unwrap_or(trimmed);
            if first_word.len() == trimmed.len() {
                trimmed.to_string()
            } else {
                format!("{}…", first_word)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, url: Option<&str>, source: &str, score: f64) -> Candidate {
        Candidate {
            id: id.to_string(),
            url: url.map(|u| u.to_string()),
            title: Some(format!("Title {}", id)),
            source_name: source.to_string(),
            source_id: None,
            doc_id: None,
            date: Some("2025-06-30".to_string()),
            snippet: format!("Snippet body for {} with enough words to matter.", id),
            score,
        }
    }

    fn config() -> RetrievalConfig {
        RetrievalConfig::default()
    }

    #[test]
    fn test_tracking_params_collapse_to_one_fact() {
        let a = candidate(
            "a",
            Some("https://example.com/report?utm=a"),
            "Sustainacore",
            0.8,
        );
        let b = candidate(
            "b",
            Some("https://example.com/report?utm=b"),
            "Sustainacore",
            0.9,
        );
        let facts = fuse(&[(0, vec![a]), (1, vec![b])], &config());
        assert_eq!(facts.len(), 1);
        // Later duplicate wins display fields, best score wins ranking
        assert_eq!(facts[0].title, "Title b");
        assert!((facts[0].score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_later_duplicate_overrides_display_keeps_best_score() {
        let mut early = candidate("a", Some("https://example.com/x"), "FCA", 0.95);
        early.title = Some("Early title".to_string());
        let mut late = candidate("b", Some("https://example.com/x"), "FCA", 0.40);
        late.title = Some("Late title".to_string());
        late.snippet = "A different snippet altogether, fresher than the first.".to_string();

        let facts = fuse(&[(0, vec![early]), (1, vec![late])], &config());
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].title, "Late title");
        assert!((facts[0].score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_candidates_without_identity_are_dropped() {
        let mut anon = candidate("a", None, "FCA", 0.9);
        anon.source_id = None;
        anon.doc_id = None;
        let keyed = {
            let mut c = candidate("b", None, "FCA", 0.5);
            c.doc_id = Some("DOC-1".to_string());
            c
        };
        let facts = fuse(&[(0, vec![anon, keyed])], &config());
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].title, "Title b");
    }

    #[test]
    fn test_near_duplicate_collapse_by_title_and_snippet() {
        let mut a = candidate("a", Some("https://example.com/one"), "SEC", 0.9);
        let mut b = candidate("b", Some("https://example.com/two"), "SEC", 0.8);
        a.title = Some("Climate Disclosure Rule".to_string());
        b.title = Some("climate disclosure rule".to_string());
        let shared = "Identical snippet text shared by both syndicated copies.";
        a.snippet = shared.to_string();
        b.snippet = shared.to_string();

        let facts = fuse(&[(0, vec![a, b])], &config());
        assert_eq!(facts.len(), 1);
        // Distinct URLs, so this is the content collapse, not the key merge;
        // the earlier candidate is the one kept.
        assert_eq!(facts[0].url.as_deref(), Some("https://example.com/one"));
    }

    #[test]
    fn test_per_source_cap_keeps_best_scored() {
        let batch: Vec<Candidate> = (0..8)
            .map(|i| {
                candidate(
                    &format!("fca-{}", i),
                    Some(&format!("https://fca.org.uk/news/{}", i)),
                    "FCA",
                    0.9 - (i as f64) * 0.05,
                )
            })
            .collect();
        let facts = fuse(&[(0, batch)], &config());
        let fca_count = facts.iter().filter(|f| f.source_name == "FCA").count();
        assert_eq!(fca_count, 2);
        assert!((facts[0].score - 0.9).abs() < 1e-9);
        assert!((facts[1].score - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_max_facts_bound() {
        let batch: Vec<Candidate> = (0..20)
            .map(|i| {
                candidate(
                    &format!("c{}", i),
                    Some(&format!("https://example.com/{}", i)),
                    &format!("Source{}", i),
                    0.9 - (i as f64) * 0.01,
                )
            })
            .collect();
        let facts = fuse(&[(0, batch)], &config());
        assert_eq!(facts.len(), 6);
    }

    #[test]
    fn test_fusion_is_deterministic() {
        let batches = vec![
            (
                0,
                vec![
                    candidate("a", Some("https://example.com/a"), "S1", 0.7),
                    candidate("b", Some("https://example.com/b"), "S2", 0.7),
                ],
            ),
            (
                1,
                vec![
                    candidate("c", Some("https://example.com/c"), "S3", 0.7),
                    candidate("d", Some("https://example.com/a?utm=x"), "S1", 0.65),
                ],
            ),
        ];
        let first = fuse(&batches, &config());
        let second = fuse(&batches, &config());
        assert_eq!(first, second);
        // Equal scores break ties on canonical key ascending
        let keys: Vec<&str> = first.iter().map(|f| f.url.as_deref().unwrap()).collect();
        assert_eq!(keys[0], "https://example.com/a?utm=x");
    }

    #[test]
    fn test_batch_order_not_completion_order() {
        let early = candidate("a", Some("https://example.com/x"), "S1", 0.5);
        let late = candidate("b", Some("https://example.com/x"), "S1", 0.6);
        // Batches supplied out of order still merge variant 0 before 1
        let facts = fuse(
            &[(1, vec![late.clone()]), (0, vec![early.clone()])],
            &config(),
        );
        assert_eq!(facts[0].title, "Title b");
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://Example.com/Report?utm_source=x&page=2#section"),
            "https://example.com/report?page=2"
        );
        assert_eq!(
            normalize_url("https://example.com/report/"),
            "https://example.com/report"
        );
        assert_eq!(
            normalize_url("https://example.com/report?utm=a"),
            "https://example.com/report"
        );
    }

    #[test]
    fn test_truncate_short_snippet_unchanged() {
        assert_eq!(truncate_snippet("short text", 320), "short text");
    }

    #[test]
    fn test_truncate_cuts_at_word_boundary() {
        let text = "alpha beta gamma delta epsilon";
        let out = truncate_snippet(text, 13);
        assert_eq!(out, "alpha beta…");
        assert!(!out.contains("gam"));
    }

    #[test]
    fn test_truncate_never_splits_multibyte() {
        let text = "répété répété répété répété";
        let out = truncate_snippet(text, 10);
        assert!(out.ends_with('…'));
        assert!(text.starts_with(out.trim_end_matches('…').trim_end()));
    }

    #[test]
    fn test_truncate_single_long_word_kept_whole() {
        let text = "supercalifragilisticexpialidocious";
        assert_eq!(truncate_snippet(text, 10), text);
    }
}
