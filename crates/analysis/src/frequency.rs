// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Bounded frequency memory over words, phrases and attribute keys.
//!
//! Three parallel maps share one capacity. When a batch of additions
//! pushes a map past `max_size`, pruning keeps the top 75% of the
//! capacity by (count desc, term asc): the hot terms survive, the long
//! tail is forgotten.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Fraction of `max_size` retained by a prune pass.
const PRUNE_KEEP_RATIO: f64 = 0.75;

/// One observed term with its running count and observation window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrequencyEntry {
    /// The observed term.
    pub term: String,
    /// Observation count; at least 1 while the entry exists.
    pub count: u64,
    /// First observation time.
    pub first_seen: DateTime<Utc>,
    /// Most recent observation time.
    pub last_seen: DateTime<Utc>,
}

/// Per-attribute-key statistics: the value histogram and totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeStats {
    /// The attribute key.
    pub key: String,
    /// Distinct values and their counts.
    pub unique_values: BTreeMap<String, u64>,
    /// Total observations of the key; equals the sum of `unique_values`.
    pub total_count: u64,
    /// First observation time.
    pub first_seen: DateTime<Utc>,
    /// Most recent observation time.
    pub last_seen: DateTime<Utc>,
}

/// An immutable, sorted copy of the three frequency views.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrequencySnapshot {
    /// Words by (count desc, term asc).
    pub words: Vec<FrequencyEntry>,
    /// Phrases by (count desc, term asc).
    pub phrases: Vec<FrequencyEntry>,
    /// Attribute keys by (unique-value count desc, key asc).
    pub attributes: Vec<AttributeStats>,
}

/// The bounded frequency maps. Single-writer: owned by the pipeline
/// consumer; everyone else sees [`FrequencySnapshot`] copies.
#[derive(Debug)]
pub struct FrequencyMemory {
    max_size: usize,
    words: HashMap<String, FrequencyEntry>,
    phrases: HashMap<String, FrequencyEntry>,
    attributes: HashMap<String, AttributeStats>,
}

impl FrequencyMemory {
    /// Creates the three maps with a shared capacity.
    #[must_use]
    pub fn new(max_size: usize) -> FrequencyMemory {
        FrequencyMemory {
            max_size,
            words: HashMap::new(),
            phrases: HashMap::new(),
            attributes: HashMap::new(),
        }
    }

    /// Records a batch of words observed at `now`.
    pub fn add_words<I, S>(&mut self, words: I, now: DateTime<Utc>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for word in words {
            bump(&mut self.words, word.as_ref(), now);
        }
        prune_entries(&mut self.words, self.max_size);
    }

    /// Records a batch of phrases observed at `now`.
    pub fn add_phrases<I, S>(&mut self, phrases: I, now: DateTime<Utc>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for phrase in phrases {
            bump(&mut self.phrases, phrase.as_ref(), now);
        }
        prune_entries(&mut self.phrases, self.max_size);
    }

    /// Records a batch of attribute key/value pairs observed at `now`.
    pub fn add_attributes(&mut self, attributes: &[(String, String)], now: DateTime<Utc>) {
        for (key, value) in attributes {
            let stats = self
                .attributes
                .entry(key.clone())
                .or_insert_with(|| AttributeStats {
                    key: key.clone(),
                    unique_values: BTreeMap::new(),
                    total_count: 0,
                    first_seen: now,
                    last_seen: now,
                });
            stats.total_count += 1;
            stats.last_seen = now;
            *stats.unique_values.entry(value.clone()).or_insert(0) += 1;
        }
        if self.attributes.len() > self.max_size {
            let keep = prune_target(self.max_size);
            let mut ranked: Vec<(String, u64)> = self
                .attributes
                .iter()
                .map(|(k, s)| (k.clone(), s.total_count))
                .collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            for (key, _) in ranked.into_iter().skip(keep) {
                let _ = self.attributes.remove(&key);
            }
        }
    }

    /// Deep-copied, sorted views of all three maps at one instant.
    #[must_use]
    pub fn snapshot(&self) -> FrequencySnapshot {
        let mut words: Vec<FrequencyEntry> = self.words.values().cloned().collect();
        words.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.term.cmp(&b.term)));
        let mut phrases: Vec<FrequencyEntry> = self.phrases.values().cloned().collect();
        phrases.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.term.cmp(&b.term)));
        let mut attributes: Vec<AttributeStats> = self.attributes.values().cloned().collect();
        attributes.sort_by(|a, b| {
            b.unique_values
                .len()
                .cmp(&a.unique_values.len())
                .then_with(|| a.key.cmp(&b.key))
        });
        FrequencySnapshot {
            words,
            phrases,
            attributes,
        }
    }

    /// Clears all three maps.
    pub fn reset(&mut self) {
        self.words.clear();
        self.phrases.clear();
        self.attributes.clear();
    }

    /// Current number of tracked words.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Current number of tracked phrases.
    #[must_use]
    pub fn phrase_count(&self) -> usize {
        self.phrases.len()
    }

    /// Current number of tracked attribute keys.
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }
}

fn bump(map: &mut HashMap<String, FrequencyEntry>, term: &str, now: DateTime<Utc>) {
    match map.get_mut(term) {
        Some(entry) => {
            entry.count += 1;
            entry.last_seen = now;
        }
        None => {
            let _ = map.insert(
                term.to_owned(),
                FrequencyEntry {
                    term: term.to_owned(),
                    count: 1,
                    first_seen: now,
                    last_seen: now,
                },
            );
        }
    }
}

fn prune_target(max_size: usize) -> usize {
    (max_size as f64 * PRUNE_KEEP_RATIO).floor() as usize
}

fn prune_entries(map: &mut HashMap<String, FrequencyEntry>, max_size: usize) {
    if map.len() <= max_size {
        return;
    }
    let keep = prune_target(max_size);
    let mut ranked: Vec<(String, u64)> = map
        .iter()
        .map(|(term, entry)| (term.clone(), entry.count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (term, _) in ranked.into_iter().skip(keep) {
        let _ = map.remove(&term);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn counts_and_seen_window() {
        let mut memory = FrequencyMemory::new(100);
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(5);
        memory.add_words(["disk"], t0);
        memory.add_words(["disk", "full"], t1);
        let snapshot = memory.snapshot();
        assert_eq!(snapshot.words[0].term, "disk");
        assert_eq!(snapshot.words[0].count, 2);
        assert_eq!(snapshot.words[0].first_seen, t0);
        assert_eq!(snapshot.words[0].last_seen, t1);
        assert_eq!(snapshot.words[1].term, "full");
        assert_eq!(snapshot.words[1].count, 1);
    }

    #[test]
    fn prune_keeps_top_three_quarters() {
        let mut memory = FrequencyMemory::new(10);
        let now = Utc::now();
        // One batch carrying 20 distinct words with counts 1..=20; the
        // prune pass runs once, after the batch.
        let mut batch = Vec::new();
        for i in 1..=20u64 {
            for _ in 0..i {
                batch.push(format!("w{i:02}"));
            }
        }
        memory.add_words(batch.iter().map(String::as_str), now);
        // floor(0.75 * 10) = 7 entries survive: counts 14..=20.
        assert_eq!(memory.word_count(), 7);
        let snapshot = memory.snapshot();
        let counts: Vec<u64> = snapshot.words.iter().map(|e| e.count).collect();
        assert_eq!(counts, vec![20, 19, 18, 17, 16, 15, 14]);
    }

    #[test]
    fn prune_ties_break_alphabetically() {
        let mut memory = FrequencyMemory::new(4);
        let now = Utc::now();
        for word in ["delta", "bravo", "echo", "alpha", "charlie"] {
            memory.add_words([word], now);
        }
        // All counts equal; floor(0.75 * 4) = 3 survive alphabetically.
        assert_eq!(memory.word_count(), 3);
        let snapshot = memory.snapshot();
        let terms: Vec<&str> = snapshot.words.iter().map(|e| e.term.as_str()).collect();
        assert_eq!(terms, vec!["alpha", "bravo", "charlie"]);
    }

    #[test]
    fn attribute_totals_match_value_sums() {
        let mut memory = FrequencyMemory::new(100);
        let now = Utc::now();
        memory.add_attributes(
            &[
                ("host".to_owned(), "web-1".to_owned()),
                ("host".to_owned(), "web-2".to_owned()),
                ("host".to_owned(), "web-1".to_owned()),
            ],
            now,
        );
        let snapshot = memory.snapshot();
        let host = &snapshot.attributes[0];
        assert_eq!(host.key, "host");
        assert_eq!(host.total_count, 3);
        assert_eq!(host.unique_values.len(), 2);
        assert_eq!(
            host.total_count,
            host.unique_values.values().sum::<u64>()
        );
    }

    #[test]
    fn attribute_sorting_by_unique_value_count() {
        let mut memory = FrequencyMemory::new(100);
        let now = Utc::now();
        memory.add_attributes(
            &[
                ("region".to_owned(), "eu".to_owned()),
                ("host".to_owned(), "a".to_owned()),
                ("host".to_owned(), "b".to_owned()),
            ],
            now,
        );
        let snapshot = memory.snapshot();
        assert_eq!(snapshot.attributes[0].key, "host");
        assert_eq!(snapshot.attributes[1].key, "region");
    }

    #[test]
    fn snapshot_is_detached_from_further_mutation() {
        let mut memory = FrequencyMemory::new(100);
        let now = Utc::now();
        memory.add_words(["stable"], now);
        let snapshot = memory.snapshot();
        memory.add_words(["stable"], now);
        assert_eq!(snapshot.words[0].count, 1);
        assert_eq!(memory.snapshot().words[0].count, 2);
    }

    #[test]
    fn reset_clears_everything() {
        let mut memory = FrequencyMemory::new(100);
        let now = Utc::now();
        memory.add_words(["w"], now);
        memory.add_phrases(["a b"], now);
        memory.add_attributes(&[("k".to_owned(), "v".to_owned())], now);
        memory.reset();
        assert_eq!(memory.word_count(), 0);
        assert_eq!(memory.phrase_count(), 0);
        assert_eq!(memory.attribute_count(), 0);
    }
}
