// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Online log template extraction over a bounded prefix tree.
//!
//! The tree dispatches on token count at the root and on the leading
//! tokens for the next `depth - 2` levels; leaves hold cluster lists. A
//! new message merges into the most similar cluster at its leaf when the
//! similarity clears the threshold, turning differing positions into the
//! `<*>` wildcard; otherwise it seeds a new cluster. Everything is
//! bounded: branching collapses into a wildcard sibling past
//! `max_children`, and leaves evict their least-recently-matched cluster
//! past `max_clusters`.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use tailscope_pdata::severity::{ALL_SEVERITIES, Severity};

/// The wildcard sentinel occupying variable template positions.
pub const WILDCARD: &str = "<*>";

/// How a wildcard renders in joined template strings.
const WILDCARD_DISPLAY: &str = "***";

/// Tuning parameters for one engine instance.
#[derive(Debug, Clone, Copy)]
pub struct DrainParams {
    /// Total tree depth, counting the root and leaf levels.
    pub depth: usize,
    /// Maximum children per interior node before collapsing to `<*>`.
    pub max_children: usize,
    /// Maximum clusters per leaf before LRU eviction.
    pub max_clusters: usize,
    /// Minimum similarity for merging into an existing cluster.
    pub similarity_threshold: f64,
}

impl Default for DrainParams {
    fn default() -> Self {
        DrainParams {
            depth: 8,
            max_children: 100,
            max_clusters: 1000,
            similarity_threshold: 0.4,
        }
    }
}

/// One extracted template and its population.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCluster {
    /// Synthetic cluster id, unique within one engine instance.
    pub id: u64,
    /// Template tokens; length is fixed for the cluster's lifetime, only
    /// literal positions may turn into wildcards.
    pub template_tokens: Vec<String>,
    /// Number of messages merged into this cluster.
    pub size: u64,
    /// Monotonic stamp of the last match, for LRU eviction.
    last_matched: u64,
}

impl LogCluster {
    fn render(&self) -> String {
        let mut out = String::new();
        for (i, token) in self.template_tokens.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            if token == WILDCARD {
                out.push_str(WILDCARD_DISPLAY);
            } else {
                out.push_str(token);
            }
        }
        out
    }
}

/// One row of a `top_patterns` answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternSummary {
    /// Joined template string with wildcards rendered as `***`.
    pub template: String,
    /// Messages represented by the template.
    pub size: u64,
    /// Share of all observations, in percent.
    pub percentage: f64,
}

#[derive(Debug, Default)]
struct Node {
    children: HashMap<String, Node>,
    clusters: Vec<LogCluster>,
}

/// An online drain clustering engine.
#[derive(Debug)]
pub struct DrainEngine {
    params: DrainParams,
    root: HashMap<usize, Node>,
    total_observations: u64,
    cluster_count: usize,
    next_cluster_id: u64,
    match_stamp: u64,
}

impl DrainEngine {
    /// Creates an engine with the given parameters.
    #[must_use]
    pub fn new(params: DrainParams) -> DrainEngine {
        DrainEngine {
            params,
            root: HashMap::new(),
            total_observations: 0,
            cluster_count: 0,
            next_cluster_id: 0,
            match_stamp: 0,
        }
    }

    /// Feeds one message through the tree, merging or seeding a cluster.
    pub fn observe(&mut self, message: &str) {
        let tokens: Vec<&str> = message.split_whitespace().collect();
        if tokens.is_empty() {
            return;
        }
        self.total_observations += 1;
        self.match_stamp += 1;

        let prefix_levels = self.params.depth.saturating_sub(2).min(tokens.len());
        let max_children = self.params.max_children;
        let mut node = self.root.entry(tokens.len()).or_default();
        for token in &tokens[..prefix_levels] {
            // Tokens carrying digits are variable by assumption and never
            // branch; they share the wildcard child, as does any literal
            // arriving once the branching bound is reached.
            let key = if *token == WILDCARD || token.chars().any(|c| c.is_ascii_digit()) {
                WILDCARD.to_owned()
            } else if node.children.contains_key(*token) || node.children.len() < max_children {
                (*token).to_owned()
            } else {
                WILDCARD.to_owned()
            };
            node = node.children.entry(key).or_default();
        }

        let stamp = self.match_stamp;
        let threshold = self.params.similarity_threshold;
        let best = node
            .clusters
            .iter_mut()
            .map(|cluster| (similarity(&cluster.template_tokens, &tokens), cluster))
            .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((score, cluster)) if score >= threshold => {
                for (position, token) in cluster.template_tokens.iter_mut().zip(&tokens) {
                    if position != token {
                        *position = WILDCARD.to_owned();
                    }
                }
                cluster.size += 1;
                cluster.last_matched = stamp;
            }
            _ => {
                if node.clusters.len() >= self.params.max_clusters {
                    if let Some(lru) = node
                        .clusters
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, c)| c.last_matched)
                        .map(|(i, _)| i)
                    {
                        let _ = node.clusters.remove(lru);
                        self.cluster_count -= 1;
                    }
                }
                node.clusters.push(LogCluster {
                    id: self.next_cluster_id,
                    template_tokens: tokens.iter().map(|t| (*t).to_owned()).collect(),
                    size: 1,
                    last_matched: stamp,
                });
                self.next_cluster_id += 1;
                self.cluster_count += 1;
            }
        }
    }

    /// The top-`k` clusters by (size desc, template asc); `k = 0` means
    /// all.
    #[must_use]
    pub fn top_patterns(&self, k: usize) -> Vec<PatternSummary> {
        let mut clusters: Vec<&LogCluster> = Vec::with_capacity(self.cluster_count);
        let mut stack: Vec<&Node> = self.root.values().collect();
        while let Some(node) = stack.pop() {
            clusters.extend(node.clusters.iter());
            stack.extend(node.children.values());
        }
        let mut summaries: Vec<PatternSummary> = clusters
            .into_iter()
            .map(|cluster| PatternSummary {
                template: cluster.render(),
                size: cluster.size,
                percentage: if self.total_observations == 0 {
                    0.0
                } else {
                    cluster.size as f64 * 100.0 / self.total_observations as f64
                },
            })
            .collect();
        summaries.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.template.cmp(&b.template)));
        if k > 0 {
            summaries.truncate(k);
        }
        summaries
    }

    /// `(cluster_count, total_observations)`.
    #[must_use]
    pub fn stats(&self) -> (usize, u64) {
        (self.cluster_count, self.total_observations)
    }

    /// Discards the tree and observation count; parameters survive.
    pub fn reset(&mut self) {
        self.root.clear();
        self.total_observations = 0;
        self.cluster_count = 0;
        self.next_cluster_id = 0;
        self.match_stamp = 0;
    }
}

/// Identical-position matches over length; wildcards count as matches.
fn similarity(template: &[String], tokens: &[&str]) -> f64 {
    if template.len() != tokens.len() || template.is_empty() {
        return 0.0;
    }
    let matches = template
        .iter()
        .zip(tokens)
        .filter(|(position, token)| *position == WILDCARD || position.as_str() == **token)
        .count();
    matches as f64 / template.len() as f64
}

/// The global engine plus one shard per normalized severity.
#[derive(Debug)]
pub struct TemplateEngines {
    global: DrainEngine,
    by_severity: BTreeMap<Severity, DrainEngine>,
}

impl TemplateEngines {
    /// Builds the global engine and all seven severity shards with the
    /// given parameter sets.
    #[must_use]
    pub fn new(global_params: DrainParams, shard_params: DrainParams) -> TemplateEngines {
        let by_severity = ALL_SEVERITIES
            .iter()
            .map(|severity| (*severity, DrainEngine::new(shard_params)))
            .collect();
        TemplateEngines {
            global: DrainEngine::new(global_params),
            by_severity,
        }
    }

    /// Feeds one message into the global engine and its severity shard.
    pub fn observe(&mut self, severity: Severity, message: &str) {
        self.global.observe(message);
        if let Some(shard) = self.by_severity.get_mut(&severity) {
            shard.observe(message);
        }
    }

    /// The global engine.
    #[must_use]
    pub fn global(&self) -> &DrainEngine {
        &self.global
    }

    /// The shard for one severity.
    #[must_use]
    pub fn shard(&self, severity: Severity) -> Option<&DrainEngine> {
        self.by_severity.get(&severity)
    }

    /// Top patterns per severity, keyed by severity token. Severities with
    /// no observations are omitted.
    #[must_use]
    pub fn patterns_by_severity(&self, k: usize) -> BTreeMap<String, Vec<PatternSummary>> {
        self.by_severity
            .iter()
            .filter(|(_, engine)| engine.stats().1 > 0)
            .map(|(severity, engine)| (severity.as_str().to_owned(), engine.top_patterns(k)))
            .collect()
    }

    /// Resets the global engine and every shard.
    pub fn reset(&mut self) {
        self.global.reset();
        for engine in self.by_severity.values_mut() {
            engine.reset();
        }
    }
}

impl Default for TemplateEngines {
    fn default() -> Self {
        // The global engine merges a little more aggressively than the
        // per-severity shards.
        let global = DrainParams::default();
        let shard = DrainParams {
            similarity_threshold: 0.5,
            ..DrainParams::default()
        };
        TemplateEngines::new(global, shard)
    }
}
