//! Louvain Community Detection Algorithm
//!
//! Multi-level greedy modularity optimization over the relationship graph,
//! treated as undirected and weighted by each relationship's `confidence`.
//! Uses petgraph for the per-level graphs.
//!
//! Every step is deterministic: nodes are visited in entity-id order and ties
//! in modularity gain go to the community whose lowest member id is smallest,
//! so an unchanged graph always yields the same communities with the same ids.

use crate::domain::{Community, GraphSnapshot};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet, HashMap};

// =============================================================================
// Configuration
// =============================================================================

/// Parameters for community detection.
#[derive(Debug, Clone)]
pub struct LouvainConfig {
    /// Resolution parameter (higher = smaller communities)
    pub resolution: f64,
    /// Maximum aggregation levels
    pub max_levels: usize,
    /// Maximum local-moving passes per level
    pub max_passes: usize,
    /// Gains at or below this are treated as no improvement
    pub min_improvement: f64,
}

impl Default for LouvainConfig {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            max_levels: 10,
            max_passes: 100,
            min_improvement: 1e-12,
        }
    }
}

// =============================================================================
// Louvain Community Detector
// =============================================================================

/// Community detector using the Louvain method.
#[derive(Debug, Clone, Default)]
pub struct CommunityDetector {
    config: LouvainConfig,
}

impl CommunityDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LouvainConfig) -> Self {
        Self { config }
    }

    /// Partition every entity of the snapshot into exactly one community.
    ///
    /// Communities come back ordered by lowest member id, with ids
    /// `community-0`, `community-1`, ... in that order. Summaries are left
    /// empty for a summarizer to fill in.
    pub fn detect(&self, snapshot: &GraphSnapshot) -> Vec<Community> {
        let ids: BTreeSet<&str> = snapshot.entities.iter().map(|e| e.id.as_str()).collect();
        if ids.is_empty() {
            return Vec::new();
        }
        let ids: Vec<&str> = ids.into_iter().collect();

        let graph = build_graph(&ids, snapshot);
        let partition = self.partition(graph);

        let communities: Vec<Community> = partition
            .into_iter()
            .enumerate()
            .map(|(n, members)| {
                let member_entity_ids: BTreeSet<String> =
                    members.into_iter().map(|i| ids[i].to_string()).collect();
                Community {
                    id: format!("community-{n}"),
                    size: member_entity_ids.len(),
                    member_entity_ids,
                    summary: String::new(),
                }
            })
            .collect();

        tracing::info!(
            entities = ids.len(),
            communities = communities.len(),
            "Louvain detection complete"
        );
        communities
    }

    /// Run the level loop; returns groups of level-0 node indices, each
    /// sorted, ordered by their lowest index.
    fn partition(&self, mut graph: UnGraph<(), f64>) -> Vec<Vec<usize>> {
        // members[super_node] = level-0 nodes it contains
        let mut members: Vec<Vec<usize>> = (0..graph.node_count()).map(|i| vec![i]).collect();

        let two_m: f64 = degrees(&graph).iter().sum();
        if two_m <= 0.0 {
            return members;
        }

        for level in 0..self.config.max_levels {
            let (assignment, moved) = self.local_moving(&graph, two_m);
            if !moved {
                break;
            }
            let (next_graph, groups) = aggregate(&graph, &assignment);
            members = groups
                .into_iter()
                .map(|group| {
                    let mut merged: Vec<usize> =
                        group.into_iter().flat_map(|g| members[g].iter().copied()).collect();
                    merged.sort_unstable();
                    merged
                })
                .collect();
            tracing::debug!(level, communities = members.len(), "Louvain level aggregated");
            graph = next_graph;
        }
        members
    }

    /// One local-moving phase; returns the node → community label mapping
    /// and whether any node moved.
    fn local_moving(&self, graph: &UnGraph<(), f64>, two_m: f64) -> (Vec<usize>, bool) {
        let n = graph.node_count();
        let k = degrees(graph);
        let adjacency = neighbours(graph);
        let mut community: Vec<usize> = (0..n).collect();
        let mut tot: Vec<f64> = k.clone();
        let mut moved_any = false;

        for _ in 0..self.config.max_passes {
            let mut moved = false;
            for i in 0..n {
                let current = community[i];
                tot[current] -= k[i];

                // Weight from i into each neighbouring community.
                let mut k_in: BTreeMap<usize, f64> = BTreeMap::new();
                for &(j, w) in &adjacency[i] {
                    *k_in.entry(community[j]).or_insert(0.0) += w;
                }

                let gain = |c: usize, w: f64| w - self.config.resolution * tot[c] * k[i] / two_m;
                let stay = gain(current, k_in.get(&current).copied().unwrap_or(0.0));

                let mut best = current;
                let mut best_gain = stay;
                // Labels iterate ascending, so a strict `>` keeps the lowest label on ties
                // and never leaves the current community for an equal gain.
                for (&c, &w) in &k_in {
                    if c == current {
                        continue;
                    }
                    let g = gain(c, w);
                    if g > best_gain + self.config.min_improvement {
                        best = c;
                        best_gain = g;
                    }
                }

                community[i] = best;
                tot[best] += k[i];
                if best != current {
                    moved = true;
                    moved_any = true;
                }
            }
            if !moved {
                break;
            }
        }
        (community, moved_any)
    }
}

/// Level-0 graph: one node per entity in id order, parallel edges summed,
/// self-loops and dangling relationships dropped.
fn build_graph(ids: &[&str], snapshot: &GraphSnapshot) -> UnGraph<(), f64> {
    let index: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let mut weights: BTreeMap<(usize, usize), f64> = BTreeMap::new();

    for rel in &snapshot.relationships {
        let (Some(&a), Some(&b)) = (
            index.get(rel.source_id.as_str()),
            index.get(rel.target_id.as_str()),
        ) else {
            continue;
        };
        if a == b {
            continue;
        }
        let w = rel.weight();
        if w > 0.0 {
            *weights.entry((a.min(b), a.max(b))).or_insert(0.0) += w;
        }
    }

    let mut graph = UnGraph::with_capacity(ids.len(), weights.len());
    for _ in ids {
        graph.add_node(());
    }
    for ((a, b), w) in weights {
        graph.add_edge(NodeIndex::new(a), NodeIndex::new(b), w);
    }
    graph
}

/// Collapse communities into super-nodes. Super-nodes are numbered by the
/// lowest node they contain; intra-community weight becomes a self-loop.
fn aggregate(graph: &UnGraph<(), f64>, assignment: &[usize]) -> (UnGraph<(), f64>, Vec<Vec<usize>>) {
    let mut relabel: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (node, &c) in assignment.iter().enumerate() {
        let label = *relabel.entry(c).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[label].push(node);
    }

    let mut weights: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for edge in graph.edge_references() {
        let a = relabel[&assignment[edge.source().index()]];
        let b = relabel[&assignment[edge.target().index()]];
        *weights.entry((a.min(b), a.max(b))).or_insert(0.0) += *edge.weight();
    }

    let mut next = UnGraph::with_capacity(groups.len(), weights.len());
    for _ in &groups {
        next.add_node(());
    }
    for ((a, b), w) in weights {
        next.add_edge(NodeIndex::new(a), NodeIndex::new(b), w);
    }
    (next, groups)
}

/// Weighted degree per node; a self-loop counts twice.
fn degrees(graph: &UnGraph<(), f64>) -> Vec<f64> {
    let mut k = vec![0.0; graph.node_count()];
    for edge in graph.edge_references() {
        k[edge.source().index()] += *edge.weight();
        k[edge.target().index()] += *edge.weight();
    }
    k
}

/// Adjacency lists without self-loops.
fn neighbours(graph: &UnGraph<(), f64>) -> Vec<Vec<(usize, f64)>> {
    let mut adjacency = vec![Vec::new(); graph.node_count()];
    for edge in graph.edge_references() {
        let (a, b) = (edge.source().index(), edge.target().index());
        if a != b {
            adjacency[a].push((b, *edge.weight()));
            adjacency[b].push((a, *edge.weight()));
        }
    }
    adjacency
}
