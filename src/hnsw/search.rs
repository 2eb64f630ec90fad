//! Graph search: greedy descent on the upper layers and beam search at the
//! bottom. Distance evaluation is abstracted over a closure so the same
//! traversal serves queries (possibly mixed precision) and construction.

use super::Graph;
use std::collections::{BinaryHeap, HashSet};

/// Candidate for exploration - min-heap ordering (closest first)
#[derive(Debug, Clone, Copy)]
struct MinCandidate {
    slot: u32,
    distance: f32,
}

impl PartialEq for MinCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.slot == other.slot
    }
}

impl Eq for MinCandidate {}

impl PartialOrd for MinCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MinCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (closest first when popped)
        other.distance.total_cmp(&self.distance)
    }
}

/// Result candidate - max-heap ordering (farthest first)
#[derive(Debug, Clone, Copy)]
struct MaxCandidate {
    slot: u32,
    distance: f32,
}

impl PartialEq for MaxCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.slot == other.slot
    }
}

impl Eq for MaxCandidate {}

impl PartialOrd for MaxCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MaxCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.total_cmp(&other.distance)
    }
}

/// Walk a single layer greedily toward the query: keep moving to the closest
/// neighbor until no neighbor improves on the current node.
pub(crate) fn greedy_search<F>(graph: &Graph, dist: &F, entry: u32, layer: usize) -> u32
where
    F: Fn(u32) -> f32,
{
    let mut current = entry;
    let mut current_dist = dist(current);
    loop {
        let mut improved = false;
        if let Some(links) = graph.neighbors[current as usize].get(layer) {
            for &nb in links {
                let d = dist(nb);
                if d < current_dist {
                    current = nb;
                    current_dist = d;
                    improved = true;
                }
            }
        }
        if !improved {
            return current;
        }
    }
}

/// Beam search at one layer with working-set width `ef`.
///
/// `admit` gates entry into the result set only: excluded slots (tombstones,
/// predicate misses) still act as waypoints, which mirrors filtering after
/// distance evaluation but before the result heap. Returns candidates in
/// ascending distance order.
pub(crate) fn search_layer<F, A>(
    graph: &Graph,
    dist: &F,
    entry: u32,
    ef: usize,
    layer: usize,
    admit: &A,
) -> Vec<(f32, u32)>
where
    F: Fn(u32) -> f32,
    A: Fn(u32) -> bool,
{
    let ef = ef.max(1);
    let mut visited: HashSet<u32> = HashSet::new();
    // candidates: explore closest first; results: peek() is the current worst
    let mut candidates: BinaryHeap<MinCandidate> = BinaryHeap::new();
    let mut results: BinaryHeap<MaxCandidate> = BinaryHeap::new();

    let entry_dist = dist(entry);
    visited.insert(entry);
    candidates.push(MinCandidate {
        slot: entry,
        distance: entry_dist,
    });
    if admit(entry) {
        results.push(MaxCandidate {
            slot: entry,
            distance: entry_dist,
        });
    }

    while let Some(MinCandidate { slot, distance }) = candidates.pop() {
        let worst = results.peek().map_or(f32::INFINITY, |c| c.distance);
        if distance > worst && results.len() >= ef {
            break;
        }

        if let Some(links) = graph.neighbors[slot as usize].get(layer) {
            for &nb in links {
                if !visited.insert(nb) {
                    continue;
                }
                let d = dist(nb);
                let worst = results.peek().map_or(f32::INFINITY, |c| c.distance);
                if d < worst || results.len() < ef {
                    candidates.push(MinCandidate {
                        slot: nb,
                        distance: d,
                    });
                    if admit(nb) {
                        results.push(MaxCandidate {
                            slot: nb,
                            distance: d,
                        });
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }
    }

    let mut out: Vec<(f32, u32)> = results
        .into_iter()
        .map(|c| (c.distance, c.slot))
        .collect();
    out.sort_by(|a, b| a.0.total_cmp(&b.0));
    out
}
