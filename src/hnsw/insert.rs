//! Graph construction: level sampling, the neighbor-selection heuristic,
//! and wiring a new slot into every layer it participates in.

use super::{Graph, search};
use rand::Rng;
use rand::rngs::StdRng;

/// Exponentially distributed layer assignment: `floor(-ln(u) * mult)`.
pub(crate) fn sample_level(rng: &mut StdRng, mult: f64) -> usize {
    let u: f64 = rng.r#gen::<f64>().max(f64::MIN_POSITIVE);
    (-u.ln() * mult) as usize
}

/// Layer-preserving neighbor selection.
///
/// `candidates` must be sorted ascending by distance to the target point.
/// Pops the closest candidate and admits it only if it is not closer to any
/// already-admitted neighbor than to the target. Bounds the list at `m`.
pub(crate) fn select_neighbors(
    graph: &Graph,
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<(f32, u32)> {
    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m.min(candidates.len()));
    for &(dist_to_target, slot) in candidates {
        if selected.len() >= m {
            break;
        }
        let candidate_bytes = graph.slot_bytes(slot);
        let mut keep = true;
        for &(_, chosen) in &selected {
            let dist_to_chosen = graph
                .space
                .stored_distance(candidate_bytes, graph.slot_bytes(chosen));
            if dist_to_chosen < dist_to_target {
                keep = false;
                break;
            }
        }
        if keep {
            selected.push((dist_to_target, slot));
        }
    }
    selected
}

/// Wire `slot` into the graph at `level`, writing its element bytes and
/// linking it bidirectionally on every layer from `min(level, max_level)`
/// down to 0.
///
/// Slots are reserved under the lookup lock but wired under the graph lock,
/// so wiring order need not match reservation order; the arrays grow to
/// whatever slot arrives first. Unwired placeholder slots are unreachable
/// (no links point at them and they are never the entry point). A reused
/// slot gets its stale adjacency dropped here.
#[allow(clippy::too_many_arguments)]
pub(crate) fn wire_slot(
    graph: &mut Graph,
    slot: u32,
    label: usize,
    level: usize,
    bytes: &[u8],
    ef_construction: usize,
    m: usize,
    max_m0: usize,
) {
    let size = graph.space.vector_byte_size();
    let needed = slot as usize + 1;
    if graph.slot_count() < needed {
        graph.elements.resize(needed * size, 0);
        graph.levels.resize(needed, 0);
        graph.labels.resize(needed, 0);
        graph.neighbors.resize_with(needed, Vec::new);
    }
    graph.levels[slot as usize] = level;
    graph.labels[slot as usize] = label;
    graph.neighbors[slot as usize] = vec![Vec::new(); level + 1];
    let start = slot as usize * size;
    graph.elements[start..start + size].copy_from_slice(bytes);

    let entry = match graph.entry_point {
        Some(entry) => entry,
        None => {
            graph.entry_point = Some(slot);
            graph.max_level = level;
            return;
        }
    };

    // Greedy descent through the layers above the insertion level.
    let mut current = entry;
    for layer in ((level + 1)..=graph.max_level).rev() {
        let g: &Graph = graph;
        let dist = |s: u32| g.space.stored_distance(bytes, g.slot_bytes(s));
        current = search::greedy_search(g, &dist, current, layer);
    }

    // Wire each layer from the insertion level down, running the
    // construction search with ef_construction width.
    for layer in (0..=level.min(graph.max_level)).rev() {
        let selected = {
            let g: &Graph = graph;
            let dist = |s: u32| g.space.stored_distance(bytes, g.slot_bytes(s));
            let mut candidates =
                search::search_layer(g, &dist, current, ef_construction, layer, &|_| true);
            candidates.retain(|&(_, s)| s != slot);
            select_neighbors(g, &candidates, m)
        };

        graph.neighbors[slot as usize][layer] =
            selected.iter().map(|&(_, s)| s).collect();
        if let Some(&(_, closest)) = selected.first() {
            current = closest;
        }

        let cap = if layer == 0 { max_m0 } else { m };
        for &(_, nb) in &selected {
            let overflowed = match graph.neighbors[nb as usize].get_mut(layer) {
                // A reused slot can leave stale in-links pointing at layers
                // the neighbor no longer has; skip those.
                None => continue,
                Some(links) => {
                    links.push(slot);
                    links.len() > cap
                }
            };

            if overflowed {
                let pruned: Vec<u32> = {
                    let g: &Graph = graph;
                    let nb_bytes = g.slot_bytes(nb);
                    let mut candidates: Vec<(f32, u32)> = g.neighbors[nb as usize][layer]
                        .iter()
                        .map(|&s| (g.space.stored_distance(nb_bytes, g.slot_bytes(s)), s))
                        .collect();
                    candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
                    select_neighbors(g, &candidates, cap)
                        .into_iter()
                        .map(|(_, s)| s)
                        .collect()
                };
                graph.neighbors[nb as usize][layer] = pruned;
            }
        }
    }

    if level > graph.max_level {
        graph.max_level = level;
        graph.entry_point = Some(slot);
    }
}
