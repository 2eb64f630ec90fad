//! In-memory HNSW (Hierarchical Navigable Small World) index.
//!
//! Labels are the SQL rowids; slots are the internal array positions data
//! and adjacency live at. The label→slot map and the tombstone bitset are
//! guarded by the label-lookup mutex; the element arena and adjacency
//! arrays sit behind a read/write lock (concurrent readers, coarsely
//! serialized writers); a fixed striped pool of per-label mutexes
//! serializes writers that target the same label. `knn` takes no label
//! locks; it snapshots the tombstone set from the lookup once and
//! traverses under the read lock.

pub mod insert;
pub mod search;

use crate::error::{Error, Result};
use crate::index_options::IndexOptions;
use crate::space::VectorSpace;
use crate::vector::{Vector, VectorView};
use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default query-time expansion width when the caller never calls `set_ef`
/// and passes no per-query override.
const DEFAULT_EF: usize = 10;

const STRIPE_COUNT: usize = 64;

/// Per-slot deletion flags, packed one bit per slot.
#[derive(Debug, Clone, Default)]
pub(crate) struct TombstoneSet {
    words: Vec<u64>,
}

impl TombstoneSet {
    pub(crate) fn contains(&self, slot: usize) -> bool {
        self.words
            .get(slot >> 6)
            .is_some_and(|w| w & (1u64 << (slot & 63)) != 0)
    }

    pub(crate) fn set(&mut self, slot: usize) {
        let word = slot >> 6;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (slot & 63);
    }

    pub(crate) fn clear(&mut self, slot: usize) {
        if let Some(w) = self.words.get_mut(slot >> 6) {
            *w &= !(1u64 << (slot & 63));
        }
    }
}

/// Graph state: element arena, adjacency, levels, slot→label table.
/// Addressed by slot index throughout.
pub(crate) struct Graph {
    pub(crate) space: VectorSpace,
    /// Slot-major element storage, `vector_byte_size()` bytes per slot.
    pub(crate) elements: Vec<u8>,
    /// Top layer of each slot.
    pub(crate) levels: Vec<usize>,
    /// `neighbors[slot][layer]` is the adjacency list at that layer.
    pub(crate) neighbors: Vec<Vec<Vec<u32>>>,
    /// Slot → label. Only meaningful for slots that have been wired.
    pub(crate) labels: Vec<usize>,
    pub(crate) entry_point: Option<u32>,
    pub(crate) max_level: usize,
}

impl Graph {
    pub(crate) fn slot_count(&self) -> usize {
        self.levels.len()
    }

    pub(crate) fn slot_bytes(&self, slot: u32) -> &[u8] {
        let size = self.space.vector_byte_size();
        let start = slot as usize * size;
        &self.elements[start..start + size]
    }

    fn write_slot_bytes(&mut self, slot: u32, bytes: &[u8]) {
        let size = self.space.vector_byte_size();
        let start = slot as usize * size;
        self.elements[start..start + size].copy_from_slice(bytes);
    }
}

/// Label→slot map plus everything that decides liveness. A label is present
/// in the index iff it is in `map` and its slot is not tombstoned.
struct LabelLookup {
    map: HashMap<usize, u32>,
    tombstones: TombstoneSet,
    /// Tombstoned slots eligible for reuse, with the label that used to own
    /// them. Only populated when `allow_replace_deleted` is on.
    free_slots: Vec<(u32, usize)>,
    next_slot: usize,
    live_count: usize,
}

enum Placement {
    /// Overwrite the element bytes of a slot that stays wired as-is.
    InPlace(u32),
    /// Wire a fresh slot into the graph.
    Wire(u32),
}

pub struct HnswIndex {
    space: VectorSpace,
    max_elements: usize,
    m: usize,
    max_m0: usize,
    ef_construction: usize,
    allow_replace_deleted: bool,
    level_mult: f64,
    query_ef: AtomicUsize,
    rng: Mutex<StdRng>,
    graph: RwLock<Graph>,
    lookup: Mutex<LabelLookup>,
    stripes: Vec<Mutex<()>>,
}

impl HnswIndex {
    pub fn new(space: VectorSpace, options: &IndexOptions) -> Self {
        let m = options.m.max(2);
        HnswIndex {
            space,
            max_elements: options.max_elements,
            m,
            max_m0: m * 2,
            ef_construction: options.ef_construction.max(m),
            allow_replace_deleted: options.allow_replace_deleted,
            level_mult: 1.0 / (m as f64).ln(),
            query_ef: AtomicUsize::new(DEFAULT_EF),
            rng: Mutex::new(StdRng::seed_from_u64(options.random_seed)),
            graph: RwLock::new(Graph {
                space,
                elements: Vec::new(),
                levels: Vec::new(),
                neighbors: Vec::new(),
                labels: Vec::new(),
                entry_point: None,
                max_level: 0,
            }),
            lookup: Mutex::new(LabelLookup {
                map: HashMap::new(),
                tombstones: TombstoneSet::default(),
                free_slots: Vec::new(),
                next_slot: 0,
                live_count: 0,
            }),
            stripes: (0..STRIPE_COUNT).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn space(&self) -> &VectorSpace {
        &self.space
    }

    pub fn dimension(&self) -> usize {
        self.space.dim
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    /// Number of live (non-tombstoned) labels.
    pub fn live_count(&self) -> usize {
        self.lookup.lock().live_count
    }

    /// True iff the label is in the lookup and not tombstoned.
    pub fn is_live(&self, label: usize) -> bool {
        let lookup = self.lookup.lock();
        match lookup.map.get(&label) {
            Some(&slot) => !lookup.tombstones.contains(slot as usize),
            None => false,
        }
    }

    /// Update the query-time expansion width used when a caller does not
    /// override it per query.
    pub fn set_ef(&self, ef: usize) {
        self.query_ef.store(ef.max(1), Ordering::Relaxed);
    }

    fn stripe(&self, label: usize) -> &Mutex<()> {
        &self.stripes[label % STRIPE_COUNT]
    }

    /// Insert `v` under `label`.
    ///
    /// - a live duplicate label fails with `AlreadyExists` unless
    ///   `replace_if_tombstoned` is set, in which case the stored vector is
    ///   overwritten in place (the SQL UPDATE path);
    /// - a tombstoned label is revived in place when `replace_if_tombstoned`
    ///   is set and fails with `AlreadyExists` otherwise;
    /// - an absent label takes the next slot, or reuses an arbitrary
    ///   tombstoned slot when `allow_replace_deleted` is on, and fails with
    ///   `ResourceExhausted` once `max_elements` slots exist.
    ///
    /// On failure the index is unchanged.
    pub fn insert(&self, v: VectorView<'_>, label: usize, replace_if_tombstoned: bool) -> Result<()> {
        let stored = self.space.prepare_stored(v)?;

        let _label_guard = self.stripe(label).lock();

        let placement = {
            let mut lookup = self.lookup.lock();
            match lookup.map.get(&label).copied() {
                Some(slot) => {
                    let tombstoned = lookup.tombstones.contains(slot as usize);
                    if !replace_if_tombstoned {
                        return Err(if tombstoned {
                            Error::AlreadyExists(format!(
                                "label {label} was deleted; reinsertion requires replacement"
                            ))
                        } else {
                            Error::AlreadyExists(format!("label {label} already exists"))
                        });
                    }
                    if tombstoned {
                        lookup.tombstones.clear(slot as usize);
                        lookup.free_slots.retain(|&(s, _)| s != slot);
                        lookup.live_count += 1;
                    }
                    Placement::InPlace(slot)
                }
                None => {
                    if self.allow_replace_deleted && !lookup.free_slots.is_empty() {
                        let (slot, old_label) = lookup.free_slots.pop().expect("checked non-empty");
                        lookup.map.remove(&old_label);
                        // Stays tombstoned until published below, so a
                        // concurrent search cannot surface the old label.
                        Placement::Wire(slot)
                    } else if lookup.next_slot < self.max_elements {
                        let slot = lookup.next_slot as u32;
                        lookup.next_slot += 1;
                        Placement::Wire(slot)
                    } else {
                        return Err(Error::ResourceExhausted(format!(
                            "index is full: max_elements is {}",
                            self.max_elements
                        )));
                    }
                }
            }
        };

        match placement {
            Placement::InPlace(slot) => {
                let mut graph = self.graph.write();
                graph.write_slot_bytes(slot, stored.to_blob());
            }
            Placement::Wire(slot) => {
                let level = {
                    let mut rng = self.rng.lock();
                    insert::sample_level(&mut rng, self.level_mult)
                };

                {
                    let mut graph = self.graph.write();
                    insert::wire_slot(
                        &mut graph,
                        slot,
                        label,
                        level,
                        stored.to_blob(),
                        self.ef_construction,
                        self.m,
                        self.max_m0,
                    );
                }

                let mut lookup = self.lookup.lock();
                lookup.tombstones.clear(slot as usize);
                lookup.map.insert(label, slot);
                lookup.live_count += 1;
            }
        }

        Ok(())
    }

    /// Turn a live label into a tombstone. The slot and its adjacency are
    /// retained; the label becomes invisible to searches and fetches.
    pub fn mark_delete(&self, label: usize) -> Result<()> {
        let _label_guard = self.stripe(label).lock();
        let mut lookup = self.lookup.lock();

        let slot = match lookup.map.get(&label).copied() {
            Some(slot) if !lookup.tombstones.contains(slot as usize) => slot,
            _ => {
                return Err(Error::NotFound(format!(
                    "label {label} is not in the index"
                )));
            }
        };

        lookup.tombstones.set(slot as usize);
        lookup.live_count -= 1;
        if self.allow_replace_deleted {
            lookup.free_slots.push((slot, label));
        }
        Ok(())
    }

    /// Read back the stored vector for a live label. For cosine spaces this
    /// is the normalized form; the raw input is never kept.
    pub fn get_vector(&self, label: usize) -> Result<Vector> {
        let slot = {
            let lookup = self.lookup.lock();
            match lookup.map.get(&label).copied() {
                Some(slot) if !lookup.tombstones.contains(slot as usize) => slot,
                _ => {
                    return Err(Error::NotFound(format!(
                        "label {label} is not in the index"
                    )));
                }
            }
        };

        let graph = self.graph.read();
        Ok(Vector::from_blob(graph.slot_bytes(slot), self.space.element_type)
            .expect("stored slots always hold a whole vector"))
    }

    /// k-nearest-neighbor search.
    ///
    /// `query` is an f32 vector of the space's dimension; normalization (for
    /// cosine) and any precision conversion happen here, once. `ef` overrides
    /// the default expansion width for this query only. The predicate, if
    /// given, filters candidates by label after distance evaluation but
    /// before the result set admits them; tombstoned slots are always
    /// excluded. Results come back ascending by distance, ties broken by
    /// ascending label; `k` is silently clamped to the number of live
    /// elements.
    pub fn knn(
        &self,
        query: &[f32],
        k: usize,
        ef: Option<usize>,
        predicate: Option<&dyn Fn(usize) -> bool>,
    ) -> Result<Vec<(f32, usize)>> {
        let query = self.space.prepare_query(query)?;
        let ef = ef.unwrap_or_else(|| self.query_ef.load(Ordering::Relaxed));

        let (tombstones, live_count) = {
            let lookup = self.lookup.lock();
            (lookup.tombstones.clone(), lookup.live_count)
        };

        let k = k.min(live_count);
        if k == 0 {
            return Ok(Vec::new());
        }

        let graph = self.graph.read();
        let entry = match graph.entry_point {
            Some(entry) => entry,
            None => return Ok(Vec::new()),
        };

        let dist = |slot: u32| self.space.query_distance(&query, graph.slot_bytes(slot));

        let mut current = entry;
        for layer in (1..=graph.max_level).rev() {
            current = search::greedy_search(&graph, &dist, current, layer);
        }

        let admit = |slot: u32| {
            if tombstones.contains(slot as usize) {
                return false;
            }
            match predicate {
                Some(pred) => pred(graph.labels[slot as usize]),
                None => true,
            }
        };
        let working = ef.max(k);
        let mut results = search::search_layer(&graph, &dist, current, working, 0, &admit);

        results.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| graph.labels[a.1 as usize].cmp(&graph.labels[b.1 as usize]))
        });
        results.truncate(k);

        Ok(results
            .into_iter()
            .map(|(d, slot)| (d, graph.labels[slot as usize]))
            .collect())
    }
}
