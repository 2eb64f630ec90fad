//! Query constraints and the planner/executor bridge.
//!
//! Best-index encodes the recognized constraints as a sequence of two-letter
//! short names (`ks`, `eq`, `in`); filter parses that sequence back,
//! materializes each constraint from its positional argument, folds the list
//! into a query plan, and executes it against the index.

use crate::error::{Error, Result};
use crate::hnsw::HnswIndex;
use crate::util::rowid_to_label;
use crate::vector::Vector;
use rusqlite::ffi;
use std::collections::HashSet;
use std::ffi::CStr;

/// Parameters built by the `knn_param()` SQL function and passed through the
/// engine's pointer mechanism into the `knn_search` constraint.
#[derive(Debug, Clone)]
pub struct KnnParam {
    /// Query vector, always float32 at this boundary.
    pub query_vector: Vector,
    pub k: u32,
    pub ef_search: Option<u32>,
}

/// Type tag identifying `KnnParam` pointers across
/// `sqlite3_result_pointer` / `sqlite3_value_pointer`.
pub const KNN_PARAM_POINTER_NAME: &CStr = c"vectorlite_knn_param";

pub const KNN_SHORT_NAME: &str = "ks";
pub const ROWID_EQUALS_SHORT_NAME: &str = "eq";
pub const ROWID_IN_SHORT_NAME: &str = "in";

/// One recognized WHERE-clause constraint. Constructed unmaterialized from
/// the plan string; the payload arrives during the filter phase.
#[derive(Debug)]
pub enum Constraint {
    KnnSearch { param: Option<KnnParam> },
    RowIdEquals { rowid: Option<usize> },
    RowIdIn { rowids: Option<HashSet<usize>> },
}

impl Constraint {
    pub fn short_name(&self) -> &'static str {
        match self {
            Constraint::KnnSearch { .. } => KNN_SHORT_NAME,
            Constraint::RowIdEquals { .. } => ROWID_EQUALS_SHORT_NAME,
            Constraint::RowIdIn { .. } => ROWID_IN_SHORT_NAME,
        }
    }

    pub fn materialized(&self) -> bool {
        match self {
            Constraint::KnnSearch { param } => param.is_some(),
            Constraint::RowIdEquals { rowid } => rowid.is_some(),
            Constraint::RowIdIn { rowids } => rowids.is_some(),
        }
    }

    /// Read this constraint's right-hand side from the positional argument
    /// the engine handed to the filter call.
    ///
    /// # Safety
    /// `arg` must be a valid `sqlite3_value` for the duration of the call.
    pub unsafe fn materialize(&mut self, arg: *mut ffi::sqlite3_value) -> Result<()> {
        match self {
            Constraint::KnnSearch { param } => {
                let ptr = unsafe {
                    ffi::sqlite3_value_pointer(arg, KNN_PARAM_POINTER_NAME.as_ptr())
                } as *const KnnParam;
                if ptr.is_null() {
                    return Err(Error::InvalidArgument(
                        "knn_param() should be used as the 2nd argument of knn_search()"
                            .to_string(),
                    ));
                }
                // The pointer value only lives for this statement; keep a copy.
                *param = Some(unsafe { (*ptr).clone() });
                Ok(())
            }
            Constraint::RowIdEquals { rowid } => {
                if unsafe { ffi::sqlite3_value_type(arg) } != ffi::SQLITE_INTEGER {
                    return Err(Error::InvalidArgument(
                        "rowid must be of type INTEGER".to_string(),
                    ));
                }
                *rowid = Some(rowid_to_label(unsafe { ffi::sqlite3_value_int64(arg) })?);
                Ok(())
            }
            Constraint::RowIdIn { rowids } => {
                let mut set = HashSet::new();
                let mut value: *mut ffi::sqlite3_value = std::ptr::null_mut();
                let mut rc = unsafe { ffi::sqlite3_vtab_in_first(arg, &mut value) };
                while rc == ffi::SQLITE_OK && !value.is_null() {
                    if unsafe { ffi::sqlite3_value_type(value) } != ffi::SQLITE_INTEGER {
                        return Err(Error::InvalidArgument(
                            "rowid must be of type INTEGER".to_string(),
                        ));
                    }
                    set.insert(rowid_to_label(unsafe { ffi::sqlite3_value_int64(value) })?);
                    rc = unsafe { ffi::sqlite3_vtab_in_next(arg, &mut value) };
                }
                if rc != ffi::SQLITE_OK && rc != ffi::SQLITE_DONE {
                    return Err(Error::Internal(format!(
                        "iterating the rowid IN set failed with code {rc}"
                    )));
                }
                *rowids = Some(set);
                Ok(())
            }
        }
    }
}

/// Rebuild the constraint list from the short-name sequence emitted by
/// best-index.
pub fn parse_short_names(plan_str: &str) -> Result<Vec<Constraint>> {
    if plan_str.len() % 2 != 0 {
        return Err(Error::InvalidArgument(format!(
            "constraint string must have even length: {plan_str}"
        )));
    }
    let mut constraints = Vec::with_capacity(plan_str.len() / 2);
    let bytes = plan_str.as_bytes();
    for i in (0..bytes.len()).step_by(2) {
        let short_name = &plan_str[i..i + 2];
        constraints.push(match short_name {
            KNN_SHORT_NAME => Constraint::KnnSearch { param: None },
            ROWID_EQUALS_SHORT_NAME => Constraint::RowIdEquals { rowid: None },
            ROWID_IN_SHORT_NAME => Constraint::RowIdIn { rowids: None },
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "unknown constraint short name: {short_name}"
                )));
            }
        });
    }
    Ok(constraints)
}

/// The composed, executable form of a constraint list: at most one vector
/// constraint and at most one rowid constraint.
pub struct QueryPlan<'a> {
    knn: Option<&'a KnnParam>,
    rowid: Option<RowIdFilter<'a>>,
}

enum RowIdFilter<'a> {
    Equals(usize),
    In(&'a HashSet<usize>),
}

impl<'a> QueryPlan<'a> {
    pub fn knn_param(&self) -> Option<&'a KnnParam> {
        self.knn
    }
}

/// Fold a slice of materialized constraints into a query plan. A second
/// vector constraint is `AlreadyExists`; a second rowid constraint of either
/// kind is `InvalidArgument`; an unmaterialized constraint is
/// `FailedPrecondition`.
pub fn compose_plan(constraints: &[Constraint]) -> Result<QueryPlan<'_>> {
    let mut plan = QueryPlan {
        knn: None,
        rowid: None,
    };
    for constraint in constraints {
        if !constraint.materialized() {
            return Err(Error::FailedPrecondition(format!(
                "{} constraint was not materialized",
                constraint.short_name()
            )));
        }
        match constraint {
            Constraint::KnnSearch { param } => {
                if plan.knn.is_some() {
                    return Err(Error::AlreadyExists(
                        "only one knn_search constraint is allowed".to_string(),
                    ));
                }
                plan.knn = param.as_ref();
            }
            Constraint::RowIdEquals { rowid } => {
                if plan.rowid.is_some() {
                    return Err(Error::InvalidArgument(
                        "only one rowid constraint is allowed".to_string(),
                    ));
                }
                plan.rowid = Some(RowIdFilter::Equals(rowid.expect("checked materialized")));
            }
            Constraint::RowIdIn { rowids } => {
                if plan.rowid.is_some() {
                    return Err(Error::InvalidArgument(
                        "only one rowid constraint is allowed".to_string(),
                    ));
                }
                plan.rowid = Some(RowIdFilter::In(
                    rowids.as_ref().expect("checked materialized"),
                ));
            }
        }
    }
    Ok(plan)
}

/// Execute a composed plan: the vector path runs a filtered KNN search, the
/// rowid-only path probes liveness and emits distance 0 rows.
pub fn execute_plan(index: &HnswIndex, plan: &QueryPlan<'_>) -> Result<Vec<(f32, usize)>> {
    match plan.knn {
        Some(param) => {
            let query = param.query_vector.as_f32_slice();
            let k = param.k as usize;
            let ef = param.ef_search.map(|ef| ef as usize);
            match &plan.rowid {
                None => index.knn(query, k, ef, None),
                Some(RowIdFilter::Equals(rowid)) => {
                    let rowid = *rowid;
                    let pred = move |label: usize| label == rowid;
                    index.knn(query, k, ef, Some(&pred))
                }
                Some(RowIdFilter::In(rowids)) => {
                    let pred = |label: usize| rowids.contains(&label);
                    index.knn(query, k, ef, Some(&pred))
                }
            }
        }
        None => {
            let mut result = Vec::new();
            match &plan.rowid {
                Some(RowIdFilter::Equals(rowid)) => {
                    if index.is_live(*rowid) {
                        result.push((0.0, *rowid));
                    }
                }
                Some(RowIdFilter::In(rowids)) => {
                    let mut live: Vec<usize> = rowids
                        .iter()
                        .copied()
                        .filter(|&rowid| index.is_live(rowid))
                        .collect();
                    live.sort_unstable();
                    result.extend(live.into_iter().map(|rowid| (0.0, rowid)));
                }
                None => {}
            }
            Ok(result)
        }
    }
}
