//! The `vectorlite` virtual-table module.
//!
//! Implemented against the raw `sqlite3_module` protocol because the pieces
//! this table depends on (function constraints routed through
//! `xFindFunction`, pointer-valued arguments, and one-shot materialization
//! of `rowid IN (...)` via `sqlite3_vtab_in`) are properties of the
//! C-level virtual-table interface.
//!
//! Layout contract: `VirtualTable` and `Cursor` start with the base structs
//! SQLite owns, so the pointers SQLite hands back can be cast to our types.

use crate::constraint::{self, KnnParam};
use crate::error::{Error, Result};
use crate::hnsw::HnswIndex;
use crate::index_options::IndexOptions;
use crate::space::NamedVectorSpace;
use crate::util::{label_to_rowid, rowid_to_label};
use crate::vector::{Vector, VectorView};
use rusqlite::{Connection, ffi};
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::sync::OnceLock;
use tracing::debug;

/// Column order declared to the engine: the vector column first, then the
/// hidden `distance` column populated by KNN queries.
const COLUMN_VECTOR: c_int = 0;
const COLUMN_DISTANCE: c_int = 1;

#[repr(C)]
struct VirtualTable {
    /// Must be first: SQLite reads and writes this header.
    base: ffi::sqlite3_vtab,
    space: NamedVectorSpace,
    index: HnswIndex,
}

#[repr(C)]
struct Cursor {
    /// Must be first: SQLite reads and writes this header.
    base: ffi::sqlite3_vtab_cursor,
    result: Vec<(f32, usize)>,
    position: usize,
    /// Cursor-owned copy of the query vector, when the plan had one.
    query: Option<Vector>,
}

impl Cursor {
    fn vtab(&self) -> &VirtualTable {
        unsafe { &*(self.base.pVtab as *const VirtualTable) }
    }

    fn current(&self) -> Option<(f32, usize)> {
        self.result.get(self.position).copied()
    }
}

/// Register the `vectorlite` module on a connection.
pub fn register_module(db: &Connection) -> Result<()> {
    let rc = unsafe {
        ffi::sqlite3_create_module_v2(
            db.handle(),
            c"vectorlite".as_ptr(),
            module(),
            std::ptr::null_mut(),
            None,
        )
    };
    if rc != ffi::SQLITE_OK {
        return Err(Error::Internal(format!(
            "failed to create module vectorlite: error code {rc}"
        )));
    }
    Ok(())
}

fn module() -> &'static ffi::sqlite3_module {
    static MODULE: OnceLock<ffi::sqlite3_module> = OnceLock::new();
    MODULE.get_or_init(|| {
        // Zeroed means "hook not provided" for every field we don't set.
        let mut module: ffi::sqlite3_module = unsafe { std::mem::zeroed() };
        module.iVersion = 3;
        module.xCreate = Some(vtab_create);
        module.xConnect = Some(vtab_connect);
        module.xBestIndex = Some(vtab_best_index);
        module.xDisconnect = Some(vtab_disconnect);
        module.xDestroy = Some(vtab_disconnect);
        module.xOpen = Some(vtab_open);
        module.xClose = Some(vtab_close);
        module.xFilter = Some(vtab_filter);
        module.xNext = Some(vtab_next);
        module.xEof = Some(vtab_eof);
        module.xColumn = Some(vtab_column);
        module.xRowid = Some(vtab_rowid);
        module.xUpdate = Some(vtab_update);
        module.xFindFunction = Some(vtab_find_function);
        module
    })
}

unsafe fn set_creation_error(pz_err: *mut *mut c_char, msg: &str) {
    let msg = CString::new(msg.replace('\0', " ")).unwrap_or_default();
    unsafe { *pz_err = ffi::sqlite3_mprintf(c"%s".as_ptr(), msg.as_ptr()) };
}

unsafe fn set_vtab_error(vtab: *mut ffi::sqlite3_vtab, msg: &str) {
    unsafe {
        if !(*vtab).zErrMsg.is_null() {
            ffi::sqlite3_free((*vtab).zErrMsg as *mut c_void);
        }
        let msg = CString::new(msg.replace('\0', " ")).unwrap_or_default();
        (*vtab).zErrMsg = ffi::sqlite3_mprintf(c"%s".as_ptr(), msg.as_ptr());
    }
}

/// Create and connect share an implementation: the index lives in memory,
/// so there is nothing persistent to distinguish them.
unsafe extern "C" fn vtab_create(
    db: *mut ffi::sqlite3,
    aux: *mut c_void,
    argc: c_int,
    argv: *const *const c_char,
    pp_vtab: *mut *mut ffi::sqlite3_vtab,
    pz_err: *mut *mut c_char,
) -> c_int {
    unsafe { vtab_connect(db, aux, argc, argv, pp_vtab, pz_err) }
}

unsafe extern "C" fn vtab_connect(
    db: *mut ffi::sqlite3,
    _aux: *mut c_void,
    argc: c_int,
    argv: *const *const c_char,
    pp_vtab: *mut *mut ffi::sqlite3_vtab,
    pz_err: *mut *mut c_char,
) -> c_int {
    let rc = unsafe { ffi::sqlite3_vtab_config(db, ffi::SQLITE_VTAB_CONSTRAINT_SUPPORT, 1 as c_int) };
    if rc != ffi::SQLITE_OK {
        return rc;
    }

    // argv: module name, database name, table name, then the module args:
    // the vector declaration and the hnsw option string.
    if argc != 5 {
        unsafe {
            set_creation_error(
                pz_err,
                &format!(
                    "vectorlite expects 2 arguments (vector declaration, hnsw options), got {}",
                    (argc - 3).max(0)
                ),
            );
        }
        return ffi::SQLITE_ERROR;
    }

    let args = unsafe { std::slice::from_raw_parts(argv, argc as usize) };
    let arg_str = |i: usize| -> Result<&str> {
        unsafe { CStr::from_ptr(args[i]) }
            .to_str()
            .map_err(|_| Error::InvalidArgument("module arguments must be UTF-8".to_string()))
    };

    let result: Result<Box<VirtualTable>> = (|| {
        let space = NamedVectorSpace::parse(arg_str(3)?)?;
        let options = IndexOptions::parse(arg_str(4)?)?;
        let index = HnswIndex::new(space.space, &options);
        Ok(Box::new(VirtualTable {
            base: unsafe { std::mem::zeroed() },
            space,
            index,
        }))
    })();

    let vtab = match result {
        Ok(vtab) => vtab,
        Err(e) => {
            unsafe { set_creation_error(pz_err, &format!("failed to create virtual table: {e}")) };
            return ffi::SQLITE_ERROR;
        }
    };

    let schema = format!(
        "CREATE TABLE x({}, distance REAL hidden)",
        vtab.space.vector_name
    );
    let schema = match CString::new(schema) {
        Ok(schema) => schema,
        Err(_) => return ffi::SQLITE_ERROR,
    };
    let rc = unsafe { ffi::sqlite3_declare_vtab(db, schema.as_ptr()) };
    if rc != ffi::SQLITE_OK {
        return rc;
    }

    debug!(
        table = %vtab.space.vector_name,
        dim = vtab.space.space.dim,
        metric = vtab.space.space.metric.as_str(),
        max_elements = vtab.index.max_elements(),
        "vectorlite table connected"
    );

    unsafe { *pp_vtab = Box::into_raw(vtab) as *mut ffi::sqlite3_vtab };
    ffi::SQLITE_OK
}

unsafe extern "C" fn vtab_disconnect(p_vtab: *mut ffi::sqlite3_vtab) -> c_int {
    drop(unsafe { Box::from_raw(p_vtab as *mut VirtualTable) });
    ffi::SQLITE_OK
}

unsafe extern "C" fn vtab_open(
    _p_vtab: *mut ffi::sqlite3_vtab,
    pp_cursor: *mut *mut ffi::sqlite3_vtab_cursor,
) -> c_int {
    let cursor = Box::new(Cursor {
        base: unsafe { std::mem::zeroed() },
        result: Vec::new(),
        position: 0,
        query: None,
    });
    unsafe { *pp_cursor = Box::into_raw(cursor) as *mut ffi::sqlite3_vtab_cursor };
    ffi::SQLITE_OK
}

unsafe extern "C" fn vtab_close(p_cursor: *mut ffi::sqlite3_vtab_cursor) -> c_int {
    drop(unsafe { Box::from_raw(p_cursor as *mut Cursor) });
    ffi::SQLITE_OK
}

/// Walk the usable constraints, record the recognized ones in plan-string
/// order, and assign their positional argument slots. A WHERE clause with
/// nothing we recognize is rejected outright.
unsafe extern "C" fn vtab_best_index(
    _p_vtab: *mut ffi::sqlite3_vtab,
    p_info: *mut ffi::sqlite3_index_info,
) -> c_int {
    let info = unsafe { &mut *p_info };
    let n = info.nConstraint.max(0) as usize;
    let constraints = unsafe { std::slice::from_raw_parts(info.aConstraint, n) };
    let usage = unsafe { std::slice::from_raw_parts_mut(info.aConstraintUsage, n) };

    let mut plan = String::new();
    let mut argv_index: c_int = 1;
    for (i, c) in constraints.iter().enumerate() {
        if c.usable == 0 {
            continue;
        }
        let op = i32::from(c.op);
        if c.iColumn == COLUMN_VECTOR
            && (op >= ffi::SQLITE_INDEX_CONSTRAINT_FUNCTION
                || op == ffi::SQLITE_INDEX_CONSTRAINT_MATCH)
        {
            plan.push_str(constraint::KNN_SHORT_NAME);
            usage[i].argvIndex = argv_index;
            usage[i].omit = 1;
            argv_index += 1;
        } else if c.iColumn == -1 && op == ffi::SQLITE_INDEX_CONSTRAINT_EQ {
            // rowid constraint; ask the engine whether this is an IN that
            // can be handed over in a single materialization call
            if unsafe { ffi::sqlite3_vtab_in(p_info, i as c_int, -1) } != 0 {
                unsafe { ffi::sqlite3_vtab_in(p_info, i as c_int, 1) };
                plan.push_str(constraint::ROWID_IN_SHORT_NAME);
            } else {
                plan.push_str(constraint::ROWID_EQUALS_SHORT_NAME);
            }
            usage[i].argvIndex = argv_index;
            usage[i].omit = 1;
            argv_index += 1;
        }
    }

    if plan.is_empty() {
        return ffi::SQLITE_CONSTRAINT;
    }

    if plan.contains(constraint::KNN_SHORT_NAME) {
        info.estimatedCost = 1.0;
        info.estimatedRows = 10;
    } else if plan.contains(constraint::ROWID_EQUALS_SHORT_NAME) {
        info.estimatedCost = 10.0;
        info.estimatedRows = 1;
    } else {
        info.estimatedCost = 100.0;
        info.estimatedRows = 10;
    }

    debug!(plan = %plan, "vectorlite query plan");

    let plan = match CString::new(plan) {
        Ok(plan) => plan,
        Err(_) => return ffi::SQLITE_ERROR,
    };
    info.idxNum = 0;
    info.idxStr = unsafe { ffi::sqlite3_mprintf(c"%s".as_ptr(), plan.as_ptr()) };
    info.needToFreeIdxStr = 1;
    ffi::SQLITE_OK
}

unsafe fn run_filter(
    vtab: &VirtualTable,
    cursor: &mut Cursor,
    plan_str: &str,
    args: &[*mut ffi::sqlite3_value],
) -> Result<()> {
    let mut constraints = constraint::parse_short_names(plan_str)?;
    if constraints.len() != args.len() {
        return Err(Error::Internal(format!(
            "plan {plan_str} expects {} arguments, engine passed {}",
            constraints.len(),
            args.len()
        )));
    }

    for (constraint, &arg) in constraints.iter_mut().zip(args.iter()) {
        unsafe { constraint.materialize(arg)? };
    }

    let plan = constraint::compose_plan(&constraints)?;
    let result = constraint::execute_plan(&vtab.index, &plan)?;

    cursor.query = plan.knn_param().map(|p: &KnnParam| p.query_vector.clone());
    cursor.result = result;
    cursor.position = 0;
    debug!(
        plan = plan_str,
        rows = cursor.result.len(),
        vector_search = cursor.query.is_some(),
        "filter executed"
    );
    Ok(())
}

unsafe extern "C" fn vtab_filter(
    p_cursor: *mut ffi::sqlite3_vtab_cursor,
    _idx_num: c_int,
    idx_str: *const c_char,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) -> c_int {
    let cursor = unsafe { &mut *(p_cursor as *mut Cursor) };
    let p_vtab = cursor.base.pVtab;
    let plan_str = if idx_str.is_null() {
        ""
    } else {
        match unsafe { CStr::from_ptr(idx_str) }.to_str() {
            Ok(s) => s,
            Err(_) => {
                unsafe { set_vtab_error(p_vtab, "malformed query plan string") };
                return ffi::SQLITE_ERROR;
            }
        }
    };
    let args = unsafe { std::slice::from_raw_parts(argv, argc.max(0) as usize) };

    let vtab = unsafe { &*(p_vtab as *const VirtualTable) };
    match unsafe { run_filter(vtab, cursor, plan_str, args) } {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => {
            unsafe { set_vtab_error(p_vtab, &e.to_string()) };
            ffi::SQLITE_ERROR
        }
    }
}

unsafe extern "C" fn vtab_next(p_cursor: *mut ffi::sqlite3_vtab_cursor) -> c_int {
    let cursor = unsafe { &mut *(p_cursor as *mut Cursor) };
    if cursor.position < cursor.result.len() {
        cursor.position += 1;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn vtab_eof(p_cursor: *mut ffi::sqlite3_vtab_cursor) -> c_int {
    let cursor = unsafe { &*(p_cursor as *const Cursor) };
    c_int::from(cursor.position >= cursor.result.len())
}

unsafe extern "C" fn vtab_column(
    p_cursor: *mut ffi::sqlite3_vtab_cursor,
    p_ctx: *mut ffi::sqlite3_context,
    n: c_int,
) -> c_int {
    let cursor = unsafe { &*(p_cursor as *const Cursor) };
    let (distance, label) = match cursor.current() {
        Some(row) => row,
        None => return ffi::SQLITE_ERROR,
    };

    match n {
        COLUMN_DISTANCE => {
            unsafe { ffi::sqlite3_result_double(p_ctx, f64::from(distance)) };
            ffi::SQLITE_OK
        }
        COLUMN_VECTOR => match cursor.vtab().index.get_vector(label) {
            Ok(vector) => {
                let blob = vector.to_blob();
                unsafe {
                    ffi::sqlite3_result_blob(
                        p_ctx,
                        blob.as_ptr() as *const c_void,
                        blob.len() as c_int,
                        ffi::SQLITE_TRANSIENT(),
                    );
                }
                ffi::SQLITE_OK
            }
            Err(_) => {
                let msg =
                    CString::new(format!("can't find vector with rowid {label}")).unwrap_or_default();
                unsafe { ffi::sqlite3_result_error(p_ctx, msg.as_ptr(), -1) };
                ffi::SQLITE_ERROR
            }
        },
        _ => {
            let msg = CString::new(format!("invalid column index: {n}")).unwrap_or_default();
            unsafe { ffi::sqlite3_result_error(p_ctx, msg.as_ptr(), -1) };
            ffi::SQLITE_ERROR
        }
    }
}

unsafe extern "C" fn vtab_rowid(
    p_cursor: *mut ffi::sqlite3_vtab_cursor,
    p_rowid: *mut ffi::sqlite3_int64,
) -> c_int {
    let cursor = unsafe { &*(p_cursor as *const Cursor) };
    match cursor.current().map(|(_, label)| label_to_rowid(label)) {
        Some(Ok(rowid)) => {
            unsafe { *p_rowid = rowid };
            ffi::SQLITE_OK
        }
        _ => ffi::SQLITE_ERROR,
    }
}

unsafe fn value_as_rowid(value: *mut ffi::sqlite3_value) -> Result<usize> {
    if unsafe { ffi::sqlite3_value_type(value) } != ffi::SQLITE_INTEGER {
        return Err(Error::InvalidArgument(
            "rowid must be of type INTEGER".to_string(),
        ));
    }
    rowid_to_label(unsafe { ffi::sqlite3_value_int64(value) })
}

unsafe fn value_as_blob<'a>(value: *mut ffi::sqlite3_value) -> Result<&'a [u8]> {
    if unsafe { ffi::sqlite3_value_type(value) } != ffi::SQLITE_BLOB {
        return Err(Error::InvalidArgument(
            "vectors crossing the SQL boundary must be of type blob".to_string(),
        ));
    }
    let len = unsafe { ffi::sqlite3_value_bytes(value) }.max(0) as usize;
    if len == 0 {
        return Ok(&[]);
    }
    Ok(unsafe {
        std::slice::from_raw_parts(ffi::sqlite3_value_blob(value) as *const u8, len)
    })
}

/// `xUpdate` decodes INSERT / UPDATE / DELETE from `argc` and the nullity of
/// the first two arguments, per the engine's convention.
unsafe fn run_update(
    vtab: &VirtualTable,
    args: &[*mut ffi::sqlite3_value],
    p_rowid: *mut ffi::sqlite3_int64,
) -> Result<()> {
    // DELETE: a single argument carrying the rowid.
    if args.len() == 1 {
        let label = unsafe { value_as_rowid(args[0])? };
        return vtab.index.mark_delete(label);
    }

    if args.len() < 3 {
        return Err(Error::Unimplemented(format!(
            "unsupported update shape with {} arguments",
            args.len()
        )));
    }

    let element_type = vtab.space.space.element_type;

    if unsafe { ffi::sqlite3_value_type(args[0]) } == ffi::SQLITE_NULL {
        // INSERT: writing the hidden distance column is never meaningful.
        // (On UPDATE the engine passes the column's current value through,
        // so the check only applies here.)
        if args.len() > 3 && unsafe { ffi::sqlite3_value_type(args[3]) } != ffi::SQLITE_NULL {
            return Err(Error::InvalidArgument(
                "the distance column is read-only".to_string(),
            ));
        }
        // argv[1] is the new rowid and must be given explicitly.
        if unsafe { ffi::sqlite3_value_type(args[1]) } != ffi::SQLITE_INTEGER {
            return Err(Error::InvalidArgument(
                "an explicit integer rowid is required on INSERT".to_string(),
            ));
        }
        let rowid = unsafe { ffi::sqlite3_value_int64(args[1]) };
        let label = rowid_to_label(rowid)?;
        let blob = unsafe { value_as_blob(args[2])? };
        let view = VectorView::from_blob(blob, element_type)?;
        vtab.index.insert(view, label, true)?;
        unsafe { *p_rowid = rowid };
        return Ok(());
    }

    // UPDATE: rewriting rowids is not supported, and the old row must be live.
    let old_label = unsafe { value_as_rowid(args[0])? };
    let new_label = unsafe { value_as_rowid(args[1])? };
    if old_label != new_label {
        return Err(Error::Unimplemented(
            "changing the rowid of a row is not supported".to_string(),
        ));
    }
    if !vtab.index.is_live(old_label) {
        return Err(Error::NotFound(format!(
            "rowid {old_label} is not in the index"
        )));
    }
    let blob = unsafe { value_as_blob(args[2])? };
    let view = VectorView::from_blob(blob, element_type)?;
    vtab.index.insert(view, old_label, true)
}

unsafe extern "C" fn vtab_update(
    p_vtab: *mut ffi::sqlite3_vtab,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
    p_rowid: *mut ffi::sqlite3_int64,
) -> c_int {
    let vtab = unsafe { &*(p_vtab as *const VirtualTable) };
    let args = unsafe { std::slice::from_raw_parts(argv, argc.max(0) as usize) };
    match unsafe { run_update(vtab, args, p_rowid) } {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => {
            unsafe { set_vtab_error(p_vtab, &e.to_string()) };
            ffi::SQLITE_ERROR
        }
    }
}

/// The marker installed for `knn_search` over this table. Never meant to
/// run: best-index consumes the constraint with omit set.
unsafe extern "C" fn knn_search_marker(
    p_ctx: *mut ffi::sqlite3_context,
    _argc: c_int,
    _argv: *mut *mut ffi::sqlite3_value,
) {
    unsafe {
        ffi::sqlite3_result_error(
            p_ctx,
            c"knn_search must be consumed by the query planner".as_ptr(),
            -1,
        );
    }
}

unsafe extern "C" fn vtab_find_function(
    _p_vtab: *mut ffi::sqlite3_vtab,
    _n_arg: c_int,
    z_name: *const c_char,
    px_func: *mut Option<
        unsafe extern "C" fn(*mut ffi::sqlite3_context, c_int, *mut *mut ffi::sqlite3_value),
    >,
    pp_arg: *mut *mut c_void,
) -> c_int {
    let name = unsafe { CStr::from_ptr(z_name) };
    if name.to_bytes() == b"knn_search" {
        unsafe {
            *px_func = Some(knn_search_marker);
            *pp_arg = std::ptr::null_mut();
        }
        return ffi::SQLITE_INDEX_CONSTRAINT_FUNCTION;
    }
    0
}
