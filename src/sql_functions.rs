//! SQL scalar function implementations
//!
//! The codec and distance functions go through rusqlite's function
//! registration. `knn_param`/`knn_search` need the engine's pointer-passing
//! interface, which rusqlite does not wrap, so those two register through
//! the raw C API.

use crate::constraint::{KNN_PARAM_POINTER_NAME, KnnParam};
use crate::error::{Error, Result};
use crate::ops;
use crate::space::{DistanceMetric, distance};
use crate::vector::{ElementType, Vector, VectorView};
use rusqlite::Connection;
use rusqlite::ffi;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use std::ffi::{CString, c_char, c_int, c_void};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Register all SQL functions with the database
pub fn register_all(db: &Connection) -> Result<()> {
    register_vector_from_json(db)?;
    register_vector_to_json(db)?;
    register_vector_distance(db)?;
    register_vectorlite_info(db)?;
    register_knn_param(db)?;
    register_knn_search(db)?;
    Ok(())
}

/// Human-readable build info reported by `vectorlite_info()`.
pub fn info_string() -> String {
    format!(
        "vectorlite extension version {}, built with {} SIMD",
        VERSION,
        ops::runtime_target()
    )
}

fn register_vector_from_json(db: &Connection) -> Result<()> {
    db.create_scalar_function(
        "vector_from_json",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let json = match ctx.get_raw(0) {
                ValueRef::Text(bytes) => std::str::from_utf8(bytes).map_err(|e| {
                    rusqlite::Error::UserFunctionError(
                        Box::new(Error::InvalidArgument(format!("invalid UTF-8: {e}"))),
                    )
                })?,
                _ => {
                    return Err(rusqlite::Error::UserFunctionError(Box::new(
                        Error::InvalidArgument("vector_from_json expects a JSON string".to_string()),
                    )));
                }
            };
            let vector = Vector::from_json(json, ElementType::Float32)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            Ok(vector.to_blob().to_vec())
        },
    )
    .map_err(Error::Sqlite)?;
    Ok(())
}

fn register_vector_to_json(db: &Connection) -> Result<()> {
    db.create_scalar_function(
        "vector_to_json",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let blob = match ctx.get_raw(0) {
                ValueRef::Blob(bytes) => bytes,
                _ => {
                    return Err(rusqlite::Error::UserFunctionError(Box::new(
                        Error::InvalidArgument(
                            "vector_to_json expects a vector of type blob".to_string(),
                        ),
                    )));
                }
            };
            let view = VectorView::from_blob(blob, ElementType::Float32)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            view.to_json()
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))
        },
    )
    .map_err(Error::Sqlite)?;
    Ok(())
}

fn register_vector_distance(db: &Connection) -> Result<()> {
    db.create_scalar_function(
        "vector_distance",
        3,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let v1 = match ctx.get_raw(0) {
                ValueRef::Blob(bytes) => bytes,
                _ => {
                    return Err(rusqlite::Error::UserFunctionError(Box::new(
                        Error::InvalidArgument(
                            "vector_distance expects vectors of type blob".to_string(),
                        ),
                    )));
                }
            };
            let v2 = match ctx.get_raw(1) {
                ValueRef::Blob(bytes) => bytes,
                _ => {
                    return Err(rusqlite::Error::UserFunctionError(Box::new(
                        Error::InvalidArgument(
                            "vector_distance expects vectors of type blob".to_string(),
                        ),
                    )));
                }
            };
            let metric = match ctx.get_raw(2) {
                ValueRef::Text(bytes) => std::str::from_utf8(bytes).map_err(|e| {
                    rusqlite::Error::UserFunctionError(
                        Box::new(Error::InvalidArgument(format!("invalid UTF-8: {e}"))),
                    )
                })?,
                _ => {
                    return Err(rusqlite::Error::UserFunctionError(Box::new(
                        Error::InvalidArgument(
                            "vector_distance expects a distance type of type text".to_string(),
                        ),
                    )));
                }
            };

            let metric = DistanceMetric::parse(metric)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            let v1 = VectorView::from_blob(v1, ElementType::Float32)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            let v2 = VectorView::from_blob(v2, ElementType::Float32)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            let d = distance(v1, v2, metric)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            Ok(d as f64)
        },
    )
    .map_err(Error::Sqlite)?;
    Ok(())
}

fn register_vectorlite_info(db: &Connection) -> Result<()> {
    db.create_scalar_function(
        "vectorlite_info",
        0,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |_ctx| Ok(info_string()),
    )
    .map_err(Error::Sqlite)?;
    Ok(())
}

unsafe fn result_error(ctx: *mut ffi::sqlite3_context, msg: &str) {
    let msg = CString::new(msg.replace('\0', " ")).unwrap_or_default();
    unsafe { ffi::sqlite3_result_error(ctx, msg.as_ptr(), -1) };
}

unsafe extern "C" fn knn_param_destroy(p: *mut c_void) {
    drop(unsafe { Box::from_raw(p as *mut KnnParam) });
}

/// `knn_param(query_blob, k[, ef_search])` builds the typed parameter
/// pointer that `knn_search` constraints consume. The query blob is always
/// interpreted as float32.
unsafe extern "C" fn knn_param_func(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    let args = unsafe { std::slice::from_raw_parts(argv, argc.max(0) as usize) };
    if argc != 2 && argc != 3 {
        return unsafe {
            result_error(
                ctx,
                &format!("knn_param expects 2 or 3 arguments but {argc} provided"),
            )
        };
    }

    if unsafe { ffi::sqlite3_value_type(args[0]) } != ffi::SQLITE_BLOB {
        return unsafe { result_error(ctx, "knn_param expects a query vector of type blob") };
    }
    let len = unsafe { ffi::sqlite3_value_bytes(args[0]) }.max(0) as usize;
    let blob: &[u8] = if len == 0 {
        &[]
    } else {
        unsafe {
            std::slice::from_raw_parts(ffi::sqlite3_value_blob(args[0]) as *const u8, len)
        }
    };
    let query_vector = match Vector::from_blob(blob, ElementType::Float32) {
        Ok(v) => v,
        Err(e) => {
            return unsafe { result_error(ctx, &format!("failed to parse query vector: {e}")) };
        }
    };

    if unsafe { ffi::sqlite3_value_type(args[1]) } != ffi::SQLITE_INTEGER {
        return unsafe { result_error(ctx, "k must be of type INTEGER") };
    }
    let k = unsafe { ffi::sqlite3_value_int64(args[1]) };
    if k <= 0 || k > u32::MAX as i64 {
        return unsafe { result_error(ctx, &format!("k must be a positive 32-bit integer, got {k}")) };
    }

    let ef_search = if argc == 3 {
        if unsafe { ffi::sqlite3_value_type(args[2]) } != ffi::SQLITE_INTEGER {
            return unsafe { result_error(ctx, "ef_search must be of type INTEGER") };
        }
        let ef = unsafe { ffi::sqlite3_value_int64(args[2]) };
        if ef <= 0 || ef > u32::MAX as i64 {
            return unsafe {
                result_error(ctx, &format!("ef_search must be a positive 32-bit integer, got {ef}"))
            };
        }
        Some(ef as u32)
    } else {
        None
    };

    let param = Box::new(KnnParam {
        query_vector,
        k: k as u32,
        ef_search,
    });
    unsafe {
        ffi::sqlite3_result_pointer(
            ctx,
            Box::into_raw(param) as *mut c_void,
            KNN_PARAM_POINTER_NAME.as_ptr(),
            Some(knn_param_destroy),
        );
    }
}

/// `knn_search(vec, knn_param(..))` is a marker the planner rewrites into an
/// index constraint. Reaching the function body means the planner could not
/// use it.
unsafe extern "C" fn knn_search_func(
    ctx: *mut ffi::sqlite3_context,
    _argc: c_int,
    _argv: *mut *mut ffi::sqlite3_value,
) {
    unsafe {
        result_error(
            ctx,
            "knn_search() is only valid in the WHERE clause of a query against a vectorlite table",
        );
    }
}

fn check_rc(rc: c_int, what: &str) -> Result<()> {
    if rc == ffi::SQLITE_OK {
        Ok(())
    } else {
        Err(Error::Internal(format!(
            "failed to register {what}: error code {rc}"
        )))
    }
}

fn register_knn_param(db: &Connection) -> Result<()> {
    let name: &std::ffi::CStr = c"knn_param";
    let rc = unsafe {
        ffi::sqlite3_create_function_v2(
            db.handle(),
            name.as_ptr() as *const c_char,
            -1,
            ffi::SQLITE_UTF8,
            std::ptr::null_mut(),
            Some(knn_param_func),
            None,
            None,
            None,
        )
    };
    check_rc(rc, "knn_param")
}

fn register_knn_search(db: &Connection) -> Result<()> {
    let name: &std::ffi::CStr = c"knn_search";
    let rc = unsafe {
        ffi::sqlite3_create_function_v2(
            db.handle(),
            name.as_ptr() as *const c_char,
            2,
            ffi::SQLITE_UTF8,
            std::ptr::null_mut(),
            Some(knn_search_func),
            None,
            None,
            None,
        )
    };
    check_rc(rc, "knn_search")
}
