//! vectorlite: fast vector search for SQLite.
//!
//! A loadable extension that maintains an in-memory HNSW index per virtual
//! table and answers approximate nearest-neighbor queries through SQL:
//!
//! ```sql
//! CREATE VIRTUAL TABLE my_vectors USING vectorlite(
//!     my_embedding float32[384] cosine,
//!     hnsw(max_elements=10000)
//! );
//! SELECT rowid, distance FROM my_vectors
//! WHERE knn_search(my_embedding, knn_param(vector_from_json('[...]'), 10));
//! ```

pub mod constraint;
pub mod error;
pub mod hnsw;
pub mod index_options;
pub mod ops;
pub mod space;
pub mod sql_functions;
pub mod util;
pub mod vector;
pub mod vtab;

pub use error::{Error, Result};
pub use hnsw::HnswIndex;
pub use index_options::IndexOptions;
pub use space::{DistanceMetric, NamedVectorSpace, VectorSpace};
pub use vector::{ElementType, Vector, VectorView};

use rusqlite::Connection;
use rusqlite::ffi;

/// The host engine must support handing over an entire `rowid IN (...)` set
/// in one materialization call.
const MIN_SQLITE_VERSION_NUMBER: i32 = 3_038_000;

/// Initialize the vectorlite extension on a connection: registers all
/// scalar SQL functions and the `vectorlite` virtual-table module.
pub fn init(db: &Connection) -> Result<()> {
    let version = unsafe { ffi::sqlite3_libversion_number() };
    if version < MIN_SQLITE_VERSION_NUMBER {
        return Err(Error::FailedPrecondition(format!(
            "vectorlite requires SQLite >= 3.38.0 for IN-constraint processing, \
             but the host reports version number {version}"
        )));
    }

    sql_functions::register_all(db)?;
    vtab::register_module(db)?;
    Ok(())
}

/// Extension entry point for SQLite to load this as a shared library.
///
/// # Safety
///
/// Called by SQLite's extension loading mechanism with a valid database
/// handle and API routine table.
#[cfg(feature = "loadable-extension")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlite3_vectorlite_init(
    db: *mut ffi::sqlite3,
    _pz_err_msg: *mut *mut std::os::raw::c_char,
    p_api: *mut ffi::sqlite3_api_routines,
) -> std::os::raw::c_int {
    if unsafe { ffi::rusqlite_extension_init2(p_api) }.is_err() {
        return ffi::SQLITE_ERROR;
    }

    match std::panic::catch_unwind(|| {
        // SAFETY: db is a valid handle provided by SQLite's loader
        let conn = match unsafe { Connection::from_handle(db) } {
            Ok(conn) => conn,
            Err(_) => return ffi::SQLITE_ERROR,
        };
        let rc = match init(&conn) {
            Ok(()) => ffi::SQLITE_OK,
            Err(_) => ffi::SQLITE_ERROR,
        };
        // SQLite owns the connection; don't close it
        std::mem::forget(conn);
        rc
    }) {
        Ok(rc) => rc,
        Err(_) => ffi::SQLITE_ERROR,
    }
}
