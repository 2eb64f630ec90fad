//! End-to-end tests driving the extension through SQL.

use rusqlite::Connection;

fn test_db() -> Connection {
    let db = Connection::open_in_memory().expect("failed to open in-memory database");
    vectorlite::init(&db).expect("extension init should succeed");
    db
}

fn f32_blob(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Create `t(vec float32[4] l2)` and insert rowids 1..=10 with `[i,i,i,i]`.
fn setup_line_table(db: &Connection, max_elements: usize) {
    db.execute(
        &format!(
            "CREATE VIRTUAL TABLE t USING vectorlite(vec float32[4], hnsw(max_elements={max_elements}))"
        ),
        [],
    )
    .unwrap();
    let mut stmt = db
        .prepare("INSERT INTO t(rowid, vec) VALUES (?, ?)")
        .unwrap();
    for i in 1..=10i64 {
        stmt.execute(rusqlite::params![i, f32_blob(&[i as f32; 4])])
            .unwrap();
    }
}

#[test]
fn test_knn_search_returns_nearest_rowids_and_distances() {
    let db = test_db();
    setup_line_table(&db, 100);

    let mut stmt = db
        .prepare("SELECT rowid, distance FROM t WHERE knn_search(vec, knn_param(?, 3))")
        .unwrap();
    let rows: Vec<(i64, f64)> = stmt
        .query_map([f32_blob(&[5.0; 4])], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], (5, 0.0));
    // 4 and 6 tie at squared distance 4; ties break by ascending rowid
    assert_eq!(rows[1], (4, 4.0));
    assert_eq!(rows[2], (6, 4.0));
}

#[test]
fn test_cosine_metric_table() {
    let db = test_db();
    db.execute(
        "CREATE VIRTUAL TABLE t USING vectorlite(vec float32[4] cosine, hnsw(max_elements=10))",
        [],
    )
    .unwrap();

    let vectors: [[f32; 4]; 3] = [
        [1.0, 0.1, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [-1.0, 0.0, 0.5, 0.0],
    ];
    for (i, v) in vectors.iter().enumerate() {
        db.execute(
            "INSERT INTO t(rowid, vec) VALUES (?, ?)",
            rusqlite::params![i as i64 + 1, f32_blob(v)],
        )
        .unwrap();
    }

    let (rowid, distance): (i64, f64) = db
        .query_row(
            "SELECT rowid, distance FROM t WHERE knn_search(vec, knn_param(?, 1))",
            [f32_blob(&[1.0, 0.0, 0.0, 0.0])],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(rowid, 1);
    assert!((0.0..=2.0).contains(&distance));

    // cosine tables store the normalized form; reads return it
    let blob: Vec<u8> = db
        .query_row("SELECT vec FROM t WHERE rowid = 1", [], |row| row.get(0))
        .unwrap();
    let stored: Vec<f32> = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    let norm_sq: f32 = stored.iter().map(|x| x * x).sum();
    assert!((norm_sq - 1.0).abs() < 1e-5);
}

#[test]
fn test_delete_hides_row() {
    let db = test_db();
    setup_line_table(&db, 100);

    let deleted = db.execute("DELETE FROM t WHERE rowid = 1", []).unwrap();
    assert_eq!(deleted, 1);

    let found: Option<i64> = db
        .query_row("SELECT rowid FROM t WHERE rowid = 1", [], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
        .unwrap();
    assert_eq!(found, None);

    // the row is also gone from vector searches
    let rows: Vec<i64> = db
        .prepare("SELECT rowid FROM t WHERE knn_search(vec, knn_param(?, 10, 50))")
        .unwrap()
        .query_map([f32_blob(&[1.0; 4])], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(!rows.contains(&1));
    assert_eq!(rows.len(), 9);
}

#[test]
fn test_delete_then_reinsert_same_rowid() {
    let db = test_db();
    setup_line_table(&db, 100);

    db.execute("DELETE FROM t WHERE rowid = 3", []).unwrap();
    db.execute(
        "INSERT INTO t(rowid, vec) VALUES (3, ?)",
        [f32_blob(&[30.0; 4])],
    )
    .unwrap();

    let blob: Vec<u8> = db
        .query_row("SELECT vec FROM t WHERE rowid = 3", [], |row| row.get(0))
        .unwrap();
    assert_eq!(blob, f32_blob(&[30.0; 4]));
}

#[test]
fn test_allow_replace_deleted_reuses_slots() {
    let db = test_db();
    db.execute(
        "CREATE VIRTUAL TABLE t USING vectorlite(vec float32[2], hnsw(max_elements=2, allow_replace_deleted=true))",
        [],
    )
    .unwrap();

    db.execute("INSERT INTO t(rowid, vec) VALUES (1, ?)", [f32_blob(&[1.0, 1.0])])
        .unwrap();
    db.execute("INSERT INTO t(rowid, vec) VALUES (2, ?)", [f32_blob(&[2.0, 2.0])])
        .unwrap();

    db.execute("DELETE FROM t WHERE rowid = 1", []).unwrap();
    db.execute("INSERT INTO t(rowid, vec) VALUES (1, ?)", [f32_blob(&[9.0, 9.0])])
        .unwrap();

    let blob: Vec<u8> = db
        .query_row("SELECT vec FROM t WHERE rowid = 1", [], |row| row.get(0))
        .unwrap();
    assert_eq!(blob, f32_blob(&[9.0, 9.0]));

    // capacity of 2 stays honored: a third distinct rowid needs a free slot
    db.execute("DELETE FROM t WHERE rowid = 2", []).unwrap();
    db.execute("INSERT INTO t(rowid, vec) VALUES (7, ?)", [f32_blob(&[7.0, 7.0])])
        .unwrap();
    let found: i64 = db
        .query_row("SELECT rowid FROM t WHERE rowid = 7", [], |row| row.get(0))
        .unwrap();
    assert_eq!(found, 7);
}

#[test]
fn test_rowid_in_filter_combined_with_knn() {
    let db = test_db();
    db.execute(
        "CREATE VIRTUAL TABLE t USING vectorlite(vec float32[4], hnsw(max_elements=200))",
        [],
    )
    .unwrap();
    let mut stmt = db
        .prepare("INSERT INTO t(rowid, vec) VALUES (?, ?)")
        .unwrap();
    for i in 1..=100i64 {
        stmt.execute(rusqlite::params![i, f32_blob(&[i as f32; 4])])
            .unwrap();
    }
    drop(stmt);

    let rows: Vec<i64> = db
        .prepare(
            "SELECT rowid FROM t WHERE rowid IN (3, 7, 42) AND knn_search(vec, knn_param(?, 5, 200))",
        )
        .unwrap()
        .query_map([f32_blob(&[10.0; 4])], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert!(rows.len() <= 3);
    assert!(rows.iter().all(|r| [3, 7, 42].contains(r)));
    // with an exhaustive beam all three survive the filter
    assert_eq!(rows.len(), 3);
}

#[test]
fn test_rowid_in_without_knn() {
    let db = test_db();
    setup_line_table(&db, 100);
    db.execute("DELETE FROM t WHERE rowid = 7", []).unwrap();

    let rows: Vec<(i64, f64)> = db
        .prepare("SELECT rowid, distance FROM t WHERE rowid IN (3, 7, 999)")
        .unwrap()
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    // live members only, distance 0
    assert_eq!(rows, vec![(3, 0.0)]);
}

#[test]
fn test_dimension_mismatch_rejected_and_index_unchanged() {
    let db = test_db();
    setup_line_table(&db, 100);

    // 3 floats into a 4-dim column
    let result = db.execute(
        "INSERT INTO t(rowid, vec) VALUES (50, ?)",
        [f32_blob(&[1.0, 2.0, 3.0])],
    );
    let err = result.unwrap_err().to_string();
    assert!(err.contains("dimension mismatch"), "{err}");

    // 7 bytes is not a whole number of f32 elements
    let result = db.execute("INSERT INTO t(rowid, vec) VALUES (51, ?)", [vec![0u8; 7]]);
    assert!(result.is_err());

    let rows: Vec<i64> = db
        .prepare("SELECT rowid FROM t WHERE knn_search(vec, knn_param(?, 20, 50))")
        .unwrap()
        .query_map([f32_blob(&[5.0; 4])], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows.len(), 10);
    assert!(!rows.contains(&50));
    assert!(!rows.contains(&51));
}

#[test]
fn test_update_replaces_vector_in_place() {
    let db = test_db();
    setup_line_table(&db, 100);

    db.execute(
        "UPDATE t SET vec = ? WHERE rowid = 5",
        [f32_blob(&[0.5; 4])],
    )
    .unwrap();

    let blob: Vec<u8> = db
        .query_row("SELECT vec FROM t WHERE rowid = 5", [], |row| row.get(0))
        .unwrap();
    assert_eq!(blob, f32_blob(&[0.5; 4]));
}

#[test]
fn test_update_rowid_rewrite_rejected() {
    let db = test_db();
    setup_line_table(&db, 100);

    let err = db
        .execute("UPDATE t SET rowid = 99 WHERE rowid = 5", [])
        .unwrap_err()
        .to_string();
    assert!(err.contains("not supported"), "{err}");
}

#[test]
fn test_insert_requires_explicit_rowid() {
    let db = test_db();
    db.execute(
        "CREATE VIRTUAL TABLE t USING vectorlite(vec float32[2], hnsw(max_elements=10))",
        [],
    )
    .unwrap();
    let err = db
        .execute("INSERT INTO t(vec) VALUES (?)", [f32_blob(&[1.0, 2.0])])
        .unwrap_err()
        .to_string();
    assert!(err.contains("rowid"), "{err}");
}

#[test]
fn test_negative_rowid_rejected_not_truncated() {
    let db = test_db();
    db.execute(
        "CREATE VIRTUAL TABLE t USING vectorlite(vec float32[2], hnsw(max_elements=10))",
        [],
    )
    .unwrap();
    let err = db
        .execute(
            "INSERT INTO t(rowid, vec) VALUES (-5, ?)",
            [f32_blob(&[1.0, 2.0])],
        )
        .unwrap_err()
        .to_string();
    assert!(err.contains("out of range"), "{err}");
}

#[test]
fn test_full_scan_is_rejected() {
    let db = test_db();
    setup_line_table(&db, 100);
    // No recognized constraint: the planner refuses the table scan
    let result = db.prepare("SELECT rowid FROM t");
    assert!(result.is_err());
}

#[test]
fn test_capacity_exhaustion_surfaces_error() {
    let db = test_db();
    db.execute(
        "CREATE VIRTUAL TABLE t USING vectorlite(vec float32[2], hnsw(max_elements=2))",
        [],
    )
    .unwrap();
    db.execute("INSERT INTO t(rowid, vec) VALUES (1, ?)", [f32_blob(&[1.0, 1.0])])
        .unwrap();
    db.execute("INSERT INTO t(rowid, vec) VALUES (2, ?)", [f32_blob(&[2.0, 2.0])])
        .unwrap();
    let err = db
        .execute("INSERT INTO t(rowid, vec) VALUES (3, ?)", [f32_blob(&[3.0, 3.0])])
        .unwrap_err()
        .to_string();
    assert!(err.contains("full"), "{err}");
}

#[test]
fn test_match_syntax_routes_to_vector_path() {
    let db = test_db();
    setup_line_table(&db, 100);

    let rows: Vec<i64> = db
        .prepare("SELECT rowid FROM t WHERE vec MATCH knn_param(?, 2)")
        .unwrap()
        .query_map([f32_blob(&[1.0; 4])], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows[0], 1);
    assert_eq!(rows.len(), 2);
}

#[test]
fn test_knn_param_misuse_is_reported() {
    let db = test_db();
    setup_line_table(&db, 100);

    // the right-hand side must be a knn_param pointer
    let result = db
        .prepare("SELECT rowid FROM t WHERE vec MATCH 'not a knn_param'")
        .and_then(|mut stmt| {
            stmt.query_map([], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()
        });
    let err = result.unwrap_err().to_string();
    assert!(err.contains("knn_param"), "{err}");
}

#[test]
fn test_ef_search_override_accepted() {
    let db = test_db();
    setup_line_table(&db, 100);

    let rows: Vec<i64> = db
        .prepare("SELECT rowid FROM t WHERE knn_search(vec, knn_param(?, 8, 64))")
        .unwrap()
        .query_map([f32_blob(&[5.0; 4])], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows.len(), 8);
    assert_eq!(rows[0], 5);
}

#[test]
fn test_bfloat16_table_end_to_end() {
    let db = test_db();
    db.execute(
        "CREATE VIRTUAL TABLE t USING vectorlite(vec bfloat16[4], hnsw(max_elements=20))",
        [],
    )
    .unwrap();

    let mut stmt = db
        .prepare("INSERT INTO t(rowid, vec) VALUES (?, ?)")
        .unwrap();
    for i in 1..=10i64 {
        let blob: Vec<u8> = [i as f32; 4]
            .iter()
            .flat_map(|&v| half::bf16::from_f32(v).to_le_bytes())
            .collect();
        stmt.execute(rusqlite::params![i, blob]).unwrap();
    }
    drop(stmt);

    // queries stay float32; the mixed kernel handles the precision gap
    let (rowid, distance): (i64, f64) = db
        .query_row(
            "SELECT rowid, distance FROM t WHERE knn_search(vec, knn_param(?, 1, 20))",
            [f32_blob(&[7.0; 4])],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(rowid, 7);
    assert!(distance.abs() < 1e-2);

    // stored blobs are 2 bytes per element
    let blob: Vec<u8> = db
        .query_row("SELECT vec FROM t WHERE rowid = 7", [], |row| row.get(0))
        .unwrap();
    assert_eq!(blob.len(), 8);
}

#[test]
fn test_float16_table_end_to_end() {
    let db = test_db();
    db.execute(
        "CREATE VIRTUAL TABLE t USING vectorlite(vec float16[3] ip, hnsw(max_elements=10))",
        [],
    )
    .unwrap();

    let blob: Vec<u8> = [0.5f32, 0.25, 0.125]
        .iter()
        .flat_map(|&v| half::f16::from_f32(v).to_le_bytes())
        .collect();
    db.execute("INSERT INTO t(rowid, vec) VALUES (1, ?)", [blob])
        .unwrap();

    let rowid: i64 = db
        .query_row(
            "SELECT rowid FROM t WHERE knn_search(vec, knn_param(?, 1))",
            [f32_blob(&[0.5, 0.25, 0.125])],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(rowid, 1);
}

#[test]
fn test_create_table_argument_errors() {
    let db = test_db();

    // missing max_elements
    let err = db
        .execute(
            "CREATE VIRTUAL TABLE t1 USING vectorlite(vec float32[4], hnsw(M=16))",
            [],
        )
        .unwrap_err()
        .to_string();
    assert!(err.contains("max_elements"), "{err}");

    // bad element type
    assert!(
        db.execute(
            "CREATE VIRTUAL TABLE t2 USING vectorlite(vec float64[4], hnsw(max_elements=10))",
            [],
        )
        .is_err()
    );

    // reserved keyword as column name
    assert!(
        db.execute(
            "CREATE VIRTUAL TABLE t3 USING vectorlite(\"select\" float32[4], hnsw(max_elements=10))",
            [],
        )
        .is_err()
    );

    // missing option argument entirely
    assert!(
        db.execute(
            "CREATE VIRTUAL TABLE t4 USING vectorlite(vec float32[4])",
            [],
        )
        .is_err()
    );
}

#[test]
fn test_distance_column_is_hidden_and_read_only() {
    let db = test_db();
    setup_line_table(&db, 100);

    // hidden: not part of SELECT * expansion
    let mut stmt = db
        .prepare("SELECT * FROM t WHERE rowid = 1")
        .unwrap();
    assert_eq!(stmt.column_count(), 1);
    drop(stmt);

    let err = db
        .execute(
            "INSERT INTO t(rowid, vec, distance) VALUES (77, ?, 1.0)",
            [f32_blob(&[1.0; 4])],
        )
        .unwrap_err()
        .to_string();
    assert!(err.contains("read-only"), "{err}");
}

#[test]
fn test_two_tables_are_independent() {
    let db = test_db();
    db.execute(
        "CREATE VIRTUAL TABLE a USING vectorlite(va float32[2], hnsw(max_elements=10))",
        [],
    )
    .unwrap();
    db.execute(
        "CREATE VIRTUAL TABLE b USING vectorlite(vb float32[2], hnsw(max_elements=10))",
        [],
    )
    .unwrap();

    db.execute("INSERT INTO a(rowid, va) VALUES (1, ?)", [f32_blob(&[1.0, 0.0])])
        .unwrap();

    let found: Option<i64> = db
        .query_row("SELECT rowid FROM b WHERE rowid = 1", [], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
        .unwrap();
    assert_eq!(found, None);
}

#[test]
fn test_drop_table_releases_index() {
    let db = test_db();
    setup_line_table(&db, 100);
    db.execute("DROP TABLE t", []).unwrap();
    // name is reusable afterwards
    db.execute(
        "CREATE VIRTUAL TABLE t USING vectorlite(vec float32[2], hnsw(max_elements=5))",
        [],
    )
    .unwrap();
}
