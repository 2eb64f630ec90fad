//! Textual form of the HNSW hyper-parameters:
//! `hnsw(max_elements=N[, M=..][, ef_construction=..][, random_seed=..][, allow_replace_deleted=..])`

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    /// Upper bound on the number of slots the index may hold. Required.
    pub max_elements: usize,
    /// Bidirectional links per node on the upper layers (layer 0 gets 2*M).
    pub m: usize,
    /// Candidate-list width during construction.
    pub ef_construction: usize,
    /// Seed for level generation.
    pub random_seed: u64,
    /// Allow new labels to reuse tombstoned slots.
    pub allow_replace_deleted: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            max_elements: 0,
            m: 16,
            ef_construction: 200,
            random_seed: 100,
            allow_replace_deleted: false,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

impl IndexOptions {
    pub fn parse(input: &str) -> Result<Self> {
        static HNSW_RE: OnceLock<Regex> = OnceLock::new();
        static KV_RE: OnceLock<Regex> = OnceLock::new();
        let hnsw_re = HNSW_RE.get_or_init(|| Regex::new(r"^\s*hnsw\((.*)\)\s*$").unwrap());
        let kv_re = KV_RE.get_or_init(|| Regex::new(r"(\w+)=(\w+)").unwrap());

        let caps = hnsw_re.captures(input).ok_or_else(|| {
            Error::InvalidArgument("invalid index option, only hnsw is supported".to_string())
        })?;

        let mut options = IndexOptions::default();
        let mut has_max_elements = false;

        for kv in kv_re.captures_iter(caps.get(1).unwrap().as_str()) {
            let key = kv.get(1).unwrap().as_str();
            let value = kv.get(2).unwrap().as_str();
            match key {
                "max_elements" => {
                    options.max_elements = value.parse().map_err(|_| {
                        Error::InvalidArgument(format!("cannot parse max_elements: {value}"))
                    })?;
                    has_max_elements = true;
                }
                "M" => {
                    options.m = value
                        .parse()
                        .map_err(|_| Error::InvalidArgument(format!("cannot parse M: {value}")))?;
                }
                "ef_construction" => {
                    options.ef_construction = value.parse().map_err(|_| {
                        Error::InvalidArgument(format!("cannot parse ef_construction: {value}"))
                    })?;
                }
                "random_seed" => {
                    options.random_seed = value.parse().map_err(|_| {
                        Error::InvalidArgument(format!("cannot parse random_seed: {value}"))
                    })?;
                }
                "allow_replace_deleted" => {
                    options.allow_replace_deleted = parse_bool(value).ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "cannot parse allow_replace_deleted: {value}"
                        ))
                    })?;
                }
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "invalid index option: {key}"
                    )));
                }
            }
        }

        if !has_max_elements {
            return Err(Error::InvalidArgument(
                "max_elements is required but not provided".to_string(),
            ));
        }
        Ok(options)
    }
}
