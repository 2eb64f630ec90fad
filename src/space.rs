//! Vector space: distance metric, element type and dimension, plus the
//! textual declaration used by the virtual-table constructor.

use crate::error::{Error, Result};
use crate::ops;
use crate::util::is_valid_column_name;
use crate::vector::{ElementType, Vector, VectorView};
use regex::Regex;
use std::sync::OnceLock;

/// Distance metric names are exactly `l2`, `ip`, `cosine`: lowercase, no
/// aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    /// Squared Euclidean distance
    L2,
    /// 1 - dot(a, b)
    InnerProduct,
    /// 1 - dot(a, b) over unit-normalized vectors
    Cosine,
}

impl DistanceMetric {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "l2" => Ok(DistanceMetric::L2),
            "ip" => Ok(DistanceMetric::InnerProduct),
            "cosine" => Ok(DistanceMetric::Cosine),
            _ => Err(Error::InvalidArgument(format!(
                "invalid distance type: {s}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::InnerProduct => "ip",
            DistanceMetric::Cosine => "cosine",
        }
    }
}

/// A vector space bundles element type, metric and dimension. Cosine spaces
/// normalize every vector on the way in, so their stored form is always
/// unit-norm and their distance kernel is the inner-product one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorSpace {
    pub metric: DistanceMetric,
    pub element_type: ElementType,
    pub dim: usize,
    /// True iff the metric is cosine.
    pub normalize: bool,
}

impl VectorSpace {
    pub fn new(dim: usize, metric: DistanceMetric, element_type: ElementType) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidArgument(
                "dimension must be greater than 0".to_string(),
            ));
        }
        Ok(VectorSpace {
            metric,
            element_type,
            dim,
            normalize: metric == DistanceMetric::Cosine,
        })
    }

    pub fn vector_byte_size(&self) -> usize {
        self.dim * self.element_type.byte_size()
    }

    /// Validate an incoming vector against this space and produce the form
    /// that gets stored: same element type, normalized iff the space
    /// normalizes. The raw form is never stored for cosine spaces.
    pub fn prepare_stored(&self, v: VectorView<'_>) -> Result<Vector> {
        if v.element_type() != self.element_type {
            return Err(Error::InvalidArgument(format!(
                "expected a {} vector, got {}",
                self.element_type.as_str(),
                v.element_type().as_str()
            )));
        }
        if v.dim() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: v.dim(),
            });
        }
        if self.normalize {
            Ok(v.normalize())
        } else {
            Ok(v.to_owned())
        }
    }

    /// Turn an f32 query into the representation the graph search uses.
    /// Normalization (for cosine) happens exactly once, here. bf16 spaces
    /// with the L2 metric keep the query in f32 for the mixed kernel; all
    /// other half-precision cases quantize once up front.
    pub fn prepare_query(&self, query: &[f32]) -> Result<QueryVector> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        let mut q = query.to_vec();
        if self.normalize {
            ops::normalize_f32(&mut q);
        }
        Ok(match (self.element_type, self.metric) {
            (ElementType::Float32, _) => QueryVector::F32(q),
            (ElementType::BFloat16, DistanceMetric::L2) => QueryVector::F32(q),
            (ElementType::BFloat16, _) => {
                let mut out = vec![half::bf16::ZERO; q.len()];
                ops::quantize_f32_to_bf16(&q, &mut out);
                QueryVector::BF16(out)
            }
            (ElementType::Float16, _) => {
                let mut out = vec![half::f16::ZERO; q.len()];
                ops::quantize_f32_to_f16(&q, &mut out);
                QueryVector::F16(out)
            }
        })
    }

    /// Distance between a prepared query and a stored vector's bytes.
    pub fn query_distance(&self, query: &QueryVector, stored: &[u8]) -> f32 {
        match query {
            QueryVector::F32(q) => match self.element_type {
                ElementType::Float32 => {
                    let s: &[f32] = bytemuck::cast_slice(stored);
                    match self.metric {
                        DistanceMetric::L2 => ops::l2_distance_squared_f32(q, s),
                        _ => ops::inner_product_distance_f32(q, s),
                    }
                }
                // Mixed pair: f32 query against bf16 storage, L2 only
                ElementType::BFloat16 => {
                    ops::l2_distance_squared_f32_bf16(q, bytemuck::cast_slice(stored))
                }
                ElementType::Float16 => unreachable!("f16 queries are quantized up front"),
            },
            QueryVector::BF16(q) => {
                let s: &[half::bf16] = bytemuck::cast_slice(stored);
                match self.metric {
                    DistanceMetric::L2 => ops::l2_distance_squared_bf16(q, s),
                    _ => ops::inner_product_distance_bf16(q, s),
                }
            }
            QueryVector::F16(q) => {
                let s: &[half::f16] = bytemuck::cast_slice(stored);
                match self.metric {
                    DistanceMetric::L2 => ops::l2_distance_squared_f16(q, s),
                    _ => ops::inner_product_distance_f16(q, s),
                }
            }
        }
    }

    /// Distance between two stored vectors' bytes (construction path).
    pub fn stored_distance(&self, a: &[u8], b: &[u8]) -> f32 {
        match self.element_type {
            ElementType::Float32 => {
                let (a, b): (&[f32], &[f32]) = (bytemuck::cast_slice(a), bytemuck::cast_slice(b));
                match self.metric {
                    DistanceMetric::L2 => ops::l2_distance_squared_f32(a, b),
                    _ => ops::inner_product_distance_f32(a, b),
                }
            }
            ElementType::BFloat16 => {
                let (a, b): (&[half::bf16], &[half::bf16]) =
                    (bytemuck::cast_slice(a), bytemuck::cast_slice(b));
                match self.metric {
                    DistanceMetric::L2 => ops::l2_distance_squared_bf16(a, b),
                    _ => ops::inner_product_distance_bf16(a, b),
                }
            }
            ElementType::Float16 => {
                let (a, b): (&[half::f16], &[half::f16]) =
                    (bytemuck::cast_slice(a), bytemuck::cast_slice(b));
                match self.metric {
                    DistanceMetric::L2 => ops::l2_distance_squared_f16(a, b),
                    _ => ops::inner_product_distance_f16(a, b),
                }
            }
        }
    }
}

/// A query vector in the representation the space's kernels consume.
#[derive(Debug, Clone)]
pub enum QueryVector {
    F32(Vec<f32>),
    BF16(Vec<half::bf16>),
    F16(Vec<half::f16>),
}

/// A vector space plus its validated column name, as declared in
/// `CREATE VIRTUAL TABLE`.
#[derive(Debug, Clone)]
pub struct NamedVectorSpace {
    pub vector_name: String,
    pub space: VectorSpace,
}

impl NamedVectorSpace {
    /// Parse a declaration of the form `name type[dim] metric?`, e.g.
    /// `my_embedding float32[384] cosine`. The metric defaults to `l2`.
    pub fn parse(decl: &str) -> Result<Self> {
        static DECL_RE: OnceLock<Regex> = OnceLock::new();
        let re = DECL_RE.get_or_init(|| {
            Regex::new(r"^\s*(?P<name>\w+)\s+(?P<type>\w+)\[(?P<dim>\d+)\]\s*(?P<metric>\w+)?\s*$")
                .unwrap()
        });

        let caps = re.captures(decl).ok_or_else(|| {
            Error::InvalidArgument(format!("unable to parse vector space: {decl}"))
        })?;

        let name = caps.name("name").unwrap().as_str();
        if !is_valid_column_name(name) {
            return Err(Error::InvalidArgument(format!(
                "invalid vector name: {name}"
            )));
        }

        let element_type = ElementType::parse(caps.name("type").unwrap().as_str())?;

        let dim: usize = caps
            .name("dim")
            .unwrap()
            .as_str()
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("invalid dimension in: {decl}")))?;

        let metric = match caps.name("metric") {
            Some(m) => DistanceMetric::parse(m.as_str())?,
            None => DistanceMetric::L2,
        };

        Ok(NamedVectorSpace {
            vector_name: name.to_string(),
            space: VectorSpace::new(dim, metric, element_type)?,
        })
    }
}

/// Distance between two vectors of the same element type, as exposed by the
/// `vector_distance` SQL function. Cosine normalizes both sides first.
pub fn distance(v1: VectorView<'_>, v2: VectorView<'_>, metric: DistanceMetric) -> Result<f32> {
    if v1.element_type() != v2.element_type() {
        return Err(Error::InvalidArgument(format!(
            "cannot mix {} and {} vectors",
            v1.element_type().as_str(),
            v2.element_type().as_str()
        )));
    }
    if v1.dim() != v2.dim() {
        return Err(Error::InvalidArgument(format!(
            "dimension mismatch: {} != {}",
            v1.dim(),
            v2.dim()
        )));
    }

    let space = VectorSpace {
        metric,
        element_type: v1.element_type(),
        dim: v1.dim(),
        normalize: metric == DistanceMetric::Cosine,
    };

    if space.normalize {
        let a = v1.normalize();
        let b = v2.normalize();
        Ok(space.stored_distance(a.to_blob(), b.to_blob()))
    } else {
        Ok(space.stored_distance(v1.to_blob(), v2.to_blob()))
    }
}
