//! Vector types and codecs
//!
//! [`Vector`] owns its elements as a little-endian byte buffer; [`VectorView`]
//! borrows one. Both speak the three external forms: raw blob, JSON array of
//! numbers, and the in-memory contiguous buffer used by the distance kernels.

use crate::error::{Error, Result};
use crate::ops;
use bytemuck::cast_slice;
use half::{bf16, f16};
use serde::{Deserialize, Serialize};

/// Vector element types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    /// 32-bit IEEE float (4 bytes per element)
    Float32,
    /// bfloat16: the upper half of an f32 bit pattern (2 bytes per element)
    BFloat16,
    /// IEEE half precision (2 bytes per element)
    Float16,
}

impl ElementType {
    pub fn byte_size(&self) -> usize {
        match self {
            ElementType::Float32 => 4,
            ElementType::BFloat16 | ElementType::Float16 => 2,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "float32" => Ok(ElementType::Float32),
            "bfloat16" => Ok(ElementType::BFloat16),
            "float16" => Ok(ElementType::Float16),
            _ => Err(Error::InvalidArgument(format!("invalid vector type: {s}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Float32 => "float32",
            ElementType::BFloat16 => "bfloat16",
            ElementType::Float16 => "float16",
        }
    }
}

/// Owning vector: element type plus a contiguous little-endian byte buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    element_type: ElementType,
    data: Vec<u8>,
}

impl Vector {
    /// Build an f32 vector from a slice of values.
    pub fn from_f32(values: &[f32]) -> Self {
        Vector {
            element_type: ElementType::Float32,
            data: cast_slice(values).to_vec(),
        }
    }

    /// Build a vector of the requested element type from f32 values,
    /// quantizing for the half-precision types.
    pub fn from_f32_values(values: &[f32], element_type: ElementType) -> Self {
        match element_type {
            ElementType::Float32 => Self::from_f32(values),
            ElementType::BFloat16 => {
                let mut out = vec![bf16::ZERO; values.len()];
                ops::quantize_f32_to_bf16(values, &mut out);
                Vector {
                    element_type,
                    data: cast_slice(&out).to_vec(),
                }
            }
            ElementType::Float16 => {
                let mut out = vec![f16::ZERO; values.len()];
                ops::quantize_f32_to_f16(values, &mut out);
                Vector {
                    element_type,
                    data: cast_slice(&out).to_vec(),
                }
            }
        }
    }

    /// Parse a JSON array of numbers. An empty array is legal and yields a
    /// zero-dimension vector.
    pub fn from_json(json: &str, element_type: ElementType) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let array = value
            .as_array()
            .ok_or_else(|| Error::InvalidArgument("input JSON is not an array".to_string()))?;

        let mut values = Vec::with_capacity(array.len());
        for v in array {
            let num = v.as_f64().ok_or_else(|| {
                Error::InvalidArgument("JSON array contains non-numeric value".to_string())
            })?;
            values.push(num as f32);
        }

        Ok(Self::from_f32_values(&values, element_type))
    }

    /// Interpret bytes as contiguous little-endian elements.
    pub fn from_blob(blob: &[u8], element_type: ElementType) -> Result<Self> {
        VectorView::from_blob(blob, element_type).map(|view| view.to_owned())
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn dim(&self) -> usize {
        self.data.len() / self.element_type.byte_size()
    }

    /// Zero-copy view over the underlying element storage.
    pub fn to_blob(&self) -> &[u8] {
        &self.data
    }

    pub fn as_view(&self) -> VectorView<'_> {
        VectorView {
            element_type: self.element_type,
            data: &self.data,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        self.as_view().to_json()
    }

    /// Elements widened to f32 (identity for f32 vectors).
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.as_view().to_f32_vec()
    }

    /// Typed element access. Panics in debug builds on a type mismatch.
    pub fn as_f32_slice(&self) -> &[f32] {
        debug_assert_eq!(self.element_type, ElementType::Float32);
        cast_slice(&self.data)
    }

    pub fn as_bf16_slice(&self) -> &[bf16] {
        debug_assert_eq!(self.element_type, ElementType::BFloat16);
        cast_slice(&self.data)
    }

    pub fn as_f16_slice(&self) -> &[f16] {
        debug_assert_eq!(self.element_type, ElementType::Float16);
        cast_slice(&self.data)
    }

    /// Returns a unit-norm copy.
    pub fn normalize(&self) -> Vector {
        let mut out = self.clone();
        out.normalize_in_place();
        out
    }

    /// Rescales to unit L2 norm in place.
    pub fn normalize_in_place(&mut self) {
        match self.element_type {
            ElementType::Float32 => {
                let mut values: Vec<f32> = cast_slice(&self.data).to_vec();
                ops::normalize_f32(&mut values);
                self.data = cast_slice(&values).to_vec();
            }
            ElementType::BFloat16 => {
                let mut values: Vec<bf16> = cast_slice(&self.data).to_vec();
                ops::normalize_bf16(&mut values);
                self.data = cast_slice(&values).to_vec();
            }
            ElementType::Float16 => {
                let mut values: Vec<f16> = cast_slice(&self.data).to_vec();
                ops::normalize_f16(&mut values);
                self.data = cast_slice(&values).to_vec();
            }
        }
    }

    /// Convert to another element type, quantizing or promoting through f32.
    pub fn convert_to(&self, element_type: ElementType) -> Vector {
        if element_type == self.element_type {
            return self.clone();
        }
        Vector::from_f32_values(&self.to_f32_vec(), element_type)
    }
}

/// Borrowed vector: valid for the lifetime of the backing buffer, never owns
/// memory. Shares the codec surface with [`Vector`].
#[derive(Debug, Clone, Copy)]
pub struct VectorView<'a> {
    element_type: ElementType,
    data: &'a [u8],
}

impl<'a> VectorView<'a> {
    /// Borrow `blob` as little-endian elements of the given type. The blob
    /// length must be an exact multiple of the element size.
    pub fn from_blob(blob: &'a [u8], element_type: ElementType) -> Result<Self> {
        let elem_size = element_type.byte_size();
        if blob.len() % elem_size != 0 {
            return Err(Error::InvalidArgument(format!(
                "blob of {} bytes is not a whole number of {} elements ({} bytes each)",
                blob.len(),
                element_type.as_str(),
                elem_size
            )));
        }
        Ok(VectorView {
            element_type,
            data: blob,
        })
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn dim(&self) -> usize {
        self.data.len() / self.element_type.byte_size()
    }

    pub fn to_blob(&self) -> &'a [u8] {
        self.data
    }

    pub fn as_f32_slice(&self) -> &'a [f32] {
        debug_assert_eq!(self.element_type, ElementType::Float32);
        cast_slice(self.data)
    }

    pub fn as_bf16_slice(&self) -> &'a [bf16] {
        debug_assert_eq!(self.element_type, ElementType::BFloat16);
        cast_slice(self.data)
    }

    pub fn as_f16_slice(&self) -> &'a [f16] {
        debug_assert_eq!(self.element_type, ElementType::Float16);
        cast_slice(self.data)
    }

    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self.element_type {
            ElementType::Float32 => self.as_f32_slice().to_vec(),
            ElementType::BFloat16 => {
                let mut out = vec![0.0f32; self.dim()];
                ops::bf16_to_f32(self.as_bf16_slice(), &mut out);
                out
            }
            ElementType::Float16 => {
                let mut out = vec![0.0f32; self.dim()];
                ops::f16_to_f32(self.as_f16_slice(), &mut out);
                out
            }
        }
    }

    /// Emit a JSON array. Half-precision elements are promoted to f32 for
    /// serialization.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_f32_vec())?)
    }

    pub fn to_owned(&self) -> Vector {
        Vector {
            element_type: self.element_type,
            data: self.data.to_vec(),
        }
    }

    /// Normalized copy of the viewed vector.
    pub fn normalize(&self) -> Vector {
        self.to_owned().normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_type_parse() {
        assert_eq!(ElementType::parse("float32").unwrap(), ElementType::Float32);
        assert_eq!(
            ElementType::parse("bfloat16").unwrap(),
            ElementType::BFloat16
        );
        assert_eq!(ElementType::parse("float16").unwrap(), ElementType::Float16);
        assert!(ElementType::parse("float64").is_err());
        assert!(ElementType::parse("Float32").is_err());
    }

    #[test]
    fn test_blob_round_trip_bitwise() {
        for elem in [
            ElementType::Float32,
            ElementType::BFloat16,
            ElementType::Float16,
        ] {
            let v = Vector::from_f32_values(&[1.0, -2.5, 0.0, 3.25], elem);
            let restored = Vector::from_blob(v.to_blob(), elem).unwrap();
            assert_eq!(v, restored, "{elem:?}");
        }
    }

    #[test]
    fn test_blob_length_validation() {
        let blob = [0u8; 7];
        assert!(matches!(
            Vector::from_blob(&blob, ElementType::Float32),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Vector::from_blob(&blob, ElementType::Float16),
            Err(Error::InvalidArgument(_))
        ));
        // 8 bytes is fine for both
        let blob = [0u8; 8];
        assert_eq!(Vector::from_blob(&blob, ElementType::Float32).unwrap().dim(), 2);
        assert_eq!(Vector::from_blob(&blob, ElementType::BFloat16).unwrap().dim(), 4);
    }

    #[test]
    fn test_json_round_trip_f32() {
        let v = Vector::from_f32(&[1.0, 2.5, -3.125]);
        let json = v.to_json().unwrap();
        let restored = Vector::from_json(&json, ElementType::Float32).unwrap();
        let a = v.to_f32_vec();
        let b = restored.to_f32_vec();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_json_empty_array_is_legal() {
        let v = Vector::from_json("[]", ElementType::Float32).unwrap();
        assert_eq!(v.dim(), 0);
        assert_eq!(v.to_blob().len(), 0);
    }

    #[test]
    fn test_json_rejects_non_array() {
        assert!(Vector::from_json("{\"a\": 1}", ElementType::Float32).is_err());
        assert!(Vector::from_json("42", ElementType::Float32).is_err());
        assert!(matches!(
            Vector::from_json("[1, \"two\", 3]", ElementType::Float32),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Vector::from_json("[1, 2", ElementType::Float32),
            Err(Error::JsonParse(_))
        ));
    }

    #[test]
    fn test_json_promotes_half_precision() {
        let v = Vector::from_f32_values(&[0.5, 1.5], ElementType::BFloat16);
        let json = v.to_json().unwrap();
        // Exactly representable in bf16, so the promoted values are exact
        assert_eq!(json, "[0.5,1.5]");
    }

    #[test]
    fn test_normalize_returns_unit_vector() {
        let v = Vector::from_f32(&[3.0, 4.0]);
        let n = v.normalize();
        let vals = n.to_f32_vec();
        assert!((vals[0] - 0.6).abs() < 1e-6);
        assert!((vals[1] - 0.8).abs() < 1e-6);
        // Original untouched
        assert_eq!(v.to_f32_vec(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_view_shares_codec_surface() {
        let v = Vector::from_f32(&[1.0, 2.0]);
        let view = VectorView::from_blob(v.to_blob(), ElementType::Float32).unwrap();
        assert_eq!(view.dim(), 2);
        assert_eq!(view.to_blob(), v.to_blob());
        assert_eq!(view.to_json().unwrap(), v.to_json().unwrap());
    }

    #[test]
    fn test_convert_between_element_types() {
        let v = Vector::from_f32(&[1.0, -2.0, 0.25]);
        let b = v.convert_to(ElementType::BFloat16);
        assert_eq!(b.element_type(), ElementType::BFloat16);
        assert_eq!(b.to_blob().len(), 6);
        let back = b.convert_to(ElementType::Float32);
        // These values survive bf16 exactly
        assert_eq!(back.to_f32_vec(), vec![1.0, -2.0, 0.25]);
    }
}
