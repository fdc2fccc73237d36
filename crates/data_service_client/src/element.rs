//! src/element.rs
//!
//! Dataset elements as they travel through the ingest engine.
//!
//! Workers ship elements in compressed form; this crate never decodes
//! them. An element is delivered to the consumer as a single opaque
//! tensor wrapping the compressed payload, paired with the schema the
//! dataset declared (`output_types` / `output_shapes`) so a downstream
//! stage can decode it.

use std::fmt;

/// Declared component type of a dataset output.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Float32,
    Float64,
    Int32,
    Int64,
    UInt8,
    Bool,
    String,
    /// An opaque boxed value. Compressed elements are surfaced as variants.
    Variant,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::Bool => "bool",
            DataType::String => "string",
            DataType::Variant => "variant",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A possibly partially-known tensor shape. `None` dimensions are unknown,
/// and a fully unknown rank is represented by [`PartialShape::unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartialShape {
    dims: Option<Vec<Option<i64>>>,
}

impl PartialShape {
    /// Shape with unknown rank.
    pub fn unknown() -> Self {
        Self { dims: None }
    }

    pub fn new(dims: Vec<Option<i64>>) -> Self {
        Self { dims: Some(dims) }
    }

    /// Fully-known scalar shape.
    pub fn scalar() -> Self {
        Self::new(Vec::new())
    }

    pub fn dims(&self) -> Option<&[Option<i64>]> {
        self.dims.as_deref()
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dims {
            None => f.write_str("<unknown>"),
            Some(dims) => {
                f.write_str("[")?;
                for (i, d) in dims.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match d {
                        Some(d) => write!(f, "{}", d)?,
                        None => f.write_str("?")?,
                    }
                }
                f.write_str("]")
            }
        }
    }
}

/// A compressed dataset element exactly as a worker produced it.
///
/// The payload stays opaque to the ingest engine; decompression and
/// component splitting happen downstream against the declared schema.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompressedElement {
    pub data: Vec<u8>,
}

impl CompressedElement {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One output tensor of `get_next`: a variant-typed wrapper around a
/// compressed element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueTensor {
    pub dtype: DataType,
    pub compressed: CompressedElement,
}

impl OpaqueTensor {
    pub fn wrap(compressed: CompressedElement) -> Self {
        Self {
            dtype: DataType::Variant,
            compressed,
        }
    }

    pub fn into_compressed(self) -> CompressedElement {
        self.compressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_shape_display() {
        assert_eq!(PartialShape::unknown().to_string(), "<unknown>");
        assert_eq!(PartialShape::scalar().to_string(), "[]");
        assert_eq!(
            PartialShape::new(vec![None, Some(224), Some(224), Some(3)]).to_string(),
            "[?, 224, 224, 3]"
        );
    }

    #[test]
    fn wrap_preserves_payload() {
        let tensor = OpaqueTensor::wrap(CompressedElement::new(vec![1, 2, 3]));
        assert_eq!(tensor.dtype, DataType::Variant);
        assert_eq!(tensor.into_compressed().data, vec![1, 2, 3]);
    }
}
