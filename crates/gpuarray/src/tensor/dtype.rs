//! Enumerates the scalar element types carried by array operands.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical dtype identifier shared between host arrays and device buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit floating point following IEEE-754 semantics.
    #[serde(rename = "float32")]
    F32,
    /// 64-bit floating point. Device backends may not support it.
    #[serde(rename = "float64")]
    F64,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    /// Name used in case labels and tolerance rules.
    pub fn name(self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }

    /// Rounds an `f64` value to the precision of this dtype.
    pub fn round(self, value: f64) -> f64 {
        match self {
            DType::F32 => value as f32 as f64,
            DType::F64 => value,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::DType;

    #[test]
    fn rounding_follows_precision() {
        let third = 1.0 / 3.0;
        assert_eq!(DType::F64.round(third), third);
        assert_eq!(DType::F32.round(third), (1.0f32 / 3.0) as f64);
    }

    #[test]
    fn names_are_numpy_style() {
        assert_eq!(DType::F32.to_string(), "float32");
        assert_eq!(DType::F64.to_string(), "float64");
        assert_eq!(DType::F64.size_in_bytes(), 8);
    }
}
