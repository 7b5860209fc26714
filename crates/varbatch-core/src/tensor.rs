//! Strided device tensors carrying auxiliary per-sample parameters
//! (angles, shifts, anchors).

use crate::error::{EngineError, Result};
use crate::ffi_types::CUdeviceptr;
use crate::format::DataKind;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorView {
    pub base: CUdeviceptr,
    pub dtype: DataKind,
    pub shape: Vec<usize>,
    /// Byte strides, one per dimension.
    pub strides: Vec<usize>,
}

impl TensorView {
    /// Densely packed (row-major) tensor.
    pub fn contiguous(base: CUdeviceptr, dtype: DataKind, shape: &[usize]) -> Self {
        let mut strides = vec![0; shape.len()];
        let mut acc = dtype.size_bytes();
        for (stride, dim) in strides.iter_mut().zip(shape).rev() {
            *stride = acc;
            acc *= *dim;
        }
        Self {
            base,
            dtype,
            shape: shape.to_vec(),
            strides,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Bytes between consecutive samples (outermost dimension).
    pub fn sample_stride(&self) -> usize {
        self.strides.first().copied().unwrap_or(0)
    }

    /// Check element type and shape before any pointer is handed to a kernel.
    ///
    /// `None` entries in `shape` accept any extent.
    pub fn expect(&self, name: &str, dtype: DataKind, shape: &[Option<usize>]) -> Result<()> {
        if self.dtype != dtype {
            return Err(EngineError::InvalidParameter(format!(
                "{name} tensor must hold {dtype:?}, got {:?}",
                self.dtype
            )));
        }
        if self.shape.len() != shape.len() || self.strides.len() != shape.len() {
            return Err(EngineError::ShapeMismatch(format!(
                "{name} tensor must have rank {}, got shape {:?}",
                shape.len(),
                self.shape
            )));
        }
        for (axis, (actual, expected)) in self.shape.iter().zip(shape).enumerate() {
            if let Some(expected) = expected
                && actual != expected
            {
                return Err(EngineError::ShapeMismatch(format!(
                    "{name} tensor axis {axis} must be {expected}, got {actual}"
                )));
            }
        }
        if self.strides.last().is_some_and(|s| *s != dtype.size_bytes()) {
            return Err(EngineError::ShapeMismatch(format!(
                "{name} tensor innermost dimension must be contiguous"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;

    #[test]
    fn contiguous_strides_are_row_major() {
        let t = TensorView::contiguous(0, DataKind::F64, &[4, 2]);
        assert_eq!(t.strides, vec![16, 8]);
        assert_eq!(t.sample_stride(), 16);
    }

    #[test]
    fn expect_checks_dtype_then_shape() {
        let shift = TensorView::contiguous(0, DataKind::F32, &[3, 2]);
        let err = shift
            .expect("shift", DataKind::F64, &[Some(3), Some(2)])
            .expect_err("f32 rejected");
        assert_eq!(err.status(), Status::InvalidParameter);

        let shift = TensorView::contiguous(0, DataKind::F64, &[3, 2]);
        shift
            .expect("shift", DataKind::F64, &[Some(3), Some(2)])
            .expect("valid shift tensor");
        let err = shift
            .expect("shift", DataKind::F64, &[Some(4), Some(2)])
            .expect_err("sample count");
        assert_eq!(err.status(), Status::InvalidDataShape);
        let err = shift
            .expect("angle", DataKind::F64, &[None])
            .expect_err("rank");
        assert_eq!(err.status(), Status::InvalidDataShape);
    }
}
