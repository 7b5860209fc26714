//! Typed error hierarchy shared by every operator.
//!
//! Uses `thiserror` for library-grade errors. Every variant maps to one value
//! of the closed [`Status`] enumeration returned to callers, plus a stable
//! integer code via [`EngineError::error_code`] for structured logging.

use crate::ffi_types::{
    CUDA_ERROR_INVALID_VALUE, CUDA_ERROR_NOT_READY, CUDA_ERROR_OUT_OF_MEMORY, CUDA_SUCCESS,
    CUresult,
};
use crate::format::{DataKind, ImageFormat};

/// Closed status set reported by every operator call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    InvalidDataFormat,
    InvalidDataType,
    InvalidDataShape,
    InvalidParameter,
    OutOfMemory,
    NotReady,
    Internal,
}

impl Status {
    /// Map a raw CUDA driver result onto the status set.
    pub fn from_cu_result(code: CUresult) -> Self {
        match code {
            CUDA_SUCCESS => Self::Success,
            CUDA_ERROR_OUT_OF_MEMORY => Self::OutOfMemory,
            CUDA_ERROR_NOT_READY => Self::NotReady,
            CUDA_ERROR_INVALID_VALUE => Self::InvalidParameter,
            _ => Self::Internal,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::InvalidDataFormat => "ERROR_INVALID_DATA_FORMAT",
            Self::InvalidDataType => "ERROR_INVALID_DATA_TYPE",
            Self::InvalidDataShape => "ERROR_INVALID_DATA_SHAPE",
            Self::InvalidParameter => "ERROR_INVALID_PARAMETER",
            Self::OutOfMemory => "ERROR_OUT_OF_MEMORY",
            Self::NotReady => "ERROR_NOT_READY",
            Self::Internal => "ERROR_INTERNAL",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// All errors originating from varbatch.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ── CUDA ──────────────────────────────────────────────────────────
    #[error("CUDA driver error: {0}")]
    Cuda(#[from] cudarc::driver::DriverError),

    #[error("CUDA kernel compilation error: {0}")]
    NvrtcCompile(#[from] cudarc::nvrtc::CompileError),

    #[error("{context} failed with CUDA error code {code}")]
    Driver { context: String, code: CUresult },

    #[error("CUDA driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("Kernel '{name}' not found in module '{module}'")]
    MissingKernel {
        module: &'static str,
        name: &'static str,
    },

    // ── Format contracts ─────────────────────────────────────────────
    #[error("Image format mismatch: expected {expected}, got {actual}")]
    FormatMismatch {
        expected: ImageFormat,
        actual: ImageFormat,
    },

    #[error("Batch format is not uniform: image {index} is {actual}, batch starts with {expected}")]
    NonUniformFormat {
        index: usize,
        expected: ImageFormat,
        actual: ImageFormat,
    },

    #[error("{op}: {layout} layout is not supported")]
    UnsupportedLayout {
        op: &'static str,
        layout: &'static str,
    },

    #[error("{op}: {channels} channels are not supported")]
    UnsupportedChannels { op: &'static str, channels: usize },

    // ── Type contracts ───────────────────────────────────────────────
    #[error("{op}: element type {kind:?} is not supported")]
    UnsupportedDataKind { op: &'static str, kind: DataKind },

    #[error("{op}: input {input:?} cannot be converted to output {output:?}")]
    UnsupportedConversion {
        op: &'static str,
        input: DataKind,
        output: DataKind,
    },

    // ── Shape contracts ──────────────────────────────────────────────
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    // ── Parameters and capacities ────────────────────────────────────
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{what} count {requested} exceeds capacity {capacity}")]
    CapacityExceeded {
        what: &'static str,
        requested: usize,
        capacity: usize,
    },

    #[error("Buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Resources ────────────────────────────────────────────────────
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl EngineError {
    /// Build a [`EngineError::Driver`] from a failing driver result.
    pub fn driver(context: impl Into<String>, code: CUresult) -> Self {
        Self::Driver {
            context: context.into(),
            code,
        }
    }

    /// Status reported to callers for this error.
    pub fn status(&self) -> Status {
        match self {
            Self::Cuda(err) => Status::from_cu_result(err.0 as CUresult),
            Self::Driver { code, .. } => Status::from_cu_result(*code),
            Self::NvrtcCompile(_)
            | Self::DriverUnavailable(_)
            | Self::MissingKernel { .. }
            | Self::InvariantViolation(_) => Status::Internal,
            Self::FormatMismatch { .. }
            | Self::NonUniformFormat { .. }
            | Self::UnsupportedLayout { .. }
            | Self::UnsupportedChannels { .. } => Status::InvalidDataFormat,
            Self::UnsupportedDataKind { .. } | Self::UnsupportedConversion { .. } => {
                Status::InvalidDataType
            }
            Self::ShapeMismatch(_) => Status::InvalidDataShape,
            Self::InvalidParameter(_)
            | Self::CapacityExceeded { .. }
            | Self::BufferTooSmall { .. }
            | Self::InvalidConfig(_) => Status::InvalidParameter,
            Self::OutOfMemory(_) => Status::OutOfMemory,
        }
    }

    /// Stable integer error code for structured logging.
    ///
    /// Codes are grouped by category:
    /// - 1xx: CUDA/driver
    /// - 2xx: Format contracts
    /// - 3xx: Type contracts
    /// - 4xx: Shape contracts
    /// - 5xx: Parameters and capacities
    /// - 6xx: Resources and invariants
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Cuda(_) => 100,
            Self::NvrtcCompile(_) => 101,
            Self::Driver { .. } => 102,
            Self::DriverUnavailable(_) => 103,
            Self::MissingKernel { .. } => 104,
            Self::FormatMismatch { .. } => 200,
            Self::NonUniformFormat { .. } => 201,
            Self::UnsupportedLayout { .. } => 202,
            Self::UnsupportedChannels { .. } => 203,
            Self::UnsupportedDataKind { .. } => 300,
            Self::UnsupportedConversion { .. } => 301,
            Self::ShapeMismatch(_) => 400,
            Self::InvalidParameter(_) => 500,
            Self::CapacityExceeded { .. } => 501,
            Self::BufferTooSmall { .. } => 502,
            Self::InvalidConfig(_) => 503,
            Self::OutOfMemory(_) => 600,
            Self::InvariantViolation(_) => 601,
        }
    }

    /// Whether the caller's stream is still usable after this error.
    ///
    /// Everything detected on the host before launch leaves the stream untouched.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Cuda(_) | Self::Driver { .. } | Self::InvariantViolation(_)
        )
    }
}

/// Convenience alias used throughout varbatch.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ImageFormat;

    #[test]
    fn driver_codes_map_to_closed_status_set() {
        assert_eq!(Status::from_cu_result(CUDA_SUCCESS), Status::Success);
        assert_eq!(
            Status::from_cu_result(CUDA_ERROR_OUT_OF_MEMORY),
            Status::OutOfMemory
        );
        assert_eq!(Status::from_cu_result(CUDA_ERROR_NOT_READY), Status::NotReady);
        assert_eq!(
            Status::from_cu_result(CUDA_ERROR_INVALID_VALUE),
            Status::InvalidParameter
        );
        assert_eq!(Status::from_cu_result(999), Status::Internal);
        assert_eq!(
            EngineError::driver("cuMemAllocHost_v2", CUDA_ERROR_OUT_OF_MEMORY).status(),
            Status::OutOfMemory
        );
    }

    #[test]
    fn contract_errors_map_to_their_status() {
        let mismatch = EngineError::FormatMismatch {
            expected: ImageFormat::RGB8,
            actual: ImageFormat::RGB8P,
        };
        assert_eq!(mismatch.status(), Status::InvalidDataFormat);
        assert!(mismatch.is_recoverable());

        let kind = EngineError::UnsupportedDataKind {
            op: "resize",
            kind: DataKind::F16,
        };
        assert_eq!(kind.status(), Status::InvalidDataType);

        let cap = EngineError::CapacityExceeded {
            what: "erase region",
            requested: 9,
            capacity: 8,
        };
        assert_eq!(cap.status(), Status::InvalidParameter);
        assert_eq!(cap.error_code(), 501);
    }

    #[test]
    fn status_names_are_stable() {
        assert_eq!(Status::InvalidDataFormat.to_string(), "ERROR_INVALID_DATA_FORMAT");
        assert_eq!(Status::Success.name(), "SUCCESS");
    }
}
