#![doc = include_str!("../README.md")]

pub mod coeffs;
pub mod config;
pub mod error;
pub mod ffi_types;
pub mod format;
pub mod image;
pub mod interp;
pub mod meta;
pub mod ops;
pub mod pixel;
pub mod reference;
pub mod tensor;
pub mod workspace;

pub use config::{OperatorConfig, PillowPrecision};
pub use error::{EngineError, Result, Status};
pub use format::{DataKind, ImageFormat, Packing};
pub use image::{Image, ImageBatchVarShape, Size2D, TensorBatch};
pub use interp::Interpolation;
