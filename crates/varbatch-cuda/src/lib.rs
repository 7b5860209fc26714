#![doc = include_str!("../README.md")]

pub mod context;
mod cuda_common;
mod dispatch;
mod launch;
pub mod ops;
pub mod pinned;
pub mod pool;
pub mod stream;
mod sys;

pub use context::{GpuContext, device_count};
pub use ops::{Erase, Flip, Normalize, Operators, PillowResize, Resize, Rotate};
pub use pool::{WorkspaceMem, WorkspacePool};
