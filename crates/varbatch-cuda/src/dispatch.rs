//! Shared staging and launch sequence behind every operator call.

use cudarc::driver::CudaStream;
use tracing::trace;
use varbatch_core::error::{EngineError, Result};
use varbatch_core::ffi_types::CUdeviceptr;
use varbatch_core::ops::{CallTracker, HostPlan, Phase};

use crate::pool::WorkspaceMem;

/// Build `plan` into `ws`, stage it on `stream` and run `launch` with the
/// device base of the workspace.
///
/// Errors before staging leave the stream untouched. `launch` only enqueues
/// work; completion is tracked by the workspace's `device_ready` event.
pub(crate) fn execute<P: HostPlan>(
    call: &mut CallTracker,
    stream: &CudaStream,
    plan: &P,
    ws: &mut WorkspaceMem,
    launch: impl FnOnce(CUdeviceptr) -> Result<()>,
) -> Result<()> {
    let layout = plan.layout();
    let have = ws.requirements();
    if !have.covers(&layout) {
        return Err(EngineError::BufferTooSmall {
            need: layout.total_bytes().max(layout.staged_bytes()),
            have: have.cuda.size.min(have.host.size),
        });
    }

    call.advance(Phase::Building)?;
    {
        let mut arena = ws.host_arena(layout.staged_bytes())?;
        plan.build(&mut arena)?;
    }

    call.advance(Phase::Staging)?;
    ws.stage(stream, layout.staged_bytes())?;

    call.advance(Phase::Launching)?;
    launch(ws.device_ptr())?;
    ws.finish(stream)?;
    trace!(
        op = plan.op(),
        staged_bytes = layout.staged_bytes(),
        total_bytes = layout.total_bytes(),
        "call enqueued"
    );
    Ok(())
}
