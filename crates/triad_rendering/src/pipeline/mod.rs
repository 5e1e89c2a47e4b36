//! Presentation-side frame orchestration.

mod stats;

pub use stats::DrawStats;

use triad_core::{GpuReleaseQueue, GpuResult, TripleBufferCoordinator};

use crate::device::{GraphicsDevice, ProgramId};
use crate::draw::DrawBatchList;

/// Runs one presentation frame: begins it on `coordinator`, deletes GPU
/// handles queued on `releases`, then draws every list in order.
///
/// Returns the frame's statistics. Presentation thread only.
///
/// # Errors
///
/// Propagates the first backend failure; later lists are not drawn.
pub fn present_frame<D: GraphicsDevice>(
    coordinator: &TripleBufferCoordinator,
    releases: &[&GpuReleaseQueue],
    lists: &[&DrawBatchList],
    device: &mut D,
) -> GpuResult<DrawStats> {
    coordinator.begin_presentation_frame();
    for queue in releases {
        queue.release_pending(device);
    }

    let mut stats = DrawStats::default();
    for list in lists {
        list.draw(device, &mut stats, Some::<ProgramId>)?;
    }
    Ok(stats)
}
