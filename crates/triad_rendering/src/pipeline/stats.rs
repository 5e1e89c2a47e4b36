//! Draw submission statistics.

/// Counters from one or more draw passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    /// Draw calls issued, multi-draws counted once.
    pub draw_calls: u32,
    /// Multi-draw calls issued.
    pub multi_draw_batches: u32,
    /// Index or vertex ranges submitted.
    pub ranges_submitted: u32,
    /// Program changes.
    pub program_switches: u32,
    /// Texture set changes.
    pub texture_switches: u32,
    /// Fixed-function state changes.
    pub state_switches: u32,
    /// Attribute pointer changes.
    pub attribute_switches: u32,
    /// Uniform uploads.
    pub uniform_uploads: u32,
    /// Descriptors skipped as invalid, empty or deselected.
    pub skipped: u32,
}

impl DrawStats {
    /// Zeroes every counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Sum of every kind of state change.
    #[must_use]
    pub fn total_state_changes(&self) -> u32 {
        self.program_switches
            + self.texture_switches
            + self.state_switches
            + self.attribute_switches
            + self.uniform_uploads
    }

    /// Ranges per draw call; above 1.0 when merging paid off.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ranges_per_call(&self) -> f32 {
        if self.draw_calls > 0 {
            self.ranges_submitted as f32 / self.draw_calls as f32
        } else {
            0.0
        }
    }

    /// Adds `other`'s counters to this one.
    pub fn accumulate(&mut self, other: &Self) {
        self.draw_calls += other.draw_calls;
        self.multi_draw_batches += other.multi_draw_batches;
        self.ranges_submitted += other.ranges_submitted;
        self.program_switches += other.program_switches;
        self.texture_switches += other.texture_switches;
        self.state_switches += other.state_switches;
        self.attribute_switches += other.attribute_switches;
        self.uniform_uploads += other.uniform_uploads;
        self.skipped += other.skipped;
    }
}
