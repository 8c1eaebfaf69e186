use crate::error::DecodeError;

/// Default limit on how deeply nested messages and envelopes are followed.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Tracks how many nested decodes deep we currently are. Copied down into each nested decode
/// rather than shared, so sibling decodes never see each other's depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthTracker {
    depth: usize,
    max: usize,
}

impl DepthTracker {
    /// Create a new depth tracker
    pub fn new(max: usize) -> Self {
        Self { depth: 0, max }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Step one level deeper, failing if that would exceed the nesting limit.
    pub fn descend(self) -> Result<Self, DecodeError> {
        if self.depth >= self.max {
            return Err(DecodeError::malformed(format!(
                "nesting depth limit of {} exceeded",
                self.max
            )));
        }
        Ok(Self {
            depth: self.depth + 1,
            max: self.max,
        })
    }
}

impl Default for DepthTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}
