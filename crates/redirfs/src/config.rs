//! TEAM_470: Redirection layer tunables.

/// TEAM_470: Limits for one redirection registry.
///
/// The caps stand in for the object caches a kernel would size at init; an
/// allocation past the cap fails with `VfsError::OutOfMemory`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RedirConfig {
    /// Maximum number of live shadow inodes
    pub max_rinodes: usize,
    /// Maximum number of live shadow dentries
    pub max_rdentries: usize,
}

impl RedirConfig {
    pub const DEFAULT: Self = Self {
        max_rinodes: 1 << 16,
        max_rdentries: 1 << 16,
    };

    #[must_use]
    pub const fn with_max_rinodes(mut self, max: usize) -> Self {
        self.max_rinodes = max;
        self
    }

    #[must_use]
    pub const fn with_max_rdentries(mut self, max: usize) -> Self {
        self.max_rdentries = max;
        self
    }
}

impl Default for RedirConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
