use std::fmt;

/// Memory space a storage buffer currently occupies.
///
/// A tag, not an owned resource: it determines which code path an
/// operation takes. `Unified` marks managed/pinned allocations that are
/// addressable from both host and device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemorySpace {
    /// Host heap memory.
    #[default]
    Host,
    /// Device-resident memory.
    Device,
    /// Managed memory addressable from both spaces.
    Unified,
}

impl MemorySpace {
    /// Whether data tagged `self` is addressable from `other`.
    ///
    /// `Unified` overlaps both concrete spaces; `Host` and `Device` only
    /// overlap themselves (and `Unified`).
    pub fn overlaps(self, other: MemorySpace) -> bool {
        self == other || self == MemorySpace::Unified || other == MemorySpace::Unified
    }

    /// Whether this is the host space.
    pub fn is_host(self) -> bool {
        matches!(self, MemorySpace::Host)
    }

    /// Whether this is the device space.
    pub fn is_device(self) -> bool {
        matches!(self, MemorySpace::Device)
    }
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemorySpace::Host => write!(f, "host"),
            MemorySpace::Device => write!(f, "device"),
            MemorySpace::Unified => write!(f, "unified"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_table() {
        use MemorySpace::*;
        assert!(Host.overlaps(Host));
        assert!(Device.overlaps(Device));
        assert!(!Host.overlaps(Device));
        assert!(!Device.overlaps(Host));

        // unified is addressable from everywhere
        assert!(Unified.overlaps(Host));
        assert!(Unified.overlaps(Device));
        assert!(Host.overlaps(Unified));
        assert!(Device.overlaps(Unified));
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", MemorySpace::Host), "host");
        assert_eq!(format!("{}", MemorySpace::Device), "device");
        assert_eq!(format!("{}", MemorySpace::Unified), "unified");
    }
}
