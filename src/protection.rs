//! Portable protection and sharing intents for a mapping.

/// Access granted to the pages of a mapping.
///
/// The native flags are derived per platform; the same value also decides which
/// stream operations the region allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protection {
    /// Pages may be read.
    ReadOnly,
    /// Pages may be written.
    WriteOnly,
    /// Pages may be read and written.
    ReadWrite,
    /// Pages may be executed and read.
    ExecReadOnly,
    /// Pages may be executed and written.
    ExecWriteOnly,
    /// Pages may be executed, read and written.
    ExecReadWrite,
}

impl Protection {
    /// Whether the stream interface may read from a region with this protection.
    #[must_use]
    pub fn is_readable(self) -> bool {
        matches!(
            self,
            Self::ReadOnly | Self::ReadWrite | Self::ExecReadOnly | Self::ExecReadWrite
        )
    }

    /// Whether the stream interface may write to a region with this protection.
    #[must_use]
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            Self::WriteOnly | Self::ReadWrite | Self::ExecWriteOnly | Self::ExecReadWrite
        )
    }

    /// Whether the pages are mapped executable.
    #[must_use]
    pub fn is_executable(self) -> bool {
        matches!(
            self,
            Self::ExecReadOnly | Self::ExecWriteOnly | Self::ExecReadWrite
        )
    }
}

/// Whether writes reach the backing file and other mappings of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Sharing {
    /// Writes are visible to other mappings and carried through to the file.
    #[default]
    Shared,
    /// Copy-on-write; writes stay local to this mapping.
    Private,
    /// Like `Shared`, but the kernel rejects unknown mapping flags (Linux only).
    SharedValidate,
}

impl Sharing {
    /// Whether writes propagate to the backing file.
    #[must_use]
    pub fn is_shared(self) -> bool {
        !matches!(self, Self::Private)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Protection; 6] = [
        Protection::ReadOnly,
        Protection::WriteOnly,
        Protection::ReadWrite,
        Protection::ExecReadOnly,
        Protection::ExecWriteOnly,
        Protection::ExecReadWrite,
    ];

    #[test]
    fn readable_and_writable_derivation() {
        let table: Vec<(bool, bool)> = ALL
            .iter()
            .map(|p| (p.is_readable(), p.is_writable()))
            .collect();
        assert_eq!(
            table,
            vec![
                (true, false),
                (false, true),
                (true, true),
                (true, false),
                (false, true),
                (true, true),
            ]
        );
    }

    #[test]
    fn exec_variants_are_executable() {
        let exec: Vec<Protection> = ALL.into_iter().filter(|p| p.is_executable()).collect();
        assert_eq!(
            exec,
            vec![
                Protection::ExecReadOnly,
                Protection::ExecWriteOnly,
                Protection::ExecReadWrite
            ]
        );
    }

    #[test]
    fn only_private_is_unshared() {
        assert!(Sharing::Shared.is_shared());
        assert!(Sharing::SharedValidate.is_shared());
        assert!(!Sharing::Private.is_shared());
        assert_eq!(Sharing::default(), Sharing::Shared);
    }
}
