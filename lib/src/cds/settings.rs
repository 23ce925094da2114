use crate::cds::archive::HeaderFlags;
use std::path::PathBuf;

/// Search paths of the three builtin loaders
///
/// Each entry is a directory or a jar. Together they make up the shared path table, which numbers
/// entries boot first, then platform, then app.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassPaths {
    pub boot: Vec<PathBuf>,
    pub platform: Vec<PathBuf>,
    pub app: Vec<PathBuf>,
}

/// Byte budget of each archive region
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegionBudget {
    pub ro: usize,
    pub rw: usize,
    pub md: usize,
    pub mc: usize,
}

impl Default for RegionBudget {
    fn default() -> Self {
        RegionBudget {
            ro: 64 << 20,
            rw: 16 << 20,
            md: 16 << 20,
            mc: 64 << 10,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DumpSettings {
    /// Lines longer than this are rejected
    pub max_classlist_line_length: usize,

    /// Alignment of every region in the archive file
    ///
    /// The archive can only be mapped by a process which requires the same alignment.
    pub alignment: u64,

    pub region_capacity: RegionBudget,

    /// Drop classes which fail verification instead of failing the dump
    pub tolerate_verification_errors: bool,

    /// Honour `defining_loader_hash:` and `initiating_loader_hash:`, and record builtin classes
    /// which were not found
    pub extended_loader_info: bool,

    /// Verification of classes from the boot class path
    pub bytecode_verify_local: bool,

    /// Verification of classes from every other loader
    pub bytecode_verify_remote: bool,

    pub class_paths: ClassPaths,
}

impl Default for DumpSettings {
    fn default() -> Self {
        DumpSettings {
            max_classlist_line_length: 32 * 1024,
            alignment: 4096,
            region_capacity: RegionBudget::default(),
            tolerate_verification_errors: false,
            extended_loader_info: false,
            bytecode_verify_local: false,
            bytecode_verify_remote: true,
            class_paths: ClassPaths::default(),
        }
    }
}

impl DumpSettings {
    /// Flag block written into the header (minus `HAS_UNREGISTERED`, which depends on content)
    pub fn header_flags(&self) -> HeaderFlags {
        let mut flags = HeaderFlags::empty();
        flags.set(HeaderFlags::VERIFY_LOCAL, self.bytecode_verify_local);
        flags.set(HeaderFlags::VERIFY_REMOTE, self.bytecode_verify_remote);
        flags.set(HeaderFlags::HAS_PLATFORM, !self.class_paths.platform.is_empty());
        flags.set(HeaderFlags::HAS_APP, !self.class_paths.app.is_empty());
        flags.set(HeaderFlags::EXTENDED, self.extended_loader_info);
        flags
    }
}

/// What a process requires of an archive before adopting it
#[derive(Clone, Debug)]
pub struct MapSettings {
    pub alignment: u64,
    pub bytecode_verify_local: bool,
    pub bytecode_verify_remote: bool,
    pub class_paths: ClassPaths,

    /// Check the runtime class paths against the archived shared path table
    pub validate_class_paths: bool,
}

impl Default for MapSettings {
    fn default() -> Self {
        MapSettings {
            alignment: 4096,
            bytecode_verify_local: false,
            bytecode_verify_remote: true,
            class_paths: ClassPaths::default(),
            validate_class_paths: true,
        }
    }
}

impl MapSettings {
    /// Can an archive dumped with these flags be used under these settings?
    ///
    /// An archive dumped without verification cannot be used by a process that verifies, but the
    /// opposite is fine.
    pub fn accepts_verification(&self, flags: HeaderFlags) -> bool {
        (!self.bytecode_verify_local || flags.contains(HeaderFlags::VERIFY_LOCAL))
            && (!self.bytecode_verify_remote || flags.contains(HeaderFlags::VERIFY_REMOTE))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn verification_compatibility() {
        let strict = MapSettings {
            bytecode_verify_local: true,
            ..MapSettings::default()
        };
        let lenient = MapSettings {
            bytecode_verify_remote: false,
            ..MapSettings::default()
        };
        let dumped = DumpSettings::default().header_flags();

        assert!(MapSettings::default().accepts_verification(dumped));
        assert!(lenient.accepts_verification(dumped));
        assert!(!strict.accepts_verification(dumped));
    }
}
