use crate::cds::archive::RegionKind;
use crate::jvm;
use std::fmt;

/// Failures of a dump, of a class resolution, or of archive I/O
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Zip(zip::result::ZipError),

    /// Malformed or inconsistent classlist line
    Format(FormatError),

    /// Neither the loader nor any of its parents found the class
    ClassNotFound(String),

    /// A class file defines a different class than the one that was asked for
    NoClassDefFound { expected: String, actual: String },

    ClassFormat(String),
    ClassCircularity(String),
    IncompatibleClassChange(String),

    /// A loader tried to define the same class twice
    Linkage(String),

    /// Every class which failed verification, with the verifier's diagnostic
    Verification(Vec<(String, String)>),

    /// A region outgrew its byte budget during serialization
    RegionOverflow {
        region: RegionKind,
        needed: usize,
        capacity: usize,
    },

    /// A class to be archived refers to a supertype that has no archive entry
    MissingSupertype { class: String, supertype: String },

    /// The collected class graph and the tables describing it disagree
    Inconsistent(String),

    Map(MapError),
}

impl Error {
    /// Does this error end the whole dump, or only the resolution of one class?
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::ClassNotFound(_)
                | Error::NoClassDefFound { .. }
                | Error::ClassFormat(_)
                | Error::ClassCircularity(_)
                | Error::IncompatibleClassChange(_)
                | Error::Linkage(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Zip(err) => write!(f, "jar error: {}", err),
            Error::Format(err) => err.fmt(f),
            Error::ClassNotFound(name) => write!(f, "java.lang.ClassNotFoundException: {}", name),
            Error::NoClassDefFound { expected, actual } => write!(
                f,
                "java.lang.NoClassDefFoundError: {} (wrong name: {})",
                expected, actual
            ),
            Error::ClassFormat(msg) => write!(f, "java.lang.ClassFormatError: {}", msg),
            Error::ClassCircularity(name) => {
                write!(f, "java.lang.ClassCircularityError: {}", name)
            }
            Error::IncompatibleClassChange(msg) => {
                write!(f, "java.lang.IncompatibleClassChangeError: {}", msg)
            }
            Error::Linkage(msg) => write!(f, "java.lang.LinkageError: {}", msg),
            Error::Verification(failures) => {
                write!(f, "{} class(es) failed verification:", failures.len())?;
                for (class, msg) in failures {
                    write!(f, "\n  {}: {}", class, msg)?;
                }
                Ok(())
            }
            Error::RegionOverflow {
                region,
                needed,
                capacity,
            } => write!(
                f,
                "{} region overflow: needed {} bytes but only {} are reserved",
                region.name(),
                needed,
                capacity
            ),
            Error::MissingSupertype { class, supertype } => write!(
                f,
                "{} cannot be archived since its supertype {} is not archived",
                class, supertype
            ),
            Error::Inconsistent(msg) => write!(f, "inconsistent class graph: {}", msg),
            Error::Map(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Error {
        Error::Zip(err)
    }
}

impl From<FormatError> for Error {
    fn from(err: FormatError) -> Error {
        Error::Format(err)
    }
}

impl From<MapError> for Error {
    fn from(err: MapError) -> Error {
        Error::Map(err)
    }
}

impl From<jvm::Error> for Error {
    fn from(err: jvm::Error) -> Error {
        match err {
            jvm::Error::IoError(err) => Error::Io(err),
            other => Error::ClassFormat(other.to_string()),
        }
    }
}

/// Fatal problem with a line of a classlist
///
/// The rendering points a caret at the offending column:
///
/// ```text
/// An error has occurred while processing class list file app.classlist 3:11.
/// Unknown input
/// Foo id: 4 sourc: foo.jar
///           ^
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatError {
    pub classlist: String,

    /// 1-based line number
    pub line_no: usize,

    /// 1-based column of the offending token
    pub column: usize,

    /// The normalized line
    pub line: String,
    pub message: String,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "An error has occurred while processing class list file {} {}:{}.",
            self.classlist, self.line_no, self.column
        )?;
        writeln!(f, "{}", self.message)?;
        let line: String = self
            .line
            .chars()
            .map(|c| if c == '\0' { ' ' } else { c })
            .collect();
        writeln!(f, "{}", line)?;
        write!(f, "{:width$}^", "", width = self.column.saturating_sub(1))
    }
}

impl std::error::Error for FormatError {}

/// Reasons an archive could not be mapped
///
/// Any of these means the process carries on without the archive.
#[derive(Debug)]
pub enum MapError {
    Io(std::io::Error),
    BadMagic(u32),
    UnsupportedVersion(u32),
    HeaderChecksum,

    /// The archive was laid out for a different region alignment
    AlignmentMismatch { expected: u64, found: u64 },

    /// The archive was dumped with different bytecode verification settings
    IncompatibleVerification,

    /// Region offsets or sizes fall outside the file or overlap
    RegionLayout(String),
    RegionChecksum(RegionKind),
    Truncated,

    /// The tagged stream is out of step with the reader
    BadTag { expected: u32, found: u32 },
    UnknownMetadataKind(u32),

    /// Class paths at runtime do not match the ones the archive was dumped with
    ClassPathMismatch(String),
    Corrupt(String),
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::Io(err) => write!(f, "I/O error mapping archive: {}", err),
            MapError::BadMagic(magic) => write!(f, "bad archive magic {:#010x}", magic),
            MapError::UnsupportedVersion(version) => {
                write!(f, "unsupported archive version {}", version)
            }
            MapError::HeaderChecksum => write!(f, "archive header checksum mismatch"),
            MapError::AlignmentMismatch { expected, found } => write!(
                f,
                "archive alignment {} does not match required alignment {}",
                found, expected
            ),
            MapError::IncompatibleVerification => {
                write!(f, "archive was dumped with incompatible verification settings")
            }
            MapError::RegionLayout(msg) => write!(f, "bad region layout: {}", msg),
            MapError::RegionChecksum(region) => {
                write!(f, "checksum mismatch in {} region", region.name())
            }
            MapError::Truncated => write!(f, "archive data is truncated"),
            MapError::BadTag { expected, found } => write!(
                f,
                "expected tag {:#x} in archive stream but found {:#x}",
                expected, found
            ),
            MapError::UnknownMetadataKind(tag) => write!(f, "unknown metadata kind {}", tag),
            MapError::ClassPathMismatch(msg) => write!(f, "class path mismatch: {}", msg),
            MapError::Corrupt(msg) => write!(f, "corrupt archive: {}", msg),
        }
    }
}

impl std::error::Error for MapError {}

impl From<std::io::Error> for MapError {
    fn from(err: std::io::Error) -> MapError {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            MapError::Truncated
        } else {
            MapError::Io(err)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn caret_points_at_column() {
        let err = FormatError {
            classlist: String::from("app.classlist"),
            line_no: 3,
            column: 11,
            line: String::from("Foo id: 4 sourc: foo.jar"),
            message: String::from("Unknown input"),
        };
        let rendered = err.to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            [
                "An error has occurred while processing class list file app.classlist 3:11.",
                "Unknown input",
                "Foo id: 4 sourc: foo.jar",
                "          ^",
            ]
        );
    }

    #[test]
    fn nul_rendered_as_space() {
        let err = FormatError {
            classlist: String::from("x"),
            line_no: 1,
            column: 1,
            line: String::from("A\0B"),
            message: String::from("oops"),
        };
        assert!(err.to_string().contains("\nA B\n"));
    }

    #[test]
    fn resolution_errors_are_not_fatal() {
        assert!(!Error::ClassNotFound(String::from("Foo")).is_fatal());
        assert!(!Error::ClassCircularity(String::from("Foo")).is_fatal());
        assert!(Error::Verification(vec![]).is_fatal());
        assert!(Error::Map(MapError::Truncated).is_fatal());
    }
}
