use super::Constant;
use std::fmt;

/// Failures in reading, writing, or interpreting class files
#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// The bytes do not make up a well-formed class file
    ClassFormat(String),

    /// Adding a constant would push the pool past its `u16` size limit
    ConstantPoolOverflow {
        constant: Constant,
        offset: u16,
    },

    /// A constant pool index is out of range or points at the wrong kind of constant
    BadConstantIndex {
        index: u16,
        expected: &'static str,
    },

    MalformedName(String),
    BadDescriptor(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::ClassFormat(msg) => write!(f, "malformed class file: {}", msg),
            Error::ConstantPoolOverflow { constant, offset } => {
                write!(f, "constant pool overflow at {} adding {:?}", offset, constant)
            }
            Error::BadConstantIndex { index, expected } => {
                write!(f, "constant pool index {} is not a {} constant", index, expected)
            }
            Error::MalformedName(msg) => write!(f, "malformed name: {}", msg),
            Error::BadDescriptor(msg) => write!(f, "bad descriptor: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}
