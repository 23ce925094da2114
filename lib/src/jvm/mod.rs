//! Manipulate JVM classes
//!
//! This is the class-file substrate the sharing archive is built on: names and descriptors, a
//! reader and writer for the class file format, and an arena-backed graph of loaded classes.
//!
//! ### Simple example
//!
//! Building a class file and reading it back in:
//!
//! ```
//! use appcds::jvm::class_file::{ClassFile, ClassFileBuilder};
//! use appcds::jvm::*;
//!
//! # fn build_class() -> Result<(), Error> {
//! let mut builder = ClassFileBuilder::new(
//!     "me/alec/Point",
//!     Some("java/lang/Object"),
//!     ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
//! )?;
//! builder.field(FieldAccessFlags::PUBLIC | FieldAccessFlags::FINAL, "x", "I")?;
//! builder.field(FieldAccessFlags::PUBLIC | FieldAccessFlags::FINAL, "y", "I")?;
//! builder.default_constructor("java/lang/Object")?;
//! let bytes = builder.build().to_bytes()?;
//!
//! let class_file = ClassFile::parse(&bytes)?;
//! assert_eq!(class_file.this_class_name()?, "me/alec/Point");
//! assert_eq!(class_file.fields.len(), 2);
//! # Ok(())
//! # }
//! # build_class().unwrap();
//! ```

mod access_flags;
mod binary_format;
pub mod class_file;
pub mod class_graph;
mod descriptors;
mod errors;
mod names;
pub mod verifier;

pub use access_flags::*;
pub use binary_format::*;
pub use class_file::{Constant, ConstantIndex};
pub use descriptors::*;
pub use errors::*;
pub use names::*;
