//! Class data sharing for JVM class metadata
//!
//! The [`jvm`] module is the class-file substrate: names, descriptors, a class file reader and
//! writer, and an arena-backed class graph. The [`cds`] module builds on it to turn a classlist
//! into a memory-mappable archive and to consult that archive when classes are loaded again.

pub mod cds;
pub mod jvm;
