//! Reading and writing class files

mod attribute;
mod builder;
mod class;
mod constants;
mod member;
mod version;

pub use attribute::*;
pub use builder::*;
pub use class::*;
pub use constants::*;
pub use member::*;
pub use version::*;
