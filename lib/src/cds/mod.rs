//! Class data sharing: dumping loaded classes into an archive and loading them back
//!
//! A dump reads a classlist ([`ClasslistParser`]), resolves every line to a class
//! ([`ClassResolutionDriver`], with ids tracked in an [`IdentityTable`]), indexes the result in a
//! [`SharedDictionary`] and finally writes it all out through an [`archive::ArchiveBuilder`].
//!
//! A later process maps the file with an [`archive::ArchiveLoader`] and attaches it to its
//! [`SystemDictionary`]. Builtin loaders then restore archived classes by name; custom loaders
//! ([`CustomLoading`]) match them by contents and replay their hierarchy with the
//! [`HierarchyReplayValidator`].
//!
//! ### Simple example
//!
//! ```no_run
//! use appcds::cds::archive::{ArchiveBuilder, ArchiveLoader};
//! use appcds::cds::*;
//! use appcds::jvm::class_graph::{ClassGraph, ClassGraphArenas};
//! use appcds::jvm::verifier::StructuralVerifier;
//!
//! # fn dump_and_map() -> Result<(), Error> {
//! let settings = DumpSettings {
//!     class_paths: ClassPaths {
//!         boot: vec!["jdk/classes".into()],
//!         app: vec!["app.jar".into()],
//!         ..ClassPaths::default()
//!     },
//!     ..DumpSettings::default()
//! };
//! let arenas = ClassGraphArenas::new();
//! let graph = ClassGraph::new(&arenas);
//! let mut session = DumpSession::new(&graph, settings);
//! session.preload_classlist("app.classlist")?;
//! ArchiveBuilder::new(session).build(&StructuralVerifier, "app.jsa")?;
//!
//! let archive = ArchiveLoader::new(MapSettings::default()).open("app.jsa")?;
//! assert!(archive.dictionary().len() > 0);
//! # Ok(())
//! # }
//! ```

pub mod archive;
mod class_path;
mod classlist;
mod dictionary;
mod errors;
mod fingerprint;
mod identity;
mod replay;
mod resolver;
mod runtime;
mod session;
mod settings;
mod system_dictionary;

pub use class_path::*;
pub use classlist::*;
pub use dictionary::*;
pub use errors::*;
pub use fingerprint::*;
pub use identity::*;
pub use replay::*;
pub use resolver::*;
pub use runtime::*;
pub use session::*;
pub use settings::*;
pub use system_dictionary::*;
