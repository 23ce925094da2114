use crate::cds::archive::NotFoundTable;
use crate::cds::resolver::{ClassResolutionDriver, Resolution};
use crate::cds::system_dictionary::SystemDictionary;
use crate::cds::{
    ClasslistParser, DumpSettings, Error, IdentityTable, LoaderType, SharedDictionary,
};
use crate::jvm::class_graph::{ClassData, ClassGraph, LoaderId};
use crate::jvm::BinaryName;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::io::BufRead;
use std::path::Path;

/// Counters for one pass over a classlist
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreloadStats {
    /// Class lines seen (comments and blank lines excluded)
    pub lines: usize,
    pub resolved: usize,

    /// Lines skipped because of an undefined interface id or a class that could not be found
    pub skipped: usize,

    /// Classes added to the shared dictionary, by the type of their defining loader
    pub added: BTreeMap<LoaderType, usize>,
}

impl PreloadStats {
    fn count_added(&mut self, class: &ClassData) {
        let loader_type = if class.source.is_unregistered() {
            LoaderType::Custom
        } else {
            LoaderType::of(class.loader)
        };
        *self.added.entry(loader_type).or_insert(0) += 1;
    }
}

impl fmt::Display for PreloadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lines, {} resolved, {} skipped",
            self.lines, self.resolved, self.skipped
        )?;
        for loader_type in LoaderType::ALL {
            let count = self.added.get(&loader_type).copied().unwrap_or(0);
            write!(f, ", {} {}", count, loader_type.name())?;
        }
        Ok(())
    }
}

/// Everything a single dump accumulates before the archive is built
///
/// Lives exactly as long as one dump: the identity table and the loader bookkeeping are dropped
/// together with it.
pub struct DumpSession<'g> {
    graph: &'g ClassGraph<'g>,
    settings: DumpSettings,
    system: SystemDictionary<'g>,
    identities: IdentityTable<'g>,
    dictionary: SharedDictionary,
    not_found: NotFoundTable,
    driver: ClassResolutionDriver,
    stats: PreloadStats,
}

impl<'g> DumpSession<'g> {
    pub fn new(graph: &'g ClassGraph<'g>, settings: DumpSettings) -> DumpSession<'g> {
        let system = SystemDictionary::new(graph, &settings.class_paths);
        let driver = ClassResolutionDriver::new(settings.extended_loader_info);
        DumpSession {
            graph,
            settings,
            system,
            identities: IdentityTable::new(),
            dictionary: SharedDictionary::new(),
            not_found: NotFoundTable::new(),
            driver,
            stats: PreloadStats::default(),
        }
    }

    /// Load every class named in a classlist file
    pub fn preload_classlist<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        info!("Loading classes from {}", path.display());
        let mut parser = ClasslistParser::open(path, self.settings.max_classlist_line_length)?;
        self.preload_classes(&mut parser)
    }

    /// Load every class named in a classlist
    ///
    /// Lines that cannot be resolved are skipped with a warning. Returns on the first fatal error.
    pub fn preload_classes<R: BufRead>(
        &mut self,
        parser: &mut ClasslistParser<R>,
    ) -> Result<(), Error> {
        while parser.parse_one_line(&self.identities)? {
            let record = parser.record();
            self.stats.lines += 1;
            if let Some(id) = record.undefined_interface {
                warn!(
                    "Preload Warning: interface id {} is not yet loaded, skipping {} (line {})",
                    id, record.class_name, record.line_no
                );
                self.stats.skipped += 1;
                continue;
            }

            let resolution = self.driver.resolve(
                record,
                &mut self.system,
                &mut self.identities,
                &mut self.dictionary,
            )?;
            match resolution {
                Resolution::Resolved(class) => {
                    self.stats.resolved += 1;
                    if class.source.is_unregistered() {
                        self.stats.count_added(class);
                    }
                }
                Resolution::NotFound(reason) => {
                    warn!(
                        "Preload Warning: cannot find {} (line {}): {}",
                        record.class_name, record.line_no, reason
                    );
                    self.stats.skipped += 1;
                    if self.settings.extended_loader_info && !record.is_unregistered() {
                        if let Some(loader_hash) = record.initiating_loader_hash {
                            self.not_found
                                .record_not_found(&record.class_name, loader_hash);
                        }
                    }
                }
            }
            self.collect_defined_classes();
        }
        info!("Preloaded classes: {}", self.stats);
        Ok(())
    }

    /// Put every class a builtin loader defined since the last call into the dictionary
    fn collect_defined_classes(&mut self) {
        for class in self.system.take_defined_classes() {
            if self.dictionary.add_builtin(class) {
                debug!("Added {} ({:?}) to the shared dictionary", class.name, class.loader);
                self.stats.count_added(class);
            }
        }
    }

    /// Resolve a class through a builtin loader outside of any classlist line
    ///
    /// Whatever gets defined along the way is added to the dictionary, like for a classlist line.
    /// So are array classes, which no class file ever defines.
    pub fn resolve_builtin(
        &mut self,
        loader: LoaderId,
        name: &BinaryName,
    ) -> Result<Option<&'g ClassData<'g>>, Error> {
        let resolved = match self.system.resolve_or_null(loader, name) {
            Err(err) if !err.is_fatal() => {
                debug!("Cannot resolve {}: {}", name, err);
                None
            }
            other => other?,
        };
        self.collect_defined_classes();
        if let Some(class) = resolved {
            if class.is_array() && self.dictionary.add_builtin(class) {
                debug!("Added array class {} ({:?})", class.name, class.loader);
                self.stats.count_added(class);
            }
        }
        Ok(resolved)
    }

    pub fn graph(&self) -> &'g ClassGraph<'g> {
        self.graph
    }

    pub fn settings(&self) -> &DumpSettings {
        &self.settings
    }

    pub fn system(&self) -> &SystemDictionary<'g> {
        &self.system
    }

    pub fn identities(&self) -> &IdentityTable<'g> {
        &self.identities
    }

    pub fn dictionary(&self) -> &SharedDictionary {
        &self.dictionary
    }

    pub fn dictionary_mut(&mut self) -> &mut SharedDictionary {
        &mut self.dictionary
    }

    pub fn not_found(&self) -> &NotFoundTable {
        &self.not_found
    }

    pub fn stats(&self) -> &PreloadStats {
        &self.stats
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cds::ClassPaths;
    use crate::jvm::class_file::ClassFileBuilder;
    use crate::jvm::class_graph::ClassGraphArenas;
    use crate::jvm::ClassAccessFlags;

    #[test]
    fn preloads_and_records_not_found() {
        let boot = tempfile::tempdir().unwrap();
        for (name, super_name) in [
            ("java/lang/Object", None),
            ("java/lang/String", Some("java/lang/Object")),
        ] {
            let flags = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER;
            ClassFileBuilder::new(name, super_name, flags)
                .unwrap()
                .build()
                .save_to_path(boot.path().join(format!("{}.class", name)), true)
                .unwrap();
        }
        let settings = DumpSettings {
            extended_loader_info: true,
            class_paths: ClassPaths {
                boot: vec![boot.path().to_owned()],
                ..ClassPaths::default()
            },
            ..DumpSettings::default()
        };

        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let mut session = DumpSession::new(&graph, settings);
        let classlist = "# startup classes\n\
                         java/lang/String id: 1\n\
                         \n\
                         com/example/Gone initiating_loader_hash: 1f\n\
                         com/example/Gone\n\
                         Foo id: 2 super: 1 interfaces: 7 source: foo.jar\n";
        let mut parser = ClasslistParser::from_reader(classlist.as_bytes(), "test", 1024);
        session.preload_classes(&mut parser).unwrap();

        let stats = session.stats();
        assert_eq!(stats.lines, 4);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.skipped, 3);
        assert_eq!(stats.added.get(&LoaderType::Boot), Some(&2));

        // String was listed, Object came along as its super class
        assert!(session
            .dictionary()
            .find_for_builtin_loader(&BinaryName::OBJECT)
            .is_some());
        assert_eq!(session.identities().len(), 1);
        assert!(session.not_found().check_not_found("com/example/Gone", 0x1f));
        assert_eq!(session.not_found().len(), 1);

        assert!(session
            .resolve_builtin(LoaderId::Boot, &BinaryName::OBJECT)
            .unwrap()
            .is_some());
        assert!(session
            .resolve_builtin(LoaderId::Boot, &BinaryName::THROWABLE)
            .unwrap()
            .is_none());
    }
}
