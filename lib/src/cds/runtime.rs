//! Class loading for user-defined loaders once an archive is attached
//!
//! A custom loader first delegates to the builtin loaders. Classes it has to define itself are
//! looked up among the archive's unregistered entries by name and contents. A candidate is only
//! restored once every recorded supertype has been matched against what this loader actually
//! resolves, either as the very class that was archived or as a compatible stand-in. Anything
//! else falls back to parsing the class file, so using the archive never changes which classes
//! a loader ends up with.

use crate::cds::archive::{ArchivedKind, MappedArchive};
use crate::cds::class_path::ClassPathEntry;
use crate::cds::replay::{splice, HierarchyReplayValidator, Slot};
use crate::cds::system_dictionary::{SupertypeResolver, SystemDictionary};
use crate::cds::{ArchivedClassEntry, ClassRef, Error};
use crate::jvm::class_graph::{ClassData, ClassSource, LoaderId};
use crate::jvm::{BinaryName, Name, ParseDescriptor, RefType};
use log::debug;
use std::collections::HashSet;
use std::path::Path;

/// A user-defined class loader, as far as class sharing is concerned
pub trait CustomLoader {
    /// Distinguishes this loader from other custom loaders in the class graph
    fn id(&self) -> u32;

    /// Opaque identity recorded as `initiating_loader_hash` when classlists are generated
    fn loader_hash(&self) -> u32 {
        self.id()
    }

    /// Raw class file for a class, if this loader can find one
    fn find_class_bytes(&mut self, name: &BinaryName) -> Result<Option<Vec<u8>>, Error>;
}

/// Custom loader reading class files from directories and jars
pub struct ClassPathLoader {
    id: u32,
    entries: Vec<ClassPathEntry>,
}

impl ClassPathLoader {
    pub fn new<P: AsRef<Path>>(id: u32, paths: &[P]) -> Result<ClassPathLoader, Error> {
        let entries = paths
            .iter()
            .map(ClassPathEntry::open)
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(ClassPathLoader { id, entries })
    }
}

impl CustomLoader for ClassPathLoader {
    fn id(&self) -> u32 {
        self.id
    }

    fn find_class_bytes(&mut self, name: &BinaryName) -> Result<Option<Vec<u8>>, Error> {
        let entry_name = name.class_file_path();
        for entry in &mut self.entries {
            if let Some(bytes) = entry.open_stream(&entry_name)? {
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }
}

/// Classes a custom loader defined itself, by where they came from
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct CustomLoadStats {
    /// Restored from an unregistered archive entry
    pub shared: usize,

    /// Parsed from a class file
    pub defined: usize,
}

/// Loading on behalf of one custom loader
pub struct CustomLoading<'l> {
    loader: &'l mut dyn CustomLoader,

    /// Classes this loader is in the middle of defining
    in_progress: HashSet<BinaryName>,
    stats: CustomLoadStats,
}

impl<'l> CustomLoading<'l> {
    pub fn new(loader: &'l mut dyn CustomLoader) -> CustomLoading<'l> {
        CustomLoading {
            loader,
            in_progress: HashSet::new(),
            stats: CustomLoadStats::default(),
        }
    }

    pub fn loader_id(&self) -> LoaderId {
        LoaderId::Custom(self.loader.id())
    }

    pub fn stats(&self) -> CustomLoadStats {
        self.stats
    }

    /// Find or load a class the way a parent-first custom loader would
    pub fn load_class<'g>(
        &mut self,
        system: &mut SystemDictionary<'g>,
        name: &BinaryName,
    ) -> Result<&'g ClassData<'g>, Error> {
        let loader = self.loader_id();
        if name.is_array() {
            let array_type = RefType::<BinaryName>::parse(name.as_str())
                .map_err(|err| Error::ClassFormat(format!("{}: {}", name, err)))?;
            if let RefType::ObjectArray(array_type) = array_type {
                self.load_class(system, &array_type.element_type)?;
            }
            return system
                .resolve_array(loader, name)?
                .ok_or_else(|| Error::ClassNotFound(name.to_string()));
        }
        if let Some(class) = system.graph().lookup_class(loader, name) {
            return Ok(class);
        }

        let known_not_found = system.archive().map_or(false, |archive| {
            archive.check_not_found(name.as_str(), self.loader.loader_hash())
        });
        if known_not_found {
            debug!("{} is known to be missing from the builtin loaders", name);
        } else if let Some(class) = system.resolve_or_null(LoaderId::App, name)? {
            return Ok(class);
        }

        if !self.in_progress.insert(name.clone()) {
            return Err(Error::ClassCircularity(name.to_string()));
        }
        let defined = self.define(system, name);
        self.in_progress.remove(name);
        defined
    }

    fn define<'g>(
        &mut self,
        system: &mut SystemDictionary<'g>,
        name: &BinaryName,
    ) -> Result<&'g ClassData<'g>, Error> {
        let bytes = self
            .loader
            .find_class_bytes(name)?
            .ok_or_else(|| Error::ClassNotFound(name.to_string()))?;

        if let Some(class) = self.load_shared(system, name, &bytes)? {
            self.stats.shared += 1;
            return Ok(class);
        }
        let loader = self.loader_id();
        let class =
            system.define_class(&bytes, loader, ClassSource::NO_CLASS_PATH, Some(name), self)?;
        self.stats.defined += 1;
        Ok(class)
    }

    /// Restore the first unregistered entry with these contents whose hierarchy can be replayed
    fn load_shared<'g>(
        &mut self,
        system: &mut SystemDictionary<'g>,
        name: &BinaryName,
        bytes: &[u8],
    ) -> Result<Option<&'g ClassData<'g>>, Error> {
        let archive = match system.archive() {
            Some(archive) => archive,
            None => return Ok(None),
        };
        let contents = ClassSource::from_bytes(ClassSource::NO_CLASS_PATH, bytes);
        let candidates: Vec<&'g ArchivedClassEntry> = archive
            .dictionary()
            .find_for_unregistered_loader(name)
            .into_iter()
            .filter(|entry| entry.same_contents(contents.raw_size, contents.raw_crc32))
            .collect();
        for entry in candidates {
            if let Some(class) = self.replay(system, archive, name, entry)? {
                return Ok(Some(class));
            }
        }
        debug!("No archived {} fits the hierarchy of {:?}", name, self.loader_id());
        Ok(None)
    }

    fn replay<'g>(
        &mut self,
        system: &mut SystemDictionary<'g>,
        archive: &'g MappedArchive,
        name: &BinaryName,
        entry: &'g ArchivedClassEntry,
    ) -> Result<Option<&'g ClassData<'g>>, Error> {
        let record = match entry.class {
            ClassRef::Record(record) => record,
            ClassRef::Live(_) => return Ok(None),
        };
        let archived = match archive.class_record(record) {
            Some(archived) if archived.kind == ArchivedKind::Instance => archived,
            _ => return Ok(None),
        };
        if entry.recorded_super.is_some() != archived.super_name.is_some()
            || entry.recorded_interfaces.len() != archived.interface_names.len()
        {
            return Ok(None);
        }

        // The super class (if any) comes first, then the local interfaces in declaration order
        let mut slots: Vec<Slot<'g>> = entry
            .recorded_super
            .iter()
            .chain(entry.recorded_interfaces.iter())
            .map(|index| Slot::Archived(*index))
            .collect();
        let supertype_names: Vec<&BinaryName> = archived
            .super_name
            .iter()
            .chain(archived.interface_names.iter())
            .collect();

        let dictionary = archive.dictionary();
        let mut validator = HierarchyReplayValidator::new(dictionary);
        for (position, supertype_name) in supertype_names.into_iter().enumerate() {
            let expected_index = match slots[position] {
                Slot::Archived(index) => index,
                Slot::Live(_) => continue,
            };
            let expected = match dictionary.entry(expected_index) {
                Some(expected) => expected,
                None => return Ok(None),
            };
            let actual = match self.load_class(system, supertype_name) {
                Ok(actual) => actual,
                Err(err) if !err.is_fatal() => {
                    debug!("Supertype {} of archived {}: {}", supertype_name, name, err);
                    return Ok(None);
                }
                Err(err) => return Err(err),
            };
            if !validator.is_compatible(expected, actual) {
                debug!(
                    "{} does not match the archived supertype {} of {}",
                    actual.name, expected.name, name
                );
                return Ok(None);
            }
            splice(&mut slots, expected_index, actual);
        }

        let live = match slots.iter().map(Slot::live).collect::<Option<Vec<_>>>() {
            Some(live) => live,
            None => return Ok(None),
        };
        let (superclass, interfaces) = if entry.recorded_super.is_some() {
            (Some(live[0]), &live[1..])
        } else {
            (None, &live[..])
        };
        let loader = self.loader_id();
        let constraints = entry.verification_constraints();
        if !system.check_constraints(name, constraints, loader, superclass, interfaces)? {
            debug!("Verification constraints of archived {} failed", name);
            return Ok(None);
        }
        system
            .restore_class(record, loader, superclass, interfaces)
            .map(Some)
    }
}

impl<'l, 'g> SupertypeResolver<'g> for CustomLoading<'l> {
    fn resolve_super(
        &mut self,
        system: &mut SystemDictionary<'g>,
        _class_name: &BinaryName,
        super_name: &BinaryName,
    ) -> Result<&'g ClassData<'g>, Error> {
        self.load_class(system, super_name)
    }

    fn resolve_interface(
        &mut self,
        system: &mut SystemDictionary<'g>,
        _class_name: &BinaryName,
        interface_name: &BinaryName,
        _position: usize,
    ) -> Result<&'g ClassData<'g>, Error> {
        self.load_class(system, interface_name)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cds::ClassPaths;
    use crate::jvm::class_file::ClassFileBuilder;
    use crate::jvm::class_graph::{ClassGraph, ClassGraphArenas};
    use crate::jvm::ClassAccessFlags;

    fn write_class(root: &Path, name: &str, super_name: &str) {
        let flags = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER;
        ClassFileBuilder::new(name, Some(super_name), flags)
            .unwrap()
            .build()
            .save_to_path(root.join(format!("{}.class", name)), true)
            .unwrap();
    }

    fn name(name: &str) -> BinaryName {
        BinaryName::from_string(name.to_owned()).unwrap()
    }

    #[test]
    fn defines_without_an_archive() {
        let boot = tempfile::tempdir().unwrap();
        ClassFileBuilder::new("java/lang/Object", None, ClassAccessFlags::PUBLIC)
            .unwrap()
            .build()
            .save_to_path(boot.path().join("java/lang/Object.class"), true)
            .unwrap();
        for interface in ["java/lang/Cloneable", "java/io/Serializable"] {
            let flags =
                ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
            ClassFileBuilder::new(interface, Some("java/lang/Object"), flags)
                .unwrap()
                .build()
                .save_to_path(boot.path().join(format!("{}.class", interface)), true)
                .unwrap();
        }
        let custom = tempfile::tempdir().unwrap();
        write_class(custom.path(), "Foo", "java/lang/Object");
        write_class(custom.path(), "Bar", "Foo");
        write_class(custom.path(), "Ping", "Pong");
        write_class(custom.path(), "Pong", "Ping");

        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let class_paths = ClassPaths {
            boot: vec![boot.path().to_owned()],
            ..ClassPaths::default()
        };
        let mut system = SystemDictionary::new(&graph, &class_paths);
        let mut loader = ClassPathLoader::new(3, &[custom.path()]).unwrap();
        let mut loading = CustomLoading::new(&mut loader);

        let bar = loading.load_class(&mut system, &name("Bar")).unwrap();
        assert_eq!(bar.loader, LoaderId::Custom(3));
        let foo = bar.superclass.unwrap();
        assert_eq!(foo.name, name("Foo"));
        assert_eq!(foo.superclass.unwrap().loader, LoaderId::Boot);
        assert_eq!(
            loading.stats(),
            CustomLoadStats {
                shared: 0,
                defined: 2
            }
        );

        // Already loaded, so nothing new gets defined
        assert!(std::ptr::eq(
            loading.load_class(&mut system, &name("Bar")).unwrap(),
            bar
        ));
        assert_eq!(loading.stats().defined, 2);

        let array = loading.load_class(&mut system, &name("[[LBar;")).unwrap();
        assert_eq!(array.loader, LoaderId::Custom(3));

        assert!(matches!(
            loading.load_class(&mut system, &name("Ping")),
            Err(Error::ClassCircularity(_))
        ));
        assert!(matches!(
            loading.load_class(&mut system, &name("Missing")),
            Err(Error::ClassNotFound(_))
        ));
    }
}
