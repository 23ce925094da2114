//! Turning classlist records into classes
//!
//! A record without `source:` names a class a builtin loader can find on its own, so it is looked
//! up through the app loader (and so its parents). A record with `source:` is defined straight
//! from that jar or directory, with the supertypes the record asserts by id; such classes are
//! only ever found again by id, or at runtime by their size and checksum.

use crate::cds::class_path::SourceCache;
use crate::cds::fingerprint::class_stream_fingerprint;
use crate::cds::system_dictionary::{SupertypeResolver, SystemDictionary};
use crate::cds::{ClasslistRecord, Error, IdentityTable, SharedDictionary};
use crate::jvm::class_graph::{ClassData, ClassSource, LoaderId};
use crate::jvm::{BinaryName, Name};
use log::{debug, trace};

/// Outcome of resolving one record
pub enum Resolution<'g> {
    Resolved(&'g ClassData<'g>),

    /// The line is skipped, but the dump carries on
    NotFound(String),
}

/// Resolves classlist records into classes in the graph
pub struct ClassResolutionDriver {
    sources: SourceCache,
    extended_loader_info: bool,
}

impl ClassResolutionDriver {
    /// `extended_loader_info` decides whether the loader hashes of records are kept
    pub fn new(extended_loader_info: bool) -> ClassResolutionDriver {
        ClassResolutionDriver {
            sources: SourceCache::new(),
            extended_loader_info,
        }
    }

    /// Resolve a record, and register its id if it has one
    ///
    /// Unregistered classes are also added to `dictionary` (builtin ones get added by whoever
    /// collects newly defined classes from `system`). Errors returned are always fatal.
    pub fn resolve<'g>(
        &mut self,
        record: &ClasslistRecord,
        system: &mut SystemDictionary<'g>,
        identities: &mut IdentityTable<'g>,
        dictionary: &mut SharedDictionary,
    ) -> Result<Resolution<'g>, Error> {
        let resolved = if record.is_unregistered() {
            self.resolve_unregistered(record, system, identities, dictionary)
        } else {
            ClassResolutionDriver::resolve_builtin(record, system)
        };
        let class = match resolved {
            Ok(Resolution::Resolved(class)) => class,
            Ok(not_found) => return Ok(not_found),
            Err(err) if !err.is_fatal() => return Ok(Resolution::NotFound(err.to_string())),
            Err(err) => return Err(err),
        };

        if let Some(id) = record.id {
            if let Err(existing) = identities.register(id, class) {
                let message = format!(
                    "Duplicated ID {} for class {} (already used by {})",
                    id, class.name, existing.name
                );
                return Err(record.format_error(1, message).into());
            }
        }
        trace!("Line {}: resolved {}", record.line_no, class.name);
        Ok(Resolution::Resolved(class))
    }

    fn resolve_builtin<'g>(
        record: &ClasslistRecord,
        system: &mut SystemDictionary<'g>,
    ) -> Result<Resolution<'g>, Error> {
        let name =
            BinaryName::from_string(record.class_name.clone()).map_err(Error::ClassFormat)?;
        if name.is_array() {
            return Ok(Resolution::NotFound(format!(
                "array class {} cannot be listed",
                name
            )));
        }
        if let Some(class) = system.resolve_or_null(LoaderId::App, &name)? {
            return Ok(Resolution::Resolved(class));
        }
        match system.load_from_boot_search_path(&name)? {
            Some(class) => Ok(Resolution::Resolved(class)),
            None => Err(Error::ClassNotFound(name.to_string())),
        }
    }

    fn resolve_unregistered<'g>(
        &mut self,
        record: &ClasslistRecord,
        system: &mut SystemDictionary<'g>,
        identities: &IdentityTable<'g>,
        dictionary: &mut SharedDictionary,
    ) -> Result<Resolution<'g>, Error> {
        let source = match &record.source_path {
            Some(source) => source,
            None => return Err(Error::ClassNotFound(record.class_name.clone())),
        };
        let name =
            BinaryName::from_string(record.class_name.clone()).map_err(Error::ClassFormat)?;

        let entry = match self.sources.get_or_open(source) {
            Ok(entry) => entry,
            Err(err) => {
                return Ok(Resolution::NotFound(format!(
                    "cannot open source {}: {}",
                    source, err
                )))
            }
        };
        let bytes = match entry.open_stream(&name.class_file_path()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(Error::ClassNotFound(name.to_string())),
            Err(err) => {
                return Ok(Resolution::NotFound(format!(
                    "cannot read {} from {}: {}",
                    name, source, err
                )))
            }
        };

        match record.fingerprint {
            Some(expected) if expected != 0 => {
                let actual = class_stream_fingerprint(&bytes);
                if actual != expected {
                    return Ok(Resolution::NotFound(format!(
                        "{} in {} has fingerprint {:x}, expected {:x}",
                        name, source, actual, expected
                    )));
                }
            }
            _ => (),
        }

        let mut supertypes = ClasslistSupertypes { record, identities };
        let class = system.define_class(
            &bytes,
            LoaderId::Boot,
            ClassSource::UNREGISTERED_INDEX,
            Some(&name),
            &mut supertypes,
        )?;

        let (defining_loader_hash, initiating_loader_hash) = if self.extended_loader_info {
            (
                record.defining_loader_hash.unwrap_or(0),
                record.initiating_loader_hash.unwrap_or(0),
            )
        } else {
            (0, 0)
        };
        if !dictionary.add_unregistered(class, defining_loader_hash, initiating_loader_hash) {
            let message = format!("Duplicated class {}", name);
            return Err(record.format_error(1, message).into());
        }
        debug!("Defined unregistered class {} from {}", name, source);
        Ok(Resolution::Resolved(class))
    }
}

/// Resolves the supertypes of a class defined from `source:` to the classes its record names
///
/// Any disagreement between the record and the class file means the classlist was written for
/// some other version of the class, which is fatal.
struct ClasslistSupertypes<'a, 'g> {
    record: &'a ClasslistRecord,
    identities: &'a IdentityTable<'g>,
}

impl<'a, 'g> ClasslistSupertypes<'a, 'g> {
    fn specified(&self, id: u32) -> Result<&'g ClassData<'g>, Error> {
        self.identities.lookup(id).ok_or_else(|| {
            let message = format!("Class id {} is not yet loaded", id);
            self.record.format_error(1, message).into()
        })
    }
}

impl<'a, 'g> SupertypeResolver<'g> for ClasslistSupertypes<'a, 'g> {
    fn resolve_super(
        &mut self,
        _system: &mut SystemDictionary<'g>,
        _class_name: &BinaryName,
        super_name: &BinaryName,
    ) -> Result<&'g ClassData<'g>, Error> {
        let super_id = match self.record.super_id {
            Some(super_id) => super_id,
            None => {
                let message = "If source location is specified, super class must be also specified";
                return Err(self.record.format_error(1, message).into());
            }
        };
        let specified = self.specified(super_id)?;
        if &specified.name != super_name {
            let message = format!(
                "The specified super class {} (id {}) does not match actual super class {}",
                specified.name, super_id, super_name
            );
            return Err(self.record.super_error(message).into());
        }
        Ok(specified)
    }

    fn declared_interfaces(
        &mut self,
        _class_name: &BinaryName,
        count: usize,
    ) -> Result<(), Error> {
        if count != self.record.interface_ids.len() {
            let message = format!(
                "The number of interfaces ({}) specified in class list does not match the class file ({})\n{}",
                self.record.interface_ids.len(),
                count,
                self.record.print_specified_interfaces(self.identities)
            );
            return Err(self.record.interfaces_error(message).into());
        }
        Ok(())
    }

    fn resolve_interface(
        &mut self,
        _system: &mut SystemDictionary<'g>,
        class_name: &BinaryName,
        interface_name: &BinaryName,
        position: usize,
    ) -> Result<&'g ClassData<'g>, Error> {
        let id = match self.record.interface_ids.get(position) {
            Some(id) => *id,
            None => {
                let message =
                    format!("Interface {} of {} is not specified", interface_name, class_name);
                return Err(self.record.interfaces_error(message).into());
            }
        };
        let specified = self.specified(id)?;
        if &specified.name != interface_name {
            let message = format!(
                "The interface {} implemented by class {} does not match the specified interface {} (id {})\n{}",
                interface_name,
                class_name,
                specified.name,
                id,
                self.record.print_specified_interfaces(self.identities)
            );
            return Err(self.record.interfaces_error(message).into());
        }
        Ok(specified)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cds::{ClassPaths, ClasslistParser};
    use crate::jvm::class_file::ClassFileBuilder;
    use crate::jvm::class_graph::{ClassGraph, ClassGraphArenas};
    use crate::jvm::ClassAccessFlags;
    use std::io::Write;
    use std::path::Path;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn class_bytes(name: &str, super_name: Option<&str>, interfaces: &[&str]) -> Vec<u8> {
        let interface = super_name.is_some() && interfaces.is_empty() && name.ends_with("able");
        let access_flags = if interface {
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT
        } else {
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER
        };
        let mut builder = ClassFileBuilder::new(name, super_name, access_flags).unwrap();
        for interface in interfaces {
            builder.interface(interface).unwrap();
        }
        builder.build().to_bytes().unwrap()
    }

    fn write_jar(path: &Path, entries: &[(&str, Vec<u8>)]) {
        let mut jar = ZipWriter::new(std::fs::File::create(path).unwrap());
        for (name, bytes) in entries {
            jar.start_file(format!("{}.class", name), SimpleFileOptions::default())
                .unwrap();
            jar.write_all(bytes).unwrap();
        }
        jar.finish().unwrap();
    }

    struct Fixture {
        dir: tempfile::TempDir,
        class_paths: ClassPaths,
    }

    fn fixture() -> Fixture {
        let object = "java/lang/Object";
        let dir = tempfile::tempdir().unwrap();
        let boot = dir.path().join("boot.jar");
        write_jar(
            &boot,
            &[
                (object, class_bytes(object, None, &[])),
                ("java/lang/Cloneable", class_bytes("java/lang/Cloneable", Some(object), &[])),
                ("java/lang/Runnable", class_bytes("java/lang/Runnable", Some(object), &[])),
                ("java/io/Serializable", class_bytes("java/io/Serializable", Some(object), &[])),
            ],
        );
        let runnable_and_cloneable = ["java/lang/Runnable", "java/lang/Cloneable"];
        write_jar(
            &dir.path().join("foo.jar"),
            &[
                ("Bar", class_bytes("Bar", Some(object), &["java/lang/Cloneable"])),
                ("Baz", class_bytes("Baz", Some(object), &runnable_and_cloneable)),
            ],
        );
        Fixture {
            class_paths: ClassPaths {
                boot: vec![boot],
                ..ClassPaths::default()
            },
            dir,
        }
    }

    /// Resolve every line of a classlist, stopping at the first fatal error
    fn run<'g>(
        classlist: &str,
        system: &mut SystemDictionary<'g>,
        identities: &mut IdentityTable<'g>,
        dictionary: &mut SharedDictionary,
    ) -> Result<Vec<Option<String>>, Error> {
        let mut parser = ClasslistParser::from_reader(classlist.as_bytes(), "test.classlist", 1024);
        let mut driver = ClassResolutionDriver::new(false);
        let mut outcomes = vec![];
        while parser.parse_one_line(identities)? {
            let record = parser.record();
            if record.is_skipped() {
                outcomes.push(None);
                continue;
            }
            match driver.resolve(record, system, identities, dictionary)? {
                Resolution::Resolved(class) => outcomes.push(Some(class.name.to_string())),
                Resolution::NotFound(_) => outcomes.push(None),
            }
        }
        Ok(outcomes)
    }

    #[test]
    fn keeps_interface_order() {
        let fixture = fixture();
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let mut system = SystemDictionary::new(&graph, &fixture.class_paths);
        let mut identities = IdentityTable::new();
        let mut dictionary = SharedDictionary::new();
        let foo_jar = fixture.dir.path().join("foo.jar");
        let classlist = format!(
            "java/lang/Object id: 0\n\
             java/lang/Cloneable id: 2\n\
             java/lang/Runnable id: 5\n\
             Baz id: 4 super: 0 interfaces: 5 2 source: {}\n\
             com/example/Missing id: 9\n",
            foo_jar.display()
        );
        let outcomes = run(&classlist, &mut system, &mut identities, &mut dictionary).unwrap();
        assert_eq!(outcomes[3].as_deref(), Some("Baz"));
        assert_eq!(outcomes[4], None);

        let baz = identities.lookup(4).unwrap();
        assert!(baz.source.is_unregistered());
        let interfaces: Vec<_> = baz.interface_list();
        assert!(std::ptr::eq(interfaces[0], identities.lookup(5).unwrap()));
        assert!(std::ptr::eq(interfaces[1], identities.lookup(2).unwrap()));
        assert!(graph.lookup_class(LoaderId::Boot, &baz.name).is_none());

        let entries = dictionary.find_for_unregistered_loader(&baz.name);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].raw_size, baz.source.raw_size);
        assert!(!identities.contains(9));
    }

    #[test]
    fn classlist_must_match_class_file() {
        let fixture = fixture();
        let foo_jar = fixture.dir.path().join("foo.jar");
        let jar = foo_jar.display();
        let header = "java/lang/Object id: 0\n\
                      java/lang/Cloneable id: 1\n\
                      java/lang/Runnable id: 2\n";
        let cases = [
            (
                format!("Bar id: 3 super: 1 interfaces: 1 source: {}", jar),
                "does not match actual super class",
            ),
            (
                format!("Bar id: 3 super: 0 source: {}", jar),
                "The number of interfaces (0)",
            ),
            (
                format!("Bar id: 3 super: 0 interfaces: 2 source: {}", jar),
                "does not match the specified interface",
            ),
            (
                format!("Bar id: 0 super: 0 interfaces: 1 source: {}", jar),
                "Duplicated ID 0",
            ),
        ];
        for (line, expected) in cases {
            let arenas = ClassGraphArenas::new();
            let graph = ClassGraph::new(&arenas);
            let mut system = SystemDictionary::new(&graph, &fixture.class_paths);
            let mut identities = IdentityTable::new();
            let mut dictionary = SharedDictionary::new();
            let classlist = format!("{}{}\n", header, line);
            match run(&classlist, &mut system, &mut identities, &mut dictionary) {
                Err(Error::Format(err)) => {
                    assert!(err.message.contains(expected), "{}: {}", line, err.message)
                }
                Err(err) => panic!("{}: unexpected error {}", line, err),
                Ok(_) => panic!("{}: accepted", line),
            }
        }
    }

    #[test]
    fn soft_failures_skip_the_line() {
        let fixture = fixture();
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let mut system = SystemDictionary::new(&graph, &fixture.class_paths);
        let mut identities = IdentityTable::new();
        let mut dictionary = SharedDictionary::new();
        let foo_jar = fixture.dir.path().join("foo.jar");
        let classlist = format!(
            "java/lang/Object id: 0\n\
             java/lang/Cloneable id: 1\n\
             Bar id: 3 super: 0 interfaces: 1 source: {jar} fingerprint: 1234\n\
             Bar id: 4 super: 0 interfaces: 1 source: /no/such.jar\n\
             Qux id: 5 super: 0 source: {jar}\n\
             [Ljava/lang/Object;\n\
             Bar id: 6 super: 0 interfaces: 1 source: {jar}\n",
            jar = foo_jar.display()
        );
        let outcomes = run(&classlist, &mut system, &mut identities, &mut dictionary).unwrap();
        assert_eq!(outcomes[2..6], [None, None, None, None]);
        assert_eq!(outcomes[6].as_deref(), Some("Bar"));
        assert!(identities.contains(6));
        assert!(!identities.contains(3));

        // Same class again from the same source and loader
        let classlist = format!("Bar id: 7 super: 0 interfaces: 1 source: {}\n", foo_jar.display());
        match run(&classlist, &mut system, &mut identities, &mut dictionary) {
            Err(Error::Format(err)) => assert!(err.message.contains("Duplicated class Bar")),
            _ => panic!("duplicate class accepted"),
        }
    }
}
