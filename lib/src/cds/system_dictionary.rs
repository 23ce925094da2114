//! Class loading for the builtin loaders
//!
//! The three builtin loaders delegate parent-first (`App` to `Platform` to `Boot`), and each one
//! reads class files from its own part of the shared path table. When an archive is attached, a
//! builtin loader first tries to restore the class from the archive, and only parses the class
//! file if that fails.
//!
//! [`SystemDictionary::define_class`] is the single place where a class file turns into a class in
//! the graph. The caller decides how supertypes get resolved through a [`SupertypeResolver`]: the
//! builtin loaders use ordinary delegation, while the dump checks supertypes against the classlist
//! record being processed.

use crate::cds::archive::{ArchivedKind, MappedArchive, SharedPathTable};
use crate::cds::class_path::ClassPathEntry;
use crate::cds::{ClassPaths, ClassRef, Error, LoaderType};
use crate::jvm::class_file::{ClassFile, Code};
use crate::jvm::class_graph::{
    Assignable, ClassData, ClassGraph, ClassId, ClassKind, ClassSource, FieldData, LoaderId,
    MethodData,
};
use crate::jvm::verifier::VerificationConstraint;
use crate::jvm::{
    ArrayType, BinaryName, ClassAccessFlags, FieldAccessFlags, FieldType, MethodAccessFlags,
    MethodDescriptor, Name, ParseDescriptor, RefType, UnqualifiedName,
};
use log::{debug, trace, warn};
use std::cell::Cell;
use std::collections::HashSet;
use std::path::PathBuf;

/// How the supertypes named by a class file being defined get resolved
pub trait SupertypeResolver<'g> {
    fn resolve_super(
        &mut self,
        system: &mut SystemDictionary<'g>,
        class_name: &BinaryName,
        super_name: &BinaryName,
    ) -> Result<&'g ClassData<'g>, Error>;

    /// Called with the number of interfaces the class file declares, before any is resolved
    fn declared_interfaces(
        &mut self,
        _class_name: &BinaryName,
        _count: usize,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// `position` is the index of the interface in the class file's interface list
    fn resolve_interface(
        &mut self,
        system: &mut SystemDictionary<'g>,
        class_name: &BinaryName,
        interface_name: &BinaryName,
        position: usize,
    ) -> Result<&'g ClassData<'g>, Error>;
}

/// Resolve supertypes through a loader (and so its parents)
pub struct DelegatingResolver {
    pub loader: LoaderId,
}

impl<'g> SupertypeResolver<'g> for DelegatingResolver {
    fn resolve_super(
        &mut self,
        system: &mut SystemDictionary<'g>,
        _class_name: &BinaryName,
        super_name: &BinaryName,
    ) -> Result<&'g ClassData<'g>, Error> {
        system.resolve_or_fail(self.loader, super_name)
    }

    fn resolve_interface(
        &mut self,
        system: &mut SystemDictionary<'g>,
        _class_name: &BinaryName,
        interface_name: &BinaryName,
        _position: usize,
    ) -> Result<&'g ClassData<'g>, Error> {
        system.resolve_or_fail(self.loader, interface_name)
    }
}

/// Class path entries are only opened the first time they are searched
enum SearchEntry {
    Unopened,
    Open(ClassPathEntry),
    Unavailable,
}

struct SearchPath {
    classpath_index: i16,
    loader: LoaderId,
    path: PathBuf,
    entry: SearchEntry,
}

impl SearchPath {
    fn read(&mut self, entry_name: &str) -> Result<Option<Vec<u8>>, Error> {
        if let SearchEntry::Unopened = self.entry {
            self.entry = match ClassPathEntry::open(&self.path) {
                Ok(entry) => SearchEntry::Open(entry),
                Err(err) => {
                    warn!("Cannot open class path entry {}: {}", self.path.display(), err);
                    SearchEntry::Unavailable
                }
            };
        }
        match &mut self.entry {
            SearchEntry::Open(entry) => entry.open_stream(entry_name),
            _ => Ok(None),
        }
    }
}

/// Members of a class file, decoded before the class itself is allocated
struct DecodedMethod {
    name: UnqualifiedName,
    descriptor: MethodDescriptor<BinaryName>,
    access_flags: MethodAccessFlags,
    code: Option<Code>,
}

struct DecodedField {
    name: UnqualifiedName,
    descriptor: FieldType<BinaryName>,
    access_flags: FieldAccessFlags,
}

pub struct SystemDictionary<'g> {
    graph: &'g ClassGraph<'g>,
    shared_paths: SharedPathTable,
    search_paths: Vec<SearchPath>,

    /// Classes whose supertypes are being resolved (reaching one again means a cycle)
    placeholders: HashSet<(LoaderId, BinaryName)>,

    /// Builtin classes defined from class files since the last `take_defined_classes`
    newly_defined: Vec<&'g ClassData<'g>>,

    archive: Option<&'g MappedArchive>,
}

impl<'g> SystemDictionary<'g> {
    pub fn new(graph: &'g ClassGraph<'g>, class_paths: &ClassPaths) -> SystemDictionary<'g> {
        let shared_paths = SharedPathTable::new(class_paths);
        let search_paths = shared_paths
            .entries()
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| {
                Some(SearchPath {
                    classpath_index: idx as i16,
                    loader: entry.loader_type.loader_id()?,
                    path: entry.path.clone(),
                    entry: SearchEntry::Unopened,
                })
            })
            .collect();
        SystemDictionary {
            graph,
            shared_paths,
            search_paths,
            placeholders: HashSet::new(),
            newly_defined: vec![],
            archive: None,
        }
    }

    /// Consult this archive before reading class files
    pub fn attach_archive(&mut self, archive: &'g MappedArchive) {
        self.archive = Some(archive);
    }

    pub fn archive(&self) -> Option<&'g MappedArchive> {
        self.archive
    }

    pub fn graph(&self) -> &'g ClassGraph<'g> {
        self.graph
    }

    pub fn shared_paths(&self) -> &SharedPathTable {
        &self.shared_paths
    }

    /// Find or load a class through a loader, delegating to its parents first
    ///
    /// `Ok(None)` means no loader in the chain has the class.
    pub fn resolve_or_null(
        &mut self,
        loader: LoaderId,
        name: &BinaryName,
    ) -> Result<Option<&'g ClassData<'g>>, Error> {
        if name.is_array() {
            return self.resolve_array(loader, name);
        }
        if let Some(class) = self.graph.lookup_class(loader, name) {
            return Ok(Some(class));
        }
        if let Some(parent) = loader.parent() {
            if let Some(class) = self.resolve_or_null(parent, name)? {
                return Ok(Some(class));
            }
        }
        if !loader.is_builtin() {
            return Ok(None);
        }
        if let Some(class) = self.load_shared_class(loader, name)? {
            return Ok(Some(class));
        }
        self.load_from_search_path(loader, name)
    }

    pub fn resolve_or_fail(
        &mut self,
        loader: LoaderId,
        name: &BinaryName,
    ) -> Result<&'g ClassData<'g>, Error> {
        self.resolve_or_null(loader, name)?
            .ok_or_else(|| Error::ClassNotFound(name.to_string()))
    }

    /// Look for a class on the boot and platform search paths only
    pub fn load_from_boot_search_path(
        &mut self,
        name: &BinaryName,
    ) -> Result<Option<&'g ClassData<'g>>, Error> {
        for loader in [LoaderId::Boot, LoaderId::Platform] {
            if let Some(class) = self.graph.lookup_class(loader, name) {
                return Ok(Some(class));
            }
            if let Some(class) = self.load_from_search_path(loader, name)? {
                return Ok(Some(class));
            }
        }
        Ok(None)
    }

    fn load_from_search_path(
        &mut self,
        loader: LoaderId,
        name: &BinaryName,
    ) -> Result<Option<&'g ClassData<'g>>, Error> {
        let entry_name = name.class_file_path();
        for idx in 0..self.search_paths.len() {
            if self.search_paths[idx].loader != loader {
                continue;
            }
            let bytes = match self.search_paths[idx].read(&entry_name)? {
                Some(bytes) => bytes,
                None => continue,
            };
            let classpath_index = self.search_paths[idx].classpath_index;
            trace!(
                "Found {} in {}",
                name,
                self.search_paths[idx].path.display()
            );
            let mut resolver = DelegatingResolver { loader };
            let class =
                self.define_class(&bytes, loader, classpath_index, Some(name), &mut resolver)?;
            return Ok(Some(class));
        }
        Ok(None)
    }

    /// Array class with this name, created on demand by the loader of its element class
    pub fn resolve_array(
        &mut self,
        loader: LoaderId,
        name: &BinaryName,
    ) -> Result<Option<&'g ClassData<'g>>, Error> {
        let array_type = RefType::<BinaryName>::parse(name.as_str())
            .map_err(|err| Error::ClassFormat(format!("{}: {}", name, err)))?;
        let (defining_loader, kind) = match array_type {
            RefType::ObjectArray(ArrayType {
                additional_dimensions,
                element_type,
            }) => {
                let element = match self.resolve_or_null(loader, &element_type)? {
                    Some(element) => element,
                    None => return Ok(None),
                };
                let kind = ClassKind::ObjectArray(ArrayType {
                    additional_dimensions,
                    element_type: element,
                });
                (element.loader, kind)
            }
            RefType::PrimitiveArray(array_type) => {
                (LoaderId::Boot, ClassKind::TypeArray(array_type))
            }
            RefType::Object(_) => {
                return Err(Error::ClassFormat(format!("{} is not an array", name)));
            }
        };
        if let Some(class) = self.graph.lookup_class(defining_loader, name) {
            return Ok(Some(class));
        }

        let object = self.resolve_or_fail(LoaderId::Boot, &BinaryName::OBJECT)?;
        let cloneable = self.resolve_or_fail(LoaderId::Boot, &BinaryName::CLONEABLE)?;
        let serializable = self.resolve_or_fail(LoaderId::Boot, &BinaryName::SERIALIZABLE)?;
        let mut data = ClassData::new(
            name.clone(),
            defining_loader,
            ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL | ClassAccessFlags::ABSTRACT,
            kind,
            Some(object),
            ClassSource::synthetic(),
            Default::default(),
        );
        data.shared_record = self.archive.and_then(|archive| {
            match archive.dictionary().find_for_builtin_loader(name) {
                Some(entry) if entry.loader_type == LoaderType::of(defining_loader) => {
                    match entry.class {
                        ClassRef::Record(record) => Some(record),
                        ClassRef::Live(_) => None,
                    }
                }
                _ => None,
            }
        });
        let class = self.graph.add_class(data);
        class.interfaces.push(cloneable);
        class.interfaces.push(serializable);
        debug!("Created array class {} for {:?}", name, defining_loader);
        Ok(Some(class))
    }

    /// Parse a class file and add the class it defines to the graph
    ///
    /// Classes defined with [`ClassSource::UNREGISTERED_INDEX`] are left out of name-based lookup.
    pub fn define_class(
        &mut self,
        bytes: &[u8],
        loader: LoaderId,
        classpath_index: i16,
        expected: Option<&BinaryName>,
        resolver: &mut dyn SupertypeResolver<'g>,
    ) -> Result<&'g ClassData<'g>, Error> {
        let class_file =
            ClassFile::parse(bytes).map_err(|err| Error::ClassFormat(err.to_string()))?;
        let name = binary_name(class_file.this_class_name()?)?;
        if name.is_array() {
            return Err(Error::ClassFormat(format!(
                "class file defines array class {}",
                name
            )));
        }
        if let Some(expected) = expected {
            if expected != &name {
                return Err(Error::NoClassDefFound {
                    expected: expected.to_string(),
                    actual: name.to_string(),
                });
            }
        }
        let unregistered = classpath_index == ClassSource::UNREGISTERED_INDEX;
        if !unregistered && self.graph.lookup_class(loader, &name).is_some() {
            return Err(Error::Linkage(format!(
                "loader {:?} attempted duplicate class definition for {}",
                loader, name
            )));
        }

        let super_name = class_file.super_class_name()?.map(binary_name).transpose()?;
        if super_name.is_none() && name != BinaryName::OBJECT {
            return Err(Error::ClassFormat(format!("{} has no super class", name)));
        }
        let interface_names = class_file
            .interface_names()?
            .into_iter()
            .map(binary_name)
            .collect::<Result<Vec<_>, _>>()?;
        let (methods, fields) = SystemDictionary::decode_members(&name, &class_file)?;

        let placeholder = (loader, name.clone());
        if !self.placeholders.insert(placeholder.clone()) {
            return Err(Error::ClassCircularity(name.to_string()));
        }
        let supertypes =
            self.resolve_supertypes(&name, super_name.as_ref(), &interface_names, resolver);
        self.placeholders.remove(&placeholder);
        let (superclass, interfaces) = supertypes?;

        let data = ClassData::new(
            name,
            loader,
            class_file.access_flags,
            ClassKind::Instance,
            superclass,
            ClassSource::from_bytes(classpath_index, bytes),
            class_file.constants,
        );
        let class = if unregistered {
            self.graph.add_unregistered_class(data)
        } else {
            self.graph.add_class(data)
        };
        for interface in interfaces {
            class.interfaces.push(interface);
        }
        for method in methods {
            self.graph.add_method(MethodData {
                class,
                name: method.name,
                descriptor: method.descriptor,
                access_flags: method.access_flags,
                code: method.code,
                fingerprint: Cell::new(None),
                invocation_count: Cell::new(0),
            });
        }
        for field in fields {
            self.graph.add_field(FieldData {
                class,
                name: field.name,
                descriptor: field.descriptor,
                access_flags: field.access_flags,
            });
        }

        if loader.is_builtin() && !unregistered {
            self.newly_defined.push(class);
        }
        debug!(
            "Defined {} for {:?} (classpath index {}, {} bytes)",
            class.name, loader, classpath_index, class.source.raw_size
        );
        Ok(class)
    }

    fn decode_members(
        class_name: &BinaryName,
        class_file: &ClassFile,
    ) -> Result<(Vec<DecodedMethod>, Vec<DecodedField>), Error> {
        let constants = &class_file.constants;
        let mut methods = Vec::with_capacity(class_file.methods.len());
        for method in &class_file.methods {
            let name = unqualified_name(constants.utf8(method.name_index)?)?;
            let descriptor = MethodDescriptor::parse(constants.utf8(method.descriptor_index)?)
                .map_err(|err| {
                    Error::ClassFormat(format!("method {}.{}: {}", class_name, name, err))
                })?;
            methods.push(DecodedMethod {
                name,
                descriptor,
                access_flags: method.access_flags,
                code: method.code(constants)?,
            });
        }
        let mut fields = Vec::with_capacity(class_file.fields.len());
        for field in &class_file.fields {
            let name = unqualified_name(constants.utf8(field.name_index)?)?;
            let descriptor = FieldType::parse(constants.utf8(field.descriptor_index)?)
                .map_err(|err| {
                    Error::ClassFormat(format!("field {}.{}: {}", class_name, name, err))
                })?;
            fields.push(DecodedField {
                name,
                descriptor,
                access_flags: field.access_flags,
            });
        }
        Ok((methods, fields))
    }

    #[allow(clippy::type_complexity)]
    fn resolve_supertypes(
        &mut self,
        class_name: &BinaryName,
        super_name: Option<&BinaryName>,
        interface_names: &[BinaryName],
        resolver: &mut dyn SupertypeResolver<'g>,
    ) -> Result<(Option<&'g ClassData<'g>>, Vec<&'g ClassData<'g>>), Error> {
        let superclass = match super_name {
            Some(super_name) => {
                let superclass = resolver.resolve_super(self, class_name, super_name)?;
                if superclass.is_interface() {
                    return Err(Error::IncompatibleClassChange(format!(
                        "class {} has interface {} as super class",
                        class_name, superclass.name
                    )));
                }
                Some(superclass)
            }
            None => None,
        };

        resolver.declared_interfaces(class_name, interface_names.len())?;
        let mut interfaces = Vec::with_capacity(interface_names.len());
        for (position, interface_name) in interface_names.iter().enumerate() {
            let interface =
                resolver.resolve_interface(self, class_name, interface_name, position)?;
            if !interface.is_interface() {
                return Err(Error::IncompatibleClassChange(format!(
                    "class {} can not implement {}, because it is not an interface",
                    class_name, interface.name
                )));
            }
            interfaces.push(interface);
        }
        Ok((superclass, interfaces))
    }

    /// Builtin classes defined from class files since the last call
    pub fn take_defined_classes(&mut self) -> Vec<&'g ClassData<'g>> {
        std::mem::take(&mut self.newly_defined)
    }

    /// Try to restore a builtin class from the attached archive
    ///
    /// Any mismatch (another loader type archived it, a supertype is not itself shared, a
    /// verification constraint no longer holds) means the class is loaded from its class file
    /// instead.
    fn load_shared_class(
        &mut self,
        loader: LoaderId,
        name: &BinaryName,
    ) -> Result<Option<&'g ClassData<'g>>, Error> {
        let archive = match self.archive {
            Some(archive) => archive,
            None => return Ok(None),
        };
        let entry = match archive.dictionary().find_for_builtin_loader(name) {
            Some(entry) if entry.loader_type == LoaderType::of(loader) => entry,
            _ => return Ok(None),
        };
        let record = match entry.class {
            ClassRef::Record(record) => record,
            ClassRef::Live(_) => return Ok(None),
        };
        let archived = match archive.class_record(record) {
            Some(archived) if archived.kind == ArchivedKind::Instance => archived,
            _ => return Ok(None),
        };

        let superclass = match &archived.super_name {
            Some(super_name) => match self.resolve_shared_supertype(loader, super_name)? {
                Some(superclass) => Some(superclass),
                None => return Ok(None),
            },
            None => None,
        };
        let mut interfaces = Vec::with_capacity(archived.interface_names.len());
        for interface_name in &archived.interface_names {
            match self.resolve_shared_supertype(loader, interface_name)? {
                Some(interface) => interfaces.push(interface),
                None => return Ok(None),
            }
        }

        let constraints = entry.verification_constraints();
        if !self.check_constraints(name, constraints, loader, superclass, &interfaces)? {
            debug!("Verification constraints of shared class {} failed", name);
            return Ok(None);
        }
        self.restore_class(record, loader, superclass, &interfaces)
            .map(Some)
    }

    /// A supertype for a shared class must itself come from the archive
    fn resolve_shared_supertype(
        &mut self,
        loader: LoaderId,
        name: &BinaryName,
    ) -> Result<Option<&'g ClassData<'g>>, Error> {
        match self.resolve_or_null(loader, name) {
            Ok(Some(class)) if class.shared_record.is_some() => Ok(Some(class)),
            Ok(_) => {
                debug!("Supertype {} is not shared", name);
                Ok(None)
            }
            Err(err) if !err.is_fatal() => {
                debug!("Supertype {} cannot be resolved: {}", name, err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Re-check the subtyping obligations a class was verified under
    ///
    /// Obligations on the class itself are checked against the supertypes it is about to get;
    /// the others by resolving both types through `loader`. A type that cannot be resolved fails
    /// the check.
    pub fn check_constraints(
        &mut self,
        class_name: &BinaryName,
        constraints: &[VerificationConstraint],
        loader: LoaderId,
        superclass: Option<&'g ClassData<'g>>,
        interfaces: &[&'g ClassData<'g>],
    ) -> Result<bool, Error> {
        for constraint in constraints {
            if constraint.required_supertype == constraint.referencing_type {
                continue;
            }
            let required = match self.resolve_for_check(loader, &constraint.required_supertype)? {
                Some(required) => ClassId(required),
                None => return Ok(false),
            };
            let holds = if &constraint.referencing_type == class_name {
                superclass
                    .into_iter()
                    .chain(interfaces.iter().copied())
                    .any(|supertype| ClassId(supertype).is_assignable(&required))
            } else {
                match self.resolve_for_check(loader, &constraint.referencing_type)? {
                    Some(referencing) => ClassId(referencing).is_assignable(&required),
                    None => false,
                }
            };
            if !holds {
                debug!(
                    "{} is no longer assignable to {}",
                    constraint.referencing_type, constraint.required_supertype
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn resolve_for_check(
        &mut self,
        loader: LoaderId,
        name: &BinaryName,
    ) -> Result<Option<&'g ClassData<'g>>, Error> {
        match self.resolve_or_null(loader, name) {
            Err(err) if !err.is_fatal() => Ok(None),
            other => other,
        }
    }

    /// Recreate an instance class from its archived record, for `loader`
    ///
    /// The supertypes must already be resolved (and checked) by the caller.
    pub fn restore_class(
        &mut self,
        record: u32,
        loader: LoaderId,
        superclass: Option<&'g ClassData<'g>>,
        interfaces: &[&'g ClassData<'g>],
    ) -> Result<&'g ClassData<'g>, Error> {
        let archive = self
            .archive
            .ok_or_else(|| Error::Inconsistent(String::from("no archive is attached")))?;
        let archived = archive.class_record(record).ok_or_else(|| {
            Error::Inconsistent(format!("archive has no class record {}", record))
        })?;
        if self.graph.lookup_class(loader, &archived.name).is_some() {
            return Err(Error::Linkage(format!(
                "loader {:?} attempted duplicate class definition for {}",
                loader, archived.name
            )));
        }

        let mut data = ClassData::new(
            archived.name.clone(),
            loader,
            archived.access_flags,
            ClassKind::Instance,
            superclass,
            archived.source,
            archived.constants.clone(),
        );
        data.shared_record = Some(record);
        data.state.set(archived.state);
        let class = self.graph.add_class(data);
        for interface in interfaces {
            class.interfaces.push(interface);
        }
        for method in &archived.methods {
            self.graph.add_method(MethodData {
                class,
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
                access_flags: method.access_flags,
                code: method.code.clone(),
                fingerprint: Cell::new(Some(method.fingerprint)),
                invocation_count: Cell::new(0),
            });
        }
        for field in &archived.fields {
            self.graph.add_field(FieldData {
                class,
                name: field.name.clone(),
                descriptor: field.descriptor.clone(),
                access_flags: field.access_flags,
            });
        }
        debug!(
            "Restored {} for {:?} from archive record {}",
            class.name, loader, record
        );
        Ok(class)
    }
}

fn binary_name(name: &str) -> Result<BinaryName, Error> {
    BinaryName::from_string(name.to_owned()).map_err(Error::ClassFormat)
}

fn unqualified_name(name: &str) -> Result<UnqualifiedName, Error> {
    UnqualifiedName::from_string(name.to_owned()).map_err(Error::ClassFormat)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ClassFileBuilder;
    use crate::jvm::class_graph::ClassGraphArenas;
    use std::path::Path;

    fn write_class(root: &Path, name: &str, super_name: Option<&str>, interfaces: &[&str]) {
        let access_flags = if name.ends_with("able") {
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT
        } else {
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER
        };
        let mut builder = ClassFileBuilder::new(name, super_name, access_flags).unwrap();
        for interface in interfaces {
            builder.interface(interface).unwrap();
        }
        builder
            .build()
            .save_to_path(root.join(format!("{}.class", name)), true)
            .unwrap();
    }

    fn name(name: &str) -> BinaryName {
        BinaryName::from_string(name.to_owned()).unwrap()
    }

    fn jdk(root: &Path) {
        write_class(root, "java/lang/Object", None, &[]);
        write_class(root, "java/lang/Cloneable", Some("java/lang/Object"), &[]);
        write_class(root, "java/io/Serializable", Some("java/lang/Object"), &[]);
    }

    #[test]
    fn delegates_parent_first() {
        let boot = tempfile::tempdir().unwrap();
        let app = tempfile::tempdir().unwrap();
        jdk(boot.path());
        let cloneable = ["java/lang/Cloneable"];
        write_class(app.path(), "com/example/Foo", Some("java/lang/Object"), &cloneable);
        // The app path also has an Object, which must never be used
        write_class(app.path(), "java/lang/Object", None, &[]);

        let class_paths = ClassPaths {
            boot: vec![boot.path().to_owned()],
            platform: vec![],
            app: vec![app.path().to_owned()],
        };
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let mut system = SystemDictionary::new(&graph, &class_paths);

        let foo = system
            .resolve_or_fail(LoaderId::App, &name("com/example/Foo"))
            .unwrap();
        assert_eq!(foo.loader, LoaderId::App);
        assert_eq!(foo.source.classpath_index, 1);
        let object = foo.superclass.unwrap();
        assert_eq!(object.loader, LoaderId::Boot);
        assert_eq!(object.source.classpath_index, 0);
        assert_eq!(foo.interface_list()[0].name, BinaryName::CLONEABLE);
        assert!(graph
            .lookup_class(LoaderId::App, &BinaryName::OBJECT)
            .is_none());

        let defined: Vec<String> = system
            .take_defined_classes()
            .iter()
            .map(|class| class.name.to_string())
            .collect();
        assert_eq!(
            defined,
            ["java/lang/Object", "java/lang/Cloneable", "com/example/Foo"]
        );
        assert!(system.take_defined_classes().is_empty());

        assert!(system
            .resolve_or_null(LoaderId::App, &name("com/example/Missing"))
            .unwrap()
            .is_none());
        assert!(matches!(
            system.resolve_or_fail(LoaderId::Boot, &name("com/example/Foo")),
            Err(Error::ClassNotFound(_))
        ));
    }

    #[test]
    fn arrays_are_created_on_demand() {
        let boot = tempfile::tempdir().unwrap();
        let app = tempfile::tempdir().unwrap();
        jdk(boot.path());
        write_class(app.path(), "Foo", Some("java/lang/Object"), &[]);
        let class_paths = ClassPaths {
            boot: vec![boot.path().to_owned()],
            platform: vec![],
            app: vec![app.path().to_owned()],
        };
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let mut system = SystemDictionary::new(&graph, &class_paths);

        let foos = system
            .resolve_or_fail(LoaderId::App, &name("[[LFoo;"))
            .unwrap();
        assert_eq!(foos.loader, LoaderId::App);
        match &foos.kind {
            ClassKind::ObjectArray(array) => {
                assert_eq!(array.additional_dimensions, 1);
                assert_eq!(array.element_type.name.as_str(), "Foo");
            }
            _ => panic!("expected an object array"),
        }
        let ints = system
            .resolve_or_fail(LoaderId::App, &name("[I"))
            .unwrap();
        assert_eq!(ints.loader, LoaderId::Boot);
        let cloneable = graph.lookup_class(LoaderId::Boot, &BinaryName::CLONEABLE).unwrap();
        assert!(ClassId(ints).is_assignable(&ClassId(cloneable)));

        let again = system
            .resolve_or_fail(LoaderId::Boot, &name("[I"))
            .unwrap();
        assert!(std::ptr::eq(ints, again));
        assert!(system
            .resolve_or_null(LoaderId::App, &name("[LMissing;"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn linkage_problems() {
        let boot = tempfile::tempdir().unwrap();
        jdk(boot.path());
        write_class(boot.path(), "A", Some("B"), &[]);
        write_class(boot.path(), "B", Some("A"), &[]);
        write_class(boot.path(), "C", Some("java/lang/Cloneable"), &[]);
        write_class(boot.path(), "D", Some("java/lang/Object"), &["java/lang/Object"]);
        write_class(boot.path(), "Wrong", Some("java/lang/Object"), &[]);
        std::fs::rename(boot.path().join("Wrong.class"), boot.path().join("Right.class")).unwrap();

        let class_paths = ClassPaths {
            boot: vec![boot.path().to_owned()],
            ..ClassPaths::default()
        };
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let mut system = SystemDictionary::new(&graph, &class_paths);

        assert!(matches!(
            system.resolve_or_null(LoaderId::Boot, &name("A")),
            Err(Error::ClassCircularity(_))
        ));
        assert!(matches!(
            system.resolve_or_null(LoaderId::Boot, &name("C")),
            Err(Error::IncompatibleClassChange(_))
        ));
        assert!(matches!(
            system.resolve_or_null(LoaderId::Boot, &name("D")),
            Err(Error::IncompatibleClassChange(_))
        ));
        assert!(matches!(
            system.resolve_or_null(LoaderId::Boot, &name("Right")),
            Err(Error::NoClassDefFound { .. })
        ));

        let bytes = std::fs::read(boot.path().join("java/lang/Object.class")).unwrap();
        let mut resolver = DelegatingResolver {
            loader: LoaderId::Boot,
        };
        let result = system.define_class(&bytes, LoaderId::Boot, 0, None, &mut resolver);
        assert!(matches!(result, Err(Error::Linkage(_))));

        let unregistered = system
            .define_class(
                &bytes,
                LoaderId::Boot,
                ClassSource::UNREGISTERED_INDEX,
                None,
                &mut resolver,
            )
            .unwrap();
        assert!(unregistered.source.is_unregistered());
        let registered = graph.lookup_class(LoaderId::Boot, &BinaryName::OBJECT).unwrap();
        assert!(!std::ptr::eq(registered, unregistered));
    }
}
