use crate::cds::archive::{
    align_up, ArchivedClass, ClassStateRecord, FileHeader, HeaderFlags, MetadataKind,
    PackageInfo, PackageInfoTable, RegionInfo, RegionKind, RegionWriter, SymbolTable,
    WellKnownClasses, DICTIONARY_TAG, END_TAG, NOT_FOUND_TAG, PACKAGES_TAG, SHARED_PATHS_TAG,
    SYMBOLS_TAG, WELL_KNOWN_TAG,
};
use crate::cds::fingerprint::method_fingerprint;
use crate::cds::session::{DumpSession, PreloadStats};
use crate::cds::{ClassCategory, ClassRef, Error, LoaderType, SharedDictionary};
use crate::jvm::class_graph::{ClassData, ClassIndex, ClassKind, ClassState, LoaderId};
use crate::jvm::verifier::Verifier;
use crate::jvm::{BaseType, BinaryName, Name};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Where a dump is at
///
/// A builder only moves forward through these, ending in either `Done` or `Failed`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DumpState {
    Idle,
    CollectingClasses,
    Verifying,
    RecordingHierarchy,
    StrippingUnshareableState,
    ComputingFingerprints,
    Serializing,
    WritingFile,
    Done,
    Failed,
}

/// Summary of a finished dump
#[derive(Clone, Debug)]
pub struct DumpReport {
    pub preload: PreloadStats,

    /// Archived classes by the type of their defining loader
    pub archived: BTreeMap<LoaderType, usize>,

    /// Classes left out of the archive, and why
    pub excluded: Vec<(BinaryName, String)>,
    pub symbols: usize,
    pub regions: [RegionInfo; 4],
    pub total_size: u64,
}

impl DumpReport {
    pub fn archived_classes(&self) -> usize {
        self.archived.values().sum()
    }
}

impl fmt::Display for DumpReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} classes (", self.archived_classes())?;
        for (idx, loader_type) in LoaderType::ALL.iter().enumerate() {
            let count = self.archived.get(loader_type).copied().unwrap_or(0);
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", count, loader_type.name())?;
        }
        write!(
            f,
            "), {} excluded, {} symbols, {} bytes [",
            self.excluded.len(),
            self.symbols,
            self.total_size
        )?;
        for kind in RegionKind::ALL {
            if kind.index() > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}: {}", kind.name(), self.regions[kind.index()].size)?;
        }
        write!(f, "]")
    }
}

/// Region contents, indexed by [`RegionKind::index`]
struct Serialized {
    regions: [Vec<u8>; 4],
    symbols: usize,
}

/// Turns the classes a [`DumpSession`] loaded into an archive file
pub struct ArchiveBuilder<'g> {
    session: DumpSession<'g>,
    state: DumpState,

    /// Archived classes in record order (every supertype before its subtypes)
    classes: Vec<&'g ClassData<'g>>,
    excluded: Vec<(BinaryName, String)>,
}

impl<'g> ArchiveBuilder<'g> {
    pub fn new(session: DumpSession<'g>) -> ArchiveBuilder<'g> {
        ArchiveBuilder {
            session,
            state: DumpState::Idle,
            classes: vec![],
            excluded: vec![],
        }
    }

    pub fn state(&self) -> DumpState {
        self.state
    }

    pub fn session(&self) -> &DumpSession<'g> {
        &self.session
    }

    /// Classes that made it into the archive, in record order
    pub fn classes(&self) -> &[&'g ClassData<'g>] {
        &self.classes
    }

    pub fn excluded(&self) -> &[(BinaryName, String)] {
        &self.excluded
    }

    fn advance(&mut self, next: DumpState) {
        debug!("Dump state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Verify, strip and serialize every class of the session, then write the archive
    ///
    /// Nothing is left at `path` unless the whole file was written.
    pub fn build<P: AsRef<Path>>(
        &mut self,
        verifier: &dyn Verifier<'g>,
        path: P,
    ) -> Result<DumpReport, Error> {
        if self.state != DumpState::Idle {
            return Err(Error::Inconsistent(format!(
                "cannot build an archive from state {:?}",
                self.state
            )));
        }
        match self.run(verifier, path.as_ref()) {
            Ok(report) => {
                self.advance(DumpState::Done);
                info!("Dumped {}: {}", path.as_ref().display(), report);
                Ok(report)
            }
            Err(err) => {
                warn!("Dump failed while in state {:?}: {}", self.state, err);
                self.advance(DumpState::Failed);
                Err(err)
            }
        }
    }

    fn run(&mut self, verifier: &dyn Verifier<'g>, path: &Path) -> Result<DumpReport, Error> {
        let alignment = self.session.settings().alignment;
        if !alignment.is_power_of_two() {
            return Err(Error::Inconsistent(format!(
                "alignment {} is not a power of two",
                alignment
            )));
        }

        self.advance(DumpState::CollectingClasses);
        self.collect_classes()?;

        self.advance(DumpState::Verifying);
        self.verify(verifier)?;

        self.advance(DumpState::RecordingHierarchy);
        let graph = self.session.graph();
        self.session.dictionary_mut().record_hierarchy(graph)?;

        self.advance(DumpState::StrippingUnshareableState);
        self.strip_unshareable_state();

        self.advance(DumpState::ComputingFingerprints);
        self.compute_fingerprints();
        self.session
            .dictionary_mut()
            .finalize_verification_constraints();

        self.advance(DumpState::Serializing);
        let serialized = self.serialize()?;

        self.advance(DumpState::WritingFile);
        let header = self.write_file(path, &serialized.regions)?;

        let mut archived = BTreeMap::new();
        for class in &self.classes {
            *archived
                .entry(ArchivedClass::loader_type_of(class))
                .or_insert(0) += 1;
        }
        Ok(DumpReport {
            preload: self.session.stats().clone(),
            archived,
            excluded: self.excluded.clone(),
            symbols: serialized.symbols,
            regions: header.regions,
            total_size: header.total_size,
        })
    }

    /// Pull in array companions, then order the dictionary's classes supertypes first
    fn collect_classes(&mut self) -> Result<(), Error> {
        let graph = self.session.graph();
        let mut companions: Vec<(LoaderId, BinaryName)> = vec![];
        for entry in self.session.dictionary().entries() {
            if entry.category != ClassCategory::Builtin {
                continue;
            }
            let class = match entry.class {
                ClassRef::Live(index) => graph.class_at(index),
                ClassRef::Record(_) => None,
            };
            if let Some(class) = class {
                for name in class.constants.class_names() {
                    if !name.starts_with('[') {
                        continue;
                    }
                    match BinaryName::from_string(name.to_owned()) {
                        Ok(name) => companions.push((class.loader, name)),
                        Err(err) => debug!("Ignoring array name in {}: {}", class.name, err),
                    }
                }
            }
        }
        for base_type in BaseType::ALL {
            companions.push((LoaderId::Boot, base_type.array_class_name()));
        }
        for (loader, name) in companions {
            if self.session.resolve_builtin(loader, &name)?.is_none() {
                debug!("Skipping array class {}", name);
            }
        }

        let dictionary = self.session.dictionary();
        let mut visited = HashSet::new();
        let mut classes = vec![];
        for entry in dictionary.entries() {
            if let ClassRef::Live(index) = entry.class {
                if let Some(class) = graph.class_at(index) {
                    supertypes_first(class, dictionary, &mut visited, &mut classes);
                }
            }
        }
        debug!("Collected {} classes", classes.len());
        self.classes = classes;
        Ok(())
    }

    /// Run the verifier over every class, excluding the failures and everything built on them
    fn verify(&mut self, verifier: &dyn Verifier<'g>) -> Result<(), Error> {
        let tolerate = self.session.settings().tolerate_verification_errors;
        let mut excluded: HashSet<ClassIndex> = HashSet::new();
        let mut failures = vec![];

        for class in self.classes.iter().copied() {
            let dictionary = self.session.dictionary();
            let unusable = direct_supertypes(class).into_iter().find(|supertype| {
                excluded.contains(&supertype.index)
                    || dictionary
                        .entry_for_class(ClassRef::Live(supertype.index))
                        .is_none()
            });
            if let Some(supertype) = unusable {
                if !excluded.contains(&supertype.index) && !tolerate {
                    return Err(Error::MissingSupertype {
                        class: class.name.to_string(),
                        supertype: supertype.name.to_string(),
                    });
                }
                excluded.insert(class.index);
                self.excluded.push((
                    class.name.clone(),
                    format!("depends on {}, which is not archived", supertype.name),
                ));
                continue;
            }

            let mut constraints = vec![];
            match verifier.verify(class, &mut constraints) {
                Ok(()) => {
                    if class.state.get() == ClassState::Loaded {
                        class.state.set(ClassState::Linked);
                    }
                    self.session
                        .dictionary_mut()
                        .add_constraints(class.index, constraints);
                }
                Err(message) => {
                    warn!("Verification failed for {}: {}", class.name, message);
                    excluded.insert(class.index);
                    failures.push((class.name.to_string(), message.clone()));
                    self.excluded.push((class.name.clone(), message));
                }
            }
        }

        if !failures.is_empty() && !tolerate {
            return Err(Error::Verification(failures));
        }
        if excluded.is_empty() {
            return Ok(());
        }
        for class in &self.classes {
            if !excluded.contains(&class.index) {
                continue;
            }
            let entry = self
                .session
                .dictionary()
                .entry_for_class(ClassRef::Live(class.index))
                .map(|entry| entry.index);
            if let Some(entry) = entry {
                self.session.dictionary_mut().remove(entry);
            }
        }
        self.classes.retain(|class| !excluded.contains(&class.index));
        for (name, reason) in &self.excluded {
            warn!("Excluded {} from the archive: {}", name, reason);
        }
        Ok(())
    }

    /// Reset whatever only makes sense inside the dumping process
    fn strip_unshareable_state(&self) {
        for class in &self.classes {
            class.mirror.set(None);
            class.resolved_classes.borrow_mut().clear();
            for method in class.method_list() {
                method.invocation_count.set(0);
            }
            if matches!(
                class.state.get(),
                ClassState::Initialized | ClassState::InitializationError
            ) {
                class.state.set(ClassState::Linked);
            }
        }
    }

    fn compute_fingerprints(&self) {
        for class in &self.classes {
            for method in class.method_list() {
                let fingerprint = method_fingerprint(&method.descriptor, method.is_static());
                method.fingerprint.set(Some(fingerprint));
            }
        }
    }

    fn serialize(&self) -> Result<Serialized, Error> {
        let budget = &self.session.settings().region_capacity;
        let record_of: HashMap<ClassIndex, u32> = self
            .classes
            .iter()
            .enumerate()
            .map(|(record, class)| (class.index, record as u32))
            .collect();
        let mut symbols = SymbolTable::new();

        let mut read_only = RegionWriter::new(RegionKind::ReadOnly, budget.ro);
        read_only.write_u32(self.classes.len() as u32)?;
        for class in &self.classes {
            ArchivedClass::write(class, &mut read_only, &mut symbols)?;
        }

        let mut read_write = RegionWriter::new(RegionKind::ReadWrite, budget.rw);
        read_write.write_u32(self.classes.len() as u32)?;
        for class in &self.classes {
            ClassStateRecord::of(class).write(&mut read_write)?;
        }

        // Symbols go first in the stream but are only complete once the tables are written
        let dictionary = self.session.dictionary();
        let mut tables = RegionWriter::new(RegionKind::MiscData, budget.md);
        tables.write_u32(DICTIONARY_TAG)?;
        dictionary.write(&mut tables, &mut symbols, |class| {
            record_of.get(&class).copied()
        })?;
        tables.write_u32(NOT_FOUND_TAG)?;
        self.session.not_found().write(&mut tables, &mut symbols)?;
        tables.write_u32(PACKAGES_TAG)?;
        self.packages().write(&mut tables, &mut symbols)?;
        tables.write_u32(SHARED_PATHS_TAG)?;
        self.session.system().shared_paths().write(&mut tables)?;
        tables.write_u32(WELL_KNOWN_TAG)?;
        WellKnownClasses::new(|name| boot_record(dictionary, &record_of, name))
            .write(&mut tables, &mut symbols)?;
        tables.write_u32(END_TAG)?;

        let mut misc_data = RegionWriter::new(RegionKind::MiscData, budget.md);
        misc_data.write_u32(SYMBOLS_TAG)?;
        symbols.write(&mut misc_data)?;
        misc_data.write_bytes(&tables.into_bytes())?;

        let mut misc_code = RegionWriter::new(RegionKind::MiscCode, budget.mc);
        MetadataKind::write_table(&mut misc_code)?;

        let mut regions: [Vec<u8>; 4] = Default::default();
        for writer in [read_only, read_write, misc_data, misc_code] {
            let index = writer.kind().index();
            regions[index] = writer.into_bytes();
        }
        Ok(Serialized {
            regions,
            symbols: symbols.len(),
        })
    }

    /// Package of every builtin class loaded from a class path entry
    fn packages(&self) -> PackageInfoTable {
        let mut packages = PackageInfoTable::new();
        for class in &self.classes {
            if !matches!(class.kind, ClassKind::Instance) || class.source.classpath_index < 0 {
                continue;
            }
            packages.record(
                &class.name,
                PackageInfo {
                    loader_type: LoaderType::of(class.loader),
                    classpath_index: class.source.classpath_index,
                },
            );
        }
        packages
    }

    fn write_file(&self, path: &Path, regions: &[Vec<u8>; 4]) -> Result<FileHeader, Error> {
        let settings = self.session.settings();
        let mut flags = settings.header_flags();
        flags.set(
            HeaderFlags::HAS_UNREGISTERED,
            self.session
                .dictionary()
                .entries()
                .any(|entry| entry.is_unregistered()),
        );

        let placeholder = FileHeader::new(settings.alignment, flags);
        let mut header = placeholder.clone();
        let mut offset = align_up(FileHeader::SIZE as u64, settings.alignment);
        for kind in RegionKind::ALL {
            let bytes = &regions[kind.index()];
            header.regions[kind.index()] = RegionInfo {
                file_offset: offset,
                size: bytes.len() as u64,
                crc32: crc32fast::hash(bytes),
                read_only: kind.read_only(),
            };
            offset = align_up(offset + bytes.len() as u64, settings.alignment);
        }
        header.total_size = header.region(RegionKind::MiscCode).end();
        header.header_crc32 = header.compute_crc32();

        match write_archive(path, &placeholder, &header, regions) {
            Ok(()) => Ok(header),
            Err(err) => {
                if let Err(remove_err) = fs::remove_file(path) {
                    debug!("Could not remove {}: {}", path.display(), remove_err);
                }
                Err(Error::Io(err))
            }
        }
    }
}

/// Write the placeholder header, the regions, then go back for the real header
fn write_archive(
    path: &Path,
    placeholder: &FileHeader,
    header: &FileHeader,
    regions: &[Vec<u8>; 4],
) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    placeholder.write_to(&mut file)?;
    let mut position = FileHeader::SIZE as u64;
    for kind in RegionKind::ALL {
        let info = header.region(kind);
        io::copy(&mut io::repeat(0).take(info.file_offset - position), &mut file)?;
        file.write_all(&regions[kind.index()])?;
        position = info.end();
    }
    file.seek(SeekFrom::Start(0))?;
    header.write_to(&mut file)?;
    let file = file.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()
}

/// Record of the boot loader's class by this name
fn boot_record(
    dictionary: &SharedDictionary,
    record_of: &HashMap<ClassIndex, u32>,
    name: &BinaryName,
) -> Option<u32> {
    let entry = dictionary.find_for_builtin_loader(name)?;
    if entry.loader_type != LoaderType::Boot {
        return None;
    }
    match entry.class {
        ClassRef::Live(class) => record_of.get(&class).copied(),
        ClassRef::Record(record) => Some(record),
    }
}

/// Super class, interfaces, and (for object arrays) the element class
fn direct_supertypes<'g>(class: &'g ClassData<'g>) -> Vec<&'g ClassData<'g>> {
    let mut supertypes: Vec<&'g ClassData<'g>> = class.superclass.into_iter().collect();
    supertypes.extend(class.interface_list());
    if let ClassKind::ObjectArray(array_type) = &class.kind {
        supertypes.push(array_type.element_type);
    }
    supertypes
}

/// Post-order walk putting every dictionary class after the classes it depends on
fn supertypes_first<'g>(
    class: &'g ClassData<'g>,
    dictionary: &SharedDictionary,
    visited: &mut HashSet<ClassIndex>,
    order: &mut Vec<&'g ClassData<'g>>,
) {
    if !visited.insert(class.index) {
        return;
    }
    for supertype in direct_supertypes(class) {
        supertypes_first(supertype, dictionary, visited, order);
    }
    if dictionary
        .entry_for_class(ClassRef::Live(class.index))
        .is_some()
    {
        order.push(class);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cds::{ClassPaths, ClasslistParser, DumpSettings};
    use crate::jvm::class_file::ClassFileBuilder;
    use crate::jvm::class_graph::{ClassGraph, ClassGraphArenas};
    use crate::jvm::verifier::{StructuralVerifier, VerificationConstraint};
    use crate::jvm::ClassAccessFlags;

    /// Accepts everything except the classes it was told to reject
    struct Rejecting(Vec<&'static str>);

    impl<'g> Verifier<'g> for Rejecting {
        fn verify(
            &self,
            class: &'g ClassData<'g>,
            _constraints: &mut Vec<VerificationConstraint>,
        ) -> Result<(), String> {
            if self.0.contains(&class.name.as_str()) {
                Err(String::from("rejected"))
            } else {
                Ok(())
            }
        }
    }

    fn write_jdk(root: &Path) {
        let classes: [(&str, Option<&str>, &[&str]); 5] = [
            ("java/lang/Object", None, &[]),
            ("java/lang/Cloneable", Some("java/lang/Object"), &[]),
            ("java/io/Serializable", Some("java/lang/Object"), &[]),
            ("com/example/Base", Some("java/lang/Object"), &[]),
            ("com/example/Sub", Some("com/example/Base"), &["java/lang/Cloneable"]),
        ];
        for (name, super_name, interfaces) in classes {
            let mut flags = ClassAccessFlags::PUBLIC;
            if matches!(name, "java/lang/Cloneable" | "java/io/Serializable") {
                flags |= ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
            } else {
                flags |= ClassAccessFlags::SUPER;
            }
            let mut builder = ClassFileBuilder::new(name, super_name, flags).unwrap();
            for interface in interfaces {
                builder.interface(interface).unwrap();
            }
            if name == "com/example/Sub" {
                builder.class_reference("[Lcom/example/Base;").unwrap();
            }
            builder
                .build()
                .save_to_path(root.join(format!("{}.class", name)), true)
                .unwrap();
        }
    }

    fn session<'g>(graph: &'g ClassGraph<'g>, root: &Path, tolerate: bool) -> DumpSession<'g> {
        let settings = DumpSettings {
            tolerate_verification_errors: tolerate,
            class_paths: ClassPaths {
                boot: vec![root.to_owned()],
                ..ClassPaths::default()
            },
            ..DumpSettings::default()
        };
        let mut session = DumpSession::new(graph, settings);
        let classlist = "java/lang/Object\ncom/example/Sub\n";
        let mut parser = ClasslistParser::from_reader(classlist.as_bytes(), "test", 1024);
        session.preload_classes(&mut parser).unwrap();
        session
    }

    #[test]
    fn writes_supertypes_first() {
        let root = tempfile::tempdir().unwrap();
        write_jdk(root.path());
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let mut builder = ArchiveBuilder::new(session(&graph, root.path(), false));

        let path = root.path().join("app.jsa");
        let report = builder.build(&StructuralVerifier, &path).unwrap();
        assert_eq!(builder.state(), DumpState::Done);
        assert!(report.excluded.is_empty());
        assert_eq!(fs::metadata(&path).unwrap().len(), report.total_size);

        let position = |name: &str| {
            builder
                .classes()
                .iter()
                .position(|class| class.name.as_str() == name)
                .unwrap()
        };
        assert!(position("java/lang/Object") < position("com/example/Base"));
        assert!(position("com/example/Base") < position("com/example/Sub"));
        assert!(position("java/lang/Cloneable") < position("com/example/Sub"));
        assert!(position("java/lang/Object") < position("[I"));
        assert!(position("java/lang/Cloneable") < position("[Lcom/example/Base;"));
        assert!(position("com/example/Base") < position("[Lcom/example/Base;"));
        assert_eq!(report.archived.get(&LoaderType::Boot), Some(&(5 + 8 + 1)));

        for class in builder.classes() {
            assert_ne!(class.state.get(), ClassState::Loaded);
            for method in class.method_list() {
                assert!(method.fingerprint.get().is_some());
            }
        }

        // Only a fresh builder can dump
        assert!(builder.build(&StructuralVerifier, &path).is_err());
    }

    #[test]
    fn exclusion_follows_subclasses() {
        let root = tempfile::tempdir().unwrap();
        write_jdk(root.path());
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let mut builder = ArchiveBuilder::new(session(&graph, root.path(), true));

        let path = root.path().join("app.jsa");
        let report = builder
            .build(&Rejecting(vec!["com/example/Base"]), &path)
            .unwrap();
        let excluded: Vec<&str> = report
            .excluded
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(
            excluded,
            vec!["com/example/Base", "com/example/Sub", "[Lcom/example/Base;"]
        );
        let dictionary = builder.session().dictionary();
        let sub = BinaryName::from_string(String::from("com/example/Sub")).unwrap();
        assert!(dictionary.find_for_builtin_loader(&sub).is_none());
        let array = BinaryName::from_string(String::from("[Lcom/example/Base;")).unwrap();
        assert!(dictionary.find_for_builtin_loader(&array).is_none());
        assert!(builder.classes().iter().all(|class| class.name != array));
        assert!(dictionary.find_for_builtin_loader(&BinaryName::OBJECT).is_some());
    }

    #[test]
    fn verification_failure_fails_the_dump() {
        let root = tempfile::tempdir().unwrap();
        write_jdk(root.path());
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let mut builder = ArchiveBuilder::new(session(&graph, root.path(), false));

        let path = root.path().join("app.jsa");
        match builder.build(&Rejecting(vec!["com/example/Base"]), &path) {
            Err(Error::Verification(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "com/example/Base");
            }
            other => panic!("unexpected result {:?}", other.map(|report| report.total_size)),
        }
        assert_eq!(builder.state(), DumpState::Failed);
        assert!(!path.exists());
    }
}
