use crate::cds::archive::{
    hash_symbol, CompactTable, RegionReader, RegionWriter, SharedSymbolTable, SymbolId,
    SymbolTable,
};
use crate::cds::{ClassPaths, Error, LoaderType, MapError};
use crate::jvm::{BinaryName, Name};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Classes that a loader (identified by hash) is known not to find
///
/// Recorded while dumping in extended mode, so that a later process can skip a lookup which is
/// certain to fail.
#[derive(Default, Debug)]
pub struct NotFoundTable {
    entries: Vec<(String, u32)>,
    index: HashSet<(String, u32)>,
}

impl NotFoundTable {
    pub fn new() -> NotFoundTable {
        NotFoundTable::default()
    }

    fn hash(name: &str, loader_hash: u32) -> u32 {
        hash_symbol(name) ^ loader_hash
    }

    pub fn record_not_found(&mut self, name: &str, loader_hash: u32) {
        if self.index.insert((name.to_owned(), loader_hash)) {
            self.entries.push((name.to_owned(), loader_hash));
        }
    }

    pub fn check_not_found(&self, name: &str, loader_hash: u32) -> bool {
        self.index.contains(&(name.to_owned(), loader_hash))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write(&self, writer: &mut RegionWriter, symbols: &mut SymbolTable) -> Result<(), Error> {
        let items: Vec<(u32, u32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, (name, loader_hash))| (NotFoundTable::hash(name, *loader_hash), idx as u32))
            .collect();
        CompactTable::build(&items).write(writer)?;
        writer.write_u32(self.entries.len() as u32)?;
        for (name, loader_hash) in &self.entries {
            writer.write_u32(symbols.intern(name).0)?;
            writer.write_u32(*loader_hash)?;
        }
        Ok(())
    }

    pub fn read(
        reader: &mut RegionReader,
        symbols: &SharedSymbolTable,
    ) -> Result<NotFoundTable, MapError> {
        let table = CompactTable::read(reader)?;
        let count = reader.read_count(8)?;
        let mut not_found = NotFoundTable::new();
        for _ in 0..count {
            let name = symbols.get(SymbolId(reader.read_u32()?))?;
            let loader_hash = reader.read_u32()?;
            not_found.record_not_found(name, loader_hash);
        }
        let consistent = table.len() == not_found.len()
            && not_found.entries.iter().enumerate().all(|(idx, (name, hash))| {
                table
                    .lookup(NotFoundTable::hash(name, *hash))
                    .any(|value| value == idx as u32)
            });
        if !consistent {
            return Err(MapError::Corrupt(String::from("not-found table is inconsistent")));
        }
        Ok(not_found)
    }
}

/// Where the classes of a package came from
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PackageInfo {
    pub loader_type: LoaderType,
    pub classpath_index: i16,
}

/// Package of every archived builtin class, with the origin of the first class seen in it
#[derive(Default, Debug)]
pub struct PackageInfoTable {
    packages: Vec<(String, PackageInfo)>,
    index: HashMap<String, usize>,
}

impl PackageInfoTable {
    pub fn new() -> PackageInfoTable {
        PackageInfoTable::default()
    }

    /// Note the package of a class (the first class recorded for a package wins)
    pub fn record(&mut self, class_name: &BinaryName, info: PackageInfo) {
        if let Some(package) = class_name.package() {
            if !self.index.contains_key(package) {
                self.index.insert(package.to_owned(), self.packages.len());
                self.packages.push((package.to_owned(), info));
            }
        }
    }

    pub fn lookup(&self, package: &str) -> Option<PackageInfo> {
        self.index.get(package).map(|idx| self.packages[*idx].1)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn write(&self, writer: &mut RegionWriter, symbols: &mut SymbolTable) -> Result<(), Error> {
        writer.write_u32(self.packages.len() as u32)?;
        for (package, info) in &self.packages {
            writer.write_u32(symbols.intern(package).0)?;
            writer.write_u8(info.loader_type.tag())?;
            writer.write_i16(info.classpath_index)?;
        }
        Ok(())
    }

    pub fn read(
        reader: &mut RegionReader,
        symbols: &SharedSymbolTable,
    ) -> Result<PackageInfoTable, MapError> {
        let count = reader.read_count(7)?;
        let mut table = PackageInfoTable::new();
        for _ in 0..count {
            let package = symbols.get(SymbolId(reader.read_u32()?))?.to_owned();
            let loader_type = LoaderType::from_tag(reader.read_u8()?)
                .ok_or_else(|| MapError::Corrupt(String::from("bad package loader type")))?;
            let classpath_index = reader.read_i16()?;
            if table.index.contains_key(&package) {
                return Err(MapError::Corrupt(format!("package {} archived twice", package)));
            }
            table.index.insert(package.clone(), table.packages.len());
            table.packages.push((
                package,
                PackageInfo {
                    loader_type,
                    classpath_index,
                },
            ));
        }
        Ok(table)
    }
}

/// One class path entry, as it was when the archive was dumped
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SharedPathEntry {
    pub path: PathBuf,
    pub loader_type: LoaderType,
    pub is_directory: bool,

    /// Size of the jar (0 for directories)
    pub size: u64,
}

impl SharedPathEntry {
    fn new(path: &Path, loader_type: LoaderType) -> SharedPathEntry {
        let metadata = std::fs::metadata(path).ok();
        let is_directory = metadata.as_ref().map_or(false, |m| m.is_dir());
        let size = match &metadata {
            Some(metadata) if !is_directory => metadata.len(),
            _ => 0,
        };
        SharedPathEntry {
            path: path.to_owned(),
            loader_type,
            is_directory,
            size,
        }
    }
}

/// Class path entries of the builtin loaders: boot first, then platform, then app
///
/// A class's `classpath_index` is its entry's position in this table.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct SharedPathTable {
    entries: Vec<SharedPathEntry>,
}

impl SharedPathTable {
    pub fn new(class_paths: &ClassPaths) -> SharedPathTable {
        let boot = class_paths.boot.iter().map(|p| (p, LoaderType::Boot));
        let platform = class_paths.platform.iter().map(|p| (p, LoaderType::Platform));
        let app = class_paths.app.iter().map(|p| (p, LoaderType::App));
        let entries = boot
            .chain(platform)
            .chain(app)
            .map(|(path, loader_type)| SharedPathEntry::new(path, loader_type))
            .collect();
        SharedPathTable { entries }
    }

    pub fn entries(&self) -> &[SharedPathEntry] {
        &self.entries
    }

    pub fn get(&self, classpath_index: i16) -> Option<&SharedPathEntry> {
        usize::try_from(classpath_index)
            .ok()
            .and_then(|idx| self.entries.get(idx))
    }

    fn of_type(&self, loader_type: LoaderType) -> impl Iterator<Item = &SharedPathEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.loader_type == loader_type)
    }

    /// Check that the class paths of this process can use an archive dumped with `self`
    ///
    /// The boot and platform paths must be identical, and the archived app path must be a prefix
    /// of the runtime one. Jars must still have the size they had at dump time.
    pub fn validate(&self, runtime: &ClassPaths) -> Result<(), MapError> {
        let runtime = SharedPathTable::new(runtime);
        for loader_type in [LoaderType::Boot, LoaderType::Platform, LoaderType::App] {
            let archived: Vec<&SharedPathEntry> = self.of_type(loader_type).collect();
            let current: Vec<&SharedPathEntry> = runtime.of_type(loader_type).collect();
            let prefix_ok = match loader_type {
                LoaderType::App => archived.len() <= current.len(),
                _ => archived.len() == current.len(),
            };
            if !prefix_ok {
                return Err(MapError::ClassPathMismatch(format!(
                    "{} class path has {} entries but the archive recorded {}",
                    loader_type.name(),
                    current.len(),
                    archived.len()
                )));
            }
            for (archived, current) in archived.iter().zip(current.iter()) {
                if archived.path != current.path {
                    return Err(MapError::ClassPathMismatch(format!(
                        "expected {} but found {}",
                        archived.path.display(),
                        current.path.display()
                    )));
                }
                if archived.is_directory != current.is_directory || archived.size != current.size {
                    return Err(MapError::ClassPathMismatch(format!(
                        "{} has changed since the archive was dumped",
                        archived.path.display()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn write(&self, writer: &mut RegionWriter) -> Result<(), Error> {
        writer.write_u32(self.entries.len() as u32)?;
        for entry in &self.entries {
            writer.write_str(&entry.path.to_string_lossy())?;
            writer.write_u8(entry.loader_type.tag())?;
            writer.write_u8(entry.is_directory as u8)?;
            writer.write_u64(entry.size)?;
        }
        Ok(())
    }

    pub fn read(reader: &mut RegionReader) -> Result<SharedPathTable, MapError> {
        let count = reader.read_count(14)?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let path = PathBuf::from(reader.read_str()?);
            let loader_type = LoaderType::from_tag(reader.read_u8()?)
                .ok_or_else(|| MapError::Corrupt(String::from("bad shared path loader type")))?;
            let is_directory = reader.read_u8()? != 0;
            let size = reader.read_u64()?;
            entries.push(SharedPathEntry {
                path,
                loader_type,
                is_directory,
                size,
            });
        }
        Ok(SharedPathTable { entries })
    }
}

/// Classes the runtime needs before it can load anything else
#[derive(Default, Debug, PartialEq, Eq)]
pub struct WellKnownClasses {
    records: HashMap<BinaryName, u32>,
}

impl WellKnownClasses {
    pub const NAMES: [BinaryName; 7] = [
        BinaryName::OBJECT,
        BinaryName::STRING,
        BinaryName::CLASS,
        BinaryName::CLASSLOADER,
        BinaryName::THROWABLE,
        BinaryName::CLONEABLE,
        BinaryName::SERIALIZABLE,
    ];

    /// Collect the records of the well-known classes that were archived
    pub fn new(record_of: impl Fn(&BinaryName) -> Option<u32>) -> WellKnownClasses {
        let records = WellKnownClasses::NAMES
            .iter()
            .filter_map(|name| record_of(name).map(|record| (name.clone(), record)))
            .collect();
        WellKnownClasses { records }
    }

    pub fn record(&self, name: &BinaryName) -> Option<u32> {
        self.records.get(name).copied()
    }

    pub fn write(&self, writer: &mut RegionWriter, symbols: &mut SymbolTable) -> Result<(), Error> {
        writer.write_u32(WellKnownClasses::NAMES.len() as u32)?;
        for name in &WellKnownClasses::NAMES {
            writer.write_u32(symbols.intern(name.as_str()).0)?;
            writer.write_u32(self.record(name).unwrap_or(u32::MAX))?;
        }
        Ok(())
    }

    pub fn read(
        reader: &mut RegionReader,
        symbols: &SharedSymbolTable,
        record_count: u32,
    ) -> Result<WellKnownClasses, MapError> {
        let count = reader.read_count(8)?;
        let mut records = HashMap::new();
        for _ in 0..count {
            let name = symbols.get(SymbolId(reader.read_u32()?))?;
            let name = BinaryName::from_string(name.to_owned()).map_err(MapError::Corrupt)?;
            match reader.read_u32()? {
                u32::MAX => (),
                record if record < record_count => {
                    records.insert(name, record);
                }
                record => {
                    return Err(MapError::Corrupt(format!(
                        "well-known class record {} out of range",
                        record
                    )))
                }
            }
        }
        Ok(WellKnownClasses { records })
    }
}
