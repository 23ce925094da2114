use crate::cds::archive::{
    ArchivedClass, ClassStateRecord, FileHeader, FileMapper, HeaderFlags, MappedRegion,
    MetadataKind, NotFoundTable, PackageInfo, PackageInfoTable, RegionKind, RegionMapper,
    RegionReader, SharedPathTable, SharedSymbolTable, WellKnownClasses, DICTIONARY_TAG, END_TAG,
    NOT_FOUND_TAG, PACKAGES_TAG, SHARED_PATHS_TAG, SYMBOLS_TAG, WELL_KNOWN_TAG,
};
use crate::cds::{ClassRef, MapError, MapSettings, SharedDictionary};
use log::{debug, info, warn};
use std::path::Path;

/// Maps archives and decides whether this process can use them
pub struct ArchiveLoader {
    settings: MapSettings,
}

/// Tables decoded out of the mapped regions
struct ArchiveTables {
    symbols: SharedSymbolTable,
    dictionary: SharedDictionary,
    records: Vec<ArchivedClass>,
    not_found: NotFoundTable,
    packages: PackageInfoTable,
    shared_paths: SharedPathTable,
    well_known: WellKnownClasses,
}

impl ArchiveLoader {
    pub fn new(settings: MapSettings) -> ArchiveLoader {
        ArchiveLoader { settings }
    }

    /// Map an archive file with the default `mmap`-backed mapper
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<MappedArchive, MapError> {
        let path = path.as_ref();
        info!("Mapping archive {}", path.display());
        let mut mapper = FileMapper::open(path, self.settings.alignment)?;
        self.map(&mut mapper)
    }

    /// Map every region of an archive, or none of them
    ///
    /// On any failure, regions mapped so far are unmapped and the reservation is released before
    /// the error is returned.
    pub fn map(&self, mapper: &mut dyn RegionMapper) -> Result<MappedArchive, MapError> {
        let header = FileHeader::parse(&mapper.read_header(FileHeader::SIZE as usize)?)?;
        if header.alignment != mapper.alignment() {
            return Err(MapError::AlignmentMismatch {
                expected: mapper.alignment(),
                found: header.alignment,
            });
        }
        if !self.settings.accepts_verification(header.flags) {
            return Err(MapError::IncompatibleVerification);
        }
        header.validate_layout(mapper.file_len()?)?;

        mapper.reserve(header.total_size)?;
        let mut regions = Vec::with_capacity(RegionKind::ALL.len());
        let tables = ArchiveLoader::map_regions(&header, mapper, &mut regions)
            .and_then(|()| self.decode(&header, &regions));
        match tables {
            Ok(tables) => {
                info!(
                    "Mapped archive: {} classes, {} symbols",
                    tables.records.len(),
                    tables.symbols.len()
                );
                Ok(MappedArchive {
                    header,
                    regions,
                    tables,
                })
            }
            Err(err) => {
                warn!("Archive rejected: {}", err);
                while let Some(region) = regions.pop() {
                    mapper.unmap_region(region);
                }
                mapper.release();
                Err(err)
            }
        }
    }

    fn map_regions(
        header: &FileHeader,
        mapper: &mut dyn RegionMapper,
        regions: &mut Vec<MappedRegion>,
    ) -> Result<(), MapError> {
        for kind in RegionKind::ALL {
            let info = header.region(kind);
            let region = mapper.map_region(kind, info)?;
            let intact = region.bytes().len() as u64 == info.size
                && crc32fast::hash(region.bytes()) == info.crc32;
            regions.push(region);
            if !intact {
                return Err(MapError::RegionChecksum(kind));
            }
            debug!(
                "Mapped {} region ({} bytes at {})",
                kind.name(),
                info.size,
                info.file_offset
            );
        }
        Ok(())
    }

    fn decode(
        &self,
        header: &FileHeader,
        regions: &[MappedRegion],
    ) -> Result<ArchiveTables, MapError> {
        let region = |kind: RegionKind| -> Result<&[u8], MapError> {
            match regions.get(kind.index()) {
                Some(region) if region.kind() == kind => Ok(region.bytes()),
                _ => Err(MapError::RegionLayout(format!("{} region is missing", kind.name()))),
            }
        };

        MetadataKind::check_table(&mut RegionReader::new(region(RegionKind::MiscCode)?))?;

        let mut stream = RegionReader::new(region(RegionKind::MiscData)?);
        stream.expect_tag(SYMBOLS_TAG)?;
        let symbols = SharedSymbolTable::read(&mut stream)?;

        let mut read_only = RegionReader::new(region(RegionKind::ReadOnly)?);
        let record_count = read_only.read_count(40)?;
        let mut records = Vec::with_capacity(record_count);
        for _ in 0..record_count {
            records.push(ArchivedClass::read(&mut read_only, &symbols)?);
        }
        if !read_only.is_at_end() {
            return Err(MapError::Corrupt(String::from(
                "trailing bytes after the class records",
            )));
        }

        let mut read_write = RegionReader::new(region(RegionKind::ReadWrite)?);
        if read_write.read_count(5)? != record_count {
            return Err(MapError::Corrupt(String::from(
                "class state count does not match the class records",
            )));
        }
        for record in &mut records {
            let state = ClassStateRecord::read(&mut read_write)?;
            if state.invocation_counts.len() != record.methods.len() {
                return Err(MapError::Corrupt(format!(
                    "class state of {} does not match its methods",
                    record.name
                )));
            }
            record.state = state.state;
        }

        stream.expect_tag(DICTIONARY_TAG)?;
        let dictionary = SharedDictionary::read(&mut stream, &symbols, record_count as u32)?;
        for entry in dictionary.entries() {
            let matches = match entry.class {
                ClassRef::Record(record) => records
                    .get(record as usize)
                    .map_or(false, |record| record.name == entry.name),
                ClassRef::Live(_) => false,
            };
            if !matches {
                return Err(MapError::Corrupt(format!(
                    "dictionary entry for {} points at the wrong class record",
                    entry.name
                )));
            }
        }
        if dictionary.entries().any(|entry| entry.is_unregistered())
            && !header.flags.contains(HeaderFlags::HAS_UNREGISTERED)
        {
            return Err(MapError::Corrupt(String::from(
                "unregistered classes in an archive flagged as having none",
            )));
        }

        stream.expect_tag(NOT_FOUND_TAG)?;
        let not_found = NotFoundTable::read(&mut stream, &symbols)?;
        stream.expect_tag(PACKAGES_TAG)?;
        let packages = PackageInfoTable::read(&mut stream, &symbols)?;
        stream.expect_tag(SHARED_PATHS_TAG)?;
        let shared_paths = SharedPathTable::read(&mut stream)?;
        stream.expect_tag(WELL_KNOWN_TAG)?;
        let well_known = WellKnownClasses::read(&mut stream, &symbols, record_count as u32)?;
        stream.expect_tag(END_TAG)?;

        if self.settings.validate_class_paths {
            shared_paths.validate(&self.settings.class_paths)?;
        }

        Ok(ArchiveTables {
            symbols,
            dictionary,
            records,
            not_found,
            packages,
            shared_paths,
            well_known,
        })
    }
}

/// An archive adopted by this process
///
/// Everything in it is read-only: lookups may happen from any number of threads.
pub struct MappedArchive {
    header: FileHeader,
    regions: Vec<MappedRegion>,
    tables: ArchiveTables,
}

impl MappedArchive {
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn symbols(&self) -> &SharedSymbolTable {
        &self.tables.symbols
    }

    pub fn dictionary(&self) -> &SharedDictionary {
        &self.tables.dictionary
    }

    pub fn class_record(&self, record: u32) -> Option<&ArchivedClass> {
        self.tables.records.get(record as usize)
    }

    /// Class records, in the order they were archived (supertypes first)
    pub fn class_records(&self) -> &[ArchivedClass] {
        &self.tables.records
    }

    /// Was this class recorded as not found by the loader with this hash?
    pub fn check_not_found(&self, name: &str, loader_hash: u32) -> bool {
        self.tables.not_found.check_not_found(name, loader_hash)
    }

    pub fn not_found(&self) -> &NotFoundTable {
        &self.tables.not_found
    }

    pub fn package(&self, package: &str) -> Option<PackageInfo> {
        self.tables.packages.lookup(package)
    }

    pub fn packages(&self) -> &PackageInfoTable {
        &self.tables.packages
    }

    pub fn shared_paths(&self) -> &SharedPathTable {
        &self.tables.shared_paths
    }

    pub fn well_known(&self) -> &WellKnownClasses {
        &self.tables.well_known
    }

    /// Hand every region back to the mapper that mapped it
    pub fn unmap(self, mapper: &mut dyn RegionMapper) {
        let mut regions = self.regions;
        while let Some(region) = regions.pop() {
            mapper.unmap_region(region);
        }
        mapper.release();
    }
}
