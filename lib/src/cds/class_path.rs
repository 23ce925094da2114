use crate::cds::Error;
use log::debug;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::ZipArchive;

/// One element of a class path: a directory tree of class files, or a jar
pub enum ClassPathEntry {
    Directory(PathBuf),
    Jar {
        path: PathBuf,
        archive: ZipArchive<File>,
    },
}

impl ClassPathEntry {
    /// Most bytes reserved up front for a jar entry, whatever its header claims
    const MAX_PREALLOCATION: usize = 1 << 20;

    /// Open a directory or jar (anything that isn't a directory is treated as a jar)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<ClassPathEntry, Error> {
        let path = path.as_ref();
        if path.is_dir() {
            return Ok(ClassPathEntry::Directory(path.to_owned()));
        }
        let archive = ZipArchive::new(File::open(path)?)?;
        Ok(ClassPathEntry::Jar {
            path: path.to_owned(),
            archive,
        })
    }

    fn preallocation(recorded_size: u64) -> usize {
        usize::try_from(recorded_size)
            .unwrap_or(usize::MAX)
            .min(ClassPathEntry::MAX_PREALLOCATION)
    }

    pub fn path(&self) -> &Path {
        match self {
            ClassPathEntry::Directory(path) => path,
            ClassPathEntry::Jar { path, .. } => path,
        }
    }

    /// Read an entry (eg. `java/lang/Object.class`), or `None` if there is no such entry
    pub fn open_stream(&mut self, entry: &str) -> Result<Option<Vec<u8>>, Error> {
        match self {
            ClassPathEntry::Directory(root) => match std::fs::read(root.join(entry)) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err.into()),
            },
            ClassPathEntry::Jar { archive, .. } => {
                let mut file = match archive.by_name(entry) {
                    Ok(file) => file,
                    Err(ZipError::FileNotFound) => return Ok(None),
                    Err(err) => return Err(err.into()),
                };
                let mut bytes = Vec::with_capacity(ClassPathEntry::preallocation(file.size()));
                file.read_to_end(&mut bytes)?;
                Ok(Some(bytes))
            }
        }
    }
}

/// Class path entries opened for classlist `source:` paths, most recently used first
///
/// Only the dump uses this, from a single thread, so it needs no locking.
#[derive(Default)]
pub struct SourceCache {
    entries: Vec<(String, ClassPathEntry)>,
}

impl SourceCache {
    pub fn new() -> SourceCache {
        SourceCache::default()
    }

    /// Find (or open) the entry for a `source:` path, and move it to the front
    pub fn get_or_open(&mut self, source: &str) -> Result<&mut ClassPathEntry, Error> {
        match self.entries.iter().position(|(path, _)| path == source) {
            Some(0) => (),
            Some(position) => {
                let entry = self.entries.remove(position);
                self.entries.insert(0, entry);
            }
            None => {
                debug!("Opening source {}", source);
                let entry = ClassPathEntry::open(SourceCache::strip_file_url(source))?;
                self.entries.insert(0, (source.to_owned(), entry));
            }
        }
        match self.entries.first_mut() {
            Some((_, entry)) => Ok(entry),
            None => Err(Error::ClassNotFound(source.to_owned())),
        }
    }

    /// `source:` paths written by a JVM are sometimes `file:` URLs
    fn strip_file_url(source: &str) -> &str {
        source.strip_prefix("file:").unwrap_or(source)
    }

    /// Paths currently cached, most recently used first
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(path, _)| path.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn write_jar(path: &Path, entries: &[(&str, &[u8])]) {
        let mut jar = ZipWriter::new(File::create(path).unwrap());
        for (name, bytes) in entries {
            jar.start_file(*name, SimpleFileOptions::default()).unwrap();
            jar.write_all(bytes).unwrap();
        }
        jar.finish().unwrap();
    }

    #[test]
    fn directory_and_jar_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("classes/com/example")).unwrap();
        std::fs::write(dir.path().join("classes/com/example/Foo.class"), b"foo").unwrap();
        write_jar(&dir.path().join("lib.jar"), &[("Bar.class", b"bar")]);

        let mut classes = ClassPathEntry::open(dir.path().join("classes")).unwrap();
        assert!(matches!(classes, ClassPathEntry::Directory(_)));
        assert_eq!(
            classes.open_stream("com/example/Foo.class").unwrap(),
            Some(b"foo".to_vec())
        );
        assert_eq!(classes.open_stream("Missing.class").unwrap(), None);

        let mut jar = ClassPathEntry::open(dir.path().join("lib.jar")).unwrap();
        assert_eq!(jar.open_stream("Bar.class").unwrap(), Some(b"bar".to_vec()));
        assert_eq!(jar.open_stream("Missing.class").unwrap(), None);
    }

    #[test]
    fn recorded_sizes_only_hint_the_allocation() {
        assert_eq!(ClassPathEntry::preallocation(3), 3);
        assert_eq!(ClassPathEntry::preallocation(u64::from(u32::MAX)), 1 << 20);
        assert_eq!(ClassPathEntry::preallocation(u64::MAX), 1 << 20);

        let dir = tempfile::tempdir().unwrap();
        let big = vec![0x5a; 3 << 20];
        write_jar(&dir.path().join("big.jar"), &[("Big.class", &big[..])]);
        let mut jar = ClassPathEntry::open(dir.path().join("big.jar")).unwrap();
        assert_eq!(jar.open_stream("Big.class").unwrap(), Some(big));
    }

    #[test]
    fn most_recent_source_first() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jar");
        let b = dir.path().join("b.jar");
        write_jar(&a, &[("A.class", b"a")]);
        write_jar(&b, &[("B.class", b"b")]);
        let (a, b) = (a.display().to_string(), b.display().to_string());

        let mut cache = SourceCache::new();
        cache.get_or_open(&a).unwrap();
        cache.get_or_open(&b).unwrap();
        assert_eq!(cache.paths().collect::<Vec<_>>(), [b.as_str(), a.as_str()]);

        let entry = cache.get_or_open(&a).unwrap();
        assert_eq!(entry.open_stream("A.class").unwrap(), Some(b"a".to_vec()));
        assert_eq!(cache.paths().collect::<Vec<_>>(), [a.as_str(), b.as_str()]);

        assert!(cache.get_or_open("/does/not/exist.jar").is_err());
    }
}
