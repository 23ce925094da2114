use crate::cds::archive::{RegionReader, RegionWriter};
use crate::cds::{Error, MapError};

/// Hash of a symbol, stable across processes
pub fn hash_symbol(symbol: &str) -> u32 {
    symbol
        .bytes()
        .fold(0u32, |hash, byte| hash.wrapping_mul(31).wrapping_add(byte as u32))
}

/// Read-only hash table laid out as two flat arrays
///
/// `buckets` has one more element than there are buckets: bucket `b` holds the entries
/// `entries[buckets[b]..buckets[b + 1]]`. Entries within a bucket keep the order they were
/// inserted in. Values are opaque `u32`s (usually indices into some other array), and since
/// different keys may share a hash, callers compare keys themselves.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CompactTable {
    buckets: Vec<u32>,
    entries: Vec<(u32, u32)>,
}

impl CompactTable {
    const ENTRIES_PER_BUCKET: usize = 4;

    pub fn build(items: &[(u32, u32)]) -> CompactTable {
        let bucket_count = (items.len() + CompactTable::ENTRIES_PER_BUCKET - 1)
            / CompactTable::ENTRIES_PER_BUCKET;
        let bucket_count = bucket_count.max(1);

        let mut per_bucket: Vec<Vec<(u32, u32)>> = vec![vec![]; bucket_count];
        for (hash, value) in items {
            per_bucket[*hash as usize % bucket_count].push((*hash, *value));
        }

        let mut buckets = Vec::with_capacity(bucket_count + 1);
        let mut entries = Vec::with_capacity(items.len());
        buckets.push(0);
        for bucket in per_bucket {
            entries.extend(bucket);
            buckets.push(entries.len() as u32);
        }
        CompactTable { buckets, entries }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len().saturating_sub(1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Values stored under this hash, in insertion order
    pub fn lookup(&self, hash: u32) -> impl Iterator<Item = u32> + '_ {
        let entries: &[(u32, u32)] = match self.bucket_count() {
            0 => &[],
            count => {
                let bucket = hash as usize % count;
                let start = self.buckets[bucket] as usize;
                let end = self.buckets[bucket + 1] as usize;
                &self.entries[start..end]
            }
        };
        entries
            .iter()
            .filter(move |(entry_hash, _)| *entry_hash == hash)
            .map(|(_, value)| *value)
    }

    /// Every value in the table, bucket by bucket
    pub fn values(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|(_, value)| *value)
    }

    /// Bucket count and entry count, then the buckets, then the entries
    pub fn write(&self, writer: &mut RegionWriter) -> Result<(), Error> {
        writer.write_u32(self.bucket_count() as u32)?;
        writer.write_u32(self.entries.len() as u32)?;
        for start in &self.buckets {
            writer.write_u32(*start)?;
        }
        for (hash, value) in &self.entries {
            writer.write_u32(*hash)?;
            writer.write_u32(*value)?;
        }
        Ok(())
    }

    /// Read a table written by [`CompactTable::write`], checking that it is well formed
    pub fn read(reader: &mut RegionReader) -> Result<CompactTable, MapError> {
        let bucket_count = reader.read_count(4)?;
        let entry_count = reader.read_u32()? as usize;
        if bucket_count == 0 {
            return Err(MapError::Corrupt(String::from("table without buckets")));
        }

        let mut buckets = Vec::with_capacity(bucket_count + 1);
        for _ in 0..=bucket_count {
            buckets.push(reader.read_u32()?);
        }
        let mut entries = Vec::with_capacity(entry_count.min(1 << 20));
        for _ in 0..entry_count {
            let hash = reader.read_u32()?;
            let value = reader.read_u32()?;
            entries.push((hash, value));
        }

        if buckets[0] != 0 || buckets[bucket_count] as usize != entry_count {
            return Err(MapError::Corrupt(String::from("table buckets do not cover entries")));
        }
        for bucket in 0..bucket_count {
            let (start, end) = (buckets[bucket] as usize, buckets[bucket + 1] as usize);
            if start > end || end > entry_count {
                return Err(MapError::Corrupt(String::from("table buckets out of order")));
            }
            if entries[start..end]
                .iter()
                .any(|(hash, _)| *hash as usize % bucket_count != bucket)
            {
                return Err(MapError::Corrupt(String::from("table entry in wrong bucket")));
            }
        }

        Ok(CompactTable { buckets, entries })
    }
}
