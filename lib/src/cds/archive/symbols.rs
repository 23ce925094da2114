use crate::cds::archive::{hash_symbol, CompactTable, RegionReader, RegionWriter};
use crate::cds::{Error, MapError};
use std::collections::HashMap;

/// Identifier of an interned symbol
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

impl SymbolId {
    /// Stands in for an absent symbol (eg. the super class of `java/lang/Object`)
    pub const NONE: SymbolId = SymbolId(u32::MAX);
}

/// Symbols collected while dumping
#[derive(Default)]
pub struct SymbolTable {
    symbols: Vec<String>,
    interned: HashMap<String, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    pub fn intern(&mut self, symbol: &str) -> SymbolId {
        if let Some(id) = self.interned.get(symbol) {
            return *id;
        }
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(symbol.to_owned());
        self.interned.insert(symbol.to_owned(), id);
        id
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// A table from symbol hash to id, then the symbols
    pub fn write(&self, writer: &mut RegionWriter) -> Result<(), Error> {
        let items: Vec<(u32, u32)> = self
            .symbols
            .iter()
            .enumerate()
            .map(|(id, symbol)| (hash_symbol(symbol), id as u32))
            .collect();
        CompactTable::build(&items).write(writer)?;
        writer.write_u32(self.symbols.len() as u32)?;
        for symbol in &self.symbols {
            writer.write_str(symbol)?;
        }
        Ok(())
    }
}

/// Symbols read back from a mapped archive
#[derive(Debug)]
pub struct SharedSymbolTable {
    symbols: Vec<String>,
    table: CompactTable,
}

impl SharedSymbolTable {
    pub fn read(reader: &mut RegionReader) -> Result<SharedSymbolTable, MapError> {
        let table = CompactTable::read(reader)?;
        let count = reader.read_count(4)?;
        let mut symbols = Vec::with_capacity(count);
        for _ in 0..count {
            symbols.push(reader.read_str()?.to_owned());
        }
        if table.len() != symbols.len() {
            return Err(MapError::Corrupt(String::from(
                "symbol table does not index every symbol",
            )));
        }

        let symbols = SharedSymbolTable { symbols, table };
        for (id, symbol) in symbols.symbols.iter().enumerate() {
            if symbols.lookup(symbol) != Some(SymbolId(id as u32)) {
                return Err(MapError::Corrupt(format!("symbol {:?} is misplaced", symbol)));
            }
        }
        Ok(symbols)
    }

    pub fn get(&self, id: SymbolId) -> Result<&str, MapError> {
        self.symbols
            .get(id.0 as usize)
            .map(String::as_str)
            .ok_or_else(|| MapError::Corrupt(format!("no symbol {}", id.0)))
    }

    /// Like [`SharedSymbolTable::get`], except [`SymbolId::NONE`] maps to `None`
    pub fn get_optional(&self, id: SymbolId) -> Result<Option<&str>, MapError> {
        if id == SymbolId::NONE {
            Ok(None)
        } else {
            self.get(id).map(Some)
        }
    }

    pub fn lookup(&self, symbol: &str) -> Option<SymbolId> {
        self.table
            .lookup(hash_symbol(symbol))
            .find(|id| self.symbols.get(*id as usize).map(String::as_str) == Some(symbol))
            .map(SymbolId)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cds::archive::RegionKind;

    #[test]
    fn interning_is_idempotent() {
        let mut symbols = SymbolTable::new();
        let object = symbols.intern("java/lang/Object");
        let foo = symbols.intern("Foo");
        assert_eq!(symbols.intern("java/lang/Object"), object);
        assert_ne!(object, foo);
        assert_eq!(symbols.len(), 2);
    }

    #[test]
    fn shared_symbols_resolve_both_ways() {
        let mut symbols = SymbolTable::new();
        let names = ["java/lang/Object", "java/lang/Cloneable", "Bar", "<init>", "()V"];
        let ids: Vec<SymbolId> = names.iter().map(|name| symbols.intern(name)).collect();

        let mut writer = RegionWriter::new(RegionKind::MiscData, 1 << 12);
        symbols.write(&mut writer).unwrap();
        let bytes = writer.into_bytes();
        let shared = SharedSymbolTable::read(&mut RegionReader::new(&bytes)).unwrap();

        for (name, id) in names.iter().zip(ids) {
            assert_eq!(shared.lookup(name), Some(id));
            assert_eq!(shared.get(id).unwrap(), *name);
        }
        assert_eq!(shared.lookup("Baz"), None);
        assert_eq!(shared.get_optional(SymbolId::NONE).unwrap(), None);
        assert!(shared.get(SymbolId(99)).is_err());
    }
}
