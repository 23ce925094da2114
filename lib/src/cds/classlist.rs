//! Classlist text format
//!
//! One class per line, optionally followed by `key: value` options:
//!
//! ```text
//! # comment
//! java/lang/Object id: 0
//! java/lang/Cloneable id: 1
//! Bar id: 3 super: 0 interfaces: 1 source: /tmp/foo.jar
//! ```
//!
//! A line with a `source:` describes a class for a custom loader (it must carry `id:` and
//! `super:`). A line without one describes a class for a builtin loader (it must not carry
//! `super:` or `interfaces:`).

use crate::cds::{Error, FormatError, IdentityTable};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// One parsed classlist line
///
/// A single record is reused for every line, and reset before each one.
#[derive(Debug, Default, Clone)]
pub struct ClasslistRecord {
    pub class_name: String,
    pub id: Option<u32>,
    pub super_id: Option<u32>,

    /// In the order they were written, which must be the declaration order in the class file
    pub interface_ids: Vec<u32>,
    pub source_path: Option<String>,
    pub origin_path: Option<String>,
    pub defining_loader_hash: Option<u32>,
    pub initiating_loader_hash: Option<u32>,

    /// `(raw_size << 32) | crc32` of the class file, `0` meaning "don't check"
    pub fingerprint: Option<u64>,

    /// First interface id that has not been defined yet (the line must be skipped)
    pub undefined_interface: Option<u32>,

    /// 1-based line number in the classlist
    pub line_no: usize,

    /// Line with whitespace normalized
    pub line: String,

    classlist: String,
    interfaces_specified: bool,
    source_column: usize,
    super_column: usize,
    interfaces_column: usize,
}

impl ClasslistRecord {
    pub fn reset(&mut self) {
        self.class_name.clear();
        self.id = None;
        self.super_id = None;
        self.interface_ids.clear();
        self.source_path = None;
        self.origin_path = None;
        self.defining_loader_hash = None;
        self.initiating_loader_hash = None;
        self.fingerprint = None;
        self.undefined_interface = None;
        self.line.clear();
        self.interfaces_specified = false;
        self.source_column = 0;
        self.super_column = 0;
        self.interfaces_column = 0;
    }

    /// Is this a class for a custom loader, to be loaded straight from `source:`?
    pub fn is_unregistered(&self) -> bool {
        self.source_path.is_some()
    }

    /// Should the line be skipped (without failing the dump)?
    pub fn is_skipped(&self) -> bool {
        self.undefined_interface.is_some()
    }

    pub fn format_error(&self, column: usize, message: impl Into<String>) -> FormatError {
        FormatError {
            classlist: self.classlist.clone(),
            line_no: self.line_no,
            column: column.max(1),
            line: self.line.clone(),
            message: message.into(),
        }
    }

    /// Format error pointing at the `super:` option
    pub fn super_error(&self, message: impl Into<String>) -> FormatError {
        self.format_error(self.super_column, message)
    }

    /// Format error pointing at the `interfaces:` option
    pub fn interfaces_error(&self, message: impl Into<String>) -> FormatError {
        self.format_error(self.interfaces_column, message)
    }

    /// Describe the `interfaces:` of this line, resolving ids to names where possible
    pub fn print_specified_interfaces(&self, identities: &IdentityTable) -> String {
        let mut out = format!(
            "Currently specified interfaces[{}] = {{\n",
            self.interface_ids.len()
        );
        for id in &self.interface_ids {
            match identities.lookup(*id) {
                Some(class) => out.push_str(&format!("  {}\n", class.name)),
                None => out.push_str(&format!("  <undefined id {}>\n", id)),
            }
        }
        out.push('}');
        out
    }
}

/// Reads a classlist one line at a time
pub struct ClasslistParser<R> {
    reader: R,
    classlist: String,
    max_line_length: usize,
    line_no: usize,
    record: ClasslistRecord,
}

impl ClasslistParser<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(
        path: P,
        max_line_length: usize,
    ) -> Result<ClasslistParser<BufReader<File>>, Error> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(ClasslistParser::from_reader(
            BufReader::new(file),
            path.display().to_string(),
            max_line_length,
        ))
    }
}

impl<R: BufRead> ClasslistParser<R> {
    pub fn from_reader(
        reader: R,
        classlist: impl Into<String>,
        max_line_length: usize,
    ) -> ClasslistParser<R> {
        ClasslistParser {
            reader,
            classlist: classlist.into(),
            max_line_length,
            line_no: 0,
            record: ClasslistRecord::default(),
        }
    }

    /// The record for the most recently parsed line
    pub fn record(&self) -> &ClasslistRecord {
        &self.record
    }

    /// Parse the next class line, skipping comments and blank lines
    ///
    /// Returns `false` at the end of the input. Ids mentioned in `super:` must already be in
    /// `identities`; undefined ids in `interfaces:` only mark the record as skipped.
    pub fn parse_one_line(&mut self, identities: &IdentityTable) -> Result<bool, Error> {
        loop {
            self.record.reset();
            self.record.classlist.clone_from(&self.classlist);
            if !self.read_line()? {
                return Ok(false);
            }
            if self.record.line.is_empty() || self.record.line.starts_with('#') {
                continue;
            }
            self.parse_record(identities)?;
            return Ok(true);
        }
    }

    /// Read and normalize the next line into the record
    fn read_line(&mut self) -> Result<bool, Error> {
        let mut buffer = vec![];
        let limit = self.max_line_length as u64 + 1;
        let read = (&mut self.reader).take(limit).read_until(b'\n', &mut buffer)?;
        if read == 0 {
            return Ok(false);
        }
        self.line_no += 1;
        self.record.line_no = self.line_no;

        if buffer.last() != Some(&b'\n') && buffer.len() > self.max_line_length {
            self.record.line = String::from_utf8_lossy(&buffer).into_owned();
            let message = format!(
                "input line too long (must be no longer than {} chars)",
                self.max_line_length
            );
            return Err(self.record.format_error(1, message).into());
        }

        for byte in &mut buffer {
            if matches!(*byte, b'\t' | b'\r' | b'\n') {
                *byte = b' ';
            }
        }
        let len = buffer.iter().rposition(|b| *b != b' ').map_or(0, |i| i + 1);
        buffer.truncate(len);
        self.record.line = String::from_utf8_lossy(&buffer).into_owned();
        Ok(true)
    }

    fn parse_record(&mut self, identities: &IdentityTable) -> Result<(), FormatError> {
        let line = self.record.line.clone();
        let mut tokens = Tokens::new(&line);

        self.record.class_name = tokens.word().to_owned();

        while tokens.skip_spaces() {
            let column = tokens.column();
            if tokens.consume("id:") {
                let id = tokens.unsigned(&self.record)?;
                if self.record.id.replace(id).is_some() {
                    return Err(self.record.format_error(column, "id specified twice"));
                }
            } else if tokens.consume("super:") {
                let super_id = tokens.unsigned(&self.record)?;
                if self.record.super_id.replace(super_id).is_some() {
                    return Err(self.record.format_error(column, "super specified twice"));
                }
                self.record.super_column = column;
                if !identities.contains(super_id) {
                    let message = format!("Super class id {} is not yet loaded", super_id);
                    return Err(self.record.format_error(column, message));
                }
            } else if tokens.consume("interfaces:") {
                if self.record.interfaces_specified {
                    return Err(self.record.format_error(column, "interfaces specified twice"));
                }
                self.record.interfaces_specified = true;
                self.record.interfaces_column = column;
                while let Some(id) = tokens.try_unsigned(&self.record)? {
                    if self.record.undefined_interface.is_none() && !identities.contains(id) {
                        self.record.undefined_interface = Some(id);
                    }
                    self.record.interface_ids.push(id);
                }
            } else if tokens.consume("source:") {
                let source = tokens.path(&self.record)?;
                if self.record.source_path.replace(source).is_some() {
                    return Err(self.record.format_error(column, "source specified twice"));
                }
                self.record.source_column = column;
            } else if tokens.consume("origin:") {
                let origin = tokens.path(&self.record)?;
                if self.record.origin_path.replace(origin).is_some() {
                    return Err(self.record.format_error(column, "origin specified twice"));
                }
            } else if tokens.consume("defining_loader_hash:") {
                let hash = tokens.hex_u32(&self.record)?;
                if self.record.defining_loader_hash.replace(hash).is_some() {
                    let message = "defining_loader_hash specified twice";
                    return Err(self.record.format_error(column, message));
                }
            } else if tokens.consume("initiating_loader_hash:") {
                let hash = tokens.hex_u32(&self.record)?;
                if self.record.initiating_loader_hash.replace(hash).is_some() {
                    let message = "initiating_loader_hash specified twice";
                    return Err(self.record.format_error(column, message));
                }
            } else if tokens.consume("fingerprint:") {
                let fingerprint = tokens.hex(&self.record)?;
                if self.record.fingerprint.replace(fingerprint).is_some() {
                    let message = "fingerprint specified twice";
                    return Err(self.record.format_error(column, message));
                }
            } else {
                return Err(self.record.format_error(column, "Unknown input"));
            }
        }

        self.check_bifurcation()
    }

    fn check_bifurcation(&self) -> Result<(), FormatError> {
        let record = &self.record;
        if record.source_path.is_some() {
            if record.id.is_none() {
                let message = "If source location is specified, id must be also specified";
                return Err(record.format_error(record.source_column, message));
            }
            if record.super_id.is_none() {
                let message = "If source location is specified, super class must be also specified";
                return Err(record.format_error(record.source_column, message));
            }
        } else {
            if record.super_id.is_some() {
                let message =
                    "If source location is not specified, super class must not be specified";
                return Err(record.super_error(message));
            }
            if record.interfaces_specified {
                let message =
                    "If source location is not specified, interface(s) must not be specified";
                return Err(record.interfaces_error(message));
            }
        }
        Ok(())
    }
}

/// Cursor over the bytes of a normalized line
struct Tokens<'a> {
    line: &'a str,
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(line: &'a str) -> Tokens<'a> {
        Tokens { line, pos: 0 }
    }

    /// 1-based column of the cursor
    fn column(&self) -> usize {
        self.pos + 1
    }

    fn rest(&self) -> &'a str {
        &self.line[self.pos..]
    }

    /// Skip spaces, returning whether there is anything left
    fn skip_spaces(&mut self) -> bool {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start_matches(' ').len();
        self.pos < self.line.len()
    }

    /// Everything up to the next space
    fn word(&mut self) -> &'a str {
        let rest = self.rest();
        let len = rest.find(' ').unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn consume(&mut self, key: &str) -> bool {
        if self.rest().starts_with(key) {
            self.pos += key.len();
            true
        } else {
            false
        }
    }

    fn path(&mut self, record: &ClasslistRecord) -> Result<String, FormatError> {
        self.skip_spaces();
        let column = self.column();
        match self.word() {
            "" => Err(record.format_error(column, "Error: expected a path")),
            path => Ok(path.to_owned()),
        }
    }

    /// Integer in C's `%i` syntax (optional sign, then decimal, `0x` hexadecimal, or `0` octal)
    ///
    /// Returns the value and how many bytes it took up, or `None` if there is no integer here.
    fn scan_integer(text: &str) -> Option<(i64, usize)> {
        let bytes = text.as_bytes();
        let mut pos = 0;
        let negative = match bytes.first() {
            Some(b'-') => {
                pos += 1;
                true
            }
            Some(b'+') => {
                pos += 1;
                false
            }
            _ => false,
        };

        let (radix, digits_start) = match (bytes.get(pos), bytes.get(pos + 1)) {
            (Some(b'0'), Some(b'x' | b'X'))
                if bytes.get(pos + 2).map_or(false, u8::is_ascii_hexdigit) =>
            {
                (16, pos + 2)
            }
            (Some(b'0'), _) => (8, pos),
            _ => (10, pos),
        };

        let digits_len = bytes[digits_start..]
            .iter()
            .take_while(|b| (**b as char).is_digit(radix))
            .count();
        if digits_len == 0 {
            return None;
        }
        let end = digits_start + digits_len;
        let magnitude = i64::from_str_radix(&text[digits_start..end], radix).ok()?;
        Some((if negative { -magnitude } else { magnitude }, end))
    }

    fn try_unsigned(&mut self, record: &ClasslistRecord) -> Result<Option<u32>, FormatError> {
        let save = self.pos;
        self.skip_spaces();
        let column = self.column();
        match Tokens::scan_integer(self.rest()) {
            None => {
                self.pos = save;
                Ok(None)
            }
            Some((value, len)) => {
                self.pos += len;
                if value < 0 {
                    let message = format!("Error: negative integers not allowed ({})", value);
                    return Err(record.format_error(column, message));
                }
                u32::try_from(value)
                    .map(Some)
                    .map_err(|_| record.format_error(column, "Error: integer out of range"))
            }
        }
    }

    fn unsigned(&mut self, record: &ClasslistRecord) -> Result<u32, FormatError> {
        match self.try_unsigned(record)? {
            Some(value) => Ok(value),
            None => {
                self.skip_spaces();
                Err(record.format_error(self.column(), "Error: expected integer"))
            }
        }
    }

    /// Unsigned hexadecimal, with or without `0x`
    fn hex(&mut self, record: &ClasslistRecord) -> Result<u64, FormatError> {
        self.skip_spaces();
        let column = self.column();
        let word = self.word();
        let digits = word
            .strip_prefix("0x")
            .or_else(|| word.strip_prefix("0X"))
            .unwrap_or(word);
        u64::from_str_radix(digits, 16)
            .map_err(|_| record.format_error(column, "Error: expected hex integer"))
    }

    fn hex_u32(&mut self, record: &ClasslistRecord) -> Result<u32, FormatError> {
        self.skip_spaces();
        let column = self.column();
        let value = self.hex(record)?;
        u32::try_from(value).map_err(|_| record.format_error(column, "Error: integer out of range"))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ConstantPool;
    use crate::jvm::class_graph::*;
    use crate::jvm::{BinaryName, ClassAccessFlags, Name};
    use std::io::Cursor;

    fn parser(text: &str) -> ClasslistParser<Cursor<Vec<u8>>> {
        ClasslistParser::from_reader(Cursor::new(text.as_bytes().to_vec()), "test.classlist", 80)
    }

    fn parse_error(text: &str, identities: &IdentityTable) -> FormatError {
        match parser(text).parse_one_line(identities) {
            Err(Error::Format(err)) => err,
            other => panic!("expected format error, got {:?}", other.map(|_| ())),
        }
    }

    /// Identity table with ids `0..count` defined
    fn with_ids<'g>(graph: &'g ClassGraph<'g>, count: u32) -> IdentityTable<'g> {
        let mut identities = IdentityTable::new();
        for id in 0..count {
            let class = graph.add_class(ClassData::new(
                BinaryName::from_string(format!("C{}", id)).unwrap(),
                LoaderId::Boot,
                ClassAccessFlags::PUBLIC,
                ClassKind::Instance,
                None,
                ClassSource::synthetic(),
                ConstantPool::new(),
            ));
            identities.register(id, class).unwrap();
        }
        identities
    }

    #[test]
    fn builtin_and_unregistered_lines() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let identities = with_ids(&graph, 6);
        let mut parser = parser(concat!(
            "# a comment\n",
            "\n",
            "java/lang/Object id: 0\r\n",
            "Foo\tid: 0x10 super: 0 interfaces: 2 5 source: /tmp/foo.jar origin: a.jar  \n",
            "Baz id: 011 fingerprint: 0x00000123deadbeef initiating_loader_hash: ab\n",
        ));

        assert!(parser.parse_one_line(&identities).unwrap());
        let record = parser.record();
        assert_eq!(record.class_name, "java/lang/Object");
        assert_eq!(record.id, Some(0));
        assert_eq!(record.line_no, 3);
        assert!(!record.is_unregistered());

        assert!(parser.parse_one_line(&identities).unwrap());
        let record = parser.record();
        assert_eq!(record.class_name, "Foo");
        assert_eq!(record.id, Some(16));
        assert_eq!(record.super_id, Some(0));
        assert_eq!(record.interface_ids, [2, 5]);
        assert_eq!(record.source_path.as_deref(), Some("/tmp/foo.jar"));
        assert_eq!(record.origin_path.as_deref(), Some("a.jar"));
        assert!(record.is_unregistered());
        assert!(!record.is_skipped());
        assert!(!record.line.ends_with(' '));

        assert!(parser.parse_one_line(&identities).unwrap());
        let record = parser.record();
        assert_eq!(record.id, Some(9));
        assert_eq!(record.fingerprint, Some(0x123_dead_beef));
        assert_eq!(record.initiating_loader_hash, Some(0xab));
        assert_eq!(record.super_id, None);

        assert!(!parser.parse_one_line(&identities).unwrap());
    }

    #[test]
    fn bifurcation_is_enforced() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let identities = with_ids(&graph, 2);

        let err = parse_error("Foo super: 0 source: foo.jar", &identities);
        assert_eq!(
            err.message,
            "If source location is specified, id must be also specified"
        );
        let err = parse_error("Foo id: 3 source: foo.jar", &identities);
        assert_eq!(
            err.message,
            "If source location is specified, super class must be also specified"
        );
        let err = parse_error("Foo id: 3 super: 0", &identities);
        assert_eq!(
            err.message,
            "If source location is not specified, super class must not be specified"
        );
        assert_eq!(err.column, 11);
        let err = parse_error("Foo id: 3 interfaces: 1", &identities);
        assert_eq!(
            err.message,
            "If source location is not specified, interface(s) must not be specified"
        );
    }

    #[test]
    fn malformed_options() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let identities = with_ids(&graph, 2);

        let err = parse_error("Foo id: -4", &identities);
        assert_eq!(err.message, "Error: negative integers not allowed (-4)");
        assert_eq!(err.column, 9);

        let err = parse_error("Foo id: x", &identities);
        assert_eq!(err.message, "Error: expected integer");

        let err = parse_error("Foo id: 1 id: 2", &identities);
        assert_eq!(err.message, "id specified twice");
        assert_eq!(err.column, 11);

        let err = parse_error("Foo id: 4 sourc: foo.jar", &identities);
        assert_eq!(err.message, "Unknown input");
        assert_eq!(err.column, 11);
        assert_eq!(err.line_no, 1);

        let err = parse_error("Foo id: 4 super: 3 source: foo.jar", &identities);
        assert_eq!(err.message, "Super class id 3 is not yet loaded");

        let err = parse_error("Foo defining_loader_hash: 1ffffffff", &identities);
        assert_eq!(err.message, "Error: integer out of range");
        assert_eq!(err.column, 27);

        let err = parse_error("Foo initiating_loader_hash: 0x100000000", &identities);
        assert_eq!(err.message, "Error: integer out of range");
    }

    #[test]
    fn undefined_interface_only_skips() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let identities = with_ids(&graph, 2);
        let mut parser = parser("Foo id: 4 super: 0 interfaces: 1 7 source: foo.jar\nBar id: 5\n");

        assert!(parser.parse_one_line(&identities).unwrap());
        assert_eq!(parser.record().undefined_interface, Some(7));
        assert!(parser.record().is_skipped());
        assert!(parser.record().is_unregistered());

        assert!(parser.parse_one_line(&identities).unwrap());
        assert!(!parser.record().is_skipped());
        assert_eq!(parser.record().class_name, "Bar");
    }

    #[test]
    fn long_lines_are_fatal() {
        let identities = IdentityTable::new();
        let line = format!("{}\n", "A".repeat(81));
        let err = parse_error(&line, &identities);
        assert_eq!(
            err.message,
            "input line too long (must be no longer than 80 chars)"
        );

        let line = format!("{}\n", "A".repeat(80));
        let mut parser = parser(&line);
        assert!(parser.parse_one_line(&identities).unwrap());
        assert_eq!(parser.record().class_name.len(), 80);
    }

    #[test]
    fn interface_listing_keeps_order() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let identities = with_ids(&graph, 6);
        let mut parser = parser("Foo id: 7 super: 0 interfaces: 5 2 source: foo.jar");
        assert!(parser.parse_one_line(&identities).unwrap());
        assert_eq!(
            parser.record().print_specified_interfaces(&identities),
            "Currently specified interfaces[2] = {\n  C5\n  C2\n}"
        );
    }
}
