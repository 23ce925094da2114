//! Fixtures shared by the integration tests: class files, jars and small JDKs on disk

#![allow(dead_code)]

use appcds::cds::archive::{ArchiveBuilder, DumpReport};
use appcds::cds::{ClassPaths, DumpSession, DumpSettings};
use appcds::jvm::class_file::ClassFileBuilder;
use appcds::jvm::class_graph::{ClassGraph, ClassGraphArenas};
use appcds::jvm::verifier::StructuralVerifier;
use appcds::jvm::{BinaryName, ClassAccessFlags, Name};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub fn name(name: &str) -> BinaryName {
    BinaryName::from_string(name.to_owned()).unwrap()
}

/// Class file for a class with a default constructor
pub fn class_bytes(name: &str, super_name: &str, interfaces: &[&str]) -> Vec<u8> {
    let flags = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER;
    let mut builder = ClassFileBuilder::new(name, Some(super_name), flags).unwrap();
    for interface in interfaces {
        builder.interface(interface).unwrap();
    }
    builder.default_constructor(super_name).unwrap();
    builder.build().to_bytes().unwrap()
}

pub fn interface_bytes(name: &str, interfaces: &[&str]) -> Vec<u8> {
    let flags = ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
    let mut builder = ClassFileBuilder::new(name, Some("java/lang/Object"), flags).unwrap();
    for interface in interfaces {
        builder.interface(interface).unwrap();
    }
    builder.build().to_bytes().unwrap()
}

pub fn write_class_file(root: &Path, name: &str, bytes: &[u8]) {
    let path = root.join(format!("{}.class", name));
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

pub fn write_jar(path: &Path, classes: &[(&str, Vec<u8>)]) {
    let mut jar = ZipWriter::new(File::create(path).unwrap());
    for (name, bytes) in classes {
        jar.start_file(format!("{}.class", name), SimpleFileOptions::default())
            .unwrap();
        jar.write_all(bytes).unwrap();
    }
    jar.finish().unwrap();
}

/// The handful of `java/*` classes every dump needs
pub fn write_jdk(root: &Path) {
    let object = ClassFileBuilder::new("java/lang/Object", None, ClassAccessFlags::PUBLIC)
        .unwrap()
        .build()
        .to_bytes()
        .unwrap();
    write_class_file(root, "java/lang/Object", &object);
    for interface in ["java/lang/Cloneable", "java/io/Serializable"] {
        write_class_file(root, interface, &interface_bytes(interface, &[]));
    }
    for class in [
        "java/lang/String",
        "java/lang/Class",
        "java/lang/ClassLoader",
        "java/lang/Throwable",
    ] {
        write_class_file(root, class, &class_bytes(class, "java/lang/Object", &[]));
    }
}

pub fn boot_settings(jdk: &Path) -> DumpSettings {
    DumpSettings {
        class_paths: ClassPaths {
            boot: vec![jdk.to_owned()],
            ..ClassPaths::default()
        },
        ..DumpSettings::default()
    }
}

/// Dump the classes of a classlist (given as text) into `output`
pub fn dump(settings: DumpSettings, classlist: &str, output: &Path) -> DumpReport {
    let classlist_path = output.with_extension("classlist");
    fs::write(&classlist_path, classlist).unwrap();

    let arenas = ClassGraphArenas::new();
    let graph = ClassGraph::new(&arenas);
    let mut session = DumpSession::new(&graph, settings);
    session.preload_classlist(&classlist_path).unwrap();
    ArchiveBuilder::new(session)
        .build(&StructuralVerifier, output)
        .unwrap()
}
