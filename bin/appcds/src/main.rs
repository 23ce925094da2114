use appcds::cds::archive::{ArchiveBuilder, ArchiveLoader, RegionKind};
use appcds::cds::*;
use appcds::jvm::class_graph::{ClassGraph, ClassGraphArenas};
use appcds::jvm::verifier::StructuralVerifier;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("Class data sharing archives")
        .version("0.1.0")
        .author("Alec Theriault <alec.theriault@gmail.com>")
        .about("Dump classes named in a classlist into an archive, and inspect archives")
        .subcommand_required(true)
        .subcommand(
            class_path_args(Command::new("dump"))
                .about("Load every class of a classlist and write them to an archive")
                .arg(
                    Arg::new("classlist")
                        .long("classlist")
                        .value_name("FILE")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Classlist naming the classes to archive"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .value_name("ARCHIVE")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Archive file to write"),
                )
                .arg(
                    Arg::new("tolerate-verification-errors")
                        .long("tolerate-verification-errors")
                        .action(ArgAction::SetTrue)
                        .help("Leave classes that fail verification out instead of failing"),
                )
                .arg(
                    Arg::new("extended-loader-info")
                        .long("extended-loader-info")
                        .action(ArgAction::SetTrue)
                        .help("Honour loader hashes in the classlist and record missing classes"),
                ),
        )
        .subcommand(
            class_path_args(Command::new("list"))
                .about("Map an archive and list the classes in it")
                .arg(
                    Arg::new("ARCHIVE")
                        .help("Archive file to inspect")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .index(1),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("dump", matches)) => dump(matches),
        Some(("list", matches)) => list(matches),
        _ => Ok(()),
    }
}

fn class_path_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("boot-class-path")
                .long("boot-class-path")
                .value_name("PATH")
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf))
                .help("Directory or jar searched by the boot loader (repeatable)"),
        )
        .arg(
            Arg::new("platform-class-path")
                .long("platform-class-path")
                .value_name("PATH")
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf))
                .help("Directory or jar searched by the platform loader (repeatable)"),
        )
        .arg(
            Arg::new("class-path")
                .long("class-path")
                .value_name("PATH")
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf))
                .help("Directory or jar searched by the app loader (repeatable)"),
        )
}

fn class_paths(matches: &ArgMatches) -> ClassPaths {
    let paths = |id: &str| -> Vec<PathBuf> {
        matches
            .get_many::<PathBuf>(id)
            .map(|paths| paths.cloned().collect())
            .unwrap_or_default()
    };
    ClassPaths {
        boot: paths("boot-class-path"),
        platform: paths("platform-class-path"),
        app: paths("class-path"),
    }
}

fn dump(matches: &ArgMatches) -> Result<(), Error> {
    let settings = DumpSettings {
        tolerate_verification_errors: matches.get_flag("tolerate-verification-errors"),
        extended_loader_info: matches.get_flag("extended-loader-info"),
        class_paths: class_paths(matches),
        ..DumpSettings::default()
    };
    let (classlist, output) = match (
        matches.get_one::<PathBuf>("classlist"),
        matches.get_one::<PathBuf>("output"),
    ) {
        (Some(classlist), Some(output)) => (classlist, output),
        _ => return Ok(()),
    };

    let class_graph_arenas = ClassGraphArenas::new();
    let class_graph = ClassGraph::new(&class_graph_arenas);
    let mut session = DumpSession::new(&class_graph, settings);
    log::info!("Preloading classes from '{}'", classlist.display());
    session.preload_classlist(classlist)?;

    log::info!("Writing archive '{}'", output.display());
    let mut builder = ArchiveBuilder::new(session);
    let report = match builder.build(&StructuralVerifier, output) {
        Ok(report) => report,
        Err(err) => {
            log::error!("Failed to dump archive '{}': {}", output.display(), err);
            return Err(err);
        }
    };
    println!("{}", report.preload);
    println!("{}", report);
    for (name, reason) in &report.excluded {
        println!("  excluded {}: {}", name, reason);
    }
    Ok(())
}

fn list(matches: &ArgMatches) -> Result<(), Error> {
    let class_paths = class_paths(matches);
    let settings = MapSettings {
        validate_class_paths: !class_paths.boot.is_empty() || !class_paths.app.is_empty(),
        class_paths,
        ..MapSettings::default()
    };
    let path = match matches.get_one::<PathBuf>("ARCHIVE") {
        Some(path) => path,
        None => return Ok(()),
    };
    log::info!("Mapping archive '{}'", path.display());
    let archive = match ArchiveLoader::new(settings).open(path) {
        Ok(archive) => archive,
        Err(err) => {
            log::error!("Failed to map archive '{}': {}", path.display(), err);
            return Err(err.into());
        }
    };

    let header = archive.header();
    println!(
        "{}: version {}, alignment {}, {} bytes, flags {:?}",
        path.display(),
        header.version,
        header.alignment,
        header.total_size,
        header.flags
    );
    for kind in RegionKind::ALL {
        let region = header.region(kind);
        println!(
            "  {} region: {} bytes at {} (crc32 {:08x})",
            kind.name(),
            region.size,
            region.file_offset,
            region.crc32
        );
    }

    println!("Shared paths:");
    for (idx, entry) in archive.shared_paths().entries().iter().enumerate() {
        println!(
            "  [{}] {} {} ({} bytes)",
            idx,
            entry.loader_type.name(),
            entry.path.display(),
            entry.size
        );
    }

    println!("Classes:");
    for entry in archive.dictionary().entries() {
        let methods = match entry.class {
            ClassRef::Record(record) => archive
                .class_record(record)
                .map_or(0, |record| record.methods.len()),
            ClassRef::Live(_) => 0,
        };
        if entry.is_unregistered() {
            println!(
                "  {} {} ({} methods, {} bytes, crc32 {:08x}, loader {:08x})",
                entry.loader_type.name(),
                entry.name,
                methods,
                entry.raw_size,
                entry.raw_crc32,
                entry.defining_loader_hash
            );
        } else {
            println!(
                "  {} {} ({} methods)",
                entry.loader_type.name(),
                entry.name,
                methods
            );
        }
    }
    println!(
        "{} classes, {} packages, {} classes known not found, {} symbols",
        archive.dictionary().len(),
        archive.packages().len(),
        archive.not_found().len(),
        archive.symbols().len()
    );
    Ok(())
}
