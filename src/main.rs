use classpatch::class_file::ClassFile;
use classpatch::code::listing;
use classpatch::scanner::{scan, ClassMatcher};
use classpatch::{ClassAccessFlags, Error, Settings};

use clap::{crate_version, Arg, ArgAction, ArgMatches, Command};
use log::{info, warn};
use std::fs;

fn main() -> Result<(), Error> {
    env_logger::init();

    let class_arg = |name: &'static str, help: &'static str| {
        Arg::new(name)
            .value_name("CLASS_FILE")
            .required(true)
            .help(help)
    };

    let matches = Command::new("classpatch")
        .version(crate_version!())
        .about("Inspect and patch JVM class files")
        .subcommand_required(true)
        .arg(
            Arg::new("lenient")
                .long("lenient")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Keep attributes whose length doesn't match their contents as opaque blobs"),
        )
        .arg(
            Arg::new("keep-debug-attributes")
                .long("keep-debug-attributes")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Don't drop line number, local variable, and stack map tables after edits"),
        )
        .subcommand(
            Command::new("dump")
                .about("Print the header, members, and disassembled code of a class")
                .arg(class_arg("INPUT", "Class to dump")),
        )
        .subcommand(
            Command::new("roundtrip")
                .about("Read a class and write it back out")
                .arg(class_arg("INPUT", "Class to read"))
                .arg(class_arg("OUTPUT", "Where to write the re-serialized class")),
        )
        .subcommand(
            Command::new("copy-method")
                .about("Copy one method from a class into another")
                .arg(class_arg("FROM", "Class containing the method"))
                .arg(class_arg("TO", "Class receiving the method"))
                .arg(
                    Arg::new("NAME")
                        .value_name("NAME")
                        .required(true)
                        .help("Method name"),
                )
                .arg(
                    Arg::new("DESCRIPTOR")
                        .value_name("DESCRIPTOR")
                        .required(true)
                        .help("Method descriptor, such as `(I)V`"),
                )
                .arg(class_arg("OUTPUT", "Where to write the patched class")),
        )
        .subcommand(
            Command::new("scan")
                .about("List the names a class refers to, without fully parsing it")
                .arg(class_arg("INPUT", "Class to scan")),
        )
        .subcommand(
            Command::new("digest")
                .about("Print a hash of the class's externally visible structure")
                .arg(class_arg("INPUT", "Class to hash")),
        )
        .get_matches();

    let mut settings = Settings::default();
    if matches.get_flag("lenient") {
        settings.strict_attribute_lengths = false;
    }
    if matches.get_flag("keep-debug-attributes") {
        settings.stale_code_attributes.clear();
    }

    match matches.subcommand() {
        Some(("dump", args)) => dump(&load(args, "INPUT", &settings)?),
        Some(("roundtrip", args)) => roundtrip(args, &settings),
        Some(("copy-method", args)) => copy_method(args, &settings),
        Some(("scan", args)) => {
            let bytes = fs::read(path(args, "INPUT"))?;
            let mut printer = Printer;
            if !scan(&mut bytes.as_slice(), &mut printer)? {
                warn!("scan stopped early");
            }
            Ok(())
        }
        Some(("digest", args)) => {
            let class = load(args, "INPUT", &settings)?;
            let digest: String = class
                .structural_digest()
                .iter()
                .map(|byte| format!("{:02x}", byte))
                .collect();
            println!("{}  {}", digest, class.this_class);
            Ok(())
        }
        _ => Ok(()),
    }
}

fn path<'a>(args: &'a ArgMatches, name: &str) -> &'a str {
    args.get_one::<String>(name)
        .map(String::as_str)
        .unwrap_or_default()
}

fn load(args: &ArgMatches, name: &str, settings: &Settings) -> Result<ClassFile, Error> {
    let file = path(args, name);
    info!("Reading '{}'", file);
    let bytes = fs::read(file)?;
    ClassFile::read_with_settings(&mut bytes.as_slice(), settings)
}

fn dump(class: &ClassFile) -> Result<(), Error> {
    println!(
        "class {} (version {}.{}, flags {:?})",
        class.this_class,
        class.version.major_version,
        class.version.minor_version,
        class.access_flags
    );
    if let Some(super_class) = &class.super_class {
        println!("  extends {}", super_class);
    }
    for interface in &class.interfaces {
        println!("  implements {}", interface);
    }
    println!("  {} constant pool slots", class.constants.count());

    for field in &class.fields {
        println!();
        println!("field {} {} ({:?})", field.name, field.descriptor, field.access_flags);
    }
    for method in &class.methods {
        println!();
        println!(
            "method {}{} ({:?})",
            method.name, method.descriptor, method.access_flags
        );
        for exception in method.exception_types() {
            println!("  throws {}", exception);
        }
        if let Some(code) = method.code() {
            println!(
                "  max_stack = {}, max_locals = {}",
                code.max_stack, code.max_locals
            );
            match listing(code, &class.constants) {
                Ok(text) => print!("{}", text),
                Err(err) => warn!("can't disassemble {}{}: {}", method.name, method.descriptor, err),
            }
            for handler in &code.exception_table {
                println!(
                    "  catch #{} in [{}, {}) -> {}",
                    handler.catch_type, handler.start_pc, handler.end_pc, handler.handler_pc
                );
            }
        }
    }
    for attribute in &class.attributes {
        println!("attribute {}", attribute.name());
    }
    Ok(())
}

fn roundtrip(args: &ArgMatches, settings: &Settings) -> Result<(), Error> {
    let input = path(args, "INPUT");
    let bytes = fs::read(input)?;
    let class = ClassFile::read_with_settings(&mut bytes.as_slice(), settings)?;
    let written = class.to_bytes()?;
    if written == bytes {
        println!("{}: identical ({} bytes)", input, bytes.len());
    } else {
        warn!(
            "{}: re-serialized class differs ({} bytes in, {} bytes out)",
            input,
            bytes.len(),
            written.len()
        );
    }
    let output = path(args, "OUTPUT");
    info!("Writing '{}'", output);
    fs::write(output, written)?;
    Ok(())
}

fn copy_method(args: &ArgMatches, settings: &Settings) -> Result<(), Error> {
    let from = load(args, "FROM", settings)?;
    let mut to = load(args, "TO", settings)?;
    let name = path(args, "NAME");
    let descriptor = path(args, "DESCRIPTOR");
    from.export_method_with_settings(name, descriptor, &mut to, settings)?;

    let output = path(args, "OUTPUT");
    info!("Writing '{}'", output);
    to.save_to_path(output, true)
}

/// Prints scanner findings, one per line
struct Printer;

impl ClassMatcher for Printer {
    fn scan_class(&mut self, name: &str, access_flags: ClassAccessFlags) -> bool {
        println!("class {} ({:?})", name, access_flags);
        true
    }

    fn add_super_class(&mut self, name: &str) {
        println!("super {}", name);
    }

    fn add_interface(&mut self, name: &str) {
        println!("interface {}", name);
    }

    fn add_pool_string(&mut self, name: &str) {
        println!("refers {}", name);
    }
}
