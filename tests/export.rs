mod common;

use byteorder::{BigEndian, ByteOrder};
use classpatch::code::opcodes::*;
use classpatch::code::{disassemble, CodeWriter, Line};
use classpatch::{Attribute, ClassFile, Error, ExceptionHandler, MethodAccessFlags, Settings};
use common::*;

/// Listing with constant pool indices blanked out, so listings from different pools compare
fn normalized(lines: &[Line]) -> Vec<String> {
    lines
        .iter()
        .map(|line| {
            let operand: Vec<&str> = line
                .operand
                .split(' ')
                .filter(|word| !word.starts_with('#'))
                .collect();
            format!("{}: {} {}", line.offset, line.mnemonic, operand.join(" "))
        })
        .collect()
}

fn target_class() -> ClassFile {
    let mut target = ClassFile::new("demo/Target", Some("java/lang/Object")).unwrap();
    target.constants.add_utf8("padding").unwrap();
    target.constants.add_long(7).unwrap();
    target
}

#[test]
fn exported_method_disassembles_identically() {
    let source = hello_class();
    let mut target = target_class();
    source
        .export_method("main", "([Ljava/lang/String;)V", &mut target)
        .unwrap();
    let target = reparse(&target);

    let original = source.find_method("main", "([Ljava/lang/String;)V").unwrap();
    let exported = target.find_method("main", "([Ljava/lang/String;)V").unwrap();
    assert_eq!(exported.access_flags, original.access_flags);
    assert_eq!(exported.exception_types(), original.exception_types());

    let before = disassemble(original.code().unwrap(), &source.constants).unwrap();
    let after = disassemble(exported.code().unwrap(), &target.constants).unwrap();
    assert_eq!(normalized(&before), normalized(&after));
    assert_ne!(
        original.code().unwrap().code,
        exported.code().unwrap().code
    );

    // Same length, so the line numbers still line up
    assert!(exported
        .code()
        .unwrap()
        .attribute(Settings::LINE_NUMBER_TABLE)
        .is_some());
}

#[test]
fn ldc_is_widened_when_the_new_index_needs_it() {
    let mut source = ClassFile::new("demo/Source", Some("java/lang/Object")).unwrap();
    let mut writer = CodeWriter::new(&mut source.constants);
    let end = writer.fresh_label();
    writer.emit(&[ICONST_0]).jump(IFEQ, end);
    writer.ldc_string("far").unwrap();
    writer.emit(&[POP]).place_label(end).return_value(None);
    let mut code = writer.finish(1, 0).unwrap();
    code.attributes.push(line_numbers());
    assert_eq!(code.code.len(), 8);
    assert_eq!(code.code[4], LDC);
    add_method(
        &mut source,
        MethodAccessFlags::STATIC,
        "widen",
        "()V",
        code,
    );

    let mut target = target_class();
    for i in 0..300 {
        target.constants.add_integer(1000 + i).unwrap();
    }
    source.export_method("widen", "()V", &mut target).unwrap();
    let target = reparse(&target);

    let code = target.find_method("widen", "()V").unwrap().code().unwrap();
    assert_eq!(code.code.len(), 9);
    assert_eq!(code.code[4], LDC_W);
    let index = BigEndian::read_u16(&code.code[5..7]);
    assert!(index > 255);
    assert_eq!(target.constants.get_string(index).unwrap(), "far");

    // The branch over the load grew along with it
    assert_eq!(code.code[1], IFEQ);
    assert_eq!(BigEndian::read_i16(&code.code[2..4]), 7);
    assert_eq!(&code.code[7..], &[POP, RETURN]);
    assert!(code.attribute(Settings::LINE_NUMBER_TABLE).is_none());
}

#[test]
fn catch_types_and_calls_are_rehomed() {
    let mut source = ClassFile::new("demo/Source", Some("java/lang/Object")).unwrap();
    let mut writer = CodeWriter::new(&mut source.constants);
    writer
        .invoke(INVOKESTATIC, "demo/Util", "risky", "()V")
        .unwrap()
        .return_value(None);
    writer.emit(&[POP]).return_value(None);
    let mut code = writer.finish(1, 0).unwrap();
    code.exception_table.push(ExceptionHandler {
        start_pc: 0,
        end_pc: 3,
        handler_pc: 4,
        catch_type: source.constants.add_class("java/lang/RuntimeException").unwrap(),
    });
    add_method(&mut source, MethodAccessFlags::STATIC, "guarded", "()V", code);

    let mut target = target_class();
    source.export_method("guarded", "()V", &mut target).unwrap();
    let target = reparse(&target);

    let code = target.find_method("guarded", "()V").unwrap().code().unwrap();
    let call = target
        .constants
        .get_method_ref(BigEndian::read_u16(&code.code[1..3]))
        .unwrap();
    assert_eq!((call.class, call.name, call.descriptor), ("demo/Util", "risky", "()V"));
    let handler = code.exception_table[0];
    assert_eq!((handler.start_pc, handler.end_pc, handler.handler_pc), (0, 3, 4));
    assert_eq!(
        target.constants.get_class(handler.catch_type).unwrap(),
        "java/lang/RuntimeException"
    );
}

#[test]
fn export_replaces_an_existing_method() {
    let source = hello_class();
    let mut target = target_class();
    target
        .create_method(MethodAccessFlags::PUBLIC, "main", "([Ljava/lang/String;)V")
        .unwrap();
    source
        .export_method("main", "([Ljava/lang/String;)V", &mut target)
        .unwrap();

    assert_eq!(target.methods.len(), 1);
    assert!(target.methods[0].code().is_some());
    assert!(matches!(
        target.methods[0].attribute(Attribute::EXCEPTIONS),
        Some(Attribute::Exceptions(_))
    ));
}

#[test]
fn exporting_a_missing_method_fails() {
    let source = hello_class();
    let mut target = target_class();
    match source.export_method("main", "()V", &mut target) {
        Err(Error::MissingMember { name, descriptor }) => {
            assert_eq!((name.as_str(), descriptor.as_str()), ("main", "()V"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(target.methods.is_empty());
}
