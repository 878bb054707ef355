#![allow(dead_code)]

use classpatch::code::opcodes::*;
use classpatch::code::CodeWriter;
use classpatch::{
    Attribute, ClassFile, CodeAttribute, ExceptionHandler, MethodAccessFlags, Settings,
};

pub const HELLO: &str = "demo/Hello";

/// `demo/Hello` with a static `main` that prints a greeting, plus a few attributes
pub fn hello_class() -> ClassFile {
    let mut class = ClassFile::new(HELLO, Some("java/lang/Object")).unwrap();
    class.add_interface("java/lang/Runnable").unwrap();

    let mut writer = CodeWriter::new(&mut class.constants);
    writer
        .field(GETSTATIC, "java/lang/System", "out", "Ljava/io/PrintStream;")
        .unwrap()
        .ldc_string("Hello, world")
        .unwrap()
        .invoke(
            INVOKEVIRTUAL,
            "java/io/PrintStream",
            "println",
            "(Ljava/lang/String;)V",
        )
        .unwrap()
        .return_value(None);
    let mut code = writer.finish(2, 1).unwrap();
    code.attributes.push(line_numbers());

    add_method(
        &mut class,
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "main",
        "([Ljava/lang/String;)V",
        code,
    );
    class
        .add_method_attribute(
            "main",
            "([Ljava/lang/String;)V",
            Attribute::Exceptions(vec!["java/io/IOException".to_owned()]),
        )
        .unwrap();
    class
}

/// `int count(int n)`: loops `n` times, with a guarded region around the loop
///
/// ```text
///  0: iconst_0
///  1: istore_1
///  2: iload_0
///  3: ifle -> 15
///  6: iinc 1 1
///  9: iinc 0 -1
/// 12: goto -> 2
/// 15: iload_1
/// 16: ireturn
/// 17: astore_2
/// 18: iconst_m1
/// 19: ireturn
/// ```
pub fn counting_code() -> CodeAttribute {
    let code = vec![
        ICONST_0, ISTORE_0 + 1, ILOAD_0, IFLE, 0, 12, IINC, 1, 1, IINC, 0, 0xff, GOTO, 0xff, 0xf6,
        ILOAD_0 + 1, IRETURN, ASTORE_0 + 2, ICONST_0 - 1, IRETURN,
    ];
    let mut attribute = CodeAttribute::new(2, 3, code);
    attribute.exception_table.push(ExceptionHandler {
        start_pc: 2,
        end_pc: 15,
        handler_pc: 17,
        catch_type: 0,
    });
    attribute.attributes.push(line_numbers());
    attribute
}

const ASTORE_0: u8 = 0x4b;

/// A `LineNumberTable` is opaque to us, which is all these tests need
pub fn line_numbers() -> Attribute {
    Attribute::Opaque {
        name: Settings::LINE_NUMBER_TABLE.to_owned(),
        bytes: vec![0, 1, 0, 0, 0, 7],
    }
}

pub fn add_method(
    class: &mut ClassFile,
    access_flags: MethodAccessFlags,
    name: &str,
    descriptor: &str,
    code: CodeAttribute,
) {
    class.create_method(access_flags, name, descriptor).unwrap();
    class
        .add_method_attribute(name, descriptor, Attribute::Code(code))
        .unwrap();
}

/// Write and read back
pub fn reparse(class: &ClassFile) -> ClassFile {
    let bytes = class.to_bytes().unwrap();
    ClassFile::read(&mut bytes.as_slice()).unwrap()
}
