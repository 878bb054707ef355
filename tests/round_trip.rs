mod common;

use classpatch::class_file::{Constant, ConstantPool};
use classpatch::{
    Attribute, ClassFile, Error, FieldAccessFlags, FormatError, IndexError, Settings,
};
use common::*;

#[test]
fn minimal_class() {
    let class = ClassFile::new("Empty", None).unwrap();
    let bytes = class.to_bytes().unwrap();
    assert_eq!(&bytes[..4], &[0xca, 0xfe, 0xba, 0xbe]);

    // Pool: #1 utf8 "Empty", #2 class #1
    assert_eq!(&bytes[8..10], &[0, 3]);
    assert_eq!(bytes.len(), 10 + 8 + 3 + 14);
    let tail = &bytes[21..];
    assert_eq!(&tail[..2], &[0x00, 0x21]);
    assert_eq!(&tail[2..4], &[0, 2]);
    // No superclass
    assert_eq!(&tail[4..6], &[0, 0]);
    assert!(tail[6..].iter().all(|byte| *byte == 0));

    let read = ClassFile::read(&mut bytes.as_slice()).unwrap();
    assert_eq!(read.this_class, "Empty");
    assert!(read.super_class.is_none());
    assert!(read.fields.is_empty() && read.methods.is_empty());
    assert_eq!(read.to_bytes().unwrap(), bytes);
}

#[test]
fn class_with_a_superclass() {
    let class = ClassFile::new("Child", Some("java/lang/Object")).unwrap();
    let read = reparse(&class);
    assert_eq!(read.super_class.as_deref(), Some("java/lang/Object"));
    assert_eq!(read.to_bytes().unwrap(), class.to_bytes().unwrap());
}

#[test]
fn written_bytes_are_a_fixed_point() {
    let class = hello_class();
    let bytes = class.to_bytes().unwrap();
    let read = ClassFile::read(&mut bytes.as_slice()).unwrap();
    assert_eq!(read.to_bytes().unwrap(), bytes);
    assert_eq!(read.constants.count(), class.constants.count());
}

#[test]
fn attributes_survive() {
    let read = reparse(&hello_class());
    let main = read.find_method("main", "([Ljava/lang/String;)V").unwrap();
    assert_eq!(main.exception_types(), &["java/io/IOException".to_owned()]);

    let code = main.code().unwrap();
    assert_eq!((code.max_stack, code.max_locals), (2, 1));
    assert_eq!(
        code.attribute(Settings::LINE_NUMBER_TABLE),
        Some(&line_numbers())
    );
    assert_eq!(read.interfaces, vec!["java/lang/Runnable"]);
}

#[test]
fn adding_a_constant_twice_reuses_it() {
    let mut pool = ConstantPool::new();
    let first = pool.add_string("twice").unwrap();
    let count = pool.count();
    assert_eq!(pool.add_string("twice").unwrap(), first);
    assert_eq!(pool.add_utf8("twice").unwrap(), first - 1);
    assert_eq!(pool.count(), count);
}

#[test]
fn wide_constants_take_two_slots() {
    let mut pool = ConstantPool::new();
    let long = pool.add_long(1 << 40).unwrap();
    let after = pool.add_integer(3).unwrap();
    assert_eq!((long, after), (1, 3));
    assert!(matches!(
        pool.get(2),
        Err(Error::Index(IndexError::Placeholder(2)))
    ));
    assert!(matches!(pool.get(3), Ok(Constant::Integer(3))));
}

#[test]
fn bad_magic() {
    let mut bytes = hello_class().to_bytes().unwrap();
    bytes[0] = 0xbe;
    assert!(matches!(
        ClassFile::read(&mut bytes.as_slice()),
        Err(Error::Format(FormatError::BadMagic(0xbefe_babe)))
    ));
}

#[test]
fn every_truncation_is_reported() {
    let bytes = hello_class().to_bytes().unwrap();
    for len in [3, 9, bytes.len() / 2, bytes.len() - 1] {
        assert!(
            matches!(
                ClassFile::read(&mut &bytes[..len]),
                Err(Error::Format(FormatError::Truncated))
            ),
            "truncated to {} bytes",
            len
        );
    }
}

/// A `Signature` attribute declared as 4 bytes long when its body is only 2
fn padded_signature_class() -> Vec<u8> {
    let mut class = ClassFile::new("Padded", Some("java/lang/Object")).unwrap();
    class
        .create_field(FieldAccessFlags::PRIVATE, "items", "Ljava/util/List;")
        .unwrap();
    let signature = class
        .constants
        .add_utf8("Ljava/util/List<Ljava/lang/String;>;")
        .unwrap();
    let [high, low] = signature.to_be_bytes();
    class
        .add_attribute(Attribute::Opaque {
            name: Attribute::SIGNATURE.to_owned(),
            bytes: vec![high, low, 0, 0],
        })
        .unwrap();
    class.to_bytes().unwrap()
}

#[test]
fn attribute_length_mismatch_is_strict_by_default() {
    let bytes = padded_signature_class();
    match ClassFile::read(&mut bytes.as_slice()) {
        Err(Error::Format(FormatError::AttributeLength {
            name,
            declared,
            consumed,
        })) => {
            assert_eq!(name, "Signature");
            assert_eq!((declared, consumed), (4, 2));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn attribute_length_mismatch_is_kept_opaque_when_lenient() {
    let bytes = padded_signature_class();
    let settings = Settings {
        strict_attribute_lengths: false,
        ..Settings::default()
    };
    let class = ClassFile::read_with_settings(&mut bytes.as_slice(), &settings).unwrap();
    assert!(matches!(
        class.attribute(Attribute::SIGNATURE),
        Some(Attribute::Opaque { bytes, .. }) if bytes.len() == 4
    ));
    assert_eq!(class.to_bytes().unwrap(), bytes);
}

#[test]
fn modified_utf8_constants() {
    let mut class = ClassFile::new("Strings", None).unwrap();
    for text in ["nul\0byte", "snowman \u{2603}", "clef \u{1d11e}", ""] {
        class.constants.add_string(text).unwrap();
    }
    let read = reparse(&class);
    let strings: Vec<&str> = read
        .constants
        .iter()
        .filter_map(|(index, constant)| match constant {
            Constant::String(_) => read.constants.get_string(index).ok(),
            _ => None,
        })
        .collect();
    assert_eq!(
        strings,
        vec!["nul\0byte", "snowman \u{2603}", "clef \u{1d11e}", ""]
    );
}
