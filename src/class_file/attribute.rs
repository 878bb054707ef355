use crate::class_file::{ConstantPool, Deserialize, Serialize};
use crate::code::export_code;
use crate::{Error, FormatError, Settings};
use byteorder::{ReadBytesExt, WriteBytesExt};
use log::warn;
use std::io::Read;

/// Attributes (used in classes, fields, methods, and even on some attributes)
///
/// Only the attributes that matter for editing code are decoded. Everything else is carried
/// around as an opaque blob so that it survives a read/write round trip untouched.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.3
    Code(CodeAttribute),

    /// Checked exceptions a method may throw, as class names
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.5
    Exceptions(Vec<String>),

    /// Generic signature of a class, field, or method
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.9
    Signature(String),

    /// Any attribute whose structure we don't interpret
    Opaque { name: String, bytes: Vec<u8> },
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.3
#[derive(Debug, Clone, PartialEq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ExceptionHandler {
    /// Start of exception handler range (inclusive)
    pub start_pc: u16,

    /// End of exception handler range (exclusive)
    pub end_pc: u16,

    /// Start of the exception handler
    pub handler_pc: u16,

    /// Class constant of the caught type, or 0 to catch everything
    pub catch_type: u16,
}

impl Attribute {
    pub const CODE: &'static str = "Code";
    pub const EXCEPTIONS: &'static str = "Exceptions";
    pub const SIGNATURE: &'static str = "Signature";

    /// Name of the attribute
    pub fn name(&self) -> &str {
        match self {
            Attribute::Code(_) => Self::CODE,
            Attribute::Exceptions(_) => Self::EXCEPTIONS,
            Attribute::Signature(_) => Self::SIGNATURE,
            Attribute::Opaque { name, .. } => name,
        }
    }

    /// Read one attribute, dispatching on its name
    pub fn read<R: ReadBytesExt>(
        reader: &mut R,
        pool: &ConstantPool,
        settings: &Settings,
    ) -> Result<Attribute, Error> {
        let name_index = u16::deserialize(reader)?;
        let declared = u32::deserialize(reader)?;
        let name = pool.get_utf8(name_index)?;

        let mut bytes = Vec::new();
        reader.by_ref().take(declared as u64).read_to_end(&mut bytes)?;
        if bytes.len() != declared as usize {
            return Err(FormatError::Truncated.into());
        }

        if ![Self::CODE, Self::EXCEPTIONS, Self::SIGNATURE].contains(&name) {
            return Ok(Attribute::Opaque {
                name: name.to_owned(),
                bytes,
            });
        }

        let mut body: &[u8] = &bytes;
        match Self::read_body(name, &mut body, pool, settings) {
            Ok(attribute) if body.is_empty() => Ok(attribute),
            Ok(_) | Err(Error::Format(FormatError::Truncated))
                if !settings.strict_attribute_lengths =>
            {
                warn!(
                    "{} attribute does not fill its declared {} bytes, keeping it opaque",
                    name, declared
                );
                Ok(Attribute::Opaque {
                    name: name.to_owned(),
                    bytes,
                })
            }
            // A body that runs past the declared length is a length mismatch too
            Ok(_) | Err(Error::Format(FormatError::Truncated)) => {
                Err(FormatError::AttributeLength {
                    name: name.to_owned(),
                    declared,
                    consumed: (bytes.len() - body.len()) as u64,
                }
                .into())
            }
            Err(err) => Err(err),
        }
    }

    fn read_body(
        name: &str,
        body: &mut &[u8],
        pool: &ConstantPool,
        settings: &Settings,
    ) -> Result<Attribute, Error> {
        Ok(match name {
            Self::CODE => Attribute::Code(CodeAttribute::read(body, pool, settings)?),
            Self::EXCEPTIONS => {
                let indices = Vec::<u16>::deserialize(body)?;
                let names = indices
                    .into_iter()
                    .map(|index| pool.get_class(index).map(str::to_owned))
                    .collect::<Result<Vec<_>, Error>>()?;
                Attribute::Exceptions(names)
            }
            _ => Attribute::Signature(pool.get_utf8(u16::deserialize(body)?)?.to_owned()),
        })
    }

    /// Write the attribute, looking up the constants it refers to
    ///
    /// The body goes through a scratch buffer first, since its length prefixes it.
    pub fn write<W: WriteBytesExt>(&self, writer: &mut W, pool: &ConstantPool) -> Result<(), Error> {
        let name_index = pool.utf8_index(self.name())?;

        let mut body: Vec<u8> = vec![];
        match self {
            Attribute::Code(code) => code.write(&mut body, pool)?,
            Attribute::Exceptions(names) => {
                let indices = names
                    .iter()
                    .map(|name| pool.class_index(name))
                    .collect::<Result<Vec<u16>, Error>>()?;
                indices.serialize(&mut body)?;
            }
            Attribute::Signature(signature) => pool.utf8_index(signature)?.serialize(&mut body)?,
            Attribute::Opaque { bytes, .. } => body.extend_from_slice(bytes),
        }

        name_index.serialize(writer)?;
        (body.len() as u32).serialize(writer)?;
        writer.write_all(&body)?;
        Ok(())
    }

    /// Add every constant this attribute will need at write time
    pub fn register(&self, pool: &mut ConstantPool) -> Result<(), Error> {
        pool.add_utf8(self.name())?;
        match self {
            Attribute::Code(code) => {
                for attribute in &code.attributes {
                    attribute.register(pool)?;
                }
            }
            Attribute::Exceptions(names) => {
                for name in names {
                    pool.add_class(name)?;
                }
            }
            Attribute::Signature(signature) => {
                pool.add_utf8(signature.as_str())?;
            }
            Attribute::Opaque { .. } => (),
        }
        Ok(())
    }

    /// Copy the attribute into a class with a different constant pool
    ///
    /// Opaque payloads are copied verbatim: if they contain constant pool indices, those will
    /// be wrong in the target.
    pub fn export(
        &self,
        source: &ConstantPool,
        target: &mut ConstantPool,
        settings: &Settings,
    ) -> Result<Attribute, Error> {
        target.add_utf8(self.name())?;
        let exported = match self {
            Attribute::Code(code) => {
                let mut code = code.clone();
                export_code(&mut code, source, target, settings)?;
                code.attributes = code
                    .attributes
                    .iter()
                    .map(|attribute| attribute.export(source, target, settings))
                    .collect::<Result<Vec<_>, Error>>()?;
                Attribute::Code(code)
            }
            Attribute::Exceptions(names) => {
                for name in names {
                    target.add_class(name)?;
                }
                Attribute::Exceptions(names.clone())
            }
            Attribute::Signature(signature) => {
                target.add_utf8(signature.as_str())?;
                Attribute::Signature(signature.clone())
            }
            Attribute::Opaque { .. } => self.clone(),
        };
        Ok(exported)
    }
}

impl CodeAttribute {
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> CodeAttribute {
        CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table: vec![],
            attributes: vec![],
        }
    }

    /// Nested attribute lookup (last match wins)
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().rev().find(|attr| attr.name() == name)
    }

    fn read<R: ReadBytesExt>(
        reader: &mut R,
        pool: &ConstantPool,
        settings: &Settings,
    ) -> Result<CodeAttribute, Error> {
        let max_stack = u16::deserialize(reader)?;
        let max_locals = u16::deserialize(reader)?;
        let code_length = u32::deserialize(reader)?;

        let mut code = Vec::new();
        reader.by_ref().take(code_length as u64).read_to_end(&mut code)?;
        if code.len() != code_length as usize {
            return Err(FormatError::Truncated.into());
        }

        let exception_table = Vec::<ExceptionHandler>::deserialize(reader)?;
        let attributes = read_attributes(reader, pool, settings)?;
        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    fn write<W: WriteBytesExt>(&self, writer: &mut W, pool: &ConstantPool) -> Result<(), Error> {
        self.max_stack.serialize(writer)?;
        self.max_locals.serialize(writer)?;
        (self.code.len() as u32).serialize(writer)?;
        writer.write_all(&self.code)?;
        self.exception_table.serialize(writer)?;
        write_attributes(&self.attributes, writer, pool)
    }
}

impl Serialize for ExceptionHandler {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.end_pc.serialize(writer)?;
        self.handler_pc.serialize(writer)?;
        self.catch_type.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for ExceptionHandler {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(ExceptionHandler {
            start_pc: u16::deserialize(reader)?,
            end_pc: u16::deserialize(reader)?,
            handler_pc: u16::deserialize(reader)?,
            catch_type: u16::deserialize(reader)?,
        })
    }
}

/// Read a `u16` count followed by that many attributes
pub fn read_attributes<R: ReadBytesExt>(
    reader: &mut R,
    pool: &ConstantPool,
    settings: &Settings,
) -> Result<Vec<Attribute>, Error> {
    let count = u16::deserialize(reader)?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        attributes.push(Attribute::read(reader, pool, settings)?);
    }
    Ok(attributes)
}

pub fn write_attributes<W: WriteBytesExt>(
    attributes: &[Attribute],
    writer: &mut W,
    pool: &ConstantPool,
) -> Result<(), Error> {
    (attributes.len() as u16).serialize(writer)?;
    for attribute in attributes {
        attribute.write(writer, pool)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip(attribute: &Attribute, pool: &ConstantPool) -> Attribute {
        let mut bytes = vec![];
        attribute.write(&mut bytes, pool).unwrap();
        let mut reader: &[u8] = &bytes;
        let read = Attribute::read(&mut reader, pool, &Settings::default()).unwrap();
        assert!(reader.is_empty());
        read
    }

    #[test]
    fn known_attributes_round_trip() {
        let mut pool = ConstantPool::new();
        let catch_type = pool.add_class("java/io/IOException").unwrap();
        let mut code = CodeAttribute::new(1, 1, vec![0x00, 0xb1]);
        code.exception_table.push(ExceptionHandler {
            start_pc: 0,
            end_pc: 1,
            handler_pc: 1,
            catch_type,
        });
        code.attributes.push(Attribute::Opaque {
            name: "LineNumberTable".to_owned(),
            bytes: vec![0, 1, 0, 0, 0, 7],
        });

        let attributes = vec![
            Attribute::Code(code),
            Attribute::Exceptions(vec!["java/io/IOException".to_owned()]),
            Attribute::Signature("<T:Ljava/lang/Object;>()TT;".to_owned()),
            Attribute::Opaque {
                name: "Deprecated".to_owned(),
                bytes: vec![],
            },
        ];
        for attribute in &attributes {
            attribute.register(&mut pool).unwrap();
        }
        for attribute in &attributes {
            assert_eq!(&round_trip(attribute, &pool), attribute);
        }
    }

    #[test]
    fn writing_unregistered_names_fails() {
        let pool = ConstantPool::new();
        let attribute = Attribute::Signature("Ljava/util/List<TT;>;".to_owned());
        let mut bytes = vec![];
        assert!(matches!(
            attribute.write(&mut bytes, &pool),
            Err(Error::MissingConstant(name)) if name == "Signature"
        ));
    }

    #[test]
    fn mismatched_lengths() {
        let mut pool = ConstantPool::new();
        let name = pool.add_utf8("Signature").unwrap();
        let value = pool.add_utf8("I").unwrap();

        // Signature body is 2 bytes, but 3 are declared
        let mut bytes = vec![];
        name.serialize(&mut bytes).unwrap();
        3u32.serialize(&mut bytes).unwrap();
        value.serialize(&mut bytes).unwrap();
        bytes.push(0xff);

        let strict = Attribute::read(&mut &bytes[..], &pool, &Settings::default());
        assert!(matches!(
            strict,
            Err(Error::Format(FormatError::AttributeLength {
                declared: 3,
                consumed: 2,
                ..
            }))
        ));

        let lenient = Settings {
            strict_attribute_lengths: false,
            ..Settings::default()
        };
        let attribute = Attribute::read(&mut &bytes[..], &pool, &lenient).unwrap();
        assert_eq!(
            attribute,
            Attribute::Opaque {
                name: "Signature".to_owned(),
                bytes: vec![0, 2, 0xff],
            }
        );
    }

    #[test]
    fn declared_length_shorter_than_body() {
        let mut pool = ConstantPool::new();
        let name = pool.add_utf8("Signature").unwrap();

        // Signature body needs 2 bytes, but only 1 is declared. The stream goes on past it.
        let mut bytes = vec![];
        name.serialize(&mut bytes).unwrap();
        1u32.serialize(&mut bytes).unwrap();
        bytes.extend_from_slice(&[0, 1, 0, 0]);

        let strict = Attribute::read(&mut &bytes[..], &pool, &Settings::default());
        assert!(matches!(
            strict,
            Err(Error::Format(FormatError::AttributeLength { declared: 1, .. }))
        ));

        let lenient = Settings {
            strict_attribute_lengths: false,
            ..Settings::default()
        };
        let mut reader = &bytes[..];
        let attribute = Attribute::read(&mut reader, &pool, &lenient).unwrap();
        assert_eq!(
            attribute,
            Attribute::Opaque {
                name: "Signature".to_owned(),
                bytes: vec![0],
            }
        );
        assert_eq!(reader, &[1, 0, 0]);
    }

    #[test]
    fn truncated_body() {
        let mut pool = ConstantPool::new();
        let name = pool.add_utf8("Whatever").unwrap();
        let mut bytes = vec![];
        name.serialize(&mut bytes).unwrap();
        10u32.serialize(&mut bytes).unwrap();
        bytes.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(
            Attribute::read(&mut &bytes[..], &pool, &Settings::default()),
            Err(Error::Format(FormatError::Truncated))
        ));
    }
}
