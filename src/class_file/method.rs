use crate::access_flags::MethodAccessFlags;
use crate::class_file::{
    read_attributes, write_attributes, Attribute, CodeAttribute, ConstantPool, Deserialize,
    Serialize,
};
use crate::{Error, Settings};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Method declared by a class or interface
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.6
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name: String,
    pub descriptor: String,
    pub attributes: Vec<Attribute>,
}

impl Method {
    /// Attribute lookup (last match wins)
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().rev().find(|attr| attr.name() == name)
    }

    /// Body of the method, if it isn't abstract or native
    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().rev().find_map(|attr| match attr {
            Attribute::Code(code) => Some(code),
            _ => None,
        })
    }

    pub fn code_mut(&mut self) -> Option<&mut CodeAttribute> {
        self.attributes.iter_mut().rev().find_map(|attr| match attr {
            Attribute::Code(code) => Some(code),
            _ => None,
        })
    }

    /// Declared checked exceptions
    pub fn exception_types(&self) -> &[String] {
        match self.attribute(Attribute::EXCEPTIONS) {
            Some(Attribute::Exceptions(names)) => names,
            _ => &[],
        }
    }

    /// Generic signature, if there is one
    pub fn signature(&self) -> Option<&str> {
        match self.attribute(Attribute::SIGNATURE) {
            Some(Attribute::Signature(signature)) => Some(signature),
            _ => None,
        }
    }

    pub(crate) fn read<R: ReadBytesExt>(
        reader: &mut R,
        pool: &ConstantPool,
        settings: &Settings,
    ) -> Result<Method, Error> {
        let access_flags = MethodAccessFlags::deserialize(reader)?;
        let name = pool.get_utf8(u16::deserialize(reader)?)?.to_owned();
        let descriptor = pool.get_utf8(u16::deserialize(reader)?)?.to_owned();
        let attributes = read_attributes(reader, pool, settings)?;
        Ok(Method {
            access_flags,
            name,
            descriptor,
            attributes,
        })
    }

    pub(crate) fn write<W: WriteBytesExt>(
        &self,
        writer: &mut W,
        pool: &ConstantPool,
    ) -> Result<(), Error> {
        self.access_flags.serialize(writer)?;
        pool.utf8_index(&self.name)?.serialize(writer)?;
        pool.utf8_index(&self.descriptor)?.serialize(writer)?;
        write_attributes(&self.attributes, writer, pool)
    }
}
