use crate::access_flags::FieldAccessFlags;
use crate::class_file::{read_attributes, write_attributes, Attribute, ConstantPool, Deserialize, Serialize};
use crate::{Error, Settings};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Field declared by a class or interface
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.5
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub access_flags: FieldAccessFlags,
    pub name: String,
    pub descriptor: String,
    pub attributes: Vec<Attribute>,
}

impl Field {
    /// Attribute lookup (last match wins)
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().rev().find(|attr| attr.name() == name)
    }

    pub(crate) fn read<R: ReadBytesExt>(
        reader: &mut R,
        pool: &ConstantPool,
        settings: &Settings,
    ) -> Result<Field, Error> {
        let access_flags = FieldAccessFlags::deserialize(reader)?;
        let name = pool.get_utf8(u16::deserialize(reader)?)?.to_owned();
        let descriptor = pool.get_utf8(u16::deserialize(reader)?)?.to_owned();
        let attributes = read_attributes(reader, pool, settings)?;
        Ok(Field {
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
