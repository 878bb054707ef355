use crate::access_flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use crate::class_file::{
    read_attributes, write_attributes, Attribute, ConstantPool, Deserialize, Field, Method,
    Serialize, Version,
};
use crate::{Error, FormatError, Settings};
use log::debug;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

/// Representation of the [`class` file format of the JVM][0]
///
/// Names and descriptors are stored decoded. The constant pool still has to contain them (as
/// UTF-8 or class constants) by the time the class is written, which is what the `create_*` and
/// `add_*` methods take care of.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: String,

    /// Only `java/lang/Object` (and module descriptors) have no superclass
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    pub const MAGIC: u32 = 0xCAFE_BABE;

    /// Start a new, empty class
    pub fn new(this_class: &str, super_class: Option<&str>) -> Result<ClassFile, Error> {
        let mut constants = ConstantPool::new();
        constants.add_class(this_class)?;
        if let Some(super_class) = super_class {
            constants.add_class(super_class)?;
        }
        Ok(ClassFile {
            version: Version::JAVA8,
            constants,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class: this_class.to_owned(),
            super_class: super_class.map(str::to_owned),
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        })
    }

    /// Parse a class with default settings
    pub fn read<R: Read>(reader: &mut R) -> Result<ClassFile, Error> {
        ClassFile::read_with_settings(reader, &Settings::default())
    }

    pub fn read_with_settings<R: Read>(
        reader: &mut R,
        settings: &Settings,
    ) -> Result<ClassFile, Error> {
        let magic = u32::deserialize(reader)?;
        if magic != ClassFile::MAGIC {
            return Err(FormatError::BadMagic(magic).into());
        }
        let version = Version::deserialize(reader)?;
        let constants = ConstantPool::deserialize(reader)?;
        let access_flags = ClassAccessFlags::deserialize(reader)?;
        let this_class = constants.get_class(u16::deserialize(reader)?)?.to_owned();
        let super_class = match u16::deserialize(reader)? {
            0 => None,
            index => Some(constants.get_class(index)?.to_owned()),
        };
        let interfaces = Vec::<u16>::deserialize(reader)?
            .into_iter()
            .map(|index| constants.get_class(index).map(str::to_owned))
            .collect::<Result<Vec<_>, Error>>()?;

        let field_count = u16::deserialize(reader)?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(Field::read(reader, &constants, settings)?);
        }

        let method_count = u16::deserialize(reader)?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(Method::read(reader, &constants, settings)?);
        }

        let attributes = read_attributes(reader, &constants, settings)?;

        debug!(
            "read class {} ({} constant slots, {} fields, {} methods)",
            this_class,
            constants.count(),
            fields.len(),
            methods.len()
        );
        Ok(ClassFile {
            version,
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Read a class file from disk
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<ClassFile, Error> {
        let bytes = fs::read(path)?;
        ClassFile::read(&mut bytes.as_slice())
    }

    /// Serialize the class
    ///
    /// Fails with [`Error::MissingConstant`] if a name used by the model was never added to the
    /// constant pool.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        let pool = &self.constants;
        ClassFile::MAGIC.serialize(writer)?;
        self.version.serialize(writer)?;
        pool.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        pool.class_index(&self.this_class)?.serialize(writer)?;
        match &self.super_class {
            None => 0u16.serialize(writer)?,
            Some(super_class) => pool.class_index(super_class)?.serialize(writer)?,
        }
        self.interfaces
            .iter()
            .map(|interface| pool.class_index(interface))
            .collect::<Result<Vec<u16>, Error>>()?
            .serialize(writer)?;

        (self.fields.len() as u16).serialize(writer)?;
        for field in &self.fields {
            field.write(writer, pool)?;
        }
        (self.methods.len() as u16).serialize(writer)?;
        for method in &self.methods {
            method.write(writer, pool)?;
        }
        write_attributes(&self.attributes, writer, pool)?;

        debug!(
            "wrote class {} ({} constant slots)",
            self.this_class,
            pool.count()
        );
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![];
        self.write(&mut bytes)?;
        Ok(bytes)
    }

    /// Save the class file to disk
    pub fn save_to_path<P: AsRef<Path>>(
        &self,
        path: P,
        create_missing_directories: bool,
    ) -> Result<(), Error> {
        let path = path.as_ref();
        if create_missing_directories {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        let bytes = self.to_bytes()?;
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn add_interface(&mut self, name: &str) -> Result<(), Error> {
        self.constants.add_class(name)?;
        if !self.interfaces.iter().any(|interface| interface == name) {
            self.interfaces.push(name.to_owned());
        }
        Ok(())
    }

    /// Declare a new field (with no attributes)
    pub fn create_field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: &str,
        descriptor: &str,
    ) -> Result<&mut Field, Error> {
        self.constants.add_utf8(name)?;
        self.constants.add_utf8(descriptor)?;
        self.fields.push(Field {
            access_flags,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            attributes: vec![],
        });
        let index = self.fields.len() - 1;
        Ok(&mut self.fields[index])
    }

    /// Declare a new method (with no attributes, so no code yet either)
    pub fn create_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
    ) -> Result<&mut Method, Error> {
        self.constants.add_utf8(name)?;
        self.constants.add_utf8(descriptor)?;
        self.methods.push(Method {
            access_flags,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            attributes: vec![],
        });
        let index = self.methods.len() - 1;
        Ok(&mut self.methods[index])
    }

    /// Add a class-level attribute, registering the constants it needs
    pub fn add_attribute(&mut self, attribute: Attribute) -> Result<(), Error> {
        attribute.register(&mut self.constants)?;
        self.attributes.push(attribute);
        Ok(())
    }

    /// Add an attribute to a method, registering the constants it needs
    pub fn add_method_attribute(
        &mut self,
        name: &str,
        descriptor: &str,
        attribute: Attribute,
    ) -> Result<(), Error> {
        attribute.register(&mut self.constants)?;
        let method = self
            .methods
            .iter_mut()
            .find(|method| method.name == name && method.descriptor == descriptor)
            .ok_or_else(|| Error::MissingMember {
                name: name.to_owned(),
                descriptor: descriptor.to_owned(),
            })?;
        method.attributes.push(attribute);
        Ok(())
    }

    /// First field with this name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// First method with this name (there may be overloads)
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|method| method.name == name)
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    pub fn find_method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut Method> {
        self.methods
            .iter_mut()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    /// Class attribute lookup (last match wins)
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().rev().find(|attr| attr.name() == name)
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    /// Copy a method into another class
    ///
    /// Every constant the method refers to is re-added to the target pool, and the instructions
    /// are patched to use the new indices. A method with the same name and descriptor already in
    /// the target is replaced.
    pub fn export_method(
        &self,
        name: &str,
        descriptor: &str,
        target: &mut ClassFile,
    ) -> Result<(), Error> {
        self.export_method_with_settings(name, descriptor, target, &Settings::default())
    }

    pub fn export_method_with_settings(
        &self,
        name: &str,
        descriptor: &str,
        target: &mut ClassFile,
        settings: &Settings,
    ) -> Result<(), Error> {
        let method = self
            .find_method(name, descriptor)
            .ok_or_else(|| Error::MissingMember {
                name: name.to_owned(),
                descriptor: descriptor.to_owned(),
            })?;

        target.constants.add_utf8(name)?;
        target.constants.add_utf8(descriptor)?;
        let attributes = method
            .attributes
            .iter()
            .map(|attribute| attribute.export(&self.constants, &mut target.constants, settings))
            .collect::<Result<Vec<_>, Error>>()?;

        let exported = Method {
            access_flags: method.access_flags,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            attributes,
        };
        debug!(
            "exported {}.{}{} into {}",
            self.this_class, name, descriptor, target.this_class
        );
        match target.find_method_mut(name, descriptor) {
            Some(existing) => *existing = exported,
            None => target.methods.push(exported),
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bad_magic() {
        let bytes = [0xCA, 0xFE, 0xD0, 0x0D, 0, 0, 0, 52];
        assert!(matches!(
            ClassFile::read(&mut &bytes[..]),
            Err(Error::Format(FormatError::BadMagic(0xCAFE_D00D)))
        ));
    }

    #[test]
    fn truncated_header() {
        let bytes = [0xCA, 0xFE, 0xBA, 0xBE, 0, 0];
        assert!(matches!(
            ClassFile::read(&mut &bytes[..]),
            Err(Error::Format(FormatError::Truncated))
        ));
    }

    #[test]
    fn write_then_read() {
        let mut class = ClassFile::new("pkg/Thing", Some("java/lang/Object")).unwrap();
        class.add_interface("java/lang/Runnable").unwrap();
        class
            .create_field(FieldAccessFlags::PRIVATE, "count", "I")
            .unwrap();
        class
            .create_method(MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT, "run", "()V")
            .unwrap();
        class
            .add_method_attribute(
                "run",
                "()V",
                Attribute::Exceptions(vec!["java/lang/Exception".to_owned()]),
            )
            .unwrap();

        let bytes = class.to_bytes().unwrap();
        let read = ClassFile::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(read.this_class, "pkg/Thing");
        assert_eq!(read.super_class.as_deref(), Some("java/lang/Object"));
        assert_eq!(read.interfaces, vec!["java/lang/Runnable".to_owned()]);
        assert_eq!(read.field("count").unwrap().descriptor, "I");
        assert_eq!(
            read.find_method("run", "()V").unwrap().exception_types(),
            &["java/lang/Exception".to_owned()]
        );
        assert_eq!(read.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn missing_names_fail_to_write() {
        let mut class = ClassFile::new("pkg/Thing", None).unwrap();
        class.methods.push(Method {
            access_flags: MethodAccessFlags::STATIC,
            name: "unregistered".to_owned(),
            descriptor: "()V".to_owned(),
            attributes: vec![],
        });
        assert!(matches!(
            class.to_bytes(),
            Err(Error::MissingConstant(name)) if name == "unregistered"
        ));
    }

    #[test]
    fn attribute_lookup_prefers_the_last() {
        let mut class = ClassFile::new("pkg/Thing", None).unwrap();
        class
            .add_attribute(Attribute::Signature("first".to_owned()))
            .unwrap();
        class
            .add_attribute(Attribute::Signature("second".to_owned()))
            .unwrap();
        assert_eq!(
            class.attribute("Signature"),
            Some(&Attribute::Signature("second".to_owned()))
        );
    }
}
