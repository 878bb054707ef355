use crate::class_file::{read_bytes, Deserialize, Serialize};
use crate::{Error, FormatError, IndexError};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::result::Result;

/// Class file constants pool
///
/// The pool is append only: every `add_*` method either finds a structurally equal entry and
/// returns its index, or pushes a new entry at the end. Composite entries (classes, member
/// references, ...) add their dependencies first, so a single call may grow the pool by several
/// slots. Indices start at 1 and `Long`/`Double` entries take up two slots, the second of which is
/// an unusable placeholder.
///
/// Entries read from a class file are pushed as-is (duplicates included) so that writing the pool
/// back out reproduces the original bytes.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    /// Slot 0 and the slot after every wide constant are `None`
    entries: Vec<Option<Constant>>,

    utf8s: HashMap<String, u16>,
    others: HashMap<ConstantKey, u16>,
}

/// Constants as in the constant pool
///
/// Note: `Dynamic`, `Module`, and `Package` constants are not included
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Class or an interface
    Class(u16),

    /// Constant object of type `java.lang.String`
    String(u16),

    /// Field
    FieldRef { class: u16, name_and_type: u16 },

    /// Method (this combines `Methodref` and `InterfaceMethodref`)
    MethodRef {
        class: u16,
        name_and_type: u16,
        is_interface: bool,
    },

    /// Name and a type (eg. for a field or a method)
    NameAndType { name: u16, descriptor: u16 },

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle { handle_kind: HandleKind, member: u16 },

    /// Method type
    MethodType { descriptor: u16 },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute (not into the pool)
        bootstrap_method: u16,
        name_and_type: u16,
    },
}

impl Constant {
    /// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`.
    /// Quoting the spec:
    ///
    /// > In retrospect, making 8-byte constants take two constant pool entries was a poor choice.
    pub fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Constant::Utf8(_) => "Utf8",
            Constant::Integer(_) => "Integer",
            Constant::Float(_) => "Float",
            Constant::Long(_) => "Long",
            Constant::Double(_) => "Double",
            Constant::Class(_) => "Class",
            Constant::String(_) => "String",
            Constant::FieldRef { .. } => "Fieldref",
            Constant::MethodRef {
                is_interface: false,
                ..
            } => "Methodref",
            Constant::MethodRef {
                is_interface: true, ..
            } => "InterfaceMethodref",
            Constant::NameAndType { .. } => "NameAndType",
            Constant::MethodHandle { .. } => "MethodHandle",
            Constant::MethodType { .. } => "MethodType",
            Constant::InvokeDynamic { .. } => "InvokeDynamic",
        }
    }

    /// Structural identity used for deduplication (floats compare by bit pattern)
    fn key(&self) -> Option<ConstantKey> {
        Some(match self {
            Constant::Utf8(_) => return None,
            Constant::Integer(i) => ConstantKey::Integer(*i),
            Constant::Float(f) => ConstantKey::Float(f.to_bits()),
            Constant::Long(l) => ConstantKey::Long(*l),
            Constant::Double(d) => ConstantKey::Double(d.to_bits()),
            Constant::Class(name) => ConstantKey::Class(*name),
            Constant::String(utf8) => ConstantKey::String(*utf8),
            Constant::FieldRef {
                class,
                name_and_type,
            } => ConstantKey::FieldRef(*class, *name_and_type),
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => ConstantKey::MethodRef(*class, *name_and_type, *is_interface),
            Constant::NameAndType { name, descriptor } => {
                ConstantKey::NameAndType(*name, *descriptor)
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => ConstantKey::MethodHandle(*handle_kind, *member),
            Constant::MethodType { descriptor } => ConstantKey::MethodType(*descriptor),
            Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => ConstantKey::InvokeDynamic(*bootstrap_method, *name_and_type),
        })
    }
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
enum ConstantKey {
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16, bool),
    NameAndType(u16, u16),
    MethodHandle(HandleKind, u16),
    MethodType(u16),
    InvokeDynamic(u16, u16),
}

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl HandleKind {
    pub fn from_u8(byte: u8) -> Option<HandleKind> {
        Some(match byte {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            _ => return None,
        })
    }

    pub fn to_u8(self) -> u8 {
        match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        }
    }
}

/// Which flavour of member reference a constant is
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum MemberKind {
    Field,
    Method,
    InterfaceMethod,
}

/// Resolved field or method reference
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct MemberRef<'a> {
    pub kind: MemberKind,
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

impl Default for ConstantPool {
    fn default() -> ConstantPool {
        ConstantPool::new()
    }
}

impl ConstantPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantPool {
        ConstantPool {
            entries: vec![None],
            utf8s: HashMap::new(),
            others: HashMap::new(),
        }
    }

    /// Value of the `constant_pool_count` header (one more than the largest index)
    pub fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    /// Iterate over the usable entries along with their indices
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| entry.as_ref().map(|entry| (idx as u16, entry)))
    }

    /// Push a constant into the pool without looking for an existing copy
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    pub fn push(&mut self, constant: Constant) -> Result<u16, Error> {
        let offset = self.entries.len();
        if offset + constant.width() > u16::MAX as usize {
            return Err(Error::ConstantPoolOverflow);
        }
        if let Constant::Utf8(string) = &constant {
            let length = modified_utf8_length(string);
            if length > u16::MAX as usize {
                return Err(Error::Utf8TooLong(length));
            }
        }
        let offset = offset as u16;

        // First occurrence wins, so lookups agree with what a linear scan would find
        match constant.key() {
            None => {
                if let Constant::Utf8(string) = &constant {
                    self.utf8s.entry(string.clone()).or_insert(offset);
                }
            }
            Some(key) => {
                self.others.entry(key).or_insert(offset);
            }
        }

        let wide = constant.width() == 2;
        self.entries.push(Some(constant));
        if wide {
            self.entries.push(None);
        }
        Ok(offset)
    }

    fn get_or_push(&mut self, constant: Constant) -> Result<u16, Error> {
        if let Some(key) = constant.key() {
            if let Some(idx) = self.others.get(&key) {
                return Ok(*idx);
            }
        }
        self.push(constant)
    }

    /// Positional lookup
    pub fn get(&self, index: u16) -> Result<&Constant, Error> {
        match self.entries.get(index as usize) {
            None => Err(IndexError::OutOfRange(index).into()),
            Some(None) if index == 0 => Err(IndexError::OutOfRange(index).into()),
            Some(None) => Err(IndexError::Placeholder(index).into()),
            Some(Some(constant)) => Ok(constant),
        }
    }

    fn wrong_kind(index: u16, expected: &'static str, found: &Constant) -> Error {
        Error::Index(IndexError::WrongKind {
            index,
            expected,
            found: found.kind(),
        })
    }

    pub fn get_utf8(&self, index: u16) -> Result<&str, Error> {
        match self.get(index)? {
            Constant::Utf8(string) => Ok(string),
            other => Err(Self::wrong_kind(index, "Utf8", other)),
        }
    }

    /// Name of the class referenced by a `Class` constant
    pub fn get_class(&self, index: u16) -> Result<&str, Error> {
        match self.get(index)? {
            Constant::Class(name) => self.get_utf8(*name),
            other => Err(Self::wrong_kind(index, "Class", other)),
        }
    }

    pub fn get_string(&self, index: u16) -> Result<&str, Error> {
        match self.get(index)? {
            Constant::String(utf8) => self.get_utf8(*utf8),
            other => Err(Self::wrong_kind(index, "String", other)),
        }
    }

    pub fn get_integer(&self, index: u16) -> Result<i32, Error> {
        match self.get(index)? {
            Constant::Integer(integer) => Ok(*integer),
            other => Err(Self::wrong_kind(index, "Integer", other)),
        }
    }

    pub fn get_float(&self, index: u16) -> Result<f32, Error> {
        match self.get(index)? {
            Constant::Float(float) => Ok(*float),
            other => Err(Self::wrong_kind(index, "Float", other)),
        }
    }

    pub fn get_long(&self, index: u16) -> Result<i64, Error> {
        match self.get(index)? {
            Constant::Long(long) => Ok(*long),
            other => Err(Self::wrong_kind(index, "Long", other)),
        }
    }

    pub fn get_double(&self, index: u16) -> Result<f64, Error> {
        match self.get(index)? {
            Constant::Double(double) => Ok(*double),
            other => Err(Self::wrong_kind(index, "Double", other)),
        }
    }

    /// Name and descriptor of a `NameAndType` constant
    pub fn get_name_and_type(&self, index: u16) -> Result<(&str, &str), Error> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.get_utf8(*name)?, self.get_utf8(*descriptor)?))
            }
            other => Err(Self::wrong_kind(index, "NameAndType", other)),
        }
    }

    /// Any field, method, or interface method reference
    pub fn get_member_ref(&self, index: u16) -> Result<MemberRef<'_>, Error> {
        let (kind, class, name_and_type) = match self.get(index)? {
            Constant::FieldRef {
                class,
                name_and_type,
            } => (MemberKind::Field, *class, *name_and_type),
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface: false,
            } => (MemberKind::Method, *class, *name_and_type),
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface: true,
            } => (MemberKind::InterfaceMethod, *class, *name_and_type),
            other => return Err(Self::wrong_kind(index, "member reference", other)),
        };
        let (name, descriptor) = self.get_name_and_type(name_and_type)?;
        Ok(MemberRef {
            kind,
            class: self.get_class(class)?,
            name,
            descriptor,
        })
    }

    pub fn get_field_ref(&self, index: u16) -> Result<MemberRef<'_>, Error> {
        let member = self.get_member_ref(index)?;
        match member.kind {
            MemberKind::Field => Ok(member),
            _ => Err(Self::wrong_kind(index, "Fieldref", self.get(index)?)),
        }
    }

    /// Method reference (either `Methodref` or `InterfaceMethodref`, since `invokestatic` and
    /// `invokespecial` accept both)
    pub fn get_method_ref(&self, index: u16) -> Result<MemberRef<'_>, Error> {
        let member = self.get_member_ref(index)?;
        match member.kind {
            MemberKind::Field => Err(Self::wrong_kind(index, "Methodref", self.get(index)?)),
            _ => Ok(member),
        }
    }

    pub fn get_interface_method_ref(&self, index: u16) -> Result<MemberRef<'_>, Error> {
        let member = self.get_member_ref(index)?;
        match member.kind {
            MemberKind::InterfaceMethod => Ok(member),
            _ => Err(Self::wrong_kind(index, "InterfaceMethodref", self.get(index)?)),
        }
    }

    /// Find an existing UTF-8 constant
    pub fn find_utf8(&self, utf8: &str) -> Option<u16> {
        self.utf8s.get(utf8).copied()
    }

    /// Find an existing class constant
    pub fn find_class(&self, name: &str) -> Option<u16> {
        let utf8 = self.find_utf8(name)?;
        self.others.get(&ConstantKey::Class(utf8)).copied()
    }

    /// Index of a UTF-8 constant which must already be in the pool
    pub fn utf8_index(&self, utf8: &str) -> Result<u16, Error> {
        self.find_utf8(utf8)
            .ok_or_else(|| Error::MissingConstant(utf8.to_owned()))
    }

    /// Index of a class constant which must already be in the pool
    pub fn class_index(&self, name: &str) -> Result<u16, Error> {
        self.find_class(name)
            .ok_or_else(|| Error::MissingConstant(name.to_owned()))
    }

    /// Get or insert a utf8 constant from the constant pool
    pub fn add_utf8<'a, S: Into<Cow<'a, str>>>(&mut self, utf8: S) -> Result<u16, Error> {
        let cow = utf8.into();
        if let Some(idx) = self.utf8s.get::<str>(cow.borrow()) {
            Ok(*idx)
        } else {
            self.push(Constant::Utf8(cow.into_owned()))
        }
    }

    /// Get or insert a class constant (and its name)
    pub fn add_class(&mut self, name: &str) -> Result<u16, Error> {
        let name = self.add_utf8(name)?;
        self.get_or_push(Constant::Class(name))
    }

    /// Get or insert a string constant (and its contents)
    pub fn add_string(&mut self, value: &str) -> Result<u16, Error> {
        let utf8 = self.add_utf8(value)?;
        self.get_or_push(Constant::String(utf8))
    }

    pub fn add_integer(&mut self, value: i32) -> Result<u16, Error> {
        self.get_or_push(Constant::Integer(value))
    }

    pub fn add_float(&mut self, value: f32) -> Result<u16, Error> {
        self.get_or_push(Constant::Float(value))
    }

    /// Adds the long followed by its placeholder slot
    pub fn add_long(&mut self, value: i64) -> Result<u16, Error> {
        self.get_or_push(Constant::Long(value))
    }

    /// Adds the double followed by its placeholder slot
    pub fn add_double(&mut self, value: f64) -> Result<u16, Error> {
        self.get_or_push(Constant::Double(value))
    }

    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, Error> {
        let name = self.add_utf8(name)?;
        let descriptor = self.add_utf8(descriptor)?;
        self.get_or_push(Constant::NameAndType { name, descriptor })
    }

    pub fn add_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16, Error> {
        let class = self.add_class(class)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.get_or_push(Constant::FieldRef {
            class,
            name_and_type,
        })
    }

    pub fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16, Error> {
        let class = self.add_class(class)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.get_or_push(Constant::MethodRef {
            class,
            name_and_type,
            is_interface: false,
        })
    }

    pub fn add_interface_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, Error> {
        let class = self.add_class(class)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.get_or_push(Constant::MethodRef {
            class,
            name_and_type,
            is_interface: true,
        })
    }

    /// Add a member reference of whichever kind `member` is
    pub fn add_member_ref(&mut self, member: &MemberRef<'_>) -> Result<u16, Error> {
        match member.kind {
            MemberKind::Field => self.add_field_ref(member.class, member.name, member.descriptor),
            MemberKind::Method => self.add_method_ref(member.class, member.name, member.descriptor),
            MemberKind::InterfaceMethod => {
                self.add_interface_method_ref(member.class, member.name, member.descriptor)
            }
        }
    }

    pub fn add_method_type(&mut self, descriptor: &str) -> Result<u16, Error> {
        let descriptor = self.add_utf8(descriptor)?;
        self.get_or_push(Constant::MethodType { descriptor })
    }

    /// `member` must already be a field or method reference in this pool
    pub fn add_method_handle(&mut self, handle_kind: HandleKind, member: u16) -> Result<u16, Error> {
        self.get_member_ref(member)?;
        self.get_or_push(Constant::MethodHandle {
            handle_kind,
            member,
        })
    }

    /// Re-resolve the entry at `index` and add its structural equivalent into another pool
    ///
    /// Invoke-dynamic entries point into the class' `BootstrapMethods` attribute, so they can't be
    /// moved on their own.
    pub fn export_constant(&self, index: u16, target: &mut ConstantPool) -> Result<u16, Error> {
        match self.get(index)? {
            Constant::Utf8(string) => target.add_utf8(string.as_str()),
            Constant::Integer(integer) => target.add_integer(*integer),
            Constant::Float(float) => target.add_float(*float),
            Constant::Long(long) => target.add_long(*long),
            Constant::Double(double) => target.add_double(*double),
            Constant::Class(_) => target.add_class(self.get_class(index)?),
            Constant::String(_) => target.add_string(self.get_string(index)?),
            Constant::FieldRef { .. } | Constant::MethodRef { .. } => {
                target.add_member_ref(&self.get_member_ref(index)?)
            }
            Constant::NameAndType { .. } => {
                let (name, descriptor) = self.get_name_and_type(index)?;
                target.add_name_and_type(name, descriptor)
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                let member = self.export_constant(*member, target)?;
                target.add_method_handle(*handle_kind, member)
            }
            Constant::MethodType { descriptor } => target.add_method_type(self.get_utf8(*descriptor)?),
            other @ Constant::InvokeDynamic { .. } => {
                Err(Self::wrong_kind(index, "exportable constant", other))
            }
        }
    }

    /// Check that every entry referring to another slot refers to one of the right kind
    pub fn validate(&self) -> Result<(), Error> {
        for (index, constant) in self.iter() {
            match constant {
                Constant::Utf8(_)
                | Constant::Integer(_)
                | Constant::Float(_)
                | Constant::Long(_)
                | Constant::Double(_) => (),
                Constant::Class(_) => {
                    self.get_class(index)?;
                }
                Constant::String(_) => {
                    self.get_string(index)?;
                }
                Constant::FieldRef { .. } | Constant::MethodRef { .. } => {
                    self.get_member_ref(index)?;
                }
                Constant::NameAndType { .. } => {
                    self.get_name_and_type(index)?;
                }
                Constant::MethodHandle { member, .. } => {
                    self.get_member_ref(*member)?;
                }
                Constant::MethodType { descriptor } => {
                    self.get_utf8(*descriptor)?;
                }
                Constant::InvokeDynamic { name_and_type, .. } => {
                    self.get_name_and_type(*name_and_type)?;
                }
            }
        }
        Ok(())
    }

    /// Human readable rendering of a constant, for listings
    pub fn render(&self, index: u16) -> Result<String, Error> {
        Ok(match self.get(index)? {
            Constant::Utf8(string) => format!("{:?}", string),
            Constant::Integer(integer) => integer.to_string(),
            Constant::Float(float) => format!("{}f", float),
            Constant::Long(long) => format!("{}L", long),
            Constant::Double(double) => format!("{}d", double),
            Constant::Class(_) => self.get_class(index)?.to_owned(),
            Constant::String(_) => format!("{:?}", self.get_string(index)?),
            Constant::FieldRef { .. } | Constant::MethodRef { .. } => {
                let member = self.get_member_ref(index)?;
                format!("{}.{}:{}", member.class, member.name, member.descriptor)
            }
            Constant::NameAndType { .. } => {
                let (name, descriptor) = self.get_name_and_type(index)?;
                format!("{}:{}", name, descriptor)
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => format!("{:?} {}", handle_kind, self.render(*member)?),
            Constant::MethodType { descriptor } => self.get_utf8(*descriptor)?.to_owned(),
            Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                let (name, descriptor) = self.get_name_and_type(*name_and_type)?;
                format!("#{}:{}:{}", bootstrap_method, name, descriptor)
            }
        })
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                1u8.serialize(writer)?;
                let buffer: Vec<u8> = encode_modified_utf8(string);
                let length = u16::try_from(buffer.len()).map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "string constant too long")
                })?;
                length.serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(float) => {
                4u8.serialize(writer)?;
                float.serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(double) => {
                6u8.serialize(writer)?;
                double.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(bytes) => {
                8u8.serialize(writer)?;
                bytes.serialize(writer)?;
            }
            Constant::FieldRef {
                class,
                name_and_type,
            } => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if !is_interface { 10u8 } else { 11u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                handle_kind.to_u8().serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// Decode one tagged entry, `index` being the slot it will land in (for error reporting)
fn read_constant<R: ReadBytesExt>(reader: &mut R, index: u16) -> Result<Constant, Error> {
    let tag = u8::deserialize(reader)?;
    Ok(match tag {
        1 => {
            let len = u16::deserialize(reader)?;
            let bytes = read_bytes(reader, len as usize)?;
            let string = decode_modified_utf8(&bytes)
                .ok_or(Error::Format(FormatError::BadUtf8 { index }))?;
            Constant::Utf8(string)
        }
        3 => Constant::Integer(i32::deserialize(reader)?),
        4 => Constant::Float(f32::deserialize(reader)?),
        5 => Constant::Long(i64::deserialize(reader)?),
        6 => Constant::Double(f64::deserialize(reader)?),
        7 => Constant::Class(u16::deserialize(reader)?),
        8 => Constant::String(u16::deserialize(reader)?),
        9 | 10 | 11 => {
            let class = u16::deserialize(reader)?;
            let name_and_type = u16::deserialize(reader)?;
            if tag == 9 {
                Constant::FieldRef {
                    class,
                    name_and_type,
                }
            } else {
                Constant::MethodRef {
                    class,
                    name_and_type,
                    is_interface: tag == 11,
                }
            }
        }
        12 => {
            let name = u16::deserialize(reader)?;
            let descriptor = u16::deserialize(reader)?;
            Constant::NameAndType { name, descriptor }
        }
        15 => {
            let kind = u8::deserialize(reader)?;
            let handle_kind =
                HandleKind::from_u8(kind).ok_or(FormatError::UnknownHandleKind { kind, index })?;
            let member = u16::deserialize(reader)?;
            Constant::MethodHandle {
                handle_kind,
                member,
            }
        }
        16 => Constant::MethodType {
            descriptor: u16::deserialize(reader)?,
        },
        18 => {
            let bootstrap_method = u16::deserialize(reader)?;
            let name_and_type = u16::deserialize(reader)?;
            Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            }
        }
        _ => return Err(FormatError::UnknownConstantTag { tag, index }.into()),
    })
}

impl Serialize for ConstantPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.count().serialize(writer)?;
        for (_, constant) in self.iter() {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

impl Deserialize for ConstantPool {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let count = u16::deserialize(reader)?;
        let mut pool = ConstantPool::new();
        while pool.count() < count {
            let constant = read_constant(reader, pool.count())?;
            pool.push(constant)?;
        }

        // A wide constant in the last slot pushes us one past the declared count
        if pool.count() != count {
            return Err(Error::Format(FormatError::Truncated));
        }
        pool.validate()?;
        Ok(pool)
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    for c in string.chars() {
        // Handle the exception for how `\u{0000}` is represented
        let len: usize = if c == '\u{0000}' { 2 } else { c.len_utf8() };
        let code: u32 = c as u32;

        match len {
            1 => buffer.push(code as u8),
            2 => {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
            3 => {
                buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }

            // Supplementary characters: main divergence from unicode
            _ => {
                buffer.push(0b1110_1101);
                buffer.push(((code >> 16 & 0x0F) as u8).wrapping_sub(1) & 0x0F | 0b1010_0000);
                buffer.push((code >> 10 & 0x3F) as u8 | 0b1000_0000);

                buffer.push(0b1110_1101);
                buffer.push(((code >> 6 & 0x0F) as u8) | 0b1011_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
        }
    }
    buffer
}

/// Number of bytes `encode_modified_utf8` would produce
pub fn modified_utf8_length(string: &str) -> usize {
    string
        .chars()
        .map(|c| match c {
            '\u{0000}' => 2,
            c if c.len_utf8() == 4 => 6,
            c => c.len_utf8(),
        })
        .sum()
}

/// Inverse of [`encode_modified_utf8`]
///
/// Surrogate pairs are recombined into supplementary characters. Lone surrogates have no `str`
/// representation, so they (like any other malformed sequence) make decoding fail.
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i] as u16;
        if b0 < 0x80 {
            units.push(b0);
            i += 1;
        } else if b0 & 0xE0 == 0xC0 {
            let b1 = *bytes.get(i + 1)? as u16;
            if b1 & 0xC0 != 0x80 {
                return None;
            }
            units.push(((b0 & 0x1F) << 6) | (b1 & 0x3F));
            i += 2;
        } else if b0 & 0xF0 == 0xE0 {
            let b1 = *bytes.get(i + 1)? as u16;
            let b2 = *bytes.get(i + 2)? as u16;
            if b1 & 0xC0 != 0x80 || b2 & 0xC0 != 0x80 {
                return None;
            }
            units.push(((b0 & 0x0F) << 12) | ((b1 & 0x3F) << 6) | (b2 & 0x3F));
            i += 3;
        } else {
            return None;
        }
    }
    String::from_utf16(&units).ok()
}
