use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    /// Input bytes do not form a valid class file
    Format(FormatError),

    /// Constant pool lookup at a bad index or of the wrong kind
    Index(IndexError),

    /// Opcode has no entry in the operand-length table
    UnsupportedOpcode { opcode: u8, offset: usize },

    /// Writer was asked to emit a constant that was never added to the pool
    MissingConstant(String),

    /// No method or field with the requested name and descriptor
    MissingMember { name: String, descriptor: String },

    /// Pool would need more than 65535 slots
    ConstantPoolOverflow,

    /// Modified UTF-8 encoding of a string constant is longer than 65535 bytes
    Utf8TooLong(usize),

    /// Instruction array would grow past 65535 bytes
    CodeTooLarge(usize),

    /// Edit moved a jump target out of reach of the jump's operand width
    BranchOverflow { source: usize, delta: i64 },

    IoError(io::Error),
}

#[derive(Debug)]
pub enum FormatError {
    BadMagic(u32),
    UnknownConstantTag { tag: u8, index: u16 },
    Truncated,
    BadUtf8 { index: u16 },
    UnknownHandleKind { kind: u8, index: u16 },
    AttributeLength {
        name: String,
        declared: u32,
        consumed: u64,
    },

    /// Operand or branch target lies outside of the instruction array
    BadInstruction { offset: usize },
}

#[derive(Debug)]
pub enum IndexError {
    OutOfRange(u16),

    /// Second slot of a long or double constant
    Placeholder(u16),

    WrongKind {
        index: u16,
        expected: &'static str,
        found: &'static str,
    },
}

impl From<FormatError> for Error {
    fn from(err: FormatError) -> Error {
        Error::Format(err)
    }
}

impl From<IndexError> for Error {
    fn from(err: IndexError) -> Error {
        Error::Index(err)
    }
}

/// Running out of input is a malformed class, not an I/O failure
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::Format(FormatError::Truncated)
        } else {
            Error::IoError(err)
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Format(err) => write!(f, "malformed class file: {}", err),
            Error::Index(err) => write!(f, "bad constant reference: {}", err),
            Error::UnsupportedOpcode { opcode, offset } => {
                write!(f, "{}: can't handle opcode 0x{:02x}", offset, opcode)
            }
            Error::MissingConstant(value) => {
                write!(f, "constant {:?} was never added to the pool", value)
            }
            Error::MissingMember { name, descriptor } => {
                write!(f, "no member {}{}", name, descriptor)
            }
            Error::ConstantPoolOverflow => write!(f, "constant pool has more than 65535 slots"),
            Error::Utf8TooLong(length) => {
                write!(f, "string constant encodes to {} bytes, the limit is 65535", length)
            }
            Error::CodeTooLarge(length) => {
                write!(f, "code would be {} bytes long, the limit is 65535", length)
            }
            Error::BranchOverflow { source, delta } => {
                write!(f, "jump at {} can't encode a delta of {}", source, delta)
            }
            Error::IoError(err) => write!(f, "{}", err),
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::BadMagic(magic) => write!(f, "bad magic number 0x{:08x}", magic),
            FormatError::UnknownConstantTag { tag, index } => {
                write!(f, "'{}' is an unknown constant pool type (at #{})", tag, index)
            }
            FormatError::Truncated => write!(f, "unexpected end of input"),
            FormatError::BadUtf8 { index } => write!(f, "invalid modified UTF-8 in #{}", index),
            FormatError::UnknownHandleKind { kind, index } => {
                write!(f, "'{}' is an unknown method handle kind (at #{})", kind, index)
            }
            FormatError::AttributeLength {
                name,
                declared,
                consumed,
            } => write!(
                f,
                "attribute {} declares {} bytes but its body is {} bytes",
                name, declared, consumed
            ),
            FormatError::BadInstruction { offset } => {
                write!(f, "instruction at {} reaches outside of the code", offset)
            }
        }
    }
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::OutOfRange(index) => write!(f, "#{} is out of range", index),
            IndexError::Placeholder(index) => {
                write!(f, "#{} is the unusable second half of a wide constant", index)
            }
            IndexError::WrongKind {
                index,
                expected,
                found,
            } => write!(f, "#{} is a {} constant, expected {}", index, found, expected),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}
