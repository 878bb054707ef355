//! Raw JVM opcodes and the operand-length table the cursor walks with
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-6.html

use crate::{Error, FormatError};
use byteorder::{BigEndian, ByteOrder};

pub const NOP: u8 = 0x00;
pub const ACONST_NULL: u8 = 0x01;
pub const ICONST_0: u8 = 0x03;
pub const BIPUSH: u8 = 0x10;
pub const SIPUSH: u8 = 0x11;
pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;
pub const LDC2_W: u8 = 0x14;
pub const ILOAD: u8 = 0x15;
pub const LLOAD: u8 = 0x16;
pub const FLOAD: u8 = 0x17;
pub const DLOAD: u8 = 0x18;
pub const ALOAD: u8 = 0x19;
pub const ILOAD_0: u8 = 0x1a;
pub const ISTORE: u8 = 0x36;
pub const LSTORE: u8 = 0x37;
pub const FSTORE: u8 = 0x38;
pub const DSTORE: u8 = 0x39;
pub const ASTORE: u8 = 0x3a;
pub const ISTORE_0: u8 = 0x3b;
pub const POP: u8 = 0x57;
pub const DUP: u8 = 0x59;
pub const IADD: u8 = 0x60;
pub const IINC: u8 = 0x84;
pub const IFEQ: u8 = 0x99;
pub const IFNE: u8 = 0x9a;
pub const IFLT: u8 = 0x9b;
pub const IFGE: u8 = 0x9c;
pub const IFGT: u8 = 0x9d;
pub const IFLE: u8 = 0x9e;
pub const IF_ICMPEQ: u8 = 0x9f;
pub const IF_ICMPNE: u8 = 0xa0;
pub const IF_ICMPLT: u8 = 0xa1;
pub const IF_ICMPGE: u8 = 0xa2;
pub const IF_ICMPGT: u8 = 0xa3;
pub const IF_ICMPLE: u8 = 0xa4;
pub const IF_ACMPEQ: u8 = 0xa5;
pub const IF_ACMPNE: u8 = 0xa6;
pub const GOTO: u8 = 0xa7;
pub const JSR: u8 = 0xa8;
pub const RET: u8 = 0xa9;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const IRETURN: u8 = 0xac;
pub const LRETURN: u8 = 0xad;
pub const FRETURN: u8 = 0xae;
pub const DRETURN: u8 = 0xaf;
pub const ARETURN: u8 = 0xb0;
pub const RETURN: u8 = 0xb1;
pub const GETSTATIC: u8 = 0xb2;
pub const PUTSTATIC: u8 = 0xb3;
pub const GETFIELD: u8 = 0xb4;
pub const PUTFIELD: u8 = 0xb5;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const NEW: u8 = 0xbb;
pub const NEWARRAY: u8 = 0xbc;
pub const ANEWARRAY: u8 = 0xbd;
pub const ARRAYLENGTH: u8 = 0xbe;
pub const ATHROW: u8 = 0xbf;
pub const CHECKCAST: u8 = 0xc0;
pub const INSTANCEOF: u8 = 0xc1;
pub const MONITORENTER: u8 = 0xc2;
pub const MONITOREXIT: u8 = 0xc3;
pub const WIDE: u8 = 0xc4;
pub const MULTIANEWARRAY: u8 = 0xc5;
pub const IFNULL: u8 = 0xc6;
pub const IFNONNULL: u8 = 0xc7;
pub const GOTO_W: u8 = 0xc8;
pub const JSR_W: u8 = 0xc9;

/// How many operand bytes follow an opcode
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OperandLength {
    Fixed(usize),

    /// `tableswitch`, `lookupswitch`, and `wide`: length depends on the operands themselves
    Variable,

    /// Reserved or unassigned opcode
    Unsupported,
}

pub fn operand_length(opcode: u8) -> OperandLength {
    use OperandLength::*;
    match opcode {
        BIPUSH | LDC => Fixed(1),
        SIPUSH | LDC_W | LDC2_W => Fixed(2),
        ILOAD..=ALOAD | ISTORE..=ASTORE | RET | NEWARRAY => Fixed(1),
        IINC => Fixed(2),
        IFEQ..=JSR | IFNULL | IFNONNULL => Fixed(2),
        GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => Fixed(2),
        INVOKEINTERFACE | INVOKEDYNAMIC | GOTO_W | JSR_W => Fixed(4),
        MULTIANEWARRAY => Fixed(3),
        TABLESWITCH | LOOKUPSWITCH | WIDE => Variable,
        0x00..=0xc9 => Fixed(0),
        _ => Unsupported,
    }
}

/// Start of the 4-byte aligned operands of a switch at `offset`
pub fn switch_operands(offset: usize) -> usize {
    let arg = offset + 1;
    arg + (4 - arg % 4) % 4
}

/// Padding between a switch opcode at `offset` and its aligned operands
pub fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

pub(crate) fn read_i32(code: &[u8], at: usize, offset: usize) -> Result<i32, Error> {
    code.get(at..at + 4)
        .map(BigEndian::read_i32)
        .ok_or(Error::Format(FormatError::BadInstruction { offset }))
}

/// Full length (opcode included) of the instruction at `offset`
///
/// Unlike the cursor's successor computation, this knows how long a `lookupswitch` is, so it can
/// be used to sweep linearly over a method.
pub fn instruction_length(code: &[u8], offset: usize) -> Result<usize, Error> {
    let bad = Error::Format(FormatError::BadInstruction { offset });
    let opcode = *code.get(offset).ok_or(bad)?;
    let length = match operand_length(opcode) {
        OperandLength::Fixed(operands) => 1 + operands,
        OperandLength::Unsupported => return Err(Error::UnsupportedOpcode { opcode, offset }),
        OperandLength::Variable => match opcode {
            TABLESWITCH => {
                let arg = switch_operands(offset);
                let low = read_i32(code, arg + 4, offset)? as i64;
                let high = read_i32(code, arg + 8, offset)? as i64;
                let entries = usize::try_from(high - low + 1)
                    .map_err(|_| Error::Format(FormatError::BadInstruction { offset }))?;
                entries
                    .checked_mul(4)
                    .and_then(|table| (arg + 12 - offset).checked_add(table))
                    .ok_or(Error::Format(FormatError::BadInstruction { offset }))?
            }
            LOOKUPSWITCH => {
                let arg = switch_operands(offset);
                let pairs = usize::try_from(read_i32(code, arg + 4, offset)?)
                    .map_err(|_| Error::Format(FormatError::BadInstruction { offset }))?;
                pairs
                    .checked_mul(8)
                    .and_then(|table| (arg + 8 - offset).checked_add(table))
                    .ok_or(Error::Format(FormatError::BadInstruction { offset }))?
            }
            _ => match code.get(offset + 1) {
                Some(&IINC) => 6,
                Some(_) => 4,
                None => return Err(Error::Format(FormatError::BadInstruction { offset })),
            },
        },
    };
    if length > code.len() - offset {
        return Err(Error::Format(FormatError::BadInstruction { offset }));
    }
    Ok(length)
}

/// Does this opcode take a signed 16-bit (or for the `_w` forms, 32-bit) branch offset?
pub fn is_branch(opcode: u8) -> bool {
    matches!(opcode, IFEQ..=JSR | IFNULL | IFNONNULL | GOTO_W | JSR_W)
}

pub fn is_wide_branch(opcode: u8) -> bool {
    matches!(opcode, GOTO_W | JSR_W)
}

pub fn is_switch(opcode: u8) -> bool {
    matches!(opcode, TABLESWITCH | LOOKUPSWITCH)
}

/// Instructions after which control never falls through to the next instruction
pub fn ends_block(opcode: u8) -> bool {
    matches!(opcode, GOTO | GOTO_W | RET | IRETURN..=RETURN | ATHROW)
}

/// Assembler name of an opcode
pub fn mnemonic(opcode: u8) -> Option<&'static str> {
    MNEMONICS.get(opcode as usize).copied()
}

const MNEMONICS: [&str; 0xca] = [
    "nop", "aconst_null", "iconst_m1", "iconst_0", "iconst_1", "iconst_2", "iconst_3", "iconst_4",
    "iconst_5", "lconst_0", "lconst_1", "fconst_0", "fconst_1", "fconst_2", "dconst_0", "dconst_1",
    "bipush", "sipush", "ldc", "ldc_w", "ldc2_w", "iload", "lload", "fload",
    "dload", "aload", "iload_0", "iload_1", "iload_2", "iload_3", "lload_0", "lload_1",
    "lload_2", "lload_3", "fload_0", "fload_1", "fload_2", "fload_3", "dload_0", "dload_1",
    "dload_2", "dload_3", "aload_0", "aload_1", "aload_2", "aload_3", "iaload", "laload",
    "faload", "daload", "aaload", "baload", "caload", "saload", "istore", "lstore",
    "fstore", "dstore", "astore", "istore_0", "istore_1", "istore_2", "istore_3", "lstore_0",
    "lstore_1", "lstore_2", "lstore_3", "fstore_0", "fstore_1", "fstore_2", "fstore_3", "dstore_0",
    "dstore_1", "dstore_2", "dstore_3", "astore_0", "astore_1", "astore_2", "astore_3", "iastore",
    "lastore", "fastore", "dastore", "aastore", "bastore", "castore", "sastore", "pop",
    "pop2", "dup", "dup_x1", "dup_x2", "dup2", "dup2_x1", "dup2_x2", "swap",
    "iadd", "ladd", "fadd", "dadd", "isub", "lsub", "fsub", "dsub",
    "imul", "lmul", "fmul", "dmul", "idiv", "ldiv", "fdiv", "ddiv",
    "irem", "lrem", "frem", "drem", "ineg", "lneg", "fneg", "dneg",
    "ishl", "lshl", "ishr", "lshr", "iushr", "lushr", "iand", "land",
    "ior", "lor", "ixor", "lxor", "iinc", "i2l", "i2f", "i2d",
    "l2i", "l2f", "l2d", "f2i", "f2l", "f2d", "d2i", "d2l",
    "d2f", "i2b", "i2c", "i2s", "lcmp", "fcmpl", "fcmpg", "dcmpl",
    "dcmpg", "ifeq", "ifne", "iflt", "ifge", "ifgt", "ifle", "if_icmpeq",
    "if_icmpne", "if_icmplt", "if_icmpge", "if_icmpgt", "if_icmple", "if_acmpeq", "if_acmpne", "goto",
    "jsr", "ret", "tableswitch", "lookupswitch", "ireturn", "lreturn", "freturn", "dreturn",
    "areturn", "return", "getstatic", "putstatic", "getfield", "putfield", "invokevirtual", "invokespecial",
    "invokestatic", "invokeinterface", "invokedynamic", "new", "newarray", "anewarray", "arraylength", "athrow",
    "checkcast", "instanceof", "monitorenter", "monitorexit", "wide", "multianewarray", "ifnull", "ifnonnull",
    "goto_w", "jsr_w",
];
