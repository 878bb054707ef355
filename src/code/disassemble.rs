use crate::class_file::{CodeAttribute, ConstantPool};
use crate::code::opcodes::*;
use crate::Error;
use byteorder::{BigEndian, ByteOrder};
use std::fmt;

/// One decoded instruction of a listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    pub offset: usize,

    /// Set for instructions behind a `wide` prefix
    pub wide: bool,
    pub mnemonic: &'static str,

    /// Operands, with constant pool references and branch targets resolved
    pub operand: String,
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>5}: ", self.offset)?;
        if self.wide {
            write!(f, "wide ")?;
        }
        if self.operand.is_empty() {
            write!(f, "{}", self.mnemonic)
        } else {
            write!(f, "{} {}", self.mnemonic, self.operand)
        }
    }
}

/// Decode every instruction of a method body, in address order
///
/// This is a linear sweep, so unreachable code is decoded too. Constant operands are rendered
/// through `constants`.
pub fn disassemble(code: &CodeAttribute, constants: &ConstantPool) -> Result<Vec<Line>, Error> {
    let bytes = &code.code;
    let mut lines = vec![];
    let mut offset = 0;
    while offset < bytes.len() {
        let length = instruction_length(bytes, offset)?;
        lines.push(decode(bytes, offset, constants)?);
        offset += length;
    }
    Ok(lines)
}

/// Disassembly as text, one instruction per line
pub fn listing(code: &CodeAttribute, constants: &ConstantPool) -> Result<String, Error> {
    let mut text = String::new();
    for line in disassemble(code, constants)? {
        text.push_str(&line.to_string());
        text.push('\n');
    }
    Ok(text)
}

fn decode(code: &[u8], offset: usize, constants: &ConstantPool) -> Result<Line, Error> {
    let wide = code[offset] == WIDE;
    let at = if wide { offset + 1 } else { offset };
    let opcode = code[at];
    let mnemonic = mnemonic(opcode).ok_or(Error::UnsupportedOpcode { opcode, offset })?;
    let u16_operand = || BigEndian::read_u16(&code[at + 1..at + 3]);
    let pool = |index: u16| -> Result<String, Error> {
        Ok(format!("#{} {}", index, constants.render(index)?))
    };

    let operand = match opcode {
        _ if wide && opcode == IINC => format!(
            "{} {}",
            u16_operand(),
            BigEndian::read_i16(&code[at + 3..at + 5])
        ),
        _ if wide => u16_operand().to_string(),
        BIPUSH => (code[at + 1] as i8).to_string(),
        SIPUSH => BigEndian::read_i16(&code[at + 1..at + 3]).to_string(),
        LDC => pool(code[at + 1] as u16)?,
        LDC_W | LDC2_W => pool(u16_operand())?,
        ILOAD..=ALOAD | ISTORE..=ASTORE | RET | NEWARRAY => code[at + 1].to_string(),
        IINC => format!("{} {}", code[at + 1], code[at + 2] as i8),
        GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
            pool(u16_operand())?
        }
        INVOKEINTERFACE => format!("{} {}", pool(u16_operand())?, code[at + 3]),
        INVOKEDYNAMIC => pool(u16_operand())?,
        MULTIANEWARRAY => format!("{} {}", pool(u16_operand())?, code[at + 3]),
        GOTO_W | JSR_W => {
            let delta = BigEndian::read_i32(&code[at + 1..at + 5]) as i64;
            format!("{}", offset as i64 + delta)
        }
        _ if is_branch(opcode) => {
            let delta = BigEndian::read_i16(&code[at + 1..at + 3]) as i64;
            format!("{}", offset as i64 + delta)
        }
        TABLESWITCH => {
            let arg = switch_operands(offset);
            let default = read_i32(code, arg, offset)? as i64;
            let low = read_i32(code, arg + 4, offset)?;
            let high = read_i32(code, arg + 8, offset)?;
            let mut cases = vec![];
            for (i, key) in (low..=high).enumerate() {
                let delta = read_i32(code, arg + 12 + 4 * i, offset)? as i64;
                cases.push(format!("{}: {}", key, offset as i64 + delta));
            }
            cases.push(format!("default: {}", offset as i64 + default));
            format!("{{ {} }}", cases.join(", "))
        }
        LOOKUPSWITCH => {
            let arg = switch_operands(offset);
            let default = read_i32(code, arg, offset)? as i64;
            let pairs = read_i32(code, arg + 4, offset)? as usize;
            let mut cases = vec![];
            for i in 0..pairs {
                let key = read_i32(code, arg + 8 + 8 * i, offset)?;
                let delta = read_i32(code, arg + 12 + 8 * i, offset)? as i64;
                cases.push(format!("{}: {}", key, offset as i64 + delta));
            }
            cases.push(format!("default: {}", offset as i64 + default));
            format!("{{ {} }}", cases.join(", "))
        }
        _ => String::new(),
    };

    Ok(Line {
        offset,
        wide,
        mnemonic,
        operand,
    })
}
