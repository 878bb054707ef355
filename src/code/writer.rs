use crate::class_file::{CodeAttribute, ConstantPool};
use crate::code::opcodes::*;
use crate::{Error, FormatError};
use byteorder::{BigEndian, ByteOrder};

/// Kind of value held in a local variable or returned from a method
///
/// The order of variants matches the order of the typed load, store and return opcodes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl ValueKind {
    fn ordinal(self) -> u8 {
        self as u8
    }
}

/// Jump target inside a [`CodeWriter`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label(usize);

struct Fixup {
    /// Offset of the jump instruction
    source: usize,
    label: Label,
    wide: bool,
}

/// Emitter for straight-line generated method bodies
///
/// Constants are added to the borrowed pool as instructions need them. Jumps are emitted with a
/// placeholder delta that is patched once every label has been placed, in [`CodeWriter::finish`].
pub struct CodeWriter<'p> {
    constants: &'p mut ConstantPool,
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl<'p> CodeWriter<'p> {
    pub fn new(constants: &'p mut ConstantPool) -> CodeWriter<'p> {
        CodeWriter {
            constants,
            code: vec![],
            labels: vec![],
            fixups: vec![],
        }
    }

    /// Offset where the next instruction will go
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn constants(&mut self) -> &mut ConstantPool {
        self.constants
    }

    /// Append raw bytes, for instructions without a dedicated helper
    pub fn emit(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    fn emit_u16(&mut self, opcode: u8, operand: u16) {
        self.code.push(opcode);
        self.code.extend_from_slice(&operand.to_be_bytes());
    }

    fn local(&mut self, opcode: u8, short_base: u8, kind: ValueKind, index: u16) {
        let ordinal = kind.ordinal();
        if index <= 3 {
            self.code.push(short_base + ordinal * 4 + index as u8);
        } else if let Ok(index) = u8::try_from(index) {
            self.code.extend_from_slice(&[opcode + ordinal, index]);
        } else {
            self.code.push(WIDE);
            self.emit_u16(opcode + ordinal, index);
        }
    }

    /// Load a local, using the one-byte `xload_n` forms and `wide` where they apply
    pub fn load(&mut self, kind: ValueKind, index: u16) -> &mut Self {
        self.local(ILOAD, ILOAD_0, kind, index);
        self
    }

    pub fn store(&mut self, kind: ValueKind, index: u16) -> &mut Self {
        self.local(ISTORE, ISTORE_0, kind, index);
        self
    }

    /// Field access: `opcode` is one of `getstatic`, `putstatic`, `getfield`, `putfield`
    pub fn field(
        &mut self,
        opcode: u8,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<&mut Self, Error> {
        let index = self.constants.add_field_ref(class, name, descriptor)?;
        self.emit_u16(opcode, index);
        Ok(self)
    }

    /// Method call: `opcode` is one of the four `invoke*` forms that take a member reference
    pub fn invoke(
        &mut self,
        opcode: u8,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<&mut Self, Error> {
        if opcode == INVOKEINTERFACE {
            let index = self
                .constants
                .add_interface_method_ref(class, name, descriptor)?;
            self.emit_u16(opcode, index);
            self.code.push(1 + argument_slots(descriptor));
            self.code.push(0);
        } else {
            let index = self.constants.add_method_ref(class, name, descriptor)?;
            self.emit_u16(opcode, index);
        }
        Ok(self)
    }

    fn class_operand(&mut self, opcode: u8, class: &str) -> Result<&mut Self, Error> {
        let index = self.constants.add_class(class)?;
        self.emit_u16(opcode, index);
        Ok(self)
    }

    pub fn new_object(&mut self, class: &str) -> Result<&mut Self, Error> {
        self.class_operand(NEW, class)
    }

    pub fn checkcast(&mut self, class: &str) -> Result<&mut Self, Error> {
        self.class_operand(CHECKCAST, class)
    }

    pub fn instance_of(&mut self, class: &str) -> Result<&mut Self, Error> {
        self.class_operand(INSTANCEOF, class)
    }

    /// Load a single-slot constant, picking `ldc` or `ldc_w` from the index
    pub fn ldc(&mut self, index: u16) -> &mut Self {
        match u8::try_from(index) {
            Ok(short) => self.code.extend_from_slice(&[LDC, short]),
            Err(_) => self.emit_u16(LDC_W, index),
        }
        self
    }

    pub fn ldc_string(&mut self, value: &str) -> Result<&mut Self, Error> {
        let index = self.constants.add_string(value)?;
        Ok(self.ldc(index))
    }

    pub fn ldc_integer(&mut self, value: i32) -> Result<&mut Self, Error> {
        let index = self.constants.add_integer(value)?;
        Ok(self.ldc(index))
    }

    pub fn ldc_class(&mut self, class: &str) -> Result<&mut Self, Error> {
        let index = self.constants.add_class(class)?;
        Ok(self.ldc(index))
    }

    pub fn ldc2_long(&mut self, value: i64) -> Result<&mut Self, Error> {
        let index = self.constants.add_long(value)?;
        self.emit_u16(LDC2_W, index);
        Ok(self)
    }

    pub fn ldc2_double(&mut self, value: f64) -> Result<&mut Self, Error> {
        let index = self.constants.add_double(value)?;
        self.emit_u16(LDC2_W, index);
        Ok(self)
    }

    /// Typed return, or plain `return` for `None`
    pub fn return_value(&mut self, kind: Option<ValueKind>) -> &mut Self {
        match kind {
            Some(kind) => self.code.push(IRETURN + kind.ordinal()),
            None => self.code.push(RETURN),
        }
        self
    }

    pub fn fresh_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind a label to the current offset
    pub fn place_label(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.code.len());
        self
    }

    /// Emit a branch to `label` (which may be placed later)
    pub fn jump(&mut self, opcode: u8, label: Label) -> &mut Self {
        let wide = is_wide_branch(opcode);
        self.fixups.push(Fixup {
            source: self.code.len(),
            label,
            wide,
        });
        self.code.push(opcode);
        let placeholder: &[u8] = if wide { &[0; 4] } else { &[0; 2] };
        self.code.extend_from_slice(placeholder);
        self
    }

    /// Patch every jump and wrap the bytes up into a `Code` attribute
    pub fn finish(mut self, max_stack: u16, max_locals: u16) -> Result<CodeAttribute, Error> {
        if self.code.len() > u16::MAX as usize {
            return Err(Error::CodeTooLarge(self.code.len()));
        }
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0].ok_or(Error::Format(
                FormatError::BadInstruction {
                    offset: fixup.source,
                },
            ))?;
            let delta = target as i64 - fixup.source as i64;
            let at = fixup.source + 1;
            if fixup.wide {
                BigEndian::write_i32(&mut self.code[at..at + 4], delta as i32);
            } else {
                let delta = i16::try_from(delta).map_err(|_| Error::BranchOverflow {
                    source: fixup.source,
                    delta,
                })?;
                BigEndian::write_i16(&mut self.code[at..at + 2], delta);
            }
        }
        Ok(CodeAttribute::new(max_stack, max_locals, self.code))
    }
}

/// Number of local slots taken by the arguments of a method descriptor
fn argument_slots(descriptor: &str) -> u8 {
    let mut chars = descriptor.chars().skip_while(|c| *c == '(');
    let mut slots: u8 = 0;
    while let Some(c) = chars.next() {
        match c {
            ')' => break,
            'J' | 'D' => slots = slots.saturating_add(2),
            'L' => {
                chars.by_ref().find(|c| *c == ';');
                slots = slots.saturating_add(1);
            }
            '[' => {
                let mut element = chars.next();
                while element == Some('[') {
                    element = chars.next();
                }
                if element == Some('L') {
                    chars.by_ref().find(|c| *c == ';');
                }
                slots = slots.saturating_add(1);
            }
            _ => slots = slots.saturating_add(1),
        }
    }
    slots
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::code::CodeCursor;

    #[test]
    fn argument_slots_count_wide_types_twice() {
        assert_eq!(argument_slots("()V"), 0);
        assert_eq!(argument_slots("(IJ)V"), 3);
        assert_eq!(argument_slots("(Ljava/lang/String;D[J[[Ljava/lang/Object;)I"), 5);
    }

    #[test]
    fn locals_pick_the_shortest_form() {
        let mut pool = ConstantPool::new();
        let mut writer = CodeWriter::new(&mut pool);
        writer
            .load(ValueKind::Reference, 0)
            .load(ValueKind::Int, 3)
            .load(ValueKind::Long, 4)
            .store(ValueKind::Double, 300)
            .return_value(None);
        let code = writer.finish(4, 302).unwrap().code;
        assert_eq!(
            code,
            vec![0x2a, 0x1d, LLOAD, 4, WIDE, DSTORE, 0x01, 0x2c, RETURN]
        );
    }

    #[test]
    fn ldc_widens_past_byte_indices() {
        let mut pool = ConstantPool::new();
        for i in 0..300 {
            pool.add_integer(i).unwrap();
        }
        let mut writer = CodeWriter::new(&mut pool);
        writer.ldc_integer(5).unwrap();
        writer.ldc_string("far").unwrap();
        let code = writer.finish(2, 0).unwrap().code;
        assert_eq!(&code[..2], &[LDC, 6]);
        assert_eq!(code[2], LDC_W);
        assert!(BigEndian::read_u16(&code[3..5]) > 255);
    }

    #[test]
    fn invokeinterface_carries_argument_count() {
        let mut pool = ConstantPool::new();
        let mut writer = CodeWriter::new(&mut pool);
        writer
            .invoke(
                INVOKEINTERFACE,
                "java/util/Map",
                "put",
                "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
            )
            .unwrap();
        let code = writer.finish(3, 3).unwrap().code;
        assert_eq!(code.len(), 5);
        assert_eq!(&code[3..], &[3, 0]);
    }

    #[test]
    fn jumps_are_patched_forwards_and_backwards() {
        let mut pool = ConstantPool::new();
        let mut writer = CodeWriter::new(&mut pool);
        let top = writer.fresh_label();
        let end = writer.fresh_label();
        writer
            .place_label(top)
            .load(ValueKind::Int, 0)
            .jump(IFEQ, end)
            .jump(GOTO, top)
            .place_label(end)
            .return_value(None);
        let attribute = writer.finish(1, 1).unwrap();

        let mut cursor = CodeCursor::new(&attribute);
        assert_eq!(cursor.reachable().unwrap(), vec![0, 1, 4, 7]);
        assert_eq!(BigEndian::read_i16(&attribute.code[2..4]), 6);
        assert_eq!(BigEndian::read_i16(&attribute.code[5..7]), -4);
    }

    #[test]
    fn unplaced_labels_are_rejected() {
        let mut pool = ConstantPool::new();
        let mut writer = CodeWriter::new(&mut pool);
        let nowhere = writer.fresh_label();
        writer.jump(GOTO, nowhere);
        assert!(matches!(
            writer.finish(0, 0),
            Err(Error::Format(FormatError::BadInstruction { offset: 0 }))
        ));
    }
}
