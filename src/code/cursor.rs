use crate::class_file::{CodeAttribute, ExceptionHandler};
use crate::code::opcodes::*;
use crate::{Error, FormatError};
use byteorder::{BigEndian, ByteOrder};
use std::collections::BTreeSet;

/// Offsets still to be explored, and those already explored, by [`Instructions::analyze`]
///
/// Both sets are positions into the code array, so an editor has to shift them along with
/// everything else whenever it inserts or removes bytes.
#[derive(Debug, Default, Clone)]
pub struct Worklist {
    pending: Vec<usize>,
    completed: BTreeSet<usize>,
}

impl Worklist {
    fn seeded(seeds: impl IntoIterator<Item = usize>) -> Worklist {
        let mut worklist = Worklist::default();
        for seed in seeds {
            worklist.enqueue(seed);
        }
        worklist
    }

    /// Add an offset unless it is already pending
    pub fn enqueue(&mut self, offset: usize) {
        if !self.pending.contains(&offset) {
            self.pending.push(offset);
        }
    }

    fn pop(&mut self) -> Option<usize> {
        self.pending.pop()
    }

    /// Mark an offset as explored, returning `false` if it already was
    fn complete(&mut self, offset: usize) -> bool {
        self.completed.insert(offset)
    }

    pub fn pending(&self) -> &[usize] {
        &self.pending
    }

    pub fn is_completed(&self, offset: usize) -> bool {
        self.completed.contains(&offset)
    }

    /// Move every tracked offset through `relocate`
    pub fn relocate(&mut self, relocate: impl Fn(usize) -> usize) {
        for pending in &mut self.pending {
            *pending = relocate(*pending);
        }
        self.completed = self.completed.iter().map(|offset| relocate(*offset)).collect();
    }
}

/// Decoding walk over the instructions of one method
///
/// Implementors only provide access to the code and to the cursor state: decoding the
/// instruction under the cursor, moving to its successor, and the reachability analysis are all
/// shared between the read-only [`CodeCursor`] and the mutating
/// [`CodeEditor`](crate::code::CodeEditor).
pub trait Instructions {
    fn code(&self) -> &[u8];

    /// Byte offset of the current instruction
    fn offset(&self) -> usize;

    fn set_offset(&mut self, offset: usize);

    /// Entry points of the exception handlers
    fn handler_offsets(&self) -> Vec<usize>;

    fn worklist(&mut self) -> &mut Worklist;

    fn bad_instruction(&self) -> Error {
        Error::Format(FormatError::BadInstruction {
            offset: self.offset(),
        })
    }

    fn byte_at(&self, at: usize) -> Result<u8, Error> {
        self.code()
            .get(at)
            .copied()
            .ok_or_else(|| self.bad_instruction())
    }

    fn u16_at(&self, at: usize) -> Result<u16, Error> {
        self.code()
            .get(at..at + 2)
            .map(BigEndian::read_u16)
            .ok_or_else(|| self.bad_instruction())
    }

    fn i16_at(&self, at: usize) -> Result<i16, Error> {
        Ok(self.u16_at(at)? as i16)
    }

    fn i32_at(&self, at: usize) -> Result<i32, Error> {
        read_i32(self.code(), at, self.offset())
    }

    /// Opcode under the cursor, looking through any `wide` prefix
    fn opcode(&self) -> Result<u8, Error> {
        let opcode = self.byte_at(self.offset())?;
        if opcode == WIDE {
            self.byte_at(self.offset() + 1)
        } else {
            Ok(opcode)
        }
    }

    /// Offset of the instruction that follows the current one in straight-line execution
    ///
    /// This is `None` after unconditional control transfers. It is also `None` after a
    /// `lookupswitch` (but not a `tableswitch`): the targets of a switch are explored from the
    /// switch itself, so no reachable code is lost.
    fn next_offset(&self) -> Result<Option<usize>, Error> {
        let offset = self.offset();
        let opcode = self.byte_at(offset)?;
        if ends_block(opcode) || opcode == LOOKUPSWITCH {
            return Ok(None);
        }
        Ok(Some(offset + instruction_length(self.code(), offset)?))
    }

    /// Move to the next instruction, returning `false` if there is none
    fn advance(&mut self) -> Result<bool, Error> {
        match self.next_offset()? {
            Some(next) => {
                self.set_offset(next);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn is_branch(&self) -> Result<bool, Error> {
        Ok(is_branch(self.opcode()?))
    }

    /// Absolute target of the branch under the cursor
    fn branch_target(&self) -> Result<usize, Error> {
        let offset = self.offset();
        let opcode = self.opcode()?;
        let delta = if is_wide_branch(opcode) {
            self.i32_at(offset + 1)? as i64
        } else if is_branch(opcode) {
            self.i16_at(offset + 1)? as i64
        } else {
            return Err(Error::UnsupportedOpcode { opcode, offset });
        };
        self.relative(delta)
    }

    fn is_switch(&self) -> Result<bool, Error> {
        Ok(is_switch(self.opcode()?))
    }

    /// Absolute targets of the switch under the cursor, default target first
    fn switch_targets(&self) -> Result<Vec<usize>, Error> {
        self.switch_slots()?
            .into_iter()
            .map(|slot| self.relative(self.i32_at(slot)? as i64))
            .collect()
    }

    /// Positions of the 4-byte jump offsets in the switch under the cursor, default first
    fn switch_slots(&self) -> Result<Vec<usize>, Error> {
        let offset = self.offset();
        let opcode = self.opcode()?;
        if !is_switch(opcode) {
            return Err(Error::UnsupportedOpcode { opcode, offset });
        }
        // The table must fit in the code before its entry count is trusted
        let end = offset + instruction_length(self.code(), offset)?;
        let arg = switch_operands(offset);
        let stride = if opcode == TABLESWITCH { 4 } else { 8 };
        let mut slots = vec![arg];
        slots.extend((arg + 12..end).step_by(stride));
        Ok(slots)
    }

    /// Offset relative to the current instruction, checked to be inside the code
    fn relative(&self, delta: i64) -> Result<usize, Error> {
        let target = self.offset() as i64 + delta;
        if target < 0 || target as usize >= self.code().len() {
            return Err(self.bad_instruction());
        }
        Ok(target as usize)
    }

    /// Visit every reachable instruction
    ///
    /// Exploration starts from offset 0 and from every exception handler. Before the visitor
    /// sees an instruction, its branch or switch targets have been queued for exploration.
    ///
    /// With `allow_revisit`, only the start of each explored block is remembered, so code that
    /// falls through into an already explored block gets visited again. Without it, every
    /// instruction is visited at most once, which is what a visitor that patches the code in
    /// place needs.
    fn analyze<F>(&mut self, visitor: &mut F, allow_revisit: bool) -> Result<(), Error>
    where
        Self: Sized,
        F: FnMut(&mut Self) -> Result<(), Error>,
    {
        let mut seeds = vec![0];
        seeds.extend(self.handler_offsets());
        *self.worklist() = Worklist::seeded(seeds);
        self.set_offset(0);
        if self.code().is_empty() {
            return Ok(());
        }

        while let Some(start) = self.worklist().pop() {
            if allow_revisit && !self.worklist().complete(start) {
                continue;
            }

            self.set_offset(start);
            loop {
                let offset = self.offset();
                if offset >= self.code().len() {
                    return Err(self.bad_instruction());
                }
                if !allow_revisit && !self.worklist().complete(offset) {
                    break;
                }

                if self.is_branch()? {
                    let target = self.branch_target()?;
                    self.worklist().enqueue(target);
                } else if self.is_switch()? {
                    for target in self.switch_targets()? {
                        self.worklist().enqueue(target);
                    }
                }

                visitor(self)?;

                if !self.advance()? {
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Read-only cursor over a method's code
pub struct CodeCursor<'a> {
    code: &'a [u8],
    exception_table: &'a [ExceptionHandler],
    offset: usize,
    worklist: Worklist,
}

impl<'a> CodeCursor<'a> {
    pub fn new(attribute: &'a CodeAttribute) -> CodeCursor<'a> {
        CodeCursor::from_parts(&attribute.code, &attribute.exception_table)
    }

    pub fn from_parts(code: &'a [u8], exception_table: &'a [ExceptionHandler]) -> CodeCursor<'a> {
        CodeCursor {
            code,
            exception_table,
            offset: 0,
            worklist: Worklist::default(),
        }
    }

    /// Offsets of every reachable instruction, in visiting order
    pub fn reachable(&mut self) -> Result<Vec<usize>, Error> {
        let mut offsets = vec![];
        self.analyze(
            &mut |cursor| {
                offsets.push(cursor.offset());
                Ok(())
            },
            false,
        )?;
        Ok(offsets)
    }
}

impl<'a> Instructions for CodeCursor<'a> {
    fn code(&self) -> &[u8] {
        self.code
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn handler_offsets(&self) -> Vec<usize> {
        self.exception_table
            .iter()
            .map(|handler| handler.handler_pc as usize)
            .collect()
    }

    fn worklist(&mut self) -> &mut Worklist {
        &mut self.worklist
    }
}
