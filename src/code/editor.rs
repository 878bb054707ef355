use crate::class_file::{CodeAttribute, ExceptionHandler};
use crate::code::cursor::{CodeCursor, Instructions, Worklist};
use crate::code::opcodes::*;
use crate::{Error, FormatError, Settings};
use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace};
use std::iter;

/// Cursor that can also insert and remove bytes in the code of a method
///
/// Every structure that holds an offset into the code is kept consistent across edits: the
/// cursor itself, branch and switch targets, switch padding, the exception table, and the
/// worklist of an [`analyze`](Instructions::analyze) that is in progress. Edits are buffered
/// until [`CodeEditor::update`] writes them back into the attribute.
///
/// The first structural edit catalogs every reachable branch and switch. Code that is only
/// reachable through paths the cursor can't see won't have its jumps adjusted.
pub struct CodeEditor<'a> {
    attribute: &'a mut CodeAttribute,
    code: Vec<u8>,
    exception_table: Vec<ExceptionHandler>,
    offset: usize,
    worklist: Worklist,
    catalog: Option<Catalog>,
    changed_length: bool,
    settings: Settings,
}

/// Branches and switches whose operands may need rewriting after an edit
#[derive(Debug, Default)]
struct Catalog {
    jumps: Vec<Jump>,
    switches: Vec<Switch>,
}

#[derive(Debug, Copy, Clone)]
struct Jump {
    source: usize,
    delta: i64,

    /// `goto_w` and `jsr_w` have 32-bit offsets
    wide: bool,
}

#[derive(Debug, Clone)]
struct Switch {
    source: usize,

    /// Offset the current padding was computed for
    aligned_source: usize,

    /// Positions of the 4-byte jump offsets (default first)
    slots: Vec<usize>,
}

#[derive(Debug, Copy, Clone)]
enum Edit {
    Insert { at: usize, count: usize },
    Remove { at: usize, count: usize },
}

impl Edit {
    /// Where a position ends up after the edit
    ///
    /// Positions at or after an insertion point move forward. Positions inside a removed range
    /// collapse onto its start.
    fn position(self, position: usize) -> usize {
        match self {
            Edit::Insert { at, count } if at <= position => position + count,
            Edit::Insert { .. } => position,
            Edit::Remove { at, .. } if position < at => position,
            Edit::Remove { at, count } if position < at + count => at,
            Edit::Remove { count, .. } => position - count,
        }
    }

    /// Is the instruction starting at this position deleted?
    fn removes(self, position: usize) -> bool {
        match self {
            Edit::Insert { .. } => false,
            Edit::Remove { at, count } => at <= position && position < at + count,
        }
    }

    /// Where a jump from `source` by `delta` ends up after the edit
    ///
    /// Inserting right at the target of a forward jump places the new code under the jump (it
    /// becomes the new target). Inserting at the target of a backward jump moves both ends.
    fn jump(self, source: usize, delta: i64) -> (usize, i64) {
        let target = source as i64 + delta;
        match self {
            Edit::Insert { at, count } => {
                let (at_i, count_i) = (at as i64, count as i64);
                if at <= source && at_i <= target {
                    (source + count, delta)
                } else if source < at && at_i < target {
                    (source, delta + count_i)
                } else if target <= at_i && at <= source {
                    (source + count, delta - count_i)
                } else {
                    (source, delta)
                }
            }
            Edit::Remove { .. } => {
                let new_source = self.position(source);
                let new_target = if target < 0 {
                    target
                } else {
                    self.position(target as usize) as i64
                };
                (new_source, new_target - new_source as i64)
            }
        }
    }
}

/// Operand rewrite to apply once the bytes have been shifted
enum Patch {
    Short { at: usize, value: i16 },
    Int { at: usize, value: i32 },
}

impl<'a> CodeEditor<'a> {
    pub fn new(attribute: &'a mut CodeAttribute) -> CodeEditor<'a> {
        CodeEditor::with_settings(attribute, Settings::default())
    }

    pub fn with_settings(attribute: &'a mut CodeAttribute, settings: Settings) -> CodeEditor<'a> {
        CodeEditor {
            code: attribute.code.clone(),
            exception_table: attribute.exception_table.clone(),
            attribute,
            offset: 0,
            worklist: Worklist::default(),
            catalog: None,
            changed_length: false,
            settings,
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Exception table, with edits applied
    pub fn exception_table(&self) -> &[ExceptionHandler] {
        &self.exception_table
    }

    /// Exception table entries, for remapping catch types
    pub fn exception_table_mut(&mut self) -> &mut [ExceptionHandler] {
        &mut self.exception_table
    }

    fn slice_mut(&mut self, at: usize, len: usize) -> Result<&mut [u8], Error> {
        self.code
            .get_mut(at..at + len)
            .ok_or(Error::Format(FormatError::BadInstruction { offset: at }))
    }

    pub fn set_u8(&mut self, at: usize, value: u8) -> Result<(), Error> {
        self.slice_mut(at, 1)?[0] = value;
        Ok(())
    }

    pub fn set_u16(&mut self, at: usize, value: u16) -> Result<(), Error> {
        BigEndian::write_u16(self.slice_mut(at, 2)?, value);
        Ok(())
    }

    pub fn set_i32(&mut self, at: usize, value: i32) -> Result<(), Error> {
        BigEndian::write_i32(self.slice_mut(at, 4)?, value);
        Ok(())
    }

    /// Insert `count` zero bytes at `at`
    ///
    /// The instruction previously at `at` moves forward. To grow an instruction in place (eg.
    /// widening an operand), insert after its opcode byte.
    pub fn insert(&mut self, at: usize, count: usize) -> Result<(), Error> {
        if count == 0 {
            return Ok(());
        }
        if at > self.code.len() {
            return Err(Error::Format(FormatError::BadInstruction { offset: at }));
        }
        self.edit(Edit::Insert { at, count })
    }

    /// Insert raw bytes at `at`
    pub fn insert_bytes(&mut self, at: usize, bytes: &[u8]) -> Result<(), Error> {
        self.insert(at, bytes.len())?;
        self.slice_mut(at, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Remove `count` bytes starting at `at`
    ///
    /// Branches and switches that started inside the removed range are forgotten.
    pub fn remove(&mut self, at: usize, count: usize) -> Result<(), Error> {
        if count == 0 {
            return Ok(());
        }
        if at + count > self.code.len() {
            return Err(Error::Format(FormatError::BadInstruction { offset: at }));
        }
        self.edit(Edit::Remove { at, count })
    }

    fn edit(&mut self, edit: Edit) -> Result<(), Error> {
        let new_len = match edit {
            Edit::Insert { count, .. } => self.code.len() + count,
            Edit::Remove { count, .. } => self.code.len() - count,
        };
        if new_len > u16::MAX as usize {
            return Err(Error::CodeTooLarge(new_len));
        }

        let catalog = match self.catalog.take() {
            Some(catalog) => catalog,
            None => self.build_catalog()?,
        };

        // Nothing is modified until every rewritten operand is known to fit
        let (catalog, patches) = match self.plan(&catalog, edit) {
            Ok(planned) => planned,
            Err(err) => {
                self.catalog = Some(catalog);
                return Err(err);
            }
        };

        self.changed_length = true;
        self.offset = edit.position(self.offset);
        for handler in &mut self.exception_table {
            handler.start_pc = edit.position(handler.start_pc as usize) as u16;
            handler.end_pc = edit.position(handler.end_pc as usize) as u16;
            handler.handler_pc = edit.position(handler.handler_pc as usize) as u16;
        }
        self.worklist.relocate(|offset| edit.position(offset));

        match edit {
            Edit::Insert { at, count } => {
                self.code.splice(at..at, iter::repeat(0).take(count));
            }
            Edit::Remove { at, count } => {
                self.code.drain(at..at + count);
            }
        }
        self.catalog = Some(catalog);

        for patch in patches {
            match patch {
                Patch::Short { at, value } => self.set_u16(at, value as u16)?,
                Patch::Int { at, value } => self.set_i32(at, value)?,
            }
        }

        self.realign_switches()
    }

    /// Compute the catalog as it will be after the edit, along with the operands to rewrite
    fn plan(&self, catalog: &Catalog, edit: Edit) -> Result<(Catalog, Vec<Patch>), Error> {
        let mut patches = vec![];

        let mut jumps = Vec::with_capacity(catalog.jumps.len());
        for jump in &catalog.jumps {
            if edit.removes(jump.source) {
                continue;
            }
            let (source, delta) = edit.jump(jump.source, jump.delta);
            if delta != jump.delta {
                let overflow = Error::BranchOverflow { source, delta };
                patches.push(if jump.wide {
                    Patch::Int {
                        at: source + 1,
                        value: i32::try_from(delta).map_err(|_| overflow)?,
                    }
                } else {
                    Patch::Short {
                        at: source + 1,
                        value: i16::try_from(delta).map_err(|_| overflow)?,
                    }
                });
            }
            jumps.push(Jump {
                source,
                delta,
                wide: jump.wide,
            });
        }

        let mut switches = Vec::with_capacity(catalog.switches.len());
        for switch in &catalog.switches {
            if edit.removes(switch.source) {
                continue;
            }
            let source = edit.position(switch.source);
            let mut slots = Vec::with_capacity(switch.slots.len());
            for slot in &switch.slots {
                let old_delta = read_i32(&self.code, *slot, switch.source)? as i64;
                let (_, delta) = edit.jump(switch.source, old_delta);
                let slot = edit.position(*slot);
                if delta != old_delta {
                    let value = i32::try_from(delta)
                        .map_err(|_| Error::BranchOverflow { source, delta })?;
                    patches.push(Patch::Int { at: slot, value });
                }
                slots.push(slot);
            }
            switches.push(Switch {
                source,
                aligned_source: switch.aligned_source,
                slots,
            });
        }

        Ok((Catalog { jumps, switches }, patches))
    }

    /// Fix the padding of every switch that moved
    ///
    /// Padding changes are edits in their own right, so they may move (and realign) other
    /// switches further down.
    fn realign_switches(&mut self) -> Result<(), Error> {
        let mut index = 0;
        loop {
            let switch = match self.catalog.as_mut().and_then(|c| c.switches.get_mut(index)) {
                Some(switch) => switch,
                None => return Ok(()),
            };
            index += 1;
            if switch.aligned_source == switch.source {
                continue;
            }

            let source = switch.source;
            let old_padding = switch_padding(switch.aligned_source);
            let new_padding = switch_padding(source);
            switch.aligned_source = source;

            trace!(
                "switch moved to {}, padding {} -> {}",
                source,
                old_padding,
                new_padding
            );
            if new_padding < old_padding {
                self.remove(source + 1, old_padding - new_padding)?;
            } else if old_padding < new_padding {
                self.insert(source + 1, new_padding - old_padding)?;
            }
        }
    }

    fn build_catalog(&self) -> Result<Catalog, Error> {
        let mut catalog = Catalog::default();
        let mut cursor = CodeCursor::from_parts(&self.code, &self.exception_table);
        cursor.analyze(
            &mut |cursor| {
                let source = cursor.offset();
                if cursor.is_switch()? {
                    catalog.switches.push(Switch {
                        source,
                        aligned_source: source,
                        slots: cursor.switch_slots()?,
                    });
                } else if cursor.is_branch()? {
                    let target = cursor.branch_target()?;
                    catalog.jumps.push(Jump {
                        source,
                        delta: target as i64 - source as i64,
                        wide: is_wide_branch(cursor.opcode()?),
                    });
                }
                Ok(())
            },
            false,
        )?;
        debug!(
            "cataloged {} jumps and {} switches in {} bytes of code",
            catalog.jumps.len(),
            catalog.switches.len(),
            self.code.len()
        );
        Ok(catalog)
    }

    /// Write the edited code and exception table back into the attribute
    ///
    /// Once instructions have moved, nested attributes that point at instruction offsets (line
    /// numbers, local variable ranges, stack maps) are stale. They get dropped rather than
    /// rewritten.
    pub fn update(&mut self) -> Result<(), Error> {
        self.attribute.code = self.code.clone();
        self.attribute.exception_table = self.exception_table.clone();
        if self.changed_length {
            let settings = &self.settings;
            let before = self.attribute.attributes.len();
            self.attribute
                .attributes
                .retain(|attribute| !settings.is_stale_code_attribute(attribute.name()));
            let dropped = before - self.attribute.attributes.len();
            if dropped > 0 {
                debug!("dropped {} stale code attributes", dropped);
            }
        }
        Ok(())
    }
}

impl<'a> Instructions for CodeEditor<'a> {
    fn code(&self) -> &[u8] {
        &self.code
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::class_file::Attribute;

    fn short_delta(code: &[u8], source: usize) -> i16 {
        BigEndian::read_i16(&code[source + 1..source + 3])
    }

    /// 0: iconst_0, 1: ifeq -> 8, 4: nop, 5: nop, 6: nop, 7: nop, 8: return
    fn forward_branch() -> CodeAttribute {
        CodeAttribute::new(1, 1, vec![ICONST_0, IFEQ, 0, 7, NOP, NOP, NOP, NOP, RETURN])
    }

    #[test]
    fn insert_inside_forward_jump() {
        let mut attribute = forward_branch();
        let mut editor = CodeEditor::new(&mut attribute);
        editor.insert_bytes(5, &[NOP, NOP, NOP]).unwrap();
        assert_eq!(short_delta(editor.code(), 1), 10);
        editor.update().unwrap();
        assert_eq!(attribute.code.len(), 12);
        assert_eq!(attribute.code[11], RETURN);
    }

    #[test]
    fn remove_inside_forward_jump() {
        let mut attribute = forward_branch();
        let mut editor = CodeEditor::new(&mut attribute);
        editor.remove(5, 2).unwrap();
        assert_eq!(short_delta(editor.code(), 1), 5);
        editor.set_offset(1);
        assert_eq!(editor.branch_target().unwrap(), 6);
        assert_eq!(editor.code()[6], RETURN);
    }

    #[test]
    fn insert_before_jump_moves_it() {
        let mut attribute = forward_branch();
        let mut editor = CodeEditor::new(&mut attribute);
        editor.insert_bytes(0, &[NOP, NOP]).unwrap();
        assert_eq!(short_delta(editor.code(), 3), 7);
        editor.set_offset(3);
        assert_eq!(editor.branch_target().unwrap(), 10);
    }

    #[test]
    fn insert_at_forward_target_lands_on_new_code() {
        let mut attribute = CodeAttribute::new(
            1,
            1,
            vec![ICONST_0, IFEQ, 0, 4, NOP, RETURN],
        );
        let mut editor = CodeEditor::new(&mut attribute);
        editor.insert(5, 1).unwrap();
        assert_eq!(short_delta(editor.code(), 1), 4);
    }

    #[test]
    fn insert_inside_backward_jump() {
        // 0: nop, 1: nop, 2: goto -> 0
        let mut attribute = CodeAttribute::new(0, 0, vec![NOP, NOP, GOTO, 0xff, 0xfe]);
        let mut editor = CodeEditor::new(&mut attribute);
        editor.insert_bytes(1, &[NOP]).unwrap();
        assert_eq!(short_delta(editor.code(), 3), -3);
        editor.set_offset(3);
        assert_eq!(editor.branch_target().unwrap(), 0);
    }

    #[test]
    fn wide_jumps_get_32_bit_deltas() {
        // 0: goto_w -> 6, 5: nop, 6: return
        let mut attribute = CodeAttribute::new(0, 0, vec![GOTO_W, 0, 0, 0, 6, NOP, RETURN]);
        let mut editor = CodeEditor::new(&mut attribute);
        editor.insert_bytes(5, &[NOP, NOP]).unwrap();
        assert_eq!(&editor.code()[..5], &[GOTO_W, 0, 0, 0, 8]);
    }

    #[test]
    fn overflowing_delta_is_rejected() {
        let mut code = vec![GOTO, 0x7f, 0xfc];
        code.resize(0x7fff, NOP);
        code.push(RETURN);
        let mut attribute = CodeAttribute::new(0, 0, code.clone());
        let mut editor = CodeEditor::new(&mut attribute);
        assert!(matches!(
            editor.insert(10, 8),
            Err(Error::BranchOverflow { source: 0, .. })
        ));
        assert_eq!(editor.code(), &code[..]);
    }

    #[test]
    fn code_size_limit() {
        let mut code = vec![NOP; 0xfff0];
        code.push(RETURN);
        let mut attribute = CodeAttribute::new(0, 0, code);
        let mut editor = CodeEditor::new(&mut attribute);
        assert!(matches!(
            editor.insert(0, 0x100),
            Err(Error::CodeTooLarge(_))
        ));
    }

    #[test]
    fn exception_table_follows_edits() {
        let mut attribute = CodeAttribute::new(1, 1, vec![NOP, NOP, NOP, RETURN, ATHROW]);
        attribute.exception_table.push(ExceptionHandler {
            start_pc: 1,
            end_pc: 3,
            handler_pc: 4,
            catch_type: 0,
        });
        let mut editor = CodeEditor::new(&mut attribute);
        editor.insert(1, 2).unwrap();
        assert_eq!(
            editor.exception_table()[0],
            ExceptionHandler {
                start_pc: 3,
                end_pc: 5,
                handler_pc: 6,
                catch_type: 0,
            }
        );
        editor.remove(0, 4).unwrap();
        assert_eq!(
            editor.exception_table()[0],
            ExceptionHandler {
                start_pc: 0,
                end_pc: 1,
                handler_pc: 2,
                catch_type: 0,
            }
        );
        editor.update().unwrap();
        assert_eq!(attribute.exception_table[0].handler_pc, 2);
        assert_eq!(attribute.code, vec![NOP, RETURN, ATHROW]);
    }

    #[test]
    fn cursor_follows_edits() {
        let mut code = vec![NOP; 9];
        code.push(RETURN);
        let mut attribute = CodeAttribute::new(0, 0, code);
        let mut editor = CodeEditor::new(&mut attribute);
        editor.set_offset(5);
        editor.insert(5, 2).unwrap();
        assert_eq!(editor.offset(), 7);
        editor.insert(8, 2).unwrap();
        assert_eq!(editor.offset(), 7);
        editor.remove(0, 2).unwrap();
        assert_eq!(editor.offset(), 5);
        editor.remove(4, 3).unwrap();
        assert_eq!(editor.offset(), 4);
    }

    #[test]
    fn switch_padding_is_realigned() {
        // 0: iconst_0, 1: tableswitch (2 bytes of padding), low = high = 0, 20: return
        let mut code = vec![ICONST_0, TABLESWITCH, 0, 0];
        code.extend_from_slice(&[0, 0, 0, 19]); // default -> 20
        code.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]); // low, high
        code.extend_from_slice(&[0, 0, 0, 19]); // 0 -> 20
        code.push(RETURN);
        let mut attribute = CodeAttribute::new(1, 1, code);

        for inserted in 1..=4 {
            let mut attribute = attribute.clone();
            let mut editor = CodeEditor::new(&mut attribute);
            editor.insert(0, inserted).unwrap();

            let source = 1 + inserted;
            assert_eq!(editor.code()[source], TABLESWITCH);
            let padding = (4 - (source + 1) % 4) % 4;
            assert!(editor.code()[source + 1..source + 1 + padding]
                .iter()
                .all(|byte| *byte == 0));

            editor.set_offset(source);
            let targets = editor.switch_targets().unwrap();
            assert_eq!(targets.len(), 2);
            for target in targets {
                assert_eq!(editor.code()[target], RETURN);
            }
            assert_eq!(editor.next_offset().unwrap(), Some(editor.len() - 1));
        }

        let mut editor = CodeEditor::new(&mut attribute);
        editor.remove(0, 1).unwrap();
        editor.set_offset(0);
        assert_eq!(editor.opcode().unwrap(), TABLESWITCH);
        assert_eq!(&editor.code()[1..4], &[0, 0, 0]);
        assert_eq!(editor.switch_targets().unwrap(), vec![20, 20]);
        assert_eq!(editor.code()[20], RETURN);
    }

    #[test]
    fn update_drops_stale_attributes() {
        let mut attribute = forward_branch();
        attribute.attributes.push(Attribute::Opaque {
            name: "LineNumberTable".to_owned(),
            bytes: vec![0, 0],
        });
        attribute.attributes.push(Attribute::Opaque {
            name: "RuntimeVisibleTypeAnnotations".to_owned(),
            bytes: vec![0, 0],
        });

        let mut untouched = attribute.clone();
        let mut editor = CodeEditor::new(&mut untouched);
        editor.set_u8(4, NOP).unwrap();
        editor.update().unwrap();
        assert_eq!(untouched.attributes.len(), 2);

        let mut editor = CodeEditor::new(&mut attribute);
        editor.insert(4, 1).unwrap();
        editor.update().unwrap();
        assert_eq!(attribute.attributes.len(), 1);
        assert_eq!(attribute.attributes[0].name(), "RuntimeVisibleTypeAnnotations");
    }

    #[test]
    fn editing_while_analyzing() {
        // 0: iconst_0, 1: ifeq -> 5, 4: return, 5: return
        let mut attribute = CodeAttribute::new(1, 1, vec![ICONST_0, IFEQ, 0, 4, RETURN, RETURN]);
        let mut editor = CodeEditor::new(&mut attribute);
        let mut visited = vec![];
        editor
            .analyze(
                &mut |editor| {
                    if editor.opcode()? == RETURN {
                        let offset = editor.offset();
                        editor.insert_bytes(offset, &[NOP])?;
                    }
                    visited.push(editor.offset());
                    Ok(())
                },
                false,
            )
            .unwrap();
        editor.update().unwrap();

        assert_eq!(attribute.code, vec![ICONST_0, IFEQ, 0, 5, NOP, RETURN, NOP, RETURN]);
        visited.sort_unstable();
        assert_eq!(visited, vec![0, 1, 5, 7]);
    }
}
