use crate::class_file::{CodeAttribute, ConstantPool};
use crate::code::cursor::Instructions;
use crate::code::editor::CodeEditor;
use crate::code::opcodes::*;
use crate::{Error, Settings};
use log::debug;

/// Re-point every constant pool reference in a method body at the `target` pool
///
/// Each referenced constant is re-resolved in `source` and added (or found) in `target`. An
/// `ldc` whose new index no longer fits in a byte is widened to `ldc_w`, which shifts the rest of
/// the code. Catch types in the exception table are remapped too. Nested attributes are left
/// alone.
pub fn export_code(
    attribute: &mut CodeAttribute,
    source: &ConstantPool,
    target: &mut ConstantPool,
    settings: &Settings,
) -> Result<(), Error> {
    let mut editor = CodeEditor::with_settings(attribute, settings.clone());
    editor.analyze(
        &mut |editor| export_instruction(editor, source, target),
        false,
    )?;

    for handler in editor.exception_table_mut() {
        if handler.catch_type != 0 {
            handler.catch_type = target.add_class(source.get_class(handler.catch_type)?)?;
        }
    }
    editor.update()
}

fn export_instruction(
    editor: &mut CodeEditor,
    source: &ConstantPool,
    target: &mut ConstantPool,
) -> Result<(), Error> {
    let offset = editor.offset();
    let opcode = editor.opcode()?;
    let index = match opcode {
        GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD => {
            let index = editor.u16_at(offset + 1)?;
            target.add_member_ref(&source.get_field_ref(index)?)?
        }
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC => {
            let index = editor.u16_at(offset + 1)?;
            target.add_member_ref(&source.get_method_ref(index)?)?
        }
        INVOKEINTERFACE => {
            let index = editor.u16_at(offset + 1)?;
            target.add_member_ref(&source.get_interface_method_ref(index)?)?
        }
        NEW | ANEWARRAY | CHECKCAST | INSTANCEOF | MULTIANEWARRAY => {
            let index = editor.u16_at(offset + 1)?;
            target.add_class(source.get_class(index)?)?
        }
        LDC_W | LDC2_W => {
            let index = editor.u16_at(offset + 1)?;
            source.export_constant(index, target)?
        }
        LDC => {
            let index = editor.byte_at(offset + 1)? as u16;
            let exported = source.export_constant(index, target)?;
            if let Ok(short) = u8::try_from(exported) {
                editor.set_u8(offset + 1, short)?;
            } else {
                debug!("widening ldc at {} for constant #{}", offset, exported);
                editor.insert(offset + 1, 1)?;
                editor.set_u8(offset, LDC_W)?;
                editor.set_u16(offset + 1, exported)?;
            }
            return Ok(());
        }
        INVOKEDYNAMIC => return Err(Error::UnsupportedOpcode { opcode, offset }),
        _ => return Ok(()),
    };
    editor.set_u16(offset + 1, index)
}

#[cfg(test)]
mod test {
    use super::*;
    use byteorder::{BigEndian, ByteOrder};

    #[test]
    fn field_and_method_operands_are_remapped() {
        let mut source = ConstantPool::new();
        let field = source.add_field_ref("A", "x", "I").unwrap();
        let method = source.add_method_ref("A", "y", "()V").unwrap();
        let mut code = vec![GETSTATIC, 0, 0, INVOKESTATIC, 0, 0, RETURN];
        BigEndian::write_u16(&mut code[1..3], field);
        BigEndian::write_u16(&mut code[4..6], method);
        let mut attribute = CodeAttribute::new(1, 0, code);

        let mut target = ConstantPool::new();
        target.add_utf8("unrelated").unwrap();
        export_code(&mut attribute, &source, &mut target, &Settings::default()).unwrap();

        let field = BigEndian::read_u16(&attribute.code[1..3]);
        let method = BigEndian::read_u16(&attribute.code[4..6]);
        let field = target.get_field_ref(field).unwrap();
        assert_eq!((field.class, field.name, field.descriptor), ("A", "x", "I"));
        let method = target.get_method_ref(method).unwrap();
        assert_eq!((method.class, method.name, method.descriptor), ("A", "y", "()V"));
    }

    #[test]
    fn catch_types_are_remapped() {
        let mut source = ConstantPool::new();
        let catch_type = source.add_class("java/lang/Error").unwrap();
        let mut attribute = CodeAttribute::new(1, 1, vec![RETURN, ATHROW]);
        attribute.exception_table.push(crate::class_file::ExceptionHandler {
            start_pc: 0,
            end_pc: 1,
            handler_pc: 1,
            catch_type,
        });

        let mut target = ConstantPool::new();
        target.add_integer(1).unwrap();
        target.add_integer(2).unwrap();
        export_code(&mut attribute, &source, &mut target, &Settings::default()).unwrap();
        let catch_type = attribute.exception_table[0].catch_type;
        assert_eq!(target.get_class(catch_type).unwrap(), "java/lang/Error");
    }

    #[test]
    fn invokedynamic_is_refused() {
        let mut source = ConstantPool::new();
        source.add_name_and_type("run", "()Ljava/lang/Runnable;").unwrap();
        let mut attribute = CodeAttribute::new(1, 0, vec![INVOKEDYNAMIC, 0, 1, 0, 0, RETURN]);
        let mut target = ConstantPool::new();
        assert!(matches!(
            export_code(&mut attribute, &source, &mut target, &Settings::default()),
            Err(Error::UnsupportedOpcode {
                opcode: INVOKEDYNAMIC,
                offset: 0
            })
        ));
    }
}
