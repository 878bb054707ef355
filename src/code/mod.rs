//! Walking, editing, emitting and listing method bodies

mod cursor;
mod disassemble;
mod editor;
mod export;
pub mod opcodes;
mod writer;

pub use cursor::*;
pub use disassemble::*;
pub use editor::*;
pub use export::*;
pub use writer::*;
