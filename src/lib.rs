//! Read, write, and patch JVM class files
//!
//! Classes are parsed into an in-memory model ([`ClassFile`]) whose constant pool can be grown
//! and re-serialized. Method bodies can be walked with a [`CodeCursor`] or rewritten with a
//! [`CodeEditor`], which keeps every branch offset, switch table, and exception range consistent
//! while bytes are inserted or removed. Methods can be moved between classes with
//! [`ClassFile::export_method`], which re-homes every constant reference.

pub mod access_flags;
pub mod class_file;
pub mod code;
mod errors;
pub mod resolver;
pub mod scanner;
mod settings;

pub use access_flags::*;
pub use class_file::{Attribute, ClassFile, CodeAttribute, ConstantPool, ExceptionHandler};
pub use code::{CodeCursor, CodeEditor, CodeWriter, Instructions};
pub use errors::*;
pub use settings::Settings;
