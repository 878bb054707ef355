//! Quick pass over a class file that doesn't build the full model
//!
//! Scanning reads just enough of the constant pool to name the class, its superclass and its
//! interfaces, and to find every object type descriptor (`Lpkg/Name;`) the class mentions. This is
//! what a classpath indexer needs to decide whether a class is interesting, without paying for
//! member or attribute parsing. Names are reported in dotted form (`java.lang.Object`).

use crate::access_flags::ClassAccessFlags;
use crate::class_file::{decode_modified_utf8, read_bytes, ClassFile, Deserialize};
use crate::{Error, FormatError};
use byteorder::ReadBytesExt;
use log::debug;
use std::io::{self, Read};

/// UTF-8 constants longer than this are skipped rather than decoded
pub const MAX_SCANNED_UTF8: usize = 256;

/// Receiver for the findings of [`scan`]
pub trait ClassMatcher {
    /// Called first, with the name of the class being scanned
    ///
    /// Returning `false` stops the scan: nothing else is reported about this class.
    fn scan_class(&mut self, name: &str, access_flags: ClassAccessFlags) -> bool;

    fn add_super_class(&mut self, _name: &str) {}

    fn add_interface(&mut self, _name: &str) {}

    /// Class name inside an object type descriptor somewhere in the constant pool
    fn add_pool_string(&mut self, _name: &str) {}

    /// Called once the whole class has been scanned
    fn finish_scan(&mut self) {}
}

/// Constant pool, reduced to what scanning needs
struct ScanPool {
    /// Decoded (dotted) UTF-8 constants, by pool index
    utf8s: Vec<Option<String>>,

    /// For class constants, the index of the name
    classes: Vec<u16>,
}

impl ScanPool {
    fn read<R: ReadBytesExt>(reader: &mut R) -> Result<ScanPool, Error> {
        let count = u16::deserialize(reader)? as usize;
        let mut pool = ScanPool {
            utf8s: vec![None; count],
            classes: vec![0; count],
        };

        let mut index = 1;
        while index < count {
            let tag = u8::deserialize(reader)?;
            match tag {
                1 => {
                    let len = u16::deserialize(reader)? as usize;
                    if len > MAX_SCANNED_UTF8 {
                        skip(reader, len as u64)?;
                    } else {
                        let bytes = read_bytes(reader, len)?;
                        let string = decode_modified_utf8(&bytes).ok_or(FormatError::BadUtf8 {
                            index: index as u16,
                        })?;
                        pool.utf8s[index] = Some(string.replace('/', "."));
                    }
                }
                7 => pool.classes[index] = u16::deserialize(reader)?,
                8 | 16 => skip(reader, 2)?,
                15 => skip(reader, 3)?,
                3 | 4 | 9 | 10 | 11 | 12 | 18 => skip(reader, 4)?,
                5 | 6 => skip(reader, 8)?,
                _ => {
                    return Err(FormatError::UnknownConstantTag {
                        tag,
                        index: index as u16,
                    }
                    .into())
                }
            }
            index += if tag == 5 || tag == 6 { 2 } else { 1 };
        }
        Ok(pool)
    }

    fn class_name(&self, index: u16) -> Option<&str> {
        let name = *self.classes.get(index as usize)?;
        self.utf8s.get(name as usize)?.as_deref()
    }
}

/// Scan one class, reporting to `matcher`
///
/// Returns `false` if the matcher declined the class in [`ClassMatcher::scan_class`]. Names that
/// are too long to be decoded are silently left out.
pub fn scan<R: ReadBytesExt>(reader: &mut R, matcher: &mut dyn ClassMatcher) -> Result<bool, Error> {
    let magic = u32::deserialize(reader)?;
    if magic != ClassFile::MAGIC {
        return Err(FormatError::BadMagic(magic).into());
    }
    skip(reader, 4)?;

    let pool = ScanPool::read(reader)?;
    let access_flags = ClassAccessFlags::deserialize(reader)?;
    if let Some(name) = pool.class_name(u16::deserialize(reader)?) {
        if !matcher.scan_class(name, access_flags) {
            debug!("scan of {} stopped by matcher", name);
            return Ok(false);
        }
    }

    let super_class = u16::deserialize(reader)?;
    if let Some(name) = pool.class_name(super_class) {
        matcher.add_super_class(name);
    }
    for _ in 0..u16::deserialize(reader)? {
        if let Some(name) = pool.class_name(u16::deserialize(reader)?) {
            matcher.add_interface(name);
        }
    }

    // Fields and methods
    for _ in 0..2 {
        for _ in 0..u16::deserialize(reader)? {
            skip(reader, 6)?;
            skip_attributes(reader)?;
        }
    }
    skip_attributes(reader)?;

    for utf8 in pool.utf8s.iter().flatten() {
        if utf8.len() >= 2 && utf8.starts_with('L') && utf8.ends_with(';') {
            matcher.add_pool_string(&utf8[1..utf8.len() - 1]);
        }
    }
    matcher.finish_scan();
    Ok(true)
}

fn skip_attributes<R: ReadBytesExt>(reader: &mut R) -> Result<(), Error> {
    for _ in 0..u16::deserialize(reader)? {
        skip(reader, 2)?;
        let len = u32::deserialize(reader)?;
        skip(reader, len as u64)?;
    }
    Ok(())
}

fn skip<R: ReadBytesExt>(reader: &mut R, len: u64) -> Result<(), Error> {
    let skipped = io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
    if skipped != len {
        return Err(Error::Format(FormatError::Truncated));
    }
    Ok(())
}
