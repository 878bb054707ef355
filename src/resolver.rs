//! Looking classes up by name, and walking their supertypes

use crate::class_file::{ClassFile, Method};
use crate::Error;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

pub const OBJECT_NAME: &str = "java/lang/Object";
pub const CLONEABLE_NAME: &str = "java/lang/Cloneable";
pub const SERIALIZABLE_NAME: &str = "java/io/Serializable";

/// Source of class models, keyed by internal (slash-separated) name
pub trait ClassResolver {
    fn resolve(&self, name: &str) -> Option<&ClassFile>;
}

/// Classes held in memory
#[derive(Default)]
pub struct ClassPath {
    classes: HashMap<String, ClassFile>,
}

impl ClassPath {
    pub fn new() -> ClassPath {
        ClassPath::default()
    }

    /// Add a class, returning any class previously registered under the same name
    pub fn insert(&mut self, class: ClassFile) -> Option<ClassFile> {
        self.classes.insert(class.this_class.clone(), class)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.classes.keys().map(String::as_str)
    }

    /// Load every `.class` file under a directory, recursively
    ///
    /// Files that fail to parse are logged and skipped; I/O errors abort the load.
    pub fn load_dir<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize, Error> {
        let mut loaded = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                loaded += self.load_dir(&path)?;
            } else if path.extension().map_or(false, |ext| ext == "class") {
                match ClassFile::load_from_path(&path) {
                    Ok(class) => {
                        debug!("loaded {} from {}", class.this_class, path.display());
                        self.insert(class);
                        loaded += 1;
                    }
                    Err(Error::IoError(err)) => return Err(Error::IoError(err)),
                    Err(err) => warn!("skipping {}: {}", path.display(), err),
                }
            }
        }
        Ok(loaded)
    }
}

impl ClassResolver for ClassPath {
    fn resolve(&self, name: &str) -> Option<&ClassFile> {
        self.classes.get(name)
    }
}

/// Superclasses of `name`, nearest first
///
/// The walk ends at a class with no superclass or at the first superclass the resolver doesn't
/// know (that name is still included).
pub fn superclasses<R: ClassResolver + ?Sized>(resolver: &R, name: &str) -> Vec<String> {
    let mut chain: Vec<String> = vec![];
    let mut current = resolver.resolve(name);
    while let Some(class) = current {
        match &class.super_class {
            Some(super_class) if !chain.contains(super_class) && super_class != name => {
                chain.push(super_class.clone());
                current = resolver.resolve(super_class);
            }
            _ => break,
        }
    }
    chain
}

/// Can a value of type `sub_type` be assigned to a variable of type `super_type`?
///
/// Both are internal class names, or array descriptors such as `[I` or `[Ljava/lang/String;`.
/// Supertypes the resolver doesn't know end that branch of the search, so this may give false
/// negatives on an incomplete class path.
pub fn is_assignable_from<R: ClassResolver + ?Sized>(
    resolver: &R,
    super_type: &str,
    sub_type: &str,
) -> bool {
    if super_type == sub_type || super_type == OBJECT_NAME {
        return true;
    }

    match (array_component(super_type), array_component(sub_type)) {
        // Arrays only extend `Object` and implement `Cloneable` and `Serializable`
        (None, Some(_)) => super_type == CLONEABLE_NAME || super_type == SERIALIZABLE_NAME,
        (Some(_), None) => false,

        // Arrays are covariant in their element type, but primitive elements must match
        (Some(super_elem), Some(sub_elem)) => {
            match (object_element(super_elem), object_element(sub_elem)) {
                (Some(super_class), Some(sub_class)) => {
                    is_assignable_from(resolver, super_class, sub_class)
                }
                _ if super_elem.starts_with('[') && sub_elem.starts_with('[') => {
                    is_assignable_from(resolver, super_elem, sub_elem)
                }
                _ => false,
            }
        }

        (None, None) => {
            let mut to_visit: Vec<&str> = vec![sub_type];
            let mut seen: HashSet<&str> = to_visit.iter().cloned().collect();

            // A class is never reached through interfaces, so skip them when looking for one
            let super_is_class = resolver
                .resolve(super_type)
                .map_or(false, |class| !class.is_interface());

            while let Some(next) = to_visit.pop() {
                if next == super_type {
                    return true;
                }
                if let Some(class) = resolver.resolve(next) {
                    if let Some(super_class) = &class.super_class {
                        if seen.insert(super_class) {
                            to_visit.push(super_class);
                        }
                    }
                    if !super_is_class {
                        for interface in &class.interfaces {
                            if seen.insert(interface) {
                                to_visit.push(interface);
                            }
                        }
                    }
                }
            }
            false
        }
    }
}

fn array_component(descriptor: &str) -> Option<&str> {
    descriptor.strip_prefix('[')
}

fn object_element(descriptor: &str) -> Option<&str> {
    descriptor.strip_prefix('L')?.strip_suffix(';')
}

/// Find the method a call on `class` would resolve to
///
/// The class and then its superclasses are searched first. Failing that, superinterfaces are
/// searched breadth first, which finds default and abstract interface methods.
pub fn find_inherited_method<'r, R: ClassResolver + ?Sized>(
    resolver: &'r R,
    class: &str,
    name: &str,
    descriptor: &str,
) -> Option<(&'r ClassFile, &'r Method)> {
    let start = resolver.resolve(class)?;
    let mut classes = vec![start];
    classes.extend(
        superclasses(resolver, class)
            .iter()
            .filter_map(|super_class| resolver.resolve(super_class)),
    );
    for class in classes.iter().copied() {
        if let Some(method) = class.find_method(name, descriptor) {
            return Some((class, method));
        }
    }

    let mut queue: Vec<&str> = classes
        .iter()
        .copied()
        .flat_map(|class| class.interfaces.iter().map(String::as_str))
        .collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut next = 0;
    while next < queue.len() {
        let interface = queue[next];
        next += 1;
        if !seen.insert(interface) {
            continue;
        }
        if let Some(class) = resolver.resolve(interface) {
            if let Some(method) = class.find_method(name, descriptor) {
                return Some((class, method));
            }
            queue.extend(class.interfaces.iter().map(String::as_str));
        }
    }
    None
}
