use crate::class_file::ClassFile;
use sha2::{Digest, Sha256};

impl ClassFile {
    /// Hash of everything other classes can observe about this one
    ///
    /// Covers the class header and the flags, names and descriptors of every member. Method
    /// bodies and attributes are left out, as is member order: members are hashed sorted by name
    /// and then by descriptor, so reordering declarations (or recompiling) doesn't change the
    /// digest.
    pub fn structural_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        update_str(&mut hasher, &self.this_class);
        update_str(&mut hasher, self.super_class.as_deref().unwrap_or(""));
        hasher.update(self.access_flags.bits().to_be_bytes());

        hasher.update((self.interfaces.len() as u32).to_be_bytes());
        for interface in &self.interfaces {
            update_str(&mut hasher, interface);
        }

        let mut fields: Vec<_> = self
            .fields
            .iter()
            .map(|field| (&field.name, &field.descriptor, field.access_flags.bits()))
            .collect();
        fields.sort();
        hasher.update((fields.len() as u32).to_be_bytes());
        for (name, descriptor, flags) in fields {
            update_str(&mut hasher, name);
            update_str(&mut hasher, descriptor);
            hasher.update(flags.to_be_bytes());
        }

        let mut methods: Vec<_> = self
            .methods
            .iter()
            .map(|method| (&method.name, &method.descriptor, method.access_flags.bits()))
            .collect();
        methods.sort();
        hasher.update((methods.len() as u32).to_be_bytes());
        for (name, descriptor, flags) in methods {
            update_str(&mut hasher, name);
            update_str(&mut hasher, descriptor);
            hasher.update(flags.to_be_bytes());
        }

        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    }
}

/// Length-prefixed, so that `("ab", "c")` and `("a", "bc")` hash differently
fn update_str(hasher: &mut Sha256, string: &str) {
    hasher.update((string.len() as u32).to_be_bytes());
    hasher.update(string.as_bytes());
}

#[cfg(test)]
mod test {
    use crate::access_flags::{FieldAccessFlags, MethodAccessFlags};
    use crate::class_file::ClassFile;

    fn class_with_members(order: &[&str]) -> ClassFile {
        let mut class = ClassFile::new("pkg/Digest", Some("java/lang/Object")).unwrap();
        for name in order {
            class
                .create_method(MethodAccessFlags::PUBLIC, name, "()V")
                .unwrap();
        }
        class
            .create_field(FieldAccessFlags::PRIVATE, "state", "J")
            .unwrap();
        class
    }

    #[test]
    fn member_order_does_not_matter() {
        let one = class_with_members(&["alpha", "beta", "gamma"]);
        let two = class_with_members(&["gamma", "alpha", "beta"]);
        assert_eq!(one.structural_digest(), two.structural_digest());
    }

    #[test]
    fn signatures_do_matter() {
        let one = class_with_members(&["alpha", "beta"]);
        let mut two = class_with_members(&["alpha", "beta"]);
        two.methods[1].descriptor = "(I)V".to_owned();
        assert_ne!(one.structural_digest(), two.structural_digest());

        let mut three = class_with_members(&["alpha", "beta"]);
        three.fields[0].access_flags |= FieldAccessFlags::VOLATILE;
        assert_ne!(one.structural_digest(), three.structural_digest());
    }
}
