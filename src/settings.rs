/// Knobs for reading classes and editing code
#[derive(Debug, Clone)]
pub struct Settings {
    /// Reject known attributes whose body disagrees with the declared length
    ///
    /// When this is off, such attributes are logged and kept as opaque blobs so that the bytes
    /// still survive a round trip.
    pub strict_attribute_lengths: bool,

    /// Nested `Code` attributes that refer to instruction offsets we don't track
    ///
    /// These are discarded by the editor whenever the instruction array changes length, since
    /// they would otherwise point at the wrong instructions.
    pub stale_code_attributes: Vec<String>,
}

impl Settings {
    pub const LINE_NUMBER_TABLE: &'static str = "LineNumberTable";
    pub const LOCAL_VARIABLE_TABLE: &'static str = "LocalVariableTable";
    pub const LOCAL_VARIABLE_TYPE_TABLE: &'static str = "LocalVariableTypeTable";
    pub const STACK_MAP_TABLE: &'static str = "StackMapTable";

    /// Is this nested `Code` attribute invalidated by a change in code length?
    pub fn is_stale_code_attribute(&self, name: &str) -> bool {
        self.stale_code_attributes.iter().any(|stale| stale == name)
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            strict_attribute_lengths: true,
            stale_code_attributes: vec![
                Self::LINE_NUMBER_TABLE.to_owned(),
                Self::LOCAL_VARIABLE_TABLE.to_owned(),
                Self::LOCAL_VARIABLE_TYPE_TABLE.to_owned(),
                Self::STACK_MAP_TABLE.to_owned(),
            ],
        }
    }
}
