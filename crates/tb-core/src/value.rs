use crate::strings::SharedStr;

/// Tagged value used to read and write named character fields across the
/// boundary. Exactly one variant is live; the enum makes a mistagged access
/// unrepresentable.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Int(i32),
    Float(f64),
    Bool(bool),
    Str(SharedStr),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => value.as_str(),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Str(_) => "string",
        }
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(SharedStr::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_match_live_variant_only() {
        let value = FieldValue::Int(7);
        assert_eq!(value.as_int(), Some(7));
        assert_eq!(value.as_float(), None);
        assert_eq!(value.as_str(), None);
        assert_eq!(value.type_name(), "int");

        let text = FieldValue::from("mood");
        assert_eq!(text.as_str(), Some("mood"));
        assert_eq!(text.as_int(), None);
    }

    #[test]
    fn default_is_null() {
        assert!(FieldValue::default().is_null());
    }
}
