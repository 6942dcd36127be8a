use std::fmt;

/// Declared parameter type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WdlType {
    File,
    String,
    Int,
    Float,
    Boolean,
    Array(Box<WdlType>),
    Optional(Box<WdlType>),
}

impl WdlType {
    /// Primitive type by its source name
    pub fn primitive(name: &str) -> Option<Self> {
        match name {
            "File" => Some(WdlType::File),
            "String" => Some(WdlType::String),
            "Int" => Some(WdlType::Int),
            "Float" => Some(WdlType::Float),
            "Boolean" => Some(WdlType::Boolean),
            _ => None,
        }
    }

    pub fn array(item: WdlType) -> Self {
        WdlType::Array(Box::new(item))
    }

    /// Wrap as optional; `T??` collapses to `T?`
    pub fn optional(inner: WdlType) -> Self {
        match inner {
            WdlType::Optional(_) => inner,
            other => WdlType::Optional(Box::new(other)),
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, WdlType::Optional(_))
    }

    /// Strip one optional layer
    pub fn required(&self) -> &WdlType {
        match self {
            WdlType::Optional(inner) => inner,
            other => other,
        }
    }

    /// Item type of an array (optional arrays included)
    pub fn item(&self) -> Option<&WdlType> {
        match self.required() {
            WdlType::Array(item) => Some(item),
            _ => None,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.required(), WdlType::File)
    }

    pub fn is_array(&self) -> bool {
        self.item().is_some()
    }
}

impl fmt::Display for WdlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WdlType::File => f.write_str("File"),
            WdlType::String => f.write_str("String"),
            WdlType::Int => f.write_str("Int"),
            WdlType::Float => f.write_str("Float"),
            WdlType::Boolean => f.write_str("Boolean"),
            WdlType::Array(item) => write!(f, "Array[{}]", item),
            WdlType::Optional(inner) => write!(f, "{}?", inner),
        }
    }
}
