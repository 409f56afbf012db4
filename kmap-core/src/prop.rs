/// Key and attribute descriptors
///
/// A `Prop` describes one document field (or one constant key component)
/// together with the wire attribute it is stored under.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::{PropType, Result, Value};

/// Whether a prop is backed by a document field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropKind {
    /// Backed by the named document field
    Dynamic { name: String },
    /// No backing field; the value is always the prefix
    Static,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prop {
    pub kind: PropKind,
    /// Wire attribute name (`pk`, `sk1`, or the field name for plain attributes)
    pub alias: String,
    /// Constant prepended to the encoded value
    pub prefix: String,
    pub ty: PropType,
    pub required: bool,
    pub key: bool,
    /// Physical index slot this key belongs to
    pub index: usize,
}

impl Prop {
    /// Plain attribute stored under its own name.
    pub fn new(name: impl Into<String>, ty: PropType) -> Self {
        let name = name.into();
        Self {
            alias: name.clone(),
            kind: PropKind::Dynamic { name },
            prefix: String::new(),
            ty,
            required: false,
            key: false,
            index: 0,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, PropType::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, PropType::Number)
    }

    /// Key component with no backing field.
    pub fn static_key(prefix: impl Into<String>) -> Self {
        Self {
            kind: PropKind::Static,
            alias: String::new(),
            prefix: prefix.into(),
            ty: PropType::String,
            required: false,
            key: true,
            index: 0,
        }
    }

    /// Store the attribute under a different wire name.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Document field name; empty for a static key.
    pub fn name(&self) -> &str {
        match &self.kind {
            PropKind::Dynamic { name } => name,
            PropKind::Static => "",
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self.kind, PropKind::Static)
    }

    /// Encodes a logical value with this prop's type and prefix.
    ///
    /// Static keys ignore the input and always encode to their prefix.
    pub fn encode(&self, json: &Json) -> Result<Value> {
        if self.is_static() {
            return Ok(self.static_value());
        }
        Value::encode(self.ty, json, &self.prefix)
    }

    /// Encodes without applying the prefix (substring checks work on the
    /// logical value, not the stored form).
    pub fn encode_unprefixed(&self, json: &Json) -> Result<Value> {
        match self.ty.element_type() {
            Some(member) => Value::encode(member, json, ""),
            None if self.ty.is_collection() => Ok(Value::from_json(json)),
            None => Value::encode(self.ty, json, ""),
        }
    }

    /// The constant value of a static key.
    pub fn static_value(&self) -> Value {
        Value::S(self.prefix.clone())
    }
}

/// Looks up a prop by document field name.
pub fn find_prop<'a>(props: &'a [Prop], name: &str) -> Option<&'a Prop> {
    props.iter().find(|p| !p.is_static() && p.name() == name)
}
