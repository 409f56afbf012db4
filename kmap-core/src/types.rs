use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// DynamoDB-style typed attribute value (wire format)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Number (stored as string for precision)
    N(String),
    /// String
    S(String),
    /// Binary
    B(Bytes),
    /// Boolean
    Bool(bool),
    /// Null
    Null,
    /// List
    L(Vec<Value>),
    /// Map
    M(HashMap<String, Value>),
    /// String set
    SS(Vec<String>),
    /// Number set
    NS(Vec<String>),
    /// Binary set
    BS(Vec<Bytes>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::S(s.into())
    }

    pub fn number(n: impl ToString) -> Self {
        Value::N(n.to_string())
    }

    pub fn binary(b: impl Into<Bytes>) -> Self {
        Value::B(b.into())
    }

    pub fn map(m: HashMap<String, Value>) -> Self {
        Value::M(m)
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&str> {
        match self {
            Value::N(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::M(m) => Some(m),
            _ => None,
        }
    }

    /// Converts a JSON value without type guidance.
    ///
    /// Strings become `S`, numbers `N`, arrays `L` and objects `M`.
    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::N(n.to_string()),
            Json::String(s) => Value::S(s.clone()),
            Json::Array(items) => Value::L(items.iter().map(Value::from_json).collect()),
            Json::Object(fields) => Value::M(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Encodes a JSON value as an attribute of the given type.
    ///
    /// A non-empty prefix turns the value into a string key component
    /// (`prefix + value`) whatever the declared type.
    pub fn encode(ty: PropType, json: &Json, prefix: &str) -> Result<Value> {
        if !prefix.is_empty() {
            let raw = scalar_text(json).ok_or_else(|| cannot_encode(json, ty))?;
            return Ok(Value::S(format!("{}{}", prefix, raw)));
        }

        if json.is_null() {
            return Ok(Value::Null);
        }

        match ty {
            PropType::String => scalar_text(json)
                .map(Value::S)
                .ok_or_else(|| cannot_encode(json, ty)),
            PropType::Number => number_text(json)
                .map(Value::N)
                .ok_or_else(|| cannot_encode(json, ty)),
            PropType::Binary => decode_binary(json).map(Value::B),
            PropType::Boolean => json
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| cannot_encode(json, ty)),
            PropType::Null => Err(cannot_encode(json, ty)),
            PropType::List => match json {
                Json::Array(items) => Ok(Value::L(items.iter().map(Value::from_json).collect())),
                _ => Err(cannot_encode(json, ty)),
            },
            PropType::Map => match json {
                Json::Object(_) => Ok(Value::from_json(json)),
                _ => Err(cannot_encode(json, ty)),
            },
            PropType::StringSet => set_members(json)
                .iter()
                .map(|m| scalar_text(m).ok_or_else(|| cannot_encode(m, PropType::String)))
                .collect::<Result<Vec<_>>>()
                .map(Value::SS),
            PropType::NumberSet => set_members(json)
                .iter()
                .map(|m| number_text(m).ok_or_else(|| cannot_encode(m, PropType::Number)))
                .collect::<Result<Vec<_>>>()
                .map(Value::NS),
            PropType::BinarySet => set_members(json)
                .iter()
                .map(|m| decode_binary(m))
                .collect::<Result<Vec<_>>>()
                .map(Value::BS),
        }
    }
}

fn scalar_text(json: &Json) -> Option<String> {
    match json {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn number_text(json: &Json) -> Option<String> {
    match json {
        Json::Number(n) => Some(n.to_string()),
        Json::String(s) if s.parse::<f64>().is_ok() => Some(s.clone()),
        _ => None,
    }
}

fn decode_binary(json: &Json) -> Result<Bytes> {
    match json {
        Json::String(s) => STANDARD
            .decode(s)
            .map(Bytes::from)
            .map_err(|e| Error::InvalidArgument(format!("invalid base64 binary value: {}", e))),
        _ => Err(cannot_encode(json, PropType::Binary)),
    }
}

fn set_members(json: &Json) -> Vec<Json> {
    match json {
        Json::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn cannot_encode(json: &Json, ty: PropType) -> Error {
    Error::InvalidArgument(format!("cannot encode {} as {}", json, ty))
}

/// Item - a map of attribute names to values
pub type Item = HashMap<String, Value>;

/// Declared type of a prop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropType {
    String,
    Number,
    Binary,
    Boolean,
    Null,
    List,
    Map,
    StringSet,
    NumberSet,
    BinarySet,
}

impl PropType {
    pub const ALL: [PropType; 10] = [
        PropType::String,
        PropType::Number,
        PropType::Binary,
        PropType::Boolean,
        PropType::Null,
        PropType::List,
        PropType::Map,
        PropType::StringSet,
        PropType::NumberSet,
        PropType::BinarySet,
    ];

    /// Type discriminator token used by the store (`attribute_type`).
    pub fn token(&self) -> &'static str {
        match self {
            PropType::String => "S",
            PropType::Number => "N",
            PropType::Binary => "B",
            PropType::Boolean => "BOOL",
            PropType::Null => "NULL",
            PropType::List => "L",
            PropType::Map => "M",
            PropType::StringSet => "SS",
            PropType::NumberSet => "NS",
            PropType::BinarySet => "BS",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PropType::String => "string",
            PropType::Number => "number",
            PropType::Binary => "binary",
            PropType::Boolean => "boolean",
            PropType::Null => "null",
            PropType::List => "list",
            PropType::Map => "map",
            PropType::StringSet => "string-set",
            PropType::NumberSet => "number-set",
            PropType::BinarySet => "binary-set",
        }
    }

    /// Member type of a set type.
    pub fn element_type(&self) -> Option<PropType> {
        match self {
            PropType::StringSet => Some(PropType::String),
            PropType::NumberSet => Some(PropType::Number),
            PropType::BinarySet => Some(PropType::Binary),
            _ => None,
        }
    }

    /// Set type holding members of this type.
    pub fn set_type(&self) -> Option<PropType> {
        match self {
            PropType::String | PropType::StringSet => Some(PropType::StringSet),
            PropType::Number | PropType::NumberSet => Some(PropType::NumberSet),
            PropType::Binary | PropType::BinarySet => Some(PropType::BinarySet),
            _ => None,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            PropType::List | PropType::Map | PropType::StringSet | PropType::NumberSet | PropType::BinarySet
        )
    }
}

impl fmt::Display for PropType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PropType {
    type Err = Error;

    /// Accepts the logical name (`string-set`) or the store token (`SS`).
    fn from_str(s: &str) -> Result<Self> {
        PropType::ALL
            .iter()
            .copied()
            .find(|ty| ty.name() == s || ty.token() == s)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown type {}", s)))
    }
}
