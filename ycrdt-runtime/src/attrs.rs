use crate::error::Error;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use yrs::types::Attrs;
use yrs::Any;

pub type YAttributes = HashMap<String, YValue>;

/// A tagged variant covering every value shape `yrs::Any` supports: plain
/// JSON-ish scalars, nested arrays, nested attribute maps, and raw buffers
/// (polymorphic values in arrays/maps/attributes are modeled as a tagged
/// variant, with the codec's type byte driving the tag on the wire).
#[derive(Debug, Clone, PartialEq)]
pub enum YValue {
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i64),
    String(String),
    Buffer(Vec<u8>),
    Array(Vec<YValue>),
    AttrMap(YAttributes),
}

pub fn into_yattrs(attrs: Attrs) -> YAttributes {
    let mut result: YAttributes = HashMap::new();
    for (k, v) in attrs {
        result.insert(k.to_string(), into_yvalue(&v));
    }
    result
}

fn into_yattrs_map(attrs: &HashMap<String, Any>) -> YAttributes {
    let mut result: YAttributes = HashMap::new();
    for (k, v) in attrs {
        result.insert(k.to_string(), into_yvalue(v));
    }
    result
}

pub fn into_yvalue(v: &Any) -> YValue {
    match v {
        Any::Null => YValue::Null,
        Any::Undefined => YValue::Null,
        Any::Bool(v) => YValue::Bool(*v),
        Any::Number(v) => YValue::Number(*v),
        Any::BigInt(v) => YValue::BigInt(*v),
        Any::String(v) => YValue::String(v.to_string()),
        Any::Buffer(v) => YValue::Buffer(v.to_vec()),
        Any::Array(v) => YValue::Array(v.iter().map(into_yvalue).collect()),
        Any::Map(v) => {
            let v = v.clone();
            YValue::AttrMap(into_yattrs_map(v.deref()))
        }
    }
}

pub fn from_yvalue(v: &YValue) -> Any {
    match v {
        YValue::Null => Any::Null,
        YValue::Bool(v) => Any::Bool(*v),
        YValue::Number(v) => Any::Number(*v),
        YValue::BigInt(v) => Any::BigInt(*v),
        YValue::String(v) => Any::String(Arc::from(v.as_str())),
        YValue::Buffer(v) => Any::Buffer(Arc::from(v.as_slice())),
        YValue::Array(v) => Any::Array(v.iter().map(from_yvalue).collect()),
        YValue::AttrMap(v) => {
            let mut res: HashMap<String, Any> = HashMap::new();
            for (k, v) in v {
                res.insert(k.to_string(), from_yvalue(v));
            }
            Any::Map(Arc::from(res))
        }
    }
}

pub fn from_yattrs_opt(attrs: &Option<YAttributes>) -> Option<Box<Attrs>> {
    attrs.as_ref().map(|v| Box::new(from_yattrs(v)))
}

pub fn from_yattrs(attrs: &YAttributes) -> Attrs {
    let mut res: HashMap<Arc<str>, Any> = HashMap::new();
    for (k, v) in attrs {
        res.insert(Arc::from(k.as_str()), from_yvalue(v));
    }
    res
}

/// Parses a JSON-encoded attribute map used by `Text::format`/`insert` with
/// formatting. `None` input
/// means "no attributes"; malformed or non-object JSON is `InvalidFmt`.
pub fn parse_attrs(attributes: Option<&str>) -> crate::error::Result<Option<Attrs>> {
    match attributes {
        None => Ok(None),
        Some(str) => {
            let parsed = Any::from_json(str).map_err(|_| Error::InvalidFmt)?;
            map_attrs(parsed).ok_or(Error::InvalidFmt).map(Some)
        }
    }
}

fn map_attrs(attrs: Any) -> Option<Attrs> {
    if let Any::Map(attrs) = attrs {
        Some(attrs.iter().map(|(k, v)| (k.as_str().into(), v.clone())).collect())
    } else {
        None
    }
}
