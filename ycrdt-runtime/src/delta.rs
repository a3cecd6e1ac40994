use crate::attrs::{from_yattrs_opt, from_yvalue, YAttributes, YValue};
use yrs::types::Delta;
use yrs::Any;

/// Caller-constructed delta entry, the inverse of [`crate::observer::Change`]
/// — used when a caller wants to apply a pre-built delta (e.g. replaying a
/// captured change set) rather than issue individual insert/delete calls.
#[derive(Debug, Clone)]
pub enum YDelta {
    Insert(YValue, Option<YAttributes>),
    Delete(u32),
    Retain(u32, Option<YAttributes>),
}

pub fn y_into_delta(d: &YDelta) -> Delta<Any> {
    match d {
        YDelta::Insert(v, attrs) => Delta::Inserted(from_yvalue(v), from_yattrs_opt(attrs)),
        YDelta::Delete(len) => Delta::Deleted(*len),
        YDelta::Retain(len, attrs) => Delta::Retain(*len, from_yattrs_opt(attrs)),
    }
}
