use crate::attrs::{into_yvalue, YAttributes, YValue};
use crate::xml::XmlNode;
use yrs::types::{Change, Delta};
use yrs::{Any, Doc, Out, XmlOut};

/// A scoped handle returned by every `observe`/`observe_deep` call.
/// Disposing it (drop, or the explicit `unsubscribe`) detaches the
/// callback; disposal is idempotent because the underlying `yrs`
/// subscription's own `Drop` already is.
pub struct Subscription(Option<yrs::Subscription>);

impl Subscription {
    pub(crate) fn from_yrs(sub: yrs::Subscription) -> Self {
        Subscription(Some(sub))
    }

    /// Detaches the callback. Calling this more than once, or dropping
    /// after calling it, is a no-op.
    pub fn unsubscribe(&mut self) {
        self.0 = None;
    }
}

/// The payload of a `Doc::observe_update_v1` callback: the encoded update
/// bytes produced by the commit that fired it — exactly what another
/// replica must `apply_update` with to converge — plus the origin tag the
/// committing transaction carried, if any.
pub struct UpdateEvent {
    pub update: Vec<u8>,
    pub origin: Option<Vec<u8>>,
}

/// One recorded change within a committed transaction's delta for a shared
/// type, shaped to match the text/array delta format used
/// across the Yjs ecosystem: a sequence of retain/insert/delete/format ops
/// applied left-to-right against the type's prior state.
#[derive(Debug, Clone)]
pub enum Change {
    Insert(YValue, Option<YAttributes>),
    Delete(u32),
    Retain(u32, Option<YAttributes>),
}

impl Change {
    pub(crate) fn from_delta(delta: &Delta<Any>) -> Self {
        match delta {
            Delta::Inserted(value, attrs) => {
                Change::Insert(into_yvalue(value), attrs.as_ref().map(|a| crate::attrs::into_yattrs((**a).clone())))
            }
            Delta::Deleted(len) => Change::Delete(*len),
            Delta::Retain(len, attrs) => {
                Change::Retain(*len, attrs.as_ref().map(|a| crate::attrs::into_yattrs((**a).clone())))
            }
        }
    }
}

/// Carries the delta for one shared type's observer callback: the target's
/// branch id (so a caller juggling many subscriptions can tell them apart),
/// an optional origin tag propagated from the transaction, and the ordered
/// list of changes.
pub struct Event {
    pub origin: Option<Vec<u8>>,
    pub changes: Vec<Change>,
}

/// One recorded change within a committed transaction's delta for an
/// `Array`/`Map`. Unlike `Change` (text-shaped runs), array/map deltas from
/// `yrs` group contiguous inserted elements together rather than reporting
/// one entry per insert.
#[derive(Debug, Clone)]
pub enum ArrayChange {
    Added(Vec<YValue>),
    Removed(u32),
    Retained(u32),
}

pub struct ArrayEvent {
    pub origin: Option<Vec<u8>>,
    pub changes: Vec<ArrayChange>,
}

/// One recorded change within a committed transaction's delta for a `Map`
/// key.
#[derive(Debug, Clone)]
pub enum MapChange {
    Inserted(YValue),
    Updated(YValue, YValue),
    Removed(YValue),
}

pub struct MapEvent {
    pub origin: Option<Vec<u8>>,
    pub changes: Vec<(String, MapChange)>,
}

impl MapChange {
    pub(crate) fn from_entry_change(c: &yrs::types::EntryChange) -> Self {
        match c {
            yrs::types::EntryChange::Inserted(new) => MapChange::Inserted(out_or_null(new)),
            yrs::types::EntryChange::Updated(old, new) => {
                MapChange::Updated(out_or_null(old), out_or_null(new))
            }
            yrs::types::EntryChange::Removed(old) => MapChange::Removed(out_or_null(old)),
        }
    }
}

fn out_or_null(out: &Out) -> YValue {
    match out {
        Out::Any(any) => into_yvalue(any),
        _ => YValue::Null,
    }
}

impl ArrayChange {
    pub(crate) fn from_change(c: &Change<Out>) -> Self {
        match c {
            Change::Added(values) => ArrayChange::Added(
                values
                    .iter()
                    .map(|v| match v {
                        Out::Any(any) => into_yvalue(any),
                        _ => YValue::Null,
                    })
                    .collect(),
            ),
            Change::Removed(len) => ArrayChange::Removed(*len),
            Change::Retain(len) => ArrayChange::Retained(*len),
        }
    }
}

/// One recorded change within a committed transaction's delta for an
/// `XmlFragment`/`XmlElement`'s child list. Shaped like `ArrayChange`, but
/// over XML nodes rather than plain values — an XML container can only
/// ever hold elements, fragments, and text runs, never bare scalars.
#[derive(Clone)]
pub enum XmlChange {
    Added(Vec<XmlNode>),
    Removed(u32),
    Retained(u32),
}

pub struct XmlEvent {
    pub origin: Option<Vec<u8>>,
    pub changes: Vec<XmlChange>,
}

impl XmlChange {
    pub(crate) fn from_change(c: &Change<XmlOut>, doc: &Doc) -> Self {
        match c {
            Change::Added(values) => {
                XmlChange::Added(values.iter().cloned().map(|v| XmlNode::from_xml(v, doc.clone())).collect())
            }
            Change::Removed(len) => XmlChange::Removed(*len),
            Change::Retain(len) => XmlChange::Retained(*len),
        }
    }
}
