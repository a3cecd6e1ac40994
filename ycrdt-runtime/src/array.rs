use crate::attrs::{from_yvalue, into_yvalue, YValue};
use crate::collection::SharedCollection;
use crate::error::{Error, Result};
use crate::observer::{ArrayChange, ArrayEvent, Subscription};
use crate::transaction::Transaction;
use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use yrs::types::TYPE_REFS_ARRAY;
use yrs::{Array as YrsArrayTrait, ArrayRef, Observable, Out};

/// Collaborative array: an ordered, index-addressed sequence of polymorphic
/// values. Items are plain JSON-like values (see [`crate::attrs::YValue`]);
/// nesting another `Array`/`Map`/`Text` as an element requires integrating
/// it into the document first and storing its branch id, the same
/// workaround the rest of the Yjs ecosystem uses for self-referential
/// containers.
#[repr(transparent)]
pub struct Array {
    inner: Arc<RefCell<SharedCollection<Vec<YValue>, ArrayRef>>>,
}

unsafe impl Sync for Array {}
unsafe impl Send for Array {}

impl Array {
    pub(crate) fn new(init: SharedCollection<Vec<YValue>, ArrayRef>) -> Self {
        Array { inner: Arc::new(RefCell::new(init)) }
    }

    pub fn get_inner(&self) -> Arc<RefCell<SharedCollection<Vec<YValue>, ArrayRef>>> {
        self.inner.clone()
    }

    pub fn prelim(init: Vec<YValue>) -> Self {
        Array { inner: Arc::new(RefCell::new(SharedCollection::prelim(init))) }
    }

    #[inline]
    pub fn get_type(&self) -> u8 {
        TYPE_REFS_ARRAY
    }

    #[inline]
    pub fn is_prelim(&self) -> bool {
        self.get_inner().borrow().is_prelim()
    }

    #[inline]
    pub fn is_alive(&self, txn: &Transaction) -> bool {
        self.get_inner().borrow().is_alive(txn)
    }

    pub fn length(&self, txn: Option<Arc<Transaction>>) -> Result<u32> {
        match self.get_inner().borrow().deref() {
            SharedCollection::Prelim(c) => Ok(c.len() as u32),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| Ok(c.len(txn))),
        }
    }

    pub fn get(&self, index: u32, txn: Option<Arc<Transaction>>) -> Result<YValue> {
        match self.get_inner().borrow().deref() {
            SharedCollection::Prelim(c) => c.get(index as usize).cloned().ok_or(Error::InvalidArgument),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| {
                let value = c.get(txn, index).ok_or(Error::InvalidArgument)?;
                out_to_yvalue(value)
            }),
        }
    }

    /// Returns every element, decoded left to right. Embedded shared types
    /// (a nested `Text`/`Array`/`Map` stored as an element rather than a
    /// plain value) decode to `YValue::Null` — retrieve them with `get`
    /// through a typed accessor instead once nested-container support
    /// lands.
    pub fn to_vec(&self, txn: Option<Arc<Transaction>>) -> Result<Vec<YValue>> {
        match self.get_inner().borrow().deref() {
            SharedCollection::Prelim(c) => Ok(c.clone()),
            SharedCollection::Integrated(c) => {
                c.readonly(txn, |c, txn| Ok(c.iter(txn).filter_map(|v| out_to_yvalue(v).ok()).collect()))
            }
        }
    }

    /// Inserts `value` at `index`. `index == length` is append.
    pub fn insert(&self, index: u32, value: YValue, txn: Option<Arc<Transaction>>) -> Result<()> {
        match self.get_inner().borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                if index as usize > c.len() {
                    return Err(Error::InvalidArgument);
                }
                c.insert(index as usize, value);
                Ok(())
            }
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                if index > c.len(txn) {
                    return Err(Error::InvalidArgument);
                }
                c.insert(txn, index, from_yvalue(&value));
                Ok(())
            }),
        }
    }

    pub fn push_back(&self, value: YValue, txn: Option<Arc<Transaction>>) -> Result<()> {
        match self.get_inner().borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                c.push(value);
                Ok(())
            }
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                c.push_back(txn, from_yvalue(&value));
                Ok(())
            }),
        }
    }

    pub fn push_front(&self, value: YValue, txn: Option<Arc<Transaction>>) -> Result<()> {
        match self.get_inner().borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                c.insert(0, value);
                Ok(())
            }
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                c.push_front(txn, from_yvalue(&value));
                Ok(())
            }),
        }
    }

    /// Removes `length` elements starting at `index`. A zero length is a
    /// no-op.
    pub fn delete(&self, index: u32, length: u32, txn: Option<Arc<Transaction>>) -> Result<()> {
        if length == 0 {
            return Ok(());
        }

        match self.get_inner().borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                let end = (index + length) as usize;
                if end > c.len() {
                    return Err(Error::InvalidArgument);
                }
                c.drain((index as usize)..end);
                Ok(())
            }
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                if index.saturating_add(length) > c.len(txn) {
                    return Err(Error::InvalidArgument);
                }
                c.remove_range(txn, index, length);
                Ok(())
            }),
        }
    }

    pub fn observe<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn(&ArrayEvent) + 'static,
    {
        match self.get_inner().borrow().deref() {
            SharedCollection::Prelim(_) => Err(Error::InvalidPrelimOp),
            SharedCollection::Integrated(c) => {
                let txn = c.transact()?;
                let shared_ref = c.hook.get(&txn).ok_or(Error::RefDisposed)?;
                let sub = shared_ref.observe(move |txn, event| {
                    let _guard = crate::reentrancy::CallbackGuard::enter();
                    let changes: Vec<ArrayChange> = event.delta(txn).iter().map(ArrayChange::from_change).collect();
                    let origin = txn.origin().map(|o| o.as_ref().to_vec());
                    callback(&ArrayEvent { origin, changes });
                });
                Ok(Subscription::from_yrs(sub))
            }
        }
    }
}

/// Plain scalar elements round-trip through `Out::Any`; embedded shared
/// types surface any other `Out` variant, which this runtime's array API
/// doesn't yet expose a typed accessor for.
fn out_to_yvalue(out: Out) -> Result<YValue> {
    match out {
        Out::Any(any) => Ok(into_yvalue(&any)),
        _ => Err(Error::InvalidArgument),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::Doc;

    #[test]
    fn push_back_and_front_order_elements() {
        let doc = Doc::new(None);
        let array = doc.get_array("items");
        array.push_back(YValue::Number(1.0), None).unwrap();
        array.push_back(YValue::Number(2.0), None).unwrap();
        array.push_front(YValue::Number(0.0), None).unwrap();

        assert_eq!(array.to_vec(None).unwrap(), vec![YValue::Number(0.0), YValue::Number(1.0), YValue::Number(2.0)]);
    }

    #[test]
    fn insert_at_index_shifts_later_elements() {
        let doc = Doc::new(None);
        let array = doc.get_array("items");
        array.push_back(YValue::Number(1.0), None).unwrap();
        array.push_back(YValue::Number(3.0), None).unwrap();
        array.insert(1, YValue::Number(2.0), None).unwrap();

        assert_eq!(
            array.to_vec(None).unwrap(),
            vec![YValue::Number(1.0), YValue::Number(2.0), YValue::Number(3.0)]
        );
    }

    #[test]
    fn delete_removes_a_contiguous_range() {
        let doc = Doc::new(None);
        let array = doc.get_array("items");
        for i in 0..5 {
            array.push_back(YValue::Number(i as f64), None).unwrap();
        }
        array.delete(1, 2, None).unwrap();
        assert_eq!(array.to_vec(None).unwrap(), vec![YValue::Number(0.0), YValue::Number(3.0), YValue::Number(4.0)]);
        assert_eq!(array.length(None).unwrap(), 3);
    }

    #[test]
    fn out_of_range_insert_on_prelim_array_is_rejected() {
        let array = Array::prelim(vec![]);
        assert!(matches!(array.insert(1, YValue::Null, None), Err(Error::InvalidArgument)));
    }

    #[test]
    fn out_of_range_delete_on_prelim_array_is_rejected() {
        let array = Array::prelim(vec![YValue::Null]);
        assert!(matches!(array.delete(0, 5, None), Err(Error::InvalidArgument)));
    }

    #[test]
    fn get_out_of_range_on_integrated_array_is_rejected() {
        let doc = Doc::new(None);
        let array = doc.get_array("items");
        assert!(matches!(array.get(0, None), Err(Error::InvalidArgument)));
    }

    #[test]
    fn out_of_range_insert_on_integrated_array_is_rejected() {
        let doc = Doc::new(None);
        let array = doc.get_array("items");
        assert!(matches!(array.insert(1, YValue::Null, None), Err(Error::InvalidArgument)));
    }

    #[test]
    fn out_of_range_delete_on_integrated_array_is_rejected() {
        let doc = Doc::new(None);
        let array = doc.get_array("items");
        array.push_back(YValue::Null, None).unwrap();
        assert!(matches!(array.delete(0, 5, None), Err(Error::InvalidArgument)));
    }
}
