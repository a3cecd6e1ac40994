use crate::attrs::{from_yvalue, into_yvalue, YValue};
use crate::collection::SharedCollection;
use crate::error::{Error, Result};
use crate::observer::{MapChange, MapEvent, Subscription};
use crate::transaction::Transaction;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use yrs::types::TYPE_REFS_MAP;
use yrs::{Map as YrsMapTrait, MapRef, Observable, Out};

/// Collaborative map: string keys to polymorphic values, last-writer-wins
/// per key on concurrent edits. Like `Array`, nesting another shared type
/// as a value requires integrating it first.
#[repr(transparent)]
pub struct Map {
    inner: Arc<RefCell<SharedCollection<HashMap<String, YValue>, MapRef>>>,
}

unsafe impl Sync for Map {}
unsafe impl Send for Map {}

impl Map {
    pub(crate) fn new(init: SharedCollection<HashMap<String, YValue>, MapRef>) -> Self {
        Map { inner: Arc::new(RefCell::new(init)) }
    }

    pub fn get_inner(&self) -> Arc<RefCell<SharedCollection<HashMap<String, YValue>, MapRef>>> {
        self.inner.clone()
    }

    pub fn prelim(init: HashMap<String, YValue>) -> Self {
        Map { inner: Arc::new(RefCell::new(SharedCollection::prelim(init))) }
    }

    #[inline]
    pub fn get_type(&self) -> u8 {
        TYPE_REFS_MAP
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

    pub fn get(&self, key: &str, txn: Option<Arc<Transaction>>) -> Result<Option<YValue>> {
        match self.get_inner().borrow().deref() {
            SharedCollection::Prelim(c) => Ok(c.get(key).cloned()),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| {
                Ok(c.get(txn, key).map(|v| out_to_yvalue(v)))
            }),
        }
    }

    pub fn contains_key(&self, key: &str, txn: Option<Arc<Transaction>>) -> Result<bool> {
        match self.get_inner().borrow().deref() {
            SharedCollection::Prelim(c) => Ok(c.contains_key(key)),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| Ok(c.contains_key(txn, key))),
        }
    }

    /// Sets `key` to `value`, overwriting any prior value (last-writer-wins
    /// on concurrent sets to the same key).
    pub fn set(&self, key: &str, value: YValue, txn: Option<Arc<Transaction>>) -> Result<()> {
        match self.get_inner().borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                c.insert(key.to_string(), value);
                Ok(())
            }
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                c.insert(txn, key.to_string(), from_yvalue(&value));
                Ok(())
            }),
        }
    }

    pub fn delete(&self, key: &str, txn: Option<Arc<Transaction>>) -> Result<()> {
        match self.get_inner().borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                c.remove(key);
                Ok(())
            }
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                c.remove(txn, key);
                Ok(())
            }),
        }
    }

    pub fn keys(&self, txn: Option<Arc<Transaction>>) -> Result<Vec<String>> {
        match self.get_inner().borrow().deref() {
            SharedCollection::Prelim(c) => Ok(c.keys().cloned().collect()),
            SharedCollection::Integrated(c) => {
                c.readonly(txn, |c, txn| Ok(c.iter(txn).map(|(k, _)| k.to_string()).collect()))
            }
        }
    }

    pub fn to_map(&self, txn: Option<Arc<Transaction>>) -> Result<HashMap<String, YValue>> {
        match self.get_inner().borrow().deref() {
            SharedCollection::Prelim(c) => Ok(c.clone()),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| {
                Ok(c.iter(txn).map(|(k, v)| (k.to_string(), out_to_yvalue(v))).collect())
            }),
        }
    }

    pub fn observe<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn(&MapEvent) + 'static,
    {
        match self.get_inner().borrow().deref() {
            SharedCollection::Prelim(_) => Err(Error::InvalidPrelimOp),
            SharedCollection::Integrated(c) => {
                let txn = c.transact()?;
                let shared_ref = c.hook.get(&txn).ok_or(Error::RefDisposed)?;
                let sub = shared_ref.observe(move |txn, event| {
                    let _guard = crate::reentrancy::CallbackGuard::enter();
                    let changes = event
                        .keys(txn)
                        .iter()
                        .map(|(k, c)| (k.to_string(), MapChange::from_entry_change(c)))
                        .collect();
                    let origin = txn.origin().map(|o| o.as_ref().to_vec());
                    callback(&MapEvent { origin, changes });
                });
                Ok(Subscription::from_yrs(sub))
            }
        }
    }
}

fn out_to_yvalue(out: Out) -> YValue {
    match out {
        Out::Any(any) => into_yvalue(&any),
        _ => YValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::Doc;

    #[test]
    fn set_get_and_delete_round_trip() {
        let doc = Doc::new(None);
        let map = doc.get_map("meta");
        map.set("title", YValue::String("untitled".into()), None).unwrap();
        assert_eq!(map.get("title", None).unwrap(), Some(YValue::String("untitled".into())));
        assert!(map.contains_key("title", None).unwrap());

        map.delete("title", None).unwrap();
        assert_eq!(map.get("title", None).unwrap(), None);
        assert!(!map.contains_key("title", None).unwrap());
    }

    #[test]
    fn set_on_an_existing_key_is_last_writer_wins() {
        let doc = Doc::new(None);
        let map = doc.get_map("meta");
        map.set("count", YValue::Number(1.0), None).unwrap();
        map.set("count", YValue::Number(2.0), None).unwrap();
        assert_eq!(map.get("count", None).unwrap(), Some(YValue::Number(2.0)));
        assert_eq!(map.length(None).unwrap(), 1);
    }

    #[test]
    fn concurrent_sets_to_different_keys_converge_with_both_present() {
        let doc_a = Doc::new(None);
        doc_a.get_map("meta").set("a", YValue::Number(1.0), None).unwrap();
        let update_a = crate::update::encode_state_as_update(&doc_a, None).unwrap();

        let doc_b = Doc::new(None);
        doc_b.get_map("meta").set("b", YValue::Number(2.0), None).unwrap();
        let update_b = crate::update::encode_state_as_update(&doc_b, None).unwrap();

        crate::update::apply_update(&doc_a, &update_b, None).unwrap();
        crate::update::apply_update(&doc_b, &update_a, None).unwrap();

        let map_a = doc_a.get_map("meta").to_map(None).unwrap();
        let map_b = doc_b.get_map("meta").to_map(None).unwrap();
        assert_eq!(map_a, map_b);
        assert_eq!(map_a.get("a"), Some(&YValue::Number(1.0)));
        assert_eq!(map_a.get("b"), Some(&YValue::Number(2.0)));
    }

    #[test]
    fn keys_reflects_insertion_and_deletion() {
        let doc = Doc::new(None);
        let map = doc.get_map("meta");
        map.set("a", YValue::Bool(true), None).unwrap();
        map.set("b", YValue::Bool(false), None).unwrap();
        let mut keys = map.keys(None).unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn prelim_map_operates_without_a_document() {
        let map = Map::prelim(HashMap::new());
        map.set("k", YValue::String("v".into()), None).unwrap();
        assert_eq!(map.get("k", None).unwrap(), Some(YValue::String("v".into())));
    }
}
