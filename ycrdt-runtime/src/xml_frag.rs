use crate::collection::{Integrated, SharedCollection};
use crate::error::{Error, Result};
use crate::observer::{Subscription, XmlChange, XmlEvent};
use crate::transaction::Transaction;
use crate::xml::XmlNode;
use std::cell::RefCell;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use yrs::types::TYPE_REFS_XML_FRAGMENT;
use yrs::{Doc, GetString, Observable, TransactionMut, XmlFragment as YrsXmlFragmentTrait, XmlFragmentRef};

/// A list of XML child nodes with no tag name and no attributes of its own
/// — the root container every document's XML tree hangs off, and usable
/// as a grouping node anywhere else in the tree too.
#[repr(transparent)]
pub struct XmlFragment(pub(crate) Arc<RefCell<SharedCollection<Vec<XmlNode>, XmlFragmentRef>>>);

unsafe impl Sync for XmlFragment {}
unsafe impl Send for XmlFragment {}

impl XmlFragment {
    pub(crate) fn new(init: SharedCollection<Vec<XmlNode>, XmlFragmentRef>) -> Self {
        XmlFragment(Arc::new(RefCell::new(init)))
    }

    pub fn from_ref(frag_ref: XmlFragmentRef, doc: Doc) -> Self {
        XmlFragment::new(SharedCollection::integrated(frag_ref, doc))
    }

    pub fn get_inner(&self) -> Arc<RefCell<SharedCollection<Vec<XmlNode>, XmlFragmentRef>>> {
        self.0.clone()
    }

    pub fn prelim(children: Vec<XmlNode>) -> Result<Self> {
        for child in children.iter() {
            child.assert_prelim()?;
        }
        Ok(XmlFragment::new(SharedCollection::prelim(children)))
    }

    pub fn integrate(&self, txn: &mut TransactionMut, xml_fragment: XmlFragmentRef) {
        let doc = txn.doc().clone();

        let old_value = {
            let mut guard = self.0.borrow_mut();
            mem::replace(&mut *guard, SharedCollection::Integrated(Integrated::new(xml_fragment.clone(), doc)))
        };

        if let SharedCollection::Prelim(children) = old_value {
            for child in children {
                xml_fragment.push_back(txn, child);
            }
        }
    }

    #[inline]
    pub fn get_type(&self) -> u8 {
        TYPE_REFS_XML_FRAGMENT
    }

    #[inline]
    pub fn is_prelim(&self) -> bool {
        self.0.borrow().is_prelim()
    }

    #[inline]
    pub fn is_alive(&self, txn: &Transaction) -> bool {
        self.0.borrow().is_alive(txn)
    }

    pub fn length(&self, txn: Option<Arc<Transaction>>) -> Result<u32> {
        match self.0.borrow().deref() {
            SharedCollection::Prelim(c) => Ok(c.len() as u32),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| Ok(c.len(txn))),
        }
    }

    pub fn insert(&self, index: u32, xml_node: XmlNode, txn: Option<Arc<Transaction>>) -> Result<()> {
        xml_node.assert_prelim()?;

        match self.0.borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                c.insert(index as usize, xml_node);
                Ok(())
            }
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                c.insert(txn, index, xml_node);
                Ok(())
            }),
        }
    }

    pub fn push(&self, xml_node: XmlNode, txn: Option<Arc<Transaction>>) -> Result<()> {
        xml_node.assert_prelim()?;

        match self.0.borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                c.push(xml_node);
                Ok(())
            }
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                c.push_back(txn, xml_node);
                Ok(())
            }),
        }
    }

    pub fn delete(&self, index: u32, length: Option<u32>, txn: Option<Arc<Transaction>>) -> Result<()> {
        let length = length.unwrap_or(1);
        match self.0.borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                c.drain((index as usize)..((index + length) as usize));
                Ok(())
            }
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                c.remove_range(txn, index, length);
                Ok(())
            }),
        }
    }

    pub fn first_child(&self, txn: Option<Arc<Transaction>>) -> Result<Option<XmlNode>> {
        match self.0.borrow().deref() {
            SharedCollection::Prelim(c) => Ok(c.first().cloned()),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| match c.first_child() {
                None => Ok(None),
                Some(xml) => Ok(Some(XmlNode::from_xml(xml, txn.doc().clone()))),
            }),
        }
    }

    pub fn to_string(&self, txn: Option<Arc<Transaction>>) -> Result<String> {
        match self.0.borrow().deref() {
            SharedCollection::Prelim(c) => {
                let mut s = String::new();
                for child in c {
                    let res = match child {
                        XmlNode::Element(e) => e.to_string(txn.clone()),
                        XmlNode::Fragment(f) => f.to_string(txn.clone()),
                        XmlNode::Text(t) => t.to_string(txn.clone()),
                    };
                    s.push_str(&res?);
                }
                Ok(s)
            }
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| Ok(c.get_string(txn))),
        }
    }

    /// Subscribes to changes in this fragment's child list. Like the other
    /// shared types' `observe`, the callback runs synchronously on the
    /// committing thread and must not mutate the document it observes.
    pub fn observe<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn(&XmlEvent) + 'static,
    {
        match self.0.borrow().deref() {
            SharedCollection::Prelim(_) => Err(Error::InvalidPrelimOp),
            SharedCollection::Integrated(c) => {
                let txn = c.transact()?;
                let shared_ref = c.hook.get(&txn).ok_or(Error::RefDisposed)?;
                let doc = c.doc.clone();
                let sub = shared_ref.observe(move |txn, event| {
                    let _guard = crate::reentrancy::CallbackGuard::enter();
                    let changes: Vec<XmlChange> =
                        event.delta(txn).iter().map(|c| XmlChange::from_change(c, &doc)).collect();
                    let origin = txn.origin().map(|o| o.as_ref().to_vec());
                    callback(&XmlEvent { origin, changes });
                });
                Ok(Subscription::from_yrs(sub))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::Doc;
    use crate::xml_text::XmlText;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn observe_fires_on_push_with_the_added_child() {
        let doc = Doc::new(None);
        let frag = doc.get_xml_fragment("root");

        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = seen.clone();
        let _sub = frag
            .observe(move |event| {
                for change in &event.changes {
                    if let XmlChange::Added(nodes) = change {
                        seen_clone.fetch_add(nodes.len() as u32, Ordering::SeqCst);
                    }
                }
            })
            .unwrap();

        frag.push(XmlNode::Text(Arc::new(XmlText::new("hi".to_string(), None))), None).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
