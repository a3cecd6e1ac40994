use crate::attrs::{into_yvalue, YValue};
use crate::collection::{Integrated, SharedCollection};
use crate::error::{Error, Result};
use crate::transaction::Transaction;
use crate::xml::XmlNode;
use std::cell::RefCell;
use std::collections::HashMap;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use yrs::{Doc, GetString, Out, TransactionMut, Xml, XmlElementRef, XmlFragment};

#[derive(Clone)]
pub(crate) struct PrelimXmlElement {
    pub name: String,
    pub attributes: HashMap<String, YValue>,
    pub children: Vec<XmlNode>,
}

impl PrelimXmlElement {
    fn to_string(&self, txn: Option<Arc<Transaction>>) -> Result<String> {
        let mut str = String::new();

        for child in self.children.iter() {
            let res = match child {
                XmlNode::Element(c) => c.to_string(txn.clone()),
                XmlNode::Fragment(c) => c.to_string(txn.clone()),
                XmlNode::Text(c) => c.to_string(txn.clone()),
            };
            str.push_str(&res?);
        }

        Ok(str)
    }
}

/// XML element: a node with a tag name, key-value attributes, and an
/// ordered list of child nodes.
///
/// Attribute updates use last-writer-wins; child insertion uses the same
/// interleave-resistant sequencing as every other ordered shared type, with
/// ties between concurrent inserts at the same index broken by client id.
#[repr(transparent)]
pub struct XmlElement(pub(crate) Arc<RefCell<SharedCollection<PrelimXmlElement, XmlElementRef>>>);

unsafe impl Sync for XmlElement {}
unsafe impl Send for XmlElement {}

impl XmlElement {
    pub fn from_ref(elem_ref: XmlElementRef, doc: Doc) -> Self {
        XmlElement(Arc::new(RefCell::new(SharedCollection::integrated(elem_ref, doc))))
    }

    pub fn get_inner(&self) -> Arc<RefCell<SharedCollection<PrelimXmlElement, XmlElementRef>>> {
        self.0.clone()
    }

    pub fn integrate(&self, txn: &mut TransactionMut, xml_element: XmlElementRef) {
        let doc = txn.doc().clone();

        let old_value = {
            let mut guard = self.0.borrow_mut();
            mem::replace(&mut *guard, SharedCollection::Integrated(Integrated::new(xml_element.clone(), doc)))
        };

        if let SharedCollection::Prelim(raw) = old_value {
            for child in raw.children {
                xml_element.push_back(txn, child);
            }
            for (name, value) in &raw.attributes {
                xml_element.insert_attribute(txn, name.clone(), value);
            }
        };
    }

    pub fn new(name: String, attributes: Option<HashMap<String, YValue>>, children: Option<Vec<XmlNode>>) -> Result<XmlElement> {
        let children = children.unwrap_or_default();

        for child in children.iter() {
            child.assert_prelim()?;
        }
        Ok(XmlElement(Arc::new(RefCell::new(SharedCollection::prelim(PrelimXmlElement {
            name,
            attributes: attributes.unwrap_or_default(),
            children,
        })))))
    }

    /// True if this is a preliminary instance, not yet attached to a
    /// document; a preliminary instance can be nested once and becomes
    /// integrated.
    #[inline]
    pub fn is_prelim(&self) -> bool {
        self.0.borrow().is_prelim()
    }

    #[inline]
    pub fn is_alive(&self, txn: &Transaction) -> bool {
        self.0.borrow().is_alive(txn)
    }

    pub fn name(&self, txn: Option<Arc<Transaction>>) -> Result<String> {
        match self.0.borrow().deref() {
            SharedCollection::Prelim(c) => Ok(c.name.clone()),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, _| Ok(c.tag().to_string())),
        }
    }

    pub fn length(&self, txn: Option<Arc<Transaction>>) -> Result<u32> {
        match self.0.borrow().deref() {
            SharedCollection::Prelim(c) => Ok(c.children.len() as u32),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| Ok(c.len(txn))),
        }
    }

    pub fn insert(&self, index: u32, xml_node: XmlNode, txn: Option<Arc<Transaction>>) -> Result<()> {
        xml_node.assert_prelim()?;

        match self.0.borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                c.children.insert(index as usize, xml_node);
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
                c.children.push(xml_node);
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
                c.children.drain((index as usize)..((index + length) as usize));
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
            SharedCollection::Prelim(c) => Ok(c.children.first().cloned()),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| match c.first_child() {
                None => Ok(None),
                Some(xml) => Ok(Some(XmlNode::from_xml(xml, txn.doc().clone()))),
            }),
        }
    }

    pub fn next_sibling(&self, txn: Option<Arc<Transaction>>) -> Result<Option<XmlNode>> {
        match self.0.borrow().deref() {
            SharedCollection::Prelim(_) => Err(Error::InvalidPrelimOp),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| {
                let next = c.siblings(txn).next();
                match next {
                    Some(node) => Ok(Some(XmlNode::from_xml(node, txn.doc().clone()))),
                    None => Ok(None),
                }
            }),
        }
    }

    pub fn prev_sibling(&self, txn: Option<Arc<Transaction>>) -> Result<Option<XmlNode>> {
        match self.0.borrow().deref() {
            SharedCollection::Prelim(_) => Err(Error::InvalidPrelimOp),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| {
                let prev = c.siblings(txn).next_back();
                match prev {
                    Some(node) => Ok(Some(XmlNode::from_xml(node, txn.doc().clone()))),
                    None => Ok(None),
                }
            }),
        }
    }

    pub fn parent(&self, txn: Option<Arc<Transaction>>) -> Result<Option<XmlNode>> {
        match self.0.borrow().deref() {
            SharedCollection::Prelim(_) => Err(Error::InvalidPrelimOp),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| match c.parent() {
                None => Ok(None),
                Some(node) => Ok(Some(XmlNode::from_xml(node, txn.doc().clone()))),
            }),
        }
    }

    pub fn to_string(&self, txn: Option<Arc<Transaction>>) -> Result<String> {
        match self.0.borrow().deref() {
            SharedCollection::Prelim(c) => c.to_string(txn),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| Ok(c.get_string(txn))),
        }
    }

    pub fn set_attribute(&self, name: &str, value: YValue, txn: Option<Arc<Transaction>>) -> Result<()> {
        match self.0.borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                c.attributes.insert(name.to_string(), value);
                Ok(())
            }
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                c.insert_attribute(txn, name, value);
                Ok(())
            }),
        }
    }

    pub fn get_attribute(&self, name: &str, txn: Option<Arc<Transaction>>) -> Result<Option<YValue>> {
        match self.0.borrow().deref() {
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| match c.get_attribute(txn, name) {
                None => Ok(None),
                Some(Out::Any(attr)) => Ok(Some(into_yvalue(&attr))),
                Some(_) => Err(Error::InvalidData("attr value".to_string())),
            }),
            SharedCollection::Prelim(c) => Ok(c.attributes.get(name).cloned()),
        }
    }

    pub fn remove_attribute(&self, name: String, txn: Option<Arc<Transaction>>) -> Result<()> {
        match self.0.borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                c.attributes.remove(&name);
                Ok(())
            }
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                c.remove_attribute(txn, &name);
                Ok(())
            }),
        }
    }

    pub fn attributes(&self, txn: Option<Arc<Transaction>>) -> Result<HashMap<String, YValue>> {
        match self.0.borrow().deref() {
            SharedCollection::Prelim(c) => Ok(c.attributes.clone()),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| {
                let mut map = HashMap::new();
                for (name, value) in c.attributes(txn) {
                    match value {
                        Out::Any(attr) => {
                            map.insert(name.to_string(), into_yvalue(&attr));
                        }
                        _ => return Err(Error::InvalidData("attr value".to_string())),
                    }
                }
                Ok(map)
            }),
        }
    }
}
