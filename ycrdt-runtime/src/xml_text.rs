use crate::attrs::{from_yattrs, into_yvalue, YValue};
use crate::collection::{Integrated, SharedCollection};
use crate::error::{Error, Result};
use crate::transaction::Transaction;
use crate::xml::XmlNode;
use std::cell::RefCell;
use std::collections::HashMap;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use yrs::types::TYPE_REFS_XML_TEXT;
use yrs::{Doc, GetString, Out, Text, TransactionMut, Xml, XmlTextRef};

#[derive(Clone)]
pub(crate) struct PrelimXmlText {
    pub attributes: HashMap<String, YValue>,
    pub text: String,
}

/// A run of rich text living inside an XML tree: the same character/
/// formatting model as [`crate::text::Text`], plus the attribute map and
/// sibling/parent navigation every XML node carries.
#[repr(transparent)]
pub struct XmlText(pub(crate) Arc<RefCell<SharedCollection<PrelimXmlText, XmlTextRef>>>);

unsafe impl Sync for XmlText {}
unsafe impl Send for XmlText {}

impl XmlText {
    pub fn from_ref(xml_text_ref: XmlTextRef, doc: Doc) -> Self {
        XmlText(Arc::new(RefCell::new(SharedCollection::integrated(xml_text_ref, doc))))
    }

    pub fn get_inner(&self) -> Arc<RefCell<SharedCollection<PrelimXmlText, XmlTextRef>>> {
        self.0.clone()
    }

    pub fn integrate(&self, txn: &mut TransactionMut, xml_text: XmlTextRef) {
        let doc = txn.doc().clone();

        let old_value = {
            let mut guard = self.0.borrow_mut();
            mem::replace(&mut *guard, SharedCollection::Integrated(Integrated::new(xml_text.clone(), doc)))
        };

        if let SharedCollection::Prelim(raw) = old_value {
            xml_text.insert(txn, 0, &raw.text);
            for (name, value) in raw.attributes {
                xml_text.insert_attribute(txn, name.clone(), value);
            }
        }
    }

    pub fn new(text: String, attributes: Option<HashMap<String, YValue>>) -> Self {
        XmlText(Arc::new(RefCell::new(SharedCollection::prelim(PrelimXmlText {
            text,
            attributes: attributes.unwrap_or_default(),
        }))))
    }

    #[inline]
    pub fn get_type(&self) -> u8 {
        TYPE_REFS_XML_TEXT
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
            SharedCollection::Prelim(c) => Ok(c.text.len() as u32),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| Ok(c.len(txn))),
        }
    }

    pub fn insert(
        &self,
        index: u32,
        chunk: &str,
        attributes: Option<HashMap<String, YValue>>,
        txn: Option<Arc<Transaction>>,
    ) -> Result<()> {
        match self.0.borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                if attributes.is_none() {
                    c.text.insert_str(index as usize, chunk);
                    Ok(())
                } else {
                    Err(Error::InvalidPrelimOp)
                }
            }
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                if let Some(attrs) = attributes {
                    c.insert_with_attributes(txn, index, chunk, from_yattrs(&attrs));
                } else {
                    c.insert(txn, index, chunk);
                }
                Ok(())
            }),
        }
    }

    /// Inserts `embed` (another `XmlNode`) at `index`, wrapped with
    /// `attributes` if given. Only valid once this text is integrated,
    /// since embeds must be attached to the same document.
    pub fn insert_embed(
        &self,
        index: u32,
        embed: XmlNode,
        attributes: Option<HashMap<String, YValue>>,
        txn: Option<Arc<Transaction>>,
    ) -> Result<()> {
        match self.0.borrow_mut().deref_mut() {
            SharedCollection::Prelim(_) => Err(Error::InvalidPrelimOp),
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                if let Some(attrs) = attributes {
                    c.insert_embed_with_attributes(txn, index, embed, from_yattrs(&attrs));
                } else {
                    c.insert_embed(txn, index, embed);
                }
                Ok(())
            }),
        }
    }

    pub fn format(
        &self,
        index: u32,
        length: u32,
        attributes: Option<HashMap<String, YValue>>,
        txn: Option<Arc<Transaction>>,
    ) -> Result<()> {
        let attrs = attributes.ok_or(Error::InvalidFmt)?;
        let attrs = from_yattrs(&attrs);

        match self.0.borrow_mut().deref_mut() {
            SharedCollection::Prelim(_) => Err(Error::InvalidPrelimOp),
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                c.format(txn, index, length, attrs);
                Ok(())
            }),
        }
    }

    pub fn push(&self, chunk: &str, attributes: Option<HashMap<String, YValue>>, txn: Option<Arc<Transaction>>) -> Result<()> {
        match self.0.borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                if attributes.is_none() {
                    c.text.push_str(chunk);
                    Ok(())
                } else {
                    Err(Error::InvalidPrelimOp)
                }
            }
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                if let Some(attrs) = attributes {
                    let len = c.len(txn);
                    c.insert_with_attributes(txn, len, chunk, from_yattrs(&attrs));
                } else {
                    c.push(txn, chunk);
                }
                Ok(())
            }),
        }
    }

    pub fn delete(&self, index: u32, length: u32, txn: Option<Arc<Transaction>>) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        match self.0.borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                c.text.drain((index as usize)..((index + length) as usize));
                Ok(())
            }
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                c.remove_range(txn, index, length);
                Ok(())
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
            SharedCollection::Prelim(c) => Ok(c.text.clone()),
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
