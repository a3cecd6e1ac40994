use crate::collection::SharedCollection;
use crate::error::Error;
use crate::xml_elem::XmlElement;
use crate::xml_frag::XmlFragment;
use crate::xml_text::XmlText;
use std::ops::Deref;
use std::sync::Arc;
use yrs::block::{EmbedPrelim, ItemContent, Prelim};
use yrs::branch::{Branch, BranchPtr};
use yrs::types::xml::XmlPrelim;
use yrs::types::TypeRef;
use yrs::{Doc, TransactionMut, XmlElementRef, XmlFragmentRef, XmlOut, XmlTextRef};

/// A node that can sit in an XML tree: either an element, a fragment
/// (a childless grouping node), or a text run. Mirrors `yrs::XmlOut`, but
/// owns its handle rather than borrowing from a transaction.
#[derive(Clone)]
pub enum XmlNode {
    Element(Arc<XmlElement>),
    Fragment(Arc<XmlFragment>),
    Text(Arc<XmlText>),
}

impl XmlPrelim for XmlNode {}

impl From<XmlNode> for EmbedPrelim<XmlNode> {
    fn from(value: XmlNode) -> Self {
        EmbedPrelim::Shared(value)
    }
}

impl Prelim for XmlNode {
    type Return = XmlOut;

    fn into_content(self, txn: &mut TransactionMut) -> (ItemContent, Option<Self>) {
        let type_ref = self.type_ref(txn);
        let branch = Branch::new(type_ref);
        (ItemContent::Type(branch), Some(self))
    }

    fn integrate(self, txn: &mut TransactionMut, inner_ref: BranchPtr) {
        match self {
            XmlNode::Text(cell) => {
                let xml_text = XmlTextRef::from(inner_ref);
                cell.integrate(txn, xml_text);
            }
            XmlNode::Element(cell) => {
                let xml_element = XmlElementRef::from(inner_ref);
                cell.integrate(txn, xml_element);
            }
            XmlNode::Fragment(cell) => {
                let xml_fragment = XmlFragmentRef::from(inner_ref);
                cell.integrate(txn, xml_fragment);
            }
        }
    }
}

impl XmlNode {
    pub fn from_xml(value: XmlOut, doc: Doc) -> Self {
        match value {
            XmlOut::Element(v) => XmlNode::Element(Arc::new(XmlElement::from_ref(v, doc))),
            XmlOut::Fragment(v) => {
                XmlNode::Fragment(Arc::new(XmlFragment::new(SharedCollection::integrated(v, doc))))
            }
            XmlOut::Text(v) => XmlNode::Text(Arc::new(XmlText::from_ref(v, doc))),
        }
    }

    pub fn assert_prelim(&self) -> crate::error::Result<()> {
        let prelim = match self {
            XmlNode::Element(e) => e.is_prelim(),
            XmlNode::Fragment(e) => e.is_prelim(),
            XmlNode::Text(e) => e.is_prelim(),
        };

        if !prelim {
            return Err(Error::NotPrelim);
        }

        Ok(())
    }

    fn type_ref(&self, _txn: &TransactionMut) -> TypeRef {
        match self {
            XmlNode::Element(v) => {
                let name = match v.get_inner().borrow().deref() {
                    SharedCollection::Integrated(_) => panic!("{}", Error::NotPrelim),
                    SharedCollection::Prelim(p) => Arc::from(p.name.as_str()),
                };
                TypeRef::XmlElement(name)
            }
            XmlNode::Fragment(_) => TypeRef::XmlFragment,
            XmlNode::Text(_) => TypeRef::XmlText,
        }
    }
}
