use crate::attrs::parse_attrs;
use crate::collection::SharedCollection;
use crate::error::{Error, Result};
use crate::observer::{Change, Event, Subscription};
use crate::transaction::Transaction;
use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use yrs::types::TYPE_REFS_TEXT;
use yrs::{GetString, Observable, TextRef};

/// Collaborative text: an ordered, UTF-16-indexed sequence of characters
/// with per-range formatting attributes. Internally a mutable linked list
/// of chunks; consecutive inserts from the same client are squashed
/// together on commit the way every Yjs/yrs binding does, so a long typing
/// session doesn't leave behind one chunk per keystroke.
#[repr(transparent)]
pub struct Text {
    inner: Arc<RefCell<SharedCollection<String, TextRef>>>,
}

unsafe impl Sync for Text {}
unsafe impl Send for Text {}

impl Text {
    pub(crate) fn new(init: SharedCollection<String, TextRef>) -> Self {
        Text { inner: Arc::new(RefCell::new(init)) }
    }

    pub fn get_inner(&self) -> Arc<RefCell<SharedCollection<String, TextRef>>> {
        self.inner.clone()
    }

    /// Creates a preliminary `Text`, not yet attached to any document. A
    /// preliminary instance can be nested into an `Array`/`Map`/XML
    /// container; once inserted it becomes integrated and cannot be nested
    /// a second time.
    pub fn prelim(init: Option<&str>) -> Self {
        Text { inner: Arc::new(RefCell::new(SharedCollection::prelim(init.unwrap_or_default().to_string()))) }
    }

    #[inline]
    pub fn get_type(&self) -> u8 {
        TYPE_REFS_TEXT
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
            SharedCollection::Prelim(c) => Ok(c.encode_utf16().count() as u32),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| Ok(c.len(txn))),
        }
    }

    pub fn get_string(&self, txn: Option<Arc<Transaction>>) -> Result<String> {
        match self.get_inner().borrow().deref() {
            SharedCollection::Prelim(c) => Ok(c.clone()),
            SharedCollection::Integrated(c) => c.readonly(txn, |c, txn| Ok(c.get_string(txn))),
        }
    }

    /// Inserts `chunk` at `index` (UTF-16 code units). `index == length` is
    /// append, `index == 0` is prepend; an out-of-range index fails with
    /// [`Error::InvalidArgument`] rather than reaching the underlying block
    /// search.
    pub fn insert(
        &self,
        index: u32,
        chunk: &str,
        attributes: Option<&str>,
        txn: Option<Arc<Transaction>>,
    ) -> Result<()> {
        let attributes = parse_attrs(attributes)?;

        match self.get_inner().borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                if attributes.is_some() {
                    Err(Error::InvalidPrelimOp)
                } else {
                    let byte_index = utf16_to_byte_index(c, index as usize);
                    c.insert_str(byte_index, chunk);
                    Ok(())
                }
            }
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                if index > c.len(txn) {
                    return Err(Error::InvalidArgument);
                }
                if let Some(attrs) = attributes {
                    c.insert_with_attributes(txn, index, chunk, attrs);
                } else {
                    c.insert(txn, index, chunk);
                }
                Ok(())
            }),
        }
    }

    /// Wraps `index..index+length` with the given formatting attributes.
    /// Only valid on integrated text — a preliminary string has no
    /// attribute storage of its own.
    pub fn format(&self, index: u32, length: u32, attributes: &str, txn: Option<Arc<Transaction>>) -> Result<()> {
        let attrs = parse_attrs(Some(attributes))?.ok_or(Error::InvalidFmt)?;

        match self.get_inner().borrow_mut().deref_mut() {
            SharedCollection::Prelim(_) => Err(Error::InvalidPrelimOp),
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                c.format(txn, index, length, attrs);
                Ok(())
            }),
        }
    }

    pub fn push(&self, chunk: &str, attributes: Option<&str>, txn: Option<Arc<Transaction>>) -> Result<()> {
        let attributes = parse_attrs(attributes)?;

        match self.get_inner().borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                if attributes.is_some() {
                    Err(Error::InvalidPrelimOp)
                } else {
                    c.push_str(chunk);
                    Ok(())
                }
            }
            SharedCollection::Integrated(c) => c.mutably(txn, |c, txn| {
                if let Some(attrs) = attributes {
                    let len = c.len(txn);
                    c.insert_with_attributes(txn, len, chunk, attrs);
                } else {
                    c.push(txn, chunk);
                }
                Ok(())
            }),
        }
    }

    /// Deletes `length` UTF-16 code units starting at `index`. A zero
    /// length is a no-op.
    pub fn delete(&self, index: u32, length: u32, txn: Option<Arc<Transaction>>) -> Result<()> {
        if length == 0 {
            return Ok(());
        }

        match self.get_inner().borrow_mut().deref_mut() {
            SharedCollection::Prelim(c) => {
                let start = utf16_to_byte_index(c, index as usize);
                let end = utf16_to_byte_index(c, (index + length) as usize);
                c.drain(start..end);
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

    /// Subscribes to changes on this text. The callback runs synchronously
    /// on the committing thread before `commit` returns, and must not
    /// mutate the document it observes — doing so fails the nested
    /// transaction attempt with [`Error::AnotherTx`].
    pub fn observe<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn(&Event) + 'static,
    {
        match self.get_inner().borrow().deref() {
            SharedCollection::Prelim(_) => Err(Error::InvalidPrelimOp),
            SharedCollection::Integrated(c) => {
                let txn = c.transact()?;
                let shared_ref = c.hook.get(&txn).ok_or(Error::RefDisposed)?;
                let sub = shared_ref.observe(move |txn, event| {
                    let _guard = crate::reentrancy::CallbackGuard::enter();
                    let changes = event.delta(txn).iter().map(Change::from_delta).collect();
                    let origin = txn.origin().map(|o| o.as_ref().to_vec());
                    callback(&Event { origin, changes });
                });
                Ok(Subscription::from_yrs(sub))
            }
        }
    }
}

fn utf16_to_byte_index(s: &str, utf16_index: usize) -> usize {
    let mut units = 0usize;
    for (byte_index, ch) in s.char_indices() {
        if units >= utf16_index {
            return byte_index;
        }
        units += ch.len_utf16();
    }
    s.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::Doc;

    #[test]
    fn insert_and_delete_on_integrated_text() {
        let doc = Doc::new(None);
        let text = doc.get_text("content");
        text.insert(0, "hello world", None, None).unwrap();
        assert_eq!(text.get_string(None).unwrap(), "hello world");

        text.delete(5, 6, None).unwrap();
        assert_eq!(text.get_string(None).unwrap(), "hello");
        assert_eq!(text.length(None).unwrap(), 5);
    }

    #[test]
    fn delete_with_zero_length_is_a_no_op() {
        let doc = Doc::new(None);
        let text = doc.get_text("content");
        text.insert(0, "hello", None, None).unwrap();
        text.delete(2, 0, None).unwrap();
        assert_eq!(text.get_string(None).unwrap(), "hello");
    }

    #[test]
    fn push_appends_at_the_end() {
        let doc = Doc::new(None);
        let text = doc.get_text("content");
        text.push("ab", None, None).unwrap();
        text.push("cd", None, None).unwrap();
        assert_eq!(text.get_string(None).unwrap(), "abcd");
    }

    #[test]
    fn format_on_prelim_text_is_rejected() {
        let text = Text::prelim(Some("hi"));
        assert!(matches!(text.format(0, 2, "{\"bold\":true}", None), Err(Error::InvalidPrelimOp)));
    }

    #[test]
    fn prelim_text_inserts_without_a_document() {
        let text = Text::prelim(None);
        assert!(text.is_prelim());
        text.insert(0, "hi", None, None).unwrap();
        assert_eq!(text.get_string(None).unwrap(), "hi");
    }

    #[test]
    fn out_of_range_insert_on_integrated_text_is_rejected() {
        let doc = Doc::new(None);
        let text = doc.get_text("content");
        assert!(matches!(text.insert(5, "hi", None, None), Err(Error::InvalidArgument)));
    }

    #[test]
    fn out_of_range_delete_on_integrated_text_is_rejected() {
        let doc = Doc::new(None);
        let text = doc.get_text("content");
        text.insert(0, "hi", None, None).unwrap();
        assert!(matches!(text.delete(0, 5, None), Err(Error::InvalidArgument)));
    }

    #[test]
    fn multibyte_inserts_index_by_utf16_code_units() {
        let doc = Doc::new(None);
        let text = doc.get_text("content");
        // U+1F600 is two UTF-16 code units, matching how a Yjs peer indexes it.
        text.insert(0, "\u{1F600}", None, None).unwrap();
        text.insert(2, "!", None, None).unwrap();
        assert_eq!(text.get_string(None).unwrap(), "\u{1F600}!");
    }
}
