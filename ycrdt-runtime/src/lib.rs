mod array;
mod attrs;
mod collection;
mod delta;
mod doc;
mod error;
mod ids;
mod map;
mod observer;
mod reentrancy;
mod text;
mod transaction;
mod update;
mod xml;
mod xml_elem;
mod xml_frag;
mod xml_text;

pub use array::Array;
pub use attrs::{YAttributes, YValue};
pub use collection::{Integrated, SharedCollection};
pub use delta::{y_into_delta, YDelta};
pub use doc::{Doc, DocOptions};
pub use error::{Error, Result};
pub use ids::{ClientId, OpId};
pub use map::Map;
pub use observer::{
    ArrayChange, ArrayEvent, Change, Event, MapChange, MapEvent, Subscription, UpdateEvent, XmlChange, XmlEvent,
};
pub use text::Text;
pub use transaction::Transaction;
pub use update::{
    apply_update, apply_update_v2, debug_update_v1, debug_update_v2, decode_snapshot_v1, decode_snapshot_v2,
    decode_state_vector, decode_state_vector_v2, encode_snapshot_v1, encode_snapshot_v2, encode_state_as_update,
    encode_state_as_update_v2, encode_state_from_snapshot_v1, encode_state_from_snapshot_v2, encode_state_vector,
    encode_state_vector_from_update, encode_state_vector_v2, equal_snapshots, merge_updates_v1, merge_updates_v2,
    snapshot, YSnapshot, YStateVector,
};
pub use xml::XmlNode;
pub use xml_elem::XmlElement;
pub use xml_frag::XmlFragment;
pub use xml_text::XmlText;
