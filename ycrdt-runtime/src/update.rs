use crate::doc::Doc;
use crate::error::{Error, Result};
use std::ops::Deref;
use yrs::updates::decoder::{Decode, DecoderV1};
use yrs::updates::encoder::{Encode, Encoder, EncoderV1, EncoderV2};
use yrs::{ReadTxn, StateVector, Transact, Update};

/// A decoded state vector: the per-client clock values a replica has
/// already applied, used to ask a peer for exactly the operations it's
/// missing.
#[repr(transparent)]
pub struct YStateVector(pub(crate) StateVector);

/// Encodes `doc`'s current state vector using lib0 v1 encoding.
pub fn encode_state_vector(doc: &Doc) -> Result<Vec<u8>> {
    let txn = doc.0.try_transact().map_err(|_| Error::ConcurrentTransaction)?;
    Ok(txn.state_vector().encode_v1())
}

pub fn encode_state_vector_v2(doc: &Doc) -> Result<Vec<u8>> {
    let txn = doc.0.try_transact().map_err(|_| Error::ConcurrentTransaction)?;
    Ok(txn.state_vector().encode_v2())
}

/// Derives the state vector implied by a standalone update, without
/// needing a document to apply it to first — used by a server that wants
/// to know what a client's update covers before deciding whether to also
/// persist it.
pub fn encode_state_vector_from_update(update: &[u8]) -> Result<Vec<u8>> {
    let update = Update::decode_v1(update).map_err(|e| Error::InvalidUpdate(e.to_string()))?;
    Ok(update.state_vector().encode_v1())
}

pub fn decode_state_vector(vector: Option<&[u8]>) -> Result<YStateVector> {
    match vector {
        Some(v) => StateVector::decode_v1(v).map(YStateVector).map_err(|e| Error::InvalidUpdate(e.to_string())),
        None => Ok(YStateVector(StateVector::default())),
    }
}

pub fn decode_state_vector_v2(vector: Option<&[u8]>) -> Result<YStateVector> {
    match vector {
        Some(v) => StateVector::decode_v2(v).map(YStateVector).map_err(|e| Error::InvalidUpdate(e.to_string())),
        None => Ok(YStateVector(StateVector::default())),
    }
}

/// Renders a human-readable dump of an update's block structure — for
/// diagnostics only, never parsed back.
pub fn debug_update_v1(update: &[u8]) -> Result<String> {
    let mut decoder = DecoderV1::from(update);
    Update::decode(&mut decoder).map(|u| format!("{:#?}", u)).map_err(|e| Error::InvalidUpdate(e.to_string()))
}

pub fn debug_update_v2(update: &[u8]) -> Result<String> {
    Update::decode_v2(update).map(|u| format!("{:#?}", u)).map_err(|e| Error::InvalidUpdate(e.to_string()))
}

/// Encodes everything `doc` has beyond `vector` (or its full history, if
/// `vector` is `None`) using lib0 v1 encoding.
pub fn encode_state_as_update(doc: &Doc, vector: Option<&YStateVector>) -> Result<Vec<u8>> {
    let txn = doc.0.try_transact().map_err(|_| Error::ConcurrentTransaction)?;
    let default = StateVector::default();
    let sv = vector.map(|v| &v.0).unwrap_or(&default);
    Ok(txn.encode_state_as_update_v1(sv))
}

pub fn encode_state_as_update_v2(doc: &Doc, vector: Option<&YStateVector>) -> Result<Vec<u8>> {
    let txn = doc.0.try_transact().map_err(|_| Error::ConcurrentTransaction)?;
    let default = StateVector::default();
    let sv = vector.map(|v| &v.0).unwrap_or(&default);
    Ok(txn.encode_state_as_update_v2(sv))
}

/// Applies a remote update encoded with lib0 v1 directly to `doc`, opening
/// and committing its own transaction. Prefer `Doc::transact_mut` plus
/// `Transaction::apply_v1` when several updates must land in one
/// transaction (e.g. replaying a persisted log on load).
pub fn apply_update(doc: &Doc, update: &[u8], origin: Option<&str>) -> Result<()> {
    let mut txn = match origin {
        Some(origin) => doc.0.try_transact_mut_with(yrs::Origin::from(origin)),
        None => doc.0.try_transact_mut(),
    }
    .map_err(|_| Error::ConcurrentTransaction)?;

    let update = Update::decode_v1(update).map_err(|e| Error::InvalidUpdate(e.to_string()))?;
    txn.apply_update(update).map_err(|_| Error::InvalidParent)
}

pub fn apply_update_v2(doc: &Doc, update: &[u8], origin: Option<&str>) -> Result<()> {
    let mut txn = match origin {
        Some(origin) => doc.0.try_transact_mut_with(yrs::Origin::from(origin)),
        None => doc.0.try_transact_mut(),
    }
    .map_err(|_| Error::ConcurrentTransaction)?;

    let update = Update::decode_v2(update).map_err(|e| Error::InvalidUpdate(e.to_string()))?;
    txn.apply_update(update).map_err(|_| Error::InvalidParent)
}

/// Merges several lib0 v1 updates into one, in the order given — the
/// persistence pipeline's compaction step uses this to collapse a run of
/// small updates into a single blob before writing it out.
pub fn merge_updates_v1(updates: &[Vec<u8>]) -> Result<Vec<u8>> {
    let decoded: std::result::Result<Vec<Update>, _> = updates.iter().map(|u| Update::decode_v1(u)).collect();
    let decoded = decoded.map_err(|e| Error::InvalidUpdate(e.to_string()))?;
    let merged = Update::merge_updates(decoded);
    Ok(merged.encode_v1())
}

pub fn merge_updates_v2(updates: &[Vec<u8>]) -> Result<Vec<u8>> {
    let decoded: std::result::Result<Vec<Update>, _> = updates.iter().map(|u| Update::decode_v2(u)).collect();
    let decoded = decoded.map_err(|e| Error::InvalidUpdate(e.to_string()))?;
    let merged = Update::merge_updates(decoded);
    Ok(merged.encode_v2())
}

/// A point-in-time causal cut of a document's history, used to read or
/// diff against a past state without rolling the live document back.
pub struct YSnapshot(yrs::Snapshot);

impl Deref for YSnapshot {
    type Target = yrs::Snapshot;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub fn snapshot(doc: &Doc) -> YSnapshot {
    YSnapshot(doc.0.transact().snapshot())
}

pub fn equal_snapshots(a: &YSnapshot, b: &YSnapshot) -> bool {
    a.0 == b.0
}

pub fn encode_snapshot_v1(snapshot: &YSnapshot) -> Vec<u8> {
    snapshot.0.encode_v1()
}

pub fn decode_snapshot_v1(bytes: &[u8]) -> Result<YSnapshot> {
    yrs::Snapshot::decode_v1(bytes).map(YSnapshot).map_err(|e| Error::InvalidUpdate(e.to_string()))
}

pub fn encode_snapshot_v2(snapshot: &YSnapshot) -> Vec<u8> {
    snapshot.0.encode_v2()
}

pub fn decode_snapshot_v2(bytes: &[u8]) -> Result<YSnapshot> {
    yrs::Snapshot::decode_v2(bytes).map(YSnapshot).map_err(|e| Error::InvalidUpdate(e.to_string()))
}

pub fn encode_state_from_snapshot_v1(doc: &Doc, snapshot: &YSnapshot) -> Result<Vec<u8>> {
    let mut encoder = EncoderV1::new();
    doc.0
        .transact()
        .encode_state_from_snapshot(&snapshot.0, &mut encoder)
        .map_err(|e| Error::InvalidUpdate(e.to_string()))?;
    Ok(encoder.to_vec())
}

pub fn encode_state_from_snapshot_v2(doc: &Doc, snapshot: &YSnapshot) -> Result<Vec<u8>> {
    let mut encoder = EncoderV2::new();
    doc.0
        .transact()
        .encode_state_from_snapshot(&snapshot.0, &mut encoder)
        .map_err(|e| Error::InvalidUpdate(e.to_string()))?;
    Ok(encoder.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::Doc;

    #[test]
    fn diff_against_own_state_vector_is_empty() {
        let doc = Doc::new(None);
        doc.get_text("content").insert(0, "hello", None, None).unwrap();

        let sv = encode_state_vector(&doc).unwrap();
        let vector = decode_state_vector(Some(&sv)).unwrap();
        let diff = encode_state_as_update(&doc, Some(&vector)).unwrap();

        // Applying a diff derived from the document's own state vector must
        // be a no-op: the document already has everything it describes.
        let before = doc.get_text("content").get_string(None).unwrap();
        apply_update(&doc, &diff, None).unwrap();
        assert_eq!(doc.get_text("content").get_string(None).unwrap(), before);
    }

    #[test]
    fn replica_converges_regardless_of_which_document_applies_first() {
        let a = Doc::new(None);
        a.get_text("content").insert(0, "hello", None, None).unwrap();
        let update_a = encode_state_as_update(&a, None).unwrap();

        let b = Doc::new(None);
        b.get_map("meta").set("k", crate::YValue::Number(1.0), None).unwrap();
        let update_b = encode_state_as_update(&b, None).unwrap();

        let replica_1 = Doc::new(None);
        apply_update(&replica_1, &update_a, None).unwrap();
        apply_update(&replica_1, &update_b, None).unwrap();

        let replica_2 = Doc::new(None);
        apply_update(&replica_2, &update_b, None).unwrap();
        apply_update(&replica_2, &update_a, None).unwrap();

        assert_eq!(
            replica_1.get_text("content").get_string(None).unwrap(),
            replica_2.get_text("content").get_string(None).unwrap(),
        );
        assert_eq!(
            encode_state_vector(&replica_1).unwrap(),
            encode_state_vector(&replica_2).unwrap(),
        );
    }

    #[test]
    fn merge_updates_v1_yields_the_same_result_as_applying_them_separately() {
        let a = Doc::new(None);
        a.get_text("content").insert(0, "ab", None, None).unwrap();
        let update_a = encode_state_as_update(&a, None).unwrap();
        a.get_text("content").insert(2, "cd", None, None).unwrap();
        let update_both = encode_state_as_update(&a, None).unwrap();

        let merged = merge_updates_v1(&[update_a, update_both.clone()]).unwrap();

        let applied_separately = Doc::new(None);
        apply_update(&applied_separately, &update_both, None).unwrap();

        let applied_merged = Doc::new(None);
        apply_update(&applied_merged, &merged, None).unwrap();

        assert_eq!(
            applied_merged.get_text("content").get_string(None).unwrap(),
            applied_separately.get_text("content").get_string(None).unwrap(),
        );
    }

    #[test]
    fn snapshot_equality_is_reflexive_and_tracks_new_ops() {
        let doc = Doc::new(None);
        doc.get_text("content").insert(0, "x", None, None).unwrap();
        let before = snapshot(&doc);
        assert!(equal_snapshots(&before, &before));

        doc.get_text("content").insert(1, "y", None, None).unwrap();
        let after = snapshot(&doc);
        assert!(!equal_snapshots(&before, &after));
    }

    #[test]
    fn state_vector_from_update_matches_the_encoding_document() {
        let doc = Doc::new(None);
        doc.get_text("content").insert(0, "hello", None, None).unwrap();
        let update = encode_state_as_update(&doc, None).unwrap();

        assert_eq!(encode_state_vector_from_update(&update).unwrap(), encode_state_vector(&doc).unwrap());
    }

    #[test]
    fn applying_malformed_bytes_is_an_invalid_update_error() {
        let doc = Doc::new(None);
        let err = apply_update(&doc, &[0xff, 0xff, 0xff], None).unwrap_err();
        assert!(matches!(err, Error::InvalidUpdate(_)));
    }
}
