//! Per-document ephemeral presence: `clientId -> (clock, json state)`, never
//! persisted in the CRDT log. Wire format:
//! `[N]{[clientId][clock][jsonOrEmpty]}`, where an empty state string means
//! "remove this client".

use crate::error::Result;
use crate::wire::{read_var_string, read_var_uint, write_var_string, write_var_uint};
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    clock: u32,
    state: Option<String>,
    last_seen: Instant,
}

/// Tracks presence for one document. Not `Clone`; callers hold it behind a
/// lock the way every other piece of per-document mutable state in the
/// registry is held.
#[derive(Default)]
pub struct Awareness {
    entries: HashMap<u64, Entry>,
}

impl Awareness {
    pub fn new() -> Self {
        Awareness { entries: HashMap::new() }
    }

    /// Applies a decoded awareness update. Entries are accepted only when
    /// `clock` is strictly greater than the stored clock (or the client is
    /// unseen); an empty state string removes the entry. Returns the bytes
    /// to re-broadcast — identical to the input when every entry was
    /// accepted, narrowed to only the accepted entries otherwise.
    pub fn apply_update(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut pos = 0;
        let count = read_var_uint(bytes, &mut pos)?;
        let mut accepted: Vec<(u64, u32, Option<String>)> = Vec::new();

        for _ in 0..count {
            let client_id = read_var_uint(bytes, &mut pos)?;
            let clock = read_var_uint(bytes, &mut pos)? as u32;
            let state = read_var_string(bytes, &mut pos)?;

            let stored_clock = self.entries.get(&client_id).map(|e| e.clock);
            let accept = match stored_clock {
                Some(stored) => clock > stored,
                None => true,
            };
            if !accept {
                continue;
            }

            if state.is_empty() {
                self.entries.remove(&client_id);
                accepted.push((client_id, clock, None));
            } else {
                self.entries.insert(
                    client_id,
                    Entry { clock, state: Some(state.clone()), last_seen: Instant::now() },
                );
                accepted.push((client_id, clock, Some(state)));
            }
        }

        Ok(encode_entries(&accepted))
    }

    /// Bumps each id's clock and removes it, returning an update suitable
    /// for broadcast.
    pub fn remove_states(&mut self, ids: &[u64]) -> Vec<u8> {
        let mut accepted = Vec::new();
        for &id in ids {
            let next_clock = self.entries.get(&id).map(|e| e.clock + 1).unwrap_or(1);
            self.entries.remove(&id);
            accepted.push((id, next_clock, None));
        }
        encode_entries(&accepted)
    }

    /// Encodes every currently-tracked entry.
    pub fn get_states(&self) -> Vec<u8> {
        let entries: Vec<_> = self
            .entries
            .iter()
            .map(|(&id, e)| (id, e.clock, e.state.clone()))
            .collect();
        encode_entries(&entries)
    }

    /// Removes entries whose `last_seen` is strictly older than `timeout`
    /// ago (adopted boundary resolution: "strictly greater than timeout",
    /// not "at least"), returning a removal update if anything expired.
    pub fn sweep_expired(&mut self, timeout: Duration) -> Option<Vec<u8>> {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_seen) > timeout)
            .map(|(&id, _)| id)
            .collect();
        if expired.is_empty() {
            None
        } else {
            Some(self.remove_states(&expired))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn encode_entries(entries: &[(u64, u32, Option<String>)]) -> Vec<u8> {
    let mut out = Vec::new();
    write_var_uint(&mut out, entries.len() as u64);
    for (client_id, clock, state) in entries {
        write_var_uint(&mut out, *client_id);
        write_var_uint(&mut out, *clock as u64);
        write_var_string(&mut out, state.as_deref().unwrap_or(""));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(entries: &[(u64, u32, Option<&str>)]) -> Vec<u8> {
        let owned: Vec<_> = entries.iter().map(|(id, clock, s)| (*id, *clock, s.map(str::to_string))).collect();
        encode_entries(&owned)
    }

    #[test]
    fn stale_clock_is_rejected() {
        let mut aw = Awareness::new();
        aw.apply_update(&update(&[(1, 3, Some(r#"{"cursor":5}"#))])).unwrap();
        aw.apply_update(&update(&[(1, 2, Some(r#"{"cursor":9}"#))])).unwrap();

        let states = aw.get_states();
        let mut pos = 0;
        let count = read_var_uint(&states, &mut pos).unwrap();
        assert_eq!(count, 1);
        let _client = read_var_uint(&states, &mut pos).unwrap();
        let _clock = read_var_uint(&states, &mut pos).unwrap();
        let state = read_var_string(&states, &mut pos).unwrap();
        assert_eq!(state, r#"{"cursor":5}"#);
    }

    #[test]
    fn empty_state_removes_entry() {
        let mut aw = Awareness::new();
        aw.apply_update(&update(&[(7, 1, Some("x"))])).unwrap();
        assert!(!aw.is_empty());
        aw.apply_update(&update(&[(7, 2, Some(""))])).unwrap();
        assert!(aw.is_empty());
    }

    #[test]
    fn sweep_removes_only_entries_strictly_older_than_timeout() {
        let mut aw = Awareness::new();
        aw.apply_update(&update(&[(1, 1, Some("x"))])).unwrap();
        assert!(aw.sweep_expired(Duration::from_secs(30)).is_none());
        assert!(aw.sweep_expired(Duration::from_millis(0)).is_some());
    }

    #[test]
    fn remove_states_bumps_clock_past_whatever_was_stored() {
        let mut aw = Awareness::new();
        aw.apply_update(&update(&[(1, 5, Some("x"))])).unwrap();
        let removal = aw.remove_states(&[1]);
        let mut pos = 0;
        read_var_uint(&removal, &mut pos).unwrap();
        read_var_uint(&removal, &mut pos).unwrap();
        let clock = read_var_uint(&removal, &mut pos).unwrap();
        assert!(clock > 5);
        assert!(aw.is_empty());
    }
}
