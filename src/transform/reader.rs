//! Streaming record reader for page files
//!
//! A page file holds one JSON value wrapping an array of records, e.g.
//! `{"users": [ {...}, {...} ], "totalRecords": 2}`. The reader walks the
//! top-level structure with a streaming deserializer and hands each element of
//! the first top-level array to a callback as an owned [`Value`], so only one
//! record is materialized at a time. Other top-level members are skipped.
//! A bare top-level array is accepted as well.

use std::cell::RefCell;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};

/// Stream the records of a page file through `on_record`
///
/// Returns the number of records delivered.
pub fn for_each_record<F>(path: &Path, on_record: F) -> SyncResult<usize>
where
    F: FnMut(Value) -> SyncResult<()>,
{
    let file = File::open(path)?;
    read_records(BufReader::new(file), on_record).map_err(|e| match e {
        SyncError::Json(e) => SyncError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        },
        other => other,
    })
}

/// Stream the records of any reader through `on_record`
pub fn read_records<R, F>(reader: R, on_record: F) -> SyncResult<usize>
where
    R: Read,
    F: FnMut(Value) -> SyncResult<()>,
{
    let state = RefCell::new(StreamState {
        on_record,
        failure: None,
        count: 0,
        found: false,
    });

    let mut de = serde_json::Deserializer::from_reader(reader);
    let parsed = de.deserialize_any(TopLevel { state: &state });

    let mut state = state.into_inner();
    if let Some(failure) = state.failure.take() {
        return Err(failure);
    }
    parsed?;
    de.end()?;
    Ok(state.count)
}

struct StreamState<F> {
    on_record: F,
    /// Error raised by the callback; takes precedence over the parser error it causes
    failure: Option<SyncError>,
    count: usize,
    found: bool,
}

impl<F> StreamState<F>
where
    F: FnMut(Value) -> SyncResult<()>,
{
    fn deliver(&mut self, record: Value) -> Result<(), String> {
        self.count += 1;
        match (self.on_record)(record) {
            Ok(()) => Ok(()),
            Err(e) => {
                let message = e.to_string();
                self.failure = Some(e);
                Err(message)
            }
        }
    }
}

/// Visitor for the outermost JSON value
struct TopLevel<'s, F> {
    state: &'s RefCell<StreamState<F>>,
}

impl<'de, F> Visitor<'de> for TopLevel<'_, F>
where
    F: FnMut(Value) -> SyncResult<()>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object wrapping an array of records")
    }

    fn visit_map<A>(self, mut map: A) -> Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        while map.next_key::<IgnoredAny>()?.is_some() {
            if self.state.borrow().found {
                map.next_value::<IgnoredAny>()?;
            } else {
                map.next_value_seed(Member { state: self.state })?;
            }
        }
        Ok(())
    }

    fn visit_seq<A>(self, seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        Member { state: self.state }.visit_seq(seq)
    }
}

/// Seed for one top-level member: records if it is an array, skipped otherwise
struct Member<'s, F> {
    state: &'s RefCell<StreamState<F>>,
}

impl<'de, F> DeserializeSeed<'de> for Member<'_, F>
where
    F: FnMut(Value) -> SyncResult<()>,
{
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }
}

impl<'de, F> Visitor<'de> for Member<'_, F>
where
    F: FnMut(Value) -> SyncResult<()>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        self.state.borrow_mut().found = true;
        while let Some(record) = seq.next_element::<Value>()? {
            self.state
                .borrow_mut()
                .deliver(record)
                .map_err(de::Error::custom)?;
        }
        Ok(())
    }

    fn visit_map<A>(self, mut map: A) -> Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
        Ok(())
    }

    fn visit_bool<E: de::Error>(self, _v: bool) -> Result<(), E> {
        Ok(())
    }

    fn visit_i64<E: de::Error>(self, _v: i64) -> Result<(), E> {
        Ok(())
    }

    fn visit_u64<E: de::Error>(self, _v: u64) -> Result<(), E> {
        Ok(())
    }

    fn visit_f64<E: de::Error>(self, _v: f64) -> Result<(), E> {
        Ok(())
    }

    fn visit_str<E: de::Error>(self, _v: &str) -> Result<(), E> {
        Ok(())
    }

    fn visit_unit<E: de::Error>(self) -> Result<(), E> {
        Ok(())
    }

    fn visit_none<E: de::Error>(self) -> Result<(), E> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(json: &str) -> SyncResult<Vec<Value>> {
        let mut records = Vec::new();
        read_records(json.as_bytes(), |r| {
            records.push(r);
            Ok(())
        })?;
        Ok(records)
    }

    #[test]
    fn test_reads_first_top_level_array() {
        let records = collect(
            r#"{"totalRecords": 2, "users": [{"id": "a"}, {"id": "b"}], "other": [{"id": "c"}]}"#,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["id"], "b");
    }

    #[test]
    fn test_skips_nested_arrays_in_other_members() {
        let records =
            collect(r#"{"meta": {"list": [1, 2]}, "items": [{"id": "x"}]}"#).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], "x");
    }

    #[test]
    fn test_empty_array() {
        assert!(collect(r#"{"users": [], "totalRecords": 0}"#).unwrap().is_empty());
    }

    #[test]
    fn test_bare_array() {
        assert_eq!(collect(r#"[{"id": "a"}]"#).unwrap().len(), 1);
    }

    #[test]
    fn test_callback_error_propagates() {
        let result = read_records(r#"{"r": [{"id": 1}]}"#.as_bytes(), |_| {
            Err(SyncError::MissingId {
                table: "t".to_string(),
            })
        });
        assert!(matches!(result, Err(SyncError::MissingId { .. })));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            collect(r#"{"users": [{"id": "a"}"#),
            Err(SyncError::Json(_))
        ));
    }
}
