//! The envelope sanitizer: normalizes broker field types (numeric fields
//! delivered as strings, payloads delivered as encoded text) into a
//! canonical shape prior to handler dispatch.
//!
//! This is the sole place such coercion happens — everything downstream
//! may assume canonical types. The sanitizer never fails: every branch
//! produces a well-typed result.

use std::collections::HashMap;

use serde_json::Value;

/// Raw field map as decoded straight off the broker (string keys, string
/// values — byte fields are UTF-8 lossily decoded before reaching here).
pub type FieldMap = HashMap<String, String>;

/// The canonical, post-sanitization envelope. All downstream code
/// (parsers, handlers) consumes this instead of the raw field map.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// `msg_type` / `typ` / `event_type`, first non-empty wins. Empty
    /// string if none were present.
    pub event_type: String,
    /// `cause` / `id` / `event_id`, first non-empty wins, else the
    /// broker entry id. Human-facing correlation id only — never used
    /// for dedup.
    pub correlation_id: String,
    /// Sanitized `c_seq`: integer, defaulted to 0 on empty/non-numeric.
    pub c_seq: i64,
    /// Sanitized `seq`: same coercion rules as `c_seq`.
    pub seq: i64,
    /// Sanitized `rec`: always a list, decoded from encoded text when
    /// possible.
    pub rec: Vec<Value>,
    /// Sanitized `dat`: decoded from text when the text parses as
    /// structured data, otherwise left as the raw string.
    pub dat: Value,
    /// The full set of original string fields, for parsers that need
    /// fields beyond the ones promoted above (e.g. `conv`).
    pub fields: FieldMap,
}

/// Derive `event_type` as the first non-empty of `msg_type`, `typ`,
/// `event_type`. If all are empty or absent, returns the empty string —
/// dispatch will then find no handler for it.
pub fn derive_event_type(fields: &FieldMap) -> String {
    for key in ["msg_type", "typ", "event_type"] {
        if let Some(value) = fields.get(key) {
            if !value.is_empty() {
                return value.clone();
            }
        }
    }
    String::new()
}

/// Sanitize a raw field map into a canonical [`Envelope`]. Never fails.
pub fn sanitize_envelope(fields: FieldMap, entry_id: &str) -> Envelope {
    let event_type = derive_event_type(&fields);
    let correlation_id = ["cause", "id", "event_id"]
        .into_iter()
        .find_map(|key| fields.get(key).filter(|v| !v.is_empty()).cloned())
        .unwrap_or_else(|| entry_id.to_string());

    let c_seq = coerce_int(fields.get("c_seq"));
    let seq = coerce_int(fields.get("seq"));
    let rec = coerce_rec(fields.get("rec"));
    let dat = coerce_dat(fields.get("dat"));

    Envelope {
        event_type,
        correlation_id,
        c_seq,
        seq,
        rec,
        dat,
        fields,
    }
}

fn coerce_int(raw: Option<&String>) -> i64 {
    match raw {
        None => 0,
        Some(text) if text.is_empty() => 0,
        Some(text) => text.trim().parse::<i64>().unwrap_or(0),
    }
}

fn coerce_rec(raw: Option<&String>) -> Vec<Value> {
    match raw {
        None => Vec::new(),
        Some(text) if text.is_empty() => Vec::new(),
        Some(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => items,
            Ok(other) => vec![other],
            Err(_) => vec![Value::String(text.clone())],
        },
    }
}

fn coerce_dat(raw: Option<&String>) -> Value {
    match raw {
        None => Value::Null,
        Some(text) if text.is_empty() => Value::Null,
        Some(text) => serde_json::from_str::<Value>(text).unwrap_or_else(|_| Value::String(text.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn c_seq_empty_absent_and_non_numeric_all_yield_zero() {
        assert_eq!(coerce_int(None), 0);
        assert_eq!(coerce_int(Some(&"".to_string())), 0);
        assert_eq!(coerce_int(Some(&"not-a-number".to_string())), 0);
        assert_eq!(coerce_int(Some(&"7".to_string())), 7);
    }

    #[test]
    fn rec_empty_string_yields_empty_list() {
        assert_eq!(coerce_rec(Some(&"".to_string())), Vec::<Value>::new());
    }

    #[test]
    fn rec_non_json_text_wraps_as_single_element() {
        assert_eq!(
            coerce_rec(Some(&"plain-text".to_string())),
            vec![Value::String("plain-text".to_string())]
        );
    }

    #[test]
    fn rec_json_array_text_is_parsed() {
        assert_eq!(
            coerce_rec(Some(&"[1,2,3]".to_string())),
            vec![Value::from(1), Value::from(2), Value::from(3)]
        );
    }

    #[test]
    fn dat_structured_text_is_decoded() {
        let dat = coerce_dat(Some(&"{\"id\":1}".to_string()));
        assert_eq!(dat, serde_json::json!({"id": 1}));
    }

    #[test]
    fn dat_unparsable_text_is_left_unchanged() {
        let dat = coerce_dat(Some(&"not json".to_string()));
        assert_eq!(dat, Value::String("not json".to_string()));
    }

    #[test]
    fn event_type_prefers_msg_type_over_typ_and_event_type() {
        let fields = fields(&[("typ", "ignored"), ("msg_type", "account.created")]);
        assert_eq!(derive_event_type(&fields), "account.created");
    }

    #[test]
    fn event_type_falls_back_through_the_chain() {
        let fields = fields(&[("event_type", "payment.settled")]);
        assert_eq!(derive_event_type(&fields), "payment.settled");
    }

    #[test]
    fn event_type_defaults_to_empty_string() {
        assert_eq!(derive_event_type(&FieldMap::new()), "");
    }

    #[test]
    fn correlation_id_falls_back_to_entry_id() {
        let env = sanitize_envelope(FieldMap::new(), "1700000000000-0");
        assert_eq!(env.correlation_id, "1700000000000-0");
    }

    #[test]
    fn sanitizing_an_already_canonical_envelope_is_a_no_op() {
        let fields = fields(&[
            ("msg_type", "account.created"),
            ("c_seq", "7"),
            ("seq", "1"),
            ("rec", "[1,2]"),
            ("dat", "{\"id\":1}"),
            ("id", "corr-1"),
        ]);
        let first = sanitize_envelope(fields.clone(), "entry-1");
        let second = sanitize_envelope(fields, "entry-1");
        assert_eq!(first, second);
    }

    #[test]
    fn happy_path_envelope_has_typed_c_seq_and_structured_dat() {
        let fields = fields(&[
            ("msg_type", "account.created"),
            ("c_seq", "7"),
            ("dat", "{\"id\":1}"),
        ]);
        let env = sanitize_envelope(fields, "entry-1");
        assert_eq!(env.c_seq, 7);
        assert_eq!(env.dat, serde_json::json!({"id": 1}));
    }

    proptest::proptest! {
        // Sanitizer totality (§8): no combination of arbitrary raw string
        // values for the coerced fields can make the sanitizer panic, and
        // c_seq/seq always land on a well-typed i64.
        #[test]
        fn sanitizer_never_panics_on_arbitrary_input(
            c_seq in ".{0,16}",
            seq in ".{0,16}",
            rec in ".{0,32}",
            dat in ".{0,32}",
        ) {
            let fields = fields(&[
                ("c_seq", &c_seq),
                ("seq", &seq),
                ("rec", &rec),
                ("dat", &dat),
            ]);
            let env = sanitize_envelope(fields, "entry-1");
            let _: i64 = env.c_seq;
            let _: i64 = env.seq;
        }
    }
}
