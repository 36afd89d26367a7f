//! Parsed-event shapes and the event-parser collaborator.
//!
//! Selection is by event-type *prefix* — distinct from the handler
//! registry's exact-string-match lookup (§4.5). This distinction matters:
//! two sibling event types sharing a prefix (`account.created`,
//! `account.closed`) share a parser but are dispatched to different
//! handlers.

use serde_json::Value;

use super::envelope::Envelope;

/// An `account.*` / `payment.*` event, parsed into its native shape.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountEvent {
    /// The original event-type string.
    pub event_type: String,
    /// Human-facing correlation id.
    pub correlation_id: String,
    /// Sanitized `c_seq`.
    pub c_seq: i64,
    /// Sanitized payload.
    pub payload: Value,
}

/// The tagged variant passed opaquely to handlers. A synthesized
/// polymorphic object in the source becomes this typed enum.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    /// `account.*` / `payment.*` events.
    Account(AccountEvent),
    /// `customer.*` / `application.*` events, wrapped with conversation
    /// and sequence metadata.
    Customer {
        /// The original event-type string.
        event_type: String,
        /// Conversation id, read from the `conv` field.
        conversation_id: String,
        /// Sanitized `seq`.
        sequence: i64,
        /// Sanitized payload.
        payload: Value,
    },
    /// Any other event type: the sanitized string map itself, with no
    /// dedicated parser applied.
    Raw(Envelope),
}

/// Select and apply the event-parser collaborator for `event_type`, by
/// prefix. Never used for handler lookup — that's always an exact match
/// (see [`crate::domain::handlers::HandlerRegistry`]).
pub fn parse_event(event_type: &str, envelope: Envelope) -> ParsedEvent {
    if event_type.starts_with("account.") || event_type.starts_with("payment.") {
        ParsedEvent::Account(AccountEvent {
            event_type: event_type.to_string(),
            correlation_id: envelope.correlation_id,
            c_seq: envelope.c_seq,
            payload: envelope.dat,
        })
    } else if event_type.starts_with("customer.") || event_type.starts_with("application.") {
        let conversation_id = envelope.fields.get("conv").cloned().unwrap_or_default();
        ParsedEvent::Customer {
            event_type: event_type.to_string(),
            conversation_id,
            sequence: envelope.seq,
            payload: envelope.dat,
        }
    } else {
        ParsedEvent::Raw(envelope)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::domain::envelope::sanitize_envelope;

    fn envelope(event_type: &str, extra: &[(&str, &str)]) -> Envelope {
        let mut fields: HashMap<String, String> = extra
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        fields.insert("msg_type".to_string(), event_type.to_string());
        sanitize_envelope(fields, "entry-1")
    }

    #[test]
    fn account_prefix_selects_account_parser() {
        let env = envelope("account.created", &[("c_seq", "7")]);
        match parse_event("account.created", env) {
            ParsedEvent::Account(account) => assert_eq!(account.c_seq, 7),
            other => panic!("expected Account, got {other:?}"),
        }
    }

    #[test]
    fn payment_prefix_also_selects_account_parser() {
        let env = envelope("payment.settled", &[]);
        assert!(matches!(parse_event("payment.settled", env), ParsedEvent::Account(_)));
    }

    #[test]
    fn customer_prefix_wraps_with_conversation_and_sequence() {
        let env = envelope("customer.updated", &[("conv", "conv-42"), ("seq", "3")]);
        match parse_event("customer.updated", env) {
            ParsedEvent::Customer {
                conversation_id,
                sequence,
                ..
            } => {
                assert_eq!(conversation_id, "conv-42");
                assert_eq!(sequence, 3);
            }
            other => panic!("expected Customer, got {other:?}"),
        }
    }

    #[test]
    fn application_prefix_also_selects_customer_parser() {
        let env = envelope("application.submitted", &[]);
        assert!(matches!(
            parse_event("application.submitted", env),
            ParsedEvent::Customer { .. }
        ));
    }

    #[test]
    fn unrecognized_prefix_yields_raw() {
        let env = envelope("internal.heartbeat", &[]);
        assert!(matches!(parse_event("internal.heartbeat", env), ParsedEvent::Raw(_)));
    }
}
