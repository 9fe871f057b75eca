//! Output formatting for sessions, routes and sector trailers

use clap::ValueEnum;
use kiosk_common::trailer::{AccessBitsError, AccessConditions};
use kiosk_common::Block;
use kiosk_nfc::CardSession;
use serde_json::{json, Value};

use crate::routing::Route;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FormatMode {
    /// Human-readable formatted output
    Human,
    /// One JSON object per line
    Json,
}

pub fn session_json(session: &CardSession, route: Option<&Route>) -> Value {
    json!({
        "uid": session.uid.to_string(),
        "token": session.token,
        "cvc": session.cvc,
        "fault": session.fault.as_ref().map(|f| f.to_string()),
        "route": route.map(|r| r.to_string()),
    })
}

/// Render a tapped card, with the routing decision when there is one
pub fn format_session(session: &CardSession, route: Option<&Route>, mode: FormatMode) -> String {
    if mode == FormatMode::Json {
        return session_json(session, route).to_string();
    }

    let mut lines = vec![format!("Card {}", session.uid)];
    match (&session.fault, session.credentials()) {
        (Some(fault), _) => lines.push(format!("  Read failed: {}", fault)),
        (None, Some((token, cvc))) => {
            lines.push(format!("  Token: {}", token));
            lines.push(format!("  CVC:   {}", cvc));
        }
        (None, None) => lines.push("  No credentials on card".to_string()),
    }
    if let Some(route) = route {
        lines.push(format!("  Route: {}", route));
    }
    lines.join("\n")
}

/// Render a sector trailer: key B, access bytes and per-block conditions
///
/// Key A is never readable and shows as zeros on a real card.
pub fn format_trailer(sector: u8, trailer: &Block, mode: FormatMode) -> String {
    let conditions = AccessConditions::from_trailer(trailer);

    if mode == FormatMode::Json {
        return trailer_json(sector, trailer, &conditions).to_string();
    }

    let mut lines = vec![
        format!("Sector {}", sector),
        format!("  Key A:       {}", hex::encode_upper(&trailer[0..6])),
        format!("  Access bits: {}", hex::encode_upper(&trailer[6..10])),
        format!("  Key B:       {}", hex::encode_upper(&trailer[10..16])),
    ];
    match conditions {
        Ok(conditions) => {
            for index in 0..4u8 {
                let label = if index == 3 { "trailer" } else { "data" };
                lines.push(format!(
                    "  Block {} ({}): C1C2C3 = {}",
                    sector * 4 + index,
                    label,
                    conditions.block(index)
                ));
            }
            if conditions.is_factory() {
                lines.push("  Transport configuration (factory)".to_string());
            }
        }
        Err(err) => lines.push(format!("  WARNING: {}", err)),
    }
    lines.join("\n")
}

fn trailer_json(
    sector: u8,
    trailer: &Block,
    conditions: &Result<AccessConditions, AccessBitsError>,
) -> Value {
    let blocks: Vec<Value> = match conditions {
        Ok(conditions) => (0..4u8)
            .map(|index| Value::String(conditions.block(index).to_string()))
            .collect(),
        Err(_) => Vec::new(),
    };

    json!({
        "sector": sector,
        "key_a": hex::encode_upper(&trailer[0..6]),
        "access_bits": hex::encode_upper(&trailer[6..10]),
        "key_b": hex::encode_upper(&trailer[10..16]),
        "conditions": blocks,
        "factory": conditions.as_ref().map(|c| c.is_factory()).unwrap_or(false),
        "error": conditions.as_ref().err().map(|e| e.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_common::trailer::FACTORY_TRAILER;
    use kiosk_nfc::{SessionFault, Uid};

    fn uid() -> Uid {
        Uid::new(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap()
    }

    #[test]
    fn test_human_session() {
        let session = CardSession::complete(uid(), "100".into(), "200".into());
        let text = format_session(&session, Some(&Route::Register), FormatMode::Human);
        assert_eq!(
            text,
            "Card DEADBEEF\n  Token: 100\n  CVC:   200\n  Route: register"
        );
    }

    #[test]
    fn test_json_failed_session() {
        let session = CardSession::failed(uid(), SessionFault::Unreadable(5));
        let value: Value =
            serde_json::from_str(&format_session(&session, None, FormatMode::Json)).unwrap();
        assert_eq!(value["uid"], "DEADBEEF");
        assert_eq!(value["token"], Value::Null);
        assert_eq!(value["fault"], "address 5 unreadable");
    }

    #[test]
    fn test_factory_trailer() {
        let text = format_trailer(1, &FACTORY_TRAILER, FormatMode::Human);
        assert!(text.contains("Access bits: FF078069"));
        assert!(text.contains("Block 7 (trailer): C1C2C3 = 001"));
        assert!(text.contains("factory"));
    }

    #[test]
    fn test_corrupted_trailer_json() {
        let mut trailer = FACTORY_TRAILER;
        trailer[6] = 0x00;
        let value = trailer_json(2, &trailer, &AccessConditions::from_trailer(&trailer));
        assert_eq!(value["factory"], false);
        assert!(value["error"].as_str().unwrap().contains("complement"));
    }
}
