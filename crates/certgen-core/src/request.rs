//! Inbound wire types for `pdf.batch.requested`.
//!
//! The `qr` and `qr_pdf` fields arrive as ordered arrays of single-key
//! objects (`[{"base_url": …}, {"verify_code": …}]`). That shape is kept on
//! the wire for compatibility; at ingress it is parsed into typed records
//! with last-occurrence-wins semantics, and can be serialized back without
//! loss.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::batch::{BatchItem, ErrorCode, ItemStatus, Stage};

/// One `{key, value}` placeholder pair.
///
/// The key becomes the literal token `{{key}}` in the template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    pub key: String,
    pub value: String,
}

impl Placeholder {
    /// The literal token searched for in the template text.
    #[must_use]
    pub fn token(&self) -> String {
        format!("{{{{{}}}}}", self.key)
    }
}

/// Ordered sequence of single-key objects, as found on the wire.
pub type KvEntries = Vec<Map<String, Value>>;

/// Inbound batch request payload.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub pdf_job_id: Option<Uuid>,
    #[serde(default)]
    pub items: Vec<ItemRequest>,
}

/// One certificate specification inside a batch request.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemRequest {
    pub user_id: Uuid,
    pub template_id: Uuid,
    pub serial_code: String,
    #[serde(default = "default_is_public")]
    pub is_public: bool,
    #[serde(default)]
    pub pdf: Vec<Placeholder>,
    #[serde(default)]
    pub qr: KvEntries,
    #[serde(default)]
    pub qr_pdf: KvEntries,
}

const fn default_is_public() -> bool {
    true
}

impl ItemRequest {
    /// Mint an item id and build the tracked item.
    ///
    /// A malformed placement value (e.g. an unparseable `qr_rect`) produces
    /// an item that is already failed at the `qr_insertion` stage; the
    /// orchestrator counts it without running the pipeline.
    #[must_use]
    pub fn into_item(self) -> BatchItem {
        let qr = QrConfig::from_entries(&self.qr);
        let (placement, placement_err) = match QrPlacement::from_entries(&self.qr_pdf) {
            Ok(placement) => (placement, None),
            Err(message) => (QrPlacement::default(), Some(message)),
        };
        let mut item = BatchItem {
            item_id: Uuid::new_v4(),
            user_id: self.user_id,
            template_id: self.template_id,
            serial_code: self.serial_code,
            is_public: self.is_public,
            placeholders: self.pdf,
            qr,
            placement,
            status: ItemStatus::Pending,
            progress_pct: 0,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        if let Some(message) = placement_err {
            item.fail(Stage::QrInsertion, Some(ErrorCode::InsertError), message);
        }
        item
    }
}

/// QR content configuration. Empty fields are rejected at the
/// `qr_generation` stage, not at ingress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrConfig {
    pub base_url: String,
    pub verify_code: String,
}

impl QrConfig {
    /// Parse from the wire shape; the last occurrence of a key wins.
    #[must_use]
    pub fn from_entries(entries: &[Map<String, Value>]) -> Self {
        Self {
            base_url: last_string(entries, "base_url").unwrap_or_default(),
            verify_code: last_string(entries, "verify_code").unwrap_or_default(),
        }
    }

    /// Serialize back to the wire shape.
    #[must_use]
    pub fn to_entries(&self) -> KvEntries {
        vec![
            single_entry("base_url", &self.base_url),
            single_entry("verify_code", &self.verify_code),
        ]
    }
}

/// Explicit stamp rectangle in points, `(x0, y0, x1, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QrRect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl QrRect {
    /// Parse `"x0,y0,x1,y1"`, with or without surrounding brackets.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut s = raw.trim();
        if s.starts_with('[') && s.ends_with(']') {
            s = &s[1..s.len() - 1];
        }
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!("qr_rect must have 4 values (x0,y0,x1,y1), got {raw:?}"));
        }
        let mut values = [0.0f64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| format!("qr_rect value {part:?} is not a number"))?;
        }
        Ok(Self {
            x0: values[0],
            y0: values[1],
            x1: values[2],
            y1: values[3],
        })
    }

    #[must_use]
    pub fn to_wire(&self) -> String {
        format!("{},{},{},{}", self.x0, self.y0, self.x1, self.y1)
    }
}

/// QR placement specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrPlacement {
    pub size_cm: f64,
    pub margin_y_cm: f64,
    pub page_index: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rect: Option<QrRect>,
}

impl Default for QrPlacement {
    fn default() -> Self {
        Self {
            size_cm: 2.5,
            margin_y_cm: 1.0,
            page_index: 0,
            rect: None,
        }
    }
}

impl QrPlacement {
    /// Parse from the wire shape; the last occurrence of a key wins, absent
    /// keys take defaults, present-but-malformed values are an error.
    pub fn from_entries(entries: &[Map<String, Value>]) -> Result<Self, String> {
        let size_cm = parse_number(entries, "qr_size_cm", 2.5)?;
        let margin_y_cm = parse_number(entries, "qr_margin_y_cm", 1.0)?;
        let page = parse_number(entries, "qr_page", 0.0)?;
        if page < 0.0 || page.fract() != 0.0 {
            return Err(format!("qr_page must be a non-negative integer, got {page}"));
        }
        let rect = match last_string(entries, "qr_rect") {
            Some(raw) => Some(QrRect::parse(&raw)?),
            None => None,
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let page_index = page as usize;
        Ok(Self {
            size_cm,
            margin_y_cm,
            page_index,
            rect,
        })
    }

    /// Serialize back to the wire shape.
    #[must_use]
    pub fn to_entries(&self) -> KvEntries {
        let mut out = vec![
            single_entry("qr_size_cm", &format_number(self.size_cm)),
            single_entry("qr_margin_y_cm", &format_number(self.margin_y_cm)),
            single_entry("qr_page", &self.page_index.to_string()),
        ];
        if let Some(rect) = &self.rect {
            out.push(single_entry("qr_rect", &rect.to_wire()));
        }
        out
    }
}

/// Last non-null occurrence of `key` across the entries, rendered as a
/// trimmed string. Empty strings count as absent.
fn last_string(entries: &[Map<String, Value>], key: &str) -> Option<String> {
    entries
        .iter()
        .rev()
        .find_map(|entry| entry.get(key))
        .and_then(|value| match value {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
}

fn parse_number(entries: &[Map<String, Value>], key: &str, default: f64) -> Result<f64, String> {
    match last_string(entries, key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("{key} value {raw:?} is not a number")),
    }
}

fn format_number(value: f64) -> String {
    format!("{value}")
}

fn single_entry(key: &str, value: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), Value::String(value.to_string()));
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entries(value: Value) -> KvEntries {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn qr_config_last_occurrence_wins() {
        let raw = entries(json!([
            {"base_url": "https://old.example"},
            {"verify_code": "A-1"},
            {"base_url": "https://new.example"}
        ]));
        let config = QrConfig::from_entries(&raw);
        assert_eq!(config.base_url, "https://new.example");
        assert_eq!(config.verify_code, "A-1");
    }

    #[test]
    fn qr_config_round_trip() {
        let config = QrConfig {
            base_url: "https://verify.example/v".to_string(),
            verify_code: "CERT-42".to_string(),
        };
        assert_eq!(QrConfig::from_entries(&config.to_entries()), config);
    }

    #[test]
    fn placement_defaults_when_absent() {
        let placement = QrPlacement::from_entries(&[]).unwrap();
        assert_eq!(placement, QrPlacement::default());
        assert!((placement.size_cm - 2.5).abs() < f64::EPSILON);
        assert!((placement.margin_y_cm - 1.0).abs() < f64::EPSILON);
        assert_eq!(placement.page_index, 0);
        assert!(placement.rect.is_none());
    }

    #[test]
    fn placement_round_trip_with_rect() {
        let placement = QrPlacement {
            size_cm: 3.0,
            margin_y_cm: 1.5,
            page_index: 2,
            rect: Some(QrRect {
                x0: 460.0,
                y0: 40.0,
                x1: 540.0,
                y1: 120.0,
            }),
        };
        let wire = placement.to_entries();
        assert_eq!(QrPlacement::from_entries(&wire).unwrap(), placement);
    }

    #[test]
    fn placement_round_trip_without_rect() {
        let placement = QrPlacement::default();
        let wire = placement.to_entries();
        assert_eq!(QrPlacement::from_entries(&wire).unwrap(), placement);
    }

    #[test]
    fn rect_accepts_brackets() {
        let rect = QrRect::parse("[460, 40, 540, 120]").unwrap();
        assert!((rect.x0 - 460.0).abs() < f64::EPSILON);
        assert!((rect.y1 - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rect_rejects_wrong_arity_and_garbage() {
        assert!(QrRect::parse("1,2,3").is_err());
        assert!(QrRect::parse("a,b,c,d").is_err());
    }

    #[test]
    fn malformed_rect_pre_fails_item_at_insertion() {
        let request: ItemRequest = serde_json::from_value(json!({
            "user_id": Uuid::new_v4(),
            "template_id": Uuid::new_v4(),
            "serial_code": "C-9",
            "qr": [{"base_url": "https://v"}, {"verify_code": "C-9"}],
            "qr_pdf": [{"qr_rect": "not,a,rect"}]
        }))
        .unwrap();
        let item = request.into_item();
        assert_eq!(item.status, ItemStatus::Failed);
        let err = item.error.expect("placement error");
        assert_eq!(err.stage, Stage::QrInsertion);
        assert_eq!(err.code, Some(ErrorCode::InsertError));
    }

    #[test]
    fn numeric_wire_values_are_accepted() {
        let raw = entries(json!([{"qr_size_cm": 3}, {"qr_page": "1"}]));
        let placement = QrPlacement::from_entries(&raw).unwrap();
        assert!((placement.size_cm - 3.0).abs() < f64::EPSILON);
        assert_eq!(placement.page_index, 1);
    }

    #[test]
    fn placeholder_token_shape() {
        let ph = Placeholder {
            key: "nombre_participante".to_string(),
            value: "ANA".to_string(),
        };
        assert_eq!(ph.token(), "{{nombre_participante}}");
    }

    #[test]
    fn batch_request_tolerates_missing_fields() {
        let request: BatchRequest = serde_json::from_value(json!({})).unwrap();
        assert!(request.pdf_job_id.is_none());
        assert!(request.items.is_empty());
    }
}
