//! Value conversion between engine type systems.
//!
//! [`convert_value`] is a total function: every (value, semantic type) pair
//! produces a target-ready value, and unrecognized pairings pass through
//! unchanged rather than failing. Conversion is deterministic and does not
//! touch the environment, so the whole rule matrix is unit-tested here.

use std::borrow::Cow;

use chrono::Utc;

use crate::config::EngineKind;
use crate::core::schema::SemanticType;
use crate::core::value::{Row, SqlValue};

/// What the target engine can represent natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetCaps {
    /// Target has a real boolean type; otherwise booleans become 0/1.
    pub native_bool: bool,
    /// Target preserves timezone information on timestamps; otherwise
    /// timestamps are rendered as naive text in UTC.
    pub tz_fidelity: bool,
}

impl TargetCaps {
    pub fn for_engine(engine: EngineKind) -> Self {
        match engine {
            EngineKind::Postgres => Self {
                native_bool: true,
                tz_fidelity: true,
            },
            EngineKind::Mysql => Self {
                native_bool: false,
                tz_fidelity: false,
            },
        }
    }
}

/// Convert one value for the target engine.
///
/// Null maps to null for every semantic type. Values already in the target
/// shape pass through untouched.
pub fn convert_value(
    value: SqlValue<'static>,
    semantic: SemanticType,
    caps: &TargetCaps,
) -> SqlValue<'static> {
    if value.is_null() {
        return SqlValue::Null;
    }

    match semantic {
        SemanticType::Uuid => match value {
            SqlValue::Uuid(u) => SqlValue::Text(Cow::Owned(u.to_string())),
            // textual uuids are re-canonicalized when they parse
            SqlValue::Text(s) => match uuid::Uuid::parse_str(s.trim()) {
                Ok(u) => SqlValue::Text(Cow::Owned(u.to_string())),
                Err(_) => SqlValue::Text(s),
            },
            other => other,
        },

        SemanticType::Binary => match value {
            SqlValue::Bytes(b) => SqlValue::Text(Cow::Owned(hex::encode(b.as_ref()))),
            other => other,
        },

        // structured values serialize to compact JSON text; values that
        // arrive already textual pass through unchanged
        SemanticType::Json | SemanticType::Array => match value {
            SqlValue::Json(j) => SqlValue::Text(Cow::Owned(j.to_string())),
            other => other,
        },

        SemanticType::Boolean => {
            // engines that store bool as a small int normalize the same way
            let b = match value {
                SqlValue::Bool(b) => b,
                SqlValue::I16(i) => i != 0,
                SqlValue::I32(i) => i != 0,
                SqlValue::I64(i) => i != 0,
                other => return other,
            };
            if caps.native_bool {
                SqlValue::Bool(b)
            } else {
                SqlValue::I16(i16::from(b))
            }
        }

        // readers surface enum values as their label text already
        SemanticType::Enum => value,

        SemanticType::Timestamp => {
            if caps.tz_fidelity {
                return value;
            }
            match value {
                SqlValue::DateTime(dt) => {
                    SqlValue::Text(Cow::Owned(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
                }
                // offsets normalize to UTC before rendering, so the same
                // instant always produces the same text
                SqlValue::DateTimeOffset(dt) => SqlValue::Text(Cow::Owned(
                    dt.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S").to_string(),
                )),
                other => other,
            }
        }

        // integers, decimals and text need no transformation
        SemanticType::Integer | SemanticType::Decimal | SemanticType::Text => value,
    }
}

/// Convert a whole row using the per-column semantic types.
///
/// Cells beyond the semantic list pass through unchanged.
pub fn convert_row(row: Row, semantics: &[SemanticType], caps: &TargetCaps) -> Row {
    row.into_iter()
        .enumerate()
        .map(|(i, value)| match semantics.get(i) {
            Some(semantic) => convert_value(value, *semantic, caps),
            None => value,
        })
        .collect()
}
