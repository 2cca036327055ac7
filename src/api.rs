use rusqlite::Connection;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::db::{self, CharacterProfile, SpellFilter, SpellView};

pub const MIN_LEVEL: i64 = 1;
pub const MAX_LEVEL: i64 = 20;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("level {0} outside 1-20")]
    LevelOutOfRange(i64),
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("no spell with id {0}")]
    UnknownSpell(i64),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
    #[error("storage task failed: {0}")]
    Task(String),
}

impl ApiError {
    /// Stable machine-readable code returned in `{"error": ...}`.
    pub fn code(&self) -> String {
        match self {
            ApiError::LevelOutOfRange(_) => "level_out_of_range".into(),
            ApiError::MissingField(field) => format!("missing_{}", field),
            ApiError::UnknownSpell(_) => "unknown_spell".into(),
            ApiError::Storage(_) | ApiError::Task(_) => "storage_error".into(),
        }
    }
}

// ── Request fields ──
//
// Bodies are read field by field: a field of an unexpected type only
// affects that field, the rest of the body still applies.

fn text_field(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integers, floats (truncated toward zero) and numeric strings.
fn int_field(v: Option<&Value>) -> Option<i64> {
    match v? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// JSON truthiness: null, false, 0, "" and empty containers are false.
fn truthy(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

// ── Character ──

#[derive(Debug, Default)]
pub struct CharacterUpdate {
    pub name: Option<String>,
    pub class_name: Option<String>,
    pub subclass: Option<String>,
    pub level: Option<i64>,
}

impl CharacterUpdate {
    /// Non-object bodies read as `{}`; an unparseable level counts as absent.
    pub fn from_json(body: &Value) -> Self {
        Self {
            name: text_field(body.get("name")),
            class_name: text_field(body.get("class_name")),
            subclass: text_field(body.get("subclass")),
            level: int_field(body.get("level")),
        }
    }

    /// Absent level stores 1; a parsed level outside 1–20 is rejected, never clamped.
    pub fn into_profile(self) -> Result<CharacterProfile, ApiError> {
        let level = match self.level {
            Some(l) if !(MIN_LEVEL..=MAX_LEVEL).contains(&l) => {
                return Err(ApiError::LevelOutOfRange(l))
            }
            Some(l) => l,
            None => MIN_LEVEL,
        };
        Ok(CharacterProfile {
            name: self.name,
            class_name: self.class_name,
            subclass: self.subclass,
            level,
        })
    }
}

pub fn get_character(conn: &Connection) -> Result<CharacterProfile, ApiError> {
    Ok(db::get_character(conn)?)
}

pub fn save_character(conn: &Connection, update: CharacterUpdate) -> Result<CharacterProfile, ApiError> {
    let profile = update.into_profile()?;
    db::update_character(conn, &profile)?;
    get_character(conn)
}

// ── Status ──

#[derive(Debug, Default)]
pub struct StatusUpdate {
    pub spell_id: Option<i64>,
    pub known: bool,
    pub prepared: bool,
    pub favorite: bool,
}

impl StatusUpdate {
    pub fn from_json(body: &Value) -> Self {
        Self {
            spell_id: int_field(body.get("spell_id")),
            known: truthy(body.get("known")),
            prepared: truthy(body.get("prepared")),
            favorite: truthy(body.get("favorite")),
        }
    }
}

pub fn save_status(conn: &Connection, update: StatusUpdate) -> Result<(), ApiError> {
    let spell_id = update
        .spell_id
        .filter(|id| *id != 0)
        .ok_or(ApiError::MissingField("spell_id"))?;
    if !db::spell_exists(conn, spell_id)? {
        return Err(ApiError::UnknownSpell(spell_id));
    }
    db::upsert_status(conn, spell_id, update.known, update.prepared, update.favorite)?;
    Ok(())
}

// ── Spells ──

/// Raw `GET /api/spells` query string. Values that do not parse are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct SpellQuery {
    pub q: Option<String>,
    pub level: Option<String>,
    pub class: Option<String>,
    pub school: Option<String>,
    pub ritual: Option<String>,
    pub concentration: Option<String>,
    pub component: Option<String>,
}

fn flag(raw: Option<&str>) -> Option<bool> {
    match raw? {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

impl From<SpellQuery> for SpellFilter {
    fn from(q: SpellQuery) -> Self {
        SpellFilter {
            level: q.level.as_deref().and_then(|l| l.trim().parse().ok()),
            ritual: flag(q.ritual.as_deref()),
            concentration: flag(q.concentration.as_deref()),
            component: q.component.as_deref().and_then(SpellFilter::component_letter),
            name: q.q,
            class: q.class,
            school: q.school,
        }
    }
}

pub fn list_spells(conn: &Connection, query: SpellQuery) -> Result<Vec<SpellView>, ApiError> {
    Ok(db::query_spells(conn, &SpellFilter::from(query))?)
}

// ── Tests ──
