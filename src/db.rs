use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::Serialize;
use tracing::info;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const TABLES: &[&str] = &["spells", "spell_status", "character_profile"];

/// Columns that may be missing from databases created by older schema
/// scripts. Only ever added, never dropped or renamed.
const REQUIRED_COLUMNS: &[(&str, &str, &str)] = &[
    ("spells", "name", "TEXT NOT NULL DEFAULT ''"),
    ("spells", "level", "INTEGER NOT NULL DEFAULT 0"),
    ("spells", "school", "TEXT"),
    ("spells", "ritual", "BOOLEAN NOT NULL DEFAULT 0"),
    ("spells", "concentration", "BOOLEAN NOT NULL DEFAULT 0"),
    ("spells", "casting_time", "TEXT"),
    ("spells", "range", "TEXT"),
    ("spells", "components", "TEXT"),
    ("spells", "material", "TEXT"),
    ("spells", "duration", "TEXT"),
    ("spells", "classes", "TEXT"),
    ("spells", "description", "TEXT"),
    ("spells", "higher_level", "TEXT"),
    ("spells", "source", "TEXT NOT NULL DEFAULT ''"),
    ("spell_status", "known", "BOOLEAN NOT NULL DEFAULT 0"),
    ("spell_status", "prepared", "BOOLEAN NOT NULL DEFAULT 0"),
    ("spell_status", "favorite", "BOOLEAN NOT NULL DEFAULT 0"),
    ("spell_status", "updated_at", "TEXT"),
    ("character_profile", "name", "TEXT"),
    ("character_profile", "class_name", "TEXT"),
    ("character_profile", "subclass", "TEXT"),
    ("character_profile", "level", "INTEGER NOT NULL DEFAULT 1"),
];

/// Open (creating if needed) the database at `path` and bring its schema up to date.
pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {:?}", dir))?;
    }
    open(path).with_context(|| format!("Failed to open {:?}", path))
}

/// Open an existing database location without touching the filesystem layout.
/// Used for short-lived, per-request connections.
pub fn open(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    let mut missing = Vec::new();
    for table in TABLES {
        if !table_exists(conn, table)? {
            missing.push(*table);
        }
    }
    if !missing.is_empty() {
        info!("Bootstrapping schema (missing tables: {})", missing.join(", "));
        conn.execute_batch(SCHEMA_SQL)?;
    }
    ensure_columns(conn)?;
    conn.execute(
        "INSERT OR IGNORE INTO character_profile (id, level) VALUES (1, 1)",
        [],
    )?;
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(cols)
}

fn ensure_columns(conn: &Connection) -> rusqlite::Result<()> {
    for table in TABLES {
        let existing = table_columns(conn, table)?;
        for (_, column, decl) in REQUIRED_COLUMNS.iter().filter(|(t, _, _)| t == table) {
            if !existing.contains(*column) {
                info!("Adding missing column {}.{}", table, column);
                conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    table, column, decl
                ))?;
            }
        }
    }
    Ok(())
}

// ── Spells ──

/// One normalized spell, ready to be written. `url` is the identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpellRecord {
    pub url: String,
    pub name: String,
    pub level: i64,
    pub school: Option<String>,
    pub ritual: bool,
    pub concentration: bool,
    pub casting_time: Option<String>,
    pub range: Option<String>,
    pub components: Option<String>,
    pub material: Option<String>,
    pub duration: Option<String>,
    pub classes: Option<String>,
    pub description: Option<String>,
    pub higher_level: Option<String>,
    pub source: String,
}

/// Insert the spell, or overwrite every descriptive column of the row
/// already stored under the same `url`. Row id is preserved.
pub fn upsert_spell(conn: &Connection, s: &SpellRecord) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO spells
         (url, name, level, school, ritual, concentration, casting_time, range,
          components, material, duration, classes, description, higher_level, source)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
         ON CONFLICT(url) DO UPDATE SET
            name = excluded.name,
            level = excluded.level,
            school = excluded.school,
            ritual = excluded.ritual,
            concentration = excluded.concentration,
            casting_time = excluded.casting_time,
            range = excluded.range,
            components = excluded.components,
            material = excluded.material,
            duration = excluded.duration,
            classes = excluded.classes,
            description = excluded.description,
            higher_level = excluded.higher_level,
            source = excluded.source",
    )?;
    stmt.execute(params![
        s.url, s.name, s.level, s.school, s.ritual, s.concentration, s.casting_time,
        s.range, s.components, s.material, s.duration, s.classes, s.description,
        s.higher_level, s.source,
    ])?;
    Ok(())
}

pub fn spell_exists(conn: &Connection, spell_id: i64) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM spells WHERE id = ?1", [spell_id], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
}

// ── Status ──

pub fn upsert_status(
    conn: &Connection,
    spell_id: i64,
    known: bool,
    prepared: bool,
    favorite: bool,
) -> rusqlite::Result<()> {
    let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    upsert_status_at(conn, spell_id, known, prepared, favorite, &now)
}

fn upsert_status_at(
    conn: &Connection,
    spell_id: i64,
    known: bool,
    prepared: bool,
    favorite: bool,
    updated_at: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO spell_status (spell_id, known, prepared, favorite, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(spell_id) DO UPDATE SET
            known = excluded.known,
            prepared = excluded.prepared,
            favorite = excluded.favorite,
            updated_at = excluded.updated_at",
        params![spell_id, known, prepared, favorite, updated_at],
    )?;
    Ok(())
}

// ── Character ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterProfile {
    pub name: Option<String>,
    pub class_name: Option<String>,
    pub subclass: Option<String>,
    pub level: i64,
}

pub fn get_character(conn: &Connection) -> rusqlite::Result<CharacterProfile> {
    conn.query_row(
        "SELECT name, class_name, subclass, level FROM character_profile WHERE id = 1",
        [],
        |row| {
            Ok(CharacterProfile {
                name: row.get(0)?,
                class_name: row.get(1)?,
                subclass: row.get(2)?,
                level: row.get(3)?,
            })
        },
    )
}

pub fn update_character(conn: &Connection, c: &CharacterProfile) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE character_profile
         SET name = ?1, class_name = ?2, subclass = ?3, level = ?4
         WHERE id = 1",
        params![c.name, c.class_name, c.subclass, c.level],
    )?;
    Ok(())
}

// ── Queries ──

/// Typed filters for [`query_spells`]. Text filters are substring matches.
#[derive(Debug, Clone, Default)]
pub struct SpellFilter {
    pub name: Option<String>,
    pub level: Option<i64>,
    pub class: Option<String>,
    pub school: Option<String>,
    pub ritual: Option<bool>,
    pub concentration: Option<bool>,
    pub component: Option<char>,
}

impl SpellFilter {
    /// Accepts a single component letter (V, S or M, any case).
    pub fn component_letter(raw: &str) -> Option<char> {
        match raw.trim().to_uppercase().as_str() {
            "V" => Some('V'),
            "S" => Some('S'),
            "M" => Some('M'),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SpellView {
    pub id: i64,
    pub name: String,
    pub level: i64,
    pub school: Option<String>,
    pub ritual: bool,
    pub concentration: bool,
    pub casting_time: Option<String>,
    pub range: Option<String>,
    pub components: Option<String>,
    pub material: Option<String>,
    pub duration: Option<String>,
    pub classes: Option<String>,
    pub description: Option<String>,
    pub higher_level: Option<String>,
    pub url: String,
    pub known: bool,
    pub prepared: bool,
    pub favorite: bool,
}

pub fn query_spells(conn: &Connection, f: &SpellFilter) -> rusqlite::Result<Vec<SpellView>> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(q) = f.name.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        conditions.push(format!("s.name LIKE ?{}", params.len() + 1));
        params.push(Box::new(format!("%{}%", q)));
    }
    if let Some(level) = f.level {
        conditions.push(format!("s.level = ?{}", params.len() + 1));
        params.push(Box::new(level));
    }
    if let Some(class) = f.class.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        conditions.push(format!("LOWER(s.classes) LIKE ?{}", params.len() + 1));
        params.push(Box::new(format!("%{}%", class.to_lowercase())));
    }
    if let Some(school) = f.school.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push(format!("LOWER(s.school) LIKE ?{}", params.len() + 1));
        params.push(Box::new(format!("%{}%", school.to_lowercase())));
    }
    if let Some(ritual) = f.ritual {
        conditions.push(format!("s.ritual = ?{}", params.len() + 1));
        params.push(Box::new(ritual));
    }
    if let Some(conc) = f.concentration {
        conditions.push(format!("s.concentration = ?{}", params.len() + 1));
        params.push(Box::new(conc));
    }
    // Raw substring over the components text, so "M" also matches inside other words.
    if let Some(letter) = f.component {
        conditions.push(format!("s.components LIKE ?{}", params.len() + 1));
        params.push(Box::new(format!("%{}%", letter)));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT s.id, s.name, s.level, s.school, s.ritual, s.concentration, s.casting_time,
                s.range, s.components, s.material, s.duration, s.classes, s.description,
                s.higher_level, s.url,
                COALESCE(st.known, 0), COALESCE(st.prepared, 0), COALESCE(st.favorite, 0)
         FROM spells s
         LEFT JOIN spell_status st ON st.spell_id = s.id{}
         ORDER BY s.name ASC",
        where_clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(SpellView {
                id: row.get(0)?,
                name: row.get(1)?,
                level: row.get(2)?,
                school: row.get(3)?,
                ritual: row.get(4)?,
                concentration: row.get(5)?,
                casting_time: row.get(6)?,
                range: row.get(7)?,
                components: row.get(8)?,
                material: row.get(9)?,
                duration: row.get(10)?,
                classes: row.get(11)?,
                description: row.get(12)?,
                higher_level: row.get(13)?,
                url: row.get(14)?,
                known: row.get(15)?,
                prepared: row.get(16)?,
                favorite: row.get(17)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub spells: usize,
    pub rituals: usize,
    pub concentration: usize,
    pub known: usize,
    pub prepared: usize,
    pub favorite: usize,
}

pub fn get_stats(conn: &Connection) -> rusqlite::Result<Stats> {
    let count = |sql: &str| conn.query_row(sql, [], |r| r.get::<_, usize>(0));
    Ok(Stats {
        spells: count("SELECT COUNT(*) FROM spells")?,
        rituals: count("SELECT COUNT(*) FROM spells WHERE ritual = 1")?,
        concentration: count("SELECT COUNT(*) FROM spells WHERE concentration = 1")?,
        known: count("SELECT COUNT(*) FROM spell_status WHERE known = 1")?,
        prepared: count("SELECT COUNT(*) FROM spell_status WHERE prepared = 1")?,
        favorite: count("SELECT COUNT(*) FROM spell_status WHERE favorite = 1")?,
    })
}

#[cfg(test)]
pub fn open_in_memory() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    init_schema(&conn).unwrap();
    conn
}

#[cfg(test)]
pub fn sample_spell(url: &str, name: &str) -> SpellRecord {
    SpellRecord {
        url: url.to_string(),
        name: name.to_string(),
        level: 3,
        school: Some("Invocazione".into()),
        ritual: false,
        concentration: false,
        casting_time: Some("1 azione".into()),
        range: Some("45 metri".into()),
        components: Some("V, S, M (una minuscola sfera di guano di pipistrello e zolfo)".into()),
        material: Some("una minuscola sfera di guano di pipistrello e zolfo".into()),
        duration: Some("Istantanea".into()),
        classes: Some("Mago, Stregone".into()),
        description: Some("Una vivida striscia di luce...".into()),
        higher_level: None,
        source: "dungeonedraghi.it".into(),
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn spell_count(conn: &Connection) -> usize {
        conn.query_row("SELECT COUNT(*) FROM spells", [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn upsert_same_url_keeps_one_row_with_latest_values() {
        let conn = open_in_memory();
        let url = "https://dungeonedraghi.it/compendio/incantesimi/palla-di-fuoco/";
        upsert_spell(&conn, &sample_spell(url, "Palla di Fuoco")).unwrap();
        let first_id: i64 = conn
            .query_row("SELECT id FROM spells WHERE url = ?1", [url], |r| r.get(0))
            .unwrap();

        let mut changed = sample_spell(url, "Palla di Fuoco (rev)");
        changed.level = 4;
        changed.material = None;
        upsert_spell(&conn, &changed).unwrap();

        assert_eq!(spell_count(&conn), 1);
        let (id, name, level, material): (i64, String, i64, Option<String>) = conn
            .query_row(
                "SELECT id, name, level, material FROM spells WHERE url = ?1",
                [url],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!(id, first_id);
        assert_eq!(name, "Palla di Fuoco (rev)");
        assert_eq!(level, 4);
        assert_eq!(material, None);
    }

    #[test]
    fn same_name_different_url_stays_distinct() {
        let conn = open_in_memory();
        upsert_spell(&conn, &sample_spell("https://x.it/compendio/incantesimi/a/", "Luce")).unwrap();
        upsert_spell(&conn, &sample_spell("https://x.it/compendio/incantesimi/b/", "Luce")).unwrap();
        assert_eq!(spell_count(&conn), 2);
    }

    #[test]
    fn fresh_profile_is_singleton_level_one() {
        let conn = open_in_memory();
        let c = get_character(&conn).unwrap();
        assert_eq!(c.level, 1);
        assert_eq!(c.name, None);
        let rows: usize = conn
            .query_row("SELECT COUNT(*) FROM character_profile", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn status_upsert_overwrites_flags() {
        let conn = open_in_memory();
        upsert_spell(&conn, &sample_spell("https://x.it/compendio/incantesimi/a/", "Luce")).unwrap();
        upsert_status(&conn, 1, true, true, false).unwrap();
        upsert_status(&conn, 1, false, true, true).unwrap();

        let rows: usize = conn
            .query_row("SELECT COUNT(*) FROM spell_status", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);

        let spells = query_spells(&conn, &SpellFilter::default()).unwrap();
        assert!(!spells[0].known);
        assert!(spells[0].prepared);
        assert!(spells[0].favorite);
    }

    #[test]
    fn status_upsert_refreshes_updated_at() {
        let conn = open_in_memory();
        upsert_spell(&conn, &sample_spell("https://x.it/compendio/incantesimi/a/", "Luce")).unwrap();
        let stamp = |conn: &Connection| -> String {
            conn.query_row("SELECT updated_at FROM spell_status WHERE spell_id = 1", [], |r| r.get(0))
                .unwrap()
        };

        upsert_status_at(&conn, 1, true, false, false, "2001-01-01 00:00:00").unwrap();
        assert_eq!(stamp(&conn), "2001-01-01 00:00:00");
        upsert_status_at(&conn, 1, true, false, false, "2002-02-02 12:00:00").unwrap();
        assert_eq!(stamp(&conn), "2002-02-02 12:00:00");

        upsert_status(&conn, 1, true, false, false).unwrap();
        let now = stamp(&conn);
        assert!(now.as_str() > "2002-02-02 12:00:00", "{now}");
        assert_eq!(now.len(), "2002-02-02 12:00:00".len());
    }

    #[test]
    fn query_filters_and_orders_by_name() {
        let conn = open_in_memory();
        let mut a = sample_spell("https://x.it/compendio/incantesimi/z/", "Zampa");
        a.components = Some("V, S".into());
        a.ritual = true;
        let mut b = sample_spell("https://x.it/compendio/incantesimi/a/", "Allarme");
        b.classes = Some("Ranger".into());
        b.level = 1;
        upsert_spell(&conn, &a).unwrap();
        upsert_spell(&conn, &b).unwrap();

        let all = query_spells(&conn, &SpellFilter::default()).unwrap();
        let names: Vec<&str> = all.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Allarme", "Zampa"]);
        assert!(all.iter().all(|s| !s.known && !s.prepared && !s.favorite));

        let by_class = SpellFilter { class: Some("RANGER".into()), ..Default::default() };
        assert_eq!(query_spells(&conn, &by_class).unwrap().len(), 1);

        let material = SpellFilter { component: Some('M'), ..Default::default() };
        let found = query_spells(&conn, &material).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Allarme");

        let rituals = SpellFilter { ritual: Some(true), ..Default::default() };
        assert_eq!(query_spells(&conn, &rituals).unwrap()[0].name, "Zampa");

        let lvl = SpellFilter { level: Some(1), name: Some("all".into()), ..Default::default() };
        assert_eq!(query_spells(&conn, &lvl).unwrap().len(), 1);
    }

    #[test]
    fn adds_missing_columns_to_old_database() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE spells (id INTEGER PRIMARY KEY, url TEXT UNIQUE NOT NULL, name TEXT NOT NULL, source TEXT NOT NULL);
             CREATE TABLE spell_status (spell_id INTEGER PRIMARY KEY, known BOOLEAN NOT NULL DEFAULT 0);
             CREATE TABLE character_profile (id INTEGER PRIMARY KEY, class_name TEXT, level INTEGER);
             INSERT INTO character_profile (id, class_name, level) VALUES (1, 'Mago', 5);
             INSERT INTO spells (url, name, source) VALUES ('https://x.it/compendio/incantesimi/a/', 'Luce', 'x');",
        )
        .unwrap();

        init_schema(&conn).unwrap();

        let cols = table_columns(&conn, "character_profile").unwrap();
        assert!(cols.contains("name"));
        assert!(cols.contains("subclass"));
        assert!(table_columns(&conn, "spells").unwrap().contains("material"));
        assert!(table_columns(&conn, "spell_status").unwrap().contains("favorite"));

        // existing data untouched
        let c = get_character(&conn).unwrap();
        assert_eq!(c.class_name.as_deref(), Some("Mago"));
        assert_eq!(c.level, 5);
        assert_eq!(spell_count(&conn), 1);
    }

    #[test]
    fn reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("spells.db");
        {
            let conn = connect(&path).unwrap();
            upsert_spell(&conn, &sample_spell("https://x.it/compendio/incantesimi/a/", "Luce")).unwrap();
        }
        let conn = connect(&path).unwrap();
        assert_eq!(spell_count(&conn), 1);
        assert_eq!(get_character(&conn).unwrap().level, 1);
    }
}
