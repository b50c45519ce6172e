use anyhow::{Context, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{path::Path, thread, time::Duration};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::config::{AiConfig, AiSettings};
use crate::drafting::{Draft, DraftField};
use crate::models::Facts;

const KEY_BACKEND: &str = "ai.backend";
const KEY_LOCAL_BASE_URL: &str = "ai.local_base_url";
const KEY_LOCAL_MODEL: &str = "ai.local_model";
const KEY_REMOTE_ENDPOINT: &str = "ai.remote_endpoint";
const KEY_REMOTE_MODEL: &str = "ai.remote_model";
const KEY_REMOTE_API_KEY: &str = "ai.remote_api_key";
const KEY_TIMEOUT_SECS: &str = "ai.timeout_secs";
const KEY_PROBE_TIMEOUT_MS: &str = "ai.probe_timeout_ms";
const KEY_FILE_LOGGING: &str = "file_logging_enabled";

/**
 * \brief A draft row as stored.
 */
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredDraft {
    pub id: i64,
    pub field: String,
    pub facts_json: String,
    pub content: String,
    pub backend: String,
    pub created_at: String,
}

/**
 * \brief Open the default database file (iqac_ai.db in the working directory).
 * \details `IQAC_DB_PATH` overrides the location.
 */
pub fn open_default_db() -> Result<Connection> {
    let path = std::env::var("IQAC_DB_PATH").unwrap_or_else(|_| "iqac_ai.db".to_string());
    open_db(path)
}

pub fn open_db(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief Create tables if missing. Safe to run on every start.
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS drafts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            field TEXT NOT NULL,
            facts_json TEXT NOT NULL,
            content TEXT NOT NULL,
            backend TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_drafts_field ON drafts(field, id);
        "#,
        )
    })?;
    Ok(())
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config(key, value) VALUES(?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
    })?;
    Ok(())
}

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM app_config WHERE key = ?1")?;
    Ok(stmt
        .query_row(params![key], |row| row.get::<_, String>(0))
        .optional()?)
}

pub fn clear_config(conn: &Connection, key: &str) -> Result<()> {
    retry_on_locked(|| conn.execute("DELETE FROM app_config WHERE key = ?1", params![key]))?;
    Ok(())
}

fn set_bool_config(conn: &Connection, key: &str, value: bool) -> Result<()> {
    set_config(conn, key, if value { "1" } else { "0" })
}

fn get_bool_config(conn: &Connection, key: &str, default: bool) -> Result<bool> {
    Ok(match get_config(conn, key)? {
        Some(v) => v == "1" || v.eq_ignore_ascii_case("true"),
        None => default,
    })
}

pub fn get_file_logging_enabled(conn: &Connection) -> Result<bool> {
    get_bool_config(conn, KEY_FILE_LOGGING, false)
}

pub fn set_file_logging_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_bool_config(conn, KEY_FILE_LOGGING, enabled)
}

/**
 * \brief Persist every set field of `settings`; unset fields keep their stored value.
 */
pub fn save_ai_settings(conn: &Connection, settings: &AiSettings) -> Result<()> {
    let text_fields = [
        (KEY_BACKEND, &settings.backend),
        (KEY_LOCAL_BASE_URL, &settings.local_base_url),
        (KEY_LOCAL_MODEL, &settings.local_model),
        (KEY_REMOTE_ENDPOINT, &settings.remote_endpoint),
        (KEY_REMOTE_MODEL, &settings.remote_model),
        (KEY_REMOTE_API_KEY, &settings.remote_api_key),
    ];
    for (key, value) in text_fields {
        if let Some(v) = value {
            set_config(conn, key, v)?;
        }
    }
    if let Some(secs) = settings.timeout_secs {
        set_config(conn, KEY_TIMEOUT_SECS, &secs.to_string())?;
    }
    if let Some(ms) = settings.probe_timeout_ms {
        set_config(conn, KEY_PROBE_TIMEOUT_MS, &ms.to_string())?;
    }
    Ok(())
}

/**
 * \brief Drop the stored API key, so only the environment can supply one.
 */
pub fn clear_remote_api_key(conn: &Connection) -> Result<()> {
    clear_config(conn, KEY_REMOTE_API_KEY)
}

pub fn load_ai_settings(conn: &Connection) -> Result<AiSettings> {
    let parse_u64 = |key: &str| -> Result<Option<u64>> {
        match get_config(conn, key)? {
            Some(v) => Ok(Some(
                v.parse::<u64>()
                    .with_context(|| format!("stored setting {} is not a number: {}", key, v))?,
            )),
            None => Ok(None),
        }
    };
    Ok(AiSettings {
        backend: get_config(conn, KEY_BACKEND)?,
        local_base_url: get_config(conn, KEY_LOCAL_BASE_URL)?,
        local_model: get_config(conn, KEY_LOCAL_MODEL)?,
        remote_endpoint: get_config(conn, KEY_REMOTE_ENDPOINT)?,
        remote_model: get_config(conn, KEY_REMOTE_MODEL)?,
        remote_api_key: get_config(conn, KEY_REMOTE_API_KEY)?,
        timeout_secs: parse_u64(KEY_TIMEOUT_SECS)?,
        probe_timeout_ms: parse_u64(KEY_PROBE_TIMEOUT_MS)?,
    })
}

/**
 * \brief Defaults, then stored settings, then environment overrides.
 */
pub fn resolve_ai_config(conn: &Connection) -> Result<AiConfig> {
    let stored = load_ai_settings(conn)?;
    Ok(AiSettings::from_env().apply(stored.apply(AiConfig::default())))
}

pub fn insert_draft(conn: &Connection, draft: &Draft, facts: &Facts) -> Result<i64> {
    let facts_json = serde_json::to_string(facts)?;
    let created_at = OffsetDateTime::now_utc().format(&Rfc3339)?;
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO drafts(field, facts_json, content, backend, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5)",
            params![
                draft.field.as_str(),
                facts_json,
                draft.text,
                draft.backend.name(),
                created_at
            ],
        )
    })?;
    Ok(conn.last_insert_rowid())
}

/**
 * \brief Most recent drafts first, optionally for one field.
 */
pub fn list_drafts(
    conn: &Connection,
    field: Option<DraftField>,
    limit: usize,
) -> Result<Vec<StoredDraft>> {
    let mut stmt = conn.prepare(
        "SELECT id, field, facts_json, content, backend, created_at FROM drafts
         WHERE (?1 IS NULL OR field = ?1)
         ORDER BY id DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(
        params![field.map(|f| f.as_str()), limit as i64],
        |row| {
            Ok(StoredDraft {
                id: row.get(0)?,
                field: row.get(1)?,
                facts_json: row.get(2)?,
                content: row.get(3)?,
                backend: row.get(4)?,
                created_at: row.get(5)?,
            })
        },
    )?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/**
 * \brief Retry helper for SQLite lock contention.
 * \details Catches `database is locked` / `database table is locked` and backs off linearly, up to 6 attempts.
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    let mut attempt = 0;
    loop {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                attempt += 1;
                tracing::debug!(attempt, "sqlite busy, retrying");
                thread::sleep(Duration::from_millis(200 * attempt as u64));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendPreference;
    use crate::llm::BackendKind;
    use crate::models::FactValue;

    fn mem_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        migrate(&conn).expect("migrate");
        conn
    }

    fn draft(field: DraftField, text: &str) -> Draft {
        Draft {
            field,
            text: text.to_string(),
            items: Vec::new(),
            backend: BackendKind::Local,
            redacted: false,
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = mem_conn();
        migrate(&conn).expect("second migrate");
    }

    #[test]
    fn test_config_roundtrip_and_clear() {
        let conn = mem_conn();
        assert_eq!(get_config(&conn, "k").expect("get"), None);
        set_config(&conn, "k", "v1").expect("set");
        set_config(&conn, "k", "v2").expect("overwrite");
        assert_eq!(get_config(&conn, "k").expect("get").as_deref(), Some("v2"));
        clear_config(&conn, "k").expect("clear");
        assert_eq!(get_config(&conn, "k").expect("get"), None);
    }

    #[test]
    fn test_file_logging_flag_defaults_off() {
        let conn = mem_conn();
        assert!(!get_file_logging_enabled(&conn).expect("get"));
        set_file_logging_enabled(&conn, true).expect("set");
        assert!(get_file_logging_enabled(&conn).expect("get"));
    }

    #[test]
    fn test_ai_settings_partial_save_keeps_other_fields() {
        let conn = mem_conn();
        save_ai_settings(
            &conn,
            &AiSettings {
                backend: Some("remote".into()),
                remote_api_key: Some("sk-stored".into()),
                timeout_secs: Some(30),
                ..Default::default()
            },
        )
        .expect("save 1");
        save_ai_settings(
            &conn,
            &AiSettings {
                local_model: Some("mistral".into()),
                ..Default::default()
            },
        )
        .expect("save 2");

        let loaded = load_ai_settings(&conn).expect("load");
        assert_eq!(loaded.backend.as_deref(), Some("remote"));
        assert_eq!(loaded.local_model.as_deref(), Some("mistral"));
        assert_eq!(loaded.timeout_secs, Some(30));

        let config = loaded.apply(AiConfig::default());
        assert_eq!(config.preference, BackendPreference::Remote);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.has_remote_credential());

        clear_remote_api_key(&conn).expect("clear key");
        assert_eq!(load_ai_settings(&conn).expect("load").remote_api_key, None);
    }

    #[test]
    fn test_bad_stored_number_is_an_error() {
        let conn = mem_conn();
        set_config(&conn, KEY_TIMEOUT_SECS, "soon").expect("set");
        assert!(load_ai_settings(&conn).is_err());
    }

    #[test]
    fn test_drafts_insert_and_filter() {
        let conn = mem_conn();
        let mut facts = Facts::new();
        facts.insert("title".into(), FactValue::Text("Orientation".into()));

        let a = insert_draft(&conn, &draft(DraftField::Summary, "first"), &facts).expect("insert a");
        let b = insert_draft(&conn, &draft(DraftField::Objectives, "- x"), &facts).expect("insert b");
        let c = insert_draft(&conn, &draft(DraftField::Summary, "second"), &facts).expect("insert c");
        assert!(a < b && b < c);

        let all = list_drafts(&conn, None, 10).expect("list all");
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, c);

        let summaries = list_drafts(&conn, Some(DraftField::Summary), 10).expect("list summaries");
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].content, "second");
        assert_eq!(summaries[1].content, "first");
        assert_eq!(summaries[0].backend, "local");
        assert!(summaries[0].facts_json.contains("Orientation"));

        let limited = list_drafts(&conn, None, 1).expect("list limited");
        assert_eq!(limited.len(), 1);
    }
}
