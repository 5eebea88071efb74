//! SQLite-backed match store

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{move_row_from, new_match_row, MatchRow, MatchStore, MoveRow, StoreError, StoredMatch};
use crate::game::{GameResult, GameStatus, MoveRecord, PlayerRef, SessionId};

/// Database connection wrapper
pub struct SqliteMatchStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMatchStore {
    /// Open (or create) a database file and initialize tables
    pub fn new(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_tables()?;
        Ok(store)
    }

    /// Create in-memory database (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_tables()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_tables(&self) -> Result<(), StoreError> {
        let conn = self.conn();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS matches (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                status TEXT NOT NULL,
                result TEXT NOT NULL,
                white_player_id TEXT NOT NULL,
                black_player_id TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS moves (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                game_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                sequence_number INTEGER NOT NULL,
                notation TEXT NOT NULL,
                FOREIGN KEY (game_id) REFERENCES matches(id) ON DELETE CASCADE,
                UNIQUE(game_id, sequence_number)
            );

            CREATE INDEX IF NOT EXISTS idx_matches_white ON matches(white_player_id);
            CREATE INDEX IF NOT EXISTS idx_matches_black ON matches(black_player_id);
            CREATE INDEX IF NOT EXISTS idx_moves_game ON moves(game_id, sequence_number);
            "#,
        )?;

        Ok(())
    }
}

type RawMatch = (String, String, String, String, String, String, String);
type RawMove = (String, String, String, String, u32, String);

const MATCH_COLUMNS: &str =
    "id, created_at, updated_at, status, result, white_player_id, black_player_id";

fn read_raw_match(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMatch> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn corrupt(table: &'static str, reason: impl Into<String>) -> StoreError {
    StoreError::CorruptRow {
        table,
        reason: reason.into(),
    }
}

fn parse_time(table: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(table, format!("timestamp {raw:?}: {e}")))
}

fn parse_id<T: std::str::FromStr>(table: &'static str, raw: &str) -> Result<T, StoreError> {
    raw.parse()
        .map_err(|_| corrupt(table, format!("identifier {raw:?}")))
}

fn match_from_raw(raw: RawMatch) -> Result<MatchRow, StoreError> {
    let (id, created_at, updated_at, status, result, white, black) = raw;
    Ok(MatchRow {
        id: parse_id("matches", &id)?,
        created_at: parse_time("matches", &created_at)?,
        updated_at: parse_time("matches", &updated_at)?,
        status: GameStatus::parse(&status)
            .ok_or_else(|| corrupt("matches", format!("status {status:?}")))?,
        result: GameResult::parse(&result)
            .ok_or_else(|| corrupt("matches", format!("result {result:?}")))?,
        white_player_id: parse_id("matches", &white)?,
        black_player_id: parse_id("matches", &black)?,
    })
}

fn move_from_raw(raw: RawMove) -> Result<MoveRow, StoreError> {
    let (id, created_at, game_id, user_id, sequence_number, notation) = raw;
    Ok(MoveRow {
        id: parse_id("moves", &id)?,
        created_at: parse_time("moves", &created_at)?,
        game_id: parse_id("moves", &game_id)?,
        user_id: parse_id("moves", &user_id)?,
        sequence_number,
        notation,
    })
}

fn update_match_outcome(
    conn: &Connection,
    id: SessionId,
    status: GameStatus,
    result: GameResult,
) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        "UPDATE matches SET status = ?1, result = ?2, updated_at = ?3 WHERE id = ?4",
        params![status.as_str(), result.as_str(), now, id.to_string()],
    )?;
    if updated == 0 {
        return Err(StoreError::MatchNotFound(id));
    }
    Ok(())
}

impl MatchStore for SqliteMatchStore {
    fn create_match(&self, white: PlayerRef, black: PlayerRef) -> Result<MatchRow, StoreError> {
        let row = new_match_row(white, black);
        let conn = self.conn();
        conn.execute(
            "INSERT INTO matches (id, created_at, updated_at, status, result, white_player_id, black_player_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.id.to_string(),
                row.created_at.to_rfc3339(),
                row.updated_at.to_rfc3339(),
                row.status.as_str(),
                row.result.as_str(),
                row.white_player_id.to_string(),
                row.black_player_id.to_string(),
            ],
        )?;
        Ok(row)
    }

    fn load_match(&self, id: SessionId) -> Result<Option<StoredMatch>, StoreError> {
        let conn = self.conn();

        let raw = conn
            .query_row(
                &format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?1"),
                params![id.to_string()],
                read_raw_match,
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let row = match_from_raw(raw)?;

        let mut stmt = conn.prepare(
            "SELECT id, created_at, game_id, user_id, sequence_number, notation
             FROM moves WHERE game_id = ?1 ORDER BY sequence_number ASC",
        )?;
        let raw_moves = stmt
            .query_map(params![id.to_string()], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
            })?
            .collect::<rusqlite::Result<Vec<RawMove>>>()?;
        let moves = raw_moves
            .into_iter()
            .map(move_from_raw)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(StoredMatch { row, moves }))
    }

    fn record_move(
        &self,
        record: &MoveRecord,
        finish: Option<(GameStatus, GameResult)>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let exists = tx
            .query_row(
                "SELECT 1 FROM matches WHERE id = ?1",
                params![record.session_id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::MatchNotFound(record.session_id));
        }

        let row = move_row_from(record);
        let inserted = tx.execute(
            "INSERT INTO moves (id, created_at, game_id, user_id, sequence_number, notation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.id.to_string(),
                row.created_at.to_rfc3339(),
                row.game_id.to_string(),
                row.user_id.to_string(),
                row.sequence_number,
                row.notation,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(StoreError::DuplicateMove {
                    session: record.session_id,
                    sequence: record.sequence_number,
                });
            }
            Err(e) => return Err(e.into()),
        }

        if let Some((status, result)) = finish {
            update_match_outcome(&tx, record.session_id, status, result)?;
        } else {
            tx.execute(
                "UPDATE matches SET updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), record.session_id.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn finish_match(
        &self,
        id: SessionId,
        status: GameStatus,
        result: GameResult,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        update_match_outcome(&conn, id, status, result)
    }

    fn matches_for_player(&self, player: PlayerRef) -> Result<Vec<MatchRow>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches
             WHERE white_player_id = ?1 OR black_player_id = ?1
             ORDER BY created_at DESC"
        ))?;
        let raw = stmt
            .query_map(params![player.to_string()], read_raw_match)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(match_from_raw).collect()
    }
}
