use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use strata_shared::{RoomId, SendState, TransactionId, UserId};

use crate::database::Tables;
use crate::error::{conversion_error, Result};
use crate::models::LocalEcho;

impl Tables<'_> {
    pub fn insert_local_echo(&self, echo: &LocalEcho) -> Result<()> {
        self.conn.execute(
            "INSERT INTO local_echoes (transaction_id, room_id, type, sender, content, send_state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                echo.transaction_id.as_str(),
                echo.room_id.as_str(),
                echo.event_type,
                echo.sender.as_str(),
                echo.content.to_string(),
                echo.send_state.as_str(),
                echo.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_local_echo(&self, transaction_id: &str) -> Result<Option<LocalEcho>> {
        let echo = self
            .conn
            .query_row(
                "SELECT transaction_id, room_id, type, sender, content, send_state, created_at
                 FROM local_echoes WHERE transaction_id = ?1",
                params![transaction_id],
                row_to_local_echo,
            )
            .optional()?;
        Ok(echo)
    }

    /// Pending echoes of a room, oldest first.
    pub fn local_echoes(&self, room_id: &RoomId) -> Result<Vec<LocalEcho>> {
        let mut stmt = self.conn.prepare(
            "SELECT transaction_id, room_id, type, sender, content, send_state, created_at
             FROM local_echoes WHERE room_id = ?1
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![room_id.as_str()], row_to_local_echo)?;

        let mut echoes = Vec::new();
        for row in rows {
            echoes.push(row?);
        }
        Ok(echoes)
    }

    /// Remove the echo a synced event replaces. Returns whether one existed.
    pub fn remove_local_echo(&self, room_id: &RoomId, transaction_id: &str) -> Result<bool> {
        let affected = self.conn.execute(
            "DELETE FROM local_echoes WHERE room_id = ?1 AND transaction_id = ?2",
            params![room_id.as_str(), transaction_id],
        )?;
        Ok(affected > 0)
    }

    pub fn update_send_state(&self, transaction_id: &str, state: SendState) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE local_echoes SET send_state = ?2 WHERE transaction_id = ?1",
            params![transaction_id, state.as_str()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_local_echo(row: &Row<'_>) -> rusqlite::Result<LocalEcho> {
    let transaction_id: String = row.get(0)?;
    let room_id: String = row.get(1)?;
    let sender: String = row.get(3)?;
    let content: String = row.get(4)?;
    let send_state: String = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(LocalEcho {
        transaction_id: TransactionId::parse(transaction_id).map_err(|e| conversion_error(0, e))?,
        room_id: RoomId::parse(room_id).map_err(|e| conversion_error(1, e))?,
        event_type: row.get(2)?,
        sender: UserId::parse(sender).map_err(|e| conversion_error(3, e))?,
        content: serde_json::from_str(&content).map_err(|e| conversion_error(4, e))?,
        send_state: SendState::from_str(&send_state).unwrap_or(SendState::Undelivered),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(6, e))?,
    })
}
