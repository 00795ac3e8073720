use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::database::Tables;
use crate::error::Result;

impl Tables<'_> {
    /// The last committed sync token. `None` means the next sync is initial.
    pub fn sync_token(&self) -> Result<Option<String>> {
        let token = self
            .conn
            .query_row("SELECT token FROM sync_token WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        Ok(token)
    }

    pub fn save_sync_token(&self, token: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_token (id, token, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET token = excluded.token, updated_at = excluded.updated_at",
            params![token, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Forget the token so that the next sync starts from scratch.
    pub fn clear_sync_token(&self) -> Result<()> {
        self.conn.execute("DELETE FROM sync_token", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    #[test]
    fn token_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.tables().save_sync_token("s_1").unwrap();
            db.tables().save_sync_token("s_2").unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.tables().sync_token().unwrap().as_deref(), Some("s_2"));

        db.tables().clear_sync_token().unwrap();
        assert_eq!(db.tables().sync_token().unwrap(), None);
    }
}
