use async_trait::async_trait;
use folio_domain::{Bible, OutlineEntry, ProjectId, UserId};

use super::{column, SqliteStore};
use crate::infrastructure::ports::{BibleRepo, RepoError};

fn decode(json: &str) -> Result<Bible, RepoError> {
    serde_json::from_str(json).map_err(RepoError::serialization)
}

#[async_trait]
impl BibleRepo for SqliteStore {
    async fn load(&self, id: ProjectId) -> Result<Option<Bible>, RepoError> {
        let row = sqlx::query("SELECT bible_json FROM bibles WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepoError::database("load_bible", e))?;

        row.map(|row| decode(&column::<String>(&row, "bible_json")?))
            .transpose()
    }

    async fn save(&self, bible: &Bible) -> Result<(), RepoError> {
        let json = serde_json::to_string(bible).map_err(RepoError::serialization)?;

        sqlx::query(
            r#"
            INSERT INTO bibles (id, owner_id, title, bible_json, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                title = excluded.title,
                bible_json = excluded.bible_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(bible.id.to_string())
        .bind(bible.owner.to_string())
        .bind(&bible.core.title)
        .bind(json)
        .bind(self.now())
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("save_bible", e))?;

        Ok(())
    }

    async fn save_outline_entry(
        &self,
        id: ProjectId,
        position: usize,
        entry: &OutlineEntry,
    ) -> Result<(), RepoError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::database("save_outline_entry", e))?;

        let row = sqlx::query("SELECT bible_json FROM bibles WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| RepoError::database("save_outline_entry", e))?
            .ok_or_else(|| RepoError::not_found("Bible", id))?;

        let mut bible = decode(&column::<String>(&row, "bible_json")?)?;
        bible.upsert_outline_entry(position, entry.clone());
        let json = serde_json::to_string(&bible).map_err(RepoError::serialization)?;

        sqlx::query("UPDATE bibles SET bible_json = ?, updated_at = ? WHERE id = ?")
            .bind(json)
            .bind(self.now())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepoError::database("save_outline_entry", e))?;

        tx.commit()
            .await
            .map_err(|e| RepoError::database("save_outline_entry", e))
    }

    async fn list_for_owner(&self, owner: UserId) -> Result<Vec<Bible>, RepoError> {
        let rows = sqlx::query(
            "SELECT bible_json FROM bibles WHERE owner_id = ? ORDER BY updated_at DESC",
        )
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepoError::database("list_bibles", e))?;

        rows.iter()
            .map(|row| decode(&column::<String>(row, "bible_json")?))
            .collect()
    }
}
