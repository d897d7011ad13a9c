use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_domain::{Chapter, ChapterId, ContinuityRecord, OutlineId, ProjectId};
use sqlx::sqlite::SqliteRow;

use super::{column, parse_column, SqliteStore};
use crate::infrastructure::ports::{ChapterRepo, DraftSnapshot, RepoError};

const CHAPTER_COLUMNS: &str =
    "id, outline_id, title, content, word_count, continuity_json, draft, draft_complete, updated_at";

fn row_to_chapter(row: &SqliteRow) -> Result<Chapter, RepoError> {
    let continuity = column::<Option<String>>(row, "continuity_json")?
        .map(|json| serde_json::from_str::<ContinuityRecord>(&json))
        .transpose()
        .map_err(RepoError::serialization)?;
    let updated_at = DateTime::parse_from_rfc3339(&column::<String>(row, "updated_at")?)
        .map_err(RepoError::serialization)?
        .with_timezone(&Utc);
    let word_count = usize::try_from(column::<i64>(row, "word_count")?)
        .map_err(RepoError::serialization)?;

    Ok(Chapter {
        id: parse_column(row, "id")?,
        outline_id: parse_column(row, "outline_id")?,
        title: column(row, "title")?,
        content: column(row, "content")?,
        word_count,
        continuity,
        draft: column(row, "draft")?,
        draft_complete: column(row, "draft_complete")?,
        updated_at,
    })
}

fn encode_record(record: Option<&ContinuityRecord>) -> Result<Option<String>, RepoError> {
    record
        .map(serde_json::to_string)
        .transpose()
        .map_err(RepoError::serialization)
}

#[async_trait]
impl ChapterRepo for SqliteStore {
    async fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<Chapter>, RepoError> {
        let rows = sqlx::query(&format!(
            "SELECT {CHAPTER_COLUMNS} FROM chapters WHERE project_id = ?"
        ))
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepoError::database("list_chapters", e))?;

        rows.iter().map(row_to_chapter).collect()
    }

    async fn get_by_outline(
        &self,
        project_id: ProjectId,
        outline_id: OutlineId,
    ) -> Result<Option<Chapter>, RepoError> {
        let row = sqlx::query(&format!(
            "SELECT {CHAPTER_COLUMNS} FROM chapters WHERE project_id = ? AND outline_id = ?"
        ))
        .bind(project_id.to_string())
        .bind(outline_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::database("get_chapter", e))?;

        row.as_ref().map(row_to_chapter).transpose()
    }

    async fn save(&self, project_id: ProjectId, chapter: &Chapter) -> Result<ChapterId, RepoError> {
        let word_count = i64::try_from(chapter.word_count).map_err(RepoError::constraint)?;

        let row = sqlx::query(
            r#"
            INSERT INTO chapters
                (id, project_id, outline_id, title, content, word_count, continuity_json, draft, draft_complete, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(project_id, outline_id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                word_count = excluded.word_count,
                continuity_json = excluded.continuity_json,
                draft = excluded.draft,
                draft_complete = excluded.draft_complete,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(chapter.id.to_string())
        .bind(project_id.to_string())
        .bind(chapter.outline_id.to_string())
        .bind(&chapter.title)
        .bind(&chapter.content)
        .bind(word_count)
        .bind(encode_record(chapter.continuity.as_ref())?)
        .bind(chapter.draft.as_deref())
        .bind(chapter.draft_complete)
        .bind(chapter.updated_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepoError::database("save_chapter", e))?;

        parse_column(&row, "id")
    }

    async fn save_draft(
        &self,
        project_id: ProjectId,
        snapshot: &DraftSnapshot,
    ) -> Result<ChapterId, RepoError> {
        let row = sqlx::query(
            r#"
            INSERT INTO chapters
                (id, project_id, outline_id, title, content, word_count, continuity_json, draft, draft_complete, updated_at)
            VALUES (?, ?, ?, ?, '', 0, NULL, ?, ?, ?)
            ON CONFLICT(project_id, outline_id) DO UPDATE SET
                title = excluded.title,
                draft = excluded.draft,
                draft_complete = excluded.draft_complete,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(snapshot.chapter_id.to_string())
        .bind(project_id.to_string())
        .bind(snapshot.outline_id.to_string())
        .bind(&snapshot.title)
        .bind(&snapshot.draft)
        .bind(snapshot.complete)
        .bind(snapshot.taken_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepoError::database("save_draft", e))?;

        parse_column(&row, "id")
    }

    async fn save_continuity(
        &self,
        chapter_id: ChapterId,
        record: Option<ContinuityRecord>,
    ) -> Result<(), RepoError> {
        let result =
            sqlx::query("UPDATE chapters SET continuity_json = ?, updated_at = ? WHERE id = ?")
                .bind(encode_record(record.as_ref())?)
                .bind(self.now())
                .bind(chapter_id.to_string())
                .execute(&self.pool)
                .await
                .map_err(|e| RepoError::database("save_continuity", e))?;

        if result.rows_affected() == 0 {
            return Err(RepoError::not_found("Chapter", chapter_id));
        }
        Ok(())
    }
}
