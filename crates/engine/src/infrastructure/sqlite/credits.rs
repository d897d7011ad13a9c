use async_trait::async_trait;
use folio_domain::UserId;

use super::{column, from_sql_amount, to_sql_amount, SqliteStore};
use crate::infrastructure::ports::{CreditRepo, DebitOutcome, RepoError};

#[async_trait]
impl CreditRepo for SqliteStore {
    async fn get_balance(&self, user: UserId) -> Result<Option<u64>, RepoError> {
        let row = sqlx::query("SELECT balance FROM credit_accounts WHERE user_id = ?")
            .bind(user.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepoError::database("get_balance", e))?;

        row.map(|row| from_sql_amount(column(&row, "balance")?))
            .transpose()
    }

    async fn debit(&self, user: UserId, amount: u64) -> Result<DebitOutcome, RepoError> {
        let amount = to_sql_amount(amount)?;

        // The guard in the WHERE clause makes check-and-subtract a single statement,
        // so concurrent debits serialize on the row.
        let row = sqlx::query(
            r#"
            UPDATE credit_accounts
            SET balance = balance - ?, updated_at = ?
            WHERE user_id = ? AND balance >= ?
            RETURNING balance
            "#,
        )
        .bind(amount)
        .bind(self.now())
        .bind(user.to_string())
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::database("debit", e))?;

        match row {
            Some(row) => Ok(DebitOutcome::Applied {
                balance: from_sql_amount(column(&row, "balance")?)?,
            }),
            None => Ok(DebitOutcome::Insufficient {
                balance: self.get_balance(user).await?.unwrap_or(0),
            }),
        }
    }

    async fn credit(&self, user: UserId, amount: u64) -> Result<u64, RepoError> {
        let amount = to_sql_amount(amount)?;

        // The upsert skips the update when the sum would leave i64 range.
        let row = sqlx::query(
            r#"
            INSERT INTO credit_accounts (user_id, balance, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                balance = balance + excluded.balance,
                updated_at = excluded.updated_at
            WHERE credit_accounts.balance <= ?
            RETURNING balance
            "#,
        )
        .bind(user.to_string())
        .bind(amount)
        .bind(self.now())
        .bind(i64::MAX - amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::database("credit", e))?;

        match row {
            Some(row) => from_sql_amount(column(&row, "balance")?),
            None => Err(RepoError::constraint(format!(
                "crediting {amount} to {user} would overflow the balance"
            ))),
        }
    }

    async fn open_account(&self, user: UserId, initial: u64) -> Result<u64, RepoError> {
        sqlx::query(
            r#"
            INSERT INTO credit_accounts (user_id, balance, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(user.to_string())
        .bind(to_sql_amount(initial)?)
        .bind(self.now())
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("open_account", e))?;

        self.get_balance(user)
            .await?
            .ok_or_else(|| RepoError::not_found("CreditAccount", user))
    }
}
