//! Per-URL work queue for a supplier.
//!
//! The phase jobs only observe aggregate counts here; individual rows are
//! mutated by the callback's `mark_url_failed` handler and by the external
//! scraper itself.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "supplier_url_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SupplierUrlStatus {
    Pending,
    Done,
    Failed,
    Blocked,
}

#[derive(FromRow, Debug, Clone, Serialize)]
pub struct SupplierUrl {
    pub id: i64,
    pub supplier_name: String,
    pub url: String,
    pub status: SupplierUrlStatus,
    pub is_valid: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SupplierUrl {
    /// Error codes (or HTTP statuses) that mean the remote site is actively
    /// blocking us, as opposed to an ordinary per-URL failure. Blocked rows
    /// feed the circuit breaker.
    pub fn is_blocking_signal(error_code: Option<&str>, http_status: Option<u16>) -> bool {
        if matches!(http_status, Some(403) | Some(404)) {
            return true;
        }
        matches!(
            error_code.map(|c| c.to_ascii_uppercase()).as_deref(),
            Some("HTTP_403") | Some("HTTP_404") | Some("BLOCKED") | Some("CAPTCHA")
        )
    }

    pub async fn create(supplier_name: &str, url: &str, pool: &PgPool) -> Result<Self> {
        let row = sqlx::query_as::<_, SupplierUrl>(
            r#"
            INSERT INTO supplier_urls (supplier_name, url)
            VALUES ($1, $2)
            ON CONFLICT (supplier_name, url) DO UPDATE SET updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(supplier_name)
        .bind(url)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    pub async fn find(supplier_name: &str, url: &str, pool: &PgPool) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, SupplierUrl>(
            "SELECT * FROM supplier_urls WHERE supplier_name = $1 AND url = $2",
        )
        .bind(supplier_name)
        .bind(url)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Claimable = valid and still pending. The sole "more work?" predicate.
    pub async fn claimable_count(supplier_name: &str, pool: &PgPool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM supplier_urls WHERE supplier_name = $1 AND is_valid AND status = 'pending'",
        )
        .bind(supplier_name)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    /// Valid rows regardless of status; the collect count fallback.
    pub async fn count_valid(supplier_name: &str, pool: &PgPool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM supplier_urls WHERE supplier_name = $1 AND is_valid",
        )
        .bind(supplier_name)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    /// (blocked, total) for the blocked-ratio circuit breaker.
    pub async fn blocked_stats(supplier_name: &str, pool: &PgPool) -> Result<(i64, i64)> {
        let row = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'blocked'),
                COUNT(*)
            FROM supplier_urls
            WHERE supplier_name = $1
            "#,
        )
        .bind(supplier_name)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    pub async fn mark_blocked(
        supplier_name: &str,
        url: &str,
        error_code: Option<&str>,
        error_message: Option<&str>,
        pool: &PgPool,
    ) -> Result<bool> {
        Self::mark_status(
            supplier_name,
            url,
            SupplierUrlStatus::Blocked,
            error_code,
            error_message,
            pool,
        )
        .await
    }

    pub async fn mark_failed(
        supplier_name: &str,
        url: &str,
        error_code: Option<&str>,
        error_message: Option<&str>,
        pool: &PgPool,
    ) -> Result<bool> {
        Self::mark_status(
            supplier_name,
            url,
            SupplierUrlStatus::Failed,
            error_code,
            error_message,
            pool,
        )
        .await
    }

    pub async fn mark_done(supplier_name: &str, url: &str, pool: &PgPool) -> Result<bool> {
        Self::mark_status(supplier_name, url, SupplierUrlStatus::Done, None, None, pool).await
    }

    async fn mark_status(
        supplier_name: &str,
        url: &str,
        status: SupplierUrlStatus,
        error_code: Option<&str>,
        error_message: Option<&str>,
        pool: &PgPool,
    ) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE supplier_urls
            SET status = $3, error_code = $4, error_message = $5, updated_at = NOW()
            WHERE supplier_name = $1 AND url = $2
            "#,
        )
        .bind(supplier_name)
        .bind(url)
        .bind(status)
        .bind(error_code)
        .bind(error_message)
        .execute(pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_403_and_404_are_blocking() {
        assert!(SupplierUrl::is_blocking_signal(Some("HTTP_403"), None));
        assert!(SupplierUrl::is_blocking_signal(Some("http_404"), None));
        assert!(SupplierUrl::is_blocking_signal(None, Some(403)));
        assert!(SupplierUrl::is_blocking_signal(None, Some(404)));
    }

    #[test]
    fn explicit_block_signals_are_blocking() {
        assert!(SupplierUrl::is_blocking_signal(Some("BLOCKED"), None));
        assert!(SupplierUrl::is_blocking_signal(Some("captcha"), None));
    }

    #[test]
    fn ordinary_failures_are_not_blocking() {
        assert!(!SupplierUrl::is_blocking_signal(Some("TIMEOUT"), None));
        assert!(!SupplierUrl::is_blocking_signal(Some("HTTP_500"), Some(500)));
        assert!(!SupplierUrl::is_blocking_signal(None, None));
    }
}
