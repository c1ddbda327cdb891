//! Fake scraper process for integration tests.
//!
//! Implements [`ProcessRunner`] without spawning anything: it reads the
//! phase flags off the command line and drives the database the way the
//! real subprocess would (insert URLs on collect, re-arm them on reset,
//! mark a batch done on parse).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use server_core::domains::scraping::models::ParsingSession;
use server_core::kernel::process::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner};
use sqlx::PgPool;
use tokio::sync::mpsc::UnboundedSender;

pub struct FakeScraper {
    pool: PgPool,
    /// How many URLs a collect run discovers.
    pub urls_on_collect: usize,
    /// Reported via collect stats (mimics a `phase_finished` callback
    /// arriving while the subprocess runs); `None` leaves stats empty so
    /// the collect job falls back to counting rows.
    pub report_urls_sent_total: Option<i64>,
    /// Exit code per phase, defaults to success.
    pub collect_exit: i32,
    pub reset_exit: i32,
    pub parse_exit: i32,

    pub collect_runs: AtomicUsize,
    pub reset_runs: AtomicUsize,
    pub parse_runs: AtomicUsize,
}

impl FakeScraper {
    pub fn new(pool: PgPool, urls_on_collect: usize) -> Self {
        Self {
            pool,
            urls_on_collect,
            report_urls_sent_total: None,
            collect_exit: 0,
            reset_exit: 0,
            parse_exit: 0,
            collect_runs: AtomicUsize::new(0),
            reset_runs: AtomicUsize::new(0),
            parse_runs: AtomicUsize::new(0),
        }
    }

    fn arg_value(spec: &CommandSpec, flag: &str) -> Option<String> {
        spec.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| spec.args.get(i + 1))
            .cloned()
    }

    async fn run_collect(&self, supplier: &str, session_id: i64) -> anyhow::Result<()> {
        for i in 0..self.urls_on_collect {
            sqlx::query(
                r#"
                INSERT INTO supplier_urls (supplier_name, url)
                VALUES ($1, $2)
                ON CONFLICT (supplier_name, url) DO NOTHING
                "#,
            )
            .bind(supplier)
            .bind(format!("https://{}.example.com/item/{}", supplier, i))
            .execute(&self.pool)
            .await?;
        }
        if let Some(total) = self.report_urls_sent_total {
            let stats = serde_json::json!({ "urls_sent_total": total });
            ParsingSession::set_collect_stats(session_id, &stats, &self.pool).await?;
        }
        Ok(())
    }

    async fn run_reset(&self, supplier: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE supplier_urls
            SET status = 'pending', error_code = NULL, error_message = NULL, updated_at = NOW()
            WHERE supplier_name = $1 AND is_valid
            "#,
        )
        .bind(supplier)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn run_parse_batch(&self, supplier: &str, batch_size: i64) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE supplier_urls
            SET status = 'done', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM supplier_urls
                WHERE supplier_name = $1 AND is_valid AND status = 'pending'
                ORDER BY id
                LIMIT $2
            )
            "#,
        )
        .bind(supplier)
        .bind(batch_size)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ProcessRunner for FakeScraper {
    async fn run(
        &self,
        spec: CommandSpec,
        _timeout: Duration,
        output_tx: Option<UnboundedSender<String>>,
    ) -> Result<ProcessOutput, ProcessError> {
        let supplier = Self::arg_value(&spec, "--supplier").unwrap_or_default();
        let session_id: i64 = Self::arg_value(&spec, "--session-id")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if let Some(tx) = &output_tx {
            let _ = tx.send("scraper: starting".to_string());
        }

        let (exit_code, result) = if spec.args.iter().any(|a| a == "--collect-only") {
            self.collect_runs.fetch_add(1, Ordering::SeqCst);
            if self.collect_exit == 0 {
                (0, self.run_collect(&supplier, session_id).await)
            } else {
                (self.collect_exit, Ok(()))
            }
        } else if spec.args.iter().any(|a| a == "--reset-only") {
            self.reset_runs.fetch_add(1, Ordering::SeqCst);
            if self.reset_exit == 0 {
                (0, self.run_reset(&supplier).await)
            } else {
                (self.reset_exit, Ok(()))
            }
        } else {
            self.parse_runs.fetch_add(1, Ordering::SeqCst);
            let batch_size: i64 = Self::arg_value(&spec, "--batch-size")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30);
            if self.parse_exit == 0 {
                (0, self.run_parse_batch(&supplier, batch_size).await)
            } else {
                (self.parse_exit, Ok(()))
            }
        };

        result.map_err(|e| ProcessError::Io(std::io::Error::other(e.to_string())))?;

        if let Some(tx) = &output_tx {
            let _ = tx.send("scraper: done".to_string());
        }

        Ok(ProcessOutput {
            exit_code,
            stdout: String::new(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                "scraper: simulated failure".to_string()
            },
            duration: Duration::from_millis(1),
        })
    }
}
