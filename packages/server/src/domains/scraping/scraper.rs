//! Command-line construction for the external scraper subprocess.
//!
//! Every invocation carries the session id and the callback coordinates;
//! the phase decides the rest.

use crate::config::ScraperConfig;
use crate::kernel::process::CommandSpec;

use super::models::ParsingSession;

fn base_command(config: &ScraperConfig, session: &ParsingSession) -> CommandSpec {
    CommandSpec::new(&config.bin)
        .arg("--session-id")
        .arg(session.id.to_string())
        .arg("--supplier")
        .arg(&session.supplier_name)
        .arg("--api-callback")
        .arg(&config.callback_url)
        .arg("--api-token")
        .arg(&config.callback_token)
        .env("SCRAPER_MODULE_PATH", &config.module_path)
}

pub fn collect_command(config: &ScraperConfig, session: &ParsingSession) -> CommandSpec {
    base_command(config, session).arg("--collect-only")
}

pub fn reset_command(config: &ScraperConfig, session: &ParsingSession) -> CommandSpec {
    base_command(config, session).arg("--reset-only")
}

/// One bounded batch: the subprocess claims at most `batch_size` URLs and
/// exits, so the job's re-dispatch loop stays in control.
pub fn parse_batch_command(config: &ScraperConfig, session: &ParsingSession) -> CommandSpec {
    base_command(config, session)
        .arg("--queue")
        .arg("--batch-size")
        .arg(config.batch_size.to_string())
        .arg("--max-batches")
        .arg("1")
        .arg("--concurrency")
        .arg(config.concurrency.to_string())
        .arg("--min-request-interval")
        .arg(config.min_request_interval_secs.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::scraping::models::{Lifecycle, RunMode, SessionStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn session() -> ParsingSession {
        let now = Utc::now();
        ParsingSession {
            id: 42,
            supplier_name: "acme".to_string(),
            session_run_id: Uuid::new_v4(),
            lifecycle_status: Lifecycle::Created,
            status: SessionStatus::Pending,
            run_mode: RunMode::Full,
            total_urls: 0,
            pages_processed: 0,
            items_updated: 0,
            errors_count: 0,
            collect_urls_count: None,
            collect_started_at: None,
            collect_finished_at: None,
            reset_started_at: None,
            reset_finished_at: None,
            parse_started_at: None,
            parse_finished_at: None,
            finished_at: None,
            pid: None,
            last_heartbeat_at: None,
            job_dispatched_at: None,
            stop_reason: None,
            error_message: None,
            collect_stats_json: None,
            parse_stats_json: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn every_phase_carries_session_and_callback() {
        let config = ScraperConfig::default();
        for spec in [
            collect_command(&config, &session()),
            reset_command(&config, &session()),
            parse_batch_command(&config, &session()),
        ] {
            assert_eq!(spec.program, "scraper");
            assert!(spec.args.windows(2).any(|w| w == ["--session-id", "42"]));
            assert!(spec.args.windows(2).any(|w| w == ["--supplier", "acme"]));
            assert!(spec.args.contains(&"--api-callback".to_string()));
            assert!(spec.args.contains(&"--api-token".to_string()));
            assert!(spec
                .envs
                .iter()
                .any(|(k, _)| k == "SCRAPER_MODULE_PATH"));
        }
    }

    #[test]
    fn collect_and_reset_use_phase_flags() {
        let config = ScraperConfig::default();
        assert!(collect_command(&config, &session())
            .args
            .contains(&"--collect-only".to_string()));
        assert!(reset_command(&config, &session())
            .args
            .contains(&"--reset-only".to_string()));
    }

    #[test]
    fn parse_batch_is_bounded_to_one_batch() {
        let config = ScraperConfig::default();
        let spec = parse_batch_command(&config, &session());
        assert!(spec.args.contains(&"--queue".to_string()));
        assert!(spec.args.windows(2).any(|w| w == ["--batch-size", "30"]));
        assert!(spec.args.windows(2).any(|w| w == ["--max-batches", "1"]));
    }
}
