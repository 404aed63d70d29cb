use std::sync::{Arc, Mutex};

use chrono::{Datelike, TimeZone, Utc};
use rusqlite::Connection;
use tracing::{info, instrument};
use uuid::Uuid;

use atrium_core::TokenUsage;
use atrium_llm::{compute_cost, LlmClient, PricingCache};

use crate::error::{QuotaError, Result};
use crate::types::{
    CurrentUsage, QuotaAlert, QuotaCheck, QuotaScope, QuotaUpdate, UsageLogEntry, UsageQuota,
};

const QUOTA_COLS: &str = "id, scope, scope_id, daily_cost_limit_usd, monthly_cost_limit_usd,
        daily_token_limit, monthly_token_limit, requests_per_minute, requests_per_hour,
        alert_threshold_percent, created_at, updated_at";

/// Rolling-window admission control and usage accounting.
///
/// Counters are computed by summing usage_logs rows in the current daily
/// (UTC midnight) and monthly (first-of-month) windows. Admission is a
/// snapshot decision: concurrent turns may both pass and collectively
/// overdraw; alerts surface the overdraft.
pub struct QuotaService {
    db: Arc<Mutex<Connection>>,
}

impl QuotaService {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn get_global_quota(&self) -> Result<Option<UsageQuota>> {
        let db = self.db.lock().unwrap();
        query_quota(
            &db,
            &format!("SELECT {QUOTA_COLS} FROM usage_quotas WHERE scope = 'global'"),
            [],
        )
    }

    /// Fetch the global quota, seeding the canonical row on first call.
    pub fn get_or_create_global_quota(&self) -> Result<UsageQuota> {
        if let Some(quota) = self.get_global_quota()? {
            return Ok(quota);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();
        {
            let db = self.db.lock().unwrap();
            db.execute(
                "INSERT OR IGNORE INTO usage_quotas
                 (id, scope, scope_id, alert_threshold_percent, created_at, updated_at)
                 VALUES (?1, 'global', NULL, 80, ?2, ?2)",
                rusqlite::params![id, now],
            )?;
        }
        info!("global quota row seeded");
        Ok(self.get_global_quota()?.expect("global quota just seeded"))
    }

    pub fn update_global_quota(&self, update: &QuotaUpdate) -> Result<UsageQuota> {
        let quota = self.get_or_create_global_quota()?;
        self.apply_update(&quota.id, update)?;
        Ok(self.get_global_quota()?.expect("global quota exists"))
    }

    pub fn get_user_quota(&self, user_id: &str) -> Result<Option<UsageQuota>> {
        let db = self.db.lock().unwrap();
        query_quota(
            &db,
            &format!("SELECT {QUOTA_COLS} FROM usage_quotas WHERE scope = 'user' AND scope_id = ?1"),
            rusqlite::params![user_id],
        )
    }

    /// Create or update a per-user override.
    pub fn set_user_quota(&self, user_id: &str, update: &QuotaUpdate) -> Result<UsageQuota> {
        let existing = self.get_user_quota(user_id)?;
        let id = match existing {
            Some(q) => q.id,
            None => {
                let id = Uuid::new_v4().to_string();
                let now = chrono::Utc::now().to_rfc3339();
                let db = self.db.lock().unwrap();
                db.execute(
                    "INSERT INTO usage_quotas
                     (id, scope, scope_id, alert_threshold_percent, created_at, updated_at)
                     VALUES (?1, 'user', ?2, 80, ?3, ?3)",
                    rusqlite::params![id, user_id, now],
                )?;
                id
            }
        };
        self.apply_update(&id, update)?;
        Ok(self.get_user_quota(user_id)?.expect("user quota exists"))
    }

    fn apply_update(&self, id: &str, update: &QuotaUpdate) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        if let Some(v) = update.daily_cost_limit_usd {
            db.execute(
                "UPDATE usage_quotas SET daily_cost_limit_usd = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![v, now, id],
            )?;
        }
        if let Some(v) = update.monthly_cost_limit_usd {
            db.execute(
                "UPDATE usage_quotas SET monthly_cost_limit_usd = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![v, now, id],
            )?;
        }
        if let Some(v) = update.daily_token_limit {
            db.execute(
                "UPDATE usage_quotas SET daily_token_limit = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![v, now, id],
            )?;
        }
        if let Some(v) = update.monthly_token_limit {
            db.execute(
                "UPDATE usage_quotas SET monthly_token_limit = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![v, now, id],
            )?;
        }
        if let Some(v) = update.requests_per_minute {
            db.execute(
                "UPDATE usage_quotas SET requests_per_minute = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![v, now, id],
            )?;
        }
        if let Some(v) = update.requests_per_hour {
            db.execute(
                "UPDATE usage_quotas SET requests_per_hour = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![v, now, id],
            )?;
        }
        if let Some(v) = update.alert_threshold_percent {
            db.execute(
                "UPDATE usage_quotas SET alert_threshold_percent = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![v.min(100), now, id],
            )?;
        }
        Ok(())
    }

    /// Sum usage_logs over the current daily and monthly windows.
    pub fn current_usage(&self) -> Result<CurrentUsage> {
        let now = Utc::now();
        let day_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| Utc.from_utc_datetime(&dt).to_rfc3339())
            .unwrap_or_else(|| now.to_rfc3339());
        let month_start = now
            .date_naive()
            .with_day(1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| Utc.from_utc_datetime(&dt).to_rfc3339())
            .unwrap_or_else(|| now.to_rfc3339());

        let db = self.db.lock().unwrap();
        let sums = |since: &str| -> Result<(i64, f64)> {
            db.query_row(
                "SELECT COALESCE(SUM(total_tokens), 0), COALESCE(SUM(cost_usd), 0)
                 FROM usage_logs WHERE created_at >= ?1",
                rusqlite::params![since],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(QuotaError::Database)
        };

        let (daily_tokens, daily_cost) = sums(&day_start)?;
        let (monthly_tokens, monthly_cost) = sums(&month_start)?;

        Ok(CurrentUsage {
            daily_tokens_used: daily_tokens,
            daily_cost_used: daily_cost,
            monthly_tokens_used: monthly_tokens,
            monthly_cost_used: monthly_cost,
        })
    }

    /// The quota applicable to an optional user scope: the user's override
    /// when one exists, otherwise the global row.
    fn applicable_quota(&self, user_id: Option<&str>) -> Result<Option<UsageQuota>> {
        if let Some(uid) = user_id {
            if let Some(q) = self.get_user_quota(uid)? {
                return Ok(Some(q));
            }
        }
        self.get_global_quota()
    }

    /// Admission decision for a new turn.
    ///
    /// Denial precedence: daily cost, monthly cost, daily tokens, monthly
    /// tokens. An absent limit means no bound in that dimension.
    #[instrument(skip(self))]
    pub fn check(&self, user_id: Option<&str>) -> Result<QuotaCheck> {
        let usage = self.current_usage()?;
        let quota = self.applicable_quota(user_id)?;

        let mut result = QuotaCheck {
            allowed: true,
            reason: None,
            daily_cost_used: usage.daily_cost_used,
            daily_cost_limit: None,
            monthly_cost_used: usage.monthly_cost_used,
            monthly_cost_limit: None,
            daily_tokens_used: usage.daily_tokens_used,
            daily_token_limit: None,
            monthly_tokens_used: usage.monthly_tokens_used,
            monthly_token_limit: None,
        };

        let Some(quota) = quota else {
            return Ok(result);
        };

        result.daily_cost_limit = quota.daily_cost_limit_usd;
        result.monthly_cost_limit = quota.monthly_cost_limit_usd;
        result.daily_token_limit = quota.daily_token_limit;
        result.monthly_token_limit = quota.monthly_token_limit;

        if let Some(limit) = quota.daily_cost_limit_usd {
            if limit > 0.0 && usage.daily_cost_used >= limit {
                result.allowed = false;
                result.reason = Some("Daily cost limit exceeded".to_string());
                return Ok(result);
            }
        }
        if let Some(limit) = quota.monthly_cost_limit_usd {
            if limit > 0.0 && usage.monthly_cost_used >= limit {
                result.allowed = false;
                result.reason = Some("Monthly cost limit exceeded".to_string());
                return Ok(result);
            }
        }
        if let Some(limit) = quota.daily_token_limit {
            if limit > 0 && usage.daily_tokens_used >= limit {
                result.allowed = false;
                result.reason = Some("Daily token limit exceeded".to_string());
                return Ok(result);
            }
        }
        if let Some(limit) = quota.monthly_token_limit {
            if limit > 0 && usage.monthly_tokens_used >= limit {
                result.allowed = false;
                result.reason = Some("Monthly token limit exceeded".to_string());
                return Ok(result);
            }
        }

        Ok(result)
    }

    /// One alert per (dimension, period) at or past the threshold percent.
    pub fn alerts(&self, user_id: Option<&str>) -> Result<Vec<QuotaAlert>> {
        let usage = self.current_usage()?;
        let Some(quota) = self.applicable_quota(user_id)? else {
            return Ok(Vec::new());
        };

        let threshold = quota.alert_threshold_percent;
        let mut alerts = Vec::new();

        let mut push = |alert_type: &'static str,
                        period: &'static str,
                        current: f64,
                        limit: f64| {
            if limit <= 0.0 {
                return;
            }
            let percent = current / limit * 100.0;
            if percent >= threshold as f64 {
                alerts.push(QuotaAlert {
                    alert_type,
                    period,
                    current_value: current,
                    limit_value: limit,
                    percent_used: percent,
                    threshold_percent: threshold,
                    is_exceeded: percent >= 100.0,
                });
            }
        };

        if let Some(limit) = quota.daily_cost_limit_usd {
            push("cost", "daily", usage.daily_cost_used, limit);
        }
        if let Some(limit) = quota.monthly_cost_limit_usd {
            push("cost", "monthly", usage.monthly_cost_used, limit);
        }
        if let Some(limit) = quota.daily_token_limit {
            push("tokens", "daily", usage.daily_tokens_used as f64, limit as f64);
        }
        if let Some(limit) = quota.monthly_token_limit {
            push("tokens", "monthly", usage.monthly_tokens_used as f64, limit as f64);
        }

        Ok(alerts)
    }

    /// Record one completed assistant turn, pricing it via the shared cache.
    /// Pricing failures degrade to zero cost.
    pub async fn log_usage(
        &self,
        client: &LlmClient,
        pricing: &PricingCache,
        assistant_id: Option<&str>,
        conversation_id: Option<&str>,
        message_id: Option<&str>,
        model: &str,
        usage: TokenUsage,
    ) -> Result<UsageLogEntry> {
        let model_pricing = pricing.model_pricing(client, model).await;
        let cost_usd = compute_cost(usage, model_pricing);
        self.write_usage(assistant_id, conversation_id, message_id, model, usage, cost_usd)
    }

    /// Insert a usage row with a pre-computed cost.
    pub fn write_usage(
        &self,
        assistant_id: Option<&str>,
        conversation_id: Option<&str>,
        message_id: Option<&str>,
        model: &str,
        usage: TokenUsage,
        cost_usd: f64,
    ) -> Result<UsageLogEntry> {
        let entry = UsageLogEntry {
            id: Uuid::new_v4().to_string(),
            assistant_id: assistant_id.map(String::from),
            conversation_id: conversation_id.map(String::from),
            message_id: message_id.map(String::from),
            model: model.to_string(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            cost_usd,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO usage_logs
             (id, assistant_id, conversation_id, message_id, model,
              prompt_tokens, completion_tokens, total_tokens, cost_usd, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            rusqlite::params![
                entry.id,
                entry.assistant_id,
                entry.conversation_id,
                entry.message_id,
                entry.model,
                entry.prompt_tokens,
                entry.completion_tokens,
                entry.total_tokens,
                entry.cost_usd,
                entry.created_at,
            ],
        )?;

        Ok(entry)
    }
}

fn query_quota<P: rusqlite::Params>(
    db: &Connection,
    sql: &str,
    params: P,
) -> Result<Option<UsageQuota>> {
    match db.query_row(sql, params, row_to_quota) {
        Ok(q) => Ok(Some(q)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(QuotaError::Database(e)),
    }
}

fn row_to_quota(row: &rusqlite::Row<'_>) -> rusqlite::Result<UsageQuota> {
    let scope_str: String = row.get(1)?;
    Ok(UsageQuota {
        id: row.get(0)?,
        scope: scope_str.parse().unwrap_or(QuotaScope::Global),
        scope_id: row.get(2)?,
        daily_cost_limit_usd: row.get(3)?,
        monthly_cost_limit_usd: row.get(4)?,
        daily_token_limit: row.get(5)?,
        monthly_token_limit: row.get(6)?,
        requests_per_minute: row.get(7)?,
        requests_per_hour: row.get(8)?,
        alert_threshold_percent: row.get::<_, i64>(9)? as u8,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> QuotaService {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        QuotaService::new(Arc::new(Mutex::new(conn)))
    }

    fn record(svc: &QuotaService, tokens: u32, cost: f64) {
        svc.write_usage(
            Some("a-1"),
            Some("c-1"),
            None,
            "test/model",
            TokenUsage::new(tokens / 2, tokens - tokens / 2),
            cost,
        )
        .unwrap();
    }

    #[test]
    fn global_quota_is_seeded_once() {
        let svc = service();
        let first = svc.get_or_create_global_quota().unwrap();
        let second = svc.get_or_create_global_quota().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.alert_threshold_percent, 80);
    }

    #[test]
    fn unlimited_quota_admits_everything() {
        let svc = service();
        svc.get_or_create_global_quota().unwrap();
        record(&svc, 100_000, 42.0);
        let check = svc.check(None).unwrap();
        assert!(check.allowed);
        assert!(check.reason.is_none());
    }

    #[test]
    fn daily_cost_limit_denies_with_named_reason() {
        let svc = service();
        svc.update_global_quota(&QuotaUpdate {
            daily_cost_limit_usd: Some(0.01),
            ..Default::default()
        })
        .unwrap();

        // Below the limit: admitted.
        record(&svc, 100, 0.005);
        assert!(svc.check(None).unwrap().allowed);

        // Crossing the limit: next admission is denied.
        record(&svc, 100, 0.02);
        let check = svc.check(None).unwrap();
        assert!(!check.allowed);
        assert!(check.reason.as_deref().unwrap().contains("Daily cost limit"));
    }

    #[test]
    fn denial_precedence_prefers_daily_cost() {
        let svc = service();
        svc.update_global_quota(&QuotaUpdate {
            daily_cost_limit_usd: Some(0.01),
            daily_token_limit: Some(10),
            ..Default::default()
        })
        .unwrap();
        record(&svc, 1000, 1.0); // exceeds both dimensions
        let check = svc.check(None).unwrap();
        assert!(check.reason.as_deref().unwrap().contains("cost"));
    }

    #[test]
    fn user_quota_overrides_global() {
        let svc = service();
        svc.update_global_quota(&QuotaUpdate {
            daily_token_limit: Some(1_000_000),
            ..Default::default()
        })
        .unwrap();
        svc.set_user_quota(
            "u-1",
            &QuotaUpdate {
                daily_token_limit: Some(10),
                ..Default::default()
            },
        )
        .unwrap();

        record(&svc, 100, 0.0);
        assert!(svc.check(None).unwrap().allowed);
        let check = svc.check(Some("u-1")).unwrap();
        assert!(!check.allowed);
        assert!(check.reason.as_deref().unwrap().contains("Daily token limit"));
    }

    #[test]
    fn alerts_fire_at_threshold_and_flag_exceeded() {
        let svc = service();
        svc.update_global_quota(&QuotaUpdate {
            daily_cost_limit_usd: Some(1.0),
            alert_threshold_percent: Some(80),
            ..Default::default()
        })
        .unwrap();

        record(&svc, 10, 0.5);
        assert!(svc.alerts(None).unwrap().is_empty());

        record(&svc, 10, 0.4); // 90%
        let alerts = svc.alerts(None).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "cost");
        assert_eq!(alerts[0].period, "daily");
        assert!(!alerts[0].is_exceeded);

        record(&svc, 10, 0.2); // 110%
        let alerts = svc.alerts(None).unwrap();
        assert!(alerts[0].is_exceeded);
    }

    #[test]
    fn daily_sum_matches_logged_costs() {
        let svc = service();
        record(&svc, 10, 0.000003);
        record(&svc, 10, 0.000007);
        let usage = svc.current_usage().unwrap();
        assert!((usage.daily_cost_used - 0.00001).abs() < 1e-9);
        assert_eq!(usage.daily_tokens_used, 20);
    }
}
