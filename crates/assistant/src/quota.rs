//! Per-tenant admission and usage accounting.
//!
//! [`QuotaManager`] meters three independent windows per tenant: an hourly
//! request count, a daily token budget, and a monthly token budget. All
//! three must pass for admission. The decision (rollover + compare) and
//! the paired write happen under one per-tenant lock, so concurrent runs
//! for the same tenant can never over-admit; unrelated tenants never
//! contend.
//!
//! Admission is check-and-reserve: an allowed `admit` consumes one request
//! slot immediately. `record` later adds the token counters only; the
//! request slot was already taken.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as TimeDelta, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use cd_domain::config::{AssistantConfig, ModelPricing, QuotaConfig};

use crate::ledger::{UsageLedger, UsageLedgerEntry};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which window denied admission. Callers surface different messages and
/// retry delays per scope, so the distinction is part of the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuotaScope {
    RequestRate,
    DailyTokens,
    MonthlyTokens,
}

impl QuotaScope {
    pub fn as_str(self) -> &'static str {
        match self {
            QuotaScope::RequestRate => "request-rate",
            QuotaScope::DailyTokens => "daily-token",
            QuotaScope::MonthlyTokens => "monthly-token",
        }
    }
}

/// Returned when admission is denied.
#[derive(Debug, Clone, Copy)]
pub struct QuotaDenied {
    pub scope: QuotaScope,
    /// Time until the exhausted window rolls over.
    pub retry_after: Duration,
}

/// Returned when admission is allowed. Remaining capacity per window,
/// after the request-slot reserve; `None` = uncapped.
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub remaining_hourly_requests: Option<u64>,
    pub remaining_daily_tokens: Option<u64>,
    pub remaining_monthly_tokens: Option<u64>,
}

/// One rolling counter. `window_start` always holds the start instant of
/// the current window; reads that observe a crossed boundary roll the
/// window before comparing against any limit.
#[derive(Debug, Clone, Copy)]
struct UsageWindow {
    count: u64,
    window_start: DateTime<Utc>,
}

impl UsageWindow {
    fn new(now: DateTime<Utc>) -> Self {
        Self { count: 0, window_start: now }
    }

    fn reset(&mut self, now: DateTime<Utc>) {
        self.count = 0;
        self.window_start = now;
    }
}

/// All mutable usage state for one tenant. Created lazily on first
/// request; mutated only through [`QuotaManager`] while holding the
/// tenant's lock.
#[derive(Debug, Clone)]
struct TenantUsage {
    hourly: UsageWindow,
    daily: UsageWindow,
    monthly: UsageWindow,
    lifetime_tokens: u64,
    month_cost_usd: f64,
}

impl TenantUsage {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            hourly: UsageWindow::new(now),
            daily: UsageWindow::new(now),
            monthly: UsageWindow::new(now),
            lifetime_tokens: 0,
            month_cost_usd: 0.0,
        }
    }

    /// Roll any expired window before a comparison or an increment.
    ///
    /// Hourly and daily windows roll a fixed interval from their own
    /// start. The monthly window rolls when the calendar year+month has
    /// advanced past `window_start`'s; the new window starts at the
    /// observation instant, i.e. it slides forward on first touch after
    /// the boundary rather than resetting on a precise anniversary.
    fn roll_over(&mut self, now: DateTime<Utc>) {
        if now - self.hourly.window_start >= TimeDelta::hours(1) {
            self.hourly.reset(now);
        }
        if now - self.daily.window_start >= TimeDelta::hours(24) {
            self.daily.reset(now);
        }
        if month_key(now) != month_key(self.monthly.window_start) && now > self.monthly.window_start
        {
            self.monthly.reset(now);
            self.month_cost_usd = 0.0;
        }
    }
}

fn month_key(t: DateTime<Utc>) -> (i32, u32) {
    (t.year(), t.month())
}

fn next_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(|| now + TimeDelta::days(31))
}

fn until(target: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (target - now).to_std().unwrap_or_default()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read-only view of one window for quota-status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WindowStatus {
    pub used: u64,
    pub limit: Option<u64>,
    pub window_start: DateTime<Utc>,
    pub resets_in_secs: u64,
}

/// Snapshot of a tenant's three windows plus cost figures.
#[derive(Debug, Clone, Serialize)]
pub struct TenantQuotaStatus {
    pub tenant_id: String,
    pub hourly_requests: WindowStatus,
    pub daily_tokens: WindowStatus,
    pub monthly_tokens: WindowStatus,
    pub lifetime_tokens: u64,
    pub month_cost_usd: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// QuotaManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct QuotaManager {
    config: QuotaConfig,
    pricing: HashMap<String, ModelPricing>,
    fallback_per_1m: Option<f64>,
    ledger: Arc<dyn UsageLedger>,
    /// Outer lock guards the map only; the per-tenant lock serializes
    /// every decision + write for that tenant.
    tenants: Mutex<HashMap<String, Arc<Mutex<TenantUsage>>>>,
}

impl QuotaManager {
    pub fn new(config: &AssistantConfig, ledger: Arc<dyn UsageLedger>) -> Self {
        Self {
            config: config.quota.clone(),
            pricing: config.llm.pricing.clone(),
            fallback_per_1m: config.llm.fallback_per_1m,
            ledger,
            tenants: Mutex::new(HashMap::new()),
        }
    }

    /// Decide admission for one upcoming provider call.
    ///
    /// Rolls expired windows, checks all three against their limits, and
    /// on success reserves one request slot so that concurrent admissions
    /// cannot all pass on the same stale read.
    pub fn admit(&self, tenant_id: &str) -> Result<Admission, QuotaDenied> {
        self.admit_at(tenant_id, Utc::now())
    }

    pub(crate) fn admit_at(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Admission, QuotaDenied> {
        let limits = self.config.limits_for(tenant_id);
        let cell = self.tenant_cell(tenant_id, now);
        let mut usage = cell.lock();
        usage.roll_over(now);

        if let Some(limit) = limits.hourly_requests {
            if usage.hourly.count >= limit {
                return Err(QuotaDenied {
                    scope: QuotaScope::RequestRate,
                    retry_after: until(usage.hourly.window_start + TimeDelta::hours(1), now),
                });
            }
        }
        if let Some(limit) = limits.daily_tokens {
            if usage.daily.count >= limit {
                return Err(QuotaDenied {
                    scope: QuotaScope::DailyTokens,
                    retry_after: until(usage.daily.window_start + TimeDelta::hours(24), now),
                });
            }
        }
        if let Some(limit) = limits.monthly_tokens {
            if usage.monthly.count >= limit {
                return Err(QuotaDenied {
                    scope: QuotaScope::MonthlyTokens,
                    retry_after: until(next_month_start(now), now),
                });
            }
        }

        // Reserve the request slot under the same lock as the checks.
        usage.hourly.count += 1;

        Ok(Admission {
            remaining_hourly_requests: limits
                .hourly_requests
                .map(|l| l.saturating_sub(usage.hourly.count)),
            remaining_daily_tokens: limits.daily_tokens.map(|l| l.saturating_sub(usage.daily.count)),
            remaining_monthly_tokens: limits
                .monthly_tokens
                .map(|l| l.saturating_sub(usage.monthly.count)),
        })
    }

    /// Record consumed usage after a provider call (or a whole run).
    ///
    /// Token counters and cost update synchronously under the tenant
    /// lock; the ledger append happens after the lock is released and is
    /// best-effort. Calls that already consumed provider tokens are
    /// billable no matter what happened afterwards, so callers invoke
    /// this on every exit path.
    pub fn record(
        &self,
        tenant_id: &str,
        actor_id: &str,
        model_id: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) {
        self.record_at(tenant_id, actor_id, model_id, input_tokens, output_tokens, Utc::now());
    }

    pub(crate) fn record_at(
        &self,
        tenant_id: &str,
        actor_id: &str,
        model_id: &str,
        input_tokens: u64,
        output_tokens: u64,
        now: DateTime<Utc>,
    ) {
        let total_tokens = input_tokens + output_tokens;
        let cost_usd = self.cost_for(model_id, input_tokens, output_tokens);

        {
            let cell = self.tenant_cell(tenant_id, now);
            let mut usage = cell.lock();
            usage.roll_over(now);
            usage.daily.count += total_tokens;
            usage.monthly.count += total_tokens;
            usage.lifetime_tokens += total_tokens;
            usage.month_cost_usd += cost_usd;
        }

        let entry = UsageLedgerEntry {
            entry_id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            actor_id: actor_id.to_string(),
            model_id: model_id.to_string(),
            input_tokens,
            output_tokens,
            total_tokens,
            cost_usd,
            recorded_at: now,
        };
        if let Err(e) = self.ledger.append(&entry) {
            tracing::warn!(
                error = %e,
                tenant_id,
                total_tokens,
                "failed to append usage ledger entry"
            );
        }
    }

    /// Snapshot the tenant's windows and cost for status endpoints.
    ///
    /// Never mutates: rollover for display is computed on a copy.
    pub fn stats_for(&self, tenant_id: &str) -> TenantQuotaStatus {
        self.stats_for_at(tenant_id, Utc::now())
    }

    pub(crate) fn stats_for_at(&self, tenant_id: &str, now: DateTime<Utc>) -> TenantQuotaStatus {
        let limits = self.config.limits_for(tenant_id);

        let mut copy = {
            let tenants = self.tenants.lock();
            match tenants.get(tenant_id) {
                Some(cell) => cell.lock().clone(),
                None => TenantUsage::new(now),
            }
        };
        copy.roll_over(now);

        TenantQuotaStatus {
            tenant_id: tenant_id.to_string(),
            hourly_requests: WindowStatus {
                used: copy.hourly.count,
                limit: limits.hourly_requests,
                window_start: copy.hourly.window_start,
                resets_in_secs: until(copy.hourly.window_start + TimeDelta::hours(1), now)
                    .as_secs(),
            },
            daily_tokens: WindowStatus {
                used: copy.daily.count,
                limit: limits.daily_tokens,
                window_start: copy.daily.window_start,
                resets_in_secs: until(copy.daily.window_start + TimeDelta::hours(24), now)
                    .as_secs(),
            },
            monthly_tokens: WindowStatus {
                used: copy.monthly.count,
                limit: limits.monthly_tokens,
                window_start: copy.monthly.window_start,
                resets_in_secs: until(next_month_start(now), now).as_secs(),
            },
            lifetime_tokens: copy.lifetime_tokens,
            month_cost_usd: copy.month_cost_usd,
        }
    }

    /// Drop a tenant's in-memory counters. Test/admin hook only; ledger
    /// entries are untouched.
    pub fn reset(&self, tenant_id: &str) {
        self.tenants.lock().remove(tenant_id);
    }

    // ── Private ──────────────────────────────────────────────────────

    fn tenant_cell(&self, tenant_id: &str, now: DateTime<Utc>) -> Arc<Mutex<TenantUsage>> {
        let mut tenants = self.tenants.lock();
        Arc::clone(
            tenants
                .entry(tenant_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(TenantUsage::new(now)))),
        )
    }

    fn cost_for(&self, model_id: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        if let Some(pricing) = self.pricing.get(model_id) {
            return pricing.estimate_cost(input_tokens, output_tokens);
        }
        match self.fallback_per_1m {
            Some(rate) => (input_tokens + output_tokens) as f64 * rate / 1_000_000.0,
            None => {
                tracing::debug!(model_id, "no pricing entry; cost recorded as zero");
                0.0
            }
        }
    }
}
