use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-tenant usage quota configuration.
///
/// All limits are optional; `None` leaves the corresponding window
/// uncapped. Per-tenant overrides in `per_tenant` take precedence over the
/// defaults, field by field.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuotaConfig {
    /// Default requests-per-hour limit for tenants without an override.
    #[serde(default)]
    pub default_hourly_requests: Option<u64>,
    /// Default tokens-per-day limit.
    #[serde(default)]
    pub default_daily_tokens: Option<u64>,
    /// Default tokens-per-calendar-month limit.
    #[serde(default)]
    pub default_monthly_tokens: Option<u64>,
    /// Per-tenant overrides keyed by tenant id.
    #[serde(default)]
    pub per_tenant: HashMap<String, TenantQuota>,
}

/// Quota limits for a specific tenant. `None` = fall back to the default
/// for that window (or uncapped when no default is set either).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct TenantQuota {
    pub hourly_requests: Option<u64>,
    pub daily_tokens: Option<u64>,
    pub monthly_tokens: Option<u64>,
}

impl QuotaConfig {
    /// Resolve the effective limits for a tenant.
    pub fn limits_for(&self, tenant_id: &str) -> TenantQuota {
        let overrides = self.per_tenant.get(tenant_id).copied().unwrap_or_default();
        TenantQuota {
            hourly_requests: overrides.hourly_requests.or(self.default_hourly_requests),
            daily_tokens: overrides.daily_tokens.or(self.default_daily_tokens),
            monthly_tokens: overrides.monthly_tokens.or(self.default_monthly_tokens),
        }
    }
}
