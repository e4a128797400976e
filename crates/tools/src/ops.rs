//! Built-in field-operations tools: customers, jobs, schedule.
//!
//! Each tool wraps one call against [`OpsStore`], the seam to the
//! application's data layer. The real store lives in the host server;
//! [`InMemoryOpsStore`] backs tests and local development.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cd_domain::error::{Error, Result};

use crate::registry::{ToolContext, ToolHandler, ToolRegistry};
use crate::spec::{ParamKind, ParamSpec, ToolSpec};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records and the store seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub name: String,
    pub phone: Option<String>,
    pub site_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Unscheduled,
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub customer_id: String,
    pub summary: String,
    pub status: JobStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub customer_id: String,
    pub summary: String,
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Data-access seam to the host application's CRUD layer.
///
/// Every method is tenant-scoped; implementations must not leak records
/// across tenants.
#[async_trait::async_trait]
pub trait OpsStore: Send + Sync {
    async fn find_customers(&self, tenant_id: &str, query: &str) -> Result<Vec<CustomerRecord>>;
    async fn get_job(&self, tenant_id: &str, job_id: &str) -> Result<Option<JobRecord>>;
    async fn create_job(&self, tenant_id: &str, job: NewJob) -> Result<JobRecord>;
    async fn upcoming_jobs(&self, tenant_id: &str, within_days: u32) -> Result<Vec<JobRecord>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CustomerLookupTool {
    store: Arc<dyn OpsStore>,
}

#[async_trait::async_trait]
impl ToolHandler for CustomerLookupTool {
    async fn call(&self, arguments: Value, ctx: &ToolContext) -> Result<Value> {
        let query = str_arg(&arguments, "query")?;
        let customers = self.store.find_customers(&ctx.tenant_id, query).await?;
        Ok(serde_json::json!({ "customers": customers }))
    }
}

struct JobLookupTool {
    store: Arc<dyn OpsStore>,
}

#[async_trait::async_trait]
impl ToolHandler for JobLookupTool {
    async fn call(&self, arguments: Value, ctx: &ToolContext) -> Result<Value> {
        let job_id = str_arg(&arguments, "job_id")?;
        match self.store.get_job(&ctx.tenant_id, job_id).await? {
            Some(job) => Ok(serde_json::to_value(job)?),
            None => Err(Error::Store(format!("job '{job_id}' not found"))),
        }
    }
}

struct JobCreateTool {
    store: Arc<dyn OpsStore>,
}

#[async_trait::async_trait]
impl ToolHandler for JobCreateTool {
    async fn call(&self, arguments: Value, ctx: &ToolContext) -> Result<Value> {
        let scheduled_for = match arguments.get("scheduled_for").and_then(Value::as_str) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| Error::Store(format!("invalid scheduled_for: {e}")))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };
        let job = NewJob {
            customer_id: str_arg(&arguments, "customer_id")?.to_string(),
            summary: str_arg(&arguments, "summary")?.to_string(),
            scheduled_for,
        };
        let created = self.store.create_job(&ctx.tenant_id, job).await?;
        Ok(serde_json::to_value(created)?)
    }
}

struct ScheduleUpcomingTool {
    store: Arc<dyn OpsStore>,
}

#[async_trait::async_trait]
impl ToolHandler for ScheduleUpcomingTool {
    async fn call(&self, arguments: Value, ctx: &ToolContext) -> Result<Value> {
        let within_days = arguments
            .get("within_days")
            .and_then(Value::as_u64)
            .unwrap_or(7)
            .min(90) as u32;
        let jobs = self.store.upcoming_jobs(&ctx.tenant_id, within_days).await?;
        Ok(serde_json::json!({ "within_days": within_days, "jobs": jobs }))
    }
}

// Arguments reach handlers schema-validated; this guards direct callers.
fn str_arg<'a>(arguments: &'a Value, field: &str) -> Result<&'a str> {
    arguments
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Other(format!("missing argument '{field}'")))
}

/// Register the field-ops tool set against a store implementation.
pub fn register_ops_tools(registry: &mut ToolRegistry, store: Arc<dyn OpsStore>) {
    registry.register(
        ToolSpec::new(
            "customer.lookup",
            "Find customers by name, phone, or address fragment.",
        )
        .param(ParamSpec::required("query", ParamKind::String, "Search text")),
        Arc::new(CustomerLookupTool { store: Arc::clone(&store) }),
    );

    registry.register(
        ToolSpec::new("job.lookup", "Fetch one job by its id (e.g. 'J-1042').")
            .param(ParamSpec::required("job_id", ParamKind::String, "Job id")),
        Arc::new(JobLookupTool { store: Arc::clone(&store) }),
    );

    registry.register(
        ToolSpec::new("job.create", "Create a new job for a customer.")
            .param(ParamSpec::required("customer_id", ParamKind::String, "Customer id"))
            .param(ParamSpec::required("summary", ParamKind::String, "One-line work summary"))
            .param(ParamSpec::optional(
                "scheduled_for",
                ParamKind::String,
                "RFC 3339 start time; omit to leave unscheduled",
            )),
        Arc::new(JobCreateTool { store: Arc::clone(&store) }),
    );

    registry.register(
        ToolSpec::new("schedule.upcoming", "List jobs scheduled in the next N days.")
            .param(ParamSpec::optional(
                "within_days",
                ParamKind::Integer,
                "Horizon in days (default 7, max 90)",
            )),
        Arc::new(ScheduleUpcomingTool { store }),
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct TenantData {
    customers: Vec<CustomerRecord>,
    jobs: Vec<JobRecord>,
    next_job_seq: u64,
}

/// Tenant-partitioned in-memory [`OpsStore`] for tests and development.
#[derive(Default)]
pub struct InMemoryOpsStore {
    tenants: RwLock<std::collections::HashMap<String, TenantData>>,
}

impl InMemoryOpsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_customer(&self, tenant_id: &str, customer: CustomerRecord) {
        self.tenants
            .write()
            .entry(tenant_id.to_string())
            .or_default()
            .customers
            .push(customer);
    }

    pub fn seed_job(&self, tenant_id: &str, job: JobRecord) {
        self.tenants
            .write()
            .entry(tenant_id.to_string())
            .or_default()
            .jobs
            .push(job);
    }
}

#[async_trait::async_trait]
impl OpsStore for InMemoryOpsStore {
    async fn find_customers(&self, tenant_id: &str, query: &str) -> Result<Vec<CustomerRecord>> {
        let tenants = self.tenants.read();
        let Some(data) = tenants.get(tenant_id) else {
            return Ok(Vec::new());
        };
        let needle = query.to_lowercase();
        Ok(data
            .customers
            .iter()
            .filter(|c| {
                c.name.to_lowercase().contains(&needle)
                    || c.phone.as_deref().is_some_and(|p| p.contains(&needle))
                    || c.site_address
                        .as_deref()
                        .is_some_and(|a| a.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect())
    }

    async fn get_job(&self, tenant_id: &str, job_id: &str) -> Result<Option<JobRecord>> {
        let tenants = self.tenants.read();
        Ok(tenants
            .get(tenant_id)
            .and_then(|data| data.jobs.iter().find(|j| j.job_id == job_id).cloned()))
    }

    async fn create_job(&self, tenant_id: &str, job: NewJob) -> Result<JobRecord> {
        let mut tenants = self.tenants.write();
        let data = tenants.entry(tenant_id.to_string()).or_default();

        if !data.customers.iter().any(|c| c.customer_id == job.customer_id) {
            return Err(Error::Store(format!("customer '{}' not found", job.customer_id)));
        }

        data.next_job_seq += 1;
        let record = JobRecord {
            job_id: format!("J-{}", 1000 + data.next_job_seq),
            customer_id: job.customer_id,
            summary: job.summary,
            status: if job.scheduled_for.is_some() {
                JobStatus::Scheduled
            } else {
                JobStatus::Unscheduled
            },
            scheduled_for: job.scheduled_for,
        };
        data.jobs.push(record.clone());
        Ok(record)
    }

    async fn upcoming_jobs(&self, tenant_id: &str, within_days: u32) -> Result<Vec<JobRecord>> {
        let horizon = Utc::now() + Duration::days(i64::from(within_days));
        let tenants = self.tenants.read();
        let Some(data) = tenants.get(tenant_id) else {
            return Ok(Vec::new());
        };
        let mut jobs: Vec<JobRecord> = data
            .jobs
            .iter()
            .filter(|j| {
                j.status == JobStatus::Scheduled
                    && j.scheduled_for.is_some_and(|at| at <= horizon && at >= Utc::now())
            })
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.scheduled_for);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(tenant: &str) -> ToolContext {
        ToolContext { tenant_id: tenant.into(), actor_id: "user-1".into() }
    }

    fn seeded_store() -> Arc<InMemoryOpsStore> {
        let store = Arc::new(InMemoryOpsStore::new());
        store.seed_customer(
            "acme",
            CustomerRecord {
                customer_id: "C-7".into(),
                name: "Harbor Bakery".into(),
                phone: Some("555-0142".into()),
                site_address: Some("12 Dock Rd".into()),
            },
        );
        store.seed_job(
            "acme",
            JobRecord {
                job_id: "J-1001".into(),
                customer_id: "C-7".into(),
                summary: "Oven inspection".into(),
                status: JobStatus::Scheduled,
                scheduled_for: Some(Utc::now() + Duration::days(2)),
            },
        );
        store
    }

    #[tokio::test]
    async fn customer_lookup_matches_name_fragment() {
        let store = seeded_store();
        let tool = CustomerLookupTool { store };
        let out = tool
            .call(serde_json::json!({"query": "harbor"}), &ctx("acme"))
            .await
            .unwrap();
        assert_eq!(out["customers"][0]["customer_id"], "C-7");
    }

    #[tokio::test]
    async fn lookup_is_tenant_scoped() {
        let store = seeded_store();
        let tool = CustomerLookupTool { store };
        let out = tool
            .call(serde_json::json!({"query": "harbor"}), &ctx("globex"))
            .await
            .unwrap();
        assert!(out["customers"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn job_create_assigns_id_and_status() {
        let store = seeded_store();
        let tool = JobCreateTool { store };
        let out = tool
            .call(
                serde_json::json!({
                    "customer_id": "C-7",
                    "summary": "Replace door seal",
                }),
                &ctx("acme"),
            )
            .await
            .unwrap();
        assert!(out["job_id"].as_str().unwrap().starts_with("J-"));
        assert_eq!(out["status"], "unscheduled");
    }

    #[tokio::test]
    async fn job_create_rejects_unknown_customer() {
        let store = seeded_store();
        let tool = JobCreateTool { store };
        let err = tool
            .call(
                serde_json::json!({"customer_id": "C-404", "summary": "x"}),
                &ctx("acme"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("C-404"));
    }

    #[tokio::test]
    async fn unknown_job_is_a_store_error() {
        let store = seeded_store();
        let tool = JobLookupTool { store };
        let err = tool
            .call(serde_json::json!({"job_id": "J-9999"}), &ctx("acme"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn upcoming_respects_horizon() {
        let store = seeded_store();
        store.seed_job(
            "acme",
            JobRecord {
                job_id: "J-1002".into(),
                customer_id: "C-7".into(),
                summary: "Quarterly service".into(),
                status: JobStatus::Scheduled,
                scheduled_for: Some(Utc::now() + Duration::days(30)),
            },
        );
        let tool = ScheduleUpcomingTool { store };
        let out = tool
            .call(serde_json::json!({"within_days": 7}), &ctx("acme"))
            .await
            .unwrap();
        let jobs = out["jobs"].as_array().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0]["job_id"], "J-1001");
    }
}
