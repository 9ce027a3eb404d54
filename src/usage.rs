//! Per-tenant usage metering
//!
//! Counters are keyed by tenant, UTC date and operation. Each increment also
//! charges the operation's unit cost. Increments are at-least-once and never
//! fail the calling operation.

use crate::models::{OperationKind, TenantId, UsageKey, UsageTotals};
use crate::state::MetadataStore;
use crate::Result;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Clone)]
pub struct UsageMeter {
    store: Arc<dyn MetadataStore>,
}

impl UsageMeter {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    fn key(tenant_id: &TenantId, operation: OperationKind, date: NaiveDate) -> UsageKey {
        UsageKey {
            tenant_id: tenant_id.clone(),
            date,
            operation,
        }
    }

    /// Add one to today's counter; storage failures are logged and swallowed.
    pub async fn increment(&self, tenant_id: &TenantId, operation: OperationKind) {
        self.increment_by(tenant_id, operation, 1).await
    }

    pub async fn increment_by(&self, tenant_id: &TenantId, operation: OperationKind, amount: u64) {
        let key = Self::key(tenant_id, operation, Utc::now().date_naive());
        let cost = operation.unit_cost() * amount as f64;

        match self.store.increment_usage(&key, amount, cost).await {
            Ok(totals) => debug!(
                tenant_id = %tenant_id,
                operation = %operation,
                count = totals.count,
                cost = totals.cost,
                "Usage recorded"
            ),
            Err(e) => error!(
                tenant_id = %tenant_id,
                operation = %operation,
                error = %e,
                "Failed to record usage"
            ),
        }
    }

    pub async fn totals_on(
        &self,
        tenant_id: &TenantId,
        operation: OperationKind,
        date: NaiveDate,
    ) -> Result<UsageTotals> {
        self.store
            .usage(&Self::key(tenant_id, operation, date))
            .await
    }

    pub async fn count_on(
        &self,
        tenant_id: &TenantId,
        operation: OperationKind,
        date: NaiveDate,
    ) -> Result<u64> {
        Ok(self.totals_on(tenant_id, operation, date).await?.count)
    }

    pub async fn today(&self, tenant_id: &TenantId, operation: OperationKind) -> Result<u64> {
        self.count_on(tenant_id, operation, Utc::now().date_naive())
            .await
    }

    /// Cost charged today for one operation.
    pub async fn cost_today(&self, tenant_id: &TenantId, operation: OperationKind) -> Result<f64> {
        Ok(self
            .totals_on(tenant_id, operation, Utc::now().date_naive())
            .await?
            .cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryMetadataStore;

    #[tokio::test]
    async fn test_counters_are_partitioned() {
        let meter = UsageMeter::new(Arc::new(InMemoryMetadataStore::new()));
        let acme = TenantId::parse(Some("acme")).unwrap();
        let globex = TenantId::parse(Some("globex")).unwrap();

        meter.increment(&acme, OperationKind::QaQueries).await;
        meter.increment(&acme, OperationKind::QaQueries).await;
        meter.increment_by(&acme, OperationKind::ComplianceChecks, 3).await;
        meter.increment(&globex, OperationKind::QaQueries).await;

        assert_eq!(meter.today(&acme, OperationKind::QaQueries).await.unwrap(), 2);
        assert_eq!(meter.today(&acme, OperationKind::ComplianceChecks).await.unwrap(), 3);
        assert_eq!(meter.today(&globex, OperationKind::QaQueries).await.unwrap(), 1);
        assert_eq!(meter.today(&globex, OperationKind::ToolInvocations).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_billable_operations_accumulate_cost() {
        let meter = UsageMeter::new(Arc::new(InMemoryMetadataStore::new()));
        let acme = TenantId::parse(Some("acme")).unwrap();

        meter.increment(&acme, OperationKind::ComplianceChecks).await;
        meter.increment(&acme, OperationKind::ComplianceChecks).await;
        meter.increment(&acme, OperationKind::QaQueries).await;
        meter.increment(&acme, OperationKind::ProcessingRequests).await;

        let compliance = meter.cost_today(&acme, OperationKind::ComplianceChecks).await.unwrap();
        assert!((compliance - 0.20).abs() < 1e-9);
        let qa = meter.cost_today(&acme, OperationKind::QaQueries).await.unwrap();
        assert!((qa - 0.05).abs() < 1e-9);

        let requests = meter
            .totals_on(&acme, OperationKind::ProcessingRequests, Utc::now().date_naive())
            .await
            .unwrap();
        assert_eq!(requests, UsageTotals { count: 1, cost: 0.0 });
    }
}
