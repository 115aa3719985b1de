use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{OperationKind, OperationLogEntry};
use crate::domain::customer::{OriginSystem, TenantId};
use crate::domain::order::{Order, OrderId, OrderReference};
use crate::domain::source::{scalar_text, ApiOrderRow, CsvRow, RawRow};
use crate::ingest::csv::parse_csv;
use crate::ingest::report::{IngestionReport, RowDiagnostic, RowOutcome};
use crate::ingest::rows::{plan_api_order, plan_csv_row, ApiOrderPlan, CsvRowPlan};
use crate::ingest::{CsvImportMode, IngestSettings, OrderSource, SourceError, SyncMode};
use crate::normalize::normalize_reference;
use crate::reconcile::{ReconcileDecision, ReconcileError, Reconciler};
use crate::store::{CommitOutcome, CustomerStore, IntegrationStore};

/// One async mutex per tenant; runs for the same tenant queue behind each other.
#[derive(Default)]
struct TenantLocks {
    locks: Mutex<HashMap<TenantId, Arc<Mutex<()>>>>,
}

impl TenantLocks {
    async fn acquire(&self, tenant: &TenantId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(tenant.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

struct RunContext<'a> {
    tenant: &'a TenantId,
    run_id: &'a str,
    mode: SyncMode,
    high_water_mark: Option<u64>,
    now: DateTime<Utc>,
}

pub struct IngestionPipeline {
    customers: Arc<dyn CustomerStore>,
    integrations: Arc<dyn IntegrationStore>,
    settings: IngestSettings,
    reconciler: Reconciler,
    tenant_locks: TenantLocks,
}

impl IngestionPipeline {
    pub fn new(
        customers: Arc<dyn CustomerStore>,
        integrations: Arc<dyn IntegrationStore>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            customers,
            integrations,
            settings,
            reconciler: Reconciler,
            tenant_locks: TenantLocks::default(),
        }
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    /// Parses and ingests a CSV export. Only an unreadable file fails the run.
    pub async fn import_csv(
        &self,
        tenant: &TenantId,
        input: &[u8],
        now: DateTime<Utc>,
    ) -> Result<IngestionReport, SourceError> {
        let rows = parse_csv(input).map_err(|source_error| {
            error!(
                event_name = "ingest.source.failed",
                tenant_id = %tenant.0,
                error = %source_error,
                "csv import aborted"
            );
            source_error
        })?;
        Ok(self.run(tenant, OriginSystem::CsvImport, rows, SyncMode::Incremental, now).await)
    }

    /// Fetches from `source` and ingests every order it returned.
    pub async fn sync_orders(
        &self,
        tenant: &TenantId,
        source: &dyn OrderSource,
        mode: SyncMode,
        now: DateTime<Utc>,
    ) -> Result<IngestionReport, SourceError> {
        let orders = source.fetch_orders().await.map_err(|source_error| {
            error!(
                event_name = "ingest.source.failed",
                tenant_id = %tenant.0,
                error = %source_error,
                "order sync aborted"
            );
            source_error
        })?;
        Ok(self.ingest_api_orders(tenant, orders, mode, now).await)
    }

    pub async fn ingest_api_orders(
        &self,
        tenant: &TenantId,
        orders: Vec<Value>,
        mode: SyncMode,
        now: DateTime<Utc>,
    ) -> IngestionReport {
        let rows = orders.into_iter().map(RawRow::Api).collect();
        self.run(tenant, OriginSystem::ExternalApi, rows, mode, now).await
    }

    async fn run(
        &self,
        tenant: &TenantId,
        source: OriginSystem,
        rows: Vec<RawRow>,
        mode: SyncMode,
        now: DateTime<Utc>,
    ) -> IngestionReport {
        let _tenant_guard = self.tenant_locks.acquire(tenant).await;
        let run_id = Uuid::new_v4().to_string();
        let mut report = IngestionReport::new(run_id.clone(), source, rows.len());

        info!(
            event_name = "ingest.run.started",
            correlation_id = %run_id,
            tenant_id = %tenant.0,
            source = source.as_str(),
            rows = rows.len(),
            "ingestion run started"
        );

        let tracks_high_water_mark = source == OriginSystem::ExternalApi && mode == SyncMode::Incremental;
        let (high_water_mark, mark_loaded) = if tracks_high_water_mark {
            match self.integrations.load_high_water_mark(tenant).await {
                Ok(mark) => (mark, true),
                Err(store_error) => {
                    warn!(
                        event_name = "sync.high_water_mark.unavailable",
                        correlation_id = %run_id,
                        error = %store_error,
                        "continuing without high-water mark"
                    );
                    (None, false)
                }
            }
        } else {
            (None, false)
        };

        let context = RunContext { tenant, run_id: &run_id, mode, high_water_mark, now };
        let chunk_size = self.settings.chunk_size.max(1);
        let mut max_reference: Option<u64> = None;

        for (chunk_index, chunk) in rows.chunks(chunk_size).enumerate() {
            debug!(
                event_name = "ingest.chunk.started",
                correlation_id = %run_id,
                chunk = chunk_index,
                rows = chunk.len(),
                "processing chunk"
            );
            for (offset, row) in chunk.iter().enumerate() {
                let row_number = chunk_index * chunk_size + offset + 1;
                let outcome = match row {
                    RawRow::Csv(csv_row) => self.process_csv_row(&context, row_number, csv_row).await,
                    RawRow::Api(value) => {
                        self.process_api_row(&context, row_number, value, &mut max_reference).await
                    }
                    RawRow::Unreadable(message) => RowOutcome::Failed(RowDiagnostic {
                        row: row_number,
                        reference: None,
                        message: format!("unreadable record: {message}"),
                    }),
                };
                log_outcome(&run_id, row_number, &outcome);
                report.record(outcome);
            }
        }

        if tracks_high_water_mark {
            report.high_water_mark = high_water_mark;
            if let Some(seen) = max_reference {
                let advanced = high_water_mark.map_or(true, |mark| seen > mark);
                if !mark_loaded {
                    report.note("high-water mark not advanced: stored mark could not be read");
                } else if advanced {
                    match self.integrations.save_high_water_mark(tenant, seen).await {
                        Ok(()) => {
                            report.high_water_mark = Some(seen);
                            info!(
                                event_name = "sync.high_water_mark.updated",
                                correlation_id = %run_id,
                                tenant_id = %tenant.0,
                                high_water_mark = seen,
                                "high-water mark advanced"
                            );
                        }
                        Err(store_error) => {
                            warn!(
                                event_name = "sync.high_water_mark.save_failed",
                                correlation_id = %run_id,
                                error = %store_error,
                                "failed to persist high-water mark"
                            );
                            report.note(format!("failed to persist high-water mark: {store_error}"));
                        }
                    }
                }
            }
        }

        info!(
            event_name = "ingest.run.completed",
            correlation_id = %run_id,
            tenant_id = %tenant.0,
            customers_created = report.customers_created,
            customers_updated = report.customers_updated,
            orders_created = report.orders_created,
            orders_skipped = report.orders_skipped,
            rows_rejected = report.rows_rejected(),
            skipped_rows = report.skipped_rows,
            "ingestion run completed"
        );
        report
    }

    async fn process_csv_row(
        &self,
        context: &RunContext<'_>,
        row_number: usize,
        row: &CsvRow,
    ) -> RowOutcome {
        let plan = match plan_csv_row(row, self.settings.max_orders_per_row) {
            Ok(plan) => plan,
            Err(reason) => return RowOutcome::Rejected(reason),
        };
        let references = plan.references(self.settings.csv_mode, context.run_id, row_number);

        self.apply_csv_row(context, &plan, &references).await.unwrap_or_else(|row_error| {
            RowOutcome::Failed(RowDiagnostic {
                row: row_number,
                reference: references.first().map(|reference| reference.0.clone()),
                message: row_error.to_string(),
            })
        })
    }

    async fn apply_csv_row(
        &self,
        context: &RunContext<'_>,
        plan: &CsvRowPlan,
        references: &[OrderReference],
    ) -> Result<RowOutcome, ReconcileError> {
        if self.settings.csv_mode == CsvImportMode::NaturalKey {
            if let Some(first) = references.first() {
                if self.customers.find_order_by_reference(context.tenant, first).await?.is_some() {
                    return Ok(RowOutcome::Duplicate { orders: references.len() });
                }
            }
        }

        let decision = self
            .reconciler
            .reconcile(context.tenant, &plan.candidate, self.customers.as_ref(), context.now)
            .await?;
        let customer = decision.customer();
        let orders: Vec<Order> = references
            .iter()
            .map(|reference| Order {
                id: OrderId::generate(),
                tenant_id: context.tenant.clone(),
                customer_id: customer.id.clone(),
                reference: reference.clone(),
                order_date: plan.order_date(),
                order_value: plan.ticket,
                delivery_fee: Decimal::ZERO,
                items: Vec::new(),
                payments: Vec::new(),
            })
            .collect();

        match self.customers.commit_row(customer, &orders).await? {
            CommitOutcome::Committed { orders_inserted } => {
                self.log_customer_change(context, &decision).await;
                Ok(RowOutcome::Applied { created: decision.is_insert(), orders_inserted })
            }
            CommitOutcome::DuplicateOrder(_) => Ok(RowOutcome::Duplicate { orders: orders.len() }),
        }
    }

    async fn process_api_row(
        &self,
        context: &RunContext<'_>,
        row_number: usize,
        value: &Value,
        max_reference: &mut Option<u64>,
    ) -> RowOutcome {
        let order: ApiOrderRow = match serde_json::from_value(value.clone()) {
            Ok(order) => order,
            Err(decode_error) => {
                return RowOutcome::Failed(RowDiagnostic {
                    row: row_number,
                    reference: value.get("reference").and_then(scalar_text),
                    message: format!("malformed order payload: {decode_error}"),
                })
            }
        };

        let reference = match normalize_reference(order.reference.as_ref().unwrap_or(&Value::Null)) {
            Ok(reference) => reference,
            Err(reason) => return RowOutcome::Rejected(reason),
        };
        if let Some(numeric) = reference.numeric() {
            *max_reference = Some(max_reference.map_or(numeric, |seen| seen.max(numeric)));
            if context.mode == SyncMode::Incremental
                && context.high_water_mark.is_some_and(|mark| numeric <= mark)
            {
                return RowOutcome::Duplicate { orders: 1 };
            }
        }

        let plan = match plan_api_order(&order, reference) {
            Ok(plan) => plan,
            Err(reason) => return RowOutcome::Rejected(reason),
        };

        self.apply_api_order(context, &plan).await.unwrap_or_else(|row_error| {
            RowOutcome::Failed(RowDiagnostic {
                row: row_number,
                reference: Some(plan.reference.0.clone()),
                message: row_error.to_string(),
            })
        })
    }

    async fn apply_api_order(
        &self,
        context: &RunContext<'_>,
        plan: &ApiOrderPlan,
    ) -> Result<RowOutcome, ReconcileError> {
        if self.customers.find_order_by_reference(context.tenant, &plan.reference).await?.is_some() {
            return Ok(RowOutcome::Duplicate { orders: 1 });
        }

        let decision = self
            .reconciler
            .reconcile(context.tenant, &plan.candidate, self.customers.as_ref(), context.now)
            .await?;
        let customer = decision.customer();
        let order = Order {
            id: OrderId::generate(),
            tenant_id: context.tenant.clone(),
            customer_id: customer.id.clone(),
            reference: plan.reference.clone(),
            order_date: plan.ordered_at,
            order_value: plan.order_value,
            delivery_fee: plan.delivery_fee,
            items: plan.items.clone(),
            payments: plan.payments.clone(),
        };

        match self.customers.commit_row(customer, std::slice::from_ref(&order)).await? {
            CommitOutcome::Committed { orders_inserted } => {
                self.log_customer_change(context, &decision).await;
                let entry = OperationLogEntry::new(
                    context.tenant.clone(),
                    OperationKind::CreateOrder,
                    "order",
                    Some(order.id.0.clone()),
                    context.now,
                )
                .with_detail("reference", order.reference.0.clone())
                .with_detail("customer_id", customer.id.0.clone())
                .with_detail("order_value", order.order_value.to_string())
                .with_detail("run_id", context.run_id);
                self.record_operation(context, entry).await;
                Ok(RowOutcome::Applied { created: decision.is_insert(), orders_inserted })
            }
            CommitOutcome::DuplicateOrder(_) => Ok(RowOutcome::Duplicate { orders: 1 }),
        }
    }

    async fn log_customer_change(&self, context: &RunContext<'_>, decision: &ReconcileDecision) {
        let customer = decision.customer();
        let kind = if decision.is_insert() {
            OperationKind::CreateCustomer
        } else {
            OperationKind::UpdateCustomer
        };
        let mut entry = OperationLogEntry::new(
            context.tenant.clone(),
            kind,
            "customer",
            Some(customer.id.0.clone()),
            context.now,
        )
        .with_detail("phone", customer.phone.as_str())
        .with_detail("total_orders", customer.total_orders.to_string())
        .with_detail("total_spent", customer.total_spent.to_string())
        .with_detail("origin_system", customer.origin_system.as_str())
        .with_detail("run_id", context.run_id);
        if let ReconcileDecision::Merge { previous, .. } = decision {
            entry = entry
                .with_detail("previous_total_orders", previous.total_orders.to_string())
                .with_detail("previous_total_spent", previous.total_spent.to_string());
        }
        self.record_operation(context, entry).await;
    }

    async fn record_operation(&self, context: &RunContext<'_>, entry: OperationLogEntry) {
        let entry = match context.mode {
            SyncMode::Historical => entry.with_detail("source", "delmatch_historical"),
            SyncMode::Incremental => entry,
        };
        if let Err(store_error) = self.customers.record_operation(&entry).await {
            warn!(
                event_name = "ingest.operation_log.failed",
                correlation_id = %context.run_id,
                operation = entry.operation.as_str(),
                error = %store_error,
                "failed to append operation log"
            );
        }
    }
}

fn log_outcome(run_id: &str, row: usize, outcome: &RowOutcome) {
    match outcome {
        RowOutcome::Rejected(reason) => debug!(
            event_name = "ingest.row.rejected",
            correlation_id = %run_id,
            row,
            reason = reason.as_str(),
            "row rejected"
        ),
        RowOutcome::Duplicate { orders } => debug!(
            event_name = "ingest.row.duplicate",
            correlation_id = %run_id,
            row,
            orders,
            "row already ingested"
        ),
        RowOutcome::Applied { .. } => {}
        RowOutcome::Failed(diagnostic) => warn!(
            event_name = "ingest.row.failed",
            correlation_id = %run_id,
            row,
            reference = diagnostic.reference.as_deref().unwrap_or_default(),
            error = %diagnostic.message,
            "row processing failed"
        ),
    }
}
