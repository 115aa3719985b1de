use serde::{Deserialize, Serialize};

use crate::domain::customer::OriginSystem;
use crate::normalize::RejectionReason;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionCounts {
    pub invalid_name: usize,
    pub invalid_phone: usize,
    pub invalid_date: usize,
    pub invalid_amount: usize,
    pub invalid_order_count: usize,
    pub invalid_reference: usize,
}

impl RejectionCounts {
    pub fn record(&mut self, reason: RejectionReason) {
        let counter = match reason {
            RejectionReason::InvalidName => &mut self.invalid_name,
            RejectionReason::InvalidPhone => &mut self.invalid_phone,
            RejectionReason::InvalidDate => &mut self.invalid_date,
            RejectionReason::InvalidAmount => &mut self.invalid_amount,
            RejectionReason::InvalidOrderCount => &mut self.invalid_order_count,
            RejectionReason::InvalidReference => &mut self.invalid_reference,
        };
        *counter += 1;
    }

    pub fn total(&self) -> usize {
        self.invalid_name
            + self.invalid_phone
            + self.invalid_date
            + self.invalid_amount
            + self.invalid_order_count
            + self.invalid_reference
    }
}

/// A row that failed for a reason other than validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowDiagnostic {
    /// 1-based position of the row in the source; 0 for run-level notes.
    pub row: usize,
    pub reference: Option<String>,
    pub message: String,
}

/// What happened to one row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowOutcome {
    Rejected(RejectionReason),
    /// Already ingested; nothing written.
    Duplicate { orders: usize },
    Applied { created: bool, orders_inserted: usize },
    Failed(RowDiagnostic),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub run_id: String,
    pub source: OriginSystem,
    pub rows_received: usize,
    pub customers_created: usize,
    pub customers_updated: usize,
    pub orders_created: usize,
    pub orders_skipped: usize,
    pub rejections: RejectionCounts,
    pub skipped_rows: usize,
    pub errors: Vec<RowDiagnostic>,
    pub high_water_mark: Option<u64>,
}

impl IngestionReport {
    pub fn new(run_id: impl Into<String>, source: OriginSystem, rows_received: usize) -> Self {
        Self {
            run_id: run_id.into(),
            source,
            rows_received,
            customers_created: 0,
            customers_updated: 0,
            orders_created: 0,
            orders_skipped: 0,
            rejections: RejectionCounts::default(),
            skipped_rows: 0,
            errors: Vec::new(),
            high_water_mark: None,
        }
    }

    pub fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Rejected(reason) => self.rejections.record(reason),
            RowOutcome::Duplicate { orders } => self.orders_skipped += orders,
            RowOutcome::Applied { created, orders_inserted } => {
                if created {
                    self.customers_created += 1;
                } else {
                    self.customers_updated += 1;
                }
                self.orders_created += orders_inserted;
            }
            RowOutcome::Failed(diagnostic) => {
                self.skipped_rows += 1;
                self.errors.push(diagnostic);
            }
        }
    }

    /// A run-level problem that did not stop the run, such as a failed
    /// high-water-mark write.
    pub fn note(&mut self, message: impl Into<String>) {
        self.errors.push(RowDiagnostic { row: 0, reference: None, message: message.into() });
    }

    pub fn rows_rejected(&self) -> usize {
        self.rejections.total()
    }

    /// One-line human summary, used by the CLI and server logs.
    pub fn summary(&self) -> String {
        format!(
            "{} customers created, {} updated, {} orders created, {} skipped, {} rows rejected, {} rows failed",
            self.customers_created,
            self.customers_updated,
            self.orders_created,
            self.orders_skipped,
            self.rows_rejected(),
            self.skipped_rows
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{IngestionReport, RowDiagnostic, RowOutcome};
    use crate::domain::customer::OriginSystem;
    use crate::normalize::RejectionReason;

    #[test]
    fn outcomes_accumulate_into_counters() {
        let mut report = IngestionReport::new("run-1", OriginSystem::CsvImport, 6);
        report.record(RowOutcome::Applied { created: true, orders_inserted: 3 });
        report.record(RowOutcome::Applied { created: false, orders_inserted: 1 });
        report.record(RowOutcome::Duplicate { orders: 2 });
        report.record(RowOutcome::Rejected(RejectionReason::InvalidPhone));
        report.record(RowOutcome::Rejected(RejectionReason::InvalidPhone));
        report.record(RowOutcome::Failed(RowDiagnostic {
            row: 6,
            reference: None,
            message: "store unavailable: disk full".to_owned(),
        }));

        assert_eq!(report.customers_created, 1);
        assert_eq!(report.customers_updated, 1);
        assert_eq!(report.orders_created, 4);
        assert_eq!(report.orders_skipped, 2);
        assert_eq!(report.rejections.invalid_phone, 2);
        assert_eq!(report.rows_rejected(), 2);
        assert_eq!(report.skipped_rows, 1);
        assert_eq!(report.errors[0].row, 6);
        assert_eq!(
            report.summary(),
            "1 customers created, 1 updated, 4 orders created, 2 skipped, 2 rows rejected, 1 rows failed"
        );
    }

    #[test]
    fn run_notes_do_not_count_as_failed_rows() {
        let mut report = IngestionReport::new("run-2", OriginSystem::ExternalApi, 0);
        report.note("could not persist high-water mark");
        assert_eq!(report.skipped_rows, 0);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].row, 0);
    }
}
