//! Ledger-first saga for registry mutations
//!
//! Every mutation runs in two steps:
//!
//! 1. The ledger write, retried with backoff while the ledger is unreachable.
//!    A timed-out or ambiguous call is followed by a reconciliation read by the
//!    same key before anything is retried, so a write that landed is never
//!    sent twice.
//! 2. The local projection, retried only for transient database failures.
//!    When retries run out the projection is parked in the [`RepairStore`] and
//!    the caller gets [`ProjectionOutcome::Deferred`]; [`Coordinator::sweep`]
//!    replays it later.
//!
//! A local record is never written for a ledger write that was not confirmed.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::domain::{
    ApplicationRecord, ApplicationStatus, CertificateRecord, Clock, Hash256, ProviderId,
};
use crate::infra::{
    ApplicationStore, CertificateStore, RegistryError, RepairStore, Result, Retry, RetryConfig,
};
use crate::ledger::{with_timeout, LedgerError, LedgerResult};
use crate::metrics::{metric_names, MetricsRegistry};

pub use crate::domain::{PendingProjection, RepairEntry};

/// Whether the local projection of a confirmed ledger write is in place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionOutcome {
    Applied,
    /// Parked in the repair log; the sweep will apply it
    Deferred,
}

/// Result of one sweep over the repair log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub attempted: usize,
    pub repaired: usize,
    pub remaining: usize,
}

/// Sequences ledger writes and their local projections
pub struct Coordinator {
    applications: Arc<dyn ApplicationStore>,
    certificates: Arc<dyn CertificateStore>,
    repairs: Arc<dyn RepairStore>,
    /// Entries the repair store could not take; flushed by the next sweep
    spill: Mutex<Vec<RepairEntry>>,
    ledger_retry: RetryConfig,
    local_retry: Retry,
    call_timeout: Duration,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        applications: Arc<dyn ApplicationStore>,
        certificates: Arc<dyn CertificateStore>,
        repairs: Arc<dyn RepairStore>,
        ledger_retry: RetryConfig,
        local_retry: RetryConfig,
        call_timeout: Duration,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            applications,
            certificates,
            repairs,
            spill: Mutex::new(Vec::new()),
            ledger_retry,
            local_retry: Retry::new(local_retry),
            call_timeout,
            clock,
            metrics,
        }
    }

    /// Parked projections, durable ones first
    pub async fn repairs(&self) -> Result<Vec<RepairEntry>> {
        let mut entries = self.repairs.list().await?;
        entries.extend(self.spill.lock().await.iter().cloned());
        Ok(entries)
    }

    pub async fn repair_count(&self) -> usize {
        let durable = match self.repairs.count().await {
            Ok(count) => count as usize,
            Err(err) => {
                tracing::warn!(error = %err, "Repair log count failed");
                0
            }
        };
        durable + self.spill.lock().await.len()
    }

    /// Certificate minted on the ledger whose local record is still owed
    pub async fn parked_certificate(
        &self,
        provider_id: ProviderId,
    ) -> Result<Option<CertificateRecord>> {
        let spilled = self.spill.lock().await.iter().find_map(|e| match &e.projection {
            PendingProjection::Certificate(record) if record.provider_id == provider_id => {
                Some(record.clone())
            }
            _ => None,
        });
        match spilled {
            Some(record) => Ok(Some(record)),
            None => self.repairs.find_certificate(provider_id).await,
        }
    }

    /// Registered application whose local record is still owed
    pub async fn parked_application(
        &self,
        identity_hash: &Hash256,
    ) -> Result<Option<ApplicationRecord>> {
        let spilled = self.spill.lock().await.iter().find_map(|e| match &e.projection {
            PendingProjection::Application(record) if record.identity_hash == *identity_hash => {
                Some(record.clone())
            }
            _ => None,
        });
        match spilled {
            Some(record) => Ok(Some(record)),
            None => self.repairs.find_application(identity_hash).await,
        }
    }

    /// Run a ledger mutation to a confirmed outcome.
    ///
    /// `reconcile` reads the ledger by the mutation's deterministic key and
    /// returns the value the mutation would have produced, or `None` when the
    /// write has not landed.
    pub async fn ledger_write<T, W, WF, R, RF>(
        &self,
        operation: &str,
        write: W,
        reconcile: R,
    ) -> Result<T>
    where
        W: Fn() -> WF,
        WF: Future<Output = LedgerResult<T>>,
        R: Fn() -> RF,
        RF: Future<Output = LedgerResult<Option<T>>>,
    {
        let mut attempt: u32 = 0;
        let mut outcome_unknown = false;
        let mut last_error = String::new();

        loop {
            let started = Instant::now();
            let result = with_timeout(self.call_timeout, write()).await;
            self.metrics
                .observe_histogram(metric_names::LEDGER_LATENCY, started.elapsed().as_secs_f64())
                .await;

            match result {
                Ok(value) => return Ok(value),
                Err(LedgerError::Unavailable(message)) => {
                    last_error = message;
                }
                Err(err) if err.is_outcome_unknown() => {
                    outcome_unknown = true;
                    tracing::warn!(
                        operation,
                        attempt,
                        error = %err,
                        "Ledger outcome unknown, reconciling"
                    );
                    if let Some(value) = self.reconcile(operation, &reconcile).await {
                        return Ok(value);
                    }
                    last_error = err.to_string();
                }
                Err(LedgerError::Conflict(message)) => {
                    match with_timeout(self.call_timeout, reconcile()).await {
                        Ok(Some(value)) => {
                            tracing::info!(operation, "Ledger conflict already satisfied");
                            self.metrics.inc_counter(metric_names::LEDGER_RECONCILED).await;
                            return Ok(value);
                        }
                        Ok(None) => return Err(RegistryError::Conflict(message)),
                        Err(err) if err.is_retryable() || err.is_outcome_unknown() => {
                            last_error = format!("{message}; reconciliation failed: {err}");
                        }
                        Err(err) => {
                            return Err(RegistryError::Conflict(format!(
                                "{message}; reconciliation failed: {err}"
                            )))
                        }
                    }
                }
                Err(LedgerError::NotFound(message)) => {
                    return Err(RegistryError::Conflict(format!(
                        "{operation}: ledger has no record: {message}"
                    )))
                }
                Err(err) => {
                    return Err(RegistryError::Internal(format!("{operation}: {err}")));
                }
            }

            if attempt >= self.ledger_retry.max_retries {
                break;
            }

            let delay = self.ledger_retry.delay_for_attempt(attempt);
            attempt += 1;
            self.metrics.inc_counter(metric_names::LEDGER_RETRIES).await;
            tracing::warn!(
                operation,
                attempt,
                max_retries = self.ledger_retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Ledger write failed, will retry"
            );
            tokio::time::sleep(delay).await;
        }

        if outcome_unknown {
            // A late landing of an earlier attempt is still worth one last look.
            if let Some(value) = self.reconcile(operation, &reconcile).await {
                return Ok(value);
            }
            tracing::error!(operation, error = %last_error, "Ledger outcome unknown after retries");
            Err(RegistryError::OutcomeUnknown(format!(
                "{operation}: {last_error}"
            )))
        } else {
            tracing::error!(operation, error = %last_error, "Ledger unavailable after retries");
            Err(RegistryError::LedgerUnavailable(format!(
                "{operation}: {last_error}"
            )))
        }
    }

    async fn reconcile<T, R, RF>(&self, operation: &str, reconcile: &R) -> Option<T>
    where
        R: Fn() -> RF,
        RF: Future<Output = LedgerResult<Option<T>>>,
    {
        match with_timeout(self.call_timeout, reconcile()).await {
            Ok(Some(value)) => {
                tracing::info!(operation, "Reconciliation found the write on the ledger");
                self.metrics.inc_counter(metric_names::LEDGER_RECONCILED).await;
                Some(value)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(operation, error = %err, "Reconciliation read failed");
                None
            }
        }
    }

    /// Apply a projection, parking it in the repair log when local retries run out.
    ///
    /// A ledger approval the local record refuses is parked as well: the
    /// ledger has the final word and an operator settles the record.
    pub async fn project(&self, projection: PendingProjection) -> Result<ProjectionOutcome> {
        let result = self
            .local_retry
            .run_with_predicate(
                projection.kind(),
                || self.apply(&projection),
                RegistryError::is_transient,
            )
            .await;

        match result.into_result() {
            Ok(()) => Ok(ProjectionOutcome::Applied),
            Err(err) if err.is_transient() => {
                self.park(projection, &err).await;
                Ok(ProjectionOutcome::Deferred)
            }
            Err(err @ RegistryError::InvalidTransition { .. })
                if matches!(projection, PendingProjection::Approval { .. }) =>
            {
                tracing::error!(
                    key = %projection.key(),
                    error = %err,
                    "Ledger approval refused by the local record, parked for an operator"
                );
                self.park(projection, &err).await;
                Ok(ProjectionOutcome::Deferred)
            }
            Err(err) => Err(err),
        }
    }

    async fn park(&self, projection: PendingProjection, error: &RegistryError) {
        let entry = RepairEntry::new(projection, error.to_string(), self.clock.now());
        tracing::warn!(
            repair_id = %entry.id,
            kind = entry.projection.kind(),
            key = %entry.projection.key(),
            error = %error,
            "Projection deferred to repair log"
        );

        if let Err(store_err) = self.repairs.record(&entry).await {
            tracing::warn!(
                repair_id = %entry.id,
                error = %store_err,
                "Repair log unavailable, holding entry until the next sweep"
            );
            self.spill.lock().await.push(entry);
        }

        self.metrics
            .inc_counter(metric_names::PROJECTIONS_DEFERRED)
            .await;
        self.metrics
            .set_gauge(metric_names::REPAIR_LOG_SIZE, self.repair_count().await as u64)
            .await;
    }

    /// Idempotent write: a projection that is already in place counts as applied.
    async fn apply(&self, projection: &PendingProjection) -> Result<()> {
        match projection {
            PendingProjection::Application(record) => {
                match self.applications.insert(record).await {
                    Ok(()) => Ok(()),
                    Err(RegistryError::UniqueViolation(constraint)) => {
                        match self.applications.get(record.application_id).await? {
                            Some(existing) if existing.identity_hash == record.identity_hash => {
                                Ok(())
                            }
                            _ => Err(RegistryError::UniqueViolation(constraint)),
                        }
                    }
                    Err(err) => Err(err),
                }
            }
            PendingProjection::Approval {
                application_id,
                approval,
            } => {
                if self.applications.mark_approved(*application_id, approval).await? {
                    return Ok(());
                }
                let existing = self
                    .applications
                    .get(*application_id)
                    .await?
                    .ok_or(RegistryError::ApplicationNotFound(*application_id))?;
                if existing.status == ApplicationStatus::Approved
                    && existing.provider_id == Some(approval.provider_id)
                {
                    Ok(())
                } else {
                    Err(RegistryError::InvalidTransition {
                        application_id: *application_id,
                        from: existing.status,
                        to: ApplicationStatus::Approved,
                    })
                }
            }
            PendingProjection::Certificate(record) => {
                match self.certificates.insert(record).await {
                    Ok(()) => Ok(()),
                    Err(RegistryError::UniqueViolation(constraint)) => {
                        if self
                            .certificates
                            .get_by_hash(&record.certificate_hash)
                            .await?
                            .is_some()
                        {
                            Ok(())
                        } else {
                            Err(RegistryError::UniqueViolation(constraint))
                        }
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// Replay deferred projections once each.
    ///
    /// Spilled entries are moved into the repair store as they are retried.
    pub async fn sweep(&self) -> SweepReport {
        let spilled = std::mem::take(&mut *self.spill.lock().await);
        let durable = match self.repairs.list().await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "Repair log unreadable, sweeping held entries only");
                Vec::new()
            }
        };
        let attempted = durable.len() + spilled.len();
        let mut repaired = 0;
        let mut still_spilled = Vec::new();

        for mut entry in durable {
            match self.apply(&entry.projection).await {
                Ok(()) => {
                    repaired += 1;
                    self.log_repaired(&entry);
                    if let Err(err) = self.repairs.remove(entry.id).await {
                        // Re-applying is idempotent; the next sweep drops it.
                        tracing::warn!(repair_id = %entry.id, error = %err, "Repaired entry not removed");
                    }
                }
                Err(err) => {
                    self.log_failed(&entry, &err);
                    entry.failed(err.to_string(), self.clock.now());
                    if let Err(store_err) = self.repairs.update(&entry).await {
                        tracing::warn!(repair_id = %entry.id, error = %store_err, "Repair entry not updated");
                    }
                }
            }
        }

        for mut entry in spilled {
            match self.apply(&entry.projection).await {
                Ok(()) => {
                    repaired += 1;
                    self.log_repaired(&entry);
                }
                Err(err) => {
                    self.log_failed(&entry, &err);
                    entry.failed(err.to_string(), self.clock.now());
                    if self.repairs.record(&entry).await.is_err() {
                        still_spilled.push(entry);
                    }
                }
            }
        }

        if !still_spilled.is_empty() {
            let mut spill = self.spill.lock().await;
            still_spilled.append(&mut spill);
            *spill = still_spilled;
        }

        let remaining = self.repair_count().await;
        if repaired > 0 {
            self.metrics
                .add_counter(metric_names::PROJECTIONS_REPAIRED, repaired as u64)
                .await;
        }
        self.metrics
            .set_gauge(metric_names::REPAIR_LOG_SIZE, remaining as u64)
            .await;

        SweepReport {
            attempted,
            repaired,
            remaining,
        }
    }

    fn log_repaired(&self, entry: &RepairEntry) {
        tracing::info!(
            repair_id = %entry.id,
            kind = entry.projection.kind(),
            key = %entry.projection.key(),
            "Deferred projection applied"
        );
    }

    fn log_failed(&self, entry: &RepairEntry, err: &RegistryError) {
        if err.is_transient() {
            tracing::warn!(
                repair_id = %entry.id,
                kind = entry.projection.kind(),
                error = %err,
                "Deferred projection still failing"
            );
        } else {
            tracing::error!(
                repair_id = %entry.id,
                kind = entry.projection.kind(),
                key = %entry.projection.key(),
                error = %err,
                "Deferred projection cannot be applied, needs an operator"
            );
        }
    }
}

/// Drive a saga on its own task so a dropped caller cannot abandon it midway.
pub async fn run_to_completion<F, T>(saga: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(saga)
        .await
        .map_err(|e| RegistryError::Internal(format!("saga task failed: {e}")))?
}
