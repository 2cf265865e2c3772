//! Collapses payment rows that are really one customer action.
//!
//! Rows are grouped by customer and money, then split into clusters whose
//! members were created within `window` of the cluster's first row. A
//! cluster with more than one high-confidence reference is ambiguous and
//! left alone.

use {
    crate::{
        domain::{
            error::PipelineError,
            payment::{Confidence, Decision, Payment, PaymentState, Transition},
            store::PaymentStore,
        },
        services::reconciler::Reconciler,
    },
    chrono::{DateTime, Utc},
    serde::Serialize,
    std::{collections::BTreeMap, sync::Arc},
    uuid::Uuid,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub keeper: Uuid,
    pub keeper_confidence: Confidence,
    pub duplicates: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    pub clusters: usize,
    pub cancelled: Vec<Uuid>,
    /// Duplicates the Reconciler refused to cancel, e.g. because they
    /// settled as `PAID`.
    pub left_alone: Vec<Uuid>,
    pub ambiguous: usize,
    pub errors: usize,
}

/// Failed and cancelled rows no longer compete for the customer action.
fn is_candidate(p: &Payment) -> bool {
    matches!(p.state, PaymentState::Processing | PaymentState::Paid)
}

/// Pure clustering step. Returns only clusters with something to cancel,
/// plus the number of ambiguous clusters skipped.
pub fn clusters(payments: &[Payment], window: chrono::Duration) -> (Vec<Cluster>, usize) {
    let mut groups: BTreeMap<(i64, &str, i64), Vec<&Payment>> = BTreeMap::new();
    for p in payments.iter().filter(|p| is_candidate(p)) {
        groups
            .entry((
                p.customer_id,
                p.money.currency().as_str(),
                p.money.amount().cents(),
            ))
            .or_default()
            .push(p);
    }

    let mut out = Vec::new();
    let mut ambiguous = 0;
    for rows in groups.values_mut() {
        rows.sort_by_key(|p| (p.created_at, p.id));

        let mut start = 0;
        while start < rows.len() {
            let first = rows[start].created_at;
            let end = rows[start..]
                .iter()
                .position(|p| p.created_at - first > window)
                .map_or(rows.len(), |offset| start + offset);
            let members = &rows[start..end];
            start = end;

            if members.len() < 2 {
                continue;
            }
            let high: Vec<&&Payment> = members
                .iter()
                .filter(|p| p.reference_confidence == Confidence::High)
                .collect();
            if high.len() > 1 {
                ambiguous += 1;
                continue;
            }
            let (keeper, keeper_confidence) = high
                .first()
                .map_or((members[0].id, Confidence::Low), |p| (p.id, Confidence::High));
            out.push(Cluster {
                keeper,
                keeper_confidence,
                duplicates: members
                    .iter()
                    .map(|p| p.id)
                    .filter(|id| *id != keeper)
                    .collect(),
            });
        }
    }
    (out, ambiguous)
}

pub struct DuplicateSuppressor {
    store: Arc<dyn PaymentStore>,
    reconciler: Arc<Reconciler>,
    window: chrono::Duration,
    lookback: chrono::Duration,
}

impl DuplicateSuppressor {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        reconciler: Arc<Reconciler>,
        window: chrono::Duration,
        lookback: chrono::Duration,
    ) -> Self {
        Self {
            store,
            reconciler,
            window,
            lookback,
        }
    }

    /// Periodic pass over every payment created within the lookback.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, PipelineError> {
        let payments = self.store.list_payments_since(now - self.lookback).await?;
        let (found, ambiguous) = clusters(&payments, self.window);
        let mut report = SweepReport {
            ambiguous,
            ..Default::default()
        };
        for cluster in &found {
            self.collapse(cluster, &mut report).await;
        }
        if !report.cancelled.is_empty() || report.ambiguous > 0 {
            tracing::info!(
                clusters = report.clusters,
                cancelled = report.cancelled.len(),
                ambiguous = report.ambiguous,
                "duplicate sweep finished"
            );
        }
        Ok(report)
    }

    /// Inline pass around one payment, run right after a low-confidence
    /// match or creation.
    pub async fn suppress_around(&self, payment: &Payment) -> Result<SweepReport, PipelineError> {
        let from = payment.created_at - self.window;
        let to = payment.created_at + self.window;
        let neighbours: Vec<Payment> = self
            .store
            .list_payments_since(from)
            .await?
            .into_iter()
            .filter(|p| {
                p.customer_id == payment.customer_id
                    && p.money == payment.money
                    && p.created_at <= to
            })
            .collect();

        let (found, ambiguous) = clusters(&neighbours, self.window);
        let mut report = SweepReport {
            ambiguous,
            ..Default::default()
        };
        for cluster in found
            .iter()
            .filter(|c| c.keeper == payment.id || c.duplicates.contains(&payment.id))
        {
            self.collapse(cluster, &mut report).await;
        }
        Ok(report)
    }

    async fn collapse(&self, cluster: &Cluster, report: &mut SweepReport) {
        report.clusters += 1;
        let transition = Transition::cancel_duplicate(cluster.keeper, cluster.keeper_confidence);
        for duplicate in &cluster.duplicates {
            // The Reconciler re-reads the row, so one that settled as PAID
            // since clustering is left untouched.
            match self.reconciler.apply(*duplicate, &transition).await {
                Ok(result) if result.decision == Decision::Apply => {
                    tracing::info!(
                        payment_id = %duplicate,
                        keeper = %cluster.keeper,
                        "duplicate payment cancelled"
                    );
                    report.cancelled.push(*duplicate);
                }
                Ok(result) => {
                    tracing::warn!(
                        payment_id = %duplicate,
                        keeper = %cluster.keeper,
                        state = %result.payment.state,
                        "duplicate left alone"
                    );
                    report.left_alone.push(*duplicate);
                }
                Err(e) => {
                    tracing::error!(payment_id = %duplicate, error = %e, "duplicate cancel failed");
                    report.errors += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::domain::{
            id::CheckoutReference,
            money::Money,
            payment::PaymentIntent,
        },
    };

    fn money() -> Money {
        Money::from_major(16.0, "EUR").unwrap()
    }

    fn high(at: DateTime<Utc>, reference: &str) -> Payment {
        let intent = PaymentIntent::new(CheckoutReference::new(reference).unwrap(), 7, money());
        Payment::for_intent(&intent, at)
    }

    #[test]
    fn keeper_is_the_high_confidence_row() {
        let t0 = Utc::now();
        let low = Payment::provisional(7, money(), t0);
        let high = high(t0 + chrono::Duration::seconds(30), "REQ-42");
        let (found, ambiguous) = clusters(&[low.clone(), high.clone()], chrono::Duration::minutes(60));
        assert_eq!(ambiguous, 0);
        assert_eq!(
            found,
            vec![Cluster {
                keeper: high.id,
                keeper_confidence: Confidence::High,
                duplicates: vec![low.id]
            }]
        );
    }

    #[test]
    fn earliest_row_kept_without_high_confidence() {
        let t0 = Utc::now();
        let a = Payment::provisional(7, money(), t0);
        let b = Payment::provisional(7, money(), t0 + chrono::Duration::minutes(5));
        let (found, _) = clusters(&[b.clone(), a.clone()], chrono::Duration::minutes(60));
        assert_eq!(found[0].keeper, a.id);
        assert_eq!(found[0].keeper_confidence, Confidence::Low);
        assert_eq!(found[0].duplicates, vec![b.id]);
    }

    #[test]
    fn two_high_confidence_rows_are_ambiguous() {
        let t0 = Utc::now();
        let rows = [
            high(t0, "REQ-1"),
            high(t0 + chrono::Duration::minutes(1), "REQ-2"),
            Payment::provisional(7, money(), t0),
        ];
        let (found, ambiguous) = clusters(&rows, chrono::Duration::minutes(60));
        assert!(found.is_empty());
        assert_eq!(ambiguous, 1);
    }

    #[test]
    fn window_and_grouping_key_split_clusters() {
        let t0 = Utc::now();
        let rows = [
            Payment::provisional(7, money(), t0),
            Payment::provisional(7, money(), t0 + chrono::Duration::minutes(61)),
            Payment::provisional(8, money(), t0),
            Payment::provisional(7, Money::from_major(17.0, "EUR").unwrap(), t0),
        ];
        let (found, ambiguous) = clusters(&rows, chrono::Duration::minutes(60));
        assert!(found.is_empty());
        assert_eq!(ambiguous, 0);
    }

    #[test]
    fn terminal_failures_are_not_candidates() {
        let t0 = Utc::now();
        let mut failed = Payment::provisional(7, money(), t0);
        failed.state = PaymentState::Failed;
        let retry = Payment::provisional(7, money(), t0 + chrono::Duration::minutes(2));
        let (found, _) = clusters(&[failed, retry], chrono::Duration::minutes(60));
        assert!(found.is_empty());
    }
}
