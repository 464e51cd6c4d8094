//! Bounded-concurrency batch retrieval.

use std::time::{Duration, Instant};

use futures_util::StreamExt;
use futures_util::stream;
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::{Counters, DocumentOutcome, DocumentResponse, FetchState, FullTextManager};
use crate::config::DEFAULT_BATCH_CONCURRENCY;
use crate::download::{AttemptRecord, UnavailableReport};
use crate::error::FullTextError;
use crate::identifier::{IdentifierSet, resolve};

/// Batch knobs; the defaults come from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum retrievals in flight at once.
    pub concurrency: usize,
    /// Wall-clock budget for the whole batch.
    pub deadline: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_BATCH_CONCURRENCY,
            deadline: None,
        }
    }
}

/// One member of a batch, in input order.
#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub input: IdentifierSet,
    #[serde(serialize_with = "serialize_result")]
    pub result: Result<DocumentResponse, FullTextError>,
}

impl BatchItem {
    /// The document handed back for this member, if any.
    #[must_use]
    pub fn document(&self) -> Option<&crate::normalize::NormalizedDocument> {
        self.result.as_ref().ok().and_then(|r| r.outcome.document())
    }
}

fn serialize_result<S>(
    result: &Result<DocumentResponse, FullTextError>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    #[derive(Serialize)]
    #[serde(rename_all = "snake_case")]
    enum Repr<'a> {
        Ok(&'a DocumentResponse),
        Error(String),
    }
    match result {
        Ok(response) => Repr::Ok(response).serialize(serializer),
        Err(e) => Repr::Error(e.to_string()).serialize(serializer),
    }
}

impl FullTextManager {
    /// Retrieves many publications with the configured batch options.
    pub async fn batch_get(&self, inputs: Vec<IdentifierSet>) -> Vec<BatchItem> {
        let options = self.inner.batch_defaults;
        self.batch_get_with(inputs, options, |_| {}).await
    }

    /// Retrieves many publications, at most `options.concurrency` at a time.
    ///
    /// Results come back in input order. `on_complete` is called as each
    /// member finishes. When the deadline passes, unfinished members are
    /// reported as unavailable; their in-flight work is dropped unless
    /// another caller is waiting on the same publication.
    #[instrument(skip(self, inputs, on_complete), fields(total = inputs.len()))]
    pub async fn batch_get_with<F>(
        &self,
        inputs: Vec<IdentifierSet>,
        options: BatchOptions,
        mut on_complete: F,
    ) -> Vec<BatchItem>
    where
        F: FnMut(&BatchItem),
    {
        let started = Instant::now();
        let concurrency = options.concurrency.max(1);
        let mut slots: Vec<Option<BatchItem>> = Vec::with_capacity(inputs.len());
        slots.resize_with(inputs.len(), || None);

        {
            let mut pending = stream::iter(inputs.iter().enumerate())
                .map(|(position, ids)| async move { (position, self.get_document(ids).await) })
                .buffer_unordered(concurrency);

            let drain = async {
                while let Some((position, result)) = pending.next().await {
                    let item = BatchItem {
                        input: inputs[position].clone(),
                        result,
                    };
                    on_complete(&item);
                    slots[position] = Some(item);
                }
            };

            match options.deadline {
                Some(deadline) => {
                    if tokio::time::timeout(deadline, drain).await.is_err() {
                        warn!(deadline_secs = deadline.as_secs_f64(), "batch deadline reached");
                    }
                }
                None => drain.await,
            }
        }

        let elapsed = started.elapsed();
        let mut timed_out = 0usize;
        let items: Vec<BatchItem> = slots
            .into_iter()
            .zip(inputs)
            .map(|(slot, input)| {
                slot.unwrap_or_else(|| {
                    timed_out += 1;
                    self.deadline_item(input, elapsed)
                })
            })
            .collect();

        info!(
            completed = items.len() - timed_out,
            timed_out,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "batch finished"
        );
        items
    }

    fn deadline_item(&self, input: IdentifierSet, elapsed: Duration) -> BatchItem {
        let result = resolve(&input, &self.inner.policy)
            .map_err(FullTextError::from)
            .map(|identifier| {
                Counters::bump(&self.inner.counters.unavailable);
                DocumentResponse {
                    identifier,
                    states: vec![FetchState::Unavailable],
                    outcome: DocumentOutcome::Unavailable {
                        report: UnavailableReport {
                            attempts: vec![AttemptRecord::deadline(elapsed)],
                        },
                    },
                    coalesced: false,
                }
            });
        BatchItem { input, result }
    }
}
