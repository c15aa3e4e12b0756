//! Batches sibling entity fetches declared at the same response layer into
//! one upstream call, demultiplexing the merged result back to each
//! sibling's caller.

use super::batch::BatchFactory;
use super::fetcher::Fetcher;
use super::SingleFetch;
use crate::context::Context;
use bytes::Bytes;
use resolve_error::{FetchError, ResolveError};
use std::sync::Arc;
use tokio::sync::oneshot;

type Outcome = Result<(Bytes, Bytes), ResolveError>;

struct LoaderState {
    inputs: Vec<Bytes>,
    senders: Vec<oneshot::Sender<Outcome>>,
    spawned: bool,
}

/// Collects `total_num` sibling fetch inputs declared at one response layer,
/// merges them into a single upstream call once all have registered, and
/// routes each output position's result back to every sibling position that
/// produced it.
///
/// A data loader is bound to exactly one response layer and is used once:
/// it's constructed fresh each time the resolver enters an object whose
/// children share a batched fetch, and dropped once that layer finishes.
pub struct DataLoader {
    total_num: usize,
    fetcher: Arc<Fetcher>,
    batch_factory: Arc<dyn BatchFactory>,
    single: SingleFetch,
    state: parking_lot::Mutex<LoaderState>,
}

impl DataLoader {
    /// Build a data loader expecting exactly `total_num` sibling `load`
    /// calls before it dispatches the merged batch.
    #[must_use]
    pub fn new(
        total_num: usize,
        fetcher: Arc<Fetcher>,
        batch_factory: Arc<dyn BatchFactory>,
        single: SingleFetch,
    ) -> Self {
        Self {
            total_num,
            fetcher,
            batch_factory,
            single,
            state: parking_lot::Mutex::new(LoaderState {
                inputs: Vec::new(),
                senders: Vec::new(),
                spawned: false,
            }),
        }
    }

    /// Register one sibling's rendered input and await its share of the
    /// batched result. Once the declared `total_num`th sibling registers,
    /// the batch is dispatched; every registrant before that point just
    /// waits on its own oneshot channel.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::DataLoaderCountMismatch`] if more than
    /// `total_num` siblings call this, the upstream `DataSource`'s error if
    /// the batched call fails, or [`FetchError::Cancelled`] if `ctx.cancel`
    /// fires first.
    pub async fn load(self: &Arc<Self>, ctx: &Context, input: Bytes) -> Outcome {
        let (tx, rx) = oneshot::channel();
        let spawn_now = {
            let mut state = self.state.lock();
            if state.inputs.len() >= self.total_num {
                return Err(ResolveError::Fetch(FetchError::DataLoaderCountMismatch {
                    declared: self.total_num,
                    observed: state.inputs.len() + 1,
                }));
            }
            state.inputs.push(input);
            state.senders.push(tx);
            let ready = state.inputs.len() == self.total_num;
            if ready && !state.spawned {
                state.spawned = true;
                true
            } else {
                false
            }
        };

        if spawn_now {
            let (inputs, senders) = {
                let mut state = self.state.lock();
                (
                    std::mem::take(&mut state.inputs),
                    std::mem::take(&mut state.senders),
                )
            };
            let this = self.clone();
            let child_ctx = ctx.fork();
            tokio::spawn(async move {
                this.resolve_fetch(child_ctx, inputs, senders).await;
            });
        }

        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => Err(ResolveError::Fetch(FetchError::Cancelled)),
            result = rx => result.unwrap_or(Err(ResolveError::Fetch(FetchError::Cancelled))),
        }
    }

    async fn resolve_fetch(
        self: Arc<Self>,
        ctx: Context,
        inputs: Vec<Bytes>,
        senders: Vec<oneshot::Sender<Outcome>>,
    ) {
        let batch = match self.batch_factory.create_batch(&inputs) {
            Ok(batch) => batch,
            Err(e) => {
                broadcast(senders, &ResolveError::Fetch(e));
                return;
            }
        };

        let result = self
            .fetcher
            .load_and_extract(&ctx, &self.single, &batch.merged_input)
            .await;

        let (data, errors) = match result {
            Ok(pair) => pair,
            Err(e) => {
                broadcast(senders, &e);
                return;
            }
        };

        let mut entities: Vec<Bytes> = Vec::with_capacity(batch.out_to_in_positions.len());
        let extracted = crate::json::array_each(&data, |_, bytes, _vtype| {
            entities.push(Bytes::copy_from_slice(bytes));
            Ok(())
        });
        if let Err(e) = extracted {
            broadcast(senders, &ResolveError::Fetch(FetchError::Extraction(e)));
            return;
        }

        if entities.len() != batch.out_to_in_positions.len() {
            let err = ResolveError::Fetch(FetchError::EntityCountMismatch {
                sent: batch.out_to_in_positions.len(),
                received: entities.len(),
            });
            broadcast(senders, &err);
            return;
        }

        let mut results: Vec<Option<Outcome>> = (0..senders.len()).map(|_| None).collect();
        for (out_pos, in_positions) in batch.out_to_in_positions.iter().enumerate() {
            for &in_pos in in_positions {
                results[in_pos] = Some(Ok((entities[out_pos].clone(), errors.clone())));
            }
        }

        for (sender, result) in senders.into_iter().zip(results) {
            let outcome = result.unwrap_or(Err(ResolveError::Fetch(FetchError::EntityCountMismatch {
                sent: batch.out_to_in_positions.len(),
                received: entities.len(),
            })));
            let _ = sender.send(outcome);
        }
    }
}

fn broadcast(senders: Vec<oneshot::Sender<Outcome>>, error: &ResolveError) {
    for sender in senders {
        let _ = sender.send(Err(ResolveError::Fetch(FetchError::DataSource(
            error.to_string(),
        ))));
    }
}
