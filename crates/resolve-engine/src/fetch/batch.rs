//! Merges N sibling fetch inputs into one upstream call, tracking how
//! output positions map back to the input positions that produced them.

use super::hash64;
use crate::json::{self, PathElem};
use bytes::Bytes;
use resolve_error::FetchError;
use std::collections::HashMap;

/// The result of merging sibling inputs: the single request to dispatch,
/// plus a map from output position (in the upstream response array) back to
/// every input position whose representation landed in that slot.
pub struct BatchInput {
    /// The merged upstream request body.
    pub merged_input: Bytes,
    /// `out_to_in_positions[i]` lists every sibling input position whose
    /// representation was deduplicated into output slot `i`.
    pub out_to_in_positions: Vec<Vec<usize>>,
}

/// Merges prepared sibling inputs into one batched upstream call.
pub trait BatchFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`FetchError`] if any input doesn't have the shape this
    /// factory expects.
    fn create_batch(&self, inputs: &[Bytes]) -> Result<BatchInput, FetchError>;
}

/// Merges federation `_entities` representations found at
/// `body.variables.representations` in each sibling input, deduplicating by
/// the hash of each representation's bytes. The merged input is the first
/// sibling's input with that array replaced.
pub struct FederationBatchFactory;

const REPRESENTATIONS_PATH: &[&str] = &["body", "variables", "representations"];

impl BatchFactory for FederationBatchFactory {
    fn create_batch(&self, inputs: &[Bytes]) -> Result<BatchInput, FetchError> {
        if inputs.is_empty() {
            return Err(FetchError::DataLoaderCountMismatch {
                declared: 0,
                observed: 0,
            });
        }

        let path: Vec<PathElem> = REPRESENTATIONS_PATH.iter().map(|s| PathElem::from(*s)).collect();
        let mut merged_reps: Vec<Vec<u8>> = Vec::new();
        let mut hash_to_out_pos: HashMap<u64, usize> = HashMap::new();
        let mut out_to_in_positions: Vec<Vec<usize>> = Vec::new();

        for (in_pos, input) in inputs.iter().enumerate() {
            let located = json::get_raw(input, &path).map_err(FetchError::Extraction)?;
            let reps_bytes = located.bytes(input).to_vec();
            json::array_each(&reps_bytes, |_, rep, _vtype| {
                let h = hash64(rep);
                match hash_to_out_pos.get(&h) {
                    Some(&out_pos) => out_to_in_positions[out_pos].push(in_pos),
                    None => {
                        let out_pos = merged_reps.len();
                        merged_reps.push(rep.to_vec());
                        hash_to_out_pos.insert(h, out_pos);
                        out_to_in_positions.push(vec![in_pos]);
                    }
                }
                Ok(())
            })
            .map_err(FetchError::Extraction)?;
        }

        let mut merged_array = Vec::from(b"[".as_slice());
        for (i, rep) in merged_reps.iter().enumerate() {
            if i > 0 {
                merged_array.push(b',');
            }
            merged_array.extend_from_slice(rep);
        }
        merged_array.push(b']');

        let merged_input = json::set(&inputs[0], &path, &merged_array).map_err(FetchError::Extraction)?;

        Ok(BatchInput {
            merged_input: Bytes::from(merged_input),
            out_to_in_positions,
        })
    }
}
