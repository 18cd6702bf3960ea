use std::collections::HashMap;

use serde_json::Value;

use crate::controller::RunController;
use crate::errors::EngineError;
use crate::model::Checkpoint;
use crate::transport::RunRequest;

/// Local copy of the head's checkpoint lineage, oldest first, indexed from 0.
///
/// Only replaced wholesale from a history fetch or truncated by a fork.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckpointLedger {
    entries: Vec<Checkpoint>,
    fork_point: Option<String>,
}

impl CheckpointLedger {
    pub fn entries(&self) -> &[Checkpoint] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&Checkpoint> {
        self.entries.last()
    }

    pub fn get(&self, checkpoint_id: &str) -> Option<&Checkpoint> {
        self.entries
            .iter()
            .find(|entry| entry.checkpoint_id == checkpoint_id)
    }

    /// Checkpoint the last fork started from, until the next history fetch.
    pub fn fork_point(&self) -> Option<&str> {
        self.fork_point.as_deref()
    }

    /// Replace all entries with a fresh history page.
    ///
    /// The engine numbers a page from the head backwards (index 0 is the newest
    /// checkpoint) and may include checkpoints of abandoned forks. Entries are chained
    /// from the head through `parent_checkpoint_id`; checkpoints off that lineage are
    /// dropped, and the rest are renumbered oldest first.
    /// Complexity: O(n).
    pub(crate) fn replace(&mut self, records: Vec<Checkpoint>) -> Result<(), EngineError> {
        let mut by_id: HashMap<String, Checkpoint> = HashMap::with_capacity(records.len());
        let mut by_index: HashMap<u64, String> = HashMap::with_capacity(records.len());
        let mut head: Option<(u64, String)> = None;
        for record in records {
            if let Some(other) = by_index.insert(record.index, record.checkpoint_id.clone()) {
                return Err(EngineError::Protocol(format!(
                    "history repeats checkpoint index {} ({} and {})",
                    record.index, other, record.checkpoint_id
                )));
            }
            if by_id.contains_key(&record.checkpoint_id) {
                return Err(EngineError::Protocol(format!(
                    "history repeats checkpoint {}",
                    record.checkpoint_id
                )));
            }
            let newer = match &head {
                Some((index, _)) => record.index < *index,
                None => true,
            };
            if newer {
                head = Some((record.index, record.checkpoint_id.clone()));
            }
            by_id.insert(record.checkpoint_id.clone(), record);
        }

        let mut lineage = Vec::with_capacity(by_id.len());
        let mut cursor = head.map(|(_, checkpoint_id)| checkpoint_id);
        // Each id leaves the map once, so a parent cycle cannot loop.
        while let Some(record) = cursor
            .take()
            .and_then(|checkpoint_id| by_id.remove(&checkpoint_id))
        {
            cursor = record.parent_checkpoint_id.clone();
            lineage.push(record);
        }
        if !by_id.is_empty() {
            tracing::debug!(
                dropped = by_id.len(),
                kept = lineage.len(),
                "history entries off the head lineage dropped"
            );
        }

        lineage.reverse();
        for (position, entry) in lineage.iter_mut().enumerate() {
            entry.index = position as u64;
        }
        self.entries = lineage;
        self.fork_point = None;
        Ok(())
    }

    /// Drop the descendants of `checkpoint_id` and remember the fork point.
    /// Returns how many entries were dropped; zero when the id is not in the window.
    pub(crate) fn fork_at(&mut self, checkpoint_id: &str) -> usize {
        self.fork_point = Some(checkpoint_id.to_owned());
        let Some(position) = self
            .entries
            .iter()
            .position(|entry| entry.checkpoint_id == checkpoint_id)
        else {
            return 0;
        };
        let dropped = self.entries.len() - position - 1;
        self.entries.truncate(position + 1);
        dropped
    }
}

impl RunController {
    /// Fetch the most recent checkpoints (up to the configured limit) into the ledger.
    pub async fn fetch_history(&mut self) -> Result<&[Checkpoint], EngineError> {
        self.ensure_not_in_flight("fetch history")?;
        self.refetch_history().await?;
        Ok(self.ledger.entries())
    }

    /// Show the thread as it was at `checkpoint_id`. Read-only: the ledger and the
    /// engine are untouched, and a pending approval is discarded.
    pub async fn travel(&mut self, checkpoint_id: &str) -> Result<(), EngineError> {
        self.ensure_not_in_flight("travel")?;
        let snapshot = self
            .transport
            .checkpoint_state(&self.thread_id, checkpoint_id)
            .await?;
        if let Some(call) = self.gate.clear() {
            tracing::info!(
                thread_id = %self.thread_id,
                checkpoint_id,
                tool = %call.name,
                "pending approval discarded by time travel"
            );
        }
        self.store.show_checkpoint(checkpoint_id, snapshot);
        self.publish();
        Ok(())
    }

    /// Leave a traveled view and show the thread head again.
    pub async fn return_to_head(&mut self) -> Result<(), EngineError> {
        self.refresh().await
    }

    /// Fork: run again from `checkpoint_id`, optionally with new input. Ledger entries
    /// after the checkpoint are dropped before the request is sent.
    pub async fn resume_from(
        &mut self,
        checkpoint_id: &str,
        new_input: Option<Value>,
    ) -> Result<(), EngineError> {
        self.ensure_not_in_flight("resume from checkpoint")?;
        let dropped = self.ledger.fork_at(checkpoint_id);
        tracing::info!(
            thread_id = %self.thread_id,
            checkpoint_id,
            dropped,
            "forking thread from checkpoint"
        );
        let request = RunRequest::ResumeFromCheckpoint {
            thread_id: self.thread_id.clone(),
            checkpoint_id: checkpoint_id.to_owned(),
            new_input,
        };
        self.open_run(request).await
    }
}

#[cfg(test)]
mod tests;
