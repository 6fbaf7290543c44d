use crate::pipeline::outcome::EntityOutcome;
use crate::types::source::Source;
use std::fmt;

/// Entity ids grouped by how their run ended. Causes are logged, not kept here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: Vec<i64>,
    pub partial: Vec<(i64, Vec<Source>)>,
    pub failed: Vec<i64>,
}

impl RunSummary {
    pub fn record(&mut self, entity_id: i64, outcome: &EntityOutcome) {
        match outcome {
            EntityOutcome::Committed => self.succeeded.push(entity_id),
            EntityOutcome::Partial { missing } => self.partial.push((entity_id, missing.clone())),
            EntityOutcome::Failed { .. } => self.failed.push(entity_id),
        }
    }

    pub fn is_success(&self) -> bool {
        self.partial.is_empty() && self.failed.is_empty()
    }

    /// Partial and failed entity ids, ascending.
    pub fn incomplete_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .partial
            .iter()
            .map(|(id, _)| *id)
            .chain(self.failed.iter().copied())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Merges the outcome of a re-drive `round` into this summary.
    ///
    /// A round only requests what was missing, so its result replaces the earlier
    /// one, except that a failed round never downgrades an earlier partial: the
    /// sources that partial committed are still in the store.
    pub fn absorb(&mut self, round: RunSummary) {
        for id in round.succeeded {
            self.forget(id);
            self.succeeded.push(id);
        }
        for (id, missing) in round.partial {
            self.forget(id);
            self.partial.push((id, missing));
        }
        for id in round.failed {
            if self.partial.iter().any(|(p, _)| *p == id) {
                continue;
            }
            self.forget(id);
            self.failed.push(id);
        }
    }

    fn forget(&mut self, entity_id: i64) {
        self.succeeded.retain(|id| *id != entity_id);
        self.partial.retain(|(id, _)| *id != entity_id);
        self.failed.retain(|id| *id != entity_id);
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            write!(f, "All entities processed successfully.")
        } else {
            write!(f, "Failed entities: {:?}", self.incomplete_ids())
        }
    }
}
