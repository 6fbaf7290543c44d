use crate::types::source::Source;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// No requested source produced a record.
    NoData,
    /// A record was produced but the store rejected it; nothing was committed.
    Persistence(String),
}

/// Terminal state of one entity in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityOutcome {
    /// Every requested source was written and committed.
    Committed,
    /// Some sources were written and committed, `missing` were not.
    Partial { missing: Vec<Source> },
    Failed { cause: FailureCause },
}

impl fmt::Display for EntityOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityOutcome::Committed => write!(f, "committed"),
            EntityOutcome::Partial { missing } => {
                let labels: Vec<&str> = missing.iter().map(|s| s.label()).collect();
                write!(f, "partial, missing {}", labels.join(" and "))
            }
            EntityOutcome::Failed {
                cause: FailureCause::NoData,
            } => write!(f, "failed, no data"),
            EntityOutcome::Failed {
                cause: FailureCause::Persistence(message),
            } => write!(f, "failed, database error: {}", message),
        }
    }
}
