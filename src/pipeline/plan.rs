use crate::types::source::Source;
use chrono::{Days, NaiveDate};
use log::warn;

/// Which sources a run requests, and for which dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    /// Invocation date. Forecast records are stamped `today + 1`.
    pub today: NaiveDate,
    /// Observation day to fetch; `None` skips observations.
    pub observation_date: Option<NaiveDate>,
    pub forecast: bool,
}

impl RunPlan {
    /// Both sources, observations `offset_days` in the past.
    ///
    /// An offset that reaches before the earliest representable date leaves the
    /// observation out of the plan.
    pub fn full(today: NaiveDate, offset_days: u64) -> Self {
        let observation_date = today.checked_sub_days(Days::new(offset_days));
        if observation_date.is_none() {
            warn!(
                "Observation offset of {} days before {} is out of range, skipping observations",
                offset_days, today
            );
        }
        Self {
            today,
            observation_date,
            forecast: true,
        }
    }

    pub fn observation_only(today: NaiveDate, date: NaiveDate) -> Self {
        Self {
            today,
            observation_date: Some(date),
            forecast: false,
        }
    }

    pub fn forecast_only(today: NaiveDate) -> Self {
        Self {
            today,
            observation_date: None,
            forecast: true,
        }
    }

    /// This plan narrowed to `sources`. Sources this plan does not request stay off.
    pub fn restricted_to(&self, sources: &[Source]) -> Self {
        Self {
            today: self.today,
            observation_date: self
                .observation_date
                .filter(|_| sources.contains(&Source::Observation)),
            forecast: self.forecast && sources.contains(&Source::Forecast),
        }
    }

    pub fn requested(&self) -> Vec<Source> {
        let mut sources = Vec::with_capacity(2);
        if self.observation_date.is_some() {
            sources.push(Source::Observation);
        }
        if self.forecast {
            sources.push(Source::Forecast);
        }
        sources
    }
}
