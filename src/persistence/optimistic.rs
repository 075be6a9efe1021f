//! Bounded optimistic-locking retry loop.
//!
//! A conditional write succeeds only if the row still carries the version the
//! writer read. On a lost race the loop re-reads the row, re-applies the
//! mutation and tries again, up to a fixed budget. No lock is held between
//! attempts; the database's conditional `UPDATE` is the only arbiter.

use chrono::Utc;

use crate::model::Versioned;

use super::PersistenceError;

/// Number of retries allowed after the first conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    max_retries: u32,
}

impl RetryBudget {
    /// Three retries after the initial attempt.
    pub const DEFAULT: Self = Self { max_retries: 3 };

    /// Budget allowing `max_retries` retries after the first attempt.
    #[must_use]
    pub const fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Retries allowed after the first attempt.
    #[must_use]
    pub const fn max_retries(self) -> u32 {
        self.max_retries
    }

    /// Total attempts, including the first.
    #[must_use]
    pub const fn attempts(self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Callbacks driving one optimistic update.
pub(crate) struct OptimisticUpdate<Mutate, Write, Refetch, OnRetry> {
    /// Applies the change to a copy of the latest record.
    pub(crate) mutate: Mutate,
    /// Writes the candidate if the stored version still equals the second
    /// argument; returns whether a row was updated.
    pub(crate) write: Write,
    /// Re-reads the record after a lost race.
    pub(crate) refetch: Refetch,
    /// Observes each retry (zero-based attempt that lost).
    pub(crate) on_retry: OnRetry,
}

/// Runs the read-modify-conditional-write loop starting from `current`.
///
/// Returns the record as written, with its version advanced. When every
/// attempt loses, returns [`PersistenceError::VersionConflict`].
pub(crate) fn update_opt_lock<T, Mutate, Write, Refetch, OnRetry>(
    entity: &'static str,
    id: i64,
    budget: RetryBudget,
    current: &T,
    mut update: OptimisticUpdate<Mutate, Write, Refetch, OnRetry>,
) -> Result<T, PersistenceError>
where
    T: Versioned,
    Mutate: FnMut(&mut T) -> Result<(), PersistenceError>,
    Write: FnMut(&T, i64) -> Result<bool, PersistenceError>,
    Refetch: FnMut() -> Result<T, PersistenceError>,
    OnRetry: FnMut(u32),
{
    let attempts = budget.attempts();
    let mut latest = current.clone();

    for attempt in 0..attempts {
        let mut candidate = latest.clone();
        (update.mutate)(&mut candidate)?;
        let expected_version = candidate.version();
        candidate.advance_version(Utc::now());

        if (update.write)(&candidate, expected_version)? {
            return Ok(candidate);
        }

        if attempt.saturating_add(1) == attempts {
            break;
        }

        tracing::debug!("{entity} {id}: version {expected_version} is stale, retrying");
        (update.on_retry)(attempt);
        latest = (update.refetch)()?;
    }

    Err(PersistenceError::VersionConflict {
        entity,
        id,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use chrono::{DateTime, Utc};
    use rstest::rstest;

    use super::{OptimisticUpdate, RetryBudget, update_opt_lock};
    use crate::model::Versioned;
    use crate::persistence::PersistenceError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Counter {
        version: i64,
        value: i64,
    }

    impl Versioned for Counter {
        fn version(&self) -> i64 {
            self.version
        }

        fn advance_version(&mut self, _now: DateTime<Utc>) {
            self.version += 1;
        }
    }

    /// Stored row that other writers bump `interference` times before the
    /// update under test gets through.
    struct Row {
        stored: RefCell<Counter>,
        interference: Cell<u32>,
    }

    impl Row {
        fn new(interference: u32) -> Self {
            Self {
                stored: RefCell::new(Counter {
                    version: 0,
                    value: 0,
                }),
                interference: Cell::new(interference),
            }
        }

        fn write(&self, candidate: &Counter, expected: i64) -> bool {
            if self.interference.get() > 0 {
                self.interference.set(self.interference.get() - 1);
                let mut stored = self.stored.borrow_mut();
                stored.version += 1;
                stored.value += 1;
                return false;
            }
            let mut stored = self.stored.borrow_mut();
            if stored.version != expected {
                return false;
            }
            *stored = candidate.clone();
            true
        }
    }

    fn increment(row: &Row, budget: RetryBudget) -> (Result<Counter, PersistenceError>, Vec<u32>) {
        let start = row.stored.borrow().clone();
        let mut retries = Vec::new();
        let result = update_opt_lock(
            "counter",
            1,
            budget,
            &start,
            OptimisticUpdate {
                mutate: |counter: &mut Counter| {
                    counter.value += 1;
                    Ok::<_, PersistenceError>(())
                },
                write: |candidate: &Counter, expected: i64| {
                    Ok::<_, PersistenceError>(row.write(candidate, expected))
                },
                refetch: || Ok::<_, PersistenceError>(row.stored.borrow().clone()),
                on_retry: |attempt: u32| retries.push(attempt),
            },
        );
        (result, retries)
    }

    #[rstest]
    fn succeeds_first_time_without_contention() {
        let row = Row::new(0);

        let (result, retries) = increment(&row, RetryBudget::DEFAULT);

        assert_eq!(
            result,
            Ok(Counter {
                version: 1,
                value: 1
            })
        );
        assert!(retries.is_empty());
    }

    #[rstest]
    fn retries_from_fresh_state_after_losing_races() {
        let row = Row::new(2);

        let (result, retries) = increment(&row, RetryBudget::DEFAULT);

        // Two concurrent increments landed first, so ours observes value 2.
        assert_eq!(
            result,
            Ok(Counter {
                version: 3,
                value: 3
            })
        );
        assert_eq!(retries, vec![0, 1]);
    }

    #[rstest]
    fn exhausting_budget_reports_conflict() {
        let row = Row::new(10);

        let (result, retries) = increment(&row, RetryBudget::new(2));

        assert_eq!(
            result,
            Err(PersistenceError::VersionConflict {
                entity: "counter",
                id: 1,
                attempts: 3,
            })
        );
        assert_eq!(retries, vec![0, 1]);
    }

    #[rstest]
    fn mutation_errors_stop_the_loop() {
        let row = Row::new(0);
        let start = row.stored.borrow().clone();

        let result = update_opt_lock(
            "counter",
            1,
            RetryBudget::DEFAULT,
            &start,
            OptimisticUpdate {
                mutate: |_: &mut Counter| {
                    Err(PersistenceError::Rejected {
                        message: "no".to_owned(),
                    })
                },
                write: |_: &Counter, _: i64| Ok::<_, PersistenceError>(true),
                refetch: || Ok::<_, PersistenceError>(start.clone()),
                on_retry: |_: u32| {},
            },
        );

        assert_eq!(
            result,
            Err(PersistenceError::Rejected {
                message: "no".to_owned()
            })
        );
    }
}
