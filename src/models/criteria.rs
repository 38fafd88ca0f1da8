//! Query criteria shared by every entity
//!
//! A criteria is a record of optional per-column filters. All filters present
//! on a criteria are ANDed together. Validation happens before the criteria
//! reaches a repository; repositories assume a valid criteria.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Page size used by list operations when the caller does not send one.
pub const DEFAULT_LIMIT: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CriteriaError {
    #[error("timestamp operator {op:?} expects {expected} value(s), got {got}")]
    Arity {
        op: TimestampOp,
        expected: &'static str,
        got: usize,
    },
    #[error("IN filter requires at least one value")]
    EmptyIn,
    #[error("column {0} cannot be used for sorting")]
    UnknownSortColumn(String),
}

/// Filter on a scalar column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scalar<T> {
    Equal(T),
    In(Vec<T>),
}

impl<T: PartialEq> Scalar<T> {
    pub fn matches(&self, value: &T) -> bool {
        match self {
            Scalar::Equal(expected) => expected == value,
            Scalar::In(values) => values.contains(value),
        }
    }

    /// Matches a nullable column. NULL never satisfies an equality filter.
    pub fn matches_opt(&self, value: Option<&T>) -> bool {
        value.is_some_and(|v| self.matches(v))
    }

    pub fn validate(&self) -> Result<(), CriteriaError> {
        match self {
            Scalar::In(values) if values.is_empty() => Err(CriteriaError::EmptyIn),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampOp {
    Null,
    Equal,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    In,
    Between,
}

/// Filter on a timestamp column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampFilter {
    pub op: TimestampOp,
    #[serde(default)]
    pub values: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub negation: bool,
}

impl TimestampFilter {
    pub fn new(op: TimestampOp, values: Vec<DateTime<Utc>>) -> Self {
        Self {
            op,
            values,
            negation: false,
        }
    }

    pub fn negated(mut self) -> Self {
        self.negation = !self.negation;
        self
    }

    pub fn validate(&self) -> Result<(), CriteriaError> {
        let got = self.values.len();
        let (ok, expected) = match self.op {
            TimestampOp::Null => (got == 0, "0"),
            TimestampOp::Equal
            | TimestampOp::Greater
            | TimestampOp::GreaterEqual
            | TimestampOp::Less
            | TimestampOp::LessEqual => (got == 1, "1"),
            TimestampOp::In => (got >= 1, "at least 1"),
            TimestampOp::Between => (got == 2, "2"),
        };
        if ok {
            Ok(())
        } else {
            Err(CriteriaError::Arity {
                op: self.op,
                expected,
                got,
            })
        }
    }

    /// Evaluates the filter against a nullable column value.
    pub fn matches(&self, value: Option<DateTime<Utc>>) -> bool {
        let hit = match (self.op, value) {
            (TimestampOp::Null, v) => v.is_none(),
            (_, None) => false,
            (TimestampOp::Equal, Some(v)) => self.values.first() == Some(&v),
            (TimestampOp::Greater, Some(v)) => self.values.first().is_some_and(|x| v > *x),
            (TimestampOp::GreaterEqual, Some(v)) => self.values.first().is_some_and(|x| v >= *x),
            (TimestampOp::Less, Some(v)) => self.values.first().is_some_and(|x| v < *x),
            (TimestampOp::LessEqual, Some(v)) => self.values.first().is_some_and(|x| v <= *x),
            (TimestampOp::In, Some(v)) => self.values.contains(&v),
            (TimestampOp::Between, Some(v)) => match self.values.as_slice() {
                [from, to] => v >= *from && v <= *to,
                _ => false,
            },
        };
        hit != self.negation
    }
}

/// Matches a tri-state boolean filter. `None` means no filter.
pub fn matches_bool(filter: Option<bool>, value: bool) -> bool {
    filter.map_or(true, |expected| expected == value)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub column: String,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

/// Offset, limit and ordering of a find. `limit == 0` means no limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default)]
    pub sort: Vec<Sort>,
}

fn default_limit() -> u64 {
    DEFAULT_LIMIT
}

impl Default for Pagination {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Pagination {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit,
            sort: Vec::new(),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0, 0)
    }

    /// Builds the pagination of a list request. A missing limit falls back to
    /// [`DEFAULT_LIMIT`].
    pub fn from_request(offset: Option<u64>, limit: Option<u64>, sort: Vec<Sort>) -> Self {
        Self {
            offset: offset.unwrap_or(0),
            limit: limit.unwrap_or(DEFAULT_LIMIT),
            sort,
        }
    }

    /// Rejects sort columns outside `allowed`.
    pub fn validate(&self, allowed: &[&str]) -> Result<(), CriteriaError> {
        match self.sort.iter().find(|s| !allowed.contains(&s.column.as_str())) {
            Some(bad) => Err(CriteriaError::UnknownSortColumn(bad.column.clone())),
            None => Ok(()),
        }
    }

    /// Applies offset and limit to an already ordered in-memory result.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = usize::try_from(self.offset).unwrap_or(usize::MAX);
        let iter = items.into_iter().skip(offset);
        if self.limit == 0 {
            iter.collect()
        } else {
            iter.take(usize::try_from(self.limit).unwrap_or(usize::MAX)).collect()
        }
    }
}
