//! Store client: natural-key get-or-create against a backing store
//!
//! The [`Store`] wraps a [`Backend`] (the remote API or the in-memory
//! staging area) and implements the upsert protocol:
//! 1. lookup by explicit `id`, or by natural key
//! 2. verification of every submitted attribute against the stored record
//! 3. creation as the very last step, retried once when a concurrent writer
//!    wins the race
//!
//! Connection-level failures are retried with a linear backoff by
//! [`RetryPolicy`].

use serde_json::Value;
use std::fmt;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::attrs::{display_value, values_match, Attributes};
use crate::schema::{ResourceKind, ResourcePath, SchemaError};

/// Attribute never compared when verifying an existing record
const UNCHECKED_FIELD: &str = "description";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("{kind} with id {id} not in store")]
    NotFound { kind: ResourceKind, id: i64 },
    #[error("\"{field}\" mismatch in {kind} {subject} (\"{submitted}\" vs \"{existing}\")")]
    Conflict {
        field: String,
        kind: ResourceKind,
        subject: String,
        submitted: String,
        existing: String,
    },
    #[error("connection error: {0}")]
    Transient(String),
    #[error("too many connection errors ({attempts} attempts), last: {last}")]
    RetryExhausted { attempts: u32, last: String },
    #[error("creating {kind} lost a race with a concurrent writer")]
    RaceLost { kind: ResourceKind },
    #[error("upsert of {kind} failed after retrying a lost race")]
    UpsertFailed { kind: ResourceKind },
    #[error("{kind} returned by the store has no integer id")]
    MissingId { kind: ResourceKind },
    #[error("reference cycle through {kind}")]
    Cycle { kind: ResourceKind },
    #[error("store error: {0}")]
    Backend(String),
}

/// Primitive operations of a backing store
///
/// `create` returns `Ok(None)` when the store rejected the record because
/// of a uniqueness constraint. Connection failures worth retrying are
/// reported as [`StoreError::Transient`].
pub trait Backend {
    fn create(
        &mut self,
        path: &ResourcePath,
        attrs: &Attributes,
    ) -> Result<Option<Attributes>, StoreError>;

    fn fetch_by_id(
        &mut self,
        path: &ResourcePath,
        id: i64,
    ) -> Result<Option<Attributes>, StoreError>;

    fn fetch_by_key(
        &mut self,
        path: &ResourcePath,
        key: &Attributes,
    ) -> Result<Option<Attributes>, StoreError>;

    fn list(&mut self, path: &ResourcePath) -> Result<Vec<Attributes>, StoreError>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn create(
        &mut self,
        path: &ResourcePath,
        attrs: &Attributes,
    ) -> Result<Option<Attributes>, StoreError> {
        (**self).create(path, attrs)
    }

    fn fetch_by_id(
        &mut self,
        path: &ResourcePath,
        id: i64,
    ) -> Result<Option<Attributes>, StoreError> {
        (**self).fetch_by_id(path, id)
    }

    fn fetch_by_key(
        &mut self,
        path: &ResourcePath,
        key: &Attributes,
    ) -> Result<Option<Attributes>, StoreError> {
        (**self).fetch_by_key(path, key)
    }

    fn list(&mut self, path: &ResourcePath) -> Result<Vec<Attributes>, StoreError> {
        (**self).list(path)
    }
}

/// Whether `record` carries every field of `key` with a matching value
pub fn matches_key(record: &Attributes, key: &Attributes) -> bool {
    key.iter()
        .all(|(field, value)| record.get(field).is_some_and(|v| values_match(v, value)))
}

/// Linear backoff for transient backend failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay after attempt `n` is `n * backoff_step`
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_step: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Run `op`, retrying while it fails with [`StoreError::Transient`]
    pub fn run<T>(
        &self,
        mut op: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut last = String::new();
        for attempt in 1..=self.max_attempts {
            match op() {
                Err(StoreError::Transient(msg)) => {
                    warn!(attempt, error = %msg, "Connection error, trying again");
                    last = msg;
                    if attempt < self.max_attempts {
                        thread::sleep(self.backoff_step * attempt);
                    }
                }
                other => return other,
            }
        }
        Err(StoreError::RetryExhausted {
            attempts: self.max_attempts,
            last,
        })
    }
}

/// How an upsert resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    MatchedById,
    MatchedByKey,
    Created,
}

impl Outcome {
    /// One-character code used in publish log lines
    pub fn code(self) -> char {
        match self {
            Self::MatchedById => '=',
            Self::MatchedByKey => '?',
            Self::Created => '+',
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Get-or-create client over a backend
pub struct Store<B> {
    backend: B,
    retry: RetryPolicy,
    indent: Option<usize>,
}

impl<B: Backend> Store<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
            indent: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Pretty-print payloads in debug logs with this many spaces
    pub fn with_indent(mut self, indent: Option<usize>) -> Self {
        self.indent = indent;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Get or create a record of `kind`, returning the store's canonical copy
    ///
    /// A lost creation race is retried exactly once.
    pub fn upsert(
        &mut self,
        kind: ResourceKind,
        attrs: &Attributes,
        parent: Option<i64>,
    ) -> Result<(Attributes, Outcome), StoreError> {
        let path = kind.path(parent)?;
        debug!(path = %path, payload = %self.render(attrs), "-->");

        let result = match self.get_or_create(kind, &path, attrs) {
            Err(StoreError::RaceLost { .. }) => {
                debug!(kind = %kind, path = %path, "Create lost a race, retrying");
                match self.get_or_create(kind, &path, attrs) {
                    Err(StoreError::RaceLost { kind }) => Err(StoreError::UpsertFailed { kind }),
                    other => other,
                }
            }
            other => other,
        };

        if let Ok((canonical, _)) = &result {
            debug!(path = %path, payload = %self.render(canonical), "<--");
        }
        result
    }

    fn get_or_create(
        &mut self,
        kind: ResourceKind,
        path: &ResourcePath,
        attrs: &Attributes,
    ) -> Result<(Attributes, Outcome), StoreError> {
        let retry = self.retry;

        if let Some(value) = attrs.get("id") {
            let id = value.as_i64().ok_or_else(|| SchemaError::InvalidValue {
                kind,
                field: "id".to_string(),
                reason: format!("expected an integer, got {value}"),
            })?;
            let backend = &mut self.backend;
            let existing = retry
                .run(|| backend.fetch_by_id(path, id))?
                .ok_or(StoreError::NotFound { kind, id })?;
            verify(kind, &format!("with id {id}"), attrs, &existing)?;
            return Ok((existing, Outcome::MatchedById));
        }

        let natural_key = kind.natural_key();
        if !natural_key.iter().all(|field| attrs.contains_key(*field)) {
            return Err(SchemaError::MissingKey {
                kind,
                fields: natural_key.join(","),
                attributes: Value::Object(attrs.clone()).to_string(),
            }
            .into());
        }
        let key: Attributes = natural_key
            .iter()
            .map(|field| (field.to_string(), attrs[*field].clone()))
            .collect();

        let backend = &mut self.backend;
        if let Some(existing) = retry.run(|| backend.fetch_by_key(path, &key))? {
            let subject = attrs
                .get("name")
                .or_else(|| existing.get("id"))
                .map(display_value)
                .unwrap_or_default();
            verify(kind, &format!("\"{subject}\""), attrs, &existing)?;
            return Ok((existing, Outcome::MatchedByKey));
        }

        match retry.run(|| backend.create(path, attrs))? {
            Some(created) => Ok((created, Outcome::Created)),
            None => Err(StoreError::RaceLost { kind }),
        }
    }

    fn render(&self, attrs: &Attributes) -> String {
        let value = Value::Object(attrs.clone());
        match self.indent {
            Some(width) => {
                let indent = vec![b' '; width];
                let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent);
                let mut out = Vec::new();
                let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
                match serde::Serialize::serialize(&value, &mut ser) {
                    Ok(()) => String::from_utf8_lossy(&out).into_owned(),
                    Err(_) => value.to_string(),
                }
            }
            None => value.to_string(),
        }
    }
}

/// Every attribute present on both sides must agree
fn verify(
    kind: ResourceKind,
    subject: &str,
    submitted: &Attributes,
    existing: &Attributes,
) -> Result<(), StoreError> {
    for (field, value) in submitted {
        if field == UNCHECKED_FIELD {
            continue;
        }
        if let Some(current) = existing.get(field) {
            if !values_match(value, current) {
                return Err(StoreError::Conflict {
                    field: field.clone(),
                    kind,
                    subject: subject.to_string(),
                    submitted: display_value(value),
                    existing: display_value(current),
                });
            }
        }
    }
    Ok(())
}
