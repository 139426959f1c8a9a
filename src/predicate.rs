//! Assertions about telemetry observed in the backend.

use std::fmt;

use snafu::{Snafu, ensure};

/// Index pattern every beat writes its events to.
pub const EVENTS_INDEX: &str = "*beat*";
/// Index pattern stack monitoring data lands in.
pub const MONITORING_INDEX: &str = ".monitoring-*";

const MESSAGE_FIELD: &str = "message";
const AGENT_TYPE_FIELD: &str = "agent.type";
const POD_NAME_FIELD: &str = "kubernetes.pod.name";

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum QueryError {
    #[snafu(display("Term {:?} is not of the form field:value", term))]
    MissingSeparator { term: String },
    #[snafu(display("Term {:?} has an empty field", term))]
    EmptyField { term: String },
    #[snafu(display("Term {:?} has an empty value", term))]
    EmptyValue { term: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Term {
    /// The field holds exactly this value.
    Equals { field: String, value: String },
    /// The field holds text containing this phrase.
    Contains { field: String, value: String },
}

impl Term {
    pub fn field(&self) -> &str {
        match self {
            Self::Equals { field, .. } | Self::Contains { field, .. } => field,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Equals { value, .. } | Self::Contains { value, .. } => value,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals { field, value } => write!(f, "{field}:{value}"),
            Self::Contains { field, value } => write!(f, "{field}:{value:?}"),
        }
    }
}

/// A dataset plus a conjunction of terms.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Query {
    pub dataset: String,
    pub terms: Vec<Term>,
}

impl Query {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            terms: Vec::new(),
        }
    }

    pub fn events() -> Self {
        Self::new(EVENTS_INDEX)
    }

    pub fn monitoring() -> Self {
        Self::new(MONITORING_INDEX)
    }

    #[must_use]
    pub fn equals(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.terms.push(Term::Equals {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn contains(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.terms.push(Term::Contains {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn in_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = dataset.into();
        self
    }

    /// Parses `field:value` terms joined by ` AND ` against the events
    /// dataset. Only the first `:` of a term separates field from value.
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        input
            .split(" AND ")
            .try_fold(Self::events(), |query, term| {
                let term = term.trim();
                let (field, value) = term.split_once(':').ok_or_else(|| {
                    QueryError::MissingSeparator {
                        term: term.to_owned(),
                    }
                })?;
                ensure!(!field.trim().is_empty(), EmptyFieldSnafu { term });
                ensure!(!value.trim().is_empty(), EmptyValueSnafu { term });
                Ok(query.equals(field.trim(), value.trim()))
            })
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.dataset)?;
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{term}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarity {
    Presence,
    Absence,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Predicate {
    /// At least one matching record shows up before the deadline.
    Presence(Query),
    /// No matching record shows up for the whole window.
    Absence(Query),
}

impl Predicate {
    pub const fn polarity(&self) -> Polarity {
        match self {
            Self::Presence(_) => Polarity::Presence,
            Self::Absence(_) => Polarity::Absence,
        }
    }

    pub const fn query(&self) -> &Query {
        match self {
            Self::Presence(query) | Self::Absence(query) => query,
        }
    }

    pub const fn is_presence(&self) -> bool {
        matches!(self, Self::Presence(_))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Presence(query) => write!(f, "has event [{query}]"),
            Self::Absence(query) => write!(f, "has no event [{query}]"),
        }
    }
}

pub fn has_event(query: Query) -> Predicate {
    Predicate::Presence(query)
}

pub fn no_event(query: Query) -> Predicate {
    Predicate::Absence(query)
}

pub fn has_monitoring_event(query: Query) -> Predicate {
    Predicate::Presence(query.in_dataset(MONITORING_INDEX))
}

pub fn has_event_from_beat(beat_type: &str) -> Predicate {
    has_event(Query::events().equals(AGENT_TYPE_FIELD, beat_type))
}

pub fn has_event_from_pod(pod_name: &str) -> Predicate {
    has_event(Query::events().equals(POD_NAME_FIELD, pod_name))
}

pub fn has_message_containing(message: &str) -> Predicate {
    has_event(Query::events().contains(MESSAGE_FIELD, message))
}

pub fn no_message_containing(message: &str) -> Predicate {
    no_event(Query::events().contains(MESSAGE_FIELD, message))
}
