//! Layered error types. Every terminal error exposes a stable machine code
//! and user-facing suggestions; provider internals never leak into messages.

use std::{error, fmt};

use crate::{provider::ProviderError, store::StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCode {
    InvalidCoords,
    MissingStart,
    MissingEnd,
    MultipleStart,
    MultipleEnd,
    FixedSeqConflict,
    DuplicateId,
    TooFewPoints,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::InvalidCoords => "VALIDATION_INVALID_COORDS",
            ValidationCode::MissingStart => "VALIDATION_MISSING_START",
            ValidationCode::MissingEnd => "VALIDATION_MISSING_END",
            ValidationCode::MultipleStart => "VALIDATION_MULTIPLE_START",
            ValidationCode::MultipleEnd => "VALIDATION_MULTIPLE_END",
            ValidationCode::FixedSeqConflict => "VALIDATION_FIXED_SEQ_CONFLICT",
            ValidationCode::DuplicateId => "VALIDATION_DUPLICATE_ID",
            ValidationCode::TooFewPoints => "VALIDATION_TOO_FEW_POINTS",
        }
    }
}

/// Rejected input, reported before any provider call. `field` is the path of
/// the offending value, e.g. `stops[2].lat`.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: ValidationCode,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new<F, M>(code: ValidationCode, field: F, message: M) -> Self
    where
        F: Into<String>,
        M: Into<String>,
    {
        Self {
            code,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code.as_str(), self.field, self.message)
    }
}

impl error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum OptimizeError {
    Validation(ValidationError),
    /// The fixed-position constraints cannot all be satisfied.
    Infeasible { message: String },
}

impl OptimizeError {
    pub fn code(&self) -> &'static str {
        match self {
            OptimizeError::Validation(why) => why.code.as_str(),
            OptimizeError::Infeasible { .. } => "OPTIMIZATION_INFEASIBLE",
        }
    }
}

impl fmt::Display for OptimizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizeError::Validation(why) => why.fmt(f),
            OptimizeError::Infeasible { message } => {
                write!(f, "optimization infeasible: {}", message)
            }
        }
    }
}

impl error::Error for OptimizeError {}

impl From<ValidationError> for OptimizeError {
    fn from(why: ValidationError) -> Self {
        OptimizeError::Validation(why)
    }
}

#[derive(Debug)]
pub enum BreakdownError {
    Validation(ValidationError),
    /// Too many legs failed before the deadline; carries the last cause.
    Provider(ProviderError),
    /// A leg carried a non-finite or negative metric that could not be
    /// repaired.
    InvalidSegment { leg: usize },
    Optimize(OptimizeError),
    Store(StoreError),
    Cancelled,
}

impl BreakdownError {
    pub fn code(&self) -> &'static str {
        match self {
            BreakdownError::Validation(why) => why.code.as_str(),
            BreakdownError::Provider(_) => "ROUTE_PROVIDER_ERROR",
            BreakdownError::InvalidSegment { .. } => "INVALID_SEGMENT",
            BreakdownError::Optimize(why) => why.code(),
            BreakdownError::Store(why) => why.code(),
            BreakdownError::Cancelled => "REQUEST_CANCELLED",
        }
    }

    /// Actionable hints for the caller, free of provider internals.
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            BreakdownError::Provider(ProviderError::RateLimited { retry_after_s }) => {
                vec![format!("try again in {} seconds", retry_after_s)]
            }
            BreakdownError::Provider(_) => {
                vec!["try again later or switch the routing mode".to_owned()]
            }
            BreakdownError::Validation(why) => {
                vec![format!("correct the value at '{}'", why.field)]
            }
            BreakdownError::Store(StoreError::PreviewExpired) => {
                vec!["recompute the route to obtain a fresh preview".to_owned()]
            }
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for BreakdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakdownError::Validation(why) => why.fmt(f),
            BreakdownError::Provider(_) => {
                write!(f, "the routing service is currently unavailable")
            }
            BreakdownError::InvalidSegment { leg } => {
                write!(f, "leg {} carries an invalid metric", leg)
            }
            BreakdownError::Optimize(why) => why.fmt(f),
            BreakdownError::Store(why) => why.fmt(f),
            BreakdownError::Cancelled => write!(f, "the request was cancelled"),
        }
    }
}

impl error::Error for BreakdownError {}

impl From<ValidationError> for BreakdownError {
    fn from(why: ValidationError) -> Self {
        BreakdownError::Validation(why)
    }
}

impl From<OptimizeError> for BreakdownError {
    fn from(why: OptimizeError) -> Self {
        match why {
            OptimizeError::Validation(why) => BreakdownError::Validation(why),
            other => BreakdownError::Optimize(other),
        }
    }
}

impl From<StoreError> for BreakdownError {
    fn from(why: StoreError) -> Self {
        BreakdownError::Store(why)
    }
}
