use std::fmt;

use crate::approval::ApprovalError;
use crate::fmea::FmeaError;
use crate::identity::{AuthError, PermissionError, UserError};
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    InvalidArgs,
    NotFound,
    PermissionDenied,
    StoreFailed,
}

impl ExitCode {
    pub const fn as_i32(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::InvalidArgs => 2,
            ExitCode::NotFound => 3,
            ExitCode::PermissionDenied => 4,
            ExitCode::StoreFailed => 10,
        }
    }
}

#[derive(Debug)]
pub struct ExitError {
    pub code: ExitCode,
    pub err: anyhow::Error,
}

impl ExitError {
    pub fn new(code: ExitCode, err: anyhow::Error) -> Self {
        Self { code, err }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.err.fmt(f)
    }
}

impl std::error::Error for ExitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.err.as_ref())
    }
}

pub fn classify(err: &anyhow::Error) -> ExitCode {
    if let Some(exit) = err.downcast_ref::<ExitError>() {
        return exit.code;
    }
    if let Some(store) = err.downcast_ref::<StoreError>() {
        return match store {
            StoreError::NotFound(_) => ExitCode::NotFound,
            StoreError::Validation(_) => ExitCode::InvalidArgs,
        };
    }
    if err.downcast_ref::<PermissionError>().is_some() || err.downcast_ref::<AuthError>().is_some()
    {
        return ExitCode::PermissionDenied;
    }
    if let Some(user) = err.downcast_ref::<UserError>() {
        return match user {
            UserError::NotFound(_) => ExitCode::NotFound,
            UserError::Duplicate(_) | UserError::Validation(_) => ExitCode::InvalidArgs,
        };
    }
    if let Some(approval) = err.downcast_ref::<ApprovalError>() {
        return match approval {
            ApprovalError::NotFound(_) => ExitCode::NotFound,
            ApprovalError::Closed { .. } => ExitCode::InvalidArgs,
        };
    }
    if err.downcast_ref::<FmeaError>().is_some() {
        return ExitCode::InvalidArgs;
    }
    ExitCode::StoreFailed
}

pub fn exit_code(err: &anyhow::Error) -> i32 {
    classify(err).as_i32()
}

pub fn invalid_args(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, anyhow::anyhow!(message.into())).into()
}

pub fn invalid_args_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, err).into()
}

pub fn not_found(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::NotFound, anyhow::anyhow!(message.into())).into()
}

pub fn store_failed_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::StoreFailed, err).into()
}
