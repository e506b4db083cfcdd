use super::resource::ManagedResource;
use crate::k8s::error::K8sError;
use crate::poller::PollError;
use std::fmt::{Display, Formatter};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid object: {0}")]
    InvalidObject(#[source] K8sError),
    #[error("error creating {resource}: {err}")]
    Create {
        resource: ManagedResource,
        #[source]
        err: K8sError,
    },
    #[error("waiting for {resource} to be ready: {err}")]
    NotReady {
        resource: ManagedResource,
        #[source]
        err: PollError,
    },
    #[error("creation of {0} cancelled")]
    Cancelled(ManagedResource),
}

impl LifecycleError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            LifecycleError::Cancelled(_) => true,
            LifecycleError::NotReady { err, .. } => err.is_cancelled(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
#[error("error deleting {resource}: {err}")]
pub struct DeleteError {
    pub resource: ManagedResource,
    #[source]
    pub err: K8sError,
}

/// Failures collected while tearing down a set of resources, kept in the order they happened.
#[derive(Debug, Default)]
pub struct AggregatedError {
    errors: Vec<DeleteError>,
}

impl AggregatedError {
    pub fn push(&mut self, err: DeleteError) {
        self.errors.push(err);
    }

    pub fn errors(&self) -> &[DeleteError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl Display for AggregatedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error(s) occurred:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregatedError {}
