use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExclusivityError {
    #[error("Target {target_id} already has an active job ({job_id})")]
    Conflict { target_id: String, job_id: Uuid },
    #[error("Job {0} not found")]
    NotFound(Uuid),
    #[error("Job pool is full ({limit} running)")]
    AtCapacity { limit: usize },
}
