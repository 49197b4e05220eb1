pub mod attempt;
pub mod batch;
pub mod billing_project;
pub mod instance;
pub mod job;
pub mod pool;
pub mod resources;
pub mod staging;

pub use attempt::{Attempt, AttemptReason};
pub use batch::{Batch, BatchOutcome, BatchState};
pub use billing_project::{BillingProject, BillingProjectStatus};
pub use instance::{Instance, InstanceState};
pub use job::{Job, JobState};
pub use pool::PoolConfig;
pub use resources::{compute_job_resources, JobResources};
pub use staging::StagingCounters;
