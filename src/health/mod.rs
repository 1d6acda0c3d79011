//! In-memory proxy health view with asynchronous batched persistence

mod tracker;
mod worker;

pub use tracker::{HealthTracker, RecoveryRoll, ThreadRngRoll};
pub use worker::{HealthWorker, HealthWorkerHandle};
