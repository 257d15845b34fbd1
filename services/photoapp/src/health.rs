use crate::app::PhotoApp;
use serde::Serialize;
use tracing::{instrument, warn};

/// One side of a health probe: a count, or why it could not be taken
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProbeResult {
    Count(u64),
    Error(String),
}

impl ProbeResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeResult::Count(_))
    }
}

/// Reachability of the object store and the database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Objects in the bucket
    pub objects: ProbeResult,
    /// Rows in the users table
    pub users: ProbeResult,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.objects.is_ok() && self.users.is_ok()
    }
}

impl PhotoApp {
    /// Probe both stores independently. Never fails; an unreachable store is
    /// reported in its half of the report.
    #[instrument(skip(self))]
    pub async fn ping(&self) -> HealthReport {
        let objects = match self
            .retry
            .run("count_objects", || self.objects.count_objects())
            .await
        {
            Ok(count) => ProbeResult::Count(count),
            Err(e) => {
                warn!(error = %e, "Object store probe failed");
                ProbeResult::Error(e.to_string())
            }
        };

        let users = match self
            .retry
            .run("count_users", || self.metadata.count_users())
            .await
        {
            Ok(count) => ProbeResult::Count(count.max(0) as u64),
            Err(e) => {
                warn!(error = %e, "Database probe failed");
                ProbeResult::Error(e.to_string())
            }
        };

        HealthReport { objects, users }
    }
}
