//! `cluster-agent status` - show the stored leader election record.

use anyhow::Context;
use chrono::{DateTime, Utc};
use cluster_agent_leader_election::{
    get_leader_details_in, CoordinationBackend, LeaderElectionRecord,
};
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

/// Printed when the lease record or its election annotation is missing
pub const NO_LEADER_MESSAGE: &str = "no leader elected yet";

/// Displayable view of a leader election record at a given moment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderStatus {
    pub holder_identity: String,
    pub lease_duration_seconds: u64,
    pub acquire_time: Option<DateTime<Utc>>,
    pub renew_time: Option<DateTime<Utc>>,
    pub leader_transitions: u32,
    pub expired: bool,
}

impl LeaderStatus {
    pub fn new(record: LeaderElectionRecord, now: DateTime<Utc>) -> Self {
        let expired = record.is_expired(now);
        Self {
            holder_identity: record.holder_identity,
            lease_duration_seconds: record.lease_duration_seconds,
            acquire_time: record.acquire_time,
            renew_time: record.renew_time,
            leader_transitions: record.leader_transitions,
            expired,
        }
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Field", "Value"]);
        table.add_row(vec!["Holder".to_string(), or_dash(&self.holder_identity)]);
        table.add_row(vec![
            "Lease duration".to_string(),
            format!("{}s", self.lease_duration_seconds),
        ]);
        table.add_row(vec!["Acquired".to_string(), format_time(self.acquire_time)]);
        table.add_row(vec!["Renewed".to_string(), format_time(self.renew_time)]);
        table.add_row(vec![
            "Transitions".to_string(),
            self.leader_transitions.to_string(),
        ]);
        table.add_row(vec![
            "Expired".to_string(),
            if self.expired { "yes" } else { "no" }.to_string(),
        ]);
        table
    }
}

fn or_dash(value: &str) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value.to_string()
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
}

/// Run the status command.
///
/// Returns exit code 1 when no leader election record exists.
pub async fn run_status(
    backend: &dyn CoordinationBackend,
    namespace: &str,
    lease_name: &str,
    json: bool,
) -> anyhow::Result<i32> {
    let record = match get_leader_details_in(backend, namespace, lease_name).await {
        Ok(record) => record,
        Err(e) if e.is_not_found() => {
            tracing::debug!("{}", e);
            println!("{}", NO_LEADER_MESSAGE);
            return Ok(1);
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("reading leader election record {}/{}", namespace, lease_name)
            })
        }
    };

    let status = LeaderStatus::new(record, Utc::now());
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("{}", status.to_table());
    }
    Ok(0)
}
