//! Status publishing for a single run

use super::InstallError;
use crate::catalogue::{ModInfo, RevisionInfo};
use crate::db::Database;
use crate::hub::Hub;
use crate::status::{OpKind, OpState, Operation, StatusSnapshot};
use serde_json::Value;
use std::sync::Arc;

/// Publishes snapshots of one mod's channel as a run moves through its steps
#[derive(Clone)]
pub(crate) struct Reporter {
    hub: Arc<Hub>,
    db: Arc<Database>,
    channel: String,
    op: OpKind,
    snapshot: StatusSnapshot,
    mod_info: Option<ModInfo>,
    revision: Option<RevisionInfo>,
}

impl Reporter {
    pub fn new(hub: Arc<Hub>, db: Arc<Database>, channel: &str, op: OpKind) -> Self {
        let mut reporter = Self {
            hub,
            db,
            channel: channel.to_string(),
            op,
            snapshot: StatusSnapshot::default(),
            mod_info: None,
            revision: None,
        };
        reporter.refresh();
        reporter
    }

    /// Reload the snapshot from committed state
    pub fn refresh(&mut self) {
        self.snapshot = match self.db.status_snapshot(&self.channel) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!("Failed to load status of {}: {:#}", self.channel, e);
                StatusSnapshot::default()
            }
        };
    }

    pub fn mark_installing(&mut self) {
        self.snapshot.installing = true;
    }

    pub fn set_mod(&mut self, info: &ModInfo) {
        self.mod_info = Some(info.clone());
    }

    pub fn set_revision(&mut self, revision: &RevisionInfo) {
        self.revision = Some(revision.clone());
    }

    pub fn send(&self, state: OpState) {
        self.send_with(state, Value::Null);
    }

    /// Publish a step with extra fields taken from a JSON object
    pub fn send_with(&self, state: OpState, data: Value) {
        let mut operation = Operation::new(self.op, state)
            .with_mod(self.mod_info.as_ref())
            .with_revision(self.revision.as_ref());
        if let Value::Object(fields) = data {
            operation.data.extend(fields);
        }
        self.publish(operation);
    }

    /// Publish a step about another mod on this channel
    pub fn send_about(&self, state: OpState, info: &ModInfo, revision: &RevisionInfo) {
        let operation = Operation::new(self.op, state)
            .with_mod(Some(info))
            .with_revision(Some(revision));
        self.publish(operation);
    }

    pub fn error(&self, err: &InstallError) {
        let mut operation = Operation::error(self.op, err.code(), err.to_string())
            .with_mod(self.mod_info.as_ref())
            .with_revision(self.revision.as_ref());
        operation.data.extend(err.extra());
        self.publish(operation);
    }

    fn publish(&self, operation: Operation) {
        tracing::debug!(
            "Publishing {:?}/{:?} on {}",
            operation.op,
            operation.state,
            self.channel
        );
        let snapshot = self.snapshot.clone().with_operation(operation);
        self.hub.publish(&self.channel, &snapshot, None);
    }
}
