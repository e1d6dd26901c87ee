//! Manual status overrides with a mandatory audit message.

use tickethive_schema::{Error, IncidentRecord, IncidentStatus, Result};
use tickethive_store::IncidentStore;

pub struct AdminAnnotator {
    store: IncidentStore,
}

impl AdminAnnotator {
    pub fn new(store: IncidentStore) -> Self {
        Self { store }
    }

    /// Force a status transition. The message is a hard precondition, not a
    /// UI nicety: the appended annotation is the only audit trail for manual
    /// interventions. No-op transitions are rejected so the log stays
    /// meaningful.
    pub async fn apply_override(
        &self,
        incident_id: &str,
        new_status: IncidentStatus,
        message: &str,
    ) -> Result<IncidentRecord> {
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::validation("override message must not be empty"));
        }

        let stored = self
            .store
            .update_with(incident_id, |record| {
                if record.status == new_status {
                    return Err(Error::validation(format!(
                        "incident {} already has status {new_status}",
                        record.incident_id
                    )));
                }
                let old_status = record.status;
                record.append_admin_message(old_status, new_status, message);
                record.set_status(new_status);
                Ok(())
            })
            .await?;

        tracing::info!(
            incident_id,
            old_status = %stored.admin_messages.last().map(|a| a.old_status).unwrap_or(stored.status),
            new_status = %new_status,
            "admin override applied"
        );
        Ok(stored)
    }
}
