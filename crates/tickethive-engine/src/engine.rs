//! The incident conversation state machine.
//!
//! Drives each turn: decides retrieval, question-asking, answer validation,
//! and status transitions. All LLM output passes through the explicit
//! classifier steps in `classify`; the state machine never branches on raw
//! response text. No record write is committed before every capability call
//! of the turn has succeeded, so a failed turn can be retried with the same
//! message and no state change.

use std::sync::Arc;
use std::time::Duration;

use tickethive_kb::KbRetriever;
use tickethive_provider::{CompletionRequest, LlmProvider};
use tickethive_schema::{Error, IncidentRecord, IncidentStatus, KbEntry, Result, TurnOutcome};
use tickethive_store::IncidentStore;

use crate::classify::{
    parse_resolution, parse_triage, resolution_prompt, triage_prompt, ResolutionDecision,
    TriageDecision,
};
use crate::config::Config;
use crate::llm::complete_with_retry;
use crate::policy::AnswerPolicy;
use crate::session::SessionStore;
use crate::session_lock::SessionLockManager;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub model: String,
    pub llm_timeout: Duration,
    /// Treat a retriever outage as "no match" instead of failing the turn.
    pub fail_open_retrieval: bool,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.llm.model.clone(),
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
            fail_open_retrieval: config.retrieval.fail_open,
        }
    }
}

pub struct DialogueEngine {
    llm: Arc<dyn LlmProvider>,
    retriever: Arc<KbRetriever>,
    store: IncidentStore,
    sessions: SessionStore,
    locks: SessionLockManager,
    policy: Arc<dyn AnswerPolicy>,
    settings: EngineSettings,
}

impl DialogueEngine {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        retriever: Arc<KbRetriever>,
        store: IncidentStore,
        sessions: SessionStore,
        policy: Arc<dyn AnswerPolicy>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            llm,
            retriever,
            store,
            sessions,
            locks: SessionLockManager::new(),
            policy,
            settings,
        }
    }

    /// The single entry point for a conversational turn.
    pub async fn start_or_continue(&self, session_id: &str, user_text: &str) -> Result<TurnOutcome> {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            return Err(Error::validation("message must not be empty"));
        }

        // Turns within one session are strictly sequential; other sessions
        // are untouched by this lock.
        let _guard = self.locks.acquire(session_id).await;
        let session = self.sessions.get_or_create(session_id);

        let Some(incident_id) = session.incident_id else {
            return self.first_contact(session_id, user_text).await;
        };

        match self.store.load(&incident_id).await? {
            None => {
                // The record vanished underneath the session; start fresh.
                tracing::warn!(session_id, %incident_id, "bound incident no longer exists");
                self.sessions.unbind(session_id);
                self.first_contact(session_id, user_text).await
            }
            Some(record) if record.status.is_terminal() => {
                // Resolved incidents accept no further dialogue; a new
                // message opens a new incident.
                self.sessions.unbind(session_id);
                self.first_contact(session_id, user_text).await
            }
            Some(record) => self.continue_incident(session_id, record, user_text).await,
        }
    }

    /// Discard the in-memory session. The incident record is untouched.
    pub fn end_session(&self, session_id: &str) -> bool {
        self.sessions.end(session_id)
    }

    pub async fn get_incident(&self, incident_id: &str) -> Result<IncidentRecord> {
        self.store
            .load(incident_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("incident {incident_id} does not exist")))
    }

    pub async fn list_incidents(
        &self,
        status: Option<IncidentStatus>,
    ) -> Result<Vec<IncidentRecord>> {
        self.store.list(status).await
    }

    // ------------------------------------------------------------------
    // First contact
    // ------------------------------------------------------------------

    async fn first_contact(&self, session_id: &str, user_text: &str) -> Result<TurnOutcome> {
        let request = CompletionRequest::simple(
            self.settings.model.clone(),
            None,
            triage_prompt(user_text),
        );
        let raw = complete_with_retry(self.llm.as_ref(), request, self.settings.llm_timeout).await?;

        match parse_triage(&raw) {
            TriageDecision::Conversational { reply } => {
                // Stays entirely outside the state machine: no record, no
                // retrieval call consumed.
                Ok(TurnOutcome::conversational(reply))
            }
            TriageDecision::ProblemReport => self.open_incident(session_id, user_text).await,
        }
    }

    async fn open_incident(&self, session_id: &str, user_text: &str) -> Result<TurnOutcome> {
        let mut record = IncidentRecord::new(user_text);

        // The one retrieval call this incident will ever make.
        let retrieved = match self.retriever.retrieve(user_text).await {
            Ok(hit) => hit,
            Err(e) if self.settings.fail_open_retrieval => {
                tracing::warn!("retriever unavailable, failing open to admin review: {e}");
                None
            }
            Err(e) => return Err(e),
        };

        let (reply, bound_entry) = match retrieved {
            Some(hit) => {
                record.bind_kb_reference(hit.entry.kb_id.as_str())?;
                let outstanding = record.missing_fields(&hit.entry.required_info);
                match outstanding.first() {
                    Some(field) => {
                        record.set_status(IncidentStatus::GatheringInfo);
                        (ask_reply(&record.incident_id, field), Some(hit.entry))
                    }
                    None => {
                        // Nothing to elicit: deliver the solution right away.
                        record.set_status(IncidentStatus::Open);
                        (solution_reply(&hit.entry), Some(hit.entry))
                    }
                }
            }
            None => {
                // No automated path for unknown issue types.
                record.set_status(IncidentStatus::PendingAdminReview);
                (escalation_reply(&record.incident_id), None)
            }
        };

        let stored = self.store.create(record).await?;
        self.sessions
            .bind(session_id, &stored.incident_id, bound_entry);
        tracing::info!(
            incident_id = %stored.incident_id,
            status = %stored.status,
            kb_reference = ?stored.kb_reference,
            "incident created"
        );
        Ok(TurnOutcome::for_incident(reply, &stored))
    }

    // ------------------------------------------------------------------
    // Continuing turns
    // ------------------------------------------------------------------

    async fn continue_incident(
        &self,
        session_id: &str,
        record: IncidentRecord,
        user_text: &str,
    ) -> Result<TurnOutcome> {
        match record.status {
            IncidentStatus::GatheringInfo => {
                self.gathering_turn(session_id, record, user_text).await
            }
            IncidentStatus::Open => self.open_turn(session_id, record, user_text).await,
            IncidentStatus::PendingAdminReview => {
                Ok(TurnOutcome::for_incident(pending_reply(&record), &record))
            }
            IncidentStatus::New | IncidentStatus::Resolved => Err(Error::Internal(
                anyhow::anyhow!("incident {} in unexpected state {}", record.incident_id, record.status),
            )),
        }
    }

    async fn gathering_turn(
        &self,
        session_id: &str,
        record: IncidentRecord,
        user_text: &str,
    ) -> Result<TurnOutcome> {
        let Some(entry) = self.bound_entry(session_id, &record) else {
            // The KB entry this conversation started against is gone (session
            // expired and the KB was re-edited). Reasoning against a
            // different entry would break the stable-context guarantee.
            tracing::warn!(
                incident_id = %record.incident_id,
                kb_reference = ?record.kb_reference,
                "bound KB entry no longer available, escalating"
            );
            let stored = self
                .store
                .update_with(&record.incident_id, |rec| {
                    expect_status(rec, IncidentStatus::GatheringInfo)?;
                    rec.set_status(IncidentStatus::PendingAdminReview);
                    Ok(())
                })
                .await?;
            return Ok(TurnOutcome::for_incident(pending_reply(&stored), &stored));
        };

        let outstanding = record.missing_fields(&entry.required_info);
        let Some(current_field) = outstanding.first().cloned() else {
            // Everything already collected but the transition never
            // committed; finish it now.
            let stored = self
                .store
                .update_with(&record.incident_id, |rec| {
                    expect_status(rec, IncidentStatus::GatheringInfo)?;
                    rec.set_status(IncidentStatus::Open);
                    Ok(())
                })
                .await?;
            return Ok(TurnOutcome::for_incident(solution_reply(&entry), &stored));
        };

        // Validate before any write: a garbage answer must not silently
        // close the gap, and a capability failure must leave the record
        // unmodified.
        let question = question_text(&current_field);
        let responsive = self.policy.is_responsive(&question, user_text).await?;
        if !responsive {
            return Ok(TurnOutcome::for_incident(
                reask_reply(&current_field),
                &record,
            ));
        }

        let field = current_field.clone();
        let answer = user_text.to_string();
        let required = entry.required_info.clone();
        let stored = self
            .store
            .update_with(&record.incident_id, move |rec| {
                expect_status(rec, IncidentStatus::GatheringInfo)?;
                rec.append_collected(field.clone(), answer.clone());
                if rec.missing_fields(&required).is_empty() {
                    rec.set_status(IncidentStatus::Open);
                }
                Ok(())
            })
            .await?;

        let reply = if stored.status == IncidentStatus::Open {
            solution_reply(&entry)
        } else {
            let next = stored
                .missing_fields(&entry.required_info)
                .first()
                .cloned()
                .unwrap_or_default();
            ask_reply(&stored.incident_id, &next)
        };
        Ok(TurnOutcome::for_incident(reply, &stored))
    }

    async fn open_turn(
        &self,
        session_id: &str,
        record: IncidentRecord,
        user_text: &str,
    ) -> Result<TurnOutcome> {
        let solution = self
            .bound_entry(session_id, &record)
            .map(|entry| entry.solution_steps);
        let request = CompletionRequest::simple(
            self.settings.model.clone(),
            None,
            resolution_prompt(&record.user_demand, solution.as_deref(), user_text),
        );
        let raw = complete_with_retry(self.llm.as_ref(), request, self.settings.llm_timeout).await?;

        match parse_resolution(&raw) {
            ResolutionDecision::Resolved { reply } => {
                let stored = self
                    .store
                    .update_with(&record.incident_id, |rec| {
                        expect_status(rec, IncidentStatus::Open)?;
                        rec.set_status(IncidentStatus::Resolved);
                        Ok(())
                    })
                    .await?;
                tracing::info!(incident_id = %stored.incident_id, "incident resolved by user confirmation");
                Ok(TurnOutcome::for_incident(reply, &stored))
            }
            ResolutionDecision::Continue { reply } => {
                Ok(TurnOutcome::for_incident(reply, &record))
            }
        }
    }

    /// The KB context this incident reasons against: the session's pinned
    /// copy, or the current index as a fallback after a session restart.
    fn bound_entry(&self, session_id: &str, record: &IncidentRecord) -> Option<KbEntry> {
        if let Some(entry) = self.sessions.bound_entry(session_id) {
            return Some(entry);
        }
        let kb_id = record.kb_reference.as_deref()?;
        let entry = self.retriever.entry_by_id(kb_id)?;
        self.sessions.pin_entry(session_id, entry.clone());
        Some(entry)
    }
}

/// The decision for this turn was computed against a specific status; if an
/// admin moved the record in the meantime, the decision is void.
fn expect_status(record: &IncidentRecord, expected: IncidentStatus) -> Result<()> {
    if record.status == expected {
        Ok(())
    } else {
        Err(Error::conflict(format!(
            "incident {} changed from {} to {} while the turn was processing",
            record.incident_id, expected, record.status
        )))
    }
}

fn question_text(field: &str) -> String {
    format!("Could you tell me: {field}?")
}

fn ask_reply(incident_id: &str, field: &str) -> String {
    format!(
        "I can help with that (incident {incident_id}). {}",
        question_text(field)
    )
}

fn reask_reply(field: &str) -> String {
    format!(
        "I still need that piece of information before we can continue. {}",
        question_text(field)
    )
}

fn solution_reply(entry: &KbEntry) -> String {
    format!(
        "Thanks, that is everything I need. Here is the fix for \"{}\":\n\n{}\n\nLet me know whether that solves the problem.",
        entry.use_case, entry.solution_steps
    )
}

fn escalation_reply(incident_id: &str) -> String {
    format!(
        "I could not find a known fix for this issue. I have filed incident {incident_id} for our support team; an administrator will review it and get back to you."
    )
}

fn pending_reply(record: &IncidentRecord) -> String {
    format!(
        "Incident {} is waiting for an administrator to review it. You will be contacted as soon as it has been looked at.",
        record.incident_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expect_status_passes_and_fails() {
        let mut record = IncidentRecord::new("x");
        record.set_status(IncidentStatus::Open);
        assert!(expect_status(&record, IncidentStatus::Open).is_ok());
        let err = expect_status(&record, IncidentStatus::GatheringInfo).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn reply_templates_mention_the_field() {
        assert!(ask_reply("INC1", "OS version").contains("OS version"));
        assert!(reask_reply("error message").contains("error message"));
    }

    #[test]
    fn solution_reply_contains_steps() {
        let entry = KbEntry {
            kb_id: "KB_1".into(),
            use_case: "vpn".into(),
            required_info: vec![],
            solution_steps: "1. reset adapter".into(),
        };
        let reply = solution_reply(&entry);
        assert!(reply.contains("1. reset adapter"));
        assert!(reply.contains("vpn"));
    }
}
