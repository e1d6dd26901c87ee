use std::sync::Arc;

use tickethive_engine::{AdminAnnotator, DialogueEngine};
use tickethive_kb::KbIndexer;
use tickethive_store::IncidentStore;

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DialogueEngine>,
    pub annotator: Arc<AdminAnnotator>,
    pub indexer: Arc<KbIndexer>,
    pub store: IncidentStore,
}
