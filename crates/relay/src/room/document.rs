// Last-writer-wins document store for a single room.

use chrono::{DateTime, Utc};
use huddle_common::types::DocumentState;

/// Result of an accepted proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub state: DocumentState,
    /// The proposer built on a version older than the one replaced.
    pub stale: bool,
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    state: Option<DocumentState>,
}

impl DocumentStore {
    /// Stored state, or the initial empty state at `now` if never edited.
    pub fn current(&self, now: DateTime<Utc>) -> DocumentState {
        self.state.clone().unwrap_or_else(|| DocumentState::initial(now))
    }

    pub fn version(&self) -> u64 {
        self.state.as_ref().map_or(1, |state| state.version)
    }

    /// Every proposal is accepted. The new version is derived from the stored
    /// version; `observed_version` only feeds the staleness flag.
    pub fn propose(
        &mut self,
        editor_id: &str,
        content: String,
        observed_version: Option<u64>,
        now: DateTime<Utc>,
    ) -> Proposal {
        let previous_version = self.version();
        let stale = observed_version.is_some_and(|observed| observed < previous_version);

        let state = DocumentState {
            content,
            version: previous_version + 1,
            last_edited_by: Some(editor_id.to_string()),
            last_edited_at: now,
        };
        self.state = Some(state.clone());

        Proposal { state, stale }
    }
}
