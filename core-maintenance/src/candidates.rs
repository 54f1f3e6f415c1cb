//! Paged, searchable, sortable view over a rule's candidates.
//!
//! The selection belongs to the visible page: any change of rule, page,
//! search term or sort clears it so stale ids are never submitted against a
//! different set of rows.

use crate::api::MaintenanceApi;
use crate::error::{MaintenanceError, Result};
use crate::selection::{CandidateSelection, SortColumn, SortState};
use crate::types::{Candidate, CandidateId, CandidatePage, CandidateQuery, RuleId};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct CandidateBrowser {
    api: Arc<dyn MaintenanceApi>,
    rule_id: RuleId,
    query: CandidateQuery,
    page: Option<CandidatePage>,
    selection: CandidateSelection,
}

impl CandidateBrowser {
    pub fn new(api: Arc<dyn MaintenanceApi>, rule_id: RuleId, per_page: u32) -> Self {
        Self {
            api,
            rule_id,
            query: CandidateQuery::new(per_page.max(1)),
            page: None,
            selection: CandidateSelection::new(),
        }
    }

    pub fn rule_id(&self) -> RuleId {
        self.rule_id
    }

    pub fn query(&self) -> &CandidateQuery {
        &self.query
    }

    /// Last fetched page, if any.
    pub fn page(&self) -> Option<&CandidatePage> {
        self.page.as_ref()
    }

    pub fn candidates(&self) -> &[Candidate] {
        self.page.as_ref().map(|p| p.items.as_slice()).unwrap_or(&[])
    }

    pub fn selection(&self) -> &CandidateSelection {
        &self.selection
    }

    pub fn selected_ids(&self) -> Vec<CandidateId> {
        self.selection.ids()
    }

    /// Switches to another rule, back to page one with no search or sort.
    pub fn set_rule(&mut self, rule_id: RuleId) {
        if rule_id == self.rule_id {
            return;
        }
        self.rule_id = rule_id;
        self.query = CandidateQuery::new(self.query.per_page);
        self.page = None;
        self.selection.clear();
    }

    pub fn set_page(&mut self, page: u32) -> Result<()> {
        if page == 0 {
            return Err(MaintenanceError::Validation(
                "Page numbers start at 1".to_string(),
            ));
        }
        self.query.page = page;
        self.selection.clear();
        Ok(())
    }

    /// Blank terms clear the search.
    pub fn set_search(&mut self, term: &str) {
        let term = term.trim();
        self.query.search = (!term.is_empty()).then(|| term.to_string());
        self.query.page = 1;
        self.selection.clear();
    }

    /// Applies the next sort for `column` and returns to page one.
    pub fn cycle_sort(&mut self, column: SortColumn) -> Option<SortState> {
        self.query.sort = SortState::cycle(self.query.sort, column);
        self.query.page = 1;
        self.selection.clear();
        self.query.sort
    }

    /// Selects `id` if it is on the visible page. Returns whether it is selected.
    pub fn toggle(&mut self, id: CandidateId) -> bool {
        if !self.candidates().iter().any(|c| c.id == id) {
            return false;
        }
        self.selection.toggle(id)
    }

    pub fn select_page(&mut self) {
        let ids: Vec<CandidateId> = self.candidates().iter().map(|c| c.id).collect();
        self.selection.select_all(ids);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Refetches the visible page.
    ///
    /// Selected ids that are no longer on the page are dropped.
    #[instrument(skip(self), fields(rule_id = self.rule_id, page = self.query.page))]
    pub async fn refresh(&mut self) -> Result<&CandidatePage> {
        let rule_id = self.rule_id;
        let page = self.api.list_candidates(rule_id, &self.query).await?;

        let visible: HashSet<CandidateId> = page.items.iter().map(|c| c.id).collect();
        self.selection.retain(|id| visible.contains(&id));

        debug!(items = page.items.len(), total = page.total, "Candidates refreshed");
        Ok(self.page.insert(page))
    }
}
