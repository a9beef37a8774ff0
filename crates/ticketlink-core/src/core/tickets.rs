//! Ticket lookup: which commits, in which visible repositories, mention a ticket.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::access::{AccessScope, Principal};
use crate::index::{IndexDb, Mirror, Page, Repository};
use crate::scm::CommitDetail;

use super::{CoreContext, CoreResult};

/// Commits of one repository that reference the ticket.
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryCommits {
    pub repository: Repository,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror: Option<Mirror>,
    pub commits: Vec<CommitDetail>,
}

/// Result of a ticket lookup.
#[derive(Debug, Clone, Serialize)]
pub struct TicketAggregate {
    pub ticket_id: String,
    /// Links visible to the caller across all pages.
    pub total_commits: usize,
    /// Groups of the requested page, ordered by repository id.
    pub repositories: Vec<RepositoryCommits>,
}

impl TicketAggregate {
    fn empty(ticket: &str, total_commits: usize) -> Self {
        Self {
            ticket_id: ticket.to_string(),
            total_commits,
            repositories: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}

/// Service for ticket lookups.
pub struct TicketService<'a> {
    ctx: &'a CoreContext,
    db: &'a IndexDb,
}

impl<'a> TicketService<'a> {
    pub(crate) const fn new(ctx: &'a CoreContext, db: &'a IndexDb) -> Self {
        Self { ctx, db }
    }

    /// Find the commits referencing `ticket` that `principal` may see.
    ///
    /// Only the initial count and page query can fail. A repository whose
    /// record or commits cannot be loaded is logged and left out.
    pub fn find_by_ticket(
        &self,
        ticket: &str,
        principal: &Principal,
        page: Page,
    ) -> CoreResult<TicketAggregate> {
        let scope = AccessScope::for_principal(principal);

        let total = self.db.count_links_for_ticket(ticket, &scope)?;
        if total == 0 {
            return Ok(TicketAggregate::empty(ticket, 0));
        }

        let links = self.db.find_links_for_ticket(ticket, &scope, page)?;
        let mut groups: BTreeMap<i64, Vec<String>> = BTreeMap::new();
        for link in links {
            groups.entry(link.repo_id).or_default().push(link.sha);
        }

        let mut aggregate = TicketAggregate::empty(ticket, total);
        for (repo_id, shas) in groups {
            match self.hydrate(repo_id, &shas) {
                Ok(entry) => aggregate.repositories.push(entry),
                Err(err) => {
                    warn!(ticket, repo_id, error = %err, "skipping repository in ticket lookup");
                }
            }
        }

        debug!(
            ticket,
            total,
            repositories = aggregate.repositories.len(),
            "ticket lookup"
        );
        Ok(aggregate)
    }

    fn hydrate(&self, repo_id: i64, shas: &[String]) -> Result<RepositoryCommits> {
        let repository = self
            .db
            .get_repository(repo_id)?
            .ok_or_else(|| anyhow!("repository {repo_id} no longer exists"))?;

        let mirror = if repository.is_mirror {
            self.db.get_mirror(repo_id)?
        } else {
            None
        };

        let commits = self
            .ctx
            .history()
            .open(&repository)?
            .commits_by_ids(shas)?;

        Ok(RepositoryCommits {
            repository,
            mirror,
            commits,
        })
    }
}
