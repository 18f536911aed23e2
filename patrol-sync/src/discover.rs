//! Candidate discovery and filtering.
//!
//! Two acquisition modes compose: direct listing of exactly-named
//! repositories, and the broader "involving me" search filtered
//! client-side by repository patterns and deduplicated against the
//! direct results by identity. Candidates without a resolvable head
//! revision cannot be deduplicated safely and are dropped with a warning.

use std::collections::HashSet;

use patrol_core::settings::Settings;
use patrol_core::types::{Candidate, ItemKey};
use patrol_git::Host;

use crate::error::SyncError;

/// Page size for direct per-repository listings.
const LIST_PAGE_LIMIT: usize = 50;

/// What the author predicate decides for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorDecision {
    /// Review the item.
    Process,
    /// Do not review, but advance the ledger to the current head so the
    /// item is not rediscovered as "new" every cycle.
    AdvanceOnly,
}

/// Pure author predicate.
///
/// Precedence: with `only_own_items`, only self-authored items are
/// processed; otherwise self-authored items are processed only when
/// `include_own_items` is set.
pub fn author_decision(settings: &Settings, author: &str) -> AuthorDecision {
    let is_self = !settings.self_login.is_empty() && author == settings.self_login;
    if settings.only_own_items {
        if is_self {
            AuthorDecision::Process
        } else {
            AuthorDecision::AdvanceOnly
        }
    } else if is_self && !settings.include_own_items {
        AuthorDecision::AdvanceOnly
    } else {
        AuthorDecision::Process
    }
}

/// Discover the de-duplicated candidate list for one cycle.
///
/// Failures are isolated per source: one repository's listing error is
/// logged and skipped, never aborting the rest of discovery.
pub async fn discover(host: &dyn Host, settings: &Settings) -> Result<Vec<Candidate>, SyncError> {
    let mut seen: HashSet<ItemKey> = HashSet::new();
    let mut candidates = Vec::new();

    for repo in settings.exact_repos() {
        match host.list_open(&repo, LIST_PAGE_LIMIT).await {
            Ok(listed) => {
                for candidate in listed {
                    push_candidate(&mut seen, &mut candidates, candidate);
                }
            }
            Err(err) => {
                tracing::warn!(repo = %repo, error = %err, "listing repository failed; skipping");
            }
        }
    }

    let patterns = settings.compiled_patterns();
    if !patterns.is_empty() && !settings.self_login.is_empty() {
        let hits = match host.search_involving(&settings.self_login).await {
            Ok(hits) => hits,
            Err(err) => {
                tracing::warn!(error = %err, "involving-me search failed; skipping");
                Vec::new()
            }
        };
        for hit in hits {
            if seen.contains(&hit.key) {
                continue;
            }
            if !patterns.iter().any(|p| p.matches(&hit.key.repo)) {
                continue;
            }
            // Search results carry no head revision; resolve via view.
            match host.view(&hit.key).await {
                Ok(view) if view.open => {
                    push_candidate(&mut seen, &mut candidates, view.candidate);
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(item = %hit.key, error = %err, "resolving search hit failed");
                }
            }
        }
    }

    Ok(candidates)
}

fn push_candidate(seen: &mut HashSet<ItemKey>, out: &mut Vec<Candidate>, candidate: Candidate) {
    if candidate.head_sha.is_empty() {
        tracing::warn!(item = %candidate.key, "dropping candidate without head revision");
        return;
    }
    if seen.insert(candidate.key.clone()) {
        out.push(candidate);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
