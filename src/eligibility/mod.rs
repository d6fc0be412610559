//! Eligibility filter
//!
//! Decides, for one item, whether it may be downloaded now and otherwise why not. The
//! decision is a single [`OutcomeCode`] produced by walking an ordered table of named
//! rules; the first rule that reaches a decision wins.
//!
//! [`evaluate`] is pure. [`apply`] evaluates and writes the result back onto the item,
//! including the retry bookkeeping for "data incomplete" verdicts. [`screen_intake`] runs
//! only the rules that need no content details, so freshly ingested items that are
//! already excluded never cost a catalog round-trip.

use crate::config::{DownloadMode, PolicyConfig};
use crate::item::CatalogItem;
use crate::types::{OutcomeCode, Quality};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::time::Duration;

mod rules;

pub use rules::RULES;

/// Number of leading rules that need nothing beyond the catalog listing entry
const INTAKE_RULES: usize = 5;

/// Immutable view of the eligibility options for one run
///
/// Program-title lists are stored with spaces removed, matching how titles are compared.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    /// Target quality
    pub quality: Quality,
    /// Allow-list or deny-list mode
    pub mode: DownloadMode,
    /// Deny-listed channels
    pub except_channels: Vec<String>,
    /// Deny-listed programs (spaces removed)
    pub except_programs: Vec<String>,
    /// Deny-listed genres
    pub except_genres: Vec<String>,
    /// Allow-listed programs (spaces removed)
    pub allow_programs: Vec<String>,
    /// Allow-listed genres
    pub allow_genres: Vec<String>,
    /// Allow-list mode takes episode 1 unconditionally
    pub first_episode_always: bool,
    /// Episode-number exclusion keywords
    pub episode_number_keywords: Vec<String>,
    /// Episode-title exclusion keywords
    pub episode_title_keywords: Vec<String>,
    /// Quick content enabled for every program
    pub quick_download: bool,
    /// Programs whose quick content is taken (spaces removed)
    pub quick_programs: Vec<String>,
    /// UHD wait window, when enabled
    pub uhd_wait: Option<Duration>,
    /// User-stopped items are retried
    pub retry_user_abort: bool,
    /// Retry ceiling
    pub max_retry: u32,
    /// Offset of clock times embedded in quick-content titles
    pub broadcast_offset: FixedOffset,
}

fn strip_spaces(list: &[String]) -> Vec<String> {
    list.iter()
        .map(|s| s.replace(' ', ""))
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(list: &[String]) -> Vec<String> {
    list.iter().filter(|s| !s.is_empty()).cloned().collect()
}

impl PolicySnapshot {
    /// Capture the current policy configuration
    pub fn from_config(config: &PolicyConfig) -> Self {
        let offset_secs = config.broadcast_utc_offset_minutes.saturating_mul(60);
        Self {
            quality: config.quality,
            mode: config.mode,
            except_channels: non_empty(&config.except_channels),
            except_programs: strip_spaces(&config.except_programs),
            except_genres: non_empty(&config.except_genres),
            allow_programs: strip_spaces(&config.allow_programs),
            allow_genres: non_empty(&config.allow_genres),
            first_episode_always: config.first_episode_always,
            episode_number_keywords: non_empty(&config.episode_number_keywords),
            episode_title_keywords: non_empty(&config.episode_title_keywords),
            quick_download: config.quick_download,
            quick_programs: strip_spaces(&config.quick_programs),
            uhd_wait: config
                .uhd_wait
                .then(|| Duration::from_secs(u64::from(config.uhd_wait_minutes) * 60)),
            retry_user_abort: config.retry_user_abort,
            max_retry: config.max_retry,
            broadcast_offset: FixedOffset::east_opt(offset_secs).unwrap_or(Utc.fix()),
        }
    }
}

impl Default for PolicySnapshot {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default())
    }
}

/// Result of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Decided code
    pub code: OutcomeCode,
    /// Name of the rule that decided (`eligible` when none did)
    pub rule: &'static str,
    /// The item's data was incomplete; applying the verdict counts a retry
    pub data_incomplete: bool,
    /// The user-abort flag is to be cleared because the policy retries stopped items
    pub clears_user_abort: bool,
}

/// What a single rule concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// No decision, try the next rule
    Next,
    /// Decision reached
    Decide(OutcomeCode),
    /// Required data is missing (code 33)
    Incomplete,
}

/// A named eligibility rule
pub struct Rule {
    /// Stable rule name
    pub name: &'static str,
    /// The check itself
    pub check: fn(&CatalogItem, &PolicySnapshot, DateTime<Utc>) -> Step,
}

fn run_rules(
    rules: &[Rule],
    item: &CatalogItem,
    policy: &PolicySnapshot,
    now: DateTime<Utc>,
) -> Verdict {
    let clears_user_abort = item.user_aborted && policy.retry_user_abort;

    for rule in rules {
        match (rule.check)(item, policy, now) {
            Step::Next => continue,
            Step::Decide(code) => {
                return Verdict {
                    code,
                    rule: rule.name,
                    data_incomplete: false,
                    clears_user_abort: clears_user_abort && code != OutcomeCode::UserStop,
                };
            }
            Step::Incomplete => {
                return Verdict {
                    code: OutcomeCode::RefreshFailed,
                    rule: rule.name,
                    data_incomplete: true,
                    clears_user_abort,
                };
            }
        }
    }

    Verdict {
        code: OutcomeCode::Eligible,
        rule: "eligible",
        data_incomplete: false,
        clears_user_abort,
    }
}

/// Decide the outcome code for an item without touching it
pub fn evaluate(item: &CatalogItem, policy: &PolicySnapshot, now: DateTime<Utc>) -> Verdict {
    run_rules(RULES, item, policy, now)
}

/// Evaluate and record the verdict on the item
///
/// Sets the outcome code, clears the user-abort flag when the policy retries stopped
/// items, and counts a retry when the verdict was "data incomplete".
pub fn apply(item: &mut CatalogItem, policy: &PolicySnapshot, now: DateTime<Utc>) -> OutcomeCode {
    let verdict = evaluate(item, policy, now);
    record(item, &verdict);

    tracing::debug!(
        item_id = %item.id,
        content_id = %item.content_id,
        rule = verdict.rule,
        outcome = %verdict.code,
        "eligibility decided"
    );
    verdict.code
}

/// Screen a freshly ingested item with the rules that need no content details
///
/// Returns `Eligible` when none of them excludes the item; the full chain runs after the
/// refresher has fetched details and credentials.
pub fn screen_intake(item: &mut CatalogItem, policy: &PolicySnapshot) -> OutcomeCode {
    let verdict = run_rules(&RULES[..INTAKE_RULES], item, policy, Utc::now());
    record(item, &verdict);
    verdict.code
}

fn record(item: &mut CatalogItem, verdict: &Verdict) {
    if verdict.clears_user_abort {
        item.user_aborted = false;
    }
    if verdict.data_incomplete {
        item.retry_count = item.retry_count.saturating_add(1);
    }
    item.outcome_code = verdict.code;
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
