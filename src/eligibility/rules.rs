//! Ordered rule table

use super::{PolicySnapshot, Rule, Step};
use crate::config::DownloadMode;
use crate::item::CatalogItem;
use crate::types::{OutcomeCode, Quality};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Every rule, in evaluation order
pub static RULES: &[Rule] = &[
    Rule {
        name: "completed",
        check: completed,
    },
    Rule {
        name: "retry_ceiling",
        check: retry_ceiling,
    },
    Rule {
        name: "user_abort",
        check: user_abort,
    },
    Rule {
        name: "episode_number_keyword",
        check: episode_number_keyword,
    },
    Rule {
        name: "episode_title_keyword",
        check: episode_title_keyword,
    },
    Rule {
        name: "quick_content",
        check: quick_content,
    },
    Rule {
        name: "genre_present",
        check: genre_present,
    },
    Rule {
        name: "download_mode",
        check: download_mode,
    },
    Rule {
        name: "quality",
        check: quality,
    },
];

fn completed(item: &CatalogItem, _: &PolicySnapshot, _: DateTime<Utc>) -> Step {
    if item.completed {
        Step::Decide(OutcomeCode::Completed)
    } else {
        Step::Next
    }
}

fn retry_ceiling(item: &CatalogItem, policy: &PolicySnapshot, _: DateTime<Utc>) -> Step {
    if item.retry_count >= policy.max_retry {
        tracing::warn!(content_id = %item.content_id, retries = item.retry_count, "too many retries");
        Step::Decide(OutcomeCode::TooManyRetries)
    } else {
        Step::Next
    }
}

fn user_abort(item: &CatalogItem, policy: &PolicySnapshot, _: DateTime<Utc>) -> Step {
    if item.user_aborted && !policy.retry_user_abort {
        Step::Decide(OutcomeCode::UserStop)
    } else {
        Step::Next
    }
}

fn episode_number_keyword(item: &CatalogItem, policy: &PolicySnapshot, _: DateTime<Utc>) -> Step {
    let hit = !item.episode_number.is_empty()
        && policy
            .episode_number_keywords
            .iter()
            .any(|k| item.episode_number.contains(k.as_str()));
    if hit {
        Step::Decide(OutcomeCode::ExcludedEpisodeNumber)
    } else {
        Step::Next
    }
}

fn episode_title_keyword(item: &CatalogItem, policy: &PolicySnapshot, _: DateTime<Utc>) -> Step {
    let hit = !item.episode_title.is_empty()
        && policy
            .episode_title_keywords
            .iter()
            .any(|k| item.episode_title.contains(k.as_str()));
    if hit {
        Step::Decide(OutcomeCode::ExcludedEpisodeTitle)
    } else {
        Step::Next
    }
}

fn quick_start_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"Quick\sVOD\s(?P<time>\d{2}:\d{2})\s").ok())
        .as_ref()
}

/// Broadcast start for a title-embedded `HH:MM`
///
/// The clock time is read in the broadcast offset on today's date there; when that lies
/// in the future the broadcast started the previous day.
pub(crate) fn broadcast_start(
    clock: &str,
    offset: chrono::FixedOffset,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(clock, "%H:%M").ok()?;
    let local_today = now.with_timezone(&offset).date_naive();
    let start = offset
        .from_local_datetime(&local_today.and_time(time))
        .single()?
        .with_timezone(&Utc);
    if start > now {
        Some(start - Duration::days(1))
    } else {
        Some(start)
    }
}

fn quick_content(item: &CatalogItem, policy: &PolicySnapshot, now: DateTime<Utc>) -> Step {
    if !item.is_quick() {
        return Step::Next;
    }

    let title = item.program_title.replace(' ', "");
    let wanted = policy.quick_download
        || policy
            .quick_programs
            .iter()
            .any(|p| title.contains(p.as_str()));
    if !wanted {
        return Step::Decide(OutcomeCode::QuickPass);
    }

    let Some(playtime) = item.details().and_then(|d| d.playtime) else {
        tracing::warn!(content_id = %item.content_id, "no play time");
        return Step::Incomplete;
    };

    let start = quick_start_pattern()
        .and_then(|pattern| pattern.captures(&item.episode_title))
        .and_then(|caps| caps.name("time"))
        .and_then(|m| broadcast_start(m.as_str(), policy.broadcast_offset, now));
    let Some(start) = start else {
        return Step::Decide(OutcomeCode::NoPermission);
    };

    let elapsed = now.signed_duration_since(start).num_seconds();
    if playtime > elapsed {
        Step::Decide(OutcomeCode::QuickStillAiring)
    } else {
        Step::Next
    }
}

fn genre_present(item: &CatalogItem, _: &PolicySnapshot, _: DateTime<Utc>) -> Step {
    match item.program_genre.as_deref() {
        Some(genre) if !genre.is_empty() => Step::Next,
        _ => {
            tracing::warn!(content_id = %item.content_id, "no program genre");
            Step::Incomplete
        }
    }
}

fn download_mode(item: &CatalogItem, policy: &PolicySnapshot, _: DateTime<Utc>) -> Step {
    let genre = item.program_genre.as_deref().unwrap_or_default();
    let title = item.program_title.replace(' ', "");

    match policy.mode {
        DownloadMode::DenyList => {
            if policy
                .except_channels
                .iter()
                .any(|c| item.channel_name.contains(c.as_str()))
            {
                return Step::Decide(OutcomeCode::ExcludedChannel);
            }
            if policy.except_genres.iter().any(|g| genre.contains(g.as_str())) {
                return Step::Decide(OutcomeCode::ExcludedGenre);
            }
            if policy.except_programs.iter().any(|p| title.contains(p.as_str())) {
                return Step::Decide(OutcomeCode::ExcludedProgram);
            }
            Step::Next
        }
        DownloadMode::AllowList => {
            let episode = item.episode_number.trim().parse::<i64>().unwrap_or(0);
            if policy.first_episode_always && episode == 1 {
                return Step::Decide(OutcomeCode::Eligible);
            }
            let allowed = policy.allow_genres.iter().any(|g| genre.contains(g.as_str()))
                || policy.allow_programs.iter().any(|p| title.contains(p.as_str()));
            if allowed {
                Step::Next
            } else {
                Step::Decide(OutcomeCode::AllowListMiss)
            }
        }
    }
}

fn quality(item: &CatalogItem, policy: &PolicySnapshot, now: DateTime<Utc>) -> Step {
    let Some(current) = item.quality else {
        tracing::warn!(content_id = %item.content_id, "no streaming quality");
        return Step::Incomplete;
    };
    if current == policy.quality {
        return Step::Next;
    }

    match policy.uhd_wait {
        Some(wait) if policy.quality == Quality::P2160 && current == Quality::P1080 => {
            let wait = Duration::from_std(wait).unwrap_or(Duration::MAX);
            let window_open = item
                .created_at
                .checked_add_signed(wait)
                .is_none_or(|deadline| deadline > now);
            if window_open {
                Step::Decide(OutcomeCode::UhdWait)
            } else {
                Step::Next
            }
        }
        _ => {
            tracing::error!(
                content_id = %item.content_id,
                current = %current,
                target = %policy.quality,
                "streaming quality does not match the configured quality"
            );
            Step::Incomplete
        }
    }
}
