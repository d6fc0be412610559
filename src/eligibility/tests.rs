use super::*;
use crate::config::PolicyConfig;
use crate::types::{ContentType, Origin};
use chrono::TimeZone;
use proptest::prelude::*;
use serde_json::json;

fn eligible_item() -> CatalogItem {
    let mut item = CatalogItem::new(Origin::Recent, "S01_E0003");
    item.channel_name = "KBS 2TV".to_string();
    item.program_title = "우리 집".to_string();
    item.episode_number = "3".to_string();
    item.episode_title = "세 번째 이야기".to_string();
    item.program_genre = Some("드라마".to_string());
    item.quality = Some(Quality::P1080);
    item
}

fn policy(edit: impl FnOnce(&mut PolicyConfig)) -> PolicySnapshot {
    let mut config = PolicyConfig::default();
    edit(&mut config);
    PolicySnapshot::from_config(&config)
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

#[test]
fn plain_item_is_eligible() {
    let verdict = evaluate(&eligible_item(), &PolicySnapshot::default(), now());
    assert_eq!(verdict.code, OutcomeCode::Eligible);
    assert_eq!(verdict.rule, "eligible");
}

#[test]
fn completed_wins_over_everything() {
    let mut item = eligible_item();
    item.completed = true;
    item.retry_count = 100;
    item.user_aborted = true;
    assert_eq!(
        evaluate(&item, &PolicySnapshot::default(), now()).code,
        OutcomeCode::Completed
    );
}

#[test]
fn retry_ceiling_yields_too_many_retries() {
    let mut item = eligible_item();
    item.retry_count = 20;
    assert_eq!(
        evaluate(&item, &PolicySnapshot::default(), now()).code,
        OutcomeCode::TooManyRetries
    );
}

#[test]
fn user_abort_respects_retry_policy() {
    let mut item = eligible_item();
    item.user_aborted = true;

    assert_eq!(
        evaluate(&item, &PolicySnapshot::default(), now()).code,
        OutcomeCode::UserStop
    );

    let retrying = policy(|p| p.retry_user_abort = true);
    let verdict = evaluate(&item, &retrying, now());
    assert_eq!(verdict.code, OutcomeCode::Eligible);
    assert!(verdict.clears_user_abort);
    assert!(item.user_aborted, "evaluate never mutates");

    assert_eq!(apply(&mut item, &retrying, now()), OutcomeCode::Eligible);
    assert!(!item.user_aborted, "apply clears the flag when retry is allowed");
}

#[test]
fn episode_keywords_exclude() {
    let mut item = eligible_item();
    item.episode_number = "스페셜".to_string();
    assert_eq!(
        evaluate(&item, &PolicySnapshot::default(), now()).code,
        OutcomeCode::ExcludedEpisodeNumber
    );

    let mut item = eligible_item();
    item.episode_title = "다음 주 예고".to_string();
    assert_eq!(
        evaluate(&item, &PolicySnapshot::default(), now()).code,
        OutcomeCode::ExcludedEpisodeTitle
    );
}

#[test]
fn deny_list_checks_channel_before_genre() {
    let mut item = eligible_item();
    item.program_genre = Some("예능".to_string());
    let snapshot = policy(|p| {
        p.except_channels = vec!["KBS".to_string()];
        p.except_genres = vec!["예능".to_string()];
        p.except_programs = vec!["우리집".to_string()];
    });
    assert_eq!(evaluate(&item, &snapshot, now()).code, OutcomeCode::ExcludedChannel);

    let snapshot = policy(|p| {
        p.except_genres = vec!["예능".to_string()];
        p.except_programs = vec!["우리집".to_string()];
    });
    assert_eq!(evaluate(&item, &snapshot, now()).code, OutcomeCode::ExcludedGenre);

    let snapshot = policy(|p| p.except_programs = vec!["우리 집".to_string()]);
    assert_eq!(
        evaluate(&item, &snapshot, now()).code,
        OutcomeCode::ExcludedProgram,
        "program titles are compared with spaces removed"
    );
}

#[test]
fn allow_list_mode() {
    let snapshot = policy(|p| {
        p.mode = DownloadMode::AllowList;
        p.allow_programs = vec!["우리집".to_string()];
    });
    assert_eq!(
        evaluate(&eligible_item(), &snapshot, now()).code,
        OutcomeCode::Eligible
    );

    let snapshot = policy(|p| p.mode = DownloadMode::AllowList);
    assert_eq!(
        evaluate(&eligible_item(), &snapshot, now()).code,
        OutcomeCode::AllowListMiss
    );

    let mut first = eligible_item();
    first.episode_number = "1".to_string();
    first.quality = None;
    let verdict = evaluate(&first, &snapshot, now());
    assert_eq!(verdict.code, OutcomeCode::Eligible, "episode 1 shortcut");
    assert_eq!(verdict.rule, "download_mode");

    let mut unparsable = eligible_item();
    unparsable.episode_number = "1부".to_string();
    assert_eq!(
        evaluate(&unparsable, &snapshot, now()).code,
        OutcomeCode::AllowListMiss,
        "unparsable episode numbers count as 0"
    );
}

#[test]
fn missing_data_is_incomplete_and_counts_a_retry() {
    let mut item = eligible_item();
    item.program_genre = None;
    let verdict = evaluate(&item, &PolicySnapshot::default(), now());
    assert_eq!(verdict.code, OutcomeCode::RefreshFailed);
    assert!(verdict.data_incomplete);

    apply(&mut item, &PolicySnapshot::default(), now());
    assert_eq!(item.retry_count, 1);
    assert_eq!(item.outcome_code, OutcomeCode::RefreshFailed);

    let mut item = eligible_item();
    item.quality = None;
    assert_eq!(
        evaluate(&item, &PolicySnapshot::default(), now()).code,
        OutcomeCode::RefreshFailed
    );
}

#[test]
fn repeated_incomplete_verdicts_reach_the_ceiling() {
    let snapshot = policy(|p| p.max_retry = 3);
    let mut item = eligible_item();
    item.quality = Some(Quality::P720);

    let mut last_retry = 0;
    for _ in 0..3 {
        assert_eq!(apply(&mut item, &snapshot, now()), OutcomeCode::RefreshFailed);
        assert!(item.retry_count > last_retry, "retry_count is monotonic");
        last_retry = item.retry_count;
    }
    assert_eq!(apply(&mut item, &snapshot, now()), OutcomeCode::TooManyRetries);
    assert_eq!(item.retry_count, 3, "the ceiling verdict does not count again");
}

#[test]
fn uhd_wait_window() {
    // 2160p target, 1080p available, created 5 minutes ago, 100 minute window
    let snapshot = policy(|p| {
        p.quality = Quality::P2160;
        p.uhd_wait = true;
        p.uhd_wait_minutes = 100;
    });
    let mut item = eligible_item();
    item.created_at = now() - chrono::Duration::minutes(5);
    assert_eq!(evaluate(&item, &snapshot, now()).code, OutcomeCode::UhdWait);

    item.created_at = now() - chrono::Duration::minutes(101);
    assert_eq!(
        evaluate(&item, &snapshot, now()).code,
        OutcomeCode::Eligible,
        "an expired window accepts 1080p"
    );

    let no_wait = policy(|p| p.quality = Quality::P2160);
    assert_eq!(
        evaluate(&item, &no_wait, now()).code,
        OutcomeCode::RefreshFailed
    );
}

fn quick_item(episode_title: &str, playtime: i64) -> CatalogItem {
    let mut item = eligible_item();
    item.content_type = ContentType::Onairvod;
    item.episode_title = episode_title.to_string();
    item.contents_json = Some(json!({ "playtime": playtime }));
    item
}

#[test]
fn quick_content_needs_enabling() {
    let item = quick_item("Quick VOD 10:00 방송", 600);
    assert_eq!(
        evaluate(&item, &PolicySnapshot::default(), now()).code,
        OutcomeCode::QuickPass
    );

    let per_program = policy(|p| p.quick_programs = vec!["우리 집".to_string()]);
    assert_ne!(
        evaluate(&item, &per_program, now()).code,
        OutcomeCode::QuickPass
    );
}

#[test]
fn quick_content_still_airing() {
    // now is 21:00 at +09:00; the broadcast started at 20:30 and runs an hour
    let snapshot = policy(|p| p.quick_download = true);
    let item = quick_item("Quick VOD 20:30 방송", 3600);
    assert_eq!(
        evaluate(&item, &snapshot, now()).code,
        OutcomeCode::QuickStillAiring
    );

    let item = quick_item("Quick VOD 19:30 방송", 3600);
    assert_eq!(evaluate(&item, &snapshot, now()).code, OutcomeCode::Eligible);
}

#[test]
fn quick_content_start_after_now_rolls_back_a_day() {
    // 23:00 has not happened yet at 21:00 local, so it was yesterday's 23:00
    let snapshot = policy(|p| p.quick_download = true);
    let item = quick_item("Quick VOD 23:00 방송", 3600);
    assert_eq!(evaluate(&item, &snapshot, now()).code, OutcomeCode::Eligible);

    let offset = FixedOffset::east_opt(9 * 3600).unwrap();
    let start = rules::broadcast_start("23:00", offset, now()).unwrap();
    assert_eq!(start, Utc.with_ymd_and_hms(2024, 4, 30, 14, 0, 0).unwrap());
}

#[test]
fn quick_content_without_timestamp_or_playtime() {
    let snapshot = policy(|p| p.quick_download = true);
    let item = quick_item("하이라이트", 3600);
    assert_eq!(evaluate(&item, &snapshot, now()).code, OutcomeCode::NoPermission);

    let mut item = quick_item("Quick VOD 20:30 방송", 0);
    item.contents_json = Some(json!({}));
    assert_eq!(
        evaluate(&item, &snapshot, now()).code,
        OutcomeCode::RefreshFailed
    );
}

#[test]
fn intake_screening_ignores_missing_details() {
    let mut item = CatalogItem::new(Origin::Recent, "C1");
    item.episode_number = "3".to_string();
    assert_eq!(
        screen_intake(&mut item, &PolicySnapshot::default()),
        OutcomeCode::Eligible,
        "genre and quality are not known at intake"
    );
    assert_eq!(item.retry_count, 0);

    item.episode_title = "티저 예고".to_string();
    assert_eq!(
        screen_intake(&mut item, &PolicySnapshot::default()),
        OutcomeCode::ExcludedEpisodeTitle
    );
}

fn arb_quality() -> impl Strategy<Value = Option<Quality>> {
    prop_oneof![
        Just(None),
        Just(Some(Quality::P720)),
        Just(Some(Quality::P1080)),
        Just(Some(Quality::P2160)),
    ]
}

prop_compose! {
    fn arb_item()(
        completed in any::<bool>(),
        user_aborted in any::<bool>(),
        retry_count in 0u32..30,
        quick in any::<bool>(),
        episode in prop_oneof![Just("1"), Just("3"), Just("스페셜"), Just("")],
        title in prop_oneof![Just("Quick VOD 20:30 본방"), Just("예고"), Just("본편")],
        genre in prop_oneof![Just(None), Just(Some("드라마")), Just(Some("예능"))],
        quality in arb_quality(),
        age_minutes in 0i64..300,
    ) -> CatalogItem {
        let mut item = eligible_item();
        item.completed = completed;
        item.user_aborted = user_aborted;
        item.retry_count = retry_count;
        if quick {
            item.content_type = ContentType::Onairvod;
            item.contents_json = Some(json!({"playtime": 1800}));
        }
        item.episode_number = episode.to_string();
        item.episode_title = title.to_string();
        item.program_genre = genre.map(str::to_string);
        item.quality = quality;
        item.created_at = now() - chrono::Duration::minutes(age_minutes);
        item
    }
}

prop_compose! {
    fn arb_policy()(
        allow_list in any::<bool>(),
        quick_download in any::<bool>(),
        uhd_wait in any::<bool>(),
        uhd_target in any::<bool>(),
        retry_user_abort in any::<bool>(),
        deny_genre in any::<bool>(),
    ) -> PolicySnapshot {
        policy(|p| {
            if allow_list {
                p.mode = DownloadMode::AllowList;
                p.allow_genres = vec!["드라마".to_string()];
            }
            if deny_genre {
                p.except_genres = vec!["예능".to_string()];
            }
            p.quick_download = quick_download;
            p.uhd_wait = uhd_wait;
            if uhd_target {
                p.quality = Quality::P2160;
            }
            p.retry_user_abort = retry_user_abort;
        })
    }
}

proptest! {
    #[test]
    fn evaluation_is_idempotent(item in arb_item(), snapshot in arb_policy()) {
        let first = evaluate(&item, &snapshot, now());
        let second = evaluate(&item, &snapshot, now());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn ceiling_always_yields_too_many_retries(mut item in arb_item(), snapshot in arb_policy()) {
        item.completed = false;
        item.retry_count = snapshot.max_retry;
        prop_assert_eq!(evaluate(&item, &snapshot, now()).code, OutcomeCode::TooManyRetries);
    }

    #[test]
    fn apply_never_decreases_retry_count(mut item in arb_item(), snapshot in arb_policy()) {
        let before = item.retry_count;
        apply(&mut item, &snapshot, now());
        prop_assert!(item.retry_count >= before);
        prop_assert!(item.retry_count <= before + 1);
    }
}
