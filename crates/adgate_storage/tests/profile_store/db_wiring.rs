#![forbid(unsafe_code)]

use adgate_contracts::policy::{AdSource, GatingPolicy, VipSettings};
use adgate_contracts::profile::{GatingMode, ProfilePatch};
use adgate_contracts::viewer::ViewerId;
use adgate_contracts::UnixTimeMs;
use adgate_storage::{AdProfileRepo, AdProfileStore, StorageError};

fn viewer() -> ViewerId {
    ViewerId::new("dbw_viewer_1").unwrap()
}

fn source(id: &str) -> AdSource {
    AdSource::v1(id.to_string(), format!("https://ads.example/{id}"), true).unwrap()
}

#[test]
fn at_store_db_01_missing_profile_reads_as_none() {
    let s = AdProfileStore::new_in_memory();
    assert_eq!(AdProfileRepo::profile_row(&s, &viewer()).unwrap(), None);
}

#[test]
fn at_store_db_02_mode_change_resets_counter_in_one_write() {
    let mut s = AdProfileStore::new_in_memory();
    s.upsert_profile_patch(
        &viewer(),
        &ProfilePatch::mode_change(GatingMode::BatchUpFront),
        UnixTimeMs(1),
    )
    .unwrap();
    s.increment_ads_watched(&viewer(), UnixTimeMs(2)).unwrap();
    s.increment_ads_watched(&viewer(), UnixTimeMs(3)).unwrap();

    let row = s
        .upsert_profile_patch(
            &viewer(),
            &ProfilePatch::mode_change(GatingMode::TimedInterval),
            UnixTimeMs(4),
        )
        .unwrap();
    assert_eq!(row.mode, GatingMode::TimedInterval);
    assert_eq!(row.ads_watched_count, 0);
}

#[test]
fn at_store_db_03_increment_returns_the_written_count() {
    let mut s = AdProfileStore::new_in_memory();
    assert_eq!(s.increment_ads_watched(&viewer(), UnixTimeMs(1)).unwrap(), 1);
    assert_eq!(s.increment_ads_watched(&viewer(), UnixTimeMs(2)).unwrap(), 2);
    assert_eq!(
        AdProfileRepo::profile_row(&s, &viewer())
            .unwrap()
            .unwrap()
            .ads_watched_count,
        2
    );
}

#[test]
fn at_store_db_04_free_time_grant_keeps_vip_fields() {
    let mut s = AdProfileStore::new_in_memory();
    s.upsert_profile_patch(
        &viewer(),
        &ProfilePatch::vip_activation(UnixTimeMs(9_000)),
        UnixTimeMs(1),
    )
    .unwrap();
    let row = s
        .upsert_profile_patch(
            &viewer(),
            &ProfilePatch::free_time_grant(UnixTimeMs(5_000)),
            UnixTimeMs(2),
        )
        .unwrap();
    assert!(row.is_vip);
    assert_eq!(row.vip_expires_at, Some(UnixTimeMs(9_000)));
    assert_eq!(row.ad_free_until, Some(UnixTimeMs(5_000)));
}

#[test]
fn at_store_db_05_policy_and_vip_settings_rows() {
    let mut s = AdProfileStore::new_in_memory();
    assert_eq!(s.policy_row().unwrap(), None);
    let policy = GatingPolicy::v1(1, 2, 24, None).unwrap();
    s.replace_policy_row(policy.clone()).unwrap();
    assert_eq!(s.policy_row().unwrap(), Some(policy));

    s.replace_vip_settings_row(VipSettings::v1(true, 30).unwrap())
        .unwrap();
    assert_eq!(
        s.vip_settings_row().unwrap().map(|v| v.vip_duration_days),
        Some(30)
    );
}

#[test]
fn at_store_db_06_ad_sources_keep_insertion_order() {
    let mut s = AdProfileStore::new_in_memory();
    s.insert_ad_source_row(source("a")).unwrap();
    s.insert_ad_source_row(source("b")).unwrap();
    s.set_ad_source_active("a", false).unwrap();
    let rows = s.ad_source_rows().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id, "a");
    assert!(!rows[0].is_active);
    assert!(matches!(
        s.insert_ad_source_row(source("b")),
        Err(StorageError::DuplicateKey { .. })
    ));
}
