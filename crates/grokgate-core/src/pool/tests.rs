use tempfile::TempDir;

use super::CredentialPool;
use crate::models::{quota_rule, Tier};

const TOKEN: &str = "sso-rw=rw-value;sso=session-a";
const OTHER: &str = "sso-rw=rw-other;sso=session-b";

fn pool_in(dir: &TempDir) -> CredentialPool {
    CredentialPool::new(dir.path().join("token_status.json"))
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[tokio::test]
async fn enroll_is_idempotent_per_family() {
    let dir = TempDir::new().unwrap();
    let pool = pool_in(&dir);
    pool.enroll(TOKEN, Tier::Normal, false).unwrap();
    pool.enroll(TOKEN, Tier::Normal, false).unwrap();
    assert_eq!(pool.token_count("grok-3"), 1);
    assert_eq!(pool.token_count("grok-3-deepersearch"), 1);
}

#[tokio::test]
async fn enroll_rejects_malformed_tokens() {
    let dir = TempDir::new().unwrap();
    let pool = pool_in(&dir);
    assert!(pool.enroll("cookie=nope", Tier::Normal, false).is_err());
    assert!(pool.enroll("sso=", Tier::Normal, false).is_err());
    assert_eq!(pool.token_count("grok-3"), 0);
}

#[tokio::test]
async fn normal_tier_cannot_serve_grok4() {
    let dir = TempDir::new().unwrap();
    let pool = pool_in(&dir);
    pool.enroll(TOKEN, Tier::Normal, false).unwrap();
    assert_eq!(pool.next("grok-4", false).await, None);

    pool.enroll(OTHER, Tier::Super, false).unwrap();
    assert_eq!(pool.next("grok-4", false).await, Some(OTHER.to_string()));
}

#[tokio::test]
async fn unknown_model_yields_no_credential() {
    let dir = TempDir::new().unwrap();
    let pool = pool_in(&dir);
    pool.enroll(TOKEN, Tier::Normal, false).unwrap();
    assert_eq!(pool.next("gpt-4", false).await, None);
}

#[tokio::test]
async fn quota_is_exhausted_after_limit_draws() {
    // grok-3-deepersearch has the smallest normal budget (3 requests).
    let dir = TempDir::new().unwrap();
    let pool = pool_in(&dir);
    pool.enroll(TOKEN, Tier::Normal, false).unwrap();

    for _ in 0..3 {
        assert_eq!(pool.next("grok-3-deepersearch", false).await, Some(TOKEN.to_string()));
    }
    assert_eq!(pool.next("grok-3-deepersearch", false).await, None);
}

#[tokio::test]
async fn reaching_the_limit_invalidates_status_atomically() {
    let dir = TempDir::new().unwrap();
    let pool = pool_in(&dir);
    pool.enroll(TOKEN, Tier::Normal, false).unwrap();

    for _ in 0..3 {
        pool.next("grok-3-deepersearch", false).await;
    }
    let snapshot = pool.status_snapshot();
    let status = &snapshot["session-a"]["grok-3-deepersearch"];
    assert!(!status.is_valid);
    assert!(status.invalidated_at_ms.is_some());
    assert_eq!(status.total_request_count, 3);
    // Other families are untouched.
    assert!(snapshot["session-a"]["grok-3"].is_valid);
}

#[tokio::test]
async fn peek_does_not_charge_the_quota() {
    let dir = TempDir::new().unwrap();
    let pool = pool_in(&dir);
    pool.enroll(TOKEN, Tier::Normal, false).unwrap();

    for _ in 0..10 {
        assert_eq!(pool.next("grok-3-deepersearch", true).await, Some(TOKEN.to_string()));
    }
    let capacity = pool.capacity();
    assert_eq!(capacity["grok-3-deepersearch"], 3);
}

#[tokio::test]
async fn fifo_serves_oldest_enrolled_first() {
    let dir = TempDir::new().unwrap();
    let pool = pool_in(&dir);
    pool.enroll(TOKEN, Tier::Normal, false).unwrap();
    pool.enroll(OTHER, Tier::Normal, false).unwrap();

    // The head keeps serving until it is exhausted.
    for _ in 0..3 {
        assert_eq!(pool.next("grok-3-deepersearch", false).await, Some(TOKEN.to_string()));
    }
    assert_eq!(pool.next("grok-3-deepersearch", false).await, Some(OTHER.to_string()));
}

#[tokio::test]
async fn retire_then_recover_after_window() {
    let dir = TempDir::new().unwrap();
    let pool = pool_in(&dir);
    pool.enroll(TOKEN, Tier::Normal, false).unwrap();

    pool.retire("grok-3", TOKEN, "upstream status 403").await;
    assert_eq!(pool.next("grok-3", false).await, None);

    let window = quota_rule("grok-3", Tier::Normal).unwrap().expiration_ms;

    // Too early: stays retired.
    pool.recover_at(now_ms() + window - 60_000).await;
    assert_eq!(pool.next("grok-3", false).await, None);

    // Past the window: re-admitted with fresh counters.
    pool.recover_at(now_ms() + window + 60_000).await;
    assert_eq!(pool.next("grok-3", false).await, Some(TOKEN.to_string()));
    let snapshot = pool.status_snapshot();
    assert!(snapshot["session-a"]["grok-3"].is_valid);
    assert_eq!(snapshot["session-a"]["grok-3"].total_request_count, 1);
}

#[tokio::test]
async fn quota_exhaustion_recovers_via_the_retired_set() {
    let dir = TempDir::new().unwrap();
    let pool = pool_in(&dir);
    pool.enroll(TOKEN, Tier::Normal, false).unwrap();

    for _ in 0..3 {
        pool.next("grok-3-deepersearch", false).await;
    }
    // This draw pops the exhausted head into the retired set.
    assert_eq!(pool.next("grok-3-deepersearch", false).await, None);

    let window = quota_rule("grok-3-deepersearch", Tier::Normal).unwrap().expiration_ms;
    pool.recover_at(now_ms() + window + 60_000).await;
    assert_eq!(pool.next("grok-3-deepersearch", false).await, Some(TOKEN.to_string()));
}

#[tokio::test]
async fn lapsed_usage_window_soft_resets_in_place() {
    let dir = TempDir::new().unwrap();
    let pool = pool_in(&dir);
    pool.enroll(TOKEN, Tier::Normal, false).unwrap();

    // Exhaust the budget but leave the entry queued.
    for _ in 0..3 {
        pool.next("grok-3-deepersearch", false).await;
    }

    let window = quota_rule("grok-3-deepersearch", Tier::Normal).unwrap().expiration_ms;
    pool.recover_at(now_ms() + window + 60_000).await;

    assert_eq!(pool.token_count("grok-3-deepersearch"), 1);
    assert_eq!(pool.next("grok-3-deepersearch", false).await, Some(TOKEN.to_string()));
}

#[tokio::test]
async fn removed_token_never_returns_even_after_recovery() {
    let dir = TempDir::new().unwrap();
    let pool = pool_in(&dir);
    pool.enroll(TOKEN, Tier::Normal, false).unwrap();

    pool.retire("grok-3", TOKEN, "upstream status 401").await;
    pool.remove(TOKEN).await.unwrap();

    let window = quota_rule("grok-3", Tier::Normal).unwrap().expiration_ms;
    pool.recover_at(now_ms() + window + 60_000).await;

    assert_eq!(pool.next("grok-3", false).await, None);
    assert!(pool.status_snapshot().get("session-a").is_none());
    assert!(pool.all_tokens().is_empty());
}

#[tokio::test]
async fn retire_after_remove_does_not_resurrect_the_token() {
    let dir = TempDir::new().unwrap();
    let pool = pool_in(&dir);
    pool.enroll(TOKEN, Tier::Normal, false).unwrap();
    assert_eq!(pool.next("grok-3", false).await, Some(TOKEN.to_string()));

    // An operator removal can land while a dispatch attempt is still in
    // flight; the attempt's failure then retires a token that is gone.
    pool.remove(TOKEN).await.unwrap();
    pool.retire("grok-3", TOKEN, "upstream status 403").await;

    let window = quota_rule("grok-3", Tier::Normal).unwrap().expiration_ms;
    pool.recover_at(now_ms() + window + 60_000).await;

    assert_eq!(pool.next("grok-3", false).await, None);
    assert!(pool.status_snapshot().get("session-a").is_none());
    assert!(pool.all_tokens().is_empty());
}

#[tokio::test]
async fn remove_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let pool = pool_in(&dir);
    pool.enroll(TOKEN, Tier::Normal, false).unwrap();
    pool.remove(TOKEN).await.unwrap();
    pool.remove(TOKEN).await.unwrap();
}

#[tokio::test]
async fn replace_discards_the_whole_pool() {
    let dir = TempDir::new().unwrap();
    let pool = pool_in(&dir);
    pool.enroll(TOKEN, Tier::Normal, false).unwrap();

    pool.replace(OTHER, Tier::Super).await.unwrap();
    assert_eq!(pool.next("grok-3", false).await, Some(OTHER.to_string()));
    assert_eq!(pool.next("grok-4", false).await, Some(OTHER.to_string()));
    assert!(pool.status_snapshot().get("session-a").is_none());
}

#[tokio::test]
async fn status_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let pool = pool_in(&dir);
        pool.enroll(TOKEN, Tier::Normal, false).unwrap();
        for _ in 0..3 {
            pool.next("grok-3-deepersearch", false).await;
        }
    }
    let reopened = pool_in(&dir);
    let snapshot = reopened.status_snapshot();
    assert!(!snapshot["session-a"]["grok-3-deepersearch"].is_valid);
    assert_eq!(snapshot["session-a"]["grok-3-deepersearch"].total_request_count, 3);

    // Re-enrolling after restart keeps the invalid record, so the family
    // stays unusable until recovery.
    reopened.enroll(TOKEN, Tier::Normal, true).unwrap();
    assert_eq!(reopened.next("grok-3-deepersearch", false).await, None);
    assert_eq!(reopened.next("grok-3", false).await, Some(TOKEN.to_string()));
}
