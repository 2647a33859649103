use crate::{
    db,
    error::AppError,
    models::{Link, TestStatus, Variant},
};
use sqlx::SqlitePool;

// ── Winner heuristic ───────────────────────────────────────────────────────

/// Minimum total clicks before a winner may be declared.
pub const WINNER_MIN_SAMPLE: i64 = 10;

/// Relative lead one variant's click rate needs over the other to win.
pub const WINNER_LEAD_FACTOR: f64 = 1.2;

/// Total clicks at which test progress reads 100%.
pub const PROGRESS_TARGET_CLICKS: i64 = 50;

/// Decide whether one title variant has a notable lead.
///
/// This is a 20%-relative-margin heuristic, not a significance test: below
/// `WINNER_MIN_SAMPLE` total clicks no winner exists, and near-equal rates
/// stay undecided indefinitely.
pub fn calculate_winner(clicks_a: i64, clicks_b: i64) -> Option<Variant> {
    let total = clicks_a + clicks_b;
    if total < WINNER_MIN_SAMPLE {
        return None;
    }

    let rate_a = clicks_a as f64 / total as f64;
    let rate_b = clicks_b as f64 / total as f64;

    if rate_a > rate_b * WINNER_LEAD_FACTOR {
        Some(Variant::A)
    } else if rate_b > rate_a * WINNER_LEAD_FACTOR {
        Some(Variant::B)
    } else {
        None
    }
}

/// Percentage of the fixed 50-click target collected so far, capped at 100.
pub fn test_progress(clicks_a: i64, clicks_b: i64) -> i64 {
    ((clicks_a + clicks_b) * 100 / PROGRESS_TARGET_CLICKS).min(100)
}

// ── State transitions ──────────────────────────────────────────────────────

/// Start a title test on a link: variant A is the current title, variant B
/// the challenger text.
///
/// Preconditions, checked in order with no partial mutation on failure:
/// at most `cap - 1` tests may already be running anywhere (the free tier
/// sets `cap` to 1), and the link must exist.
///
/// The count-then-write window is unguarded: two near-simultaneous starts
/// can both pass the cap check. Accepted for an advisory limit.
pub async fn start_test(
    pool: &SqlitePool,
    link_id: i64,
    variant_b_title: &str,
    cap: i64,
) -> Result<Link, AppError> {
    let running = db::count_running_tests(pool).await?;
    if running >= cap {
        return Err(AppError::TierLimitExceeded);
    }

    let link = db::get_link_by_id(pool, link_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let now = chrono::Local::now().naive_local();
    db::start_test(pool, link_id, &link.title, variant_b_title, now).await?;

    db::get_link_by_id(pool, link_id)
        .await?
        .ok_or(AppError::NotFound)
}

/// End a link's test.
///
/// With `apply_winner` and a computed winner, the winning text becomes the
/// link's title and every test column is cleared. Otherwise the test is
/// archived: status flips to completed, counters and the challenger title
/// are kept for history, and the displayed title stays as-is (variant A was
/// what every visitor saw anyway).
///
/// A link whose test already ended (or never started) passes through
/// unchanged; that is not an error.
pub async fn end_test(
    pool: &SqlitePool,
    link_id: i64,
    apply_winner: bool,
) -> Result<Link, AppError> {
    let link = db::get_link_by_id(pool, link_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let Some(data) = link.test_data() else {
        return Ok(link);
    };
    if data.status == TestStatus::Completed {
        return Ok(link);
    }

    let winner = calculate_winner(data.clicks_a, data.clicks_b);

    if apply_winner {
        if let Some(w) = winner {
            let winning_title = link.variant_title(w).to_owned();
            db::apply_test_winner(pool, link_id, &winning_title).await?;
            return db::get_link_by_id(pool, link_id)
                .await?
                .ok_or(AppError::NotFound);
        }
    }

    let now = chrono::Local::now().naive_local();
    db::archive_test(pool, link_id, winner, now).await?;

    db::get_link_by_id(pool, link_id)
        .await?
        .ok_or(AppError::NotFound)
}

/// Record a visitor click: always insert the click-log row, then bump the
/// served variant's counter with a single atomic UPDATE that only matches
/// while a test is actively running. The two writes are not wrapped in a
/// transaction; a click row without a counter bump is an accepted outcome
/// for these advisory counters.
pub async fn record_click(
    pool: &SqlitePool,
    page_id: i64,
    link_id: i64,
    visitor_id: Option<&str>,
    variant: Variant,
) -> Result<(), sqlx::Error> {
    db::log_click(pool, page_id, link_id, visitor_id, Some(variant)).await?;
    db::bump_test_counter(pool, link_id, variant).await?;
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("migrations");
        pool
    }

    async fn seed_link(pool: &SqlitePool, title: &str) -> Link {
        // Each seeded link gets its own page; slugs must be unique.
        let slug = format!("page-{}", uuid::Uuid::new_v4());
        let page = db::create_page(pool, &slug, None).await.expect("page");
        db::create_link(pool, page.id, title, "https://example.com", None, 0, false)
            .await
            .expect("link")
    }

    async fn click_count(pool: &SqlitePool, link_id: i64) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM clicks WHERE link_id = ?1")
            .bind(link_id)
            .fetch_one(pool)
            .await
            .expect("count")
    }

    // ── Pure rules ─────────────────────────────────────────────────────

    #[test]
    fn winner_needs_minimum_sample() {
        assert_eq!(calculate_winner(3, 2), None);
        assert_eq!(calculate_winner(9, 0), None);
        // Exactly at the threshold a unanimous lead counts.
        assert_eq!(calculate_winner(10, 0), Some(Variant::A));
    }

    #[test]
    fn winner_requires_clear_lead() {
        assert_eq!(calculate_winner(30, 10), Some(Variant::A));
        assert_eq!(calculate_winner(10, 30), Some(Variant::B));
        // 22 vs 20 is inside the 20% margin.
        assert_eq!(calculate_winner(22, 20), None);
        assert_eq!(calculate_winner(21, 21), None);
    }

    #[test]
    fn progress_is_capped_at_one_hundred() {
        assert_eq!(test_progress(0, 0), 0);
        assert_eq!(test_progress(10, 15), 50);
        assert_eq!(test_progress(40, 30), 100);
    }

    // ── Transitions ────────────────────────────────────────────────────

    #[tokio::test]
    async fn starting_a_test_populates_state_without_touching_title() {
        let pool = test_pool().await;
        let link = seed_link(&pool, "Old").await;

        let link = start_test(&pool, link.id, "New", 1).await.expect("start");

        assert_eq!(link.title, "Old");
        assert_eq!(link.original_title.as_deref(), Some("Old"));
        assert_eq!(link.test_b_title.as_deref(), Some("New"));
        assert_eq!(link.test_variant.as_deref(), Some("A"));
        assert!(link.has_running_test());
        let data = link.test_data().expect("test data");
        assert_eq!((data.clicks_a, data.clicks_b), (0, 0));
        assert!(data.started_at.is_some());
        assert_eq!(data.status, TestStatus::Running);
    }

    #[tokio::test]
    async fn free_tier_allows_only_one_running_test() {
        let pool = test_pool().await;
        let first = seed_link(&pool, "First").await;
        let second = seed_link(&pool, "Second").await;

        start_test(&pool, first.id, "First B", 1).await.expect("start");

        let err = start_test(&pool, second.id, "Second B", 1)
            .await
            .expect_err("cap");
        assert!(matches!(err, AppError::TierLimitExceeded));

        // Neither link's state moved.
        let first = db::get_link_by_id(&pool, first.id).await.unwrap().unwrap();
        let second = db::get_link_by_id(&pool, second.id).await.unwrap().unwrap();
        assert!(first.has_running_test());
        assert_eq!((first.test_clicks_a, first.test_clicks_b), (0, 0));
        assert!(second.test_data().is_none());
        assert_eq!(second.title, "Second");
    }

    #[tokio::test]
    async fn starting_a_test_on_a_missing_link_is_not_found() {
        let pool = test_pool().await;
        let err = start_test(&pool, 999, "New", 1).await.expect_err("missing");
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn clicks_are_attributed_while_the_test_runs() {
        let pool = test_pool().await;
        let link = seed_link(&pool, "Old").await;
        start_test(&pool, link.id, "New", 1).await.expect("start");

        record_click(&pool, link.page_id, link.id, Some("v1"), Variant::A)
            .await
            .expect("click");
        record_click(&pool, link.page_id, link.id, Some("v2"), Variant::B)
            .await
            .expect("click");

        let link = db::get_link_by_id(&pool, link.id).await.unwrap().unwrap();
        assert_eq!((link.test_clicks_a, link.test_clicks_b), (1, 1));
        assert_eq!(click_count(&pool, link.id).await, 2);
    }

    #[tokio::test]
    async fn clicks_without_a_running_test_only_hit_the_log() {
        let pool = test_pool().await;
        let link = seed_link(&pool, "Plain").await;

        record_click(&pool, link.page_id, link.id, None, Variant::A)
            .await
            .expect("click");

        let link = db::get_link_by_id(&pool, link.id).await.unwrap().unwrap();
        assert_eq!((link.test_clicks_a, link.test_clicks_b), (0, 0));
        assert_eq!(click_count(&pool, link.id).await, 1);
    }

    #[tokio::test]
    async fn applying_the_winner_adopts_its_title_and_clears_state() {
        let pool = test_pool().await;
        let link = seed_link(&pool, "Old").await;
        start_test(&pool, link.id, "New", 1).await.expect("start");

        // Twelve unanimous A clicks make A the clear winner.
        for i in 0..12 {
            let visitor = format!("v{i}");
            record_click(&pool, link.page_id, link.id, Some(&visitor), Variant::A)
                .await
                .expect("click");
        }

        let link = end_test(&pool, link.id, true).await.expect("end");
        assert_eq!(link.title, "Old");
        assert!(link.test_variant.is_none());
        assert!(link.test_data().is_none());
        assert!(link.original_title.is_none());
    }

    #[tokio::test]
    async fn applying_a_variant_b_win_replaces_the_title() {
        let pool = test_pool().await;
        let link = seed_link(&pool, "Old").await;
        start_test(&pool, link.id, "New", 1).await.expect("start");

        for i in 0..12 {
            let visitor = format!("v{i}");
            record_click(&pool, link.page_id, link.id, Some(&visitor), Variant::B)
                .await
                .expect("click");
        }

        let link = end_test(&pool, link.id, true).await.expect("end");
        assert_eq!(link.title, "New");
        assert!(link.test_data().is_none());
    }

    #[tokio::test]
    async fn discarding_archives_the_test_and_keeps_the_title() {
        let pool = test_pool().await;
        let link = seed_link(&pool, "Old").await;
        start_test(&pool, link.id, "New", 1).await.expect("start");

        record_click(&pool, link.page_id, link.id, Some("v1"), Variant::A)
            .await
            .expect("click");
        record_click(&pool, link.page_id, link.id, Some("v2"), Variant::A)
            .await
            .expect("click");

        let link = end_test(&pool, link.id, false).await.expect("end");
        assert_eq!(link.title, "Old");
        assert!(link.test_variant.is_none());
        let data = link.test_data().expect("archived data");
        assert_eq!(data.status, TestStatus::Completed);
        assert!(data.ended_at.is_some());
        assert_eq!(data.clicks_a, 2);
        assert_eq!(data.winner, None);
        // The counter stops moving once archived.
        record_click(&pool, link.page_id, link.id, Some("v3"), Variant::A)
            .await
            .expect("click");
        let link = db::get_link_by_id(&pool, link.id).await.unwrap().unwrap();
        assert_eq!(link.test_clicks_a, 2);
    }

    #[tokio::test]
    async fn apply_winner_with_no_winner_falls_back_to_archiving() {
        let pool = test_pool().await;
        let link = seed_link(&pool, "Old").await;
        start_test(&pool, link.id, "New", 1).await.expect("start");

        // Five clicks are below the sample threshold.
        for i in 0..5 {
            let visitor = format!("v{i}");
            record_click(&pool, link.page_id, link.id, Some(&visitor), Variant::A)
                .await
                .expect("click");
        }

        let link = end_test(&pool, link.id, true).await.expect("end");
        assert_eq!(link.title, "Old");
        let data = link.test_data().expect("archived data");
        assert_eq!(data.status, TestStatus::Completed);
        assert_eq!(data.winner, None);
    }

    #[tokio::test]
    async fn ending_an_already_ended_test_is_a_no_op() {
        let pool = test_pool().await;
        let link = seed_link(&pool, "Old").await;
        start_test(&pool, link.id, "New", 1).await.expect("start");
        end_test(&pool, link.id, false).await.expect("first end");

        let link = end_test(&pool, link.id, true).await.expect("second end");
        assert_eq!(link.title, "Old");
        assert_eq!(
            link.test_data().map(|d| d.status),
            Some(TestStatus::Completed)
        );

        // A link that never ran a test also passes through untouched.
        let plain = seed_link(&pool, "Plain").await;
        let plain = end_test(&pool, plain.id, true).await.expect("end plain");
        assert!(plain.test_data().is_none());
    }

    #[tokio::test]
    async fn ending_a_missing_link_is_not_found() {
        let pool = test_pool().await;
        let err = end_test(&pool, 42, false).await.expect_err("missing");
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn ending_frees_the_tier_slot() {
        let pool = test_pool().await;
        let first = seed_link(&pool, "First").await;
        let second = seed_link(&pool, "Second").await;

        start_test(&pool, first.id, "First B", 1).await.expect("start");
        end_test(&pool, first.id, false).await.expect("end");

        // The archived test no longer counts against the cap.
        start_test(&pool, second.id, "Second B", 1)
            .await
            .expect("second start");
    }
}
