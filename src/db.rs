use crate::{
    cache::PageCache,
    models::{ClickEvent, Link, Page, PageAnalytics, Variant},
};
use chrono::NaiveDateTime;
use sqlx::SqlitePool;

/// Column list shared by every `SELECT ... FROM links` in this module.
const LINK_COLUMNS: &str = "id, page_id, title, url, icon, position, pinned, is_active, schedule,
     test_variant, original_title, test_b_title, test_clicks_a, test_clicks_b,
     test_started_at, test_ended_at, test_status, test_winner, created_at";

// ── Warm-up ────────────────────────────────────────────────────────────────

/// Load every page slug into the in-memory cache at startup.
pub async fn warm_cache(pool: &SqlitePool, cache: &PageCache) -> anyhow::Result<()> {
    let pages: Vec<(String, i64)> = sqlx::query_as("SELECT slug, id FROM pages")
        .fetch_all(pool)
        .await?;

    let count = pages.len();
    for (slug, id) in pages {
        cache.set(slug, id);
    }

    tracing::info!("Cache warmed with {} page(s)", count);
    Ok(())
}

// ── Pages ──────────────────────────────────────────────────────────────────

/// Insert a new page and return the newly created row.
pub async fn create_page(
    pool: &SqlitePool,
    slug: &str,
    display_name: Option<&str>,
) -> Result<Page, sqlx::Error> {
    let id = sqlx::query("INSERT INTO pages (slug, display_name) VALUES (?1, ?2)")
        .bind(slug)
        .bind(display_name)
        .execute(pool)
        .await?
        .last_insert_rowid();

    sqlx::query_as("SELECT id, slug, display_name, created_at FROM pages WHERE id = ?1")
        .bind(id)
        .fetch_one(pool)
        .await
}

/// Fetch a page by its public slug.
pub async fn get_page_by_slug(
    pool: &SqlitePool,
    slug: &str,
) -> Result<Option<Page>, sqlx::Error> {
    sqlx::query_as("SELECT id, slug, display_name, created_at FROM pages WHERE slug = ?1")
        .bind(slug)
        .fetch_optional(pool)
        .await
}

/// Fetch a page by its primary key.
pub async fn get_page_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Page>, sqlx::Error> {
    sqlx::query_as("SELECT id, slug, display_name, created_at FROM pages WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

// ── Links ──────────────────────────────────────────────────────────────────

/// Insert a new link and return the newly created row.
pub async fn create_link(
    pool: &SqlitePool,
    page_id: i64,
    title: &str,
    url: &str,
    icon: Option<&str>,
    position: i64,
    pinned: bool,
) -> Result<Link, sqlx::Error> {
    let id = sqlx::query(
        "INSERT INTO links (page_id, title, url, icon, position, pinned)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(page_id)
    .bind(title)
    .bind(url)
    .bind(icon)
    .bind(position)
    .bind(pinned)
    .execute(pool)
    .await?
    .last_insert_rowid();

    sqlx::query_as(&format!("SELECT {LINK_COLUMNS} FROM links WHERE id = ?1"))
        .bind(id)
        .fetch_one(pool)
        .await
}

/// Fetch a single link by its primary key (any status).
pub async fn get_link_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Link>, sqlx::Error> {
    sqlx::query_as(&format!("SELECT {LINK_COLUMNS} FROM links WHERE id = ?1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Return all of a page's links in display order (ascending position).
pub async fn get_links_for_page(
    pool: &SqlitePool,
    page_id: i64,
) -> Result<Vec<Link>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {LINK_COLUMNS} FROM links WHERE page_id = ?1 ORDER BY position ASC, id ASC"
    ))
    .bind(page_id)
    .fetch_all(pool)
    .await
}

/// Partial update of a link's editable fields. `None` leaves a field as-is.
pub async fn update_link(
    pool: &SqlitePool,
    id: i64,
    title: Option<&str>,
    url: Option<&str>,
    icon: Option<&str>,
    position: Option<i64>,
    pinned: Option<bool>,
    is_active: Option<bool>,
) -> Result<bool, sqlx::Error> {
    let affected = sqlx::query(
        "UPDATE links SET
             title = COALESCE(?2, title),
             url = COALESCE(?3, url),
             icon = COALESCE(?4, icon),
             position = COALESCE(?5, position),
             pinned = COALESCE(?6, pinned),
             is_active = COALESCE(?7, is_active)
         WHERE id = ?1",
    )
    .bind(id)
    .bind(title)
    .bind(url)
    .bind(icon)
    .bind(position)
    .bind(pinned)
    .bind(is_active)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(affected > 0)
}

/// Replace (or clear) a link's schedule JSON wholesale. Switching the rule
/// type therefore discards every field of the previous rule.
pub async fn set_schedule(
    pool: &SqlitePool,
    id: i64,
    schedule_json: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let affected = sqlx::query("UPDATE links SET schedule = ?2 WHERE id = ?1")
        .bind(id)
        .bind(schedule_json)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(affected > 0)
}

/// Permanently delete a link (cascades to clicks via FK).
pub async fn delete_link(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let affected = sqlx::query("DELETE FROM links WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(affected > 0)
}

// ── A/B test state ─────────────────────────────────────────────────────────

/// Number of links currently carrying a running test. The free-tier cap is
/// enforced against this count; there is no per-user scoping.
pub async fn count_running_tests(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM links WHERE test_variant IS NOT NULL")
        .fetch_one(pool)
        .await
}

/// Mark a test as running. The displayed `title` is left untouched, so
/// visitors keep seeing variant A's text.
pub async fn start_test(
    pool: &SqlitePool,
    id: i64,
    original_title: &str,
    variant_b_title: &str,
    now: NaiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE links SET
             test_variant = 'A',
             original_title = ?2,
             test_b_title = ?3,
             test_clicks_a = 0,
             test_clicks_b = 0,
             test_started_at = ?4,
             test_ended_at = NULL,
             test_status = 'running',
             test_winner = NULL
         WHERE id = ?1",
    )
    .bind(id)
    .bind(original_title)
    .bind(variant_b_title)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// End a test by adopting the winning title and clearing every test column.
pub async fn apply_test_winner(
    pool: &SqlitePool,
    id: i64,
    winning_title: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE links SET
             title = ?2,
             test_variant = NULL,
             original_title = NULL,
             test_b_title = NULL,
             test_clicks_a = 0,
             test_clicks_b = 0,
             test_started_at = NULL,
             test_ended_at = NULL,
             test_status = NULL,
             test_winner = NULL
         WHERE id = ?1",
    )
    .bind(id)
    .bind(winning_title)
    .execute(pool)
    .await?;

    Ok(())
}

/// End a test without adopting a title: the counters and challenger title
/// are retained for history, the status flips to completed, and the link's
/// displayed title stays as-is.
pub async fn archive_test(
    pool: &SqlitePool,
    id: i64,
    winner: Option<Variant>,
    now: NaiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE links SET
             test_variant = NULL,
             original_title = NULL,
             test_status = 'completed',
             test_ended_at = ?2,
             test_winner = ?3
         WHERE id = ?1",
    )
    .bind(id)
    .bind(now)
    .bind(winner.map(Variant::as_str))
    .execute(pool)
    .await?;

    Ok(())
}

/// Atomically bump the click counter of one variant, but only while the
/// link's test is actively running. Returns the number of rows touched;
/// zero simply means no running test and is not an error.
pub async fn bump_test_counter(
    pool: &SqlitePool,
    link_id: i64,
    variant: Variant,
) -> Result<u64, sqlx::Error> {
    let sql = match variant {
        Variant::A => {
            "UPDATE links SET test_clicks_a = test_clicks_a + 1
             WHERE id = ?1 AND test_started_at IS NOT NULL AND test_status = 'running'"
        }
        Variant::B => {
            "UPDATE links SET test_clicks_b = test_clicks_b + 1
             WHERE id = ?1 AND test_started_at IS NOT NULL AND test_status = 'running'"
        }
    };

    let affected = sqlx::query(sql)
        .bind(link_id)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(affected)
}

// ── Clicks & views ─────────────────────────────────────────────────────────

/// Record a click event. Designed to be called from a spawned background
/// task so that the response is never blocked by the analytics write.
pub async fn log_click(
    pool: &SqlitePool,
    page_id: i64,
    link_id: i64,
    visitor_id: Option<&str>,
    variant: Option<Variant>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO clicks (page_id, link_id, visitor_id, variant)
         VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(page_id)
    .bind(link_id)
    .bind(visitor_id)
    .bind(variant.map(Variant::as_str))
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a public page render, also from a spawned background task.
pub async fn log_page_view(
    pool: &SqlitePool,
    page_id: i64,
    visitor_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO page_views (page_id, visitor_id) VALUES (?1, ?2)")
        .bind(page_id)
        .bind(visitor_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Aggregate engagement for one page: totals plus clicks bucketed by hour
/// of day, for the peak-time view.
pub async fn get_page_analytics(
    pool: &SqlitePool,
    page_id: i64,
) -> Result<PageAnalytics, sqlx::Error> {
    let total_clicks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clicks WHERE page_id = ?1")
        .bind(page_id)
        .fetch_one(pool)
        .await?;

    let total_views: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM page_views WHERE page_id = ?1")
            .bind(page_id)
            .fetch_one(pool)
            .await?;

    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT CAST(strftime('%H', clicked_at) AS INTEGER) AS hour, COUNT(*)
         FROM clicks WHERE page_id = ?1
         GROUP BY hour",
    )
    .bind(page_id)
    .fetch_all(pool)
    .await?;

    let mut clicks_by_hour = [0i64; 24];
    for (hour, count) in rows {
        if (0..24).contains(&hour) {
            clicks_by_hour[hour as usize] = count;
        }
    }

    let recent_clicks: Vec<ClickEvent> = sqlx::query_as(
        "SELECT id, page_id, link_id, visitor_id, variant, clicked_at
         FROM clicks
         WHERE page_id = ?1
         ORDER BY clicked_at DESC
         LIMIT 100",
    )
    .bind(page_id)
    .fetch_all(pool)
    .await?;

    Ok(PageAnalytics {
        total_clicks,
        total_views,
        clicks_by_hour,
        recent_clicks,
    })
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

    async fn click_at(pool: &SqlitePool, page_id: i64, link_id: i64, clicked_at: &str) {
        sqlx::query(
            "INSERT INTO clicks (page_id, link_id, visitor_id, variant, clicked_at)
             VALUES (?1, ?2, 'v', 'A', ?3)",
        )
        .bind(page_id)
        .bind(link_id)
        .bind(clicked_at)
        .execute(pool)
        .await
        .expect("click");
    }

    #[tokio::test]
    async fn analytics_buckets_clicks_by_hour_of_day() {
        let pool = test_pool().await;
        let page = create_page(&pool, "creator", Some("Creator")).await.unwrap();
        let link = create_link(&pool, page.id, "Shop", "https://shop.example", None, 0, false)
            .await
            .unwrap();

        click_at(&pool, page.id, link.id, "2024-01-15 09:12:00").await;
        click_at(&pool, page.id, link.id, "2024-01-16 09:48:00").await;
        click_at(&pool, page.id, link.id, "2024-01-15 14:05:00").await;

        for _ in 0..6 {
            log_page_view(&pool, page.id, Some("v")).await.unwrap();
        }

        let analytics = get_page_analytics(&pool, page.id).await.unwrap();
        assert_eq!(analytics.total_clicks, 3);
        assert_eq!(analytics.total_views, 6);
        assert_eq!(analytics.clicks_by_hour[9], 2);
        assert_eq!(analytics.clicks_by_hour[14], 1);
        assert_eq!(analytics.clicks_by_hour[10], 0);
        assert_eq!(analytics.peak_hour(), Some(9));
        assert!((analytics.click_through_rate() - 0.5).abs() < 1e-9);
        assert_eq!(analytics.recent_clicks.len(), 3);
    }

    #[tokio::test]
    async fn analytics_with_no_traffic_is_all_zero() {
        let pool = test_pool().await;
        let page = create_page(&pool, "quiet", None).await.unwrap();

        let analytics = get_page_analytics(&pool, page.id).await.unwrap();
        assert_eq!(analytics.total_clicks, 0);
        assert_eq!(analytics.total_views, 0);
        assert_eq!(analytics.peak_hour(), None);
        assert_eq!(analytics.click_through_rate(), 0.0);
    }

    #[tokio::test]
    async fn links_come_back_in_ascending_position_order() {
        let pool = test_pool().await;
        let page = create_page(&pool, "ordered", None).await.unwrap();
        create_link(&pool, page.id, "Third", "https://c.example", None, 30, false)
            .await
            .unwrap();
        create_link(&pool, page.id, "First", "https://a.example", None, 10, true)
            .await
            .unwrap();
        create_link(&pool, page.id, "Second", "https://b.example", None, 20, false)
            .await
            .unwrap();

        let links = get_links_for_page(&pool, page.id).await.unwrap();
        let titles: Vec<&str> = links.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(titles, ["First", "Second", "Third"]);
    }
}
