use crate::{
    abtest, db,
    error::AppError,
    models::{Link, Schedule, TestStatus, Variant},
    AppState,
};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

// ── Request / response shapes ──────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePageRequest {
    pub slug: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse {
    pub id: i64,
    pub slug: String,
    pub display_name: Option<String>,
    pub url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLinkRequest {
    pub page_id: i64,
    pub title: String,
    pub url: String,
    pub icon: Option<String>,
    pub position: Option<i64>,
    pub pinned: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLinkRequest {
    pub title: Option<String>,
    pub url: Option<String>,
    pub icon: Option<String>,
    pub position: Option<i64>,
    pub pinned: Option<bool>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct SetScheduleRequest {
    /// `null` clears the rule; a new rule replaces the old one wholesale.
    pub schedule: Option<Schedule>,
}

/// A link as the builder dashboard sees it: raw fields plus the computed
/// current visibility and, when a test was ever started, its summary.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardLink {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub icon: Option<String>,
    pub position: i64,
    pub pinned: bool,
    pub is_active: bool,
    pub visible_now: bool,
    pub schedule: Option<Schedule>,
    pub test: Option<TestSummary>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    pub variant_a_title: String,
    pub variant_b_title: String,
    pub clicks_a: i64,
    pub clicks_b: i64,
    pub progress: i64,
    pub winner: Option<Variant>,
    pub status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResponse {
    pub total_clicks: i64,
    pub total_views: i64,
    pub click_through_rate: f64,
    pub clicks_by_hour: Vec<i64>,
    pub peak_hour: Option<u32>,
    pub recent_clicks: Vec<RecentClick>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentClick {
    pub link_id: i64,
    pub visitor_id: Option<String>,
    pub variant: Option<String>,
    pub clicked_at: chrono::NaiveDateTime,
}

// ── Pages ──────────────────────────────────────────────────────────────────

/// POST /api/pages
pub async fn create_page(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePageRequest>,
) -> Result<Json<PageResponse>, AppError> {
    let slug = match req.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => {
            // Slugs are path segments: lowercase letters, digits, hyphens.
            if !slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            {
                return Err(AppError::Invalid(
                    "slug may only contain lowercase letters, digits, and hyphens".into(),
                ));
            }
            slug.to_owned()
        }
        None => generate_unique_slug(&state.db).await,
    };

    let page = db::create_page(&state.db, &slug, req.display_name.as_deref())
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE") {
                AppError::Invalid(format!("slug '{slug}' is already taken"))
            } else {
                AppError::Persistence(e)
            }
        })?;

    // Update the cache immediately so the public path resolves the new slug.
    state.pages.set(&page.slug, page.id);

    Ok(Json(PageResponse {
        id: page.id,
        url: format!("{}/p/{}", state.config.base_url, page.slug),
        slug: page.slug,
        display_name: page.display_name,
    }))
}

/// GET /api/pages/:id/links
pub async fn list_links(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<i64>,
) -> Result<Json<Vec<DashboardLink>>, AppError> {
    if db::get_page_by_id(&state.db, page_id).await?.is_none() {
        return Err(AppError::NotFound);
    }

    let now = chrono::Local::now().naive_local();
    let links = db::get_links_for_page(&state.db, page_id).await?;

    Ok(Json(links.iter().map(|l| dashboard_link(l, now)).collect()))
}

/// GET /api/pages/:id/analytics
pub async fn page_analytics(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<i64>,
) -> Result<Json<AnalyticsResponse>, AppError> {
    if db::get_page_by_id(&state.db, page_id).await?.is_none() {
        return Err(AppError::NotFound);
    }

    let analytics = db::get_page_analytics(&state.db, page_id).await?;

    Ok(Json(AnalyticsResponse {
        total_clicks: analytics.total_clicks,
        total_views: analytics.total_views,
        click_through_rate: analytics.click_through_rate(),
        peak_hour: analytics.peak_hour(),
        clicks_by_hour: analytics.clicks_by_hour.to_vec(),
        recent_clicks: analytics
            .recent_clicks
            .into_iter()
            .map(|c| RecentClick {
                link_id: c.link_id,
                visitor_id: c.visitor_id,
                variant: c.variant,
                clicked_at: c.clicked_at,
            })
            .collect(),
    }))
}

// ── Links ──────────────────────────────────────────────────────────────────

/// POST /api/links
pub async fn create_link(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateLinkRequest>,
) -> Result<Json<DashboardLink>, AppError> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(AppError::Invalid("title must not be empty".into()));
    }

    let url = req.url.trim();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(AppError::Invalid(
            "url must start with http:// or https://".into(),
        ));
    }

    if db::get_page_by_id(&state.db, req.page_id).await?.is_none() {
        return Err(AppError::NotFound);
    }

    let link = db::create_link(
        &state.db,
        req.page_id,
        title,
        url,
        req.icon.as_deref(),
        req.position.unwrap_or(0),
        req.pinned.unwrap_or(false),
    )
    .await?;

    let now = chrono::Local::now().naive_local();
    Ok(Json(dashboard_link(&link, now)))
}

/// POST /api/links/:id/update
pub async fn update_link(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateLinkRequest>,
) -> Result<Json<DashboardLink>, AppError> {
    if let Some(url) = req.url.as_deref() {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(AppError::Invalid(
                "url must start with http:// or https://".into(),
            ));
        }
    }
    if req.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(AppError::Invalid("title must not be empty".into()));
    }

    let updated = db::update_link(
        &state.db,
        id,
        req.title.as_deref().map(str::trim),
        req.url.as_deref(),
        req.icon.as_deref(),
        req.position,
        req.pinned,
        req.is_active,
    )
    .await?;
    if !updated {
        return Err(AppError::NotFound);
    }

    let link = db::get_link_by_id(&state.db, id)
        .await?
        .ok_or(AppError::NotFound)?;
    let now = chrono::Local::now().naive_local();
    Ok(Json(dashboard_link(&link, now)))
}

/// POST /api/links/:id/schedule
pub async fn set_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<SetScheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let schedule_json = match &req.schedule {
        Some(rule) => Some(
            serde_json::to_string(rule)
                .map_err(|e| AppError::Invalid(format!("unserializable schedule: {e}")))?,
        ),
        None => None,
    };

    if !db::set_schedule(&state.db, id, schedule_json.as_deref()).await? {
        return Err(AppError::NotFound);
    }

    Ok(Json(json!({ "success": true })))
}

/// POST /api/links/:id/delete
pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    if !db::delete_link(&state.db, id).await? {
        return Err(AppError::NotFound);
    }

    tracing::info!("Link {} deleted", id);
    Ok(Json(json!({ "success": true })))
}

// ── Private helpers ────────────────────────────────────────────────────────

fn dashboard_link(link: &Link, now: chrono::NaiveDateTime) -> DashboardLink {
    let test = link.test_data().map(|data| {
        let winner = match data.status {
            TestStatus::Running => abtest::calculate_winner(data.clicks_a, data.clicks_b),
            TestStatus::Completed => data.winner,
        };
        TestSummary {
            variant_a_title: link.variant_title(Variant::A).to_owned(),
            variant_b_title: data.variant_b_title.clone(),
            clicks_a: data.clicks_a,
            clicks_b: data.clicks_b,
            progress: abtest::test_progress(data.clicks_a, data.clicks_b),
            winner,
            status: data.status.as_str(),
        }
    });

    DashboardLink {
        id: link.id,
        title: link.title.clone(),
        url: link.url.clone(),
        icon: link.icon.clone(),
        position: link.position,
        pinned: link.pinned,
        is_active: link.is_active,
        visible_now: link.is_visible_at(now),
        schedule: link.parsed_schedule(),
        test,
    }
}

/// Generate a random 8-character slug that doesn't already exist. Tries up
/// to 10 times before giving up and returning whatever was last generated
/// (the UNIQUE constraint in the DB is the real guard).
async fn generate_unique_slug(pool: &sqlx::SqlitePool) -> String {
    for _ in 0..10 {
        let slug = random_slug(8);
        match db::get_page_by_slug(pool, &slug).await {
            Ok(None) => return slug,
            _ => continue,
        }
    }
    random_slug(10) // fallback: longer slug is even less likely to collide
}

/// Generate a random lowercase alphanumeric string of the given length.
fn random_slug(len: usize) -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
