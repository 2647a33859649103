use crate::{
    abtest, db,
    error::AppError,
    models::{Link, Page, Variant},
    visitor::VisitorId,
    AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ── Response shapes ────────────────────────────────────────────────────────

/// One link as rendered on the public page. `variant` is set while an A/B
/// test is running so the click endpoint can attribute the click.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicLink {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub icon: Option<String>,
    pub variant: Option<Variant>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicPage {
    pub slug: String,
    pub display_name: Option<String>,
    /// Pinned links, rendered in the "Featured" group above the rest.
    pub featured: Vec<PublicLink>,
    /// All remaining visible links, ascending position order.
    pub links: Vec<PublicLink>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickRequest {
    pub link_id: i64,
    /// Which variant the visitor saw. Defaults to the served variant (A).
    pub variant: Option<Variant>,
}

#[derive(Serialize)]
pub struct ClickResponse {
    pub url: String,
}

// ── Public page ────────────────────────────────────────────────────────────

/// GET /p/:slug
///
/// 1. Resolve the slug via the in-memory cache (fast path — no page query
///    on a hit, the id still fetches the row), falling back to the database.
/// 2. Load the page's links and filter them through the schedule evaluator
///    at the current local time; split pinned links into the Featured group.
/// 3. Spawn a background task to record the page view so rendering is not
///    blocked by the analytics write.
pub async fn view_page(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    visitor: VisitorId,
    jar: CookieJar,
) -> Response {
    let page = match resolve_page(&state, &slug).await {
        Ok(Some(p)) => p,
        Ok(None) => return (StatusCode::NOT_FOUND, "Page not found").into_response(),
        Err(e) => {
            tracing::error!("DB error looking up page '{}': {:?}", slug, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response();
        }
    };

    let links = match db::get_links_for_page(&state.db, page.id).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("DB error loading links for page {}: {:?}", page.id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response();
        }
    };

    let now = chrono::Local::now().naive_local();
    let (featured, regular): (Vec<&Link>, Vec<&Link>) = links
        .iter()
        .filter(|l| l.is_visible_at(now))
        .partition(|l| l.pinned);

    let body = PublicPage {
        slug: page.slug,
        display_name: page.display_name,
        featured: featured.into_iter().map(public_link).collect(),
        links: regular.into_iter().map(public_link).collect(),
    };

    // Record the view off the request path.
    let state_bg = state.clone();
    let page_id = page.id;
    let visitor_id = visitor.id.clone();
    tokio::spawn(async move {
        if let Err(e) = db::log_page_view(&state_bg.db, page_id, Some(&visitor_id)).await {
            tracing::error!("View logging failed for page {}: {:?}", page_id, e);
        }
    });

    let jar = if visitor.is_new {
        jar.add(visitor.into_cookie())
    } else {
        jar
    };

    (jar, Json(body)).into_response()
}

// ── Click tracking ─────────────────────────────────────────────────────────

/// POST /api/clicks
///
/// Resolves the link and answers with its destination URL immediately; the
/// click-log insert and the conditional test-counter bump happen on a
/// spawned task. Tracking failures are logged and never keep the visitor
/// from the destination.
pub async fn record_click(
    State(state): State<Arc<AppState>>,
    visitor: VisitorId,
    jar: CookieJar,
    Json(req): Json<ClickRequest>,
) -> Result<Response, AppError> {
    let link = db::get_link_by_id(&state.db, req.link_id)
        .await?
        .ok_or(AppError::NotFound)?;

    // The reference renderer serves variant A to everyone; an explicit
    // variant in the request wins so other callers can attribute B.
    let variant = req
        .variant
        .or_else(|| link.served_variant())
        .unwrap_or(Variant::A);

    let state_bg = state.clone();
    let visitor_id = visitor.id.clone();
    let (page_id, link_id) = (link.page_id, link.id);
    tokio::spawn(async move {
        if let Err(e) =
            abtest::record_click(&state_bg.db, page_id, link_id, Some(&visitor_id), variant).await
        {
            tracing::error!("Click logging failed for link {}: {:?}", link_id, e);
        }
    });

    let jar = if visitor.is_new {
        jar.add(visitor.into_cookie())
    } else {
        jar
    };

    Ok((jar, Json(ClickResponse { url: link.url })).into_response())
}

// ── Helpers ────────────────────────────────────────────────────────────────

async fn resolve_page(state: &AppState, slug: &str) -> Result<Option<Page>, sqlx::Error> {
    if let Some(id) = state.pages.get(slug) {
        return db::get_page_by_id(&state.db, id).await;
    }

    // Cache miss — check the database and backfill for next time.
    let page = db::get_page_by_slug(&state.db, slug).await?;
    if let Some(ref p) = page {
        state.pages.set(&p.slug, p.id);
    }
    Ok(page)
}

fn public_link(link: &Link) -> PublicLink {
    PublicLink {
        id: link.id,
        // Variant A's text is always served while a test runs, and the
        // stored title is exactly that text.
        title: link.title.clone(),
        url: link.url.clone(),
        icon: link.icon.clone(),
        variant: link.served_variant(),
    }
}
