//! In-process mock of a WP-Manga site: the purchase endpoint and the balance page.

#![allow(dead_code)]

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use ezy_coin::core::site::SiteConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Purchase,
    Reject,
    ServerError,
    Garbage,
}

#[derive(Debug)]
pub struct SiteState {
    pub mode: Mutex<Mode>,
    pub delay: Mutex<Duration>,
    pub balance: AtomicU64,
    pub purchases: Mutex<Vec<HashMap<String, String>>>,
    pub requested_with: Mutex<Vec<Option<String>>>,
}

pub struct MockSite {
    pub origin: String,
    pub state: Arc<SiteState>,
}

impl MockSite {
    pub async fn start(balance: u64, mode: Mode) -> Self {
        let state = Arc::new(SiteState {
            mode: Mutex::new(mode),
            delay: Mutex::new(Duration::ZERO),
            balance: AtomicU64::new(balance),
            purchases: Mutex::new(Vec::new()),
            requested_with: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/", get(balance_page))
            .route("/wp-admin/admin-ajax.php", post(buy_chapter))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            origin: format!("http://{}", addr),
            state,
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.state.delay.lock().unwrap() = delay;
        self
    }

    pub fn site(&self) -> Arc<SiteConfig> {
        Arc::new(SiteConfig::madara(&self.origin, "#list"))
    }

    pub fn purchase_count(&self) -> usize {
        self.state.purchases.lock().unwrap().len()
    }

    pub fn purchased_chapters(&self) -> Vec<String> {
        self.state
            .purchases
            .lock()
            .unwrap()
            .iter()
            .filter_map(|form| form.get("chapter").cloned())
            .collect()
    }
}

async fn balance_page(State(state): State<Arc<SiteState>>) -> Html<String> {
    Html(format!(
        r#"<html><body><ul class="c-user_menu"><li><a>Balance: {}</a></li></ul></body></html>"#,
        state.balance.load(Ordering::SeqCst)
    ))
}

async fn buy_chapter(
    State(state): State<Arc<SiteState>>,
    headers: axum::http::HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.requested_with.lock().unwrap().push(
        headers
            .get("x-requested-with")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string()),
    );
    let chapter = form.get("chapter").cloned().unwrap_or_default();
    state.purchases.lock().unwrap().push(form);

    let delay = *state.delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mode = *state.mode.lock().unwrap();
    match mode {
        Mode::Purchase => Json(serde_json::json!({
            "success": true,
            "data": {
                "status": true,
                "url": format!("/novel/a/chapter-{}/", chapter),
                "message": "Chapter purchased"
            }
        }))
        .into_response(),
        Mode::Reject => Json(serde_json::json!({
            "success": false,
            "data": "You do not have enough coins"
        }))
        .into_response(),
        Mode::ServerError => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Mode::Garbage => "<html>not json</html>".into_response(),
    }
}

/// A listing page with one locked chapter per `(id, cost)`, in DOM order.
pub fn listing_page(balance: u64, chapters: &[(u32, u32)]) -> String {
    let items: String = chapters
        .iter()
        .map(|(id, cost)| {
            format!(
                r#"<li class="wp-manga-chapter premium-block data-chapter-{id}"><a href="javascript:void(0)">Chapter {id} <i class="fas fa-lock"></i></a><span class="coin">{cost}</span></li>"#
            )
        })
        .collect();
    format!(
        r#"<html><body>
        <ul class="c-user_menu"><li><a>Balance: {balance}</a></li></ul>
        <input type="hidden" name="wp-manga-coin-nonce" value="n0nce">
        <div id="init-links"></div>
        <div id="list">{items}</div>
        </body></html>"#
    )
}
