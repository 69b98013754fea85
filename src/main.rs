use anyhow::{anyhow, bail, Context};
use std::env;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use url::Url;

use ezy_coin::core::config::{self, SessionSettings};
use ezy_coin::core::site::SiteRegistry;
use ezy_coin::preferences::PreferenceStore;
use ezy_coin::prompt::{AutoConfirm, Prompter, TerminalPrompter};
use ezy_coin::scraping::Document;
use ezy_coin::{bulk_unlock, unlock, HttpBackend, Session, SessionOptions};

const USAGE: &str = "usage: ezy-coin <listing-url> [--chapter <id>] [--yes] [--concurrency <n>] [--auto-unlock on|off]";

#[derive(Debug, Default)]
struct CliArgs {
    listing_url: Option<String>,
    chapter: Option<String>,
    assume_yes: bool,
    concurrency: Option<i64>,
    auto_unlock: Option<bool>,
}

fn flag_value(
    arg: &str,
    name: &str,
    rest: &mut impl Iterator<Item = String>,
) -> Option<anyhow::Result<String>> {
    if arg == name {
        return Some(rest.next().ok_or_else(|| anyhow!("{} needs a value", name)));
    }
    arg.strip_prefix(name)
        .and_then(|v| v.strip_prefix('='))
        .map(|v| Ok(v.to_string()))
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<CliArgs> {
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();
    while let Some(a) = args.next() {
        if a == "--yes" || a == "-y" {
            parsed.assume_yes = true;
        } else if let Some(v) = flag_value(&a, "--chapter", &mut args) {
            parsed.chapter = Some(v?);
        } else if let Some(v) = flag_value(&a, "--concurrency", &mut args) {
            let v = v?;
            parsed.concurrency = Some(
                v.trim()
                    .parse()
                    .with_context(|| format!("invalid --concurrency {:?}", v))?,
            );
        } else if let Some(v) = flag_value(&a, "--auto-unlock", &mut args) {
            parsed.auto_unlock = Some(match v?.as_str() {
                "on" => true,
                "off" => false,
                other => bail!("--auto-unlock takes on|off, got {:?}", other),
            });
        } else if a.starts_with('-') {
            bail!("unknown option {}\n{}", a, USAGE);
        } else if parsed.listing_url.is_none() {
            parsed.listing_url = Some(a);
        } else {
            bail!("unexpected argument {}\n{}", a, USAGE);
        }
    }
    Ok(parsed)
}

fn build_client() -> anyhow::Result<reqwest::Client> {
    let http_timeout = env::var("HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(30);
    let connect_timeout = env::var("HTTP_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(10);

    let mut headers = reqwest::header::HeaderMap::new();
    match config::cookie_from_env() {
        Some(cookie) => {
            let value = reqwest::header::HeaderValue::from_str(&cookie)
                .context("EZY_COIN_COOKIE is not a valid header value")?;
            headers.insert(reqwest::header::COOKIE, value);
        }
        None => warn!("EZY_COIN_COOKIE not set; the site will likely treat us as logged out"),
    }

    Ok(reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(http_timeout))
        .connect_timeout(std::time::Duration::from_secs(connect_timeout))
        .default_headers(headers)
        .build()?)
}

/// Madara themes load the chapter list lazily from `<listing>/ajax/chapters/`.
async fn load_lazy_chapters(
    client: &reqwest::Client,
    listing_url: &Url,
    ajax_path: &str,
    document: &Document,
) -> anyhow::Result<usize> {
    let mut base = listing_url.clone();
    if !base.path().ends_with('/') {
        base.set_path(&format!("{}/", base.path()));
    }
    let endpoint = base.join(ajax_path)?;
    info!("Loading chapter list from {}", endpoint);
    let fragment = client
        .post(endpoint)
        .header("X-Requested-With", "XMLHttpRequest")
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(document.inject_chapters_html(&fragment)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args(env::args().skip(1))?;
    let listing_url = args.listing_url.as_deref().ok_or_else(|| anyhow!(USAGE))?;
    let listing_url = Url::parse(listing_url).with_context(|| format!("invalid URL {}", listing_url))?;

    let cfg = config::load_config();
    let mut settings: SessionSettings = cfg.settings();
    if let Some(limit) = args.concurrency {
        settings.concurrency_limit = limit;
    }
    let registry = SiteRegistry::builtin().with_overrides(cfg.sites.clone());
    let site = registry.lookup_url(&listing_url)?;

    let preferences = PreferenceStore::default_location()?;
    let host = site.host().unwrap_or_default();
    if let Some(enabled) = args.auto_unlock {
        preferences.set_auto_unlock(&host, enabled)?;
    }
    let auto_unlock = preferences.auto_unlock(&host);

    let client = build_client()?;
    info!("Fetching {}", listing_url);
    let html = client
        .get(listing_url.clone())
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let document = Arc::new(Document::parse(&html, Arc::clone(&site))?);
    if document.chapters().is_empty() && document.has_list_root() {
        if let Some(ajax_path) = site.chapters_ajax_path.as_deref() {
            match load_lazy_chapters(&client, &listing_url, ajax_path, &document).await {
                Ok(added) => info!("Loaded {} chapters", added),
                Err(e) => warn!("Could not load the chapter list: {:#}", e),
            }
        }
    }

    let backend = Arc::new(HttpBackend::new(client, &site)?);
    // Auto-unlock runs the bulk flow below without asking instead of racing it in the background.
    let options = SessionOptions {
        settings,
        auto_unlock: false,
    };
    let session = Session::start(&listing_url, document, backend, options).await?;
    let balance_before = session.balance().current().await;

    let span = info_span!("session", id = %session.id);
    let result = async {
        if let Some(chapter_id) = args.chapter.as_deref() {
            let node = session
                .document()
                .find_by_chapter_id(chapter_id)
                .ok_or_else(|| anyhow!("chapter {} not found on the page", chapter_id))?;
            let unlocked = unlock::click(&session, node).await;
            Ok::<_, anyhow::Error>(serde_json::json!({
                "chapter": chapter_id,
                "unlocked": unlocked,
            }))
        } else {
            let prompter: Box<dyn Prompter> = if args.assume_yes || auto_unlock {
                Box::new(AutoConfirm)
            } else {
                Box::new(TerminalPrompter)
            };
            let outcome = bulk_unlock::unlock_all(&session, prompter.as_ref()).await?;
            Ok(serde_json::to_value(outcome)?)
        }
    }
    .instrument(span)
    .await;
    session.shutdown();
    let result = result?;

    let summary = serde_json::json!({
        "session_id": session.id.to_string(),
        "listing_url": listing_url.as_str(),
        "auto_unlock": auto_unlock,
        "balance_before": balance_before,
        "balance_after": session.balance().current().await,
        "locked_remaining": session.document().locked_items().len(),
        "total_cost_remaining": session.total_cost(),
        "result": result,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
