use crate::core::site::SiteConfig;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

use super::document::{ChapterNode, CoinNode, LinkNode, PageError};

/// Parsed state of a listing page before node ids are assigned.
#[derive(Debug, Default)]
pub(crate) struct ParsedPage {
    pub list_root_present: bool,
    pub button_mount_present: bool,
    pub nonce: Option<String>,
    pub balance_display: Option<String>,
    pub chapters: Vec<ChapterNode>,
    /// Coins under the listing root matching the derived locked-coin selector.
    pub locked_coins: usize,
}

pub(crate) fn selector(raw: &str) -> Result<Selector, PageError> {
    Selector::parse(raw).map_err(|e| PageError::Selector {
        selector: raw.to_string(),
        reason: format!("{:?}", e),
    })
}

/// `class` attribute tokens in source order.
fn class_list(el: ElementRef<'_>) -> Vec<String> {
    el.value()
        .attr("class")
        .map(|c| c.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a full listing page.
pub(crate) fn parse_page(html: &str, site: &SiteConfig) -> Result<ParsedPage, PageError> {
    let document = Html::parse_document(html);

    let root_sel = selector(&site.chapter_list_selector)?;
    let mount_sel = selector(&site.button_mount_selector)?;
    let nonce_sel = selector(&site.nonce_selector)?;
    let balance_sel = selector(&site.balance_selector)?;
    let locked_sel = selector(&site.locked_coin_selector())?;

    let mut page = ParsedPage {
        button_mount_present: document.select(&mount_sel).next().is_some(),
        nonce: document
            .select(&nonce_sel)
            .next()
            .and_then(|el| el.value().attr("value"))
            .map(|v| v.to_string()),
        balance_display: document
            .select(&balance_sel)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>())),
        ..ParsedPage::default()
    };

    if let Some(root) = document.select(&root_sel).next() {
        page.list_root_present = true;
        page.chapters = chapters_under(root, site)?;
        page.locked_coins = root.select(&locked_sel).count();
    }

    Ok(page)
}

/// Parse AJAX-injected chapter markup.
pub(crate) fn parse_chapters_fragment(
    html: &str,
    site: &SiteConfig,
) -> Result<Vec<ChapterNode>, PageError> {
    let fragment = Html::parse_fragment(html);
    chapters_under(fragment.root_element(), site)
}

fn chapters_under(root: ElementRef<'_>, site: &SiteConfig) -> Result<Vec<ChapterNode>, PageError> {
    let chapter_sel = selector(&site.chapter_selector)?;
    let coin_sel = selector(&site.coin_selector)?;
    let link_sel = selector("a")?;
    let icon_sel = selector("i")?;

    let mut chapters = Vec::new();
    for el in root.select(&chapter_sel) {
        let link = el.select(&link_sel).next().map(|a| LinkNode {
            node_id: 0,
            href: a.value().attr("href").unwrap_or_default().to_string(),
            icon_classes: a
                .select(&icon_sel)
                .next()
                .map(class_list)
                .unwrap_or_default(),
        });
        let title = el
            .select(&link_sel)
            .next()
            .map(|a| collapse_whitespace(&a.text().collect::<String>()))
            .unwrap_or_default();
        let coin = el.select(&coin_sel).next().map(|c| CoinNode {
            text: collapse_whitespace(&c.text().collect::<String>()),
            classes: class_list(c),
            data: c
                .value()
                .attrs()
                .filter(|(name, _)| name.starts_with("data-"))
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect::<BTreeMap<_, _>>(),
            ..CoinNode::default()
        });
        chapters.push(ChapterNode {
            node_id: 0,
            classes: class_list(el),
            title,
            link,
            coin,
        });
    }
    Ok(chapters)
}

// ---------------------------------------------------------------------------
// Field extractors
// ---------------------------------------------------------------------------

/// Leading run of ASCII digits after trimming, the way `parseInt` reads "5 coins".
pub fn leading_integer(text: &str) -> Option<u64> {
    let trimmed = text.trim_start();
    let end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    trimmed[..end].parse().ok()
}

/// Coin cost: displayed text, then a `<prefix><n>` class, then the data attribute.
pub fn extract_cost(coin: &CoinNode, site: &SiteConfig) -> Option<u64> {
    if let Some(cost) = leading_integer(&coin.text) {
        return Some(cost);
    }
    if !site.cost_class_prefix.is_empty() {
        let from_class = coin.classes.iter().find_map(|c| {
            c.strip_prefix(site.cost_class_prefix.as_str())
                .filter(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|rest| rest.parse().ok())
        });
        if from_class.is_some() {
            return from_class;
        }
    }
    coin.data
        .get(&site.cost_data_attribute)
        .and_then(|v| leading_integer(v))
}

/// Numeric chapter id from a `<prefix><digits>` class token.
pub fn extract_chapter_id(classes: &[String], prefix: &str) -> Option<String> {
    classes.iter().find_map(|c| {
        c.strip_prefix(prefix)
            .filter(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
            .map(|rest| rest.to_string())
    })
}

/// Balance from text using the site pattern; capture group 1 when present.
pub fn extract_balance(text: &str, pattern: &Regex) -> Option<u64> {
    let caps = pattern.captures(text)?;
    let raw = caps.get(1).or_else(|| caps.get(0))?.as_str();
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
