//! In-memory mirror of the listing page.
//!
//! Holds exactly the parts of the page the unlock flows read or write: the
//! chapter nodes under the listing root, the nonce field, the balance display
//! and the "unlock all" control. Structural edits under the listing root are
//! published on a broadcast channel, which is what the change observer
//! subscribes to.

use crate::core::site::SiteConfig;
use crate::core::types::{LockedItem, NodeId};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use super::parse::{self, extract_chapter_id, extract_cost};

const CHANGE_CHANNEL_CAPACITY: usize = 256;
const FLASH_CLASSES: [&str; 2] = ["flash-red", "fa-times-circle"];

#[derive(Debug, Error)]
pub enum PageError {
    #[error("invalid selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },

    #[error("node {0} is not in the page")]
    NodeMissing(NodeId),

    #[error("chapter list root {0:?} not found")]
    ListRootMissing(String),
}

/// A mutation notification, shaped like a `MutationRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomChange {
    ChildList { added: usize, removed: usize },
    Attributes { node: NodeId },
}

impl DomChange {
    /// Nodes were added or removed.
    pub fn is_structural(&self) -> bool {
        matches!(self, DomChange::ChildList { added, removed } if added + removed > 0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkNode {
    pub node_id: NodeId,
    pub href: String,
    pub icon_classes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoinNode {
    pub text: String,
    pub classes: Vec<String>,
    /// `data-*` attributes.
    pub data: BTreeMap<String, String>,
    /// An unlock handler is attached.
    pub handler: bool,
    /// The scanner has seen this coin (`data-listener-added`).
    pub instrumented: bool,
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterNode {
    pub node_id: NodeId,
    pub classes: Vec<String>,
    pub title: String,
    pub link: Option<LinkNode>,
    pub coin: Option<CoinNode>,
}

impl ChapterNode {
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    /// Carries the locked marker and a coin to click.
    pub fn is_locked(&self, site: &SiteConfig) -> bool {
        self.coin.is_some() && self.has_class(&site.locked_class)
    }

    pub fn chapter_id(&self, site: &SiteConfig) -> Option<String> {
        extract_chapter_id(&self.classes, &site.chapter_id_prefix)
    }

    pub fn cost(&self, site: &SiteConfig) -> Option<u64> {
        self.coin.as_ref().and_then(|c| extract_cost(c, site))
    }
}

/// The aggregate "Unlock All" control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnlockAllControl {
    pub total: u64,
    pub enabled: bool,
    pub busy: bool,
}

impl UnlockAllControl {
    pub fn label(&self) -> String {
        if self.busy {
            "Unlocking…".to_string()
        } else {
            format!("Unlock All {}", self.total)
        }
    }
}

#[derive(Debug, Default)]
struct PageState {
    list_root_present: bool,
    button_mount_present: bool,
    nonce: Option<String>,
    balance_display: Option<String>,
    unlock_all: Option<UnlockAllControl>,
    chapters: Vec<ChapterNode>,
    next_node_id: NodeId,
}

impl PageState {
    fn fresh_id(&mut self) -> NodeId {
        self.next_node_id += 1;
        self.next_node_id
    }

    fn adopt(&mut self, mut chapter: ChapterNode) -> ChapterNode {
        chapter.node_id = self.fresh_id();
        if let Some(link) = chapter.link.as_mut() {
            link.node_id = self.fresh_id();
        }
        chapter
    }

    fn chapter_mut(&mut self, node: NodeId) -> Result<&mut ChapterNode, PageError> {
        self.chapters
            .iter_mut()
            .find(|c| c.node_id == node)
            .ok_or(PageError::NodeMissing(node))
    }

    fn coin_mut(&mut self, node: NodeId) -> Result<&mut CoinNode, PageError> {
        self.chapter_mut(node)?
            .coin
            .as_mut()
            .ok_or(PageError::NodeMissing(node))
    }
}

pub struct Document {
    site: Arc<SiteConfig>,
    state: Mutex<PageState>,
    changes: broadcast::Sender<DomChange>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Document")
            .field("origin", &self.site.origin)
            .field("chapters", &state.chapters.len())
            .field("list_root_present", &state.list_root_present)
            .finish()
    }
}

impl Document {
    pub fn parse(html: &str, site: Arc<SiteConfig>) -> Result<Self, PageError> {
        let parsed = parse::parse_page(html, &site)?;
        debug!(
            "parsed {} chapters, {} locked coins",
            parsed.chapters.len(),
            parsed.locked_coins
        );
        let mut state = PageState {
            list_root_present: parsed.list_root_present,
            button_mount_present: parsed.button_mount_present,
            nonce: parsed.nonce,
            balance_display: parsed.balance_display,
            ..PageState::default()
        };
        for chapter in parsed.chapters {
            let chapter = state.adopt(chapter);
            state.chapters.push(chapter);
        }
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            site,
            state: Mutex::new(state),
            changes,
        })
    }

    fn state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, change: DomChange) {
        // No subscribers is fine: nothing is observing yet.
        let _ = self.changes.send(change);
    }

    pub fn site(&self) -> &Arc<SiteConfig> {
        &self.site
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomChange> {
        self.changes.subscribe()
    }

    pub fn has_list_root(&self) -> bool {
        self.state().list_root_present
    }

    pub fn nonce(&self) -> Option<String> {
        self.state().nonce.clone().filter(|n| !n.is_empty())
    }

    pub fn balance_display(&self) -> Option<String> {
        self.state().balance_display.clone()
    }

    /// Rewrite the balance display. `false` when the page has none.
    pub fn set_balance_display(&self, balance: u64) -> bool {
        let mut state = self.state();
        match state.balance_display.as_mut() {
            Some(text) => {
                *text = format!("Balance: {}", balance);
                true
            }
            None => false,
        }
    }

    pub fn chapters(&self) -> Vec<ChapterNode> {
        self.state().chapters.clone()
    }

    pub fn chapter(&self, node: NodeId) -> Option<ChapterNode> {
        self.state().chapters.iter().find(|c| c.node_id == node).cloned()
    }

    pub fn find_by_chapter_id(&self, chapter_id: &str) -> Option<NodeId> {
        self.state()
            .chapters
            .iter()
            .find(|c| c.chapter_id(&self.site).as_deref() == Some(chapter_id))
            .map(|c| c.node_id)
    }

    /// Locked chapters in DOM order.
    pub fn locked_items(&self) -> Vec<LockedItem> {
        self.state()
            .chapters
            .iter()
            .filter(|c| c.is_locked(&self.site))
            .map(|c| LockedItem {
                node: c.node_id,
                chapter_id: c.chapter_id(&self.site),
                title: c.title.clone(),
                cost: c.cost(&self.site),
                instrumented: c.coin.as_ref().is_some_and(|coin| coin.instrumented),
            })
            .collect()
    }

    pub fn item_cost(&self, node: NodeId) -> Option<u64> {
        self.chapter(node).and_then(|c| c.cost(&self.site))
    }

    /// Attach the unlock handler once. Returns `false` if the coin was already instrumented.
    pub fn instrument(&self, node: NodeId) -> Result<bool, PageError> {
        let affordance = self.site.purchase_affordance_class.clone();
        {
            let mut state = self.state();
            let coin = state.coin_mut(node)?;
            if coin.instrumented {
                return Ok(false);
            }
            coin.handler = true;
            coin.instrumented = true;
            if !coin.classes.contains(&affordance) {
                coin.classes.push(affordance);
            }
        }
        self.publish(DomChange::Attributes { node });
        Ok(true)
    }

    pub fn set_disabled(&self, node: NodeId, disabled: bool) -> Result<(), PageError> {
        self.state().coin_mut(node)?.disabled = disabled;
        self.publish(DomChange::Attributes { node });
        Ok(())
    }

    /// Toggle the failure highlight on a coin.
    pub fn set_flash(&self, node: NodeId, on: bool) -> Result<(), PageError> {
        {
            let mut state = self.state();
            let coin = state.coin_mut(node)?;
            coin.classes.retain(|c| !FLASH_CLASSES.contains(&c.as_str()));
            if on {
                coin.classes.extend(FLASH_CLASSES.iter().map(|c| c.to_string()));
            }
        }
        self.publish(DomChange::Attributes { node });
        Ok(())
    }

    /// Commit the unlocked state of a chapter.
    ///
    /// Removes the locked marker class and the purchase affordance, swaps the
    /// lock icon, points the link at `url`, replaces the link node and detaches
    /// the unlock handler.
    pub fn mark_unlocked(&self, node: NodeId, url: Option<&str>) -> Result<(), PageError> {
        let site = Arc::clone(&self.site);
        let link_replaced = {
            let mut state = self.state();
            let new_link_id = state.fresh_id();
            let chapter = state.chapter_mut(node)?;
            chapter.classes.retain(|c| c != &site.locked_class);
            if let Some(coin) = chapter.coin.as_mut() {
                coin.classes.retain(|c| c != &site.purchase_affordance_class);
                coin.handler = false;
            }
            match chapter.link.as_mut() {
                Some(link) => {
                    if let Some(url) = url {
                        link.href = url.to_string();
                    }
                    if link.icon_classes.contains(&site.lock_icon_class) {
                        link.icon_classes.retain(|c| c != &site.lock_icon_class);
                        link.icon_classes.push(site.unlocked_icon_class.clone());
                    }
                    // Fresh node: anything bound to the old link is gone.
                    link.node_id = new_link_id;
                    true
                }
                None => false,
            }
        };
        self.publish(DomChange::Attributes { node });
        if link_replaced {
            self.publish(DomChange::ChildList { added: 1, removed: 1 });
        }
        Ok(())
    }

    /// Append chapters from AJAX-loaded markup. Returns how many were added.
    pub fn inject_chapters_html(&self, fragment: &str) -> Result<usize, PageError> {
        let parsed = parse::parse_chapters_fragment(fragment, &self.site)?;
        let added = {
            let mut state = self.state();
            if !state.list_root_present {
                return Err(PageError::ListRootMissing(self.site.chapter_list_selector.clone()));
            }
            let count = parsed.len();
            for chapter in parsed {
                let chapter = state.adopt(chapter);
                state.chapters.push(chapter);
            }
            count
        };
        debug!("injected {} chapter nodes", added);
        if added > 0 {
            self.publish(DomChange::ChildList { added, removed: 0 });
        }
        Ok(added)
    }

    pub fn remove_chapter(&self, node: NodeId) -> bool {
        let removed = {
            let mut state = self.state();
            let before = state.chapters.len();
            state.chapters.retain(|c| c.node_id != node);
            before != state.chapters.len()
        };
        if removed {
            self.publish(DomChange::ChildList { added: 0, removed: 1 });
        }
        removed
    }

    // --- Unlock-all control ------------------------------------------------

    /// Mount the control under the button mount. `false` when the mount is missing.
    pub fn mount_unlock_all(&self) -> bool {
        let mut state = self.state();
        if !state.button_mount_present {
            return false;
        }
        if state.unlock_all.is_none() {
            state.unlock_all = Some(UnlockAllControl::default());
        }
        true
    }

    pub fn unlock_all_control(&self) -> Option<UnlockAllControl> {
        self.state().unlock_all
    }

    /// Show `total`; disabled when it is exactly zero.
    pub fn update_unlock_all(&self, total: u64) {
        if let Some(control) = self.state().unlock_all.as_mut() {
            control.total = total;
            control.enabled = total != 0 && !control.busy;
        }
    }

    pub fn set_unlock_all_busy(&self, busy: bool) {
        if let Some(control) = self.state().unlock_all.as_mut() {
            control.busy = busy;
            control.enabled = !busy && control.total != 0;
        }
    }
}
