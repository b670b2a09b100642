//! Oversight console state for the parent.
//!
//! Every action is one request followed by a full refresh, so the published
//! snapshot always reflects the server rather than a local guess.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vigil_core::{
    AppealRecord, ApprovalId, ListKind, ParentSettings, PolicyEntry, ResourceKind, Result,
    SettingsUpdate,
};

use crate::api::ApiClient;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lists {
    pub whitelist: Vec<PolicyEntry>,
    pub blacklist: Vec<PolicyEntry>,
}

impl Lists {
    pub fn get(&self, list: ListKind) -> &[PolicyEntry] {
        match list {
            ListKind::Whitelist => &self.whitelist,
            ListKind::Blacklist => &self.blacklist,
        }
    }
}

/// Outcome of the last console action, for display.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Info(String),
    Error(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsoleSnapshot {
    pub websites: Lists,
    pub desktop: Lists,
    /// Appeals escalated to the parent and still awaiting a verdict.
    pub pending: Vec<AppealRecord>,
    pub settings: Option<ParentSettings>,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub notice: Option<Notice>,
}

impl ConsoleSnapshot {
    pub fn lists(&self, kind: ResourceKind) -> &Lists {
        match kind {
            ResourceKind::Website => &self.websites,
            ResourceKind::DesktopApp => &self.desktop,
        }
    }
}

#[derive(Clone)]
pub struct OversightConsole {
    client: ApiClient,
    snapshot: Arc<watch::Sender<ConsoleSnapshot>>,
}

impl OversightConsole {
    pub fn new(client: ApiClient) -> Self {
        let (tx, _rx) = watch::channel(ConsoleSnapshot::default());
        Self {
            client,
            snapshot: Arc::new(tx),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConsoleSnapshot> {
        self.snapshot.subscribe()
    }

    /// The latest published snapshot.
    pub fn current(&self) -> ConsoleSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Fetch everything the console shows and publish it.
    pub async fn refresh(&self) -> Result<ConsoleSnapshot> {
        let (websites, desktop, pending, settings) = tokio::try_join!(
            self.fetch_lists(ResourceKind::Website),
            self.fetch_lists(ResourceKind::DesktopApp),
            self.client.pending_appeals(),
            self.client.settings(),
        )?;
        let notice = self.snapshot.borrow().notice.clone();
        let snapshot = ConsoleSnapshot {
            websites,
            desktop,
            pending,
            settings: Some(settings),
            refreshed_at: Some(Utc::now()),
            notice,
        };
        self.snapshot.send_replace(snapshot.clone());
        debug!(pending = snapshot.pending.len(), "console refreshed");
        Ok(snapshot)
    }

    async fn fetch_lists(&self, kind: ResourceKind) -> Result<Lists> {
        let (whitelist, blacklist) = tokio::try_join!(
            self.client.entries(kind, ListKind::Whitelist),
            self.client.entries(kind, ListKind::Blacklist),
        )?;
        Ok(Lists {
            whitelist,
            blacklist,
        })
    }

    /// Refresh on an interval until every subscriber is gone.
    pub fn watch(&self, interval: Duration) -> JoinHandle<()> {
        let console = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if console.snapshot.receiver_count() == 0 {
                    debug!("no console subscribers left, stopping refresh");
                    break;
                }
                if let Err(e) = console.refresh().await {
                    warn!(error = %e, "console refresh failed");
                    console.publish_notice(Notice::Error(format!("Refresh failed: {e}")));
                }
            }
        })
    }

    // ── Actions ────────────────────────────────────────────────

    pub async fn approve(&self, approval_id: &ApprovalId) -> Result<()> {
        let result = self.client.approve(approval_id).await.map(|_| ());
        self.finish(result, format!("Approved appeal {approval_id}."))
            .await
    }

    pub async fn deny(&self, approval_id: &ApprovalId) -> Result<()> {
        let result = self.client.deny(approval_id).await.map(|_| ());
        self.finish(result, format!("Denied appeal {approval_id}.")).await
    }

    pub async fn add_entry(
        &self,
        kind: ResourceKind,
        list: ListKind,
        identifier: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        let result = self
            .client
            .add_entry(kind, list, identifier, reason)
            .await
            .map(|entry| entry.identifier);
        let message = match &result {
            Ok(id) => format!("Added {id} to the {}.", list.as_str()),
            Err(_) => String::new(),
        };
        self.finish(result.map(|_| ()), message).await
    }

    pub async fn remove_entry(
        &self,
        kind: ResourceKind,
        list: ListKind,
        identifier: &str,
    ) -> Result<()> {
        let result = self.client.remove_entry(kind, list, identifier).await;
        self.finish(result, format!("Removed {identifier} from the {}.", list.as_str()))
            .await
    }

    pub async fn approve_app(&self, app: &str) -> Result<()> {
        let result = self.client.approve_app(app).await.map(|_| ());
        self.finish(result, format!("Approved {app}.")).await
    }

    pub async fn save_settings(&self, update: &SettingsUpdate) -> Result<()> {
        let result = self.client.save_settings(update).await.map(|_| ());
        self.finish(result, "Settings saved.".to_string()).await
    }

    /// Refresh regardless of the action's outcome, then publish what happened.
    async fn finish(&self, result: Result<()>, success: String) -> Result<()> {
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "refresh after console action failed");
        }
        match result {
            Ok(()) => {
                info!(notice = %success, "console action done");
                self.publish_notice(Notice::Info(success));
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "console action failed");
                self.publish_notice(Notice::Error(e.to_string()));
                Err(e)
            }
        }
    }

    fn publish_notice(&self, notice: Notice) {
        self.snapshot.send_modify(|s| s.notice = Some(notice));
    }
}
