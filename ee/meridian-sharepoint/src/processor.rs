use meridian_core::TaskKind;

use crate::dedup::{ChangeKeyStore, DedupError};
use crate::notification::Notification;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchDecision {
    /// Queue a job of the given kind; `delta_token` carries forward so the
    /// sync service can resume from where the last run left off.
    Enqueue {
        task: TaskKind,
        delta_token: Option<String>,
    },
    /// Notification named an item outside the subscription's scope.
    OutOfScope,
    /// `ChangeKey` already seen for this (tenant, drive).
    Duplicate,
}

pub struct WebhookProcessor<S> {
    store: S,
}

impl<S: ChangeKeyStore> WebhookProcessor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn process(&self, notification: &Notification) -> Result<DispatchDecision, DedupError> {
        if !notification.in_scope() {
            return Ok(DispatchDecision::OutOfScope);
        }

        let is_new = self
            .store
            .record_if_new(
                notification.tenant_id,
                &notification.drive_id,
                &notification.change_key,
            )
            .await?;
        if !is_new {
            return Ok(DispatchDecision::Duplicate);
        }

        let task = match notification.delta_token {
            Some(_) => TaskKind::SyncSharepointDelta,
            None => TaskKind::PullSharepointContent,
        };
        Ok(DispatchDecision::Enqueue {
            task,
            delta_token: notification.delta_token.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::SubscriptionScope;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct FakeStore {
        seen: Mutex<Vec<String>>,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChangeKeyStore for FakeStore {
        async fn record_if_new(
            &self,
            _tenant_id: Uuid,
            _drive_id: &str,
            change_key: &str,
        ) -> Result<bool, DedupError> {
            let mut seen = self.seen.lock().unwrap();
            if seen.iter().any(|k| k == change_key) {
                return Ok(false);
            }
            seen.push(change_key.to_string());
            Ok(true)
        }
    }

    fn notification(scope: SubscriptionScope, change_key: &str) -> Notification {
        Notification {
            tenant_id: Uuid::new_v4(),
            drive_id: "drive-1".to_string(),
            subscription_scope: scope,
            subscribed_item_id: Some("item-1".to_string()),
            notified_item_id: Some("item-1".to_string()),
            change_key: change_key.to_string(),
            delta_token: Some("token-abc".to_string()),
        }
    }

    #[tokio::test]
    async fn first_delivery_enqueues_delta_sync() {
        let processor = WebhookProcessor::new(FakeStore::new());
        let decision = processor
            .process(&notification(SubscriptionScope::SiteRoot, "ck-1"))
            .await
            .unwrap();
        assert_eq!(
            decision,
            DispatchDecision::Enqueue {
                task: TaskKind::SyncSharepointDelta,
                delta_token: Some("token-abc".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn redelivery_of_same_change_key_is_duplicate() {
        let processor = WebhookProcessor::new(FakeStore::new());
        let n = notification(SubscriptionScope::SiteRoot, "ck-1");
        processor.process(&n).await.unwrap();
        let second = processor.process(&n).await.unwrap();
        assert_eq!(second, DispatchDecision::Duplicate);
    }

    #[tokio::test]
    async fn file_subscription_filters_mismatched_item() {
        let processor = WebhookProcessor::new(FakeStore::new());
        let mut n = notification(SubscriptionScope::File, "ck-2");
        n.notified_item_id = Some("item-2".to_string());
        let decision = processor.process(&n).await.unwrap();
        assert_eq!(decision, DispatchDecision::OutOfScope);
    }

    #[tokio::test]
    async fn no_delta_token_pulls_full_content() {
        let processor = WebhookProcessor::new(FakeStore::new());
        let mut n = notification(SubscriptionScope::Folder, "ck-3");
        n.delta_token = None;
        let decision = processor.process(&n).await.unwrap();
        assert_eq!(
            decision,
            DispatchDecision::Enqueue {
                task: TaskKind::PullSharepointContent,
                delta_token: None,
            }
        );
    }
}
