use uuid::Uuid;

/// What a subscription was scoped to when it was created. Determines how
/// a notification against that subscription gets filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionScope {
    SiteRoot,
    Folder,
    File,
}

/// One raw webhook delivery, already authenticated (`clientState` checked)
/// by the caller.
#[derive(Debug, Clone)]
pub struct Notification {
    pub tenant_id: Uuid,
    pub drive_id: String,
    pub subscription_scope: SubscriptionScope,
    /// The item the subscription was created against, if scoped narrower
    /// than site-root.
    pub subscribed_item_id: Option<String>,
    /// The item the notification actually names, if SharePoint included
    /// one. Absent for some folder/site-root deliveries.
    pub notified_item_id: Option<String>,
    pub change_key: String,
    pub delta_token: Option<String>,
}

impl Notification {
    /// Whether this notification is in scope for the subscription it
    /// arrived on, independent of deduplication.
    pub fn in_scope(&self) -> bool {
        match self.subscription_scope {
            SubscriptionScope::SiteRoot | SubscriptionScope::Folder => true,
            SubscriptionScope::File => match (&self.subscribed_item_id, &self.notified_item_id) {
                (Some(subscribed), Some(notified)) => subscribed == notified,
                // No id on the notification: queue anyway, let delta sync
                // no-op if it turns out to be unaffected.
                (Some(_), None) => true,
                _ => true,
            },
        }
    }
}
