use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::source::CareDataSource;
use crate::api::ApiError;
use crate::models::{Acknowledgement, Notification};

pub const DEFAULT_LIMIT: u32 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl NotificationPage {
    pub fn unread(&self) -> impl Iterator<Item = &Notification> {
        self.notifications.iter().filter(|n| !n.read)
    }
}

#[derive(Clone)]
pub struct NotificationService {
    source: Arc<dyn CareDataSource>,
}

impl NotificationService {
    pub fn new(source: Arc<dyn CareDataSource>) -> Self {
        Self { source }
    }

    pub async fn list(&self, page: u32, limit: u32) -> Result<NotificationPage, ApiError> {
        self.source.notifications(page.max(1), limit.max(1)).await
    }

    pub async fn mark_read(&self, id: &str) -> Result<Acknowledgement, ApiError> {
        self.source.mark_read(id).await
    }

    pub async fn mark_all_read(&self) -> Result<Acknowledgement, ApiError> {
        self.source.mark_all_read().await
    }

    pub async fn unread_count(&self) -> Result<u32, ApiError> {
        self.source.unread_count().await
    }
}
