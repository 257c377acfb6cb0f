//! Where caregiver and notification data comes from
//!
//! The backend is the normal source. A fixed fixture table stands in for it
//! either permanently ([`DataSourceMode::Static`]) or only while the backend
//! cannot be reached ([`DataSourceMode::RemoteWithFallback`]).

use std::future::Future;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use strum_macros::{AsRefStr, Display};

use super::caregivers::CaregiverFilter;
use super::notifications::NotificationPage;
use super::{acknowledgement, extract_item, extract_list, listed_total, segment};
use crate::api::{ApiClient, ApiError};
use crate::models::{Acknowledgement, Caregiver, Notification};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DataSourceMode {
    /// Backend only; every failure reaches the caller
    Remote,
    /// Backend, with fixtures while it is unreachable
    #[default]
    RemoteWithFallback,
    /// Fixtures only, no network
    Static,
}

impl DataSourceMode {
    pub fn build(&self, client: &ApiClient) -> Arc<dyn CareDataSource> {
        match self {
            DataSourceMode::Remote => Arc::new(RemoteSource::new(client.clone())),
            DataSourceMode::RemoteWithFallback => Arc::new(FallbackSource {
                remote: Arc::new(RemoteSource::new(client.clone())),
                fixtures: StaticSource::new(),
            }),
            DataSourceMode::Static => Arc::new(StaticSource::new()),
        }
    }
}

#[async_trait::async_trait]
pub trait CareDataSource: Send + Sync {
    /// Caregivers matching the filter's location and availability
    async fn search_caregivers(&self, filter: &CaregiverFilter)
    -> Result<Vec<Caregiver>, ApiError>;

    async fn caregiver(&self, id: &str) -> Result<Caregiver, ApiError>;

    async fn notifications(&self, page: u32, limit: u32) -> Result<NotificationPage, ApiError>;

    async fn unread_count(&self) -> Result<u32, ApiError>;

    async fn mark_read(&self, id: &str) -> Result<Acknowledgement, ApiError>;

    async fn mark_all_read(&self) -> Result<Acknowledgement, ApiError>;
}

/// The CareConnect backend
pub struct RemoteSource {
    client: ApiClient,
}

impl RemoteSource {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct UnreadCount {
    #[serde(default)]
    count: u32,
}

#[async_trait::async_trait]
impl CareDataSource for RemoteSource {
    async fn search_caregivers(
        &self,
        filter: &CaregiverFilter,
    ) -> Result<Vec<Caregiver>, ApiError> {
        let query = filter.query();
        let path = if query.is_empty() {
            "/user/caregivers".to_string()
        } else {
            format!("/user/caregivers?{query}")
        };
        let body = self.client.get_value(&path).await?;
        extract_list(body, &["caregivers"])
    }

    async fn caregiver(&self, id: &str) -> Result<Caregiver, ApiError> {
        let body = self
            .client
            .get_value(&format!("/user/caregivers/{}", segment(id)))
            .await?;
        extract_item(body, &["caregiver"])
    }

    async fn notifications(&self, page: u32, limit: u32) -> Result<NotificationPage, ApiError> {
        let body = self
            .client
            .get_value(&format!("/notifications?page={page}&limit={limit}"))
            .await?;
        let total = |len| listed_total(&body, len);
        let notifications: Vec<Notification> = extract_list(body.clone(), &["notifications"])?;
        Ok(NotificationPage {
            total: total(notifications.len()),
            notifications,
            page,
            limit,
        })
    }

    async fn unread_count(&self) -> Result<u32, ApiError> {
        let count: UnreadCount = self.client.get("/notifications/unread-count").await?;
        Ok(count.count)
    }

    async fn mark_read(&self, id: &str) -> Result<Acknowledgement, ApiError> {
        let body = self
            .client
            .put_value(&format!("/notifications/{}/read", segment(id)), &json!({}))
            .await?;
        acknowledgement(body, "Notification marked as read")
    }

    async fn mark_all_read(&self) -> Result<Acknowledgement, ApiError> {
        let body = self
            .client
            .put_value("/notifications/read-all", &json!({}))
            .await?;
        acknowledgement(body, "All notifications marked as read")
    }
}

/// Fixed fixture tables, used when no backend is available
pub struct StaticSource {
    caregivers: Vec<Caregiver>,
    notifications: Vec<Notification>,
}

impl Default for StaticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticSource {
    pub fn new() -> Self {
        Self {
            caregivers: fixture_caregivers(),
            notifications: fixture_notifications(),
        }
    }
}

#[async_trait::async_trait]
impl CareDataSource for StaticSource {
    async fn search_caregivers(
        &self,
        filter: &CaregiverFilter,
    ) -> Result<Vec<Caregiver>, ApiError> {
        let location = filter
            .location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_lowercase);

        Ok(self
            .caregivers
            .iter()
            .filter(|c| match &location {
                Some(needle) => c
                    .location
                    .as_deref()
                    .is_some_and(|l| l.to_lowercase().contains(needle)),
                None => true,
            })
            .filter(|c| filter.matches_name(c))
            .cloned()
            .collect())
    }

    async fn caregiver(&self, id: &str) -> Result<Caregiver, ApiError> {
        self.caregivers
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound {
                message: Some(format!("Caregiver {id} not found")),
            })
    }

    async fn notifications(&self, page: u32, limit: u32) -> Result<NotificationPage, ApiError> {
        Ok(NotificationPage {
            notifications: self.notifications.clone(),
            total: self.notifications.len() as u64,
            page,
            limit,
        })
    }

    async fn unread_count(&self) -> Result<u32, ApiError> {
        Ok(self.notifications.iter().filter(|n| !n.read).count() as u32)
    }

    async fn mark_read(&self, _id: &str) -> Result<Acknowledgement, ApiError> {
        Ok(Acknowledgement::new("Notification marked as read"))
    }

    async fn mark_all_read(&self) -> Result<Acknowledgement, ApiError> {
        Ok(Acknowledgement::new("All notifications marked as read"))
    }
}

/// Backend first; fixtures only when the backend is unreachable
struct FallbackSource {
    remote: Arc<dyn CareDataSource>,
    fixtures: StaticSource,
}

impl FallbackSource {
    async fn degrade<T, F>(
        &self,
        operation: &str,
        remote: Result<T, ApiError>,
        fixture: F,
    ) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        match remote {
            Err(e) if e.is_unavailable() => {
                tracing::warn!("Backend unavailable ({}), serving fixture data for {}", e, operation);
                fixture.await
            }
            other => other,
        }
    }
}

#[async_trait::async_trait]
impl CareDataSource for FallbackSource {
    async fn search_caregivers(
        &self,
        filter: &CaregiverFilter,
    ) -> Result<Vec<Caregiver>, ApiError> {
        let remote = self.remote.search_caregivers(filter).await;
        self.degrade("caregiver search", remote, self.fixtures.search_caregivers(filter))
            .await
    }

    async fn caregiver(&self, id: &str) -> Result<Caregiver, ApiError> {
        let remote = self.remote.caregiver(id).await;
        self.degrade("caregiver lookup", remote, self.fixtures.caregiver(id))
            .await
    }

    async fn notifications(&self, page: u32, limit: u32) -> Result<NotificationPage, ApiError> {
        let remote = self.remote.notifications(page, limit).await;
        self.degrade("notifications", remote, self.fixtures.notifications(page, limit))
            .await
    }

    async fn unread_count(&self) -> Result<u32, ApiError> {
        let remote = self.remote.unread_count().await;
        self.degrade("unread count", remote, self.fixtures.unread_count())
            .await
    }

    async fn mark_read(&self, id: &str) -> Result<Acknowledgement, ApiError> {
        let remote = self.remote.mark_read(id).await;
        self.degrade("mark read", remote, self.fixtures.mark_read(id))
            .await
    }

    async fn mark_all_read(&self) -> Result<Acknowledgement, ApiError> {
        let remote = self.remote.mark_all_read().await;
        self.degrade("mark all read", remote, self.fixtures.mark_all_read())
            .await
    }
}

fn fixture_caregivers() -> Vec<Caregiver> {
    let table = json!([
        {
            "_id": "687e8096655057cea853fae8",
            "name": "Caregiver John",
            "email": "care@example.com",
            "role": "caregiver",
            "location": "Lagos",
            "availability": ["morning"],
            "isVerified": true,
            "rating": 4.8,
            "experience": 6,
            "hourlyRate": 25,
            "bio": "Experienced caregiver with 6 years in senior care. Specialized in medication management and companionship."
        },
        {
            "_id": "687e8405655057cea853faec",
            "name": "Caregiver Otani",
            "email": "careotani@example.com",
            "role": "caregiver",
            "location": "Lagos",
            "availability": ["afternoon"],
            "isVerified": true,
            "rating": 4.9,
            "experience": 8,
            "hourlyRate": 30,
            "bio": "Registered nurse with 8+ years experience. Specialized in dementia and Alzheimer's care."
        },
        {
            "_id": "687e9457aeacb71f44f041b5",
            "name": "Grace Johnson",
            "email": "careirom@example.com",
            "role": "caregiver",
            "location": "Lagos, Nigeria",
            "availability": ["afternoon"],
            "isVerified": true,
            "rating": 4.7,
            "experience": 5,
            "hourlyRate": 28,
            "bio": "Compassionate caregiver with 5 years experience. Passionate about providing culturally sensitive care."
        },
        {
            "_id": "68894e10ec21ff7710e211fe",
            "name": "Einstein Nnamah",
            "email": "e.nnamah@alustudent.com",
            "role": "caregiver",
            "location": "Kigali, Rwanda",
            "availability": [],
            "isVerified": true,
            "rating": 4.9,
            "experience": 9,
            "hourlyRate": 32,
            "bio": "Senior caregiver with 9 years experience. Expert in palliative care and end-of-life support."
        },
        {
            "_id": "688a943d761b205be8cc3624",
            "name": "Kemi Shola",
            "email": "kemi.shola@example.com",
            "role": "caregiver",
            "location": "Lagos",
            "availability": ["Afternoon (12PM-5PM)", "Early Morning (6AM-9AM)"],
            "isVerified": true,
            "rating": 4.6,
            "experience": 7,
            "hourlyRate": 26,
            "bio": "Dedicated caregiver with 7 years experience. Specialized in physical therapy and mobility assistance."
        }
    ]);
    from_fixture(table)
}

fn fixture_notifications() -> Vec<Notification> {
    let hours_ago = |h: i64| (chrono::Utc::now() - chrono::Duration::hours(h)).to_rfc3339();
    let table = json!([
        {
            "_id": "notif-1",
            "title": "Session Confirmed",
            "message": "Your session has been confirmed for tomorrow at 10 AM",
            "type": "session",
            "read": false,
            "createdAt": hours_ago(2)
        },
        {
            "_id": "notif-2",
            "title": "New Message",
            "message": "You have a new message from your caregiver",
            "type": "message",
            "read": false,
            "createdAt": hours_ago(4)
        },
        {
            "_id": "notif-3",
            "title": "Review Received",
            "message": "You received a 5-star review from your recent session",
            "type": "review",
            "read": true,
            "createdAt": hours_ago(6)
        }
    ]);
    from_fixture(table)
}

fn from_fixture<T: serde::de::DeserializeOwned>(table: Value) -> Vec<T> {
    serde_json::from_value(table).unwrap_or_else(|e| {
        tracing::error!("Fixture table does not match its record type: {}", e);
        Vec::new()
    })
}
