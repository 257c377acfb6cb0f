use std::sync::Arc;

use serde::Serialize;

use super::source::CareDataSource;
use super::{extract_item, extract_list, segment};
use crate::api::{ApiClient, ApiError};
use crate::models::{Caregiver, NewReview, Review};

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_LIMIT: u32 = 50;

/// Caregiver search criteria
///
/// Location, availability and paging go to the backend. The name filter is
/// applied locally since the backend does not support it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaregiverFilter {
    pub location: Option<String>,
    pub availability: Vec<String>,
    pub name: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl CaregiverFilter {
    /// Query string for the backend, without the leading `?`
    pub fn query(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        if let Some(location) = self.location.as_deref().filter(|l| !l.is_empty()) {
            query.append_pair("location", location);
        }
        if !self.availability.is_empty() {
            query.append_pair("availability", &self.availability.join(","));
        }
        if let Some(page) = self.page.filter(|p| *p > 0) {
            query.append_pair("page", &page.to_string());
        }
        if let Some(limit) = self.limit.filter(|l| *l > 0) {
            query.append_pair("limit", &limit.to_string());
        }
        query.finish()
    }

    fn name_needle(&self) -> Option<String> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_lowercase)
    }

    /// Case-insensitive substring match on the caregiver's name
    pub fn matches_name(&self, caregiver: &Caregiver) -> bool {
        match self.name_needle() {
            Some(needle) => caregiver.name.to_lowercase().contains(&needle),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaregiverPage {
    pub caregivers: Vec<Caregiver>,
    /// Count after the name filter
    pub total: usize,
    pub page: u32,
    pub limit: u32,
}

#[derive(Clone)]
pub struct CaregiverService {
    client: ApiClient,
    source: Arc<dyn CareDataSource>,
}

impl CaregiverService {
    pub fn new(client: ApiClient, source: Arc<dyn CareDataSource>) -> Self {
        Self { client, source }
    }

    pub async fn search(&self, filter: &CaregiverFilter) -> Result<CaregiverPage, ApiError> {
        let caregivers: Vec<Caregiver> = self
            .source
            .search_caregivers(filter)
            .await?
            .into_iter()
            .filter(|c| filter.matches_name(c))
            .collect();

        tracing::debug!("Caregiver search matched {}", caregivers.len());
        Ok(CaregiverPage {
            total: caregivers.len(),
            caregivers,
            page: filter.page.filter(|p| *p > 0).unwrap_or(DEFAULT_PAGE),
            limit: filter.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LIMIT),
        })
    }

    pub async fn get(&self, id: &str) -> Result<Caregiver, ApiError> {
        self.source.caregiver(id).await
    }

    pub async fn reviews(&self, id: &str, page: u32, limit: u32) -> Result<Vec<Review>, ApiError> {
        let body = self
            .client
            .get_value(&format!(
                "/caregivers/{}/reviews?page={page}&limit={limit}",
                segment(id)
            ))
            .await?;
        extract_list(body, &["reviews", "data"])
    }

    pub async fn add_review(&self, id: &str, review: &NewReview) -> Result<Review, ApiError> {
        let body = self
            .client
            .post_value(&format!("/caregivers/{}/reviews", segment(id)), review)
            .await?;
        extract_item(body, &["review", "data"])
    }
}
