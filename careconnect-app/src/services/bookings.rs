//! Care sessions between a senior and a caregiver
//!
//! The backend calls bookings "sessions"; every endpoint lives under
//! `/session`.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{extract_item, extract_list, listed_total, segment};
use crate::api::{ApiClient, ApiError};
use crate::auth::SessionHandle;
use crate::models::{Booking, BookingStatus, BookingUpdate, NewBooking};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("User not authenticated")]
    NotAuthenticated,
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingPage {
    pub sessions: Vec<Booking>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

/// Response to a lifecycle action: a message and usually the updated booking
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, alias = "data", skip_serializing_if = "Option::is_none")]
    pub session: Option<Booking>,
}

/// Body for `/session/request` and direct `/session` creation
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestBody<'a> {
    senior_id: &'a str,
    caregiver_id: &'a str,
    appointment_date: &'a str,
    time: &'a str,
    duration: f64,
    purpose: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<BookingStatus>,
}

impl<'a> RequestBody<'a> {
    fn new(senior_id: &'a str, booking: &'a NewBooking) -> Self {
        Self {
            senior_id,
            caregiver_id: &booking.caregiver_id,
            appointment_date: &booking.date,
            time: &booking.time,
            duration: booking.duration,
            purpose: &booking.purpose,
            notes: booking.notes.as_deref(),
            status: None,
        }
    }
}

#[derive(Clone)]
pub struct BookingService {
    client: ApiClient,
    handle: SessionHandle,
}

impl BookingService {
    pub fn new(client: ApiClient, handle: SessionHandle) -> Self {
        Self { client, handle }
    }

    fn senior_id(&self) -> Result<String, BookingError> {
        self.handle
            .identity()
            .map(|user| user.id)
            .ok_or(BookingError::NotAuthenticated)
    }

    /// Bookings of the signed-in user, newest page first as the backend orders them
    pub async fn list(
        &self,
        status: Option<BookingStatus>,
        page: u32,
        limit: u32,
    ) -> Result<BookingPage, BookingError> {
        let senior_id = self.senior_id()?;

        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("seniorId", &senior_id);
        if let Some(status) = status {
            query.append_pair("status", status.as_ref());
        }
        query.append_pair("page", &page.to_string());
        query.append_pair("limit", &limit.to_string());

        let body = self
            .client
            .get_value(&format!("/session?{}", query.finish()))
            .await?;
        let total = |len| listed_total(&body, len);
        let sessions: Vec<Booking> = extract_list(body.clone(), &["sessions", "data"])?;

        Ok(BookingPage {
            total: total(sessions.len()),
            sessions,
            page,
            limit,
        })
    }

    pub async fn get(&self, id: &str) -> Result<Booking, ApiError> {
        let body = self.client.get_value(&format!("/session/{}", segment(id))).await?;
        extract_item(body, &["session", "data"])
    }

    pub async fn update(&self, id: &str, update: &BookingUpdate) -> Result<Booking, ApiError> {
        let body = self
            .client
            .put_value(&format!("/session/{}", segment(id)), update)
            .await?;
        extract_item(body, &["session", "data"])
    }

    pub async fn accept(&self, id: &str) -> Result<BookingOutcome, ApiError> {
        self.act(id, "accept", json!({})).await
    }

    pub async fn decline(&self, id: &str, reason: Option<&str>) -> Result<BookingOutcome, ApiError> {
        self.act(id, "decline", optional("reason", reason)).await
    }

    pub async fn cancel(&self, id: &str, reason: Option<&str>) -> Result<BookingOutcome, ApiError> {
        self.act(id, "cancel", optional("reason", reason)).await
    }

    pub async fn complete(&self, id: &str, notes: Option<&str>) -> Result<BookingOutcome, ApiError> {
        self.act(id, "complete", optional("notes", notes)).await
    }

    pub async fn reschedule(
        &self,
        id: &str,
        date: &str,
        time: &str,
    ) -> Result<BookingOutcome, ApiError> {
        self.act(id, "reschedule", json!({ "newDate": date, "newTime": time }))
            .await
    }

    async fn act(
        &self,
        id: &str,
        action: &str,
        body: serde_json::Value,
    ) -> Result<BookingOutcome, ApiError> {
        let response = self
            .client
            .put_value(&format!("/session/{}/{action}", segment(id)), &body)
            .await?;
        tracing::info!("Session {} {}", id, action);
        parse_outcome(response)
    }

    /// Create a booking directly, bypassing the request flow
    pub async fn create(&self, booking: &NewBooking) -> Result<BookingOutcome, ApiError> {
        let response = self.client.post_value("/session", booking).await?;
        parse_outcome(response)
    }

    /// Ask a caregiver for a session on behalf of the signed-in senior
    ///
    /// Backends without `/session/request` get one direct `POST /session`
    /// with status `pending` instead.
    pub async fn request(&self, booking: &NewBooking) -> Result<BookingOutcome, BookingError> {
        let senior_id = self.senior_id()?;
        let body = RequestBody::new(&senior_id, booking);

        let response = match self.client.post_value("/session/request", &body).await {
            Err(ApiError::NotFound { .. }) => {
                tracing::info!("No session request endpoint, creating session directly");
                let direct = RequestBody {
                    status: Some(BookingStatus::Pending),
                    ..body
                };
                self.client.post_value("/session", &direct).await?
            }
            other => other?,
        };

        let outcome = parse_outcome(response)?;
        if let Some(booked_for) = outcome.session.as_ref().and_then(|s| s.senior_id.as_deref()) {
            if booked_for != senior_id {
                tracing::warn!(
                    "Session created for {} but requested by {}",
                    booked_for,
                    senior_id
                );
            }
        }
        Ok(outcome)
    }
}

/// `{ key: value }`, or `{}` when there is no value
fn optional(key: &str, value: Option<&str>) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    if let Some(value) = value {
        body.insert(key.to_string(), json!(value));
    }
    serde_json::Value::Object(body)
}

fn parse_outcome(body: serde_json::Value) -> Result<BookingOutcome, ApiError> {
    if body.is_null() {
        return Ok(BookingOutcome::default());
    }
    serde_json::from_value(body).map_err(ApiError::invalid_body)
}
