//! Resource services layered on the request pipeline
//!
//! Each service owns a clone of the [`ApiClient`] and turns backend responses
//! into typed records. Caregiver and notification reads go through the
//! configured [`CareDataSource`].

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::api::{ApiClient, ApiError};
use crate::auth::SessionHandle;
use crate::models::Acknowledgement;

pub mod bookings;
pub mod caregivers;
pub mod dashboard;
pub mod messages;
pub mod notifications;
pub mod profile;
pub mod source;

pub use bookings::{BookingError, BookingOutcome, BookingPage, BookingService};
pub use caregivers::{CaregiverFilter, CaregiverPage, CaregiverService};
pub use dashboard::DashboardSummary;
pub use messages::MessageService;
pub use notifications::{NotificationPage, NotificationService};
pub use profile::{PictureUpload, ProfileError, ProfileService};
pub use source::{CareDataSource, DataSourceMode, RemoteSource, StaticSource};

/// Every service, wired to one client and one session
#[derive(Clone)]
pub struct Services {
    pub profile: ProfileService,
    pub caregivers: CaregiverService,
    pub bookings: BookingService,
    pub messages: MessageService,
    pub notifications: NotificationService,
}

impl Services {
    pub fn new(client: &ApiClient, handle: &SessionHandle, mode: DataSourceMode) -> Self {
        let source = mode.build(client);
        tracing::debug!("Using {} data source", mode);
        Self {
            profile: ProfileService::new(client.clone()),
            caregivers: CaregiverService::new(client.clone(), source.clone()),
            bookings: BookingService::new(client.clone(), handle.clone()),
            messages: MessageService::new(client.clone()),
            notifications: NotificationService::new(source),
        }
    }
}

/// Items from `{ "<key>": [...] }` for the first key present, or a bare array
pub(crate) fn extract_list<T: DeserializeOwned>(
    mut value: Value,
    keys: &[&str],
) -> Result<Vec<T>, ApiError> {
    let list = keys
        .iter()
        .find_map(|key| value.get_mut(*key).filter(|v| v.is_array()).map(Value::take))
        .unwrap_or(value);
    match list {
        Value::Null => Ok(Vec::new()),
        list => serde_json::from_value(list).map_err(ApiError::invalid_body),
    }
}

/// Record from `{ "<key>": {...} }` for the first key holding an object, or
/// the bare body
pub(crate) fn extract_item<T: DeserializeOwned>(
    mut value: Value,
    keys: &[&str],
) -> Result<T, ApiError> {
    let item = keys
        .iter()
        .find_map(|key| value.get_mut(*key).filter(|v| v.is_object()).map(Value::take))
        .unwrap_or(value);
    serde_json::from_value(item).map_err(ApiError::invalid_body)
}

/// `{ "message": ... }`, or `fallback` when the body was empty
pub(crate) fn acknowledgement(value: Value, fallback: &str) -> Result<Acknowledgement, ApiError> {
    match value {
        Value::Null => Ok(Acknowledgement::new(fallback)),
        value => serde_json::from_value(value).map_err(ApiError::invalid_body),
    }
}

/// Percent-encode `id` for use as one path segment
pub(crate) fn segment(id: &str) -> String {
    // byte_serialize already escapes a literal `+`
    url::form_urlencoded::byte_serialize(id.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// `total` or `count` from a listing body, else `len`
pub(crate) fn listed_total(value: &Value, len: usize) -> u64 {
    ["total", "count"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_u64).filter(|n| *n > 0))
        .unwrap_or(len as u64)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::Notification;

    #[test]
    fn test_segment_escapes_separators() {
        assert_eq!(segment("687e8009655057cea853fae5"), "687e8009655057cea853fae5");
        assert_eq!(segment("a/b?c#d"), "a%2Fb%3Fc%23d");
        assert_eq!(segment("x y+z"), "x%20y%2Bz");
    }

    #[test]
    fn test_extract_list_shapes() {
        let wrapped: Vec<u32> =
            extract_list(json!({"sessions": [1, 2]}), &["sessions", "data"]).unwrap();
        let data: Vec<u32> = extract_list(json!({"data": [3]}), &["sessions", "data"]).unwrap();
        let bare: Vec<u32> = extract_list(json!([4, 5, 6]), &["sessions"]).unwrap();
        let empty: Vec<u32> = extract_list(Value::Null, &["sessions"]).unwrap();

        assert_eq!(wrapped, vec![1, 2]);
        assert_eq!(data, vec![3]);
        assert_eq!(bare, vec![4, 5, 6]);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_extract_list_rejects_objects() {
        let err = extract_list::<Notification>(json!({"total": 2}), &["notifications"]).unwrap_err();
        assert!(matches!(err, ApiError::Unknown(_)));
    }

    #[test]
    fn test_extract_item_skips_string_message() {
        let ack: Acknowledgement =
            extract_item(json!({"message": "sent"}), &["message", "data"]).unwrap();
        assert_eq!(ack.message, "sent");

        let inner: Acknowledgement =
            extract_item(json!({"data": {"message": "inner"}}), &["data"]).unwrap();
        assert_eq!(inner.message, "inner");
    }

    #[test]
    fn test_listed_total() {
        assert_eq!(listed_total(&json!({"total": 7}), 2), 7);
        assert_eq!(listed_total(&json!({"count": 3}), 2), 3);
        assert_eq!(listed_total(&json!({"total": 0}), 2), 2);
        assert_eq!(listed_total(&json!([]), 4), 4);
    }

    #[test]
    fn test_acknowledgement_fallback() {
        assert_eq!(
            acknowledgement(Value::Null, "done").unwrap(),
            Acknowledgement::new("done")
        );
        assert_eq!(
            acknowledgement(json!({"message": "ok"}), "done").unwrap().message,
            "ok"
        );
    }
}
