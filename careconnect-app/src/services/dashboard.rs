use serde::Serialize;

use super::bookings::{BookingError, BookingService};
use super::notifications::NotificationService;
use crate::models::{Booking, BookingStatus};

const UPCOMING_SHOWN: usize = 5;
const BOOKINGS_SCANNED: u32 = 100;

/// Overview shown on the home screen
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub total_sessions: usize,
    pub completed_sessions: usize,
    pub unread_notifications: u32,
    /// Soonest first
    pub upcoming: Vec<Booking>,
}

impl DashboardSummary {
    /// Bookings and unread count are fetched concurrently; a failed unread
    /// count shows as zero rather than failing the whole dashboard
    pub async fn load(
        bookings: &BookingService,
        notifications: &NotificationService,
    ) -> Result<Self, BookingError> {
        let (sessions, unread) = futures_util::future::join(
            bookings.list(None, 1, BOOKINGS_SCANNED),
            notifications.unread_count(),
        )
        .await;

        let unread_notifications = unread.unwrap_or_else(|e| {
            tracing::warn!("Unread count unavailable: {}", e);
            0
        });
        Ok(Self::summarise(sessions?.sessions, unread_notifications))
    }

    fn summarise(sessions: Vec<Booking>, unread_notifications: u32) -> Self {
        let completed_sessions = sessions
            .iter()
            .filter(|s| s.status == BookingStatus::Completed)
            .count();

        let mut upcoming: Vec<Booking> = sessions
            .iter()
            .filter(|s| s.status.is_upcoming())
            .cloned()
            .collect();
        // undated bookings sort last
        upcoming.sort_by_key(|s| (s.scheduled_on().is_none(), s.scheduled_on()));
        upcoming.truncate(UPCOMING_SHOWN);

        Self {
            total_sessions: sessions.len(),
            completed_sessions,
            unread_notifications,
            upcoming,
        }
    }
}
