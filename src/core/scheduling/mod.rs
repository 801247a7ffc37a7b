//! Appointment scheduling.
//!
//! The tool dispatcher only sees the [`Scheduler`] trait. The production
//! implementation is [`CalendarScheduler`] over a [`GoogleCalendarBackend`],
//! authorized through [`GoogleOAuth`].
//!
//! # Business rules
//!
//! - Working hours Monday to Friday, 09:00 to 18:00, lunch 13:00 to 14:00
//! - Appointments last 120 minutes and must end by 18:00
//! - Candidate start times every 30 minutes, never in the past

mod calendar;
mod google;
mod oauth;

pub use calendar::{
    BusyInterval, CalendarBackend, CalendarEvent, CalendarScheduler, EventDateTime,
    EventReminder, EventReminders, InsertedEvent, ParsedRequest, Period, SLOT_DURATION_MINUTES,
    parse_request,
};
pub use google::{GOOGLE_CALENDAR_API_URL, GoogleCalendarBackend};
pub use oauth::{
    CALENDAR_SCOPE, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL, GoogleOAuth, GoogleOAuthConfig,
    NOT_CONNECTED_MESSAGE,
};

use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by the scheduling layer.
#[derive(Debug, Error)]
pub enum SchedulingError {
    /// No calendar credentials are available yet
    #[error("Google Calendar is not connected: {0}")]
    NotAuthorized(String),

    /// OAuth client settings are missing
    #[error("Scheduling not configured: {0}")]
    NotConfigured(String),

    /// The calendar or token endpoint could not be reached or refused the call
    #[error("HTTP error: {0}")]
    Http(String),

    /// The endpoint answered with something unexpected
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Caller-provided values could not be used
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A local date and time that does not exist, or exists twice, in the calendar time zone
    #[error("No unique time zone mapping for {0}")]
    InvalidLocalTime(String),
}

impl From<reqwest::Error> for SchedulingError {
    fn from(err: reqwest::Error) -> Self {
        SchedulingError::Http(err.to_string())
    }
}

/// Result type for scheduling operations.
pub type SchedulingResult<T> = Result<T, SchedulingError>;

/// One bookable slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slot {
    /// Slot start, RFC 3339 with offset
    pub start: String,
    /// Slot end, RFC 3339 with offset
    pub end: String,
    /// Local date, `YYYY-MM-DD`
    pub date: String,
    /// Local start time, `HH:MM`
    pub time: String,
}

/// Outcome of an availability request, serialized verbatim as the tool result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Availability {
    /// The earliest free slot in the search horizon
    FirstAvailable { slot: Slot, message: String },
    /// Free slots on the first matching day
    SlotsFound {
        date: String,
        slots: Vec<Slot>,
        message: String,
    },
    /// Nothing free
    NoSlots { message: String },
}

/// A booking request in the calendar's local time.
#[derive(Debug, Clone)]
pub struct AppointmentRequest {
    pub start: DateTime<Tz>,
    pub customer_name: String,
    pub customer_phone: String,
    pub notes: String,
}

/// Local date and time of a booked slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotLabel {
    pub date: String,
    pub time: String,
}

/// Result of a successful booking.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentConfirmation {
    pub success: bool,
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
    pub slot: SlotLabel,
}

/// The scheduling capability consumed by the tool dispatcher.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Answer a natural-language availability request.
    async fn find_available_slots(&self, request: &str) -> SchedulingResult<Availability>;

    /// Book an appointment.
    async fn create_appointment(
        &self,
        request: AppointmentRequest,
    ) -> SchedulingResult<AppointmentConfirmation>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_availability_wire_shape() {
        let no_slots = Availability::NoSlots {
            message: "Nessuno slot".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&no_slots).unwrap(),
            json!({"type": "no_slots", "message": "Nessuno slot"})
        );

        let first = Availability::FirstAvailable {
            slot: Slot {
                start: "2025-03-10T09:00:00+01:00".to_string(),
                end: "2025-03-10T11:00:00+01:00".to_string(),
                date: "2025-03-10".to_string(),
                time: "09:00".to_string(),
            },
            message: "ok".to_string(),
        };
        let value = serde_json::to_value(&first).unwrap();
        assert_eq!(value["type"], "first_available");
        assert_eq!(value["slot"]["time"], "09:00");
    }

    #[test]
    fn test_confirmation_wire_shape() {
        let confirmation = AppointmentConfirmation {
            success: true,
            event_id: "evt1".to_string(),
            html_link: None,
            slot: SlotLabel {
                date: "2025-03-10".to_string(),
                time: "09:00".to_string(),
            },
        };
        assert_eq!(
            serde_json::to_value(&confirmation).unwrap(),
            json!({"success": true, "eventId": "evt1", "slot": {"date": "2025-03-10", "time": "09:00"}})
        );
    }
}
