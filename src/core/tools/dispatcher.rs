//! Tool dispatch.
//!
//! Every failure is turned into an `{"error": "..."}` value so the
//! conversation can continue; nothing here returns `Err`.

use std::sync::Arc;

use chrono::{LocalResult, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::definitions::{BOOK_APPOINTMENT, FIND_AVAILABLE_SLOTS};
use crate::core::scheduling::{AppointmentRequest, Scheduler, SchedulingError};

/// A function call requested by the assistant.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    /// Raw JSON argument string as sent by the model
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
struct FindSlotsArgs {
    request: String,
}

#[derive(Debug, Deserialize)]
struct BookArgs {
    date: String,
    time: String,
    customer_name: String,
    #[serde(default)]
    customer_phone: String,
    #[serde(default)]
    address: String,
}

/// Routes tool calls to the scheduling collaborator.
#[derive(Clone)]
pub struct ToolDispatcher {
    scheduler: Arc<dyn Scheduler>,
    timezone: Tz,
}

impl ToolDispatcher {
    pub fn new(scheduler: Arc<dyn Scheduler>, timezone: Tz) -> Self {
        Self {
            scheduler,
            timezone,
        }
    }

    /// Run an invocation and serialize its result for the conversation.
    pub async fn run(&self, invocation: &ToolInvocation) -> String {
        info!(
            call_id = %invocation.call_id,
            tool = %invocation.name,
            "Dispatching tool call"
        );
        self.dispatch(&invocation.name, &invocation.arguments)
            .await
            .to_string()
    }

    /// Execute tool `name` with its JSON `arguments`.
    pub async fn dispatch(&self, name: &str, arguments: &str) -> Value {
        let result = match name {
            FIND_AVAILABLE_SLOTS => self.find_available_slots(arguments).await,
            BOOK_APPOINTMENT => self.book_appointment(arguments).await,
            other => Err(format!("Unknown tool: {other}")),
        };

        result.unwrap_or_else(|message| {
            warn!(tool = %name, error = %message, "Tool call failed");
            json!({ "error": message })
        })
    }

    async fn find_available_slots(&self, arguments: &str) -> Result<Value, String> {
        let args: FindSlotsArgs = parse_arguments(arguments)?;
        let availability = self
            .scheduler
            .find_available_slots(&args.request)
            .await
            .map_err(describe)?;
        serde_json::to_value(availability).map_err(|e| e.to_string())
    }

    async fn book_appointment(&self, arguments: &str) -> Result<Value, String> {
        let args: BookArgs = parse_arguments(arguments)?;

        let date = NaiveDate::parse_from_str(args.date.trim(), "%Y-%m-%d")
            .map_err(|_| format!("Invalid date '{}', expected YYYY-MM-DD", args.date))?;
        let time = NaiveTime::parse_from_str(args.time.trim(), "%H:%M")
            .map_err(|_| format!("Invalid time '{}', expected HH:MM", args.time))?;

        let local = date.and_time(time);
        let start = match self.timezone.from_local_datetime(&local) {
            LocalResult::Single(start) => start,
            LocalResult::Ambiguous(..) => {
                return Err(format!(
                    "{local} is ambiguous in {}",
                    self.timezone.name()
                ));
            }
            LocalResult::None => {
                return Err(format!(
                    "{local} does not exist in {}",
                    self.timezone.name()
                ));
            }
        };

        let confirmation = self
            .scheduler
            .create_appointment(AppointmentRequest {
                start,
                customer_name: args.customer_name,
                customer_phone: args.customer_phone,
                notes: args.address,
            })
            .await
            .map_err(describe)?;
        serde_json::to_value(confirmation).map_err(|e| e.to_string())
    }
}

fn parse_arguments<T: for<'de> Deserialize<'de>>(arguments: &str) -> Result<T, String> {
    let arguments = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    serde_json::from_str(arguments).map_err(|e| format!("Invalid arguments: {e}"))
}

fn describe(err: SchedulingError) -> String {
    match err {
        SchedulingError::NotAuthorized(message) => message,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduling::{
        AppointmentConfirmation, Availability, SchedulingResult, SlotLabel,
    };
    use async_trait::async_trait;
    use chrono_tz::Europe::Rome;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingScheduler {
        requests: Mutex<Vec<String>>,
        bookings: Mutex<Vec<AppointmentRequest>>,
        unauthorized: bool,
    }

    #[async_trait]
    impl Scheduler for RecordingScheduler {
        async fn find_available_slots(&self, request: &str) -> SchedulingResult<Availability> {
            if self.unauthorized {
                return Err(SchedulingError::NotAuthorized("non collegato".to_string()));
            }
            self.requests.lock().push(request.to_string());
            Ok(Availability::NoSlots {
                message: "Non ci sono slot disponibili questa settimana.".to_string(),
            })
        }

        async fn create_appointment(
            &self,
            request: AppointmentRequest,
        ) -> SchedulingResult<AppointmentConfirmation> {
            let slot = SlotLabel {
                date: request.start.format("%Y-%m-%d").to_string(),
                time: request.start.format("%H:%M").to_string(),
            };
            self.bookings.lock().push(request);
            Ok(AppointmentConfirmation {
                success: true,
                event_id: "evt_1".to_string(),
                html_link: None,
                slot,
            })
        }
    }

    fn dispatcher(scheduler: Arc<RecordingScheduler>) -> ToolDispatcher {
        ToolDispatcher::new(scheduler, Rome)
    }

    #[tokio::test]
    async fn test_no_slots_returned_verbatim() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let result = dispatcher(scheduler.clone())
            .dispatch(FIND_AVAILABLE_SLOTS, r#"{"request":"questa settimana"}"#)
            .await;

        assert_eq!(
            result,
            json!({
                "type": "no_slots",
                "message": "Non ci sono slot disponibili questa settimana."
            })
        );
        assert_eq!(scheduler.requests.lock().as_slice(), ["questa settimana"]);
    }

    #[tokio::test]
    async fn test_booking_builds_local_datetime() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let result = dispatcher(scheduler.clone())
            .dispatch(
                BOOK_APPOINTMENT,
                r#"{"date":"2025-03-11","time":"14:00","customer_name":"Mario Rossi",
                    "customer_phone":"3331234567","address":"Via Roma 1"}"#,
            )
            .await;

        assert_eq!(result["success"], true);
        assert_eq!(result["eventId"], "evt_1");
        assert_eq!(result["slot"]["time"], "14:00");

        let bookings = scheduler.bookings.lock();
        assert_eq!(bookings[0].start.to_rfc3339(), "2025-03-11T14:00:00+01:00");
        assert_eq!(bookings[0].notes, "Via Roma 1");
    }

    #[tokio::test]
    async fn test_nonexistent_local_time_is_an_error() {
        let scheduler = Arc::new(RecordingScheduler::default());
        // Clocks jump from 02:00 to 03:00 in Rome on this date.
        let result = dispatcher(scheduler.clone())
            .dispatch(
                BOOK_APPOINTMENT,
                r#"{"date":"2025-03-30","time":"02:30","customer_name":"A",
                    "customer_phone":"1","address":"x"}"#,
            )
            .await;

        assert!(result["error"].as_str().unwrap().contains("does not exist"));
        assert!(scheduler.bookings.lock().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_inputs_become_error_objects() {
        let d = dispatcher(Arc::new(RecordingScheduler::default()));

        let bad_date = d
            .dispatch(
                BOOK_APPOINTMENT,
                r#"{"date":"11/03/2025","time":"14:00","customer_name":"A"}"#,
            )
            .await;
        assert!(bad_date["error"].as_str().unwrap().contains("Invalid date"));

        let bad_json = d.dispatch(FIND_AVAILABLE_SLOTS, "{not json").await;
        assert!(bad_json["error"].as_str().unwrap().starts_with("Invalid arguments"));

        let unknown = d.dispatch("send_sms", "{}").await;
        assert_eq!(unknown, json!({"error": "Unknown tool: send_sms"}));
    }

    #[tokio::test]
    async fn test_scheduler_error_is_caught() {
        let scheduler = Arc::new(RecordingScheduler {
            unauthorized: true,
            ..Default::default()
        });
        let result = dispatcher(scheduler)
            .dispatch(FIND_AVAILABLE_SLOTS, r#"{"request":"primo libero"}"#)
            .await;
        assert_eq!(result, json!({"error": "non collegato"}));
    }

    #[tokio::test]
    async fn test_run_serializes_output() {
        let d = dispatcher(Arc::new(RecordingScheduler::default()));
        let output = d
            .run(&ToolInvocation {
                call_id: "call_1".to_string(),
                name: "nope".to_string(),
                arguments: String::new(),
            })
            .await;
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["error"], "Unknown tool: nope");
    }
}
