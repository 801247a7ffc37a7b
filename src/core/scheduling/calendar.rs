//! Calendar-backed slot search and booking.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    AppointmentConfirmation, AppointmentRequest, Availability, Scheduler, SchedulingError,
    SchedulingResult, Slot, SlotLabel,
};

/// Length of one appointment.
pub const SLOT_DURATION_MINUTES: i64 = 120;

const SLOT_STEP_MINUTES: u32 = 30;
const DAY_START_HOUR: u32 = 9;
const DAY_END_HOUR: u32 = 18;
const LUNCH_START_HOUR: u32 = 13;
const LUNCH_END_HOUR: u32 = 14;
const FIRST_AVAILABLE_HORIZON_DAYS: i64 = 14;

// =============================================================================
// Backend
// =============================================================================

/// A time range already taken on the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusyInterval {
    fn overlaps<T: TimeZone>(&self, start: &DateTime<T>, end: &DateTime<T>) -> bool {
        *start < self.end && *end > self.start
    }
}

/// Event payload for the calendar insert call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub summary: String,
    pub description: String,
    pub start: EventDateTime,
    pub end: EventDateTime,
    pub reminders: EventReminders,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    pub date_time: String,
    pub time_zone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReminders {
    pub use_default: bool,
    pub overrides: Vec<EventReminder>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventReminder {
    pub method: String,
    pub minutes: u32,
}

/// What the calendar returns for a created event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertedEvent {
    pub id: String,
    #[serde(default)]
    pub html_link: Option<String>,
}

/// Storage behind the scheduler.
#[async_trait]
pub trait CalendarBackend: Send + Sync {
    /// Busy intervals overlapping `[from, to)`.
    async fn list_busy(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SchedulingResult<Vec<BusyInterval>>;

    /// Create an event.
    async fn insert_event(&self, event: &CalendarEvent) -> SchedulingResult<InsertedEvent>;
}

// =============================================================================
// Request parsing
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Any,
    Morning,
    Afternoon,
}

/// What a caller asked for, in scheduling terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedRequest {
    pub first_available: bool,
    pub week_offset: i64,
    pub period: Period,
}

/// Interpret an Italian availability request.
pub fn parse_request(request: &str) -> ParsedRequest {
    let request = request.to_lowercase();

    let first_available = request.contains("primo")
        && (request.contains("disponibile") || request.contains("libero"));

    let week_offset =
        if request.contains("prossima settimana") || request.contains("settimana prossima") {
            1
        } else {
            0
        };

    let period = if request.contains("pomeriggio") {
        Period::Afternoon
    } else if request.contains("mattina") || request.contains("mattino") {
        Period::Morning
    } else {
        Period::Any
    };

    ParsedRequest {
        first_available,
        week_offset,
        period,
    }
}

// =============================================================================
// Scheduler
// =============================================================================

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Slot search and booking over a [`CalendarBackend`], in one time zone.
pub struct CalendarScheduler<B> {
    backend: B,
    timezone: Tz,
    clock: Clock,
}

impl<B: CalendarBackend> CalendarScheduler<B> {
    pub fn new(backend: B, timezone: Tz) -> Self {
        Self {
            backend,
            timezone,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock; slot searches never offer times before it.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn now(&self) -> DateTime<Tz> {
        (self.clock)().with_timezone(&self.timezone)
    }

    /// Free slot starts in `[from, to)`.
    pub async fn available_slots(
        &self,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
    ) -> SchedulingResult<Vec<DateTime<Tz>>> {
        if from >= to {
            return Ok(Vec::new());
        }

        let busy = self
            .backend
            .list_busy(from.with_timezone(&Utc), to.with_timezone(&Utc))
            .await?;

        let slot_length = Duration::minutes(SLOT_DURATION_MINUTES);
        let free: Vec<_> = candidate_starts(&from, &to, self.timezone)
            .into_iter()
            .filter(|start| {
                let end = *start + slot_length;
                !busy.iter().any(|b| b.overlaps(start, &end))
            })
            .collect();

        debug!(
            from = %from,
            to = %to,
            busy = busy.len(),
            free = free.len(),
            "Computed available slots"
        );
        Ok(free)
    }

    /// Earliest free slot in the next two weeks.
    pub async fn first_available(&self) -> SchedulingResult<Option<DateTime<Tz>>> {
        let now = self.now();
        let horizon = now + Duration::days(FIRST_AVAILABLE_HORIZON_DAYS);
        Ok(self.available_slots(now, horizon).await?.into_iter().next())
    }

    /// Free slots from Monday to Friday of the current week (offset 0) or a later one.
    pub async fn slots_in_week(&self, week_offset: i64) -> SchedulingResult<Vec<DateTime<Tz>>> {
        let now = self.now();
        let today = now.date_naive();
        let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()))
            + Duration::weeks(week_offset);
        let friday = monday + Duration::days(4);

        let week_start = local_boundary(self.timezone, monday, 0, 0, 0)?;
        let week_end = local_boundary(self.timezone, friday, 23, 59, 59)?;
        let from = if week_start > now { week_start } else { now };

        self.available_slots(from, week_end).await
    }
}

#[async_trait]
impl<B: CalendarBackend> Scheduler for CalendarScheduler<B> {
    async fn find_available_slots(&self, request: &str) -> SchedulingResult<Availability> {
        let parsed = parse_request(request);
        info!(?parsed, "Availability request");

        if parsed.first_available {
            return Ok(match self.first_available().await? {
                Some(start) => Availability::FirstAvailable {
                    message: format!(
                        "Il primo slot disponibile è {} alle ore {}",
                        start.format("%d/%m/%Y"),
                        start.format("%H:%M")
                    ),
                    slot: to_slot(&start),
                },
                None => Availability::NoSlots {
                    message: "Non ci sono slot disponibili nelle prossime 2 settimane.".to_string(),
                },
            });
        }

        let starts: Vec<_> = self
            .slots_in_week(parsed.week_offset)
            .await?
            .into_iter()
            .filter(|start| match parsed.period {
                Period::Any => true,
                Period::Morning => start.hour() < LUNCH_START_HOUR,
                Period::Afternoon => start.hour() >= LUNCH_END_HOUR,
            })
            .collect();

        let week_phrase = if parsed.week_offset == 1 {
            "la prossima settimana"
        } else {
            "questa settimana"
        };

        let Some(first_day) = starts.first().map(|s| s.date_naive()) else {
            let period_phrase = match parsed.period {
                Period::Morning => "la mattina ",
                Period::Afternoon => "il pomeriggio ",
                Period::Any => "",
            };
            return Ok(Availability::NoSlots {
                message: format!("Non ci sono slot disponibili {period_phrase}{week_phrase}."),
            });
        };

        let day_slots: Vec<Slot> = starts
            .iter()
            .filter(|s| s.date_naive() == first_day)
            .map(to_slot)
            .collect();

        let lead = if parsed.week_offset == 1 {
            "La prossima settimana"
        } else {
            "Questa settimana"
        };
        let which = match parsed.period {
            Period::Morning => "con slot la mattina",
            Period::Afternoon => "con slot il pomeriggio",
            Period::Any => "disponibile",
        };
        let times = day_slots
            .iter()
            .map(|s| s.time.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        Ok(Availability::SlotsFound {
            date: first_day.format("%Y-%m-%d").to_string(),
            message: format!(
                "{lead}, il primo giorno {which} è {}. Slot disponibili: {times}",
                first_day.format("%d/%m/%Y")
            ),
            slots: day_slots,
        })
    }

    async fn create_appointment(
        &self,
        request: AppointmentRequest,
    ) -> SchedulingResult<AppointmentConfirmation> {
        if request.customer_name.trim().is_empty() {
            return Err(SchedulingError::InvalidInput(
                "customer name is required".to_string(),
            ));
        }

        let start = request.start.with_timezone(&self.timezone);
        let end = start + Duration::minutes(SLOT_DURATION_MINUTES);
        let time_zone = self.timezone.name().to_string();

        let event = CalendarEvent {
            summary: format!("Intervento - {}", request.customer_name),
            description: format!(
                "Cliente: {}\nTelefono: {}\nNote: {}",
                request.customer_name, request.customer_phone, request.notes
            ),
            start: EventDateTime {
                date_time: start.to_rfc3339(),
                time_zone: time_zone.clone(),
            },
            end: EventDateTime {
                date_time: end.to_rfc3339(),
                time_zone,
            },
            reminders: EventReminders {
                use_default: false,
                overrides: vec![
                    EventReminder {
                        method: "email".to_string(),
                        minutes: 24 * 60,
                    },
                    EventReminder {
                        method: "popup".to_string(),
                        minutes: 60,
                    },
                ],
            },
        };

        let inserted = self.backend.insert_event(&event).await?;
        info!(event_id = %inserted.id, start = %start, "Appointment booked");

        Ok(AppointmentConfirmation {
            success: true,
            event_id: inserted.id,
            html_link: inserted.html_link,
            slot: SlotLabel {
                date: start.format("%Y-%m-%d").to_string(),
                time: start.format("%H:%M").to_string(),
            },
        })
    }
}

/// Working-hours slot starts between `from` and `to`, in local time.
fn candidate_starts(from: &DateTime<Tz>, to: &DateTime<Tz>, tz: Tz) -> Vec<DateTime<Tz>> {
    let mut starts = Vec::new();
    let last_day = to.date_naive();
    let mut day = from.date_naive();

    let slot_minutes = SLOT_DURATION_MINUTES as u32;
    while day <= last_day {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            let mut minute_of_day = DAY_START_HOUR * 60;
            while minute_of_day + slot_minutes <= DAY_END_HOUR * 60 {
                let hour = minute_of_day / 60;
                let in_lunch = (LUNCH_START_HOUR..LUNCH_END_HOUR).contains(&hour);
                if !in_lunch
                    && let Some(naive) = day.and_hms_opt(hour, minute_of_day % 60, 0)
                    && let LocalResult::Single(start) = tz.from_local_datetime(&naive)
                    && start >= *from
                    && start < *to
                {
                    starts.push(start);
                }
                minute_of_day += SLOT_STEP_MINUTES;
            }
        }

        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    starts
}

fn local_boundary(
    tz: Tz,
    day: NaiveDate,
    hour: u32,
    minute: u32,
    second: u32,
) -> SchedulingResult<DateTime<Tz>> {
    let naive = day
        .and_hms_opt(hour, minute, second)
        .ok_or_else(|| SchedulingError::InvalidLocalTime(day.to_string()))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| SchedulingError::InvalidLocalTime(naive.to_string()))
}

fn to_slot(start: &DateTime<Tz>) -> Slot {
    let end = *start + Duration::minutes(SLOT_DURATION_MINUTES);
    Slot {
        start: start.to_rfc3339(),
        end: end.to_rfc3339(),
        date: start.format("%Y-%m-%d").to_string(),
        time: start.format("%H:%M").to_string(),
    }
}
