//! Google Calendar v3 REST backend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::calendar::{BusyInterval, CalendarBackend, CalendarEvent, InsertedEvent};
use super::oauth::GoogleOAuth;
use super::{SchedulingError, SchedulingResult};

pub const GOOGLE_CALENDAR_API_URL: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventList {
    #[serde(default)]
    items: Vec<EventItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventItem {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    transparency: Option<String>,
    start: Option<EventTime>,
    end: Option<EventTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    #[serde(default)]
    date_time: Option<DateTime<chrono::FixedOffset>>,
    /// All-day events carry only a date
    #[serde(default)]
    date: Option<NaiveDate>,
}

/// Calendar backend talking to the Google Calendar API.
pub struct GoogleCalendarBackend {
    http: Client,
    base_url: String,
    calendar_id: String,
    timezone: Tz,
    oauth: Arc<GoogleOAuth>,
}

impl GoogleCalendarBackend {
    pub fn new(oauth: Arc<GoogleOAuth>, calendar_id: impl Into<String>, timezone: Tz) -> Self {
        Self {
            http: Client::new(),
            base_url: GOOGLE_CALENDAR_API_URL.to_string(),
            calendar_id: calendar_id.into(),
            timezone,
            oauth,
        }
    }

    /// Point the backend at another API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn events_url(&self) -> SchedulingResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SchedulingError::NotConfigured(format!("Invalid calendar URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SchedulingError::NotConfigured("Calendar URL cannot be a base".into()))?
            .pop_if_empty()
            .push("calendars")
            .push(&self.calendar_id)
            .push("events");
        Ok(url)
    }

    fn to_utc(&self, time: &EventTime) -> Option<DateTime<Utc>> {
        if let Some(date_time) = time.date_time {
            return Some(date_time.with_timezone(&Utc));
        }
        let midnight = time.date?.and_hms_opt(0, 0, 0)?;
        self.timezone
            .from_local_datetime(&midnight)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    }
}

async fn check_status(response: reqwest::Response) -> SchedulingResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(SchedulingError::NotAuthorized(format!(
            "Calendar rejected credentials: {body}"
        )));
    }
    Err(SchedulingError::Http(format!(
        "Calendar request failed with status {status}: {body}"
    )))
}

#[async_trait]
impl CalendarBackend for GoogleCalendarBackend {
    async fn list_busy(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SchedulingResult<Vec<BusyInterval>> {
        let url = self.events_url()?;
        let token = self.oauth.access_token().await?;
        let time_min = from.to_rfc3339();
        let time_max = to.to_rfc3339();

        let mut busy = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(url.clone())
                .bearer_auth(&token)
                .query(&[
                    ("timeMin", time_min.as_str()),
                    ("timeMax", time_max.as_str()),
                    ("singleEvents", "true"),
                    ("orderBy", "startTime"),
                ]);
            if let Some(page) = page_token.as_deref() {
                request = request.query(&[("pageToken", page)]);
            }

            let page: EventList = check_status(request.send().await?)
                .await?
                .json()
                .await
                .map_err(|e| SchedulingError::InvalidResponse(e.to_string()))?;

            for item in page.items {
                if item.status.as_deref() == Some("cancelled")
                    || item.transparency.as_deref() == Some("transparent")
                {
                    continue;
                }
                let (Some(start), Some(end)) = (
                    item.start.as_ref().and_then(|t| self.to_utc(t)),
                    item.end.as_ref().and_then(|t| self.to_utc(t)),
                ) else {
                    warn!("Skipping calendar event without usable start/end");
                    continue;
                };
                busy.push(BusyInterval { start, end });
            }

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!(count = busy.len(), "Fetched busy intervals");
        Ok(busy)
    }

    async fn insert_event(&self, event: &CalendarEvent) -> SchedulingResult<InsertedEvent> {
        let url = self.events_url()?;
        let token = self.oauth.access_token().await?;

        let response = self
            .http
            .post(url)
            .bearer_auth(&token)
            .json(event)
            .send()
            .await?;

        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SchedulingError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduling::{
        EventDateTime, EventReminder, EventReminders, GoogleOAuthConfig,
    };
    use chrono_tz::Europe::Rome;
    use serde_json::json;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn backend(server: &MockServer) -> GoogleCalendarBackend {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 3600
            })))
            .mount(server)
            .await;

        let mut config = GoogleOAuthConfig::new("id", "secret", "https://x/cb");
        config.token_url = format!("{}/token", server.uri());
        config.refresh_token = Some("refresh".to_string());
        let oauth = Arc::new(GoogleOAuth::new(config));

        GoogleCalendarBackend::new(oauth, "primary", Rome).with_base_url(server.uri())
    }

    #[test]
    fn test_events_url_encodes_calendar_id() {
        let oauth = Arc::new(GoogleOAuth::new(GoogleOAuthConfig::new("a", "b", "c")));
        let backend = GoogleCalendarBackend::new(oauth, "team@group.calendar.google.com", Rome);
        assert_eq!(
            backend.events_url().unwrap().as_str(),
            "https://www.googleapis.com/calendar/v3/calendars/team@group.calendar.google.com/events"
        );

        let spaced = GoogleCalendarBackend::new(
            Arc::new(GoogleOAuth::new(GoogleOAuthConfig::new("a", "b", "c"))),
            "my calendar",
            Rome,
        );
        assert!(
            spaced
                .events_url()
                .unwrap()
                .as_str()
                .ends_with("/calendars/my%20calendar/events")
        );
    }

    #[tokio::test]
    async fn test_list_busy_with_all_day_and_paging() {
        let server = MockServer::start().await;
        let backend = backend(&server).await;

        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .and(bearer_token("tok"))
            .and(query_param("singleEvents", "true"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"start": {"date": "2025-03-12"}, "end": {"date": "2025-03-13"}}
                ]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .and(bearer_token("tok"))
            .and(query_param("orderBy", "startTime"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {
                        "start": {"dateTime": "2025-03-10T09:00:00+01:00"},
                        "end": {"dateTime": "2025-03-10T11:00:00+01:00"}
                    },
                    {
                        "status": "cancelled",
                        "start": {"dateTime": "2025-03-10T14:00:00+01:00"},
                        "end": {"dateTime": "2025-03-10T15:00:00+01:00"}
                    },
                    {
                        "transparency": "transparent",
                        "start": {"dateTime": "2025-03-10T15:00:00+01:00"},
                        "end": {"dateTime": "2025-03-10T16:00:00+01:00"}
                    }
                ],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        let from = Rome.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        let to = Rome.with_ymd_and_hms(2025, 3, 14, 23, 59, 59).unwrap();
        let busy = backend
            .list_busy(from.with_timezone(&Utc), to.with_timezone(&Utc))
            .await
            .unwrap();

        assert_eq!(busy.len(), 2);
        assert_eq!(
            busy[0].start,
            Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap()
        );
        // All-day event spans local midnight to local midnight.
        assert_eq!(
            busy[1].start,
            Utc.with_ymd_and_hms(2025, 3, 11, 23, 0, 0).unwrap()
        );
        assert_eq!(
            busy[1].end,
            Utc.with_ymd_and_hms(2025, 3, 12, 23, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_insert_event() {
        let server = MockServer::start().await;
        let backend = backend(&server).await;

        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .and(bearer_token("tok"))
            .and(body_partial_json(json!({
                "summary": "Intervento - Anna",
                "reminders": {"useDefault": false}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "evt_9",
                "htmlLink": "https://calendar.google.com/event?eid=evt_9"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let event = CalendarEvent {
            summary: "Intervento - Anna".to_string(),
            description: "Cliente: Anna".to_string(),
            start: EventDateTime {
                date_time: "2025-03-11T09:00:00+01:00".to_string(),
                time_zone: "Europe/Rome".to_string(),
            },
            end: EventDateTime {
                date_time: "2025-03-11T11:00:00+01:00".to_string(),
                time_zone: "Europe/Rome".to_string(),
            },
            reminders: EventReminders {
                use_default: false,
                overrides: vec![EventReminder {
                    method: "popup".to_string(),
                    minutes: 60,
                }],
            },
        };

        let inserted = backend.insert_event(&event).await.unwrap();
        assert_eq!(inserted.id, "evt_9");
        assert!(inserted.html_link.is_some());
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_not_authorized() {
        let server = MockServer::start().await;
        let backend = backend(&server).await;

        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
            .mount(&server)
            .await;

        let now = Utc::now();
        let result = backend.list_busy(now, now + chrono::Duration::days(1)).await;
        assert!(matches!(result, Err(SchedulingError::NotAuthorized(_))));
    }
}
