//! Shared application state.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::core::realtime::{OpenAIRealtime, RealtimeConnector, SessionConfig};
use crate::core::scheduling::{
    AppointmentConfirmation, AppointmentRequest, Availability, CalendarScheduler,
    GoogleCalendarBackend, GoogleOAuth, Scheduler, SchedulingError, SchedulingResult,
};
use crate::core::session::SessionSettings;
use crate::core::tools::{ToolDispatcher, scheduling_tools};

/// State shared by every request handler.
pub struct AppState {
    pub config: ServerConfig,
    /// Generation service connector; `None` when no API key is configured
    pub connector: Option<Arc<dyn RealtimeConnector>>,
    pub dispatcher: Arc<ToolDispatcher>,
    /// Google consent flow; `None` when the OAuth client is not configured
    pub oauth: Option<Arc<GoogleOAuth>>,
    /// Session configuration sent at the start of every call
    pub session: SessionSettings,
}

impl AppState {
    /// Build the production state from configuration.
    ///
    /// A missing API key is not fatal here: the HTTP surface still serves
    /// health checks and the consent flow, and calls are refused.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let (connector, session_config) =
            match OpenAIRealtime::new(config.realtime_config(scheduling_tools())) {
                Ok(realtime) => {
                    let session = realtime.build_session_config();
                    let connector: Arc<dyn RealtimeConnector> = Arc::new(realtime);
                    (Some(connector), session)
                }
                Err(e) => {
                    warn!("Generation service unavailable, calls will be refused: {}", e);
                    (None, SessionConfig::default())
                }
            };

        let oauth = config
            .google_oauth_config()
            .map(|oauth| Arc::new(GoogleOAuth::new(oauth)));
        let timezone = config.calendar_timezone;

        let scheduler: Arc<dyn Scheduler> = match oauth.as_ref() {
            Some(oauth) => {
                info!(
                    calendar_id = %config.google_calendar_id,
                    timezone = %timezone,
                    "Google Calendar scheduling enabled"
                );
                let backend = GoogleCalendarBackend::new(
                    Arc::clone(oauth),
                    config.google_calendar_id.clone(),
                    timezone,
                );
                Arc::new(CalendarScheduler::new(backend, timezone))
            }
            None => {
                warn!("Google OAuth client not configured, scheduling tools will report errors");
                Arc::new(UnconfiguredScheduler)
            }
        };

        let session = SessionSettings {
            session: session_config,
            turn: config.turn_config(),
            greeting: config.greeting.clone(),
        };

        Arc::new(Self {
            config,
            connector,
            dispatcher: Arc::new(ToolDispatcher::new(scheduler, timezone)),
            oauth,
            session,
        })
    }

    /// Assemble state from already-built parts.
    pub fn from_parts(
        config: ServerConfig,
        connector: Option<Arc<dyn RealtimeConnector>>,
        dispatcher: Arc<ToolDispatcher>,
        oauth: Option<Arc<GoogleOAuth>>,
        session: SessionSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            connector,
            dispatcher,
            oauth,
            session,
        })
    }
}

/// Stand-in when no calendar credentials exist.
struct UnconfiguredScheduler;

#[async_trait]
impl Scheduler for UnconfiguredScheduler {
    async fn find_available_slots(&self, _request: &str) -> SchedulingResult<Availability> {
        Err(not_configured())
    }

    async fn create_appointment(
        &self,
        _request: AppointmentRequest,
    ) -> SchedulingResult<AppointmentConfirmation> {
        Err(not_configured())
    }
}

fn not_configured() -> SchedulingError {
    SchedulingError::NotConfigured("Google Calendar non configurato".to_string())
}
