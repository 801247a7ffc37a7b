//! Per-call session orchestration.
//!
//! [`open_session`] connects upstream, sends the session configuration, and
//! then runs one event loop that consumes, in arrival order:
//!
//! - transport frames from the phone side
//! - upstream server events
//! - finished tool dispatches
//! - the utterance timer
//!
//! All turn state lives in one [`TurnMachine`] owned by the loop. Tool calls
//! run on spawned tasks and report back through a channel, so the loop never
//! waits on the scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::core::realtime::{
    ClientEvent, RealtimeConnector, RealtimeError, RealtimeResult, ServerEvent, SessionConfig,
    UpstreamEvent,
};
use crate::core::relay::{forward_inbound, forward_outbound};
use crate::core::tools::{ToolDispatcher, ToolInvocation};
use crate::core::transport::{InboundFrame, OutboundFrame, TransportRoute};
use crate::core::turn::{Action, TurnConfig, TurnMachine};

const TOOL_RESULT_CAPACITY: usize = 16;

/// What a session is opened with.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Sent upstream once, before any audio
    pub session: SessionConfig,
    pub turn: TurnConfig,
    /// Instruction that makes the assistant speak first
    pub greeting: Option<String>,
}

/// The phone side of a session, already decoded.
#[derive(Debug)]
pub struct TransportLink {
    /// Frames from the phone side; `None` means the socket closed
    pub inbound: mpsc::Receiver<InboundFrame>,
    /// Frames and close requests for the phone side
    pub outbound: mpsc::Sender<TransportRoute>,
}

/// Run one call to completion.
///
/// Returns `Ok` when the phone side ends the call and `Err` when the upstream
/// connection could not be opened or dropped mid-call. In the error case the
/// phone side has already been told to close.
pub async fn open_session(
    connector: &dyn RealtimeConnector,
    dispatcher: Arc<ToolDispatcher>,
    settings: SessionSettings,
    transport: TransportLink,
) -> RealtimeResult<()> {
    let session_id = Uuid::new_v4();
    let span = info_span!(
        "session",
        %session_id,
        provider = connector.provider_name(),
        stream_sid = tracing::field::Empty
    );

    run_session(connector, dispatcher, settings, transport)
        .instrument(span)
        .await
}

async fn run_session(
    connector: &dyn RealtimeConnector,
    dispatcher: Arc<ToolDispatcher>,
    settings: SessionSettings,
    mut transport: TransportLink,
) -> RealtimeResult<()> {
    let link = match connector.connect().await {
        Ok(link) => link,
        Err(e) => {
            error!("Upstream connection failed: {}", e);
            let _ = transport.outbound.send(TransportRoute::Close).await;
            return Err(e);
        }
    };
    let mut upstream_events = link.events;

    let (tool_tx, mut tool_rx) = mpsc::channel::<(String, String)>(TOOL_RESULT_CAPACITY);
    let mut session = Session {
        machine: TurnMachine::new(settings.turn),
        upstream: link.sender,
        outbound: transport.outbound.clone(),
        dispatcher,
        tool_tx,
        deadline: None,
        function_names: HashMap::new(),
        greeting: settings.greeting,
    };

    session
        .send_upstream(ClientEvent::SessionUpdate {
            session: Box::new(settings.session),
        })
        .await?;
    info!("Session configured");

    let result = loop {
        let deadline = session.deadline;
        let timer = async move {
            match deadline {
                Some((turn, at)) => {
                    sleep_until(at).await;
                    turn
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            frame = transport.inbound.recv() => {
                let Some(frame) = frame else {
                    info!("Phone side disconnected");
                    break Ok(());
                };
                match session.on_transport_frame(frame).await {
                    Ok(true) => {}
                    Ok(false) => break Ok(()),
                    Err(e) => break Err(e),
                }
            }

            event = upstream_events.recv() => {
                let reason = match event {
                    Some(UpstreamEvent::Server(event)) => {
                        if let Err(e) = session.on_server_event(event).await {
                            break Err(e);
                        }
                        continue;
                    }
                    Some(UpstreamEvent::Closed { reason }) => reason,
                    None => None,
                };
                let reason = reason.unwrap_or_else(|| "connection lost".to_string());
                error!(reason = %reason, "Upstream connection closed");
                break Err(RealtimeError::ConnectionClosed(reason));
            }

            Some((call_id, output)) = tool_rx.recv() => {
                let actions = session.machine.on_tool_result(call_id, output);
                if let Err(e) = session.apply(actions).await {
                    break Err(e);
                }
            }

            turn = timer => {
                session.deadline = None;
                let actions = session.machine.on_utterance_timeout(turn);
                if let Err(e) = session.apply(actions).await {
                    break Err(e);
                }
            }
        }
    };

    if result.is_err() {
        let _ = session.outbound.send(TransportRoute::Close).await;
    }
    info!(turns = session.machine.turn(), "Session ended");
    result
}

struct Session {
    machine: TurnMachine,
    upstream: mpsc::Sender<ClientEvent>,
    outbound: mpsc::Sender<TransportRoute>,
    dispatcher: Arc<ToolDispatcher>,
    tool_tx: mpsc::Sender<(String, String)>,
    /// Utterance timer: turn it belongs to and when it fires
    deadline: Option<(u64, Instant)>,
    /// Function names by call id and item id, from `response.output_item.added`
    function_names: HashMap<String, String>,
    greeting: Option<String>,
}

impl Session {
    async fn apply(&mut self, actions: Vec<Action>) -> RealtimeResult<()> {
        for action in actions {
            match action {
                Action::Upstream(event) => self.send_upstream(event).await?,
                Action::Transport(frame) => self.send_transport(frame).await,
                Action::ArmTimer { turn, after } => {
                    self.deadline = Some((turn, Instant::now() + after));
                }
                Action::CancelTimer => self.deadline = None,
            }
        }
        Ok(())
    }

    async fn send_upstream(&self, event: ClientEvent) -> RealtimeResult<()> {
        debug!(kind = event.kind(), "Sending upstream");
        self.upstream
            .send(event)
            .await
            .map_err(|_| RealtimeError::NotConnected)
    }

    async fn send_transport(&self, frame: OutboundFrame) {
        if self.outbound.send(TransportRoute::Frame(frame)).await.is_err() {
            debug!("Phone side writer gone, dropping frame");
        }
    }

    /// Returns `false` once the phone side ended the stream.
    async fn on_transport_frame(&mut self, frame: InboundFrame) -> RealtimeResult<bool> {
        match frame {
            InboundFrame::Connected { protocol } => {
                info!(protocol = ?protocol, "Media stream connected");
            }
            InboundFrame::Start { start } => {
                tracing::Span::current().record("stream_sid", start.stream_sid.as_str());
                info!(call_sid = ?start.call_sid, "Call started");
                self.machine.on_stream_start(start.stream_sid);

                if let Some(greeting) = self.greeting.take() {
                    let actions = self.machine.greet(greeting);
                    self.apply(actions).await?;
                }
            }
            InboundFrame::Media { media } => {
                if let Some(event) =
                    forward_inbound(&mut self.machine, media.timestamp, media.payload)
                {
                    self.send_upstream(event).await?;
                }
            }
            InboundFrame::Mark { .. } => self.machine.on_mark(),
            InboundFrame::Stop => {
                info!("Media stream stopped");
                return Ok(false);
            }
            InboundFrame::Unknown => debug!("Ignoring unhandled transport event"),
        }
        Ok(true)
    }

    async fn on_server_event(&mut self, event: ServerEvent) -> RealtimeResult<()> {
        match event {
            ServerEvent::SessionCreated { session } => {
                debug!(upstream_session = %session.id, "Upstream session created");
            }
            ServerEvent::SessionUpdated { session } => {
                debug!(upstream_session = %session.id, "Upstream session updated");
            }
            ServerEvent::SpeechStarted { .. } => {
                let actions = self.machine.on_speech_started();
                self.apply(actions).await?;
            }
            ServerEvent::SpeechStopped { .. } => {
                let actions = self.machine.on_speech_stopped();
                self.apply(actions).await?;
            }
            ServerEvent::InputAudioBufferCommitted { item_id, .. } => {
                debug!(item_id = ?item_id, "Input buffer committed");
                let actions = self.machine.on_buffer_committed();
                self.apply(actions).await?;
            }
            ServerEvent::AudioDelta { item_id, delta, .. } => {
                for frame in forward_outbound(&mut self.machine, &item_id, delta) {
                    self.send_transport(frame).await;
                }
            }
            ServerEvent::ResponseCreated { response } => {
                debug!(response_id = %response.id, "Response started");
            }
            ServerEvent::ResponseDone { response } => {
                debug!(
                    response_id = %response.id,
                    status = ?response.status,
                    "Response finished"
                );
                let actions = self.machine.on_response_done();
                self.apply(actions).await?;
            }
            ServerEvent::OutputItemAdded { item, .. } => {
                if item.is_function_call()
                    && let Some(name) = item.name
                {
                    if let Some(call_id) = item.call_id {
                        self.function_names.insert(call_id, name.clone());
                    }
                    if let Some(id) = item.id {
                        self.function_names.insert(id, name);
                    }
                }
            }
            ServerEvent::FunctionCallArgumentsDone {
                item_id,
                call_id,
                name,
                arguments,
            } => {
                let name = name
                    .or_else(|| self.function_names.remove(&call_id))
                    .or_else(|| item_id.and_then(|id| self.function_names.remove(&id)))
                    .unwrap_or_default();
                self.spawn_tool(ToolInvocation {
                    call_id,
                    name,
                    arguments,
                });
            }
            ServerEvent::TranscriptionCompleted { transcript, .. } => {
                info!(transcript = %transcript.trim(), "Caller");
            }
            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                info!(transcript = %transcript.trim(), "Assistant");
            }
            ServerEvent::Error { error } if error.is_empty_commit() => {
                debug!("Upstream had already committed the input buffer");
            }
            ServerEvent::Error { error } => {
                warn!(
                    error_type = %error.error_type,
                    code = ?error.code,
                    "Upstream reported an error: {}",
                    error.message
                );
            }
            ServerEvent::Unknown => {}
        }
        Ok(())
    }

    fn spawn_tool(&self, invocation: ToolInvocation) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let results = self.tool_tx.clone();
        tokio::spawn(
            async move {
                let output = dispatcher.run(&invocation).await;
                if results.send((invocation.call_id, output)).await.is_err() {
                    debug!("Session ended before tool result was delivered");
                }
            }
            .in_current_span(),
        );
    }
}
