//! Turn-taking state machine.
//!
//! One [`TurnMachine`] exists per call and is owned by the session loop. Every
//! event from either side of the call is fed through one of its `on_*`
//! methods, which mutate the per-call state and return the [`Action`]s the
//! loop must perform, in order. Nothing else mutates turn state.
//!
//! ```text
//! Idle --speech start--> CallerSpeaking --speech stop / timeout--> Committing
//!   ^                        |  ^                                       |
//!   |                        |  +--------- barge-in ---------+          | commit ack
//!   |                        v                               |          v
//!   +------ reply done ----------------------------- AssistantReplying <+
//! ```

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::flow_control::{MarkQueue, RESPONSE_MARK};
use crate::core::realtime::{ClientEvent, ConversationItem};
use crate::core::transport::OutboundFrame;

/// Default cap on a single caller utterance.
pub const DEFAULT_MAX_UTTERANCE: Duration = Duration::from_millis(8000);

/// Per-call turn-taking settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnConfig {
    /// Longest utterance before a commit is forced
    pub max_utterance: Duration,
    /// Keep forwarding caller audio while a reply plays
    pub listen_during_reply: bool,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_utterance: DEFAULT_MAX_UTTERANCE,
            listen_during_reply: false,
        }
    }
}

/// Where the current turn stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    Idle,
    CallerSpeaking,
    Committing,
    AssistantReplying,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnPhase::Idle => write!(f, "idle"),
            TurnPhase::CallerSpeaking => write!(f, "caller_speaking"),
            TurnPhase::Committing => write!(f, "committing"),
            TurnPhase::AssistantReplying => write!(f, "assistant_replying"),
        }
    }
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send an event to the generation service
    Upstream(ClientEvent),
    /// Send a frame to the phone side
    Transport(OutboundFrame),
    /// Start the utterance timer for `turn`
    ArmTimer { turn: u64, after: Duration },
    /// Stop the utterance timer
    CancelTimer,
}

/// The assistant item currently being played, if any.
#[derive(Debug, Clone, Default)]
struct ReplyTracking {
    item_id: Option<String>,
    playback_start: Option<u64>,
}

/// Per-call turn state.
#[derive(Debug)]
pub struct TurnMachine {
    config: TurnConfig,
    phase: TurnPhase,
    stream_sid: Option<String>,
    latest_media_ts: u64,

    turn: u64,
    commit_issued: bool,
    response_requested: bool,
    append_enabled: bool,
    timer_armed: Option<u64>,

    reply: ReplyTracking,
    truncated_item: Option<String>,
    marks: MarkQueue,

    response_in_flight: bool,
    pending_tool_outputs: Vec<(String, String)>,
}

impl TurnMachine {
    pub fn new(config: TurnConfig) -> Self {
        Self {
            config,
            phase: TurnPhase::Idle,
            stream_sid: None,
            latest_media_ts: 0,
            turn: 0,
            commit_issued: false,
            response_requested: false,
            append_enabled: true,
            timer_armed: None,
            reply: ReplyTracking::default(),
            truncated_item: None,
            marks: MarkQueue::new(),
            response_in_flight: false,
            pending_tool_outputs: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    /// Whether caller audio is currently forwarded upstream.
    pub fn append_enabled(&self) -> bool {
        self.append_enabled
    }

    pub fn commit_issued(&self) -> bool {
        self.commit_issued
    }

    /// Sequence number of the current turn. Timer expiries carry it.
    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn pending_marks(&self) -> usize {
        self.marks.len()
    }

    pub fn latest_media_timestamp(&self) -> u64 {
        self.latest_media_ts
    }

    pub fn current_reply_item(&self) -> Option<&str> {
        self.reply.item_id.as_deref()
    }

    pub fn reply_playback_start(&self) -> Option<u64> {
        self.reply.playback_start
    }

    /// Milliseconds of the current reply the caller has heard, on the
    /// transport's clock.
    pub fn elapsed_playback_ms(&self) -> Option<u64> {
        self.reply
            .playback_start
            .map(|start| self.latest_media_ts.saturating_sub(start))
    }

    // -------------------------------------------------------------------------
    // Transport side
    // -------------------------------------------------------------------------

    /// The transport announced the stream; outbound frames can now be tagged.
    pub fn on_stream_start(&mut self, stream_sid: impl Into<String>) {
        let stream_sid = stream_sid.into();
        info!(stream_sid = %stream_sid, "Media stream started");
        self.stream_sid = Some(stream_sid);
        self.latest_media_ts = 0;
        self.reply = ReplyTracking::default();
        self.marks.clear();
    }

    /// Record the timestamp of an inbound media frame.
    pub fn observe_inbound(&mut self, timestamp: u64) {
        if timestamp > self.latest_media_ts {
            self.latest_media_ts = timestamp;
        }
    }

    /// The transport played a chunk.
    pub fn on_mark(&mut self) {
        if self.marks.acknowledge().is_none() {
            debug!("Mark acknowledged with empty queue, ignoring");
        }
    }

    /// Admit one reply audio chunk for `item_id`.
    ///
    /// Returns the stream id to tag the chunk with, or `None` when the chunk
    /// must be dropped (stream not started yet, or the item was truncated by a
    /// barge-in). An admitted chunk has its mark queued here.
    pub fn accept_reply_chunk(&mut self, item_id: &str) -> Option<String> {
        let stream_sid = self.stream_sid.clone()?;

        if self.truncated_item.as_deref() == Some(item_id) {
            debug!(item_id, "Dropping audio for truncated item");
            return None;
        }

        if matches!(self.phase, TurnPhase::Idle | TurnPhase::Committing) {
            self.phase = TurnPhase::AssistantReplying;
        }

        if self.reply.playback_start.is_none() {
            self.reply.playback_start = Some(self.latest_media_ts);
        }
        if self.reply.item_id.as_deref() != Some(item_id) {
            self.reply.item_id = Some(item_id.to_string());
        }

        self.response_in_flight = true;
        self.marks.push(RESPONSE_MARK);
        Some(stream_sid)
    }

    // -------------------------------------------------------------------------
    // Voice activity
    // -------------------------------------------------------------------------

    /// The generation service heard the caller start speaking.
    pub fn on_speech_started(&mut self) -> Vec<Action> {
        match self.phase {
            TurnPhase::CallerSpeaking => {
                debug!("Speech start while caller already speaking");
                return Vec::new();
            }
            TurnPhase::Committing => {
                debug!("Speech start while commit pending, ignoring");
                return Vec::new();
            }
            TurnPhase::Idle | TurnPhase::AssistantReplying => {}
        }

        let mut actions = Vec::new();

        if self.phase == TurnPhase::AssistantReplying
            && let Some(item_id) = self.reply.item_id.take()
        {
            let audio_end_ms = self.elapsed_playback_ms().unwrap_or(0);
            info!(item_id = %item_id, audio_end_ms, "Caller barged in, truncating reply");

            actions.push(Action::Upstream(ClientEvent::ConversationItemTruncate {
                item_id: item_id.clone(),
                content_index: 0,
                audio_end_ms,
            }));
            if let Some(stream_sid) = &self.stream_sid {
                actions.push(Action::Transport(OutboundFrame::clear(stream_sid.clone())));
            }
            self.truncated_item = Some(item_id);
        }
        self.marks.clear();
        self.reply = ReplyTracking::default();

        self.turn += 1;
        self.phase = TurnPhase::CallerSpeaking;
        self.commit_issued = false;
        self.response_requested = false;
        self.append_enabled = true;
        self.timer_armed = Some(self.turn);
        actions.push(Action::ArmTimer {
            turn: self.turn,
            after: self.config.max_utterance,
        });

        debug!(turn = self.turn, "Caller turn started");
        actions
    }

    /// The generation service heard the caller stop speaking.
    pub fn on_speech_stopped(&mut self) -> Vec<Action> {
        if self.phase != TurnPhase::CallerSpeaking {
            debug!(phase = %self.phase, "Speech stop outside caller turn, ignoring");
            return Vec::new();
        }
        self.end_utterance(false)
    }

    /// The utterance timer for `turn` fired.
    pub fn on_utterance_timeout(&mut self, turn: u64) -> Vec<Action> {
        if self.timer_armed != Some(turn) || self.phase != TurnPhase::CallerSpeaking {
            debug!(turn, "Stale utterance timer, ignoring");
            return Vec::new();
        }
        self.end_utterance(true)
    }

    fn end_utterance(&mut self, forced: bool) -> Vec<Action> {
        let mut actions = Vec::new();

        if self.timer_armed.take().is_some() {
            actions.push(Action::CancelTimer);
        }

        if forced {
            warn!(
                turn = self.turn,
                max_ms = self.config.max_utterance.as_millis() as u64,
                "Utterance exceeded maximum duration, forced commit"
            );
        }

        if self.commit_issued {
            debug!(turn = self.turn, "Commit already issued for this turn");
        } else {
            self.commit_issued = true;
            self.append_enabled = false;
            actions.push(Action::Upstream(ClientEvent::InputAudioBufferCommit));
        }

        self.phase = TurnPhase::Committing;
        actions
    }

    // -------------------------------------------------------------------------
    // Generation service lifecycle
    // -------------------------------------------------------------------------

    /// The generation service acknowledged a buffer commit.
    pub fn on_buffer_committed(&mut self) -> Vec<Action> {
        let awaiting = matches!(
            self.phase,
            TurnPhase::Committing | TurnPhase::AssistantReplying
        );
        if !awaiting || !self.commit_issued || self.response_requested {
            debug!(phase = %self.phase, "Commit acknowledgment with nothing pending");
            return Vec::new();
        }

        let mut actions = self.drain_tool_outputs();
        actions.push(Action::Upstream(ClientEvent::ResponseCreate));
        self.response_requested = true;
        self.response_in_flight = true;
        self.phase = TurnPhase::AssistantReplying;
        if self.config.listen_during_reply {
            self.append_enabled = true;
        }
        actions
    }

    /// A response finished (completed, cancelled or failed).
    pub fn on_response_done(&mut self) -> Vec<Action> {
        self.response_in_flight = false;
        self.reply = ReplyTracking::default();
        self.marks.clear();

        match self.phase {
            TurnPhase::CallerSpeaking | TurnPhase::Committing => {
                debug!(phase = %self.phase, "Reply finished during caller turn");
                Vec::new()
            }
            TurnPhase::Idle | TurnPhase::AssistantReplying => {
                let mut actions = Vec::new();
                if self.timer_armed.take().is_some() {
                    actions.push(Action::CancelTimer);
                }
                self.phase = TurnPhase::Idle;
                self.append_enabled = true;

                if !self.pending_tool_outputs.is_empty() {
                    actions.extend(self.drain_tool_outputs());
                    actions.push(Action::Upstream(ClientEvent::ResponseCreate));
                    self.response_in_flight = true;
                }
                actions
            }
        }
    }

    /// A tool dispatch finished; feed its output back and ask for a reply.
    ///
    /// Outputs that arrive while a response is still streaming, or while the
    /// caller holds the floor, wait for the next response request.
    pub fn on_tool_result(
        &mut self,
        call_id: impl Into<String>,
        output: impl Into<String>,
    ) -> Vec<Action> {
        self.pending_tool_outputs.push((call_id.into(), output.into()));

        let caller_turn = matches!(
            self.phase,
            TurnPhase::CallerSpeaking | TurnPhase::Committing
        );
        if self.response_in_flight || caller_turn {
            debug!(phase = %self.phase, "Deferring tool output until the floor is free");
            return Vec::new();
        }

        let mut actions = self.drain_tool_outputs();
        actions.push(Action::Upstream(ClientEvent::ResponseCreate));
        self.response_in_flight = true;
        actions
    }

    /// Have the assistant speak first.
    pub fn greet(&mut self, instruction: impl Into<String>) -> Vec<Action> {
        self.response_in_flight = true;
        vec![
            Action::Upstream(ClientEvent::ConversationItemCreate {
                item: ConversationItem::user_text(instruction),
            }),
            Action::Upstream(ClientEvent::ResponseCreate),
        ]
    }

    fn drain_tool_outputs(&mut self) -> Vec<Action> {
        self.pending_tool_outputs
            .drain(..)
            .map(|(call_id, output)| {
                Action::Upstream(ClientEvent::ConversationItemCreate {
                    item: ConversationItem::function_call_output(call_id, output),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> TurnMachine {
        let mut machine = TurnMachine::new(TurnConfig::default());
        machine.on_stream_start("MZ1");
        machine
    }

    fn commits(actions: &[Action]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, Action::Upstream(ClientEvent::InputAudioBufferCommit)))
            .count()
    }

    fn response_creates(actions: &[Action]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, Action::Upstream(ClientEvent::ResponseCreate)))
            .count()
    }

    /// Drive a machine into a playing reply: turn committed, acknowledged, and
    /// `chunks` chunks of `item` admitted starting at transport time `start`.
    fn replying(start: u64, item: &str, chunks: usize) -> TurnMachine {
        let mut m = machine();
        m.on_speech_started();
        m.on_speech_stopped();
        m.on_buffer_committed();
        m.observe_inbound(start);
        for _ in 0..chunks {
            assert!(m.accept_reply_chunk(item).is_some());
        }
        m
    }

    #[test]
    fn test_natural_turn_commits_once() {
        let mut m = machine();
        m.observe_inbound(1000);
        let started = m.on_speech_started();
        assert_eq!(m.phase(), TurnPhase::CallerSpeaking);
        assert!(matches!(
            started.last(),
            Some(Action::ArmTimer { turn: 1, after }) if *after == Duration::from_millis(8000)
        ));

        m.observe_inbound(2500);
        let stopped = m.on_speech_stopped();
        assert_eq!(commits(&stopped), 1);
        assert!(stopped.contains(&Action::CancelTimer));
        assert_eq!(m.phase(), TurnPhase::Committing);
        assert!(!m.append_enabled());

        // The timer for this turn can no longer force anything.
        assert!(m.on_utterance_timeout(1).is_empty());
    }

    #[test]
    fn test_timeout_forces_single_commit() {
        let mut m = machine();
        let started = m.on_speech_started();
        let turn = match started.last() {
            Some(Action::ArmTimer { turn, .. }) => *turn,
            other => panic!("expected timer, got {other:?}"),
        };

        let forced = m.on_utterance_timeout(turn);
        assert_eq!(commits(&forced), 1);
        assert_eq!(m.phase(), TurnPhase::Committing);

        let late_stop = m.on_speech_stopped();
        assert_eq!(commits(&late_stop), 0);
        assert!(late_stop.is_empty());
    }

    #[test]
    fn test_commit_ack_requests_exactly_one_response() {
        let mut m = machine();
        m.on_speech_started();
        m.on_speech_stopped();

        let ack = m.on_buffer_committed();
        assert_eq!(ack, vec![Action::Upstream(ClientEvent::ResponseCreate)]);
        assert_eq!(m.phase(), TurnPhase::AssistantReplying);
        assert!(!m.append_enabled());

        assert!(m.on_buffer_committed().is_empty());
    }

    #[test]
    fn test_commit_ack_without_commit_is_ignored() {
        let mut m = machine();
        assert!(m.on_buffer_committed().is_empty());
        assert_eq!(m.phase(), TurnPhase::Idle);
    }

    #[test]
    fn test_barge_in_truncates_at_elapsed_playback() {
        let mut m = replying(4000, "item_a", 3);
        assert_eq!(m.pending_marks(), 3);
        assert_eq!(m.reply_playback_start(), Some(4000));

        m.observe_inbound(4600);
        let actions = m.on_speech_started();

        assert_eq!(
            actions[0],
            Action::Upstream(ClientEvent::ConversationItemTruncate {
                item_id: "item_a".to_string(),
                content_index: 0,
                audio_end_ms: 600,
            })
        );
        assert_eq!(actions[1], Action::Transport(OutboundFrame::clear("MZ1")));
        assert!(matches!(actions[2], Action::ArmTimer { .. }));
        assert_eq!(m.pending_marks(), 0);
        assert_eq!(m.current_reply_item(), None);
        assert_eq!(m.phase(), TurnPhase::CallerSpeaking);
        assert!(m.append_enabled());
    }

    #[test]
    fn test_repeated_speech_start_is_idempotent() {
        let mut m = replying(100, "item_a", 2);
        m.observe_inbound(300);
        let first = m.on_speech_started();
        assert_eq!(first.len(), 3);

        let second = m.on_speech_started();
        assert!(second.is_empty());
        assert_eq!(m.turn(), 2);
    }

    #[test]
    fn test_truncated_item_audio_dropped() {
        let mut m = replying(100, "item_a", 1);
        m.on_speech_started();
        assert!(m.accept_reply_chunk("item_a").is_none());
        assert_eq!(m.pending_marks(), 0);
    }

    #[test]
    fn test_speech_start_during_commit_ignored() {
        let mut m = machine();
        m.on_speech_started();
        m.on_speech_stopped();
        assert!(m.on_speech_started().is_empty());
        assert_eq!(m.phase(), TurnPhase::Committing);

        let ack = m.on_buffer_committed();
        assert_eq!(response_creates(&ack), 1);
    }

    #[test]
    fn test_reply_done_returns_to_idle() {
        let mut m = replying(0, "item_a", 2);
        let actions = m.on_response_done();
        assert!(actions.is_empty());
        assert_eq!(m.phase(), TurnPhase::Idle);
        assert!(m.append_enabled());
        assert_eq!(m.pending_marks(), 0);
        assert_eq!(m.current_reply_item(), None);
    }

    #[test]
    fn test_cancelled_reply_done_keeps_caller_turn() {
        let mut m = replying(0, "item_a", 2);
        m.on_speech_started();
        let actions = m.on_response_done();
        assert!(actions.is_empty());
        assert_eq!(m.phase(), TurnPhase::CallerSpeaking);

        // The caller's turn still ends normally.
        let stopped = m.on_speech_stopped();
        assert_eq!(commits(&stopped), 1);
    }

    #[test]
    fn test_audio_dropped_before_stream_start() {
        let mut m = TurnMachine::new(TurnConfig::default());
        assert!(m.accept_reply_chunk("item_a").is_none());
        assert_eq!(m.phase(), TurnPhase::Idle);
    }

    #[test]
    fn test_audio_delta_starts_reply_from_idle() {
        let mut m = machine();
        m.observe_inbound(40);
        assert_eq!(m.accept_reply_chunk("greeting").as_deref(), Some("MZ1"));
        assert_eq!(m.phase(), TurnPhase::AssistantReplying);
        assert_eq!(m.reply_playback_start(), Some(40));
        assert_eq!(m.current_reply_item(), Some("greeting"));
    }

    #[test]
    fn test_mark_on_empty_queue_ignored() {
        let mut m = replying(0, "item_a", 1);
        m.on_mark();
        assert_eq!(m.pending_marks(), 0);
        m.on_mark();
        assert_eq!(m.pending_marks(), 0);
    }

    #[test]
    fn test_listen_during_reply_reenables_forwarding() {
        let mut m = TurnMachine::new(TurnConfig {
            listen_during_reply: true,
            ..TurnConfig::default()
        });
        m.on_stream_start("MZ1");
        m.on_speech_started();
        m.on_speech_stopped();
        assert!(!m.append_enabled());
        m.on_buffer_committed();
        assert!(m.append_enabled());
    }

    #[test]
    fn test_tool_result_after_reply_requests_response() {
        let mut m = machine();
        m.on_speech_started();
        m.on_speech_stopped();
        m.on_buffer_committed();
        m.on_response_done();

        let actions = m.on_tool_result("call_1", r#"{"type":"no_slots"}"#);
        assert_eq!(actions.len(), 2);
        assert!(matches!(
            &actions[0],
            Action::Upstream(ClientEvent::ConversationItemCreate { item })
                if item.item_type == "function_call_output"
                    && item.call_id.as_deref() == Some("call_1")
        ));
        assert_eq!(actions[1], Action::Upstream(ClientEvent::ResponseCreate));
    }

    #[test]
    fn test_tool_result_during_response_waits_for_done() {
        let mut m = machine();
        m.on_speech_started();
        m.on_speech_stopped();
        m.on_buffer_committed();

        assert!(m.on_tool_result("call_1", "{}").is_empty());

        let done = m.on_response_done();
        assert_eq!(done.len(), 2);
        assert_eq!(done[1], Action::Upstream(ClientEvent::ResponseCreate));
    }

    #[test]
    fn test_tool_result_during_caller_turn_joins_next_response() {
        let mut m = machine();
        m.on_speech_started();
        assert!(m.on_tool_result("call_1", "{}").is_empty());

        m.on_speech_stopped();
        let ack = m.on_buffer_committed();
        assert_eq!(ack.len(), 2);
        assert!(matches!(
            ack[0],
            Action::Upstream(ClientEvent::ConversationItemCreate { .. })
        ));
        assert_eq!(ack[1], Action::Upstream(ClientEvent::ResponseCreate));
    }

    #[test]
    fn test_greeting_requests_response() {
        let mut m = machine();
        let actions = m.greet("Saluta il cliente");
        assert_eq!(response_creates(&actions), 1);
        // A tool output arriving meanwhile must not double-request.
        assert!(m.on_tool_result("call_1", "{}").is_empty());
    }
}
