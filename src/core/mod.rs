pub mod realtime;
pub mod relay;
pub mod scheduling;
pub mod session;
pub mod tools;
pub mod transport;
pub mod turn;

// Re-export commonly used types for convenience
pub use realtime::{
    ClientEvent, OpenAIRealtime, RealtimeConfig, RealtimeConnector, RealtimeError,
    RealtimeResult, ServerEvent, UpstreamEvent, UpstreamLink,
};

pub use session::{SessionSettings, TransportLink, open_session};

pub use tools::{ToolDispatcher, ToolInvocation, scheduling_tools};

pub use transport::{InboundFrame, OutboundFrame, TransportRoute};

pub use turn::{Action, TurnConfig, TurnMachine, TurnPhase};

pub use scheduling::{Scheduler, SchedulingError, SchedulingResult};
