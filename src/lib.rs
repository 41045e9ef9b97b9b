//! Event-sourced choreography: aggregate streams, process stages that react
//! to one another's notification logs, and cursor-paginated reads.

mod aggregate;
mod config;
mod context;
mod error;
mod event;
mod live;
mod notification;
mod policy;
mod recorder;
mod retry;
mod runner;
mod stage;
mod storage;
mod topology;

pub mod api;
pub mod domain;
pub mod pagination;

pub use aggregate::{Aggregate, AggregateRoot, Change};
pub use config::RunnerConfig;
pub use context::{ContextError, RunnerContext};
pub use error::{ExecuteError, LookupError, PolicyError, StageError, StoreError};
pub use event::{
    CausalDependency, NewEvent, Notification, StoredEvent, decode_domain_event,
    encode_domain_event, topic,
};
pub use live::RunnerHandle;
pub use notification::{LogReader, NotificationLog};
pub use policy::{Inbound, Policy, Reaction, Repository, TopicEvent};
pub use recorder::{
    DeadLetter, EventQuery, MemoryRecorder, Recorder, StreamWrite, Tracking, Transaction,
};
pub use retry::RetryPolicy;
pub use runner::{RunReport, SystemBuilder, SystemRunner};
pub use stage::{ProcessStage, StageState, StepOutcome};
pub use storage::FileRecorder;
pub use topology::{Edge, Topology, TopologyError};
