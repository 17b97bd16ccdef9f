#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use,
    clippy::cast_precision_loss
)]

pub mod approval;
pub mod compaction;
pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod metadata;
pub mod provider;
pub mod retry;
pub mod soul;
pub mod timetravel;
pub mod tools;
pub mod toolset;
pub mod wire;

pub use approval::{ApprovalQueue, ApprovalRequest, ApprovalSender};
pub use compaction::{Compaction, SimpleCompaction};
pub use config::Config;
pub use context::{Context, SharedContext};
pub use error::{ContextError, MetaError, ProviderError, RunError, TimeTravelError};
pub use message::{ContentPart, Message, Role, ToolCall};
pub use metadata::{MetadataStore, PinPolicy, PinRecord};
pub use provider::{ChatProvider, StepResult, Usage};
pub use soul::{Soul, SoulParams};
pub use toolset::{
    InvocationScope, SimpleToolset, Tool, ToolOutcome, ToolReturn, ToolSpec, Toolset,
};
pub use wire::{StatusSnapshot, Wire, WireEvent};
