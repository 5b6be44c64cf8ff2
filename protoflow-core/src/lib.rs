//! protoflow-core — a study-protocol interpreter.
//!
//! Drives a guided, screen-by-screen study protocol (instructions, scaled
//! questions, branching questions) from a line-oriented scripted format.
//! Three layers, leaves first:
//!
//! - [`types`] — the directive/step data model and the loaded [`Protocol`]
//!   value (step list + label index), immutable once constructed.
//! - [`loader`] — parses source lines into a `Protocol`, resolving label
//!   anchors and rejecting duplicate or dangling labels at load time.
//! - [`engine`] / [`session`] — the navigation cursor (advance or jump, one
//!   step per request) and the exactly-once event emission around it.
//!
//! Rendering, media playback, theming and durable log storage are external
//! collaborators: the core hands out plain step data and receives back
//! "option N chosen" via [`engine::Selection`]; log durability sits behind
//! the [`events::EventSink`] trait.

pub mod engine;
pub mod events;
pub mod loader;
pub mod session;
pub mod types;

pub use engine::{Cursor, Navigator, NavigationError, Progress, Selection};
pub use events::{EventSink, MemorySink, SessionEvent};
pub use loader::{load, load_lines, LoadError, LoaderConfig};
pub use session::Session;
pub use types::{
    OptionSpec, Protocol, Step, StepBody, StepIndex, StepKind, TransitionMode, UnrecognizedLine,
};
