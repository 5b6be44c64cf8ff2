use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ─── Scalar aliases ───────────────────────────────────────────

/// Absolute position in the step sequence.
pub type StepIndex = usize;

/// 1-based source line number (for diagnostics).
pub type LineNo = u32;

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

// ─── Transition mode ──────────────────────────────────────────

/// Global screen-transition configuration, set by a `TRANSITIONS` directive.
///
/// Consumed by the loader and threaded to whatever collaborator performs
/// screen transitions. Never ambient mutable state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionMode {
    #[default]
    Off,
    Slide,
}

impl TransitionMode {
    /// Parse the mode field of a `TRANSITIONS` directive (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("off") {
            Some(TransitionMode::Off)
        } else if s.eq_ignore_ascii_case("slide") {
            Some(TransitionMode::Slide)
        } else {
            None
        }
    }
}

// ─── Options ──────────────────────────────────────────────────

/// One selectable response option.
///
/// `target` is a label name for branch options; `None` means the selection
/// advances sequentially. An empty label field in the source (`A||`) parses
/// as `None`, never as an error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub display: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl OptionSpec {
    pub fn new(display: impl Into<String>, target: Option<String>) -> Self {
        Self {
            display: display.into(),
            target,
        }
    }
}

// ─── Directives ───────────────────────────────────────────────

/// One parsed protocol line, tagged by kind.
///
/// `Label` and `Transitions` are zero-width: they configure the loader and
/// never produce a screen. The screen-producing variants are converted to
/// [`Step`]s in source order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Directive {
    Instruction {
        header: String,
        body: String,
        next_button: String,
    },
    Scale {
        header: String,
        body: String,
        item: String,
        options: Vec<OptionSpec>,
    },
    BranchScale {
        header: String,
        body: String,
        item: String,
        options: Vec<OptionSpec>,
    },
    Label(String),
    Transitions(TransitionMode),
}

// ─── Steps ────────────────────────────────────────────────────

/// Discriminant of a screen-producing step, as exposed to collaborators
/// and carried on log events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Instruction,
    Scale,
    BranchScale,
}

/// Payload of a screen-producing step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StepBody {
    Instruction {
        header: String,
        body: String,
        next_button: String,
    },
    Scale {
        header: String,
        body: String,
        item: String,
        options: Vec<OptionSpec>,
    },
    BranchScale {
        header: String,
        body: String,
        item: String,
        options: Vec<OptionSpec>,
    },
}

/// The navigable unit — one screen. Derived one-to-one from a
/// screen-producing [`Directive`]; immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Absolute position in the step sequence.
    pub index: StepIndex,
    /// Source line the directive came from.
    pub line: LineNo,
    pub body: StepBody,
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self.body {
            StepBody::Instruction { .. } => StepKind::Instruction,
            StepBody::Scale { .. } => StepKind::Scale,
            StepBody::BranchScale { .. } => StepKind::BranchScale,
        }
    }

    pub fn header(&self) -> &str {
        match &self.body {
            StepBody::Instruction { header, .. }
            | StepBody::Scale { header, .. }
            | StepBody::BranchScale { header, .. } => header,
        }
    }

    pub fn body_text(&self) -> &str {
        match &self.body {
            StepBody::Instruction { body, .. }
            | StepBody::Scale { body, .. }
            | StepBody::BranchScale { body, .. } => body,
        }
    }

    /// Question text, present on scale-type steps only.
    pub fn item(&self) -> Option<&str> {
        match &self.body {
            StepBody::Instruction { .. } => None,
            StepBody::Scale { item, .. } | StepBody::BranchScale { item, .. } => Some(item),
        }
    }

    /// Response options, empty for instruction steps.
    pub fn options(&self) -> &[OptionSpec] {
        match &self.body {
            StepBody::Instruction { .. } => &[],
            StepBody::Scale { options, .. } | StepBody::BranchScale { options, .. } => options,
        }
    }

    /// True if a selected option on this step may carry a jump target.
    pub fn is_branching(&self) -> bool {
        matches!(self.body, StepBody::BranchScale { .. })
    }
}

// ─── Unrecognized lines ───────────────────────────────────────

/// A line matching no known directive shape. Collected, not fatal — a
/// protocol author benefits from seeing every problem at once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnrecognizedLine {
    pub line: LineNo,
    pub text: String,
}

// ─── Protocol ─────────────────────────────────────────────────

/// The loader's output — an immutable (step list, label index) pair plus
/// loader-level configuration. Safe to share read-only across any number
/// of concurrent readers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub steps: Vec<Step>,
    /// Label name → index of the next screen-producing step after the
    /// anchor. May equal `steps.len()` for a trailing label, meaning a
    /// jump to it completes the protocol.
    pub labels: BTreeMap<String, StepIndex>,
    pub transitions: TransitionMode,
    pub unrecognized: Vec<UnrecognizedLine>,
}

impl Protocol {
    pub fn step(&self, index: StepIndex) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
