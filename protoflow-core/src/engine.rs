use crate::types::*;
use std::sync::Arc;
use tracing::debug;

// ─── Errors ───────────────────────────────────────────────────

/// Navigation-time invariant violations. The loader is contractually
/// responsible for catching every recoverable issue before navigation
/// starts, so there is no recoverable error path here: any of these aborts
/// the session rather than guessing a fallback step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigationError {
    /// A jump target missing from the label index — impossible after a
    /// successful load.
    #[error("jump target '{label}' not in label index")]
    UnknownLabel { label: String },

    /// Selected option index out of range for the current step.
    #[error("selected option {index} out of range (step has {len} options)")]
    SelectionOutOfRange { index: usize, len: usize },

    /// A selection was supplied before any step was served.
    #[error("selection supplied before the first step was served")]
    SelectionWithoutStep,

    /// A resolved step index outside the step list — impossible after a
    /// successful load.
    #[error("step index {index} out of range (protocol has {len} steps)")]
    IndexOutOfRange { index: StepIndex, len: usize },
}

// ─── Cursor & outcomes ────────────────────────────────────────

/// The engine's sole mutable state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cursor {
    NotStarted,
    AtStep(StepIndex),
    Completed,
}

/// "User picked option N" (0-based), reported back by the presentation
/// layer for the step most recently served.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selection {
    pub option_index: usize,
}

/// Result of one navigation request.
#[derive(Debug, PartialEq, Eq)]
pub enum Progress<'a> {
    /// The next step to display.
    Step(&'a Step),
    /// Protocol finished. Absorbing: every subsequent request yields this
    /// same signal.
    Completed,
}

/// How the cursor moved, for the session layer's event emission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Move {
    Sequential,
    Jump { to: StepIndex },
}

// ─── Navigator ────────────────────────────────────────────────

/// Serves one step at a time from an immutable [`Protocol`] and resolves
/// branching decisions. Owns the cursor exclusively; the protocol itself is
/// shared read-only.
pub struct Navigator {
    protocol: Arc<Protocol>,
    cursor: Cursor,
}

impl Navigator {
    pub fn new(protocol: Arc<Protocol>) -> Self {
        Self {
            protocol,
            cursor: Cursor::NotStarted,
        }
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Read-only peek at the current step, for re-render after presentation
    /// changes. Never mutates the cursor.
    pub fn current_step(&self) -> Option<&Step> {
        match self.cursor {
            Cursor::AtStep(i) => self.protocol.step(i),
            Cursor::NotStarted | Cursor::Completed => None,
        }
    }

    /// The single external entry point: serve the next step.
    ///
    /// If the current step is branching and the selected option carries an
    /// explicit target label, jump to the label's resolved index; otherwise
    /// advance in strict sequential order. A branch option without a target
    /// falls back to exactly the sequential successor. Once `Completed`,
    /// every further call re-signals completion.
    pub fn next(&mut self, selection: Option<Selection>) -> Result<Progress<'_>, NavigationError> {
        let (_, progress) = self.next_move(selection)?;
        Ok(progress)
    }

    /// As [`Navigator::next`], also reporting how the cursor moved.
    pub fn next_move(
        &mut self,
        selection: Option<Selection>,
    ) -> Result<(Move, Progress<'_>), NavigationError> {
        let target = self.resolve_target(selection)?;

        let (mv, dest) = match target {
            Some(index) => (Move::Jump { to: index }, index),
            None => {
                let dest = match self.cursor {
                    Cursor::NotStarted => 0,
                    Cursor::AtStep(i) => i + 1,
                    Cursor::Completed => return Ok((Move::Sequential, Progress::Completed)),
                };
                (Move::Sequential, dest)
            }
        };

        if dest >= self.protocol.len() {
            debug!(?mv, "protocol completed");
            self.cursor = Cursor::Completed;
            return Ok((mv, Progress::Completed));
        }

        self.cursor = Cursor::AtStep(dest);
        debug!(?mv, index = dest, "cursor moved");
        // Unreachable given the bound check above; kept explicit so a
        // broken index surfaces as an error, not a panic.
        let step = self
            .protocol
            .step(dest)
            .ok_or(NavigationError::IndexOutOfRange {
                index: dest,
                len: self.protocol.len(),
            })?;
        Ok((mv, Progress::Step(step)))
    }

    /// Resolve the selection against the current step: `Some(index)` means
    /// an explicit jump, `None` means sequential advance.
    fn resolve_target(
        &self,
        selection: Option<Selection>,
    ) -> Result<Option<StepIndex>, NavigationError> {
        let Some(selection) = selection else {
            return Ok(None);
        };

        let step = match self.cursor {
            Cursor::AtStep(i) => self.protocol.step(i),
            // A stray selection after completion is harmless; before the
            // first step it is a caller bug.
            Cursor::Completed => return Ok(None),
            Cursor::NotStarted => return Err(NavigationError::SelectionWithoutStep),
        };
        let Some(step) = step else {
            return Ok(None);
        };

        if !step.is_branching() {
            // Plain scales and instructions always advance sequentially.
            return Ok(None);
        }

        let options = step.options();
        let option = options
            .get(selection.option_index)
            .ok_or(NavigationError::SelectionOutOfRange {
                index: selection.option_index,
                len: options.len(),
            })?;

        match &option.target {
            Some(label) => {
                let index = self
                    .protocol
                    .labels
                    .get(label)
                    .copied()
                    .ok_or_else(|| NavigationError::UnknownLabel {
                        label: label.clone(),
                    })?;
                Ok(Some(index))
            }
            None => Ok(None),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{load_lines, LoaderConfig};

    fn navigator(lines: &[&str]) -> Navigator {
        let protocol = load_lines(lines.iter().copied(), &LoaderConfig::default()).unwrap();
        Navigator::new(Arc::new(protocol))
    }

    fn pick(index: usize) -> Option<Selection> {
        Some(Selection {
            option_index: index,
        })
    }

    #[test]
    fn sequential_walk_visits_every_step_then_completes() {
        let mut nav = navigator(&[
            "INSTRUCTION;H;B;Next",
            "SCALE;H2;B2;I2;Low||;High||",
        ]);

        assert_eq!(nav.cursor(), Cursor::NotStarted);
        assert!(nav.current_step().is_none());

        match nav.next(None).unwrap() {
            Progress::Step(step) => assert_eq!(step.kind(), StepKind::Instruction),
            Progress::Completed => panic!("expected first step"),
        }
        assert_eq!(nav.cursor(), Cursor::AtStep(0));

        match nav.next(None).unwrap() {
            Progress::Step(step) => assert_eq!(step.kind(), StepKind::Scale),
            Progress::Completed => panic!("expected second step"),
        }

        // Answering the last scale completes the protocol.
        assert_eq!(nav.next(pick(0)).unwrap(), Progress::Completed);
        assert_eq!(nav.cursor(), Cursor::Completed);
    }

    #[test]
    fn completed_is_idempotent() {
        let mut nav = navigator(&["INSTRUCTION;H;B;Next"]);
        nav.next(None).unwrap();
        assert_eq!(nav.next(None).unwrap(), Progress::Completed);
        for _ in 0..3 {
            assert_eq!(nav.next(None).unwrap(), Progress::Completed);
            assert_eq!(nav.cursor(), Cursor::Completed);
        }
    }

    #[test]
    fn branch_with_target_jumps_over_steps() {
        let mut nav = navigator(&[
            "BRANCH_SCALE;H;B;I;A||goEnd;B||",
            "LABEL;mid",
            "INSTRUCTION;Mid;Body;Next",
            "LABEL;goEnd",
            "INSTRUCTION;End;Body;Next",
        ]);

        nav.next(None).unwrap();
        match nav.next(pick(0)).unwrap() {
            Progress::Step(step) => assert_eq!(step.header(), "End"),
            Progress::Completed => panic!("expected jump target"),
        }
        assert_eq!(nav.cursor(), Cursor::AtStep(2));
    }

    #[test]
    fn branch_without_target_advances_exactly_one_step() {
        let mut nav = navigator(&[
            "BRANCH_SCALE;H;B;I;A||goEnd;B||",
            "LABEL;mid",
            "INSTRUCTION;Mid;Body;Next",
            "LABEL;goEnd",
            "INSTRUCTION;End;Body;Next",
        ]);

        nav.next(None).unwrap();
        match nav.next(pick(1)).unwrap() {
            Progress::Step(step) => assert_eq!(step.header(), "Mid"),
            Progress::Completed => panic!("expected sequential successor"),
        }
        assert_eq!(nav.cursor(), Cursor::AtStep(1));
    }

    #[test]
    fn jump_to_trailing_label_completes() {
        let mut nav = navigator(&[
            "BRANCH_SCALE;H;B;I;Done||end;More||",
            "INSTRUCTION;More;Body;Next",
            "LABEL;end",
        ]);

        nav.next(None).unwrap();
        assert_eq!(nav.next(pick(0)).unwrap(), Progress::Completed);
    }

    #[test]
    fn selection_on_plain_scale_advances_sequentially() {
        let mut nav = navigator(&[
            "SCALE;H;B;I;Low||;High||",
            "INSTRUCTION;After;Body;Next",
        ]);

        nav.next(None).unwrap();
        match nav.next(pick(1)).unwrap() {
            Progress::Step(step) => assert_eq!(step.header(), "After"),
            Progress::Completed => panic!("expected next step"),
        }
    }

    #[test]
    fn out_of_range_selection_is_fatal() {
        let mut nav = navigator(&["BRANCH_SCALE;H;B;I;A||;B||"]);
        nav.next(None).unwrap();
        assert_eq!(
            nav.next(pick(5)).unwrap_err(),
            NavigationError::SelectionOutOfRange { index: 5, len: 2 }
        );
    }

    #[test]
    fn selection_before_first_step_is_fatal() {
        let mut nav = navigator(&["INSTRUCTION;H;B;Next"]);
        assert_eq!(
            nav.next(pick(0)).unwrap_err(),
            NavigationError::SelectionWithoutStep
        );
    }

    #[test]
    fn stray_selection_after_completion_is_ignored() {
        let mut nav = navigator(&["INSTRUCTION;H;B;Next"]);
        nav.next(None).unwrap();
        nav.next(None).unwrap();
        assert_eq!(nav.next(pick(0)).unwrap(), Progress::Completed);
    }

    #[test]
    fn current_step_peek_does_not_advance() {
        let mut nav = navigator(&["INSTRUCTION;H;B;Next", "INSTRUCTION;H2;B2;Next"]);
        nav.next(None).unwrap();
        assert_eq!(nav.current_step().unwrap().header(), "H");
        assert_eq!(nav.current_step().unwrap().header(), "H");
        assert_eq!(nav.cursor(), Cursor::AtStep(0));
    }
}
