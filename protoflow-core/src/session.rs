use crate::engine::{Cursor, Move, Navigator, NavigationError, Progress, Selection};
use crate::events::{now_ms, EventSink, SessionEvent};
use crate::types::*;
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// One protocol run: a [`Navigator`] plus the exactly-once event emission
/// contract.
///
/// Every instruction served, every recorded response, every cursor movement
/// and the completion signal are appended to the sink exactly once.
/// [`Session::current_step`] never emits — re-rendering after a presentation
/// change is always safe.
pub struct Session {
    navigator: Navigator,
    sink: Arc<dyn EventSink>,
    session_id: Uuid,
    completed_logged: bool,
}

/// Response details captured before the cursor moves, so the event refers
/// to the step the user actually answered.
struct PendingResponse {
    step_index: StepIndex,
    kind: StepKind,
    header: String,
    body: String,
    item: String,
    option_index: usize,
    display: String,
    target: Option<String>,
}

impl Session {
    /// Start a session over a loaded protocol. Emits `SessionStarted`.
    pub fn start(protocol: Arc<Protocol>, sink: Arc<dyn EventSink>) -> Result<Self> {
        let session_id = Uuid::now_v7();
        sink.append(&SessionEvent::SessionStarted {
            session_id,
            step_count: protocol.len(),
            transitions: protocol.transitions,
        })?;
        info!(%session_id, steps = protocol.len(), "session started");
        Ok(Self {
            navigator: Navigator::new(protocol),
            sink,
            session_id,
            completed_logged: false,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        self.navigator.protocol()
    }

    pub fn cursor(&self) -> Cursor {
        self.navigator.cursor()
    }

    /// Read-only peek; never emits events.
    pub fn current_step(&self) -> Option<&Step> {
        self.navigator.current_step()
    }

    /// Serve the next step, recording the previous step's response (if any)
    /// and the resulting cursor movement on the event stream.
    pub fn next(&mut self, selection: Option<Selection>) -> Result<Progress<'_>> {
        let (selection, response) = self.prepare_response(selection)?;
        let from = self.navigator.cursor();

        let (mv, progress) = self.navigator.next_move(selection)?;

        if let Some(r) = response {
            self.sink.append(&SessionEvent::ResponseRecorded {
                step_index: r.step_index,
                kind: r.kind,
                header: r.header,
                body: r.body,
                item: r.item,
                // 1-based in the log.
                option_index: r.option_index + 1,
                display: r.display,
                target: r.target.clone(),
            })?;
            if let (Move::Jump { to }, Cursor::AtStep(i), Some(label)) = (mv, from, r.target) {
                self.sink
                    .append(&SessionEvent::JumpTaken { from: i, to, label })?;
            }
        }

        match &progress {
            Progress::Step(step) => {
                if mv == Move::Sequential {
                    self.sink
                        .append(&SessionEvent::Advanced { to: step.index })?;
                }
                if let StepBody::Instruction { header, body, .. } = &step.body {
                    self.sink.append(&SessionEvent::InstructionShown {
                        step_index: step.index,
                        line: step.line,
                        header: header.clone(),
                        body: body.clone(),
                    })?;
                }
            }
            Progress::Completed => {
                if !self.completed_logged {
                    self.completed_logged = true;
                    self.sink
                        .append(&SessionEvent::SessionCompleted { at: now_ms() })?;
                }
            }
        }

        Ok(progress)
    }

    /// Validate the incoming selection against the current step and capture
    /// the response event payload before the cursor moves. A selection on a
    /// non-question step is dropped with a warning rather than treated as a
    /// response.
    fn prepare_response(
        &self,
        selection: Option<Selection>,
    ) -> Result<(Option<Selection>, Option<PendingResponse>), NavigationError> {
        let Some(sel) = selection else {
            return Ok((None, None));
        };

        let Some(step) = self.navigator.current_step() else {
            if self.navigator.cursor() == Cursor::Completed {
                return Ok((None, None));
            }
            return Err(NavigationError::SelectionWithoutStep);
        };

        let (header, body, item, options) = match &step.body {
            StepBody::Scale {
                header,
                body,
                item,
                options,
            }
            | StepBody::BranchScale {
                header,
                body,
                item,
                options,
            } => (header, body, item, options),
            StepBody::Instruction { .. } => {
                warn!(
                    step = step.index,
                    "selection supplied on an instruction step; ignoring"
                );
                return Ok((None, None));
            }
        };

        let option =
            options
                .get(sel.option_index)
                .ok_or(NavigationError::SelectionOutOfRange {
                    index: sel.option_index,
                    len: options.len(),
                })?;

        let response = PendingResponse {
            step_index: step.index,
            kind: step.kind(),
            header: header.clone(),
            body: body.clone(),
            item: item.clone(),
            option_index: sel.option_index,
            display: option.display.clone(),
            target: option.target.clone(),
        };
        Ok((Some(sel), Some(response)))
    }
}

// ─── Tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::loader::{load_lines, LoaderConfig};

    fn session(lines: &[&str]) -> (Session, Arc<MemorySink>) {
        let protocol = load_lines(lines.iter().copied(), &LoaderConfig::default()).unwrap();
        let sink = Arc::new(MemorySink::new());
        let session = Session::start(Arc::new(protocol), sink.clone()).unwrap();
        (session, sink)
    }

    fn pick(index: usize) -> Option<Selection> {
        Some(Selection {
            option_index: index,
        })
    }

    fn count<F: Fn(&SessionEvent) -> bool>(sink: &MemorySink, f: F) -> usize {
        sink.events().iter().filter(|e| f(e)).count()
    }

    #[test]
    fn scripted_walk_logs_each_event_exactly_once() {
        let (mut session, sink) = session(&[
            "INSTRUCTION;H;B;Next",
            "SCALE;H2;B2;I2;Low||;High||",
        ]);

        assert!(matches!(session.next(None).unwrap(), Progress::Step(_)));
        assert!(matches!(session.next(None).unwrap(), Progress::Step(_)));
        assert!(matches!(session.next(pick(0)).unwrap(), Progress::Completed));

        // Late re-requests after completion emit nothing new.
        assert!(matches!(session.next(None).unwrap(), Progress::Completed));
        assert!(matches!(session.next(None).unwrap(), Progress::Completed));

        assert_eq!(
            count(&sink, |e| matches!(e, SessionEvent::SessionStarted { .. })),
            1
        );
        assert_eq!(
            count(&sink, |e| matches!(e, SessionEvent::InstructionShown { .. })),
            1
        );
        assert_eq!(
            count(&sink, |e| matches!(e, SessionEvent::ResponseRecorded { .. })),
            1
        );
        assert_eq!(
            count(&sink, |e| matches!(e, SessionEvent::SessionCompleted { .. })),
            1
        );
    }

    #[test]
    fn response_event_carries_one_based_index_and_display_text() {
        let (mut session, sink) = session(&[
            "SCALE;How tired?;Pick one;Fatigue;Not at all||;Very much||",
            "INSTRUCTION;Done;Body;Next",
        ]);

        session.next(None).unwrap();
        session.next(pick(1)).unwrap();

        let recorded = sink
            .events()
            .into_iter()
            .find(|e| matches!(e, SessionEvent::ResponseRecorded { .. }))
            .unwrap();
        assert_eq!(
            recorded,
            SessionEvent::ResponseRecorded {
                step_index: 0,
                kind: StepKind::Scale,
                header: "How tired?".to_string(),
                body: "Pick one".to_string(),
                item: "Fatigue".to_string(),
                option_index: 2,
                display: "Very much".to_string(),
                target: None,
            }
        );
    }

    #[test]
    fn branch_jump_is_recorded_with_its_label() {
        let (mut session, sink) = session(&[
            "BRANCH_SCALE;H;B;I;A||goEnd;B||",
            "LABEL;mid",
            "INSTRUCTION;Mid;Body;Next",
            "LABEL;goEnd",
            "INSTRUCTION;End;Body;Next",
        ]);

        session.next(None).unwrap();
        match session.next(pick(0)).unwrap() {
            Progress::Step(step) => assert_eq!(step.header(), "End"),
            Progress::Completed => panic!("expected jump target"),
        }

        let events = sink.events();
        assert!(events.contains(&SessionEvent::JumpTaken {
            from: 0,
            to: 2,
            label: "goEnd".to_string(),
        }));
        // A jump is not also an advance.
        assert_eq!(count(&sink, |e| matches!(e, SessionEvent::Advanced { .. })), 1);
    }

    #[test]
    fn branch_fallback_advances_and_records_response() {
        let (mut session, sink) = session(&[
            "BRANCH_SCALE;H;B;I;A||goEnd;B||",
            "LABEL;mid",
            "INSTRUCTION;Mid;Body;Next",
            "LABEL;goEnd",
            "INSTRUCTION;End;Body;Next",
        ]);

        session.next(None).unwrap();
        match session.next(pick(1)).unwrap() {
            Progress::Step(step) => assert_eq!(step.header(), "Mid"),
            Progress::Completed => panic!("expected sequential successor"),
        }

        assert_eq!(count(&sink, |e| matches!(e, SessionEvent::JumpTaken { .. })), 0);
        assert_eq!(
            count(&sink, |e| matches!(e, SessionEvent::ResponseRecorded { .. })),
            1
        );
    }

    #[test]
    fn selection_on_instruction_is_ignored_not_recorded() {
        let (mut session, sink) = session(&[
            "INSTRUCTION;H;B;Next",
            "INSTRUCTION;H2;B2;Next",
        ]);

        session.next(None).unwrap();
        // Stray selection: treated as plain advance.
        match session.next(pick(0)).unwrap() {
            Progress::Step(step) => assert_eq!(step.header(), "H2"),
            Progress::Completed => panic!("expected second instruction"),
        }
        assert_eq!(
            count(&sink, |e| matches!(e, SessionEvent::ResponseRecorded { .. })),
            0
        );
        assert_eq!(
            count(&sink, |e| matches!(e, SessionEvent::InstructionShown { .. })),
            2
        );
    }

    #[test]
    fn current_step_peek_emits_nothing() {
        let (mut session, sink) = session(&["INSTRUCTION;H;B;Next"]);
        session.next(None).unwrap();
        let before = sink.events().len();
        let _ = session.current_step();
        let _ = session.current_step();
        assert_eq!(sink.events().len(), before);
    }

    #[test]
    fn out_of_range_scale_selection_is_fatal_and_logs_nothing() {
        let (mut session, sink) = session(&["SCALE;H;B;I;Low||;High||"]);
        session.next(None).unwrap();
        let before = sink.events().len();
        assert!(session.next(pick(9)).is_err());
        assert_eq!(sink.events().len(), before);
    }
}
