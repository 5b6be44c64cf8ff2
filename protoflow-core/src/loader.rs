use crate::types::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Separator between directive fields.
const FIELD_SEP: char = ';';
/// Separator between an option's display text and its label field.
const OPTION_SEP: &str = "||";
/// Lines starting with this marker are skipped.
const COMMENT_MARKER: &str = "//";

// ─── Errors ───────────────────────────────────────────────────

/// Load-fatal protocol defects. Malformed individual lines are NOT here —
/// they are collected as [`UnrecognizedLine`]s and parsing continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// Two labels share a name — the jump target would be ambiguous.
    #[error("duplicate label '{name}' on line {line} (first defined on line {first_line})")]
    DuplicateLabel {
        name: String,
        line: LineNo,
        first_line: LineNo,
    },

    /// A branch option references a label never defined anywhere.
    #[error("branch option on line {line} targets undefined label '{name}'")]
    DanglingLabel { name: String, line: LineNo },

    /// No screen-producing steps — navigation would have nothing to show.
    #[error("protocol contains no screen-producing steps")]
    EmptyProtocol,
}

// ─── Configuration ────────────────────────────────────────────

/// Loader-level configuration applied once, before navigation begins.
#[derive(Debug, Clone, Default)]
pub struct LoaderConfig {
    /// Shuffle each step's option order at load time. The shuffled order is
    /// frozen into the step and never re-shuffled per render, so navigation
    /// stays deterministic given a fixed user choice sequence.
    pub randomize_options: bool,
    /// Fixed RNG seed for reproducible shuffles. `None` = entropy-seeded.
    pub seed: Option<u64>,
}

// ─── Loader ───────────────────────────────────────────────────

/// Parse full protocol source into an immutable [`Protocol`].
pub fn load(source: &str, config: &LoaderConfig) -> Result<Protocol, LoadError> {
    load_lines(source.lines(), config)
}

/// Parse pre-split protocol source.
///
/// Processes lines in source order: blank/comment lines are skipped, global
/// directives configure the loader, label anchors are held pending and
/// patched to the index of the next screen-producing step, and anything
/// matching no known shape is collected as unrecognized. Label integrity is
/// checked before returning — a navigable protocol has no dangling or
/// duplicate labels.
pub fn load_lines<'a, I>(lines: I, config: &LoaderConfig) -> Result<Protocol, LoadError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut steps: Vec<Step> = Vec::new();
    let mut labels: BTreeMap<String, StepIndex> = BTreeMap::new();
    let mut label_lines: BTreeMap<String, LineNo> = BTreeMap::new();
    let mut pending_labels: Vec<(String, LineNo)> = Vec::new();
    let mut transitions = TransitionMode::default();
    let mut unrecognized: Vec<UnrecognizedLine> = Vec::new();

    for (idx, raw) in lines.into_iter().enumerate() {
        let line_no = (idx + 1) as LineNo;
        let line = raw.trim();
        if line.is_empty() || line.starts_with(COMMENT_MARKER) {
            continue;
        }

        match parse_line(line) {
            Some(Directive::Transitions(mode)) => {
                debug!(line = line_no, ?mode, "transitions directive");
                transitions = mode;
            }
            Some(Directive::Label(name)) => {
                debug!(line = line_no, label = %name, "label anchor");
                pending_labels.push((name, line_no));
            }
            Some(directive) => {
                let index = steps.len();
                let mut step = to_step(directive, index, line_no);
                if config.randomize_options {
                    shuffle_options(&mut step, &mut rng);
                }
                debug!(line = line_no, index, kind = ?step.kind(), "step");
                // The anchor resolves to the step that follows it, which is
                // only known now that the step exists.
                resolve_pending(&mut pending_labels, index, &mut labels, &mut label_lines)?;
                steps.push(step);
            }
            None => {
                warn!(line = line_no, text = %line, "unrecognized protocol line");
                unrecognized.push(UnrecognizedLine {
                    line: line_no,
                    text: line.to_string(),
                });
            }
        }
    }

    // Trailing anchors resolve past the end: jumping to them completes the
    // protocol.
    resolve_pending(&mut pending_labels, steps.len(), &mut labels, &mut label_lines)?;

    if steps.is_empty() {
        return Err(LoadError::EmptyProtocol);
    }

    // Every referenced label must resolve before the protocol becomes
    // navigable; a dangling jump is a load-time error, never a runtime one.
    for step in &steps {
        for opt in step.options() {
            if let Some(target) = &opt.target {
                if !labels.contains_key(target) {
                    return Err(LoadError::DanglingLabel {
                        name: target.clone(),
                        line: step.line,
                    });
                }
            }
        }
    }

    info!(
        steps = steps.len(),
        labels = labels.len(),
        unrecognized = unrecognized.len(),
        ?transitions,
        "protocol loaded"
    );

    Ok(Protocol {
        steps,
        labels,
        transitions,
        unrecognized,
    })
}

fn resolve_pending(
    pending: &mut Vec<(String, LineNo)>,
    index: StepIndex,
    labels: &mut BTreeMap<String, StepIndex>,
    label_lines: &mut BTreeMap<String, LineNo>,
) -> Result<(), LoadError> {
    for (name, line) in pending.drain(..) {
        if let Some(&first_line) = label_lines.get(&name) {
            return Err(LoadError::DuplicateLabel {
                name,
                line,
                first_line,
            });
        }
        labels.insert(name.clone(), index);
        label_lines.insert(name, line);
    }
    Ok(())
}

// ─── Line grammar ─────────────────────────────────────────────

/// Recognize one trimmed, non-blank, non-comment line. `None` = no known
/// directive shape.
fn parse_line(line: &str) -> Option<Directive> {
    let fields: Vec<&str> = line.split(FIELD_SEP).collect();
    let keyword = fields[0];

    // TRANSITIONS is case-insensitive in both keyword and mode, matching
    // the observed authoring convention.
    if keyword.eq_ignore_ascii_case("TRANSITIONS") && fields.len() == 2 {
        return TransitionMode::parse(fields[1].trim()).map(Directive::Transitions);
    }

    match keyword {
        "INSTRUCTION" if fields.len() == 4 => Some(Directive::Instruction {
            header: fields[1].to_string(),
            body: fields[2].to_string(),
            next_button: fields[3].to_string(),
        }),
        "SCALE" if fields.len() >= 5 => Some(Directive::Scale {
            header: fields[1].to_string(),
            body: fields[2].to_string(),
            item: fields[3].to_string(),
            options: fields[4..].iter().map(|f| parse_option(f)).collect(),
        }),
        "BRANCH_SCALE" if fields.len() >= 5 => Some(Directive::BranchScale {
            header: fields[1].to_string(),
            body: fields[2].to_string(),
            item: fields[3].to_string(),
            options: fields[4..].iter().map(|f| parse_option(f)).collect(),
        }),
        "LABEL" if fields.len() == 2 && !fields[1].trim().is_empty() => {
            Some(Directive::Label(fields[1].trim().to_string()))
        }
        _ => None,
    }
}

/// Parse one `display||label` option field. A missing or empty label part
/// means "no explicit target" (sequential advance on selection).
fn parse_option(field: &str) -> OptionSpec {
    let mut parts = field.split(OPTION_SEP);
    let display = parts.next().unwrap_or("").to_string();
    let target = parts
        .next()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    OptionSpec { display, target }
}

fn to_step(directive: Directive, index: StepIndex, line: LineNo) -> Step {
    let body = match directive {
        Directive::Instruction {
            header,
            body,
            next_button,
        } => StepBody::Instruction {
            header,
            body,
            next_button,
        },
        Directive::Scale {
            header,
            body,
            item,
            options,
        } => StepBody::Scale {
            header,
            body,
            item,
            options,
        },
        Directive::BranchScale {
            header,
            body,
            item,
            options,
        } => StepBody::BranchScale {
            header,
            body,
            item,
            options,
        },
        // Zero-width directives are handled by the loader loop.
        Directive::Label(_) | Directive::Transitions(_) => unreachable!("not screen-producing"),
    };
    Step { index, line, body }
}

/// Shuffle display/target pairs together, once, at load time.
fn shuffle_options(step: &mut Step, rng: &mut StdRng) {
    match &mut step.body {
        StepBody::Instruction { .. } => {}
        StepBody::Scale { options, .. } | StepBody::BranchScale { options, .. } => {
            options.shuffle(rng);
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────
