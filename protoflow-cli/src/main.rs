//! Terminal runner for protoflow — the reference presentation collaborator.
//!
//! Loads a protocol file, renders each step as text, reads selections from
//! stdin and appends session events as JSON lines to a log file.

use anyhow::{anyhow, bail, Context, Result};
use protoflow_core::events::{EventSink, SessionEvent};
use protoflow_core::{load, LoaderConfig, Progress, Selection, Session, Step, TransitionMode};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// EventSink writing one JSON object per line — the durable-logging
/// collaborator for interactive runs.
struct JsonLinesSink {
    writer: Mutex<BufWriter<File>>,
    seq: Mutex<u64>,
}

impl JsonLinesSink {
    fn create(path: &str) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("creating event log {path}"))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            seq: Mutex::new(0),
        })
    }
}

impl EventSink for JsonLinesSink {
    fn append(&self, event: &SessionEvent) -> Result<u64> {
        let line = serde_json::to_string(event)?;
        let mut writer = self.writer.lock().map_err(|e| anyhow!("Lock: {}", e))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        let mut seq = self.seq.lock().map_err(|e| anyhow!("Lock: {}", e))?;
        *seq += 1;
        Ok(*seq)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(protocol_path) = args.next() else {
        bail!("usage: protoflow <protocol.txt> [events.jsonl]");
    };
    let events_path = args.next().unwrap_or_else(|| "events.jsonl".to_string());

    let source = std::fs::read_to_string(&protocol_path)
        .with_context(|| format!("reading protocol {protocol_path}"))?;

    let protocol = load(&source, &LoaderConfig::default())
        .with_context(|| format!("loading protocol {protocol_path}"))?;

    for bad in &protocol.unrecognized {
        eprintln!("warning: line {}: unrecognized directive: {}", bad.line, bad.text);
    }
    info!(steps = protocol.len(), path = %protocol_path, "protocol ready");

    let transitions = protocol.transitions;
    let sink = Arc::new(JsonLinesSink::create(&events_path)?);
    let mut session = Session::start(Arc::new(protocol), sink)?;

    let stdin = io::stdin();
    let mut selection: Option<Selection> = None;
    loop {
        match session.next(selection.take())? {
            Progress::Completed => {
                println!("\nProtocol complete. Events written to {events_path}.");
                return Ok(());
            }
            Progress::Step(step) => {
                render(step, transitions);
                selection = prompt(step, &stdin)?;
            }
        }
    }
}

fn render(step: &Step, transitions: TransitionMode) {
    match transitions {
        TransitionMode::Off => println!("\n{}", "=".repeat(60)),
        TransitionMode::Slide => println!("\n{}", ">".repeat(60)),
    }
    if !step.header().is_empty() {
        println!("{}\n", step.header());
    }
    if !step.body_text().is_empty() {
        println!("{}\n", step.body_text());
    }
    if let Some(item) = step.item() {
        println!("  {item}\n");
    }
    for (i, opt) in step.options().iter().enumerate() {
        println!("  [{}] {}", i + 1, opt.display);
    }
}

/// Read the user's answer for the rendered step: Enter on instructions,
/// an option number on questions.
fn prompt(step: &Step, stdin: &io::Stdin) -> Result<Option<Selection>> {
    let options = step.options();
    loop {
        if options.is_empty() {
            print!("\n[Enter] to continue: ");
        } else {
            print!("\nchoice (1-{}): ", options.len());
        }
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            bail!("stdin closed before the protocol completed");
        }
        let input = input.trim();

        if options.is_empty() {
            return Ok(None);
        }
        match input.parse::<usize>() {
            Ok(n) if (1..=options.len()).contains(&n) => {
                return Ok(Some(Selection { option_index: n - 1 }));
            }
            _ => println!("enter a number between 1 and {}", options.len()),
        }
    }
}
