//! Sample routines registered by `routines_server --demo`.
//!
//! They double as a reference for task authors: each one shows a different
//! way of drawing progress with the rewrite tokens.

use crate::config::RoutineSettings;
use crate::registry::{Task, TaskGroup, TaskRegistryBuilder};
use crate::stream::Stream;
use routines_protocol::REWIND_LINE;
use serde_json::Value;
use std::fmt::Write;
use std::thread;
use std::time::Duration;

const SPINNER_FRAMES: [&str; 4] = ["-", "\\", "|", "/"];
const BAR_WIDTH: usize = 50;

/// Adds the demo groups to `builder`.
pub fn register(builder: TaskRegistryBuilder) -> TaskRegistryBuilder {
    builder
        .group(
            TaskGroup::new("Demo")
                .task("Spinner", spinner)
                .task("Progress bar", progress_bar)
                .task("Echo arguments", echo_arguments)
                .add(
                    Task::new("Demo", "Batch with time budget", batch)
                        .priority(20)
                        .settings(RoutineSettings::default().with_exec_time(60)),
                )
                .add(Task::new("Demo", "Failing task", failing).priority(30)),
        )
        .group(
            TaskGroup::new("Maintenance")
                .settings(
                    RoutineSettings::default()
                        .without_start_banner()
                        .without_stop_banner(),
                )
                .task("Memory report", memory_report),
        )
}

/// `args[index]` as a number, accepting numeric strings too.
fn arg_u64(args: &[Value], index: usize, default: u64) -> u64 {
    match args.get(index) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

/// `args[0]` rounds of a four-frame spinner, 100 ms per frame.
fn spinner(stream: &mut Stream, args: &[Value]) -> anyhow::Result<()> {
    let rounds = arg_u64(args, 0, 3);
    stream.send("Working", 3, 0);
    for _ in 0..rounds {
        for frame in SPINNER_FRAMES {
            if !stream.send_line(format!("{REWIND_LINE}{frame}")) {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(100));
        }
    }
    stream.send_line("Spinner finished");
    Ok(())
}

/// Counts to 100% with a redrawn header and bar. `args[0]` is the delay per
/// step in milliseconds.
fn progress_bar(stream: &mut Stream, args: &[Value]) -> anyhow::Result<()> {
    let delay = Duration::from_millis(arg_u64(args, 0, 30));
    stream.flush(3, 0);

    for percent in 1..=100usize {
        stream.send_line(format!("{REWIND_LINE}{REWIND_LINE}{percent}%"));
        let filled = percent * BAR_WIDTH / 100;
        write!(stream, "[{}", "=".repeat(filled))?;
        if filled < BAR_WIDTH {
            write!(stream, ">{}", " ".repeat(BAR_WIDTH - filled - 1))?;
        }
        stream.write_char(']')?;
        if !stream.flush(1, 0) {
            return Ok(());
        }
        thread::sleep(delay);
    }
    Ok(())
}

fn echo_arguments(stream: &mut Stream, args: &[Value]) -> anyhow::Result<()> {
    let noun = if args.len() == 1 { "argument" } else { "arguments" };
    stream.send_line(format!("Received {} {noun}:", args.len()));
    stream.send_line(Value::Array(args.to_vec()));
    Ok(())
}

/// Works through `args[0]` items of 200 ms each, stopping early when less
/// than a second of execution time remains.
fn batch(stream: &mut Stream, args: &[Value]) -> anyhow::Result<()> {
    let total = arg_u64(args, 0, 50);
    let mut done = 0;
    stream.send("", 1, 0);

    while done < total {
        if stream
            .time_remaining()
            .is_some_and(|left| left < Duration::from_secs(1))
        {
            stream.send_line(format!(
                "{REWIND_LINE}Out of time after {done} of {total} items, run again to continue."
            ));
            return Ok(());
        }
        thread::sleep(Duration::from_millis(200));
        done += 1;
        stream.send_line(format!("{REWIND_LINE}Processed {done} of {total} items"));
    }
    stream.send_line(format!("{REWIND_LINE}All {total} items processed."));
    Ok(())
}

fn failing(stream: &mut Stream, _args: &[Value]) -> anyhow::Result<()> {
    stream.send_line("Step 1 of 2 done");
    anyhow::bail!("step 2 could not reach the upstream service")
}

fn memory_report(stream: &mut Stream, _args: &[Value]) -> anyhow::Result<()> {
    stream.send_line(format!(
        "Current: {} MB, peak: {} MB, limit: {}",
        stream.memory_usage_mb(),
        stream.peak_memory_mb(),
        stream.memory_limit()
    ));
    Ok(())
}
