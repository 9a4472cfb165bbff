//! Replays the two canonical animations a routine draws with rewrite tokens.

use routines_protocol::{REWIND_LINE, Reconstructor};

/// Mirrors the server's `send`: leading newlines, content, trailing newlines.
fn send(console: &mut Reconstructor, content: &str, after: usize, before: usize) {
    let frame = format!("{}{content}{}", "\n".repeat(before), "\n".repeat(after));
    console.push(frame.as_bytes());
}

#[test]
fn test_progress_bar_leaves_one_header_and_one_bar() {
    let mut console = Reconstructor::new();
    send(&mut console, "", 3, 0);

    for i in 1..=100 {
        send(&mut console, &format!("{REWIND_LINE}{REWIND_LINE}{i}%"), 1, 0);
        send(&mut console, "[", 0, 0);
        for j in 1..=100 {
            let cell = if j < i || i == 100 {
                "="
            } else if j == i {
                ">"
            } else {
                " "
            };
            send(&mut console, cell, 0, 0);
        }
        send(&mut console, "]", 1, 0);

        let text = console.text();
        assert_eq!(text.lines().count(), 2, "after frame {i}: {text:?}");
        assert!(text.starts_with(&format!("{i}%\n[")));
    }

    console.finish();
    let expected = format!("100%\n[{}]\n", "=".repeat(100));
    assert_eq!(console.text(), expected);
}

#[test]
fn test_progress_bar_below_start_banner_keeps_the_banner() {
    let mut console = Reconstructor::new();
    send(
        &mut console,
        "Memory limit set: 512M. Max execution time set: 720 seconds.",
        2,
        0,
    );
    send(&mut console, "", 3, 0);

    for i in 1..=10 {
        send(&mut console, &format!("\\a\\a{i}%"), 1, 0);
        send(&mut console, &format!("[{}]", "=".repeat(i)), 1, 0);
    }

    assert_eq!(
        console.text(),
        format!(
            "Memory limit set: 512M. Max execution time set: 720 seconds.\n10%\n[{}]\n",
            "=".repeat(10)
        )
    );
}

#[test]
fn test_spinner_from_empty_buffer_ends_on_last_frame() {
    let mut console = Reconstructor::new();
    for _ in 0..5 {
        for frame in ["\\a-", "\\a\\", "\\a|", "\\a/"] {
            send(&mut console, frame, 0, 0);
            // `\a\` ends in a held backslash, so it may show nothing yet.
            assert!(console.text().chars().count() <= 1);
        }
    }
    console.finish();
    assert_eq!(console.text(), "/");
}

#[test]
fn test_incremental_observation_matches_chunked_push() {
    let body = "Working\n\n\n\\a-\n\\a\\\n\\a|\n\\a/\nfinished\n";

    let mut observed = Reconstructor::new();
    let mut received = Vec::new();
    for byte in body.bytes() {
        received.push(byte);
        observed.observe(&received);
    }
    observed.finish();

    let mut pushed = Reconstructor::new();
    pushed.push(body.as_bytes());
    pushed.finish();

    assert_eq!(observed.text(), pushed.text());
    assert_eq!(observed.text(), "Working\n/\nfinished\n");
    assert_eq!(observed.raw_len(), body.len());
}
