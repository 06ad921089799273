//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async code uses `tokio::fs` and `tokio::net`. Blocking calls
//! are fine in plain functions that run before the runtime does work, such
//! as config loading.

use architectural_enforcement::{code_part, in_async_fn, production_sources, report, Violation};

const BLOCKING: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::TcpStream", "Blocking network I/O"),
    ("std::net::TcpListener", "Blocking network I/O"),
    ("std::net::UdpSocket", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("std::io::stdin()", "Blocking stdin"),
];

#[test]
fn test_no_blocking_io_in_async_code() {
    let mut violations = Vec::new();

    for (path, lines) in production_sources() {
        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);
            for (needle, reason) in BLOCKING {
                if code.contains(needle) && in_async_fn(&lines, idx) {
                    violations.push(Violation {
                        path: path.clone(),
                        line: idx + 1,
                        reason,
                        text: line.trim().to_string(),
                    });
                }
            }
        }
    }

    report(
        "Blocking I/O found in async code!",
        &[
            "tokio::fs::read_to_string(..).await, tokio::fs::write(..).await",
            "tokio::net::TcpListener::bind(..).await",
            "tokio::io::stdin() with AsyncBufReadExt",
        ],
        &violations,
    );
}
