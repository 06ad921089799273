//! Integration Test: Sleep Prohibition
//!
//! **Policy**: production code waits on I/O, channels or timers. It never
//! sleeps to poll or to paper over a race.
//! **Exceptions**: debounce timers and the `update-all` spacing gap, both
//! `tokio::time::sleep` on a delay that is the feature itself.

use architectural_enforcement::{
    code_part, context_mentions, production_sources, report, Violation,
};

const TIMER_WORDS: &[&str] = &["debounce", "schedule", "spacing", "delay"];

#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();

    for (path, lines) in production_sources() {
        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);
            if code.contains("thread::sleep(") {
                violations.push(Violation {
                    path: path.clone(),
                    line: idx + 1,
                    reason: "Blocking thread sleep",
                    text: line.trim().to_string(),
                });
                continue;
            }
            if (code.contains("::sleep(") || code.contains(".sleep("))
                && !context_mentions(&lines, idx, 15, TIMER_WORDS)
            {
                violations.push(Violation {
                    path: path.clone(),
                    line: idx + 1,
                    reason: "Sleep outside a timer",
                    text: line.trim().to_string(),
                });
            }
        }
    }

    report(
        "Sleep calls found in production code!",
        &[
            "Wait on a channel, watch or interval instead of polling",
            "Timers: tokio::time::sleep on a named delay (debounce, spacing)",
            "Reconnects: ReconnectTimer",
        ],
        &violations,
    );
}
