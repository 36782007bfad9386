//! Structured logging using tracing
//!
//! Console (stderr) plus an append-only log file. The level comes from the `-v`
//! count on the command line, not from `RUST_LOG`.

use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Ellipse a string for display: first half + "..." + last half (no truncation of one end).
/// If `s` has ≤ `max_len` chars, returns `s` unchanged. Otherwise returns
/// `s[0..first_n] + "..." + s[last_n..]` where first_n + 3 + last_n ≤ max_len.
pub fn ellipse(s: &str, max_len: usize) -> String {
    const SEP: &str = "...";
    let sep_len = 3;
    let chars: Vec<char> = s.chars().collect();
    let n = chars.len();
    if n <= max_len {
        return s.to_string();
    }
    if max_len <= sep_len {
        return chars[..max_len].iter().collect();
    }
    let first_count = (max_len - sep_len) / 2;
    let last_count = (max_len - sep_len) - first_count;
    let first: String = chars[..first_count].iter().collect();
    let last: String = chars[n - last_count..].iter().collect();
    format!("{}{}{}", first, SEP, last)
}

/// Filter directive for a `-v` count (0-4+).
fn filter_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        // Gateway and HTTP internals are very chatty below info.
        3 => "debug,serenity=info,tungstenite=info,hyper=info,rustls=info,reqwest=info",
        _ => "trace",
    }
}

/// Initialize tracing with console and (optionally) file output.
pub fn init_tracing(verbosity: u8, log_file_path: Option<PathBuf>) {
    let filter = EnvFilter::new(filter_directive(verbosity));
    let registry = tracing_subscriber::registry().with(filter);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let file = log_file_path.and_then(|log_path| {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .ok()
    });

    match file {
        Some(file) => {
            let file_layer = fmt::layer()
                .with_writer(file)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_ansi(false); // No ANSI in files

            registry.with(console_layer).with(file_layer).init();
        }
        None => registry.with(console_layer).init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ellipse_short_unchanged() {
        assert_eq!(ellipse("hello", 10), "hello");
    }

    #[test]
    fn ellipse_keeps_both_ends() {
        let s = ellipse("abcdefghijklmnopqrstuvwxyz", 11);
        assert_eq!(s, "abcd...wxyz");
        assert_eq!(s.chars().count(), 11);
    }

    #[test]
    fn ellipse_tiny_limit() {
        assert_eq!(ellipse("abcdef", 2), "ab");
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(filter_directive(0), "error");
        assert_eq!(filter_directive(2), "info");
        assert!(filter_directive(3).starts_with("debug"));
        assert_eq!(filter_directive(9), "trace");
    }
}
