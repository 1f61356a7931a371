use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const MAX_LOG_LINES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Info,
    Render,
    Clipboard,
    Transport,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Info => "info",
            Kind::Render => "render",
            Kind::Clipboard => "clipboard",
            Kind::Transport => "transport",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub text: String,
    pub kind: Kind,
}

static DIAGNOSTIC_LOG: Lazy<Mutex<VecDeque<Entry>>> =
    Lazy::new(|| Mutex::new(VecDeque::with_capacity(MAX_LOG_LINES)));

/// Install the global `tracing` subscriber.
///
/// `ENS_CHAT_LOG` takes an `EnvFilter` directive; without it the level is
/// `warn`, or `debug` when `ENS_CHAT_DEBUG` is set.
pub fn init_logging() {
    let default_level = if std::env::var("ENS_CHAT_DEBUG").is_ok() {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_env("ENS_CHAT_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn log<T: Into<String>>(line: T) {
    log_with(Kind::Info, line);
}

/// Record a diagnostic line. Everything but `Info` is also emitted as a
/// `tracing` warning.
pub fn log_with<T: Into<String>>(kind: Kind, line: T) {
    let text = line.into();
    match kind {
        Kind::Info => tracing::debug!(kind = kind.as_str(), "{text}"),
        _ => tracing::warn!(kind = kind.as_str(), "{text}"),
    }

    if let Ok(mut buf) = DIAGNOSTIC_LOG.lock() {
        if buf.len() >= MAX_LOG_LINES {
            buf.pop_front();
        }
        buf.push_back(Entry { text, kind });
    }
}

pub fn recent(n: usize) -> Vec<Entry> {
    if let Ok(buf) = DIAGNOSTIC_LOG.lock() {
        let len = buf.len();
        let take = n.min(len);
        buf.iter().skip(len - take).cloned().collect()
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_with_is_visible_in_recent() {
        log_with(Kind::Clipboard, "diagnostics-test-marker-7f3a");
        let found = recent(MAX_LOG_LINES)
            .into_iter()
            .any(|e| e.kind == Kind::Clipboard && e.text == "diagnostics-test-marker-7f3a");
        assert!(found);
    }

    #[test]
    fn test_recent_never_exceeds_capacity() {
        for i in 0..(MAX_LOG_LINES + 10) {
            log(format!("line {i}"));
        }
        assert!(recent(usize::MAX).len() <= MAX_LOG_LINES);
    }
}
