use std::time::Duration;

/// Tick interval of the loading animation.
pub const TICK: Duration = Duration::from_millis(80);

/// Ticks each phrase stays on screen (2 seconds).
const TICKS_PER_PHRASE: usize = 25;

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

const STATUS_PHRASES: [&str; 6] = [
    "Searching the ENS docs...",
    "Reading through the ENSIPs...",
    "Asking the resolver nicely...",
    "Gathering sources...",
    "Checking the registry...",
    "Drafting an answer...",
];

/// Cosmetic spinner and rotating phrase shown while a request is submitted.
#[derive(Debug, Default, Clone)]
pub struct LoadingIndicator {
    frame: usize,
}

impl LoadingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.frame = 0;
    }

    pub fn tick(&mut self) {
        self.frame = (self.frame + 1) % (TICKS_PER_PHRASE * STATUS_PHRASES.len());
    }

    pub fn spinner(&self) -> &'static str {
        SPINNER_FRAMES[self.frame % SPINNER_FRAMES.len()]
    }

    pub fn phrase(&self) -> &'static str {
        STATUS_PHRASES[(self.frame / TICKS_PER_PHRASE) % STATUS_PHRASES.len()]
    }
}
