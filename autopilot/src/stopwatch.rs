use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use log::debug;

static EVENTS: AtomicU64 = AtomicU64::new(0);

/// Sampled span timing, logged at `debug`.
///
/// - logs a begin/end wrapper for the event and its total time
/// - supports sequential spans (`span()` ends the previous span)
///
/// Sampling is by event count so runs stay deterministic: every `sample_every`-th
/// event created anywhere in the process is logged.
pub struct LogStopwatch {
    name: String,
    started: Option<Instant>,
    span: Option<(String, Instant)>,
}

impl LogStopwatch {
    /// Creates a stopwatch that logs if `force_debug` is set or this event falls on
    /// the sampling interval. A `sample_every` of zero never samples.
    pub fn new(name: impl Into<String>, force_debug: bool, sample_every: u64) -> Self {
        let n = EVENTS.fetch_add(1, Ordering::Relaxed);
        let should_sample =
            log::log_enabled!(log::Level::Debug) && (force_debug || (sample_every > 0 && n % sample_every == 0));
        let name = name.into();
        if should_sample {
            debug!("--------- {name} begin ---------");
        }
        Self {
            name,
            started: should_sample.then(Instant::now),
            span: None,
        }
    }

    /// Starts a new span within the event, ending any previous span.
    pub fn span(&mut self, section: &str) {
        if self.started.is_none() {
            return;
        }
        self.end_span();
        self.span = Some((section.to_owned(), Instant::now()));
    }

    /// Ends the current span, if any.
    pub fn end_span(&mut self) {
        if let Some((section, started)) = self.span.take() {
            debug!("{}/{section}: {:?}", self.name, started.elapsed());
        }
    }

    pub fn should_sample(&self) -> bool {
        self.started.is_some()
    }
}

impl Drop for LogStopwatch {
    fn drop(&mut self) {
        let Some(started) = self.started.take() else {
            return;
        };
        self.end_span();
        debug!("{} event_time: {:?}", self.name, started.elapsed());
        debug!("---------- {} end ----------", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsampled_stopwatch_ignores_spans() {
        let mut sw = LogStopwatch::new("quiet", false, 0);
        assert!(!sw.should_sample());
        sw.span("a");
        assert!(sw.span.is_none());
    }
}
