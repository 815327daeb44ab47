//! Streaming end-of-utterance detection
//!
//! Watches frame loudness and decides when the speaker has finished: voice
//! must have been heard, a minimum session length must have passed, and the
//! configured stretch of silence must have elapsed since the last voiced
//! frame. The decision fires once per session and stays latched.

use std::time::{Duration, Instant};

/// Trait for time operations, allowing mock time in tests
pub trait Clock: Send {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Production clock backed by `Instant::now()`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// End-of-utterance detection tunables
#[derive(Debug, Clone, Copy)]
pub struct EndpointConfig {
    /// Frame RMS at or above which a frame counts as voice
    pub silence_threshold_rms: f32,

    /// Silence that must elapse after voice before the endpoint fires
    pub silence_duration: Duration,

    /// Minimum session length before the endpoint may fire
    pub min_recording: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            silence_threshold_rms: 0.012,
            silence_duration: Duration::from_millis(800),
            min_recording: Duration::from_millis(500),
        }
    }
}

/// Per-frame observation fed back to the caller
#[derive(Debug, Clone, Copy)]
pub struct FrameObservation {
    /// RMS of the observed frame
    pub rms: f32,

    /// True exactly on the frame that crossed the endpoint
    pub endpoint: bool,
}

/// Stateful detector for one capture session
///
/// Leading silence never fires: silence only counts once at least one frame
/// has crossed the voice threshold, so an open mic in a quiet room waits
/// indefinitely rather than ending immediately.
pub struct EndpointDetector<C: Clock = SystemClock> {
    config: EndpointConfig,
    clock: C,
    session_start: Instant,
    last_voice: Option<Instant>,
    peak_rms: f32,
    fired: bool,
}

impl EndpointDetector<SystemClock> {
    /// Create a detector using the system clock; the session starts now
    #[must_use]
    pub fn new(config: EndpointConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> EndpointDetector<C> {
    /// Create a detector with an injected clock; the session starts now
    pub fn with_clock(config: EndpointConfig, clock: C) -> Self {
        let session_start = clock.now();
        Self {
            config,
            clock,
            session_start,
            last_voice: None,
            peak_rms: 0.0,
            fired: false,
        }
    }

    /// Observe one capture frame
    ///
    /// Returns the frame RMS (also fed to the level meter) and whether the
    /// endpoint fired on this frame. Observing frames after the endpoint has
    /// fired keeps updating the peak but never fires again.
    pub fn observe(&mut self, frame: &[f32]) -> FrameObservation {
        let frame_rms = rms(frame);
        self.peak_rms = self.peak_rms.max(frame_rms);
        let now = self.clock.now();

        if self.fired {
            return FrameObservation {
                rms: frame_rms,
                endpoint: false,
            };
        }

        if frame_rms >= self.config.silence_threshold_rms {
            self.last_voice = Some(now);
            return FrameObservation {
                rms: frame_rms,
                endpoint: false,
            };
        }

        // Leading silence: nothing voiced yet, keep waiting
        let Some(last_voice) = self.last_voice else {
            return FrameObservation {
                rms: frame_rms,
                endpoint: false,
            };
        };

        if now.duration_since(self.session_start) < self.config.min_recording {
            return FrameObservation {
                rms: frame_rms,
                endpoint: false,
            };
        }

        if now.duration_since(last_voice) >= self.config.silence_duration {
            self.fired = true;
            tracing::debug!(
                silence_ms = now.duration_since(last_voice).as_millis(),
                session_ms = now.duration_since(self.session_start).as_millis(),
                "endpoint detected"
            );
            return FrameObservation {
                rms: frame_rms,
                endpoint: true,
            };
        }

        FrameObservation {
            rms: frame_rms,
            endpoint: false,
        }
    }

    /// True once the endpoint has fired for this session
    #[must_use]
    pub const fn endpoint_reached(&self) -> bool {
        self.fired
    }

    /// True once at least one frame has crossed the voice threshold
    #[must_use]
    pub const fn voice_heard(&self) -> bool {
        self.last_voice.is_some()
    }

    /// Loudest frame RMS observed this session
    #[must_use]
    pub const fn peak_rms(&self) -> f32 {
        self.peak_rms
    }
}

/// Root-mean-square loudness of a frame; zero for an empty frame
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Mock clock advanced manually by tests
    #[derive(Clone)]
    struct MockClock {
        now: Arc<Mutex<Instant>>,
    }

    impl MockClock {
        fn new() -> Self {
            Self {
                now: Arc::new(Mutex::new(Instant::now())),
            }
        }

        fn advance(&self, duration: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += duration;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    fn config() -> EndpointConfig {
        EndpointConfig {
            silence_threshold_rms: 0.01,
            silence_duration: Duration::from_millis(800),
            min_recording: Duration::from_millis(500),
        }
    }

    const LOUD: [f32; 4] = [0.5, -0.5, 0.5, -0.5];
    const QUIET: [f32; 4] = [0.001, -0.001, 0.001, -0.001];

    #[test]
    fn rms_of_known_signals() {
        assert!((rms(&LOUD) - 0.5).abs() < 1e-6);
        assert!(rms(&QUIET) < 0.01);
        assert!((rms(&[]) - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn leading_silence_never_fires() {
        let clock = MockClock::new();
        let mut detector = EndpointDetector::with_clock(config(), clock.clone());

        for _ in 0..100 {
            clock.advance(Duration::from_millis(100));
            let obs = detector.observe(&QUIET);
            assert!(!obs.endpoint);
        }
        assert!(!detector.endpoint_reached());
        assert!(!detector.voice_heard());
    }

    #[test]
    fn continuous_voice_never_fires() {
        let clock = MockClock::new();
        let mut detector = EndpointDetector::with_clock(config(), clock.clone());

        for _ in 0..100 {
            clock.advance(Duration::from_millis(100));
            assert!(!detector.observe(&LOUD).endpoint);
        }
        assert!(!detector.endpoint_reached());
        assert!(detector.voice_heard());
    }

    #[test]
    fn fires_after_silence_follows_voice() {
        let clock = MockClock::new();
        let mut detector = EndpointDetector::with_clock(config(), clock.clone());

        clock.advance(Duration::from_millis(100));
        detector.observe(&LOUD);

        // 700 ms of silence: not yet
        clock.advance(Duration::from_millis(700));
        assert!(!detector.observe(&QUIET).endpoint);

        // 800 ms since the last voiced frame: fires
        clock.advance(Duration::from_millis(100));
        let obs = detector.observe(&QUIET);
        assert!(obs.endpoint);
        assert!(detector.endpoint_reached());
    }

    #[test]
    fn renewed_voice_resets_the_silence_window() {
        let clock = MockClock::new();
        let mut detector = EndpointDetector::with_clock(config(), clock.clone());

        clock.advance(Duration::from_millis(100));
        detector.observe(&LOUD);
        clock.advance(Duration::from_millis(700));
        detector.observe(&LOUD);

        // 700 ms after the second voiced frame: window restarted
        clock.advance(Duration::from_millis(700));
        assert!(!detector.observe(&QUIET).endpoint);
        clock.advance(Duration::from_millis(100));
        assert!(detector.observe(&QUIET).endpoint);
    }

    #[test]
    fn never_fires_before_min_recording() {
        // Silence window shorter than the session floor makes the floor binding
        let clock = MockClock::new();
        let cfg = EndpointConfig {
            silence_threshold_rms: 0.01,
            silence_duration: Duration::from_millis(100),
            min_recording: Duration::from_millis(500),
        };
        let mut detector = EndpointDetector::with_clock(cfg, clock.clone());

        clock.advance(Duration::from_millis(50));
        detector.observe(&LOUD);

        // Silence window satisfied at 250 ms, but the session is too young
        clock.advance(Duration::from_millis(200));
        assert!(!detector.observe(&QUIET).endpoint);

        clock.advance(Duration::from_millis(300));
        assert!(detector.observe(&QUIET).endpoint);
    }

    #[test]
    fn fires_at_most_once_and_stays_latched() {
        let clock = MockClock::new();
        let mut detector = EndpointDetector::with_clock(config(), clock.clone());

        clock.advance(Duration::from_millis(600));
        detector.observe(&LOUD);
        clock.advance(Duration::from_millis(800));
        assert!(detector.observe(&QUIET).endpoint);

        for _ in 0..10 {
            clock.advance(Duration::from_millis(100));
            assert!(!detector.observe(&QUIET).endpoint);
            assert!(!detector.observe(&LOUD).endpoint);
        }
        assert!(detector.endpoint_reached());
    }

    #[test]
    fn tracks_peak_rms_across_the_session() {
        let clock = MockClock::new();
        let mut detector = EndpointDetector::with_clock(config(), clock.clone());

        detector.observe(&QUIET);
        detector.observe(&LOUD);
        detector.observe(&QUIET);
        assert!((detector.peak_rms() - 0.5).abs() < 1e-6);
    }
}
