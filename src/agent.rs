//! Interaction state machine
//!
//! Drives the listen → transcribe → think → speak cycle:
//!
//! ```text
//! Idle --action--> Listening --endpoint/timeout/action--> Processing
//!                                                             |
//! Idle <--playback ends-- Speaking <--playback begins---------+
//! ```
//!
//! One user-action channel feeds the machine. In Idle an action starts
//! listening, in Listening it ends the take early, in Processing or
//! Speaking it cancels the work in flight. Cancellation is structural:
//! the action channel races the active work in `select!`, and winning the
//! race drops the losing future, which aborts the HTTP request or stops
//! the playback it owned. Completions that outlive an interaction (the
//! detached history refresh) carry a generation id and no-op when stale.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::audio::capture::CaptureSource;
use crate::audio::endpoint::{Clock, SystemClock};
use crate::audio::playback::{AudioOutput, decode_reply};
use crate::backend::{HistoryMessage, SpeechAudio, VoiceBackend};
use crate::config::InteractionConfig;
use crate::console::Console;
use crate::recorder::Recorder;
use crate::{Error, Result};

/// Cadence for draining capture frames and redrawing the level meter
const PUMP_INTERVAL: Duration = Duration::from_millis(50);

/// The four top-level states of the interaction loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionState {
    Idle,
    Listening,
    Processing,
    Speaking,
}

impl std::fmt::Display for InteractionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
        };
        f.write_str(label)
    }
}

/// Sends user actions into a running [`VoiceAgent`]
///
/// Dropping every handle closes the channel, which the agent treats as a
/// shutdown request.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    actions: mpsc::Sender<()>,
}

impl AgentHandle {
    /// Deliver one user action; returns false once the agent is gone
    pub async fn user_action(&self) -> bool {
        self.actions.send(()).await.is_ok()
    }

    /// Blocking variant for delivery from a plain input thread
    pub fn user_action_blocking(&self) -> bool {
        self.actions.blocking_send(()).is_ok()
    }
}

/// How a listening session ended
enum ListenEnd {
    /// Endpoint, timeout, or manual stop; finalize the take
    Finalize,
    /// Action channel closed
    Shutdown,
    Failed(Error),
}

/// Outcome of racing a unit of work against the user-action channel
enum Raced<T> {
    Completed(T),
    Cancelled,
    Shutdown,
}

/// Race `work` against the action channel; an action wins by dropping the
/// work future, aborting whatever it owned
async fn race_action<F, T>(actions: &mut mpsc::Receiver<()>, work: F) -> Raced<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        action = actions.recv() => match action {
            Some(()) => Raced::Cancelled,
            None => Raced::Shutdown,
        },
        result = work => Raced::Completed(result),
    }
}

/// History window delivered by the detached refresh task
struct HistoryUpdate {
    generation: u64,
    messages: Vec<HistoryMessage>,
}

/// The top-level controller owning the recorder, backend, and playback
pub struct VoiceAgent<S, B, O, C = SystemClock>
where
    S: CaptureSource,
    B: VoiceBackend + Clone + Send + Sync + 'static,
    O: AudioOutput,
    C: Clock + Clone,
{
    interaction: InteractionConfig,
    recorder: Recorder<S, C>,
    backend: B,
    output: O,
    console: Console,
    state: InteractionState,
    state_tx: watch::Sender<InteractionState>,
    actions: mpsc::Receiver<()>,
    generation: Arc<AtomicU64>,
    history_tx: mpsc::Sender<HistoryUpdate>,
    history_rx: mpsc::Receiver<HistoryUpdate>,
}

impl<S, B, O, C> VoiceAgent<S, B, O, C>
where
    S: CaptureSource,
    B: VoiceBackend + Clone + Send + Sync + 'static,
    O: AudioOutput,
    C: Clock + Clone,
{
    /// Assemble an agent and the handle that feeds it user actions
    pub fn new(
        interaction: InteractionConfig,
        recorder: Recorder<S, C>,
        backend: B,
        output: O,
        console: Console,
    ) -> (Self, AgentHandle) {
        let (action_tx, actions) = mpsc::channel(8);
        let (state_tx, _) = watch::channel(InteractionState::Idle);
        let (history_tx, history_rx) = mpsc::channel(4);
        let agent = Self {
            interaction,
            recorder,
            backend,
            output,
            console,
            state: InteractionState::Idle,
            state_tx,
            actions,
            generation: Arc::new(AtomicU64::new(0)),
            history_tx,
            history_rx,
        };
        (agent, AgentHandle { actions: action_tx })
    }

    /// Observe state changes; mainly for tests and embedding
    #[must_use]
    pub fn state_updates(&self) -> watch::Receiver<InteractionState> {
        self.state_tx.subscribe()
    }

    /// Drive interactions until every [`AgentHandle`] is dropped
    #[allow(clippy::future_not_send)]
    pub async fn run(mut self) {
        self.console.set_state(&InteractionState::Idle.to_string());
        loop {
            tokio::select! {
                action = self.actions.recv() => {
                    if action.is_none() {
                        break;
                    }
                    match self.interaction().await {
                        Ok(ControlFlow::Continue(())) => {}
                        Ok(ControlFlow::Break(())) => break,
                        Err(e) => {
                            tracing::error!(error = %e, "interaction failed");
                            self.abort_capture();
                            self.transition(InteractionState::Idle);
                            self.console.set_status(&e.to_string());
                        }
                    }
                }
                update = self.history_rx.recv() => {
                    if let Some(update) = update {
                        self.apply_history(update);
                    }
                }
            }
        }
        self.console.finish();
        tracing::debug!("interaction loop stopped");
    }

    /// One full cycle from the user action that starts listening
    #[allow(clippy::future_not_send)]
    async fn interaction(&mut self) -> Result<ControlFlow<()>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.transition(InteractionState::Listening);
        self.recorder.start()?;
        match self.listen().await {
            ListenEnd::Finalize => {}
            ListenEnd::Shutdown => {
                self.abort_capture();
                return Ok(ControlFlow::Break(()));
            }
            ListenEnd::Failed(e) => return Err(e),
        }

        self.transition(InteractionState::Processing);
        self.console.clear_level();
        let utterance = self.recorder.stop()?;
        if utterance.peak_rms < self.interaction.min_voice_rms {
            return Err(Error::InsufficientVoice {
                peak_rms: utterance.peak_rms,
            });
        }
        tracing::debug!(
            wav_bytes = utterance.wav.len(),
            duration = ?utterance.duration,
            peak_rms = utterance.peak_rms,
            "utterance finalized"
        );

        let transcript =
            match race_action(&mut self.actions, self.backend.transcribe(utterance.wav)).await {
                Raced::Completed(result) => result?,
                Raced::Cancelled => return self.supersede(),
                Raced::Shutdown => return Ok(ControlFlow::Break(())),
            };
        if transcript.is_empty() {
            self.transition(InteractionState::Idle);
            self.console.set_status("nothing recognized");
            return Ok(ControlFlow::Continue(()));
        }
        self.console.set_status(&transcript);

        let reply = match race_action(&mut self.actions, self.backend.chat(&transcript)).await {
            Raced::Completed(result) => result?,
            Raced::Cancelled => return self.supersede(),
            Raced::Shutdown => return Ok(ControlFlow::Break(())),
        };
        self.spawn_history_refresh(generation);
        if reply.is_empty() {
            self.transition(InteractionState::Idle);
            return Ok(ControlFlow::Continue(()));
        }

        let speech = match race_action(&mut self.actions, self.backend.synthesize(&reply)).await {
            Raced::Completed(result) => result?,
            Raced::Cancelled => return self.supersede(),
            Raced::Shutdown => return Ok(ControlFlow::Break(())),
        };

        self.speak(&reply, speech).await
    }

    /// Pump the recorder at display cadence until something ends the take
    #[allow(clippy::future_not_send)]
    async fn listen(&mut self) -> ListenEnd {
        let deadline = Instant::now() + self.interaction.listen_timeout;
        let mut ticks = tokio::time::interval(PUMP_INTERVAL);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                action = self.actions.recv() => {
                    return match action {
                        Some(()) => {
                            tracing::debug!("manual stop");
                            ListenEnd::Finalize
                        }
                        None => ListenEnd::Shutdown,
                    };
                }
                () = tokio::time::sleep_until(deadline) => {
                    tracing::debug!("listen timeout reached");
                    return ListenEnd::Finalize;
                }
                _ = ticks.tick() => {
                    match self.recorder.pump() {
                        Ok(status) => {
                            self.console.set_level(status.level);
                            if status.finished() {
                                return ListenEnd::Finalize;
                            }
                        }
                        Err(e) => return ListenEnd::Failed(e),
                    }
                }
            }
        }
    }

    /// Play the reply and hold Speaking until playback ends or an action
    /// barges in
    #[allow(clippy::future_not_send)]
    async fn speak(&mut self, reply: &str, speech: SpeechAudio) -> Result<ControlFlow<()>> {
        let audio = decode_reply(&speech.bytes, speech.content_type.as_deref())?;
        let handle = self.output.play(audio)?;
        self.transition(InteractionState::Speaking);
        self.console.set_status(reply);

        let done = handle.finished();
        tokio::pin!(done);
        loop {
            tokio::select! {
                action = self.actions.recv() => {
                    // Returning drops `done`, which stops the playback
                    return match action {
                        Some(()) => self.supersede(),
                        None => Ok(ControlFlow::Break(())),
                    };
                }
                () = &mut done => break,
                update = self.history_rx.recv() => {
                    if let Some(update) = update {
                        self.apply_history(update);
                    }
                }
            }
        }

        self.transition(InteractionState::Idle);
        Ok(ControlFlow::Continue(()))
    }

    /// A user action took over; whatever was in flight is already dropped
    fn supersede(&mut self) -> Result<ControlFlow<()>> {
        tracing::debug!("interaction superseded by user action");
        self.transition(InteractionState::Idle);
        Ok(ControlFlow::Continue(()))
    }

    /// Fetch the advisory history window off the interaction path
    fn spawn_history_refresh(&self, generation: u64) {
        let backend = self.backend.clone();
        let current = Arc::clone(&self.generation);
        let updates = self.history_tx.clone();
        tokio::spawn(async move {
            match backend.history().await {
                Ok(messages) => {
                    if current.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    let _ = updates
                        .send(HistoryUpdate {
                            generation,
                            messages,
                        })
                        .await;
                }
                Err(e) => tracing::debug!(error = %e, "history refresh failed"),
            }
        });
    }

    fn apply_history(&mut self, update: HistoryUpdate) {
        if update.generation != self.generation.load(Ordering::SeqCst) {
            tracing::debug!("dropping stale history window");
            return;
        }
        self.console
            .render_history(&update.messages, self.interaction.history_window);
    }

    /// Idempotent state setter; entering Idle clears the status and meter
    fn transition(&mut self, next: InteractionState) {
        if self.state == next {
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "state change");
        self.state = next;
        self.state_tx.send_replace(next);
        self.console.set_state(&next.to_string());
        if next == InteractionState::Idle {
            self.console.clear_status();
            self.console.clear_level();
        }
    }

    /// Release the microphone if a session is still open
    fn abort_capture(&mut self) {
        if self.recorder.is_recording() {
            if let Err(e) = self.recorder.cancel() {
                tracing::warn!(error = %e, "capture teardown failed");
            }
        }
    }
}
