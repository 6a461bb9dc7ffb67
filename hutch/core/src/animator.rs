//! Animator
//!
//! The single authoritative owner of the appliance's global state, command
//! queue, and info registry. One task consumes one event stream:
//!
//! ```text
//!  sessions ──┐
//!             ├─► mpsc<AnimatorEvent> ──► Animator task ──► session queues
//!  playback ──┤                              │ ▲
//!  info pass ─┘                              ▼ │ completion events
//!                                     spawned device work
//! ```
//!
//! Device rendering never blocks the task: playback and ambient passes run in
//! spawned tasks holding a driver clone and post their completions back
//! through the same channel. Posture primitives are awaited inline; the
//! state machine guarantees nothing else is driving the device at those
//! moments. Because every mutation happens on this one task, no lock guards
//! the state, the queue, or the rotation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::device::{
    DeviceDriver, DeviceError, Led, LedEffect, BOOT_PULSE_COLOR, EAR_HOME, EAR_REST,
};
use crate::infos::InfoRegistry;
use crate::protocol::{
    AnimatorState, ErrorClass, ProtocolViolation, Request, ServerMessage,
};
use crate::scheduler::{CommandQueue, PendingCommand};
use crate::session::{SendFailure, SessionHandle, SessionId, SessionRegistry};

/// Everything that can happen to the animator.
#[derive(Debug)]
pub enum AnimatorEvent {
    /// A connection was accepted; register it and greet it with the state.
    SessionOpened(SessionHandle),
    /// A connection went away. Its queued commands stay queued.
    SessionClosed(SessionId),
    /// A decoded request from a session.
    Request {
        /// Submitting session.
        from: SessionId,
        /// The decoded request.
        request: Request,
    },
    /// A line that failed to decode; owed a MalformedPacket response.
    Violation {
        /// Session that sent the line.
        from: SessionId,
        /// What was wrong with it.
        violation: ProtocolViolation,
    },
    /// A spawned playback task finished.
    PlaybackFinished {
        /// Success, or the driver's failure report.
        outcome: Result<(), DeviceError>,
    },
    /// A spawned ambient render pass finished.
    InfoPassFinished {
        /// Pass identity; stale epochs are ignored.
        epoch: u64,
    },
    /// Stop the animator. Used on daemon shutdown.
    Shutdown,
}

/// Tunables handed to [`Animator::spawn`].
#[derive(Clone, Debug)]
pub struct AnimatorConfig {
    /// Pause between ambient render passes while idle.
    pub info_cycle_gap: Duration,
    /// Capacity of the animator's event channel.
    pub event_capacity: usize,
}

impl Default for AnimatorConfig {
    fn default() -> Self {
        AnimatorConfig {
            info_cycle_gap: Duration::from_millis(1000),
            event_capacity: 256,
        }
    }
}

/// Command currently being rendered by the device.
#[derive(Debug)]
struct ActivePlayback {
    session: SessionId,
    request_id: Option<Value>,
}

/// The actor. Constructed and consumed by [`Animator::spawn`].
pub struct Animator {
    device: Arc<dyn DeviceDriver>,
    sessions: SessionRegistry,
    events_tx: mpsc::Sender<AnimatorEvent>,
    state: AnimatorState,
    queue: CommandQueue,
    infos: InfoRegistry,
    active: Option<ActivePlayback>,
    info_pass: Option<AbortHandle>,
    info_epoch: u64,
    info_cycle_gap: Duration,
}

impl Animator {
    /// Spawn the animator task and return the sender that feeds it.
    ///
    /// The task runs until it receives [`AnimatorEvent::Shutdown`]. It keeps
    /// a sender clone of its own for completion events, so dropping the
    /// returned sender alone does not stop it.
    pub fn spawn(device: Arc<dyn DeviceDriver>, config: AnimatorConfig) -> mpsc::Sender<AnimatorEvent> {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity);
        let animator = Animator {
            device,
            sessions: SessionRegistry::new(),
            events_tx: events_tx.clone(),
            state: AnimatorState::Idle,
            queue: CommandQueue::new(),
            infos: InfoRegistry::new(),
            active: None,
            info_pass: None,
            info_epoch: 0,
            info_cycle_gap: config.info_cycle_gap,
        };
        tokio::spawn(animator.run(events_rx));
        events_tx
    }

    async fn run(mut self, mut events: mpsc::Receiver<AnimatorEvent>) {
        self.apply_boot_posture().await;
        info!(device = self.device.name(), state = %self.state, "animator running");
        while let Some(event) = events.recv().await {
            if matches!(event, AnimatorEvent::Shutdown) {
                break;
            }
            self.handle_event(event).await;
        }
        self.cancel_info_pass();
        info!("animator stopped");
    }

    async fn handle_event(&mut self, event: AnimatorEvent) {
        match event {
            AnimatorEvent::SessionOpened(handle) => self.on_session_opened(handle),
            AnimatorEvent::SessionClosed(id) => self.on_session_closed(id),
            AnimatorEvent::Request { from, request } => self.on_request(from, request).await,
            AnimatorEvent::Violation { from, violation } => self.on_violation(from, violation),
            AnimatorEvent::PlaybackFinished { outcome } => self.on_playback_finished(outcome),
            AnimatorEvent::InfoPassFinished { epoch } => self.on_info_pass_finished(epoch),
            AnimatorEvent::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    fn on_session_opened(&mut self, handle: SessionHandle) {
        let id = handle.id;
        self.sessions.register(handle);
        info!(session = %id, state = %self.state, "session attached");
        // The greeting goes through the same queue as everything else, so a
        // session never sees a response or broadcast before its snapshot.
        self.respond(id, ServerMessage::state(self.state));
    }

    fn on_session_closed(&mut self, id: SessionId) {
        if self.sessions.unregister(id).is_some() {
            info!(session = %id, "session detached");
        }
    }

    // ------------------------------------------------------------------
    // Request dispatch
    // ------------------------------------------------------------------

    async fn on_request(&mut self, from: SessionId, request: Request) {
        debug!(session = %from, kind = request.kind(), state = %self.state, "request");
        match request {
            Request::Sleep { request_id } => self.on_sleep(from, request_id).await,
            Request::Wakeup { request_id } => self.on_wakeup(from, request_id).await,
            Request::Command {
                request_id,
                sequence,
                expiration,
            } => self.on_command(PendingCommand {
                session: from,
                request_id,
                sequence,
                expiration,
            }),
            Request::Info {
                request_id,
                info_id,
                animation,
            } => self.on_info(from, request_id, info_id, animation),
        }
    }

    fn on_violation(&mut self, from: SessionId, violation: ProtocolViolation) {
        warn!(session = %from, detail = %violation.detail, "malformed line");
        self.respond(
            from,
            ServerMessage::error(violation.request_id, ErrorClass::MalformedPacket, violation.detail),
        );
    }

    async fn on_sleep(&mut self, from: SessionId, request_id: Option<Value>) {
        if self.state != AnimatorState::Idle {
            self.respond(
                from,
                ServerMessage::error(
                    request_id,
                    ErrorClass::InvalidState,
                    format!("cannot sleep while {}", self.state),
                ),
            );
            return;
        }
        // Stop ambient rendering before touching the posture outputs.
        self.cancel_info_pass();
        self.apply_rest_posture().await;
        self.respond(from, ServerMessage::ok(request_id));
        self.set_state(AnimatorState::Asleep);
    }

    async fn on_wakeup(&mut self, from: SessionId, request_id: Option<Value>) {
        if self.state != AnimatorState::Asleep {
            self.respond(
                from,
                ServerMessage::error(
                    request_id,
                    ErrorClass::InvalidState,
                    format!("cannot wake while {}", self.state),
                ),
            );
            return;
        }
        self.apply_active_posture().await;
        self.respond(from, ServerMessage::ok(request_id));
        if self.queue.is_empty() {
            self.set_state(AnimatorState::Idle);
        } else {
            self.set_state(AnimatorState::Playing);
            self.advance_queue();
        }
    }

    fn on_command(&mut self, command: PendingCommand) {
        self.queue.enqueue(command);
        match self.state {
            // Queued silently: no response yet, no broadcast, no state change.
            AnimatorState::Asleep => {
                debug!(queued = self.queue.len(), "command queued while asleep");
            }
            AnimatorState::Playing => {
                debug!(queued = self.queue.len(), "command queued behind active playback");
            }
            AnimatorState::Idle => self.begin_playing_from_idle(),
        }
    }

    fn on_info(
        &mut self,
        from: SessionId,
        request_id: Option<Value>,
        info_id: String,
        animation: Option<Value>,
    ) {
        match animation {
            Some(payload) => {
                self.infos.set(info_id.as_str(), payload);
                debug!(info_id = %info_id, registered = self.infos.len(), "info set");
                if self.state == AnimatorState::Idle {
                    self.start_info_pass();
                }
            }
            None => {
                let removed = self.infos.clear(&info_id);
                debug!(info_id = %info_id, removed, "info cleared");
            }
        }
        self.respond(from, ServerMessage::ok(request_id));
    }

    // ------------------------------------------------------------------
    // Command playback
    // ------------------------------------------------------------------

    /// Commit the IDLE → PLAYING transition only if a command actually
    /// dispatches: an already-expired command must produce its `expired`
    /// response without the device ever looking busy.
    fn begin_playing_from_idle(&mut self) {
        let (expired, next) = self.queue.pop_dispatchable(Local::now());
        self.respond_expired(expired);
        if let Some(command) = next {
            self.set_state(AnimatorState::Playing);
            self.start_playback(command);
        }
    }

    fn advance_queue(&mut self) {
        let (expired, next) = self.queue.pop_dispatchable(Local::now());
        self.respond_expired(expired);
        match next {
            Some(command) => self.start_playback(command),
            None => self.set_state(AnimatorState::Idle),
        }
    }

    fn respond_expired(&mut self, expired: Vec<PendingCommand>) {
        for stale in expired {
            info!(session = %stale.session, "command expired before dispatch");
            self.respond(stale.session, ServerMessage::expired(stale.request_id));
        }
    }

    fn start_playback(&mut self, command: PendingCommand) {
        debug_assert_eq!(self.state, AnimatorState::Playing);
        info!(session = %command.session, queued = self.queue.len(), "dispatching sequence");
        self.active = Some(ActivePlayback {
            session: command.session,
            request_id: command.request_id,
        });
        let device = Arc::clone(&self.device);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = device.play_sequence(command.sequence).await;
            // If the animator is gone the daemon is shutting down and the
            // outcome is moot.
            let _ = events.send(AnimatorEvent::PlaybackFinished { outcome }).await;
        });
    }

    fn on_playback_finished(&mut self, outcome: Result<(), DeviceError>) {
        let Some(active) = self.active.take() else {
            warn!("playback completion with no active command");
            return;
        };
        match outcome {
            Ok(()) => self.respond(active.session, ServerMessage::ok(active.request_id)),
            Err(fault) => {
                warn!(session = %active.session, error = %fault, "sequence failed");
                self.respond(
                    active.session,
                    ServerMessage::error(active.request_id, ErrorClass::DeviceFailure, fault.to_string()),
                );
            }
        }
        self.advance_queue();
    }

    // ------------------------------------------------------------------
    // Ambient info rendering
    // ------------------------------------------------------------------

    fn start_info_pass(&mut self) {
        if self.state != AnimatorState::Idle || self.info_pass.is_some() {
            return;
        }
        let Some((info_id, animation)) = self.infos.next_pass() else {
            return;
        };
        self.info_epoch += 1;
        let epoch = self.info_epoch;
        debug!(info_id = %info_id, epoch, "ambient pass");
        let device = Arc::clone(&self.device);
        let events = self.events_tx.clone();
        let gap = self.info_cycle_gap;
        let task = tokio::spawn(async move {
            if let Err(fault) = device.render_info(animation).await {
                warn!(info_id = %info_id, error = %fault, "ambient render failed");
            }
            tokio::time::sleep(gap).await;
            let _ = events.send(AnimatorEvent::InfoPassFinished { epoch }).await;
        });
        self.info_pass = Some(task.abort_handle());
    }

    fn cancel_info_pass(&mut self) {
        if let Some(handle) = self.info_pass.take() {
            handle.abort();
            // A completion that raced the abort carries a stale epoch.
            self.info_epoch += 1;
        }
    }

    fn on_info_pass_finished(&mut self, epoch: u64) {
        if epoch != self.info_epoch {
            return;
        }
        self.info_pass = None;
        self.start_info_pass();
    }

    // ------------------------------------------------------------------
    // State + delivery plumbing
    // ------------------------------------------------------------------

    fn set_state(&mut self, next: AnimatorState) {
        if self.state == next {
            return;
        }
        let previous = self.state;
        self.state = next;
        info!(from = %previous, to = %next, "state transition");
        self.broadcast(ServerMessage::state(next));
        match next {
            AnimatorState::Idle => self.start_info_pass(),
            AnimatorState::Asleep | AnimatorState::Playing => self.cancel_info_pass(),
        }
    }

    fn broadcast(&mut self, message: ServerMessage) {
        let outcome = self.sessions.broadcast(&message);
        for stalled in outcome.failed {
            warn!(session = %stalled, "session stalled during broadcast; dropping it");
            self.sessions.unregister(stalled);
        }
    }

    /// Queue a message for one session. A vanished session is a silent drop;
    /// a stalled one is unregistered so it cannot hold anyone else up.
    fn respond(&mut self, to: SessionId, message: ServerMessage) {
        match self.sessions.send_to(to, message) {
            Ok(()) => {}
            Err(SendFailure::Gone) => {
                debug!(session = %to, "response dropped; session gone");
            }
            Err(SendFailure::Stalled) => {
                warn!(session = %to, "session stalled; dropping it");
                self.sessions.unregister(to);
            }
        }
    }

    // ------------------------------------------------------------------
    // Postures
    // ------------------------------------------------------------------

    async fn apply_boot_posture(&self) {
        if let Err(fault) = self.device.move_ears(EAR_HOME, EAR_HOME).await {
            warn!(error = %fault, "boot posture: ears");
        }
        if let Err(fault) = self
            .device
            .set_led(Led::Bottom, LedEffect::Pulse(BOOT_PULSE_COLOR))
            .await
        {
            warn!(error = %fault, "boot posture: bottom led");
        }
    }

    async fn apply_rest_posture(&self) {
        if let Err(fault) = self.device.move_ears(EAR_REST, EAR_REST).await {
            warn!(error = %fault, "rest posture: ears");
        }
        for led in Led::ALL {
            if let Err(fault) = self.device.set_led(led, LedEffect::Off).await {
                warn!(error = %fault, led = %led, "rest posture: led");
            }
        }
    }

    async fn apply_active_posture(&self) {
        if let Err(fault) = self.device.move_ears(EAR_HOME, EAR_HOME).await {
            warn!(error = %fault, "active posture: ears");
        }
    }
}
