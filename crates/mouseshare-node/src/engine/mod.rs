//! The control core.
//!
//! The engine owns the control state machine, the virtual cursor, and the
//! clipboard fan-out. It receives local input from the hook capability and
//! remote traffic from every connection's receive loop, and it answers the
//! one question everything else revolves around: for each event, does it
//! stay local, transfer control, or get forwarded?
//!
//! # States
//!
//! ```text
//!              edge hit + connected peer           CursorEnter from peer
//!   Idle ───────────────────────────► Controlling        │
//!     ▲ ◄─────────────────────────────────┘              ▼
//!     │        return / disable / disconnect         Controlled
//!     └──────────────────────────────────────────────────┘
//!                 CursorLeave / disconnect
//! ```
//!
//! - `Idle`: local input flows to local applications untouched.
//! - `Controlling(p)`: the physical cursor is pinned to an anchor, every
//!   local event is suppressed and forwarded to `p`, and a virtual cursor
//!   tracks where the pointer would be on `p`'s screen.
//! - `Controlled(p)`: local input is suppressed and dropped; events arriving
//!   from `p` are synthesized into the local session.
//!
//! # Concurrency
//!
//! All mutable control state lives behind one coarse mutex. The hook context
//! and every per-connection receive task funnel through it, which is the
//! explicit single-writer choice: critical sections are short, do no network
//! I/O (sends only enqueue on a connection's outbound queue), and the hook
//! gets its suppression verdict synchronously, before its callback returns.
//! The one reentrancy hazard is the clipboard: writing it fires the local
//! change callback, so clipboard writes always happen *outside* the lock
//! with the one-shot ignore flag already set.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use mouseshare_core::protocol::messages::{
    ClipboardContentType, ClipboardMessage, CursorTransferMessage, KeyboardMessage, MouseEventType,
    MouseMessage,
};
use mouseshare_core::{edge_at, Edge, MachineId, WireMessage};
use tracing::{debug, info, warn};

use crate::capabilities::{
    CapabilityError, ClipboardAccess, ClipboardContent, EventDisposition, GlobalInputHook,
    InputHandler, InputSynthesis, KeyboardObserved, MouseObserved, ScreenMetrics,
};
use crate::config::Settings;
use crate::events::{DisconnectReason, NodeEvent};
use crate::net::{ConnectionRegistry, PeerGreeting, PeerMessageSink};
use crate::peers::PeerDirectory;

pub mod tracker;

pub use tracker::{RemoteTracker, TrackerStep, RETURN_COOLDOWN};

/// Mutually exclusive control states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    /// Local input stays local.
    Idle,
    /// This machine drives the given peer.
    Controlling(MachineId),
    /// The given peer drives this machine.
    Controlled(MachineId),
}

impl std::fmt::Display for ControlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlState::Idle => write!(f, "Idle"),
            ControlState::Controlling(p) => write!(f, "Controlling({p})"),
            ControlState::Controlled(p) => write!(f, "Controlled({p})"),
        }
    }
}

/// Why a `Controlling` episode is ending.
enum Release {
    /// The virtual cursor exited back towards this machine.
    Return { normalized: f32 },
    /// Disable, disconnect, or shutdown ended the episode.
    Forced,
}

#[derive(Debug, Clone, Copy)]
struct ClipboardPolicy {
    enabled: bool,
    sync_images: bool,
}

impl ClipboardPolicy {
    fn accepts(&self, content_type: ClipboardContentType) -> bool {
        self.enabled && (content_type != ClipboardContentType::Image || self.sync_images)
    }
}

/// Everything the engine mutates, behind the single coarse mutex.
struct EngineState {
    control: ControlState,
    tracker: Option<RemoteTracker>,
    cooldown_until: Option<Instant>,
    enabled: bool,
    hooks_installed: bool,
    ignore_next_clipboard: bool,
    edge_threshold: i32,
    clipboard: ClipboardPolicy,
}

/// The control core. One per process, shared as `Arc<ControlEngine>`.
pub struct ControlEngine {
    hook: Arc<dyn GlobalInputHook>,
    synthesis: Arc<dyn InputSynthesis>,
    screen: Arc<dyn ScreenMetrics>,
    clipboard: Arc<dyn ClipboardAccess>,
    registry: Arc<ConnectionRegistry>,
    peers: Arc<Mutex<PeerDirectory>>,
    events: tokio::sync::broadcast::Sender<NodeEvent>,
    state: Mutex<EngineState>,
}

impl ControlEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: &Settings,
        hook: Arc<dyn GlobalInputHook>,
        synthesis: Arc<dyn InputSynthesis>,
        screen: Arc<dyn ScreenMetrics>,
        clipboard: Arc<dyn ClipboardAccess>,
        registry: Arc<ConnectionRegistry>,
        peers: Arc<Mutex<PeerDirectory>>,
        events: tokio::sync::broadcast::Sender<NodeEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            hook,
            synthesis,
            screen,
            clipboard,
            registry,
            peers,
            events,
            state: Mutex::new(EngineState {
                control: ControlState::Idle,
                tracker: None,
                cooldown_until: None,
                enabled: settings.enabled,
                hooks_installed: false,
                ignore_next_clipboard: false,
                edge_threshold: settings.edge_threshold,
                clipboard: ClipboardPolicy {
                    enabled: settings.clipboard.enabled,
                    sync_images: settings.clipboard.sync_images,
                },
            }),
        })
    }

    /// Installs the input hooks (when enabled) and subscribes to clipboard
    /// changes. Hook installation failure is fatal at startup.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::HookInstall`] when the OS refuses the hook.
    pub fn start(self: &Arc<Self>) -> Result<(), CapabilityError> {
        let weak = Arc::downgrade(self);
        self.clipboard.subscribe_changes(Box::new(move || {
            if let Some(engine) = weak.upgrade() {
                engine.handle_clipboard_change();
            }
        }));

        let enabled = self.state.lock().expect("lock poisoned").enabled;
        if enabled {
            self.hook.install(Arc::clone(self) as Arc<dyn InputHandler>)?;
            self.state.lock().expect("lock poisoned").hooks_installed = true;
        }
        Ok(())
    }

    /// Current control state.
    pub fn control_state(&self) -> ControlState {
        self.state.lock().expect("lock poisoned").control
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().expect("lock poisoned").enabled
    }

    /// Enables or disables input sharing. Disabling terminates any
    /// `Controlling` episode and removes the hooks.
    pub fn set_enabled(self: &Arc<Self>, enabled: bool) {
        {
            let mut st = self.state.lock().expect("lock poisoned");
            if st.enabled == enabled {
                return;
            }
            st.enabled = enabled;
        }

        if enabled {
            if let Err(e) = self.hook.install(Arc::clone(self) as Arc<dyn InputHandler>) {
                warn!("could not reinstall input hooks: {e}");
                let _ = self.events.send(NodeEvent::EngineError {
                    detail: e.to_string(),
                });
                return;
            }
            self.state.lock().expect("lock poisoned").hooks_installed = true;
            info!("input sharing enabled");
        } else {
            self.end_remote_control();
            self.hook.uninstall();
            self.state.lock().expect("lock poisoned").hooks_installed = false;
            info!("input sharing disabled");
        }
    }

    /// Ends a `Controlling` episode, if one is active. A no-op from `Idle`
    /// or `Controlled`.
    pub fn end_remote_control(&self) {
        let mut st = self.state.lock().expect("lock poisoned");
        self.end_locked(&mut st, Release::Forced);
    }

    /// Tears down all control no matter the state. Used at shutdown.
    pub fn reset(&self) {
        let mut st = self.state.lock().expect("lock poisoned");
        self.end_locked(&mut st, Release::Forced);
        if st.control != ControlState::Idle {
            st.control = ControlState::Idle;
            self.notify_state(&st);
        }
    }

    // ── Local mouse handling ──────────────────────────────────────────────────

    fn local_mouse(&self, event: &MouseObserved) -> EventDisposition {
        let mut st = self.state.lock().expect("lock poisoned");
        if !st.enabled {
            return EventDisposition::PassThrough;
        }
        match st.control {
            // Being controlled: local input is suppressed and dropped.
            ControlState::Controlled(_) => EventDisposition::Handled,
            ControlState::Controlling(peer) => self.mouse_while_controlling(&mut st, peer, event),
            ControlState::Idle => self.mouse_while_idle(&mut st, event),
        }
    }

    fn mouse_while_idle(&self, st: &mut EngineState, event: &MouseObserved) -> EventDisposition {
        if !event.event_type.is_move() {
            return EventDisposition::PassThrough;
        }
        if let Some(until) = st.cooldown_until {
            if event.at < until {
                return EventDisposition::PassThrough;
            }
            st.cooldown_until = None;
        }

        let bounds = self.screen.primary_bounds();
        let Some(hit) = edge_at(bounds, event.x, event.y, st.edge_threshold) else {
            return EventDisposition::PassThrough;
        };

        // A transfer needs a configured peer on that edge with a live
        // connection; its screen size comes from the handshake.
        let peer_id = {
            let peers = self.peers.lock().expect("lock poisoned");
            match peers.peer_at(hit.edge) {
                Some(record) => record.id,
                None => return EventDisposition::PassThrough,
            }
        };
        let Some((remote_w, remote_h)) = self.registry.screen_of(peer_id) else {
            return EventDisposition::PassThrough;
        };

        let anchor = bounds.center();
        let tracker = RemoteTracker::enter(
            hit.edge,
            hit.normalized,
            remote_w,
            remote_h,
            bounds,
            anchor,
            event.at,
        );
        let (nx, ny) = tracker.normalized_pos();

        self.synthesis.hide_system_cursor();
        if let Err(e) = self.synthesis.move_absolute(anchor.0, anchor.1) {
            warn!("could not pin cursor to anchor: {e}");
        }

        self.registry.send_to(
            peer_id,
            WireMessage::CursorEnter(CursorTransferMessage {
                x: nx,
                y: ny,
                edge: hit.edge.opposite(),
            }),
        );

        info!("controlling {peer_id} (entered at {} edge)", hit.edge);
        st.tracker = Some(tracker);
        st.control = ControlState::Controlling(peer_id);
        self.notify_state(st);

        EventDisposition::Handled
    }

    fn mouse_while_controlling(
        &self,
        st: &mut EngineState,
        peer: MachineId,
        event: &MouseObserved,
    ) -> EventDisposition {
        let Some(tracker) = st.tracker.as_mut() else {
            // Unreachable in practice; recover by releasing control.
            self.end_locked(st, Release::Forced);
            return EventDisposition::Handled;
        };

        match event.event_type {
            MouseEventType::Move => {
                match tracker.observe_move(event.x, event.y, event.at) {
                    TrackerStep::Ignored => {}
                    TrackerStep::Moved { x, y, velocity } => {
                        self.registry.send_to(
                            peer,
                            WireMessage::Mouse(MouseMessage {
                                x,
                                y,
                                event_type: MouseEventType::Move,
                                wheel_delta: 0,
                                velocity,
                            }),
                        );
                        let (ax, ay) = tracker.anchor();
                        if let Err(e) = self.synthesis.move_absolute(ax, ay) {
                            warn!("warp-back failed: {e}");
                        }
                        tracker.rebase_to_anchor();
                    }
                    TrackerStep::Returned { normalized } => {
                        st.cooldown_until = Some(event.at + RETURN_COOLDOWN);
                        self.end_locked(st, Release::Return { normalized });
                    }
                }
            }
            event_type => {
                // Buttons and wheels happen at the virtual cursor position.
                let (x, y) = tracker.remote_pos();
                self.registry.send_to(
                    peer,
                    WireMessage::Mouse(MouseMessage {
                        x,
                        y,
                        event_type,
                        wheel_delta: event.wheel_delta,
                        velocity: None,
                    }),
                );
            }
        }
        EventDisposition::Handled
    }

    // ── Local keyboard handling ───────────────────────────────────────────────

    fn local_keyboard(&self, event: &KeyboardObserved) -> EventDisposition {
        let st = self.state.lock().expect("lock poisoned");
        if !st.enabled {
            return EventDisposition::PassThrough;
        }
        match st.control {
            ControlState::Idle => EventDisposition::PassThrough,
            ControlState::Controlled(_) => EventDisposition::Handled,
            ControlState::Controlling(peer) => {
                self.registry.send_to(
                    peer,
                    WireMessage::Keyboard(KeyboardMessage {
                        key_code: event.key_code,
                        scan_code: event.scan_code,
                        event_type: event.event_type,
                        is_extended: event.extended,
                    }),
                );
                EventDisposition::Handled
            }
        }
    }

    // ── Ending an episode ─────────────────────────────────────────────────────

    fn end_locked(&self, st: &mut EngineState, release: Release) {
        let ControlState::Controlling(peer) = st.control else {
            return;
        };
        let Some(tracker) = st.tracker.take() else {
            st.control = ControlState::Idle;
            return;
        };

        self.synthesis.restore_system_cursor();
        self.synthesis.release_clip();

        let position = tracker.position();
        let (leave, restore) = match release {
            Release::Return { normalized } => {
                // The cursor reappears on the local side the peer sits on.
                let (x, y) = if position.is_horizontal() {
                    (
                        if position == Edge::Right { 0.0 } else { 1.0 },
                        normalized,
                    )
                } else {
                    (
                        normalized,
                        if position == Edge::Bottom { 0.0 } else { 1.0 },
                    )
                };
                (
                    CursorTransferMessage { x, y, edge: position },
                    tracker.release_point(normalized),
                )
            }
            Release::Forced => (
                CursorTransferMessage {
                    x: 0.5,
                    y: 0.5,
                    edge: position.opposite(),
                },
                tracker.release_point(0.5),
            ),
        };

        self.registry.send_to(peer, WireMessage::CursorLeave(leave));
        if let Err(e) = self.synthesis.move_absolute(restore.0, restore.1) {
            warn!("could not restore cursor position: {e}");
        }

        info!("released control of {peer}");
        st.control = ControlState::Idle;
        self.notify_state(st);
    }

    // ── Incoming dispatch ─────────────────────────────────────────────────────

    fn dispatch_mouse(&self, from: MachineId, msg: MouseMessage) {
        {
            let st = self.state.lock().expect("lock poisoned");
            if st.control != ControlState::Controlled(from) {
                debug!("mouse from {from} while not controlled by it; ignoring");
                return;
            }
        }
        let bounds = self.screen.primary_bounds();
        let (x, y) = bounds.clamp_point(msg.x, msg.y);
        if let Err(e) = self.synthesis.move_absolute(x, y) {
            self.capability_failure("mouse move synthesis", e);
            return;
        }
        if !msg.event_type.is_move() {
            if let Err(e) = self.synthesis.synthesize_mouse(msg.event_type, msg.wheel_delta) {
                self.capability_failure("mouse synthesis", e);
            }
        }
    }

    fn dispatch_keyboard(&self, from: MachineId, msg: KeyboardMessage) {
        {
            let st = self.state.lock().expect("lock poisoned");
            if st.control != ControlState::Controlled(from) {
                debug!("keyboard from {from} while not controlled by it; ignoring");
                return;
            }
        }
        if let Err(e) =
            self.synthesis
                .synthesize_key(msg.key_code, msg.scan_code, msg.event_type, msg.is_extended)
        {
            self.capability_failure("key synthesis", e);
        }
    }

    fn dispatch_cursor_enter(&self, from: MachineId, msg: CursorTransferMessage) {
        {
            let mut st = self.state.lock().expect("lock poisoned");
            match st.control {
                ControlState::Idle => {
                    st.control = ControlState::Controlled(from);
                    self.notify_state(&st);
                }
                // Repeated enter from the controlling peer is a no-op.
                ControlState::Controlled(current) if current == from => return,
                other => {
                    // Includes Controlling: accepting would nest control.
                    warn!("CursorEnter from {from} ignored in state {other}");
                    return;
                }
            }
        }

        let bounds = self.screen.primary_bounds();
        let x = bounds.x + (msg.x * (bounds.width - 1) as f32).round() as i32;
        let y = bounds.y + (msg.y * (bounds.height - 1) as f32).round() as i32;
        let (x, y) = bounds.clamp_point(x, y);
        if let Err(e) = self.synthesis.move_absolute(x, y) {
            self.capability_failure("entry move synthesis", e);
        }
        info!("now controlled by {from} (from the {} edge)", msg.edge);
    }

    fn dispatch_cursor_leave(&self, from: MachineId) {
        let mut st = self.state.lock().expect("lock poisoned");
        if st.control == ControlState::Controlled(from) {
            st.control = ControlState::Idle;
            self.notify_state(&st);
            info!("{from} released control of this machine");
        }
    }

    fn dispatch_clipboard(&self, from: MachineId, msg: ClipboardMessage) {
        let accepted = {
            let st = self.state.lock().expect("lock poisoned");
            st.clipboard.accepts(msg.content_type)
        };
        if !accepted {
            debug!("clipboard content from {from} not accepted by policy");
            return;
        }

        // The write below fires the local change callback; the flag makes
        // that callback swallow the echo instead of broadcasting it back.
        self.state.lock().expect("lock poisoned").ignore_next_clipboard = true;

        let content = ClipboardContent {
            content_type: msg.content_type,
            data: msg.data,
            format_hint: msg.format_hint,
        };
        match self.clipboard.write_content(&content) {
            Ok(()) => {
                let _ = self.events.send(NodeEvent::ClipboardApplied { from });
            }
            Err(e) => {
                self.state.lock().expect("lock poisoned").ignore_next_clipboard = false;
                self.capability_failure("clipboard write", e);
            }
        }
    }

    /// Local clipboard changed: fan the content out to every live peer.
    pub fn handle_clipboard_change(&self) {
        {
            let mut st = self.state.lock().expect("lock poisoned");
            if !st.clipboard.enabled {
                return;
            }
            if st.ignore_next_clipboard {
                st.ignore_next_clipboard = false;
                return;
            }
        }
        let Some(content) = self.clipboard.read_content() else {
            return;
        };
        let msg = WireMessage::Clipboard(ClipboardMessage {
            content_type: content.content_type,
            format_hint: content.format_hint,
            data: content.data,
        });
        let delivered = self.registry.broadcast(&msg);
        debug!("clipboard change fanned out to {delivered} peer(s)");
    }

    fn capability_failure(&self, what: &str, e: CapabilityError) {
        warn!("{what} failed: {e}");
        let _ = self.events.send(NodeEvent::EngineError {
            detail: format!("{what}: {e}"),
        });
    }

    fn notify_state(&self, st: &EngineState) {
        let _ = self.events.send(NodeEvent::ControlStateChanged { state: st.control });
    }
}

// ── Capability and network entry points ───────────────────────────────────────

impl InputHandler for ControlEngine {
    fn on_mouse(&self, event: &MouseObserved) -> EventDisposition {
        self.local_mouse(event)
    }

    fn on_keyboard(&self, event: &KeyboardObserved) -> EventDisposition {
        self.local_keyboard(event)
    }
}

impl PeerMessageSink for ControlEngine {
    fn on_peer_connected(&self, peer: &PeerGreeting) {
        self.peers
            .lock()
            .expect("lock poisoned")
            .record_screen(peer.id, peer.screen_width, peer.screen_height);
        let _ = self.events.send(NodeEvent::PeerConnected {
            id: peer.id,
            name: peer.name.clone(),
        });
    }

    fn on_peer_message(&self, peer: MachineId, msg: WireMessage) {
        match msg {
            WireMessage::Mouse(m) => self.dispatch_mouse(peer, m),
            WireMessage::Keyboard(m) => self.dispatch_keyboard(peer, m),
            WireMessage::CursorEnter(m) => self.dispatch_cursor_enter(peer, m),
            WireMessage::CursorLeave(_) => self.dispatch_cursor_leave(peer),
            WireMessage::Clipboard(m) => self.dispatch_clipboard(peer, m),
            // Defined on the wire but carries no behaviour.
            WireMessage::ClipboardRequest => {}
            WireMessage::Error(e) => {
                warn!("peer {peer} reported error {}: {}", e.code, e.description);
            }
            // Liveness and handshake traffic never reaches this layer.
            other => debug!("unexpected {:?} from {peer}", other.message_type()),
        }
    }

    fn on_peer_disconnected(&self, peer: MachineId, reason: DisconnectReason) {
        {
            let mut st = self.state.lock().expect("lock poisoned");
            match st.control {
                ControlState::Controlling(p) if p == peer => {
                    self.end_locked(&mut st, Release::Forced);
                }
                ControlState::Controlled(p) if p == peer => {
                    st.control = ControlState::Idle;
                    self.notify_state(&st);
                }
                _ => {}
            }
        }
        info!("peer {peer} disconnected: {reason}");
        let _ = self.events.send(NodeEvent::PeerDisconnected { id: peer, reason });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
