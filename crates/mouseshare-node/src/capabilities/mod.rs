//! Platform capability contracts.
//!
//! Everything OS-specific — global input hooks, input synthesis, screen
//! metrics, the clipboard, interface enumeration — is reached through the
//! traits in this module. Production builds plug in per-OS adapters; tests
//! and the headless binary use the recording doubles in [`mock`].
//!
//! # Why the hook handler is synchronous
//!
//! A low-level input hook runs on an OS-owned thread with a hard latency
//! budget: the callback must decide *before returning* whether the event is
//! handled (swallowed) or passed on to other applications. The
//! [`InputHandler`] contract therefore returns an [`EventDisposition`]
//! synchronously. Anything expensive the handler triggers (a network send) is
//! queued, never awaited.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use mouseshare_core::protocol::messages::{ClipboardContentType, KeyEventType, MouseEventType};
use mouseshare_core::Rect;
use thiserror::Error;

pub mod mock;

/// Error type for capability adapters.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// A global input hook could not be installed. Fatal at startup.
    #[error("failed to install input hook: {0}")]
    HookInstall(String),
    /// An input synthesis call failed; the offending event is dropped.
    #[error("input synthesis failed: {0}")]
    Synthesis(String),
    /// A clipboard read or write failed.
    #[error("clipboard access failed: {0}")]
    Clipboard(String),
}

// ── Observed input events ─────────────────────────────────────────────────────

/// A mouse event observed by the global hook, in local screen pixels.
#[derive(Debug, Clone, Copy)]
pub struct MouseObserved {
    pub x: i32,
    pub y: i32,
    pub event_type: MouseEventType,
    /// Wheel movement in OS notch units; zero for non-wheel events.
    pub wheel_delta: i32,
    pub at: Instant,
}

/// A keyboard event observed by the global hook.
#[derive(Debug, Clone, Copy)]
pub struct KeyboardObserved {
    pub key_code: i32,
    pub scan_code: u32,
    pub event_type: KeyEventType,
    pub extended: bool,
    pub at: Instant,
}

/// The hook's verdict on one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// Deliver the event to other applications as usual.
    PassThrough,
    /// Mark the event handled so no other consumer sees it.
    Handled,
}

/// Receives observed events and answers, synchronously, whether each one is
/// suppressed. Implemented by the control engine.
pub trait InputHandler: Send + Sync {
    fn on_mouse(&self, event: &MouseObserved) -> EventDisposition;
    fn on_keyboard(&self, event: &KeyboardObserved) -> EventDisposition;
}

// ── Capability traits ─────────────────────────────────────────────────────────

/// Installs and removes the process-wide input hooks.
pub trait GlobalInputHook: Send + Sync {
    /// Installs the hooks; every subsequent input event is delivered to
    /// `handler` before the rest of the system sees it.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::HookInstall`] when the OS refuses the hook.
    fn install(&self, handler: Arc<dyn InputHandler>) -> Result<(), CapabilityError>;

    /// Removes the hooks. Safe to call when not installed.
    fn uninstall(&self);
}

/// Synthesizes input and manipulates the system cursor.
pub trait InputSynthesis: Send + Sync {
    /// Moves the pointer to an absolute position in local screen pixels.
    fn move_absolute(&self, x: i32, y: i32) -> Result<(), CapabilityError>;

    /// Emits a non-move mouse event (button or wheel) at the current pointer
    /// position.
    fn synthesize_mouse(
        &self,
        event_type: MouseEventType,
        wheel_delta: i32,
    ) -> Result<(), CapabilityError>;

    /// Emits a key event.
    fn synthesize_key(
        &self,
        key_code: i32,
        scan_code: u32,
        event_type: KeyEventType,
        extended: bool,
    ) -> Result<(), CapabilityError>;

    /// Hides the system cursor while a remote peer is being controlled.
    fn hide_system_cursor(&self);

    /// Restores the system cursor.
    fn restore_system_cursor(&self);

    /// Confines the pointer to `rect` (used by the clip capture strategy).
    fn clip_cursor(&self, rect: Rect);

    /// Releases a previous [`clip_cursor`](Self::clip_cursor).
    fn release_clip(&self);
}

/// Reports display geometry.
pub trait ScreenMetrics: Send + Sync {
    /// The primary display rectangle in screen pixels.
    fn primary_bounds(&self) -> Rect;

    /// The bounding rectangle of the whole virtual desktop.
    fn virtual_bounds(&self) -> Rect;
}

/// Clipboard content as read from or written to the OS.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipboardContent {
    pub content_type: ClipboardContentType,
    pub data: Vec<u8>,
    /// Free-form format detail (e.g. a MIME type).
    pub format_hint: String,
}

/// Local clipboard access.
pub trait ClipboardAccess: Send + Sync {
    /// Registers a callback fired on every local clipboard change, including
    /// changes made through [`write_content`](Self::write_content).
    fn subscribe_changes(&self, notify: Box<dyn Fn() + Send + Sync>);

    /// Reads the current clipboard content, if it is a shareable format.
    fn read_content(&self) -> Option<ClipboardContent>;

    /// Writes content to the local clipboard.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Clipboard`] when the OS rejects the write.
    fn write_content(&self, content: &ClipboardContent) -> Result<(), CapabilityError>;
}

/// One IPv4 interface address with its netmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceIpv4 {
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// Enumerates local IPv4 unicast addresses for broadcast computation.
pub trait NetworkInterfaces: Send + Sync {
    /// Non-loopback, operational IPv4 addresses. An empty result makes
    /// discovery fall back to the limited broadcast address.
    fn ipv4_addresses(&self) -> Vec<InterfaceIpv4>;
}
