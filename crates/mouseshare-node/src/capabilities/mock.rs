//! Recording capability doubles.
//!
//! Used by unit and integration tests to drive the engine without any OS
//! dependencies, and by the headless binary where no platform adapter crate
//! is linked in. Every double records the calls it receives so tests can
//! assert on exactly what the engine did.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use mouseshare_core::protocol::messages::{KeyEventType, MouseEventType};
use mouseshare_core::Rect;

use super::{
    CapabilityError, ClipboardAccess, ClipboardContent, EventDisposition, GlobalInputHook,
    InputHandler, InputSynthesis, InterfaceIpv4, KeyboardObserved, MouseObserved,
    NetworkInterfaces, ScreenMetrics,
};

// ── Input hook ────────────────────────────────────────────────────────────────

/// Mock hook that lets tests inject synthetic events and observe the
/// engine's suppression verdicts.
#[derive(Default)]
pub struct MockInputHook {
    handler: Mutex<Option<Arc<dyn InputHandler>>>,
    install_count: Mutex<u32>,
    uninstall_count: Mutex<u32>,
}

impl MockInputHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` while hooks are installed.
    pub fn is_installed(&self) -> bool {
        self.handler.lock().expect("lock poisoned").is_some()
    }

    pub fn install_count(&self) -> u32 {
        *self.install_count.lock().expect("lock poisoned")
    }

    pub fn uninstall_count(&self) -> u32 {
        *self.uninstall_count.lock().expect("lock poisoned")
    }

    /// Injects a mouse event as if observed from hardware, returning the
    /// handler's disposition.
    ///
    /// Panics if the hook is not installed, mirroring how a real hook cannot
    /// fire before installation.
    pub fn inject_mouse(&self, event: MouseObserved) -> EventDisposition {
        let handler = self
            .handler
            .lock()
            .expect("lock poisoned")
            .clone()
            .expect("inject_mouse called before install()");
        handler.on_mouse(&event)
    }

    /// Injects a keyboard event, returning the handler's disposition.
    pub fn inject_keyboard(&self, event: KeyboardObserved) -> EventDisposition {
        let handler = self
            .handler
            .lock()
            .expect("lock poisoned")
            .clone()
            .expect("inject_keyboard called before install()");
        handler.on_keyboard(&event)
    }
}

impl GlobalInputHook for MockInputHook {
    fn install(&self, handler: Arc<dyn InputHandler>) -> Result<(), CapabilityError> {
        *self.handler.lock().expect("lock poisoned") = Some(handler);
        *self.install_count.lock().expect("lock poisoned") += 1;
        Ok(())
    }

    fn uninstall(&self) {
        *self.handler.lock().expect("lock poisoned") = None;
        *self.uninstall_count.lock().expect("lock poisoned") += 1;
    }
}

/// Hook double whose installation always fails, for startup error paths.
pub struct FailingInputHook;

impl GlobalInputHook for FailingInputHook {
    fn install(&self, _handler: Arc<dyn InputHandler>) -> Result<(), CapabilityError> {
        Err(CapabilityError::HookInstall("injected failure".to_string()))
    }

    fn uninstall(&self) {}
}

// ── Input synthesis ───────────────────────────────────────────────────────────

/// Records every synthesis call.
#[derive(Default)]
pub struct RecordingSynthesis {
    pub moves: Mutex<Vec<(i32, i32)>>,
    pub mouse_events: Mutex<Vec<(MouseEventType, i32)>>,
    pub key_events: Mutex<Vec<(i32, u32, KeyEventType, bool)>>,
    pub hide_count: Mutex<u32>,
    pub restore_count: Mutex<u32>,
    pub clips: Mutex<Vec<Rect>>,
    pub release_count: Mutex<u32>,
}

impl RecordingSynthesis {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent absolute pointer move, if any.
    pub fn last_move(&self) -> Option<(i32, i32)> {
        self.moves.lock().expect("lock poisoned").last().copied()
    }
}

impl InputSynthesis for RecordingSynthesis {
    fn move_absolute(&self, x: i32, y: i32) -> Result<(), CapabilityError> {
        self.moves.lock().expect("lock poisoned").push((x, y));
        Ok(())
    }

    fn synthesize_mouse(
        &self,
        event_type: MouseEventType,
        wheel_delta: i32,
    ) -> Result<(), CapabilityError> {
        self.mouse_events
            .lock()
            .expect("lock poisoned")
            .push((event_type, wheel_delta));
        Ok(())
    }

    fn synthesize_key(
        &self,
        key_code: i32,
        scan_code: u32,
        event_type: KeyEventType,
        extended: bool,
    ) -> Result<(), CapabilityError> {
        self.key_events
            .lock()
            .expect("lock poisoned")
            .push((key_code, scan_code, event_type, extended));
        Ok(())
    }

    fn hide_system_cursor(&self) {
        *self.hide_count.lock().expect("lock poisoned") += 1;
    }

    fn restore_system_cursor(&self) {
        *self.restore_count.lock().expect("lock poisoned") += 1;
    }

    fn clip_cursor(&self, rect: Rect) {
        self.clips.lock().expect("lock poisoned").push(rect);
    }

    fn release_clip(&self) {
        *self.release_count.lock().expect("lock poisoned") += 1;
    }
}

// ── Screen metrics ────────────────────────────────────────────────────────────

/// Fixed display geometry.
pub struct FixedScreenMetrics {
    primary: Rect,
    virtual_: Rect,
}

impl FixedScreenMetrics {
    pub fn new(primary: Rect) -> Self {
        Self {
            primary,
            virtual_: primary,
        }
    }

    pub fn with_virtual(primary: Rect, virtual_: Rect) -> Self {
        Self { primary, virtual_ }
    }
}

impl ScreenMetrics for FixedScreenMetrics {
    fn primary_bounds(&self) -> Rect {
        self.primary
    }

    fn virtual_bounds(&self) -> Rect {
        self.virtual_
    }
}

// ── Clipboard ─────────────────────────────────────────────────────────────────

/// Clipboard double backed by a plain buffer.
#[derive(Default)]
pub struct MockClipboard {
    content: Mutex<Option<ClipboardContent>>,
    writes: Mutex<Vec<ClipboardContent>>,
    notify: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl MockClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a local copy: stores the content and fires the change
    /// callback the way the OS notification would.
    pub fn set_local_content(&self, content: ClipboardContent) {
        *self.content.lock().expect("lock poisoned") = Some(content);
        if let Some(notify) = self.notify.lock().expect("lock poisoned").as_ref() {
            notify();
        }
    }

    /// Everything written through [`ClipboardAccess::write_content`].
    pub fn written(&self) -> Vec<ClipboardContent> {
        self.writes.lock().expect("lock poisoned").clone()
    }
}

impl ClipboardAccess for MockClipboard {
    fn subscribe_changes(&self, notify: Box<dyn Fn() + Send + Sync>) {
        *self.notify.lock().expect("lock poisoned") = Some(notify);
    }

    fn read_content(&self) -> Option<ClipboardContent> {
        self.content.lock().expect("lock poisoned").clone()
    }

    fn write_content(&self, content: &ClipboardContent) -> Result<(), CapabilityError> {
        *self.content.lock().expect("lock poisoned") = Some(content.clone());
        self.writes.lock().expect("lock poisoned").push(content.clone());
        // A real clipboard write re-triggers the OS change notification.
        if let Some(notify) = self.notify.lock().expect("lock poisoned").as_ref() {
            notify();
        }
        Ok(())
    }
}

// ── Network interfaces ────────────────────────────────────────────────────────

/// Fixed interface list.
pub struct StaticInterfaces {
    addresses: Vec<InterfaceIpv4>,
}

impl StaticInterfaces {
    pub fn new(addresses: Vec<InterfaceIpv4>) -> Self {
        Self { addresses }
    }

    /// A single typical home-LAN interface.
    pub fn home_lan() -> Self {
        Self::new(vec![InterfaceIpv4 {
            addr: Ipv4Addr::new(192, 168, 1, 10),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        }])
    }

    /// No usable interfaces; discovery must fall back to 255.255.255.255.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }
}

impl NetworkInterfaces for StaticInterfaces {
    fn ipv4_addresses(&self) -> Vec<InterfaceIpv4> {
        self.addresses.clone()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct SwallowEverything;

    impl InputHandler for SwallowEverything {
        fn on_mouse(&self, _event: &MouseObserved) -> EventDisposition {
            EventDisposition::Handled
        }
        fn on_keyboard(&self, _event: &KeyboardObserved) -> EventDisposition {
            EventDisposition::Handled
        }
    }

    #[test]
    fn test_mock_hook_routes_injected_events_to_handler() {
        let hook = MockInputHook::new();
        hook.install(Arc::new(SwallowEverything)).expect("install");

        let disposition = hook.inject_mouse(MouseObserved {
            x: 10,
            y: 20,
            event_type: MouseEventType::Move,
            wheel_delta: 0,
            at: Instant::now(),
        });
        assert_eq!(disposition, EventDisposition::Handled);
    }

    #[test]
    fn test_mock_hook_tracks_install_state() {
        let hook = MockInputHook::new();
        assert!(!hook.is_installed());
        hook.install(Arc::new(SwallowEverything)).expect("install");
        assert!(hook.is_installed());
        hook.uninstall();
        assert!(!hook.is_installed());
        assert_eq!(hook.install_count(), 1);
        assert_eq!(hook.uninstall_count(), 1);
    }

    #[test]
    fn test_recording_synthesis_remembers_last_move() {
        let synth = RecordingSynthesis::new();
        synth.move_absolute(1, 2).expect("move");
        synth.move_absolute(3, 4).expect("move");
        assert_eq!(synth.last_move(), Some((3, 4)));
        assert_eq!(synth.moves.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_mock_clipboard_fires_change_callback_on_local_copy() {
        let clipboard = MockClipboard::new();
        let fired = Arc::new(Mutex::new(0u32));
        let fired_clone = Arc::clone(&fired);
        clipboard.subscribe_changes(Box::new(move || {
            *fired_clone.lock().unwrap() += 1;
        }));

        clipboard.set_local_content(ClipboardContent {
            content_type: mouseshare_core::protocol::messages::ClipboardContentType::Text,
            data: b"copy".to_vec(),
            format_hint: String::new(),
        });
        assert_eq!(*fired.lock().unwrap(), 1);
    }

    #[test]
    fn test_static_interfaces_none_is_empty() {
        assert!(StaticInterfaces::none().ipv4_addresses().is_empty());
        assert_eq!(StaticInterfaces::home_lan().ipv4_addresses().len(), 1);
    }
}
