//! Virtual cursor tracking while controlling a remote peer.
//!
//! While a remote peer is controlled, the physical pointer never leaves the
//! local screen: after every observed move it is warped back to a fixed
//! anchor (the centre of the primary display), and only the *deltas* between
//! observations are meaningful. The [`RemoteTracker`] turns that stream of
//! deltas into a virtual cursor position in the remote screen's pixel space.
//!
//! Three details make this trickier than plain accumulation:
//!
//! - **Warp echoes.** The warp itself produces an observed move event. The
//!   tracker is rebased onto the anchor after every warp so the echo arrives
//!   as a zero delta, and as a second line of defence any delta whose
//!   magnitude could only have been produced by a warp (half the screen
//!   dimension, minus a guard) is discarded — OS pointer acceleration can
//!   round a warp's landing coordinate, so exact-position matching is not
//!   reliable on its own.
//! - **Entry deadband.** A cursor that enters the remote screen and jitters
//!   a pixel backwards must not immediately bounce home. The tracker only
//!   arms the return test once the cursor has travelled 5 % of the remote
//!   screen's entry-axis dimension away from the entry edge.
//! - **Velocity hints.** A smoothed velocity rides along with move frames so
//!   receivers may extrapolate across network jitter. It is an exponential
//!   moving average, reset whenever the event gap is implausible, and only
//!   attached when it changed enough to matter.

use std::time::{Duration, Instant};

use mouseshare_core::{Edge, Rect};

/// Cooldown after a return before another edge transfer can trigger.
pub const RETURN_COOLDOWN: Duration = Duration::from_millis(500);

/// Fraction of the entry-axis dimension the cursor must travel before the
/// return test arms.
pub const ENTRY_DEADBAND_FRACTION: f32 = 0.05;

/// Safety margin subtracted from the half-screen warp-echo bound.
pub const WARP_GUARD_MARGIN: i32 = 10;

/// EMA weights for velocity smoothing.
const VELOCITY_KEEP: f32 = 0.7;
const VELOCITY_BLEND: f32 = 0.3;

/// Gaps outside (0, 1s) reset the velocity estimate.
const VELOCITY_MAX_GAP: Duration = Duration::from_millis(1000);

/// Minimum per-component change (px/s) that forces a velocity resend.
const VELOCITY_RESEND_DELTA: f32 = 50.0;

/// Maximum age of the last sent velocity before it is refreshed anyway.
const VELOCITY_RESEND_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of feeding one observed physical move into the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackerStep {
    /// Zero delta or warp echo; nothing to transmit.
    Ignored,
    /// The virtual cursor moved; transmit a move at the clamped position.
    Moved {
        x: i32,
        y: i32,
        /// Velocity hint to attach, when due.
        velocity: Option<(f32, f32)>,
    },
    /// The cursor left the remote screen back towards this machine.
    Returned {
        /// Normalized exit position along the release edge.
        normalized: f32,
    },
}

/// Tracks the virtual cursor for one `Controlling` episode.
#[derive(Debug)]
pub struct RemoteTracker {
    /// Which side of the local screen the controlled peer sits on.
    position: Edge,
    remote_w: i32,
    remote_h: i32,
    local: Rect,
    anchor: (i32, i32),
    last_seen: (i32, i32),
    remote_x: i32,
    remote_y: i32,
    moved_in: bool,
    velocity: (f32, f32),
    last_event_at: Instant,
    last_velocity_sent: Option<((f32, f32), Instant)>,
}

impl RemoteTracker {
    /// Starts an episode: the pointer crossed the local edge towards a peer
    /// at `position` with screen `remote_w x remote_h`, at `normalized`
    /// along the edge. The virtual cursor starts on the remote edge the
    /// pointer is entering through.
    pub fn enter(
        position: Edge,
        normalized: f32,
        remote_w: u32,
        remote_h: u32,
        local: Rect,
        anchor: (i32, i32),
        now: Instant,
    ) -> Self {
        let remote_w = remote_w.max(1) as i32;
        let remote_h = remote_h.max(1) as i32;
        let (remote_x, remote_y) = match position {
            // Peer to the right: enter through the remote's left edge.
            Edge::Right => (0, (normalized * remote_h as f32) as i32),
            Edge::Left => (remote_w - 1, (normalized * remote_h as f32) as i32),
            Edge::Bottom => ((normalized * remote_w as f32) as i32, 0),
            Edge::Top => ((normalized * remote_w as f32) as i32, remote_h - 1),
        };
        Self {
            position,
            remote_w,
            remote_h,
            local,
            anchor,
            last_seen: anchor,
            remote_x: remote_x.clamp(0, remote_w - 1),
            remote_y: remote_y.clamp(0, remote_h - 1),
            moved_in: false,
            velocity: (0.0, 0.0),
            last_event_at: now,
            last_velocity_sent: None,
        }
    }

    pub fn position(&self) -> Edge {
        self.position
    }

    pub fn anchor(&self) -> (i32, i32) {
        self.anchor
    }

    pub fn local_bounds(&self) -> Rect {
        self.local
    }

    /// Current clamped virtual cursor position in remote pixels.
    pub fn remote_pos(&self) -> (i32, i32) {
        (self.remote_x, self.remote_y)
    }

    /// Virtual cursor position normalized to `[0, 1]` on each axis.
    pub fn normalized_pos(&self) -> (f32, f32) {
        (
            self.remote_x as f32 / self.remote_w as f32,
            self.remote_y as f32 / self.remote_h as f32,
        )
    }

    /// Whether the entry deadband has been crossed this episode.
    pub fn moved_in(&self) -> bool {
        self.moved_in
    }

    /// Called after the physical pointer was warped back to the anchor, so
    /// the warp's own event arrives as a zero delta.
    pub fn rebase_to_anchor(&mut self) {
        self.last_seen = self.anchor;
    }

    /// Feeds one observed physical move.
    pub fn observe_move(&mut self, x: i32, y: i32, now: Instant) -> TrackerStep {
        let dx = x - self.last_seen.0;
        let dy = y - self.last_seen.1;
        self.last_seen = (x, y);

        if dx == 0 && dy == 0 {
            return TrackerStep::Ignored;
        }
        if self.is_warp_echo(dx, dy) {
            return TrackerStep::Ignored;
        }

        self.update_velocity(dx, dy, now);

        let candidate_x = self.remote_x + dx;
        let candidate_y = self.remote_y + dy;

        if !self.moved_in && self.crossed_deadband(candidate_x, candidate_y) {
            self.moved_in = true;
        }

        if self.moved_in {
            if let Some(normalized) = self.return_exit(candidate_x, candidate_y) {
                return TrackerStep::Returned { normalized };
            }
        }

        self.remote_x = candidate_x.clamp(0, self.remote_w - 1);
        self.remote_y = candidate_y.clamp(0, self.remote_h - 1);

        TrackerStep::Moved {
            x: self.remote_x,
            y: self.remote_y,
            velocity: self.velocity_to_send(now),
        }
    }

    /// A delta this large along either axis can only be the pointer snapping
    /// back from a warp.
    fn is_warp_echo(&self, dx: i32, dy: i32) -> bool {
        let half_w = self.local.width / 2;
        let half_h = self.local.height / 2;
        dx.abs() + WARP_GUARD_MARGIN > half_w || dy.abs() + WARP_GUARD_MARGIN > half_h
    }

    fn update_velocity(&mut self, dx: i32, dy: i32, now: Instant) {
        let gap = now.duration_since(self.last_event_at);
        self.last_event_at = now;
        if gap.is_zero() || gap >= VELOCITY_MAX_GAP {
            self.velocity = (0.0, 0.0);
            return;
        }
        let secs = gap.as_secs_f32();
        let sample = (dx as f32 / secs, dy as f32 / secs);
        self.velocity = (
            VELOCITY_KEEP * self.velocity.0 + VELOCITY_BLEND * sample.0,
            VELOCITY_KEEP * self.velocity.1 + VELOCITY_BLEND * sample.1,
        );
    }

    fn velocity_to_send(&mut self, now: Instant) -> Option<(f32, f32)> {
        let due = match self.last_velocity_sent {
            None => true,
            Some((sent, at)) => {
                (self.velocity.0 - sent.0).abs() >= VELOCITY_RESEND_DELTA
                    || (self.velocity.1 - sent.1).abs() >= VELOCITY_RESEND_DELTA
                    || now.duration_since(at) >= VELOCITY_RESEND_INTERVAL
            }
        };
        if due {
            self.last_velocity_sent = Some((self.velocity, now));
            Some(self.velocity)
        } else {
            None
        }
    }

    /// Distance travelled from the entry edge along the entry axis, measured
    /// against the deadband.
    fn crossed_deadband(&self, x: i32, y: i32) -> bool {
        let (travel, dimension) = match self.position {
            Edge::Right => (x, self.remote_w),
            Edge::Left => ((self.remote_w - 1) - x, self.remote_w),
            Edge::Bottom => (y, self.remote_h),
            Edge::Top => ((self.remote_h - 1) - y, self.remote_h),
        };
        travel as f32 >= ENTRY_DEADBAND_FRACTION * dimension as f32
    }

    /// Tests whether the unclamped candidate position has exited the remote
    /// screen past the edge facing this machine, returning the normalized
    /// exit coordinate.
    fn return_exit(&self, x: i32, y: i32) -> Option<f32> {
        let exited = match self.position {
            Edge::Right => x < 0,
            Edge::Left => x > self.remote_w - 1,
            Edge::Top => y > self.remote_h - 1,
            Edge::Bottom => y < 0,
        };
        if !exited {
            return None;
        }
        let normalized = if self.position.is_horizontal() {
            y as f32 / self.remote_h as f32
        } else {
            x as f32 / self.remote_w as f32
        };
        Some(normalized.clamp(0.0, 1.0))
    }

    /// Where the physical cursor reappears on the local screen for a release
    /// at `normalized` along the edge the peer sits on.
    pub fn release_point(&self, normalized: f32) -> (i32, i32) {
        let b = self.local;
        match self.position {
            Edge::Right => (
                b.right() - 1,
                b.y + (normalized * b.height as f32) as i32,
            ),
            Edge::Left => (b.x, b.y + (normalized * b.height as f32) as i32),
            Edge::Top => (b.x + (normalized * b.width as f32) as i32, b.y),
            Edge::Bottom => (
                b.x + (normalized * b.width as f32) as i32,
                b.bottom() - 1,
            ),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
