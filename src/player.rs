use std::collections::HashMap;

use crate::assets::{AnimationFrame, SourceResolver, decode_animation};
use crate::core::LayerId;
use crate::error::{SoireeError, SoireeResult};

/// Cancellable frame source feeding one playback session.
///
/// Push hosts deliver frames through the engine with the session token and
/// only implement cancellation; transports that own decoded frames (local
/// clips) can additionally hand them out through [`FrameTransport::poll_frame`]
/// so the host loop can pump playback.
pub trait FrameTransport {
    /// Cancel the underlying decode/transport. Idempotent.
    fn cancel(&mut self);

    fn is_cancelled(&self) -> bool;

    fn poll_frame(&mut self) -> Option<AnimationFrame> {
        None
    }
}

/// Opens a transport for an animated source. Injectable so hosts can supply
/// network-backed streams and tests can supply spies.
pub trait TransportProvider {
    fn open(&mut self, source: &str) -> SoireeResult<Box<dyn FrameTransport>>;
}

/// Transport over a fully decoded clip; frames loop like GIF playback.
pub struct ClipTransport {
    frames: Vec<AnimationFrame>,
    cursor: usize,
    cancelled: bool,
}

impl ClipTransport {
    pub fn new(frames: Vec<AnimationFrame>) -> Self {
        Self {
            frames,
            cursor: 0,
            cancelled: false,
        }
    }
}

impl FrameTransport for ClipTransport {
    fn cancel(&mut self) {
        self.cancelled = true;
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    fn poll_frame(&mut self) -> Option<AnimationFrame> {
        if self.cancelled || self.frames.is_empty() {
            return None;
        }
        let frame = self.frames[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        Some(frame)
    }
}

/// Default provider: fetch the source through a resolver and decode the whole
/// clip up front.
pub struct ClipTransportProvider<R: SourceResolver> {
    resolver: R,
}

impl<R: SourceResolver> ClipTransportProvider<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }
}

impl<R: SourceResolver> TransportProvider for ClipTransportProvider<R> {
    fn open(&mut self, source: &str) -> SoireeResult<Box<dyn FrameTransport>> {
        let bytes = self.resolver.fetch(source)?;
        Ok(Box::new(ClipTransport::new(decode_animation(&bytes)?)))
    }
}

/// Identifies one playback session; frame deliveries carry the token so late
/// completions from a superseded session are detected and discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionToken(u64);

/// Offscreen buffer a session repaints on each decoded frame, sized to the
/// current frame.
#[derive(Clone, Debug)]
pub struct OffscreenBuffer {
    pub width: u32,
    pub height: u32,
    pub rgba8_premul: Vec<u8>,
}

/// Frame-size change the engine uses to recompute the layer's displayed scale
/// so the visual footprint is preserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FootprintChange {
    pub from: (u32, u32),
    pub to: (u32, u32),
}

#[derive(Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Painted { resized: Option<FootprintChange> },
    /// Stale token, unknown layer, or disposed player.
    Discarded,
}

struct PlaybackSession {
    token: SessionToken,
    transport: Box<dyn FrameTransport>,
    buffer: Option<OffscreenBuffer>,
    current_dims: Option<(u32, u32)>,
}

impl PlaybackSession {
    fn paint(&mut self, frame: AnimationFrame) -> Option<FootprintChange> {
        let to = (frame.width, frame.height);
        let resized = match self.current_dims {
            Some(from) if from != to => Some(FootprintChange { from, to }),
            _ => None,
        };
        self.current_dims = Some(to);
        self.buffer = Some(OffscreenBuffer {
            width: frame.width,
            height: frame.height,
            rgba8_premul: frame.rgba8_premul,
        });
        resized
    }
}

/// Owner of all animated-layer playback sessions, keyed by layer id.
///
/// At most one session per layer is active; starting a new one synchronously
/// cancels the prior transport before the new one is engaged. Disposal cancels
/// everything, and any frame delivered afterwards is a no-op.
#[derive(Default)]
pub struct OverlayPlayer {
    sessions: HashMap<LayerId, PlaybackSession>,
    next_token: u64,
    disposed: bool,
}

impl OverlayPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start playback for a layer, superseding any prior session for the same
    /// id. `initial_dims` are the poster dimensions, so the first frame can
    /// already report a footprint change if it differs.
    pub fn start(
        &mut self,
        layer_id: &LayerId,
        mut transport: Box<dyn FrameTransport>,
        initial_dims: Option<(u32, u32)>,
    ) -> SoireeResult<SessionToken> {
        if self.disposed {
            transport.cancel();
            return Err(SoireeError::validation(
                "cannot start animation on a disposed player",
            ));
        }

        self.stop(layer_id);

        self.next_token += 1;
        let token = SessionToken(self.next_token);
        self.sessions.insert(
            layer_id.clone(),
            PlaybackSession {
                token,
                transport,
                buffer: None,
                current_dims: initial_dims,
            },
        );
        Ok(token)
    }

    /// Deliver one decoded frame. The token must match the layer's live
    /// session; anything else (including delivery after disposal) is
    /// discarded rather than crashing.
    pub fn deliver(
        &mut self,
        layer_id: &LayerId,
        token: SessionToken,
        frame: AnimationFrame,
    ) -> FrameOutcome {
        if self.disposed {
            tracing::warn!(layer = %layer_id, "frame delivered after player disposal, discarding");
            return FrameOutcome::Discarded;
        }
        let Some(session) = self.sessions.get_mut(layer_id) else {
            tracing::warn!(layer = %layer_id, "frame delivered for stopped session, discarding");
            return FrameOutcome::Discarded;
        };
        if session.token != token {
            tracing::warn!(layer = %layer_id, "frame delivered with stale session token, discarding");
            return FrameOutcome::Discarded;
        }
        FrameOutcome::Painted {
            resized: session.paint(frame),
        }
    }

    /// Pull the next frame from a session's own transport and paint it.
    /// Returns `None` when there is no session or the transport has nothing.
    pub fn pump(&mut self, layer_id: &LayerId) -> Option<FrameOutcome> {
        if self.disposed {
            return None;
        }
        let session = self.sessions.get_mut(layer_id)?;
        let frame = session.transport.poll_frame()?;
        Some(FrameOutcome::Painted {
            resized: session.paint(frame),
        })
    }

    /// Stop and cancel a layer's session. Idempotent.
    pub fn stop(&mut self, layer_id: &LayerId) -> bool {
        match self.sessions.remove(layer_id) {
            Some(mut session) => {
                session.transport.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every active session without disposing the player. Used when a
    /// document load replaces the whole layer set.
    pub fn stop_all(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            session.transport.cancel();
        }
    }

    /// Cancel every active session and refuse all future deliveries. Called
    /// before the canvas is dropped so no session outlives its render target.
    pub fn shutdown(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            session.transport.cancel();
        }
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_active(&self, layer_id: &LayerId) -> bool {
        self.sessions.contains_key(layer_id)
    }

    pub fn token_of(&self, layer_id: &LayerId) -> Option<SessionToken> {
        self.sessions.get(layer_id).map(|s| s.token)
    }

    /// Live frame buffer for a layer, if playback has painted one.
    pub fn buffer(&self, layer_id: &LayerId) -> Option<&OffscreenBuffer> {
        self.sessions.get(layer_id)?.buffer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct SpyTransport {
        cancelled: Rc<Cell<bool>>,
    }

    impl SpyTransport {
        fn new() -> (Self, Rc<Cell<bool>>) {
            let flag = Rc::new(Cell::new(false));
            (
                Self {
                    cancelled: flag.clone(),
                },
                flag,
            )
        }
    }

    impl FrameTransport for SpyTransport {
        fn cancel(&mut self) {
            self.cancelled.set(true);
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.get()
        }
    }

    fn frame(w: u32, h: u32) -> AnimationFrame {
        AnimationFrame {
            width: w,
            height: h,
            rgba8_premul: vec![0; (w * h * 4) as usize],
            delay_ms: 40,
        }
    }

    fn layer(n: u64) -> LayerId {
        LayerId::from_seq(n)
    }

    #[test]
    fn second_start_cancels_first_session() {
        let mut player = OverlayPlayer::new();
        let id = layer(1);
        let (first, first_cancelled) = SpyTransport::new();
        let (second, second_cancelled) = SpyTransport::new();

        let t1 = player.start(&id, Box::new(first), None).unwrap();
        let t2 = player.start(&id, Box::new(second), None).unwrap();

        assert!(first_cancelled.get(), "prior transport observably cancelled");
        assert!(!second_cancelled.get());
        assert_eq!(player.active_count(), 1);
        assert_ne!(t1, t2);
        assert_eq!(player.token_of(&id), Some(t2));
    }

    #[test]
    fn stale_token_delivery_is_discarded() {
        let mut player = OverlayPlayer::new();
        let id = layer(1);
        let (first, _) = SpyTransport::new();
        let (second, _) = SpyTransport::new();
        let t1 = player.start(&id, Box::new(first), None).unwrap();
        let t2 = player.start(&id, Box::new(second), None).unwrap();

        assert_eq!(player.deliver(&id, t1, frame(2, 2)), FrameOutcome::Discarded);
        assert!(player.buffer(&id).is_none());
        assert!(matches!(
            player.deliver(&id, t2, frame(2, 2)),
            FrameOutcome::Painted { resized: None }
        ));
        assert_eq!(player.buffer(&id).unwrap().width, 2);
    }

    #[test]
    fn frame_size_change_reports_footprint() {
        let mut player = OverlayPlayer::new();
        let id = layer(1);
        let (transport, _) = SpyTransport::new();
        let token = player.start(&id, Box::new(transport), Some((4, 4))).unwrap();

        match player.deliver(&id, token, frame(8, 2)) {
            FrameOutcome::Painted { resized: Some(ch) } => {
                assert_eq!(ch.from, (4, 4));
                assert_eq!(ch.to, (8, 2));
            }
            other => panic!("expected resize, got {other:?}"),
        }
        let buf = player.buffer(&id).unwrap();
        assert_eq!((buf.width, buf.height), (8, 2));

        // Same-size follow-up frame does not re-report.
        assert!(matches!(
            player.deliver(&id, token, frame(8, 2)),
            FrameOutcome::Painted { resized: None }
        ));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut player = OverlayPlayer::new();
        let id = layer(1);
        let (transport, cancelled) = SpyTransport::new();
        player.start(&id, Box::new(transport), None).unwrap();

        assert!(player.stop(&id));
        assert!(cancelled.get());
        assert!(!player.stop(&id));
    }

    #[test]
    fn shutdown_cancels_everything_and_refuses_late_frames() {
        let mut player = OverlayPlayer::new();
        let a = layer(1);
        let b = layer(2);
        let (ta, ca) = SpyTransport::new();
        let (tb, cb) = SpyTransport::new();
        let token_a = player.start(&a, Box::new(ta), None).unwrap();
        player.start(&b, Box::new(tb), None).unwrap();

        player.shutdown();

        assert!(ca.get() && cb.get());
        assert_eq!(player.active_count(), 0);
        assert_eq!(
            player.deliver(&a, token_a, frame(1, 1)),
            FrameOutcome::Discarded
        );
        let (late, late_cancelled) = SpyTransport::new();
        assert!(player.start(&a, Box::new(late), None).is_err());
        assert!(late_cancelled.get(), "post-disposal start cancels transport");
    }

    #[test]
    fn clip_transport_loops_and_stops_when_cancelled() {
        let mut clip = ClipTransport::new(vec![frame(1, 1), frame(2, 2)]);
        assert_eq!(clip.poll_frame().unwrap().width, 1);
        assert_eq!(clip.poll_frame().unwrap().width, 2);
        assert_eq!(clip.poll_frame().unwrap().width, 1, "playback loops");
        clip.cancel();
        assert!(clip.is_cancelled());
        assert!(clip.poll_frame().is_none());
    }

    #[test]
    fn pump_paints_from_owned_transport() {
        let mut player = OverlayPlayer::new();
        let id = layer(1);
        let clip = ClipTransport::new(vec![frame(3, 3)]);
        player.start(&id, Box::new(clip), Some((3, 3))).unwrap();

        assert!(matches!(
            player.pump(&id),
            Some(FrameOutcome::Painted { resized: None })
        ));
        assert_eq!(player.buffer(&id).unwrap().width, 3);
        assert!(player.pump(&layer(9)).is_none());
    }
}
