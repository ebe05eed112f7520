use std::collections::{HashMap, VecDeque};

use crate::assets::{
    AssetStore, DecodedImage, LocalSources, NullAssetStore, SourceResolver, decode_animation,
    decode_image, inline_data_url, sniff_mime,
};
use crate::background::{Background, BackgroundTag};
use crate::core::{LayerId, LogicalSize, Rgba8, Transform2D};
use crate::document::{self, Document};
use crate::error::{SoireeError, SoireeResult};
use crate::export::{self, ExportOptions};
use crate::player::{
    ClipTransportProvider, FootprintChange, FrameOutcome, OverlayPlayer, SessionToken,
    TransportProvider,
};
use crate::scene::{LayerKind, LayerSummary, ReorderDirection, Scene};
use crate::viewport::{HostBox, Viewport};

/// User-facing degraded-state notices surfaced by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    BackgroundUnavailable,
    UploadFellBackLocal,
    UploadUnauthorized,
    AnimationUnavailable,
    LayerRasterUnavailable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

/// Outbound notifications, drained by the surrounding UI after each call.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    LayersChanged(Vec<LayerSummary>),
    ActiveChanged(Option<LayerId>),
    BackgroundChanged { tag: Option<BackgroundTag> },
    ViewportChanged(Viewport),
    RepaintRequested,
    Noticed(Notice),
}

/// Handle for one in-flight background load. The engine compares the ticket's
/// token against its current background epoch at completion time; a superseded
/// ticket's completion is discarded, so the later apply always wins.
#[derive(Debug)]
pub struct BackgroundTicket {
    token: u64,
    source: String,
    tag: BackgroundTag,
}

impl BackgroundTicket {
    pub fn source(&self) -> &str {
        &self.source
    }
}

#[derive(Clone, Debug)]
pub struct EditorOpts {
    pub logical: LogicalSize,
    pub background_color: Rgba8,
    /// Template art recorded at creation; `reset_background` re-applies it.
    pub template_source: Option<String>,
}

impl EditorOpts {
    pub fn new(logical: LogicalSize) -> Self {
        Self {
            logical,
            background_color: Rgba8::WHITE,
            template_source: None,
        }
    }

    pub fn with_template(mut self, source: impl Into<String>) -> Self {
        self.template_source = Some(source.into());
        self
    }
}

/// Session-oriented composition engine.
///
/// Owns the scene, the animated-overlay player, the derived viewport, and the
/// tokens guarding asynchronous completions. Everything runs on the host
/// thread; suspension points are the collaborator seams (source resolver,
/// asset store, frame transports), all cancellable. After [`Editor::dispose`]
/// every late completion is a no-op.
pub struct Editor {
    scene: Scene,
    player: OverlayPlayer,
    resolver: Box<dyn SourceResolver>,
    store: Box<dyn AssetStore>,
    transports: Box<dyn TransportProvider>,
    rasters: HashMap<LayerId, DecodedImage>,
    background_epoch: u64,
    host: HostBox,
    viewport: Viewport,
    disposed: bool,
    events: VecDeque<EngineEvent>,
}

impl Editor {
    /// Construct an editor with offline collaborators: local/data-URL sources,
    /// no asset store (uploads fall back to inline data), clip transports.
    pub fn new(opts: EditorOpts) -> SoireeResult<Self> {
        Self::with_collaborators(
            opts,
            Box::new(LocalSources::default()),
            Box::new(NullAssetStore),
            Box::new(ClipTransportProvider::new(LocalSources::default())),
        )
    }

    pub fn with_collaborators(
        opts: EditorOpts,
        resolver: Box<dyn SourceResolver>,
        store: Box<dyn AssetStore>,
        transports: Box<dyn TransportProvider>,
    ) -> SoireeResult<Self> {
        let mut scene = Scene::new(opts.logical)?;
        scene.background_color = opts.background_color;
        scene.template_source = opts.template_source;
        let host = HostBox::default();
        let viewport = Viewport::compute(opts.logical, host.available_width(opts.logical));
        Ok(Self {
            scene,
            player: OverlayPlayer::new(),
            resolver,
            store,
            transports,
            rasters: HashMap::new(),
            background_epoch: 0,
            host,
            viewport,
            disposed: false,
            events: VecDeque::new(),
        })
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Playback session registry, observable for tests and host diagnostics.
    pub fn player(&self) -> &OverlayPlayer {
        &self.player
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain(..).collect()
    }

    fn ensure_live(&self) -> SoireeResult<()> {
        if self.disposed {
            return Err(SoireeError::validation("engine has been disposed"));
        }
        Ok(())
    }

    fn push_notice(&mut self, kind: NoticeKind, message: impl Into<String>) {
        self.events.push_back(EngineEvent::Noticed(Notice {
            kind,
            message: message.into(),
        }));
    }

    fn push_layers_changed(&mut self) {
        self.events
            .push_back(EngineEvent::LayersChanged(self.scene.summaries()));
    }

    fn push_active_changed(&mut self) {
        self.events
            .push_back(EngineEvent::ActiveChanged(self.scene.active.clone()));
    }

    // ----------------------------
    // Viewport
    // ----------------------------

    /// Update host measurements and recompute the display box. Idempotent for
    /// unchanged inputs; only actual changes emit `ViewportChanged`.
    pub fn set_host(&mut self, host: HostBox) {
        self.host = host;
        self.recompute_viewport();
    }

    fn recompute_viewport(&mut self) {
        let next = Viewport::compute(
            self.scene.logical,
            self.host.available_width(self.scene.logical),
        );
        if next != self.viewport {
            self.viewport = next;
            self.events.push_back(EngineEvent::ViewportChanged(next));
        }
    }

    // ----------------------------
    // Background
    // ----------------------------

    /// Open a background load. The returned ticket must be handed back to
    /// [`Editor::finish_background`] together with the decode result.
    pub fn begin_background(
        &mut self,
        source: impl Into<String>,
        tag: BackgroundTag,
    ) -> SoireeResult<BackgroundTicket> {
        self.ensure_live()?;
        self.background_epoch += 1;
        Ok(BackgroundTicket {
            token: self.background_epoch,
            source: source.into(),
            tag,
        })
    }

    /// Deliver a background load completion.
    ///
    /// Returns `Ok(true)` when the background was applied, `Ok(false)` when
    /// the completion was stale (superseded or delivered after disposal) and
    /// discarded. A decode failure keeps any previous background untouched and
    /// surfaces a recoverable notice: with no background the solid fill shows.
    pub fn finish_background(
        &mut self,
        ticket: BackgroundTicket,
        result: SoireeResult<DecodedImage>,
    ) -> SoireeResult<bool> {
        if self.disposed {
            tracing::warn!(source = %ticket.source, "background resolved after disposal, discarding");
            return Ok(false);
        }
        if ticket.token != self.background_epoch {
            tracing::warn!(source = %ticket.source, "stale background completion, discarding");
            return Ok(false);
        }

        match result {
            Ok(image) => {
                // Cover-fit against the logical size current *now*, not at
                // call time: a document load may have resized the canvas while
                // the source was decoding.
                self.scene.background = Some(Background::new(
                    ticket.source,
                    ticket.tag,
                    self.scene.logical,
                    image,
                ));
                self.events.push_back(EngineEvent::BackgroundChanged {
                    tag: Some(ticket.tag),
                });
                self.events.push_back(EngineEvent::RepaintRequested);
                Ok(true)
            }
            Err(err) => {
                self.push_notice(
                    NoticeKind::BackgroundUnavailable,
                    format!("Unable to load that background: {err}"),
                );
                Err(err)
            }
        }
    }

    /// Resolve and apply a background in one step through the configured
    /// source resolver.
    #[tracing::instrument(skip(self))]
    pub fn apply_background(
        &mut self,
        source: &str,
        tag: BackgroundTag,
    ) -> SoireeResult<()> {
        let ticket = self.begin_background(source, tag)?;
        let decoded = self
            .resolver
            .fetch(source)
            .and_then(|bytes| decode_image(&bytes));
        self.finish_background(ticket, decoded).map(|_| ())
    }

    /// Re-apply the template background recorded at scene creation. No-op
    /// (returning `false`) when none was recorded.
    pub fn reset_background(&mut self) -> SoireeResult<bool> {
        self.ensure_live()?;
        let Some(template) = self.scene.template_source.clone() else {
            return Ok(false);
        };
        self.apply_background(&template, BackgroundTag::Template)?;
        Ok(true)
    }

    pub fn set_background_color(&mut self, color: Rgba8) {
        self.scene.background_color = color;
        self.events.push_back(EngineEvent::RepaintRequested);
    }

    /// Apply the recorded template background, if any. Failure degrades to the
    /// solid fill with a notice instead of failing the bootstrap.
    pub fn bootstrap(&mut self) -> SoireeResult<()> {
        self.ensure_live()?;
        if let Some(template) = self.scene.template_source.clone()
            && let Err(err) = self.apply_background(&template, BackgroundTag::Template)
        {
            tracing::warn!(%err, "template background unavailable, showing solid fill");
        }
        Ok(())
    }

    // ----------------------------
    // Uploads
    // ----------------------------

    /// Upload bytes to the asset store. On failure the bytes are embedded as
    /// an inline data URL so editing continues offline; the notice wording
    /// distinguishes authorization failures from transient ones.
    pub fn upload_asset(&mut self, bytes: &[u8]) -> SoireeResult<String> {
        self.ensure_live()?;
        let mime = sniff_mime(bytes);
        match self.store.upload(bytes, mime) {
            Ok(url) => Ok(url),
            Err(SoireeError::Upload {
                message,
                unauthorized,
            }) => {
                let (kind, text) = if unauthorized {
                    (
                        NoticeKind::UploadUnauthorized,
                        "Login required to upload to the server. Used a local copy instead.",
                    )
                } else {
                    (
                        NoticeKind::UploadFellBackLocal,
                        "Upload failed - used a local copy instead.",
                    )
                };
                tracing::warn!(%message, unauthorized, "upload failed, embedding inline copy");
                self.push_notice(kind, text);
                Ok(inline_data_url(bytes, mime))
            }
            Err(other) => Err(other),
        }
    }

    // ----------------------------
    // Layers
    // ----------------------------

    pub fn add_text_layer(&mut self, content: Option<String>) -> SoireeResult<LayerId> {
        self.ensure_live()?;
        let id = self.scene.add_text_layer(content);
        self.scene.select(&id)?;
        self.push_layers_changed();
        self.push_active_changed();
        Ok(id)
    }

    /// Headline text placed proportionally, for fresh compositions.
    pub fn add_headline_text_layer(&mut self, content: Option<String>) -> SoireeResult<LayerId> {
        self.ensure_live()?;
        let id = self.scene.add_headline_text_layer(content);
        self.scene.select(&id)?;
        self.push_layers_changed();
        self.push_active_changed();
        Ok(id)
    }

    pub fn add_image_layer(&mut self, source: &str) -> SoireeResult<LayerId> {
        self.ensure_live()?;
        let bytes = self.resolver.fetch(source)?;
        let image = decode_image(&bytes)?;
        let natural = (image.width, image.height);
        let id = self.scene.add_image_layer(source.to_owned(), Some(natural));
        self.rasters.insert(id.clone(), image);
        self.scene.select(&id)?;
        self.push_layers_changed();
        self.push_active_changed();
        Ok(id)
    }

    /// Add an animated layer and start its playback session. When the
    /// transport cannot be opened the layer is kept with its poster raster and
    /// a notice is surfaced.
    pub fn add_animated_layer(&mut self, source_url: &str) -> SoireeResult<LayerId> {
        self.ensure_live()?;
        let bytes = self.resolver.fetch(source_url)?;
        let frames = decode_animation(&bytes)?;
        let first = &frames[0];
        let poster =
            DecodedImage::from_rgba8_premul(first.width, first.height, first.rgba8_premul.clone())?;
        let natural = (poster.width, poster.height);

        let id = self.scene.add_animated_layer(
            source_url.to_owned(),
            Some(source_url.to_owned()),
            Some(natural),
        );
        self.rasters.insert(id.clone(), poster);
        self.scene.select(&id)?;

        match self.transports.open(source_url) {
            Ok(transport) => {
                self.player.start(&id, transport, Some(natural))?;
            }
            Err(err) => {
                self.push_notice(
                    NoticeKind::AnimationUnavailable,
                    format!("Unable to play that GIF right now: {err}"),
                );
            }
        }

        self.push_layers_changed();
        self.push_active_changed();
        Ok(id)
    }

    pub fn set_transform(&mut self, id: &LayerId, transform: Transform2D) -> SoireeResult<()> {
        self.ensure_live()?;
        self.scene.set_transform(id, transform)?;
        self.events.push_back(EngineEvent::RepaintRequested);
        Ok(())
    }

    pub fn set_visible(&mut self, id: &LayerId, visible: bool) -> SoireeResult<()> {
        self.ensure_live()?;
        self.scene.set_visible(id, visible)?;
        self.push_layers_changed();
        Ok(())
    }

    pub fn rename_layer(&mut self, id: &LayerId, name: &str) -> SoireeResult<()> {
        self.ensure_live()?;
        self.scene.rename(id, name)?;
        self.push_layers_changed();
        Ok(())
    }

    /// Remove a layer, stopping its playback session and dropping its cached
    /// raster. Clears the selection when the active layer is removed.
    pub fn remove_layer(&mut self, id: &LayerId) -> SoireeResult<()> {
        self.ensure_live()?;
        let was_active = self.scene.active.as_ref() == Some(id);
        self.scene.remove(id)?;
        self.player.stop(id);
        self.rasters.remove(id);
        self.push_layers_changed();
        if was_active {
            self.push_active_changed();
        }
        Ok(())
    }

    pub fn reorder_layer(
        &mut self,
        id: &LayerId,
        direction: ReorderDirection,
    ) -> SoireeResult<bool> {
        self.ensure_live()?;
        let moved = self.scene.reorder(id, direction)?;
        if moved {
            self.push_layers_changed();
            self.events.push_back(EngineEvent::RepaintRequested);
        }
        Ok(moved)
    }

    pub fn select_layer(&mut self, id: &LayerId) -> SoireeResult<()> {
        self.ensure_live()?;
        self.scene.select(id)?;
        self.push_active_changed();
        Ok(())
    }

    pub fn deselect(&mut self) {
        if self.scene.active.is_some() {
            self.scene.deselect();
            self.push_active_changed();
        }
    }

    pub fn layer_summaries(&self) -> Vec<LayerSummary> {
        self.scene.summaries()
    }

    // ----------------------------
    // Animation sessions
    // ----------------------------

    /// (Re)start the playback session for an animated layer from its recorded
    /// source. Any prior session for the layer is cancelled first.
    pub fn start_animation(&mut self, id: &LayerId) -> SoireeResult<SessionToken> {
        self.ensure_live()?;
        let source = match self.scene.find(id).map(|l| &l.kind) {
            Some(LayerKind::AnimatedImage { source_url, .. }) => source_url.clone(),
            Some(_) => {
                return Err(SoireeError::validation(format!(
                    "layer '{id}' is not animated"
                )));
            }
            None => {
                return Err(SoireeError::validation(format!("unknown layer id '{id}'")));
            }
        };
        let transport = self.transports.open(&source)?;
        let initial_dims = self.rasters.get(id).map(|r| (r.width, r.height));
        self.player.start(id, transport, initial_dims)
    }

    pub fn stop_animation(&mut self, id: &LayerId) -> bool {
        self.player.stop(id)
    }

    /// Deliver one pushed frame for a layer's session. Stale or post-disposal
    /// deliveries are no-ops.
    pub fn deliver_frame(
        &mut self,
        id: &LayerId,
        token: SessionToken,
        frame: crate::assets::AnimationFrame,
    ) -> FrameOutcome {
        let outcome = self.player.deliver(id, token, frame);
        self.after_frame(id, &outcome);
        outcome
    }

    /// Pull and paint the next frame from a session's own transport.
    pub fn pump_animation(&mut self, id: &LayerId) -> Option<FrameOutcome> {
        let outcome = self.player.pump(id)?;
        self.after_frame(id, &outcome);
        Some(outcome)
    }

    fn after_frame(&mut self, id: &LayerId, outcome: &FrameOutcome) {
        if let FrameOutcome::Painted { resized } = outcome {
            if let Some(change) = resized {
                self.preserve_footprint(id, *change);
            }
            self.events.push_back(EngineEvent::RepaintRequested);
        }
    }

    /// Rescale a layer after its frame dimensions changed so the on-canvas
    /// footprint stays the same.
    fn preserve_footprint(&mut self, id: &LayerId, change: FootprintChange) {
        let (fw, fh) = change.from;
        let (tw, th) = change.to;
        if fw == 0 || fh == 0 || tw == 0 || th == 0 {
            return;
        }
        if let Some(layer) = self.scene.find_mut(id) {
            layer.transform.scale.x *= f64::from(fw) / f64::from(tw);
            layer.transform.scale.y *= f64::from(fh) / f64::from(th);
        }
    }

    // ----------------------------
    // Documents
    // ----------------------------

    /// Snapshot the live scene into its portable wire form.
    pub fn save_document(&self, size_key: Option<&str>) -> Document {
        document::snapshot(&self.scene, size_key)
    }

    /// Replace the live scene with one rebuilt from a document.
    ///
    /// The restore is atomic: any contract violation fails the call and the
    /// previous scene is kept. Missing layer rasters or an unreachable
    /// background degrade with notices instead of failing. Animated layers
    /// with a source get fresh playback sessions.
    #[tracing::instrument(skip(self, doc))]
    pub fn load_document(
        &mut self,
        doc: &Document,
        current_template: Option<&str>,
    ) -> SoireeResult<()> {
        self.ensure_live()?;
        let restored = document::restore(doc, current_template)?;

        // Point of no return: the new scene is valid, swap it in.
        let mut scene = restored.scene;
        if scene.template_source.is_none() {
            scene.template_source = self.scene.template_source.clone();
        }
        self.player.stop_all();
        self.rasters.clear();
        self.background_epoch += 1;
        self.scene = scene;
        self.recompute_viewport();

        for (id, kind) in self
            .scene
            .layers
            .iter()
            .map(|l| (l.id.clone(), l.kind.clone()))
            .collect::<Vec<_>>()
        {
            let raster_source = match &kind {
                LayerKind::StaticImage { source } => Some(source.clone()),
                LayerKind::AnimatedImage { poster, .. } => poster.clone(),
                LayerKind::Text { .. } => None,
            };
            if let Some(source) = raster_source {
                match self
                    .resolver
                    .fetch(&source)
                    .and_then(|bytes| decode_image(&bytes))
                {
                    Ok(image) => {
                        self.rasters.insert(id.clone(), image);
                    }
                    Err(err) => {
                        tracing::warn!(layer = %id, %err, "layer raster unavailable after load");
                        self.push_notice(
                            NoticeKind::LayerRasterUnavailable,
                            format!("Unable to load the image for layer '{id}'."),
                        );
                    }
                }
            }
            if matches!(kind, LayerKind::AnimatedImage { .. })
                && let Err(err) = self.start_animation(&id)
            {
                self.push_notice(
                    NoticeKind::AnimationUnavailable,
                    format!("Unable to resume the animation for layer '{id}': {err}"),
                );
            }
        }

        match restored.background {
            Some(def) => {
                if let Err(err) = self.apply_background(&def.source, def.tag) {
                    tracing::warn!(%err, "document background unavailable, showing solid fill");
                }
            }
            None => {
                self.scene.background = None;
                self.events
                    .push_back(EngineEvent::BackgroundChanged { tag: None });
            }
        }

        self.push_layers_changed();
        self.push_active_changed();
        self.events.push_back(EngineEvent::RepaintRequested);
        Ok(())
    }

    /// Parse and load a document from JSON bytes.
    pub fn load_document_json(
        &mut self,
        json: &[u8],
        current_template: Option<&str>,
    ) -> SoireeResult<()> {
        let doc = Document::from_json_bytes(json)?;
        self.load_document(&doc, current_template)
    }

    // ----------------------------
    // Export & teardown
    // ----------------------------

    /// Flatten the scene to encoded bytes at the logical resolution,
    /// independent of the current display scale.
    pub fn export_raster(&self, opts: &ExportOptions) -> SoireeResult<Vec<u8>> {
        export::render_scene(&self.scene, &self.rasters, Some(&self.player), opts)
    }

    /// Tear the engine down: every playback session is cancelled before the
    /// canvas goes away and all in-flight completions become no-ops.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.player.shutdown();
        self.background_epoch += 1;
        self.disposed = true;
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AnimationFrame;
    use crate::player::FrameTransport;
    use std::cell::Cell;
    use std::rc::Rc;

    fn logical() -> LogicalSize {
        LogicalSize {
            width: 1200,
            height: 1800,
        }
    }

    fn red_png() -> Vec<u8> {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD
            .decode("iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8DwHwAFBQIAX8jx0gAAAABJRU5ErkJggg==")
            .unwrap()
    }

    struct SpyTransport {
        cancelled: Rc<Cell<bool>>,
    }

    impl FrameTransport for SpyTransport {
        fn cancel(&mut self) {
            self.cancelled.set(true);
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.get()
        }
    }

    /// Transport provider handing out spy transports and recording their
    /// cancellation flags.
    #[derive(Default)]
    struct SpyProvider {
        opened: Rc<std::cell::RefCell<Vec<Rc<Cell<bool>>>>>,
    }

    impl TransportProvider for SpyProvider {
        fn open(&mut self, _source: &str) -> SoireeResult<Box<dyn FrameTransport>> {
            let flag = Rc::new(Cell::new(false));
            self.opened.borrow_mut().push(flag.clone());
            Ok(Box::new(SpyTransport { cancelled: flag }))
        }
    }

    struct MapResolver(HashMap<String, Vec<u8>>);

    impl SourceResolver for MapResolver {
        fn fetch(&mut self, source: &str) -> SoireeResult<Vec<u8>> {
            self.0
                .get(source)
                .cloned()
                .ok_or_else(|| SoireeError::load(format!("unknown source '{source}'")))
        }
    }

    fn editor_with(
        sources: &[(&str, Vec<u8>)],
        template: Option<&str>,
    ) -> (Editor, Rc<std::cell::RefCell<Vec<Rc<Cell<bool>>>>>) {
        let provider = SpyProvider::default();
        let opened = provider.opened.clone();
        let mut opts = EditorOpts::new(logical());
        if let Some(t) = template {
            opts = opts.with_template(t);
        }
        let editor = Editor::with_collaborators(
            opts,
            Box::new(MapResolver(
                sources
                    .iter()
                    .map(|(k, v)| ((*k).to_owned(), v.clone()))
                    .collect(),
            )),
            Box::new(NullAssetStore),
            Box::new(provider),
        )
        .unwrap();
        (editor, opened)
    }

    fn gif_bytes() -> Vec<u8> {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD
            .decode("R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7")
            .unwrap()
    }

    #[test]
    fn fresh_scene_is_solid_white_with_zero_layers() {
        let (editor, _) = editor_with(&[], None);
        assert_eq!(editor.scene().layers.len(), 0);
        assert!(editor.scene().background.is_none());
        assert_eq!(editor.scene().background_color, Rgba8::WHITE);
    }

    #[test]
    fn later_background_wins_over_earlier_inflight_load() {
        let (mut editor, _) = editor_with(&[], None);
        let ticket_a = editor
            .begin_background("a.png", BackgroundTag::Custom)
            .unwrap();
        let ticket_b = editor
            .begin_background("b.png", BackgroundTag::Custom)
            .unwrap();

        // B resolves first, then A's late completion must be discarded.
        let applied_b = editor
            .finish_background(
                ticket_b,
                Ok(DecodedImage::from_rgba8_premul(1, 1, vec![0, 0, 255, 255]).unwrap()),
            )
            .unwrap();
        assert!(applied_b);
        let applied_a = editor
            .finish_background(
                ticket_a,
                Ok(DecodedImage::from_rgba8_premul(1, 1, vec![255, 0, 0, 255]).unwrap()),
            )
            .unwrap();
        assert!(!applied_a, "stale completion discarded");
        assert_eq!(editor.scene().background.as_ref().unwrap().source, "b.png");
    }

    #[test]
    fn failed_background_keeps_previous_one() {
        let (mut editor, _) = editor_with(&[("bg.png", red_png())], None);
        editor
            .apply_background("bg.png", BackgroundTag::Custom)
            .unwrap();

        let err = editor.apply_background("missing.png", BackgroundTag::Custom);
        assert!(err.is_err());
        let bg = editor.scene().background.as_ref().unwrap();
        assert_eq!(bg.source, "bg.png", "working background left untouched");

        let notices: Vec<_> = editor
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::Noticed(_)))
            .collect();
        assert!(!notices.is_empty(), "failure surfaced a notice");
    }

    #[test]
    fn custom_then_reset_restores_template_background() {
        let (mut editor, _) = editor_with(
            &[("template.png", red_png()), ("custom.png", red_png())],
            Some("template.png"),
        );
        editor.bootstrap().unwrap();
        assert_eq!(
            editor.scene().background.as_ref().unwrap().tag,
            BackgroundTag::Template
        );

        editor
            .apply_background("custom.png", BackgroundTag::Custom)
            .unwrap();
        assert_eq!(
            editor.scene().background.as_ref().unwrap().tag,
            BackgroundTag::Custom
        );

        assert!(editor.reset_background().unwrap());
        let bg = editor.scene().background.as_ref().unwrap();
        assert_eq!(bg.tag, BackgroundTag::Template);
        assert_eq!(bg.source, "template.png");
    }

    #[test]
    fn reset_background_is_noop_without_template() {
        let (mut editor, _) = editor_with(&[], None);
        assert!(!editor.reset_background().unwrap());
    }

    #[test]
    fn upload_failure_falls_back_to_inline_data() {
        let (mut editor, _) = editor_with(&[], None);
        let url = editor.upload_asset(&red_png()).unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        let notices: Vec<_> = editor
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Noticed(n) => Some(n.kind),
                _ => None,
            })
            .collect();
        assert_eq!(notices, vec![NoticeKind::UploadFellBackLocal]);
    }

    #[test]
    fn unauthorized_upload_gets_distinct_notice() {
        struct AuthFailingStore;
        impl AssetStore for AuthFailingStore {
            fn upload(&mut self, _bytes: &[u8], _mime: &str) -> SoireeResult<String> {
                Err(SoireeError::upload_unauthorized("401"))
            }
        }

        let mut editor = Editor::with_collaborators(
            EditorOpts::new(logical()),
            Box::new(LocalSources::default()),
            Box::new(AuthFailingStore),
            Box::new(SpyProvider::default()),
        )
        .unwrap();
        editor.upload_asset(&red_png()).unwrap();
        let kinds: Vec<_> = editor
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Noticed(n) => Some(n.kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![NoticeKind::UploadUnauthorized]);
    }

    #[test]
    fn dispose_with_running_animation_leaves_zero_sessions() {
        let (mut editor, opened) = editor_with(&[("clip.gif", gif_bytes())], None);
        editor.add_animated_layer("clip.gif").unwrap();
        assert_eq!(editor.player().active_count(), 1);

        // stop_animation is deliberately not called.
        editor.dispose();
        assert_eq!(editor.player().active_count(), 0);
        assert!(opened.borrow().iter().all(|flag| flag.get()));
    }

    #[test]
    fn removing_animated_layer_stops_its_session() {
        let (mut editor, opened) = editor_with(&[("clip.gif", gif_bytes())], None);
        let id = editor.add_animated_layer("clip.gif").unwrap();
        editor.remove_layer(&id).unwrap();
        assert_eq!(editor.player().active_count(), 0);
        assert!(opened.borrow()[0].get());
        assert_eq!(editor.scene().active, None, "selection cleared on delete");
    }

    #[test]
    fn restarting_animation_supersedes_prior_session() {
        let (mut editor, opened) = editor_with(&[("clip.gif", gif_bytes())], None);
        let id = editor.add_animated_layer("clip.gif").unwrap();
        let second = editor.start_animation(&id).unwrap();

        assert_eq!(editor.player().active_count(), 1);
        assert_eq!(editor.player().token_of(&id), Some(second));
        let flags = opened.borrow();
        assert!(flags[0].get(), "first transport cancelled");
        assert!(!flags[1].get());
    }

    #[test]
    fn frame_resize_preserves_visual_footprint() {
        let (mut editor, _) = editor_with(&[("clip.gif", gif_bytes())], None);
        let id = editor.add_animated_layer("clip.gif").unwrap();
        let token = editor.player().token_of(&id).unwrap();
        let before = editor.scene().find(&id).unwrap().transform.scale;

        // Poster is 1x1; deliver a 2x1 frame.
        let outcome = editor.deliver_frame(
            &id,
            token,
            AnimationFrame {
                width: 2,
                height: 1,
                rgba8_premul: vec![0; 8],
                delay_ms: 40,
            },
        );
        assert!(matches!(outcome, FrameOutcome::Painted { resized: Some(_) }));
        let after = editor.scene().find(&id).unwrap().transform.scale;
        assert!((after.x - before.x * 0.5).abs() < 1e-9);
        assert!((after.y - before.y).abs() < 1e-9);
    }

    #[test]
    fn load_failure_keeps_previous_scene() {
        let (mut editor, _) = editor_with(&[], None);
        editor.add_text_layer(Some("Keep me".into())).unwrap();

        let bad = br#"{ "width": 1200, "height": 1800, "objects": [ { "layerType": "gif" } ] }"#;
        assert!(editor.load_document_json(bad, None).is_err());
        assert_eq!(editor.scene().layers.len(), 1, "previous scene untouched");

        assert!(editor.load_document_json(b"{ nope", None).is_err());
        assert_eq!(editor.scene().layers.len(), 1);
    }

    #[test]
    fn document_roundtrip_through_engine() {
        let (mut editor, _) = editor_with(&[("clip.gif", gif_bytes())], None);
        editor.add_text_layer(Some("Party!".into())).unwrap();
        editor.add_animated_layer("clip.gif").unwrap();
        let doc = editor.save_document(Some("a6-portrait"));

        let (mut fresh, _) = editor_with(&[("clip.gif", gif_bytes())], None);
        fresh.load_document(&doc, None).unwrap();

        assert_eq!(fresh.scene().layer_ids(), editor.scene().layer_ids());
        assert_eq!(
            fresh.player().active_count(),
            1,
            "animated session restarted on load"
        );
    }

    #[test]
    fn load_resizes_canvas_and_viewport() {
        let (mut editor, _) = editor_with(&[], None);
        editor.set_host(HostBox {
            container_width: Some(900.0),
            ..HostBox::default()
        });
        editor.drain_events();

        let doc = Document::from_json(
            r#"{ "width": 1080, "height": 1920, "objects": [],
                 "meta": { "baseWidth": 1080, "baseHeight": 1920, "sizeKey": "story-9x16" } }"#,
        )
        .unwrap();
        editor.load_document(&doc, None).unwrap();
        assert_eq!(editor.scene().logical.width, 1080);
        assert_eq!(editor.viewport().display_width, 900);
    }

    #[test]
    fn disposed_engine_refuses_mutations() {
        let (mut editor, _) = editor_with(&[], None);
        editor.dispose();
        assert!(editor.add_text_layer(None).is_err());
        assert!(editor.begin_background("x.png", BackgroundTag::Custom).is_err());
        assert!(editor.load_document_json(b"{}", None).is_err());
    }
}
