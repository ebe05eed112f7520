use serde::{Deserialize, Serialize};

use crate::background::Background;
use crate::core::{LayerId, LogicalSize, Rgba8, Transform2D};
use crate::error::{SoireeError, SoireeResult};

pub const DEFAULT_TEXT_NAME: &str = "Text Layer";
pub const DEFAULT_IMAGE_NAME: &str = "Image Layer";
pub const DEFAULT_GIF_NAME: &str = "GIF Layer";
pub const DEFAULT_INVITE_TEXT: &str = "You are invited!";

/// Largest share of the logical canvas a newly placed overlay image may cover.
const OVERLAY_MAX_FRACTION: f64 = 0.6;

/// Wire-level variant tag. `gif` is kept for compatibility with documents
/// produced by earlier editors even though any frame-animated raster works.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Text,
    Image,
    Gif,
}

/// Variant payload of a layer. Common fields live on [`Layer`]; each variant
/// holds only its own data.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerKind {
    Text {
        content: String,
        font_size: f64,
        fill: Rgba8,
        /// Wrap width in logical px; `None` lays out a single line.
        max_width: Option<f64>,
    },
    StaticImage {
        source: String,
    },
    AnimatedImage {
        /// The frame-animated source, distinct from the raster snapshot used
        /// for thumbnailing and export.
        source_url: String,
        poster: Option<String>,
    },
}

impl LayerKind {
    pub fn layer_type(&self) -> LayerType {
        match self {
            Self::Text { .. } => LayerType::Text,
            Self::StaticImage { .. } => LayerType::Image,
            Self::AnimatedImage { .. } => LayerType::Gif,
        }
    }

    pub fn default_name(&self) -> &'static str {
        default_name_for(self.layer_type())
    }
}

pub fn default_name_for(layer_type: LayerType) -> &'static str {
    match layer_type {
        LayerType::Text => DEFAULT_TEXT_NAME,
        LayerType::Image => DEFAULT_IMAGE_NAME,
        LayerType::Gif => DEFAULT_GIF_NAME,
    }
}

/// One positioned visual element in paint order.
#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub selectable: bool,
    pub transform: Transform2D,
    pub kind: LayerKind,
}

/// Snapshot of one layer for list notifications: topmost layers first, with
/// `index` being the position in back-to-front paint order.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerSummary {
    pub id: LayerId,
    pub name: String,
    pub layer_type: LayerType,
    pub visible: bool,
    pub index: usize,
}

/// The root aggregate: fixed logical size, background, and ordered layers.
///
/// Layers paint back-to-front (`layers[0]` is hindmost). The logical size is
/// fixed for the scene's lifetime; [`Scene::rescaled_to`] derives a new scene
/// for a different output size.
#[derive(Clone, Debug)]
pub struct Scene {
    pub logical: LogicalSize,
    pub background_color: Rgba8,
    pub background: Option<Background>,
    /// Template art recorded at creation, for reset-to-template.
    pub template_source: Option<String>,
    pub layers: Vec<Layer>,
    pub active: Option<LayerId>,
    next_layer_seq: u64,
}

/// Direction for [`Scene::reorder`]: one step toward the front or the back of
/// the paint order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReorderDirection {
    Forward,
    Backward,
}

impl Scene {
    pub fn new(logical: LogicalSize) -> SoireeResult<Self> {
        logical.validate()?;
        Ok(Self {
            logical,
            background_color: Rgba8::WHITE,
            background: None,
            template_source: None,
            layers: Vec::new(),
            active: None,
            next_layer_seq: 1,
        })
    }

    pub(crate) fn alloc_id(&mut self) -> LayerId {
        let id = LayerId::from_seq(self.next_layer_seq);
        self.next_layer_seq += 1;
        id
    }

    /// Advance the id counter past an id read from a document, so later
    /// allocations can never collide with restored layers.
    pub(crate) fn absorb_id(&mut self, id: &LayerId) {
        if let Some(seq) = id.seq() {
            self.next_layer_seq = self.next_layer_seq.max(seq + 1);
        }
    }

    fn push_layer(&mut self, name: &str, transform: Transform2D, kind: LayerKind) -> LayerId {
        let id = self.alloc_id();
        self.layers.push(Layer {
            id: id.clone(),
            name: name.to_owned(),
            visible: true,
            selectable: true,
            transform,
            kind,
        });
        id
    }

    /// Insert a restored layer verbatim. Fails on a duplicate id so no
    /// operation can leave two layers sharing one.
    pub(crate) fn insert_restored(&mut self, layer: Layer) -> SoireeResult<()> {
        if self.find(&layer.id).is_some() {
            return Err(SoireeError::document(format!(
                "duplicate layer id '{}'",
                layer.id
            )));
        }
        self.absorb_id(&layer.id);
        self.layers.push(layer);
        Ok(())
    }

    /// Add a text layer at a fixed inset with editing defaults.
    pub fn add_text_layer(&mut self, content: Option<String>) -> LayerId {
        let kind = LayerKind::Text {
            content: content.unwrap_or_else(|| "Double-click to edit".to_owned()),
            font_size: 42.0,
            fill: Rgba8::rgb(0x22, 0x22, 0x22),
            max_width: Some(400.0),
        };
        self.push_layer(DEFAULT_TEXT_NAME, Transform2D::at(60.0, 60.0), kind)
    }

    /// Add the headline text placed proportionally for a fresh composition:
    /// 10% inset, 80% wrap width, font size 6% of the canvas width.
    pub fn add_headline_text_layer(&mut self, content: Option<String>) -> LayerId {
        let w = f64::from(self.logical.width);
        let h = f64::from(self.logical.height);
        let kind = LayerKind::Text {
            content: content.unwrap_or_else(|| DEFAULT_INVITE_TEXT.to_owned()),
            font_size: (w * 0.06).round(),
            fill: Rgba8::rgb(0x11, 0x11, 0x11),
            max_width: Some(w * 0.8),
        };
        self.push_layer(DEFAULT_TEXT_NAME, Transform2D::at(w * 0.1, h * 0.1), kind)
    }

    /// Transform that fits a raster of `natural` size within 60% of the canvas,
    /// centered. Without known dimensions, a fixed fallback placement is used.
    fn overlay_placement(&self, natural: Option<(u32, u32)>) -> Transform2D {
        let w = f64::from(self.logical.width);
        let h = f64::from(self.logical.height);
        match natural {
            Some((nw, nh)) if nw > 0 && nh > 0 => {
                let max_w = w * OVERLAY_MAX_FRACTION;
                let max_h = h * OVERLAY_MAX_FRACTION;
                let scale = (max_w / f64::from(nw)).min(max_h / f64::from(nh)).min(1.0);
                let scaled_w = f64::from(nw) * scale;
                let scaled_h = f64::from(nh) * scale;
                Transform2D::at((w - scaled_w) / 2.0, (h - scaled_h) / 2.0)
                    .with_scale(scale, scale)
            }
            _ => Transform2D::at(80.0, 120.0).with_scale(0.5, 0.5),
        }
    }

    pub fn add_image_layer(&mut self, source: String, natural: Option<(u32, u32)>) -> LayerId {
        let transform = self.overlay_placement(natural);
        self.push_layer(
            DEFAULT_IMAGE_NAME,
            transform,
            LayerKind::StaticImage { source },
        )
    }

    pub fn add_animated_layer(
        &mut self,
        source_url: String,
        poster: Option<String>,
        natural: Option<(u32, u32)>,
    ) -> LayerId {
        let transform = self.overlay_placement(natural);
        self.push_layer(
            DEFAULT_GIF_NAME,
            transform,
            LayerKind::AnimatedImage { source_url, poster },
        )
    }

    pub fn find(&self, id: &LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| &l.id == id)
    }

    pub fn find_mut(&mut self, id: &LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| &l.id == id)
    }

    fn require_mut(&mut self, id: &LayerId) -> SoireeResult<&mut Layer> {
        self.find_mut(id)
            .ok_or_else(|| SoireeError::validation(format!("unknown layer id '{id}'")))
    }

    pub fn set_transform(&mut self, id: &LayerId, transform: Transform2D) -> SoireeResult<()> {
        transform.validate()?;
        self.require_mut(id)?.transform = transform;
        Ok(())
    }

    pub fn set_visible(&mut self, id: &LayerId, visible: bool) -> SoireeResult<()> {
        self.require_mut(id)?.visible = visible;
        Ok(())
    }

    /// Rename a layer. An empty or whitespace-only name falls back to the
    /// variant default; a layer name is never stored empty.
    pub fn rename(&mut self, id: &LayerId, name: &str) -> SoireeResult<()> {
        let layer = self.require_mut(id)?;
        let trimmed = name.trim();
        layer.name = if trimmed.is_empty() {
            layer.kind.default_name().to_owned()
        } else {
            trimmed.to_owned()
        };
        Ok(())
    }

    /// Remove a layer, clearing the selection when it was the active one.
    pub fn remove(&mut self, id: &LayerId) -> SoireeResult<Layer> {
        let pos = self
            .layers
            .iter()
            .position(|l| &l.id == id)
            .ok_or_else(|| SoireeError::validation(format!("unknown layer id '{id}'")))?;
        if self.active.as_ref() == Some(id) {
            self.active = None;
        }
        Ok(self.layers.remove(pos))
    }

    /// Move a layer exactly one position in paint order. Returns `false` for
    /// the no-op at either end.
    pub fn reorder(&mut self, id: &LayerId, direction: ReorderDirection) -> SoireeResult<bool> {
        let pos = self
            .layers
            .iter()
            .position(|l| &l.id == id)
            .ok_or_else(|| SoireeError::validation(format!("unknown layer id '{id}'")))?;
        let target = match direction {
            ReorderDirection::Forward if pos + 1 < self.layers.len() => pos + 1,
            ReorderDirection::Backward if pos > 0 => pos - 1,
            _ => return Ok(false),
        };
        self.layers.swap(pos, target);
        Ok(true)
    }

    pub fn select(&mut self, id: &LayerId) -> SoireeResult<()> {
        if self.find(id).is_none() {
            return Err(SoireeError::validation(format!("unknown layer id '{id}'")));
        }
        self.active = Some(id.clone());
        Ok(())
    }

    pub fn deselect(&mut self) {
        self.active = None;
    }

    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(|l| l.id.clone()).collect()
    }

    /// Layer list for notifications, topmost first.
    pub fn summaries(&self) -> Vec<LayerSummary> {
        self.layers
            .iter()
            .enumerate()
            .map(|(index, l)| LayerSummary {
                id: l.id.clone(),
                name: l.name.clone(),
                layer_type: l.kind.layer_type(),
                visible: l.visible,
                index,
            })
            .rev()
            .collect()
    }

    /// Derive a new scene targeting a different output size. Layer transforms
    /// are rescaled per axis; identities are preserved. The original scene is
    /// untouched — logical dimensions never mutate in place.
    pub fn rescaled_to(&self, logical: LogicalSize) -> SoireeResult<Scene> {
        logical.validate()?;
        let sx = f64::from(logical.width) / f64::from(self.logical.width);
        let sy = f64::from(logical.height) / f64::from(self.logical.height);

        let mut scene = self.clone();
        scene.logical = logical;
        for layer in &mut scene.layers {
            layer.transform.translate.x *= sx;
            layer.transform.translate.y *= sy;
            layer.transform.scale.x *= sx;
            layer.transform.scale.y *= sy;
        }
        if let Some(bg) = &mut scene.background {
            bg.refit(logical);
        }
        Ok(scene)
    }

    pub fn validate(&self) -> SoireeResult<()> {
        self.logical.validate()?;
        let mut seen = std::collections::BTreeSet::new();
        for layer in &self.layers {
            if !seen.insert(&layer.id) {
                return Err(SoireeError::validation(format!(
                    "duplicate layer id '{}'",
                    layer.id
                )));
            }
            if layer.name.trim().is_empty() {
                return Err(SoireeError::validation(format!(
                    "layer '{}' has an empty name",
                    layer.id
                )));
            }
            layer.transform.validate()?;
        }
        if let Some(active) = &self.active
            && !seen.contains(active)
        {
            return Err(SoireeError::validation(
                "active layer is not part of the scene",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> Scene {
        Scene::new(LogicalSize {
            width: 1200,
            height: 1800,
        })
        .unwrap()
    }

    #[test]
    fn new_scene_is_empty_with_white_fill() {
        let s = scene();
        assert!(s.layers.is_empty());
        assert!(s.background.is_none());
        assert_eq!(s.background_color, Rgba8::WHITE);
    }

    #[test]
    fn ids_are_unique_and_stable() {
        let mut s = scene();
        let a = s.add_text_layer(None);
        let b = s.add_image_layer("a.png".into(), None);
        assert_ne!(a, b);

        s.rename(&a, "Heading").unwrap();
        s.set_visible(&a, false).unwrap();
        let layer = s.find(&a).unwrap();
        assert_eq!(layer.id, a, "rename/visibility never change identity");
        assert_eq!(layer.kind.layer_type(), LayerType::Text);
        s.validate().unwrap();
    }

    #[test]
    fn absorbed_ids_never_collide() {
        let mut s = scene();
        s.insert_restored(Layer {
            id: LayerId("layer_7".into()),
            name: DEFAULT_TEXT_NAME.into(),
            visible: true,
            selectable: true,
            transform: Transform2D::default(),
            kind: LayerKind::Text {
                content: "x".into(),
                font_size: 42.0,
                fill: Rgba8::WHITE,
                max_width: None,
            },
        })
        .unwrap();
        let fresh = s.add_text_layer(None);
        assert_eq!(fresh.as_str(), "layer_8");
    }

    #[test]
    fn restored_duplicate_id_is_rejected() {
        let mut s = scene();
        let id = s.add_text_layer(None);
        let dup = Layer {
            id: id.clone(),
            name: "dup".into(),
            visible: true,
            selectable: true,
            transform: Transform2D::default(),
            kind: LayerKind::StaticImage { source: "x".into() },
        };
        assert!(s.insert_restored(dup).is_err());
        assert_eq!(s.layers.len(), 1);
    }

    #[test]
    fn rename_empty_falls_back_to_variant_default() {
        let mut s = scene();
        let id = s.add_image_layer("a.png".into(), None);
        s.rename(&id, "   ").unwrap();
        assert_eq!(s.find(&id).unwrap().name, DEFAULT_IMAGE_NAME);
        s.rename(&id, "  Photo  ").unwrap();
        assert_eq!(s.find(&id).unwrap().name, "Photo");
    }

    #[test]
    fn overlay_placement_fits_sixty_percent_centered() {
        let mut s = scene();
        let id = s.add_image_layer("big.png".into(), Some((2400, 2400)));
        let t = s.find(&id).unwrap().transform;
        // 60% of 1200 = 720 -> scale 0.3; centered at (240, 540).
        assert!((t.scale.x - 0.3).abs() < 1e-9);
        assert!((t.translate.x - 240.0).abs() < 1e-9);
        assert!((t.translate.y - 540.0).abs() < 1e-9);
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let mut s = scene();
        let id = s.add_image_layer("small.png".into(), Some((100, 80)));
        let t = s.find(&id).unwrap().transform;
        assert_eq!(t.scale.x, 1.0);
    }

    #[test]
    fn reorder_moves_one_step_and_noops_at_ends() {
        let mut s = scene();
        let a = s.add_text_layer(None);
        let b = s.add_text_layer(None);
        let c = s.add_text_layer(None);

        assert!(!s.reorder(&c, ReorderDirection::Forward).unwrap());
        assert!(s.reorder(&a, ReorderDirection::Forward).unwrap());
        assert_eq!(s.layer_ids(), vec![b.clone(), a.clone(), c.clone()]);
        assert!(!s.reorder(&b, ReorderDirection::Backward).unwrap());
        assert!(s.reorder(&c, ReorderDirection::Backward).unwrap());
        assert_eq!(s.layer_ids(), vec![b, c, a]);
    }

    #[test]
    fn removing_active_layer_clears_selection() {
        let mut s = scene();
        let id = s.add_text_layer(None);
        s.select(&id).unwrap();
        s.remove(&id).unwrap();
        assert_eq!(s.active, None);
    }

    #[test]
    fn summaries_list_topmost_first() {
        let mut s = scene();
        let back = s.add_text_layer(None);
        let front = s.add_image_layer("a.png".into(), None);
        let list = s.summaries();
        assert_eq!(list[0].id, front);
        assert_eq!(list[0].index, 1);
        assert_eq!(list[1].id, back);
        assert_eq!(list[1].index, 0);
    }

    #[test]
    fn rescaled_scene_rederives_transforms() {
        let mut s = scene();
        let id = s.add_image_layer("a.png".into(), Some((600, 600)));
        let doubled = s
            .rescaled_to(LogicalSize {
                width: 2400,
                height: 3600,
            })
            .unwrap();

        assert_eq!(
            s.logical.width, 1200,
            "original scene dimensions are untouched"
        );
        let before = s.find(&id).unwrap().transform;
        let after = doubled.find(&id).unwrap().transform;
        assert!((after.translate.x - before.translate.x * 2.0).abs() < 1e-9);
        assert!((after.scale.y - before.scale.y * 2.0).abs() < 1e-9);
    }
}
