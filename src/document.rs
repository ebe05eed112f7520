use serde::{Deserialize, Serialize};

use crate::background::BackgroundTag;
use crate::core::{LayerId, LogicalSize, Rgba8, Transform2D, nearest_preset};
use crate::error::{SoireeError, SoireeResult};
use crate::scene::{Layer, LayerKind, LayerType, Scene, default_name_for};

pub const DOCUMENT_VERSION: &str = "1.0";

fn default_version() -> String {
    DOCUMENT_VERSION.to_owned()
}

fn default_true() -> bool {
    true
}

fn white() -> Rgba8 {
    Rgba8::WHITE
}

/// Persisted background descriptor: the source reference and its tag. Decoded
/// pixels are runtime state and are always re-derived on load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackgroundDef {
    pub source: String,
    pub tag: BackgroundTag,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_key: Option<String>,
}

/// One persisted layer. Only identity, naming, flags, transform, and source
/// references are stored — never decoded rasters or playback state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<LayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_name: Option<String>,
    pub layer_type: LayerType,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_true")]
    pub selectable: bool,
    #[serde(default)]
    pub transform: Transform2D,
    /// Raster source for image objects; poster snapshot for gif objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// The original animated source, required for gif objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gif_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<Rgba8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<f64>,
}

/// The portable, storage-ready form of a scene. Immutable once produced; the
/// live scene is the only mutable copy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default = "default_version")]
    pub version: String,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "backgroundColor", default = "white")]
    pub background_color: Rgba8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<BackgroundDef>,
    #[serde(default)]
    pub objects: Vec<ObjectDef>,
    #[serde(default)]
    pub meta: DocumentMeta,
}

/// Result of [`restore`]: the rebuilt scene plus the background to re-apply
/// through the compositor's normal load path.
#[derive(Debug)]
pub struct Restored {
    pub scene: Scene,
    pub background: Option<BackgroundDef>,
}

impl Document {
    pub fn from_json(json: &str) -> SoireeResult<Self> {
        serde_json::from_str(json).map_err(|e| SoireeError::document(e.to_string()))
    }

    pub fn from_json_bytes(bytes: &[u8]) -> SoireeResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| SoireeError::document(e.to_string()))
    }

    pub fn to_json(&self) -> SoireeResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SoireeError::document(e.to_string()))
    }

    /// The logical size this document targets; `meta.baseWidth`/`baseHeight`
    /// win over the top-level dimensions when present.
    pub fn logical_size(&self) -> SoireeResult<LogicalSize> {
        LogicalSize::new(
            self.meta.base_width.unwrap_or(self.width),
            self.meta.base_height.unwrap_or(self.height),
        )
    }

    /// The size-preset key, matching legacy documents without `meta.sizeKey`
    /// best-effort against the known preset dimensions.
    pub fn effective_size_key(&self) -> Option<String> {
        if let Some(key) = &self.meta.size_key {
            return Some(key.clone());
        }
        let logical = self.logical_size().ok()?;
        nearest_preset(logical.width, logical.height).map(|p| p.key.to_owned())
    }
}

/// Snapshot a scene into its wire form. `size_key` is supplied by the caller
/// (the size picker), never inferred from dimensions.
pub fn snapshot(scene: &Scene, size_key: Option<&str>) -> Document {
    let objects = scene
        .layers
        .iter()
        .map(|layer| {
            let mut def = ObjectDef {
                layer_id: Some(layer.id.clone()),
                layer_name: Some(layer.name.clone()),
                layer_type: layer.kind.layer_type(),
                visible: layer.visible,
                selectable: layer.selectable,
                transform: layer.transform,
                source: None,
                gif_source: None,
                text: None,
                font_size: None,
                fill: None,
                max_width: None,
            };
            match &layer.kind {
                LayerKind::Text {
                    content,
                    font_size,
                    fill,
                    max_width,
                } => {
                    def.text = Some(content.clone());
                    def.font_size = Some(*font_size);
                    def.fill = Some(*fill);
                    def.max_width = *max_width;
                }
                LayerKind::StaticImage { source } => {
                    def.source = Some(source.clone());
                }
                LayerKind::AnimatedImage { source_url, poster } => {
                    def.gif_source = Some(source_url.clone());
                    def.source = poster.clone();
                }
            }
            def
        })
        .collect();

    Document {
        version: default_version(),
        width: scene.logical.width,
        height: scene.logical.height,
        background_color: scene.background_color,
        background: scene.background.as_ref().map(|bg| BackgroundDef {
            source: bg.source.clone(),
            tag: bg.tag,
        }),
        objects,
        meta: DocumentMeta {
            base_width: Some(scene.logical.width),
            base_height: Some(scene.logical.height),
            size_key: size_key.map(str::to_owned),
        },
    }
}

/// Rebuild a live scene from a document.
///
/// `current_template` is the template art in force at load time: a
/// `template`-tagged background re-resolves against it so template updates
/// propagate to old documents; the saved source is the fallback when no
/// current template is supplied. The call builds a complete scene or fails —
/// it never half-applies.
pub fn restore(doc: &Document, current_template: Option<&str>) -> SoireeResult<Restored> {
    let logical = doc.logical_size()?;
    let mut scene = Scene::new(logical)?;
    scene.background_color = doc.background_color;

    // Absorb every explicit id up front so fresh ids minted for legacy objects
    // can never collide with a restored one later in the list.
    for def in &doc.objects {
        if let Some(id) = &def.layer_id {
            scene.absorb_id(id);
        }
    }

    for (index, def) in doc.objects.iter().enumerate() {
        let kind = match def.layer_type {
            LayerType::Text => LayerKind::Text {
                content: def.text.clone().unwrap_or_default(),
                font_size: def.font_size.unwrap_or(42.0),
                fill: def.fill.unwrap_or(Rgba8::rgb(0x22, 0x22, 0x22)),
                max_width: def.max_width,
            },
            LayerType::Image => LayerKind::StaticImage {
                source: def.source.clone().ok_or_else(|| {
                    SoireeError::document(format!("image object #{index} is missing its source"))
                })?,
            },
            LayerType::Gif => LayerKind::AnimatedImage {
                source_url: def.gif_source.clone().ok_or_else(|| {
                    SoireeError::document(format!("gif object #{index} is missing gifSource"))
                })?,
                poster: def.source.clone(),
            },
        };

        def.transform.validate().map_err(|_| {
            SoireeError::document(format!("object #{index} has a non-finite transform"))
        })?;

        let name = def
            .layer_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| default_name_for(def.layer_type).to_owned());

        let layer = Layer {
            id: match &def.layer_id {
                Some(id) => id.clone(),
                // Legacy objects saved before ids were mandatory.
                None => scene.alloc_id(),
            },
            name,
            visible: def.visible,
            selectable: def.selectable,
            transform: def.transform,
            kind,
        };
        scene.insert_restored(layer)?;
    }

    let background = doc.background.as_ref().map(|def| {
        let source = match (def.tag, current_template) {
            (BackgroundTag::Template, Some(current)) => current.to_owned(),
            _ => def.source.clone(),
        };
        BackgroundDef {
            source,
            tag: def.tag,
        }
    });

    scene.template_source = current_template.map(str::to_owned).or_else(|| {
        doc.background
            .as_ref()
            .filter(|b| b.tag == BackgroundTag::Template)
            .map(|b| b.source.clone())
    });

    scene.validate()?;
    Ok(Restored { scene, background })
}
