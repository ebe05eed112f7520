use serde::{Deserialize, Serialize};

use crate::error::{SoireeError, SoireeResult};

/// Fixed design-space canvas resolution in logical pixels.
///
/// A scene's logical size never changes in place; re-targeting a composition to
/// a different output size derives a new scene (see `Scene::rescaled_to`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalSize {
    pub width: u32,
    pub height: u32,
}

impl LogicalSize {
    pub fn new(width: u32, height: u32) -> SoireeResult<Self> {
        let size = Self { width, height };
        size.validate()?;
        Ok(size)
    }

    pub fn validate(&self) -> SoireeResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(SoireeError::validation(
                "logical width/height must be > 0",
            ));
        }
        Ok(())
    }
}

/// Opaque layer identity, unique within a scene and stable across save/load.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub(crate) String);

impl LayerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wire form for ids minted by a scene counter. Ids read back from a
    /// document are preserved verbatim whatever their shape.
    pub(crate) fn from_seq(seq: u64) -> Self {
        Self(format!("layer_{seq}"))
    }

    /// Sequence number when the id has the scene-counter wire form.
    pub(crate) fn seq(&self) -> Option<u64> {
        self.0.strip_prefix("layer_")?.parse().ok()
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Layer placement in logical-space units: position, per-axis scale, rotation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform2D {
    pub translate: kurbo::Vec2,
    pub scale: kurbo::Vec2,
    pub rotation_deg: f64,
}

impl Default for Transform2D {
    fn default() -> Self {
        Self {
            translate: kurbo::Vec2::ZERO,
            scale: kurbo::Vec2::new(1.0, 1.0),
            rotation_deg: 0.0,
        }
    }
}

impl Transform2D {
    pub fn at(x: f64, y: f64) -> Self {
        Self {
            translate: kurbo::Vec2::new(x, y),
            ..Self::default()
        }
    }

    pub fn with_scale(mut self, sx: f64, sy: f64) -> Self {
        self.scale = kurbo::Vec2::new(sx, sy);
        self
    }

    /// Affine mapping layer-local coordinates into logical canvas space.
    pub fn to_affine(&self) -> kurbo::Affine {
        kurbo::Affine::translate(self.translate)
            * kurbo::Affine::rotate(self.rotation_deg.to_radians())
            * kurbo::Affine::scale_non_uniform(self.scale.x, self.scale.y)
    }

    pub fn validate(&self) -> SoireeResult<()> {
        let vals = [
            self.translate.x,
            self.translate.y,
            self.scale.x,
            self.scale.y,
            self.rotation_deg,
        ];
        if vals.iter().any(|v| !v.is_finite()) {
            return Err(SoireeError::validation(
                "transform components must be finite",
            ));
        }
        Ok(())
    }
}

/// Straight-alpha RGBA color. Serialized as a `#rrggbb`/`#rrggbbaa` hex string
/// on the wire; deserialization also accepts an `{r,g,b,a}` object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const WHITE: Self = Self {
        r: 255,
        g: 255,
        b: 255,
        a: 255,
    };

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Premultiplied RGBA8 form used by the raster pipeline.
    pub fn to_premul(self) -> [u8; 4] {
        let af = u16::from(self.a) + 1;
        let premul = |c: u8| -> u8 { ((u16::from(c) * af) >> 8) as u8 };
        [premul(self.r), premul(self.g), premul(self.b), self.a]
    }

    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }

    pub fn parse_hex(s: &str) -> SoireeResult<Self> {
        let hex = s
            .strip_prefix('#')
            .ok_or_else(|| SoireeError::validation(format!("color '{s}' must start with '#'")))?;
        if !hex.is_ascii() {
            return Err(SoireeError::validation(format!("invalid hex color '{s}'")));
        }
        let channel = |i: usize| -> SoireeResult<u8> {
            u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| SoireeError::validation(format!("invalid hex color '{s}'")))
        };
        match hex.len() {
            3 => {
                let short = |i: usize| -> SoireeResult<u8> {
                    let d = u8::from_str_radix(&hex[i..i + 1], 16)
                        .map_err(|_| SoireeError::validation(format!("invalid hex color '{s}'")))?;
                    Ok(d * 17)
                };
                Ok(Self {
                    r: short(0)?,
                    g: short(1)?,
                    b: short(2)?,
                    a: 255,
                })
            }
            6 => Ok(Self {
                r: channel(0)?,
                g: channel(1)?,
                b: channel(2)?,
                a: 255,
            }),
            8 => Ok(Self {
                r: channel(0)?,
                g: channel(1)?,
                b: channel(2)?,
                a: channel(3)?,
            }),
            _ => Err(SoireeError::validation(format!(
                "invalid hex color '{s}' (expected #rgb, #rrggbb, or #rrggbbaa)"
            ))),
        }
    }
}

impl Serialize for Rgba8 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Rgba8 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Hex(String),
            Obj {
                r: u8,
                g: u8,
                b: u8,
                #[serde(default = "opaque")]
                a: u8,
            },
        }

        fn opaque() -> u8 {
            255
        }

        match Repr::deserialize(deserializer)? {
            Repr::Hex(s) => Rgba8::parse_hex(&s).map_err(serde::de::Error::custom),
            Repr::Obj { r, g, b, a } => Ok(Rgba8 { r, g, b, a }),
        }
    }
}

/// Known output sizes offered by the editor. Documents reference these by key
/// in `meta.sizeKey`; legacy documents without a key are matched by dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizePreset {
    pub key: &'static str,
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
}

impl SizePreset {
    pub fn logical(&self) -> LogicalSize {
        LogicalSize {
            width: self.width,
            height: self.height,
        }
    }
}

pub const SIZE_PRESETS: [SizePreset; 6] = [
    SizePreset {
        key: "a6-portrait",
        name: "A6 Portrait",
        width: 1200,
        height: 1800,
    },
    SizePreset {
        key: "a6-landscape",
        name: "A6 Landscape",
        width: 1800,
        height: 1200,
    },
    SizePreset {
        key: "square",
        name: "Square",
        width: 1600,
        height: 1600,
    },
    SizePreset {
        key: "postcard-5x7",
        name: "Postcard 5x7",
        width: 1500,
        height: 2100,
    },
    SizePreset {
        key: "story-9x16",
        name: "Story 9x16",
        width: 1080,
        height: 1920,
    },
    SizePreset {
        key: "wide-16x9",
        name: "Cinema 16x9",
        width: 1920,
        height: 1080,
    },
];

/// Per-axis slack when matching legacy documents against the preset table.
pub const SIZE_TOLERANCE_PX: u32 = 4;

pub fn preset_by_key(key: &str) -> Option<&'static SizePreset> {
    SIZE_PRESETS.iter().find(|p| p.key == key)
}

/// Best-effort dimension match for documents that predate `meta.sizeKey`.
pub fn nearest_preset(width: u32, height: u32) -> Option<&'static SizePreset> {
    SIZE_PRESETS.iter().find(|p| {
        p.width.abs_diff(width) <= SIZE_TOLERANCE_PX
            && p.height.abs_diff(height) <= SIZE_TOLERANCE_PX
    })
}
