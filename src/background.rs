use serde::{Deserialize, Serialize};

use crate::assets::DecodedImage;
use crate::core::LogicalSize;

/// Whether the background is the template's own art or a user replacement.
/// The tag drives the "reset to template" affordance in the surrounding UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundTag {
    Template,
    Custom,
}

/// Cover-fit placement of a source image inside the logical canvas: the image
/// is scaled by `max(targetW/srcW, targetH/srcH)` and centered, cropping any
/// overflow.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoverFit {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

pub fn cover_fit(target: LogicalSize, src_width: u32, src_height: u32) -> CoverFit {
    let tw = f64::from(target.width);
    let th = f64::from(target.height);
    let sw = f64::from(src_width.max(1));
    let sh = f64::from(src_height.max(1));
    let scale = (tw / sw).max(th / sh);
    CoverFit {
        scale,
        offset_x: (tw - sw * scale) / 2.0,
        offset_y: (th - sh * scale) / 2.0,
    }
}

/// The active scene background. Not selectable and not a layer; exactly one is
/// active at a time and replacement is atomic.
#[derive(Clone, Debug)]
pub struct Background {
    pub source: String,
    pub tag: BackgroundTag,
    pub placement: CoverFit,
    pub image: DecodedImage,
}

impl Background {
    pub fn new(source: String, tag: BackgroundTag, target: LogicalSize, image: DecodedImage) -> Self {
        let placement = cover_fit(target, image.width, image.height);
        Self {
            source,
            tag,
            placement,
            image,
        }
    }

    /// Re-derive the placement for a new logical size, e.g. after a document
    /// load resized the canvas.
    pub fn refit(&mut self, target: LogicalSize) {
        self.placement = cover_fit(target, self.image.width, self.image.height);
    }
}
