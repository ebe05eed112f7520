//! Soiree is a layered invitation composition engine.
//!
//! A scene is a fixed-logical-resolution canvas holding a cover-fit background
//! and an ordered set of text / static-image / animated-image layers. The
//! public API is session-oriented:
//!
//! - Create an [`Editor`] for a logical size (optionally with template art)
//! - Mutate the layer model; drain [`EngineEvent`]s for the surrounding UI
//! - Save/load portable JSON [`Document`]s that reproduce the scene exactly
//! - Export a flattened raster at the logical resolution
#![forbid(unsafe_code)]

pub mod assets;
pub mod background;
pub mod core;
pub mod document;
pub mod engine;
pub mod error;
pub mod export;
pub mod player;
pub mod scene;
pub mod viewport;

pub use crate::assets::{AssetStore, DecodedImage, LocalSources, SourceResolver};
pub use crate::background::{Background, BackgroundTag, CoverFit, cover_fit};
pub use crate::core::{LayerId, LogicalSize, Rgba8, SIZE_PRESETS, SizePreset, Transform2D};
pub use crate::document::Document;
pub use crate::engine::{
    BackgroundTicket, Editor, EditorOpts, EngineEvent, Notice, NoticeKind,
};
pub use crate::error::{SoireeError, SoireeResult};
pub use crate::export::{ExportFormat, ExportOptions};
pub use crate::player::{
    ClipTransport, FrameOutcome, FrameTransport, OverlayPlayer, SessionToken, TransportProvider,
};
pub use crate::scene::{Layer, LayerKind, LayerSummary, LayerType, ReorderDirection, Scene};
pub use crate::viewport::{HostBox, Viewport};
