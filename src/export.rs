use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use crate::assets::DecodedImage;
use crate::core::{LayerId, Rgba8};
use crate::error::{SoireeError, SoireeResult};
use crate::player::OverlayPlayer;
use crate::scene::{LayerKind, Scene};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
    Jpeg { quality: u8 },
}

/// Options for [`render_scene`]. Text layers need font bytes supplied by the
/// caller; a text layer with no font available is skipped with a warning
/// rather than failing the whole export.
#[derive(Clone, Debug, Default)]
pub struct ExportOptions {
    pub format: Option<ExportFormat>,
    pub font_bytes: Option<Vec<u8>>,
}

/// Flattened frame at the scene's logical resolution, premultiplied RGBA8.
#[derive(Clone, Debug)]
pub struct FrameRgba {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// The caller-supplied font a whole export shares: the first family in the
/// font bytes, resolved once, with shaping contexts reused across every text
/// layer in the scene.
struct SceneFont {
    fonts: parley::FontContext,
    layouts: parley::LayoutContext<Rgba8>,
    family: String,
    data: vello_cpu::peniko::FontData,
}

impl SceneFont {
    fn load(bytes: &[u8]) -> SoireeResult<Self> {
        let mut fonts = parley::FontContext::default();
        let registered = fonts
            .collection
            .register_fonts(parley::fontique::Blob::from(bytes.to_vec()), None);
        let family = registered
            .first()
            .and_then(|(id, _)| fonts.collection.family_name(*id))
            .map(str::to_owned)
            .ok_or_else(|| SoireeError::load("font bytes contain no usable family"))?;
        Ok(Self {
            fonts,
            layouts: parley::LayoutContext::new(),
            family,
            data: vello_cpu::peniko::FontData::new(
                vello_cpu::peniko::Blob::from(bytes.to_vec()),
                0,
            ),
        })
    }
}

/// Shape one text layer against the scene font and draw its glyph runs. The
/// layer's fill travels through the layout as the brush, so styled runs keep
/// their color without a side table.
fn draw_text(
    ctx: &mut vello_cpu::RenderContext,
    font: &mut SceneFont,
    content: &str,
    font_size: f64,
    fill: Rgba8,
    max_width: Option<f64>,
    transform: kurbo::Affine,
) -> SoireeResult<()> {
    let size_px = font_size as f32;
    if !size_px.is_finite() || size_px <= 0.0 {
        return Err(SoireeError::validation(
            "text layer font size must be finite and > 0",
        ));
    }

    let mut builder = font.layouts.ranged_builder(&mut font.fonts, content, 1.0, true);
    builder.push_default(parley::style::StyleProperty::FontStack(
        parley::style::FontStack::Single(parley::style::FontFamily::Named(
            std::borrow::Cow::Owned(font.family.clone()),
        )),
    ));
    builder.push_default(parley::style::StyleProperty::FontSize(size_px));
    builder.push_default(parley::style::StyleProperty::Brush(fill));
    let mut layout: parley::Layout<Rgba8> = builder.build(content);

    let wrap = max_width.map(|w| w as f32);
    layout.break_all_lines(wrap);
    if let Some(w) = wrap {
        layout.align(
            Some(w),
            parley::Alignment::Start,
            parley::AlignmentOptions::default(),
        );
    }

    ctx.set_transform(affine_to_cpu(transform));
    for line in layout.lines() {
        for item in line.items() {
            let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                continue;
            };
            let brush = run.style().brush;
            ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                brush.r, brush.g, brush.b, brush.a,
            ));
            let glyphs = run.glyphs().map(|g| vello_cpu::Glyph {
                id: g.id,
                x: g.x,
                y: g.y,
            });
            ctx.glyph_run(&font.data)
                .font_size(run.run().font_size())
                .fill_glyphs(glyphs);
        }
    }
    Ok(())
}

fn affine_to_cpu(a: kurbo::Affine) -> vello_cpu::kurbo::Affine {
    vello_cpu::kurbo::Affine::new(a.as_coeffs())
}

fn pixmap_from_premul_bytes(
    rgba8_premul: &[u8],
    width: u32,
    height: u32,
) -> SoireeResult<vello_cpu::Pixmap> {
    let w: u16 = width
        .try_into()
        .map_err(|_| SoireeError::validation("image width exceeds u16"))?;
    let h: u16 = height
        .try_into()
        .map_err(|_| SoireeError::validation("image height exceeds u16"))?;
    if rgba8_premul.len() != width as usize * height as usize * 4 {
        return Err(SoireeError::validation("image byte length mismatch"));
    }

    let mut may_have_opacities = false;
    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for px in rgba8_premul.chunks_exact(4) {
        let a = px[3];
        may_have_opacities |= a != 255;
        pixels.push(vello_cpu::peniko::color::PremulRgba8 {
            r: px[0],
            g: px[1],
            b: px[2],
            a,
        });
    }

    Ok(vello_cpu::Pixmap::from_parts_with_opacity(
        pixels,
        w,
        h,
        may_have_opacities,
    ))
}

fn image_paint(rgba8_premul: &[u8], width: u32, height: u32) -> SoireeResult<vello_cpu::Image> {
    Ok(vello_cpu::Image {
        image: vello_cpu::ImageSource::Pixmap(Arc::new(pixmap_from_premul_bytes(
            rgba8_premul,
            width,
            height,
        )?)),
        sampler: vello_cpu::peniko::ImageSampler::default(),
    })
}

fn draw_raster(
    ctx: &mut vello_cpu::RenderContext,
    rgba8_premul: &[u8],
    width: u32,
    height: u32,
    transform: kurbo::Affine,
) -> SoireeResult<()> {
    let paint = image_paint(rgba8_premul, width, height)?;
    ctx.set_transform(affine_to_cpu(transform));
    ctx.set_paint(paint);
    ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
        0.0,
        0.0,
        f64::from(width),
        f64::from(height),
    ));
    Ok(())
}

/// Flatten the scene at its logical resolution: background color, cover-fit
/// background image, then every visible layer in paint order. Animated layers
/// draw their live frame buffer when one exists, falling back to the poster
/// raster. Output is independent of the current display scale.
pub fn flatten_scene(
    scene: &Scene,
    rasters: &HashMap<LayerId, DecodedImage>,
    player: Option<&OverlayPlayer>,
    font_bytes: Option<&[u8]>,
) -> SoireeResult<FrameRgba> {
    let width_u16: u16 = scene
        .logical
        .width
        .try_into()
        .map_err(|_| SoireeError::validation("logical width exceeds u16"))?;
    let height_u16: u16 = scene
        .logical
        .height
        .try_into()
        .map_err(|_| SoireeError::validation("logical height exceeds u16"))?;

    let mut ctx = vello_cpu::RenderContext::new(width_u16, height_u16);
    let full = vello_cpu::kurbo::Rect::new(
        0.0,
        0.0,
        f64::from(scene.logical.width),
        f64::from(scene.logical.height),
    );

    let bg = scene.background_color;
    ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
    ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(bg.r, bg.g, bg.b, bg.a));
    ctx.fill_rect(&full);

    if let Some(background) = &scene.background {
        let fit = background.placement;
        let transform = kurbo::Affine::translate((fit.offset_x, fit.offset_y))
            * kurbo::Affine::scale(fit.scale);
        draw_raster(
            &mut ctx,
            &background.image.rgba8_premul,
            background.image.width,
            background.image.height,
            transform,
        )?;
    }

    let has_text = scene
        .layers
        .iter()
        .any(|l| l.visible && matches!(l.kind, LayerKind::Text { .. }));
    let mut scene_font = match font_bytes {
        Some(bytes) if has_text => Some(SceneFont::load(bytes)?),
        _ => None,
    };

    for layer in &scene.layers {
        if !layer.visible {
            continue;
        }
        let transform = layer.transform.to_affine();
        match &layer.kind {
            LayerKind::Text {
                content,
                font_size,
                fill,
                max_width,
            } => {
                let Some(font) = scene_font.as_mut() else {
                    tracing::warn!(layer = %layer.id, "no font available, skipping text layer");
                    continue;
                };
                draw_text(
                    &mut ctx,
                    font,
                    content,
                    *font_size,
                    *fill,
                    *max_width,
                    transform,
                )?;
            }
            LayerKind::StaticImage { .. } => {
                let Some(raster) = rasters.get(&layer.id) else {
                    tracing::warn!(layer = %layer.id, "no decoded raster, skipping image layer");
                    continue;
                };
                draw_raster(
                    &mut ctx,
                    &raster.rgba8_premul,
                    raster.width,
                    raster.height,
                    transform,
                )?;
            }
            LayerKind::AnimatedImage { .. } => {
                let live = player.and_then(|p| p.buffer(&layer.id));
                if let Some(buffer) = live {
                    draw_raster(
                        &mut ctx,
                        &buffer.rgba8_premul,
                        buffer.width,
                        buffer.height,
                        transform,
                    )?;
                } else if let Some(poster) = rasters.get(&layer.id) {
                    draw_raster(
                        &mut ctx,
                        &poster.rgba8_premul,
                        poster.width,
                        poster.height,
                        transform,
                    )?;
                } else {
                    tracing::warn!(layer = %layer.id, "no frame or poster, skipping animated layer");
                }
            }
        }
    }

    let mut pixmap = vello_cpu::Pixmap::new(width_u16, height_u16);
    ctx.flush();
    ctx.render_to_pixmap(&mut pixmap);

    Ok(FrameRgba {
        width: scene.logical.width,
        height: scene.logical.height,
        data: pixmap.data_as_u8_slice().to_vec(),
    })
}

fn unpremultiply(data: &mut [u8]) {
    for px in data.chunks_exact_mut(4) {
        let a = px[3];
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
        } else if a != 255 {
            for c in px.iter_mut().take(3) {
                *c = ((u16::from(*c) * 255 + u16::from(a) / 2) / u16::from(a)).min(255) as u8;
            }
        }
    }
}

/// Encode a flattened frame as PNG or JPEG bytes.
pub fn encode_frame(frame: FrameRgba, format: ExportFormat) -> SoireeResult<Vec<u8>> {
    let FrameRgba {
        width,
        height,
        mut data,
    } = frame;
    unpremultiply(&mut data);
    let rgba = image::RgbaImage::from_raw(width, height, data)
        .ok_or_else(|| SoireeError::validation("flattened frame byte length mismatch"))?;

    let mut out = Vec::new();
    match format {
        ExportFormat::Png => {
            rgba.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
                .map_err(|e| SoireeError::load(format!("png encode failed: {e}")))?;
        }
        ExportFormat::Jpeg { quality } => {
            let rgb = image::DynamicImage::ImageRgba8(rgba).to_rgb8();
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                &mut Cursor::new(&mut out),
                quality.clamp(1, 100),
            );
            encoder
                .encode_image(&rgb)
                .map_err(|e| SoireeError::load(format!("jpeg encode failed: {e}")))?;
        }
    }
    Ok(out)
}

/// Flatten and encode in one step.
pub fn render_scene(
    scene: &Scene,
    rasters: &HashMap<LayerId, DecodedImage>,
    player: Option<&OverlayPlayer>,
    opts: &ExportOptions,
) -> SoireeResult<Vec<u8>> {
    scene.logical.validate()?;
    let frame = flatten_scene(scene, rasters, player, opts.font_bytes.as_deref())?;
    encode_frame(frame, opts.format.unwrap_or(ExportFormat::Png))
}
