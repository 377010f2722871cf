//! QR stamping: embed the PNG as an image XObject and draw it.
//!
//! Landscape pages auto-place the code bottom-center (`size_cm` square,
//! `margin_y_cm` above the bottom edge). Portrait pages require an explicit
//! rectangle. The image keeps its aspect ratio inside non-square targets.

use lopdf::content::Operation;
use lopdf::{dictionary, Document, Object, Stream};

use certgen_core::ports::StampError;
use certgen_core::request::QrPlacement;

use crate::geometry::{self, cm_to_pt, num, Rect};

/// Stamp `qr_png` onto `pdf` per the placement rules.
pub fn stamp(pdf: &[u8], qr_png: &[u8], placement: &QrPlacement) -> Result<Vec<u8>, StampError> {
    let mut doc = Document::load_mem(pdf).map_err(|e| StampError::invalid_pdf(e.to_string()))?;

    let pages = doc.get_pages();
    let count = pages.len();
    if placement.page_index >= count {
        return Err(StampError::PageOutOfRange {
            page: placement.page_index,
            count,
        });
    }
    let page_number = u32::try_from(placement.page_index + 1)
        .map_err(|_| StampError::engine("page index overflow"))?;
    let page_id = *pages
        .get(&page_number)
        .ok_or_else(|| StampError::engine("page lookup failed"))?;

    let media = geometry::media_box(&doc, page_id);
    let target = if media.is_landscape() {
        let side = cm_to_pt(placement.size_cm);
        let margin = cm_to_pt(placement.margin_y_cm);
        let cx = (media.x0 + media.x1) / 2.0;
        Rect::new(
            cx - side / 2.0,
            media.y0 + margin,
            cx + side / 2.0,
            media.y0 + margin + side,
        )
    } else {
        let rect = placement.rect.ok_or(StampError::PortraitRectRequired)?;
        Rect::new(rect.x0, rect.y0, rect.x1, rect.y1)
    };
    let draw = target.centered_square();

    let (width, height, rgb) = decode_to_rgb(qr_png)?;
    let image = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(width),
            "Height" => i64::from(height),
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        rgb,
    );
    let image_id = doc.add_object(Object::Stream(image));
    let name =
        geometry::add_page_resource(&mut doc, page_id, "XObject", "QrIm", Object::Reference(image_id))
            .map_err(|e| StampError::engine(e.to_string()))?;

    let ops = vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![
                num(draw.width()),
                num(0.0),
                num(0.0),
                num(draw.height()),
                num(draw.x0),
                num(draw.y0),
            ],
        ),
        Operation::new("Do", vec![Object::Name(name.into_bytes())]),
        Operation::new("Q", vec![]),
    ];
    geometry::append_operations(&mut doc, page_id, ops)
        .map_err(|e| StampError::engine(e.to_string()))?;

    tracing::debug!(
        page = placement.page_index,
        landscape = media.is_landscape(),
        "qr stamped"
    );

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| StampError::engine(e.to_string()))?;
    Ok(out)
}

/// Decode the PNG and flatten any alpha against white.
fn decode_to_rgb(png: &[u8]) -> Result<(u32, u32, Vec<u8>), StampError> {
    let decoded = image::load_from_memory(png).map_err(|e| StampError::image(e.to_string()))?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = f32::from(a) / 255.0;
        for channel in [r, g, b] {
            let value = f32::from(channel) * alpha + 255.0 * (1.0 - alpha);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            rgb.push(value.round().clamp(0.0, 255.0) as u8);
        }
    }
    Ok((width, height, rgb))
}
