//! QR rendering for the pairing flow.
//!
//! The pairing artifact is an opaque string; these helpers turn it into
//! something a human can scan.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use qrcode::{
    render::{svg, unicode},
    QrCode,
};
use thiserror::Error;

/// Edge length of the rendered pairing image, in pixels.
pub const PAIRING_IMAGE_SIZE: u32 = 300;

/// QR code errors.
#[derive(Debug, Clone, Error)]
pub enum QrError {
    #[error("QR generation failed: {0}")]
    GenerationFailed(String),
}

fn encode(data: &str) -> Result<QrCode, QrError> {
    QrCode::new(data.as_bytes()).map_err(|e| QrError::GenerationFailed(e.to_string()))
}

/// Render the pairing artifact as an SVG data URL for browsers.
pub fn render_pairing_image(data: &str) -> Result<String, QrError> {
    let image = encode(data)?
        .render::<svg::Color>()
        .min_dimensions(PAIRING_IMAGE_SIZE, PAIRING_IMAGE_SIZE)
        .quiet_zone(true)
        .build();

    Ok(format!(
        "data:image/svg+xml;base64,{}",
        STANDARD.encode(image.as_bytes())
    ))
}

/// Render QR code as unicode blocks for terminal display.
pub fn render_qr_ascii(data: &str) -> Result<String, QrError> {
    let image = encode(data)?
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build();

    Ok(image)
}
