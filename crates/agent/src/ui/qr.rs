//! QR codes for the share URL, so a phone on the same network can open the
//! file server by scanning the terminal or a saved PNG.

use std::path::Path;

use image::{ImageBuffer, Luma};
use qrcode::{Color, QrCode};

/// QR code module size in pixels for PNG output.
const PNG_MODULE_SIZE: u32 = 8;

/// Quiet zone (border) size in modules.
const QUIET_ZONE: usize = 4;

/// Renders `text` as a QR code using Unicode half blocks, two module rows
/// per terminal line.
pub fn generate_terminal_qr(text: &str) -> anyhow::Result<String> {
    let code = QrCode::new(text.as_bytes())?;
    let modules = code.to_colors();
    let width = code.width();
    let height = modules.len() / width;
    let dark = |row: usize, col: usize| row < height && modules[row * width + col] == Color::Dark;

    let full_width = width + 2 * QUIET_ZONE;
    let margin = " ".repeat(QUIET_ZONE);
    let mut output = String::new();

    for _ in 0..QUIET_ZONE / 2 {
        output.push_str(&" ".repeat(full_width));
        output.push('\n');
    }

    for row in (0..height).step_by(2) {
        output.push_str(&margin);
        for col in 0..width {
            let ch = match (dark(row, col), dark(row + 1, col)) {
                (true, true) => '\u{2588}',
                (true, false) => '\u{2580}',
                (false, true) => '\u{2584}',
                (false, false) => ' ',
            };
            output.push(ch);
        }
        output.push_str(&margin);
        output.push('\n');
    }

    for _ in 0..QUIET_ZONE / 2 {
        output.push_str(&" ".repeat(full_width));
        output.push('\n');
    }

    Ok(output)
}

fn render_png(text: &str) -> anyhow::Result<ImageBuffer<Luma<u8>, Vec<u8>>> {
    let code = QrCode::new(text.as_bytes())?;
    let modules = code.to_colors();
    let qr_width = code.width();

    let quiet_zone_pixels = QUIET_ZONE as u32 * PNG_MODULE_SIZE;
    let image_size = qr_width as u32 * PNG_MODULE_SIZE + 2 * quiet_zone_pixels;

    let mut img = ImageBuffer::from_pixel(image_size, image_size, Luma([255u8]));

    for (idx, color) in modules.iter().enumerate() {
        if *color != Color::Dark {
            continue;
        }
        let row = (idx / qr_width) as u32;
        let col = (idx % qr_width) as u32;
        let x_start = quiet_zone_pixels + col * PNG_MODULE_SIZE;
        let y_start = quiet_zone_pixels + row * PNG_MODULE_SIZE;

        for dy in 0..PNG_MODULE_SIZE {
            for dx in 0..PNG_MODULE_SIZE {
                img.put_pixel(x_start + dx, y_start + dy, Luma([0u8]));
            }
        }
    }

    Ok(img)
}

/// Writes `text` as a PNG QR code to `path`.
pub fn generate_png_qr(text: &str, path: &Path) -> anyhow::Result<()> {
    render_png(text)?.save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}
