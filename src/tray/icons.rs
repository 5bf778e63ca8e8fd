//! Icon generation for the system tray
//!
//! Draws a small volume-bars glyph programmatically so no image assets
//! need to be bundled.

use image::{ImageBuffer, Rgba};

use crate::link::ConnectionState;

/// Icon side length in pixels
pub const ICON_SIZE: u32 = 16;

/// Map a connection state to its icon color (r, g, b)
pub fn state_color(state: ConnectionState) -> (u8, u8, u8) {
    match state {
        ConnectionState::Connected => (0, 200, 0),
        ConnectionState::Connecting => (200, 200, 0),
        ConnectionState::Failed => (200, 0, 0),
        ConnectionState::Disconnected => (128, 128, 128),
    }
}

/// Render a 16x16 volume-bars icon in the given color.
///
/// Three ascending bars, the classic level glyph; transparent
/// background so it reads on light and dark trays.
pub fn generate_icon(color: (u8, u8, u8)) -> ImageBuffer<Rgba<u8>, Vec<u8>> {
    let (r, g, b) = color;
    let mut img = ImageBuffer::from_pixel(ICON_SIZE, ICON_SIZE, Rgba([0, 0, 0, 0]));

    // (x-start, height) per bar, drawn from the bottom edge up
    let bars: [(u32, u32); 3] = [(2, 5), (7, 9), (12, 13)];
    let bar_width = 3;
    let bottom = ICON_SIZE - 1;

    for (x_start, height) in bars {
        for x in x_start..x_start + bar_width {
            for y in (bottom - height)..=bottom {
                img.put_pixel(x, y, Rgba([r, g, b, 255]));
            }
        }
    }

    img
}

/// Render the icon for a state and return raw RGBA bytes for tray-icon
pub fn icon_rgba(state: ConnectionState) -> Vec<u8> {
    generate_icon(state_color(state)).into_raw()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icon_dimensions() {
        let img = generate_icon(state_color(ConnectionState::Connected));
        assert_eq!(img.width(), ICON_SIZE);
        assert_eq!(img.height(), ICON_SIZE);
    }

    #[test]
    fn test_rgba_byte_count() {
        let bytes = icon_rgba(ConnectionState::Disconnected);
        assert_eq!(bytes.len(), (ICON_SIZE * ICON_SIZE * 4) as usize);
    }

    #[test]
    fn test_state_colors_differ() {
        let connected = generate_icon(state_color(ConnectionState::Connected));
        let failed = generate_icon(state_color(ConnectionState::Failed));

        // Tallest bar is filled in both, with the state's color
        assert_eq!(connected.get_pixel(13, 8)[1], 200); // green channel
        assert_eq!(failed.get_pixel(13, 8)[0], 200); // red channel
    }

    #[test]
    fn test_background_is_transparent() {
        let img = generate_icon(state_color(ConnectionState::Connected));
        assert_eq!(img.get_pixel(0, 0)[3], 0);
    }
}
