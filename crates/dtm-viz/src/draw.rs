use image::{Rgb, RgbImage};

/// Set a pixel, ignoring coordinates outside the image.
#[inline]
pub fn set_pixel(img: &mut RgbImage, x: i64, y: i64, color: [u8; 3]) {
    if x >= 0 && x < img.width() as i64 && y >= 0 && y < img.height() as i64 {
        img.put_pixel(x as u32, y as u32, Rgb(color));
    }
}

/// Draws a line on an image inplace using Bresenham's line algorithm.
///
/// # Arguments
///
/// * `img` - The image to draw on.
/// * `p0` - The start point of the line as a tuple of (x, y).
/// * `p1` - The end point of the line as a tuple of (x, y).
/// * `color` - The color of the line.
pub fn draw_line(img: &mut RgbImage, p0: (i64, i64), p1: (i64, i64), color: [u8; 3]) {
    let (mut x0, mut y0) = p0;
    let (x1, y1) = p1;

    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx - dy;

    loop {
        set_pixel(img, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 > -dy {
            err -= dy;
            x0 += sx;
        }
        if e2 < dx {
            err += dx;
            y0 += sy;
        }
    }
}

/// Draws the one pixel outline of a rectangle around `width x height` pixels at `(x, y)`.
pub fn draw_frame(img: &mut RgbImage, x: i64, y: i64, width: i64, height: i64, color: [u8; 3]) {
    let (x0, y0) = (x - 1, y - 1);
    let (x1, y1) = (x + width, y + height);
    draw_line(img, (x0, y0), (x1, y0), color);
    draw_line(img, (x1, y0), (x1, y1), color);
    draw_line(img, (x1, y1), (x0, y1), color);
    draw_line(img, (x0, y1), (x0, y0), color);
}
