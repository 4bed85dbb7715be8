use std::path::Path;

use dtm_image::DepthGrid;
use image::{ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::{
    colormap::{Colormap, Normalize},
    draw::{draw_frame, draw_line},
    error::VizError,
    font::{draw_text, text_size},
};

const WHITE: [u8; 3] = [255, 255, 255];
const BLACK: [u8; 3] = [0, 0, 0];

const MIN_WIDTH: u32 = 160;
const MIN_HEIGHT: u32 = 120;

const TICK_LENGTH: i64 = 4;
const MAX_TICKS: usize = 8;

/// The size of the rendered figure.
///
/// The default matches a 6.4x4.8 inch figure at 100 dpi.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FigureConfig {
    /// Width of the figure in pixels.
    pub width: u32,
    /// Height of the figure in pixels.
    pub height: u32,
    /// Integer scale of the tick label glyphs.
    pub font_scale: u32,
}

impl Default for FigureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            font_scale: 2,
        }
    }
}

/// A rectangle of the figure, in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlotArea {
    /// Left column.
    pub x: u32,
    /// Top row.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PlotArea {
    /// The pixel at the center of the area.
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// A rendered heightmap figure.
#[derive(Clone, Debug)]
pub struct Heightmap {
    /// The RGB figure.
    pub image: RgbImage,
    /// The value shown at the bottom of the colour bar.
    pub vmin: f32,
    /// The value shown at the top of the colour bar.
    pub vmax: f32,
    /// Where the grid is drawn.
    pub plot: PlotArea,
    /// Where the colour bar is drawn.
    pub colorbar: PlotArea,
}

impl Heightmap {
    /// Encode the figure as PNG.
    pub fn encode_png(&self) -> Result<Vec<u8>, VizError> {
        let mut buf = Vec::new();
        self.image
            .write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Png)?;
        Ok(buf)
    }

    /// Write the figure to a PNG file, replacing any existing file.
    pub fn save_png(&self, file_path: impl AsRef<Path>) -> Result<(), VizError> {
        std::fs::write(file_path, self.encode_png()?)?;
        Ok(())
    }
}

/// Render an elevation grid with the `jet` colormap next to a colour bar.
///
/// The colour scale goes from zero to the largest value of the grid, so every
/// grid is scaled independently. An empty scale falls back to a unit range.
///
/// # Arguments
///
/// * `grid` - The elevation grid.
/// * `config` - The figure size.
///
/// # Returns
///
/// The figure with the value range it displays.
pub fn render_heightmap(grid: &DepthGrid, config: &FigureConfig) -> Result<Heightmap, VizError> {
    if config.width < MIN_WIDTH || config.height < MIN_HEIGHT {
        return Err(VizError::InvalidFigureSize {
            width: config.width,
            height: config.height,
            min_width: MIN_WIDTH,
            min_height: MIN_HEIGHT,
        });
    }

    let vmin = 0.0;
    let vmax = grid.max_value().unwrap_or(vmin);
    let norm = Normalize::new(vmin, vmax);
    let colormap = Colormap::jet();

    let mut image = RgbImage::from_pixel(config.width, config.height, Rgb(WHITE));
    let (plot, colorbar) = layout(config, grid.width(), grid.height());

    // nearest neighbour sampling of the grid into the plot area
    if !grid.is_empty() {
        for py in 0..plot.height {
            let row = sample_index(py, plot.height, grid.height());
            for px in 0..plot.width {
                let col = sample_index(px, plot.width, grid.width());
                let v = grid.get(row, col).copied().unwrap_or(vmin);
                image.put_pixel(plot.x + px, plot.y + py, Rgb(colormap.map(norm.apply(v))));
            }
        }
    }

    for by in 0..colorbar.height {
        let t = 1.0 - (by as f32 + 0.5) / colorbar.height as f32;
        let color = Rgb(colormap.map(t));
        for bx in 0..colorbar.width {
            image.put_pixel(colorbar.x + bx, colorbar.y + by, color);
        }
    }

    draw_frame(
        &mut image,
        plot.x as i64,
        plot.y as i64,
        plot.width as i64,
        plot.height as i64,
        BLACK,
    );
    draw_frame(
        &mut image,
        colorbar.x as i64,
        colorbar.y as i64,
        colorbar.width as i64,
        colorbar.height as i64,
        BLACK,
    );

    draw_colorbar_ticks(&mut image, &colorbar, &norm, config.font_scale);
    draw_axis_ticks(&mut image, &plot, grid.width(), grid.height(), config.font_scale);

    log::debug!(
        "Rendered a {}x{} heightmap in [{}, {}]",
        config.width,
        config.height,
        vmin,
        vmax
    );

    Ok(Heightmap {
        image,
        vmin,
        vmax,
        plot,
        colorbar,
    })
}

fn sample_index(dst: u32, dst_len: u32, src_len: usize) -> usize {
    let src = ((dst as f64 + 0.5) * src_len as f64 / dst_len as f64) as usize;
    src.min(src_len.saturating_sub(1))
}

// the axes box spans [0.125, 0.9] x [0.12, 0.89] of the figure, the colour bar
// takes the right 15% of it after a 5% pad
fn layout(config: &FigureConfig, grid_width: usize, grid_height: usize) -> (PlotArea, PlotArea) {
    let (w, h) = (config.width as f64, config.height as f64);
    let left = (0.125 * w).round();
    let top = (0.12 * h).round();
    let box_w = (0.9 * w).round() - left;
    let box_h = (0.89 * h).round() - top;

    let parent_w = box_w * 0.8;
    let pad = (box_w * 0.05).round().max(8.0);

    let (gw, gh) = (grid_width.max(1) as f64, grid_height.max(1) as f64);
    let scale = (parent_w / gw).min(box_h / gh);
    let plot_w = (gw * scale).round().max(1.0);
    let plot_h = (gh * scale).round().max(1.0);

    let plot = PlotArea {
        x: (left + (parent_w - plot_w) / 2.0).round() as u32,
        y: (top + (box_h - plot_h) / 2.0).round() as u32,
        width: plot_w as u32,
        height: plot_h as u32,
    };

    let colorbar = PlotArea {
        x: plot.x + plot.width + pad as u32,
        y: plot.y,
        width: (plot.height / 20).max(4),
        height: plot.height,
    };

    (plot, colorbar)
}

fn draw_colorbar_ticks(image: &mut RgbImage, colorbar: &PlotArea, norm: &Normalize, scale: u32) {
    let lo = norm.vmin;
    let hi = norm.vmin + norm.range();
    let (ticks, step) = nice_ticks(lo as f64, hi as f64, MAX_TICKS);

    let right = (colorbar.x + colorbar.width) as i64;
    let bottom = (colorbar.y + colorbar.height) as i64 - 1;
    let span = colorbar.height.saturating_sub(1) as f64;

    for v in ticks {
        let t = (v - lo as f64) / (hi - lo) as f64;
        let y = bottom - (t * span).round() as i64;
        draw_line(image, (right, y), (right + TICK_LENGTH, y), BLACK);

        let label = format_tick(v, step);
        let (_, text_h) = text_size(&label, scale);
        draw_text(
            image,
            &label,
            right + TICK_LENGTH + 3,
            y - text_h as i64 / 2,
            scale,
            BLACK,
        );
    }
}

// pixel coordinates of the grid along the bottom and the left of the plot
fn draw_axis_ticks(
    image: &mut RgbImage,
    plot: &PlotArea,
    grid_width: usize,
    grid_height: usize,
    scale: u32,
) {
    if grid_width == 0 || grid_height == 0 {
        return;
    }

    let bottom = (plot.y + plot.height) as i64;
    let (ticks, step) = nice_ticks(0.0, (grid_width - 1) as f64, MAX_TICKS);
    for v in ticks {
        let x = plot.x as i64 + ((v + 0.5) * plot.width as f64 / grid_width as f64) as i64;
        draw_line(image, (x, bottom), (x, bottom + TICK_LENGTH), BLACK);

        let label = format_tick(v, step);
        let (text_w, _) = text_size(&label, scale);
        draw_text(
            image,
            &label,
            x - text_w as i64 / 2,
            bottom + TICK_LENGTH + 3,
            scale,
            BLACK,
        );
    }

    let left = plot.x as i64 - 1;
    let (ticks, step) = nice_ticks(0.0, (grid_height - 1) as f64, MAX_TICKS);
    for v in ticks {
        let y = plot.y as i64 + ((v + 0.5) * plot.height as f64 / grid_height as f64) as i64;
        draw_line(image, (left - TICK_LENGTH, y), (left, y), BLACK);

        let label = format_tick(v, step);
        let (text_w, text_h) = text_size(&label, scale);
        draw_text(
            image,
            &label,
            left - TICK_LENGTH - 3 - text_w as i64,
            y - text_h as i64 / 2,
            scale,
            BLACK,
        );
    }
}

/// Evenly spaced round values covering `[lo, hi]`, and their spacing.
///
/// The spacing is 1, 2, 2.5 or 5 times a power of ten, chosen so there are at
/// most `max_ticks` values.
pub(crate) fn nice_ticks(lo: f64, hi: f64, max_ticks: usize) -> (Vec<f64>, f64) {
    if !lo.is_finite() || !hi.is_finite() || hi <= lo {
        return (vec![lo], 1.0);
    }

    let raw = (hi - lo) / max_ticks.saturating_sub(1).max(1) as f64;
    let magnitude = 10f64.powf(raw.log10().floor());
    let step = [1.0, 2.0, 2.5, 5.0, 10.0]
        .iter()
        .map(|m| m * magnitude)
        .find(|s| *s >= raw * (1.0 - 1e-9))
        .unwrap_or(10.0 * magnitude);

    let first = (lo / step).ceil() as i64;
    let last = (hi / step + 1e-9).floor() as i64;
    let ticks = (first..=last).map(|k| k as f64 * step).collect();
    (ticks, step)
}

fn format_tick(v: f64, step: f64) -> String {
    let mut decimals = 0;
    while decimals < 6 {
        let scaled = step * 10f64.powi(decimals);
        if (scaled - scaled.round()).abs() < 1e-6 {
            break;
        }
        decimals += 1;
    }
    format!("{:.*}", decimals as usize, v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use dtm_image::{Grid, ImageSize};

    fn gradient(size: usize) -> DepthGrid {
        Grid::from_fn(
            ImageSize {
                width: size,
                height: size,
            },
            |row, col| (row + col) as f32,
        )
    }

    #[test]
    fn test_render_range() -> Result<(), VizError> {
        let grid = gradient(64);
        let heightmap = render_heightmap(&grid, &FigureConfig::default())?;
        assert_eq!(heightmap.image.dimensions(), (640, 480));
        assert_relative_eq!(heightmap.vmin, 0.0);
        assert_relative_eq!(heightmap.vmax, 126.0);
        Ok(())
    }

    #[test]
    fn test_render_square_plot() -> Result<(), VizError> {
        let heightmap = render_heightmap(&gradient(512), &FigureConfig::default())?;
        assert_eq!(heightmap.plot.width, heightmap.plot.height);
        assert!(heightmap.colorbar.x > heightmap.plot.x + heightmap.plot.width);
        assert!(heightmap.colorbar.x + heightmap.colorbar.width < 640);
        Ok(())
    }

    #[test]
    fn test_render_colors() -> Result<(), VizError> {
        let grid = gradient(64);
        let heightmap = render_heightmap(&grid, &FigureConfig::default())?;
        let jet = Colormap::jet();
        let plot = heightmap.plot;

        // top left cell is the minimum, bottom right the maximum
        assert_eq!(heightmap.image.get_pixel(plot.x, plot.y).0, jet.map(0.0));
        assert_eq!(
            heightmap
                .image
                .get_pixel(plot.x + plot.width - 1, plot.y + plot.height - 1)
                .0,
            jet.map(1.0)
        );

        let bar = heightmap.colorbar;
        let (cx, _) = bar.center();
        assert_eq!(heightmap.image.get_pixel(cx, bar.y).0, jet.map(1.0));
        assert_eq!(
            heightmap.image.get_pixel(cx, bar.y + bar.height - 1).0,
            jet.map(0.0)
        );
        Ok(())
    }

    #[test]
    fn test_render_constant_grid() -> Result<(), VizError> {
        let grid = Grid::from_size_val(ImageSize::default(), 0.0f32);
        let heightmap = render_heightmap(&grid, &FigureConfig::default())?;
        assert_relative_eq!(heightmap.vmax, 0.0);

        let (cx, cy) = heightmap.plot.center();
        assert_eq!(heightmap.image.get_pixel(cx, cy).0, Colormap::jet().map(0.0));
        Ok(())
    }

    #[test]
    fn test_render_invalid_size() {
        let config = FigureConfig {
            width: 10,
            height: 10,
            ..Default::default()
        };
        let res = render_heightmap(&gradient(8), &config);
        assert!(matches!(res, Err(VizError::InvalidFigureSize { .. })));
    }

    #[test]
    fn test_encode_png() -> Result<(), Box<dyn std::error::Error>> {
        let heightmap = render_heightmap(&gradient(32), &FigureConfig::default())?;
        let png = heightmap.encode_png()?;
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("heightmap.png");
        heightmap.save_png(&path)?;
        let decoded = image::open(&path)?.into_rgb8();
        assert_eq!(decoded, heightmap.image);
        Ok(())
    }

    #[test]
    fn test_nice_ticks() {
        let (ticks, step) = nice_ticks(0.0, 700.0, 8);
        assert_relative_eq!(step, 100.0);
        assert_eq!(ticks.len(), 8);
        assert_relative_eq!(ticks[7], 700.0);

        let (ticks, step) = nice_ticks(0.0, 1.0, 8);
        assert_relative_eq!(step, 0.2);
        assert_eq!(ticks.len(), 6);

        let (ticks, _) = nice_ticks(0.0, 0.0, 8);
        assert_eq!(ticks, vec![0.0]);
    }

    #[test]
    fn test_format_tick() {
        assert_eq!(format_tick(300.0, 100.0), "300");
        assert_eq!(format_tick(0.4, 0.2), "0.4");
        assert_eq!(format_tick(7.5, 2.5), "7.5");
        assert_eq!(format_tick(0.25, 0.25), "0.25");
    }
}
