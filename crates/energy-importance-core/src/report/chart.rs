//! Horizontal bar chart of importance scores, rendered straight to pixels.

use std::fs;
use std::path::Path;

use image::{ImageFormat, Rgb, RgbImage};
use tracing::info;

use super::glyphs::{glyph, text_width, ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};
use super::{ImportanceTable, ReportError};

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const INK: Rgb<u8> = Rgb([33, 33, 33]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const BAR: Rgb<u8> = Rgb([118, 160, 204]);
const BAR_HIGHLIGHT: Rgb<u8> = Rgb([31, 84, 150]);

const MARGIN: u32 = 40;
const TITLE_SCALE: u32 = 4;
const AXIS_TICKS: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct ChartLayout {
    pub width: u32,
    pub height: u32,
    pub title: String,
    /// Bars ranked within this many places are drawn in the darker colour.
    pub highlight: usize,
}

impl Default for ChartLayout {
    fn default() -> Self {
        Self {
            width: 1800,
            height: 2000,
            title: "Feature Importance".to_string(),
            highlight: 10,
        }
    }
}

/// One bar per entry, most important at the top, with the feature name to
/// the left of its bar and the score to the right.
pub fn render_bar_chart(table: &ImportanceTable, layout: &ChartLayout) -> RgbImage {
    let mut img = RgbImage::from_pixel(layout.width, layout.height, BACKGROUND);

    let title_width = text_width(&layout.title, TITLE_SCALE);
    let title_x = layout.width.saturating_sub(title_width) / 2;
    draw_text(&mut img, title_x, MARGIN / 2, &layout.title, TITLE_SCALE, INK);

    if table.is_empty() {
        return img;
    }

    let plot_top = MARGIN / 2 + GLYPH_HEIGHT * TITLE_SCALE + MARGIN;
    let axis_y = layout.height.saturating_sub(MARGIN + 2 * GLYPH_HEIGHT * 2);
    let rows = table.len() as u32;
    let row_height = (axis_y.saturating_sub(plot_top) / rows).max(1);
    let label_scale = if row_height >= 2 * GLYPH_HEIGHT + 2 { 2 } else { 1 };

    let label_width = table
        .entries
        .iter()
        .map(|entry| text_width(&entry.feature, label_scale))
        .max()
        .unwrap_or(0);
    let value_width = text_width("0.000000", label_scale);
    let plot_left = MARGIN + label_width + ADVANCE * label_scale;
    let plot_right = layout
        .width
        .saturating_sub(MARGIN + value_width + ADVANCE * label_scale);
    let plot_width = plot_right.saturating_sub(plot_left);

    let max_score = table
        .entries
        .iter()
        .map(|entry| entry.importance)
        .fold(0.0_f64, f64::max);

    // vertical grid lines with tick labels under the axis
    for tick in 0..=AXIS_TICKS {
        let x = plot_left + plot_width * tick / AXIS_TICKS;
        fill_rect(&mut img, x, plot_top, 1, axis_y.saturating_sub(plot_top), GRID);
        let value = max_score * f64::from(tick) / f64::from(AXIS_TICKS);
        let label = format!("{value:.3}");
        let label_x = x.saturating_sub(text_width(&label, 2) / 2);
        draw_text(&mut img, label_x, axis_y + 8, &label, 2, INK);
    }

    let bar_height = (row_height * 7 / 10).max(1);
    let text_height = GLYPH_HEIGHT * label_scale;
    for (rank, entry) in table.entries.iter().enumerate() {
        let row_top = plot_top + rank as u32 * row_height;
        let bar_top = row_top + (row_height.saturating_sub(bar_height)) / 2;
        let text_top = row_top + row_height.saturating_sub(text_height) / 2;

        let length = if max_score > 0.0 {
            ((entry.importance / max_score) * f64::from(plot_width)).round() as u32
        } else {
            0
        };
        let colour = if rank < layout.highlight {
            BAR_HIGHLIGHT
        } else {
            BAR
        };
        fill_rect(&mut img, plot_left, bar_top, length, bar_height, colour);

        let name_width = text_width(&entry.feature, label_scale);
        let name_x = plot_left.saturating_sub(ADVANCE * label_scale + name_width);
        draw_text(&mut img, name_x, text_top, &entry.feature, label_scale, INK);

        let value = format!("{:.6}", entry.importance);
        draw_text(
            &mut img,
            plot_left + length + ADVANCE * label_scale,
            text_top,
            &value,
            label_scale,
            INK,
        );
    }

    // axes
    fill_rect(&mut img, plot_left, plot_top, 2, axis_y.saturating_sub(plot_top), INK);
    fill_rect(&mut img, plot_left, axis_y, plot_width + 1, 2, INK);

    img
}

pub fn save_bar_chart(
    table: &ImportanceTable,
    layout: &ChartLayout,
    path: &Path,
) -> Result<(), ReportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ReportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let img = render_bar_chart(table, layout);
    img.save_with_format(path, ImageFormat::Png)
        .map_err(|source| ReportError::Image {
            path: path.to_path_buf(),
            source,
        })?;

    info!(
        path = %path.display(),
        width = layout.width,
        height = layout.height,
        bars = table.len(),
        "wrote importance chart"
    );
    Ok(())
}

/// Clipped to the image bounds.
fn fill_rect(img: &mut RgbImage, x: u32, y: u32, width: u32, height: u32, colour: Rgb<u8>) {
    let x_end = x.saturating_add(width).min(img.width());
    let y_end = y.saturating_add(height).min(img.height());
    for py in y..y_end {
        for px in x..x_end {
            img.put_pixel(px, py, colour);
        }
    }
}

fn draw_text(img: &mut RgbImage, x: u32, y: u32, text: &str, scale: u32, colour: Rgb<u8>) {
    let mut origin = x;
    for c in text.chars() {
        let rows = glyph(c);
        for (row_idx, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) != 0 {
                    fill_rect(
                        img,
                        origin + col * scale,
                        y + row_idx as u32 * scale,
                        scale,
                        scale,
                        colour,
                    );
                }
            }
        }
        origin += ADVANCE * scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ImportanceTable {
        let names: Vec<String> = ["T1", "RH_1", "hour", "is_day"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        ImportanceTable::from_scores(&names, &[0.5, 0.3, 0.2, 0.0]).expect("table")
    }

    fn count(img: &RgbImage, colour: Rgb<u8>) -> usize {
        img.pixels().filter(|&&p| p == colour).count()
    }

    #[test]
    fn chart_has_requested_dimensions() {
        let layout = ChartLayout::default();
        let img = render_bar_chart(&table(), &layout);
        assert_eq!(img.dimensions(), (1800, 2000));
    }

    #[test]
    fn bars_scale_with_importance() {
        let layout = ChartLayout {
            width: 900,
            height: 600,
            highlight: 0,
            ..Default::default()
        };
        let img = render_bar_chart(&table(), &layout);

        // the top bar reaches further right than the shortest drawn one
        let rows_with_bar: Vec<u32> = (0..img.height())
            .filter(|&y| (0..img.width()).any(|x| *img.get_pixel(x, y) == BAR))
            .collect();
        assert!(!rows_with_bar.is_empty());

        let extent = |y: u32| {
            (0..img.width())
                .filter(|&x| *img.get_pixel(x, y) == BAR)
                .max()
                .unwrap_or(0)
        };
        let first = extent(rows_with_bar[0]);
        let last = extent(*rows_with_bar.last().unwrap());
        assert!(first > last);
        assert_eq!(count(&img, BAR_HIGHLIGHT), 0);
    }

    #[test]
    fn highlighted_bars_use_the_darker_colour() {
        let layout = ChartLayout {
            width: 900,
            height: 600,
            highlight: 1,
            ..Default::default()
        };
        let img = render_bar_chart(&table(), &layout);
        assert!(count(&img, BAR_HIGHLIGHT) > 0);
        assert!(count(&img, BAR) > 0);
    }

    #[test]
    fn empty_table_draws_only_the_title() {
        let empty = ImportanceTable { entries: vec![] };
        let img = render_bar_chart(&empty, &ChartLayout::default());
        assert!(count(&img, INK) > 0);
        assert_eq!(count(&img, BAR) + count(&img, BAR_HIGHLIGHT), 0);
    }

    #[test]
    fn saved_chart_is_a_png() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("feature_importance.png");
        let layout = ChartLayout {
            width: 640,
            height: 480,
            ..Default::default()
        };

        save_bar_chart(&table(), &layout, &path).expect("save chart");

        let bytes = fs::read(&path).expect("read chart");
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&bytes).expect("decode chart");
        assert_eq!((decoded.width(), decoded.height()), (640, 480));
    }
}
