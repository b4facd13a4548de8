//! A4 PDF report: scraped data table, price-by-region bar chart, and the analysis text.
//!
//! Layout works in millimetres measured from the top of the page; conversion to the
//! bottom-left PDF origin happens in [`Canvas`]. Text width is estimated from character
//! classes (see [`crate::utils::text::em_width`]) since fonts are embedded without metrics.

use std::io::BufReader;
use std::path::{Path, PathBuf};

use printpdf::path::{PaintMode, WindingOrder};
use printpdf::{
    BuiltinFont, Color, IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference, Point, Polygon, Rgb,
};
use tracing::{info, warn};

use crate::entities::event::{COLUMNS, EventRecord};
use crate::entities::stats::{RegionPrice, format_won};
use crate::error::YeoshinError;
use crate::utils::text::{em_width, fit_em, truncate_chars, wrap_em};

pub(crate) const FONT_PATH_ENV: &str = "YEOSHIN_FONT_PATH";

const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;
const MARGIN: f32 = 15.0;
const CONTENT_W: f32 = PAGE_W - 2.0 * MARGIN;
const PT_TO_MM: f32 = 0.3528;

const TITLE_SIZE: f32 = 16.0;
const BODY_SIZE: f32 = 9.0;
const TABLE_HEADER_SIZE: f32 = 7.5;
const TABLE_BODY_SIZE: f32 = 6.5;
const TABLE_ROW_H: f32 = 6.0;
const CELL_MAX_CHARS: usize = 20;
const CELL_PAD: f32 = 1.0;

const CHART_H: f32 = 80.0;
const CHART_LABEL_SIZE: f32 = 6.0;

/// Table column keys (everything but the detail link) with relative widths.
const TABLE_COLUMNS: [(&str, f32); 9] = [
    ("hospital_name", 22.0),
    ("location", 18.0),
    ("event_name", 30.0),
    ("option_name", 30.0),
    ("price", 18.0),
    ("rating", 10.0),
    ("review_count", 13.0),
    ("scrap_count", 14.0),
    ("inquiry_count", 13.0),
];

pub struct ReportInput<'a> {
    pub keyword: &'a str,
    pub rows: &'a [EventRecord],
    pub regions: &'a [RegionPrice],
    pub analysis_text: &'a str,
    pub generated: &'a str,
}

#[derive(Debug)]
pub struct RenderedReport {
    pub bytes: Vec<u8>,
    pub pages: usize,
    pub embedded_font: bool,
}

fn pdf_err(err: impl std::fmt::Display) -> YeoshinError {
    YeoshinError::Pdf(err.to_string())
}

fn rgb(r: f32, g: f32, b: f32) -> Color {
    Color::Rgb(Rgb::new(r, g, b, None))
}

fn black() -> Color {
    rgb(0.0, 0.0, 0.0)
}

struct Canvas {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    font: IndirectFontRef,
    cursor: f32,
    pages: usize,
}

impl Canvas {
    fn new(title: &str, font_path: Option<&Path>) -> Result<(Self, bool), YeoshinError> {
        let (doc, page, layer) = PdfDocument::new(title, Mm(PAGE_W), Mm(PAGE_H), "content");
        let (font, embedded) = load_font(&doc, font_path)?;
        let layer = doc.get_page(page).get_layer(layer);
        Ok((
            Self {
                doc,
                layer,
                font,
                cursor: MARGIN,
                pages: 1,
            },
            embedded,
        ))
    }

    fn new_page(&mut self) {
        let (page, layer) = self.doc.add_page(Mm(PAGE_W), Mm(PAGE_H), "content");
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.cursor = MARGIN;
        self.pages += 1;
    }

    /// Starts a new page when `height` does not fit below the cursor.
    fn ensure_space(&mut self, height: f32) -> bool {
        if self.cursor + height > PAGE_H - MARGIN {
            self.new_page();
            return true;
        }
        false
    }

    fn text(&self, value: &str, size: f32, x: f32, baseline_from_top: f32, color: Color) {
        if value.is_empty() {
            return;
        }
        self.layer.set_fill_color(color);
        self.layer.use_text(
            value,
            size,
            Mm(x),
            Mm(PAGE_H - baseline_from_top),
            &self.font,
        );
    }

    fn fill_rect(&self, x: f32, top: f32, w: f32, h: f32, color: Color) {
        let (x0, x1) = (x, x + w);
        let (y0, y1) = (PAGE_H - top - h, PAGE_H - top);
        self.layer.set_fill_color(color);
        self.layer.add_polygon(Polygon {
            rings: vec![vec![
                (Point::new(Mm(x0), Mm(y0)), false),
                (Point::new(Mm(x1), Mm(y0)), false),
                (Point::new(Mm(x1), Mm(y1)), false),
                (Point::new(Mm(x0), Mm(y1)), false),
            ]],
            mode: PaintMode::Fill,
            winding_order: WindingOrder::NonZero,
        });
    }

    fn line(&self, x1: f32, top1: f32, x2: f32, top2: f32, thickness: f32) {
        self.layer.set_outline_color(black());
        self.layer.set_outline_thickness(thickness);
        self.layer.add_line(Line {
            points: vec![
                (Point::new(Mm(x1), Mm(PAGE_H - top1)), false),
                (Point::new(Mm(x2), Mm(PAGE_H - top2)), false),
            ],
            is_closed: false,
        });
    }

    fn heading(&mut self, value: &str) {
        let line_h = TITLE_SIZE * PT_TO_MM * 1.25;
        self.ensure_space(line_h + 10.0);
        self.cursor += line_h;
        self.text(value, TITLE_SIZE, MARGIN, self.cursor, black());
        self.cursor += 8.0;
    }

    fn paragraph(&mut self, value: &str, size: f32) {
        let line_h = size * PT_TO_MM * 1.4;
        let max_em = CONTENT_W / (size * PT_TO_MM);
        for line in wrap_em(value, max_em) {
            self.ensure_space(line_h);
            self.cursor += line_h;
            self.text(&line, size, MARGIN, self.cursor, black());
        }
    }

    fn finish(self) -> Result<(Vec<u8>, usize), YeoshinError> {
        let pages = self.pages;
        let bytes = self.doc.save_to_bytes().map_err(pdf_err)?;
        Ok((bytes, pages))
    }
}

/// Loads the TTF at `path` (or `YEOSHIN_FONT_PATH`); falls back to built-in Helvetica,
/// which cannot draw Hangul, with a warning.
fn load_font(
    doc: &PdfDocumentReference,
    path: Option<&Path>,
) -> Result<(IndirectFontRef, bool), YeoshinError> {
    let path: Option<PathBuf> = path
        .map(Path::to_path_buf)
        .or_else(|| crate::sources::env_value(FONT_PATH_ENV).map(PathBuf::from));

    if let Some(path) = path {
        let loaded = std::fs::File::open(&path)
            .map_err(pdf_err)
            .and_then(|file| doc.add_external_font(BufReader::new(file)).map_err(pdf_err));
        match loaded {
            Ok(font) => {
                info!(font = %path.display(), "Embedded report font");
                return Ok((font, true));
            }
            Err(err) => warn!(
                font = %path.display(),
                "Font loading failed, using Helvetica (Hangul will not render): {err}"
            ),
        }
    } else {
        warn!("No report font configured (--font or {FONT_PATH_ENV}); Hangul will not render");
    }

    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(pdf_err)?;
    Ok((font, false))
}

fn column_widths() -> Vec<f32> {
    let total: f32 = TABLE_COLUMNS.iter().map(|(_, w)| w).sum();
    TABLE_COLUMNS
        .iter()
        .map(|(_, w)| w / total * CONTENT_W)
        .collect()
}

fn column_label(key: &str) -> &'static str {
    COLUMNS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, label)| *label)
        .unwrap_or("")
}

/// Cell text: at most 20 characters, then shortened to the column width.
fn cell_text(value: &str, width: f32, size: f32) -> String {
    let max_em = (width - 2.0 * CELL_PAD) / (size * PT_TO_MM);
    fit_em(&truncate_chars(value, CELL_MAX_CHARS), max_em)
}

fn draw_table_row(canvas: &Canvas, cells: &[String], widths: &[f32], header: bool) {
    let top = canvas.cursor;
    let (bg, fg, size) = if header {
        (rgb(0.5, 0.5, 0.5), rgb(0.96, 0.96, 0.96), TABLE_HEADER_SIZE)
    } else {
        (rgb(0.96, 0.96, 0.86), black(), TABLE_BODY_SIZE)
    };
    canvas.fill_rect(MARGIN, top, CONTENT_W, TABLE_ROW_H, bg);

    let baseline = top + TABLE_ROW_H / 2.0 + size * PT_TO_MM * 0.35;
    let mut x = MARGIN;
    for (cell, width) in cells.iter().zip(widths) {
        let text = cell_text(cell, *width, size);
        let text_w = em_width(&text) * size * PT_TO_MM;
        let left = x + ((width - text_w) / 2.0).max(CELL_PAD);
        canvas.text(&text, size, left, baseline, fg.clone());
        canvas.line(x, top, x, top + TABLE_ROW_H, 0.3);
        x += width;
    }
    canvas.line(x, top, x, top + TABLE_ROW_H, 0.3);
    canvas.line(MARGIN, top, MARGIN + CONTENT_W, top, 0.3);
    canvas.line(
        MARGIN,
        top + TABLE_ROW_H,
        MARGIN + CONTENT_W,
        top + TABLE_ROW_H,
        0.3,
    );
}

fn draw_table(canvas: &mut Canvas, rows: &[EventRecord]) {
    let widths = column_widths();
    let header: Vec<String> = TABLE_COLUMNS
        .iter()
        .map(|(key, _)| column_label(key).to_string())
        .collect();

    canvas.ensure_space(2.0 * TABLE_ROW_H);
    draw_table_row(canvas, &header, &widths, true);
    canvas.cursor += TABLE_ROW_H;

    for row in rows {
        if canvas.ensure_space(TABLE_ROW_H) {
            draw_table_row(canvas, &header, &widths, true);
            canvas.cursor += TABLE_ROW_H;
        }
        let cells: Vec<String> = TABLE_COLUMNS
            .iter()
            .map(|(key, _)| row.field(key).to_string())
            .collect();
        draw_table_row(canvas, &cells, &widths, false);
        canvas.cursor += TABLE_ROW_H;
    }
}

fn draw_chart(canvas: &mut Canvas, regions: &[RegionPrice]) {
    if regions.is_empty() {
        canvas.paragraph("가격 데이터가 없어 그래프를 생성할 수 없습니다.", BODY_SIZE);
        return;
    }

    let title_h = BODY_SIZE * PT_TO_MM * 1.6;
    let label_h = 10.0;
    canvas.ensure_space(title_h + CHART_H + label_h);

    canvas.cursor += title_h;
    canvas.text(
        "지역별 첫 번째 옵션 가격 평균 (원)",
        BODY_SIZE,
        MARGIN,
        canvas.cursor,
        black(),
    );
    canvas.cursor += 4.0;

    let top = canvas.cursor;
    let axis_left = MARGIN + 18.0;
    let plot_w = CONTENT_W - 18.0;
    let bottom = top + CHART_H;
    let max = regions
        .iter()
        .map(|r| r.mean_price)
        .fold(0.0_f64, f64::max)
        .max(1.0);

    canvas.line(axis_left, top, axis_left, bottom, 0.4);
    canvas.line(axis_left, bottom, axis_left + plot_w, bottom, 0.4);
    for tick in 0..=4 {
        let ratio = tick as f32 / 4.0;
        let y = bottom - ratio * (CHART_H - 6.0);
        let label = format_won(max * f64::from(ratio));
        let label_w = em_width(&label) * CHART_LABEL_SIZE * PT_TO_MM;
        canvas.text(
            &label,
            CHART_LABEL_SIZE,
            axis_left - 1.5 - label_w,
            y + 0.8,
            black(),
        );
        canvas.line(axis_left - 1.0, y, axis_left, y, 0.3);
    }

    let slot = plot_w / regions.len() as f32;
    let bar_w = (slot * 0.6).min(18.0);
    let label_em = slot / (CHART_LABEL_SIZE * PT_TO_MM);
    for (idx, region) in regions.iter().enumerate() {
        let height = (region.mean_price / max) as f32 * (CHART_H - 6.0);
        let center = axis_left + slot * (idx as f32 + 0.5);
        canvas.fill_rect(
            center - bar_w / 2.0,
            bottom - height,
            bar_w,
            height,
            rgb(0.27, 0.51, 0.71),
        );

        let value = format_won(region.mean_price);
        let value_w = em_width(&value) * CHART_LABEL_SIZE * PT_TO_MM;
        canvas.text(
            &value,
            CHART_LABEL_SIZE,
            center - value_w / 2.0,
            bottom - height - 1.0,
            black(),
        );

        let name = fit_em(&region.location, label_em);
        let name_w = em_width(&name) * CHART_LABEL_SIZE * PT_TO_MM;
        canvas.text(
            &name,
            CHART_LABEL_SIZE,
            center - name_w / 2.0,
            bottom + 4.0,
            black(),
        );
    }
    canvas.cursor = bottom + label_h;
}

/// Lays out the whole report and returns the encoded PDF.
pub fn render(input: &ReportInput<'_>, font_path: Option<&Path>) -> Result<RenderedReport, YeoshinError> {
    let title = format!("yeoshin {} report", input.keyword.trim());
    let (mut canvas, embedded_font) = Canvas::new(&title, font_path)?;

    canvas.heading("스크래핑 데이터");
    canvas.paragraph(
        &format!(
            "키워드: {}  ·  {}개 행  ·  생성: {}",
            input.keyword.trim(),
            input.rows.len(),
            input.generated
        ),
        BODY_SIZE,
    );
    canvas.cursor += 4.0;
    draw_table(&mut canvas, input.rows);

    canvas.cursor += 10.0;
    canvas.heading("데이터 시각화");
    draw_chart(&mut canvas, input.regions);

    canvas.cursor += 10.0;
    canvas.heading("분석 리포트");
    canvas.paragraph(input.analysis_text, BODY_SIZE);

    let (bytes, pages) = canvas.finish()?;
    Ok(RenderedReport {
        bytes,
        pages,
        embedded_font,
    })
}

pub async fn write(path: &Path, bytes: &[u8]) -> Result<(), YeoshinError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}
