//! C10 — Plot renderer (optional). Line/scatter/bar charts from typed
//! parameters, persisted through [`parchment_core::storage::Storage`] or
//! returned inline, and bridged into a session as a self-contained
//! image-flavoured fragment instance.

use std::collections::HashMap;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageEncoder, RgbImage};
use parchment_core::error::{DocError, DocResult, ValidationIssue};
use parchment_core::model::{BlobMeta, FragmentInstance};
use parchment_core::rendering::base64_encode;
use parchment_core::storage::Storage;
use plotters::prelude::*;

const WIDTH: u32 = 960;
const HEIGHT: u32 = 540;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotKind {
    Line,
    Scatter,
    Bar,
}

impl PlotKind {
    pub fn parse(raw: &str) -> DocResult<Self> {
        match raw {
            "line" => Ok(PlotKind::Line),
            "scatter" => Ok(PlotKind::Scatter),
            "bar" => Ok(PlotKind::Bar),
            other => Err(DocError::InvalidArguments(format!("unsupported plot kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotTheme {
    Light,
    Dark,
    BizLight,
    BizDark,
}

impl PlotTheme {
    pub fn parse(raw: &str) -> DocResult<Self> {
        match raw {
            "light" => Ok(PlotTheme::Light),
            "dark" => Ok(PlotTheme::Dark),
            "bizlight" => Ok(PlotTheme::BizLight),
            "bizdark" => Ok(PlotTheme::BizDark),
            other => Err(DocError::InvalidArguments(format!("unsupported theme '{other}'"))),
        }
    }

    fn background(self) -> RGBColor {
        match self {
            PlotTheme::Light | PlotTheme::BizLight => WHITE,
            PlotTheme::Dark | PlotTheme::BizDark => RGBColor(30, 30, 35),
        }
    }

    fn foreground(self) -> RGBColor {
        match self {
            PlotTheme::Light | PlotTheme::BizLight => BLACK,
            PlotTheme::Dark | PlotTheme::BizDark => WHITE,
        }
    }

    /// Series palette: the business themes favor a muted, desaturated set.
    fn palette(self) -> &'static [RGBColor] {
        match self {
            PlotTheme::Light | PlotTheme::Dark => &[
                RGBColor(31, 119, 180),
                RGBColor(255, 127, 14),
                RGBColor(44, 160, 44),
                RGBColor(214, 39, 40),
                RGBColor(148, 103, 189),
            ],
            PlotTheme::BizLight | PlotTheme::BizDark => &[
                RGBColor(70, 90, 110),
                RGBColor(150, 120, 70),
                RGBColor(80, 120, 90),
                RGBColor(140, 80, 80),
                RGBColor(100, 90, 130),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotFormat {
    Png,
    Jpg,
    Svg,
    Pdf,
}

impl PlotFormat {
    pub fn parse(raw: &str) -> DocResult<Self> {
        match raw {
            "png" => Ok(PlotFormat::Png),
            "jpg" | "jpeg" => Ok(PlotFormat::Jpg),
            "svg" => Ok(PlotFormat::Svg),
            "pdf" => Ok(PlotFormat::Pdf),
            other => Err(DocError::InvalidArguments(format!("unsupported plot format '{other}'"))),
        }
    }

    pub fn ext(self) -> &'static str {
        match self {
            PlotFormat::Png => "png",
            PlotFormat::Jpg => "jpg",
            PlotFormat::Svg => "svg",
            PlotFormat::Pdf => "pdf",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            PlotFormat::Png => "image/png",
            PlotFormat::Jpg => "image/jpeg",
            PlotFormat::Svg => "image/svg+xml",
            PlotFormat::Pdf => "application/pdf",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SeriesSpec {
    pub label: Option<String>,
    pub color: Option<String>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct PlotRequest {
    pub title: Option<String>,
    pub x: Vec<f64>,
    /// y1..y5, in order.
    pub series: Vec<SeriesSpec>,
    pub kind: PlotKind,
    pub theme: PlotTheme,
    pub format: PlotFormat,
    pub x_min: Option<f64>,
    pub x_max: Option<f64>,
    pub y_min: Option<f64>,
    pub y_max: Option<f64>,
}

/// C4-analogue structural validation: arrays present, equal length,
/// numeric, non-empty.
pub fn validate_plot_request(req: &PlotRequest) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let issue = |name: &str, msg: String| ValidationIssue {
        parameter_name: name.into(),
        expected_type: "plot constraint".into(),
        received_type: "invalid".into(),
        message: msg,
        suggested_examples: Vec::new(),
    };

    if req.x.is_empty() {
        issues.push(issue("x", "x must be a non-empty numeric array".into()));
    }
    if req.series.is_empty() {
        issues.push(issue("y1", "at least one y series (y1..y5) is required".into()));
    }
    if req.series.len() > 5 {
        issues.push(issue("y1..y5", "at most 5 y series are supported".into()));
    }
    for (i, s) in req.series.iter().enumerate() {
        if s.values.len() != req.x.len() {
            issues.push(issue(
                &format!("y{}", i + 1),
                format!("y{} has {} points, expected {} to match x", i + 1, s.values.len(), req.x.len()),
            ));
        }
        if let Some(color) = &s.color {
            if !color.starts_with('#') {
                issues.push(issue(&format!("y{}", i + 1), format!("color '{color}' must be a #RRGGBB hex value")));
            }
        }
    }
    issues
}

fn draw_chart<DB: DrawingBackend>(
    backend: DB,
    req: &PlotRequest,
) -> Result<(), Box<dyn std::error::Error>>
where
    DB::ErrorType: 'static,
{
    let root = backend.into_drawing_area();
    root.fill(&req.theme.background())?;

    let x_min = req.x_min.unwrap_or_else(|| req.x.iter().cloned().fold(f64::INFINITY, f64::min));
    let x_max = req.x_max.unwrap_or_else(|| req.x.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
    let all_y: Vec<f64> = req.series.iter().flat_map(|s| s.values.iter().cloned()).collect();
    let y_min = req.y_min.unwrap_or_else(|| all_y.iter().cloned().fold(f64::INFINITY, f64::min).min(0.0));
    let y_max = req.y_max.unwrap_or_else(|| all_y.iter().cloned().fold(f64::NEG_INFINITY, f64::max));

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .caption(req.title.as_deref().unwrap_or(""), ("sans-serif", 24).into_font().color(&req.theme.foreground()))
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .label_style(("sans-serif", 14).into_font().color(&req.theme.foreground()))
        .axis_style(req.theme.foreground())
        .draw()?;

    let palette = req.theme.palette();
    for (i, series) in req.series.iter().enumerate() {
        let color = palette[i % palette.len()];
        let points: Vec<(f64, f64)> = req.x.iter().cloned().zip(series.values.iter().cloned()).collect();
        let label = series.label.clone().unwrap_or_else(|| format!("y{}", i + 1));

        match req.kind {
            PlotKind::Line => {
                chart
                    .draw_series(LineSeries::new(points, color.stroke_width(2)))?
                    .label(label)
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
            }
            PlotKind::Scatter => {
                chart
                    .draw_series(points.iter().map(|&(x, y)| Circle::new((x, y), 3, color.filled())))?
                    .label(label)
                    .legend(move |(x, y)| Circle::new((x, y), 3, color.filled()));
            }
            PlotKind::Bar => {
                let bar_width = (x_max - x_min) / (req.x.len().max(1) as f64) * 0.6;
                chart
                    .draw_series(points.iter().map(|&(x, y)| {
                        let mut bar = Rectangle::new([(x - bar_width / 2.0, 0.0), (x + bar_width / 2.0, y)], color.filled());
                        bar.set_margin(0, 0, 2, 2);
                        bar
                    }))?
                    .label(label)
                    .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 20, y + 5)], color.filled()));
            }
        }
    }

    if req.series.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(req.theme.background().mix(0.8))
            .border_style(req.theme.foreground())
            .label_font(("sans-serif", 14).into_font().color(&req.theme.foreground()))
            .draw()?;
    }

    root.present()?;
    Ok(())
}

fn render_raw_rgb(req: &PlotRequest) -> DocResult<RgbImage> {
    let mut buffer = vec![0u8; (WIDTH * HEIGHT * 3) as usize];
    {
        let backend = BitmapBackend::with_buffer(&mut buffer, (WIDTH, HEIGHT));
        draw_chart(backend, req).map_err(|e| DocError::RenderFailed(e.to_string()))?;
    }
    RgbImage::from_raw(WIDTH, HEIGHT, buffer).ok_or_else(|| DocError::RenderFailed("plot buffer size mismatch".into()))
}

fn render_svg(req: &PlotRequest) -> DocResult<String> {
    let mut svg_text = String::new();
    {
        let backend = SVGBackend::with_string(&mut svg_text, (WIDTH, HEIGHT));
        draw_chart(backend, req).map_err(|e| DocError::RenderFailed(e.to_string()))?;
    }
    Ok(svg_text)
}

fn render_pdf(req: &PlotRequest) -> DocResult<Vec<u8>> {
    use printpdf::{Image, ImageTransform, Mm, PdfDocument};

    let rgb = render_raw_rgb(req)?;
    let dynamic = image::DynamicImage::ImageRgb8(rgb);
    let (doc, page1, layer1) = PdfDocument::new("plot", Mm(210.0), Mm(297.0), "Layer 1");
    let layer = doc.get_page(page1).get_layer(layer1);
    let image = Image::from_dynamic_image(&dynamic);
    image.add_to_layer(layer, ImageTransform::default());

    let mut bytes = Vec::new();
    {
        let mut writer = std::io::BufWriter::new(&mut bytes);
        doc.save(&mut writer).map_err(|e| DocError::RenderFailed(e.to_string()))?;
    }
    Ok(bytes)
}

/// Render `req` to bytes in its requested format.
pub fn render(req: &PlotRequest) -> DocResult<Vec<u8>> {
    match req.format {
        PlotFormat::Png => {
            let rgb = render_raw_rgb(req)?;
            let mut bytes = Vec::new();
            image::codecs::png::PngEncoder::new(&mut bytes)
                .write_image(rgb.as_raw(), WIDTH, HEIGHT, image::ExtendedColorType::Rgb8)
                .map_err(|e| DocError::RenderFailed(e.to_string()))?;
            Ok(bytes)
        }
        PlotFormat::Jpg => {
            let rgb = render_raw_rgb(req)?;
            let mut bytes = Vec::new();
            JpegEncoder::new(&mut bytes)
                .write_image(rgb.as_raw(), WIDTH, HEIGHT, image::ExtendedColorType::Rgb8)
                .map_err(|e| DocError::RenderFailed(e.to_string()))?;
            Ok(bytes)
        }
        PlotFormat::Svg => Ok(render_svg(req)?.into_bytes()),
        PlotFormat::Pdf => render_pdf(req),
    }
}

pub struct PlotOutput {
    pub guid: Option<String>,
    pub content: Vec<u8>,
    pub media_type: &'static str,
}

pub struct PlotEngine {
    storage: Arc<Storage>,
}

impl PlotEngine {
    pub fn new(storage: Arc<Storage>) -> Self {
        PlotEngine { storage }
    }

    /// Render a plot, optionally persisting it tagged `artifact_type =
    /// plot_image` with an optional alias for later `get_image` lookup.
    pub async fn render_plot(
        &self,
        req: &PlotRequest,
        group: &str,
        persist: bool,
        alias: Option<&str>,
    ) -> DocResult<PlotOutput> {
        let issues = validate_plot_request(req);
        if !issues.is_empty() {
            return Err(DocError::InvalidFragmentParameters(issues));
        }
        let bytes = render(req)?;

        if persist {
            let mut extra = HashMap::new();
            extra.insert("artifact_type".into(), serde_json::json!("plot_image"));
            if let Some(alias) = alias {
                extra.insert("alias".into(), serde_json::json!(alias));
            }
            let guid = self.storage.save(&bytes, req.format.ext(), group, extra).await?;
            Ok(PlotOutput { guid: Some(guid), content: Vec::new(), media_type: req.format.media_type() })
        } else {
            Ok(PlotOutput { guid: None, content: bytes, media_type: req.format.media_type() })
        }
    }

    /// Resolve `identifier` (guid or alias) to a stored plot image within
    /// `group`.
    pub async fn get_image(&self, identifier: &str, group: &str) -> DocResult<(Vec<u8>, BlobMeta)> {
        if let Ok(found) = self.storage.get(identifier, group).await {
            if found.1.artifact_type() == Some("plot_image") {
                return Ok(found);
            }
        }
        let matches = self
            .storage
            .list(group, |m| m.artifact_type() == Some("plot_image") && m.alias() == Some(identifier))
            .await?;
        let meta = matches.into_iter().next().ok_or(DocError::NotFound("plot image".into()))?;
        self.storage.get(&meta.guid, group).await
    }

    /// Bridge a rendered or already-stored plot into a session as an
    /// `image_from_url`-flavoured fragment instance carrying its own
    /// `embedded_data_uri`, so the resulting document stays self-contained.
    pub async fn build_plot_fragment_instance(
        &self,
        fragment_id: &str,
        plot_guid: Option<&str>,
        inline_request: Option<&PlotRequest>,
        group: &str,
    ) -> DocResult<FragmentInstance> {
        let (bytes, media_type) = match (plot_guid, inline_request) {
            (Some(guid), _) => {
                let (bytes, meta) = self.get_image(guid, group).await?;
                let media_type = match meta.format.as_str() {
                    "png" => "image/png",
                    "jpg" | "jpeg" => "image/jpeg",
                    "svg" => "image/svg+xml",
                    "pdf" => "application/pdf",
                    _ => "application/octet-stream",
                };
                (bytes, media_type)
            }
            (None, Some(req)) => {
                let issues = validate_plot_request(req);
                if !issues.is_empty() {
                    return Err(DocError::InvalidFragmentParameters(issues));
                }
                (render(req)?, req.format.media_type())
            }
            (None, None) => {
                return Err(DocError::InvalidArguments("add_plot_fragment requires either plot_guid or inline plot parameters".into()));
            }
        };

        let data_uri = format!("data:{media_type};base64,{}", base64_encode(&bytes));
        let mut params = serde_json::Map::new();
        params.insert("image_url".into(), serde_json::json!(data_uri));
        params.insert("alignment".into(), serde_json::json!("center"));

        Ok(FragmentInstance {
            fragment_instance_guid: uuid::Uuid::new_v4().to_string(),
            fragment_id: fragment_id.to_string(),
            parameters: params,
            created_at: chrono::Utc::now(),
            embedded_data_uri: Some(data_uri),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_request(format: PlotFormat) -> PlotRequest {
        PlotRequest {
            title: Some("Revenue".into()),
            x: vec![1.0, 2.0, 3.0, 4.0],
            series: vec![SeriesSpec { label: Some("Q1".into()), color: None, values: vec![10.0, 12.0, 9.0, 15.0] }],
            kind: PlotKind::Line,
            theme: PlotTheme::Light,
            format,
            x_min: None,
            x_max: None,
            y_min: None,
            y_max: None,
        }
    }

    #[test]
    fn validation_catches_length_mismatch() {
        let mut req = basic_request(PlotFormat::Png);
        req.series[0].values.pop();
        let issues = validate_plot_request(&req);
        assert!(issues.iter().any(|i| i.parameter_name == "y1"));
    }

    #[test]
    fn validation_passes_for_well_formed_request() {
        let req = basic_request(PlotFormat::Png);
        assert!(validate_plot_request(&req).is_empty());
    }

    #[test]
    fn renders_png_bytes() {
        let req = basic_request(PlotFormat::Png);
        let bytes = render(&req).unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn renders_svg_text() {
        let req = basic_request(PlotFormat::Svg);
        let bytes = render(&req).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("<svg"));
    }

    #[tokio::test]
    async fn plot_engine_persists_and_resolves_by_alias() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::new(dir.path()));
        let engine = PlotEngine::new(storage);
        let req = basic_request(PlotFormat::Png);

        let out = engine.render_plot(&req, "acme", true, Some("q1-chart")).await.unwrap();
        let guid = out.guid.unwrap();

        let (bytes, meta) = engine.get_image(&guid, "acme").await.unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(meta.artifact_type(), Some("plot_image"));

        let (bytes_by_alias, _) = engine.get_image("q1-chart", "acme").await.unwrap();
        assert_eq!(bytes, bytes_by_alias);
    }
}
