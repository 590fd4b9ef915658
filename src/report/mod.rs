//! Inspection report rendering.
//!
//! [`HtmlReportRenderer`] produces one self-contained HTML document per
//! inspection: header, inspection table, original and overlay images
//! (inline base64 PNG), the narrative and a disclaimer footer.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use image::RgbImage;
use std::fmt::Write as _;

use crate::analysis::Narrative;
use crate::config::ClassLabels;
use crate::imaging::encode_png;
use crate::types::InspectionResult;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("formatting failed")]
    Format(#[from] std::fmt::Error),
}

/// Everything a renderer needs for one document.
#[derive(Debug, Clone, Copy)]
pub struct ReportInput<'a> {
    pub result: &'a InspectionResult,
    pub narrative: &'a Narrative,
    pub original: &'a RgbImage,
    pub labels: &'a ClassLabels,
    /// Name of the classifier checkpoint that produced the verdict.
    pub model_name: &'a str,
}

pub trait ReportRenderer: Send + Sync {
    fn render(&self, input: &ReportInput<'_>) -> Result<Vec<u8>, ReportError>;

    /// MIME type of the rendered bytes.
    fn content_type(&self) -> &'static str;
}

#[derive(Debug, Clone, Default)]
pub struct HtmlReportRenderer;

impl HtmlReportRenderer {
    pub const fn new() -> Self {
        Self
    }
}

impl ReportRenderer for HtmlReportRenderer {
    fn render(&self, input: &ReportInput<'_>) -> Result<Vec<u8>, ReportError> {
        let result = input.result;
        let original_png = BASE64.encode(encode_png(input.original)?);
        let overlay_png = BASE64.encode(encode_png(&result.overlay)?);

        let (badge, badge_class) = if result.predicted_class.is_defective() {
            ("[NG]", "ng")
        } else {
            ("[OK]", "ok")
        };

        let mut html = String::with_capacity(original_png.len() + overlay_png.len() + 8 * 1024);
        html.push_str(concat!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n",
            "<title>Casting Defect Inspection Report</title>\n<style>\n",
            "body{font-family:sans-serif;max-width:960px;margin:2em auto;color:#222}\n",
            "h1{color:#1f4788;text-align:center;margin-bottom:0}\n",
            ".subtitle{text-align:center;color:#666;margin-top:.3em}\n",
            "h2{background:#1f4788;color:#fff;padding:.3em .6em}\n",
            "table{border-collapse:collapse;width:100%}\n",
            "td,th{border:1px solid #999;padding:.4em .6em;text-align:left}\n",
            "tr.ok td{background:#d4edda;color:#155724}\n",
            "tr.ng td{background:#f8d7da;color:#721c24}\n",
            ".images td{text-align:center;width:50%}\n.images img{max-width:100%}\n",
            ".narrative{white-space:pre-wrap}\n",
            ".notice{background:#fff3cd;border:1px solid #ffc107;color:#856404;padding:.8em;text-align:center;font-size:.85em}\n",
            "footer{text-align:center;color:#888;font-size:.8em;margin-top:1em}\n",
            "</style>\n</head>\n<body>\n",
            "<h1>Casting Defect Inspection Report</h1>\n",
            "<p class=\"subtitle\">Automated visual inspection</p>\n",
        ));

        html.push_str("<h2>Inspection</h2>\n<table>\n<tr><th>Item</th><th>Value</th></tr>\n");
        writeln!(
            html,
            "<tr><td>Inspected at</td><td>{}</td></tr>",
            result.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(html, "<tr><td>Inspection ID</td><td>{}</td></tr>", result.id)?;
        writeln!(
            html,
            "<tr class=\"{}\"><td>Verdict</td><td>{} {}</td></tr>",
            badge_class,
            badge,
            escape_html(input.labels.label(result.predicted_class))
        )?;
        writeln!(html, "<tr><td>Confidence</td><td>{:.2}%</td></tr>", result.confidence * 100.0)?;
        for (class, p) in result.class_probabilities.iter() {
            writeln!(
                html,
                "<tr><td>P({})</td><td>{:.2}%</td></tr>",
                escape_html(input.labels.label(class)),
                p * 100.0
            )?;
        }
        writeln!(html, "<tr><td>Model</td><td>{}</td></tr>", escape_html(input.model_name))?;
        html.push_str("</table>\n");

        html.push_str("<h2>Image analysis</h2>\n<table class=\"images\">\n");
        html.push_str("<tr><th>Original</th><th>Model attention (Grad-CAM)</th></tr>\n");
        writeln!(
            html,
            "<tr><td><img alt=\"original\" src=\"data:image/png;base64,{}\"></td>\
             <td><img alt=\"overlay\" src=\"data:image/png;base64,{}\"></td></tr>",
            original_png, overlay_png
        )?;
        html.push_str("</table>\n");
        html.push_str(
            "<p><em>The heat map shows the regions the model attended to for this verdict. \
             Redder regions contributed more.</em></p>\n",
        );

        html.push_str("<h2>Detailed analysis</h2>\n");
        writeln!(html, "<div class=\"narrative\">{}</div>", escape_html(input.narrative.analysis.trim()))?;
        html.push_str("<h2>Recommended actions</h2>\n");
        writeln!(
            html,
            "<div class=\"narrative\">{}</div>",
            escape_html(input.narrative.recommendation.trim())
        )?;

        html.push_str(
            "<p class=\"notice\"><strong>Notice</strong><br>This report was generated automatically \
             and is for reference only. Final quality decisions require visual confirmation by a \
             qualified inspector.</p>\n",
        );
        writeln!(
            html,
            "<footer>castscope {} | generated {}</footer>",
            env!("CARGO_PKG_VERSION"),
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        html.push_str("</body>\n</html>\n");

        Ok(html.into_bytes())
    }

    fn content_type(&self) -> &'static str {
        "text/html; charset=utf-8"
    }
}

/// Escape text for an HTML element or attribute body.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
