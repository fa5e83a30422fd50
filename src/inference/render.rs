//! Terminal rendering of diagnosis results
//!
//! Results are laid out as cards in a grid, three per row. `NORMAL` is
//! shown in green and `PNEUMONIA` in red.

use colored::{ColoredString, Colorize};

use super::predictor::{DiagnosisReport, PredictionResult};
use super::registry::SkippedModel;
use crate::utils::{format_millis, format_progress_bar};

/// Cards per grid row
pub const GRID_COLUMNS: usize = 3;

/// Visible width of one card
const CARD_WIDTH: usize = 26;

/// Width of the confidence bar inside a card, brackets excluded
const BAR_WIDTH: usize = CARD_WIDTH - 2;

const COLUMN_GAP: &str = "   ";

fn pad(text: &str) -> String {
    format!("{:<width$}", text, width = CARD_WIDTH)
}

fn label_color(result: &PredictionResult, text: &str) -> ColoredString {
    if result.is_normal() {
        text.green()
    } else {
        text.red()
    }
}

/// Card lines; padding is applied before colouring so columns stay aligned
fn card_lines(result: &PredictionResult) -> Vec<String> {
    vec![
        pad(&result.model_name).bold().to_string(),
        label_color(result, &pad(&result.label)).bold().to_string(),
        label_color(
            result,
            &pad(&format_progress_bar(result.confidence as f64, BAR_WIDTH)),
        )
        .to_string(),
        pad(&format!("Confidence: {:.1}%", result.confidence_percent()))
            .dimmed()
            .to_string(),
    ]
}

/// Render results as a grid with `columns` cards per row
pub fn render_grid(results: &[PredictionResult], columns: usize) -> String {
    let columns = columns.max(1);
    let mut rows = Vec::new();

    for chunk in results.chunks(columns) {
        let cards: Vec<Vec<String>> = chunk.iter().map(card_lines).collect();
        let height = cards.iter().map(Vec::len).max().unwrap_or(0);

        let lines: Vec<String> = (0..height)
            .map(|i| {
                let line = cards
                    .iter()
                    .map(|card| card.get(i).cloned().unwrap_or_else(|| pad("")))
                    .collect::<Vec<_>>()
                    .join(COLUMN_GAP);
                line.trim_end().to_string()
            })
            .collect();

        rows.push(lines.join("\n"));
    }

    rows.join("\n\n")
}

/// Render one line per skipped model
pub fn render_skipped(skipped: &[SkippedModel]) -> String {
    skipped
        .iter()
        .map(|s| format!("{} {} ({})", "Skipped:".yellow(), s.name, s.reason))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a full report: header, result grid, and skipped models
pub fn render_report(report: &DiagnosisReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("{}\n", "Diagnostic Results".cyan().bold()));
    if let Some(image) = &report.image {
        out.push_str(&format!("  Image:   {}\n", image));
    }
    out.push_str(&format!("  Backend: {}\n", report.backend));
    out.push_str(&format!(
        "  Models:  {} ({} total)\n\n",
        report.results.len(),
        format_millis(report.total_inference_ms())
    ));

    out.push_str(&render_grid(&report.results, GRID_COLUMNS));
    out.push('\n');

    if !report.skipped.is_empty() {
        out.push('\n');
        out.push_str(&render_skipped(&report.skipped));
        out.push('\n');
    }

    out
}
