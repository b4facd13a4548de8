use std::path::Path;
use std::sync::OnceLock;

use minijinja::{Environment, context};

use crate::entities::analysis::Analysis;
use crate::entities::event::EventRecord;
use crate::entities::stats::{PriceSummary, format_won};
use crate::error::YeoshinError;

static ENV: OnceLock<Environment<'static>> = OnceLock::new();

const BAR_WIDTH: usize = 30;

#[derive(serde::Serialize)]
struct BarRow {
    location: String,
    mean_price: f64,
    hospitals: usize,
    bar: String,
}

fn env() -> Result<&'static Environment<'static>, YeoshinError> {
    if let Some(env) = ENV.get() {
        return Ok(env);
    }

    let mut env = Environment::new();
    env.add_filter("truncate", |s: String, max_chars: usize| -> String {
        if s.chars().count() <= max_chars {
            return s;
        }
        let mut out: String = s.chars().take(max_chars).collect();
        out = out.trim_end().to_string();
        out.push('…');
        out
    });
    env.add_filter("cell", |s: String| -> String {
        s.replace('|', "\\|").replace(['\n', '\r'], " ")
    });
    env.add_filter("won", |v: f64| -> String { format_won(v) });
    env.add_template("search.md.j2", include_str!("../../templates/search.md.j2"))?;
    env.add_template("stats.md.j2", include_str!("../../templates/stats.md.j2"))?;
    env.add_template(
        "analysis.md.j2",
        include_str!("../../templates/analysis.md.j2"),
    )?;
    env.add_template("report.md.j2", include_str!("../../templates/report.md.j2"))?;

    let _ = ENV.set(env);
    Ok(ENV
        .get()
        .expect("ENV should be initialized by the time this is reached"))
}

fn event_count(rows: &[EventRecord]) -> usize {
    let mut orders: Vec<usize> = rows.iter().map(|r| r.exposure_order).collect();
    orders.sort_unstable();
    orders.dedup();
    orders.len()
}

pub fn search_markdown(keyword: &str, rows: &[EventRecord]) -> Result<String, YeoshinError> {
    let tmpl = env()?.get_template("search.md.j2")?;
    Ok(tmpl.render(context! {
        keyword => keyword.trim(),
        rows => rows,
        events => event_count(rows),
    })?)
}

fn bars(summary: &PriceSummary) -> Vec<BarRow> {
    let max = summary
        .regions
        .iter()
        .map(|r| r.mean_price)
        .fold(0.0_f64, f64::max);
    summary
        .regions
        .iter()
        .map(|r| {
            let len = if max > 0.0 {
                ((r.mean_price / max) * BAR_WIDTH as f64).round() as usize
            } else {
                0
            };
            BarRow {
                location: r.location.clone(),
                mean_price: r.mean_price,
                hospitals: r.hospitals,
                bar: "█".repeat(len.max(1)),
            }
        })
        .collect()
}

pub fn stats_markdown(keyword: &str, summary: &PriceSummary) -> Result<String, YeoshinError> {
    let tmpl = env()?.get_template("stats.md.j2")?;
    Ok(tmpl.render(context! {
        keyword => keyword.trim(),
        summary => summary,
        bars => bars(summary),
    })?)
}

pub fn analysis_markdown(analysis: &Analysis) -> Result<String, YeoshinError> {
    let tmpl = env()?.get_template("analysis.md.j2")?;
    Ok(tmpl.render(context! {
        fallback => analysis.fallback,
        raw => &analysis.raw,
        sections => &analysis.sections,
        recommendations => &analysis.recommendations,
    })?)
}

pub fn report_markdown(
    keyword: &str,
    path: &Path,
    rows: &[EventRecord],
    summary: &PriceSummary,
    analysis: &Analysis,
    generated: &str,
) -> Result<String, YeoshinError> {
    let tmpl = env()?.get_template("report.md.j2")?;
    Ok(tmpl.render(context! {
        keyword => keyword.trim(),
        path => path.display().to_string(),
        rows => rows.len(),
        events => event_count(rows),
        regions => summary.regions.len(),
        fallback => analysis.fallback,
        sections => analysis.sections.len(),
        recommendations => analysis.recommendations.len(),
        generated => generated,
    })?)
}
