//! Static HTML rendering for batch reports.
//!
//! Plain `format!` templating, no web framework. Pages are self-contained
//! (inline CSS) so the output directory can be zipped and mailed around.

use super::{BatchReport, ParamSummary};

const STYLE: &str = r#"
body { font-family: "Segoe UI", Arial, sans-serif; margin: 2em; color: #222; }
h1 { border-bottom: 2px solid #2c5f8a; padding-bottom: 0.3em; }
h2 { color: #2c5f8a; margin-top: 1.6em; }
table { border-collapse: collapse; margin: 1em 0; font-size: 0.9em; }
th, td { border: 1px solid #ccc; padding: 0.35em 0.7em; text-align: right; }
th { background: #2c5f8a; color: #fff; text-align: center; }
td.name { text-align: left; font-weight: bold; }
tr:nth-child(even) { background: #f4f7fa; }
.bad { color: #b00020; font-weight: bold; }
.meta { color: #666; font-size: 0.85em; }
"#;

/// Render the per-batch report page.
pub fn render_batch(report: &BatchReport) -> String {
    let mut rows = String::new();
    for p in &report.params {
        rows.push_str(&param_row(p));
    }

    let mut wafer_sections = String::new();
    for p in &report.params {
        if p.wafers.len() < 2 {
            continue;
        }
        wafer_sections.push_str(&wafer_section(p));
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>CP Report {batch}</title>
<style>{STYLE}</style>
</head>
<body>
<h1>CP Test Report &mdash; {batch}</h1>
<p class="meta">Lot {lot} &middot; generated {generated}</p>
<h2>Parameter Summary</h2>
<table>
<tr><th>Parameter</th><th>Unit</th><th>N</th><th>Flagged</th><th>Removed</th>
<th>Mean</th><th>Median</th><th>Std</th><th>Min</th><th>Max</th>
<th>P10</th><th>P25</th><th>P75</th><th>P90</th>
<th>LSL</th><th>USL</th><th>OOS</th><th>Cp</th><th>Cpk</th><th>Est. Yield</th></tr>
{rows}
</table>
{wafer_sections}
</body>
</html>
"#,
        batch = escape(&report.batch),
        lot = escape(report.lot.as_deref().unwrap_or("?")),
        generated = escape(&report.generated_at),
    )
}

fn param_row(p: &ParamSummary) -> String {
    let oos_class = if p.oos_count > 0 { " class=\"bad\"" } else { "" };
    format!(
        "<tr><td class=\"name\">{name}</td><td>{unit}</td><td>{n}</td>\
         <td>{flagged}</td><td>{removed}</td>\
         <td>{mean}</td><td>{median}</td><td>{std}</td><td>{min}</td><td>{max}</td>\
         <td>{q10}</td><td>{q25}</td><td>{q75}</td><td>{q90}</td>\
         <td>{lsl}</td><td>{usl}</td><td{oos_class}>{oos}</td>\
         <td>{cp}</td><td>{cpk}</td><td>{est_yield}</td></tr>\n",
        name = escape(&p.parameter),
        unit = escape(p.unit.as_deref().unwrap_or("-")),
        n = p.count,
        flagged = p.flagged,
        removed = p.removed,
        mean = num(p.mean),
        median = num(p.median),
        std = opt(p.std_dev),
        min = num(p.min),
        max = num(p.max),
        q10 = num(p.q10),
        q25 = num(p.q25),
        q75 = num(p.q75),
        q90 = num(p.q90),
        lsl = opt(p.limit_lower),
        usl = opt(p.limit_upper),
        oos = p.oos_count,
        cp = opt(p.cp),
        cpk = opt(p.cpk),
        est_yield = p
            .est_yield
            .map(|y| format!("{:.2}%", y * 100.0))
            .unwrap_or_else(|| "-".to_string()),
    )
}

fn wafer_section(p: &ParamSummary) -> String {
    let mut rows = String::new();
    for w in &p.wafers {
        let oos_class = if w.oos_count > 0 { " class=\"bad\"" } else { "" };
        rows.push_str(&format!(
            "<tr><td class=\"name\">{wafer}</td><td>{n}</td><td>{mean}</td>\
             <td>{median}</td><td{oos_class}>{oos}</td></tr>\n",
            wafer = escape(&w.wafer),
            n = w.count,
            mean = num(w.mean),
            median = num(w.median),
            oos = w.oos_count,
        ));
    }
    format!(
        "<h2>{name} by Wafer</h2>\n<table>\n\
         <tr><th>Wafer</th><th>N</th><th>Mean</th><th>Median</th><th>OOS</th></tr>\n\
         {rows}</table>\n",
        name = escape(&p.parameter),
    )
}

/// Render the top-level index linking each batch report.
pub fn render_index(batches: &[String]) -> String {
    let mut items = String::new();
    for batch in batches {
        items.push_str(&format!(
            "<li><a href=\"{batch}/report/index.html\">{batch}</a></li>\n",
            batch = escape(batch),
        ));
    }
    if items.is_empty() {
        items.push_str("<li class=\"meta\">no batches processed</li>\n");
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>CP Batch Reports</title>
<style>{STYLE}</style>
</head>
<body>
<h1>CP Batch Reports</h1>
<ul>
{items}</ul>
</body>
</html>
"#
    )
}

/// Compact numeric formatting: scientific for very small or large
/// magnitudes, fixed otherwise.
fn num(v: f64) -> String {
    let a = v.abs();
    if a != 0.0 && (a < 1e-3 || a >= 1e6) {
        format!("{v:.3e}")
    } else {
        format!("{v:.4}")
    }
}

fn opt(v: Option<f64>) -> String {
    v.map(num).unwrap_or_else(|| "-".to_string())
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
