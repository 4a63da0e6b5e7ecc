//! Rendering of job summaries for stdout.

use api_types::JobSummary;

const HEADERS: [&str; 8] = [
    "NAME", "KIND", "STATUS", "REASON", "CHIEF", "PODS", "RESTARTS", "GPU",
];

/// Plain table with columns padded to their widest cell.
pub fn render_table(jobs: &[JobSummary]) -> String {
    let rows: Vec<[String; 8]> = jobs
        .iter()
        .map(|job| {
            [
                job.name.clone(),
                job.kind.label().to_string(),
                job.status.to_string(),
                job.reason.clone(),
                job.chief_pod.clone().unwrap_or_else(|| "-".to_string()),
                job.pods.to_string(),
                job.restarts.to_string(),
                format!("{}/{}", job.allocated_gpu, job.requested_gpu),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let mut push_line = |cells: &[&str]| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    };
    push_line(&HEADERS);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        push_line(&cells);
    }
    out
}

pub fn render_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}
