//! Server-rendered HTML pages.

use std::fmt::Write as _;

use axum::extract::{Path, State};
use axum::response::Html;
use vpose_models::options::{MAX_FRAME_STRIDE, MAX_TARGET_WIDTH, MIN_TARGET_WIDTH};
use vpose_models::{JobRecord, JobState};

use crate::error::ApiResult;
use crate::handlers::jobs::find_job;
use crate::state::AppState;

/// Number of jobs listed under the upload form.
const RECENT_JOBS_ON_INDEX: usize = 10;

/// Seconds between reloads of an unfinished job page.
const REFRESH_SECS: u32 = 2;

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; max-width: 44rem; margin: 2rem auto; padding: 0 1rem; color: #1d2430; }
h1 { font-size: 1.6rem; }
form { border: 1px solid #d5dae1; border-radius: 8px; padding: 1.25rem; background: #f7f9fb; }
label { display: block; margin: 0.6rem 0 0.2rem; font-weight: 600; }
input[type=number] { width: 7rem; }
button, .button { margin-top: 1rem; padding: 0.5rem 1.2rem; border: 0; border-radius: 6px; background: #2563eb; color: #fff; text-decoration: none; cursor: pointer; display: inline-block; }
table { border-collapse: collapse; width: 100%; margin-top: 1rem; }
td, th { text-align: left; padding: 0.35rem 0.5rem; border-bottom: 1px solid #e3e7ec; }
.state-completed { color: #15803d; } .state-failed { color: #b91c1c; }
.progress { height: 10px; background: #e3e7ec; border-radius: 5px; overflow: hidden; }
.progress > div { height: 100%; background: #2563eb; }
.muted { color: #6b7480; font-size: 0.9rem; }
"#;

/// Escape text for HTML element and attribute content.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Wrap a body in the shared page layout.
pub(crate) fn layout(title: &str, head_extra: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         {head_extra}<title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        title = html_escape(title),
    ))
}

/// Upload form plus the most recent jobs.
pub async fn index_page(State(state): State<AppState>) -> Html<String> {
    let jobs = state.registry.list_recent(RECENT_JOBS_ON_INDEX).await;
    let limit_mib = state.config.max_upload_bytes / (1024 * 1024);
    let defaults = state.executor.config().default_options;
    let (stride, width) = (defaults.frame_stride, defaults.target_width);

    let mut body = String::new();
    body.push_str("<h1>Pose overlay</h1>\n");
    let _ = write!(
        body,
        "<p>Upload a video to draw the detected body skeleton on it. \
         Every {stride}th frame is analysed and the result is scaled to \
         {width}px wide.</p>\n\
         <form action=\"/upload\" method=\"post\" enctype=\"multipart/form-data\">\n\
         <label for=\"video\">Video file</label>\n\
         <input id=\"video\" type=\"file\" name=\"video\" accept=\"video/*\" required>\n\
         <p class=\"muted\">Up to {limit_mib} MiB.</p>\n\
         <label for=\"frame_stride\">Analyse every Nth frame</label>\n\
         <input id=\"frame_stride\" type=\"number\" name=\"frame_stride\" min=\"1\" max=\"{MAX_FRAME_STRIDE}\" placeholder=\"{stride}\">\n\
         <label for=\"target_width\">Output width (px)</label>\n\
         <input id=\"target_width\" type=\"number\" name=\"target_width\" min=\"{MIN_TARGET_WIDTH}\" max=\"{MAX_TARGET_WIDTH}\" step=\"2\" placeholder=\"{width}\">\n\
         <br><button type=\"submit\">Upload and process</button>\n\
         </form>\n"
    );

    if !jobs.is_empty() {
        body.push_str("<h2>Recent jobs</h2>\n<table>\n<tr><th>File</th><th>Status</th><th>Created</th></tr>\n");
        for job in &jobs {
            let _ = writeln!(
                body,
                "<tr><td><a href=\"/jobs/{id}/view\">{name}</a></td><td class=\"state-{state}\">{state}</td><td>{created}</td></tr>",
                id = job.id,
                name = html_escape(&job.original_filename),
                state = job.state,
                created = job.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            );
        }
        body.push_str("</table>\n");
    }

    layout("Pose overlay", "", &body)
}

/// HTML status page for one job.
pub async fn job_page(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Html<String>> {
    let job = find_job(&state, &job_id).await?;
    Ok(render_job(&job))
}

/// Page shown right after a browser upload.
pub(crate) fn accepted_page(job: &JobRecord) -> Html<String> {
    let body = format!(
        "<h1>Upload received</h1>\n<p><strong>{name}</strong> ({size}) is queued for processing.</p>\n\
         <p><a class=\"button\" href=\"/jobs/{id}/view\">Follow progress</a></p>\n\
         <p><a href=\"/\">Upload another video</a></p>",
        name = html_escape(&job.original_filename),
        size = format_bytes(job.input_bytes),
        id = job.id,
    );
    layout("Upload received", "", &body)
}

fn render_job(job: &JobRecord) -> Html<String> {
    let refresh = if job.state.is_terminal() {
        String::new()
    } else {
        format!("<meta http-equiv=\"refresh\" content=\"{REFRESH_SECS}\">\n")
    };

    let mut body = String::new();
    let _ = write!(
        body,
        "<h1>{name}</h1>\n<p>Status: <strong class=\"state-{state}\">{state}</strong></p>\n",
        name = html_escape(&job.original_filename),
        state = job.state,
    );

    match job.state {
        JobState::Pending => body.push_str("<p>Waiting for a free worker.</p>\n"),
        JobState::Processing => {
            let p = &job.progress;
            if let Some(pct) = p.percent() {
                let _ = write!(
                    body,
                    "<div class=\"progress\"><div style=\"width: {pct}%\"></div></div>\n<p class=\"muted\">{pct}%</p>\n"
                );
            }
            let _ = writeln!(
                body,
                "<p>{} frames written, pose found in {}.</p>",
                p.frames_written, p.frames_with_pose
            );
        }
        JobState::Completed => {
            if let Some(report) = &job.report {
                let _ = writeln!(
                    body,
                    "<p>{} of {} source frames kept at {}x{}, {:.2} fps. Pose found in {} frames.</p>",
                    report.frames_written,
                    report.frames_read,
                    report.output_width,
                    report.output_height,
                    report.output_fps,
                    report.frames_with_pose,
                );
            }
            let _ = writeln!(
                body,
                "<p><a class=\"button\" href=\"/download/{}\">Download {}</a></p>",
                job.id,
                html_escape(&job.download_filename()),
            );
        }
        JobState::Failed => {
            let _ = writeln!(
                body,
                "<p class=\"state-failed\">{}</p>",
                html_escape(job.error_message.as_deref().unwrap_or("Processing failed"))
            );
        }
    }

    body.push_str("<p><a href=\"/\">Upload another video</a></p>");
    layout(&job.original_filename, &refresh, &body)
}

fn format_bytes(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    if bytes as f64 >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB)
    } else {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    }
}
