//! `batch` subcommand: upload a directory of images to a running server and
//! poll until every task has a result.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Args;
use futures::future::join_all;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;

use crate::terminal_output::{self as out, paint, render_table, GREEN, RED};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// API server base URL
    #[arg(short, long, default_value = "http://localhost:8000")]
    pub server: String,

    /// Directory holding the test images
    #[arg(short, long, default_value = "./persistent_data/uploads")]
    pub dir: PathBuf,

    /// Number of images to upload
    #[arg(short, long = "num-images", default_value_t = 5)]
    pub num_images: usize,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    message: String,
    #[serde(default)]
    tasks: Vec<QueuedTask>,
    #[serde(default)]
    failures: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct QueuedTask {
    task_id: String,
    filename: String,
}

/// Image files in `dir` with a known extension, sorted by name, at most `limit`.
async fn collect_images(dir: &Path, limit: usize) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Cannot read image directory {}", dir.display()))?;
    let mut images = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_image = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()));
        if is_image && entry.file_type().await?.is_file() {
            images.push(path);
        }
    }
    images.sort();
    images.truncate(limit);
    Ok(images)
}

fn mime_for(path: &Path) -> &'static str {
    match fastocr_ocr::image_format(path) {
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

async fn upload(client: &reqwest::Client, server: &str, images: &[PathBuf]) -> Result<UploadResponse> {
    let mut form = Form::new();
    for path in images {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let part = Part::bytes(bytes).file_name(name).mime_str(mime_for(path))?;
        form = form.part("files", part);
    }

    let response = client
        .post(format!("{server}/upload"))
        .multipart(form)
        .send()
        .await
        .with_context(|| format!("Upload to {server} failed"))?;
    let status = response.status();
    if !status.is_success() {
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let detail = body.get("detail").and_then(Value::as_str).unwrap_or("no detail");
        bail!("Upload rejected ({status}): {detail}");
    }
    Ok(response.json().await?)
}

/// Whether the server reports `task_id` as completed. Transport errors and
/// non-200 answers count as not yet done.
async fn is_completed(client: &reqwest::Client, server: &str, task_id: &str) -> bool {
    let Ok(response) = client.get(format!("{server}/result/{task_id}")).send().await else {
        return false;
    };
    if !response.status().is_success() {
        return false;
    }
    match response.json::<Value>().await {
        Ok(body) => body.get("status").and_then(Value::as_str) == Some("completed"),
        Err(_) => false,
    }
}

pub async fn run(args: BatchArgs) -> Result<()> {
    let server = args.server.trim_end_matches('/').to_string();
    let images = collect_images(&args.dir, args.num_images).await?;
    if images.is_empty() {
        bail!("No image files found in {}", args.dir.display());
    }
    out::note_info(&format!("Found {} image file(s)", images.len()));

    let client = reqwest::Client::new();
    let started = Instant::now();
    out::note_info(&format!("Uploading {} image(s) to {server}", images.len()));
    let response = upload(&client, &server, &images).await?;
    out::note_success(&response.message);
    for filename in &response.failures {
        out::note_warn(&format!("Not queued: {filename}"));
    }

    let tasks = response.tasks;
    let total = tasks.len();
    let mut pending: BTreeSet<String> = tasks.iter().map(|t| t.task_id.clone()).collect();
    let mut finished_at = Vec::with_capacity(total);

    while !pending.is_empty() {
        tokio::time::sleep(POLL_INTERVAL).await;
        let ids: Vec<String> = pending.iter().cloned().collect();
        let checks = join_all(ids.iter().map(|id| is_completed(&client, &server, id))).await;
        for (id, done) in ids.into_iter().zip(checks) {
            if done {
                pending.remove(&id);
                finished_at.push((id, started.elapsed()));
            }
        }
        println!(
            "Progress: {}/{} completed, elapsed {:.2}s",
            total - pending.len(),
            total,
            started.elapsed().as_secs_f64()
        );
    }

    print!("{}", render_table(&["Task", "File", "Done after"], &summary_rows(&tasks, &finished_at)));
    out::note_success(&format!(
        "All tasks finished in {:.2}s",
        started.elapsed().as_secs_f64()
    ));
    Ok(())
}

fn summary_rows(tasks: &[QueuedTask], finished_at: &[(String, Duration)]) -> Vec<Vec<String>> {
    tasks
        .iter()
        .map(|task| {
            let done = finished_at
                .iter()
                .find(|(id, _)| *id == task.task_id)
                .map(|(_, d)| paint(GREEN, &format!("{:.2}s", d.as_secs_f64())))
                .unwrap_or_else(|| paint(RED, "pending"));
            vec![task.task_id.clone(), task.filename.clone(), done]
        })
        .collect()
}
