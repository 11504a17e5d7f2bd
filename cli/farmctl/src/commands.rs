//! farmctl commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tabled::{Table, Tabled};

use farm_partition::partition_frames;
use farm_types::{FrameRange, Job};

use crate::client::ApiClient;

/// CLI for the renderfarm backend.
#[derive(Debug, Parser)]
#[command(name = "farmctl", version, about)]
pub struct Cli {
    /// Backend API base url.
    #[arg(long, env = "FARM_API_URL", default_value = "http://127.0.0.1:8080/v1")]
    api_url: String,

    /// API key for task-scoped calls.
    #[arg(long, env = "FARM_ACCESS_KEY", hide_env_values = true)]
    access_key: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit a render job: create it, upload the scene and start it.
    Submit(SubmitArgs),

    /// Show a job's current state.
    Status(StatusArgs),
}

#[derive(Debug, Args)]
struct SubmitArgs {
    /// Scene file to render.
    scene: PathBuf,

    /// First frame, inclusive.
    #[arg(long)]
    frame_start: i64,

    /// Last frame, inclusive.
    #[arg(long)]
    frame_end: i64,

    /// Maximum number of workers rendering concurrently.
    #[arg(long, default_value_t = 1)]
    parallelism: u32,

    /// Service class that executes the job.
    #[arg(long)]
    container: String,
}

#[derive(Debug, Args)]
struct StatusArgs {
    /// Job id.
    job: String,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let client = ApiClient::new(&self.api_url, &self.access_key)?;

        match self.command {
            Command::Submit(args) => submit(client, args).await,
            Command::Status(args) => status(client, args).await,
        }
    }
}

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "State")]
    state: String,

    #[tabled(rename = "Frames")]
    frames: String,

    #[tabled(rename = "Parallelism")]
    parallelism: u32,

    #[tabled(rename = "Container")]
    container: String,

    #[tabled(rename = "Updated")]
    updated: String,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            state: job.state.to_string(),
            frames: format!("{}-{}", job.frame_range.start, job.frame_range.end),
            parallelism: job.parallelism,
            container: job.container_name.clone(),
            updated: job.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Tabled)]
struct BatchRow {
    #[tabled(rename = "Batch")]
    batch: usize,

    #[tabled(rename = "Frames")]
    frames: String,

    #[tabled(rename = "Count")]
    count: i64,
}

async fn submit(client: ApiClient, args: SubmitArgs) -> Result<()> {
    anyhow::ensure!(
        args.frame_start <= args.frame_end,
        "frame range is empty: {} > {}",
        args.frame_start,
        args.frame_end
    );

    let frame_range = FrameRange::new(args.frame_start, args.frame_end);

    let job = client
        .create_job(frame_range, args.parallelism, &args.container)
        .await
        .context("failed to create job")?;

    let job = client
        .upload_scene(&job.id, &args.scene)
        .await
        .context("failed to upload scene")?;

    let job = client
        .transition_job(&job.id, "start")
        .await
        .context("failed to start job")?;

    println!("{} Job {} submitted", "✓".green().bold(), job.id.bold());
    println!("{}", Table::new([JobRow::from(&job)]));

    // How the farm will split the range across workers.
    let batches: Vec<BatchRow> = partition_frames(frame_range.start, frame_range.end, job.parallelism)
        .into_iter()
        .enumerate()
        .map(|(index, range)| BatchRow {
            batch: index + 1,
            frames: format!("{}-{}", range.start, range.end),
            count: range.frame_count(),
        })
        .collect();
    println!("{}", Table::new(batches));

    Ok(())
}

async fn status(client: ApiClient, args: StatusArgs) -> Result<()> {
    let job = client.get_job(&args.job).await?;
    println!("{}", Table::new([JobRow::from(&job)]));
    Ok(())
}
