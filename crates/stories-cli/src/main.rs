//! # stories: command-line client for the story search API
//!
//! - `stories all --filter <text>`: page through `/api/all`.
//! - `stories search --author NASA --lat 20 --lng 10`: structured search.
//! - `stories explain <text>`: show what a filter string compiles to, offline.
//! - `stories preprocess <in> <out>`: collapse `frames` into `my_framecount`.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tabled::{Table, Tabled};

use stories_core::{DateFilter, GeoFilter, RawStory, SearchRequest, StoryFormat, StoryHit};

/// Query a running stories-hub.
#[derive(Parser)]
#[command(name = "stories", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stories matching a filter string.
    All {
        /// e.g. `after:2025-01-01 author:"NASA" wildfire`
        #[arg(long, default_value = "")]
        filter: String,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },

    /// Structured search (geo results come back nearest first).
    Search {
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// `raw` or `mp4`
        #[arg(long)]
        format: Option<StoryFormat>,
        #[arg(long, requires = "lng", allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lng: Option<f64>,
        /// Kilometers (default: 50).
        #[arg(long)]
        radius: Option<f64>,
        /// Inclusive lower date bound.
        #[arg(long)]
        start: Option<String>,
        /// Inclusive upper date bound.
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        public: Option<bool>,
    },

    /// Fetch one story by id.
    Story { id: String },

    /// Aggregate counts and the creation date range.
    Stats,

    /// Column layout and one sample row.
    Schema,

    /// Show the predicates and SQL a filter string compiles to.
    Explain { filter: String },

    /// Rewrite a raw story dump, replacing `frames` with `my_framecount`.
    Preprocess { input: PathBuf, output: PathBuf },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Explain { filter } => {
            let parsed = stories_core::parse(&filter);
            let query = stories_core::compile(&parsed.predicates, &parsed.free_text);
            println!("{}", pretty(&parsed));
            println!();
            print!("{}", query.explain());
        }

        Commands::Preprocess { input, output } => match preprocess_file(&input, &output) {
            Ok(count) => eprintln!(
                "Wrote {} stories from {} to {}",
                count,
                input.display(),
                output.display()
            ),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },

        // Async Commands
        cmd => {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("Failed to build tokio runtime: {}", e);
                    std::process::exit(1);
                }
            };
            if let Err(e) = rt.block_on(async_main(cmd)) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

// =============================================================================
// Remote Commands
// =============================================================================

#[derive(Deserialize)]
struct AllPage {
    stories: Vec<StoryHit>,
    total: u64,
    unique_authors: u64,
    limit: u32,
    offset: u32,
}

#[derive(Deserialize)]
struct SearchPage {
    count: usize,
    results: Vec<StoryHit>,
}

async fn async_main(cmd: Commands) -> Result<(), String> {
    let client = reqwest::Client::new();
    let base_url =
        std::env::var("STORIES_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:8000".to_string());

    match cmd {
        Commands::All {
            filter,
            limit,
            offset,
        } => {
            let mut params = vec![("filter", filter)];
            if let Some(limit) = limit {
                params.push(("limit", limit.to_string()));
            }
            if let Some(offset) = offset {
                params.push(("offset", offset.to_string()));
            }
            let url = format!("{}/api/all", base_url);
            let resp = client.get(&url).query(&params).send().await;
            let page: AllPage = read_json(resp).await?;

            println!("{}", story_table(&page.stories));
            println!(
                "{}..{} of {} ({} authors)",
                page.offset,
                page.offset as usize + page.stories.len(),
                page.total,
                page.unique_authors
            );
            if (page.offset as u64 + page.limit as u64) < page.total {
                println!("next: --offset {}", page.offset + page.limit);
            }
        }

        Commands::Search {
            text,
            author,
            format,
            lat,
            lng,
            radius,
            start,
            end,
            public,
        } => {
            let request = build_search(text, author, format, lat, lng, radius, start, end, public);
            let url = format!("{}/api/search", base_url);
            let resp = client.post(&url).json(&request).send().await;
            let page: SearchPage = read_json(resp).await?;

            println!("{}", story_table(&page.results));
            println!("{} results", page.count);
        }

        Commands::Story { id } => {
            let url = format!("{}/api/story/{}", base_url, id);
            let json: serde_json::Value = read_json(client.get(&url).send().await).await?;
            println!("{}", pretty(&json));
        }

        Commands::Stats => {
            let url = format!("{}/api/stats", base_url);
            let json: serde_json::Value = read_json(client.get(&url).send().await).await?;
            println!("{}", pretty(&json));
        }

        Commands::Schema => {
            let url = format!("{}/api/schema", base_url);
            let json: serde_json::Value = read_json(client.get(&url).send().await).await?;
            println!("{}", pretty(&json));
        }

        Commands::Explain { .. } | Commands::Preprocess { .. } => {}
    }

    Ok(())
}

/// Decode a success body, or surface the hub's `{"error": ...}` message.
async fn read_json<T: serde::de::DeserializeOwned>(
    resp: Result<reqwest::Response, reqwest::Error>,
) -> Result<T, String> {
    let resp = resp.map_err(|e| e.to_string())?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.json::<serde_json::Value>().await.unwrap_or_default();
        let message = body
            .get("error")
            .and_then(|e| e.as_str())
            .unwrap_or("no error message");
        return Err(format!("{}: {}", status, message));
    }
    resp.json::<T>().await.map_err(|e| e.to_string())
}

#[allow(clippy::too_many_arguments)]
fn build_search(
    text: Option<String>,
    author: Option<String>,
    format: Option<StoryFormat>,
    lat: Option<f64>,
    lng: Option<f64>,
    radius: Option<f64>,
    start: Option<String>,
    end: Option<String>,
    public: Option<bool>,
) -> SearchRequest {
    let geo = match (lat, lng) {
        (Some(lat), Some(lng)) => Some(GeoFilter {
            lat,
            lng,
            radius: radius.unwrap_or(stories_core::compiler::DEFAULT_GEO_RADIUS_KM),
        }),
        _ => None,
    };
    let date = (start.is_some() || end.is_some()).then_some(DateFilter { start, end });

    SearchRequest {
        text,
        geo,
        date,
        author,
        format,
        public,
    }
}

// =============================================================================
// Output
// =============================================================================

#[derive(Tabled)]
struct StoryRow {
    id: String,
    created: String,
    author: String,
    format: String,
    title: String,
    #[tabled(rename = "km")]
    distance: String,
}

const TITLE_WIDTH: usize = 48;

impl From<&StoryHit> for StoryRow {
    fn from(hit: &StoryHit) -> Self {
        let story = &hit.story;
        let mut title: String = story.title.chars().take(TITLE_WIDTH).collect();
        if story.title.chars().count() > TITLE_WIDTH {
            title.push('…');
        }
        Self {
            id: story.id.clone(),
            created: story.created.clone(),
            author: story.author.clone().unwrap_or_default(),
            format: story.format.to_string(),
            title,
            distance: hit
                .distance_km
                .map(|d| format!("{:.1}", d))
                .unwrap_or_default(),
        }
    }
}

fn story_table(hits: &[StoryHit]) -> String {
    Table::new(hits.iter().map(StoryRow::from)).to_string()
}

fn pretty<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unprintable: {}>", e))
}

// =============================================================================
// Preprocess
// =============================================================================

/// Replace each story's `frames` array by its length in `my_framecount`.
fn preprocess(stories: Vec<RawStory>) -> Vec<RawStory> {
    stories
        .into_iter()
        .map(|mut story| {
            story.my_framecount = Some(story.frame_count());
            story.frames = None;
            story
        })
        .collect()
}

fn preprocess_file(input: &Path, output: &Path) -> Result<usize, String> {
    let content = std::fs::read_to_string(input)
        .map_err(|e| format!("failed to read {}: {}", input.display(), e))?;
    let stories: Vec<RawStory> = serde_json::from_str(&content)
        .map_err(|e| format!("{} is not a story array: {}", input.display(), e))?;

    let stories = preprocess(stories);
    let json = serde_json::to_string_pretty(&stories).map_err(|e| e.to_string())?;
    std::fs::write(output, json)
        .map_err(|e| format!("failed to write {}: {}", output.display(), e))?;
    Ok(stories.len())
}
