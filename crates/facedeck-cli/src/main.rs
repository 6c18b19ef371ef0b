use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use facedeck_client::{
    ApiClient, Config, Dashboard, FeedError, HealthStatus, LiveFeed, Notifier,
};
use facedeck_core::render::{
    decode_snapshot, CameraRow, EventRow, PersonRow, RecognitionCard, View,
};
use facedeck_core::types::{parse_query_time, HttpMethod};
use facedeck_core::{NewCamera, NewEventHandler, NewPerson, RecognitionQuery, RecognitionResult};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

mod console;

use console::{confirm, print_panel, ConsoleNotifier};

#[derive(Parser)]
#[command(name = "facedeck", about = "Face recognition appliance dashboard")]
struct Cli {
    /// Dashboard API origin (overrides config and FACEDECK_API_BASE)
    #[arg(long, global = true)]
    api: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API and appliance connectivity
    Health,
    /// Manage cameras
    #[command(subcommand)]
    Cameras(CameraCommand),
    /// Manage registered persons
    #[command(subcommand)]
    Persons(PersonCommand),
    /// Manage recognition event handlers
    #[command(subcommand)]
    Events(EventCommand),
    /// Query recognition history (default: the last 24 hours)
    Recognitions {
        /// Window start, e.g. 2024-05-01T00:00
        #[arg(long, value_parser = parse_query_time)]
        start: Option<chrono::NaiveDateTime>,
        /// Window end, e.g. 2024-05-02T00:00
        #[arg(long, value_parser = parse_query_time)]
        end: Option<chrono::NaiveDateTime>,
        /// Only results for this person ID
        #[arg(long)]
        person: Option<String>,
        /// Only results from this camera ID
        #[arg(long)]
        camera: Option<String>,
    },
    /// Stream live recognitions (Enter toggles the connection, q quits)
    Live {
        /// Number of recent recognitions kept
        #[arg(long)]
        capacity: Option<usize>,
    },
    /// Refresh health and cameras periodically until interrupted
    Watch,
    /// Appliance token management
    #[command(subcommand)]
    Token(TokenCommand),
}

#[derive(Subcommand)]
enum CameraCommand {
    /// List registered cameras
    List,
    /// Register a camera
    Add(CameraArgs),
    /// Change a camera's settings
    Update {
        id: String,
        #[command(flatten)]
        camera: CameraArgs,
    },
    /// Select a camera and print its live stream URL
    View { id: String },
    /// Save a still frame from a camera
    Snapshot {
        id: String,
        /// Output file
        #[arg(short, long, default_value = "snapshot.jpg")]
        output: PathBuf,
        /// Keep refreshing the file until interrupted
        #[arg(long)]
        follow: bool,
    },
}

#[derive(Args)]
struct CameraArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    ip: String,
    #[arg(long, default_value_t = 554)]
    port: u16,
    #[arg(long, default_value = "admin")]
    username: String,
    #[arg(long)]
    password: String,
}

impl From<CameraArgs> for NewCamera {
    fn from(args: CameraArgs) -> Self {
        Self {
            name: args.name,
            ip: args.ip,
            port: args.port,
            username: args.username,
            password: args.password,
        }
    }
}

#[derive(Subcommand)]
enum PersonCommand {
    /// List registered persons
    List,
    /// Register a person
    Add(PersonArgs),
    /// Change a person's details or photo
    Update {
        id: String,
        #[command(flatten)]
        person: PersonArgs,
    },
    /// Remove a person
    Delete {
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Args)]
struct PersonArgs {
    #[arg(long)]
    fullname: String,
    #[arg(long)]
    employeeno: Option<String>,
    /// Face photo (JPEG, PNG, BMP or WebP)
    #[arg(long)]
    photo: Option<PathBuf>,
}

impl PersonArgs {
    async fn into_person(self) -> Result<NewPerson> {
        let photo = match &self.photo {
            Some(path) => Some(read_photo(path).await?),
            None => None,
        };
        Ok(NewPerson {
            fullname: self.fullname,
            employeeno: self.employeeno,
            photo,
        })
    }
}

#[derive(Subcommand)]
enum EventCommand {
    /// List event handlers
    List,
    /// Create an event handler
    Add(EventArgs),
    /// Change an event handler
    Update {
        id: String,
        #[command(flatten)]
        handler: EventArgs,
    },
    /// Remove an event handler
    Delete {
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Args)]
struct EventArgs {
    #[arg(long)]
    name: String,
    /// Webhook URL called on each recognition
    #[arg(long)]
    url: String,
    #[arg(long, default_value = "POST")]
    method: HttpMethod,
    /// Create the handler disabled
    #[arg(long)]
    disabled: bool,
}

impl From<EventArgs> for NewEventHandler {
    fn from(args: EventArgs) -> Self {
        Self {
            name: args.name,
            url: args.url,
            method: args.method,
            enable: !args.disabled,
        }
    }
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Force the gateway to obtain a new appliance token
    Refresh,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(api) = &cli.api {
        config = config.with_api_base(api)?;
    }
    tracing::debug!(api = %config.api_base, "configuration loaded");

    let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier);
    let api = ApiClient::new(&config)?;
    let dashboard = Dashboard::new(api.clone(), Arc::clone(&notifier));

    match cli.command {
        Commands::Health => {
            let status = dashboard.check_health().await;
            println!("{}", status.label());
            if status != HealthStatus::Connected {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Cameras(command) => return cameras(&dashboard, &config, command).await,
        Commands::Persons(command) => return persons(&dashboard, command).await,
        Commands::Events(command) => return events(&dashboard, command).await,
        Commands::Recognitions {
            start,
            end,
            person,
            camera,
        } => {
            let mut query = RecognitionQuery::last_day(Local::now().naive_local());
            query.start_time = start.or(query.start_time);
            query.end_time = end.or(query.end_time);
            query.person_id = person;
            query.camera_id = camera;
            print_panel(
                View::Recognitions,
                dashboard.query_recognitions(&query).await,
                RecognitionCard::new,
            );
        }
        Commands::Live { capacity } => {
            if let Some(capacity) = capacity {
                config.history_capacity = capacity;
            }
            live(LiveFeed::from_config(api, &config, notifier)).await?;
        }
        Commands::Watch => watch(&dashboard, &config).await?,
        Commands::Token(TokenCommand::Refresh) => {
            let token = api.refresh_token().await?;
            println!(
                "{}",
                token.message.as_deref().unwrap_or("Token refreshed")
            );
            if let Some(expires_at) = &token.expires_at {
                println!("expires at {expires_at}");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Failed actions were already reported by the notifier.
fn outcome<T>(result: facedeck_client::Result<T>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

async fn cameras(dashboard: &Dashboard, config: &Config, command: CameraCommand) -> Result<ExitCode> {
    let code = match command {
        CameraCommand::List => {
            print_panel(View::Cameras, dashboard.load_cameras().await, |c| CameraRow::from(c));
            ExitCode::SUCCESS
        }
        CameraCommand::Add(args) => {
            let result = dashboard.add_camera(&args.into()).await;
            if let Ok(panel) = &result {
                print_panel(View::Cameras, panel.clone(), |c| CameraRow::from(c));
            }
            outcome(result)
        }
        CameraCommand::Update { id, camera } => {
            let result = dashboard.update_camera(&id, &camera.into()).await;
            if let Ok(panel) = &result {
                print_panel(View::Cameras, panel.clone(), |c| CameraRow::from(c));
            }
            outcome(result)
        }
        CameraCommand::View { id } => {
            if let Some(url) = dashboard.select_camera(Some(id.as_str()))? {
                let panel = dashboard.load_cameras().await;
                let label = panel
                    .as_ref()
                    .and_then(|p| p.items().iter().find(|c| c.id == id))
                    .map_or(id.as_str(), |c| c.label());
                println!("{label}: {url}");
            }
            ExitCode::SUCCESS
        }
        CameraCommand::Snapshot { id, output, follow } => {
            let frame = dashboard.api().fetch_snapshot(&id).await?;
            write_frame(&output, &frame).await?;
            if follow {
                follow_snapshots(dashboard, config, &id, &output).await?;
            }
            ExitCode::SUCCESS
        }
    };
    Ok(code)
}

async fn write_frame(output: &Path, frame: &[u8]) -> Result<()> {
    tokio::fs::write(output, frame)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;
    tracing::debug!(path = %output.display(), bytes = frame.len(), "snapshot saved");
    Ok(())
}

async fn follow_snapshots(dashboard: &Dashboard, config: &Config, id: &str, output: &Path) -> Result<()> {
    dashboard.select_camera(Some(id))?;
    println!("Refreshing {} (Ctrl-C to stop)", output.display());

    let mut ticker = tokio::time::interval(config.snapshot_interval());
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A failed frame keeps the previous one on disk.
                match dashboard.selected_snapshot().await {
                    Ok(Some(frame)) => write_frame(output, &frame).await?,
                    Ok(None) => break,
                    Err(e) => tracing::warn!(camera = id, error = %e, "snapshot refresh failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    dashboard.select_camera(None)?;
    Ok(())
}

async fn persons(dashboard: &Dashboard, command: PersonCommand) -> Result<ExitCode> {
    let result = match command {
        PersonCommand::List => {
            print_panel(View::Persons, dashboard.load_persons().await, |p| PersonRow::from(p));
            return Ok(ExitCode::SUCCESS);
        }
        PersonCommand::Add(args) => dashboard.add_person(&args.into_person().await?).await,
        PersonCommand::Update { id, person } => {
            dashboard.update_person(&id, &person.into_person().await?).await
        }
        PersonCommand::Delete { id, yes } => {
            if !yes && !confirm("Are you sure you want to delete this person?")? {
                return Ok(ExitCode::SUCCESS);
            }
            dashboard.delete_person(&id).await
        }
    };
    if let Ok(panel) = &result {
        print_panel(View::Persons, panel.clone(), |p| PersonRow::from(p));
    }
    Ok(outcome(result))
}

async fn read_photo(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read photo {}", path.display()))
}

async fn events(dashboard: &Dashboard, command: EventCommand) -> Result<ExitCode> {
    let result = match command {
        EventCommand::List => {
            print_panel(View::Events, dashboard.load_events().await, |e| EventRow::from(e));
            return Ok(ExitCode::SUCCESS);
        }
        EventCommand::Add(args) => dashboard.add_event(&args.into()).await,
        EventCommand::Update { id, handler } => dashboard.update_event(&id, &handler.into()).await,
        EventCommand::Delete { id, yes } => {
            if !yes && !confirm("Are you sure you want to delete this event?")? {
                return Ok(ExitCode::SUCCESS);
            }
            dashboard.delete_event(&id).await
        }
    };
    if let Ok(panel) = &result {
        print_panel(View::Events, panel.clone(), |e| EventRow::from(e));
    }
    Ok(outcome(result))
}

/// Interactive live feed: each line on stdin toggles the connection.
async fn live(feed: LiveFeed) -> Result<()> {
    let feed = Arc::new(feed);
    let mut updates = feed.updates();
    let mut states = feed.transitions();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!(
        "Live feed {} (keeps {} recognitions). Enter: {}, h: history, s: save latest snapshot, q: quit",
        feed.state().label(),
        feed.capacity(),
        feed.state().action_label()
    );

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.context("failed to read stdin")?;
                match line.as_deref().map(str::trim) {
                    None | Some("q") | Some("quit") => break,
                    Some("h") | Some("history") => {
                        for result in feed.history() {
                            println!("{}", RecognitionCard::new(&result));
                        }
                    }
                    Some("s") | Some("save") => match feed.latest() {
                        Some(result) => save_recognition_snapshot(&result).await,
                        None => println!("No recognitions yet"),
                    },
                    Some(_) => {
                        let feed = Arc::clone(&feed);
                        tokio::spawn(async move {
                            if let Err(FeedError::Busy) = feed.toggle().await {
                                println!("Connection attempt already in progress");
                            }
                        });
                    }
                }
            }
            update = updates.recv() => match update {
                Ok(result) => println!("{}", RecognitionCard::new(&result)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "display fell behind the live feed");
                }
                Err(RecvError::Closed) => break,
            },
            state = states.recv() => match state {
                Ok(state) => println!("[{}] Enter: {}", state.label(), state.action_label()),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    feed.disconnect();
    if feed.dropped() > 0 {
        tracing::info!(dropped = feed.dropped(), "malformed live messages ignored");
    }
    Ok(())
}

/// Write a recognition's snapshot next to the working directory.
async fn save_recognition_snapshot(result: &RecognitionResult) {
    let frame = match decode_snapshot(&result.snapshot) {
        Ok(frame) if !frame.is_empty() => frame,
        Ok(_) => {
            println!("Recognition has no snapshot");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "undecodable recognition snapshot");
            println!("Snapshot could not be decoded");
            return;
        }
    };
    let path = format!("recognition-{}.jpg", result.timestamp);
    match tokio::fs::write(&path, &frame).await {
        Ok(()) => println!("Saved {path} ({} bytes)", frame.len()),
        Err(e) => eprintln!("failed to write {path}: {e}"),
    }
}

/// Background refresh of the health indicator and camera list.
async fn watch(dashboard: &Dashboard, config: &Config) -> Result<()> {
    let mut ticker = tokio::time::interval(config.refresh_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                println!("--- {} ---", Local::now().format("%Y-%m-%d %H:%M:%S"));
                println!("{}", dashboard.check_health().await.label());
                print_panel(View::Cameras, dashboard.load_cameras().await, |c| CameraRow::from(c));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
