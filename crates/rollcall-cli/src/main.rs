use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rollcall_core::transport::{decode_data_url, is_data_url};
use rollcall_core::{normalize, DescriptorExtractor, OnnxExtractor};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    fn enroll(&self, identity: &str, image: &[u8]) -> zbus::Result<String>;
    fn enroll_embedding(&self, identity: &str, embedding: &[f64]) -> zbus::Result<String>;
    fn verify(&self, identity: &str, image: &[u8]) -> zbus::Result<String>;
    fn verify_embedding(&self, identity: &str, embedding: &[f64]) -> zbus::Result<String>;
    fn mark_attendance(
        &self,
        identity: &str,
        image: &[u8],
        latitude: f64,
        longitude: f64,
    ) -> zbus::Result<String>;
    fn list_enrolled(&self) -> zbus::Result<String>;
    fn remove_enrollment(&self, identity: &str) -> zbus::Result<bool>;
    fn delete_attendance(&self, event_id: &str) -> zbus::Result<bool>;
    fn attendance_history(&self, identity: &str) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face-verified attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Face to present: an image file (raw or containing a data URL), or with
/// `--embedding` a JSON array of numbers.
#[derive(Args, Debug)]
struct ProbeArgs {
    /// Image file, or embedding JSON file with --embedding
    source: PathBuf,
    /// Treat SOURCE as a JSON embedding array
    #[arg(long)]
    embedding: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Daemon(DaemonCommand),
    /// Decode an image locally and report what the pipeline would see
    Inspect {
        image: PathBuf,
        /// Also run face detection with the models in this directory
        #[arg(long)]
        models: Option<PathBuf>,
    },
}

/// Commands answered by rollcalld over D-Bus.
#[derive(Subcommand)]
enum DaemonCommand {
    /// Enroll an identity's reference face
    Enroll {
        identity: String,
        #[command(flatten)]
        probe: ProbeArgs,
    },
    /// Check whether a face belongs to an identity
    Verify {
        identity: String,
        #[command(flatten)]
        probe: ProbeArgs,
    },
    /// Verify a face and record today's attendance
    Mark {
        identity: String,
        /// Image file (raw or containing a data URL)
        image: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },
    /// List enrolled identities
    List,
    /// Remove an identity's enrollment (attendance history is kept)
    Remove { identity: String },
    /// Show attendance history, for one identity or everyone
    History { identity: Option<String> },
    /// Delete one attendance event by its id
    DeleteAttendance { event_id: String },
    /// Show daemon status
    Status,
}

/// Read an image file, unwrapping a `data:` URL if that is what it holds.
fn read_image(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if !is_data_url(&bytes) {
        return Ok(bytes);
    }
    let text = std::str::from_utf8(&bytes)
        .with_context(|| format!("{} looks like a data URL but is not UTF-8", path.display()))?;
    let decoded = decode_data_url(text)
        .with_context(|| format!("decoding data URL in {}", path.display()))?;
    tracing::debug!(path = %path.display(), bytes = decoded.len(), "unwrapped data URL");
    Ok(decoded)
}

fn read_embedding(path: &Path) -> Result<Vec<f64>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let values: Vec<f64> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of numbers", path.display()))?;
    if values.is_empty() {
        bail!("{} holds an empty embedding", path.display());
    }
    Ok(values)
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn inspect(path: &Path, models: Option<&Path>) -> Result<()> {
    let bytes = read_image(path)?;
    let format = image::guess_format(&bytes)
        .map(|f| format!("{f:?}"))
        .unwrap_or_else(|_| "unknown".to_string());
    let buffer = normalize(&bytes).with_context(|| format!("normalizing {}", path.display()))?;
    let (height, width, channels) = buffer.shape();

    println!("file:     {}", path.display());
    println!("bytes:    {}", bytes.len());
    println!("format:   {format}");
    println!("shape:    {height}x{width}x{channels} (RGB, 8-bit)");

    if let Some(dir) = models {
        let mut extractor = OnnxExtractor::load(dir)
            .with_context(|| format!("loading models from {}", dir.display()))?;
        let faces = extractor.extract(&buffer)?;
        let profile = extractor.profile();
        println!(
            "model:    {} ({}-d, tolerance {})",
            profile.model_version, profile.dimension, profile.tolerance
        );
        println!("faces:    {}", faces.len());
    }
    Ok(())
}

async fn connect(session: bool) -> Result<AttendanceProxy<'static>> {
    let connection = if session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("connecting to D-Bus")?;
    Ok(AttendanceProxy::new(&connection).await?)
}

async fn run(proxy: AttendanceProxy<'_>, command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Enroll { identity, probe } => {
            let reply = if probe.embedding {
                proxy
                    .enroll_embedding(&identity, &read_embedding(&probe.source)?)
                    .await?
            } else {
                proxy.enroll(&identity, &read_image(&probe.source)?).await?
            };
            print_json(&reply)
        }
        DaemonCommand::Verify { identity, probe } => {
            let reply = if probe.embedding {
                proxy
                    .verify_embedding(&identity, &read_embedding(&probe.source)?)
                    .await?
            } else {
                proxy.verify(&identity, &read_image(&probe.source)?).await?
            };
            print_json(&reply)
        }
        DaemonCommand::Mark {
            identity,
            image,
            lat,
            lon,
        } => {
            let reply = proxy
                .mark_attendance(&identity, &read_image(&image)?, lat, lon)
                .await?;
            print_json(&reply)
        }
        DaemonCommand::List => print_json(&proxy.list_enrolled().await?),
        DaemonCommand::Remove { identity } => {
            if proxy.remove_enrollment(&identity).await? {
                println!("removed {identity}");
            } else {
                println!("{identity} is not enrolled");
            }
            Ok(())
        }
        DaemonCommand::DeleteAttendance { event_id } => {
            if proxy.delete_attendance(&event_id).await? {
                println!("deleted attendance event {event_id}");
            } else {
                println!("no attendance event {event_id}");
            }
            Ok(())
        }
        DaemonCommand::History { identity } => {
            let reply = proxy
                .attendance_history(identity.as_deref().unwrap_or(""))
                .await?;
            print_json(&reply)
        }
        DaemonCommand::Status => print_json(&proxy.status().await?),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect { image, models } => inspect(&image, models.as_deref()),
        Commands::Daemon(command) => run(connect(cli.session).await?, command).await,
    }
}
