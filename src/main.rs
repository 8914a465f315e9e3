//! dicom-annotator CLI: render annotated frames and inspect the backend.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::{path::PathBuf, time::Duration};

use dicom_annotator::{
    client::{BackendClient, InferenceRecord, RemoteId, RequestContext},
    config::ViewerConfig,
    controller::ViewerController,
    enums::ViewerId,
    loader::DicomImageLoader,
    overlay::compose,
    polling::{BackendFeed, InferencePoller},
    session::ViewerEvent,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "dicom-annotator")]
#[command(about = "Render contour overlays on DICOM frames and talk to the inference backend")]
#[command(version)]
struct Cli {
    /// JSON configuration file; defaults are used when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one frame with its overlay into a PNG.
    Render(RenderArgs),

    /// List inference jobs, optionally watching for updates.
    Inferences(InferencesArgs),

    /// Download a DICOM file from the media store into the cache directory.
    Download {
        #[command(flatten)]
        auth: AuthArgs,

        /// File identifier in the registry.
        #[arg(long)]
        file: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ViewerArg {
    First,
    Second,
}

impl From<ViewerArg> for ViewerId {
    fn from(viewer: ViewerArg) -> Self {
        match viewer {
            ViewerArg::First => ViewerId::First,
            ViewerArg::Second => ViewerId::Second,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct RenderArgs {
    /// File identifier; `<cache_dir>/<file>.dcm` is read.
    #[arg(long, required_unless_present = "inference")]
    file: Option<String>,

    /// Frame to render when no inference record is given.
    #[arg(long, default_value = "0")]
    frame: usize,

    /// Inference record (JSON, as returned by the backend) to overlay.
    #[arg(long)]
    inference: Option<PathBuf>,

    /// Which viewer of the inference record to render.
    #[arg(long, value_enum, default_value = "first")]
    viewer: ViewerArg,

    /// Overlay canvas width in pixels.
    #[arg(long, default_value = "1024")]
    width: u32,

    /// Overlay canvas height in pixels.
    #[arg(long, default_value = "1024")]
    height: u32,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct AuthArgs {
    /// Session token; takes precedence over username/password.
    #[arg(long, env = "DICOM_ANNOTATOR_TOKEN")]
    token: Option<String>,

    #[arg(long, requires = "password")]
    username: Option<String>,

    #[arg(long, requires = "username")]
    password: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct InferencesArgs {
    #[command(flatten)]
    auth: AuthArgs,

    /// Keep polling for this many seconds.
    #[arg(long)]
    watch: Option<u64>,
}

async fn authenticate(
    client: &BackendClient,
    config: &ViewerConfig,
    auth: &AuthArgs,
) -> CliResult<RequestContext> {
    let ctx = config.request_context();
    if let Some(token) = &auth.token {
        return Ok(ctx.with_token(token));
    }
    match (&auth.username, &auth.password) {
        (Some(username), Some(password)) => {
            let token = client.login(&ctx, username, password).await?;
            Ok(ctx.with_token(token))
        }
        _ => Ok(ctx),
    }
}

/// Scrolling stops silently at the last frame, so the target is checked up front.
fn check_frame(frame: usize, total: usize) -> CliResult<()> {
    if frame >= total {
        return Err(format!("frame {frame} is outside 0..{total}").into());
    }
    Ok(())
}

async fn run_render(config: &ViewerConfig, args: &RenderArgs) -> CliResult<()> {
    let viewer = ViewerId::from(args.viewer);
    let mut controller = ViewerController::new(DicomImageLoader::new(&config.cache_dir), config);
    controller
        .handle(
            viewer,
            ViewerEvent::Resize {
                width: args.width,
                height: args.height,
            },
        )
        .await?;

    match (&args.inference, &args.file) {
        (Some(path), _) => {
            let record: InferenceRecord = serde_json::from_str(&std::fs::read_to_string(path)?)?;
            controller.open_inference(&record).await?;
            tracing::info!("Loaded inference record {}", record.id);
        }
        (None, Some(file)) => {
            controller.select_file(viewer, RemoteId::from(file.as_str())).await?;
            check_frame(args.frame, controller.workspace().viewer(viewer).total_frames())?;
            for _ in 0..args.frame {
                controller
                    .handle(viewer, ViewerEvent::Wheel { delta_y: 1.0 })
                    .await?;
            }
        }
        (None, None) => return Err("either --file or --inference is required".into()),
    }

    let session = controller.workspace().viewer(viewer);
    let frame = session.frame().ok_or("no frame was loaded")?;
    tracing::info!(
        "Frame {}/{} ({}x{})",
        session.current_frame() + 1,
        session.total_frames(),
        frame.width(),
        frame.height()
    );
    let output = compose(frame, session.canvas()).ok_or("overlay canvas has no area")?;
    output.save(&args.out)?;
    tracing::info!("Rendered frame written to {}", args.out.display());
    Ok(())
}

async fn run_inferences(config: &ViewerConfig, args: &InferencesArgs) -> CliResult<()> {
    let client = BackendClient::new();
    let ctx = authenticate(&client, config, &args.auth).await?;

    let Some(seconds) = args.watch else {
        for inference in client.list_inferences(&ctx).await? {
            println!(
                "{}\t{}\t{}\t{}\t{}",
                inference.id,
                inference.service.name,
                inference.user.username,
                inference.created_at,
                inference.status
            );
        }
        return Ok(());
    };

    let mut poller = InferencePoller::start(BackendFeed::new(client, ctx), config.poll_interval());
    let mut updates = poller.subscribe();
    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                println!("-- refresh {} --", snapshot.refreshes);
                for inference in snapshot.inferences {
                    println!("{}\t{}\t{}", inference.id, inference.service.name, inference.status);
                }
            }
        }
    }
    poller.stop();
    Ok(())
}

async fn run_download(config: &ViewerConfig, auth: &AuthArgs, file: &str) -> CliResult<()> {
    let client = BackendClient::new();
    let ctx = authenticate(&client, config, auth).await?;
    let path = client
        .download_dicom(&ctx, &RemoteId::from(file), &config.cache_dir)
        .await?;
    tracing::info!("Downloaded {}", path.display());
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ViewerConfig::from_json_file(path)?,
        None => ViewerConfig::default(),
    };

    match &cli.command {
        Commands::Render(args) => run_render(&config, args).await,
        Commands::Inferences(args) => run_inferences(&config, args).await,
        Commands::Download { auth, file } => run_download(&config, auth, file).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_past_the_stack_is_rejected() {
        assert!(check_frame(0, 1).is_ok());
        assert!(check_frame(4, 5).is_ok());
        let err = check_frame(5, 5).unwrap_err();
        assert_eq!(err.to_string(), "frame 5 is outside 0..5");
    }
}
