//! # Example Runner
//!
//! Renders one of the sample programs headlessly for a number of frames and
//! optionally writes the last presented frame to a PNG file.
//!
//! ```bash
//! # List the available examples
//! run_example --list
//!
//! # Render 120 frames of the instanced cube and save the last one
//! run_example instanced_cube --frames 120 --output cube.png
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use redlilium_frame::{BackendType, InstanceParameters, QueueMode};
use redlilium_frame_demos::{find_example, run_frames, ExampleContext, EXAMPLES};

/// Queue execution mode selection for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliQueueMode {
    /// Execute submissions on the queue worker thread.
    #[default]
    Threaded,
    /// Execute submissions synchronously inside `submit`.
    Inline,
}

impl From<CliQueueMode> for QueueMode {
    fn from(cli: CliQueueMode) -> Self {
        match cli {
            CliQueueMode::Threaded => QueueMode::Threaded,
            CliQueueMode::Inline => QueueMode::Inline,
        }
    }
}

/// RedLilium frame example runner.
#[derive(Parser, Debug)]
#[command(
    name = "run_example",
    about = "Render a RedLilium frame example headlessly",
    version
)]
struct Args {
    /// Example to run.
    #[arg(default_value = "hello_triangle")]
    example: String,

    /// Number of frames to render.
    #[arg(long, default_value = "60")]
    frames: u64,

    /// Surface width in pixels.
    #[arg(long, default_value = "800")]
    width: u32,

    /// Surface height in pixels.
    #[arg(long, default_value = "600")]
    height: u32,

    /// Simulated display refresh rate used to compute elapsed time.
    #[arg(long, default_value = "60")]
    refresh_rate: u32,

    /// Queue execution mode.
    #[arg(long, value_enum)]
    queue: Option<CliQueueMode>,

    /// Disable submit-time resource validation.
    #[arg(long)]
    no_validation: bool,

    /// Write the last presented frame to this PNG file.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Default log filter, overridden by `RUST_LOG`.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// List the available examples and exit.
    #[arg(long)]
    list: bool,
}

impl Args {
    fn instance_parameters(&self) -> InstanceParameters {
        // REDLILIUM_QUEUE applies unless --queue is given
        let mut parameters = InstanceParameters::from_env()
            .with_backend(BackendType::Software)
            .with_validation(!self.no_validation);
        if let Some(queue) = self.queue {
            parameters = parameters.with_queue_mode(queue.into());
        }
        parameters
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.list {
        for example in &EXAMPLES {
            println!("{:<20} {}", example.name, example.description);
        }
        return Ok(());
    }

    let example = find_example(&args.example).ok_or_else(|| format!("unknown example '{}'", args.example))?;
    log::info!("Running {} ({} frames)", example.title, args.frames);

    let (ctx, surface) = ExampleContext::headless(&args.instance_parameters(), args.width, args.height)?;
    let mut callback = (example.init)(&ctx)?;
    let interval = Duration::from_secs(1) / args.refresh_rate.max(1);
    run_frames(ctx.device(), &mut callback, args.frames, interval)?;

    if let Some(path) = &args.output {
        let frame = surface.latest_frame().ok_or("no frame was presented")?;
        let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.pixels)
            .ok_or("presented frame has an unexpected size")?;
        image.save(path)?;
        log::info!("Wrote {}", path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level.as_str())).init();

    log::info!("Frame version: {}", redlilium_frame::VERSION);
    redlilium_frame::init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
