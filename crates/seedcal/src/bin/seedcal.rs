//! seedcal CLI: calibrate photographs against the reference chart and
//! measure the seeds on them.

use clap::{ArgAction, Args, Parser, Subcommand};
use seedcal::chart::ReferenceChart;
use seedcal::core::{ColorSpace, LogConfig};
use seedcal::detect;
use seedcal::io::{EvaluationReport, PipelineConfig, RunReport};
use seedcal::{candidate_models, PipelineError};
use std::path::{Path, PathBuf};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "seedcal")]
#[command(about = "Color-calibrate seed photographs with a reference chart and measure the seeds")]
#[command(version)]
struct Cli {
    /// More log output (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Emit JSON log lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate one photo and segment its seeds.
    Run(RunArgs),

    /// Score every calibration model on the chart of one photo.
    Evaluate(EvaluateArgs),

    /// Write a config file with default parameters.
    InitConfig {
        /// Photo the config points at.
        #[arg(long)]
        image: String,

        /// Where to write the config (JSON).
        #[arg(long)]
        out: PathBuf,
    },

    /// Render the built-in reference chart.
    RenderChart {
        /// Output image; the format follows the extension.
        #[arg(long)]
        out: PathBuf,

        /// Rendering resolution.
        #[arg(long, default_value = "10.0")]
        px_per_mm: f64,
    },
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// JSON config; command-line options override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input photo.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Scan of the physical chart to match against.
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Report path (JSON).
    #[arg(long)]
    out: Option<PathBuf>,

    /// Save the calibrated photo here.
    #[arg(long)]
    calibrated: Option<PathBuf>,

    /// Skip chart location and calibration.
    #[arg(long)]
    no_calibrate: bool,

    /// Segment the whole photo instead of its central half.
    #[arg(long)]
    full_frame: bool,

    /// Paint the chart over with the background before segmenting.
    #[arg(long)]
    fill_chart: bool,

    /// Color space the model is trained in (rgb, rgb_linear, xyz, xyz_linear).
    #[arg(long)]
    feature_space: Option<ColorSpace>,

    /// Color space the model predicts.
    #[arg(long)]
    target_space: Option<ColorSpace>,
}

#[derive(Debug, Clone, Args)]
struct EvaluateArgs {
    /// Input photo.
    #[arg(long)]
    image: PathBuf,

    /// Scan of the physical chart to match against.
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Report path (JSON); a ranking is printed either way.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn path_string(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

impl RunArgs {
    fn to_config(&self) -> CliResult<PipelineConfig> {
        let mut cfg = match (&self.config, &self.image) {
            (Some(path), _) => PipelineConfig::load_json(path)?,
            (None, Some(image)) => PipelineConfig::new(path_string(image)),
            (None, None) => return Err("either --config or --image is required".into()),
        };
        if let Some(image) = &self.image {
            cfg.image_path = path_string(image);
        }
        if let Some(reference) = &self.reference {
            cfg.reference_path = Some(path_string(reference));
        }
        if let Some(out) = &self.out {
            cfg.output_path = Some(path_string(out));
        }
        if let Some(calibrated) = &self.calibrated {
            cfg.calibrated_path = Some(path_string(calibrated));
        }
        if self.no_calibrate {
            cfg.params.calibrate = false;
        }
        if self.full_frame {
            cfg.params.central_region = false;
        }
        if self.fill_chart {
            cfg.params.fill_chart = true;
        }
        if let Some(fs) = self.feature_space {
            cfg.params.feature_space = fs;
        }
        if let Some(ts) = self.target_space {
            cfg.params.target_space = ts;
        }
        Ok(cfg)
    }
}

fn init_logging(verbose: u8, json: bool) {
    let config = LogConfig::new(verbose, json);
    #[cfg(feature = "tracing")]
    {
        seedcal::init_tracing(&config);
    }
    #[cfg(not(feature = "tracing"))]
    {
        if let Err(e) = seedcal::core::init_logging(&config) {
            eprintln!("logger already installed: {e}");
        }
    }
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Run(args) => run_pipeline(&args),
        Commands::Evaluate(args) => run_evaluate(&args),
        Commands::InitConfig { image, out } => run_init_config(image, &out),
        Commands::RenderChart { out, px_per_mm } => run_render_chart(&out, px_per_mm),
    }
}

fn run_pipeline(args: &RunArgs) -> CliResult<()> {
    let cfg = args.to_config()?;
    let out_path = cfg.output_path();
    log::info!("processing {}", cfg.image_path);

    let mut report = RunReport::new(cfg.image_path.clone(), args.config.as_deref());
    let result = detect::run_config(&cfg);
    match &result {
        Ok(output) => report.set_result(output.report.clone()),
        Err(e) => report.set_error(e),
    }
    report.write_json(&out_path)?;
    log::info!("report written to {}", out_path.display());

    let output = result?;
    let r = &output.report;
    println!("image:      {}", cfg.image_path);
    println!("chart:      {:?}", r.status);
    println!("scale:      {:.5} mm²/px", r.scale);
    println!("objects:    {}", r.objects.len());
    if !r.objects.is_empty() {
        let total: f64 = r.objects.iter().map(|o| o.area_mm2).sum();
        println!("mean area:  {:.2} mm²", total / r.objects.len() as f64);
    }
    Ok(())
}

fn run_evaluate(args: &EvaluateArgs) -> CliResult<()> {
    let mut cfg = PipelineConfig::new(path_string(&args.image));
    cfg.reference_path = args.reference.as_deref().map(path_string);
    let pipeline = detect::pipeline_from_config(&cfg)?;
    let photo = detect::load_rgb(&args.image)?;

    let Some((lab_deviation, models)) =
        pipeline.evaluate(&detect::rgb_view(&photo), &candidate_models())
    else {
        return Err(format!("no usable chart found in {}", args.image.display()).into());
    };
    let report = EvaluationReport {
        image_path: cfg.image_path,
        lab_deviation,
        models,
    };

    println!("chart Lab deviation: {lab_deviation:.2}");
    println!("{:<26} {:<11} {:<11} {:>8} {:>8}", "model", "features", "target", "rgb", "lab");
    for e in report.ranked() {
        println!(
            "{:<26} {:<11} {:<11} {:>8.3} {:>8.3}",
            e.model,
            e.feature_space.name(),
            e.target_space.name(),
            e.rgb_change,
            e.lab_change
        );
    }
    if let Some(out) = &args.out {
        report.write_json(out)?;
        log::info!("evaluation written to {}", out.display());
    }
    Ok(())
}

fn run_init_config(image: String, out: &Path) -> CliResult<()> {
    PipelineConfig::new(image).write_json(out)?;
    println!("config written to {}", out.display());
    Ok(())
}

fn run_render_chart(out: &Path, px_per_mm: f64) -> CliResult<()> {
    if !(px_per_mm.is_finite() && px_per_mm > 0.0) {
        return Err(format!("--px-per-mm must be positive, got {px_per_mm}").into());
    }
    let img = ReferenceChart::classic().render(px_per_mm);
    let (w, h) = (img.width, img.height);
    detect::save_rgb(img, out).map_err(|e: PipelineError| -> CliError {
        format!("failed to write {}: {e}", out.display()).into()
    })?;
    println!("chart ({w}x{h}) written to {}", out.display());
    Ok(())
}
