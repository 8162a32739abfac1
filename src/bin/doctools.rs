//! CLI binary for edgequake-doctools.
//!
//! A thin shim over the library crate: one subcommand per tool, flags mapped
//! onto `PipelineConfig`, results written next to the input unless `-o` says
//! otherwise.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_doctools::{
    default_output_path, write_artifact, BudgetOutcome, CompressionTarget, DocumentInfo,
    OcrBackend, Orchestrator, OutputFormat, PageStatus, PipelineConfig, PipelineRun,
    ProgressEvent, ProgressSink, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress sink using indicatif ────────────────────────────────────────

/// Terminal progress: a single 0–100 bar driven by the run's events.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold:>11}  [{bar:42.green/238}] {pos:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Loading");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for CliProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        let prefix = match event.stage {
            Stage::Loading => "Loading",
            Stage::Rendering => "Rendering",
            Stage::Encoding => "Encoding",
            Stage::Recognizing => "Recognizing",
            Stage::Assembling => "Assembling",
            Stage::Done => "Done",
        };
        self.bar.set_prefix(prefix);
        self.bar.set_position(event.percent as u64);
        self.bar.set_message(event.status_text.clone());
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert an image to WebP (writes photo-converted.webp)
  doctools convert photo.png --format webp

  # Compress an image to at most 200 KB, 1200 px wide
  doctools compress photo.png --target-kb 200 --width 1200

  # Compress a scanned PDF at a fixed page quality
  doctools compress scan.pdf --pdf-quality 0.6

  # Compress a PDF to roughly 1 MB overall
  doctools compress scan.pdf --target-kb 1024

  # OCR a scan into scan.docx, German text
  doctools extract scan.pdf --lang deu

  # OCR to plain text on stdout
  doctools extract receipt.jpg --text

  # Describe a file
  doctools inspect scan.pdf --json

REQUIREMENTS:
  PDF input needs the pdfium shared library: next to the binary's working
  directory, on the system library path, or given with --pdfium-lib.
  OCR uses the `tesseract` binary with the requested language data
  installed, or the ocrs engine (build with --features ocrs, --ocr ocrs).
"#;

/// Convert, compress and OCR images and PDFs, entirely on this machine.
#[derive(Parser, Debug)]
#[command(
    name = "doctools",
    version,
    about = "Convert, compress and OCR images and PDFs locally",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Output file (default: the inferred name, next to the input).
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Path to the pdfium shared library.
    #[arg(long, global = true)]
    pdfium_lib: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, global = true)]
    password: Option<String>,

    /// Maximum rendered width or height in pixels.
    #[arg(long, global = true, default_value_t = 6000)]
    max_pixels: u32,

    /// Disable progress bar.
    #[arg(long, global = true)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Re-encode an image in another format.
    Convert {
        input: PathBuf,

        /// Target format: jpg, png or webp.
        #[arg(short, long, value_parser = parse_format)]
        format: OutputFormat,

        /// Lossy quality (0.01–1.0).
        #[arg(long, default_value_t = 0.9)]
        quality: f32,
    },

    /// Shrink an image to a byte budget, or a PDF by re-encoding its pages.
    Compress {
        input: PathBuf,

        /// Byte budget in KiB. Required for images; for PDFs it bounds the
        /// whole output file.
        #[arg(long)]
        target_kb: Option<u64>,

        /// Output width in pixels (images only).
        #[arg(long)]
        width: Option<u32>,

        /// Output height in pixels (images only).
        #[arg(long)]
        height: Option<u32>,

        /// Use width and height as given instead of keeping the aspect ratio.
        #[arg(long)]
        no_aspect_lock: bool,

        /// Fixed JPEG quality for PDF pages when no budget is given (0.01–1.0).
        #[arg(long, default_value_t = 0.7)]
        pdf_quality: f32,

        /// Render scale for PDF pages.
        #[arg(long, default_value_t = 1.5)]
        scale: f32,
    },

    /// Recognise text and write it as a Word document.
    Extract {
        input: PathBuf,

        /// OCR language (tesseract naming, e.g. eng, deu, fra).
        #[arg(short, long, default_value = "eng")]
        lang: String,

        /// OCR engine: tesseract or ocrs.
        #[arg(long, value_enum, default_value = "tesseract")]
        ocr: OcrArg,

        /// Model directory for the ocrs engine.
        #[arg(long)]
        model_dir: Option<PathBuf>,

        /// Render scale for PDF pages fed to OCR.
        #[arg(long, default_value_t = 2.0)]
        scale: f32,

        /// Print plain text to stdout instead of writing a .docx.
        #[arg(long)]
        text: bool,
    },

    /// Print what the tools would see: type, pages, page sizes.
    Inspect {
        input: PathBuf,

        /// Output JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OcrArg {
    Tesseract,
    Ocrs,
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    OutputFormat::parse_image(s)
        .ok_or_else(|| format!("unsupported format '{s}' (jpg, png, webp)"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let common = &cli.common;

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar covers INFO-level feedback; only show errors under it.
    let machine_output = matches!(
        cli.command,
        Command::Inspect { json: true, .. } | Command::Extract { text: true, .. }
    );
    let show_progress = !common.quiet && !common.no_progress && !machine_output;
    let filter = if common.verbose {
        "debug"
    } else if common.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli).context("Invalid configuration")?;
    let orchestrator = Orchestrator::new(config);

    let input = match &cli.command {
        Command::Convert { input, .. }
        | Command::Compress { input, .. }
        | Command::Extract { input, .. }
        | Command::Inspect { input, .. } => input.clone(),
    };

    // ── Inspect ──────────────────────────────────────────────────────────
    if let Command::Inspect { json, .. } = &cli.command {
        let source = edgequake_doctools::SourceDocument::from_path(&input)
            .await
            .with_context(|| format!("Failed to read {}", input.display()))?;
        let info = orchestrator
            .inspect(&source)
            .await
            .context("Failed to inspect file")?;
        if *json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialize info")?
            );
        } else {
            print_info(&info);
        }
        return Ok(());
    }

    let mut run = PipelineRun::new();
    run.load_path(&input)
        .await
        .with_context(|| format!("Failed to load {}", input.display()))?;

    let progress = show_progress.then(CliProgress::new);
    let sink: &dyn ProgressSink = match &progress {
        Some(p) => p,
        None => &edgequake_doctools::NoopProgress,
    };

    match &cli.command {
        Command::Convert { format, .. } => {
            let result = orchestrator.convert(&mut run, *format, sink).await;
            finish(&progress);
            let artifact = result.context("Conversion failed")?;
            let path = output_path(common, &input, &artifact.filename);
            write_artifact(&artifact, &path).await?;
            if !common.quiet {
                eprintln!(
                    "{} {}  {}",
                    green("✔"),
                    bold(&path.display().to_string()),
                    dim(&format!("{} bytes", artifact.size())),
                );
            }
        }

        Command::Compress {
            target_kb,
            width,
            height,
            no_aspect_lock,
            ..
        } => {
            let target = target_kb.map(|kb| CompressionTarget {
                target_bytes: kb * 1024,
                width: *width,
                height: *height,
                lock_aspect: !no_aspect_lock,
            });
            let result = orchestrator.compress(&mut run, target, sink).await;
            finish(&progress);
            let output = result.context("Compression failed")?;

            let path = output_path(common, &input, &output.artifact.filename);
            write_artifact(&output.artifact, &path).await?;

            if !common.quiet {
                for page in output.pages.iter().filter(|p| p.status == PageStatus::Failed) {
                    eprintln!(
                        "  {} Page {:>3}  {}",
                        red("✗"),
                        page.page_num,
                        red(&page
                            .error
                            .as_ref()
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "failed".into())),
                    );
                }
                let before = run.source().map(|s| s.byte_len()).unwrap_or(0);
                eprintln!(
                    "{} {}  {} → {} bytes  {}ms",
                    if output.stats.failed_pages == 0 {
                        green("✔")
                    } else {
                        yellow("⚠")
                    },
                    bold(&path.display().to_string()),
                    before,
                    output.artifact.size(),
                    output.stats.duration_ms,
                );
                if let BudgetOutcome::Unmet {
                    target_bytes,
                    achieved_bytes,
                    final_quality,
                } = output.artifact.budget
                {
                    eprintln!(
                        "  {} target of {} bytes not reached; kept {} bytes at quality {}",
                        yellow("⚠"),
                        target_bytes,
                        achieved_bytes,
                        final_quality,
                    );
                }
            }
        }

        Command::Extract { text, .. } => {
            let result = orchestrator.extract(&mut run, sink).await;
            finish(&progress);
            let extraction = result.context("Text extraction failed")?;

            if !common.quiet {
                for page in &extraction.pages {
                    match page.status {
                        PageStatus::Success => {}
                        PageStatus::Partial => eprintln!(
                            "  {} Page {:>3}  {}",
                            yellow("⚠"),
                            page.page_num,
                            dim("no text recognised"),
                        ),
                        PageStatus::Failed => eprintln!(
                            "  {} Page {:>3}  {}",
                            red("✗"),
                            page.page_num,
                            red(&page
                                .error
                                .as_ref()
                                .map(|e| e.to_string())
                                .unwrap_or_else(|| "failed".into())),
                        ),
                    }
                }
            }

            if *text {
                let body = extraction.text();
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                handle
                    .write_all(body.as_bytes())
                    .context("Failed to write to stdout")?;
                if !body.ends_with('\n') {
                    handle.write_all(b"\n").ok();
                }
                return Ok(());
            }

            let artifact = extraction
                .to_word_document()
                .context("Failed to assemble Word document")?;
            let path = output_path(common, &input, &artifact.filename);
            write_artifact(&artifact, &path).await?;
            if !common.quiet {
                eprintln!(
                    "{} {}  {}/{} pages  {}ms",
                    if extraction.failed_pages() == 0 {
                        green("✔")
                    } else {
                        yellow("⚠")
                    },
                    bold(&path.display().to_string()),
                    extraction.succeeded_pages(),
                    extraction.pages.len(),
                    extraction.stats.duration_ms,
                );
            }
        }

        // Returned early above.
        Command::Inspect { .. } => {}
    }

    Ok(())
}

fn finish(progress: &Option<CliProgress>) {
    if let Some(p) = progress {
        p.finish();
    }
}

fn output_path(common: &CommonArgs, input: &Path, filename: &str) -> PathBuf {
    common
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(input, filename))
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let common = &cli.common;
    let mut builder = PipelineConfig::builder().max_rendered_pixels(common.max_pixels);

    if let Some(path) = &common.pdfium_lib {
        builder = builder.pdfium_library_path(path.clone());
    }
    if let Some(pwd) = &common.password {
        builder = builder.password(pwd.clone());
    }

    builder = match &cli.command {
        Command::Convert { quality, .. } => builder.convert_quality(*quality),
        Command::Compress {
            pdf_quality, scale, ..
        } => builder.pdf_page_quality(*pdf_quality).compress_scale(*scale),
        Command::Extract {
            lang,
            ocr,
            model_dir,
            scale,
            ..
        } => {
            let backend = match ocr {
                OcrArg::Tesseract => OcrBackend::Tesseract,
                OcrArg::Ocrs => OcrBackend::Ocrs {
                    model_dir: model_dir.clone(),
                },
            };
            builder
                .ocr_language(lang.clone())
                .ocr_backend(backend)
                .ocr_scale(*scale)
        }
        Command::Inspect { .. } => builder,
    };

    Ok(builder.build()?)
}

fn print_info(info: &DocumentInfo) {
    println!("File:         {}", info.filename);
    println!("Type:         {} ({})", info.kind, info.mime);
    println!("Size:         {} bytes", info.byte_len);
    println!("Pages:        {}", info.page_count);
    let unit = if info.kind == "PDF" { "pt" } else { "px" };
    for (i, page) in info.pages.iter().enumerate() {
        println!(
            "  {:>4}  {:.1} × {:.1} {}",
            i + 1,
            page.width_pt,
            page.height_pt,
            unit
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn every_setting_comes_from_flags() {
        let cli = Cli::try_parse_from([
            "doctools",
            "--quiet",
            "--pdfium-lib",
            "/opt/pdfium/libpdfium.so",
            "--password",
            "secret",
            "compress",
            "scan.pdf",
            "--target-kb",
            "300",
        ])
        .unwrap();
        assert!(cli.common.quiet);
        assert!(!cli.common.verbose);
        assert!(!cli.common.no_progress);
        assert_eq!(cli.common.password.as_deref(), Some("secret"));
        assert!(cli.common.output.is_none());
        assert!(matches!(
            cli.command,
            Command::Compress {
                target_kb: Some(300),
                ..
            }
        ));
    }

    #[test]
    fn global_flags_are_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from(["doctools", "inspect", "a.pdf", "--json", "-o", "x.json"])
            .unwrap();
        assert_eq!(cli.common.output, Some(PathBuf::from("x.json")));
        assert!(matches!(cli.command, Command::Inspect { json: true, .. }));
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(parse_format("tiff").is_err());
        assert!(Cli::try_parse_from(["doctools", "convert", "a.png", "-f", "bmp"]).is_err());
    }
}
