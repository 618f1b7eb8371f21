use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use redactr_core::dump::{self, DumpOptions, DumpedPartition};
use redactr_core::exclusion::ExclusionSet;
use redactr_core::geometry::SystemGeometry;
use redactr_core::gpt::PartitionDescriptor;
use redactr_core::inspect;
use redactr_core::source::SourceKind;
use std::cell::RefCell;
use std::fs;
use std::io::{IsTerminal, stdin};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "redactr")]
#[command(
    about = "Dump every partition of a GPT disk to image files, zeroing excluded partitions",
    version
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump each partition to <OUTPUT>/<name>.img
    Dump {
        /// Device, raw image, compressed image or fixed VHD to read
        #[arg(short, long)]
        input: PathBuf,

        /// Directory that receives the partition images
        #[arg(short, long)]
        output: PathBuf,

        /// File listing partition names to zero, one per line
        #[arg(short, long = "exclude-list")]
        exclude_list: Option<PathBuf>,

        /// Recovery mode: copy every partition verbatim
        #[arg(short, long)]
        recovery: bool,

        /// Override the detected sector size
        #[arg(long, value_parser = clap::value_parser!(u32).range(512..=65536))]
        sector_size: Option<u32>,

        /// Do not ask before writing into a non-empty output directory
        #[arg(short, long)]
        yes: bool,
    },
    /// List the partitions of a disk and whether each would be redacted
    Partitions {
        /// Device, raw image, compressed image or fixed VHD to read
        #[arg(short, long)]
        input: PathBuf,

        /// File listing partition names to zero, one per line
        #[arg(short, long = "exclude-list")]
        exclude_list: Option<PathBuf>,

        /// Override the detected sector size
        #[arg(long, value_parser = clap::value_parser!(u32).range(512..=65536))]
        sector_size: Option<u32>,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Presents a final "Yes/No" confirmation to the user.
fn confirm_operation(prompt: &str) -> Result<bool> {
    let confirmation = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmation)
}

fn is_non_empty_dir(path: &Path) -> Result<bool> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn decompress_spinner(input: &Path) -> ProgressBar {
    if !matches!(SourceKind::detect(input), SourceKind::CompressedImage(_)) {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_prefix("Decompress");
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{prefix:16} [{elapsed_precise}] {spinner:.blue} {bytes} ({bytes_per_sec}) {msg}")
            .unwrap()
            .tick_strings(&["■    ", " ■   ", "  ■  ", "   ■ ", "    ■", "■■■■■"]),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn partition_bar(partition: &PartitionDescriptor) -> ProgressBar {
    let pb = ProgressBar::new(partition.byte_len());
    pb.set_prefix(partition.name().to_string());
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{prefix:16} [{elapsed_precise}] [{bar:40.green/black}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}",
            )
            .unwrap()
            .progress_chars("■ "),
    );
    pb
}

fn run_dump(
    input: PathBuf,
    output: PathBuf,
    exclude_list: Option<PathBuf>,
    recovery: bool,
    sector_size: Option<u32>,
    yes: bool,
    running: Arc<AtomicBool>,
) -> Result<()> {
    let exclusions = if recovery {
        ExclusionSet::empty()
    } else {
        ExclusionSet::load_or_builtin(exclude_list.as_deref())
    };

    println!("  Input:  {}", style(input.display()).cyan());
    println!("  Output: {}", style(output.display()).cyan());
    if recovery {
        println!(
            "  {} every partition is copied verbatim.",
            style("RECOVERY MODE:").yellow().bold()
        );
    } else {
        println!("  Redacting {} partition names.", exclusions.len());
    }
    println!();

    if !yes && stdin().is_terminal() && is_non_empty_dir(&output)? {
        let prompt = format!(
            "'{}' is not empty; existing images will be overwritten. Proceed?",
            output.display()
        );
        if !confirm_operation(&prompt)? {
            println!("Dump cancelled.");
            return Ok(());
        }
        println!();
    }

    let options = DumpOptions {
        input,
        output_dir: output,
        exclusions,
        recovery,
        sector_size,
    };

    debug!(?options, "Starting dump");

    let decompress_pb = decompress_spinner(&options.input);
    let current_pb: RefCell<Option<ProgressBar>> = RefCell::new(None);

    let on_decompress_progress = |bytes| decompress_pb.set_position(bytes);
    let on_partition_start = |_index: usize, partition: &PartitionDescriptor| {
        if !decompress_pb.is_finished() {
            decompress_pb.finish_with_message("Decompression complete.");
        }
        *current_pb.borrow_mut() = Some(partition_bar(partition));
    };
    let on_progress = |bytes| {
        if let Some(pb) = current_pb.borrow().as_ref() {
            pb.set_position(bytes);
        }
    };
    let on_partition_done = |done: &DumpedPartition| {
        if let Some(pb) = current_pb.borrow_mut().take() {
            if done.redacted {
                pb.finish_with_message(style("redacted").yellow().to_string());
            } else {
                pb.finish_with_message(format!("sha256 {}", &done.sha256[..12]));
            }
        }
    };

    let result = dump::run(
        &options,
        &SystemGeometry,
        running,
        on_decompress_progress,
        on_partition_start,
        on_progress,
        on_partition_done,
    );

    match result {
        Ok(report) => {
            println!();
            if report.unlocked {
                println!(
                    "{} IS_UNLOCKED partition found; UEFI_BS_NV was left readable.",
                    style("NOTE:").yellow().bold()
                );
            }
            println!(
                "✨ Dumped {} partitions ({} bytes, {} B sectors) to {}.",
                report.partitions.len(),
                report.total_bytes(),
                report.sector_size,
                style(options.output_dir.display()).cyan()
            );
            let redacted = report.partitions.iter().filter(|p| p.redacted).count();
            if redacted > 0 {
                println!("   {redacted} of them were zeroed.");
            }
            Ok(())
        }
        Err(e) => {
            decompress_pb.finish_and_clear();
            if let Some(pb) = current_pb.borrow_mut().take() {
                pb.finish_with_message("❌ Operation failed.");
            }
            Err(e)
        }
    }
}

fn run_partitions(
    input: PathBuf,
    exclude_list: Option<PathBuf>,
    sector_size: Option<u32>,
    running: Arc<AtomicBool>,
) -> Result<()> {
    let exclusions = ExclusionSet::load_or_builtin(exclude_list.as_deref());
    let decompress_pb = decompress_spinner(&input);

    let inspection = inspect::inspect(
        &input,
        &SystemGeometry,
        sector_size,
        &exclusions,
        &running,
        |bytes| decompress_pb.set_position(bytes),
    );
    decompress_pb.finish_and_clear();
    let inspection = inspection?;

    println!(
        "{} ({}, {:.1} GB, {} B sectors)",
        style(input.display()).cyan(),
        inspection.kind,
        inspection.source_len as f64 / 1e9,
        inspection.sector_size
    );
    if inspection.unlocked {
        println!("{} device is unlocked", style("NOTE:").yellow().bold());
    }

    println!(
        "\n  {:<4} {:<36} {:>14} {:>14} {:>12}  {}",
        "#", "NAME", "FIRST BYTE", "LAST BYTE", "SIZE", "REDACTED"
    );
    println!(
        "  {:-<4} {:-<36} {:->14} {:->14} {:->12}  {:-<8}",
        "", "", "", "", "", ""
    );
    for (index, entry) in inspection.partitions.iter().enumerate() {
        let p = &entry.descriptor;
        let redacted = if entry.redacted {
            style("yes").yellow().to_string()
        } else {
            "no".to_string()
        };
        println!(
            "  {:<4} {:<36} {:>14} {:>14} {:>12}  {}",
            index,
            p.name(),
            p.first_byte(),
            p.last_byte(),
            p.byte_len(),
            redacted
        );
    }
    println!(
        "\n{} partitions, {} redacted.",
        inspection.partitions.len(),
        inspection.redacted_count()
    );

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // This flag allows for graceful cancellation of operations.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    // Set up the Ctrl+C handler to toggle the `running` flag.
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    match cli.command {
        Commands::Dump {
            input,
            output,
            exclude_list,
            recovery,
            sector_size,
            yes,
        } => run_dump(
            input,
            output,
            exclude_list,
            recovery,
            sector_size,
            yes,
            running,
        ),
        Commands::Partitions {
            input,
            exclude_list,
            sector_size,
        } => run_partitions(input, exclude_list, sector_size, running),
    }
}
