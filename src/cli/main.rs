use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use eyephoto_meta::config::{self, WritePolicy};
use eyephoto_meta::record::{MetadataRecord, Orientation, RightLeft};
use eyephoto_meta::{exif, pipeline, xmp};

/// Flag bit set by `set --mark`.
const FLAG_MARKED: i32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "eyephoto-meta",
    version,
    about = "Read and store eye photo metadata in JPEG XMP and EXIF segments"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Override the configured write policy
    #[arg(long, value_enum, global = true)]
    policy: Option<PolicyArg>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the resolved metadata of JPEG files
    Read {
        /// Image files or directories
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change metadata fields of one JPEG file
    Set {
        #[arg(value_name = "FILE")]
        path: PathBuf,

        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long)]
        person: Option<String>,

        /// Which eye the photo shows
        #[arg(long, value_enum)]
        eye: Option<EyeArg>,

        /// EXIF orientation code (1-8)
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..=8))]
        orientation: Option<u16>,

        #[arg(long, allow_hyphen_values = true)]
        zoom: Option<f32>,
        #[arg(long, allow_hyphen_values = true)]
        brightness: Option<f32>,
        #[arg(long, allow_hyphen_values = true)]
        contrast: Option<f32>,

        /// Set the organize date to today
        #[arg(long)]
        organized_today: bool,

        /// Set the marked flag
        #[arg(long, conflicts_with = "unmark")]
        mark: bool,

        /// Clear the marked flag
        #[arg(long)]
        unmark: bool,
    },
    /// Display every raw EXIF field and the XMP packet
    Dump {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Write a default config.json and exit
    Init,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EyeArg {
    Right,
    Left,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyArg {
    NoChanges,
    XmlOnly,
    XmlAndExif,
}

impl From<PolicyArg> for WritePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::NoChanges => WritePolicy::NoChanges,
            PolicyArg::XmlOnly => WritePolicy::XmlOnly,
            PolicyArg::XmlAndExif => WritePolicy::XmlAndExif,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle init before anything reads the config
    if let Command::Init = cli.command {
        init_logging(cli.verbose, None)?;
        let config = config::Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => config::Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    let mut config = config::Config::load(cli.config.as_deref())?;
    init_logging(cli.verbose, config.log_file.as_deref())?;
    if let Some(policy) = cli.policy {
        config.write_policy = policy.into();
    }
    log::debug!("Write policy: {:?}", config.write_policy);

    match cli.command {
        Command::Read { paths, json } => read_command(&paths, json, &config),
        Command::Set {
            path,
            title,
            description,
            subject,
            comment,
            person,
            eye,
            orientation,
            zoom,
            brightness,
            contrast,
            organized_today,
            mark,
            unmark,
        } => {
            let mut record = pipeline::read_metadata(&path, &config)?;
            apply_text(&mut record.title, title);
            apply_text(&mut record.description, description);
            apply_text(&mut record.subject, subject);
            apply_text(&mut record.comment, comment);
            apply_text(&mut record.person, person);
            if let Some(eye) = eye {
                record.right_left = Some(match eye {
                    EyeArg::Right => RightLeft::Right,
                    EyeArg::Left => RightLeft::Left,
                });
            }
            if let Some(code) = orientation {
                record.orientation = Orientation::from_code(u32::from(code));
            }
            record.zoom_factor = zoom.or(record.zoom_factor);
            record.brightness = brightness.or(record.brightness);
            record.contrast = contrast.or(record.contrast);
            if organized_today {
                record.organize_date = Some(chrono::Local::now().date_naive());
            }
            if mark {
                record.set_flag(FLAG_MARKED);
            }
            if unmark {
                record.clear_flag(FLAG_MARKED);
            }

            let report = pipeline::write_metadata(&path, &record, &config)?;
            if report.is_noop() {
                log::warn!(
                    "Write policy {:?} does not allow changes - {} left untouched",
                    config.write_policy,
                    path.display()
                );
            } else {
                if let Some(xmp) = report.xmp {
                    log::info!("  XMP stored ({:?})", xmp.strategy);
                }
                if let Some(exif) = report.exif {
                    log::info!(
                        "  EXIF stored ({:?}, {} attempt(s))",
                        exif.strategy,
                        exif.attempts
                    );
                }
            }
            Ok(())
        }
        Command::Dump { path } => dump_command(&path),
        Command::Init => Ok(()),
    }
}

fn init_logging(verbose: bool, log_file: Option<&str>) -> Result<()> {
    let log_level = if verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level));
    builder.format_timestamp(None);
    if let Some(file) = log_file {
        let target = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .with_context(|| format!("Failed to open log file {file}"))?;
        builder
            .format_timestamp_secs()
            .target(env_logger::Target::Pipe(Box::new(target)));
    }
    builder.init();
    Ok(())
}

/// An empty argument clears the field.
fn apply_text(field: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value {
        let value = value.trim();
        *field = (!value.is_empty()).then(|| value.to_string());
    }
}

fn read_command(paths: &[PathBuf], json: bool, config: &config::Config) -> Result<()> {
    let images = pipeline::collect_images(paths);
    if images.is_empty() {
        anyhow::bail!("No JPEG files found in the specified paths.");
    }

    let total = images.len();
    let mut failed = 0;
    let mut json_results = Vec::new();

    for image_path in &images {
        match pipeline::read_metadata(image_path, config) {
            Ok(record) => {
                if json {
                    json_results.push(serde_json::json!({
                        "path": image_path.display().to_string(),
                        "metadata": record,
                    }));
                } else {
                    print_record(image_path, &record);
                }
            }
            Err(e) => {
                failed += 1;
                log::error!("{e}");
                if json {
                    json_results.push(serde_json::json!({
                        "path": image_path.display().to_string(),
                        "error": e.to_string(),
                    }));
                }
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&json_results)?);
    }

    log::info!(
        "Done: {} read, {failed} failed out of {total} images",
        total - failed
    );
    Ok(())
}

fn dump_command(path: &Path) -> Result<()> {
    pipeline::validate_jpeg(path)?;

    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));

    println!("  {BOLD}EXIF{RESET}");
    println!("  {DIM}{}{RESET}", "─".repeat(70));
    match pipeline::exif_date(path) {
        Ok(Some(date)) => print_row("DateTime", &date),
        Ok(None) => {}
        Err(e) => log::warn!("{e}"),
    }
    let mut count = 0;
    match exif::read_all_fields(path) {
        Ok(fields) => {
            for field in fields {
                count += 1;
                print_row(&format!("ifd{} 0x{:04X}", field.ifd, field.tag), &field.value);
            }
        }
        Err(e) => log::warn!("{e}"),
    }
    if count == 0 {
        println!("  {DIM}(no EXIF metadata found){RESET}");
    }
    println!();

    println!("  {BOLD}XMP{RESET}");
    println!("  {DIM}{}{RESET}", "─".repeat(70));
    match xmp::read_xmp_packet(path)? {
        Some(packet) => {
            for line in packet.lines().filter(|l| !l.trim().is_empty()) {
                println!("  {line}");
            }
        }
        None => println!("  {DIM}(no XMP packet found){RESET}"),
    }
    println!();

    Ok(())
}

// ANSI color codes
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

const VAL_WIDTH: usize = 46;
const INDENT: &str = "                           ";

fn print_record(path: &Path, record: &MetadataRecord) {
    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));

    let mut any = false;
    for item in xmp::XmpItem::ALL {
        if let Some(value) = record.item_string(item) {
            print_row(item.name(), &value);
            any = true;
        }
    }
    if let Some(code) = record.orientation.code() {
        print_row("orientation", &format!("{code} ({:?})", record.orientation));
        any = true;
    }
    if !any {
        println!("  {DIM}(no metadata found){RESET}");
    }
    println!();
}

fn print_row(tag: &str, val: &str) {
    let tag_col = format!("{:<22}", tag);
    let lines = wrap_text(val, VAL_WIDTH);
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            println!("  {tag_col} : {line}");
        } else {
            println!("  {INDENT}{line}");
        }
    }
}

/// Wrap text at word boundaries to fit within max_width.
fn wrap_text(s: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in s.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= max_width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(current_line);
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(s.to_string());
    }

    lines
}
