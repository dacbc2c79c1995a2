use captioncard::compositor::{CaptionLayout, OutputFormat};
use captioncard::config::{self, CaptionConfig, ConfigSource};
use captioncard::finder::ImageFinder;
use captioncard::fonts::{self, FontSource};
use captioncard::glyphs::{GlyphSource, TextGlyphs};
use captioncard::{Caption, CaptionError};
use clap::{Arg, ArgMatches, Command};
use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
enum AppError {
    Caption(CaptionError),
    WriteError(std::io::Error),
    PathError(String),
    RuntimeError(String),
}

impl From<CaptionError> for AppError {
    fn from(e: CaptionError) -> Self {
        AppError::Caption(e)
    }
}

/// Verbosity level for output
#[derive(Debug, Clone, Copy, PartialEq)]
enum Verbosity {
    Quiet,   // No output except errors
    Normal,  // Standard output
    Verbose, // Detailed output
}

impl Verbosity {
    fn from_matches(matches: &ArgMatches) -> Self {
        if matches.get_flag("quiet") {
            Verbosity::Quiet
        } else if matches.get_flag("verbose") {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    fn default_filter(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

/// Get the configuration source based on CLI arguments or default behavior.
///
/// Priority order:
/// 1. If `--config` is explicitly provided, use that file
/// 2. If `captioncard.toml` exists in the current directory, use it
/// 3. If `<config dir>/captioncard/config.toml` exists, use it
/// 4. Otherwise use the default configuration
fn get_config(matches: &ArgMatches) -> Result<CaptionConfig, AppError> {
    if let Some(config_file) = matches.get_one::<String>("config") {
        return Ok(config::load_config_file(config_file)?);
    }

    if Path::new("captioncard.toml").exists() {
        debug!("Using ./captioncard.toml");
        return Ok(config::load_config_from_source(ConfigSource::File(
            "captioncard.toml",
        )));
    }

    if let Some(user_config) = dirs::config_dir().map(|d| d.join("captioncard").join("config.toml")) {
        if user_config.exists() {
            if let Some(path) = user_config.to_str() {
                debug!("Using {}", path);
                return Ok(config::load_config_from_source(ConfigSource::File(path)));
            }
        }
    }

    Ok(config::load_config_from_source(ConfigSource::Default))
}

/// Applies font and glyph options given on the command line.
fn apply_overrides(matches: &ArgMatches, config: &mut CaptionConfig) {
    if let Some(font) = matches.get_one::<String>("font") {
        config.font_path = Some(font.to_string());
    }
    if let Some(fallback) = matches.get_one::<String>("fallback-font") {
        config.fallback_font = Some(fallback.to_string());
    }
    if matches.get_flag("no-remote-glyphs") {
        config.remote_glyphs = false;
    }
}

/// Resolves where the caption is written.
///
/// Without `--output` the file is `caption.<format>` in the current directory.
/// An explicit path keeps its name but takes the real format's extension.
fn get_output_path(matches: &ArgMatches, format: OutputFormat) -> Result<PathBuf, AppError> {
    let current_dir = std::env::current_dir().map_err(|e| AppError::PathError(e.to_string()))?;

    let Some(requested) = matches.get_one::<String>("output") else {
        return Ok(current_dir.join(format.file_name()));
    };

    let mut path = current_dir.join(requested);
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    if extension.as_deref() != Some(format.as_str()) {
        if extension.is_some() {
            warn!(
                "The caption is a {}, writing it with a .{} extension",
                format.as_str().to_uppercase(),
                format.as_str()
            );
        }
        path.set_extension(format.as_str());
    }
    Ok(path)
}

fn load_source(
    matches: &ArgMatches,
    finder: &ImageFinder,
    runtime: &tokio::runtime::Runtime,
    config: &CaptionConfig,
) -> Result<Vec<u8>, AppError> {
    if let Some(path) = matches.get_one::<String>("input") {
        return Ok(finder.load_file(Path::new(path), true)?);
    }

    #[cfg(feature = "fetch")]
    if let Some(url) = matches.get_one::<String>("url") {
        let client = ImageFinder::client(std::time::Duration::from_secs(config.fetch_timeout_secs))?;
        return Ok(runtime.block_on(finder.fetch(&client, url, true))?);
    }

    let _ = (runtime, config);
    Err(AppError::Caption(CaptionError::invalid_input(
        "No attachment or link given.",
    )))
}

fn glyph_source(config: &CaptionConfig) -> Arc<dyn GlyphSource> {
    #[cfg(feature = "fetch")]
    if config.remote_glyphs {
        match captioncard::glyphs::CdnGlyphs::new(std::time::Duration::from_secs(config.fetch_timeout_secs)) {
            Ok(cdn) => return Arc::new(cdn),
            Err(e) => warn!("Remote glyphs unavailable, drawing emoji with the font: {}", e),
        }
    }
    let _ = config;
    Arc::new(TextGlyphs)
}

fn print_missing_glyphs(text: &str, config: &CaptionConfig) -> Result<(), AppError> {
    let primary = match &config.font_path {
        Some(name) => fonts::resolve_font(name)?,
        None => FontSource::default(),
    };
    let fallback = match &config.fallback_font {
        Some(name) => Some(fonts::resolve_font(name)?),
        None => None,
    };

    let missing = fonts::report_missing_glyphs(text, &primary, fallback.as_ref())?;
    println!("🔎 Missing glyphs report for {}:", primary);
    if missing.is_empty() {
        println!("  • complete coverage");
    }
    for glyph in missing {
        let ch = glyph.ch;
        println!(
            "  • U+{:04X} ({}){}",
            ch as u32,
            ch,
            if glyph.covered_by_fallback {
                " drawn with the fallback font"
            } else {
                ""
            }
        );
    }
    Ok(())
}

fn dump_layout(bytes: &[u8], text: &str, config: &CaptionConfig, path: &str) -> Result<CaptionLayout, AppError> {
    let layout = Caption::open(bytes, text, config)?.layout();
    layout
        .save_to_json_file(path)
        .map_err(AppError::WriteError)?;
    info!("Saved layout to {}", path);
    Ok(layout)
}

fn run(matches: ArgMatches) -> Result<(), AppError> {
    let verbosity = Verbosity::from_matches(&matches);

    let mut config = get_config(&matches)?;
    apply_overrides(&matches, &mut config);

    let text = matches
        .get_one::<String>("text")
        .cloned()
        .unwrap_or_default();

    if matches.get_flag("show-missing-glyphs") {
        print_missing_glyphs(&text, &config)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::RuntimeError(e.to_string()))?;

    let finder = ImageFinder::from_config(&config);
    let bytes = load_source(&matches, &finder, &runtime, &config)?;

    if let Some(path) = matches.get_one::<String>("dump-layout") {
        let layout = dump_layout(&bytes, &text, &config, path)?;
        if verbosity == Verbosity::Verbose {
            info!("   Lines: {}", layout.line_count());
        }
    }

    let glyphs = glyph_source(&config);
    let token = CancellationToken::new();
    let rendered = runtime.block_on(captioncard::render(
        bytes,
        text,
        config,
        Arc::clone(&glyphs),
        token,
    ))?;
    drop(glyphs);
    drop(runtime);

    let output_path = get_output_path(&matches, rendered.format)?;
    fs::write(&output_path, &rendered.bytes).map_err(AppError::WriteError)?;

    if verbosity != Verbosity::Quiet {
        println!("✅ Saved caption to {}", output_path.display());
        if verbosity == Verbosity::Verbose {
            println!("   Size: {}", captioncard::finder::humanize_size(rendered.bytes.len() as u64));
        }
    }
    Ok(())
}

fn build_cli() -> Command {
    let cmd = Command::new("captioncard")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Put a meme-style caption above an image or GIF")
        .after_help(
            "EXAMPLES:\n  \
            captioncard -i cat.png -t \"me at 3am\"\n  \
            captioncard -i dance.gif -t \"friday\" -o friday.gif\n  \
            captioncard -u https://tenor.com/view/... -t \"mood\" --verbose\n  \
            captioncard -i cat.png -t \"∰ math\" --fallback-font \"DejaVu Sans\" --show-missing-glyphs\n",
        )
        .arg({
            let arg = Arg::new("input")
                .short('i')
                .long("input")
                .value_name("FILE_PATH")
                .help("Path to the source image");
            #[cfg(feature = "fetch")]
            let arg = arg.conflicts_with("url");
            arg
        })
        .arg(
            Arg::new("text")
                .short('t')
                .long("text")
                .value_name("CAPTION")
                .help("Caption text"),
        );

    #[cfg(feature = "fetch")]
    let cmd = cmd.arg(
        Arg::new("url")
            .short('u')
            .long("url")
            .value_name("URL")
            .help("Image URL, Tenor/Giphy page or emoji to caption (requires 'fetch' feature)")
            .conflicts_with("input"),
    );

    cmd.arg(
        Arg::new("output")
            .short('o')
            .long("output")
            .value_name("OUTPUT_PATH")
            .help("Output file (defaults to ./caption.png or ./caption.gif)"),
    )
    .arg(
        Arg::new("config")
            .short('c')
            .long("config")
            .value_name("CONFIG_FILE")
            .help("Path to configuration file (TOML format). Auto-detects captioncard.toml if not specified"),
    )
    .arg(
        Arg::new("font")
            .long("font")
            .value_name("FONT")
            .help("Caption font, as a file path or family name (default: bundled DejaVu Sans)"),
    )
    .arg(
        Arg::new("fallback-font")
            .long("fallback-font")
            .value_name("FONT")
            .help("Font for characters the caption font lacks"),
    )
    .arg(
        Arg::new("show-missing-glyphs")
            .long("show-missing-glyphs")
            .help("List caption characters the caption font cannot draw")
            .action(clap::ArgAction::SetTrue),
    )
    .arg(
        Arg::new("dump-layout")
            .long("dump-layout")
            .value_name("JSON_FILE")
            .help("Write the wrapped caption layout to a JSON file"),
    )
    .arg(
        Arg::new("no-remote-glyphs")
            .long("no-remote-glyphs")
            .help("Draw emoji with the font instead of downloading emoji images")
            .action(clap::ArgAction::SetTrue),
    )
    .arg(
        Arg::new("get-default-configuration")
            .long("get-default-configuration")
            .help("Print a default captioncard.toml to stdout and exit")
            .action(clap::ArgAction::SetTrue),
    )
    .arg(
        Arg::new("verbose")
            .short('v')
            .long("verbose")
            .help("Show detailed output")
            .action(clap::ArgAction::SetTrue)
            .conflicts_with("quiet"),
    )
    .arg(
        Arg::new("quiet")
            .short('q')
            .long("quiet")
            .help("Suppress all output except errors")
            .action(clap::ArgAction::SetTrue)
            .conflicts_with("verbose"),
    )
}

fn main() {
    let mut cmd = build_cli();
    let matches = cmd.clone().get_matches();

    // RUST_LOG takes precedence over -v/-q
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(Verbosity::from_matches(&matches).default_filter()),
    )
    .format_timestamp_millis()
    .init();

    if matches.get_flag("get-default-configuration") {
        println!("{}", config::default_config_toml());
        process::exit(0);
    }

    #[cfg(feature = "fetch")]
    let has_url = matches.contains_id("url");
    #[cfg(not(feature = "fetch"))]
    let has_url = false;

    if (!matches.contains_id("input") && !has_url) || !matches.contains_id("text") {
        let _ = cmd.print_help();
        println!();
        process::exit(1);
    }

    if let Err(e) = run(matches) {
        match e {
            AppError::Caption(e) if e.is_user_facing() => error!("[X] Rejected: {}", e),
            AppError::Caption(e) => error!("[X] Caption error: {}", e),
            AppError::WriteError(e) => error!("[X] Error writing file: {}", e),
            AppError::PathError(e) => error!("[X] Path error: {}", e),
            AppError::RuntimeError(e) => error!("[X] Runtime error: {}", e),
        }
        process::exit(1);
    }
}
