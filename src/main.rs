use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

use rfarchive::{archive, ArchiveConfig, ArchiveSink, DirectorySink, PageLoader};

/// rfarchive - save a web page as one self-contained HTML file in a zip
#[derive(Parser, Debug)]
#[command(name = "rfarchive")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Page to archive: an http(s) or file URL, or a path
    target: String,

    /// Directory the archive is written to
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// User agent sent with every request
    #[arg(long)]
    user_agent: Option<String>,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 30000)]
    timeout_ms: u64,

    /// Extra request header, as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Keep image references external
    #[arg(long)]
    no_images: bool,

    /// Keep stylesheet links external
    #[arg(long)]
    no_styles: bool,

    /// Print the image manifest to stdout
    #[arg(long)]
    print_manifest: bool,
}

impl Cli {
    fn config(&self) -> ArchiveConfig {
        let defaults = ArchiveConfig::default();
        ArchiveConfig {
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            timeout_ms: self.timeout_ms,
            headers: self.headers.iter().cloned().collect::<HashMap<_, _>>(),
            enable_images: !self.no_images,
            inline_styles: !self.no_styles,
            output_dir: self.out_dir.clone(),
        }
    }
}

fn parse_header(raw: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected \"Name: value\", got {:?}", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {:?}", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RFARCHIVE_LOG", "info")).init();

    let cli = Cli::parse();
    let config = cli.config();

    // The loader's HTTP client blocks, so load before entering the runtime.
    let page = PageLoader::new(config.clone())
        .context("Failed to set up page loader")?
        .load(&cli.target)
        .with_context(|| format!("Failed to load {}", cli.target))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;
    let capture = runtime
        .block_on(rfarchive::capture(&page, &config))
        .context("Failed to capture page")?;

    let manifest = capture.manifest_json()?;
    if cli.print_manifest {
        println!("{}", manifest);
    }

    let bundle = archive::package(
        &capture.html,
        &manifest,
        &rfarchive::sanitize_filename(&capture.title),
    )
    .context("Failed to package archive")?;

    let path = DirectorySink::new(&config.output_dir)
        .deliver(&bundle)
        .with_context(|| format!("Failed to write archive to {}", config.output_dir.display()))?;
    println!("{}", path.display());

    Ok(())
}
