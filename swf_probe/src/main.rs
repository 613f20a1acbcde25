use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use clap::Parser;
use flash_loader::{
    FileSource, Library, LoadReport, LoaderConfig, MovieDefinition, ResolvePolicy, resolve_export,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// 要加载的swf文件
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// 只等待到这一帧就输出，默认等待全部加载完毕
    #[arg(short, long)]
    frame: Option<usize>,
    /// 加载后从每个影片解析的导出名，可重复
    #[arg(short, long)]
    resolve: Vec<String>,
    /// 导入等待的轮询间隔（毫秒）
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    /// 没有进度时最多轮询几次
    #[arg(long)]
    timeout_polls: Option<u32>,
    /// JSON 格式的加载配置
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// 格式化输出
    #[arg(long)]
    pretty: bool,
    /// 输出文件，默认打印到标准输出
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Resolved {
    name: String,
    id: Option<u16>,
    kind: Option<&'static str>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    file: String,
    /// Whether the requested frame (or the last frame) was reached.
    frame_ready: bool,
    movie: LoadReport,
    resolved: Vec<Resolved>,
    /// Movies pulled in through imports.
    imported: Vec<LoadReport>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::builder().parse_lossy(
        env::var("RUST_LOG")
            .as_deref()
            .unwrap_or("error,swf_probe=info,flash_loader=warn"),
    );
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&args)?;

    let mut reports = Vec::with_capacity(args.files.len());
    for path in &args.files {
        match probe(path, &args, &config) {
            Ok(report) => reports.push(report),
            Err(err) => error!("Failed to load {}: {:#}", path.display(), err),
        }
    }

    let json = if args.pretty {
        serde_json::to_string_pretty(&reports)?
    } else {
        serde_json::to_string(&reports)?
    };
    match &args.output {
        Some(output) => {
            fs::write(output, json)?;
            info!("wrote {} reports to {}", reports.len(), output.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<LoaderConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            LoaderConfig::from_json_str(&json)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => LoaderConfig::default(),
    };
    if let Some(poll_interval_ms) = args.poll_interval_ms {
        config.resolve.poll_interval_ms = poll_interval_ms;
    }
    if let Some(timeout_polls) = args.timeout_polls {
        config.resolve.timeout_polls = timeout_polls;
    }
    Ok(config)
}

fn probe(path: &Path, args: &Args, config: &LoaderConfig) -> anyhow::Result<ProbeReport> {
    let base = path.parent().unwrap_or(Path::new("."));
    let url = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("{} is not a file name", path.display()))?;

    let library = Library::new(FileSource::new(base), config.clone());
    let movie = library.load(url)?;
    info!(
        "{}: SWF version {}, {} frames at {} fps",
        url,
        movie.version(),
        movie.total_frames(),
        movie.frame_rate()
    );

    let target = args.frame.unwrap_or(movie.total_frames());
    let frame_ready = wait_with_progress(&movie, target)?;
    if args.frame.is_none() {
        let state = movie.wait_until_finished();
        info!("{}: loading ended as {:?}", url, state);
    }
    if !frame_ready {
        warn!(
            "{}: frame {} never loaded ({} of {})",
            url,
            target,
            movie.frames_loaded(),
            movie.total_frames()
        );
    }

    let resolved = args
        .resolve
        .iter()
        .map(|name| resolve(&movie, name, &config.resolve))
        .collect();
    let imported = library
        .movies()
        .iter()
        .filter(|other| !Arc::ptr_eq(other, &movie))
        .map(|other| other.report())
        .collect();

    Ok(ProbeReport {
        file: path.display().to_string(),
        frame_ready,
        movie: movie.report(),
        resolved,
        imported,
    })
}

fn wait_with_progress(movie: &MovieDefinition, target: usize) -> anyhow::Result<bool> {
    let pb = ProgressBar::new(target as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}",
        )?
        .progress_chars("#>-"),
    );
    pb.set_message(movie.url().to_owned());

    for frame in 1..=target {
        if !movie.ensure_frame_loaded(frame) {
            pb.abandon();
            return Ok(false);
        }
        pb.set_position(frame as u64);
    }
    pb.finish_and_clear();
    Ok(true)
}

fn resolve(movie: &MovieDefinition, name: &str, policy: &ResolvePolicy) -> Resolved {
    match resolve_export(movie, name, policy) {
        Ok(resource) => Resolved {
            name: name.to_owned(),
            id: Some(resource.id()),
            kind: Some(resource.kind()),
            error: None,
        },
        Err(err) => Resolved {
            name: name.to_owned(),
            id: None,
            kind: None,
            error: Some(err.to_string()),
        },
    }
}
