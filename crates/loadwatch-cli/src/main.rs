mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use loadwatch_core::overlay::view::{OverlayIcon, ProgressTone, StreamIndicator, WarningSeverity};
use loadwatch_core::{
    ActionKind, DriverConfig, HttpLoader, LoadDriver, LoadReport, LoadingTracker, OverlayActions,
    OverlayHandle, OverlayView, ProxyConfig, ProxyDebugInfo, ProxyError, ProxyKind, ProxyParams,
    ProxyProbe, SmokeReport, XtreamCredentials,
};

use crate::config::AppConfig;

fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");

    if GIT_HASH.is_empty() {
        VERSION
    } else {
        // Called once; lives for the program's lifetime.
        Box::leak(format!("{VERSION} ({GIT_HASH})").into_boxed_str())
    }
}

/// Watch live streams load through a CORS proxy.
#[derive(Parser)]
#[command(name = "loadwatch", version = version_string(), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Default)]
struct ProxyArgs {
    /// Proxy base URL. Overrides the config file and environment.
    #[arg(long)]
    proxy: Option<String>,

    /// Path to TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server.
    Serve {
        /// Listen address (e.g. 0.0.0.0:8080). Overrides config file.
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        #[command(flatten)]
        proxy: ProxyArgs,
    },
    /// Load a stream through the proxy and show the loading overlay live.
    Watch {
        /// Playlist URL to load.
        url: String,

        /// Source identifier forwarded to the proxy.
        #[arg(long)]
        source: Option<String>,

        /// Segments to fetch before the stream counts as ready.
        #[arg(long, default_value_t = 3)]
        segments: usize,

        /// Ask the proxy to force CORS headers on the playlist.
        #[arg(long)]
        allow_cors: Option<bool>,

        /// Retry a failed load this many times using the overlay's retry action.
        #[arg(long, default_value_t = 0)]
        retries: u32,

        #[command(flatten)]
        proxy: ProxyArgs,
    },
    /// Print the proxy URL for a resource.
    Url {
        /// Endpoint kind: m3u8, m3u, segment, key, logo, xtream or stalker.
        kind: String,

        /// Upstream resource URL.
        resource: String,

        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        allow_cors: Option<bool>,

        /// Xtream account name.
        #[arg(long)]
        username: Option<String>,

        /// Xtream account password.
        #[arg(long)]
        password: Option<String>,

        /// Xtream API action.
        #[arg(long)]
        action: Option<String>,

        /// Stalker portal MAC address.
        #[arg(long)]
        mac: Option<String>,

        /// Extra query parameter as key=value. Repeatable.
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,

        #[command(flatten)]
        proxy: ProxyArgs,
    },
    /// Smoke-test the proxy: root reachability, endpoints, CORS headers.
    Check {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        proxy: ProxyArgs,
    },
    /// Show which proxy URL is in effect and where it came from.
    Info {
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        proxy: ProxyArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { listen, proxy } => run_serve(listen, proxy).await,
        Commands::Watch {
            url,
            source,
            segments,
            allow_cors,
            retries,
            proxy,
        } => {
            init_quiet_tracing();
            let mut driver_config = DriverConfig::default().with_segment_target(segments);
            if let Some(source) = source {
                driver_config = driver_config.with_source(source);
            }
            if let Some(allow) = allow_cors {
                driver_config = driver_config.with_allow_cors(allow);
            }
            run_watch(url, driver_config, retries, proxy).await
        }
        Commands::Url {
            kind,
            resource,
            source,
            allow_cors,
            username,
            password,
            action,
            mac,
            params,
            proxy,
        } => {
            init_quiet_tracing();
            let request = UrlRequest {
                kind,
                resource,
                source,
                allow_cors,
                username,
                password,
                action,
                mac,
                params,
            };
            run_url(request, proxy)
        }
        Commands::Check { json, proxy } => {
            init_quiet_tracing();
            run_check(json, proxy).await
        }
        Commands::Info { json, proxy } => {
            init_quiet_tracing();
            run_info(json, proxy)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &ProxyArgs) -> Result<AppConfig, String> {
    match args.config.as_deref() {
        Some(path) => AppConfig::load(path),
        None => Ok(AppConfig::default()),
    }
}

fn resolve_proxy(args: &ProxyArgs, config: &AppConfig) -> Result<ProxyConfig, String> {
    let mut section = config.proxy.clone();
    if let Some(base) = &args.proxy {
        section.base_url = Some(base.clone());
    }
    section.to_proxy_config()
}

async fn run_serve(listen_override: Option<SocketAddr>, args: ProxyArgs) -> Result<ExitCode, String> {
    let app_config = match load_config(&args) {
        Ok(c) => {
            init_tracing(&c.server.log_format);
            if let Some(path) = &args.config {
                tracing::info!(path = %path.display(), "Loaded config file");
            }
            c
        }
        Err(e) => {
            init_tracing("pretty");
            return Err(e);
        }
    };

    let listen = listen_override.unwrap_or(app_config.server.listen);
    let proxy = resolve_proxy(&args, &app_config)?;

    let state = loadwatch_api::state::AppState::new()
        .with_tracker_config(app_config.tracker.to_tracker_config())
        .with_overlay_config(app_config.overlay.to_overlay_config())
        .with_proxy(proxy);
    let sessions = state.sessions.clone();

    tracing::info!(%listen, "Starting loadwatch API server");
    loadwatch_api::serve_with_state(listen, state, loadwatch_api::shutdown_signal())
        .await
        .map_err(|e| format!("Server failed: {}", e))?;

    let live: Vec<_> = sessions.iter().map(|e| Arc::clone(e.value())).collect();
    for session in &live {
        session.tracker.shutdown().await;
    }
    sessions.clear();
    tracing::info!(count = live.len(), "Shutdown complete");

    Ok(ExitCode::SUCCESS)
}

async fn run_watch(
    url: String,
    driver_config: DriverConfig,
    retries: u32,
    args: ProxyArgs,
) -> Result<ExitCode, String> {
    let app_config = load_config(&args)?;
    let proxy = resolve_proxy(&args, &app_config)?;

    let tracker = LoadingTracker::new(app_config.tracker.to_tracker_config());
    let retry_requested = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&retry_requested);
    let actions = OverlayActions::default().on_retry(move || flag.store(true, Ordering::SeqCst));
    let overlay = OverlayHandle::spawn(&tracker, app_config.overlay.to_overlay_config(), actions);

    println!(
        "{} {}",
        style("loadwatch").bold(),
        style(env!("CARGO_PKG_VERSION")).dim()
    );
    println!("  {} {}", style("url:   ").dim(), style(&url).bold());
    println!("  {} {}", style("proxy: ").dim(), proxy.base_str());
    if let Some(source) = &driver_config.source {
        println!("  {} {}", style("source:").dim(), source);
    }
    println!();

    let driver = LoadDriver::new(proxy, Arc::new(HttpLoader::default()), driver_config);

    let bar = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("{spinner} {wide_msg}") {
        bar.set_style(template);
    }
    bar.enable_steady_tick(Duration::from_millis(120));
    bar.set_message(render_view(&overlay.current()));

    let mut views = overlay.subscribe();
    let mut views_open = true;
    let shutdown = loadwatch_api::shutdown_signal();
    tokio::pin!(shutdown);

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let run = driver.run(&tracker, &url);
        tokio::pin!(run);

        let outcome = loop {
            tokio::select! {
                result = &mut run => break Some(result),
                changed = views.changed(), if views_open => {
                    if changed.is_err() {
                        views_open = false;
                    } else {
                        bar.set_message(render_view(&views.borrow_and_update()));
                    }
                }
                _ = &mut shutdown => break None,
            }
        };

        let Some(result) = outcome else {
            bar.finish_and_clear();
            println!("{}", style("Stopped.").dim());
            tracker.shutdown().await;
            return Ok(ExitCode::SUCCESS);
        };

        let view = overlay.current();
        bar.set_message(render_view(&view));

        match result {
            Ok(report) => {
                bar.finish();
                print_report(&report);
                return Ok(ExitCode::SUCCESS);
            }
            Err(e) => {
                bar.println(format!("  {} {}", style("FAILED").red().bold(), e));
                if attempt <= retries
                    && overlay.trigger(ActionKind::Retry)
                    && retry_requested.swap(false, Ordering::SeqCst)
                {
                    bar.println(format!(
                        "  {} attempt {} of {}",
                        style("RETRY ").yellow().bold(),
                        attempt + 1,
                        retries + 1
                    ));
                    tracker.reset().await;
                    continue;
                }
                bar.finish();
                tracker.shutdown().await;
                return Ok(ExitCode::FAILURE);
            }
        }
    }
}

fn render_view(view: &OverlayView) -> String {
    let glyph = match view.icon {
        OverlayIcon::Idle => style("○").dim(),
        OverlayIcon::Connecting => style("◌").cyan(),
        OverlayIcon::Responding => style("◍").blue(),
        OverlayIcon::Loading => style("◐").cyan(),
        OverlayIcon::Success => style("●").green(),
        OverlayIcon::Failure => style("✕").red(),
    };

    let mut lines = vec![format!(
        "{} {}  {}",
        glyph,
        style(&view.message).bold(),
        style(view.elapsed_label.as_deref().unwrap_or("")).dim()
    )];

    if let Some(progress) = &view.progress {
        let filled = usize::from(progress.percent) / 5;
        let bar = format!("{}{}", "█".repeat(filled), "░".repeat(20 - filled.min(20)));
        let bar = match progress.tone {
            ProgressTone::Active => style(bar).cyan(),
            ProgressTone::Pending => style(bar).yellow(),
        };
        lines.push(format!("  {} {:>3}%", bar, progress.percent));
    }

    let dot = match view.status.indicator {
        StreamIndicator::Streaming => style("●").green(),
        StreamIndicator::Waiting => style("●").yellow(),
        StreamIndicator::Offline => style("●").red(),
    };
    lines.push(format!("  {} {}", dot, style(&view.status.text).dim()));

    if let Some(extended) = &view.extended_message {
        lines.push(format!("  {}", style(extended).dim().italic()));
    }

    if let Some(warning) = &view.warning {
        let text = match warning.severity {
            WarningSeverity::Critical => style(&warning.text).red().bold(),
            WarningSeverity::Caution => style(&warning.text).yellow(),
        };
        lines.push(format!("  {}", text));
    }

    if !view.actions.is_empty() {
        let labels: Vec<String> = view
            .actions
            .iter()
            .map(|a| {
                let label = match a.kind {
                    ActionKind::Retry => "retry",
                    ActionKind::SwitchSource => "switch source",
                };
                if a.emphasized {
                    style(label).bold().underlined().to_string()
                } else {
                    label.to_string()
                }
            })
            .collect();
        lines.push(format!("  {} {}", style("actions:").dim(), labels.join(", ")));
    }

    lines.join("\n")
}

fn print_report(report: &LoadReport) {
    println!();
    println!("  {} {}", style("state:   ").dim(), style(report.final_state).green().bold());
    if let Some(variant) = &report.variant_url {
        println!("  {} {}", style("variant: ").dim(), variant);
    }
    println!(
        "  {} {} loaded, {} failed",
        style("segments:").dim(),
        report.segments_loaded,
        report.segment_errors
    );
    println!("  {} {}", style("bytes:   ").dim(), report.bytes);
    if report.key_fetched {
        println!("  {} fetched", style("key:     ").dim());
    }
}

struct UrlRequest {
    kind: String,
    resource: String,
    source: Option<String>,
    allow_cors: Option<bool>,
    username: Option<String>,
    password: Option<String>,
    action: Option<String>,
    mac: Option<String>,
    params: Vec<String>,
}

fn run_url(req: UrlRequest, args: ProxyArgs) -> Result<ExitCode, String> {
    let app_config = load_config(&args)?;
    let proxy = resolve_proxy(&args, &app_config)?;
    let kind: ProxyKind = req.kind.parse().map_err(|e: ProxyError| e.to_string())?;

    let extra = req
        .params
        .iter()
        .map(|p| {
            p.split_once('=')
                .ok_or_else(|| format!("Parameter '{}' must be key=value", p))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let url = match kind {
        ProxyKind::M3u8 if extra.is_empty() => {
            proxy.build_m3u8_proxy_url(&req.resource, req.source.as_deref(), req.allow_cors)
        }
        ProxyKind::Xtream => {
            let (Some(username), Some(password)) = (req.username, req.password) else {
                return Err("xtream URLs need --username and --password".into());
            };
            let credentials = XtreamCredentials {
                username,
                password,
                action: req.action,
            };
            proxy.build_xtream_proxy_url(&req.resource, &credentials, &extra)
        }
        ProxyKind::Stalker => proxy.build_stalker_proxy_url(&req.resource, req.mac.as_deref(), &extra),
        _ => {
            let params = ProxyParams::new(req.resource)
                .source(req.source.as_deref())
                .set_opt("allowCORS", req.allow_cors.filter(|_| kind == ProxyKind::M3u8))
                .extend(extra.iter().copied());
            proxy.build_url(kind, &params)
        }
    };

    println!("{}", url);
    Ok(ExitCode::SUCCESS)
}

async fn run_check(json: bool, args: ProxyArgs) -> Result<ExitCode, String> {
    let app_config = load_config(&args)?;
    let proxy = resolve_proxy(&args, &app_config)?;
    let debug = ProxyDebugInfo::from_env(&proxy);
    let probe = ProxyProbe::new(proxy);

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(format!("Probing {}", probe.config().base_str()));
    let report = probe.smoke_test(debug).await;
    spinner.finish_and_clear();

    if json {
        let out = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
        println!("{}", out);
    } else {
        print_smoke_report(&report);
    }

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_smoke_report(report: &SmokeReport) {
    print_debug_info(&report.debug);

    println!();
    println!("{}", style("Sample URLs").bold());
    for (name, url) in &report.sample_urls {
        println!("  {:<18} {}", style(name).dim(), url);
    }

    println!();
    println!("{}", style("Proxy root").bold());
    match &report.root {
        Ok(root) => {
            let status = if report.root_ok() {
                style(root.status.to_string()).green()
            } else {
                style(root.status.to_string()).red()
            };
            println!(
                "  {} {}  {}",
                style("status:").dim(),
                status,
                style(root.content_type.as_deref().unwrap_or("-")).dim()
            );
        }
        Err(e) => println!("  {} {}", style("FAILED").red().bold(), e),
    }

    if report.root_ok() {
        println!();
        println!("{}", style("Endpoints").bold());
        for endpoint in &report.endpoints {
            let result = match &endpoint.result {
                Ok(status) => style(format!("OK {}", status)).green(),
                Err(e) => style(format!("FAILED {}", e)).red(),
            };
            let cors = if endpoint.has_cors() {
                style(endpoint.cors_headers.join(", ")).dim()
            } else {
                style("no CORS headers".to_string()).yellow()
            };
            println!("  {:<8} {}  {}", endpoint.name, result, cors);
        }
    } else {
        println!();
        println!("{}", style("Skipping endpoint probes: proxy root is not healthy").yellow());
    }

    println!();
    if report.passed() {
        println!("{}", style("Proxy looks healthy.").green().bold());
    } else {
        println!("{}", style("Proxy check failed.").red().bold());
    }
}

fn run_info(json: bool, args: ProxyArgs) -> Result<ExitCode, String> {
    let app_config = load_config(&args)?;
    let proxy = resolve_proxy(&args, &app_config)?;
    let info = ProxyDebugInfo::from_env(&proxy);

    if json {
        let out = serde_json::to_string_pretty(&info).map_err(|e| e.to_string())?;
        println!("{}", out);
    } else {
        print_debug_info(&info);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_debug_info(info: &ProxyDebugInfo) {
    let unset = || style("(unset)".to_string()).dim();
    println!("{}", style("Proxy configuration").bold());
    println!("  {:<30} {}", style("base URL").dim(), style(&info.base_url).bold());
    println!(
        "  {:<30} {}",
        style(loadwatch_core::proxy::PUBLIC_PROXY_URL_ENV).dim(),
        info.public_env.clone().map(style).unwrap_or_else(unset)
    );
    println!(
        "  {:<30} {}",
        style(loadwatch_core::proxy::SERVER_PROXY_URL_ENV).dim(),
        info.server_env.clone().map(style).unwrap_or_else(unset)
    );
}

/// Warnings only, so the live display stays readable. `RUST_LOG` still wins.
fn init_quiet_tracing() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}
