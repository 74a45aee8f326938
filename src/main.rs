use std::fs;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use log::info;

use mapposter::cdp::CdpLauncher;
use mapposter::server::{self, PosterService};
use mapposter::settings::{Cli, Command, RenderArgs, ServeArgs};
use mapposter::{OutputStore, PosterConfig, RenderPipeline};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level.as_str()))
        .init();

    match cli.command {
        Command::Serve(args) => serve(args),
        Command::Render(args) => render(args),
    }
}

fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let addr = args.addr();
    let options = args.render.into_render_options()?;
    let store = OutputStore::new(&args.output_dir);
    store.ensure_dir()?;

    info!(
        "Renderer at {}, {} profile, output in {}",
        options.renderer_url,
        options.profile,
        store.dir().display()
    );
    let service = Arc::new(PosterService::new(RenderPipeline::new(
        CdpLauncher,
        store,
        options,
    )));
    server::serve(service, &addr, args.max_body_bytes)?;
    Ok(())
}

fn render(args: RenderArgs) -> anyhow::Result<()> {
    let json = fs::read_to_string(&args.config)
        .with_context(|| format!("Failed to read {}", args.config.display()))?;
    let config = PosterConfig::from_json(&json)?;

    let options = args.render.into_render_options()?;
    let pipeline = RenderPipeline::new(CdpLauncher, OutputStore::new(&args.output_dir), options);
    let result = pipeline.render(config).into_result();

    if !result.success {
        if let Some(details) = &result.details {
            for detail in details {
                eprintln!("  - {}", detail);
            }
        }
        bail!(
            "Poster generation failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    let saved = result
        .output_path
        .as_ref()
        .context("Render succeeded without a saved poster")?;
    if let Some(out) = &args.out {
        fs::copy(saved, out).with_context(|| format!("Failed to copy poster to {}", out.display()))?;
        info!("Poster written to {}", out.display());
    }
    if let Some(metadata) = &result.metadata {
        println!(
            "{} {}x{} @ {} DPI ({} MB{})",
            result.job_id,
            metadata.width,
            metadata.height,
            metadata.dpi,
            metadata.size_in_mb,
            if metadata.degraded { ", degraded" } else { "" }
        );
    }
    Ok(())
}
