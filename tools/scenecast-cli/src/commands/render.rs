//! Render a script and stream the engine's output.

use std::io::Write;
use std::path::PathBuf;

use scenecast_common::config::AppConfig;
use scenecast_render_engine::{
    Quality, RenderOrchestrator, RenderOutcome, RenderRequest, ScriptUpload,
};

pub async fn run(
    config: AppConfig,
    script: PathBuf,
    quality: String,
    transparent: bool,
    vertical: bool,
    json: bool,
) -> anyhow::Result<()> {
    let quality: Quality = quality.parse()?;
    let upload = ScriptUpload::from_path(&script)
        .map_err(|e| anyhow::anyhow!("Failed to read script: {e}"))?;
    let request = RenderRequest::new(upload)
        .with_quality(quality)
        .transparent(transparent)
        .vertical(vertical);

    if !json {
        println!("Rendering script: {}", script.display());
        println!("  Quality: {quality} ({})", quality.flag());
        if vertical {
            let (width, height) = quality.vertical_resolution();
            println!("  Resolution: {width}x{height} (vertical)");
        }
        if transparent {
            println!("  Background: transparent");
        }
        println!();
    }

    let orchestrator = RenderOrchestrator::from_config(&config);

    // Live output goes to stderr in JSON mode so stdout stays parseable.
    let mut observer = orchestrator.hub().subscribe();
    let observer_id = observer.id();
    let printer = tokio::spawn(async move {
        while let Some(message) = observer.recv().await {
            let line_end = if message.ends_with('\n') { "" } else { "\n" };
            if json {
                eprint!("{message}{line_end}");
            } else {
                print!("{message}{line_end}");
                let _ = std::io::stdout().flush();
            }
        }
    });

    let result = tokio::select! {
        result = orchestrator.render(request) => result,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.hub().unsubscribe(observer_id);
            let _ = printer.await;
            anyhow::bail!("Render interrupted");
        }
    };

    // Dropping the hub's sender lets the printer drain what is queued and stop.
    orchestrator.hub().unsubscribe(observer_id);
    let _ = printer.await;

    let details = result
        .as_ref()
        .ok()
        .map(|r| (r.artifact_path().map(|p| p.display().to_string()), r.elapsed));
    let setup_problem = result.as_ref().is_err_and(|e| !e.engine_ran());
    let outcome = RenderOutcome::from_render(result, orchestrator.workspace().working_dir());

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!();
        match &outcome {
            RenderOutcome::Success { file_url, kind } => {
                println!("Render complete: {file_url} ({kind})");
                if let Some((Some(path), elapsed)) = &details {
                    println!("  File: {path}");
                    println!("  Elapsed: {:.1}s", elapsed.as_secs_f64());
                }
            }
            RenderOutcome::Failure { reason } => {
                println!("Render failed: {reason}");
                if setup_problem {
                    println!("  Run `scenecast check` to verify the engine and workspace setup.");
                }
            }
        }
    }

    if let RenderOutcome::Failure { reason } = outcome {
        anyhow::bail!(reason);
    }
    Ok(())
}
