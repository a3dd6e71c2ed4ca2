//! Check engine availability and workspace setup.

use scenecast_common::config::AppConfig;
use scenecast_render_engine::{DiskWorkspace, ProcessRunner, RenderWorkspace};

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Scenecast System Check");
    println!("{}", "=".repeat(50));

    let runner = ProcessRunner::from_config(&config.engine);
    let engine_ok = runner.is_available();
    if engine_ok {
        println!("[OK] Rendering engine: {}", runner.program());
    } else {
        println!("[WARN] Rendering engine not found: {}", runner.program());
    }
    if !config.engine.base_args.is_empty() {
        println!("     Base arguments: {}", config.engine.base_args.join(" "));
    }
    match config.engine.max_runtime_secs {
        Some(secs) => println!("[OK] Render time limit: {secs}s"),
        None => println!("[OK] Render time limit: none"),
    }

    let workspace = DiskWorkspace::from_config(&config.workspace);
    let root = workspace.working_dir();
    let workspace_ok = match std::fs::create_dir_all(root) {
        Ok(()) => {
            println!("[OK] Workspace: {}", root.display());
            true
        }
        Err(e) => {
            println!("[WARN] Workspace {} is not usable: {e}", root.display());
            false
        }
    };
    println!("     Scripts: {}", workspace.upload_dir().display());
    println!("     Media:   {}", workspace.media_root().display());
    println!(
        "[OK] Observer queue capacity: {}",
        config.observers.channel_capacity
    );

    println!();
    if engine_ok && workspace_ok {
        println!("Everything needed to render is available. Scenecast is ready.");
    } else {
        println!("Some requirements are missing. See above for details.");
    }

    Ok(())
}
