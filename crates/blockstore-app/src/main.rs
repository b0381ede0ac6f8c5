//! 构件库命令行宿主
//! 驱动命令层与撤销栈，并提供存储检查和维护操作

mod cli;
mod history;
mod model;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use blockstore_core::diagnostics::{RecordingDiagnostics, Severity};
use blockstore_core::record::{BlockId, BuildingBlock};
use blockstore_db::{
    CreateCommand, Database, DeleteCommand, ModelCommand, ModelContext, StoreConfig,
};
use cli::{Cli, Commands};
use history::{CommandHistory, HistoryStep};
use model::{Extrude, Fillet, Sketch};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing::subscriber::set_global_default(FmtSubscriber::builder().with_max_level(level).finish())?;

    let config = match &cli.config {
        Some(path) => StoreConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => StoreConfig::default(),
    };

    match cli.command {
        Commands::Demo => run_demo(&cli.store, config),
        Commands::Inspect { json } => run_inspect(&cli.store, config, json),
        Commands::Compact => run_compact(&cli.store, config),
        Commands::Upgrade { collection } => run_upgrade(&cli.store, config, &collection),
        Commands::Export { out } => run_export(&cli.store, config, &out),
    }
}

fn require_store(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("store {} does not exist", path.display());
    }
    Ok(())
}

fn print_step(action: &str, step: &HistoryStep) {
    match step {
        HistoryStep::Applied(description) => println!("  {}: {}", action, description),
        HistoryStep::Failed(description) => println!("  {}失败: {}", action, description),
        HistoryStep::Empty => println!("  没有可{}的操作", action),
    }
}

fn run_demo(path: &Path, config: StoreConfig) -> Result<()> {
    info!("Starting demo on {}", path.display());

    let database = Database::open_file(path, model::registry(), config)?;
    let diagnostics = RecordingDiagnostics::new();
    let mut context = ModelContext::open(database, Arc::new(diagnostics.clone()));
    let mut history = CommandHistory::new();

    let sketch = Sketch::new(
        "profile",
        vec![[0.0, 0.0], [40.0, 0.0], [40.0, 20.0], [0.0, 20.0]],
    );
    let extrude = Extrude::new(&sketch, 15.0);
    let fillet = Fillet::new(&extrude, 2.5);

    println!("创建构件:");
    let commands: Vec<Box<dyn ModelCommand>> = vec![
        Box::new(CreateCommand::new(sketch.clone())),
        Box::new(CreateCommand::new(extrude.clone())),
        Box::new(CreateCommand::new(fillet.clone())),
    ];
    for command in commands {
        let description = command.description();
        if !history.execute(command, &mut context) {
            bail!("command failed: {}", description);
        }
        println!("  执行: {}", description);
    }

    let order = context.invalidation_order([sketch.id()])?;
    println!("修改草图后的重建顺序:");
    for id in &order {
        println!("  {}", describe(&context, id));
    }

    println!("撤销/重做:");
    print_step("撤销", &history.undo(&mut context));
    print_step("重做", &history.redo(&mut context));

    println!("删除草图（级联）:");
    if !history.execute(Box::new(DeleteCommand::new(sketch.id())), &mut context) {
        bail!("failed to delete sketch {}", sketch.id());
    }
    println!("  剩余构件: {}", context.tree().len());
    print_step("撤销", &history.undo(&mut context));
    println!("  剩余构件: {}", context.tree().len());
    println!(
        "历史: {} 条命令 (可撤销: {}, 可重做: {})",
        history.len(),
        history.can_undo(),
        history.can_redo()
    );

    let warnings = diagnostics.count(Severity::Warning);
    let errors = diagnostics.count(Severity::Error);
    println!("诊断: {} 个警告, {} 个错误", warnings, errors);

    context.close()?;
    Ok(())
}

/// 构件所属集合与ID
fn describe(context: &ModelContext, id: &BlockId) -> String {
    match context.database().owner_of(id) {
        Ok(Some(collection)) => format!("{} {}", collection, id),
        _ => id.to_string(),
    }
}

#[derive(Serialize)]
struct CollectionReport {
    name: &'static str,
    declared: String,
    saved: String,
    documents: usize,
}

#[derive(Serialize)]
struct InspectReport {
    application_version: String,
    collections: Vec<CollectionReport>,
    blocks_loaded: usize,
    load_errors: usize,
}

fn run_inspect(path: &Path, config: StoreConfig, json: bool) -> Result<()> {
    require_store(path)?;
    let database = Database::open_file(path, model::registry(), config)?;

    let counts = database.collection_counts()?;
    let collections = database
        .registry()
        .iter()
        .zip(counts)
        .map(|(collection, (_, documents))| CollectionReport {
            name: collection.name(),
            declared: collection.version().to_string(),
            saved: collection.saved_version().to_string(),
            documents,
        })
        .collect();
    let application_version = database.registry().metadata().application_version.clone();

    let diagnostics = RecordingDiagnostics::new();
    let context = ModelContext::open(database, Arc::new(diagnostics.clone()));
    let report = InspectReport {
        application_version,
        collections,
        blocks_loaded: context.tree().len(),
        load_errors: diagnostics.count(Severity::Error),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("存储: {}", path.display());
        println!("应用版本: {}", report.application_version);
        for collection in &report.collections {
            println!(
                "  {:<12} 声明 {:<8} 保存 {:<8} 文档 {}",
                collection.name, collection.declared, collection.saved, collection.documents
            );
        }
        println!("已加载构件: {} (错误 {})", report.blocks_loaded, report.load_errors);
    }
    Ok(())
}

fn run_compact(path: &Path, config: StoreConfig) -> Result<()> {
    require_store(path)?;
    let before = std::fs::metadata(path)?.len();

    let database = Database::open_file(path, model::registry(), config)?;
    database.close()?;

    let after = std::fs::metadata(path)?.len();
    println!("压缩完成: {} -> {} 字节", before, after);
    Ok(())
}

fn run_upgrade(path: &Path, config: StoreConfig, collection: &str) -> Result<()> {
    require_store(path)?;
    let mut database = Database::open_file(path, model::registry(), config)?;
    let count = database.upgrade_collection(collection)?;
    database.close()?;
    println!("已升级集合 {}: {} 个文档", collection, count);
    Ok(())
}

fn run_export(path: &Path, config: StoreConfig, out: &Path) -> Result<()> {
    require_store(path)?;
    let database = Database::open_file(path, model::registry(), config)?;
    let bytes = database.export_bytes()?;
    std::fs::write(out, &bytes).with_context(|| format!("failed to write {}", out.display()))?;
    info!("Exported {} bytes to {}", bytes.len(), out.display());
    println!("已导出 {} 字节到 {}", bytes.len(), out.display());
    Ok(())
}
