mod render;

use anyhow::Context;
use bucketsync_lib::config::{AppConfig, SyncSettings};
use bucketsync_lib::core::checkpoint::format_age;
use bucketsync_lib::core::verify::truncated;
use bucketsync_lib::core::{
    ChannelProgress, CheckpointStore, RunMode, SyncEngine, SyncReport, VerifyReport, REPORT_LIMIT,
};
use bucketsync_lib::logging::{init_logging, LogConfig};
use clap::{Parser, Subcommand};
use humansize::{format_size, BINARY};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// 对象存储单向对账与断点续传复制
#[derive(Parser)]
#[command(name = "bucketsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// 工作目录，config.json 与检查点目录相对于此
    #[arg(long, global = true, default_value = ".")]
    workdir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 同步全部对象，或只同步指定对象
    Sync {
        /// 对象名
        name: Option<String>,
    },
    /// 重新列举两端并比较
    Verify {
        /// 对大小相同的对象比较内容摘要
        #[arg(long)]
        deep: bool,
    },
    /// 同步后立即校验
    All {
        #[arg(long)]
        deep: bool,
    },
    /// 把目标端的对象复制回源端
    Copyback {
        name: String,
    },
    /// 查看或清除检查点
    #[command(subcommand)]
    Checkpoint(CheckpointCommands),
}

#[derive(Subcommand)]
enum CheckpointCommands {
    /// 检查点状态
    Status,
    /// 删除快照与完成日志
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = SyncSettings::load(&cli.workdir);
    let log_config = LogConfig::load(&cli.workdir);
    let _guard = init_logging(
        &log_config,
        &settings.checkpoint_path(&cli.workdir).join("logs"),
    );

    match run(cli, settings).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("错误: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, settings: SyncSettings) -> anyhow::Result<ExitCode> {
    let work_dir = cli.workdir;

    // 检查点命令不需要凭据
    if let Commands::Checkpoint(command) = &cli.command {
        let store = CheckpointStore::new(settings.checkpoint_path(&work_dir));
        return checkpoint_command(command, &store);
    }

    let config = AppConfig::from_lookup(|key| std::env::var(key).ok(), settings)?;
    let (progress, rx) = ChannelProgress::new();
    let renderer = tokio::spawn(render::render(rx));
    let engine = SyncEngine::connect(&config, &work_dir, Arc::new(progress))
        .context("无法初始化存储")?;

    let outcome = match cli.command {
        Commands::Sync { name: Some(name) } => engine.sync_single(&name).await.map(Outcome::Sync),
        Commands::Sync { name: None } => engine.run_sync().await.map(Outcome::Sync),
        Commands::Verify { deep } => engine.verify(deep).await.map(Outcome::Verify),
        Commands::All { deep } => match engine.run_sync().await {
            Ok(report) => engine
                .verify(deep)
                .await
                .map(|verify| Outcome::All(report, verify)),
            Err(e) => Err(e),
        },
        Commands::Copyback { name } => engine.copyback(&name).await.map(Outcome::Sync),
        Commands::Checkpoint(_) => unreachable!("handled above"),
    };

    // 关闭进度通道，等渲染结束再输出汇总
    drop(engine);
    let _ = renderer.await;

    match outcome? {
        Outcome::Sync(report) => print_sync_report(&report),
        Outcome::Verify(report) => print_verify_report(&report),
        Outcome::All(report, verify) => {
            print_sync_report(&report);
            println!("---");
            print_verify_report(&verify);
        }
    }
    Ok(ExitCode::SUCCESS)
}

enum Outcome {
    Sync(SyncReport),
    Verify(VerifyReport),
    All(SyncReport, VerifyReport),
}

fn checkpoint_command(
    command: &CheckpointCommands,
    store: &CheckpointStore,
) -> anyhow::Result<ExitCode> {
    match command {
        CheckpointCommands::Status => print_checkpoint_status(store),
        CheckpointCommands::Clear => {
            store.clear().context("清除检查点失败")?;
            println!("检查点已清除: {}", store.dir().display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_checkpoint_status(store: &CheckpointStore) {
    if !store.has_checkpoint() {
        println!("没有检查点 ({})", store.dir().display());
        return;
    }

    println!("检查点: {} (保存于 {})", store.dir().display(), format_age(store.age()));
    match store.load_snapshot() {
        Some(restored) => {
            println!("  源端清单: {} 个对象", restored.source.len());
            println!("  目标端清单: {} 个对象", restored.destination.len());
            println!(
                "  完成日志: {} 条 (跳过损坏行 {} 条)",
                restored.journal_applied, restored.journal_skipped
            );
        }
        None => println!("  快照已损坏，下次同步将重新列举"),
    }
}

fn print_sync_report(report: &SyncReport) {
    if report.resumed {
        println!("已从检查点恢复");
    }
    match report.mode {
        RunMode::Full => println!("同步完成"),
        RunMode::Single => println!("单对象同步完成"),
        RunMode::Copyback => println!("反向复制完成"),
    }
    println!("成功: {}", report.synced);
    println!("跳过: {}", report.skipped);
    if report.failed > 0 {
        println!("失败: {}", report.failed);
        for error in &report.errors {
            println!("  - {}", error);
        }
        if report.mode == RunMode::Full {
            println!("检查点已保留，重新运行将从断点继续");
        }
    }
    println!(
        "传输: {} (耗时 {:.1}s)",
        format_size(report.bytes_transferred, BINARY),
        report.duration.as_secs_f64()
    );
    if report.extra > 0 {
        println!("目标端多余对象: {} (不会删除)", report.extra);
    }
}

fn print_verify_report(report: &VerifyReport) {
    println!("源端: {} 个对象", report.source_count);
    println!("目标端: {} 个对象", report.dest_count);

    if report.passed() {
        println!("✓ 校验通过: 所有对象一致 (忽略目标端多余对象)");
    } else {
        println!("✗ 校验失败");
    }

    print_section("目标端缺失", &report.missing, |name| name.clone());
    print_section("大小不同", &report.size_mismatch, |m| {
        format!("{} (源: {}, 目标: {})", m.name, m.source_size, m.dest_size)
    });
    print_section("内容不同", &report.content_mismatch, |name| name.clone());
    print_section("目标端多余", &report.extra, |name| name.clone());
    if report.digested > 0 {
        println!("已比对内容摘要: {} 个对象", report.digested);
    }
}

fn print_section<T>(title: &str, items: &[T], describe: impl Fn(&T) -> String) {
    if items.is_empty() {
        return;
    }
    println!("{} ({}):", title, items.len());
    let (shown, more) = truncated(items, REPORT_LIMIT);
    for item in shown {
        println!("  - {}", describe(item));
    }
    if more > 0 {
        println!("  ...以及另外 {} 个", more);
    }
}
