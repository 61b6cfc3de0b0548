use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use subs_bench_rust::check::{HttpSpeedTester, Ranker, RankerSettings, SystemProbe};
use subs_bench_rust::config::Config;
use subs_bench_rust::output::{self, DocumentKind};
use subs_bench_rust::proxy::ServerDescriptor;
use subs_bench_rust::subscription::{decode_subscription, fetch_subscription};
use subs_bench_rust::ui::progress::ProgressTracker;
use subs_bench_rust::v2ray::{Templates, V2rayLauncher};

/// 订阅节点导出与测速工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 订阅链接
    url: String,

    /// 测速模式：测速排名后输出最优配置
    #[arg(short = 't', long)]
    test: bool,

    /// 配置文件路径
    #[arg(short = 'f', long, default_value = "config/config.yaml")]
    config: String,

    /// v2ray 可执行文件
    #[arg(long)]
    binary: Option<String>,

    /// 进入测速阶段的节点数量上限
    #[arg(long)]
    limit: Option<usize>,

    /// tls 节点优先
    #[arg(long)]
    prefer_tls: bool,

    /// 任一节点解码失败即退出
    #[arg(long)]
    strict: bool,

    /// 是否显示进度条
    #[arg(long)]
    progress: Option<bool>,

    /// 日志级别（默认取配置文件中的 log_level）
    #[arg(long)]
    log_level: Option<String>,

    /// 详细输出
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(path: &str) -> Config {
    if Path::new(path).exists() {
        println!("📁 从配置文件加载设置: {}", path);
        match Config::load_from_file(path) {
            Ok(config) => {
                println!("✅ 配置文件加载成功");
                config
            }
            Err(e) => {
                println!("⚠️  配置文件加载失败: {}", e);
                println!("📝 使用默认配置");
                Config::default()
            }
        }
    } else {
        println!("📝 使用默认配置 (配置文件不存在: {})", path);
        Config::default()
    }
}

fn print_results(results: &[ServerDescriptor]) {
    println!("\n测速结果:");
    println!("{:=<80}", "");
    println!("{:<6}{:<40}{:<6}{:>12}{:>12}", "排名", "节点", "tls", "MB/s", "ping(ms)");
    println!("{:-<80}", "");

    for (i, server) in results.iter().enumerate() {
        println!(
            "{:<6}{:<40}{:<6}{:>12.3}{:>12.1}",
            i + 1,
            server.display_name,
            if server.uses_tls() { "✅" } else { "❌" },
            server.bench.download_speed_mbps,
            server.bench.ping_millis
        );
    }
    println!("{:=<80}", "");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    println!("🚀 订阅测速工具 v{}", env!("CARGO_PKG_VERSION"));
    println!("{:=<80}", "");

    let mut config = load_config(&args.config);

    // RUST_LOG 优先，其次命令行，最后配置文件
    let level = if args.verbose {
        "debug".to_string()
    } else {
        args.log_level.unwrap_or_else(|| config.log_level.clone())
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    // 覆盖命令行参数
    if let Some(binary) = args.binary {
        config.proxy_binary = binary;
    }
    if let Some(limit) = args.limit {
        config.candidate_limit = limit;
    }
    if args.prefer_tls {
        config.prefer_tls = true;
    }
    if args.strict {
        config.strict_decode = true;
    }
    if let Some(progress) = args.progress {
        config.print_progress = progress;
    }
    config.validate()?;

    let local_proxy = config.local_proxy_addr()?;
    let templates = Templates::load(
        config.config_template.as_deref(),
        config.test_config_template.as_deref(),
        local_proxy,
    )?;

    println!("\n📡 拉取订阅...");
    let content = fetch_subscription(&args.url, config.fetch_timeout_duration()).await?;
    let mut servers = decode_subscription(&content, config.strict_decode)
        .context("订阅解码失败")?;
    output::dedupe_names(&mut servers);
    println!("✅ 解析到 {} 个节点", servers.len());

    if args.test {
        run_benchmark(&config, &templates, servers).await
    } else {
        let target = &config.output.configs;
        output::clear_dir(&target.path)?;
        output::write_all(&templates, &servers, DocumentKind::Full, target)?;
        println!("💾 配置已写入: {}", target.path.display());
        Ok(())
    }
}

async fn run_benchmark(
    config: &Config,
    templates: &Templates,
    servers: Vec<ServerDescriptor>,
) -> Result<()> {
    config.validate_speed_test()?;
    let probe_dir: PathBuf = config.output.test_configs.path.clone();

    // 测速前清理上次的输出
    output::clear_dir(&probe_dir)?;
    output::clear_dir(&config.output.bench_configs.path)?;
    output::write_all(templates, &servers, DocumentKind::Probe, &config.output.test_configs)?;

    println!("\n⚙️  当前配置:");
    println!("  代理程序: {}", config.proxy_binary);
    println!("  本地代理: {}", config.local_proxy);
    println!("  测速节点上限: {}", config.candidate_limit);
    println!("  重试次数: {}", config.speed_attempts);
    println!(
        "  tls 优先: {}",
        if config.prefer_tls { "✅ 启用" } else { "❌ 禁用" }
    );

    let progress = ProgressTracker::new(config);
    let ranker = Ranker::new(
        RankerSettings::from_config(config)?,
        SystemProbe::new(config.ping_method, config.ping_timeout_duration()),
        V2rayLauncher::new(&config.proxy_binary),
        HttpSpeedTester::from_config(config),
        &probe_dir,
    )
    .with_progress(progress.clone());

    println!("\n🔍 开始测速...");
    let ranked = ranker.rank(servers).await;

    let stats = progress.get_stats();
    if progress.is_enabled() {
        println!("ping 通过: {}，测速成功: {}", stats.reachable, stats.measured);
    }

    // 排名后重建最优配置目录
    let target = &config.output.bench_configs;
    output::clear_dir(&target.path)?;
    output::write_all(templates, &ranked, DocumentKind::Full, target)?;

    print_results(&ranked);
    println!("💾 最优配置已写入: {}", target.path.display());
    println!("\n🎉 测速完成!");

    Ok(())
}
