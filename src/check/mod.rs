//! 节点筛选与排名：ping 过滤 -> 逐个测速（带重试） -> 排序并重命名
//!
//! 全程串行：同一时刻只有一个代理进程和一条代理路由。

mod latency;
mod speed;

pub use latency::{IcmpProbe, LatencyProbe, SystemProbe, TcpProbe, parse_ping_output};
pub use speed::{BandwidthTester, HttpSpeedTester, ProxyRoute, average_latency, pick_best, to_mbps};

use log::{info, warn};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::output::config_path;
use crate::proxy::{ServerDescriptor, UNREACHABLE};
use crate::ui::progress::ProgressTracker;
use crate::v2ray::{ProxyHandle, ProxyLauncher};

/// 排名阶段用到的参数
#[derive(Debug, Clone)]
pub struct RankerSettings {
    /// 进入测速阶段的最大节点数
    pub candidate_limit: usize,
    /// 代理进程启动后等待绑定端口的时间
    pub warmup: Duration,
    pub speed_attempts: usize,
    pub retry_delay: Duration,
    /// true 时 tls 节点整体排在非 tls 节点前
    pub prefer_tls: bool,
    pub local_proxy: SocketAddr,
}

impl RankerSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            candidate_limit: config.candidate_limit,
            warmup: config.warmup_duration(),
            speed_attempts: config.speed_attempts.max(1),
            retry_delay: config.retry_delay_duration(),
            prefer_tls: config.prefer_tls,
            local_proxy: config.local_proxy_addr()?,
        })
    }
}

/// 保留 ping 为正的节点，按延迟升序取前 `limit` 个
pub fn select_candidates(
    descriptors: Vec<ServerDescriptor>,
    limit: usize,
) -> Vec<ServerDescriptor> {
    let mut reachable: Vec<ServerDescriptor> = descriptors
        .into_iter()
        .filter(|d| d.bench.is_reachable())
        .collect();
    reachable.sort_by(|a, b| a.bench.ping_millis.total_cmp(&b.bench.ping_millis));
    reachable.truncate(limit);
    reachable
}

/// 按速度降序排序（可选 tls 优先），相同键保持原顺序，并把排名写进名称
pub fn sort_and_label(descriptors: &mut [ServerDescriptor], prefer_tls: bool) {
    descriptors.sort_by(|a, b| {
        let tls = |d: &ServerDescriptor| prefer_tls && d.uses_tls();
        tls(b).cmp(&tls(a)).then_with(|| {
            b.bench
                .download_speed_mbps
                .total_cmp(&a.bench.download_speed_mbps)
        })
    });

    for (idx, descriptor) in descriptors.iter_mut().enumerate() {
        descriptor.display_name = rank_label(idx + 1, descriptor);
    }
}

pub fn rank_label(rank: usize, descriptor: &ServerDescriptor) -> String {
    format!(
        "rank{:02}_{}_{:.3}",
        rank, descriptor.display_name, descriptor.bench.download_speed_mbps
    )
}

pub struct Ranker<P, L, B> {
    settings: RankerSettings,
    probe: P,
    launcher: L,
    tester: B,
    /// 测速配置所在目录（`test_configs/`）
    probe_dir: PathBuf,
    progress: ProgressTracker,
}

impl<P, L, B> Ranker<P, L, B>
where
    P: LatencyProbe,
    L: ProxyLauncher,
    B: BandwidthTester,
{
    pub fn new(settings: RankerSettings, probe: P, launcher: L, tester: B, probe_dir: &Path) -> Self {
        Self {
            settings,
            probe,
            launcher,
            tester,
            probe_dir: probe_dir.to_path_buf(),
            progress: ProgressTracker::disabled(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = progress;
        self
    }

    /// 完整流程，返回排好序并已重命名的节点
    pub async fn rank(&self, descriptors: Vec<ServerDescriptor>) -> Vec<ServerDescriptor> {
        let candidates = self.ping_filter(descriptors).await;
        let mut benched = self.measure_all(candidates).await;
        sort_and_label(&mut benched, self.settings.prefer_tls);
        benched
    }

    /// 阶段一：逐个 ping，过滤并截断
    pub async fn ping_filter(&self, mut descriptors: Vec<ServerDescriptor>) -> Vec<ServerDescriptor> {
        info!("正在进行ping测试...");
        self.progress.start_ping_stage(descriptors.len() as u64);

        for descriptor in descriptors.iter_mut() {
            descriptor.bench.ping_millis = match self.probe.ping(descriptor).await {
                Ok(millis) => millis,
                Err(_) => UNREACHABLE,
            };
            self.progress
                .increment_ping(&descriptor.display_name, descriptor.bench.is_reachable());
        }
        self.progress.finish_ping_stage();

        let total = descriptors.len();
        let candidates = select_candidates(descriptors, self.settings.candidate_limit);
        info!("ping 通过 {} 个节点，共计 {} 个", candidates.len(), total);
        candidates
    }

    /// 阶段二：按 ping 顺序逐个测速
    pub async fn measure_all(&self, mut candidates: Vec<ServerDescriptor>) -> Vec<ServerDescriptor> {
        let total = candidates.len();
        self.progress.start_speed_stage(total as u64);

        for (idx, descriptor) in candidates.iter_mut().enumerate() {
            info!("正在测试第{}个，共计{}个", idx + 1, total);
            self.progress
                .set_speed_message(format!("测试 {}", descriptor.display_name));
            self.measure(descriptor).await;
            self.progress.increment_speed(
                &descriptor.display_name,
                descriptor.bench.download_speed_mbps,
            );
        }
        self.progress.finish_speed_stage();

        candidates
    }

    /// 单个节点测速：最多尝试 `speed_attempts` 次，得到正速度即停止
    pub async fn measure(&self, descriptor: &mut ServerDescriptor) {
        let path = config_path(&self.probe_dir, descriptor);
        let attempts = self.settings.speed_attempts;
        let mut speed = 0.0;

        for attempt in 1..=attempts {
            speed = self.run_trial(descriptor, &path).await;
            if speed > 0.0 {
                break;
            }
            if attempt < attempts {
                info!("重试第{}次...", attempt + 1);
                tokio::time::sleep(self.settings.retry_delay).await;
            }
        }

        descriptor.bench.download_speed_mbps = speed;
        info!("{} {:.3} MB/s", descriptor.display_name, speed);
    }

    /// 一次测速：启动代理 -> 下载 -> 终止代理
    async fn run_trial(&self, descriptor: &ServerDescriptor, path: &Path) -> f64 {
        let Some(mut process) = self.launch_checked(path).await else {
            warn!("{} 代理进程无法启动，本次记为失败", descriptor.display_name);
            return UNREACHABLE;
        };

        let route = ProxyRoute::local(self.settings.local_proxy);
        let speed = match self.tester.measure(&route).await {
            Ok(speed) => speed,
            Err(e) => {
                warn!("测试 {} 服务失败: {}", descriptor.display_name, e);
                UNREACHABLE
            }
        };
        drop(route);

        process.terminate().await;
        speed
    }

    /// 启动并等待预热；进程已退出时清理残留进程后重建一次
    async fn launch_checked(&self, path: &Path) -> Option<L::Handle> {
        for attempt in 0..2 {
            if attempt > 0 {
                let killed = self.launcher.sweep_stale().await;
                info!("重建代理进程（清理残留进程 {} 个）...", killed);
            }

            match self.launcher.launch(path).await {
                Ok(mut process) => {
                    tokio::time::sleep(self.settings.warmup).await;
                    if process.is_alive() {
                        return Some(process);
                    }
                    warn!("代理进程执行失败: {}", path.display());
                    process.terminate().await;
                }
                Err(e) => warn!("{}", e),
            }
        }
        None
    }
}
