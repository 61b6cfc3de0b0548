use crate::config::Config;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone)]
pub struct ProgressTracker {
    multi_progress: Option<Arc<MultiProgress>>,
    ping_progress: Option<ProgressBar>,
    speed_progress: Option<ProgressBar>,
    reachable_nodes: Arc<AtomicU64>,
    fast_nodes: Arc<AtomicU64>,
}

impl ProgressTracker {
    pub fn new(config: &Config) -> Self {
        if !config.print_progress {
            return Self::disabled();
        }

        let multi_progress = Arc::new(MultiProgress::new());

        // ping 筛选进度
        let ping_progress = multi_progress.add(ProgressBar::new(0));
        if let Ok(style) = ProgressStyle::with_template(
            "  {spinner:.yellow} 延迟检测: [{bar:30.yellow}] {pos}/{len} {msg}",
        ) {
            ping_progress.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }

        // 测速进度
        let speed_progress = multi_progress.add(ProgressBar::new(0));
        if let Ok(style) = ProgressStyle::with_template(
            "  {spinner:.green} 测速检测: [{bar:30.green}] {pos}/{len} ({eta}) {msg}",
        ) {
            speed_progress.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }

        Self {
            multi_progress: Some(multi_progress),
            ping_progress: Some(ping_progress),
            speed_progress: Some(speed_progress),
            reachable_nodes: Arc::new(AtomicU64::new(0)),
            fast_nodes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn disabled() -> Self {
        Self {
            multi_progress: None,
            ping_progress: None,
            speed_progress: None,
            reachable_nodes: Arc::new(AtomicU64::new(0)),
            fast_nodes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn start_ping_stage(&self, total: u64) {
        if let Some(pb) = &self.ping_progress {
            pb.set_length(total);
            pb.set_position(0);
        }
    }

    pub fn increment_ping(&self, name: &str, reachable: bool) {
        if reachable {
            self.reachable_nodes.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(pb) = &self.ping_progress {
            pb.inc(1);
            pb.set_message(format!("{} {}", if reachable { "✅" } else { "❌" }, name));
        }
    }

    pub fn finish_ping_stage(&self) {
        if let Some(pb) = &self.ping_progress {
            pb.finish_with_message("完成");
        }
    }

    pub fn start_speed_stage(&self, total: u64) {
        if let Some(pb) = &self.speed_progress {
            pb.set_length(total);
            pb.set_position(0);
        }
    }

    pub fn set_speed_message(&self, message: String) {
        if let Some(pb) = &self.speed_progress {
            pb.set_message(message);
        }
    }

    pub fn increment_speed(&self, name: &str, speed: f64) {
        if speed > 0.0 {
            self.fast_nodes.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(pb) = &self.speed_progress {
            pb.inc(1);
            pb.set_message(format!("{} {:.3} MB/s", name, speed));
        }
    }

    pub fn finish_speed_stage(&self) {
        if let Some(pb) = &self.speed_progress {
            pb.finish_with_message("完成");
        }
    }

    pub fn get_stats(&self) -> ProgressStats {
        ProgressStats {
            reachable: self.reachable_nodes.load(Ordering::Relaxed),
            measured: self.fast_nodes.load(Ordering::Relaxed),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.multi_progress.is_some()
    }
}

pub struct ProgressStats {
    /// ping 通过的节点数
    pub reachable: u64,
    /// 测得正速度的节点数
    pub measured: u64,
}
