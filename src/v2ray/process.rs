//! 代理进程生命周期：启动、存活检查、终止、清理残留进程

use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

use crate::error::BenchError;

/// 一个正在运行的代理进程
#[async_trait]
pub trait ProxyHandle: Send {
    fn is_alive(&mut self) -> bool;

    /// 终止进程，失败只记录日志
    async fn terminate(&mut self);
}

/// 代理进程启动器
#[async_trait]
pub trait ProxyLauncher: Send + Sync {
    type Handle: ProxyHandle;

    async fn launch(&self, config_path: &Path) -> Result<Self::Handle, BenchError>;

    /// 杀掉同名且不属于 root 的残留进程，返回杀掉的数量
    async fn sweep_stale(&self) -> usize;
}

/// 以 `<binary> -config <path>` 方式启动 v2ray
#[derive(Debug, Clone)]
pub struct V2rayLauncher {
    binary: PathBuf,
}

impl V2rayLauncher {
    pub fn new<P: Into<PathBuf>>(binary: P) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// 进程名（/proc/<pid>/comm 中的形式，最长 15 字节）
    pub fn process_name(&self) -> String {
        let name = self
            .binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        truncate_comm(&name)
    }
}

pub struct V2rayProcess {
    child: Child,
    pid: Option<u32>,
}

impl V2rayProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

#[async_trait]
impl ProxyHandle for V2rayProcess {
    fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!("代理进程 {:?} 已退出: {}", self.pid, status);
                false
            }
            Err(e) => {
                warn!("error try_wait proxy process {:?}: {}", self.pid, e);
                false
            }
        }
    }

    async fn terminate(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        if let Err(e) = self.child.kill().await {
            warn!("proxy {:?} kill failed! {}", self.pid, e);
        }
    }
}

#[async_trait]
impl ProxyLauncher for V2rayLauncher {
    type Handle = V2rayProcess;

    async fn launch(&self, config_path: &Path) -> Result<V2rayProcess, BenchError> {
        info!("启动代理进程: {} -config {}", self.binary.display(), config_path.display());

        let child = Command::new(&self.binary)
            .arg("-config")
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BenchError::ProcessLaunch(format!("{}: {}", self.binary.display(), e))
            })?;

        let pid = child.id();
        Ok(V2rayProcess { child, pid })
    }

    async fn sweep_stale(&self) -> usize {
        let name = self.process_name();
        let own = std::process::id();
        let mut killed = 0;

        for pid in stale_pids(&name).into_iter().filter(|pid| *pid != own) {
            match Command::new("kill").arg("-9").arg(pid.to_string()).status().await {
                Ok(status) if status.success() => {
                    debug!("已杀死残留进程 {} ({})", pid, name);
                    killed += 1;
                }
                Ok(status) => warn!("kill {} exited with {}", pid, status),
                Err(e) => warn!("kill {} failed: {}", pid, e),
            }
        }

        killed
    }
}

fn truncate_comm(name: &str) -> String {
    let mut end = name.len().min(15);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// 从 /proc/<pid>/status 中取真实 uid
pub fn parse_status_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|uid| uid.parse().ok())
}

#[cfg(target_os = "linux")]
fn stale_pids(name: &str) -> Vec<u32> {
    use std::fs;

    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| {
            let comm = fs::read_to_string(format!("/proc/{}/comm", pid)).unwrap_or_default();
            if comm.trim_end() != name {
                return false;
            }
            let status = fs::read_to_string(format!("/proc/{}/status", pid)).unwrap_or_default();
            matches!(parse_status_uid(&status), Some(uid) if uid != 0)
        })
        .collect()
}

#[cfg(not(target_os = "linux"))]
fn stale_pids(name: &str) -> Vec<u32> {
    debug!("当前平台不支持扫描残留进程: {}", name);
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_uid_is_parsed() {
        let status = "Name:\tv2ray\nState:\tS (sleeping)\nUid:\t1000\t1000\t1000\t1000\nGid:\t1000\n";
        assert_eq!(parse_status_uid(status), Some(1000));
        assert_eq!(parse_status_uid("Name:\tv2ray\n"), None);
    }

    #[test]
    fn process_name_uses_file_name() {
        assert_eq!(V2rayLauncher::new("/usr/local/bin/v2ray").process_name(), "v2ray");
        assert_eq!(
            V2rayLauncher::new("a-very-long-binary-name").process_name(),
            "a-very-long-bin"
        );
    }

    #[tokio::test]
    async fn missing_binary_is_launch_failure() {
        let launcher = V2rayLauncher::new("/nonexistent/v2ray-binary");
        let err = launcher.launch(Path::new("config.json")).await.err().unwrap();
        assert!(matches!(err, BenchError::ProcessLaunch(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exited_process_is_not_alive() {
        // `true` 忽略参数并立即退出
        let launcher = V2rayLauncher::new("true");
        let mut process = launcher.launch(Path::new("unused.json")).await.unwrap();

        let mut alive = true;
        for _ in 0..50 {
            alive = process.is_alive();
            if !alive {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(!alive);
        process.terminate().await;
    }
}
