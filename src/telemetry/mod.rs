//! 시스템 텔레메트리 스냅샷
//!
//! 요청마다 `/proc`, `/sys`, `statvfs`, `getifaddrs`에서 값을 새로 읽어
//! 하나의 JSON 객체로 조립한다. 각 하위 리더는 독립적으로 실패할 수 있고,
//! 실패한 리더는 해당 항목을 비워 둘 뿐 오류를 내지 않는다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::engine::PageInfo;
use crate::utils::{read_text_quiet, read_trimmed, round_to};

/// 텔레메트리 소스 루트. 테스트에서는 픽스처 트리를 가리킨다.
#[derive(Debug, Clone)]
pub struct SystemPaths {
    pub proc_root: PathBuf,
    pub sys_root: PathBuf,
    pub mounts: Vec<PathBuf>,
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            sys_root: PathBuf::from("/sys"),
            mounts: vec![PathBuf::from("/"), PathBuf::from("/tmp")],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryInfo {
    #[serde(rename = "memTotalKB")]
    pub mem_total_kb: u64,
    #[serde(rename = "memAvailableKB")]
    pub mem_available_kb: u64,
    #[serde(rename = "swapTotalKB")]
    pub swap_total_kb: u64,
    #[serde(rename = "swapFreeKB")]
    pub swap_free_kb: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Temperature {
    pub zone: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub temp_c: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub iface: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskUsage {
    pub mount: String,
    pub total_bytes: u64,
    pub avail_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GpuInfo {
    #[serde(rename = "freqMHz", skip_serializing_if = "Option::is_none")]
    pub freq_mhz: Option<u64>,
    #[serde(rename = "maxFreqMHz", skip_serializing_if = "Option::is_none")]
    pub max_freq_mhz: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessInfo {
    #[serde(rename = "vmRssKB")]
    pub vm_rss_kb: u64,
    #[serde(rename = "vmSizeKB")]
    pub vm_size_kb: u64,
    pub threads: u64,
    pub pid: u32,
}

/// 한 번의 요청에 대한 집계 결과. 저장되지 않는다.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_line: Option<String>,
    #[serde(flatten)]
    pub memory: Option<MemoryInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_avg: Option<[f64; 3]>,
    pub temperatures: Vec<Temperature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<Vec<NetworkInterface>>,
    pub disk: Vec<DiskUsage>,
    pub gpu: GpuInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessInfo>,
    pub webkit: PageInfo,
}

impl TelemetrySnapshot {
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!("Failed to serialize telemetry: {}", e);
            "{}".to_string()
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  수집기
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct TelemetryCollector {
    paths: SystemPaths,
}

impl TelemetryCollector {
    pub fn new(paths: SystemPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &SystemPaths {
        &self.paths
    }

    /// `page`는 브라우저 루프가 요청 시점에 엔진에서 읽은 값
    pub fn snapshot(&self, page: PageInfo) -> TelemetrySnapshot {
        let proc_root = &self.paths.proc_root;
        TelemetrySnapshot {
            cpu_line: read_text_quiet(&proc_root.join("stat")).map(|t| parse_cpu_line(&t)),
            memory: read_text_quiet(&proc_root.join("meminfo")).map(|t| parse_meminfo(&t)),
            uptime_sec: read_text_quiet(&proc_root.join("uptime")).map(|t| parse_uptime(&t)),
            load_avg: read_text_quiet(&proc_root.join("loadavg")).map(|t| parse_loadavg(&t)),
            temperatures: self.read_temperatures(),
            network: self.read_network(),
            disk: self.read_disks(),
            gpu: self.read_gpu(),
            process: read_text_quiet(&proc_root.join("self/status"))
                .map(|t| parse_process_status(&t, std::process::id())),
            webkit: PageInfo {
                load_progress: round_to(page.load_progress, 2),
                ..page
            },
        }
    }

    fn read_temperatures(&self) -> Vec<Temperature> {
        let thermal = self.paths.sys_root.join("class/thermal");
        let Ok(entries) = std::fs::read_dir(&thermal) else {
            return Vec::new();
        };

        let mut zones: Vec<String> = entries
            .flatten()
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.starts_with("thermal_zone"))
            .collect();
        zones.sort_by_key(|name| (zone_index(name), name.clone()));

        zones
            .into_iter()
            .filter_map(|zone| {
                let dir = thermal.join(&zone);
                let raw = read_text_quiet(&dir.join("temp"))?;
                let millideg: i64 = raw.trim().parse().unwrap_or(0);
                Some(Temperature {
                    kind: read_trimmed(&dir.join("type")).unwrap_or_else(|| "unknown".to_string()),
                    temp_c: round_to(millideg as f64 / 1000.0, 1),
                    zone,
                })
            })
            .collect()
    }

    fn read_network(&self) -> Option<Vec<NetworkInterface>> {
        let text = read_text_quiet(&self.paths.proc_root.join("net/dev"))?;
        let addrs = ipv4_addresses();
        let mut ifaces = parse_net_dev(&text);
        for iface in &mut ifaces {
            iface.ipv4 = addrs.get(&iface.iface).cloned();
        }
        Some(ifaces)
    }

    fn read_disks(&self) -> Vec<DiskUsage> {
        self.paths.mounts.iter().filter_map(|m| disk_usage(m)).collect()
    }

    fn read_gpu(&self) -> GpuInfo {
        let card = self.paths.sys_root.join("class/drm/card0");
        let freq = |name: &str| read_trimmed(&card.join(name)).and_then(|v| v.parse().ok());
        GpuInfo {
            freq_mhz: freq("gt_cur_freq_mhz"),
            max_freq_mhz: freq("gt_max_freq_mhz"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  파서
// ═══════════════════════════════════════════════════════════════

/// `thermal_zone12` → 12. 번호가 없으면 맨 뒤로.
fn zone_index(name: &str) -> u32 {
    name.trim_start_matches("thermal_zone").parse().unwrap_or(u32::MAX)
}

pub fn parse_cpu_line(stat: &str) -> String {
    stat.lines().next().unwrap_or_default().to_string()
}

/// `Key:   1234 kB` 형식 줄에서 첫 숫자
fn field_value(line: &str, key: &str) -> Option<u64> {
    let rest = line.strip_prefix(key)?.strip_prefix(':')?;
    Some(
        rest.split_whitespace()
            .next()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    )
}

pub fn parse_meminfo(text: &str) -> MemoryInfo {
    let mut mem = MemoryInfo::default();
    for line in text.lines() {
        if let Some(v) = field_value(line, "MemTotal") {
            mem.mem_total_kb = v;
        } else if let Some(v) = field_value(line, "MemAvailable") {
            mem.mem_available_kb = v;
        } else if let Some(v) = field_value(line, "SwapTotal") {
            mem.swap_total_kb = v;
        } else if let Some(v) = field_value(line, "SwapFree") {
            mem.swap_free_kb = v;
        }
    }
    mem
}

pub fn parse_uptime(text: &str) -> f64 {
    let secs = text
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);
    round_to(secs, 1)
}

pub fn parse_loadavg(text: &str) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (slot, field) in out.iter_mut().zip(text.split_whitespace()) {
        *slot = round_to(field.parse().unwrap_or(0.0), 2);
    }
    out
}

/// `/proc/net/dev`: 헤더 두 줄과 `lo`는 건너뛴다
pub fn parse_net_dev(text: &str) -> Vec<NetworkInterface> {
    text.lines()
        .skip(2)
        .filter_map(|line| {
            let (iface, rest) = line.trim().split_once(':')?;
            let iface = iface.trim();
            if iface == "lo" {
                return None;
            }
            let fields: Vec<u64> = rest
                .split_whitespace()
                .map(|v| v.parse().unwrap_or(0))
                .collect();
            let at = |i: usize| fields.get(i).copied().unwrap_or(0);
            Some(NetworkInterface {
                iface: iface.to_string(),
                rx_bytes: at(0),
                rx_packets: at(1),
                tx_bytes: at(8),
                tx_packets: at(9),
                ipv4: None,
            })
        })
        .collect()
}

pub fn parse_process_status(text: &str, pid: u32) -> ProcessInfo {
    let mut info = ProcessInfo {
        vm_rss_kb: 0,
        vm_size_kb: 0,
        threads: 0,
        pid,
    };
    for line in text.lines() {
        if let Some(v) = field_value(line, "VmRSS") {
            info.vm_rss_kb = v;
        } else if let Some(v) = field_value(line, "VmSize") {
            info.vm_size_kb = v;
        } else if let Some(v) = field_value(line, "Threads") {
            info.threads = v;
        }
    }
    info
}

// ═══════════════════════════════════════════════════════════════
//  시스템 콜
// ═══════════════════════════════════════════════════════════════

/// 인터페이스 이름 → IPv4 주소 (loopback 제외)
#[cfg(unix)]
fn ipv4_addresses() -> HashMap<String, String> {
    let mut out = HashMap::new();
    let addrs = match nix::ifaddrs::getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::debug!("getifaddrs failed: {}", e);
            return out;
        }
    };
    for ifa in addrs {
        if ifa.interface_name == "lo" {
            continue;
        }
        let Some(sin) = ifa.address.as_ref().and_then(|a| a.as_sockaddr_in()) else {
            continue;
        };
        let ip = std::net::SocketAddrV4::from(*sin).ip().to_string();
        out.entry(ifa.interface_name).or_insert(ip);
    }
    out
}

#[cfg(not(unix))]
fn ipv4_addresses() -> HashMap<String, String> {
    HashMap::new()
}

#[cfg(unix)]
fn disk_usage(mount: &Path) -> Option<DiskUsage> {
    let st = nix::sys::statvfs::statvfs(mount).ok()?;
    let frsize = st.fragment_size() as u64;
    Some(DiskUsage {
        mount: mount.display().to_string(),
        total_bytes: st.blocks() as u64 * frsize,
        avail_bytes: st.blocks_available() as u64 * frsize,
    })
}

#[cfg(not(unix))]
fn disk_usage(_mount: &Path) -> Option<DiskUsage> {
    None
}
