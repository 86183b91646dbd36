//! Host health sampling.
//!
//! [`run_sampler`] polls a [`VitalsSource`] on a fixed period and hands each
//! snapshot to the bridge, which forwards it only while collection is enabled.
//! [`HostVitals`] reads Linux `/proc`, `/sys` and `statvfs(3)`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use airbridge_types::Vitals;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

const PUBLIC_IP_URL: &str = "https://ident.me";
const PUBLIC_IP_REFRESH: Duration = Duration::from_secs(60);
const PUBLIC_IP_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait VitalsSource: Send + Sync {
    async fn sample(&self) -> Vitals;
}

// ─────────────────────────────────────────────────────────────────────────────
// Sampler task
// ─────────────────────────────────────────────────────────────────────────────

/// Sample `source` every `period` until `shutdown` flips to `true` or the
/// receiving side goes away.
pub async fn run_sampler(
    source: Arc<dyn VitalsSource>,
    period: Duration,
    tx: mpsc::Sender<Vitals>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let vitals = source.sample().await;
                // A full channel means the bridge is behind; skip this sample.
                if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(vitals) {
                    return;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host source
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

struct PublicIp {
    value: String,
    fetched_at: Option<Instant>,
}

pub struct HostVitals {
    proc_root: PathBuf,
    power_supply: PathBuf,
    disk_mount: PathBuf,
    http: reqwest::Client,
    cpu_prev: Mutex<Option<CpuTimes>>,
    public_ip: tokio::sync::Mutex<PublicIp>,
}

impl HostVitals {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            power_supply: PathBuf::from("/sys/class/power_supply"),
            disk_mount: PathBuf::from("/"),
            http: reqwest::Client::new(),
            cpu_prev: Mutex::new(None),
            public_ip: tokio::sync::Mutex::new(PublicIp {
                value: String::new(),
                fetched_at: None,
            }),
        }
    }

    async fn cpu(&self) -> f64 {
        let Ok(stat) = tokio::fs::read_to_string(self.proc_root.join("stat")).await else {
            return 0.0;
        };
        let Some(now) = parse_cpu_times(&stat) else {
            return 0.0;
        };
        let mut prev = self
            .cpu_prev
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let percent = prev.map_or(0.0, |p| cpu_percent(p, now));
        *prev = Some(now);
        percent
    }

    async fn ram(&self) -> f64 {
        tokio::fs::read_to_string(self.proc_root.join("meminfo"))
            .await
            .ok()
            .and_then(|text| parse_mem_percent(&text))
            .unwrap_or(0.0)
    }

    async fn battery(&self) -> f64 {
        let Ok(mut entries) = tokio::fs::read_dir(&self.power_supply).await else {
            return 0.0;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let dir = entry.path();
            let kind = tokio::fs::read_to_string(dir.join("type")).await.unwrap_or_default();
            if kind.trim() != "Battery" {
                continue;
            }
            if let Ok(capacity) = tokio::fs::read_to_string(dir.join("capacity")).await {
                if let Ok(percent) = capacity.trim().parse::<f64>() {
                    return round2(percent);
                }
            }
        }
        0.0
    }

    async fn public_ip(&self) -> String {
        let mut cached = self.public_ip.lock().await;
        let fresh = cached
            .fetched_at
            .is_some_and(|at| at.elapsed() < PUBLIC_IP_REFRESH);
        if !fresh {
            match self.fetch_public_ip().await {
                Ok(ip) => cached.value = ip,
                Err(e) => warn!(error = %e, "unable to get public IP"),
            }
            cached.fetched_at = Some(Instant::now());
        }
        cached.value.clone()
    }

    async fn fetch_public_ip(&self) -> Result<String, reqwest::Error> {
        let body = self
            .http
            .get(PUBLIC_IP_URL)
            .timeout(PUBLIC_IP_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body.trim().to_string())
    }
}

impl Default for HostVitals {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VitalsSource for HostVitals {
    async fn sample(&self) -> Vitals {
        let local_ip = match local_ip_address::local_ip() {
            Ok(ip) => ip.to_string(),
            Err(e) => {
                warn!(error = %e, "unable to get local IP");
                String::new()
            }
        };
        let vitals = Vitals {
            cpu: self.cpu().await,
            ram: self.ram().await,
            disk: disk_percent(&self.disk_mount).unwrap_or(0.0),
            battery: self.battery().await,
            local_ip,
            public_ip: self.public_ip().await,
        };
        debug!(cpu = vitals.cpu, ram = vitals.ram, disk = vitals.disk, "sampled vitals");
        vitals
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsers
// ─────────────────────────────────────────────────────────────────────────────

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Aggregate jiffies from the first `cpu` line of `/proc/stat`.
fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    if values.len() < 4 {
        return None;
    }
    let total: u64 = values.iter().sum();
    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}

fn cpu_percent(prev: CpuTimes, now: CpuTimes) -> f64 {
    let total = now.total.saturating_sub(prev.total);
    if total == 0 {
        return 0.0;
    }
    let busy = now.busy.saturating_sub(prev.busy);
    round2(busy as f64 / total as f64 * 100.0)
}

fn parse_mem_percent(meminfo: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        meminfo
            .lines()
            .find_map(|l| l.strip_prefix(name))?
            .trim_start_matches(':')
            .split_whitespace()
            .next()?
            .parse()
            .ok()
    };
    let total = field("MemTotal")?;
    let available = field("MemAvailable")?;
    if total <= 0.0 {
        return None;
    }
    Some(round2((total - available) / total * 100.0))
}

#[cfg(unix)]
fn disk_percent(mount: &Path) -> Option<f64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(mount.as_os_str().as_bytes()).ok()?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();
    // SAFETY: `c_path` is NUL-terminated and `stat` is a valid out-pointer.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: statvfs returned 0, so the struct is initialised.
    let stat = unsafe { stat.assume_init() };
    let frsize = stat.f_frsize as f64;
    let total = stat.f_blocks as f64 * frsize;
    if total == 0.0 {
        return None;
    }
    let used = (stat.f_blocks as f64 - stat.f_bfree as f64) * frsize;
    Some(round2(used / total * 100.0))
}

#[cfg(not(unix))]
fn disk_percent(_mount: &Path) -> Option<f64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const STAT: &str = "cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 50 0 50 350 50 0 0 0 0 0\n";

    #[test]
    fn cpu_times_count_iowait_as_idle() {
        let times = parse_cpu_times(STAT).unwrap();
        assert_eq!(times, CpuTimes { busy: 200, total: 1000 });
    }

    #[test]
    fn cpu_percent_uses_deltas() {
        let prev = CpuTimes { busy: 200, total: 1000 };
        let now = CpuTimes { busy: 250, total: 1200 };
        assert_eq!(cpu_percent(prev, now), 25.0);
        assert_eq!(cpu_percent(now, now), 0.0);
    }

    #[test]
    fn mem_percent_from_available() {
        let meminfo = "MemTotal:       16000 kB\nMemFree:         1000 kB\nMemAvailable:    4000 kB\n";
        assert_eq!(parse_mem_percent(meminfo), Some(75.0));
        assert_eq!(parse_mem_percent("MemFree: 1 kB\n"), None);
    }

    #[test]
    fn disk_percent_of_root_is_a_percentage() {
        if let Some(p) = disk_percent(Path::new("/")) {
            assert!((0.0..=100.0).contains(&p));
        }
    }

    #[tokio::test]
    async fn battery_read_from_power_supply_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ac = dir.path().join("AC0");
        let bat = dir.path().join("BAT0");
        std::fs::create_dir_all(&ac).unwrap();
        std::fs::create_dir_all(&bat).unwrap();
        std::fs::write(ac.join("type"), "Mains\n").unwrap();
        std::fs::write(bat.join("type"), "Battery\n").unwrap();
        std::fs::write(bat.join("capacity"), "87\n").unwrap();

        let host = HostVitals {
            power_supply: dir.path().to_path_buf(),
            ..HostVitals::new()
        };
        assert_eq!(host.battery().await, 87.0);
    }

    #[tokio::test]
    async fn first_cpu_sample_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stat"), STAT).unwrap();
        let host = HostVitals {
            proc_root: dir.path().to_path_buf(),
            ..HostVitals::new()
        };
        assert_eq!(host.cpu().await, 0.0);
        std::fs::write(
            dir.path().join("stat"),
            "cpu  150 0 100 850 100 0 0 0 0 0\n",
        )
        .unwrap();
        assert_eq!(host.cpu().await, 25.0);
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl VitalsSource for Counting {
        async fn sample(&self) -> Vitals {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Vitals { cpu: n as f64, ..Vitals::default() }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_ticks_until_shutdown() {
        let (tx, mut rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = watch::channel(false);
        let source = Arc::new(Counting(AtomicUsize::new(0)));
        let task = tokio::spawn(run_sampler(source, Duration::from_secs(1), tx, stop_rx));

        assert_eq!(rx.recv().await.unwrap().cpu, 0.0);
        assert_eq!(rx.recv().await.unwrap().cpu, 1.0);

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
