//! Thread-to-CPU pinning with a "least busy first" picker. The used-CPU
//! set and round-robin counter are process-wide so successive workers
//! spread across cores; `reset_used` restores a clean slate for tests.
//! Linux only; every operation is a no-op elsewhere.

use std::sync::Mutex;

use crate::utils::time::clock_time;

/// Pinning policy a worker thread applies on startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PinMode {
    /// Pick the least-busy allowed CPU not yet used, then pin.
    #[default]
    Auto,
    /// Pin to the given CPU.
    Fixed(usize),
    /// Leave scheduling to the OS.
    Off,
}

/// Applies `mode` to the current thread. Returns the CPU pinned to, if any.
pub fn apply_pin(mode: PinMode, who: &str) -> Option<usize> {
    match mode {
        PinMode::Auto => pick_and_pin(who),
        PinMode::Fixed(cpu) => pin_this_thread_to_cpu(who, cpu).then_some(cpu),
        PinMode::Off => None,
    }
}

struct PickState {
    used: Vec<usize>,
    rr_idx: usize,
}

static PICKED: Mutex<PickState> = Mutex::new(PickState {
    used: Vec::new(),
    rr_idx: 0,
});

/// Forget previously picked CPUs and restart the round-robin counter.
pub fn reset_used() {
    let mut state = PICKED.lock().unwrap();
    state.used.clear();
    state.rr_idx = 0;
}

/// Least-busy allowed CPU not yet used; falls back to round-robin over the
/// used list when every allowed CPU is taken. Pins the current thread to
/// the choice.
pub fn pick_and_pin(who: &str) -> Option<usize> {
    let chosen = {
        let mut state = PICKED.lock().unwrap();
        match pick_least_busy_allowed_cpu_excluding(&state.used, 150) {
            Some(cpu) => {
                state.used.push(cpu);
                Some(cpu)
            }
            None if !state.used.is_empty() => {
                let cpu = state.used[state.rr_idx % state.used.len()];
                state.rr_idx += 1;
                Some(cpu)
            }
            None => None,
        }
    };
    let cpu = chosen?;
    pin_this_thread_to_cpu(who, cpu).then_some(cpu)
}

#[cfg(target_os = "linux")]
pub fn pin_this_thread_to_cpu(who: &str, cpu: usize) -> bool {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        let rc = libc::pthread_setaffinity_np(
            libc::pthread_self(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        );
        if rc != 0 {
            return false;
        }
    }
    println!("[{}] [affinity] {} pinned to CPU {}", clock_time(), who, cpu);
    true
}

#[cfg(not(target_os = "linux"))]
pub fn pin_this_thread_to_cpu(_who: &str, _cpu: usize) -> bool {
    false
}

/// Samples per-CPU utilization over `sample_ms` and returns the least busy
/// CPU in the current affinity mask, skipping `exclude`.
#[cfg(target_os = "linux")]
pub fn pick_least_busy_allowed_cpu_excluding(exclude: &[usize], sample_ms: u64) -> Option<usize> {
    let mut mask: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut mask) };
    if rc != 0 {
        return None;
    }
    let a = read_proc_stat()?;
    std::thread::sleep(std::time::Duration::from_millis(sample_ms));
    let b = read_proc_stat()?;

    let n = a.len().min(b.len());
    let mut best: Option<usize> = None;
    let mut best_util = f64::INFINITY;
    for i in 0..n {
        if !unsafe { libc::CPU_ISSET(i, &mask) } {
            continue;
        }
        if exclude.contains(&i) {
            continue;
        }
        let total_delta = b[i].total().saturating_sub(a[i].total()).max(1);
        let idle_delta = b[i].idle_total().saturating_sub(a[i].idle_total());
        let util = 1.0 - idle_delta as f64 / total_delta as f64;
        if util < best_util {
            best_util = util;
            best = Some(i);
        }
    }
    best
}

#[cfg(not(target_os = "linux"))]
pub fn pick_least_busy_allowed_cpu_excluding(_exclude: &[usize], _sample_ms: u64) -> Option<usize> {
    None
}

#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
struct CpuSample {
    user: u64,
    nice: u64,
    sys: u64,
    idle: u64,
    iowait: u64,
    irq: u64,
    softirq: u64,
    steal: u64,
}

#[cfg(target_os = "linux")]
impl CpuSample {
    fn total(&self) -> u64 {
        self.user + self.nice + self.sys + self.idle + self.iowait + self.irq + self.softirq
            + self.steal
    }

    fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }
}

#[cfg(target_os = "linux")]
fn read_proc_stat() -> Option<Vec<CpuSample>> {
    let contents = std::fs::read_to_string("/proc/stat").ok()?;
    let mut out = Vec::new();
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let Some(tag) = fields.next() else {
            break;
        };
        if tag == "cpu" {
            continue; // aggregate line
        }
        if !tag.starts_with("cpu") {
            break; // per-cpu block is over
        }
        let mut sample = CpuSample::default();
        let slots = [
            &mut sample.user,
            &mut sample.nice,
            &mut sample.sys,
            &mut sample.idle,
            &mut sample.iowait,
            &mut sample.irq,
            &mut sample.softirq,
            &mut sample.steal,
        ];
        let mut read = 0;
        for slot in slots {
            match fields.next().and_then(|f| f.parse::<u64>().ok()) {
                Some(v) => {
                    *slot = v;
                    read += 1;
                }
                None => break,
            }
        }
        if read < 4 {
            break;
        }
        out.push(sample);
    }
    (!out.is_empty()).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_used_clears_state() {
        reset_used();
        let state = PICKED.lock().unwrap();
        assert!(state.used.is_empty());
        assert_eq!(state.rr_idx, 0);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_proc_stat_readable() {
        let samples = read_proc_stat().expect("per-cpu stats");
        assert!(!samples.is_empty());
        assert!(samples[0].total() > 0);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_pick_excludes_all_cpus() {
        let all: Vec<usize> = (0..4096).collect();
        assert_eq!(pick_least_busy_allowed_cpu_excluding(&all, 1), None);
    }

    #[test]
    fn test_apply_pin_off_is_noop() {
        assert_eq!(apply_pin(PinMode::Off, "test"), None);
    }
}
