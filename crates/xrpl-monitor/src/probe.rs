use std::path::{Path, PathBuf};

use sysinfo::System;
use walkdir::WalkDir;

/// Host-level resource readings for one slow tick.
#[derive(Debug, Clone, PartialEq)]
pub struct HostResources {
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: Option<u64>,
}

pub trait ResourceProbe: Send {
    fn sample(&mut self) -> HostResources;
}

/// Reads CPU and memory through `sysinfo` and sizes the rippled data
/// directory on disk.
pub struct SysinfoProbe {
    system: System,
    data_dir: Option<PathBuf>,
}

impl SysinfoProbe {
    pub fn new(data_dir: Option<PathBuf>) -> Self {
        let mut system = System::new();
        // CPU usage is a delta; prime it so the first sample is meaningful.
        system.refresh_cpu();
        Self { system, data_dir }
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&mut self) -> HostResources {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let disk_used_bytes = self.data_dir.as_deref().and_then(|dir| match dir_size(dir) {
            Ok(size) => Some(size),
            Err(e) => {
                tracing::debug!(path = %dir.display(), error = %e, "could not size data directory");
                None
            }
        });

        HostResources {
            cpu_percent: f64::from(self.system.global_cpu_info().cpu_usage()),
            memory_used_bytes: self.system.used_memory(),
            memory_total_bytes: self.system.total_memory(),
            disk_used_bytes,
        }
    }
}

/// Total size of regular files under `path`. Symlinks are not followed.
pub fn dir_size(path: &Path) -> Result<u64, walkdir::Error> {
    let mut total = 0;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_size_counts_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.db"), vec![0u8; 1000]).unwrap();
        std::fs::create_dir(dir.path().join("nudb")).unwrap();
        std::fs::write(dir.path().join("nudb").join("b.dat"), vec![0u8; 24]).unwrap();

        assert_eq!(dir_size(dir.path()).unwrap(), 1024);
    }

    #[test]
    fn test_missing_dir_is_error() {
        assert!(dir_size(Path::new("/definitely/not/here")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_dir_size_skips_symlinks() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("big.bin"), vec![0u8; 4096]).unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.db"), vec![0u8; 10]).unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("linked")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("big.bin"), dir.path().join("big.lnk")).unwrap();

        assert_eq!(dir_size(dir.path()).unwrap(), 10);
    }

    #[test]
    fn test_sysinfo_probe_reports_memory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ledger.db"), b"xrpl").unwrap();

        let mut probe = SysinfoProbe::new(Some(dir.path().to_path_buf()));
        let host = probe.sample();
        assert!(host.memory_total_bytes > 0);
        assert!(host.cpu_percent.is_finite());
        assert_eq!(host.disk_used_bytes, Some(4));
    }
}
