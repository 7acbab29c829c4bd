//! Host Metadata from procfs and sysfs

use super::vendor::lookup_vendor;
use super::{MetadataCollector, UNKNOWN};
use macaddr::MacAddr6;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

const SECTOR_SIZE: u64 = 512;
const GIB: u64 = 1024 * 1024 * 1024;

/// Virtual block devices that never hold node storage.
const IGNORED_BLOCK_PREFIXES: &[&str] = &["loop", "ram", "zram", "dm-", "sr", "fd"];

/// Collects metadata from a Linux host's /proc, /sys and /etc.
#[derive(Debug, Clone)]
pub struct SystemMetadata {
    root: PathBuf,
}

impl Default for SystemMetadata {
    fn default() -> Self {
        Self::new("/")
    }
}

impl SystemMetadata {
    /// Collect relative to `root` instead of `/`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn read(&self, relative: &str) -> Option<String> {
        fs::read_to_string(self.path(relative)).ok()
    }

    fn distro(&self) -> Option<String> {
        let raw = self
            .read("etc/os-release")
            .or_else(|| self.read("usr/lib/os-release"))?;
        parse_os_release(&raw)
    }

    fn memory_gib(&self) -> Option<u64> {
        parse_meminfo_kib(&self.read("proc/meminfo")?).map(|kib| kib * 1024 / GIB)
    }

    fn largest_disk_gib(&self) -> Option<u64> {
        let entries = fs::read_dir(self.path("sys/block")).ok()?;
        entries
            .filter_map(Result::ok)
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                !IGNORED_BLOCK_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
            })
            .filter_map(|entry| fs::read_to_string(entry.path().join("size")).ok())
            .filter_map(|size| size.trim().parse::<u64>().ok())
            .max()
            .map(|sectors| sectors * SECTOR_SIZE / GIB)
    }

    fn primary_mac(&self) -> Option<MacAddr6> {
        let mut interfaces: Vec<_> = fs::read_dir(self.path("sys/class/net"))
            .ok()?
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name() != "lo")
            .collect();
        interfaces.sort_by_key(|entry| entry.file_name());

        interfaces
            .iter()
            .filter_map(|entry| fs::read_to_string(entry.path().join("address")).ok())
            .filter_map(|raw| raw.trim().parse::<MacAddr6>().ok())
            .find(|mac| !mac.is_nil())
    }

    fn hostname(&self) -> Option<String> {
        let raw = self
            .read("proc/sys/kernel/hostname")
            .or_else(|| self.read("etc/hostname"))?;
        let name = raw.trim();
        (!name.is_empty()).then(|| name.to_string())
    }
}

impl MetadataCollector for SystemMetadata {
    fn collect(&self) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        let or_unknown = |value: Option<String>| value.unwrap_or_else(|| UNKNOWN.to_string());

        metadata.insert("os".to_string(), std::env::consts::OS.to_string());
        metadata.insert("arch".to_string(), std::env::consts::ARCH.to_string());
        metadata.insert("distro".to_string(), or_unknown(self.distro()));
        metadata.insert(
            "cpu".to_string(),
            or_unknown(
                std::thread::available_parallelism()
                    .ok()
                    .map(|n| n.get().to_string()),
            ),
        );
        metadata.insert(
            "mem".to_string(),
            or_unknown(self.memory_gib().map(|gib| format!("{gib}GiB"))),
        );
        metadata.insert(
            "disk".to_string(),
            or_unknown(self.largest_disk_gib().map(|gib| format!("{gib}GiB"))),
        );

        let mac = self.primary_mac();
        metadata.insert(
            "mac".to_string(),
            or_unknown(mac.map(|mac| mac.to_string().to_lowercase())),
        );
        metadata.insert(
            "vendor".to_string(),
            mac.map(|mac| lookup_vendor(&mac))
                .unwrap_or_else(|| UNKNOWN.to_string()),
        );
        metadata.insert("hostname".to_string(), or_unknown(self.hostname()));

        debug!(fields = metadata.len(), "Collected host metadata");
        metadata
    }
}

/// Local hostname, if the host exposes one.
pub fn hostname() -> Option<String> {
    SystemMetadata::default().hostname()
}

/// `PRETTY_NAME`, falling back to `NAME VERSION_ID`.
fn parse_os_release(raw: &str) -> Option<String> {
    let fields: BTreeMap<&str, String> = raw
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim().trim_matches('"').to_string()))
        .collect();

    if let Some(pretty) = fields.get("PRETTY_NAME").filter(|v| !v.is_empty()) {
        return Some(pretty.clone());
    }
    let name = fields.get("NAME")?;
    Some(match fields.get("VERSION_ID") {
        Some(version) => format!("{name} {version}"),
        None => name.clone(),
    })
}

/// `MemTotal` in KiB.
fn parse_meminfo_kib(raw: &str) -> Option<u64> {
    raw.lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kib| kib.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeRoot(PathBuf);

    impl FakeRoot {
        fn new() -> Self {
            let root = std::env::temp_dir().join(format!("flock-meta-{}", uuid::Uuid::new_v4()));
            fs::create_dir_all(&root).unwrap();
            Self(root)
        }

        fn write(&self, relative: &str, contents: &str) {
            let path = self.0.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
    }

    impl Drop for FakeRoot {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn test_parse_os_release() {
        let raw = "NAME=\"NixOS\"\nVERSION_ID=\"24.05\"\nPRETTY_NAME=\"NixOS 24.05 (Uakari)\"\n";
        assert_eq!(parse_os_release(raw).as_deref(), Some("NixOS 24.05 (Uakari)"));
        assert_eq!(parse_os_release("NAME=Debian\nVERSION_ID=12\n").as_deref(), Some("Debian 12"));
        assert_eq!(parse_os_release("ID=alpine\n"), None);
    }

    #[test]
    fn test_parse_meminfo() {
        let raw = "MemTotal:       16318412 kB\nMemFree:         1234 kB\n";
        assert_eq!(parse_meminfo_kib(raw), Some(16318412));
        assert_eq!(parse_meminfo_kib("MemFree: 1 kB\n"), None);
    }

    #[test]
    fn test_collect_from_fake_root() {
        let root = FakeRoot::new();
        root.write("etc/os-release", "PRETTY_NAME=\"Debian GNU/Linux 12\"\n");
        root.write("proc/meminfo", "MemTotal:       8388608 kB\n");
        root.write("sys/block/sda/size", "976773168\n");
        root.write("sys/block/loop0/size", "99999999999\n");
        root.write("sys/class/net/lo/address", "00:00:00:00:00:00\n");
        root.write("sys/class/net/eth0/address", "b8:27:eb:01:02:03\n");
        root.write("proc/sys/kernel/hostname", "pi-node-1\n");

        let metadata = SystemMetadata::new(&root.0).collect();
        assert_eq!(metadata["distro"], "Debian GNU/Linux 12");
        assert_eq!(metadata["mem"], "8GiB");
        assert_eq!(metadata["disk"], "465GiB");
        assert_eq!(metadata["mac"], "b8:27:eb:01:02:03");
        assert_eq!(metadata["vendor"], "Raspberry Pi");
        assert_eq!(metadata["hostname"], "pi-node-1");
    }

    #[test]
    fn test_missing_sources_degrade_to_unknown() {
        let root = FakeRoot::new();
        let metadata = SystemMetadata::new(&root.0).collect();
        for key in ["distro", "mem", "disk", "mac", "vendor", "hostname"] {
            assert_eq!(metadata[key], UNKNOWN, "{key}");
        }
        assert_eq!(metadata["os"], std::env::consts::OS);
    }
}
