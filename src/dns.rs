use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use tracing::{debug, info, warn};

use crate::error::DnsError;

pub const RESOLV_CONF: &str = "/etc/resolv.conf";

const FORWARD_MARKER: &str =
    "# DNS requests are forwarded to the host. DHCP DNS options are ignored.\n";

/// Verbatim resolver file content taken before the session touched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverSnapshot {
    content: String,
}

impl ResolverSnapshot {
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Sole writer of the host resolver configuration.
#[derive(Debug, Clone)]
pub struct DnsConfigurator {
    resolv_path: PathBuf,
    backup_path: PathBuf,
}

impl Default for DnsConfigurator {
    fn default() -> Self {
        Self::new(RESOLV_CONF)
    }
}

impl DnsConfigurator {
    /// The backup lives next to the resolver file as `<name>.bak`.
    pub fn new(resolv_path: impl Into<PathBuf>) -> Self {
        let resolv_path = resolv_path.into();
        let mut backup = resolv_path.clone().into_os_string();
        backup.push(".bak");
        Self {
            resolv_path,
            backup_path: PathBuf::from(backup),
        }
    }

    pub fn resolv_path(&self) -> &Path {
        &self.resolv_path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Reads the resolver file and persists a copy to the backup path before
    /// anything is changed.
    pub fn capture(&self) -> Result<ResolverSnapshot, DnsError> {
        let content = fs::read_to_string(&self.resolv_path)
            .map_err(|e| DnsError::new("read", &self.resolv_path, e))?;
        write_replacing(&self.backup_path, &content)
            .map_err(|e| DnsError::new("back up to", &self.backup_path, e))?;
        debug!("Saved resolver backup to {}", self.backup_path.display());
        Ok(ResolverSnapshot { content })
    }

    /// Remote nameservers go first, the original configuration stays below
    /// them as fallback, and the remote search suffixes close the file.
    pub fn apply(
        &self,
        nameservers: &[&str],
        search_suffixes: &[&str],
        snapshot: &ResolverSnapshot,
    ) -> Result<(), DnsError> {
        let content = render_resolv_conf(nameservers, search_suffixes, snapshot);
        write_replacing(&self.resolv_path, &content)
            .map_err(|e| DnsError::new("write", &self.resolv_path, e))?;
        for ns in nameservers {
            debug!("nameserver '{}'", ns);
        }
        info!("Remote DNS configured.");
        Ok(())
    }

    /// Puts the snapshot back and drops the backup. Safe to call repeatedly.
    pub fn restore(&self, snapshot: &ResolverSnapshot) -> Result<(), DnsError> {
        write_replacing(&self.resolv_path, &snapshot.content)
            .map_err(|e| DnsError::new("restore", &self.resolv_path, e))?;
        match fs::remove_file(&self.backup_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(DnsError::new("remove", &self.backup_path, e)),
        }
        info!("Resolver configuration restored.");
        Ok(())
    }

    /// Restores from a backup left behind by a session that never got to
    /// clean up. Returns whether anything was restored.
    pub fn recover(&self) -> Result<bool, DnsError> {
        let content = match fs::read_to_string(&self.backup_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(DnsError::new("read", &self.backup_path, e)),
        };
        warn!(
            "Found stale resolver backup {}, restoring it",
            self.backup_path.display()
        );
        self.restore(&ResolverSnapshot { content })?;
        Ok(true)
    }
}

/// The `search` line is always written, bare when there are no suffixes.
pub fn render_resolv_conf(
    nameservers: &[&str],
    search_suffixes: &[&str],
    snapshot: &ResolverSnapshot,
) -> String {
    let mut out = String::new();
    for ns in nameservers {
        out.push_str("nameserver ");
        out.push_str(ns);
        out.push('\n');
    }
    out.push_str(FORWARD_MARKER);
    out.push_str(&snapshot.content);
    out.push('\n');
    out.push_str("search");
    for suffix in search_suffixes {
        out.push(' ');
        out.push_str(suffix);
    }
    out.push('\n');
    out
}

/// Writes through symlinks (resolv.conf is often one) via a temporary
/// sibling of the real target, so readers never see a partial file.
fn write_replacing(path: &Path, content: &str) -> io::Result<()> {
    write_replacing_with(path, content, |from, to| fs::rename(from, to))
}

/// [`write_replacing`] with the final rename step supplied by the caller.
///
/// A bind-mounted file (the usual resolv.conf in a container) cannot be
/// renamed over: the rename fails with EBUSY, or EXDEV across mounts. In
/// that case the target is truncated and rewritten in place instead.
pub fn write_replacing_with<F>(path: &Path, content: &str, rename: F) -> io::Result<()>
where
    F: FnOnce(&Path, &Path) -> io::Result<()>,
{
    let target = match fs::canonicalize(path) {
        Ok(p) => p,
        Err(e) if e.kind() == io::ErrorKind::NotFound => path.to_path_buf(),
        Err(e) => return Err(e),
    };

    let mut tmp = target.clone().into_os_string();
    tmp.push(".nx-tmp");
    let tmp = PathBuf::from(tmp);

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        if let Ok(meta) = fs::metadata(&target) {
            fs::set_permissions(&tmp, meta.permissions())?;
        }
        rename(&tmp, &target)
    })();

    match result {
        Ok(()) => Ok(()),
        Err(e) if is_mount_point_error(&e) => {
            let _ = fs::remove_file(&tmp);
            debug!(
                "{} cannot be replaced ({}), rewriting in place",
                target.display(),
                e
            );
            write_in_place(&target, content)
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

fn is_mount_point_error(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error().map(Errno::from_i32),
        Some(Errno::EBUSY) | Some(Errno::EXDEV)
    )
}

fn write_in_place(target: &Path, content: &str) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(target)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()
}
