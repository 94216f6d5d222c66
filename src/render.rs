//! Serialization of the compiled configuration to disk.

use std::path::PathBuf;

use tracing::info;

use crate::config::Layout;
use crate::fsio::{self, CONFIG_MODE};
use crate::hba::HbaRuleSet;
use crate::overlay::{BaseConfig, Overlay};
use crate::Result;

pub use crate::fsio::WriteOutcome as RenderOutcome;

/// Text of every engine-rendered configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFiles {
    /// `pg_hba.conf`.
    pub hba: String,
    /// `postgresql.conf`.
    pub base: String,
    /// `postgresql.extra.conf`.
    pub overlay: String,
}

/// Render all files. Pure; identical inputs give identical text.
#[must_use]
pub fn render_all(rules: &HbaRuleSet, base: &BaseConfig, overlay: &Overlay) -> RenderedFiles {
    RenderedFiles {
        hba: rules.render(),
        base: base.render(),
        overlay: overlay.render(),
    }
}

/// Per-file result of [`RenderedFiles::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderReport {
    /// Files in the order they were placed.
    pub files: Vec<(PathBuf, RenderOutcome)>,
}

impl RenderReport {
    /// Whether any file was replaced.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.files.iter().any(|(_, outcome)| outcome.changed())
    }
}

impl RenderedFiles {
    /// Place every file under `layout.conf_dir`.
    ///
    /// The overlay goes first and the base file last, so the base file never
    /// includes an overlay older than itself and the access-control file is in
    /// place before the file that points the daemon at it.
    pub fn write(&self, layout: &Layout) -> Result<RenderReport> {
        let mut files = Vec::with_capacity(3);
        for (path, text) in [
            (layout.overlay_file(), &self.overlay),
            (layout.hba_file(), &self.hba),
            (layout.base_conf_file(), &self.base),
        ] {
            let outcome = fsio::write_if_changed(&path, text.as_bytes(), CONFIG_MODE)?;
            info!(path = %path.display(), changed = outcome.changed(), "Rendered configuration file");
            files.push((path, outcome));
        }
        Ok(RenderReport { files })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hba::{LanPolicy, PolicyInputs, Scope, WanPolicy, compile};
    use crate::hba::{AuthMethod, HbaConnection, LocalPolicy};
    use crate::hba::network::{default_wan_networks, loopback_networks};

    fn files(layout: &Layout, conf_extra: &str) -> RenderedFiles {
        let policy = PolicyInputs {
            local: LocalPolicy::default(),
            lan: LanPolicy {
                connection: HbaConnection::Host,
                method: AuthMethod::Md5,
                networks: loopback_networks(),
                scope: Scope::default(),
            },
            wan: WanPolicy {
                connection: HbaConnection::HostSsl,
                override_method: None,
                networks: default_wan_networks(),
                scope: Scope::default(),
            },
            extra_rules: Vec::new(),
        };
        render_all(
            &compile(&policy, false),
            &BaseConfig::new(layout, false),
            &Overlay::compile(conf_extra),
        )
    }

    #[test]
    fn writes_three_files_then_reports_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path(), dir.path());
        let rendered = files(&layout, "shared_buffers = '256MB'");

        let first = rendered.write(&layout).unwrap();
        let second = rendered.write(&layout).unwrap();

        assert!(first.changed());
        assert_eq!(first.files.len(), 3);
        assert!(!second.changed());
        assert!(second.files.iter().all(|(_, o)| *o == RenderOutcome::Unchanged));
        assert_eq!(
            std::fs::read_to_string(layout.hba_file()).unwrap(),
            rendered.hba
        );
    }

    #[test]
    fn conf_extra_only_changes_the_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path(), dir.path());

        let plain = files(&layout, "");
        let tuned = files(&layout, "max_connections = 50\n");

        assert_eq!(plain.base, tuned.base);
        assert_eq!(plain.hba, tuned.hba);
        assert_ne!(plain.overlay, tuned.overlay);
        assert!(tuned.overlay.contains("max_connections = 50\n"));
    }
}
