//! Load `.dupeshred.toml` from the first scanned directory (CLI only).
//! Library callers inject configuration through `ShredConfig` directly.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub(crate) struct DupeshredToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    algorithm: Option<String>,
    sidecar: Option<String>,
    read_sidecar: Option<bool>,
    write_sidecar: Option<bool>,
    write_unfinished: Option<bool>,
    threads: Option<usize>,
    buffered_read: Option<bool>,
    fiemap: Option<bool>,
    symlinks: Option<bool>,
    json: Option<bool>,
    verbose: Option<bool>,
}

/// Load `.dupeshred.toml` from `dir` if present. Returns None if file
/// missing or unreadable. CLI only.
pub(crate) fn load_settings_toml(dir: &Path) -> Option<DupeshredToml> {
    let path = dir.join(".dupeshred.toml");
    let s = std::fs::read_to_string(&path).ok()?;
    toml::from_str(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite CLI field from file when the CLI left it at its default.
macro_rules! apply_file_flag {
    ($sec:expr, $cli:expr, $field:ident) => {
        if let Some(v) = $sec.$field
            && !$cli.$field
        {
            $cli.$field = v;
        }
    };
}

/// Apply file config beneath the CLI (only fields the flags did not set).
pub(crate) fn apply_file_to_cli(file: &DupeshredToml, cli: &mut super::arg_parser::Cli) {
    let sec = &file.settings;
    if let Some(ref alg) = sec.algorithm
        && alg.eq_ignore_ascii_case("paranoid")
    {
        cli.algorithm = super::arg_parser::Algorithm::Paranoid;
    }
    if let Some(ref p) = sec.sidecar
        && cli.sidecar.is_none()
    {
        cli.sidecar = Some(PathBuf::from(p));
    }
    if let Some(n) = sec.threads
        && cli.threads.is_none()
    {
        cli.threads = Some(n);
    }
    if let Some(fiemap) = sec.fiemap
        && !cli.no_fiemap
    {
        cli.no_fiemap = !fiemap;
    }
    apply_file_flag!(sec, cli, read_sidecar);
    apply_file_flag!(sec, cli, write_sidecar);
    apply_file_flag!(sec, cli, write_unfinished);
    apply_file_flag!(sec, cli, buffered_read);
    apply_file_flag!(sec, cli, symlinks);
    apply_file_flag!(sec, cli, json);
    apply_file_flag!(sec, cli, verbose);
}
