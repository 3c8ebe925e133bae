pub mod checksums;
pub mod create;
pub mod diff;
pub mod inspect;
pub mod publish;
pub mod pull;
pub mod resolve;

use bale_core::BaleConfig;
use bale_remote::RemoteConfig;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_INTERRUPTED: u8 = 130;

/// Remote and config overrides shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOpts<'a> {
    pub config: Option<&'a Path>,
    pub remote: Option<&'a str>,
    pub plain_http: bool,
    pub json: bool,
}

impl GlobalOpts<'_> {
    /// `--config` if given, otherwise `bale-config.toml` in `dir`.
    pub fn load_config(&self, dir: &Path) -> Result<BaleConfig, String> {
        match self.config {
            Some(path) => BaleConfig::load(path),
            None => BaleConfig::discover(dir),
        }
        .map_err(|e| e.to_string())
    }

    /// Remote settings from `config`, with `--remote`/`--plain-http` applied.
    pub fn remote_config(&self, config: &BaleConfig) -> Result<RemoteConfig, String> {
        let mut remote = config.remote_config().map_err(|e| e.to_string())?;
        if let Some(url) = self.remote {
            remote.url = url.trim_end_matches('/').to_owned();
        }
        if self.plain_http {
            remote.plain_http = true;
        }
        Ok(remote)
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str, json: bool) -> ProgressBar {
    if json {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

/// `+`/`-` marker for diff-style listings.
pub fn colorize_change(kept: bool, item: &str) -> String {
    use console::Style;
    if kept {
        Style::new().green().apply_to(format!("+ {item}")).to_string()
    } else {
        Style::new().red().apply_to(format!("- {item}")).to_string()
    }
}
