// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use cubic_core::init_tracing;
use cubic_platform::{Window, WindowConfig, DEFAULT_TITLE};
use cubic_render_vk::VkRenderer;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; missing or invalid files fall back to defaults
    #[arg(long, default_value = "cubic.toml")]
    config: PathBuf,

    /// Skip Vulkan validation layers even if the config asks for them
    #[arg(long)]
    no_validation: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: DEFAULT_TITLE.to_owned(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
struct RenderCfg {
    validation: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg { validation: true }
    }
}

#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
struct AppCfg {
    #[serde(default)]
    window: WindowCfg,
    #[serde(default)]
    render: RenderCfg,
}

impl AppCfg {
    fn window_config(&self, no_validation: bool) -> WindowConfig {
        WindowConfig {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
            validation: self.render.validation && !no_validation,
        }
    }
}

fn parse_cfg(s: &str) -> AppCfg {
    toml::from_str::<AppCfg>(s).unwrap_or_else(|e| {
        warn!("config parse error, using defaults: {e}");
        AppCfg::default()
    })
}

fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s),
        Err(_) => AppCfg::default(),
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config);
    let window_cfg = cfg.window_config(args.no_validation);
    info!(
        "starting '{}' at {}x{} (validation={})",
        window_cfg.title, window_cfg.width, window_cfg.height, window_cfg.validation
    );

    let mut window = Window::<VkRenderer>::new(&window_cfg)?;
    window.start();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse_cfg("");
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.window_config(false), WindowConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse_cfg("[window]\nwidth = 1280\n");
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.height, 600);
        assert_eq!(cfg.window.title, DEFAULT_TITLE);
        assert!(cfg.render.validation);
    }

    #[test]
    fn malformed_file_falls_back() {
        assert_eq!(parse_cfg("[window\nwidth = \"wide\""), AppCfg::default());
    }

    #[test]
    fn cli_flag_overrides_validation() {
        let cfg = parse_cfg("[render]\nvalidation = true\n");
        assert!(!cfg.window_config(true).validation);
        let off = parse_cfg("[render]\nvalidation = false\n");
        assert!(!off.window_config(false).validation);
    }

    #[test]
    fn missing_file_gives_defaults() {
        assert_eq!(
            load_cfg(Path::new("/nonexistent/cubic.toml")),
            AppCfg::default()
        );
    }

    #[test]
    fn cli_parses_flags() {
        let args = Args::parse_from(["cubic-app", "--config", "x.toml", "--no-validation"]);
        assert_eq!(args.config, PathBuf::from("x.toml"));
        assert!(args.no_validation);
    }
}
