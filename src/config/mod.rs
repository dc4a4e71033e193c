use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    pub ui: UiConfig,
    pub store: StoreConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
    pub show_demo_notice: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreConfig {
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportConfig {
    /// Defaults to `<state_dir>/exports` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl EffectiveConfig {
    fn defaults(home_dir: &Path) -> Self {
        Self {
            ui: UiConfig {
                color: true,
                max_table_rows: 20,
                show_demo_notice: true,
            },
            store: StoreConfig {
                state_dir: default_state_dir(home_dir),
            },
            export: ExportConfig { dir: None },
            config_path: None,
        }
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.export
            .dir
            .clone()
            .unwrap_or_else(|| crate::export::exports_dir(&self.store.state_dir))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    ui: Option<RawUiConfig>,
    store: Option<RawStoreConfig>,
    export: Option<RawExportConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
    show_demo_notice: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStoreConfig {
    state_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExportConfig {
    dir: Option<String>,
}

pub fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("環境変数 HOME が設定されていません"))
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/riskreg/config.toml")
}

pub fn default_state_dir(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/riskreg/state")
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::defaults(home_dir);

    let explicit = config_path.is_some();
    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("設定ファイルの読み取りに失敗しました: {}", path.display()))?;
        let raw: RawConfig =
            toml::from_str(&s).context("設定ファイル(TOML)の解析に失敗しました")?;
        apply_raw_config(&mut cfg, raw, home_dir);
        cfg.config_path = Some(path.display().to_string());
    } else if explicit {
        return Err(anyhow!(
            "設定ファイルが見つかりません: {}",
            path.display()
        ));
    }

    apply_env_overrides(&mut cfg, home_dir)?;

    tracing::debug!(config_path = ?cfg.config_path, "config loaded");
    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig, home_dir: &Path) {
    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
        if let Some(show_demo_notice) = ui.show_demo_notice {
            cfg.ui.show_demo_notice = show_demo_notice;
        }
    }

    if let Some(store) = raw.store {
        if let Some(state_dir) = store.state_dir {
            cfg.store.state_dir = expand_home(&state_dir, home_dir);
        }
    }

    if let Some(export) = raw.export {
        if let Some(dir) = export.dir {
            cfg.export.dir = Some(expand_home(&dir, home_dir));
        }
    }
}

fn apply_env_overrides(cfg: &mut EffectiveConfig, home_dir: &Path) -> Result<()> {
    if let Ok(v) = std::env::var("RISKREG_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "RISKREG_UI_COLOR")?;
    }
    if let Ok(v) = std::env::var("RISKREG_UI_MAX_TABLE_ROWS") {
        cfg.ui.max_table_rows = v
            .trim()
            .parse::<usize>()
            .with_context(|| "RISKREG_UI_MAX_TABLE_ROWS")?;
    }
    if let Ok(v) = std::env::var("RISKREG_UI_SHOW_DEMO_NOTICE") {
        cfg.ui.show_demo_notice =
            parse_bool(&v).with_context(|| "RISKREG_UI_SHOW_DEMO_NOTICE")?;
    }
    if let Ok(v) = std::env::var("RISKREG_STORE_STATE_DIR") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.store.state_dir = expand_home(v, home_dir);
        }
    }
    if let Ok(v) = std::env::var("RISKREG_EXPORT_DIR") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.export.dir = Some(expand_home(v, home_dir));
        }
    }

    Ok(())
}

fn expand_home(s: &str, home_dir: &Path) -> PathBuf {
    if s == "~" {
        return home_dir.to_path_buf();
    }
    match s.strip_prefix("~/") {
        Some(rest) => home_dir.join(rest),
        None => PathBuf::from(s),
    }
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!(
            "真偽値が不正です: {s}（true|false|1|0|yes|no|on|off を指定してください）"
        )),
    }
}
