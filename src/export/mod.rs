use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::audit::{self, AuditLog};
use crate::core::{AuditEntry, RegisterSummary, Risk, User};
use crate::identity::UserDirectory;

pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl ExportFormat {
    pub const fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "markdown",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            _ => Err(format!(
                "出力形式が不正です: {s}（json|markdown を指定してください）"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedBy {
    pub user_id: String,
    pub name: String,
    pub role: String,
}

impl From<&User> for ExportedBy {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id.clone(),
            name: user.name.clone(),
            role: user.role.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportBundle {
    pub schema_version: &'static str,
    pub tool_version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exported_by: Option<ExportedBy>,
    pub summary: RegisterSummary,
    pub risks: Vec<Risk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_trail: Option<Vec<AuditEntry>>,
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Restrict the export to these risk ids; empty exports everything.
    pub risk_ids: Vec<String>,
    pub include_audit_trail: bool,
}

pub fn build_bundle(
    risks: &[Risk],
    log: &AuditLog,
    summary: RegisterSummary,
    exported_by: Option<&User>,
    options: &ExportOptions,
    generated_at: OffsetDateTime,
) -> ExportBundle {
    let selected = |risk_id: &str| {
        options.risk_ids.is_empty() || options.risk_ids.iter().any(|id| id == risk_id)
    };

    let risks: Vec<Risk> = risks
        .iter()
        .filter(|r| selected(&r.risk_id))
        .cloned()
        .collect();

    let audit_trail = options.include_audit_trail.then(|| {
        log.sorted_newest_first()
            .into_iter()
            .filter(|e| selected(&e.risk_id))
            .cloned()
            .collect()
    });

    ExportBundle {
        schema_version: SCHEMA_VERSION,
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        generated_at,
        exported_by: exported_by.map(ExportedBy::from),
        summary,
        risks,
        audit_trail,
    }
}

pub fn exports_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("exports")
}

pub fn render(bundle: &ExportBundle, format: ExportFormat, users: &UserDirectory) -> Result<String> {
    match format {
        ExportFormat::Json => {
            let mut s = serde_json::to_string_pretty(bundle)
                .context("エクスポート(JSON)のシリアライズに失敗しました")?;
            s.push('\n');
            Ok(s)
        }
        ExportFormat::Markdown => Ok(format_markdown(bundle, users)),
    }
}

/// Writes `contents` to `<dir>/register-<pid>-<ts>.<ext>`.
pub fn write_export(
    dir: &Path,
    format: ExportFormat,
    generated_at: OffsetDateTime,
    contents: &str,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| {
        format!(
            "エクスポート先ディレクトリの作成に失敗しました: {}",
            dir.display()
        )
    })?;

    let pid = std::process::id();
    let ts = generated_at.unix_timestamp_nanos();
    let path = dir.join(format!("register-{pid}-{ts}.{}", format.extension()));
    std::fs::write(&path, contents)
        .with_context(|| format!("エクスポートの書き込みに失敗しました: {}", path.display()))?;
    tracing::debug!(path = %path.display(), "export written");
    Ok(path)
}

pub fn mask_home(path: &Path, home_dir: &Path) -> String {
    let Ok(stripped) = path.strip_prefix(home_dir) else {
        return path.display().to_string();
    };
    let stripped = stripped.display().to_string();
    if stripped.is_empty() {
        "~".to_string()
    } else {
        format!("~/{stripped}")
    }
}

pub fn format_markdown(bundle: &ExportBundle, users: &UserDirectory) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    let summary = &bundle.summary;

    let _ = writeln!(out, "# GMP/GDP リスク登録簿");
    let _ = writeln!(out);
    let _ = writeln!(out, "- ツールバージョン: {}", bundle.tool_version);
    let _ = writeln!(
        out,
        "- 生成日時: {}",
        bundle
            .generated_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string())
    );
    if let Some(by) = &bundle.exported_by {
        let _ = writeln!(out, "- 出力者: {} ({})", by.name, by.role);
    }
    let _ = writeln!(out, "- リスク総数: {}", summary.total_risks);
    let _ = writeln!(out, "- 高リスク (スコア12以上): {}", summary.high_risk_items);
    let _ = writeln!(out, "- 対策完了率: {}%", summary.mitigation_rate_percent);
    let _ = writeln!(out, "- 平均スコア: {:.1}", summary.average_score);

    let _ = writeln!(out);
    let _ = writeln!(out, "## リスク ({})", bundle.risks.len());
    if bundle.risks.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "_リスクはありません。_");
    }

    let mut risks: Vec<&Risk> = bundle.risks.iter().collect();
    risks.sort_by_key(|r| (std::cmp::Reverse(r.risk_score()), r.risk_id.as_str()));
    for r in risks {
        let _ = writeln!(out);
        let _ = writeln!(out, "### {}（スコア: {}）", r.risk_name, r.risk_score());
        let _ = writeln!(out, "- id: `{}`", r.risk_id);
        let _ = writeln!(out, "- カテゴリ: {}", r.category);
        let _ = writeln!(
            out,
            "- 発生可能性 × 影響度: {} × {} ({})",
            r.likelihood(),
            r.impact(),
            r.band()
        );
        let _ = writeln!(out, "- 対策状況: {}", r.mitigation_status);
        if let Some(reference) = &r.regulatory_reference {
            let _ = writeln!(out, "- 規制参照: `{reference}`");
        }
        let _ = writeln!(out, "- 説明: {}", r.description.trim());
        if !r.treatments.is_empty() {
            let _ = writeln!(out, "- 対応計画:");
            for t in &r.treatments {
                let _ = writeln!(
                    out,
                    "  - `{}` {}: {}（担当: {}, 進捗: {}%）",
                    t.treatment_id, t.treatment_type, t.description, t.owner, t.progress
                );
            }
        }
    }

    if let Some(trail) = &bundle.audit_trail {
        let _ = writeln!(out);
        let _ = writeln!(out, "## 監査証跡 ({})", trail.len());
        if trail.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "_記録はありません。_");
        } else {
            let _ = writeln!(out);
            let _ = writeln!(out, "| 日時 | 操作 | リスク | ユーザー | 変更 |");
            let _ = writeln!(out, "|---|---|---|---|---|");
            for e in trail {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {} |",
                    e.timestamp
                        .format(&Rfc3339)
                        .unwrap_or_else(|_| "unknown".to_string()),
                    e.action,
                    escape_cell(&audit::resolve_risk_name(e, &bundle.risks)),
                    escape_cell(&audit::resolve_user_name(e, users)),
                    escape_cell(&audit::format_changes(&e.changes)),
                );
            }
        }
    }

    out
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}
