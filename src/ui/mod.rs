use anyhow::Error;
use std::collections::BTreeMap;
use std::io::{self, Write};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use unicode_width::UnicodeWidthChar;

use crate::approval::{Workflow, WorkflowStatus};
use crate::assess::Template;
use crate::audit;
use crate::core::{
    AuditEntry, MitigationStatus, RegisterSummary, RegulatoryReference, Risk, RiskBand, User,
    UserAccount,
};
use crate::fmea::{self, Factor, Rpn, RpnPriority};
use crate::identity::UserDirectory;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stdin_is_tty: bool,
    pub stdout_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "エラー:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "原因:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "次に:");
    let _ = writeln!(
        stderr,
        "  - 詳細を見るには `--verbose` を付けて再実行してください"
    );
    let _ = writeln!(
        stderr,
        "  - 利用可能なコマンド/オプションは `riskreg --help` を参照してください"
    );
}

pub fn print_demo_notice(cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut err = io::stderr().lock();
    let _ = writeln!(
        err,
        "注意: これはデモ用のリスク登録簿です。データはこの端末のローカルにのみ保存されます。"
    );
    let _ = writeln!(
        err,
        "      デモアカウント: admin/admin123, assessor/assessor123, viewer/viewer123"
    );
    let _ = writeln!(
        err,
        "      （`riskreg notice --dismiss` でこの表示を消せます）"
    );
}

pub fn print_dashboard(
    summary: &RegisterSummary,
    high: &[&Risk],
    recent: &[&AuditEntry],
    risks: &[Risk],
    users: &UserDirectory,
    cfg: &UiConfig,
) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let _ = writeln!(
        out,
        "概要: リスク総数={}  高リスク={}  対策完了率={}%  平均スコア={:.1}",
        summary.total_risks,
        summary.high_risk_items,
        summary.mitigation_rate_percent,
        summary.average_score
    );

    let _ = writeln!(out);
    let _ = writeln!(out, "対策状況:");
    for status in MitigationStatus::ALL {
        let _ = writeln!(
            out,
            "- {}: {}",
            pad_end_display(status_label(status), 8),
            summary.mitigation.get(status)
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "スコア帯:");
    for band in RiskBand::ALL.iter().rev() {
        let count = summary.bands.get(band).copied().unwrap_or(0);
        let label = pad_end_ansi(&format_band(*band, cfg.color), 11);
        let _ = writeln!(out, "- {label} {count}");
    }

    if !summary.categories.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "カテゴリ別:");
        print_count_table(&mut out, &summary.categories, "カテゴリ");
    }

    let _ = writeln!(out);
    if high.is_empty() {
        let _ = writeln!(out, "高リスク項目はありません。");
    } else {
        let _ = writeln!(out, "高リスク項目（スコア12以上）:");
        print_risk_table(&mut out, high, cfg.max_table_rows, cfg.color);
    }

    if !recent.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "最近の変更:");
        for entry in recent {
            let _ = writeln!(
                out,
                "- {}  {}  {}（{}）",
                format_date(entry.timestamp),
                pad_end_display(entry.action.as_str(), 6),
                audit::resolve_risk_name(entry, risks),
                audit::resolve_user_name(entry, users)
            );
        }
    }
}

pub fn print_risks(risks: &[&Risk], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    if risks.is_empty() {
        let _ = writeln!(out, "該当するリスクはありません。");
        return;
    }
    let rows = cfg.max_table_rows.max(1).min(risks.len());
    if risks.len() > rows {
        let _ = writeln!(out, "リスク（{rows}件表示 / 全{}件）:", risks.len());
    } else {
        let _ = writeln!(out, "リスク（{rows}件）:");
    }
    print_risk_table(&mut out, risks, rows, cfg.color);
}

pub fn print_risk_detail(
    risk: &Risk,
    reference: Option<&RegulatoryReference>,
    history: &[&AuditEntry],
    users: &UserDirectory,
    cfg: &UiConfig,
) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "{}", risk.risk_name);
    let _ = writeln!(out, "- id: {}", risk.risk_id);
    let _ = writeln!(out, "- カテゴリ: {}", risk.category);
    let _ = writeln!(
        out,
        "- スコア: {} = {} × {} [{}]",
        risk.risk_score(),
        risk.likelihood(),
        risk.impact(),
        format_band(risk.band(), cfg.color)
    );
    let _ = writeln!(out, "- 対策状況: {}", status_label(risk.mitigation_status));
    let _ = writeln!(out, "- 作成: {}", format_timestamp(risk.created_at));
    let _ = writeln!(out, "- 更新: {}", format_timestamp(risk.updated_at));
    match (&risk.regulatory_reference, reference) {
        (Some(_), Some(r)) => {
            let _ = writeln!(out, "- 規制参照: {} {} ({})", r.source, r.section, r.title);
        }
        (Some(id), None) => {
            let _ = writeln!(out, "- 規制参照: {id}（カタログに存在しません）");
        }
        (None, _) => {}
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", risk.description.trim());

    if !risk.treatments.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "対応計画:");
        for t in &risk.treatments {
            let target = t.target_date.as_deref().unwrap_or("-");
            let _ = writeln!(
                out,
                "- [{}] {} {}: {}（担当: {} / 期限: {} / 優先度: {} / {} {}%）",
                t.treatment_id,
                progress_bar(t.progress),
                t.treatment_type,
                t.description,
                t.owner,
                target,
                t.priority,
                t.status,
                t.progress
            );
        }
    }

    if !history.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "変更履歴:");
        for entry in history {
            let _ = writeln!(
                out,
                "- {}  {}  {}  {}",
                format_timestamp(entry.timestamp),
                pad_end_display(entry.action.as_str(), 6),
                audit::resolve_user_name(entry, users),
                audit::format_changes(&entry.changes)
            );
        }
    }
}

pub fn print_categories(groups: &BTreeMap<String, Vec<Risk>>, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    if groups.is_empty() {
        let _ = writeln!(out, "リスクはありません。");
        return;
    }
    for (category, risks) in groups {
        let _ = writeln!(out, "{category} ({}):", risks.len());
        for r in risks {
            let _ = writeln!(
                out,
                "  - {}  {}  {}",
                pad_start_display(&r.risk_id, 3),
                pad_end_ansi(&format_score(r, cfg.color), 2),
                r.risk_name
            );
        }
    }
}

pub fn print_audit(entries: &[&AuditEntry], risks: &[Risk], users: &UserDirectory, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    if entries.is_empty() {
        let _ = writeln!(out, "該当する監査記録はありません。");
        return;
    }

    let label_time = "日時";
    let label_action = "操作";
    let label_risk = "リスク";
    let label_user = "ユーザー";
    let label_changes = "変更";

    let rows = cfg.max_table_rows.max(1).min(entries.len());
    let shown = &entries[..rows];
    let names: Vec<String> = shown
        .iter()
        .map(|e| truncate_display(&audit::resolve_risk_name(e, risks), 36))
        .collect();
    let users_col: Vec<String> = shown
        .iter()
        .map(|e| audit::resolve_user_name(e, users))
        .collect();

    let time_w = visible_width_ansi("2024-01-01 00:00").max(visible_width_ansi(label_time));
    let action_w = visible_width_ansi(label_action).max(6);
    let risk_w = names
        .iter()
        .map(|s| visible_width_ansi(s))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_risk));
    let user_w = users_col
        .iter()
        .map(|s| visible_width_ansi(s))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_user));

    if entries.len() > rows {
        let _ = writeln!(out, "監査証跡（{rows}件表示 / 全{}件）:", entries.len());
    } else {
        let _ = writeln!(out, "監査証跡（{rows}件）:");
    }
    let _ = writeln!(
        out,
        "{}  {}  {}  {}  {}",
        pad_end_display(label_time, time_w),
        pad_end_display(label_action, action_w),
        pad_end_display(label_risk, risk_w),
        pad_end_display(label_user, user_w),
        label_changes
    );
    let _ = writeln!(
        out,
        "{}  {}  {}  {}  {}",
        "-".repeat(time_w),
        "-".repeat(action_w),
        "-".repeat(risk_w),
        "-".repeat(user_w),
        "-".repeat(visible_width_ansi(label_changes))
    );
    for ((entry, name), user) in shown.iter().zip(&names).zip(&users_col) {
        let _ = writeln!(
            out,
            "{}  {}  {}  {}  {}",
            pad_end_display(&format_timestamp(entry.timestamp), time_w),
            pad_end_display(entry.action.as_str(), action_w),
            pad_end_display(name, risk_w),
            pad_end_display(user, user_w),
            audit::format_changes(&entry.changes)
        );
    }
}

pub fn print_references(refs: &[&RegulatoryReference], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    if refs.is_empty() {
        let _ = writeln!(out, "該当する規制参照はありません。");
        return;
    }
    let source_w = refs
        .iter()
        .map(|r| visible_width_ansi(&r.source))
        .max()
        .unwrap_or(0);
    for r in refs {
        let _ = writeln!(
            out,
            "{}  {}  {} ({})",
            pad_start_display(&r.reference_id, 2),
            pad_end_display(&r.source, source_w),
            r.title,
            r.section
        );
    }
}

pub fn print_reference_detail(r: &RegulatoryReference, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "{}", r.title);
    let _ = writeln!(out, "- id: {}", r.reference_id);
    let _ = writeln!(out, "- 出典: {} {}", r.source, r.section);
    let _ = writeln!(out, "- カテゴリ: {}", r.category);
    let _ = writeln!(out, "- 対象地域: {}", r.applicable_regions.join(", "));
    let _ = writeln!(out, "- 最終更新: {}", r.last_updated);
    let _ = writeln!(out, "- URL: {}", r.url);
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", r.description);
    if !r.key_requirements.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "主な要求事項:");
        for k in &r.key_requirements {
            let _ = writeln!(out, "- {k}");
        }
    }
}

pub fn print_values(values: &[&str], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    for v in values {
        let _ = writeln!(out, "{v}");
    }
}

pub fn print_rpn(rpn: &Rpn, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let _ = writeln!(
        out,
        "RPN = {} × {} × {} = {}",
        rpn.severity, rpn.occurrence, rpn.detection, rpn.value
    );
    let _ = writeln!(out, "優先度: {}", format_priority(rpn.priority, cfg.color));
    for (factor, score) in [
        (Factor::Severity, rpn.severity),
        (Factor::Occurrence, rpn.occurrence),
        (Factor::Detection, rpn.detection),
    ] {
        if let Some(desc) = fmea::describe(factor, score) {
            let _ = writeln!(
                out,
                "- {} {score}: {desc}",
                pad_end_display(factor.as_str(), 10)
            );
        }
    }
}

pub fn print_scales(factors: &[Factor], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    for (i, factor) in factors.iter().enumerate() {
        if i > 0 {
            let _ = writeln!(out);
        }
        let _ = writeln!(out, "{factor}:");
        for entry in fmea::scale(*factor) {
            let _ = writeln!(
                out,
                "  {}  {}",
                pad_start_display(&entry.score.to_string(), 2),
                entry.description
            );
        }
    }
}

pub fn print_users(accounts: &[&UserAccount], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    if accounts.is_empty() {
        let _ = writeln!(out, "該当するユーザーはいません。");
        return;
    }
    let name_w = accounts
        .iter()
        .map(|a| visible_width_ansi(&a.user.username))
        .max()
        .unwrap_or(0);
    for a in accounts {
        let last_login = a.last_login.map_or_else(|| "-".to_string(), format_timestamp);
        let _ = writeln!(
            out,
            "{}  {}  {}  {}  {}  {} <{}>",
            pad_start_display(&a.user.user_id, 2),
            pad_end_display(&a.user.username, name_w),
            pad_end_display(a.user.role.as_str(), 13),
            pad_end_display(a.status.as_str(), 8),
            pad_end_display(&last_login, 16),
            a.user.name,
            a.email
        );
    }
}

pub fn print_workflows(workflows: &[&Workflow], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    if workflows.is_empty() {
        let _ = writeln!(out, "該当するワークフローはありません。");
        return;
    }
    for w in workflows {
        let _ = writeln!(
            out,
            "{}  {}  {}  {}  {}  {}",
            pad_start_display(&w.workflow_id, 2),
            pad_end_display(workflow_status_label(w.status), 8),
            pad_end_display(w.priority.as_str(), 6),
            format_date(w.deadline),
            pad_end_display(&truncate_display(w.current_approver(), 22), 22),
            w.title
        );
    }
}

pub fn print_workflow_detail(w: &Workflow, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "{}", w.title);
    let _ = writeln!(out, "- id: {}", w.workflow_id);
    let _ = writeln!(out, "- 種別: {}", w.workflow_type);
    let _ = writeln!(out, "- 状態: {}", workflow_status_label(w.status));
    let _ = writeln!(out, "- 優先度: {}", w.priority);
    let _ = writeln!(out, "- 作成: {}（{}）", format_date(w.created_at), w.creator);
    let _ = writeln!(out, "- 期限: {}", format_date(w.deadline));
    let _ = writeln!(out, "- 現在の承認者: {}", w.current_approver());
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", w.description);

    let _ = writeln!(out);
    let _ = writeln!(out, "承認ステップ:");
    for step in &w.steps {
        let _ = writeln!(
            out,
            "{}. [{}] {}（{}）",
            step.step_id,
            pad_end_display(step.status.as_str(), 8),
            step.role,
            step.approver
        );
        if let (Some(at), Some(signature)) = (step.signed_at, step.signature.as_deref()) {
            let by = step.signed_by.as_deref().unwrap_or(&step.approver);
            let _ = writeln!(
                out,
                "   署名: {signature}  {}  {by}",
                format_timestamp(at)
            );
        }
        if !step.comments.is_empty() {
            let _ = writeln!(out, "   コメント: {}", step.comments);
        }
    }

    if !w.documents.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "添付文書:");
        for d in &w.documents {
            let _ = writeln!(out, "- {}（{}, {}）", d.name, d.kind, d.size);
        }
    }
}

pub fn print_templates(templates: &[Template], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    for (i, t) in templates.iter().enumerate() {
        if i > 0 {
            let _ = writeln!(out);
        }
        let _ = writeln!(out, "{}: {} ({})", t.template_id, t.title, t.description);
        for r in t.risks {
            let _ = writeln!(
                out,
                "  {}  {} [{}]",
                pad_start_display(&r.risk_score().to_string(), 2),
                r.title,
                r.category
            );
        }
    }
}

fn workflow_status_label(status: WorkflowStatus) -> &'static str {
    match status {
        WorkflowStatus::PendingApproval => "承認待ち",
        WorkflowStatus::Approved => "承認済み",
        WorkflowStatus::Rejected => "却下",
    }
}

pub fn print_user(user: &User, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    println!("{} ({}) [{}]", user.name, user.username, user.role);
}

fn print_risk_table(out: &mut dyn Write, risks: &[&Risk], rows: usize, color: bool) {
    let label_id = "ID";
    let label_score = "スコア";
    let label_status = "対策状況";
    let label_category = "カテゴリ";
    let label_name = "リスク名";

    let shown = &risks[..rows.min(risks.len())];
    let id_w = shown
        .iter()
        .map(|r| visible_width_ansi(&r.risk_id))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_id));
    let score_w = visible_width_ansi(label_score);
    let status_w = visible_width_ansi(label_status).max(8);
    let category_w = shown
        .iter()
        .map(|r| visible_width_ansi(&truncate_display(&r.category, 20)))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_category));

    let _ = writeln!(
        out,
        "{}  {}  {}  {}  {}",
        pad_end_display(label_id, id_w),
        pad_start_display(label_score, score_w),
        pad_end_display(label_status, status_w),
        pad_end_display(label_category, category_w),
        label_name
    );
    let _ = writeln!(
        out,
        "{}  {}  {}  {}  {}",
        "-".repeat(id_w),
        "-".repeat(score_w),
        "-".repeat(status_w),
        "-".repeat(category_w),
        "-".repeat(visible_width_ansi(label_name))
    );
    for r in shown {
        let score = format_score(r, color);
        let _ = writeln!(
            out,
            "{}  {}{}  {}  {}  {}",
            pad_end_display(&r.risk_id, id_w),
            " ".repeat(score_w.saturating_sub(visible_width_ansi(&score))),
            score,
            pad_end_display(status_label(r.mitigation_status), status_w),
            pad_end_display(&truncate_display(&r.category, 20), category_w),
            r.risk_name
        );
    }
}

fn print_count_table(out: &mut dyn Write, counts: &BTreeMap<String, usize>, label: &str) {
    let key_w = counts
        .keys()
        .map(|k| visible_width_ansi(k))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label));
    for (key, count) in counts {
        let _ = writeln!(out, "- {}  {count}", pad_end_display(key, key_w));
    }
}

fn status_label(status: MitigationStatus) -> &'static str {
    match status {
        MitigationStatus::NotStarted => "未着手",
        MitigationStatus::InProgress => "対応中",
        MitigationStatus::Completed => "完了",
    }
}

fn band_code(band: RiskBand) -> &'static str {
    match band {
        RiskBand::Low => "32",
        RiskBand::Medium => "33",
        RiskBand::MediumHigh => "35",
        RiskBand::High => "31",
    }
}

fn format_band(band: RiskBand, color: bool) -> String {
    let s = band.as_str();
    if !color {
        return s.to_string();
    }
    format!("\x1b[{}m{s}\x1b[0m", band_code(band))
}

fn format_score(risk: &Risk, color: bool) -> String {
    let s = risk.risk_score().to_string();
    if !color {
        return s;
    }
    format!("\x1b[{}m{s}\x1b[0m", band_code(risk.band()))
}

fn format_priority(priority: RpnPriority, color: bool) -> String {
    let s = priority.label();
    if !color {
        return s.to_string();
    }
    let code = match priority {
        RpnPriority::Low => "32",
        RpnPriority::Medium => "33",
        RpnPriority::High => "35",
        RpnPriority::Critical => "31",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn progress_bar(progress: u8) -> String {
    let filled = usize::from(progress.min(100)) / 10;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(10 - filled))
}

fn format_timestamp(ts: OffsetDateTime) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]");
    ts.format(fmt)
        .or_else(|_| ts.format(&Rfc3339))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn format_date(ts: OffsetDateTime) -> String {
    let fmt = format_description!("[year]-[month]-[day]");
    ts.format(fmt).unwrap_or_else(|_| "unknown".to_string())
}

fn truncate_display(s: &str, max_width: usize) -> String {
    if visible_width_ansi(s) <= max_width {
        return s.to_string();
    }
    let budget = max_width.saturating_sub(3);
    let mut width = 0usize;
    let mut out = String::new();
    for ch in s.chars() {
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + w > budget {
            break;
        }
        width += w;
        out.push(ch);
    }
    out.push_str("...");
    out
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_end_display(s: &str, width: usize) -> String {
    pad_end_ansi(s, width)
}

fn pad_start_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{}{}", " ".repeat(width - w), s)
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}
