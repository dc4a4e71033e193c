use std::io;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use time::OffsetDateTime;

use crate::approval::{ApprovalStore, Decision, WorkflowFilter, WorkflowStatus};
use crate::audit::AuditQuery;
use crate::config::EffectiveConfig;
use crate::core::{
    AccountStatus, AuditAction, AuditEntry, MitigationStatus, RegisterSummary,
    RegulatoryReference, Risk, RiskInput, RiskPatch, Role, Treatment, User, UserAccount,
    next_treatment_id,
};
use crate::export::{ExportFormat, ExportOptions};
use crate::fmea::{Factor, Rpn};
use crate::identity::{self, NewUser, UserDirectory, UserError, UserPatch, session};
use crate::regulatory::{ReferenceFilter, RegulatoryStore};
use crate::store::kv::{self, FileKvStore, KvStore};
use crate::store::{RiskFilter, RiskStore};
use crate::ui::UiConfig;

#[derive(Debug, Parser)]
#[command(
    name = "riskreg",
    version,
    about = "医薬品の流通・保管（GMP/GDP）リスク登録簿: リスク評価、監査証跡、規制参照"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long = "state-dir", global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Login(LoginArgs),
    Logout,
    Whoami,
    Dashboard,
    Risk(RiskArgs),
    Audit(AuditArgs),
    Refs(RefsArgs),
    Fmea(FmeaArgs),
    Export(ExportArgs),
    Assess(AssessArgs),
    Workflow(WorkflowArgs),
    Users(UsersArgs),
    Reset(ResetArgs),
    Notice(NoticeArgs),
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    #[arg(long)]
    pub username: String,
    #[arg(long)]
    pub password: String,
}

#[derive(Debug, Args)]
pub struct RiskArgs {
    #[command(subcommand)]
    pub command: RiskCommand,
}

#[derive(Debug, Subcommand)]
pub enum RiskCommand {
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        status: Option<MitigationStatus>,
        #[arg(long)]
        min_score: Option<u8>,
    },
    Show {
        id: String,
    },
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        likelihood: u8,
        #[arg(long)]
        impact: u8,
        #[arg(long, default_value = "not_started")]
        status: MitigationStatus,
        #[arg(long)]
        reference: Option<String>,
    },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        likelihood: Option<u8>,
        #[arg(long)]
        impact: Option<u8>,
        #[arg(long)]
        status: Option<MitigationStatus>,
        #[arg(long, conflicts_with = "clear_reference")]
        reference: Option<String>,
        #[arg(long)]
        clear_reference: bool,
    },
    Delete {
        id: String,
        #[arg(long)]
        yes: bool,
    },
    High,
    Categories,
    /// Attach a treatment (mitigation plan) to a risk.
    Treat(TreatArgs),
}

#[derive(Debug, Args)]
pub struct TreatArgs {
    pub id: String,
    #[arg(long = "type")]
    pub treatment_type: String,
    #[arg(long)]
    pub description: String,
    #[arg(long)]
    pub owner: String,
    #[arg(long)]
    pub target_date: Option<String>,
    #[arg(long, default_value = "Medium")]
    pub priority: String,
    #[arg(long, default_value = "Planned")]
    pub status: String,
    #[arg(long, default_value_t = 0)]
    pub progress: u8,
}

#[derive(Debug, Args)]
pub struct AuditArgs {
    #[arg(long)]
    pub action: Option<AuditAction>,
    /// User id or username.
    #[arg(long)]
    pub user: Option<String>,
    #[arg(long)]
    pub risk: Option<String>,
    #[arg(long)]
    pub search: Option<String>,
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct RefsArgs {
    #[command(subcommand)]
    pub command: RefsCommand,
}

#[derive(Debug, Subcommand)]
pub enum RefsCommand {
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    Show {
        id: String,
    },
    Categories,
    Sources,
}

#[derive(Debug, Args)]
pub struct FmeaArgs {
    #[command(subcommand)]
    pub command: FmeaCommand,
}

#[derive(Debug, Subcommand)]
pub enum FmeaCommand {
    Rpn {
        #[arg(long)]
        severity: u8,
        #[arg(long)]
        occurrence: u8,
        #[arg(long)]
        detection: u8,
    },
    Scales {
        #[arg(long)]
        factor: Option<Factor>,
    },
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[arg(long, default_value = "json")]
    pub format: ExportFormat,
    /// Limit the export to the given risk ids (repeatable).
    #[arg(long = "risk")]
    pub risk_ids: Vec<String>,
    #[arg(long)]
    pub include_audit_trail: bool,
    /// Print to stdout instead of writing a file.
    #[arg(long)]
    pub stdout: bool,
}

#[derive(Debug, Args)]
pub struct AssessArgs {
    #[command(subcommand)]
    pub command: AssessCommand,
}

#[derive(Debug, Subcommand)]
pub enum AssessCommand {
    Templates,
    /// Add every risk of a template to the register.
    Generate {
        #[arg(long)]
        template: String,
        /// Assessment title recorded in each generated risk.
        #[arg(long)]
        title: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct WorkflowArgs {
    #[command(subcommand)]
    pub command: WorkflowCommand,
}

#[derive(Debug, Subcommand)]
pub enum WorkflowCommand {
    List {
        #[arg(long)]
        status: Option<WorkflowStatus>,
        /// Only workflows created by or routed through the current user.
        #[arg(long)]
        mine: bool,
    },
    Show {
        id: String,
    },
    /// Sign the pending approval step.
    Sign {
        id: String,
        #[arg(long)]
        decision: Decision,
        #[arg(long, default_value = "")]
        comments: String,
    },
}

#[derive(Debug, Args)]
pub struct UsersArgs {
    #[command(subcommand)]
    pub command: Option<UsersCommand>,
}

#[derive(Debug, Subcommand)]
pub enum UsersCommand {
    List {
        #[arg(long)]
        search: Option<String>,
    },
    Add {
        #[arg(long)]
        username: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "viewer")]
        role: Role,
        #[arg(long)]
        password: String,
        #[arg(long)]
        inactive: bool,
    },
    /// Update an account. USER is an id or a username.
    Update {
        user: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        role: Option<Role>,
        #[arg(long)]
        password: Option<String>,
    },
    Delete {
        user: String,
        #[arg(long)]
        yes: bool,
    },
    /// Switch an account between active and inactive.
    Toggle {
        user: String,
    },
}

#[derive(Debug, Args)]
pub struct ResetArgs {
    #[arg(long)]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct NoticeArgs {
    #[arg(long)]
    pub dismiss: bool,
    #[arg(long, conflicts_with = "dismiss")]
    pub restore: bool,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

struct Ctx {
    json: bool,
    ui: UiConfig,
    cfg: EffectiveConfig,
    home_dir: PathBuf,
    directory: UserDirectory,
}

#[derive(Debug, Serialize)]
struct DashboardView<'a> {
    summary: RegisterSummary,
    high_risk_items: Vec<&'a Risk>,
    recent_activity: Vec<&'a AuditEntry>,
}

#[derive(Debug, Serialize)]
struct RiskDetailView<'a> {
    risk: &'a Risk,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference: Option<&'a RegulatoryReference>,
    history: Vec<&'a AuditEntry>,
}

#[derive(Debug, Serialize)]
struct ExportResult {
    path: String,
    format: String,
    risks: usize,
}

const RECENT_ACTIVITY: usize = 5;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let stdin_is_tty = io::stdin().is_terminal();
    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = crate::config::home_dir()?;

    let env_config_path = std::env::var_os("RISKREG_CONFIG").map(PathBuf::from);
    let mut cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;
    if let Some(dir) = &cli.state_dir {
        cfg.store.state_dir = dir.clone();
    }

    let ui_cfg = UiConfig {
        color: stdout_is_tty && cfg.ui.color && !cli.no_color,
        stdin_is_tty,
        stdout_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    let mut ctx = Ctx {
        json: cli.json,
        ui: ui_cfg,
        cfg,
        home_dir,
        directory: UserDirectory::demo(),
    };
    if !matches!(cli.command, Commands::Completion(_) | Commands::Config(_)) {
        ctx.directory = UserDirectory::load(&open_kv(&ctx)?);
    }

    let wants_notice = !matches!(
        cli.command,
        Commands::Completion(_) | Commands::Config(_) | Commands::Notice(_)
    );
    if wants_notice
        && stderr_is_tty
        && !ctx.json
        && !ctx.ui.quiet
        && ctx.cfg.ui.show_demo_notice
        && !notice_dismissed(&open_kv(&ctx)?)
    {
        crate::ui::print_demo_notice(&ctx.ui);
    }

    dispatch(&ctx, cli.command)
}

fn dispatch(ctx: &Ctx, command: Commands) -> Result<()> {
    match command {
        Commands::Login(args) => {
            let mut kv = open_kv(ctx)?;
            let mut directory = ctx.directory.clone();
            let user = session::login(
                &mut kv,
                &mut directory,
                &args.username,
                &args.password,
                OffsetDateTime::now_utc(),
            )?;
            if ctx.json {
                write_json(&user)?;
            } else if !ctx.ui.quiet {
                println!("ログインしました: {} ({})", user.name, user.role);
            }
        }
        Commands::Logout => {
            session::logout(&mut open_kv(ctx)?)?;
            if !ctx.json && !ctx.ui.quiet {
                println!("ログアウトしました");
            }
        }
        Commands::Whoami => {
            let user = session::active_user(&open_kv(ctx)?, &ctx.directory)
                .ok_or(identity::PermissionError::NotLoggedIn)?;
            if ctx.json {
                write_json(&user)?;
            } else {
                crate::ui::print_user(&user, &ctx.ui);
            }
        }
        Commands::Dashboard => {
            let kv = open_kv(ctx)?;
            authorize(ctx, &kv, Role::Viewer)?;
            run_dashboard(ctx, &RiskStore::open(kv))?;
        }
        Commands::Risk(args) => {
            let kv = open_kv(ctx)?;
            let user = authorize(ctx, &kv, Role::Assessor)?;
            run_risk(ctx, &mut RiskStore::open(kv), &user, args.command)?;
        }
        Commands::Audit(args) => {
            let kv = open_kv(ctx)?;
            authorize(ctx, &kv, Role::Administrator)?;
            run_audit(ctx, &RiskStore::open(kv), args)?;
        }
        Commands::Refs(args) => {
            authorize(ctx, &open_kv(ctx)?, Role::Viewer)?;
            run_refs(ctx, args.command)?;
        }
        Commands::Fmea(args) => {
            authorize(ctx, &open_kv(ctx)?, Role::Assessor)?;
            run_fmea(ctx, args.command)?;
        }
        Commands::Export(args) => {
            let kv = open_kv(ctx)?;
            let user = authorize(ctx, &kv, Role::Assessor)?;
            run_export(ctx, &RiskStore::open(kv), &user, args)?;
        }
        Commands::Assess(args) => {
            let kv = open_kv(ctx)?;
            let user = authorize(ctx, &kv, Role::Assessor)?;
            run_assess(ctx, kv, &user, args.command)?;
        }
        Commands::Workflow(args) => {
            let kv = open_kv(ctx)?;
            let user = authorize(ctx, &kv, Role::Assessor)?;
            run_workflow(ctx, &mut ApprovalStore::open(kv), &user, args.command)?;
        }
        Commands::Users(args) => {
            let kv = open_kv(ctx)?;
            let user = authorize(ctx, &kv, Role::Administrator)?;
            let command = args
                .command
                .unwrap_or(UsersCommand::List { search: None });
            run_users(ctx, kv, &user, command)?;
        }
        Commands::Reset(args) => {
            let kv = open_kv(ctx)?;
            authorize(ctx, &kv, Role::Administrator)?;
            if !confirm_destructive(&ctx.ui, args.yes, "reset", "reset")? {
                if !ctx.ui.quiet {
                    eprintln!("キャンセルしました。");
                }
                return Ok(());
            }
            let mut store = RiskStore::open(kv);
            store.reset();
            if !ctx.json && !ctx.ui.quiet {
                println!(
                    "デモデータに戻しました（リスク {} 件、監査記録 {} 件）",
                    store.risks().len(),
                    store.audit_trail().len()
                );
            }
        }
        Commands::Notice(args) => {
            let mut kv = open_kv(ctx)?;
            if args.dismiss {
                kv.set(kv::DEMO_NOTICE_DISMISSED_KEY, "true")?;
                if !ctx.ui.quiet {
                    eprintln!("デモ通知を非表示にしました");
                }
            } else if args.restore {
                kv.remove(kv::DEMO_NOTICE_DISMISSED_KEY)?;
                if !ctx.ui.quiet {
                    eprintln!("デモ通知を再表示します");
                }
            } else {
                crate::ui::print_demo_notice(&ctx.ui);
            }
        }
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "riskreg", &mut out);
        }
        Commands::Config(args) => {
            if args.show {
                if ctx.json {
                    write_json(&ctx.cfg)?;
                } else {
                    write_stdout(&toml::to_string_pretty(&ctx.cfg)?)?;
                }
            } else if !ctx.ui.quiet {
                eprintln!("config: `riskreg config --show` を使用してください");
            }
        }
    }
    Ok(())
}

fn open_kv(ctx: &Ctx) -> Result<FileKvStore> {
    FileKvStore::open(&ctx.cfg.store.state_dir).map_err(crate::exit::store_failed_err)
}

fn run_dashboard(ctx: &Ctx, store: &RiskStore<FileKvStore>) -> Result<()> {
    let view = DashboardView {
        summary: store.summary(),
        high_risk_items: store.get_high_risk_items(),
        recent_activity: store
            .audit_trail()
            .sorted_newest_first()
            .into_iter()
            .take(RECENT_ACTIVITY)
            .collect(),
    };
    if ctx.json {
        write_json(&view)
    } else {
        crate::ui::print_dashboard(
            &view.summary,
            &view.high_risk_items,
            &view.recent_activity,
            store.risks(),
            &ctx.directory,
            &ctx.ui,
        );
        Ok(())
    }
}

fn run_audit(ctx: &Ctx, store: &RiskStore<FileKvStore>, args: AuditArgs) -> Result<()> {
    let mut query = AuditQuery {
        action: args.action,
        risk_id: args.risk,
        search: args.search,
        limit: args.limit,
        ..AuditQuery::default()
    };
    if let Some(user) = args.user.as_deref() {
        query = query.with_user(&resolve_user_id(&ctx.directory, user));
    }
    let entries = store
        .audit_trail()
        .query(&query, store.risks(), &ctx.directory);
    if ctx.json {
        write_json(&entries)
    } else {
        crate::ui::print_audit(&entries, store.risks(), &ctx.directory, &ctx.ui);
        Ok(())
    }
}

fn run_risk(
    ctx: &Ctx,
    store: &mut RiskStore<FileKvStore>,
    user: &User,
    command: RiskCommand,
) -> Result<()> {
    match command {
        RiskCommand::List {
            search,
            category,
            status,
            min_score,
        } => {
            let filter = RiskFilter {
                search,
                category,
                status,
                min_score,
            };
            let risks = store.filter(&filter);
            if ctx.json {
                write_json(&risks)?;
            } else {
                crate::ui::print_risks(&risks, &ctx.ui);
            }
        }
        RiskCommand::Show { id } => {
            let risk = store
                .get_by_id(&id)
                .ok_or_else(|| crate::store::StoreError::NotFound(id.clone()))?;
            let refs = RegulatoryStore::builtin();
            let reference = risk
                .regulatory_reference
                .as_deref()
                .and_then(|r| refs.get_by_id(r));
            let history = store.audit_trail().query(
                &AuditQuery::default().with_risk(&id),
                store.risks(),
                &ctx.directory,
            );
            if ctx.json {
                write_json(&RiskDetailView {
                    risk,
                    reference,
                    history,
                })?;
            } else {
                crate::ui::print_risk_detail(risk, reference, &history, &ctx.directory, &ctx.ui);
            }
        }
        RiskCommand::Add {
            name,
            description,
            category,
            likelihood,
            impact,
            status,
            reference,
        } => {
            warn_unknown_reference(reference.as_deref());
            let risk = store.add(
                RiskInput {
                    risk_name: name,
                    description,
                    category,
                    likelihood,
                    impact,
                    mitigation_status: status,
                    regulatory_reference: reference,
                    treatments: vec![],
                },
                Some(user),
            )?;
            report_risk(ctx, &risk, "リスクを登録しました")?;
        }
        RiskCommand::Update {
            id,
            name,
            description,
            category,
            likelihood,
            impact,
            status,
            reference,
            clear_reference,
        } => {
            warn_unknown_reference(reference.as_deref());
            let regulatory_reference = if clear_reference {
                Some(None)
            } else {
                reference.map(Some)
            };
            let patch = RiskPatch {
                risk_name: name,
                description,
                category,
                likelihood,
                impact,
                mitigation_status: status,
                regulatory_reference,
                treatments: None,
            };
            if patch.is_empty() {
                return Err(crate::exit::invalid_args(
                    "risk update: 更新する項目を1つ以上指定してください",
                ));
            }
            let risk = store.update(&id, patch, Some(user))?;
            report_risk(ctx, &risk, "リスクを更新しました")?;
        }
        RiskCommand::Delete { id, yes } => {
            if store.get_by_id(&id).is_none() {
                return Err(crate::store::StoreError::NotFound(id).into());
            }
            if !confirm_destructive(&ctx.ui, yes, "risk delete", "delete")? {
                if !ctx.ui.quiet {
                    eprintln!("キャンセルしました。");
                }
                return Ok(());
            }
            let removed = store.delete(&id, Some(user))?;
            report_risk(ctx, &removed, "リスクを削除しました")?;
        }
        RiskCommand::High => {
            let risks = store.get_high_risk_items();
            if ctx.json {
                write_json(&risks)?;
            } else {
                crate::ui::print_risks(&risks, &ctx.ui);
            }
        }
        RiskCommand::Categories => {
            let groups = store.get_by_category();
            if ctx.json {
                write_json(&groups)?;
            } else {
                crate::ui::print_categories(&groups, &ctx.ui);
            }
        }
        RiskCommand::Treat(args) => {
            if args.progress > 100 {
                return Err(crate::exit::invalid_args(
                    "risk treat: --progress は 0..=100 で指定してください",
                ));
            }
            let risk = store
                .get_by_id(&args.id)
                .ok_or_else(|| crate::store::StoreError::NotFound(args.id.clone()))?;
            let mut treatments = risk.treatments.clone();
            treatments.push(Treatment {
                treatment_id: next_treatment_id(risk),
                treatment_type: args.treatment_type,
                description: args.description,
                owner: args.owner,
                target_date: args.target_date,
                priority: args.priority,
                status: args.status,
                progress: args.progress,
            });
            let patch = RiskPatch {
                treatments: Some(treatments),
                ..RiskPatch::default()
            };
            let risk = store.update(&args.id, patch, Some(user))?;
            report_risk(ctx, &risk, "対応計画を追加しました")?;
        }
    }
    Ok(())
}

fn run_refs(ctx: &Ctx, command: RefsCommand) -> Result<()> {
    let refs = RegulatoryStore::builtin();
    match command {
        RefsCommand::List {
            search,
            source,
            category,
        } => {
            let found = refs.filter(&ReferenceFilter {
                search,
                source,
                category,
            });
            if ctx.json {
                write_json(&found)?;
            } else {
                crate::ui::print_references(&found, &ctx.ui);
            }
        }
        RefsCommand::Show { id } => {
            let reference = refs
                .get_by_id(&id)
                .ok_or_else(|| crate::exit::not_found(format!("規制参照が見つかりません: {id}")))?;
            if ctx.json {
                write_json(reference)?;
            } else {
                crate::ui::print_reference_detail(reference, &ctx.ui);
            }
        }
        RefsCommand::Categories => {
            let values = refs.unique_categories();
            if ctx.json {
                write_json(&values)?;
            } else {
                crate::ui::print_values(&values, &ctx.ui);
            }
        }
        RefsCommand::Sources => {
            let values = refs.unique_sources();
            if ctx.json {
                write_json(&values)?;
            } else {
                crate::ui::print_values(&values, &ctx.ui);
            }
        }
    }
    Ok(())
}

fn run_assess(ctx: &Ctx, kv: FileKvStore, user: &User, command: AssessCommand) -> Result<()> {
    match command {
        AssessCommand::Templates => {
            let templates = crate::assess::templates();
            if ctx.json {
                write_json(templates)?;
            } else {
                crate::ui::print_templates(templates, &ctx.ui);
            }
        }
        AssessCommand::Generate { template, title } => {
            let template = crate::assess::find(&template).ok_or_else(|| {
                crate::exit::invalid_args(format!(
                    "テンプレートが見つかりません: {template}（`riskreg assess templates` で一覧を確認してください）"
                ))
            })?;
            let mut store = RiskStore::open(kv);
            let created =
                crate::assess::generate(&mut store, template, title.as_deref(), Some(user))?;
            if ctx.json {
                write_json(&created)?;
            } else if !ctx.ui.quiet {
                println!(
                    "{} から {} 件のリスクを登録しました",
                    template.title,
                    created.len()
                );
                let refs: Vec<&Risk> = created.iter().collect();
                crate::ui::print_risks(&refs, &ctx.ui);
            }
        }
    }
    Ok(())
}

fn run_workflow(
    ctx: &Ctx,
    store: &mut ApprovalStore<FileKvStore>,
    user: &User,
    command: WorkflowCommand,
) -> Result<()> {
    match command {
        WorkflowCommand::List { status, mine } => {
            let filter = WorkflowFilter {
                status,
                involving: mine.then(|| user.name.clone()),
            };
            let workflows = store.list(&filter);
            if ctx.json {
                write_json(&workflows)?;
            } else {
                crate::ui::print_workflows(&workflows, &ctx.ui);
            }
        }
        WorkflowCommand::Show { id } => {
            let workflow = store.get(&id)?;
            if ctx.json {
                write_json(workflow)?;
            } else {
                crate::ui::print_workflow_detail(workflow, &ctx.ui);
            }
        }
        WorkflowCommand::Sign {
            id,
            decision,
            comments,
        } => {
            let workflow = store.sign(&id, decision, &comments, user, OffsetDateTime::now_utc())?;
            if ctx.json {
                write_json(&workflow)?;
            } else if !ctx.ui.quiet {
                println!(
                    "署名しました: {}（状態: {} / 次: {}）",
                    workflow.title,
                    workflow.status,
                    workflow.current_approver()
                );
            }
        }
    }
    Ok(())
}

fn run_users(ctx: &Ctx, mut kv: FileKvStore, admin: &User, command: UsersCommand) -> Result<()> {
    let mut directory = ctx.directory.clone();
    let (account, message) = match command {
        UsersCommand::List { search } => {
            let accounts: Vec<&UserAccount> = match search.as_deref() {
                Some(term) => directory.search(term),
                None => directory.accounts().collect(),
            };
            if ctx.json {
                write_json(&accounts)?;
            } else {
                crate::ui::print_users(&accounts, &ctx.ui);
            }
            return Ok(());
        }
        UsersCommand::Add {
            username,
            name,
            email,
            role,
            password,
            inactive,
        } => {
            let status = if inactive {
                AccountStatus::Inactive
            } else {
                AccountStatus::Active
            };
            let new = NewUser {
                username,
                name,
                email,
                role,
                status,
                password,
            };
            let account = directory.add(new, OffsetDateTime::now_utc())?;
            (account, "ユーザーを追加しました")
        }
        UsersCommand::Update {
            user,
            username,
            name,
            email,
            role,
            password,
        } => {
            let user_id = resolve_account(&directory, &user)?;
            if role.is_some_and(|r| r != admin.role) && user_id == admin.user_id {
                return Err(crate::exit::invalid_args(
                    "users update: 自分自身のロールは変更できません",
                ));
            }
            let patch = UserPatch {
                username,
                name,
                email,
                role,
                status: None,
                password,
            };
            if patch.is_empty() {
                return Err(crate::exit::invalid_args(
                    "users update: 更新する項目を1つ以上指定してください",
                ));
            }
            (directory.update(&user_id, patch)?, "ユーザーを更新しました")
        }
        UsersCommand::Delete { user, yes } => {
            let user_id = resolve_account(&directory, &user)?;
            ensure_not_self(admin, &user_id, "users delete")?;
            if !confirm_destructive(&ctx.ui, yes, "users delete", "delete")? {
                if !ctx.ui.quiet {
                    eprintln!("キャンセルしました。");
                }
                return Ok(());
            }
            (directory.delete(&user_id)?, "ユーザーを削除しました")
        }
        UsersCommand::Toggle { user } => {
            let user_id = resolve_account(&directory, &user)?;
            ensure_not_self(admin, &user_id, "users toggle")?;
            (
                directory.toggle_status(&user_id)?,
                "アカウント状態を切り替えました",
            )
        }
    };
    directory
        .save(&mut kv)
        .map_err(crate::exit::store_failed_err)?;

    if ctx.json {
        write_json(&account)?;
    } else if !ctx.ui.quiet {
        println!(
            "{message}: id={} {} [{} / {}]",
            account.user.user_id, account.user.username, account.user.role, account.status
        );
    }
    Ok(())
}

fn resolve_account(directory: &UserDirectory, user: &str) -> Result<String, UserError> {
    directory
        .resolve_id(user)
        .map(str::to_string)
        .ok_or_else(|| UserError::NotFound(user.to_string()))
}

fn ensure_not_self(admin: &User, user_id: &str, command: &str) -> Result<()> {
    if admin.user_id == user_id {
        return Err(crate::exit::invalid_args(format!(
            "{command}: ログイン中の自分自身は対象にできません"
        )));
    }
    Ok(())
}

fn run_fmea(ctx: &Ctx, command: FmeaCommand) -> Result<()> {
    match command {
        FmeaCommand::Rpn {
            severity,
            occurrence,
            detection,
        } => {
            let rpn = Rpn::new(severity, occurrence, detection)?;
            if ctx.json {
                write_json(&rpn)?;
            } else {
                crate::ui::print_rpn(&rpn, &ctx.ui);
            }
        }
        FmeaCommand::Scales { factor } => {
            let factors: Vec<Factor> = match factor {
                Some(f) => vec![f],
                None => Factor::ALL.to_vec(),
            };
            if ctx.json {
                let tables: std::collections::BTreeMap<&str, _> = factors
                    .iter()
                    .map(|f| (f.as_str(), crate::fmea::scale(*f)))
                    .collect();
                write_json(&tables)?;
            } else {
                crate::ui::print_scales(&factors, &ctx.ui);
            }
        }
    }
    Ok(())
}

fn run_export(
    ctx: &Ctx,
    store: &RiskStore<FileKvStore>,
    user: &User,
    args: ExportArgs,
) -> Result<()> {
    if args.stdout && ctx.json {
        return Err(crate::exit::invalid_args(
            "export --stdout は --json と併用できません（--format json を使用してください）",
        ));
    }
    for id in &args.risk_ids {
        if store.get_by_id(id).is_none() {
            return Err(crate::store::StoreError::NotFound(id.clone()).into());
        }
    }

    let now = OffsetDateTime::now_utc();
    let options = ExportOptions {
        risk_ids: args.risk_ids,
        include_audit_trail: args.include_audit_trail,
    };
    let bundle = crate::export::build_bundle(
        store.risks(),
        store.audit_trail(),
        store.summary(),
        Some(user),
        &options,
        now,
    );
    let contents = crate::export::render(&bundle, args.format, &ctx.directory)?;

    if args.stdout {
        return write_stdout(&contents);
    }

    let path = crate::export::write_export(&ctx.cfg.exports_dir(), args.format, now, &contents)?;
    let hint = crate::export::mask_home(&path, &ctx.home_dir);
    if ctx.json {
        write_json(&ExportResult {
            path: path.display().to_string(),
            format: args.format.to_string(),
            risks: bundle.risks.len(),
        })?;
    } else if !ctx.ui.quiet {
        println!("エクスポートしました（{} 件）: {hint}", bundle.risks.len());
    }
    Ok(())
}

fn authorize(ctx: &Ctx, kv: &impl KvStore, required: Role) -> Result<User> {
    let current = session::active_user(kv, &ctx.directory);
    let user = identity::require(current.as_ref(), required)?;
    tracing::debug!(user_id = %user.user_id, required = %required, "authorized");
    Ok(user.clone())
}

fn resolve_user_id(directory: &UserDirectory, user: &str) -> String {
    directory
        .resolve_id(user)
        .map_or_else(|| user.to_string(), str::to_string)
}

fn warn_unknown_reference(reference: Option<&str>) {
    let Some(reference) = reference else {
        return;
    };
    if RegulatoryStore::builtin().get_by_id(reference).is_none() {
        tracing::warn!("規制参照がカタログに存在しません: {reference}");
    }
}

fn notice_dismissed(kv: &impl KvStore) -> bool {
    match kv.get(kv::DEMO_NOTICE_DISMISSED_KEY) {
        Ok(v) => v.is_some(),
        Err(err) => {
            tracing::warn!("{err:#}");
            false
        }
    }
}

fn report_risk(ctx: &Ctx, risk: &Risk, message: &str) -> Result<()> {
    if ctx.json {
        return write_json(risk);
    }
    if !ctx.ui.quiet {
        println!(
            "{message}: id={} スコア={} ({})",
            risk.risk_id,
            risk.risk_score(),
            risk.risk_name
        );
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("RISKREG_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    use std::io::Write;

    let buf = serde_json::to_vec_pretty(value)?;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn write_stdout(s: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(s.as_bytes()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn confirm_destructive(ui: &UiConfig, yes: bool, command: &str, token: &str) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    if !(ui.stdin_is_tty && ui.stdout_is_tty) {
        return Err(crate::exit::invalid_args(format!(
            "{command} は確認が必要です。非対話環境では --yes を指定してください"
        )));
    }
    confirm_exact(
        &format!("{command} は元に戻せません。続行するには '{token}' と入力してください: "),
        token,
    )
}

fn confirm_exact(prompt: &str, expected: &str) -> Result<bool> {
    use std::io::{BufRead, Write};

    let mut stderr = std::io::stderr().lock();
    write!(stderr, "{prompt}")?;
    stderr.flush()?;

    let mut input = String::new();
    let mut stdin = std::io::stdin().lock();
    let n = stdin.read_line(&mut input)?;
    if n == 0 {
        return Ok(false);
    }
    Ok(input.trim() == expected)
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "未対応のシェルです: {other}（bash|zsh|fish を指定してください）"
        ))),
    }
}
