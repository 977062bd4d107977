//! Mailscope - saved searches over a mailbox snapshot
//!
//! Loads a JSON mailbox into the in-memory index, keeps virtual folders and
//! view preferences in the SQLite preference database, and prints views.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use log::error;
use mailview::{
    AttachmentFilter, CombineMode, DateRange, FolderId, MailView, MatchKeys, Message, PrefStore,
    QueryExecutor,
    ScopedSearch, SearchCriteria, SearchScope, Settings, SortKey, SortOrder, SortSpec,
    SqlitePrefStore, ViewContext, ViewRow, ViewTarget, ViewWrapper, VirtualFolder,
    VirtualFolderId, VirtualFolderRegistry, build,
};

mod mailbox;

use mailbox::Mailbox;
use serde::Serialize;

/// Default mailbox snapshot in the config directory
const MAILBOX_FILE: &str = "mailbox.json";

#[derive(Parser)]
#[command(name = "mailscope")]
#[command(about = "Saved searches and virtual folders over a mailbox")]
struct Cli {
    /// Mailbox snapshot (defaults to mailbox.json in the config directory)
    #[arg(long, global = true)]
    mailbox: Option<PathBuf>,

    /// Print rows as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the current folder, its account and everything at once
    Search {
        #[command(flatten)]
        criteria: CriteriaArgs,
        /// Folder the search starts from
        #[arg(long)]
        folder: Option<String>,
        /// Scope whose results are printed
        #[arg(long, value_enum, default_value_t = ScopeArg::Global)]
        show: ScopeArg,
    },

    /// Save a search as a virtual folder
    Save {
        /// Virtual folder name
        name: String,
        #[command(flatten)]
        criteria: CriteriaArgs,
        /// Backing folder (repeatable)
        #[arg(long = "folder", required = true)]
        folders: Vec<String>,
        /// Match any criterion instead of all of them
        #[arg(long)]
        any: bool,
    },

    /// List virtual folders
    List,

    /// Open a folder or virtual folder and print its rows
    Open {
        /// Folder id, virtual folder id or virtual folder name
        target: String,
        /// Show only `all`, `unread`, `read` or `tag:<name>`
        #[arg(long, default_value = "all")]
        view: MailView,
    },

    /// Change and persist the sort of a folder or virtual folder
    Sort {
        target: String,
        #[arg(value_enum)]
        key: SortKeyArg,
        #[arg(value_enum, default_value_t = SortOrderArg::Descending)]
        order: SortOrderArg,
    },

    /// Persist the threaded setting of a folder or virtual folder
    Thread {
        target: String,
        #[arg(action = clap::ArgAction::Set)]
        threaded: bool,
    },

    /// Rename a virtual folder
    Rename { target: String, name: String },

    /// Delete a virtual folder
    Delete { target: String },

    /// Change the sort and threading used when nothing is stored for a folder
    Defaults {
        #[arg(long, value_enum)]
        sort: Option<SortKeyArg>,
        #[arg(long, value_enum)]
        order: Option<SortOrderArg>,
        #[arg(long, action = clap::ArgAction::Set)]
        threaded: Option<bool>,
    },
}

#[derive(clap::Args)]
struct CriteriaArgs {
    #[arg(long, default_value = "")]
    subject: String,
    #[arg(long, default_value = "")]
    sender: String,
    #[arg(long, default_value = "")]
    recipient: String,
    /// Matches subject, sender, recipients or body
    #[arg(long, default_value = "")]
    text: String,
    /// Require attachments (`yes`), forbid them (`no`) or match a file name
    #[arg(long)]
    attachment: Option<String>,
    /// Limit to today and the N - 1 days before it
    #[arg(long, conflicts_with_all = ["from", "to"])]
    days: Option<u32>,
    /// First day of a custom range (YYYY-MM-DD)
    #[arg(long, requires = "to")]
    from: Option<NaiveDate>,
    /// Last day of a custom range (YYYY-MM-DD)
    #[arg(long, requires = "from")]
    to: Option<NaiveDate>,
}

impl CriteriaArgs {
    fn to_criteria(&self) -> SearchCriteria {
        let attachment = match self.attachment.as_deref() {
            None => AttachmentFilter::Any,
            Some("yes") => AttachmentFilter::With { name: None },
            Some("no") => AttachmentFilter::Without,
            Some(name) => AttachmentFilter::With {
                name: Some(name.to_string()),
            },
        };
        SearchCriteria {
            subject: self.subject.clone(),
            sender: self.sender.clone(),
            recipient: self.recipient.clone(),
            full_text: self.text.clone(),
            attachment,
            date_range: self.date_range(),
        }
    }

    fn date_range(&self) -> DateRange {
        match (self.days, self.from, self.to) {
            (Some(days), _, _) => DateRange::LastDays(days),
            (None, Some(from), Some(to)) => DateRange::Custom { from, to },
            _ => DateRange::Unlimited,
        }
    }
}

/// `search --json` output
#[derive(Serialize)]
struct SearchOutput<'a> {
    match_keys: &'a MatchKeys,
    messages: &'a [Message],
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Folder,
    Account,
    Global,
}

impl From<ScopeArg> for SearchScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Folder => SearchScope::Folder,
            ScopeArg::Account => SearchScope::Account,
            ScopeArg::Global => SearchScope::Global,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SortKeyArg {
    Date,
    Subject,
    Sender,
    Recipients,
    Unread,
    Folder,
}

impl From<SortKeyArg> for SortKey {
    fn from(key: SortKeyArg) -> Self {
        match key {
            SortKeyArg::Date => SortKey::Date,
            SortKeyArg::Subject => SortKey::Subject,
            SortKeyArg::Sender => SortKey::Sender,
            SortKeyArg::Recipients => SortKey::Recipients,
            SortKeyArg::Unread => SortKey::Unread,
            SortKeyArg::Folder => SortKey::Folder,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SortOrderArg {
    Ascending,
    Descending,
}

impl From<SortOrderArg> for SortOrder {
    fn from(order: SortOrderArg) -> Self {
        match order {
            SortOrderArg::Ascending => SortOrder::Ascending,
            SortOrderArg::Descending => SortOrder::Descending,
        }
    }
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load()?;
    let mailbox_path = match cli.mailbox {
        Some(path) => path,
        None => config::config_path(MAILBOX_FILE).context("Could not determine config directory")?,
    };
    let index = Mailbox::load(&mailbox_path)?.into_index();

    let db_path = settings.database_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let prefs: Arc<dyn PrefStore> = Arc::new(SqlitePrefStore::new(&db_path)?);
    let registry = VirtualFolderRegistry::open(prefs.clone(), index.clone())?;
    let ctx = ViewContext {
        executor: QueryExecutor::new(index.clone()),
        folders: index,
        registry,
        prefs,
        settings,
    };

    match cli.command {
        Commands::Search {
            criteria,
            folder,
            show,
        } => {
            let query = build(&criteria.to_criteria());
            let current = folder.map(FolderId::new);
            let mut search = ScopedSearch::start(
                &ctx.executor,
                ctx.folders.as_ref(),
                query.predicate.clone(),
                current.as_ref(),
            );
            if !search.wait_complete(ctx.settings.wait_timeout()) {
                bail!("Search did not finish in time");
            }
            for scope in SearchScope::ALL {
                if let Some(collection) = search.collection(scope) {
                    eprintln!("{:?}: {} messages", scope, collection.len());
                }
            }
            let messages = search.results(show.into());
            if cli.json {
                let output = SearchOutput {
                    match_keys: &query.match_keys,
                    messages,
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                for m in messages {
                    println!(
                        "{}  {:<28}  {}",
                        m.date.format("%Y-%m-%d %H:%M"),
                        truncate(&m.from.display(), 28),
                        m.subject
                    );
                }
            }
        }
        Commands::Save {
            name,
            criteria,
            folders,
            any,
        } => {
            let query = build(&criteria.to_criteria());
            let combine = if any { CombineMode::Or } else { CombineMode::And };
            let backing = folders.into_iter().map(FolderId::new).collect();
            let id = ctx
                .registry
                .create(&name, query.predicate, combine, backing)?;
            let record = ctx.registry.get(&id).context("Saved folder disappeared")?;
            if record.is_orphaned() {
                eprintln!("warning: {} has no valid backing folders", name);
            }
            println!("{}", id);
        }
        Commands::List => {
            let folders = ctx.registry.list();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&folders)?);
            } else {
                for folder in &folders {
                    print_virtual_folder(&ctx, folder);
                }
            }
        }
        Commands::Open { target, view } => {
            let mut wrapper = open(&ctx, &target)?;
            wrapper.set_mail_view(view);
            print_rows(wrapper.rows(), cli.json)?;
        }
        Commands::Sort { target, key, order } => {
            let mut wrapper = open(&ctx, &target)?;
            wrapper.sort(SortSpec::new(key.into(), order.into()))?;
            print_rows(wrapper.rows(), cli.json)?;
        }
        Commands::Thread { target, threaded } => {
            let mut wrapper = open(&ctx, &target)?;
            wrapper.set_threaded(threaded)?;
            print_rows(wrapper.rows(), cli.json)?;
        }
        Commands::Rename { target, name } => {
            let id = find_virtual(&ctx, &target).with_context(|| format!("No virtual folder {target}"))?;
            ctx.registry.rename(&id, &name)?;
        }
        Commands::Delete { target } => {
            let id = find_virtual(&ctx, &target).with_context(|| format!("No virtual folder {target}"))?;
            ctx.registry.delete(&id)?;
        }
        Commands::Defaults {
            sort,
            order,
            threaded,
        } => {
            let mut settings = ctx.settings.clone();
            apply_defaults(&mut settings, sort, order, threaded);
            settings.save()?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }
    Ok(())
}

fn apply_defaults(
    settings: &mut Settings,
    sort: Option<SortKeyArg>,
    order: Option<SortOrderArg>,
    threaded: Option<bool>,
) {
    if let Some(key) = sort {
        settings.default_sort.key = key.into();
    }
    if let Some(order) = order {
        settings.default_sort.order = order.into();
    }
    if let Some(threaded) = threaded {
        settings.default_threaded = threaded;
    }
}

/// Virtual folder by id or (local) name
fn find_virtual(ctx: &ViewContext, target: &str) -> Option<VirtualFolderId> {
    let id = VirtualFolderId::new(target);
    if ctx.registry.get(&id).is_some() {
        return Some(id);
    }
    ctx.registry.find_by_name(None, target).map(|f| f.id)
}

fn open(ctx: &ViewContext, target: &str) -> Result<ViewWrapper> {
    let target = match find_virtual(ctx, target) {
        Some(id) => ViewTarget::Virtual(id),
        None => ViewTarget::Folder(FolderId::new(target)),
    };
    let mut wrapper = ViewWrapper::new(ctx.clone());
    wrapper.open(target.clone())?;
    if !wrapper.wait_until_loaded(ctx.settings.wait_timeout()) {
        bail!("{} did not finish loading", target);
    }
    Ok(wrapper)
}

fn print_virtual_folder(ctx: &ViewContext, folder: &VirtualFolder) {
    let mut flags = Vec::new();
    if folder.is_orphaned() {
        flags.push("orphaned");
    }
    if ctx.registry.has_new_messages(&folder.id) {
        flags.push("new");
    }
    println!(
        "{:<12} {:<24} {} folders {}",
        folder.id.as_str(),
        folder.name,
        folder.backing.len(),
        flags.join(",")
    );
}

fn print_rows(rows: &[ViewRow], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }
    for row in rows {
        let marker = if row.unread { '*' } else { ' ' };
        let indent = "  ".repeat(row.depth);
        let size = if row.thread_size > 1 {
            format!(" ({})", row.thread_size)
        } else {
            String::new()
        };
        println!(
            "{} {}  {:<28}  {}{}{}",
            marker,
            row.date.format("%Y-%m-%d %H:%M"),
            truncate(&row.sender, 28),
            indent,
            row.subject,
            size
        );
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn test_criteria_args() {
        let cli = Cli::try_parse_from([
            "mailscope", "search", "--subject", "foo", "--attachment", "no", "--days", "7",
        ])
        .unwrap();
        let Commands::Search { criteria, .. } = cli.command else {
            panic!("expected search");
        };
        let criteria = criteria.to_criteria();
        assert_eq!(criteria.subject, "foo");
        assert_eq!(criteria.attachment, AttachmentFilter::Without);
        assert_eq!(criteria.date_range, DateRange::LastDays(7));
    }

    #[test]
    fn test_custom_date_range() {
        let cli = Cli::try_parse_from([
            "mailscope", "search", "--from", "2024-05-01", "--to", "2024-05-03",
        ])
        .unwrap();
        let Commands::Search { criteria, .. } = cli.command else {
            panic!("expected search");
        };
        assert_eq!(
            criteria.to_criteria().date_range,
            DateRange::Custom {
                from: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                to: NaiveDate::from_ymd_opt(2024, 5, 3).unwrap(),
            }
        );

        assert!(Cli::try_parse_from(["mailscope", "search", "--from", "2024-05-01"]).is_err());
        assert!(
            Cli::try_parse_from([
                "mailscope", "search", "--days", "3", "--from", "2024-05-01", "--to", "2024-05-03",
            ])
            .is_err()
        );
    }

    #[test]
    fn test_search_json_includes_match_keys() {
        let criteria = SearchCriteria {
            subject: "quarterly report".to_string(),
            ..Default::default()
        };
        let query = build(&criteria);
        let output = SearchOutput {
            match_keys: &query.match_keys,
            messages: &[],
        };
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(
            value["match_keys"]["subject"],
            serde_json::json!(["quarterly", "report"])
        );
        assert_eq!(value["messages"], serde_json::json!([]));
    }

    #[test]
    fn test_defaults_updates_only_given_fields() {
        let cli = Cli::try_parse_from([
            "mailscope", "defaults", "--sort", "subject", "--threaded", "true",
        ])
        .unwrap();
        let Commands::Defaults {
            sort,
            order,
            threaded,
        } = cli.command
        else {
            panic!("expected defaults");
        };
        let mut settings = Settings::default();
        apply_defaults(&mut settings, sort, order, threaded);
        assert_eq!(settings.default_sort.key, SortKey::Subject);
        assert_eq!(settings.default_sort.order, SortOrder::Descending);
        assert!(settings.default_threaded);
        assert_eq!(settings.database_file, "mailscope.sqlite");
    }

    #[test]
    fn test_open_parses_mail_view() {
        let cli = Cli::try_parse_from(["mailscope", "open", "local://inbox", "--view", "unread"])
            .unwrap();
        let Commands::Open { view, .. } = cli.command else {
            panic!("expected open");
        };
        assert_eq!(view, MailView::Unread);
    }
}
