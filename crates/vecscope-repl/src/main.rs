//! vecscope Interactive Shell (REPL)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use clap::Parser;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::{DefaultEditor, Result as RlResult};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};
use vecscope_client::{
    ClientFactory, ClientInitializer, EngineConfig, LoadOptions, LoadOutcome, MemoryBackend, NamespaceClient,
    QueryOrchestrator,
};
use vecscope_common::{Result as ScopeResult, Value};

mod commands;
mod format;

use commands::Command;
use format::Formatter;

const HISTORY_FILE: &str = ".vscope_history";

/// Browse and filter a vector database namespace.
#[derive(Parser, Debug)]
#[command(name = "vscope", version)]
struct Args {
    /// JSON array of documents to load into the namespace
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Namespace to open
    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// Rows per page (overrides the config file)
    #[arg(long)]
    page_size: Option<usize>,

    /// Engine config file
    #[arg(short, long, default_value = "vecscope.toml")]
    config: PathBuf,
}

/// Hands out the in-process backend as the namespace client.
struct LocalFactory {
    backend: Arc<MemoryBackend>,
}

#[async_trait]
impl ClientFactory for LocalFactory {
    async fn connect(&self, _connection_id: &str) -> ScopeResult<Arc<dyn NamespaceClient>> {
        let client: Arc<dyn NamespaceClient> = self.backend.clone();
        Ok(client)
    }
}

fn get_env_filter() -> EnvFilter {
    if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    } else if cfg!(debug_assertions) {
        EnvFilter::new("vecscope=debug")
    } else {
        EnvFilter::new("vecscope=info")
    }
}

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(run())
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();
    Registry::default().with(get_env_filter()).with(stderr_layer).init();

    let mut config = EngineConfig::load_from_path(&args.config)?;
    if let Some(page_size) = args.page_size {
        config.page_size = page_size.max(1);
        config.max_overfetch = config.max_overfetch.max(config.page_size);
    }

    print_banner();

    let backend = Arc::new(MemoryBackend::new());
    if let Some(path) = &args.data {
        let json = std::fs::read_to_string(path)?;
        let count = backend.load_json(args.namespace.as_str(), &json)?;
        println!("Loaded {} document(s) from {}", count.to_string().bold(), path.display());
    }

    let initializer = ClientInitializer::new(
        "local",
        Arc::new(LocalFactory { backend }),
        config.max_init_attempts,
    );
    let engine = QueryOrchestrator::connect(&initializer, args.namespace.as_str(), config).await?;
    println!("Opened namespace {}\n", args.namespace.cyan().bold());

    let mut repl = Repl::new(engine)?;
    repl.load(LoadOptions::default()).await;
    repl.run().await?;

    Ok(())
}

fn print_banner() {
    println!();
    println!("{}", "vecscope Interactive Shell".bold());
    println!("Type {} for help, {} to quit", ":h".cyan(), ":q".cyan());
    println!();
}

/// The main REPL state machine.
struct Repl {
    engine: QueryOrchestrator,
    editor: DefaultEditor,
    formatter: Formatter,
}

impl Repl {
    fn new(engine: QueryOrchestrator) -> RlResult<Self> {
        let mut editor = DefaultEditor::new()?;
        let _ = editor.load_history(HISTORY_FILE);

        Ok(Self {
            engine,
            editor,
            formatter: Formatter::new(),
        })
    }

    fn prompt(&self) -> String {
        let state = self.engine.snapshot();
        let filters = state.query.active_filters.len();
        if filters == 0 {
            format!("{}> ", state.namespace)
        } else {
            format!("{} [{}]> ", state.namespace, filters)
        }
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let prompt = self.prompt();

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    if self.handle_line(&line).await? {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }

        let _ = self.editor.save_history(HISTORY_FILE);
        println!("Goodbye!");
        Ok(())
    }

    /// Handle a line of input. Returns true if we should exit.
    async fn handle_line(&mut self, line: &str) -> anyhow::Result<bool> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(false);
        }
        self.editor.add_history_entry(line)?;

        let cmd = match trimmed.strip_prefix(':') {
            Some(cmd_str) => Command::parse(cmd_str),
            None => Command::Search(trimmed.to_string()),
        };
        Ok(self.execute_command(cmd).await)
    }

    /// Execute a command. Returns true if we should exit.
    async fn execute_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Quit => return true,

            Command::Help => Self::print_help(),

            Command::Filter {
                attribute,
                operator,
                value,
            } => {
                let id = self.engine.add_filter(&attribute, operator, &value);
                println!("Added filter {}", format!("#{id}").cyan());
                self.load(LoadOptions::default()).await;
            }

            Command::RemoveFilter(id) => {
                if self.engine.remove_filter(id) {
                    self.load(LoadOptions::default()).await;
                } else {
                    println!("No filter #{id}");
                }
            }

            Command::ClearFilters => {
                self.engine.clear_filters();
                self.load(LoadOptions::default()).await;
            }

            Command::Filters => self.print_filters(),

            Command::Search(text) => {
                self.engine.set_search_text(text);
                self.load(LoadOptions::default()).await;
            }

            Command::Sort(attribute, direction) => {
                self.engine.set_sort(attribute, direction);
                self.load(LoadOptions::default()).await;
            }

            Command::Next => {
                let start = Instant::now();
                let result = self.engine.next_page().await;
                self.navigate(result, start);
            }

            Command::Previous => {
                let start = Instant::now();
                let result = self.engine.previous_page().await;
                self.navigate(result, start);
            }

            Command::Page(n) => {
                let start = Instant::now();
                let result = self.engine.go_to_page(n).await;
                self.navigate(result, start);
            }

            Command::More => {
                let start = Instant::now();
                match self.engine.load_more().await {
                    LoadOutcome::Skipped => println!("{}", "(no more documents)".dimmed()),
                    outcome => self.report(outcome, start),
                }
            }

            Command::PageSize(n) => {
                self.load(LoadOptions {
                    limit: Some(n),
                    ..LoadOptions::default()
                })
                .await;
            }

            Command::Attributes(force) => {
                let attributes = self.engine.discover_attributes(force).await;
                println!();
                self.formatter.format_attributes(&attributes);
            }

            Command::Refresh => self.load(LoadOptions::forced()).await,

            Command::History => self.formatter.format_history(&self.engine.history()),

            Command::Restore(n) => match self.engine.history().get(n.wrapping_sub(1)) {
                Some(entry) => {
                    self.engine.restore_history(entry);
                    self.load(LoadOptions::default()).await;
                }
                None => println!("No history entry {n}"),
            },

            Command::Namespace => {
                println!("Current namespace: {}", self.engine.snapshot().namespace.cyan().bold());
            }

            Command::Use(namespace) => {
                self.engine.set_namespace(namespace.as_str());
                println!("Switched to namespace: {}", namespace.cyan().bold());
                self.load(LoadOptions::default()).await;
            }

            Command::Delete(ids) => {
                let ids = ids
                    .into_iter()
                    .map(|s| s.parse::<i64>().map(Value::Int).unwrap_or(Value::String(s)))
                    .collect();
                match self.engine.delete(ids).await {
                    Ok(resp) => {
                        println!("{} ({} row(s))", "Deleted".green().bold(), resp.rows_affected);
                        self.load(LoadOptions::default()).await;
                    }
                    Err(e) => print_error(&e),
                }
            }

            Command::Stats => {
                let stats = self.engine.cache_stats();
                println!(
                    "queries: {}/{} entries, {} hit(s)",
                    stats.queries.entries, stats.queries.max_entries, stats.queries.hits
                );
                println!(
                    "schemas: {}/{} entries, {} hit(s)",
                    stats.schemas.entries, stats.schemas.max_entries, stats.schemas.hits
                );
            }

            Command::ClearCache => {
                self.engine.clear_cache();
                println!("Cache cleared");
            }

            Command::Unknown(s) => {
                println!("Unknown command: {} (type :h for help)", s.red());
            }
        }
        false
    }

    async fn load(&mut self, options: LoadOptions) {
        let start = Instant::now();
        let outcome = self.engine.load_documents(options).await;
        self.report(outcome, start);
    }

    fn navigate(&mut self, result: vecscope_common::Result<LoadOutcome>, start: Instant) {
        match result {
            Ok(outcome) => self.report(outcome, start),
            Err(e) => print_error(&e),
        }
    }

    fn report(&mut self, outcome: LoadOutcome, start: Instant) {
        match outcome {
            LoadOutcome::Failed => {
                let message = self.engine.error().unwrap_or_default();
                println!("{}: {}", "Error".red().bold(), message);
                println!();
                self.engine.clear_error();
            }
            LoadOutcome::Skipped => println!("{}", "(a load is already running)".dimmed()),
            LoadOutcome::Loaded | LoadOutcome::Cached | LoadOutcome::Stale => {
                println!();
                if outcome == LoadOutcome::Cached {
                    println!("{}", "(cached)".dimmed());
                }
                self.formatter.format_page(&self.engine.snapshot(), start.elapsed());
            }
        }
    }

    fn print_filters(&self) {
        let state = self.engine.snapshot();
        if !state.query.search_text.trim().is_empty() {
            println!("search: {}", state.query.search_text.yellow());
        }
        if state.query.active_filters.is_empty() {
            println!("{}", "(no filters)".dimmed());
        }
        for filter in &state.query.active_filters {
            println!("{} {}", format!("#{}", filter.id).cyan(), filter);
        }
        println!();
    }

    fn print_help() {
        println!();
        println!("{}", "Commands:".bold());
        println!("  {} <attr> <op> <value>   Add a filter (=, !=, >, in, matches, ...)", ":f".cyan());
        println!("  {} <id>                 Remove a filter", ":rm".cyan());
        println!("  {}  {}               Remove all filters", ":c".cyan(), ":clear".cyan());
        println!("  {}                      List filters", ":fl".cyan());
        println!("  {} <text>                Search ids (a bare line does the same)", ":s".cyan());
        println!("  {} <attr> [asc|desc]   Sort", ":sort".cyan());
        println!("  {}  {}  {} <N>        Next, previous, jump to page", ":n".cyan(), ":p".cyan(), ":page".cyan());
        println!("  {}                       Append the next page", ":m".cyan());
        println!("  {} <N>                Rows per page", ":size".cyan());
        println!("  {}  {}                 Show attributes (resample with !)", ":a".cyan(), ":a!".cyan());
        println!("  {}                       Reload, bypassing the cache", ":r".cyan());
        println!("  {}  {} <N>       Show or restore past queries", ":hist".cyan(), ":restore".cyan());
        println!("  {}  {} <name>          Show or switch namespace", ":ns".cyan(), ":use".cyan());
        println!("  {} <id...>             Delete documents", ":del".cyan());
        println!("  {}                   Cache statistics", ":stats".cyan());
        println!("  {}             Drop cached pages and schemas", ":cache clear".cyan());
        println!("  {}  {}                Exit", ":q".cyan(), ":quit".cyan());
        println!();
    }
}

fn print_error(e: &vecscope_common::ScopeError) {
    println!("{}: {}", "Error".red().bold(), e.message());
    println!();
}
