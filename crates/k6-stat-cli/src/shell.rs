use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tokio::io::AsyncWriteExt;

use k6_stat_core::report;
use k6_stat_core::samples::io as samples_io;
use k6_stat_core::session::{SessionFilter, TestSelector};
use k6_stat_core::store::{TestFilter, TestIdFilter};
use k6_stat_core::{ClickhouseClient, Session, SortBy, StatError};

const TESTS_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// ---------------------------------------------------------------------------
// Command line grammar
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "k6-stat",
    no_binary_name = true,
    disable_help_subcommand = true,
    disable_version_flag = true
)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: ShellCommand,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ShellCommand {
    /// List recorded test runs
    Tests(TestsArgs),
    /// Set label and url patterns used by select and reference
    Filter(FilterArgs),
    /// Load a test run as the selected dataset
    Select(SelectArgs),
    /// Load a test run as the reference for diff
    Reference(SelectArgs),
    /// Write selected and reference datasets to JSON files
    Save(FilesArgs),
    /// Read selected and reference datasets from JSON files
    Load(FilesArgs),
    /// Rank endpoints of the selected run
    Top(TopArgs),
    /// Rank endpoints of the reference run
    #[command(name = "ref-top")]
    RefTop(TopArgs),
    /// Compare the selected run against the reference
    Diff(DiffArgs),
    /// Export test samples as CSV
    Csv(CsvArgs),
    /// Print help
    Help,
    /// Leave the shell
    #[command(alias = "quit")]
    Exit,
}

#[derive(Args, Debug, PartialEq)]
pub struct TestsArgs {
    /// Earliest start time, inclusive (YYYY-MM-DDTHH:MM:SS, UTC)
    #[arg(short = 'f', long, value_parser = parse_tests_time)]
    pub from: Option<DateTime<Utc>>,
    /// Latest start time, exclusive (YYYY-MM-DDTHH:MM:SS, UTC)
    #[arg(short = 'u', long, value_parser = parse_tests_time)]
    pub until: Option<DateTime<Utc>>,
    /// Test name pattern (SQL LIKE)
    #[arg(short = 'n', long, default_value = "")]
    pub name: String,
}

#[derive(Args, Debug, PartialEq)]
pub struct FilterArgs {
    /// Label pattern (SQL LIKE)
    #[arg(short = 'l', long, default_value = "")]
    pub label: String,
    /// Url pattern (SQL LIKE)
    #[arg(short = 'u', long, default_value = "")]
    pub url: String,
    /// Url pattern to exclude (SQL LIKE), repeatable
    #[arg(short = 'U', long = "skip-url")]
    pub skip_url: Vec<String>,
}

#[derive(Args, Debug, PartialEq)]
pub struct SelectArgs {
    /// Position in the last `tests` listing
    #[arg(short = 'n', long, conflicts_with = "id")]
    pub number: Option<usize>,
    /// Test id (conflicts with number)
    #[arg(short = 'i', long, requires = "time")]
    pub id: Option<u64>,
    /// Test start time, RFC 3339 (used with id)
    #[arg(short = 't', long, value_parser = parse_rfc3339)]
    pub time: Option<DateTime<Utc>>,
}

impl SelectArgs {
    fn selector(&self) -> Result<TestSelector, StatError> {
        match (self.number, self.id, self.time) {
            (Some(n), _, _) => Ok(TestSelector::Number(n)),
            (None, Some(id), Some(time)) => Ok(TestSelector::Id(TestIdFilter::new(id, time))),
            _ => Err(StatError::Validation(
                "set --number, or --id with --time".to_string(),
            )),
        }
    }
}

#[derive(Args, Debug, PartialEq)]
pub struct FilesArgs {
    /// Test file
    #[arg(short = 't', long)]
    pub test: Option<PathBuf>,
    /// Reference test file
    #[arg(short = 'r', long = "ref")]
    pub reference: Option<PathBuf>,
}

#[derive(Args, Debug, PartialEq)]
pub struct TopArgs {
    /// Records shown per label
    #[arg(short = 'c', long, default_value_t = 10)]
    pub count: usize,
    /// Sort by one of max, p99, p95, p90, p50, errors, count
    #[arg(short = 's', long, default_value = "p99")]
    pub sort: SortBy,
    /// Save report to file
    #[arg(short = 'o', long)]
    pub out: Option<PathBuf>,
    /// Append to file
    #[arg(short = 'a', long)]
    pub append: bool,
}

#[derive(Args, Debug, PartialEq)]
pub struct DiffArgs {
    #[command(flatten)]
    pub top: TopArgs,
    /// Rank by change against the reference
    #[arg(short = 'd', long = "by-diff")]
    pub by_diff: bool,
}

#[derive(Args, Debug, PartialEq)]
pub struct CsvArgs {
    /// Export the reference test instead of the selected one
    #[arg(short = 'r', long = "ref")]
    pub reference: bool,
    /// Write CSV to file instead of stdout
    #[arg(short = 'o', long)]
    pub out: Option<PathBuf>,
}

fn parse_tests_time(value: &str) -> Result<DateTime<Utc>, String> {
    NaiveDateTime::parse_from_str(value, TESTS_TIME_FORMAT)
        .map(|t| t.and_utc())
        .map_err(|e| format!("expected YYYY-MM-DDTHH:MM:SS: {e}"))
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339 time: {e}"))
}

/// Split a command line into words, honouring single and double quotes and
/// backslash escapes outside single quotes.
pub fn split_quoted(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some('\''), '\'') | (Some('"'), '"') => quote = None,
            (Some('\''), c) => word.push(c),
            (_, '\\') => match chars.next() {
                Some(next) => {
                    word.push(next);
                    in_word = true;
                }
                None => return Err("trailing backslash".to_string()),
            },
            (Some(_), c) => word.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            (None, c) => {
                word.push(c);
                in_word = true;
            }
        }
    }
    if quote.is_some() {
        return Err("unterminated quote".to_string());
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}

/// Parse one shell line; `Ok(None)` for a blank line.
pub fn parse_line(line: &str) -> Result<Option<ShellCommand>, clap::Error> {
    let words = split_quoted(line).map_err(|e| {
        ShellLine::command().error(clap::error::ErrorKind::InvalidValue, e)
    })?;
    if words.is_empty() {
        return Ok(None);
    }
    ShellLine::try_parse_from(words).map(|l| Some(l.command))
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Shell {
    client: ClickhouseClient,
    session: Session,
}

impl Shell {
    pub fn new(client: ClickhouseClient) -> Self {
        Self {
            client,
            session: Session::new(),
        }
    }

    /// Parse and run one line, reporting failures on stderr.
    pub async fn run_line(&mut self, line: &str) -> Flow {
        let command = match parse_line(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Flow::Continue,
            Err(e) => {
                // --help output goes to stdout, parse errors to stderr
                if let Err(io) = e.print() {
                    tracing::debug!(error = %io, "failed to print command error");
                }
                return Flow::Continue;
            }
        };
        match self.execute(command).await {
            Ok(flow) => flow,
            Err(e) => {
                match e.sql() {
                    Some(sql) => eprintln!("Error: {e}, sql: {sql}"),
                    None => eprintln!("Error: {e}"),
                }
                Flow::Continue
            }
        }
    }

    pub async fn execute(&mut self, command: ShellCommand) -> Result<Flow, StatError> {
        match command {
            ShellCommand::Tests(args) => {
                let filter = TestFilter {
                    from: args.from.map_or(0, |t| t.timestamp()),
                    until: args.until.map_or(0, |t| t.timestamp()),
                    name: args.name,
                };
                let tests = self.session.load_tests(&self.client, &filter).await?;
                print!("{}", report::render_tests(tests));
            }
            ShellCommand::Filter(args) => {
                self.session.set_filter(SessionFilter {
                    label: args.label,
                    url: args.url,
                    skip_url: args.skip_url,
                });
                println!("{}", self.session.filter());
            }
            ShellCommand::Select(args) => {
                let samples = self.select(&args, "test").await?;
                self.session.set_selected(samples);
            }
            ShellCommand::Reference(args) => {
                let samples = self.select(&args, "ref").await?;
                self.session.set_reference(samples);
            }
            ShellCommand::Save(args) => self.save(&args).await?,
            ShellCommand::Load(args) => self.load(&args).await?,
            ShellCommand::Top(args) => {
                let out = self.session.top(args.sort, args.count)?;
                emit(&out, args.out.as_deref(), args.append).await?;
            }
            ShellCommand::RefTop(args) => {
                let out = self.session.reference_top(args.sort, args.count)?;
                emit(&out, args.out.as_deref(), args.append).await?;
            }
            ShellCommand::Diff(args) => {
                let out = self
                    .session
                    .diff(args.top.sort, args.by_diff, args.top.count)?;
                emit(&out, args.top.out.as_deref(), args.top.append).await?;
            }
            ShellCommand::Csv(args) => {
                let samples = if args.reference {
                    self.session.reference()?
                } else {
                    self.session.selected()?
                };
                let csv = report::export_csv(samples)?;
                emit(&csv, args.out.as_deref(), false).await?;
            }
            ShellCommand::Help => {
                print!("{}", ShellLine::command().render_help());
            }
            ShellCommand::Exit => return Ok(Flow::Exit),
        }
        Ok(Flow::Continue)
    }

    async fn select(
        &self,
        args: &SelectArgs,
        descr: &str,
    ) -> Result<k6_stat_core::TestSamples, StatError> {
        let selector = args.selector()?;
        let samples = self.session.load_samples(&self.client, selector).await?;

        let label = match selector {
            TestSelector::Number(n) => n.to_string(),
            TestSelector::Id(_) => descr.to_string(),
        };
        print!("{}", report::render_test(&samples.test, &label, true));
        println!("{}", self.session.filter());
        println!(
            "Loaded {} {} labels, {} urls",
            descr,
            samples.samples.len(),
            samples.len()
        );
        Ok(samples)
    }

    async fn save(&self, args: &FilesArgs) -> Result<(), StatError> {
        if let Some(path) = &args.test {
            samples_io::write_test_samples(self.session.selected()?, path).await?;
        }
        if let Some(path) = &args.reference {
            samples_io::write_test_samples(self.session.reference()?, path).await?;
        }
        Ok(())
    }

    async fn load(&mut self, args: &FilesArgs) -> Result<(), StatError> {
        if let Some(path) = &args.test {
            let samples = samples_io::read_test_samples(path).await?;
            print!("{}", report::render_test(&samples.test, "test", true));
            self.session.set_selected(samples);
        }
        if let Some(path) = &args.reference {
            let samples = samples_io::read_test_samples(path).await?;
            print!(
                "{}",
                report::render_test(&samples.test, "ref", args.test.is_none())
            );
            self.session.set_reference(samples);
        }
        Ok(())
    }
}

/// Print `text` and, when `out` is set, also write it to that file.
async fn emit(text: &str, out: Option<&Path>, append: bool) -> Result<(), StatError> {
    print!("{text}");
    if let Some(path) = out {
        write_report(path, text, append).await?;
    }
    Ok(())
}

async fn write_report(path: &Path, text: &str, append: bool) -> Result<(), StatError> {
    let mut options = tokio::fs::OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    let mut file = options.open(path).await?;
    file.write_all(text.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
