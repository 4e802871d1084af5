//! Interactive admin console.
//!
//! Each line is a slash command. Page commands go through the same router
//! gate as the site, so admin pages wait for the session mirror to settle
//! and refuse non-admins.

use crate::blog::{format_date, BlogDraft, BlogError, BlogService};
use crate::config;
use crate::leads::{Interest, LeadError, LeadKind, LeadService, Registration, CONTACT_DETAILS};
use crate::records::RecordStore;
use crate::router::{self, Navigation, Route};
use crate::session::{Credentials, MirrorSnapshot, SessionMirror};
use anyhow::{anyhow, Result};
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// How long to wait for a sign-in/out to reach the mirror before reporting.
const MIRROR_WAIT: Duration = Duration::from_secs(5);

/// ComplianceHub admin console
#[derive(Parser, Debug)]
#[command(name = "hub", about = "ComplianceHub admin console")]
pub struct Args {
    #[arg(short = 'c', long = "command", help = "Run one console command and exit")]
    pub command: Option<String>,

    #[arg(long, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Verbose logging")]
    pub verbose: bool,
}

/// Input ended while a command was asking for a value.
#[derive(Debug, thiserror::Error)]
#[error("input cancelled")]
pub struct Cancelled;

/// Source of answers for commands that ask questions.
pub trait Prompter {
    /// Ask for a value. A blank answer yields `default` when one is given.
    fn ask(&mut self, label: &str, default: Option<&str>) -> Result<String>;
}

/// Prompts on the terminal through the line editor.
pub struct EditorPrompter<'a> {
    rl: &'a mut DefaultEditor,
}

impl<'a> EditorPrompter<'a> {
    pub fn new(rl: &'a mut DefaultEditor) -> Self {
        Self { rl }
    }
}

impl Prompter for EditorPrompter<'_> {
    fn ask(&mut self, label: &str, default: Option<&str>) -> Result<String> {
        let prompt = format!("{}: ", label);
        let line = match default {
            Some(initial) if !initial.is_empty() => self.rl.readline_with_initial(&prompt, (initial, "")),
            _ => self.rl.readline(&prompt),
        };
        match line {
            Ok(line) => Ok(line.trim().to_string()),
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => Err(Cancelled.into()),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn optional(answer: String) -> Option<String> {
    if answer.trim().is_empty() {
        None
    } else {
        Some(answer)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Exit,
    Whoami,
    Login { email: String },
    Logout,
    Retry,
    Open(Route),
    Delete { id: String },
    Export { kind: LeadKind, file: Option<PathBuf> },
    Summary,
    Register { newsletter: bool },
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, String> {
        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap_or("");
        let arg = parts.next();
        let usage = |text: &str| Err(format!("usage: {}", text));

        match (name, arg) {
            ("/help", _) => Ok(Command::Help),
            ("/exit" | "/quit", _) => Ok(Command::Exit),
            ("/whoami", _) => Ok(Command::Whoami),
            ("/login", Some(email)) => Ok(Command::Login {
                email: email.to_string(),
            }),
            ("/login", None) => usage("/login <email>"),
            ("/logout", _) => Ok(Command::Logout),
            ("/retry", _) => Ok(Command::Retry),
            ("/open", Some(path)) => Ok(Command::Open(Route::resolve(path))),
            ("/open", None) => usage("/open <path>"),
            ("/posts", _) => Ok(Command::Open(Route::Blog)),
            ("/read", Some(slug)) => Ok(Command::Open(Route::BlogPost {
                slug: slug.to_string(),
            })),
            ("/read", None) => usage("/read <slug>"),
            ("/new", _) => Ok(Command::Open(Route::BlogEditor { id: None })),
            ("/edit", Some(id)) => Ok(Command::Open(Route::BlogEditor {
                id: Some(id.to_string()),
            })),
            ("/edit", None) => usage("/edit <id>"),
            ("/delete", Some(id)) => Ok(Command::Delete { id: id.to_string() }),
            ("/delete", None) => usage("/delete <id>"),
            ("/leads", _) => Ok(Command::Open(Route::AdminRegistrations)),
            ("/export", Some(kind)) => match LeadKind::parse(kind) {
                Some(kind) => Ok(Command::Export {
                    kind,
                    file: parts.next().map(PathBuf::from),
                }),
                None => usage("/export <demo|newsletter> [file]"),
            },
            ("/export", None) => usage("/export <demo|newsletter> [file]"),
            ("/summary", _) => Ok(Command::Summary),
            ("/register", None) => Ok(Command::Register { newsletter: false }),
            ("/register", Some("newsletter")) => Ok(Command::Register { newsletter: true }),
            ("/register", Some(_)) => usage("/register [newsletter]"),
            _ => Err(format!("Unknown command: {}", name)),
        }
    }
}

/// What the loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Console {
    mirror: Arc<SessionMirror>,
    blog: BlogService,
    leads: LeadService,
}

impl Console {
    pub fn new(mirror: Arc<SessionMirror>, records: Arc<dyn RecordStore>) -> Self {
        Self {
            mirror,
            blog: BlogService::new(records.clone()),
            leads: LeadService::new(records),
        }
    }

    pub async fn execute(
        &self,
        line: &str,
        input: &mut dyn Prompter,
        out: &mut dyn Write,
    ) -> Result<Flow> {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(message) => {
                writeln!(out, "{}", message)?;
                return Ok(Flow::Continue);
            }
        };
        tracing::debug!(?command, "console command");

        match command {
            Command::Exit => return Ok(Flow::Exit),
            Command::Help => print_help(out)?,
            Command::Whoami => self.whoami(&self.mirror.snapshot(), out)?,
            Command::Login { email } => self.login(&email, input, out).await?,
            Command::Logout => self.logout(out).await?,
            Command::Retry => {
                self.mirror.reprobe().await?;
                self.whoami(&self.mirror.snapshot(), out)?;
            }
            Command::Open(route) => {
                if let Some(route) = self.admit(route, out).await? {
                    self.render(route, input, out).await?;
                }
            }
            Command::Delete { id } => {
                if self.admit(Route::AdminBlog, out).await?.is_some() {
                    self.delete_post(&id, input, out).await?;
                }
            }
            Command::Export { kind, file } => {
                if self.admit(Route::AdminRegistrations, out).await?.is_some() {
                    let csv = self.leads.export_csv(kind).await?;
                    let path = file.unwrap_or_else(|| PathBuf::from(kind.file_name()));
                    std::fs::write(&path, &csv)?;
                    let rows = csv.lines().count().saturating_sub(1);
                    writeln!(out, "[hub] wrote {} {} rows to {}", rows, kind.as_str(), path.display())?;
                }
            }
            Command::Summary => {
                if self.admit(Route::AdminRegistrations, out).await?.is_some() {
                    write!(out, "{}", self.leads.summary().await?)?;
                }
            }
            Command::Register { newsletter } => self.register(newsletter, input, out).await?,
        }
        Ok(Flow::Continue)
    }

    /// Run `route` through the admin gate, waiting for the mirror if needed.
    async fn admit(&self, route: Route, out: &mut dyn Write) -> Result<Option<Route>> {
        let mut snapshot = self.mirror.snapshot();
        let mut navigation = router::gate(route, &snapshot);
        if let Navigation::Pending(route) = navigation {
            writeln!(out, "[hub] waiting for session...")?;
            snapshot = self.mirror.settled().await;
            navigation = router::gate(route, &snapshot);
        }

        match navigation {
            Navigation::Render(route) => Ok(Some(route)),
            Navigation::Redirect(to) => {
                writeln!(out, "[hub] admin access required, redirected to {}", to)?;
                Ok(None)
            }
            Navigation::SessionUnknown(_) => {
                let reason = snapshot.probe_error.as_deref().unwrap_or("unknown error");
                writeln!(out, "[hub] session state unknown ({}); try /retry", reason)?;
                Ok(None)
            }
            Navigation::Pending(_) => {
                writeln!(out, "[hub] session still loading")?;
                Ok(None)
            }
        }
    }

    async fn await_mirror(&self, pred: impl FnMut(&MirrorSnapshot) -> bool) -> MirrorSnapshot {
        let mut rx = self.mirror.watch();
        let snapshot = match tokio::time::timeout(MIRROR_WAIT, rx.wait_for(pred)).await {
            Ok(Ok(snapshot)) => snapshot.clone(),
            _ => self.mirror.snapshot(),
        };
        snapshot
    }

    fn whoami(&self, snapshot: &MirrorSnapshot, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "phase: {}", snapshot.phase)?;
        writeln!(out, "email: {}", snapshot.email().unwrap_or("-"))?;
        writeln!(out, "admin: {}", if snapshot.is_admin { "yes" } else { "no" })?;
        if let Some(err) = &snapshot.probe_error {
            writeln!(out, "probe error: {}", err)?;
        }
        Ok(())
    }

    async fn login(&self, email: &str, input: &mut dyn Prompter, out: &mut dyn Write) -> Result<()> {
        let password = input.ask("Password", None)?;
        let session = self.mirror.sign_in(&Credentials::new(email, password)).await?;
        let user_id = session.user.id.clone();
        let snapshot = self
            .await_mirror(|s| s.session.as_ref().map(|s| s.user.id.as_str()) == Some(user_id.as_str()))
            .await;
        writeln!(out, "[hub] signed in as {}", session.email().unwrap_or(email))?;
        self.whoami(&snapshot, out)
    }

    async fn logout(&self, out: &mut dyn Write) -> Result<()> {
        self.mirror.sign_out().await?;
        self.await_mirror(|s| s.session.is_none()).await;
        writeln!(out, "[hub] signed out")?;
        Ok(())
    }

    async fn render(&self, route: Route, input: &mut dyn Prompter, out: &mut dyn Write) -> Result<()> {
        match route {
            Route::Home => {
                writeln!(out, "Nexus Compliance: Regulatory Compliance for financial services")?;
                writeln!(out, "  /posts for insights, /register for services, /open /contact to reach us")?;
            }
            Route::Blog => {
                let posts = self.blog.published_posts().await?;
                if posts.is_empty() {
                    writeln!(out, "No posts published yet. Check back later for updates")?;
                }
                for post in posts {
                    writeln!(out, "{}  {}  (/blog/{})", format_date(&post.created_at), post.title, post.slug)?;
                    if let Some(excerpt) = &post.excerpt {
                        writeln!(out, "    {}", excerpt)?;
                    }
                }
            }
            Route::BlogPost { slug } => match self.blog.published_post(&slug).await {
                Ok(post) => {
                    writeln!(out, "{}", post.title)?;
                    writeln!(out, "{} | By {}", format_date(&post.created_at), post.author_name())?;
                    writeln!(out)?;
                    writeln!(out, "{}", post.content)?;
                }
                Err(BlogError::NotFound) => writeln!(out, "Post not found, see /posts")?,
                Err(e) => return Err(e.into()),
            },
            Route::Auth => writeln!(out, "Sign in with /login <email>")?,
            Route::Contact => {
                writeln!(out, "Contact us")?;
                for line in CONTACT_DETAILS {
                    writeln!(out, "  {}", line)?;
                }
                writeln!(out, "  /register to send us a message")?;
            }
            Route::Dashboard => {
                writeln!(out, "Welcome to Your Dashboard")?;
                let snapshot = self.mirror.snapshot();
                writeln!(out, "  signed in as {}", snapshot.email().unwrap_or("nobody"))?;
            }
            Route::AdminBlog => {
                let posts = self.blog.all_posts().await?;
                if posts.is_empty() {
                    writeln!(out, "No posts yet, create one with /new")?;
                }
                for post in posts {
                    let status = if post.is_published { "published" } else { "draft" };
                    writeln!(
                        out,
                        "{}  {:<9}  {}  {}",
                        post.id,
                        status,
                        format_date(&post.created_at),
                        post.title
                    )?;
                }
            }
            Route::BlogEditor { id } => self.edit_post(id, input, out).await?,
            Route::AdminRegistrations => {
                let demos = self.leads.demo_requests().await?;
                writeln!(out, "Demo requests ({})", demos.len())?;
                for row in demos {
                    writeln!(
                        out,
                        "  {}  {} <{}>  {}  {}",
                        format_date(&row.created_at),
                        row.name,
                        row.email,
                        row.company_name.as_deref().unwrap_or("-"),
                        row.service_interest
                    )?;
                }
                let subs = self.leads.newsletter_subscriptions().await?;
                writeln!(out, "Newsletter subscriptions ({})", subs.len())?;
                for row in subs {
                    writeln!(
                        out,
                        "  {}  {} <{}>",
                        format_date(&row.created_at),
                        row.name.as_deref().unwrap_or("-"),
                        row.email
                    )?;
                }
            }
            Route::NotFound { path } => writeln!(out, "404: {} not found", path)?,
        }
        Ok(())
    }

    async fn edit_post(&self, id: Option<String>, input: &mut dyn Prompter, out: &mut dyn Write) -> Result<()> {
        let base = match &id {
            Some(id) => match self.blog.post(id).await {
                Ok(post) => BlogDraft::from_post(&post),
                Err(BlogError::NotFound) => {
                    writeln!(out, "No post with id {}", id)?;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            },
            None => BlogDraft::default(),
        };

        let title = input.ask("Title", Some(&base.title))?;
        let slug = input.ask("Slug (blank derives from title)", Some(&base.slug))?;
        let excerpt = optional(input.ask("Excerpt", base.excerpt.as_deref())?);
        let content = input.ask("Content", Some(&base.content))?;
        let publish = input.ask("Publish? [y/N]", Some(if base.is_published { "y" } else { "n" }))?;
        let draft = BlogDraft {
            title,
            slug,
            excerpt,
            content,
            is_published: is_yes(&publish),
        };

        let result = match id {
            Some(id) => self.blog.update(&id, draft).await.map(|()| format!("updated post {}", id)),
            None => {
                let author = self
                    .mirror
                    .current_session()
                    .map(|s| s.user.id)
                    .ok_or_else(|| anyhow!("not signed in"))?;
                self.blog
                    .create(draft, &author)
                    .await
                    .map(|post| format!("created post {} at /blog/{}", post.id, post.slug))
            }
        };

        match result {
            Ok(message) => writeln!(out, "[hub] {}", message)?,
            Err(BlogError::Invalid(errors)) => {
                for error in errors {
                    writeln!(out, "  {}", error)?;
                }
            }
            Err(BlogError::SlugTaken(slug)) => {
                writeln!(out, "  slug: This slug is already taken ({})", slug)?
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn delete_post(&self, id: &str, input: &mut dyn Prompter, out: &mut dyn Write) -> Result<()> {
        let answer = input.ask(&format!("Delete post {}? This cannot be undone [y/N]", id), None)?;
        if !is_yes(&answer) {
            writeln!(out, "[hub] kept post {}", id)?;
            return Ok(());
        }
        match self.blog.delete(id).await {
            Ok(()) => writeln!(out, "[hub] deleted post {}", id)?,
            Err(BlogError::NotFound) => writeln!(out, "No post with id {}", id)?,
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn register(&self, newsletter: bool, input: &mut dyn Prompter, out: &mut dyn Write) -> Result<()> {
        let mut form = if newsletter {
            Registration::newsletter()
        } else {
            Registration::default()
        };
        form.first_name = input.ask("First name", None)?;
        form.last_name = input.ask("Last name", None)?;
        form.email = input.ask("Email", None)?;
        form.company = optional(input.ask("Company (optional)", None)?);
        if !newsletter {
            let choices: Vec<&str> = Interest::ALL.iter().map(|i| i.as_str()).collect();
            let answer = input.ask(&format!("Interested in ({})", choices.join(", ")), None)?;
            form.interest = Interest::parse(answer.trim());
        }
        form.message = optional(input.ask("Message (optional)", None)?);
        form.agree_to_terms = is_yes(&input.ask("Agree to the terms and conditions? [y/N]", None)?);

        match self.leads.submit(&form).await {
            Ok(LeadKind::Newsletter) => writeln!(out, "Thank you for subscribing!")?,
            Ok(LeadKind::Demo) => writeln!(out, "Thank you! We'll get back to you shortly.")?,
            Err(LeadError::Invalid(errors)) => {
                for error in errors {
                    writeln!(out, "  {}", error)?;
                }
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

fn print_help(out: &mut dyn Write) -> Result<()> {
    writeln!(out, "Session:")?;
    writeln!(out, "  /whoami                      - show session state")?;
    writeln!(out, "  /login <email>               - sign in")?;
    writeln!(out, "  /logout                      - sign out")?;
    writeln!(out, "  /retry                       - look up the session again")?;
    writeln!(out, "Site:")?;
    writeln!(out, "  /open <path>                 - open a site path, e.g. /open #/blog")?;
    writeln!(out, "  /posts                       - list published posts")?;
    writeln!(out, "  /read <slug>                 - read a post")?;
    writeln!(out, "  /register [newsletter]       - fill in the registration form")?;
    writeln!(out, "Admin:")?;
    writeln!(out, "  /new                         - write a post")?;
    writeln!(out, "  /edit <id>                   - edit a post")?;
    writeln!(out, "  /delete <id>                 - delete a post")?;
    writeln!(out, "  /leads                       - list registrations")?;
    writeln!(out, "  /export <demo|newsletter> [file] - export registrations as CSV")?;
    writeln!(out, "  /summary                     - registration summary")?;
    writeln!(out, "  /help, /exit")?;
    Ok(())
}

/// Get the path to the history file
pub fn history_path() -> PathBuf {
    config::hub_dir().join("history")
}

pub fn run_once(console: &Console, rt: &Runtime, line: &str) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let mut input = EditorPrompter::new(&mut rl);
    let mut out = std::io::stdout();
    rt.block_on(console.execute(line, &mut input, &mut out))?;
    Ok(())
}

pub fn run_repl(console: &Console, rt: &Runtime) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    // Load command history
    let history_file = history_path();
    let _ = rl.load_history(&history_file);

    println!("hub - ComplianceHub console. /help for commands, /exit to quit");

    loop {
        match rl.readline("hub> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                let mut input = EditorPrompter::new(&mut rl);
                let mut out = std::io::stdout();
                match rt.block_on(console.execute(line, &mut input, &mut out)) {
                    Ok(Flow::Exit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    // Save command history
    if let Some(parent) = history_file.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = rl.save_history(&history_file);

    Ok(())
}
