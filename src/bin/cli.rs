use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use notenest::catalog;
use notenest::config::Config;
use notenest::logging::init_logging;
use notenest::{
    Accounts, FeedViewModel, HttpRepository, Identity, MemoryRepository, Note, NotesRepository,
};
use prettytable::{Cell, Row, Table};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Parser)]
#[command(name = "notenest")]
#[command(about = "Browse, upload and like shared study notes", long_about = None)]
struct Cli {
    #[arg(long, global = true, help = "Use built-in sample notes instead of the server")]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List the subject catalog")]
    Subjects,

    #[command(about = "Show the notes feed")]
    List {
        #[arg(short, long, default_value = "all", help = "Subject id to filter by")]
        subject: String,

        #[arg(long, default_value = "newest", help = "Sort order: newest, trending or downloads")]
        sort: String,
    },

    #[command(about = "Like a note")]
    Like {
        #[arg(help = "Note ID")]
        id: String,
    },

    #[command(about = "Upload a note")]
    Upload {
        #[arg(short, long, help = "Note title")]
        title: String,

        #[arg(short, long, help = "Subject id or name (e.g. phy or Physics)")]
        subject: String,

        #[arg(short, long, help = "Path to the file")]
        file: PathBuf,

        #[arg(short, long, help = "Author name shown on the note")]
        author: Option<String>,
    },

    #[command(about = "Create an account")]
    Signup {
        #[arg(short, long, help = "Username")]
        username: String,

        #[arg(short, long, help = "Password")]
        password: String,
    },

    #[command(about = "Log in to your account")]
    Login {
        #[arg(short, long, help = "Username")]
        username: String,

        #[arg(short, long, help = "Password")]
        password: String,
    },

    #[command(about = "Log out")]
    Logout,

    #[command(about = "Show current user")]
    Whoami,
}

/// Identity persisted between invocations.
struct Session {
    path: PathBuf,
}

impl Session {
    fn save(&self, identity: &Identity) -> Result<()> {
        let json = serde_json::to_string(identity)?;
        fs::write(&self.path, json).context("Failed to write session file")?;
        Ok(())
    }

    fn load(&self) -> Option<Identity> {
        let data = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&data).ok()
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

/// Keeps the most recent display list handed out by the feed.
#[derive(Clone, Default)]
struct TableRenderer {
    latest: Arc<Mutex<Option<Vec<Note>>>>,
}

impl TableRenderer {
    fn attach<R: NotesRepository>(&self, feed: &FeedViewModel<R>) {
        let latest = Arc::clone(&self.latest);
        feed.on_display_list_changed(move |notes| {
            if let Ok(mut slot) = latest.lock() {
                *slot = Some(notes.to_vec());
            }
        });
    }

    fn print(&self, heading: &str) {
        let notes = self
            .latest
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .unwrap_or_default();

        if notes.is_empty() {
            println!("📭 No notes found. Be the first to upload!");
            return;
        }

        println!("\n📚 {} ({})\n", heading, notes.len());

        let mut table = Table::new();
        table.add_row(Row::new(vec![
            Cell::new("ID"),
            Cell::new("Subject"),
            Cell::new("Title"),
            Cell::new("By"),
            Cell::new("❤️"),
            Cell::new("📥"),
            Cell::new("Uploaded"),
        ]));

        for note in notes {
            let uploaded = note
                .created_at
                .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "pending".to_string());
            let short_id: String = note.id.chars().take(8).collect();

            table.add_row(Row::new(vec![
                Cell::new(&short_id),
                Cell::new(&note.subject),
                Cell::new(&note.title),
                Cell::new(&note.author),
                Cell::new(&note.likes.to_string()),
                Cell::new(&note.downloads.to_string()),
                Cell::new(&uploaded),
            ]));
        }

        table.printstd();
        println!();
    }
}

#[tokio::main]
async fn main() {
    init_logging("warn");
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    if cli.offline {
        let session = Session {
            path: config.session_file.with_extension("offline"),
        };
        let feed = FeedViewModel::new(MemoryRepository::demo());
        run_command(&feed, &session, cli.command).await
    } else {
        let session = Session {
            path: config.session_file,
        };
        let feed = FeedViewModel::new(HttpRepository::new(config.api_url));
        feed.set_identity(session.load());
        run_command(&feed, &session, cli.command).await
    }
}

async fn run_command<R: NotesRepository + Accounts>(
    feed: &FeedViewModel<R>,
    session: &Session,
    command: Commands,
) -> Result<()> {
    let renderer = TableRenderer::default();

    match command {
        Commands::Subjects => list_subjects(),
        Commands::List { subject, sort } => {
            feed.set_subject_filter(&subject)?;
            feed.set_sort_key(&sort)?;
            renderer.attach(feed);
            feed.refresh().await?;
            renderer.print(&feed_heading(&subject));
        }
        Commands::Like { id } => {
            feed.ensure_identity().await?;
            feed.refresh().await?;
            let id = resolve_note_id(&feed.derive_display_list()?, &id);
            renderer.attach(feed);
            feed.like(&id).await?;
            println!("❤️  Liked note {}", id);
            renderer.print(&feed_heading(catalog::ALL_SUBJECTS_ID));
        }
        Commands::Upload {
            title,
            subject,
            file,
            author,
        } => {
            upload(feed, &renderer, title, subject, &file, author).await?;
        }
        Commands::Signup { username, password } => {
            let identity = feed.sign_up(&username, &password).await?;
            session.save(&identity)?;
            println!("✅ Account created successfully!");
            println!("👤 Username: {}", username);
        }
        Commands::Login { username, password } => {
            let identity = feed.log_in(&username, &password).await?;
            session.save(&identity)?;
            println!("✅ Login successful!");
            println!("👤 Welcome back, {}!", identity.display_name());
        }
        Commands::Logout => {
            feed.log_out().await?;
            session.clear()?;
            println!("✅ Logged out successfully!");
        }
        Commands::Whoami => match feed.identity() {
            Some(identity) if !identity.anonymous => {
                println!("👤 Logged in as: {}", identity.display_name());
                println!("🆔 User ID: {}", identity.uid);
            }
            _ => {
                println!("👤 Browsing as Guest");
                println!("💡 Use 'notenest login -u <username> -p <password>' to log in");
            }
        },
    }

    Ok(())
}

async fn upload<R: NotesRepository>(
    feed: &FeedViewModel<R>,
    renderer: &TableRenderer,
    title: String,
    subject: String,
    file: &Path,
    author: Option<String>,
) -> Result<()> {
    let bytes = fs::read(file)
        .with_context(|| format!("Failed to read file {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("note")
        .to_string();

    // Accept either a catalog id or a display name.
    let subject_name = catalog::find_by_id(&subject)
        .map(|s| s.name.to_string())
        .unwrap_or(subject);

    let identity = feed.ensure_identity().await?;
    let author = author.unwrap_or_else(|| identity.display_name().to_string());

    renderer.attach(feed);
    let note = feed
        .upload(&title, &subject_name, &file_name, bytes, &author)
        .await?;

    println!("✅ Note uploaded successfully!");
    println!("📄 Title: {}", note.title);
    println!("🆔 Note ID: {}", note.id);
    renderer.print(&feed_heading(catalog::ALL_SUBJECTS_ID));
    Ok(())
}

fn list_subjects() {
    let mut table = Table::new();
    table.add_row(Row::new(vec![Cell::new("ID"), Cell::new("Subject")]));
    for subject in catalog::subjects() {
        table.add_row(Row::new(vec![Cell::new(subject.id), Cell::new(subject.name)]));
    }
    table.printstd();
}

fn feed_heading(subject_id: &str) -> String {
    catalog::find_by_id(subject_id)
        .map(|s| s.name.to_string())
        .unwrap_or_else(|| subject_id.to_string())
}

/// Expands the short id shown in the table to a full id when unambiguous.
fn resolve_note_id(notes: &[Note], id: &str) -> String {
    let mut matches = notes.iter().filter(|n| n.id.starts_with(id));
    match (matches.next(), matches.next()) {
        (Some(only), None) => only.id.clone(),
        _ => id.to_string(),
    }
}
