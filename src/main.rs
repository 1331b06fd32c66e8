//! CLI entry point for folio-rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use folio_rs::admin::{NewContent, ReorderItem};
use folio_rs::content::{validate, ContentKind};
use folio_rs::helpers::full_date;
use folio_rs::Site;

#[derive(Parser)]
#[command(name = "folio-rs")]
#[command(version)]
#[command(about = "A file-backed markdown content server", long_about = None)]
struct Cli {
    /// Set the base directory (defaults to current directory)
    #[arg(short, long, global = true)]
    cwd: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the site with a live index
    #[command(alias = "s")]
    Serve {
        /// Port to listen on (defaults to server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// IP address to bind to (defaults to server.ip)
        #[arg(short, long)]
        ip: Option<String>,

        /// Disable file watching and live reload
        #[arg(long)]
        r#static: bool,
    },

    /// List indexed content
    List {
        /// Kind of content to list (blog, page); lists both when omitted
        kind: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Create a new blog post or page
    New {
        /// Title of the new entry
        title: String,

        /// Kind of entry (blog or page)
        #[arg(short, long, default_value = "blog")]
        kind: String,

        /// Markdown body
        #[arg(short, long, conflicts_with = "file")]
        body: Option<String>,

        /// Read the markdown body from a file ("-" for stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Listing order
        #[arg(short, long, default_value_t = 0)]
        order: i64,

        /// Create the entry unpublished
        #[arg(long)]
        draft: bool,
    },

    /// Replace an entry's full text (front matter and body)
    Edit {
        slug: String,

        /// File holding the new text ("-" for stdin)
        file: PathBuf,
    },

    /// Delete an entry
    Delete { slug: String },

    /// Set listing order, e.g. `reorder about=1 contact=2`
    Reorder {
        #[arg(required = true, value_name = "SLUG=ORDER")]
        items: Vec<String>,
    },

    /// Check a content file without writing anything
    Validate {
        /// File to check ("-" for stdin)
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        "folio_rs=debug,info"
    } else {
        "folio_rs=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine base directory
    let base_dir = match cli.cwd {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let site = Site::new(&base_dir)?;

    match cli.command {
        Commands::Serve { port, ip, r#static } => {
            let port = port.unwrap_or(site.config.server.port);
            let ip = ip.unwrap_or_else(|| site.config.server.ip.clone());
            tracing::info!("Starting server at http://{}:{}", ip, port);
            folio_rs::server::start(&site, &ip, port, !r#static).await?;
        }

        Commands::List { kind, json } => {
            let index = site.open_index();
            let records = match kind {
                Some(kind) => index.entries(parse_kind(&kind)?),
                None => index.all(),
            };

            if json {
                let records: Vec<_> = records.iter().map(|r| r.as_ref()).collect();
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                println!("{:<6} {:>5}  {:<18} {:<30} Title", "Kind", "Order", "Date", "Slug");
                for record in &records {
                    let draft = if record.published { "" } else { " (draft)" };
                    println!(
                        "{:<6} {:>5}  {:<18} {:<30} {}{}",
                        record.kind,
                        record.order,
                        full_date(&record.date),
                        record.slug,
                        record.title,
                        draft
                    );
                }
                println!("\n{} entries", records.len());
            }
        }

        Commands::New {
            title,
            kind,
            body,
            file,
            order,
            draft,
        } => {
            let kind = parse_kind(&kind)?;
            let body = match (body, file) {
                (Some(body), _) => body,
                (None, Some(file)) => read_input(&file)?,
                (None, None) => String::new(),
            };

            let admin = site.admin(site.open_index());
            let record = admin.create(NewContent {
                title,
                kind,
                body,
                order,
                published: !draft,
                date: None,
            })?;
            println!("Created {}: {}", record.slug, record.source_path.display());
        }

        Commands::Edit { slug, file } => {
            let text = read_input(&file)?;
            let admin = site.admin(site.open_index());
            let record = admin.edit(&slug, &text)?;
            println!("Updated {}: {}", record.slug, record.source_path.display());
        }

        Commands::Delete { slug } => {
            let admin = site.admin(site.open_index());
            admin.delete(&slug)?;
            println!("Deleted {}", slug);
        }

        Commands::Reorder { items } => {
            let items = items
                .iter()
                .map(|item| parse_reorder_item(item))
                .collect::<Result<Vec<_>>>()?;

            let admin = site.admin(site.open_index());
            let report = admin.reorder(&items);
            for outcome in &report.results {
                match &outcome.error {
                    None => println!("✅ {}", outcome.slug),
                    Some(e) => println!("❌ {}: {}", outcome.slug, e),
                }
            }
            if !report.all_ok() {
                bail!("{} of {} items failed", report.failed(), report.results.len());
            }
        }

        Commands::Validate { file } => {
            let text = read_input(&file)?;
            let report = validate(&text, &site.renderer());
            if report.valid {
                println!("✅ Valid");
            } else {
                for error in &report.errors {
                    println!("❌ {}", error);
                }
                bail!("{} validation errors", report.errors.len());
            }
        }
    }

    Ok(())
}

fn parse_kind(s: &str) -> Result<ContentKind> {
    s.parse::<ContentKind>().map_err(anyhow::Error::msg)
}

fn parse_reorder_item(s: &str) -> Result<ReorderItem> {
    let (slug, order) = s
        .rsplit_once('=')
        .with_context(|| format!("Expected SLUG=ORDER, got {:?}", s))?;
    let order = order
        .trim()
        .parse()
        .with_context(|| format!("Invalid order in {:?}", s))?;
    Ok(ReorderItem {
        slug: slug.trim().to_string(),
        order,
    })
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
    }
}
