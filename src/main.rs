use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

use versecast::guesser::QuoteSystemGuesser;
use versecast::quote_parser;
use versecast::script::CharacterId;
use versecast::{
    BookScript, CharacterVerseInfo, ControlCharacterVerseData, ProjectCharacterVerseData,
    QuoteSystem,
};

#[derive(Parser, Debug)]
#[command(name = "versecast")]
#[command(about = "Splits chaptered scripture blocks into character-attributed script blocks")]
#[command(version)]
struct Args {
    /// Project directory containing a books/ subdirectory of *.json block
    /// lists plus the character-verse data files
    project_dir: PathBuf,

    /// Control character-verse file (defaults to <project>/control_characters.tsv)
    #[arg(long)]
    control_file: Option<PathBuf>,

    /// Infer the quote system from the corpus even if one is already saved
    #[arg(long)]
    guess: bool,

    /// Abort the whole run on the first book that fails to parse instead of
    /// skipping it
    #[arg(long)]
    fail_fast: bool,

    /// Stats output file path
    #[arg(long, default_value = "parse_stats.json")]
    stats_out: PathBuf,
}

/// Per-book parse statistics written alongside the run.
#[derive(Serialize, Debug)]
struct BookStats {
    book_id: String,
    blocks_in: usize,
    blocks_out: usize,
    unknown_blocks: usize,
    ambiguous_blocks: usize,
}

#[derive(Serialize, Debug)]
struct RunStats {
    quote_system: QuoteSystem,
    quote_system_certain: Option<bool>,
    elapsed_ms: u64,
    books: Vec<BookStats>,
    failed_books: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // WHY: structured JSON logging enables observability and debugging in production
    tracing_subscriber::fmt()
        .with_target(false)
        .json()
        .init();

    let args = Args::parse();
    info!(?args, "Starting versecast");

    // WHY: validate the project layout early to fail fast with clear errors
    if !args.project_dir.is_dir() {
        anyhow::bail!("Project path is not a directory: {}", args.project_dir.display());
    }
    let books_dir = args.project_dir.join("books");
    if !books_dir.is_dir() {
        anyhow::bail!("Project has no books/ directory: {}", books_dir.display());
    }

    let control_path = args
        .control_file
        .clone()
        .unwrap_or_else(|| args.project_dir.join("control_characters.tsv"));
    let control_text = tokio::fs::read_to_string(&control_path)
        .await
        .with_context(|| format!("Failed to read control file {}", control_path.display()))?;
    let control = ControlCharacterVerseData::parse(&control_text)
        .with_context(|| format!("Corrupt control file {}", control_path.display()))?;
    info!(version = control.version(), "Loaded control character-verse data");

    let overrides_path = args.project_dir.join("character_overrides.tsv");
    let project = match tokio::fs::read_to_string(&overrides_path).await {
        Ok(text) => ProjectCharacterVerseData::parse(&text)
            .with_context(|| format!("Corrupt project overrides {}", overrides_path.display()))?,
        Err(_) => ProjectCharacterVerseData::new(),
    };
    let lookup = CharacterVerseInfo::new(control, project);

    let mut books = load_books(&books_dir).await?;
    if books.is_empty() {
        anyhow::bail!("No book files found under {}", books_dir.display());
    }
    info!(books = books.len(), "Loaded project books");

    let system_path = args.project_dir.join("quote_system.json");
    let (system, certain) = if args.guess || !system_path.exists() {
        let guesser = QuoteSystemGuesser::new(&lookup);
        let (system, certain) = guesser.guess(&books)?;
        info!(system = %system.name, certain, "Guessed quote system");
        let serialized = serde_json::to_string_pretty(&system)?;
        tokio::fs::write(&system_path, serialized)
            .await
            .with_context(|| format!("Failed to write {}", system_path.display()))?;
        (system, Some(certain))
    } else {
        let text = tokio::fs::read_to_string(&system_path)
            .await
            .with_context(|| format!("Failed to read {}", system_path.display()))?;
        let system: QuoteSystem = serde_json::from_str(&text)
            .with_context(|| format!("Corrupt quote system file {}", system_path.display()))?;
        (system, None)
    };

    let blocks_in: Vec<usize> = books.iter().map(|b| b.blocks().len()).collect();
    let started = Instant::now();
    let failed_books = quote_parser::parse_books(&system, &lookup, &mut books, args.fail_fast)?;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    info!(elapsed_ms, failed = failed_books.len(), "Parsed all books");

    let mut stats = RunStats {
        quote_system: system,
        quote_system_certain: certain,
        elapsed_ms,
        books: Vec::with_capacity(books.len()),
        failed_books,
    };
    for (book, blocks_in) in books.iter().zip(blocks_in) {
        if stats.failed_books.iter().any(|id| id == book.book_id()) {
            continue;
        }
        let unknown = count_character(book, &CharacterId::Unknown);
        let ambiguous = count_character(book, &CharacterId::Ambiguous);
        stats.books.push(BookStats {
            book_id: book.book_id().to_string(),
            blocks_in,
            blocks_out: book.blocks().len(),
            unknown_blocks: unknown,
            ambiguous_blocks: ambiguous,
        });
        write_book(&books_dir, book).await?;
    }

    let stats_json = serde_json::to_string_pretty(&stats)?;
    tokio::fs::write(&args.stats_out, stats_json)
        .await
        .with_context(|| format!("Failed to write stats to {}", args.stats_out.display()))?;

    println!(
        "versecast v{} - parsed {} books in {} ms",
        env!("CARGO_PKG_VERSION"),
        stats.books.len(),
        elapsed_ms
    );
    for book in &stats.books {
        println!(
            "{}: {} -> {} blocks ({} unknown, {} ambiguous)",
            book.book_id, book.blocks_in, book.blocks_out, book.unknown_blocks, book.ambiguous_blocks
        );
    }
    if !stats.failed_books.is_empty() {
        println!("failed: {}", stats.failed_books.join(", "));
    }
    Ok(())
}

fn count_character(book: &BookScript, character: &CharacterId) -> usize {
    book.blocks().iter().filter(|b| b.character == *character).count()
}

async fn load_books(books_dir: &Path) -> Result<Vec<BookScript>> {
    let mut books = Vec::new();
    let mut entries = tokio::fs::read_dir(books_dir)
        .await
        .with_context(|| format!("Failed to list {}", books_dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let book: BookScript = serde_json::from_str(&text)
            .with_context(|| format!("Corrupt book file {}", path.display()))?;
        books.push(book);
    }
    books.sort_by(|a, b| a.book_id().cmp(b.book_id()));
    Ok(books)
}

async fn write_book(books_dir: &Path, book: &BookScript) -> Result<()> {
    let path = books_dir.join(format!("{}.json", book.book_id()));
    let serialized = serde_json::to_string_pretty(book)?;
    tokio::fs::write(&path, serialized)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
