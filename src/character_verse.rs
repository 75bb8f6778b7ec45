// Per-verse character/delivery lookup: an immutable control dataset plus a
// mutable, persisted project-specific override dataset, both in the
// tab-delimited character-verse format.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use tracing::debug;

/// Required first metadata line of the control dataset.
const CONTROL_FILE_HEADING: &str = "Control File";

/// One character-verse record: at this reference, this character could
/// plausibly be speaking. Multiple records may share a reference; that
/// ambiguity is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacterVerse {
    pub book: String,
    pub chapter: u32,
    pub verse_start: u32,
    pub verse_end: u32,
    pub character: String,
    pub delivery: Option<String>,
    pub alias: Option<String>,
    pub is_dialogue: bool,
    pub user_created: bool,
}

impl CharacterVerse {
    /// Inclusive range overlap against a queried verse span.
    fn covers(&self, chapter: u32, verse_start: u32, verse_end: u32) -> bool {
        self.chapter == chapter && self.verse_start <= verse_end && verse_start <= self.verse_end
    }

    fn to_line(&self) -> String {
        let verse = if self.verse_start == self.verse_end {
            self.verse_start.to_string()
        } else {
            format!("{}-{}", self.verse_start, self.verse_end)
        };
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.book,
            self.chapter,
            verse,
            self.character,
            self.delivery.as_deref().unwrap_or(""),
            self.alias.as_deref().unwrap_or(""),
            if self.is_dialogue { "True" } else { "" },
            if self.user_created { "True" } else { "" },
        )
    }
}

fn parse_verse_ref(field: &str) -> Result<(u32, u32)> {
    if let Some((start, end)) = field.split_once('-') {
        let start: u32 = start.trim().parse().with_context(|| format!("bad verse bridge start {field:?}"))?;
        let end: u32 = end.trim().parse().with_context(|| format!("bad verse bridge end {field:?}"))?;
        if end < start {
            bail!("verse bridge {field:?} runs backwards");
        }
        Ok((start, end))
    } else {
        let verse: u32 = field.trim().parse().with_context(|| format!("bad verse number {field:?}"))?;
        Ok((verse, verse))
    }
}

fn parse_record(line: &str) -> Result<CharacterVerse> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 4 {
        bail!("expected at least 4 tab-delimited fields, got {}", fields.len());
    }
    let chapter: u32 = fields[1]
        .trim()
        .parse()
        .with_context(|| format!("bad chapter number {:?}", fields[1]))?;
    let (verse_start, verse_end) = parse_verse_ref(fields[2])?;
    let optional = |i: usize| -> Option<String> {
        fields
            .get(i)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let flag = |i: usize| -> bool {
        fields
            .get(i)
            .map(|s| s.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    };
    Ok(CharacterVerse {
        book: fields[0].trim().to_string(),
        chapter,
        verse_start,
        verse_end,
        character: fields[3].trim().to_string(),
        delivery: optional(4),
        alias: optional(5),
        is_dialogue: flag(6),
        user_created: flag(7),
    })
}

fn parse_records(text: &str, skip_lines: usize) -> Result<HashMap<String, Vec<CharacterVerse>>> {
    let mut by_book: HashMap<String, Vec<CharacterVerse>> = HashMap::new();
    for (line_number, line) in text.lines().enumerate().skip(skip_lines) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record = parse_record(line)
            .with_context(|| format!("malformed character-verse record on line {}", line_number + 1))?;
        by_book.entry(record.book.clone()).or_default().push(record);
    }
    Ok(by_book)
}

fn query<'a>(
    by_book: &'a HashMap<String, Vec<CharacterVerse>>,
    book: &str,
    chapter: u32,
    verse_start: u32,
    verse_end: u32,
) -> impl Iterator<Item = &'a CharacterVerse> + 'a {
    let chapter = chapter;
    by_book
        .get(book)
        .into_iter()
        .flatten()
        .filter(move |r| r.covers(chapter, verse_start, verse_end))
}

/// Read-only source of character-verse records. Injected into the parser and
/// guesser so tests can substitute deterministic data.
pub trait CharacterLookup: Sync {
    /// All records whose verse range overlaps the queried span. An empty
    /// result is valid.
    fn characters_for(
        &self,
        book: &str,
        chapter: u32,
        verse_start: u32,
        verse_end: u32,
    ) -> Vec<&CharacterVerse>;

    /// References known to contain speech in the given book, as sorted
    /// (chapter, verse) pairs. Used by the quote-system guesser to pick
    /// sample verses.
    fn speech_verses(&self, book: &str) -> Vec<(u32, u32)>;
}

fn speech_verses_of(by_book: &HashMap<String, Vec<CharacterVerse>>, book: &str) -> Vec<(u32, u32)> {
    let mut verses: Vec<(u32, u32)> = by_book
        .get(book)
        .into_iter()
        .flatten()
        .map(|r| (r.chapter, r.verse_start))
        .collect();
    verses.sort_unstable();
    verses.dedup();
    verses
}

/// The immutable control dataset shipped with the application.
#[derive(Debug, Clone)]
pub struct ControlCharacterVerseData {
    version: u32,
    by_book: HashMap<String, Vec<CharacterVerse>>,
}

impl ControlCharacterVerseData {
    /// Parse the control dataset. The first line must be the metadata line
    /// `Control File\t<version>`; anything else is a fatal load error.
    pub fn parse(text: &str) -> Result<Self> {
        let first = text.lines().next().context("control character-verse data is empty")?;
        let Some((heading, version)) = first.split_once('\t') else {
            bail!("control character-verse data is missing its metadata line");
        };
        if heading.trim() != CONTROL_FILE_HEADING {
            bail!("control character-verse data has unrecognized heading {heading:?}");
        }
        let version: u32 = version
            .trim()
            .parse()
            .with_context(|| format!("bad control file version {version:?}"))?;
        let by_book = parse_records(text, 1)?;
        let total: usize = by_book.values().map(Vec::len).sum();
        debug!(version, records = total, "Loaded control character-verse data");
        Ok(ControlCharacterVerseData { version, by_book })
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl CharacterLookup for ControlCharacterVerseData {
    fn characters_for(
        &self,
        book: &str,
        chapter: u32,
        verse_start: u32,
        verse_end: u32,
    ) -> Vec<&CharacterVerse> {
        query(&self.by_book, book, chapter, verse_start, verse_end).collect()
    }

    fn speech_verses(&self, book: &str) -> Vec<(u32, u32)> {
        speech_verses_of(&self.by_book, book)
    }
}

/// Mutable project-specific overrides, persisted alongside the project and
/// rewritten wholesale on save.
#[derive(Debug, Clone, Default)]
pub struct ProjectCharacterVerseData {
    by_book: HashMap<String, Vec<CharacterVerse>>,
}

impl ProjectCharacterVerseData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a project override file. Same record format as the control
    /// dataset, but with no metadata line.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(ProjectCharacterVerseData { by_book: parse_records(text, 0)? })
    }

    pub fn add(&mut self, record: CharacterVerse) {
        let records = self.by_book.entry(record.book.clone()).or_default();
        if !records.contains(&record) {
            records.push(record);
        }
    }

    /// Remove an exactly matching record. Returns whether anything changed.
    pub fn remove(&mut self, record: &CharacterVerse) -> bool {
        if let Some(records) = self.by_book.get_mut(&record.book) {
            let before = records.len();
            records.retain(|r| r != record);
            return records.len() != before;
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.by_book.values().all(Vec::is_empty)
    }

    /// Full file content for save; the caller rewrites the file wholesale.
    pub fn serialize(&self) -> String {
        let mut books: Vec<&String> = self.by_book.keys().collect();
        books.sort();
        let mut out = String::new();
        for book in books {
            for record in &self.by_book[book] {
                out.push_str(&record.to_line());
                out.push('\n');
            }
        }
        out
    }
}

impl CharacterLookup for ProjectCharacterVerseData {
    fn characters_for(
        &self,
        book: &str,
        chapter: u32,
        verse_start: u32,
        verse_end: u32,
    ) -> Vec<&CharacterVerse> {
        query(&self.by_book, book, chapter, verse_start, verse_end).collect()
    }

    fn speech_verses(&self, book: &str) -> Vec<(u32, u32)> {
        speech_verses_of(&self.by_book, book)
    }
}

/// Union of the control dataset and the project overrides. This is the
/// lookup the parser and guesser normally run against.
#[derive(Debug, Clone)]
pub struct CharacterVerseInfo {
    control: ControlCharacterVerseData,
    project: ProjectCharacterVerseData,
}

impl CharacterVerseInfo {
    pub fn new(control: ControlCharacterVerseData, project: ProjectCharacterVerseData) -> Self {
        CharacterVerseInfo { control, project }
    }

    pub fn control(&self) -> &ControlCharacterVerseData {
        &self.control
    }

    pub fn project(&self) -> &ProjectCharacterVerseData {
        &self.project
    }

    pub fn project_mut(&mut self) -> &mut ProjectCharacterVerseData {
        &mut self.project
    }
}

impl CharacterLookup for CharacterVerseInfo {
    fn characters_for(
        &self,
        book: &str,
        chapter: u32,
        verse_start: u32,
        verse_end: u32,
    ) -> Vec<&CharacterVerse> {
        let mut records = self.control.characters_for(book, chapter, verse_start, verse_end);
        for record in self.project.characters_for(book, chapter, verse_start, verse_end) {
            if !records.contains(&record) {
                records.push(record);
            }
        }
        records
    }

    fn speech_verses(&self, book: &str) -> Vec<(u32, u32)> {
        let mut verses = self.control.speech_verses(book);
        verses.extend(self.project.speech_verses(book));
        verses.sort_unstable();
        verses.dedup();
        verses
    }
}
