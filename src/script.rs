// Block / BookScript data model: one unified representation of a book's
// character-attributed script blocks.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Sentinel string for "no candidate speaker found" - the external contract
/// for blocks that need human review.
pub const UNKNOWN_CHARACTER: &str = "Unknown";

/// Sentinel string for "multiple candidate speakers, no way to choose".
pub const AMBIGUOUS_CHARACTER: &str = "Ambiguous";

/// Resolved speaker of a block. Standard (non-human) categories are closed
/// variants rather than string-prefix conventions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum CharacterId {
    Narrator,
    BookOrChapter,
    ExtraBiblical,
    Intro,
    Speaking(String),
    Unknown,
    Ambiguous,
}

impl CharacterId {
    /// Standard non-narrative categories assigned by import (titles, intro
    /// material, section heads, chapter announcements).
    pub fn is_standard(&self) -> bool {
        matches!(
            self,
            CharacterId::BookOrChapter | CharacterId::ExtraBiblical | CharacterId::Intro
        )
    }

    /// Blocks carrying these ids are the "needs human review" output state.
    pub fn needs_review(&self) -> bool {
        matches!(self, CharacterId::Unknown | CharacterId::Ambiguous)
    }

    pub fn as_str(&self) -> &str {
        match self {
            CharacterId::Narrator => "narrator",
            CharacterId::BookOrChapter => "book or chapter",
            CharacterId::ExtraBiblical => "extra-biblical",
            CharacterId::Intro => "intro",
            CharacterId::Speaking(id) => id,
            CharacterId::Unknown => UNKNOWN_CHARACTER,
            CharacterId::Ambiguous => AMBIGUOUS_CHARACTER,
        }
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One element of a block: a verse-number marker (possibly a bridge) or a
/// run of script text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BlockElement {
    Verse { start: u32, end: u32 },
    ScriptText { content: String },
}

impl BlockElement {
    pub fn verse(number: u32) -> Self {
        BlockElement::Verse { start: number, end: number }
    }

    pub fn bridge(start: u32, end: u32) -> Self {
        BlockElement::Verse { start, end }
    }

    pub fn text(content: impl Into<String>) -> Self {
        BlockElement::ScriptText { content: content.into() }
    }

    pub fn is_verse(&self) -> bool {
        matches!(self, BlockElement::Verse { .. })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            BlockElement::ScriptText { content } => Some(content),
            BlockElement::Verse { .. } => None,
        }
    }
}

/// Whether a block participates in a quotation spanning more than one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MultiBlockQuote {
    #[default]
    None,
    Start,
    Continuation,
}

/// One paragraph-styled run attributed to exactly one speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub style_tag: String,
    pub chapter: u32,
    pub initial_start_verse: u32,
    pub initial_end_verse: u32,
    pub elements: Vec<BlockElement>,
    pub character: CharacterId,
    pub delivery: Option<String>,
    pub multi_block_quote: MultiBlockQuote,
    pub user_confirmed: bool,
    pub paragraph_start: bool,
}

impl Block {
    pub fn new(style_tag: impl Into<String>, chapter: u32, start_verse: u32) -> Self {
        Block {
            style_tag: style_tag.into(),
            chapter,
            initial_start_verse: start_verse,
            initial_end_verse: start_verse,
            elements: Vec::new(),
            character: CharacterId::Unknown,
            delivery: None,
            multi_block_quote: MultiBlockQuote::None,
            user_confirmed: false,
            paragraph_start: true,
        }
    }

    /// Concatenated script text, ignoring verse markers.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for element in &self.elements {
            if let Some(t) = element.as_text() {
                out.push_str(t);
            }
        }
        out
    }

    /// Highest verse number reached within this block.
    pub fn last_verse(&self) -> u32 {
        let mut last = self.initial_end_verse;
        for element in &self.elements {
            if let BlockElement::Verse { end, .. } = element {
                last = last.max(*end);
            }
        }
        last
    }

    pub fn ends_with_verse(&self) -> bool {
        matches!(self.elements.last(), Some(BlockElement::Verse { .. }))
    }

    pub fn has_visible_text(&self) -> bool {
        self.elements
            .iter()
            .filter_map(BlockElement::as_text)
            .any(|t| !t.trim().is_empty())
    }
}

/// Mapping of a standard paragraph style tag to the standard character
/// category that owns it, for blocks the importer left untagged.
pub fn standard_style_category(style_tag: &str) -> Option<CharacterId> {
    match style_tag {
        "c" | "cl" | "cp" => Some(CharacterId::BookOrChapter),
        t if t.starts_with("mt") => Some(CharacterId::BookOrChapter),
        t if t.starts_with('i') => Some(CharacterId::Intro),
        "s" | "s1" | "s2" | "ms" | "ms1" | "mr" | "r" | "d" | "sp" | "qa" => {
            Some(CharacterId::ExtraBiblical)
        }
        _ => None,
    }
}

/// Intermediate form for deserialization; the chapter index is derived, not
/// stored.
#[derive(Deserialize)]
struct BookScriptData {
    book_id: String,
    blocks: Vec<Block>,
}

/// Ordered block sequence for one canonical book.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "BookScriptData")]
pub struct BookScript {
    book_id: String,
    blocks: Vec<Block>,
    #[serde(skip_serializing)]
    chapter_index: HashMap<u32, usize>,
}

impl From<BookScriptData> for BookScript {
    fn from(data: BookScriptData) -> Self {
        BookScript::new(data.book_id, data.blocks)
    }
}

impl BookScript {
    pub fn new(book_id: impl Into<String>, blocks: Vec<Block>) -> Self {
        let chapter_index = build_chapter_index(&blocks);
        BookScript { book_id: book_id.into(), blocks, chapter_index }
    }

    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Replace the full block list, e.g. after a re-parse. Blocks are fully
    /// replaced each time; there is no incremental update.
    pub fn replace_blocks(&mut self, blocks: Vec<Block>) {
        self.chapter_index = build_chapter_index(&blocks);
        self.blocks = blocks;
    }

    /// Contiguous slice of blocks belonging to one chapter.
    pub fn blocks_for_chapter(&self, chapter: u32) -> Result<&[Block]> {
        if self.blocks.is_empty() {
            bail!("book {} has no blocks", self.book_id);
        }
        let Some(&first) = self.chapter_index.get(&chapter) else {
            bail!("book {} has no chapter {}", self.book_id, chapter);
        };
        let end = self.blocks[first..]
            .iter()
            .position(|b| b.chapter != chapter)
            .map(|offset| first + offset)
            .unwrap_or(self.blocks.len());
        Ok(&self.blocks[first..end])
    }

    /// Split the block at `block_index` in two before `element_index`
    /// (`char_offset == 0`) or at a byte offset inside a ScriptText element.
    /// Returns the index of the newly created second half.
    ///
    /// Splits that would leave the first half ending in a verse marker, or
    /// that would produce an empty half, are rejected.
    pub fn split_block(
        &mut self,
        block_index: usize,
        element_index: usize,
        char_offset: usize,
    ) -> Result<usize> {
        if block_index >= self.blocks.len() {
            bail!(
                "block index {} out of range for book {} ({} blocks)",
                block_index,
                self.book_id,
                self.blocks.len()
            );
        }
        let block = &self.blocks[block_index];
        if element_index >= block.elements.len() {
            bail!("element index {} out of range ({} elements)", element_index, block.elements.len());
        }

        let mut first_elements: Vec<BlockElement> = block.elements[..element_index].to_vec();
        let mut second_elements: Vec<BlockElement> = Vec::new();

        if char_offset == 0 {
            if element_index == 0 {
                bail!("split point at the very start of the block would produce an empty half");
            }
            if matches!(first_elements.last(), Some(BlockElement::Verse { .. })) {
                bail!("split would strand a verse marker at the end of the first half");
            }
            second_elements.extend_from_slice(&block.elements[element_index..]);
        } else {
            let BlockElement::ScriptText { content } = &block.elements[element_index] else {
                bail!("cannot split inside a verse marker");
            };
            if char_offset >= content.len() || !content.is_char_boundary(char_offset) {
                bail!("split offset {} is not a valid position in a {}-byte text run", char_offset, content.len());
            }
            first_elements.push(BlockElement::text(&content[..char_offset]));
            second_elements.push(BlockElement::text(&content[char_offset..]));
            second_elements.extend_from_slice(&block.elements[element_index + 1..]);
        }

        // Verse in effect at the split point.
        let mut split_verse = (block.initial_start_verse, block.initial_end_verse);
        for element in &first_elements {
            if let BlockElement::Verse { start, end } = element {
                split_verse = (*start, *end);
            }
        }

        let (first_status, second_status) = match block.multi_block_quote {
            MultiBlockQuote::None => (MultiBlockQuote::None, MultiBlockQuote::None),
            MultiBlockQuote::Start => (MultiBlockQuote::Start, MultiBlockQuote::Continuation),
            MultiBlockQuote::Continuation => {
                (MultiBlockQuote::Continuation, MultiBlockQuote::Continuation)
            }
        };

        let second = Block {
            style_tag: block.style_tag.clone(),
            chapter: block.chapter,
            initial_start_verse: split_verse.0,
            initial_end_verse: split_verse.1,
            elements: second_elements,
            character: block.character.clone(),
            delivery: block.delivery.clone(),
            multi_block_quote: second_status,
            user_confirmed: false,
            paragraph_start: false,
        };

        let first = &mut self.blocks[block_index];
        first.elements = first_elements;
        first.multi_block_quote = first_status;
        self.blocks.insert(block_index + 1, second);
        self.chapter_index = build_chapter_index(&self.blocks);
        Ok(block_index + 1)
    }
}

fn build_chapter_index(blocks: &[Block]) -> HashMap<u32, usize> {
    let mut index = HashMap::new();
    for (i, block) in blocks.iter().enumerate() {
        index.entry(block.chapter).or_insert(i);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block(chapter: u32, verse: u32, text: &str) -> Block {
        let mut b = Block::new("p", chapter, verse);
        b.elements.push(BlockElement::verse(verse));
        b.elements.push(BlockElement::text(text));
        b
    }

    #[test]
    fn test_block_text_ignores_verse_markers() {
        let mut b = sample_block(1, 1, "In the beginning ");
        b.elements.push(BlockElement::verse(2));
        b.elements.push(BlockElement::text("the earth was formless."));
        assert_eq!(b.text(), "In the beginning the earth was formless.");
        assert_eq!(b.last_verse(), 2);
    }

    #[test]
    fn test_blocks_for_chapter() {
        let blocks = vec![
            sample_block(1, 1, "a"),
            sample_block(1, 2, "b"),
            sample_block(2, 1, "c"),
        ];
        let book = BookScript::new("MRK", blocks);
        assert_eq!(book.blocks_for_chapter(1).unwrap().len(), 2);
        assert_eq!(book.blocks_for_chapter(2).unwrap().len(), 1);
        assert!(book.blocks_for_chapter(3).is_err());
    }

    #[test]
    fn test_empty_book_query_is_error() {
        let book = BookScript::new("MRK", Vec::new());
        assert!(book.blocks_for_chapter(1).is_err());
    }

    #[test]
    fn test_split_block_inside_text() {
        let mut book = BookScript::new("MRK", vec![sample_block(1, 1, "He went out. He came back.")]);
        let split = "He went out. ".len();
        let new_index = book.split_block(0, 1, split).unwrap();
        assert_eq!(new_index, 1);
        assert_eq!(book.blocks()[0].text(), "He went out. ");
        assert_eq!(book.blocks()[1].text(), "He came back.");
        assert!(!book.blocks()[1].paragraph_start);
    }

    #[test]
    fn test_split_block_propagates_quote_status() {
        let mut first = sample_block(1, 1, "«He began to speak ");
        first.multi_block_quote = MultiBlockQuote::Start;
        let mut book = BookScript::new("MRK", vec![first]);
        book.split_block(0, 1, 4).unwrap();
        assert_eq!(book.blocks()[0].multi_block_quote, MultiBlockQuote::Start);
        assert_eq!(book.blocks()[1].multi_block_quote, MultiBlockQuote::Continuation);
    }

    #[test]
    fn test_split_block_rejects_stranded_verse() {
        let mut b = Block::new("p", 1, 1);
        b.elements.push(BlockElement::text("text "));
        b.elements.push(BlockElement::verse(2));
        b.elements.push(BlockElement::text("more"));
        let mut book = BookScript::new("MRK", vec![b]);
        // Splitting before element 2 leaves the first half ending in a verse.
        assert!(book.split_block(0, 2, 0).is_err());
        // Out-of-range positions are rejected outright.
        assert!(book.split_block(5, 0, 0).is_err());
        assert!(book.split_block(0, 9, 0).is_err());
    }

    #[test]
    fn test_standard_style_categories() {
        assert_eq!(standard_style_category("mt1"), Some(CharacterId::BookOrChapter));
        assert_eq!(standard_style_category("c"), Some(CharacterId::BookOrChapter));
        assert_eq!(standard_style_category("ip"), Some(CharacterId::Intro));
        assert_eq!(standard_style_category("s1"), Some(CharacterId::ExtraBiblical));
        assert_eq!(standard_style_category("p"), None);
        assert_eq!(standard_style_category("q1"), None);
    }

    #[test]
    fn test_character_sentinel_strings() {
        assert_eq!(CharacterId::Unknown.to_string(), UNKNOWN_CHARACTER);
        assert_eq!(CharacterId::Ambiguous.to_string(), AMBIGUOUS_CHARACTER);
        assert_eq!(CharacterId::Speaking("Jesus".into()).to_string(), "Jesus");
        assert!(CharacterId::Intro.is_standard());
        assert!(!CharacterId::Narrator.is_standard());
    }
}
