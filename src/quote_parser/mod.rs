// Quote-parsing state machine: consumes one book's block list plus a
// QuoteSystem and a character-verse lookup, emits a new block list split and
// attributed by speaker. Strictly sequential within a book (quote-level
// state carries block to block); independent across books.

use anyhow::{bail, Result};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::character_verse::CharacterLookup;
use crate::quote_system::{DashEnd, QuoteSystem};
use crate::script::{
    standard_style_category, Block, BlockElement, BookScript, CharacterId, MultiBlockQuote,
};

pub mod tokenizer;

use tokenizer::{is_sentence_final, MarkerRole, MarkerSet, Token};

/// Plain prose paragraph styles; only these can carry an open dash quote
/// toward a follow-on paragraph.
fn is_normal_style(style_tag: &str) -> bool {
    style_tag == "p"
}

/// Continuation-indent styles an open dash quote may survive into.
const FOLLOW_ON_STYLES: &[&str] = &[
    "m", "mi", "pi", "pi1", "pi2", "pi3", "q", "q1", "q2", "q3", "qm", "qm1", "qm2",
];

fn is_follow_on_style(style_tag: &str) -> bool {
    FOLLOW_ON_STYLES.contains(&style_tag)
}

/// State carried across the blocks of one book.
#[derive(Debug, Default)]
struct ParserState {
    /// Current quotation nesting depth (dash quotes count as level 1).
    quote_level: usize,
    in_dash: bool,
    /// Input block index where the open dash quote began.
    dash_origin: Option<usize>,
    /// Whether the accumulated dash-quote text currently ends in
    /// sentence-final punctuation; governs cross-paragraph survival.
    dash_ends_sentence: bool,
    /// An open quote is continuing into the next block.
    quote_continues: bool,
    /// Verse markers deferred from the end of the previous flushed block.
    deferred: Vec<BlockElement>,
    /// A dropped (emptied) block's paragraph-start flag, carried forward.
    transfer_paragraph_start: bool,
}

impl ParserState {
    fn open_quote(&self) -> bool {
        self.quote_level > 0
    }

    /// An interruption (confirmed or standard block) ends any open
    /// multi-block quote. A Start with no continuation degenerates to None.
    fn force_close(&mut self, out: &mut [Block]) {
        if self.quote_continues {
            if let Some(last) = out.last_mut() {
                if last.multi_block_quote == MultiBlockQuote::Start {
                    last.multi_block_quote = MultiBlockQuote::None;
                }
            }
        }
        self.quote_level = 0;
        self.in_dash = false;
        self.dash_origin = None;
        self.dash_ends_sentence = false;
        self.quote_continues = false;
    }
}

/// Accumulates the elements of one output block under construction.
#[derive(Debug)]
struct Accum {
    elements: Vec<BlockElement>,
    text: String,
    is_quote: bool,
    /// The accumulated quote was already open when this block began.
    continues_prev: bool,
    start_verse: (u32, u32),
    end_verse: u32,
    paragraph_start: bool,
}

impl Accum {
    fn new(start_verse: (u32, u32), is_quote: bool, continues_prev: bool, paragraph_start: bool) -> Self {
        Accum {
            elements: Vec::new(),
            text: String::new(),
            is_quote,
            continues_prev,
            start_verse,
            end_verse: start_verse.1,
            paragraph_start,
        }
    }

    fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.text.is_empty()
    }

    fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn push_verse(&mut self, start: u32, end: u32) {
        if self.is_empty() {
            self.start_verse = (start, end);
        }
        self.commit_text();
        self.elements.push(BlockElement::Verse { start, end });
        self.end_verse = self.end_verse.max(end);
    }

    fn commit_text(&mut self) {
        if !self.text.is_empty() {
            self.elements.push(BlockElement::ScriptText {
                content: std::mem::take(&mut self.text),
            });
        }
    }

    fn has_visible_text(&self) -> bool {
        !self.text.trim().is_empty()
            || self
                .elements
                .iter()
                .filter_map(BlockElement::as_text)
                .any(|t| !t.trim().is_empty())
    }
}

struct BlockCtx<'b> {
    book_id: &'b str,
    input: &'b Block,
    index: usize,
    cur_verse: (u32, u32),
    /// Output blocks emitted for this input block so far.
    emitted: usize,
}

struct EmitOutcome {
    deferred: Vec<BlockElement>,
    emitted: bool,
    paragraph_start: bool,
}

/// The quote-parsing state machine for one QuoteSystem + character lookup.
pub struct QuoteParser<'a> {
    system: &'a QuoteSystem,
    lookup: &'a dyn CharacterLookup,
    markers: MarkerSet,
}

impl<'a> QuoteParser<'a> {
    pub fn new(system: &'a QuoteSystem, lookup: &'a dyn CharacterLookup) -> Self {
        QuoteParser { system, lookup, markers: MarkerSet::new(system) }
    }

    /// Parse one book's blocks into a new, speaker-attributed block list.
    /// Deterministic for a given QuoteSystem; unresolved attribution
    /// surfaces as Unknown/Ambiguous rather than being guessed.
    pub fn parse(&self, book_id: &str, blocks: &[Block]) -> Result<Vec<Block>> {
        if blocks.is_empty() {
            bail!("book {book_id} has no blocks to parse");
        }
        debug!(book = book_id, blocks = blocks.len(), "Parsing book");
        let mut out: Vec<Block> = Vec::with_capacity(blocks.len());
        let mut state = ParserState::default();

        for (index, block) in blocks.iter().enumerate() {
            let next_style = blocks.get(index + 1).map(|b| b.style_tag.as_str());

            // Confirmed blocks and standard non-narrative blocks pass
            // through; the interruption ends any open quote. Deferred verse
            // markers lead the pass-through block so they keep document
            // order instead of leaking past it.
            if block.user_confirmed || block.character.is_standard() {
                state.force_close(&mut out);
                let mut passthrough = block.clone();
                prepend_deferred(&mut state, &mut passthrough);
                out.push(passthrough);
                continue;
            }
            if let Some(category) = standard_style_category(&block.style_tag) {
                state.force_close(&mut out);
                let mut passthrough = block.clone();
                prepend_deferred(&mut state, &mut passthrough);
                if passthrough.character == CharacterId::Unknown {
                    passthrough.character = category;
                }
                out.push(passthrough);
                continue;
            }

            self.parse_block(book_id, index, block, next_style, &mut state, &mut out);
        }

        // A verse marker deferred off the book's last block has no following
        // block to land on; it stays at the end of the final output block.
        if !state.deferred.is_empty() {
            if let Some(last) = out.last_mut() {
                last.elements.append(&mut state.deferred);
            } else if let Some(source) = blocks.last() {
                let mut block =
                    Block::new(source.style_tag.clone(), source.chapter, source.initial_start_verse);
                block.character = CharacterId::Narrator;
                block.elements = std::mem::take(&mut state.deferred);
                out.push(block);
            }
        }

        info!(book = book_id, blocks_in = blocks.len(), blocks_out = out.len(), "Parsed book");
        Ok(out)
    }

    fn parse_block(
        &self,
        book_id: &str,
        index: usize,
        input: &Block,
        next_style: Option<&str>,
        state: &mut ParserState,
        out: &mut Vec<Block>,
    ) {
        let paragraph_start = input.paragraph_start || state.transfer_paragraph_start;
        state.transfer_paragraph_start = false;

        let mut ctx = BlockCtx {
            book_id,
            input,
            index,
            cur_verse: (input.initial_start_verse, input.initial_end_verse),
            emitted: 0,
        };

        let open = state.open_quote();
        let mut accum = Accum::new(ctx.cur_verse, open, open, paragraph_start);

        // Verse markers deferred from the previous block start this one.
        for element in std::mem::take(&mut state.deferred) {
            if let BlockElement::Verse { start, end } = element {
                ctx.cur_verse = (start, end);
                accum.push_verse(start, end);
            }
        }

        let mut at_block_start = true;
        for element in &input.elements {
            match element {
                BlockElement::Verse { start, end } => {
                    ctx.cur_verse = (*start, *end);
                    accum.push_verse(*start, *end);
                }
                BlockElement::ScriptText { content } => {
                    for token in self.markers.tokenize(content) {
                        self.handle_token(token, &mut ctx, &mut accum, &mut at_block_start, state, out);
                    }
                }
            }
        }

        self.finish_block(&mut ctx, next_style, accum, state, out);
    }

    fn handle_token(
        &self,
        token: Token<'_>,
        ctx: &mut BlockCtx<'_>,
        accum: &mut Accum,
        at_block_start: &mut bool,
        state: &mut ParserState,
        out: &mut Vec<Block>,
    ) {
        match token {
            Token::Marker { text, entry } => {
                let roles = self.markers.roles(entry);
                let was_block_start = *at_block_start;
                *at_block_start = false;

                // A block-start continuer of the current level is absorbed
                // with no state change.
                if was_block_start
                    && state.open_quote()
                    && !state.in_dash
                    && roles.contains(&MarkerRole::Continuer(state.quote_level))
                {
                    accum.push_text(text);
                    *at_block_start = true;
                    return;
                }

                // Close of the current level (never inside a dash quote).
                if state.open_quote()
                    && !state.in_dash
                    && roles.contains(&MarkerRole::Close(state.quote_level))
                {
                    accum.push_text(text);
                    state.quote_level -= 1;
                    if state.quote_level == 0 {
                        self.flush_closed_quote(ctx, accum, state, out);
                    }
                    return;
                }

                // Open of the next level (never inside a dash quote).
                if !state.in_dash && roles.contains(&MarkerRole::Open(state.quote_level + 1)) {
                    if state.quote_level == 0 {
                        self.flush_narration(ctx, accum, out);
                        accum.is_quote = true;
                    }
                    accum.push_text(text);
                    state.quote_level += 1;
                    return;
                }

                // A dash marker at level 0 opens a dialogue-dash quote. The
                // preceding narration is flushed first, so a leading colon
                // stays with the narration, not the quote.
                if state.quote_level == 0 && roles.contains(&MarkerRole::DashStart) {
                    self.flush_narration(ctx, accum, out);
                    accum.is_quote = true;
                    accum.push_text(text);
                    state.quote_level = 1;
                    state.in_dash = true;
                    state.dash_origin = Some(ctx.index);
                    state.dash_ends_sentence = false;
                    return;
                }

                if state.in_dash && state.quote_level == 1 {
                    // Explicit end-marker string closes the dash quote.
                    if roles.contains(&MarkerRole::DashEnd)
                        && matches!(self.dash_end(), Some(DashEnd::Marker(_)))
                    {
                        accum.push_text(text);
                        self.close_dash(ctx, accum, state, out);
                        return;
                    }
                    // A fresh dash signals a change of speaker: the current
                    // quote ends and a new one begins.
                    if roles.contains(&MarkerRole::DashStart) && self.dash_change_of_speaker() {
                        self.flush_closed_quote(ctx, accum, state, out);
                        accum.is_quote = true;
                        accum.push_text(text);
                        state.dash_origin = Some(ctx.index);
                        state.dash_ends_sentence = false;
                        return;
                    }
                }

                // Not meaningful in the current context: plain text.
                accum.push_text(text);
                self.track_dash_sentence(text, state);
            }
            Token::PunctRun(text) => {
                *at_block_start = false;
                accum.push_text(text);
                if state.in_dash
                    && state.quote_level == 1
                    && matches!(self.dash_end(), Some(DashEnd::AnyPunctuation))
                {
                    self.close_dash(ctx, accum, state, out);
                    return;
                }
                self.track_dash_sentence(text, state);
            }
            Token::Text(text) => {
                if !text.trim().is_empty() {
                    *at_block_start = false;
                }
                accum.push_text(text);
                self.track_dash_sentence(text, state);
            }
        }
    }

    /// End-of-paragraph handling: decide whether the open quote survives
    /// into the next block, then flush whatever is still accumulated.
    fn finish_block(
        &self,
        ctx: &mut BlockCtx<'_>,
        next_style: Option<&str>,
        mut accum: Accum,
        state: &mut ParserState,
        out: &mut Vec<Block>,
    ) {
        let mut quote_remains_open = false;
        if state.in_dash {
            let survives = is_normal_style(&ctx.input.style_tag)
                && !state.dash_ends_sentence
                && next_style.is_some_and(is_follow_on_style);
            if survives {
                quote_remains_open = true;
            } else {
                debug!(book = ctx.book_id, origin = ?state.dash_origin, "Force-closing dash quote at paragraph end");
                state.quote_level = 0;
                state.in_dash = false;
                state.dash_origin = None;
                state.dash_ends_sentence = false;
            }
        } else if state.open_quote() {
            quote_remains_open = true;
        }

        if accum.is_empty() {
            state.quote_continues = quote_remains_open;
            return;
        }

        let status = if accum.is_quote {
            if accum.continues_prev {
                MultiBlockQuote::Continuation
            } else if quote_remains_open {
                MultiBlockQuote::Start
            } else {
                MultiBlockQuote::None
            }
        } else {
            MultiBlockQuote::None
        };

        // Narration residue with no visible text folds into the previous
        // block of this paragraph instead of becoming its own block.
        if !accum.is_quote && !accum.has_visible_text() && ctx.emitted > 0 {
            accum.commit_text();
            for element in accum.elements {
                match element {
                    BlockElement::Verse { .. } => state.deferred.push(element),
                    BlockElement::ScriptText { content } => append_to_last_text(out, &content),
                }
            }
            state.quote_continues = quote_remains_open;
            return;
        }

        let outcome = self.emit(ctx, accum, status, out);
        state.deferred.extend(outcome.deferred);
        if !outcome.emitted {
            state.transfer_paragraph_start = outcome.paragraph_start;
        }
        state.quote_continues = quote_remains_open;
    }

    /// A quote just closed mid-block: emit it and start a narration accum.
    fn flush_closed_quote(
        &self,
        ctx: &mut BlockCtx<'_>,
        accum: &mut Accum,
        state: &mut ParserState,
        out: &mut Vec<Block>,
    ) {
        let finished = std::mem::replace(accum, Accum::new(ctx.cur_verse, false, false, false));
        let status = if finished.continues_prev {
            MultiBlockQuote::Continuation
        } else {
            MultiBlockQuote::None
        };
        let outcome = self.emit(ctx, finished, status, out);
        for element in outcome.deferred {
            if let BlockElement::Verse { start, end } = element {
                accum.push_verse(start, end);
            }
        }
        if !outcome.emitted && outcome.paragraph_start {
            accum.paragraph_start = true;
        }
        state.quote_continues = false;
    }

    fn close_dash(&self, ctx: &mut BlockCtx<'_>, accum: &mut Accum, state: &mut ParserState, out: &mut Vec<Block>) {
        self.flush_closed_quote(ctx, accum, state, out);
        state.quote_level = 0;
        state.in_dash = false;
        state.dash_origin = None;
        state.dash_ends_sentence = false;
    }

    /// A quote is opening: flush pending narration. Narration with no
    /// visible text stays in the accum and rides along with the quote.
    fn flush_narration(&self, ctx: &mut BlockCtx<'_>, accum: &mut Accum, out: &mut Vec<Block>) {
        if !accum.has_visible_text() {
            return;
        }
        let finished = std::mem::replace(accum, Accum::new(ctx.cur_verse, false, false, false));
        let outcome = self.emit(ctx, finished, MultiBlockQuote::None, out);
        for element in outcome.deferred {
            if let BlockElement::Verse { start, end } = element {
                accum.push_verse(start, end);
            }
        }
        if !outcome.emitted && outcome.paragraph_start {
            accum.paragraph_start = true;
        }
    }

    /// Build and append the finished block. Trailing verse markers are
    /// returned to the caller for deferral; an emptied block is dropped and
    /// reports its paragraph-start flag for transfer.
    fn emit(
        &self,
        ctx: &mut BlockCtx<'_>,
        mut finished: Accum,
        status: MultiBlockQuote,
        out: &mut Vec<Block>,
    ) -> EmitOutcome {
        finished.commit_text();
        let mut deferred: Vec<BlockElement> = Vec::new();
        while matches!(finished.elements.last(), Some(BlockElement::Verse { .. })) {
            if let Some(element) = finished.elements.pop() {
                deferred.push(element);
            }
        }
        deferred.reverse();

        if finished.elements.is_empty() {
            return EmitOutcome { deferred, emitted: false, paragraph_start: finished.paragraph_start };
        }

        let mut block = Block::new(ctx.input.style_tag.clone(), ctx.input.chapter, finished.start_verse.0);
        block.initial_end_verse = finished.start_verse.1;
        block.paragraph_start = finished.paragraph_start;
        block.elements = finished.elements;
        if finished.is_quote {
            let (character, delivery) =
                self.resolve(ctx.book_id, ctx.input.chapter, finished.start_verse.0, finished.end_verse);
            block.character = character;
            block.delivery = delivery;
        } else {
            block.character = CharacterId::Narrator;
        }
        block.multi_block_quote = status;
        out.push(block);
        ctx.emitted += 1;
        EmitOutcome { deferred, emitted: true, paragraph_start: false }
    }

    /// Character attribution for a flushed quote: one distinct candidate
    /// wins outright; none or several surface as Unknown/Ambiguous.
    fn resolve(&self, book: &str, chapter: u32, verse_start: u32, verse_end: u32) -> (CharacterId, Option<String>) {
        let records = self.lookup.characters_for(book, chapter, verse_start, verse_end);
        let Some(first) = records.first() else {
            return (CharacterId::Unknown, None);
        };
        if records.iter().all(|r| r.character == first.character) {
            if records.len() == 1 {
                (CharacterId::Speaking(first.character.clone()), first.delivery.clone())
            } else {
                // Same character under several records: delivery is unclear.
                (CharacterId::Speaking(first.character.clone()), None)
            }
        } else {
            (CharacterId::Ambiguous, None)
        }
    }

    fn track_dash_sentence(&self, appended: &str, state: &mut ParserState) {
        if !state.in_dash {
            return;
        }
        if let Some(c) = appended.chars().rev().find(|c| !c.is_whitespace()) {
            state.dash_ends_sentence = is_sentence_final(c);
        }
    }

    fn dash_end(&self) -> Option<&DashEnd> {
        self.system.dash.as_ref().map(|d| &d.end)
    }

    fn dash_change_of_speaker(&self) -> bool {
        self.system.dash.as_ref().is_some_and(|d| d.change_of_speaker_allowed)
    }
}

fn prepend_deferred(state: &mut ParserState, block: &mut Block) {
    if state.deferred.is_empty() {
        return;
    }
    let mut elements = std::mem::take(&mut state.deferred);
    elements.append(&mut block.elements);
    block.elements = elements;
}

fn append_to_last_text(out: &mut [Block], content: &str) {
    if let Some(block) = out.last_mut() {
        if let Some(BlockElement::ScriptText { content: last }) = block.elements.last_mut() {
            last.push_str(content);
            return;
        }
        block.elements.push(BlockElement::text(content));
    }
}

/// Parse every book in parallel against shared read-only configuration.
/// Each book's block list is fully replaced; within one book parsing stays
/// sequential. With `fail_fast` the first book error aborts the run;
/// otherwise failed books keep their original blocks and are returned.
pub fn parse_books(
    system: &QuoteSystem,
    lookup: &dyn CharacterLookup,
    books: &mut [BookScript],
    fail_fast: bool,
) -> Result<Vec<String>> {
    info!(books = books.len(), system = %system.name, "Parsing all books");
    if fail_fast {
        books.par_iter_mut().try_for_each(|book| {
            let parser = QuoteParser::new(system, lookup);
            let parsed = parser.parse(book.book_id(), book.blocks())?;
            book.replace_blocks(parsed);
            Ok::<(), anyhow::Error>(())
        })?;
        return Ok(Vec::new());
    }
    let failed: Vec<String> = books
        .par_iter_mut()
        .filter_map(|book| {
            let parser = QuoteParser::new(system, lookup);
            match parser.parse(book.book_id(), book.blocks()) {
                Ok(parsed) => {
                    book.replace_blocks(parsed);
                    None
                }
                Err(error) => {
                    warn!(book = book.book_id(), %error, "Failed to parse book");
                    Some(book.book_id().to_string())
                }
            }
        })
        .collect();
    Ok(failed)
}
