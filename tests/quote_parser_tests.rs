// Quote parser scenario tests: splitting, attribution, multi-block quotes,
// dialogue dashes, and the verse-marker invariants.

use versecast::character_verse::{CharacterLookup, CharacterVerse};
use versecast::quote_parser::QuoteParser;
use versecast::quote_system::{DashEnd, DialogueDash, QuotationMark, QuoteSystem};
use versecast::script::{Block, BlockElement, CharacterId, MultiBlockQuote};

/// Deterministic character-verse source, substituted for the control data.
struct FakeLookup {
    records: Vec<CharacterVerse>,
}

impl FakeLookup {
    fn empty() -> Self {
        FakeLookup { records: Vec::new() }
    }

    fn with(records: Vec<CharacterVerse>) -> Self {
        FakeLookup { records }
    }
}

impl CharacterLookup for FakeLookup {
    fn characters_for(&self, book: &str, chapter: u32, verse_start: u32, verse_end: u32) -> Vec<&CharacterVerse> {
        self.records
            .iter()
            .filter(|r| {
                r.book == book
                    && r.chapter == chapter
                    && r.verse_start <= verse_end
                    && verse_start <= r.verse_end
            })
            .collect()
    }

    fn speech_verses(&self, book: &str) -> Vec<(u32, u32)> {
        let mut verses: Vec<(u32, u32)> = self
            .records
            .iter()
            .filter(|r| r.book == book)
            .map(|r| (r.chapter, r.verse_start))
            .collect();
        verses.sort_unstable();
        verses.dedup();
        verses
    }
}

fn record(chapter: u32, verse: u32, character: &str, delivery: Option<&str>) -> CharacterVerse {
    CharacterVerse {
        book: "MRK".to_string(),
        chapter,
        verse_start: verse,
        verse_end: verse,
        character: character.to_string(),
        delivery: delivery.map(str::to_string),
        alias: None,
        is_dialogue: false,
        user_created: false,
    }
}

fn guillemets() -> QuoteSystem {
    QuoteSystem::new(
        "Guillemets",
        vec![
            QuotationMark::new("«", "»", "«"),
            QuotationMark::new("‹", "›", "‹"),
        ],
        None,
    )
}

fn dash_system(end: DashEnd) -> QuoteSystem {
    QuoteSystem::new(
        "dash",
        vec![QuotationMark::new("«", "»", "«")],
        Some(DialogueDash {
            marker: "—".to_string(),
            end,
            change_of_speaker_allowed: false,
        }),
    )
}

fn para(style: &str, chapter: u32, verse: u32, text: &str) -> Block {
    let mut b = Block::new(style, chapter, verse);
    b.elements.push(BlockElement::verse(verse));
    b.elements.push(BlockElement::text(text));
    b
}

fn texts(blocks: &[Block]) -> Vec<String> {
    blocks.iter().map(Block::text).collect()
}

#[test]
fn test_narration_and_quote_split_with_attribution() {
    let system = guillemets();
    let lookup = FakeLookup::with(vec![record(7, 6, "Jesus", Some("rebuking"))]);
    let parser = QuoteParser::new(&system, &lookup);

    let input = para("p", 7, 6, "He replied, «Isaiah was right when he prophesied about you.»");
    let out = parser.parse("MRK", &[input]).unwrap();

    assert_eq!(
        texts(&out),
        vec![
            "He replied, ".to_string(),
            "«Isaiah was right when he prophesied about you.»".to_string(),
        ]
    );
    assert_eq!(out[0].character, CharacterId::Narrator);
    assert_eq!(out[1].character, CharacterId::Speaking("Jesus".to_string()));
    assert_eq!(out[1].delivery.as_deref(), Some("rebuking"));
    assert!(out.iter().all(|b| b.multi_block_quote == MultiBlockQuote::None));
}

#[test]
fn test_adjacent_quotes_make_three_blocks() {
    let system = guillemets();
    let lookup = FakeLookup::empty();
    let parser = QuoteParser::new(&system, &lookup);

    let input = para("p", 1, 1, "He said, «Go!»  «Make me!»");
    let out = parser.parse("MRK", &[input]).unwrap();

    assert_eq!(out.len(), 3);
    assert_eq!(out[0].character, CharacterId::Narrator);
    assert_eq!(out[1].character, CharacterId::Unknown);
    assert_eq!(out[2].character, CharacterId::Unknown);
    assert!(out.iter().all(|b| b.multi_block_quote == MultiBlockQuote::None));
    // Concatenated output text reproduces the input exactly.
    assert_eq!(texts(&out).concat(), "He said, «Go!»  «Make me!»");
}

#[test]
fn test_text_preservation_across_nested_levels() {
    let system = guillemets();
    let lookup = FakeLookup::empty();
    let parser = QuoteParser::new(&system, &lookup);

    let text = "Then he said, «She told me, ‹Leave now› and I left.» So it was.";
    let out = parser.parse("MRK", &[para("p", 2, 4, text)]).unwrap();

    assert_eq!(texts(&out).concat(), text);
    // Nesting closed back to level 0: the tail is narration again.
    assert_eq!(out.last().unwrap().character, CharacterId::Narrator);
    // The inner quote stays inside the level-1 block.
    assert_eq!(out[1].text(), "«She told me, ‹Leave now› and I left.»");
}

#[test]
fn test_ambiguous_and_unknown_attribution() {
    let system = guillemets();
    let lookup = FakeLookup::with(vec![
        record(15, 29, "chief priests", Some("mocking")),
        record(15, 29, "passers-by", Some("mocking")),
    ]);
    let parser = QuoteParser::new(&system, &lookup);

    let ambiguous = parser
        .parse("MRK", &[para("p", 15, 29, "They said, «Save yourself!»")])
        .unwrap();
    assert_eq!(ambiguous[1].character, CharacterId::Ambiguous);
    assert_eq!(ambiguous[1].delivery, None);

    let unknown = parser
        .parse("MRK", &[para("p", 3, 1, "Someone said, «Who is this?»")])
        .unwrap();
    assert_eq!(unknown[1].character, CharacterId::Unknown);
}

#[test]
fn test_multi_block_quote_start_and_continuation() {
    let system = guillemets();
    let lookup = FakeLookup::with(vec![record(4, 3, "Jesus", None), record(4, 4, "Jesus", None)]);
    let parser = QuoteParser::new(&system, &lookup);

    let first = para("p", 4, 3, "He taught them, saying: «Listen! A farmer went out to sow.");
    let second = para("p", 4, 4, "«As he was scattering the seed, some fell along the path.»");
    let out = parser.parse("MRK", &[first, second]).unwrap();

    assert_eq!(out.len(), 3);
    assert_eq!(out[0].character, CharacterId::Narrator);
    assert_eq!(out[0].multi_block_quote, MultiBlockQuote::None);
    assert_eq!(out[1].multi_block_quote, MultiBlockQuote::Start);
    assert_eq!(out[2].multi_block_quote, MultiBlockQuote::Continuation);
    assert_eq!(out[1].character, CharacterId::Speaking("Jesus".to_string()));
    assert_eq!(out[2].character, CharacterId::Speaking("Jesus".to_string()));
    // The block-start continuer was absorbed, not treated as a new level.
    assert!(out[2].text().starts_with("«As"));
}

#[test]
fn test_interruption_force_closes_multi_block_quote() {
    let system = guillemets();
    let lookup = FakeLookup::empty();
    let parser = QuoteParser::new(&system, &lookup);

    let open = para("p", 4, 3, "«Listen! A farmer went out to sow.");
    let mut head = Block::new("s1", 4, 3);
    head.elements.push(BlockElement::text("The Parable of the Sower"));
    let after = para("p", 4, 10, "The disciples asked him about the parables.");
    let out = parser.parse("MRK", &[open, head, after]).unwrap();

    assert_eq!(out.len(), 3);
    // The never-continued Start degenerates to None.
    assert_eq!(out[0].multi_block_quote, MultiBlockQuote::None);
    assert_eq!(out[1].character, CharacterId::ExtraBiblical);
    assert_eq!(out[2].character, CharacterId::Narrator);
}

#[test]
fn test_reparse_never_touches_user_confirmed_blocks() {
    let system = guillemets();
    let lookup = FakeLookup::with(vec![record(7, 6, "Jesus", None)]);
    let parser = QuoteParser::new(&system, &lookup);

    let mut confirmed = para("p", 7, 6, "«Isaiah was right.»");
    confirmed.user_confirmed = true;
    confirmed.character = CharacterId::Speaking("Pharisees".to_string());
    confirmed.delivery = Some("indignant".to_string());

    let input = vec![para("p", 7, 5, "They asked him a question."), confirmed.clone()];
    let once = parser.parse("MRK", &input).unwrap();
    let twice = parser.parse("MRK", &once).unwrap();

    let surviving: Vec<&Block> = twice.iter().filter(|b| b.user_confirmed).collect();
    assert_eq!(surviving.len(), 1);
    assert_eq!(surviving[0].character, confirmed.character);
    assert_eq!(surviving[0].delivery, confirmed.delivery);
    assert_eq!(surviving[0].text(), confirmed.text());
}

#[test]
fn test_dash_quote_any_punctuation_closes_in_block() {
    let system = dash_system(DashEnd::AnyPunctuation);
    let lookup = FakeLookup::with(vec![record(2, 10, "Jesus", None)]);
    let parser = QuoteParser::new(&system, &lookup);

    let first = para("p", 2, 10, "—Hello there.");
    let second = para("p", 2, 11, "He walked away.");
    let out = parser.parse("MRK", &[first, second]).unwrap();

    // The punctuation ended the quote; nothing carries into the "p" block.
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].text(), "—Hello there.");
    assert_eq!(out[0].character, CharacterId::Speaking("Jesus".to_string()));
    assert_eq!(out[0].multi_block_quote, MultiBlockQuote::None);
    assert_eq!(out[1].character, CharacterId::Narrator);
}

#[test]
fn test_dash_quote_force_closes_before_non_follow_on_paragraph() {
    let system = dash_system(DashEnd::ParagraphOnly);
    let lookup = FakeLookup::empty();
    let parser = QuoteParser::new(&system, &lookup);

    let first = para("p", 2, 10, "—Hello there");
    let second = para("p", 2, 11, "He walked away.");
    let out = parser.parse("MRK", &[first, second]).unwrap();

    assert_eq!(out.len(), 2);
    // "p" is not a follow-on style, so the open quote force-closed.
    assert_eq!(out[0].multi_block_quote, MultiBlockQuote::None);
    assert_eq!(out[1].character, CharacterId::Narrator);
    assert_eq!(out[1].multi_block_quote, MultiBlockQuote::None);
}

#[test]
fn test_dash_quote_survives_into_follow_on_style() {
    let system = dash_system(DashEnd::ParagraphOnly);
    let lookup = FakeLookup::empty();
    let parser = QuoteParser::new(&system, &lookup);

    // No sentence-final punctuation, normal style, follow-on next: survives.
    let first = para("p", 2, 10, "—Hello there, my friend");
    let second = para("m", 2, 10, "and do not be afraid.");
    let out = parser.parse("MRK", &[first, second]).unwrap();

    assert_eq!(out.len(), 2);
    assert_eq!(out[0].multi_block_quote, MultiBlockQuote::Start);
    assert_eq!(out[1].multi_block_quote, MultiBlockQuote::Continuation);
    assert_eq!(out[1].character, out[0].character);
}

#[test]
fn test_dash_quote_with_sentence_end_does_not_survive() {
    let system = dash_system(DashEnd::ParagraphOnly);
    let lookup = FakeLookup::empty();
    let parser = QuoteParser::new(&system, &lookup);

    let first = para("p", 2, 10, "—Hello there.");
    let second = para("m", 2, 10, "He walked away.");
    let out = parser.parse("MRK", &[first, second]).unwrap();

    assert_eq!(out[0].multi_block_quote, MultiBlockQuote::None);
    assert_eq!(out[1].character, CharacterId::Narrator);
}

#[test]
fn test_change_of_speaker_dash_starts_a_new_quote() {
    let system = QuoteSystem::new(
        "dash",
        vec![QuotationMark::new("«", "»", "«")],
        Some(DialogueDash {
            marker: "—".to_string(),
            end: DashEnd::ParagraphOnly,
            change_of_speaker_allowed: true,
        }),
    );
    let lookup = FakeLookup::empty();
    let parser = QuoteParser::new(&system, &lookup);

    let input = para("p", 2, 10, "—Come and see. —Where, Master?");
    let out = parser.parse("MRK", &[input]).unwrap();

    // The second dash closes the first speaker's quote and opens another.
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].text(), "—Come and see. ");
    assert_eq!(out[1].text(), "—Where, Master?");
    assert_eq!(out[0].character, CharacterId::Unknown);
    assert_eq!(out[1].character, CharacterId::Unknown);
    assert!(out.iter().all(|b| b.multi_block_quote == MultiBlockQuote::None));
}

#[test]
fn test_dash_quote_closed_by_explicit_end_marker() {
    let system = QuoteSystem::new(
        "dash-terminated",
        vec![QuotationMark::new("„", "“", "„")],
        Some(DialogueDash {
            marker: "–".to_string(),
            end: DashEnd::Marker("–".to_string()),
            change_of_speaker_allowed: false,
        }),
    );
    let lookup = FakeLookup::with(vec![record(4, 9, "Jesus", None)]);
    let parser = QuoteParser::new(&system, &lookup);

    let input = para("p", 4, 9, "–Follow me – and they followed him.");
    let out = parser.parse("MRK", &[input]).unwrap();

    assert_eq!(out.len(), 2);
    assert_eq!(out[0].text(), "–Follow me –");
    assert_eq!(out[0].character, CharacterId::Speaking("Jesus".to_string()));
    assert_eq!(out[1].text(), " and they followed him.");
    assert_eq!(out[1].character, CharacterId::Narrator);
    assert!(out.iter().all(|b| b.multi_block_quote == MultiBlockQuote::None));
}

#[test]
fn test_leading_colon_stays_with_narration() {
    let system = dash_system(DashEnd::ParagraphOnly);
    let lookup = FakeLookup::empty();
    let parser = QuoteParser::new(&system, &lookup);

    let input = para("p", 3, 2, "And he answered: —Come and see");
    let out = parser.parse("MRK", &[input]).unwrap();

    assert_eq!(out[0].text(), "And he answered: ");
    assert_eq!(out[0].character, CharacterId::Narrator);
    assert!(out[1].text().starts_with("—Come"));
}

#[test]
fn test_trailing_verse_marker_moves_to_next_block() {
    let system = guillemets();
    let lookup = FakeLookup::empty();
    let parser = QuoteParser::new(&system, &lookup);

    let mut first = Block::new("p", 1, 1);
    first.elements.push(BlockElement::verse(1));
    first.elements.push(BlockElement::text("The beginning of the good news, "));
    first.elements.push(BlockElement::verse(2));
    let mut second = Block::new("p", 1, 2);
    second.elements.push(BlockElement::text("as it is written in Isaiah the prophet."));
    let out = parser.parse("MRK", &[first, second]).unwrap();

    // No block ends with a verse marker while a following block exists.
    for (i, block) in out.iter().enumerate() {
        if i + 1 < out.len() {
            assert!(!block.ends_with_verse(), "block {i} ends with a verse marker");
        }
    }
    // The deferred verse marker landed at the start of the next block.
    assert_eq!(out[1].elements[0], BlockElement::verse(2));
    assert_eq!(out[1].initial_start_verse, 2);
}

#[test]
fn test_deferred_verse_stays_before_pass_through_block() {
    let system = guillemets();
    let lookup = FakeLookup::empty();
    let parser = QuoteParser::new(&system, &lookup);

    let mut first = Block::new("p", 1, 4);
    first.elements.push(BlockElement::verse(4));
    first.elements.push(BlockElement::text("Narration for verse four. "));
    first.elements.push(BlockElement::verse(5));
    let mut confirmed = Block::new("p", 1, 5);
    confirmed.user_confirmed = true;
    confirmed.character = CharacterId::Speaking("Jesus".to_string());
    confirmed.elements.push(BlockElement::text("«Confirmed verse five speech.»"));
    let mut third = Block::new("p", 1, 6);
    third.elements.push(BlockElement::verse(6));
    third.elements.push(BlockElement::text("Narration for verse six."));
    let out = parser.parse("MRK", &[first, confirmed, third]).unwrap();

    assert_eq!(out.len(), 3);
    // The verse-5 marker leads the confirmed block instead of leaking past
    // it into the verse-6 block.
    assert_eq!(out[1].elements[0], BlockElement::verse(5));
    assert!(out[1].user_confirmed);
    assert_eq!(
        out[2].elements,
        vec![BlockElement::verse(6), BlockElement::text("Narration for verse six.")]
    );
    assert_eq!(out[2].initial_start_verse, 6);
}

#[test]
fn test_deferred_verse_stays_before_section_head() {
    let system = guillemets();
    let lookup = FakeLookup::empty();
    let parser = QuoteParser::new(&system, &lookup);

    let mut first = Block::new("p", 4, 1);
    first.elements.push(BlockElement::text("He began to teach by the lake. "));
    first.elements.push(BlockElement::verse(2));
    let mut head = Block::new("s1", 4, 2);
    head.elements.push(BlockElement::text("The Parable of the Sower"));
    let mut third = Block::new("p", 4, 2);
    third.elements.push(BlockElement::text("He taught them many things by parables."));
    let out = parser.parse("MRK", &[first, head, third]).unwrap();

    assert_eq!(out.len(), 3);
    assert_eq!(out[1].elements[0], BlockElement::verse(2));
    assert_eq!(out[1].character, CharacterId::ExtraBiblical);
}

#[test]
fn test_final_block_keeps_its_trailing_verse_marker() {
    let system = guillemets();
    let lookup = FakeLookup::empty();
    let parser = QuoteParser::new(&system, &lookup);

    let mut only = Block::new("p", 1, 1);
    only.elements.push(BlockElement::verse(1));
    only.elements.push(BlockElement::text("The beginning of the good news, "));
    only.elements.push(BlockElement::verse(2));
    let out = parser.parse("MRK", &[only]).unwrap();

    assert_eq!(out.len(), 1);
    // No following block exists, so the marker is not dropped.
    assert_eq!(out[0].elements.last(), Some(&BlockElement::verse(2)));
}

#[test]
fn test_verse_marker_only_book_is_not_lost() {
    let system = guillemets();
    let lookup = FakeLookup::empty();
    let parser = QuoteParser::new(&system, &lookup);

    let mut only = Block::new("p", 3, 1);
    only.elements.push(BlockElement::verse(2));
    let out = parser.parse("MRK", &[only]).unwrap();

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].elements, vec![BlockElement::verse(2)]);
    assert_eq!(out[0].character, CharacterId::Narrator);
}

#[test]
fn test_verse_only_block_is_dropped_and_flag_transfers() {
    let system = guillemets();
    let lookup = FakeLookup::empty();
    let parser = QuoteParser::new(&system, &lookup);

    let mut verse_only = Block::new("p", 1, 5);
    verse_only.elements.push(BlockElement::verse(6));
    let mut second = Block::new("q1", 1, 6);
    second.paragraph_start = false;
    second.elements.push(BlockElement::text("a voice of one calling in the wilderness"));
    let out = parser.parse("MRK", &[verse_only, second]).unwrap();

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].elements[0], BlockElement::verse(6));
    // The dropped block's paragraph-start flag transferred forward.
    assert!(out[0].paragraph_start);
}

#[test]
fn test_quote_level_returns_to_zero_for_balanced_books() {
    let system = guillemets();
    let lookup = FakeLookup::empty();
    let parser = QuoteParser::new(&system, &lookup);

    let blocks = vec![
        para("p", 1, 1, "He said, «First ‹inner› quote.» Then more."),
        para("p", 1, 2, "Another «balanced» paragraph."),
    ];
    let out = parser.parse("MRK", &blocks).unwrap();

    // Every quote closed within the book, so the final block is narration
    // and nothing is marked as continuing.
    assert_eq!(out.last().unwrap().character, CharacterId::Narrator);
    assert!(out.iter().all(|b| b.multi_block_quote != MultiBlockQuote::Start
        || out.iter().any(|c| c.multi_block_quote == MultiBlockQuote::Continuation)));
}

#[test]
fn test_straight_quote_system_round_trip() {
    let system = QuoteSystem::new(
        "straight",
        vec![QuotationMark::new("\"", "\"", "\"")],
        None,
    );
    let lookup = FakeLookup::with(vec![record(5, 41, "Jesus", None)]);
    let parser = QuoteParser::new(&system, &lookup);

    let text = "Taking her by the hand he said, \"Talitha koum!\" which means \"Little girl, get up!\"";
    let out = parser.parse("MRK", &[para("p", 5, 41, text)]).unwrap();

    assert_eq!(texts(&out).concat(), text);
    assert_eq!(out[1].character, CharacterId::Speaking("Jesus".to_string()));
}
