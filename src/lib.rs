pub mod character_verse;
pub mod guesser;
pub mod quote_parser;
pub mod quote_system;
pub mod script;

// Re-export main types for convenient access
pub use character_verse::{
    CharacterLookup, CharacterVerse, CharacterVerseInfo, ControlCharacterVerseData,
    ProjectCharacterVerseData,
};
pub use guesser::QuoteSystemGuesser;
pub use quote_parser::{parse_books, QuoteParser};
pub use quote_system::{DashEnd, DialogueDash, QuotationMark, QuoteSystem};
pub use script::{
    Block, BlockElement, BookScript, CharacterId, MultiBlockQuote, AMBIGUOUS_CHARACTER,
    UNKNOWN_CHARACTER,
};
