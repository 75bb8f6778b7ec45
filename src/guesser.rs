// Statistical quote-system inference: samples verses known to contain
// speech and tallies marker hits for every distinguishable catalog system.
// Resource-bounded: a wall-clock budget is checked per verse, and on expiry
// the best-scoring candidate so far is returned as uncertain.

use anyhow::Result;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::character_verse::CharacterLookup;
use crate::quote_system::{self, DashEnd, DialogueDash, QuoteSystem};
use crate::script::{BlockElement, BookScript};

/// Below this many sampled verses no winner can be called certain.
const MIN_SAMPLE_SIZE: u32 = 15;

/// A certain winner must hit at least this fraction of its maximum
/// attainable score (a start hit plus an in-verse end hit per sample).
const MIN_HIT_RATIO: f64 = 0.6;

/// A runner-up within this score fraction of the winner makes the result
/// uncertain; true ties always fall here.
const CLOSENESS_MARGIN: f64 = 0.1;

/// Total verse samples aimed for across the whole corpus; the per-book cap
/// scales inversely with corpus size.
const TARGET_TOTAL_SAMPLES: usize = 600;
const MIN_VERSES_PER_BOOK: usize = 10;
const MAX_VERSES_PER_BOOK: usize = 60;

/// How many verses past the sampled one to search for an end marker.
const VERSE_LOOKAHEAD: u32 = 6;

/// Fraction of sampled verses that must open with a dash before a dialogue
/// dash convention is inferred.
const DASH_RATIO: f64 = 0.25;

const DASH_MARKERS: &[&str] = &["—", "–"];

const DEFAULT_TIME_BUDGET: Duration = Duration::from_millis(4800);

#[derive(Debug, Clone)]
struct Tallies {
    starts: Vec<u32>,
    ends: Vec<u32>,
    dash_starts: Vec<u32>,
    samples: u32,
}

impl Tallies {
    fn zeroed(candidates: usize) -> Self {
        Tallies {
            starts: vec![0; candidates],
            ends: vec![0; candidates],
            dash_starts: vec![0; DASH_MARKERS.len()],
            samples: 0,
        }
    }

    fn merge(mut self, other: Tallies) -> Tallies {
        for (a, b) in self.starts.iter_mut().zip(&other.starts) {
            *a += b;
        }
        for (a, b) in self.ends.iter_mut().zip(&other.ends) {
            *a += b;
        }
        for (a, b) in self.dash_starts.iter_mut().zip(&other.dash_starts) {
            *a += b;
        }
        self.samples += other.samples;
        self
    }
}

/// Infers the most likely QuoteSystem for a corpus, with a certainty flag.
pub struct QuoteSystemGuesser<'a> {
    lookup: &'a dyn CharacterLookup,
    time_budget: Duration,
}

impl<'a> QuoteSystemGuesser<'a> {
    pub fn new(lookup: &'a dyn CharacterLookup) -> Self {
        QuoteSystemGuesser { lookup, time_budget: DEFAULT_TIME_BUDGET }
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = budget;
        self
    }

    /// Sample the corpus and return the best-matching catalog system plus
    /// whether the evidence is strong enough to skip human confirmation.
    /// Timeout is not an error: it degrades to an uncertain best effort.
    pub fn guess(&self, books: &[BookScript]) -> Result<(QuoteSystem, bool)> {
        // Dash variants share their paired marks with a dash-less sibling, so
        // mark tallies cannot separate them. Score the dash-less systems only
        // and fold dash evidence in afterwards.
        let candidates: Vec<&QuoteSystem> = quote_system::all_unique_first_level_systems()?
            .into_iter()
            .filter(|s| s.dash.is_none())
            .collect();
        let fallback = QuoteSystem::default_system()?;
        if books.is_empty() {
            return Ok((fallback.clone(), false));
        }

        let per_book_cap = (TARGET_TOTAL_SAMPLES / books.len())
            .clamp(MIN_VERSES_PER_BOOK, MAX_VERSES_PER_BOOK);
        let deadline = Instant::now() + self.time_budget;
        let timed_out = AtomicBool::new(false);

        // Per-worker tallies merged afterwards; no shared counters in the
        // sampling loop.
        let tallies = books
            .par_iter()
            .map(|book| self.tally_book(book, &candidates, per_book_cap, deadline, &timed_out))
            .reduce(|| Tallies::zeroed(candidates.len()), Tallies::merge);

        let timed_out = timed_out.load(Ordering::Relaxed);
        if tallies.samples == 0 {
            info!("No sampled verses contained usable speech; keeping the default quote system");
            return Ok((fallback.clone(), false));
        }

        let scores: Vec<u32> = tallies
            .starts
            .iter()
            .zip(&tallies.ends)
            .map(|(s, e)| 2 * s + e)
            .collect();
        let Some(best_index) = (0..scores.len()).max_by_key(|&i| scores[i]) else {
            return Ok((fallback.clone(), false));
        };
        let best_score = scores[best_index];
        if best_score == 0 {
            return Ok((fallback.clone(), false));
        }
        let runner_up = scores
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != best_index)
            .map(|(_, &s)| s)
            .max()
            .unwrap_or(0);

        let max_score = 4.0 * f64::from(tallies.samples);
        let hit_ratio = f64::from(best_score) / max_score;
        let gap = f64::from(best_score - runner_up) / max_score;
        let certain = !timed_out
            && tallies.samples >= MIN_SAMPLE_SIZE
            && hit_ratio >= MIN_HIT_RATIO
            && gap > CLOSENESS_MARGIN;

        let winner = candidates[best_index];
        debug!(
            system = %winner.name,
            samples = tallies.samples,
            best_score,
            runner_up,
            timed_out,
            "Quote system tally complete"
        );

        let system = self.apply_dash_evidence(winner, &tallies)?;
        info!(samples = tallies.samples, certain, "Quote system inference finished");
        Ok((system, certain))
    }

    fn tally_book(
        &self,
        book: &BookScript,
        candidates: &[&QuoteSystem],
        per_book_cap: usize,
        deadline: Instant,
        timed_out: &AtomicBool,
    ) -> Tallies {
        let mut tallies = Tallies::zeroed(candidates.len());
        if timed_out.load(Ordering::Relaxed) {
            return tallies;
        }
        let verses = self.lookup.speech_verses(book.book_id());
        if verses.is_empty() {
            return tallies;
        }
        let verse_texts = collect_verse_texts(book);
        let step = (verses.len() / per_book_cap).max(1);

        for &(chapter, verse) in verses.iter().step_by(step).take(per_book_cap) {
            // The budget check is the only cancellation point; per-verse
            // granularity bounds worst-case latency.
            if Instant::now() >= deadline {
                timed_out.store(true, Ordering::Relaxed);
                break;
            }
            let Some(text) = verse_texts.get(&(chapter, verse)) else {
                continue;
            };
            let mut lookahead = String::new();
            for v in verse + 1..=verse + VERSE_LOOKAHEAD {
                if let Some(t) = verse_texts.get(&(chapter, v)) {
                    lookahead.push_str(t);
                }
            }
            tallies.samples += 1;
            for (i, candidate) in candidates.iter().enumerate() {
                let (start_hit, end_weight) = tally_verse(candidate, text, &lookahead);
                if start_hit {
                    tallies.starts[i] += 1;
                }
                tallies.ends[i] += end_weight;
            }
            for (i, marker) in DASH_MARKERS.iter().enumerate() {
                if text.trim_start().starts_with(marker) {
                    tallies.dash_starts[i] += 1;
                }
            }
        }
        tallies
    }

    /// If enough sampled verses open with a dash, fold a dialogue-dash
    /// convention into the winning system via the catalog.
    fn apply_dash_evidence(&self, winner: &QuoteSystem, tallies: &Tallies) -> Result<QuoteSystem> {
        let Some(first_level) = winner.first_level() else {
            return Ok(winner.clone());
        };
        if winner.dash.is_some() || tallies.samples == 0 {
            return Ok(winner.clone());
        }
        let Some(best_dash) = (0..DASH_MARKERS.len()).max_by_key(|&i| tallies.dash_starts[i]) else {
            return Ok(winner.clone());
        };
        let ratio = f64::from(tallies.dash_starts[best_dash]) / f64::from(tallies.samples);
        if ratio < DASH_RATIO {
            return Ok(winner.clone());
        }
        debug!(marker = DASH_MARKERS[best_dash], ratio, "Inferred dialogue-dash convention");
        quote_system::get_or_create(
            first_level.clone(),
            Some(DialogueDash {
                marker: DASH_MARKERS[best_dash].to_string(),
                end: DashEnd::ParagraphOnly,
                change_of_speaker_allowed: false,
            }),
        )
    }
}

/// First-level start/end marker evidence for one sampled verse. A close
/// inside the verse is stronger evidence than one in the lookahead, where
/// look-alike systems (reversed or right-pointing siblings) also match.
fn tally_verse(candidate: &QuoteSystem, text: &str, lookahead: &str) -> (bool, u32) {
    let Some(level) = candidate.first_level() else {
        return (false, 0);
    };
    let Some(open_at) = text.find(level.open.as_str()) else {
        return (false, 0);
    };
    let after_open = &text[open_at + level.open.len()..];
    let end_weight = if after_open.contains(level.close.as_str()) {
        2
    } else if lookahead.contains(level.close.as_str()) {
        1
    } else {
        0
    };
    (true, end_weight)
}

/// Per-verse text of a book, keyed by (chapter, verse). Bridged verse
/// markers index their text under every verse they cover.
fn collect_verse_texts(book: &BookScript) -> HashMap<(u32, u32), String> {
    let mut texts: HashMap<(u32, u32), String> = HashMap::new();
    for block in book.blocks() {
        let mut verse = (block.initial_start_verse, block.initial_end_verse);
        for element in &block.elements {
            match element {
                BlockElement::Verse { start, end } => verse = (*start, *end),
                BlockElement::ScriptText { content } => {
                    for v in verse.0..=verse.1.max(verse.0) {
                        texts.entry((block.chapter, v)).or_default().push_str(content);
                    }
                }
            }
        }
    }
    texts
}
