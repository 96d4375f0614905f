use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rustc_hash::FxHashMap;
use std::fs;
use tracing::debug;

/// Anything that can invent a plausible word.
pub trait WordSource {
    fn generate_word(&mut self) -> String;
}

const START: char = '\u{2}';
const END: char = '\u{3}';

/// Seeded when `seed` is given, otherwise from OS entropy.
pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Order-k character chain trained on a word list.
pub struct MarkovWords {
    order: usize,
    max_len: usize,
    transitions: FxHashMap<Vec<char>, Vec<char>>,
    rng: StdRng,
}

impl MarkovWords {
    /// Trains on `words`; blank entries are skipped and the rest lowercased.
    pub fn train<'a>(
        words: impl IntoIterator<Item = &'a str>,
        order: usize,
        max_len: usize,
        rng: StdRng,
    ) -> Result<Self> {
        if order == 0 {
            bail!("Markov chain order must be at least 1");
        }

        let mut transitions: FxHashMap<Vec<char>, Vec<char>> = FxHashMap::default();
        let mut trained = 0usize;
        for word in words {
            let word = word.trim();
            if word.is_empty() {
                continue;
            }
            let chars: Vec<char> = std::iter::repeat(START)
                .take(order)
                .chain(word.chars().flat_map(char::to_lowercase))
                .chain(std::iter::once(END))
                .collect();
            for window in chars.windows(order + 1) {
                transitions
                    .entry(window[..order].to_vec())
                    .or_default()
                    .push(window[order]);
            }
            trained += 1;
        }

        if trained == 0 {
            bail!("Word list is empty");
        }
        debug!(order, words = trained, states = transitions.len(), "Markov chain trained");

        Ok(Self {
            order,
            max_len,
            transitions,
            rng,
        })
    }

    /// Trains on a dictionary file with one word per line.
    pub fn from_dictionary(path: &str, order: usize, max_len: usize, rng: StdRng) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read dictionary: {path}"))?;
        Self::train(text.lines(), order, max_len, rng)
            .with_context(|| format!("Failed to train on dictionary: {path}"))
    }

    pub fn order(&self) -> usize {
        self.order
    }
}

impl WordSource for MarkovWords {
    fn generate_word(&mut self) -> String {
        let mut state = vec![START; self.order];
        let mut word = String::new();
        let mut len = 0;

        while len < self.max_len {
            let next = match self.transitions.get(state.as_slice()) {
                Some(choices) => choices.choose(&mut self.rng).copied().unwrap_or(END),
                None => END,
            };
            if next == END {
                break;
            }
            word.push(next);
            len += 1;
            state.remove(0);
            state.push(next);
        }
        word
    }
}

/// Uppercases the first letter of every space-separated word.
pub fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
