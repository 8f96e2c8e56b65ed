// src/engine/console.rs

use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use super::deck::{Deck, DeckStatus};
use super::mixer::{crossfade, CrossfadeConfig, CrossfadeSession};
use crate::audio::SinkFactory;
use crate::bpm::BeatAnalyzer;
use crate::config::EngineConfig;
use crate::decoder::TrackLoader;
use crate::error::{DeckError, MixError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckId {
    A,
    B,
}

impl DeckId {
    pub fn other(self) -> Self {
        match self {
            DeckId::A => DeckId::B,
            DeckId::B => DeckId::A,
        }
    }
}

/// Two decks and the crossfade between them.
pub struct Console {
    a: Deck,
    b: Deck,
    mix: CrossfadeConfig,
    session: Option<CrossfadeSession>,
}

impl Console {
    pub fn new(a: Deck, b: Deck, mix: CrossfadeConfig) -> Self {
        Self {
            a,
            b,
            mix,
            session: None,
        }
    }

    /// Decks named "A" and "B", each with its own sink from the configured backend.
    pub fn from_config(config: &EngineConfig) -> Self {
        let deck = |name: &str, sink: Arc<dyn SinkFactory>| {
            Deck::new(name, sink).with_block_frames(config.block_size)
        };
        Self::new(
            deck("A", config.sink_factory("deck-a")),
            deck("B", config.sink_factory("deck-b")),
            CrossfadeConfig {
                fade_duration_secs: config.fade_duration_secs,
                block_frames: config.block_size,
            },
        )
    }

    pub fn deck(&self, id: DeckId) -> &Deck {
        match id {
            DeckId::A => &self.a,
            DeckId::B => &self.b,
        }
    }

    pub fn deck_mut(&mut self, id: DeckId) -> &mut Deck {
        match id {
            DeckId::A => &mut self.a,
            DeckId::B => &mut self.b,
        }
    }

    /// `(id, other)` borrowed at once.
    fn pair_mut(&mut self, id: DeckId) -> (&mut Deck, &mut Deck) {
        match id {
            DeckId::A => (&mut self.a, &mut self.b),
            DeckId::B => (&mut self.b, &mut self.a),
        }
    }

    pub fn load(
        &mut self,
        id: DeckId,
        path: &Path,
        loader: &dyn TrackLoader,
        analyzer: &dyn BeatAnalyzer,
    ) -> Result<(), DeckError> {
        self.deck_mut(id).load(path, loader, analyzer)
    }

    /// Toggles between playing and paused.
    pub fn toggle(&mut self, id: DeckId) -> Result<(), DeckError> {
        let deck = self.deck_mut(id);
        if deck.status() == DeckStatus::Playing {
            deck.pause();
            Ok(())
        } else {
            deck.start()
        }
    }

    /// Matches `id`'s tempo to the other deck.
    pub fn sync(&mut self, id: DeckId) -> bool {
        let (deck, other) = self.pair_mut(id);
        deck.sync_to(other)
    }

    /// Crossfades from `from` into the other deck.
    pub fn mix(&mut self, from: DeckId) -> Result<(), MixError> {
        self.reap_session();
        if self.session.is_some() {
            return Err(MixError::AlreadyMixing);
        }
        let config = self.mix;
        let (outgoing, incoming) = self.pair_mut(from);
        let session = crossfade(outgoing, incoming, &config)?;
        info!("Mixing {:?} into {:?}", from, from.other());
        self.session = Some(session);
        Ok(())
    }

    pub fn stop_mix(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel();
        }
    }

    pub fn is_mixing(&mut self) -> bool {
        self.reap_session();
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&CrossfadeSession> {
        self.session.as_ref()
    }

    fn reap_session(&mut self) {
        if self.session.as_ref().is_some_and(|s| s.is_finished()) {
            if let Some(session) = self.session.take() {
                if let Err(e) = session.join() {
                    warn!("previous crossfade failed: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemorySinkFactory;
    use crate::bpm::BeatIndex;
    use crate::track::Track;

    fn console() -> Console {
        let sink = Arc::new(MemorySinkFactory::new());
        let mut a = Deck::new("A", sink.clone());
        let mut b = Deck::new("B", sink);
        a.load_track(Track::new("a", vec![0.0; 100], 1000, 1), BeatIndex::known(120.0, vec![0.0]));
        b.load_track(Track::new("b", vec![0.0; 100], 1000, 1), BeatIndex::known(90.0, vec![0.0]));
        Console::new(a, b, CrossfadeConfig::default())
    }

    #[test]
    fn sync_targets_the_other_deck() {
        let mut console = console();
        assert!(console.sync(DeckId::B));
        assert!((console.deck(DeckId::B).effective_tempo().unwrap() - 120.0).abs() < 1e-9);
        assert_eq!(console.deck(DeckId::A).tempo_factor(), 1.0);
    }

    #[test]
    fn other_deck() {
        assert_eq!(DeckId::A.other(), DeckId::B);
        assert_eq!(DeckId::B.other(), DeckId::A);
    }
}
