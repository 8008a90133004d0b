//! Playback-Pipeline - eingehende Chunks der Reihe nach abspielen
//!
//! Chunks landen in einer FIFO-Queue. Es spielt immer höchstens ein Chunk;
//! der nächste startet erst, wenn der vorherige fertig ist oder endgültig
//! fehlgeschlagen ist. Ein fehlerhafter Chunk blockiert die Queue nie.
//!
//! Jeder Chunk durchläuft eine geordnete Liste von Strategien. Standard ist
//! "erster Erfolg gewinnt": sobald eine Strategie den Chunk gespielt hat,
//! werden die restlichen übersprungen.

use super::audio::{AudioError, AudioSink};
use super::codec::{decode_container, decode_wav, CodecError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("Failed to decode chunk: {0}")]
    Decode(String),

    #[error("Audio output error: {0}")]
    Output(String),

    #[error("Audio sink has been released")]
    SinkReleased,

    #[error("All playback strategies failed")]
    AllStrategiesFailed,
}

impl From<AudioError> for PlaybackError {
    fn from(e: AudioError) -> Self {
        match e {
            AudioError::SinkReleased => PlaybackError::SinkReleased,
            other => PlaybackError::Output(other.to_string()),
        }
    }
}

impl From<CodecError> for PlaybackError {
    fn from(e: CodecError) -> Self {
        PlaybackError::Decode(e.to_string())
    }
}

// ============================================================================
// STRATEGIES
// ============================================================================

/// Ein Weg, einen Chunk hörbar zu machen
#[async_trait]
pub trait PlaybackStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Kehrt zurück, wenn der Chunk fertig gespielt ist
    async fn play(&self, chunk: &[u8], sink: &AudioSink) -> Result<(), PlaybackError>;
}

/// WAV direkt über hound
#[derive(Debug, Clone, Copy, Default)]
pub struct WavPlayback;

#[async_trait]
impl PlaybackStrategy for WavPlayback {
    fn name(&self) -> &'static str {
        "wav"
    }

    async fn play(&self, chunk: &[u8], sink: &AudioSink) -> Result<(), PlaybackError> {
        let audio = decode_wav(chunk)?;
        let output = sink.output().await?;
        output.render(audio).await?;
        Ok(())
    }
}

/// Container-Erkennung und Dekodierung über symphonia
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodedPlayback;

#[async_trait]
impl PlaybackStrategy for DecodedPlayback {
    fn name(&self) -> &'static str {
        "decoded"
    }

    async fn play(&self, chunk: &[u8], sink: &AudioSink) -> Result<(), PlaybackError> {
        let audio = decode_container(chunk)?;
        let output = sink.output().await?;
        output.render(audio).await?;
        Ok(())
    }
}

pub fn default_strategies() -> Vec<Arc<dyn PlaybackStrategy>> {
    vec![Arc::new(WavPlayback), Arc::new(DecodedPlayback)]
}

// ============================================================================
// OPTIONS
// ============================================================================

/// Wie die Strategie-Liste pro Chunk durchlaufen wird
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    /// Nach dem ersten Erfolg abbrechen
    #[default]
    FirstSuccess,
    /// Alle Strategien nacheinander versuchen, auch nach einem Erfolg
    ///
    /// Jede Strategie spielt den Chunk vollständig, bevor die nächste beginnt.
    /// Ein Chunk belegt die Wiedergabe damit einmal pro erfolgreicher Strategie;
    /// bei 1s/2s-Chunks läuft die Queue dauerhaft voll. Nur zur Diagnose gedacht.
    Hedge,
}

/// Was bei voller Queue passiert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    DropNewest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackOptions {
    pub mode: StrategyMode,
    /// Maximal wartende Chunks neben dem laufenden, `None` = unbegrenzt
    pub queue_limit: Option<usize>,
    pub overflow: OverflowPolicy,
}

/// Spielt einen Chunk mit der Strategie-Liste ab
///
/// Gibt den Namen der ersten erfolgreichen Strategie zurück. Ist die Senke
/// bereits freigegeben, wird sofort abgebrochen.
pub async fn play_with(
    strategies: &[Arc<dyn PlaybackStrategy>],
    mode: StrategyMode,
    chunk: &[u8],
    sink: &AudioSink,
) -> Result<&'static str, PlaybackError> {
    let mut winner = None;

    for strategy in strategies {
        match strategy.play(chunk, sink).await {
            Ok(()) => {
                winner.get_or_insert(strategy.name());
                if mode == StrategyMode::FirstSuccess {
                    break;
                }
            }
            Err(PlaybackError::SinkReleased) => return Err(PlaybackError::SinkReleased),
            Err(e) => {
                tracing::debug!(strategy = strategy.name(), "Playback strategy failed: {}", e);
            }
        }
    }

    winner.ok_or(PlaybackError::AllStrategiesFailed)
}

// ============================================================================
// PLAYBACK FLOW
// ============================================================================

struct QueuedChunk {
    seq: u64,
    data: Vec<u8>,
}

/// Ergebnis eines abgeschlossenen Chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackOutcome {
    pub seq: u64,
    pub size: usize,
    pub result: Result<&'static str, PlaybackError>,
}

/// FIFO-Wiedergabe einer Session
///
/// Der laufende Chunk ist ein Future, das nur über [`PlaybackFlow::completion`]
/// vorangetrieben wird. Der Besitzer ruft danach [`PlaybackFlow::finish`] auf,
/// das den nächsten Chunk startet.
pub struct PlaybackFlow {
    queue: VecDeque<QueuedChunk>,
    current: Option<BoxFuture<'static, PlaybackOutcome>>,
    strategies: Arc<[Arc<dyn PlaybackStrategy>]>,
    sink: Arc<AudioSink>,
    options: PlaybackOptions,
    next_seq: u64,
    dropped: u64,
}

impl PlaybackFlow {
    pub fn new(
        strategies: Vec<Arc<dyn PlaybackStrategy>>,
        sink: Arc<AudioSink>,
        options: PlaybackOptions,
    ) -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            strategies: strategies.into(),
            sink,
            options,
            next_seq: 0,
            dropped: 0,
        }
    }

    /// Hängt einen Chunk an und startet die Wiedergabe, falls nichts spielt
    pub fn enqueue(&mut self, data: Vec<u8>) {
        let seq = self.next_seq;
        self.next_seq += 1;

        // Nur wartende Chunks zählen; ohne laufende Wiedergabe startet der Chunk sofort
        let limit = self.options.queue_limit.filter(|_| self.current.is_some());
        if let Some(limit) = limit {
            if self.queue.len() >= limit {
                let evicted = match self.options.overflow {
                    OverflowPolicy::DropOldest => self.queue.pop_front(),
                    OverflowPolicy::DropNewest => None,
                };
                self.dropped += 1;
                match evicted {
                    Some(old) => {
                        tracing::warn!(seq = old.seq, "Playback queue full, dropping oldest chunk");
                    }
                    None => {
                        tracing::warn!(seq, "Playback queue full, dropping incoming chunk");
                        return;
                    }
                }
            }
        }

        tracing::debug!(
            seq,
            size = data.len(),
            queued = self.queue.len() + 1,
            "Received audio chunk"
        );
        self.queue.push_back(QueuedChunk { seq, data });
        self.drain();
    }

    fn drain(&mut self) {
        if self.current.is_some() {
            return;
        }
        let Some(chunk) = self.queue.pop_front() else {
            return;
        };

        tracing::debug!(
            seq = chunk.seq,
            remaining = self.queue.len(),
            "Playing audio chunk"
        );

        let strategies = Arc::clone(&self.strategies);
        let sink = Arc::clone(&self.sink);
        let mode = self.options.mode;

        self.current = Some(Box::pin(async move {
            let result = play_with(&strategies, mode, &chunk.data, &sink).await;
            PlaybackOutcome {
                seq: chunk.seq,
                size: chunk.data.len(),
                result,
            }
        }));
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    /// Wartende Chunks (ohne den laufenden)
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Wegen voller Queue verworfene Chunks
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Wartet bis der laufende Chunk fertig ist; ohne laufenden Chunk nie
    pub async fn completion(&mut self) -> PlaybackOutcome {
        let outcome = match self.current.as_mut() {
            Some(playing) => playing.await,
            None => std::future::pending().await,
        };
        self.current = None;
        outcome
    }

    /// Verbucht ein Ergebnis und startet den nächsten Chunk
    pub fn finish(&mut self, outcome: PlaybackOutcome) {
        match &outcome.result {
            Ok(strategy) => {
                tracing::debug!(seq = outcome.seq, strategy, "Audio chunk played");
            }
            Err(e) => {
                tracing::warn!(
                    seq = outcome.seq,
                    size = outcome.size,
                    "Audio playback failed, skipping chunk: {}",
                    e
                );
            }
        }
        self.drain();
    }

    /// Verwirft Queue und laufenden Chunk
    pub fn clear(&mut self) {
        let abandoned = self.queue.len() + usize::from(self.current.is_some());
        self.queue.clear();
        self.current = None;
        if abandoned > 0 {
            tracing::debug!(abandoned, "Playback queue cleared");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::testing::{wav_chunk, RecordingOutputFactory};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Attempt {
        strategy: &'static str,
        chunk: u8,
        started: Instant,
        finished: Instant,
    }

    /// Strategie die `chunk[0] * 100ms` "spielt" oder sofort fehlschlägt
    struct ScriptedStrategy {
        name: &'static str,
        fail: bool,
        log: Arc<Mutex<Vec<Attempt>>>,
    }

    #[async_trait]
    impl PlaybackStrategy for ScriptedStrategy {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn play(&self, chunk: &[u8], _sink: &AudioSink) -> Result<(), PlaybackError> {
            let started = Instant::now();
            if !self.fail {
                tokio::time::sleep(Duration::from_millis(chunk[0] as u64 * 100)).await;
            }
            self.log.lock().push(Attempt {
                strategy: self.name,
                chunk: chunk[0],
                started,
                finished: Instant::now(),
            });
            if self.fail {
                Err(PlaybackError::Decode("scripted".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn scripted(
        script: &[(&'static str, bool)],
    ) -> (Vec<Arc<dyn PlaybackStrategy>>, Arc<Mutex<Vec<Attempt>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let strategies = script
            .iter()
            .map(|&(name, fail)| {
                Arc::new(ScriptedStrategy {
                    name,
                    fail,
                    log: Arc::clone(&log),
                }) as Arc<dyn PlaybackStrategy>
            })
            .collect();
        (strategies, log)
    }

    fn sink() -> Arc<AudioSink> {
        Arc::new(AudioSink::new(Arc::new(RecordingOutputFactory::default())))
    }

    async fn run_until_idle(flow: &mut PlaybackFlow) -> Vec<PlaybackOutcome> {
        let mut outcomes = Vec::new();
        while flow.is_playing() {
            let outcome = flow.completion().await;
            outcomes.push(outcome.clone());
            flow.finish(outcome);
        }
        outcomes
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_play_in_order_without_overlap() {
        let (strategies, log) = scripted(&[("only", false)]);
        let mut flow = PlaybackFlow::new(strategies, sink(), PlaybackOptions::default());

        // X=3, Y=1, Z=2 (x100ms) kurz hintereinander
        flow.enqueue(vec![3]);
        flow.enqueue(vec![1]);
        flow.enqueue(vec![2]);
        assert!(flow.is_playing());
        assert_eq!(flow.queued(), 2);

        let outcomes = run_until_idle(&mut flow).await;
        assert_eq!(outcomes.iter().map(|o| o.seq).collect::<Vec<_>>(), vec![0, 1, 2]);

        let log = log.lock();
        assert_eq!(log.iter().map(|a| a.chunk).collect::<Vec<_>>(), vec![3, 1, 2]);
        for pair in log.windows(2) {
            assert!(pair[1].started >= pair[0].finished);
        }
        assert_eq!(log[2].finished - log[0].started, Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_skips_remaining_strategies() {
        let (strategies, log) = scripted(&[("broken", true), ("good", false), ("spare", false)]);
        let mut flow = PlaybackFlow::new(strategies, sink(), PlaybackOptions::default());

        flow.enqueue(vec![1]);
        let outcomes = run_until_idle(&mut flow).await;

        assert_eq!(outcomes[0].result, Ok("good"));
        let tried: Vec<_> = log.lock().iter().map(|a| a.strategy).collect();
        assert_eq!(tried, vec!["broken", "good"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hedge_mode_tries_every_strategy() {
        let (strategies, log) = scripted(&[("a", false), ("b", true), ("c", false)]);
        let options = PlaybackOptions {
            mode: StrategyMode::Hedge,
            ..Default::default()
        };
        let mut flow = PlaybackFlow::new(strategies, sink(), options);

        flow.enqueue(vec![1]);
        let outcomes = run_until_idle(&mut flow).await;

        assert_eq!(outcomes[0].result, Ok("a"));
        assert_eq!(log.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hedge_mode_plays_strategies_one_after_another() {
        let (strategies, log) = scripted(&[("a", false), ("b", false)]);
        let options = PlaybackOptions {
            mode: StrategyMode::Hedge,
            ..Default::default()
        };
        let mut flow = PlaybackFlow::new(strategies, sink(), options);

        let started = Instant::now();
        flow.enqueue(vec![2]);
        run_until_idle(&mut flow).await;

        // Zweite Strategie beginnt erst nach der ersten; der Chunk dauert doppelt
        let log = log.lock();
        assert_eq!(log[1].started, log[0].finished);
        assert_eq!(started.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_chunk_does_not_block_queue() {
        let (strategies, _log) = scripted(&[("x", true), ("y", true)]);
        let mut flow = PlaybackFlow::new(strategies, sink(), PlaybackOptions::default());

        flow.enqueue(vec![1]);
        flow.enqueue(vec![2]);
        let outcomes = run_until_idle(&mut flow).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|o| o.result == Err(PlaybackError::AllStrategiesFailed)));
        assert!(!flow.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_limit_drop_oldest() {
        let (strategies, log) = scripted(&[("only", false)]);
        let options = PlaybackOptions {
            queue_limit: Some(1),
            overflow: OverflowPolicy::DropOldest,
            ..Default::default()
        };
        let mut flow = PlaybackFlow::new(strategies, sink(), options);

        flow.enqueue(vec![1]); // spielt
        flow.enqueue(vec![2]); // wartet
        flow.enqueue(vec![3]); // verdrängt 2
        assert_eq!(flow.dropped(), 1);

        run_until_idle(&mut flow).await;
        let played: Vec<_> = log.lock().iter().map(|a| a.chunk).collect();
        assert_eq!(played, vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_limit_drop_newest() {
        let (strategies, log) = scripted(&[("only", false)]);
        let options = PlaybackOptions {
            queue_limit: Some(1),
            overflow: OverflowPolicy::DropNewest,
            ..Default::default()
        };
        let mut flow = PlaybackFlow::new(strategies, sink(), options);

        flow.enqueue(vec![1]);
        flow.enqueue(vec![2]);
        flow.enqueue(vec![3]);

        run_until_idle(&mut flow).await;
        let played: Vec<_> = log.lock().iter().map(|a| a.chunk).collect();
        assert_eq!(played, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_limit_still_plays_when_idle() {
        for overflow in [OverflowPolicy::DropOldest, OverflowPolicy::DropNewest] {
            let (strategies, log) = scripted(&[("only", false)]);
            let options = PlaybackOptions {
                queue_limit: Some(0),
                overflow,
                ..Default::default()
            };
            let mut flow = PlaybackFlow::new(strategies, sink(), options);

            flow.enqueue(vec![1]);
            assert!(flow.is_playing(), "{overflow:?}");
            assert_eq!(flow.dropped(), 0, "{overflow:?}");

            // Während der Wiedergabe darf nichts warten
            flow.enqueue(vec![2]);
            assert_eq!(flow.queued(), 0, "{overflow:?}");
            assert_eq!(flow.dropped(), 1, "{overflow:?}");

            run_until_idle(&mut flow).await;
            flow.enqueue(vec![3]);
            run_until_idle(&mut flow).await;

            let played: Vec<_> = log.lock().iter().map(|a| a.chunk).collect();
            assert_eq!(played, vec![1, 3], "{overflow:?}");
            assert_eq!(flow.dropped(), 1, "{overflow:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_abandons_everything() {
        let (strategies, log) = scripted(&[("only", false)]);
        let mut flow = PlaybackFlow::new(strategies, sink(), PlaybackOptions::default());

        flow.enqueue(vec![1]);
        flow.enqueue(vec![2]);
        flow.clear();

        assert!(!flow.is_playing());
        assert_eq!(flow.queued(), 0);
        let idle = tokio::time::timeout(Duration::from_secs(1), flow.completion()).await;
        assert!(idle.is_err());
        assert!(log.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_strategies_play_wav() {
        let factory = RecordingOutputFactory::default();
        let sink = Arc::new(AudioSink::new(Arc::new(factory.clone())));
        let mut flow = PlaybackFlow::new(default_strategies(), sink, PlaybackOptions::default());

        flow.enqueue(wav_chunk(1600));
        flow.enqueue(vec![0x42; 64]);
        let outcomes = run_until_idle(&mut flow).await;

        assert_eq!(outcomes[0].result, Ok("wav"));
        assert_eq!(outcomes[1].result, Err(PlaybackError::AllStrategiesFailed));

        let renders = factory.renders.lock();
        assert_eq!(renders.len(), 1);
        assert_eq!(renders[0].frames, 1600);
        assert_eq!(renders[0].finished - renders[0].started, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_released_sink_stops_strategy_chain() {
        let (mut strategies, log) = scripted(&[("after", false)]);
        strategies.insert(0, Arc::new(WavPlayback));

        let sink = sink();
        sink.release();

        let result = play_with(&strategies, StrategyMode::FirstSuccess, &wav_chunk(160), &sink).await;
        assert_eq!(result, Err(PlaybackError::SinkReleased));
        assert!(log.lock().is_empty());
    }
}
