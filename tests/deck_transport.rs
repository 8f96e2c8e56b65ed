use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use deckmix::bpm::NoAnalysis;
use deckmix::error::DeckError;
use deckmix::{
    Band, BandGains, BeatIndex, Deck, DeckStatus, FilterBank, MemorySinkFactory, SymphoniaLoader,
    Track,
};

const SR: u32 = 44100;

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

fn ramp_track(frames: usize, channels: usize) -> Track {
    let samples = (0..frames * channels)
        .map(|i| ((i % 200) as f32 / 200.0) - 0.5)
        .collect();
    Track::new("ramp", samples, SR, channels)
}

fn loaded_deck(sink: &MemorySinkFactory, track: Track, beats: BeatIndex) -> Deck {
    let mut deck = Deck::new("test", Arc::new(sink.clone())).with_block_frames(256);
    deck.load_track(track, beats);
    deck
}

#[test]
fn start_without_track_fails() {
    let mut deck = Deck::new("empty", Arc::new(MemorySinkFactory::new()));
    assert!(matches!(deck.start(), Err(DeckError::NoTrack)));
    assert_eq!(deck.status(), DeckStatus::Idle);
}

#[test]
fn plays_to_end_unchanged_at_unity() {
    let sink = MemorySinkFactory::new();
    let track = ramp_track(256 * 40 + 17, 2);
    let expected = track.samples().to_vec();
    let mut deck = loaded_deck(&sink, track, BeatIndex::Unknown);

    deck.start().unwrap();
    assert!(wait_until(|| !deck.controls().is_running()));

    assert_eq!(deck.status(), DeckStatus::Idle);
    assert_eq!(deck.cursor(), 256 * 40 + 17);
    let caps = sink.captures();
    assert_eq!(caps.len(), 1);
    assert_eq!((caps[0].sample_rate, caps[0].channels), (SR, 2));
    assert!(caps[0].finished);
    assert_eq!(caps[0].samples, expected);
}

#[test]
fn tempo_factor_shortens_output_but_not_cursor() {
    let sink = MemorySinkFactory::new();
    let mut deck = loaded_deck(&sink, ramp_track(256 * 20, 1), BeatIndex::Unknown);
    deck.change_tempo_factor(2.0).unwrap();

    deck.start().unwrap();
    assert!(wait_until(|| !deck.controls().is_running()));

    assert_eq!(deck.cursor(), 256 * 20);
    assert_eq!(sink.captures()[0].samples.len(), 128 * 20);
}

#[test]
fn pause_keeps_cursor_and_start_resumes() {
    let sink = MemorySinkFactory::new().with_write_delay(Duration::from_millis(2));
    let mut deck = loaded_deck(&sink, ramp_track(SR as usize * 2, 1), BeatIndex::Unknown);

    deck.start().unwrap();
    assert_eq!(deck.status(), DeckStatus::Playing);
    assert!(wait_until(|| deck.cursor() >= 256 * 4));

    deck.pause();
    assert_eq!(deck.status(), DeckStatus::Idle);
    assert!(wait_until(|| !deck.controls().is_running()));
    let paused_at = deck.cursor();
    assert!(paused_at > 0 && paused_at < SR as usize * 2);

    thread::sleep(Duration::from_millis(20));
    assert_eq!(deck.cursor(), paused_at);

    deck.start().unwrap();
    assert!(wait_until(|| deck.cursor() > paused_at));

    deck.stop();
    assert_eq!(deck.cursor(), 0);
    assert_eq!(deck.status(), DeckStatus::Idle);

    let caps = sink.captures();
    assert_eq!(caps.len(), 2);
    assert_eq!(caps[0].samples.len(), paused_at);
    // The second session picks up exactly where the first left off.
    let track = ramp_track(SR as usize * 2, 1);
    let resumed = &caps[1].samples;
    assert_eq!(&resumed[..256], &track.samples()[paused_at..paused_at + 256]);
}

#[test]
fn stop_always_rewinds() {
    let sink = MemorySinkFactory::new().with_write_delay(Duration::from_millis(1));
    let mut deck = loaded_deck(&sink, ramp_track(SR as usize, 1), BeatIndex::Unknown);

    deck.seek_secs(0.5);
    deck.stop();
    assert_eq!(deck.cursor(), 0);

    deck.start().unwrap();
    assert!(wait_until(|| deck.cursor() > 0));
    deck.stop();
    assert_eq!(deck.cursor(), 0);
    assert!(!deck.controls().is_running());
}

#[test]
fn device_failure_returns_to_idle() {
    let mut deck = Deck::new("broken", Arc::new(MemorySinkFactory::failing()));
    deck.load_track(ramp_track(1024, 1), BeatIndex::Unknown);

    deck.start().unwrap();
    assert!(wait_until(|| !deck.controls().is_running()));
    assert_eq!(deck.status(), DeckStatus::Idle);
    assert_eq!(deck.cursor(), 0);

    // Still restartable.
    assert!(deck.start().is_ok());
}

#[test]
fn gain_changes_apply_to_playback() {
    let sink = MemorySinkFactory::new();
    let mut deck = loaded_deck(&sink, ramp_track(2048, 1), BeatIndex::Unknown);
    for band in Band::ALL {
        deck.set_gain(band, 0.0).unwrap();
    }

    deck.start().unwrap();
    assert!(wait_until(|| !deck.controls().is_running()));
    let caps = sink.captures();
    assert_eq!(caps[0].samples.len(), 2048);
    assert!(caps[0].samples.iter().all(|&s| s == 0.0));
}

#[test]
fn negative_gain_inverts_band_in_playback() {
    let sink = MemorySinkFactory::new();
    let track = ramp_track(2048, 1);
    let mut expected = Vec::new();
    let mut bank = FilterBank::new();
    for block in track.samples().chunks(256) {
        expected.extend(bank.process(block, SR, BandGains::new(-1.0, 1.0, 1.0)).unwrap());
    }
    let mut deck = loaded_deck(&sink, track.clone(), BeatIndex::Unknown);
    deck.set_gain(Band::Low, -1.0).unwrap();
    assert_eq!(deck.gain(Band::Low), -1.0);

    deck.start().unwrap();
    assert!(wait_until(|| !deck.controls().is_running()));
    let out = &sink.captures()[0].samples;
    assert_eq!(out, &expected);
    assert_ne!(out.as_slice(), track.samples());
}

#[test]
fn load_from_file_and_keep_track_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 22050,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..22050 {
        writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
    }
    writer.finalize().unwrap();

    let mut deck = Deck::new("A", Arc::new(MemorySinkFactory::new()));
    deck.load(&path, &SymphoniaLoader, &NoAnalysis).unwrap();
    assert_eq!(deck.track().unwrap().name(), "tone");
    assert!((deck.duration_secs() - 1.0).abs() < 1e-9);
    assert!(!deck.beats().is_known());

    let missing = dir.path().join("missing.wav");
    assert!(matches!(
        deck.load(&missing, &SymphoniaLoader, &NoAnalysis),
        Err(DeckError::Load(_))
    ));
    assert_eq!(deck.track().unwrap().name(), "tone");
}
