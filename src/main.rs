// src/main.rs

use std::fmt::Write as FmtWrite;
use std::io::{stdout, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crossterm::{
    cursor::MoveToColumn,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType},
};

use deckmix::{
    Band, BeatAnalyzer, BpmAnalyzer, Console, DeckId, DeckStatus, EngineConfig, OutputBackend,
    PrecomputedBeats, SymphoniaLoader,
};

const GAIN_STEP: f32 = 0.1;
const MAX_GAIN: f32 = 3.0;
const SEEK_STEP_SECS: f64 = 5.0;

#[derive(Parser, Debug)]
#[command(name = "deckmix", about = "Two-deck player with EQ, tempo sync and beat-matched crossfades")]
struct Args {
    /// Track for deck A
    track_a: PathBuf,
    /// Track for deck B
    track_b: Option<PathBuf>,
    /// Engine config (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Output backend: cpal, wav or null
    #[arg(short, long)]
    output: Option<OutputBackend>,
    /// Directory of precomputed `<track>.json` beat files
    #[arg(short, long)]
    waveform_dir: Option<PathBuf>,
    /// Crossfade length in seconds
    #[arg(short, long)]
    fade: Option<f64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from_disk(path)?,
        None => EngineConfig::default(),
    };
    if let Some(output) = args.output {
        config.output = output;
    }
    if let Some(dir) = args.waveform_dir {
        config.waveform_dir = Some(dir);
    }
    if let Some(fade) = args.fade {
        config.fade_duration_secs = fade;
    }
    config.validate()?;

    let analyzer: Box<dyn BeatAnalyzer> = match &config.waveform_dir {
        Some(dir) => Box::new(PrecomputedBeats::new(dir, BpmAnalyzer::default())),
        None => Box::new(BpmAnalyzer::default()),
    };
    let loader = SymphoniaLoader;

    let mut console = Console::from_config(&config);
    console
        .load(DeckId::A, &args.track_a, &loader, analyzer.as_ref())
        .with_context(|| format!("loading {}", args.track_a.display()))?;
    if let Some(path) = &args.track_b {
        console
            .load(DeckId::B, path, &loader, analyzer.as_ref())
            .with_context(|| format!("loading {}", path.display()))?;
    }

    println!("[TAB] Select deck | [SPACE] Play/Pause | [S] Stop | [L/M/H] Cut band | [Shift+L/M/H] Boost band");
    println!("[+/-] Tempo | [←/→] Seek | [Y] Sync | [X] Mix into other | [C] Cancel mix | [Q] Quit");

    enable_raw_mode()?;
    let result = run(&mut console);
    disable_raw_mode()?;
    println!();
    result
}

fn run(console: &mut Console) -> anyhow::Result<()> {
    let mut selected = DeckId::A;
    let mut message = String::new();
    let mut line = String::new();

    loop {
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(ev) = event::read()? {
                if ev.kind != KeyEventKind::Press {
                    continue;
                }
                if ev.code == KeyCode::Char('c') && ev.modifiers.contains(KeyModifiers::CONTROL) {
                    break;
                }
                if matches!(ev.code, KeyCode::Char('q') | KeyCode::Esc) {
                    break;
                }
                message = handle_key(console, &mut selected, ev.code);
            }
        }

        line.clear();
        render_status(console, selected, &message, &mut line);
        let mut out = stdout();
        execute!(out, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
        write!(out, "{line}")?;
        out.flush()?;
    }

    console.stop_mix();
    console.deck_mut(DeckId::A).stop();
    console.deck_mut(DeckId::B).stop();
    Ok(())
}

fn handle_key(console: &mut Console, selected: &mut DeckId, code: KeyCode) -> String {
    let id = *selected;
    match code {
        KeyCode::Tab => {
            *selected = id.other();
            String::new()
        }
        KeyCode::Char(' ') => match console.toggle(id) {
            Ok(()) => String::new(),
            Err(e) => e.to_string(),
        },
        KeyCode::Char('s') => {
            console.deck_mut(id).stop();
            String::new()
        }
        KeyCode::Char(c @ ('l' | 'm' | 'h' | 'L' | 'M' | 'H')) => {
            let band = match c.to_ascii_lowercase() {
                'l' => Band::Low,
                'm' => Band::Mid,
                _ => Band::High,
            };
            let step = if c.is_ascii_uppercase() { GAIN_STEP } else { -GAIN_STEP };
            let deck = console.deck_mut(id);
            let gain = (deck.gain(band) + step).clamp(-MAX_GAIN, MAX_GAIN);
            match deck.set_gain(band, gain) {
                Ok(()) => format!("{band} {gain:.1}"),
                Err(e) => e.to_string(),
            }
        }
        KeyCode::Char(c @ ('+' | '=' | '-')) => {
            let delta = if c == '-' { -1.0 } else { 1.0 };
            let deck = console.deck_mut(id);
            let result = match deck.effective_tempo() {
                Some(bpm) => deck.change_tempo(bpm + delta).map(|_| ()),
                None => deck.change_tempo_factor(deck.tempo_factor() + delta / 100.0),
            };
            match result {
                Ok(()) => String::new(),
                Err(e) => e.to_string(),
            }
        }
        KeyCode::Left | KeyCode::Right => {
            let delta = if code == KeyCode::Left { -SEEK_STEP_SECS } else { SEEK_STEP_SECS };
            let deck = console.deck_mut(id);
            let target = deck.position_secs() + delta;
            deck.seek_secs(target);
            String::new()
        }
        KeyCode::Char('y') => {
            if console.sync(id) {
                "synced".to_string()
            } else {
                "sync unavailable: tempo unknown".to_string()
            }
        }
        KeyCode::Char('x') => match console.mix(id) {
            Ok(()) => match console.session() {
                Some(s) => format!("mixing, offset {:+.3}s", s.offset_secs()),
                None => String::new(),
            },
            Err(e) => e.to_string(),
        },
        KeyCode::Char('c') => {
            console.stop_mix();
            "mix cancelled".to_string()
        }
        _ => String::new(),
    }
}

fn render_status(console: &Console, selected: DeckId, message: &str, buf: &mut String) {
    for id in [DeckId::A, DeckId::B] {
        let deck = console.deck(id);
        let marker = if id == selected { '>' } else { ' ' };
        let state = match deck.status() {
            DeckStatus::Idle => "||",
            DeckStatus::Playing => "|>",
            DeckStatus::Mixing => "><",
        };
        let bpm = deck
            .effective_tempo()
            .map_or_else(|| "---.-".to_string(), |b| format!("{b:5.1}"));
        let _ = write!(
            buf,
            "{marker}{} {state} {:6.1}/{:6.1}s {bpm}bpm L{:.1} M{:.1} H{:.1}  ",
            deck.name(),
            deck.position_secs(),
            deck.duration_secs(),
            deck.gain(Band::Low),
            deck.gain(Band::Mid),
            deck.gain(Band::High),
        );
    }
    let _ = write!(buf, "{message}");
}
