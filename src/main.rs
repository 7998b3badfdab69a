//! Command-line front end for the conjugation narrator.
//!
//! Responsibilities here are intentionally minimal:
//! - Parse command-line arguments.
//! - Load user configuration from `conf/config.toml` and the verb dataset.
//! - Build the queue for the requested command and hand it to the narrator.
//! - Mirror the narrator's published state on the terminal.

use anyhow::{Context, Result, anyhow, bail};
use std::env;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};
use vozviva::cache::{ClipKey, ClipStore, FsClipStore, MemoryClipStore};
use vozviva::cancellation::CancellationToken;
use vozviva::codec::decode_clip;
use vozviva::config::{AppConfig, DEFAULT_CONFIG_PATH, load_config};
use vozviva::dataset::{Dataset, PlaybackQueue, VerbCategory};
use vozviva::narrator::{NarrationState, NarrationView, Narrator};
use vozviva::playback::{PlaybackController, RodioOutput};
use vozviva::synthesis::{GeminiBackend, SynthesisClient};
use vozviva::wav::write_wav;

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

const USAGE: &str = "\
Usage: vozviva [--config <file>] [--data <file>] [--repeat] [--no-cache] <command>

Commands:
  tenses                              list tenses and their verbs
  play <tense> <verb>                 narrate one verb
  play-tense <tense> [regular|irregular]
  play-selection <tense>...           every verb of the given tenses
  play-favorites                      favorites from the config file
  play-overview                       the first verb of every tense
  play-irregulars                     every irregular verb
  status                              cached clips per tense
  export <tense> <verb> <file.wav>    write a cached clip as WAV

While narrating, type `p` to pause or resume, `r` to toggle repeat, `s` to stop.";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Tenses,
    Play { tense: String, verb: String },
    PlayTense { tense: String, category: Option<VerbCategory> },
    PlaySelection { tenses: Vec<String> },
    PlayFavorites,
    PlayOverview,
    PlayIrregulars,
    Status,
    Export { tense: String, verb: String, path: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
struct Cli {
    config_path: PathBuf,
    data_path: Option<String>,
    repeat: bool,
    no_cache: bool,
    command: Command,
}

fn main() {
    let reload_handle = init_tracing();
    if let Err(err) = run(&reload_handle) {
        error!("{err:?}");
        std::process::exit(1);
    }
}

fn run(reload_handle: &ReloadHandle) -> Result<()> {
    let cli = parse_args(env::args().skip(1))?;
    let mut config = load_config(&cli.config_path);
    if cli.repeat {
        config.repeat = true;
    }
    if cli.no_cache {
        config.cache_enabled = false;
    }
    if let Some(data) = &cli.data_path {
        config.dataset_path = data.clone();
    }
    set_log_level(reload_handle, config.log_level.as_filter_str());
    info!(
        voice = %config.tts_voice,
        model = %config.tts_model,
        cache = config.cache_enabled,
        repeat = config.repeat,
        "Active narration configuration"
    );

    let dataset = Dataset::load(Path::new(&config.dataset_path))?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Building async runtime")?;
    runtime.block_on(execute(cli.command, config, dataset))
}

async fn execute(command: Command, config: AppConfig, dataset: Dataset) -> Result<()> {
    let store = open_store(&config);
    let queue = match command {
        Command::Tenses => {
            list_tenses(&dataset);
            return Ok(());
        }
        Command::Status => return print_status(&dataset, &*store).await,
        Command::Export { tense, verb, path } => {
            return export_clip(&*store, &tense, &verb, &path).await;
        }
        Command::Play { tense, verb } => {
            let found = dataset
                .tense(&tense)
                .ok_or_else(|| anyhow!("Unknown tense: {tense}"))?
                .find_verb(&verb)
                .ok_or_else(|| anyhow!("Unknown verb in {tense}: {verb}"))?
                .clone();
            let narrator = build_narrator(&config, store)?;
            let handle = narrator.play_one(&tense, &found).await?;
            return drive(&narrator, handle).await;
        }
        Command::PlayTense { tense, category } => {
            let queue = match category {
                Some(category) => dataset.category_queue(&tense, category),
                None => dataset.tense_queue(&tense),
            };
            queue.ok_or_else(|| anyhow!("Unknown tense: {tense}"))?
        }
        Command::PlaySelection { tenses } => dataset.selection_queue(&tenses),
        Command::PlayFavorites => {
            let favorites = config.favorites();
            if favorites.is_empty() {
                bail!("No favorites configured under [favorites] in the config file");
            }
            dataset.favorites_queue(&favorites)
        }
        Command::PlayOverview => dataset.overview_queue(),
        Command::PlayIrregulars => dataset.irregular_queue(),
    };
    play_queue(&config, store, queue).await
}

async fn play_queue(config: &AppConfig, store: Arc<dyn ClipStore>, queue: PlaybackQueue) -> Result<()> {
    if queue.is_empty() {
        warn!("Nothing to narrate for this selection");
        return Ok(());
    }
    let narrator = build_narrator(config, store)?;
    let handle = narrator.play_sequence(queue).await?;
    drive(&narrator, handle).await
}

fn open_store(config: &AppConfig) -> Arc<dyn ClipStore> {
    if config.cache_enabled {
        Arc::new(FsClipStore::new(config.cache_root()))
    } else {
        info!("Clip cache disabled; clips live for this session only");
        Arc::new(MemoryClipStore::new())
    }
}

fn build_narrator(config: &AppConfig, store: Arc<dyn ClipStore>) -> Result<Arc<Narrator>> {
    let api_key = env::var(&config.tts_api_key_env).with_context(|| {
        format!(
            "Set {} to an API key for the speech service",
            config.tts_api_key_env
        )
    })?;
    let backend = GeminiBackend::new(
        &config.tts_endpoint,
        &config.tts_model,
        &config.tts_voice,
        api_key,
    );
    let output = RodioOutput::open(config.volume)?;
    let player = Arc::new(PlaybackController::new(
        Arc::new(output),
        config.progress_interval(),
    ));
    Ok(Narrator::init(
        store,
        SynthesisClient::new(Arc::new(backend), config.retry_policy()),
        player,
        config.narrator_settings(),
        config.repeat,
    ))
}

/// Run until the narration ends, Ctrl-C, or `s` on stdin.
async fn drive(narrator: &Arc<Narrator>, handle: vozviva::narrator::NarrationHandle) -> Result<()> {
    let interrupt = CancellationToken::new();
    {
        let interrupt = interrupt.clone();
        ctrlc::set_handler(move || interrupt.cancel()).context("Installing Ctrl-C handler")?;
    }
    let mut keys = spawn_stdin_reader();
    let reporter = tokio::spawn(report_view(narrator.subscribe()));

    let finished = handle.finished();
    tokio::pin!(finished);
    loop {
        tokio::select! {
            summary = &mut finished => {
                info!(
                    played = summary.played,
                    skipped = summary.skipped,
                    cancelled = summary.cancelled,
                    "Narration complete"
                );
                break;
            }
            _ = interrupt.cancelled() => {
                warn!("Interrupted; stopping narration");
                narrator.stop().await;
                break;
            }
            Some(line) = keys.recv() => match line.trim() {
                "p" => {
                    if !narrator.pause() && !narrator.resume() {
                        info!("Nothing to pause right now");
                    }
                }
                "r" => {
                    let repeat = narrator.toggle_repeat();
                    println!("repeat {}", if repeat { "on" } else { "off" });
                }
                "s" => {
                    narrator.stop().await;
                    break;
                }
                "" => {}
                other => println!("unknown key {other:?}; use p, r or s"),
            },
        }
    }

    narrator.dispose().await;
    reporter.abort();
    Ok(())
}

fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn report_view(mut view: tokio::sync::watch::Receiver<NarrationView>) {
    let mut last = NarrationView::default();
    while view.changed().await.is_ok() {
        let current = view.borrow_and_update().clone();
        if current.now_playing != last.now_playing || current.loading != last.loading {
            if let Some(now) = &current.now_playing {
                let status = if current.loading { "loading" } else { "playing" };
                println!("{} · {} ({status})", now.tense_id, now.verb);
            }
        }
        if current.state != last.state && current.state == NarrationState::Paused {
            println!("paused at {:.0}%", current.progress_pct);
        }
        last = current;
    }
}

fn list_tenses(dataset: &Dataset) {
    for tense in dataset.tenses() {
        println!("{}  [{}]", tense.clean_title(), tense.id);
        for verb in &tense.verbs {
            let marker = if verb.is_irregular { "*" } else { " " };
            println!("  {marker} {} ({})", verb.name, verb.translation);
        }
    }
}

async fn print_status(dataset: &Dataset, store: &dyn ClipStore) -> Result<()> {
    let keys = store.list_keys().await;
    for tense in dataset.tenses() {
        let cached = tense
            .verbs
            .iter()
            .filter(|verb| keys.contains(&ClipKey::new(&tense.id, &verb.name)))
            .count();
        let marker = if cached == tense.verbs.len() && cached > 0 {
            "complete"
        } else {
            ""
        };
        println!("{:<28} {cached}/{} {marker}", tense.id, tense.verbs.len());
    }
    println!("{} clips cached", keys.len());
    Ok(())
}

async fn export_clip(store: &dyn ClipStore, tense: &str, verb: &str, path: &Path) -> Result<()> {
    let key = ClipKey::new(tense, verb);
    let bytes = store
        .get(&key)
        .await
        .ok_or_else(|| anyhow!("{key} is not cached yet; play it once first"))?;
    let clip = decode_clip(&bytes).with_context(|| format!("Decoding cached clip {key}"))?;
    write_wav(path, &clip)?;
    println!("wrote {}", path.display());
    Ok(())
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Cli> {
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut data_path = None;
    let mut repeat = false;
    let mut no_cache = false;
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config_path = PathBuf::from(
                    args.next()
                        .ok_or_else(|| anyhow!("--config needs a path\n\n{USAGE}"))?,
                );
            }
            "--data" => {
                data_path = Some(
                    args.next()
                        .ok_or_else(|| anyhow!("--data needs a path\n\n{USAGE}"))?,
                );
            }
            "--repeat" => repeat = true,
            "--no-cache" => no_cache = true,
            "-h" | "--help" => bail!("{USAGE}"),
            flag if flag.starts_with("--") => bail!("Unknown flag {flag}\n\n{USAGE}"),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let name = positional
        .next()
        .ok_or_else(|| anyhow!("Missing command\n\n{USAGE}"))?;
    let rest: Vec<String> = positional.collect();
    let command = match (name.as_str(), rest.as_slice()) {
        ("tenses", []) => Command::Tenses,
        ("play", [tense, verb]) => Command::Play {
            tense: tense.clone(),
            verb: verb.clone(),
        },
        ("play-tense", [tense]) => Command::PlayTense {
            tense: tense.clone(),
            category: None,
        },
        ("play-tense", [tense, category]) => Command::PlayTense {
            tense: tense.clone(),
            category: Some(parse_category(category)?),
        },
        ("play-selection", tenses) if !tenses.is_empty() => Command::PlaySelection {
            tenses: tenses.to_vec(),
        },
        ("play-favorites", []) => Command::PlayFavorites,
        ("play-overview", []) => Command::PlayOverview,
        ("play-irregulars", []) => Command::PlayIrregulars,
        ("status", []) => Command::Status,
        ("export", [tense, verb, path]) => Command::Export {
            tense: tense.clone(),
            verb: verb.clone(),
            path: PathBuf::from(path),
        },
        _ => bail!("Unrecognized command line: {name} {}\n\n{USAGE}", rest.join(" ")),
    };

    Ok(Cli {
        config_path,
        data_path,
        repeat,
        no_cache,
        command,
    })
}

fn parse_category(value: &str) -> Result<VerbCategory> {
    match value {
        "regular" => Ok(VerbCategory::Regular),
        "irregular" => Ok(VerbCategory::Irregular),
        other => bail!("Category must be `regular` or `irregular`, got {other}"),
    }
}

fn init_tracing() -> ReloadHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(std::io::stderr)
                .with_filter(filter_layer),
        )
        .init();
    handle
}

fn set_log_level(handle: &ReloadHandle, level: &str) {
    if env::var_os("RUST_LOG").is_some() {
        info!("RUST_LOG is set; ignoring configured log level");
        return;
    }
    let parsed = EnvFilter::builder()
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = handle.modify(|filter| *filter = parsed) {
        warn!(%level, "Failed to update log level from config: {err}");
    } else {
        info!(%level, "Applied log level from config");
    }
}
