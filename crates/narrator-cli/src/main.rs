use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use narrator_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use narrator_contracts::credentials::{
    mask_credential, CredentialStore, FileCookieJar, FocusTarget, KeyField, API_KEY_COOKIE_NAME,
};
use narrator_contracts::events::{EventWriter, SessionEvent};
use narrator_contracts::scenarios::{ScenarioRegistry, ScenarioSpec, DEFAULT_SCENARIO};
use narrator_contracts::session::{GameSession, LogEntry, SceneImage};
use narrator_engine::{
    AlertSink, Gateway, GatewayConfig, GatewayError, SceneSink, TurnOrchestrator,
    DEFAULT_IMAGE_MODEL, DEFAULT_TEXT_MODEL,
};
use sha2::{Digest, Sha256};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "narrator", version, about = "Illustrated text adventure in the terminal")]
struct Cli {
    /// Debug logging unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Play interactively.
    Play(PlayArgs),
    /// List the available opening scenes.
    Scenarios(ScenariosArgs),
    /// Save an API key, or show which one is stored.
    Key(KeyArgs),
}

#[derive(Debug, Parser)]
struct PlayArgs {
    #[arg(long, default_value = DEFAULT_SCENARIO)]
    scenario: String,
    /// Extra scenarios as a TOML file of `[[scenario]]` tables.
    #[arg(long)]
    scenarios: Option<PathBuf>,
    /// Directory for generated scene PNGs.
    #[arg(long, default_value = "scenes")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    cookie_jar: Option<PathBuf>,
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long, env = "OPENAI_API_BASE")]
    api_base: Option<String>,
    #[arg(long, default_value = DEFAULT_TEXT_MODEL)]
    text_model: String,
    #[arg(long, default_value = DEFAULT_IMAGE_MODEL)]
    image_model: String,
}

#[derive(Debug, Parser)]
struct ScenariosArgs {
    #[arg(long)]
    scenarios: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct KeyArgs {
    value: Option<String>,
    #[arg(long)]
    cookie_jar: Option<PathBuf>,
    #[arg(long, env = "OPENAI_API_BASE")]
    api_base: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("narrator error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Command::Play(args) => {
            run_play(args)?;
            Ok(0)
        }
        Command::Scenarios(args) => run_scenarios(args),
        Command::Key(args) => run_key(args),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run_play(args: PlayArgs) -> Result<()> {
    let registry = load_registry(args.scenarios.as_deref())?;
    let Some(scenario) = registry.get(&args.scenario).cloned() else {
        bail!(
            "unknown scenario '{}' (try `narrator scenarios`)",
            args.scenario
        );
    };

    let config = gateway_config(args.api_base.as_deref(), &args.text_model, &args.image_model);
    let credentials = open_credentials(args.cookie_jar.clone(), &config.api_base)?;
    let gateway = Gateway::openai(config, Some(Box::new(TerminalAlert)));
    let sink = TerminalSink::new(&args.out);

    let mut session = GameSession::new();
    let mut orchestrator = TurnOrchestrator::new(gateway, credentials, Box::new(sink));
    if let Some(path) = args.events.as_ref() {
        orchestrator = orchestrator.with_events(EventWriter::new(path, session.id.clone()));
    }

    let mut key_field = PromptKeyField::default();
    let mut action_prompt = ActionPrompt;
    orchestrator.credentials_mut().setup(&mut key_field)?;
    match args.api_key.as_deref().map(str::trim).filter(|key| !key.is_empty()) {
        Some(key) => {
            key_field.set_value(key);
            submit_key(orchestrator.credentials_mut(), &key_field, None);
        }
        None => {
            orchestrator.credentials_mut().load(None)?;
        }
    }

    let config = orchestrator.gateway().config().clone();
    orchestrator.record(SessionEvent::SessionStarted {
        text_model: &config.text_model,
        image_model: &config.image_model,
    });
    tracing::debug!(
        session_id = %session.id,
        api_base = %config.api_base,
        "session started"
    );

    println!("Narrator started. Type an action to play, /help for commands.");
    orchestrator.start_scenario(&mut session, &scenario);
    print_opening(&scenario);

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        match intent.action.as_str() {
            "noop" => continue,
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
                println!("Anything else is played as your next action.");
            }
            "quit" => break,
            "list_scenarios" => print_scenarios(&registry, Some(&session.scenario)),
            "start_scenario" => {
                let Some(name) = intent.arg("scenario") else {
                    println!("/scenario requires a name (see /scenarios)");
                    continue;
                };
                match registry.get(name) {
                    Some(next) => {
                        orchestrator.start_scenario(&mut session, next);
                        print_opening(next);
                    }
                    None => println!("Unknown scenario: {name}"),
                }
            }
            "set_api_key" => {
                let Some(value) = intent.arg("value") else {
                    println!("/key requires a value");
                    continue;
                };
                key_field.set_value(value);
                submit_key(
                    orchestrator.credentials_mut(),
                    &key_field,
                    Some(&mut action_prompt),
                );
            }
            "set_text_model" => {
                if let Some(model) = intent.arg("model") {
                    orchestrator.gateway_mut().set_text_model(model);
                }
                println!(
                    "Text model: {}",
                    orchestrator.gateway().config().text_model
                );
            }
            "set_image_model" => {
                if let Some(model) = intent.arg("model") {
                    orchestrator.gateway_mut().set_image_model(model);
                }
                println!(
                    "Image model: {}",
                    orchestrator.gateway().config().image_model
                );
            }
            "show_log" => print_log(&session.log, &args.out),
            "play" => {
                let action = intent.play.as_deref().unwrap_or(input);
                if let Err(err) = orchestrator.play_turn(&mut session, action) {
                    eprintln!("narrator error: {err:#}");
                    if err
                        .downcast_ref::<GatewayError>()
                        .is_some_and(GatewayError::is_missing_credential)
                    {
                        println!("Set one with /key <api-key> or OPENAI_API_KEY.");
                    }
                }
            }
            _ => println!("Unknown command: {}", intent.raw.trim()),
        }
    }

    Ok(())
}

fn run_scenarios(args: ScenariosArgs) -> Result<i32> {
    let registry = load_registry(args.scenarios.as_deref())?;
    print_scenarios(&registry, None);
    Ok(0)
}

fn run_key(args: KeyArgs) -> Result<i32> {
    let api_base = gateway_config(args.api_base.as_deref(), DEFAULT_TEXT_MODEL, DEFAULT_IMAGE_MODEL)
        .api_base;
    let mut credentials = open_credentials(args.cookie_jar, &api_base)?;
    match args.value.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => {
            let mut field = PromptKeyField::default();
            field.set_value(value);
            credentials.on_key_input(&field, None)?;
            if !credentials.is_valid() {
                println!("Saved, but the key looks too short to be valid.");
                return Ok(1);
            }
            println!("Saved API key {}", mask_credential(credentials.get()));
            Ok(0)
        }
        None => {
            let stored = credentials.stored();
            if stored.is_empty() {
                println!("No API key stored.");
                return Ok(1);
            }
            println!("Stored API key {}", mask_credential(&stored));
            Ok(0)
        }
    }
}

fn load_registry(path: Option<&Path>) -> Result<ScenarioRegistry> {
    match path {
        Some(path) => ScenarioRegistry::with_file(path),
        None => Ok(ScenarioRegistry::default()),
    }
}

fn gateway_config(api_base: Option<&str>, text_model: &str, image_model: &str) -> GatewayConfig {
    let mut config = GatewayConfig::from_env();
    if let Some(base) = api_base.filter(|base| !base.trim().is_empty()) {
        config.api_base = base.to_string();
    }
    config.text_model = text_model.trim().to_string();
    config.image_model = image_model.trim().to_string();
    config.normalized()
}

fn open_credentials(cookie_jar: Option<PathBuf>, api_base: &str) -> Result<CredentialStore> {
    let path = match cookie_jar {
        Some(path) => path,
        None => default_cookie_jar()?,
    };
    tracing::debug!(path = %path.display(), cookie = API_KEY_COOKIE_NAME, "using cookie jar");
    Ok(CredentialStore::for_origin(
        Box::new(FileCookieJar::new(path)),
        api_base,
    ))
}

fn default_cookie_jar() -> Result<PathBuf> {
    let base = dirs::config_dir().context("no config directory for the cookie jar; pass --cookie-jar")?;
    Ok(base.join("narrator").join("cookies.txt"))
}

fn print_opening(scenario: &ScenarioSpec) {
    println!();
    println!("== {} ==", scenario.title);
    println!("{}", scenario.opening.trim_end());
}

fn print_scenarios(registry: &ScenarioRegistry, current: Option<&str>) {
    for scenario in registry.list() {
        let marker = if current == Some(scenario.name.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{marker} {:<16} {}", scenario.name, scenario.title);
    }
}

fn print_log(log: &[LogEntry], out_dir: &Path) {
    if log.is_empty() {
        println!("(no turns yet)");
        return;
    }
    for (index, entry) in log.iter().enumerate() {
        println!("--- {} [{}] ---", index + 1, entry.recorded_at);
        println!("{}", entry.display_text().trim_end());
        match entry.image.as_ref() {
            Some(SceneImage::Url(url)) => println!("[scene: {url}]"),
            Some(SceneImage::Base64(b64)) => {
                println!("[scene: {}]", out_dir.join(scene_file_name(b64)).display())
            }
            None => println!("[no scene]"),
        }
    }
}

/// Content-addressed file name for a base64 scene.
fn scene_file_name(b64: &str) -> String {
    let digest = Sha256::digest(b64.as_bytes());
    format!("scene-{}.png", &hex::encode(digest)[..12])
}

/// Applies the key field. An unwritable jar keeps the key for this session only.
fn submit_key(
    credentials: &mut CredentialStore,
    field: &PromptKeyField,
    prompt: Option<&mut dyn FocusTarget>,
) {
    if let Err(err) = credentials.on_key_input(field, prompt) {
        tracing::warn!(error = %format!("{err:#}"), "could not save api key");
        println!("API key set for this session only; saving it failed: {err:#}");
    }
}

/// Writes scenes to disk and narration to stdout.
struct TerminalSink {
    out_dir: PathBuf,
}

impl TerminalSink {
    fn new(out_dir: &Path) -> Self {
        Self {
            out_dir: out_dir.to_path_buf(),
        }
    }

    fn save_scene(&self, b64: &str) -> Result<(PathBuf, u32, u32)> {
        let bytes = BASE64
            .decode(b64.trim())
            .context("scene image is not valid base64")?;
        let decoded = image::load_from_memory(&bytes).context("scene image is not a valid PNG")?;
        fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("failed to create {}", self.out_dir.display()))?;
        let path = self.out_dir.join(scene_file_name(b64));
        fs::write(&path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;
        Ok((path, decoded.width(), decoded.height()))
    }
}

impl SceneSink for TerminalSink {
    fn action_accepted(&mut self, _action: &str) {
        println!("...");
    }

    fn show_reply(&mut self, reply: &str) {
        println!();
        println!("{}", reply.trim_end());
    }

    fn show_image(&mut self, image: &SceneImage) {
        match image {
            SceneImage::Url(url) => println!("[scene: {url}]"),
            SceneImage::Base64(b64) => match self.save_scene(b64) {
                Ok((path, width, height)) => {
                    println!("[scene: {} ({width}x{height})]", path.display())
                }
                Err(err) => tracing::warn!(error = %format!("{err:#}"), "could not save scene"),
            },
        }
    }

    fn image_failed(&mut self, error: &GatewayError) {
        println!("[no scene this turn: {error}]");
    }

    fn log_appended(&mut self, entry: &LogEntry) {
        tracing::debug!(
            action = entry.action.as_deref().unwrap_or_default(),
            has_image = entry.image.is_some(),
            "log entry appended"
        );
    }
}

struct TerminalAlert;

impl AlertSink for TerminalAlert {
    fn alert(&self, message: &str) {
        eprintln!("! {message}");
    }
}

/// In-memory stand-in for the key input box.
#[derive(Default)]
struct PromptKeyField {
    value: String,
}

impl KeyField for PromptKeyField {
    fn value(&self) -> String {
        self.value.clone()
    }

    fn set_value(&mut self, value: &str) {
        self.value = value.to_string();
    }
}

struct ActionPrompt;

impl FocusTarget for ActionPrompt {
    fn focus(&mut self) {
        println!("API key updated. What do you do next?");
    }
}
