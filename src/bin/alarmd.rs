use alarm_clock_engine::device::{host_devices, HostControls};
use alarm_clock_engine::*;
use std::env;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, Duration};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    // Logs go to stderr so stdout carries only protocol replies
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("alarm_clock_engine=warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
    color_eyre::install()?;

    let usage = "Usage: alarmd [settings.toml]";
    let args: Vec<_> = env::args().collect();
    if args.len() > 2 || args.get(1).is_some_and(|a| a == "-h" || a == "--help") {
        eprintln!("{usage}");
        std::process::exit(if args.len() > 2 { 1 } else { 0 });
    }
    let settings = Settings::load(args.get(1).map_or("alarm.toml", |s| s.as_str()))?;

    let store = FileStore::open(&settings.store_path, settings.store_size)?;
    let (devices, controls) = host_devices(&settings);
    let mut engine = AlarmEngine::new(
        devices,
        Box::new(DirStorage::new(&settings.media_dir)),
        Box::new(store),
        settings.config.clone(),
    );

    // Inform about successful initialization
    println!("OK");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = interval(Duration::from_millis(settings.tick_ms));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = engine.now();
                if let Some(slot) = engine.check_for_alarms(now) {
                    println!("ALARM {slot}");
                }
                engine.process_alarm_events();
            }
            line = lines.next_line() => {
                let Some(input) = line? else {
                    // stdin closed
                    engine.stop();
                    return Ok(());
                };
                match handle(&mut engine, &controls, input.trim()) {
                    Ok(Some(reply)) => println!("OK {reply}"),
                    Ok(None) => println!("OK"),
                    Err(e) => eprintln!("ERR {e}"),
                }
            }
        }
    }
}

/// Runs one protocol command. `Ok(Some(..))` carries extra reply text.
fn handle(
    engine: &mut AlarmEngine,
    controls: &HostControls,
    input: &str,
) -> std::result::Result<Option<String>, String> {
    let mut cmd = input.split(':');
    match (cmd.next(), cmd.next()) {
        (Some("stop"), None) => engine.stop(),
        (Some("snooze"), None) => engine.snooze(),
        (Some("resume"), None) => engine.resume(),
        (Some("status"), None) => return Ok(Some(status(engine))),
        (Some("switch"), Some(state)) => match state.trim() {
            "on" => controls.switch.set(true),
            "off" => controls.switch.set(false),
            other => return Err(format!("Invalid switch state: {other}")),
        },
        (Some("power"), Some(mode)) => {
            let mode = match mode.trim() {
                "normal" => PowerMode::Normal,
                "low" => PowerMode::LowPower,
                "suspend" => PowerMode::Suspend,
                other => return Err(format!("Invalid power mode: {other}")),
            };
            controls.power.set(mode);
        }
        (Some("test"), Some(kind)) => {
            let mode = match kind.trim() {
                "audio" => PlayMode::test_audio(),
                "visual" => PlayMode::test_visual(),
                "profile" => PlayMode::test_profile(),
                other => return Err(format!("Invalid test kind: {other}")),
            };
            engine.play(mode);
        }
        (Some("next_file"), None) => {
            if !engine.open_next_file() {
                return Err("No audio file available".into());
            }
            return Ok(Some(engine.profile().filename.clone()));
        }
        (Some(""), None) | (None, _) => return Err("No command given".into()),
        (Some(other), _) => return Err(format!("Unknown command: {other}")),
    }
    Ok(None)
}

fn status(engine: &AlarmEngine) -> String {
    let state = match engine.play_state() {
        PlayState::Off => "off".to_string(),
        PlayState::Active(mode) => format!("active {:?}", mode.kind),
        PlayState::Snoozing(mode) => format!(
            "snoozing {:?} {}s",
            mode.kind,
            engine.snooze_time_remaining()
        ),
    };
    format!(
        "{} switch={} card={}",
        state,
        if engine.is_alarm_switch_on() { "on" } else { "off" },
        if engine.is_sd_card_present() { "yes" } else { "no" }
    )
}
