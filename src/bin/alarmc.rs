use alarm_clock_engine::device::{host_devices, HostControls};
use alarm_clock_engine::schedule::{format_days, parse_days};
use alarm_clock_engine::storage::DEBOUNCE_MS;
use alarm_clock_engine::*;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{eyre, Result};
use std::path::PathBuf;
use tokio::time::{interval, Duration, Instant};
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (TOML); defaults are used when it does not exist
    #[arg(short, long, default_value = "alarm.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum, Debug)]
enum VisualArg {
    /// Leave the strip alone
    None,
    /// Blink the idle colour
    Flashing,
    /// Blink in red
    RedFlash,
    /// Alternate white and the idle colour
    WhiteFlash,
    /// Breathe the brightness
    Fading,
    /// Cycle through the colour wheel
    Rainbow,
}

impl From<VisualArg> for VisualMode {
    fn from(arg: VisualArg) -> Self {
        match arg {
            VisualArg::None => VisualMode::None,
            VisualArg::Flashing => VisualMode::Flashing,
            VisualArg::RedFlash => VisualMode::RedFlash,
            VisualArg::WhiteFlash => VisualMode::WhiteFlash,
            VisualArg::Fading => VisualMode::Fading,
            VisualArg::Rainbow => VisualMode::Rainbow,
        }
    }
}

#[derive(Clone, Copy, ValueEnum, Debug)]
enum PreviewKind {
    /// Audio only
    Audio,
    /// Light effect and night lamp only
    Visual,
    /// Everything a real alarm would do
    Profile,
}

impl std::fmt::Display for PreviewKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreviewKind::Audio => write!(f, "audio"),
            PreviewKind::Visual => write!(f, "visual"),
            PreviewKind::Profile => write!(f, "profile"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the alarm clock until interrupted
    Run,
    /// Print an alarm profile
    Show {
        /// Alarm slot (0 or 1)
        slot: usize,
    },
    /// Edit an alarm profile; unset options keep their value
    Set {
        /// Alarm slot (0 or 1)
        slot: usize,
        /// Hour (0-23)
        #[arg(long)]
        hour: Option<u8>,
        /// Minute (0-59)
        #[arg(short, long)]
        minute: Option<u8>,
        /// Days (mon,tue,wed,thu,fri,sat,sun,all,weekdays,weekend,none)
        #[arg(short, long)]
        days: Option<String>,
        /// Audio file on the card; empty for the built-in tone
        #[arg(short, long)]
        file: Option<String>,
        /// Volume (0-100)
        #[arg(short, long)]
        volume: Option<u8>,
        /// Snooze minutes (0-60); 0 makes snooze stop the alarm
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=60))]
        snooze: Option<u8>,
        /// Light effect
        #[arg(long, value_enum)]
        visual: Option<VisualArg>,
        /// Effect speed (1-10)
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
        speed: Option<u8>,
        /// Text shown while ringing
        #[arg(long)]
        message: Option<String>,
    },
    /// Enable or disable an alarm slot
    Enable {
        /// Alarm slot (0 or 1)
        slot: usize,
        /// on or off
        #[arg(value_parser = parse_switch)]
        state: bool,
    },
    /// Show which alarm fires next
    Next,
    /// Play a profile for a few seconds
    Preview {
        /// Alarm slot (0 or 1)
        slot: usize,
        /// What to preview
        #[arg(short, long, value_enum, default_value_t = PreviewKind::Profile)]
        kind: PreviewKind,
        /// Preview length in seconds
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,
    },
}

fn parse_switch(value: &str) -> std::result::Result<bool, String> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(format!("expected on or off, got '{}'", other)),
    }
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("alarm_clock_engine=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    let mut settings = Settings::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let (mut engine, _controls) = build_engine(&settings)?;
            run(&mut engine, settings.tick_ms).await?;
        }
        Commands::Show { slot } => {
            let (mut engine, _) = build_engine(&settings)?;
            load_slot(&mut engine, slot)?;
            print_profile(slot, engine.profile(), engine.is_alarm_enabled(slot));
        }
        Commands::Set {
            slot,
            hour,
            minute,
            days,
            file,
            volume,
            snooze,
            visual,
            speed,
            message,
        } => {
            let (mut engine, _) = build_engine(&settings)?;
            load_slot(&mut engine, slot)?;
            let profile = engine.profile_mut();
            if let Some(hour) = hour {
                if hour > 23 {
                    return Err(eyre!("Hour must be between 0 and 23"));
                }
                profile.hour = hour;
            }
            if let Some(minute) = minute {
                if minute > 59 {
                    return Err(eyre!("Minute must be between 0 and 59"));
                }
                profile.minute = minute;
            }
            if let Some(days) = days {
                profile.days = parse_days(&days);
                debug!("Days value: {:#04x}", profile.days);
            }
            if let Some(file) = file {
                profile.filename = file;
            }
            if let Some(snooze) = snooze {
                profile.snooze_delay = snooze;
            }
            if let Some(visual) = visual {
                profile.visual_mode = visual.into();
            }
            if let Some(speed) = speed {
                profile.effect_speed = speed;
            }
            if let Some(message) = message {
                profile.message = message;
            }
            if let Some(volume) = volume {
                engine.set_volume(volume);
            }
            if !engine.save_profile(slot) {
                return Err(eyre!("Could not save alarm {}", slot));
            }
            print_profile(slot, engine.profile(), engine.is_alarm_enabled(slot));
        }
        Commands::Enable { slot, state } => {
            settings.config.set_alarm_enabled(slot, state)?;
            settings.save(&cli.config)?;
            info!(
                "Alarm {} {}",
                slot,
                if state { "enabled" } else { "disabled" }
            );
        }
        Commands::Next => {
            let (engine, _) = build_engine(&settings)?;
            let now = engine.now();
            match (engine.next_alarm_id(&now), engine.next_alarm_offset(&now)) {
                (Some(id), Some(offset)) => println!(
                    "Alarm {} in {}h {:02}m",
                    id,
                    offset / 60,
                    offset % 60
                ),
                _ => println!("No alarm scheduled"),
            }
        }
        Commands::Preview {
            slot,
            kind,
            seconds,
        } => {
            let (mut engine, _) = build_engine(&settings)?;
            load_slot(&mut engine, slot)?;
            preview(&mut engine, kind, seconds, settings.tick_ms).await;
        }
    }

    Ok(())
}

fn build_engine(settings: &Settings) -> Result<(AlarmEngine, HostControls)> {
    let store = FileStore::open(&settings.store_path, settings.store_size)?;
    let (devices, controls) = host_devices(settings);
    let engine = AlarmEngine::new(
        devices,
        Box::new(DirStorage::new(&settings.media_dir)),
        Box::new(store),
        settings.config.clone(),
    );
    Ok((engine, controls))
}

fn load_slot(engine: &mut AlarmEngine, slot: usize) -> Result<()> {
    if !engine.load_profile(slot) {
        return Err(eyre!("No alarm slot {}", slot));
    }
    Ok(())
}

fn print_profile(slot: usize, profile: &AlarmProfile, enabled: bool) {
    println!(
        "Alarm {} ({})",
        slot,
        if enabled { "enabled" } else { "disabled" }
    );
    println!("  time:    {:02}:{:02}", profile.hour, profile.minute);
    println!("  days:    {}", format_days(profile.days));
    let file = if profile.filename.is_empty() {
        "<built-in tone>"
    } else {
        profile.filename.as_str()
    };
    println!("  file:    {}", file);
    println!("  volume:  {}", profile.volume);
    println!("  snooze:  {} min", profile.snooze_delay);
    println!(
        "  visual:  {} (speed {})",
        profile.visual_mode, profile.effect_speed
    );
    if !profile.message.is_empty() {
        println!("  message: {}", profile.message);
    }
}

/// Ticks until the card debounce has had a chance to finish
async fn settle_storage(engine: &mut AlarmEngine, tick_ms: u64) {
    let deadline = Instant::now() + Duration::from_millis(DEBOUNCE_MS + 2 * tick_ms);
    let mut ticker = interval(Duration::from_millis(tick_ms));
    while !engine.is_sd_card_present() && Instant::now() < deadline {
        ticker.tick().await;
        engine.process_alarm_events();
    }
    if !engine.is_sd_card_present() {
        warn!("No storage card, previews use the built-in tone");
    }
}

#[instrument(skip(engine))]
async fn preview(engine: &mut AlarmEngine, kind: PreviewKind, seconds: u64, tick_ms: u64) {
    settle_storage(engine, tick_ms).await;
    let mode = match kind {
        PreviewKind::Audio => PlayMode::test_audio(),
        PreviewKind::Visual => PlayMode::test_visual(),
        PreviewKind::Profile => PlayMode::test_profile(),
    };
    info!("Previewing {} for {}s", kind, seconds);
    engine.play(mode);

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut ticker = interval(Duration::from_millis(tick_ms));
    while Instant::now() < deadline && engine.is_playing() {
        ticker.tick().await;
        engine.process_alarm_events();
    }
    engine.stop();
    info!("Preview finished");
}

#[instrument(skip(engine))]
async fn run(engine: &mut AlarmEngine, tick_ms: u64) -> Result<()> {
    let now = engine.now();
    match engine.next_alarm_offset(&now) {
        Some(offset) => info!("Alarm clock running, next alarm in {} minutes", offset),
        None => info!("Alarm clock running, no alarm scheduled"),
    }

    let mut ticker = interval(Duration::from_millis(tick_ms));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = engine.now();
                if let Some(slot) = engine.check_for_alarms(now) {
                    info!("Alarm {} ringing", slot);
                }
                engine.process_alarm_events();
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                engine.stop();
                return Ok(());
            }
        }
    }
}
