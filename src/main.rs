use color_eyre::eyre::{Result, WrapErr};
use sentient_bridge::bridge::{AiBridge, BridgeConfig, BridgeParts};
use sentient_bridge::credential::FileCredentialStore;
use sentient_bridge::effects::{EffectRegistry, LoggedEffects};
use sentient_bridge::gemini::HttpTransport;
use sentient_bridge::geo::GeoCache;
use sentient_bridge::interceptor::{ChatEvent, ChatInterceptor, tagged};
use sentient_bridge::logging;
use sentient_bridge::orchestrator::{PhaseController, PhaseTimings, SharedWorldFlags};
use sentient_bridge::phase::GamePhaseCell;
use sentient_bridge::sentinel::SystemProcessSource;
use sentient_bridge::settings::{BridgeSettings, data_dir};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "Commands: /hostile /hunt /finish /spawn-hostile /death /away /key <value> /quit";

// Host stand-in: reads player chat from stdin and prints persona lines.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let settings = BridgeSettings::load().unwrap_or_else(|_| {
        let defaults = BridgeSettings::default();
        if let Err(e) = defaults.save() {
            eprintln!("Could not write default settings: {e}");
        }
        defaults
    });
    logging::init(&data_dir(), logging::parse_level(&settings.log_level))
        .wrap_err("failed to initialise logging")?;
    log::info!("Starting bridge host");

    let transport = Arc::new(HttpTransport::new(
        settings.connect_timeout(),
        settings.request_timeout(),
    )?);
    let geo = Arc::new(GeoCache::new());
    if settings.geolocation_enabled {
        let geo = Arc::clone(&geo);
        let client = transport.client().clone();
        tokio::spawn(async move {
            geo.fetch(&client).await;
        });
    }

    let game_phase = GamePhaseCell::new();
    let system_user = std::env::var("USERNAME")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_default();
    let sink: Arc<dyn Fn(String) + Send + Sync> = Arc::new(|line: String| println!("{line}"));

    let bridge = Arc::new(AiBridge::new(
        BridgeConfig::from(&settings),
        BridgeParts {
            transport,
            credentials: Arc::new(FileCredentialStore::default()),
            geo,
            game_phase: game_phase.clone(),
            system_user,
            broadcast: Arc::new(|reply: String| println!("{}", tagged(&reply))),
        },
    )?);
    bridge.start().await;

    let effects = EffectRegistry::new()
        .register(Arc::new(LoggedEffects))
        .resolve();
    let controller = Arc::new(PhaseController::new(
        game_phase,
        Arc::clone(&bridge),
        effects,
        PhaseTimings::from(&settings),
    )?);
    let world = Arc::new(SharedWorldFlags::new());
    world.update(|_| {});
    controller.start(world.clone(), Arc::new(SystemProcessSource));
    let interceptor = ChatInterceptor::new(Arc::clone(&controller), sink);

    println!("{HELP}");
    let mut companion_nearby = true;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line.split_once(' ').map_or((line, ""), |(c, rest)| (c, rest.trim())) {
                    ("/quit", _) => break,
                    ("/hostile", _) => world.update(|f| f.hostility_active = true),
                    ("/hunt", _) => world.update(|f| f.hunt_active = true),
                    ("/finish", _) => world.update(|f| f.session_concluded = true),
                    ("/spawn-hostile", _) => controller.on_hostile_spawn(),
                    ("/death", _) => {
                        let hostile = world_hostile(&world);
                        controller.on_companion_death(hostile);
                    }
                    ("/away", _) => {
                        companion_nearby = !companion_nearby;
                        println!("Companion nearby: {companion_nearby}");
                    }
                    ("/key", value) => {
                        if bridge.validate_credential(value).await {
                            bridge.save_and_activate_credential(value).await?;
                            println!("API key accepted");
                        } else {
                            println!("API key rejected");
                        }
                    }
                    (command, _) if command.starts_with('/') => println!("{HELP}"),
                    _ => {
                        interceptor.on_chat(ChatEvent {
                            player_name: "Player".to_string(),
                            message: line.to_string(),
                            biome: None,
                            companion_nearby,
                        });
                    }
                }
            }
        }
    }

    controller.shutdown().await;
    log::info!("Bridge host exited");
    Ok(())
}

fn world_hostile(world: &SharedWorldFlags) -> bool {
    use sentient_bridge::orchestrator::WorldStateSource;
    world.poll().is_some_and(|flags| flags.hostility_active)
}
