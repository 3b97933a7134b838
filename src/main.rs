use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use flower_light_ble::domain::models::{DeviceEvent, Rgb};
use flower_light_ble::domain::settings::SettingsService;
use flower_light_ble::infrastructure::bluetooth::protocol;
use flower_light_ble::infrastructure::bluetooth::{
    BtleplugTransport, ConnectionConfig, ConnectionManager, Customization, TurnOn,
};
use flower_light_ble::infrastructure::logging::init_logger;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "flower_light_ble")]
#[command(about = "Control a BLE flower lamp")]
struct Args {
    /// Peer address (AA:BB:CC:DD:EE:FF) or platform id; defaults to the last connected device
    #[arg(long, global = true)]
    address: Option<String>,

    /// Display name to use until the device reports its own
    #[arg(long, global = true)]
    name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List nearby peers
    Scan,
    /// Turn the light on
    On {
        #[arg(long, value_parser = parse_rgb)]
        color: Option<Rgb>,
        #[arg(long, allow_negative_numbers = true)]
        brightness: Option<i32>,
        #[arg(long, allow_negative_numbers = true)]
        petals: Option<i32>,
        #[arg(long)]
        transition: Option<u32>,
    },
    /// Turn the light off
    Off {
        #[arg(long)]
        transition: Option<u32>,
    },
    /// Change colour, as r,g,b or #rrggbb
    Color {
        #[arg(value_parser = parse_rgb)]
        rgb: Rgb,
        #[arg(long)]
        transition: Option<u32>,
    },
    /// Open the petals to a percentage
    Petals {
        #[arg(allow_negative_numbers = true)]
        level: i32,
        #[arg(long)]
        transition: Option<u32>,
    },
    /// Play a built-in animation
    Animation { id: u8 },
    /// Set the stored brightness configuration
    BrightnessConfig {
        #[arg(allow_negative_numbers = true)]
        level: i32,
    },
    /// Write device-side configuration
    Customize {
        #[arg(long, allow_negative_numbers = true)]
        speed: Option<i32>,
        #[arg(long, allow_negative_numbers = true)]
        brightness: Option<i32>,
        #[arg(long, allow_negative_numbers = true)]
        max_open: Option<i32>,
    },
    /// Store the animation palette, 1 to 10 colours
    ColorScheme {
        #[arg(required = true, num_args = 1..=10, value_parser = parse_rgb)]
        colors: Vec<Rgb>,
    },
    /// Rename the device
    Name { name: String },
    /// Read the battery level and power source
    Battery,
    /// Read the Wi-Fi status
    Wifi,
    /// Print device information
    Info,
    /// Print events until interrupted
    Watch,
}

fn parse_rgb(value: &str) -> Result<Rgb, String> {
    if let Some(hex) = value.strip_prefix('#') {
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(format!("expected #rrggbb, got {}", value));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| format!("{}: {}", value, e))
        };
        return Ok(Rgb::new(channel(0)?, channel(2)?, channel(4)?));
    }

    let channels = value
        .split(',')
        .map(|part| part.trim().parse::<u8>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("{}: {}", value, e))?;
    match channels.as_slice() {
        [r, g, b] => Ok(Rgb::new(*r, *g, *b)),
        _ => Err(format!("expected r,g,b, got {}", value)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings_service = SettingsService::new()?;
    let _guard = init_logger(&settings_service.get().log_settings)?;

    let settings = settings_service.get().clone();
    let transport = BtleplugTransport::new(&settings)
        .await
        .context("Failed to open the Bluetooth adapter")?;

    if let Command::Scan = args.command {
        for peer in transport.scan().await? {
            println!(
                "{}  {}  {}  rssi={}",
                peer.address,
                peer.id,
                peer.local_name.as_deref().unwrap_or("-"),
                peer.rssi.map_or("-".to_string(), |rssi| rssi.to_string()),
            );
        }
        return Ok(());
    }

    let Some(address) = args
        .address
        .or_else(|| settings.device.last_connected_address.clone())
    else {
        bail!("No --address given and no previously connected device");
    };
    let name = args.name.or_else(|| settings.device.name_hint.clone());

    let config = ConnectionConfig::from_settings(&settings)
        .context("Invalid characteristic configuration")?;
    let manager = ConnectionManager::new(transport, address.as_str(), name.as_deref(), config);

    let report = manager
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", address))?;
    for (step, reason) in report.failures() {
        info!("Setup step {:?} did not complete: {}", step, reason);
    }
    settings_service.add_known_address(&address)?;

    let result = run(&manager, args.command).await;
    manager.disconnect().await;
    result
}

async fn run(
    manager: &ConnectionManager<BtleplugTransport>,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::Scan => {}
        Command::On {
            color,
            brightness,
            petals,
            transition,
        } => {
            manager
                .turn_on(TurnOn {
                    rgb: color,
                    brightness,
                    petal_position: petals,
                    transition_ms: transition,
                })
                .await?
        }
        Command::Off { transition } => manager.turn_off(transition).await?,
        Command::Color { rgb, transition } => manager.set_color(rgb, transition).await?,
        Command::Petals { level, transition } => {
            manager.set_petal_position(level, transition).await?
        }
        Command::Animation { id } => manager.play_animation(id).await?,
        Command::BrightnessConfig { level } => manager.set_brightness_config(level).await?,
        Command::Customize {
            speed,
            brightness,
            max_open,
        } => {
            manager
                .set_customization(Customization {
                    speed,
                    brightness,
                    max_open,
                })
                .await?
        }
        Command::Name { name } => manager.set_name(&name).await?,
        Command::ColorScheme { colors } => manager.set_color_scheme(&colors).await?,
        Command::Battery => {
            let pct = manager.update_battery().await?;
            match manager.update_power_source().await {
                Ok(source) => println!("{}% ({})", pct, source),
                Err(e) => {
                    info!("Power source unavailable: {}", e);
                    println!("{}%", pct)
                }
            }
        }
        Command::Wifi => println!("{}", manager.update_wifi_status().await?),
        Command::Info => {
            let state = manager.snapshot();
            let or_dash = |value: Option<&str>| value.unwrap_or("-").to_string();
            let pct = |value: Option<u8>| value.map_or("-".to_string(), |v| format!("{}%", v));
            println!("Name:          {}", state.display_name());
            println!("Address:       {}", state.address());
            println!("Manufacturer:  {}", or_dash(state.manufacturer()));
            println!("Model:         {}", or_dash(state.model()));
            println!("Firmware:      {}", or_dash(state.firmware_version()));
            println!("Hardware:      {}", or_dash(state.hardware_revision()));
            println!("Serial:        {}", or_dash(state.serial_number()));
            println!("Brightness:    {}", pct(state.brightness_config_pct()));
            println!("Max open:      {}", pct(state.max_open_pct()));
            println!(
                "Speed:         {}",
                state
                    .animation_speed()
                    .map_or("-".to_string(), |v| v.to_string())
            );
            println!(
                "Wi-Fi:         {}",
                state
                    .wifi_status()
                    .map_or("-".to_string(), |status| status.to_string())
            );
            if let Some(scheme) = state.color_scheme() {
                let colors: Vec<String> = scheme
                    .iter()
                    .map(|c| format!("#{:02x}{:02x}{:02x}", c.r, c.g, c.b))
                    .collect();
                println!("Color scheme:  {}", colors.join(" "));
            }
        }
        Command::Watch => {
            let mut events = manager.subscribe();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Some(DeviceEvent::StateChanged { payload }) => {
                            println!("state changed: {}", protocol::hex(&payload))
                        }
                        Some(DeviceEvent::BatteryChanged {
                            battery_pct,
                            power_source,
                        }) => println!(
                            "battery: {} ({})",
                            battery_pct.map_or("?".to_string(), |pct| format!("{}%", pct)),
                            power_source.map_or("?".to_string(), |source| source.to_string()),
                        ),
                        Some(DeviceEvent::WifiStatusChanged { status }) => {
                            println!("wifi: {}", status)
                        }
                        Some(DeviceEvent::Disconnected) => {
                            println!("disconnected");
                            break;
                        }
                        Some(DeviceEvent::Connected) => println!("connected"),
                        None => break,
                    },
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rgb() {
        assert_eq!(parse_rgb("255, 128,0"), Ok(Rgb::new(255, 128, 0)));
        assert_eq!(parse_rgb("#FF8000"), Ok(Rgb::new(255, 128, 0)));
        assert!(parse_rgb("1,2").is_err());
        assert!(parse_rgb("256,0,0").is_err());
        assert!(parse_rgb("#ff80").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args =
            Args::try_parse_from(["flower_light_ble", "--address", "AA:BB", "petals", "-5"])
                .unwrap();
        assert_eq!(args.address.as_deref(), Some("AA:BB"));
        assert!(matches!(args.command, Command::Petals { level: -5, .. }));
    }

    #[test]
    fn test_customize_accepts_negative_values() {
        let args = Args::try_parse_from(["flower_light_ble", "customize", "--max-open", "-5"])
            .unwrap();
        assert!(matches!(
            args.command,
            Command::Customize {
                max_open: Some(-5),
                speed: None,
                brightness: None,
            }
        ));

        let args = Args::try_parse_from([
            "flower_light_ble",
            "customize",
            "--speed",
            "-1",
            "--brightness",
            "-20",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Command::Customize {
                speed: Some(-1),
                brightness: Some(-20),
                ..
            }
        ));
    }

    #[test]
    fn test_color_scheme_args() {
        let args = Args::try_parse_from(["flower_light_ble", "color-scheme", "#ff0000", "0,0,255"])
            .unwrap();
        match args.command {
            Command::ColorScheme { colors } => {
                assert_eq!(colors, vec![Rgb::new(255, 0, 0), Rgb::new(0, 0, 255)])
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Args::try_parse_from(["flower_light_ble", "color-scheme"]).is_err());
    }
}
