use anyhow::Result;
use std::path::Path;

use loragate::aprs_is::build_login_command;
use loragate::beacon::Telemetry;
use loragate::config::GatewayConfig;

/// Print the lines the gateway would send to APRS-IS for this config
pub fn handle_beacon(config_path: &Path) -> Result<()> {
    let config = GatewayConfig::load(config_path)?;
    let aprs_is = config.aprs_is_config();

    print!("{}", build_login_command(&aprs_is));

    match config.station_beacon().map(|(beacon, _)| beacon) {
        Some(beacon) => print!("{}", beacon.line()),
        None => println!("# no [beacon] section"),
    }

    if let Some(telemetry) = &config.telemetry {
        let volts = telemetry.fixed_volts.unwrap_or(0.0);
        let mut sequence = Telemetry::new(config.station.callsign.clone());
        print!("{}", sequence.next_line(volts));
    }

    Ok(())
}
