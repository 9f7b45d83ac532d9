use anyhow::Result;
use loragate::digipeat;
use loragate::frame::Frame;

/// Print how a single TNC2 line parses and whether `callsign` would repeat it
pub fn handle_check(line: &str, callsign: &str) -> Result<()> {
    let frame = Frame::parse(line);

    if frame.is_passthrough() {
        println!("pass-through (not a TNC2 header): {}", frame);
        println!("digipeat: skip ({})", digipeat::Skip::Passthrough.as_str());
        return Ok(());
    }

    println!("source:      {}", frame.source);
    println!("destination: {}", frame.destination);
    println!("path:        {}", frame.path_strings().join(","));
    println!("info:        {}", frame.info);

    match digipeat::rewrite(&frame, callsign) {
        Ok(repeated) => println!("digipeat as {}: {}", callsign, repeated),
        Err(skip) => println!("digipeat as {}: skip ({})", callsign, skip.as_str()),
    }

    Ok(())
}
