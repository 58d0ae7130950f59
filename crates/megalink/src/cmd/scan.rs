use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

use megalink_session::ApSecurity;

use crate::cmd::ScanArgs;
use crate::exit::{session_error, CliResult, SUCCESS};

pub fn run(_args: ScanArgs) -> CliResult<i32> {
    let (mut session, _sim) = crate::cmd::sim_session()?;

    let entries = session
        .ap_scan()
        .map_err(|err| session_error("scan", err))?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["SSID", "SECURITY", "RSSI"]);
    for entry in &entries {
        table.add_row(vec![
            entry.ssid.clone(),
            security_name(entry.security).to_string(),
            format!("{} dBm", entry.rssi),
        ]);
    }
    println!("{table}");

    Ok(SUCCESS)
}

fn security_name(security: ApSecurity) -> &'static str {
    match security {
        ApSecurity::Open => "open",
        ApSecurity::Wep => "WEP",
        ApSecurity::WpaPsk => "WPA-PSK",
        ApSecurity::Wpa2Psk => "WPA2-PSK",
        ApSecurity::Unknown(_) => "unknown",
    }
}
