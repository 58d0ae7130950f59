use megalink_session::{timeouts, HttpMethod};

use crate::cmd::DemoArgs;
use crate::exit::{session_error, CliResult, SUCCESS};

/// Walks the whole protocol surface against the simulated coprocessor:
/// version, scan, association, TCP echo, and an HTTP fetch.
pub fn run(args: DemoArgs) -> CliResult<i32> {
    let (mut session, sim) = crate::cmd::sim_session()?;
    sim.borrow_mut().set_join_delay(args.join_delay);
    sim.borrow_mut().set_http_body(b"hello from megalink");

    let version = session
        .version()
        .map_err(|err| session_error("version", err))?;
    println!("firmware: {version}");

    let entries = session
        .ap_scan()
        .map_err(|err| session_error("scan", err))?;
    println!("networks: {}", entries.len());
    for entry in &entries {
        println!("  {} ({} dBm)", entry.ssid, entry.rssi);
    }

    session
        .ap_join(0)
        .map_err(|err| session_error("join", err))?;
    session
        .assoc_wait(timeouts::ASSOC)
        .map_err(|err| session_error("associate", err))?;
    println!("associated after {} ticks", session.scheduler().ticks().elapsed());

    session
        .tcp_connect(1, "echo.example.com", 7)
        .map_err(|err| session_error("connect", err))?;
    session
        .send_data(1, b"ping", timeouts::DEFAULT)
        .map_err(|err| session_error("send", err))?;
    let echoed = session
        .recv_data(timeouts::DEFAULT)
        .map_err(|err| session_error("recv", err))?;
    println!(
        "tcp echo: {}",
        String::from_utf8_lossy(&echoed.payload)
    );
    session.close(1).map_err(|err| session_error("close", err))?;

    session
        .http_url_set("http://example.com/motd")
        .map_err(|err| session_error("http url", err))?;
    session
        .http_method_set(HttpMethod::Get)
        .map_err(|err| session_error("http method", err))?;
    session
        .http_open(0)
        .map_err(|err| session_error("http open", err))?;
    let status = session
        .http_finish()
        .map_err(|err| session_error("http finish", err))?;
    let body = session
        .recv_data(timeouts::HTTP)
        .map_err(|err| session_error("http body", err))?;
    println!(
        "http {}: {}",
        status.code,
        String::from_utf8_lossy(&body.payload)
    );

    Ok(SUCCESS)
}
