use std::io;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{Session, TranscriptProfile};

fn main() -> io::Result<()> {
    record_profile(TranscriptProfile::Session)?;
    record_profile(TranscriptProfile::Faults)?;
    Ok(())
}

fn record_profile(profile: TranscriptProfile) -> io::Result<()> {
    let mut session = Session::new(profile, None)?;
    match profile {
        TranscriptProfile::Session => record_session(&mut session),
        TranscriptProfile::Faults => record_faults(&mut session),
    }
}

fn record_session(session: &mut Session) -> io::Result<()> {
    for command in [
        "start",
        "mode ZPON",
        "pump toggle",
        "get mode",
        "pulse 250",
        "get pulse",
        "pulse 3",
        "get pulse",
        "current 6",
        "get current",
        "mode ZERO_0",
        "raw help mode",
        "raw ser",
        "raw count",
        "power off",
        "mode REST",
        "status",
    ] {
        let _ = session.handle_command(command)?;
    }
    Ok(())
}

fn record_faults(session: &mut Session) -> io::Result<()> {
    for command in [
        "mode EPON",
        "status",
        "drop 8",
        "mode APON",
        "status",
        "drop 1",
        "get mode",
        "pump off",
        "events",
    ] {
        let _ = session.handle_command(command)?;
    }
    Ok(())
}
