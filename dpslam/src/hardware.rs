//! The hardware seam.
//!
//! Live operation would connect odometry, laser and drive here; this
//! build carries no drivers (playback is the supported data source), so
//! every connect reports failure and the binary exits the way a robot
//! with unplugged hardware would.

pub fn initialize() -> Result<(), String> {
    eprintln!("Connect Odometry.");
    connect_odometry()?;
    eprintln!("Connect Laser.");
    connect_laser()?;
    eprintln!("Connect Drive.");
    connect_drive()?;
    Ok(())
}

fn connect_odometry() -> Result<(), String> {
    Err("no odometry driver in this build; play back a log with -p or -P".to_string())
}

fn connect_laser() -> Result<(), String> {
    Err("no laser driver in this build".to_string())
}

fn connect_drive() -> Result<(), String> {
    Err("no drive driver in this build".to_string())
}
