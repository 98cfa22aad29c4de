use anyhow::{bail, Context};
use chrono::DateTime;
use clap::Parser;
use pvlib_lib::constants::{INVALID_S32, INVALID_S64};
use pvlib_lib::plant::find_protocol;
use pvlib_lib::transport::find_connection;
use pvlib_lib::Plant;
use tracing_subscriber::EnvFilter;

const WEEK_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Parser)]
#[command(name = "pvlib", about = "Read SMA string inverters over Bluetooth")]
struct Args {
    /// Modules logging should be enabled for (may be given multiple times)
    #[arg(short = 'd', value_name = "MODULE")]
    log_modules: Vec<String>,

    /// Log severity: error, warning, info, debug or trace
    #[arg(short = 'l', value_name = "SEVERITY", default_value = "warning")]
    log_level: String,

    /// Read spot data
    #[arg(short = 's')]
    spot: bool,

    /// Read the event archive
    #[arg(short = 'e')]
    events: bool,

    /// Read the day-yield archive
    #[arg(short = 'y')]
    day_yield: bool,

    /// Read inverter info
    #[arg(short = 'i')]
    info: bool,

    /// Inverter bluetooth address, e.g. "00:11:22:33:44:55"
    mac: String,

    /// Plant password
    password: String,
}

fn init_logging(level: &str, modules: &[String]) -> anyhow::Result<()> {
    let level = match level {
        "error" => "error",
        "warning" => "warn",
        "info" => "info",
        "debug" => "debug",
        "trace" => "trace",
        other => bail!("invalid log severity: {other}"),
    };

    let mut filter = format!("pvlib_lib={level}");
    for module in modules {
        filter.push_str(&format!(",pvlib_lib::{module}=trace"));
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn date_string(time: i64) -> String {
    match DateTime::from_timestamp(time, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("@{time}"),
    }
}

fn fmt_s32(value: i32) -> String {
    if value == INVALID_S32 {
        "n/a".to_string()
    } else {
        value.to_string()
    }
}

fn fmt_s64(value: i64) -> String {
    if value == INVALID_S64 {
        "n/a".to_string()
    } else {
        value.to_string()
    }
}

async fn print_inverter_info(plant: &mut Plant, handle: u32) -> anyhow::Result<()> {
    let status = plant
        .get_status(handle)
        .await
        .context("get status failed")?;
    let info = plant
        .get_inverter_info(handle)
        .await
        .context("get info failed")?;

    println!("Manufacture: {}", info.manufacture);
    println!("Type: {}", info.device_type);
    println!("Name: {}", info.name);
    println!("Firmware: {}", info.firmware_version);
    println!("Status: {:?} ({})", status.kind, status.number);

    let stats = plant.get_stats(handle).await.context("get stats failed")?;
    println!("Total yield: {} Wh", fmt_s64(stats.total_yield));
    println!("Day yield: {} Wh", fmt_s64(stats.day_yield));
    println!("Operation time: {} s", fmt_s64(stats.operation_time));
    println!("Feed-in time: {} s", fmt_s64(stats.feed_in_time));
    Ok(())
}

async fn print_spot_data(plant: &mut Plant, handle: u32) -> anyhow::Result<()> {
    let ac = plant
        .get_ac_values(handle)
        .await
        .context("get live values failed")?;
    println!("Total power: {} W", fmt_s32(ac.total_power));
    println!("Frequency: {} mHz", fmt_s32(ac.frequency));
    for phase in 0..ac.phase_num as usize {
        println!(
            "Phase {}: {} W, {} mV, {} mA",
            phase + 1,
            fmt_s32(ac.power[phase]),
            fmt_s32(ac.voltage[phase]),
            fmt_s32(ac.current[phase])
        );
    }

    let dc = plant
        .get_dc_values(handle)
        .await
        .context("get live values failed")?;
    println!("Total DC power: {} W", fmt_s32(dc.total_power));
    for tracker in 0..dc.tracker_num as usize {
        println!(
            "Tracker {}: {} W, {} mV, {} mA",
            tracker + 1,
            fmt_s32(dc.power[tracker]),
            fmt_s32(dc.voltage[tracker]),
            fmt_s32(dc.current[tracker])
        );
    }
    Ok(())
}

async fn print_day_archive(plant: &mut Plant, handle: u32) -> anyhow::Result<()> {
    let to = chrono::Utc::now().timestamp();
    let from = to - WEEK_SECONDS;
    let days = plant
        .get_day_yield(handle, from, to)
        .await
        .context("get day yield failed")?;
    for day in days {
        println!("{}: {} Wh", date_string(day.date), day.day_yield);
    }
    Ok(())
}

async fn print_event_archive(plant: &mut Plant, handle: u32) -> anyhow::Result<()> {
    let to = chrono::Utc::now().timestamp();
    let from = to - WEEK_SECONDS;
    let events = plant
        .get_events(handle, from, to)
        .await
        .context("get events failed")?;
    for event in events {
        println!(
            "{}: {} ({})",
            date_string(event.time),
            event.message,
            event.value
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, &args.log_modules)?;

    let con = find_connection("rfcomm").context("connection rfcomm not available")?;
    let prot = find_protocol("smadata2plus").context("protocol smadata2plus not available")?;

    let mut plant = Plant::open(con, prot).context("failed opening plant")?;
    plant
        .connect(&args.mac, &args.password)
        .await
        .context("failed connecting with plant")?;

    let inverters = plant.device_handles();
    if inverters.is_empty() {
        bail!("no inverters found");
    }
    if inverters.len() > 1 {
        bail!(
            "{} inverters found, but only 1 is currently supported",
            inverters.len()
        );
    }
    let handle = inverters[0];

    let result: anyhow::Result<()> = async {
        if args.info {
            print_inverter_info(&mut plant, handle).await?;
        }
        if args.spot {
            print_spot_data(&mut plant, handle).await?;
        }
        if args.day_yield {
            print_day_archive(&mut plant, handle).await?;
        }
        if args.events {
            print_event_archive(&mut plant, handle).await?;
        }
        Ok(())
    }
    .await;

    plant.close();
    result
}
