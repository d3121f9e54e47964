use anyhow::{bail, Context};
use polarprint::{
    build_controller, discovery_config, init_logging, list_ports, Config, ConcentricRings,
    DeviceDiscovery, DeviceListener, FileSink, PrintJob, SerialOpener, BUILD_DATE, VERSION,
};
use std::path::{Path, PathBuf};

const USAGE: &str = "\
Usage:
    polarprint ports
    polarprint status [config]
    polarprint dry-run <out.bin> [config] [layers]";

/// Reports discovery progress through the log
struct LogListener;

impl DeviceListener for LogListener {
    fn on_probe(&self, port: &str, attempt: u32) {
        tracing::info!("Probing {} (attempt {})", port, attempt);
    }

    fn on_version_mismatch(&self, port: &str, expected: u16, actual: u16) {
        tracing::warn!(
            "{} runs firmware {}, expected {}",
            port,
            actual,
            expected
        );
    }

    fn on_disabled(&self, reason: &str) {
        tracing::error!("Link disabled: {}", reason);
    }
}

fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let path = path.map(PathBuf::from);
    Config::load_or_default(path.as_deref()).context("loading configuration")
}

fn ports() -> anyhow::Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No candidate ports found");
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}\t{}\t{:04x}:{:04x}",
                port.port_name, port.description, vid, pid
            ),
            _ => println!("{}\t{}", port.port_name, port.description),
        }
    }
    Ok(())
}

fn status(config: &Config) -> anyhow::Result<()> {
    let discovery = discovery_config(config);
    let timeout = discovery.timeout;
    let opener = SerialOpener::new(config.connection.baud_rate);
    let listener = LogListener;
    let connection = DeviceDiscovery::new(&opener, discovery)
        .with_listener(&listener)
        .connect()?;

    println!("Port:      {}", connection.port);
    println!("Firmware:  {}", connection.version);
    let Some(status) = connection.transport.wait_for_status(timeout) else {
        bail!("no status frame from {} within {:?}", connection.port, timeout);
    };
    println!("Heaters:   {} {}", status.heaters[0], status.heaters[1]);
    println!("RX space:  {}", status.rx_available);
    println!("Motor queue: {}", status.motor_queue_available);
    println!("Homing:    {}", if status.seeking { "yes" } else { "no" });
    Ok(())
}

fn dry_run(out: &Path, config: &Config, layers: usize) -> anyhow::Result<()> {
    let sink = FileSink::create(out)?;
    let mut controller = build_controller(config, Box::new(sink))?;
    let mut job = PrintJob::new(Box::new(ConcentricRings::two_materials(layers)));
    let progress = job.run_to_completion(&mut controller)?;

    let bytes = std::fs::metadata(out)
        .with_context(|| format!("reading {}", out.display()))?
        .len();
    println!(
        "{} layers, {} packets, {} bytes written to {}",
        progress.layer,
        controller.packets_sent(),
        bytes,
        out.display()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_logging()?;
    tracing::debug!("polarprint {} built {}", VERSION, BUILD_DATE);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["ports"] => ports(),
        ["status", rest @ ..] if rest.len() <= 1 => {
            let config = load_config(rest.first().copied())?;
            status(&config)
        }
        ["dry-run", out, rest @ ..] if rest.len() <= 2 => {
            let config = load_config(rest.first().copied())?;
            let layers = match rest.get(1) {
                Some(n) => n
                    .parse()
                    .with_context(|| format!("invalid layer count '{}'", n))?,
                None => 1,
            };
            dry_run(Path::new(out), &config, layers)
        }
        ["--version"] | ["version"] => {
            println!("polarprint {} ({})", VERSION, BUILD_DATE);
            Ok(())
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}
