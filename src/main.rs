use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use env_logger::Env;

use dcm::config::CONFIG_FILE;
use dcm::frame::{HEADER_LEN, PROTOCOL_VERSION};
use dcm::schema::Domain;
use dcm::transport::available_ports;
use dcm::{
    validate, DeviceSession, FrameCodec, LinkConfig, MemoryStore, Mode, ParameterSchema,
    ParameterStore, RawInputs, SerialTransport, SimulatedPacemaker,
};

const SIMULATOR_ID: &str = "SIM-0001";
const BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];
/// Give up on a stream that has gone quiet for this long.
const STREAM_IDLE: Duration = Duration::from_secs(2);

struct Console {
    schema: ParameterSchema,
    codec: FrameCodec,
    config: LinkConfig,
    session: DeviceSession,
    store: MemoryStore,
    user: String,
    mode: Mode,
    inputs: RawInputs,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    println!("=================================");
    println!("  Pacemaker DCM (protocol v{})  ", PROTOCOL_VERSION);
    println!("=================================");

    let config = LinkConfig::load(Path::new(CONFIG_FILE)).context("load link settings")?;
    let schema = config.schema().context("load parameter schema")?;
    let codec = FrameCodec::new(&schema);

    let user = match prompt("Operator name (default: operator): ")?.as_str() {
        "" => "operator".to_string(),
        name => name.to_string(),
    };

    let store = MemoryStore::new();
    let mode = Mode::Vvi;
    let inputs = store.load_or_defaults(&schema, &user, mode);
    let mut console = Console {
        schema,
        codec,
        config,
        session: DeviceSession::new(),
        store,
        user,
        mode,
        inputs,
    };

    while !console.session.is_open() {
        connect(&mut console)?;
    }

    loop {
        println!("\nMode {} | {:?}", console.mode, console.session.state());
        println!("  1. Select pacing mode");
        println!("  2. Edit parameters");
        println!("  3. Program device");
        println!("  4. Stream egram samples");
        println!("  5. Set device id");
        println!("  6. Exit");

        match prompt("> ")?.as_str() {
            "1" => select_mode(&mut console)?,
            "2" => edit_parameters(&mut console)?,
            "3" => program_device(&mut console),
            "4" => stream_egram(&mut console)?,
            "5" => set_device_id(&mut console)?,
            "6" => break,
            _ => eprintln!("[ERROR] Invalid choice. Please enter 1 to 6."),
        }
    }

    console.session.close();
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        bail!("input closed");
    }
    Ok(line.trim().to_string())
}

// Opens either the simulator or a serial port on the console's session.
fn connect(console: &mut Console) -> Result<()> {
    println!("\nConnect to:");
    println!("  1. Simulated pacemaker");
    println!("  2. Serial port");

    match prompt("> ")?.as_str() {
        "1" => {
            let sim = SimulatedPacemaker::new(SIMULATOR_ID, console.codec.clone());
            console.session.open(Box::new(sim));
            console.session.set_device(SIMULATOR_ID);
        }
        "2" => {
            let Some((port_name, baud_rate)) = choose_port(&console.config)? else {
                return Ok(());
            };
            match SerialTransport::open(&port_name, baud_rate) {
                Ok(transport) => {
                    console.session.open(Box::new(transport));
                    let id = match prompt(&format!("Device id (default: {}): ", port_name))?
                        .as_str()
                    {
                        "" => port_name,
                        id => id.to_string(),
                    };
                    println!("{:?}", console.session.set_device(&id));
                }
                Err(e) => eprintln!("[ERROR] Failed to open port '{}': {}", port_name, e),
            }
        }
        _ => eprintln!("[ERROR] Invalid choice. Please enter 1 or 2."),
    }
    Ok(())
}

fn choose_port(config: &LinkConfig) -> Result<Option<(String, u32)>> {
    if let Some(port) = &config.port {
        return Ok(Some((port.clone(), config.baud_rate)));
    }

    let ports = match available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            eprintln!("[ERROR] Could not enumerate serial ports: {}", e);
            return Ok(None);
        }
    };
    if ports.is_empty() {
        eprintln!("[ERROR] No serial ports found.");
        return Ok(None);
    }

    println!("Available serial ports:");
    for (i, port) in ports.iter().enumerate() {
        println!("  {}: {}", i, port);
    }
    let port_index: usize = match prompt("Select a port (number): ")?.parse() {
        Ok(i) if i < ports.len() => i,
        _ => {
            eprintln!("[ERROR] Invalid port selection.");
            return Ok(None);
        }
    };

    println!("Available baud rates:");
    for (i, rate) in BAUD_RATES.iter().enumerate() {
        println!("  {}: {}", i, rate);
    }
    let baud_rate = match prompt("Select a baud rate (number, blank for config): ")?.as_str() {
        "" => config.baud_rate,
        choice => match choice.parse::<usize>() {
            Ok(i) if i < BAUD_RATES.len() => BAUD_RATES[i],
            _ => {
                eprintln!("[ERROR] Invalid baud rate selection.");
                return Ok(None);
            }
        },
    };

    Ok(Some((ports[port_index].clone(), baud_rate)))
}

fn select_mode(console: &mut Console) -> Result<()> {
    for (i, mode) in console.schema.modes().iter().enumerate() {
        println!("  {}: {:<5} {}", i, mode, mode.description());
    }
    let choice = prompt("Mode (number or name): ")?;
    let modes = console.schema.modes();
    let mode = match choice.parse::<usize>() {
        Ok(i) if i < modes.len() => modes[i],
        _ => match choice.parse::<Mode>() {
            Ok(mode) if modes.contains(&mode) => mode,
            _ => {
                eprintln!("[ERROR] Unknown mode '{}'.", choice);
                return Ok(());
            }
        },
    };

    console.mode = mode;
    console.inputs = console
        .store
        .load_or_defaults(&console.schema, &console.user, mode);
    Ok(())
}

fn edit_parameters(console: &mut Console) -> Result<()> {
    println!("\n--- {} parameters ---", console.mode);
    for field in console.schema.fields_for_mode(console.mode) {
        let current = console.inputs.get(&field.key).map_or("-", String::as_str);
        let allowed = match &field.domain {
            _ if field.fixed => "fixed".to_string(),
            Domain::Enumerated(literals) => literals
                .iter()
                .map(|l| l.literal.as_str())
                .collect::<Vec<_>>()
                .join("|"),
            Domain::RangedSegments(segments) => segments
                .iter()
                .map(|s| format!("{} step {}", s, s.increment))
                .collect::<Vec<_>>()
                .join(" or "),
        };
        println!(
            "  {:<20} {:>8} {:<4} {}",
            field.key, current, field.unit, allowed
        );
    }

    println!("Enter key=value pairs, blank line to finish.");
    loop {
        let line = prompt("> ")?;
        if line.is_empty() {
            break;
        }
        let Some((key, value)) = line.split_once('=') else {
            eprintln!("[ERROR] Expected key=value.");
            continue;
        };
        match console.schema.lookup(key.trim()) {
            Some(field) if field.fixed => eprintln!("[ERROR] {} is fixed.", field.key),
            Some(field) if !field.applies_to(console.mode) => {
                eprintln!("[ERROR] {} does not apply to {}.", field.key, console.mode)
            }
            Some(field) => {
                console
                    .inputs
                    .insert(field.key.clone(), value.trim().to_string());
            }
            None => eprintln!("[ERROR] Unknown parameter '{}'.", key.trim()),
        }
    }

    if let Err(errors) = validate(&console.schema, &console.inputs, console.mode) {
        for error in errors {
            eprintln!("[WARNING] {}", error);
        }
    }
    Ok(())
}

fn program_device(console: &mut Console) {
    let set = match validate(&console.schema, &console.inputs, console.mode) {
        Ok(set) => set,
        Err(errors) => {
            for error in errors {
                eprintln!("[ERROR] {}", error);
            }
            return;
        }
    };

    let timeout = console.config.read_timeout();
    match console.session.program(&console.codec, &set, timeout) {
        Ok(report) if report.echo_matches => println!("Device programmed for {}.", set.mode()),
        Ok(report) => {
            eprintln!("[WARNING] Device echo does not match the programmed values.");
            show_echo_differences(
                &console.codec,
                &report.sent[HEADER_LEN..],
                &report.response.echoed_payload,
            );
            return;
        }
        Err(e) => {
            eprintln!("[ERROR] Programming failed: {}", e);
            return;
        }
    }
    // Only a matching echo confirms what the device now holds.
    console.store.save(&console.user, &set);
    console.inputs = set.to_raw();
}

fn show_echo_differences(codec: &FrameCodec, sent: &[u8], echoed: &[u8]) {
    let (sent, echoed) = match (codec.decode_payload(sent), codec.decode_payload(echoed)) {
        (Ok(sent), Ok(echoed)) => (sent, echoed),
        (_, Err(e)) | (Err(e), _) => {
            eprintln!("[ERROR] Cannot read echo: {}", e);
            return;
        }
    };
    if sent.mode != echoed.mode {
        eprintln!("  mode: sent {}, device has {}", sent.mode, echoed.mode);
    }
    for ((key, ours), (_, theirs)) in sent.values.iter().zip(&echoed.values) {
        if ours != theirs {
            eprintln!(
                "  {}: sent {}, device has {}",
                key,
                ours.as_f64(),
                theirs.as_f64()
            );
        }
    }
}

fn stream_egram(console: &mut Console) -> Result<()> {
    let count = match prompt("Number of samples (default: 100): ")?.as_str() {
        "" => 100,
        text => match text.parse::<u64>() {
            Ok(n) if n > 0 => n,
            _ => {
                eprintln!("[ERROR] Invalid sample count.");
                return Ok(());
            }
        },
    };

    let (tx, rx) = mpsc::channel();
    let session = std::mem::take(&mut console.session);
    let handle = session.spawn_stream(
        console.codec.clone(),
        console.config.read_timeout(),
        Arc::new(AtomicBool::new(false)),
        move |sample| {
            let _ = tx.send(sample);
        },
    );

    for n in 1..=count {
        match rx.recv_timeout(STREAM_IDLE) {
            Ok(sample) if n % 10 == 0 => println!(
                "#{:<6} atrial {:>9.4}  ventricular {:>9.4}",
                n, sample.atrial, sample.ventricular
            ),
            Ok(_) => {}
            Err(_) => {
                eprintln!("[WARNING] Stream went quiet after {} samples.", n - 1);
                break;
            }
        }
    }

    let (session, result) = handle
        .join()
        .map_err(|_| anyhow!("egram stream worker panicked"))?;
    console.session = session;
    match result {
        Ok(summary) => println!(
            "Stream done: {} samples, {} dropped.",
            summary.samples, summary.dropped
        ),
        Err(e) => eprintln!("[ERROR] Stream failed: {}", e),
    }
    Ok(())
}

fn set_device_id(console: &mut Console) -> Result<()> {
    let id = prompt("Device id: ")?;
    if id.is_empty() {
        eprintln!("[ERROR] Device id cannot be empty.");
        return Ok(());
    }
    println!("{:?}", console.session.set_device(&id));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcm::frame::RESPONSE_LEN;
    use dcm::{Transport, TransportError};

    /// Answers every frame with an all-zero response.
    struct ForgetfulDevice;

    impl Transport for ForgetfulDevice {
        fn write(&mut self, _bytes: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        fn read(&mut self, max_len: usize, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
            Ok(vec![0; max_len.min(RESPONSE_LEN)])
        }

        fn flush(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn clear(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn console_with(transport: Box<dyn Transport>) -> Console {
        let schema = ParameterSchema::standard().unwrap();
        let codec = FrameCodec::new(&schema);
        let store = MemoryStore::new();
        let inputs = store.load_or_defaults(&schema, "tester", Mode::Vvi);
        Console {
            schema,
            codec,
            config: LinkConfig::default(),
            session: DeviceSession::with_transport(transport),
            store,
            user: "tester".to_string(),
            mode: Mode::Vvi,
            inputs,
        }
    }

    #[test]
    fn confirmed_programming_is_saved() {
        let codec = FrameCodec::new(&ParameterSchema::standard().unwrap());
        let mut console = console_with(Box::new(SimulatedPacemaker::new(SIMULATOR_ID, codec)));
        console.inputs.insert("LRL_ppm".to_string(), "72".to_string());

        program_device(&mut console);
        let saved = console.store.load("tester", Mode::Vvi).unwrap();
        assert_eq!(saved.get("LRL_ppm").map(String::as_str), Some("72"));
    }

    #[test]
    fn mismatched_echo_is_not_saved() {
        let mut console = console_with(Box::new(ForgetfulDevice));
        console.inputs.insert("LRL_ppm".to_string(), "72".to_string());
        let before = console.inputs.clone();

        program_device(&mut console);
        assert!(console.store.is_empty());
        assert_eq!(console.inputs, before);
    }
}
